// ABOUTME: Usage accountant — accumulates token counts across loop iterations.
// ABOUTME: Vendors report usage incrementally; totals are finalized at message_stop.

use crate::events::WireUsage;

/// A single usage report surfaced by a provider adapter mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Running prompt/completion totals for one session. Monotonically updated,
/// one increment per adapter usage report.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    input_tokens: u64,
    output_tokens: u64,
}

impl UsageTotals {
    pub fn add(&mut self, snapshot: UsageSnapshot) {
        self.input_tokens += snapshot.input_tokens;
        self.output_tokens += snapshot.output_tokens;
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Final totals in wire shape for the closing `message_delta`.
    pub fn to_wire(&self) -> WireUsage {
        WireUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}
