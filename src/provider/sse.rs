// ABOUTME: Incremental server-sent-event framing — splits raw bytes into frames.
// ABOUTME: Accumulates a buffer and only consumes complete blank-line-terminated frames.

/// One complete frame from a vendor event stream: an optional event name and
/// the joined data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Buffering decoder for a vendor's event stream. Bytes arrive in arbitrary
/// chunks; frames are only yielded once their terminating blank line has been
/// seen, so a frame split across network reads is reassembled correctly.
///
/// The buffer holds raw bytes and decodes per complete frame. Chunk
/// boundaries can land mid-character, so decoding each chunk independently
/// would mangle multi-byte UTF-8.
#[derive(Debug, Default)]
pub struct SseFrameBuffer {
    buffer: Vec<u8>,
    /// Frames dropped because they carried no usable data (heartbeats,
    /// comments). Surfaced at trace level only.
    dropped: u64,
}

impl SseFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(boundary) = find_frame_boundary(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..boundary.end).collect();
            let block = String::from_utf8_lossy(&raw[..boundary.block_len]);
            match parse_block(&block) {
                Some(frame) => frames.push(frame),
                None => {
                    self.dropped += 1;
                    tracing::trace!(block = %block, "dropping frame with no data lines");
                }
            }
        }
        frames
    }

    /// Count of heartbeat/comment frames dropped so far on this stream.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

struct FrameBoundary {
    /// Length of the frame block itself, excluding the blank-line terminator.
    block_len: usize,
    /// Total bytes to consume from the buffer, terminator included.
    end: usize,
}

/// Locate the first complete frame: bytes up to a blank line (`\n\n` or
/// `\r\n\r\n`), whichever comes first.
fn find_frame_boundary(buffer: &[u8]) -> Option<FrameBoundary> {
    let lf = find_bytes(buffer, b"\n\n").map(|at| FrameBoundary {
        block_len: at,
        end: at + 2,
    });
    let crlf = find_bytes(buffer, b"\r\n\r\n").map(|at| FrameBoundary {
        block_len: at,
        end: at + 4,
    });
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.block_len <= b.block_len { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse one frame block into event name + joined data lines. Comment lines
/// (leading `:`) and unknown fields are skipped; a block with no data lines
/// yields nothing.
fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}
