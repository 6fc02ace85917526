// ABOUTME: Session module — the streaming controller that owns one response lifecycle.
// ABOUTME: Drives the vendor round-trip loop, tool execution, and final persistence.

pub mod controller;

pub use controller::{MAX_TOOL_ITERATIONS, SessionParams, run_session};
