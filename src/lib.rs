// ABOUTME: Library root for modelrelay — a streaming model-invocation engine.
// ABOUTME: Turns a stored conversation plus a user turn into a live event stream.

pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod history;
pub mod message;
pub mod provider;
pub mod session;
pub mod store;
pub mod tools;
pub mod usage;
