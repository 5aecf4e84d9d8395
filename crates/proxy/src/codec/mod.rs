//! HTTP message head parsing.
//!
//! This module turns bytes arriving in arbitrary chunks into a parsed message head: the
//! start line spans and header lengths recorded in an [`HttpMessage`] and a
//! [`HeaderIndex`]. Parsing is resumable after any byte, nothing is copied out of the
//! buffer, and the only rewrites done here are folding flattening and the removal of empty
//! lines before the start line.
//!
//! # Components
//!
//! - [`analyze`]: drives a request or a response through the header states
//! - [`parse_request_line`] / [`parse_status_line`]: the start line state machines, also
//!   used by the pipelines to re-parse a start line they rewrote
//!
//! [`HttpMessage`]: crate::protocol::HttpMessage
//! [`HeaderIndex`]: crate::protocol::HeaderIndex

mod analyzer;
mod start_line;

pub use analyzer::analyze;
pub use start_line::{Progress, parse_request_line, parse_status_line};
