//! Asynchronous connection driving.
//!
//! This module feeds the analysers of a [`Session`](crate::session::Session) from tokio
//! streams and writes back what they release.
//!
//! # Components
//!
//! - [`HttpConnection`]: owns the client streams and:
//!   - Reads request bytes until the request analysers reach a verdict
//!   - Turns end of stream, read errors and elapsed deadlines into buffer events
//!   - Holds tarpitted requests until their deadline
//!   - Reads response heads from a server stream, forwarding interim responses
//!   - Writes replies synthesized by the proxy

mod http_connection;

pub use http_connection::HttpConnection;
