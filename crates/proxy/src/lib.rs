//! The HTTP engine of a micro reverse proxy
//!
//! This crate analyses HTTP/1.x message heads as they arrive, in arbitrary chunks, and
//! applies the policies of a load-balancing proxy to them directly in the receive buffer:
//! header filters, backend switching, persistence cookies, forwarded-address headers,
//! redirects, statistics access and cacheability checks.
//!
//! # Features
//!
//! - Resumable request and response head analyzer, byte by byte
//! - Zero-copy header index describing every header line
//! - In-place header rewriting with offset bookkeeping
//! - Frontend and backend rule sets, evaluated until the backend settles
//! - Cookie based persistence, in insert, rewrite and prefix modes
//! - Application session learning from cookies and URIs
//! - Tarpit, monitor URI, redirects and built-in error responses
//! - Asynchronous driving of sessions over tokio streams
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::time::Instant;
//!
//! use micro_proxy::connection::HttpConnection;
//! use micro_proxy::pipeline::Analysis;
//! use micro_proxy::proxy::Registry;
//! use micro_proxy::session::Session;
//! use tokio::io::AsyncWriteExt;
//! use tokio::net::{TcpListener, TcpStream};
//! use tracing::{error, info, warn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn Error>> {
//!     tracing_subscriber::fmt().init();
//!
//!     let registry = Registry::from_json(r#"{
//!         "proxies": [
//!             { "id": "www", "options": ["httpclose"], "servers": [{ "id": "s1", "address": "127.0.0.1:8081" }] }
//!         ]
//!     }"#)?;
//!     let fe = registry.get("www").ok_or("frontend www is missing")?;
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     info!(port = 8080, "start listening");
//!     let ids = AtomicU64::new(0);
//!
//!     loop {
//!         let (stream, cli_addr) = match listener.accept().await {
//!             Ok(accepted) => accepted,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!         let mut s = Session::new(ids.fetch_add(1, Ordering::Relaxed), fe.clone(), cli_addr, Instant::now());
//!
//!         tokio::spawn(async move {
//!             let (reader, writer) = stream.into_split();
//!             let mut connection = HttpConnection::new(reader, writer);
//!
//!             match connection.process_request(&mut s).await {
//!                 Ok(Analysis::Forward) => {}
//!                 Ok(_) => return,
//!                 Err(e) => {
//!                     error!(cause = %e, "request processing failed");
//!                     return;
//!                 }
//!             }
//!
//!             // the request body relay is left out
//!             let Ok(mut server) = TcpStream::connect("127.0.0.1:8081").await else {
//!                 return;
//!             };
//!             if server.write_all(s.req.as_bytes()).await.is_err() {
//!                 return;
//!             }
//!             if let Err(e) = connection.process_response(&mut s, &mut server).await {
//!                 error!(cause = %e, "response processing failed");
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`protocol`]: buffers, header index, message state and fixed responses
//! - [`codec`]: the start line and header state machines
//! - [`proxy`]: proxy and server definitions, rules, conditions and JSON configuration
//! - [`session`]: per-connection state, transaction flags and termination codes
//! - [`pipeline`]: the request and response analysers
//! - [`connection`]: asynchronous driving of a session over tokio streams
//!
//! # Error Handling
//!
//! The crate uses custom error types that implement `std::error::Error`:
//!
//! - [`protocol::ProxyError`]: Top-level error type
//! - [`protocol::ParseError`]: Message head parsing errors
//! - [`protocol::EditError`]: Buffer edits which could not be performed
//! - [`protocol::ConfigError`]: Configuration errors
//!
//! Errors met while analysing a message never escape the analysers: they are turned into
//! the matching error response and recorded in the session termination code.
//!
//! # Limitations
//!
//! - HTTP/1.x heads only, bodies are forwarded untouched
//! - No server selection algorithm: the caller connects to the server
//! - Maximum header size: the buffer size minus the rewrite reserve
//! - Maximum number of headers: 100

pub mod codec;
pub mod connection;
pub mod pipeline;
pub mod protocol;
pub mod proxy;
pub mod session;

mod utils;
