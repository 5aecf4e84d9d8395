//! Core HTTP protocol data structures.
//!
//! This module holds the building blocks shared by the analyzer and the pipelines. Nothing
//! in here performs I/O; every type works on bytes already received.
//!
//! # Architecture
//!
//! - **Byte classes** ([`chars`]): the 256-entry classification table and log encoding
//! - **Buffer** ([`Buffer`]): edit-in-place byte container, with flags and analysers
//! - **Header index** ([`HeaderIndex`]): arena of header line descriptors
//! - **Message** ([`HttpMessage`]): resumable parse state and cached offsets
//!   - [`ParseState`]: one variant per resumption point
//!   - [`StartLine`]: request or status line spans
//! - **Headers** ([`header`]): lookup, capture and in-place edition of header lines
//! - **Methods** ([`Method`]): fixed method table
//! - **Fixed responses** ([`fixed`]): built-in error, monitor and redirect texts
//! - **Errors** ([`error`]): parse, edit and configuration errors
//!
//! # Offsets
//!
//! Every offset stored in these types is an absolute position in the [`Buffer`]. Editing
//! the buffer through [`HttpMessage::replace`] or [`HttpMessage::insert_line`] keeps the
//! message offsets coherent; header lengths are adjusted through [`header::HeaderCursor`].

pub mod chars;
pub mod fixed;
pub mod header;

mod buffer;
pub use buffer::Analysers;
pub use buffer::BUFSIZE;
pub use buffer::Buffer;
pub use buffer::BufferFlags;
pub use buffer::MAXREWRITE;

mod hdr_idx;
pub use hdr_idx::HeaderIndex;
pub use hdr_idx::MAX_HTTP_HDR;

mod message;
pub use message::ErrPos;
pub use message::HttpMessage;
pub use message::ParseState;
pub use message::RequestLine;
pub use message::Span;
pub use message::StartLine;
pub use message::StatusLine;

mod method;
pub use method::Method;

pub(crate) mod error;
pub use error::ConfigError;
pub use error::EditError;
pub use error::ParseError;
pub use error::ProxyError;
