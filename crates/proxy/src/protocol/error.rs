use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("parse error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("buffer edit error: {source}")]
    Edit {
        #[from]
        source: EditError,
    },

    #[error("configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid start line at offset {offset}")]
    InvalidStartLine { offset: usize },
}

impl ParseError {
    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_start_line(offset: usize) -> Self {
        Self::InvalidStartLine { offset }
    }
}

/// Failure of the in-place buffer edit contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("no room for edit, need {required} bytes but only {available} available")]
    NoSpace { required: usize, available: usize },

    #[error("edit range {start}..{end} out of buffer bounds {len}")]
    OutOfRange { start: usize, end: usize, len: usize },
}

impl EditError {
    pub fn no_space(required: usize, available: usize) -> Self {
        Self::NoSpace { required, available }
    }

    pub fn out_of_range(start: usize, end: usize, len: usize) -> Self {
        Self::OutOfRange { start, end, len }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown backend: {name}")]
    UnknownBackend { name: String },

    #[error("backend references form a cycle through {name}")]
    CyclicBackend { name: String },

    #[error("duplicate proxy: {name}")]
    DuplicateProxy { name: String },

    #[error("invalid network: {reason}")]
    InvalidNetwork { reason: String },

    #[error("invalid option: {name}")]
    InvalidOption { name: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid pattern: {source}")]
    Pattern {
        #[from]
        source: regex::Error,
    },

    #[error("invalid json: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn unknown_backend<S: ToString>(name: S) -> Self {
        Self::UnknownBackend { name: name.to_string() }
    }

    pub fn invalid_network<S: ToString>(reason: S) -> Self {
        Self::InvalidNetwork { reason: reason.to_string() }
    }

    pub fn invalid_value<S: ToString>(field: &'static str, reason: S) -> Self {
        Self::InvalidValue { field, reason: reason.to_string() }
    }
}

/// Errors raised while a pipeline rewrites a complete message.
///
/// The analysers never surface these to callers: they are turned into the matching fixed
/// response (400 on the request side, 502 on the response side).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Edit(#[from] EditError),
}
