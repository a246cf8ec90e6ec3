//! Error taxonomy for the ingestion pipeline
//!
//! Everything except [`InvocationError`] is scoped to one sub-event (a single
//! object reference, queue message or write chunk) and is reported, never
//! propagated past that scope.

use thiserror::Error;
use uuid::Uuid;

/// An object could not be read from blob storage
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("object key '{key}' is not valid percent-encoded UTF-8")]
    InvalidKey { key: String },

    #[error("object {container}/{key} not found")]
    NotFound { container: String, key: String },

    #[error("access denied to object {container}/{key}")]
    AccessDenied { container: String, key: String },

    #[error("reading object {container}/{key} was interrupted: {reason}")]
    Interrupted {
        container: String,
        key: String,
        reason: String,
    },

    #[error("blob store rejected request for {container}/{key}: {reason}")]
    Service {
        container: String,
        key: String,
        reason: String,
    },

    #[error("blob store unreachable: {0}")]
    Transport(String),
}

/// Tabular data could not be parsed
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unterminated quoted field starting before line {line}")]
    UnterminatedQuote { line: u64 },

    #[error("quote inside an unquoted field on line {line}")]
    StrayQuote { line: u64 },

    #[error("malformed CSV: {0}")]
    Malformed(#[from] csv::Error),
}

/// A queue message body could not be decoded into a row
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("message body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message body must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
}

/// Why one sub-event produced no records
#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Fetch(_) => "fetch",
            SourceError::Parse(_) => "parse",
            SourceError::Decode(_) => "decode",
        }
    }
}

/// Failure of a single batch put call against the record store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store answered and refused the request
    #[error("store rejected batch: {0}")]
    Rejected(String),

    /// No answer was received; retrying later chunks is pointless
    #[error("store unreachable: {0}")]
    Unreachable(String),
}

/// Items the store did not persist
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("chunk {chunk_index} ({} records) rejected: {source}", .ids.len())]
    ChunkRejected {
        chunk_index: usize,
        ids: Vec<Uuid>,
        #[source]
        source: StoreError,
    },

    #[error("chunk {chunk_index}: {} records left unprocessed after {attempts} attempt(s)", .ids.len())]
    Unprocessed {
        chunk_index: usize,
        ids: Vec<Uuid>,
        attempts: u32,
    },
}

impl WriteError {
    pub fn ids(&self) -> &[Uuid] {
        match self {
            WriteError::ChunkRejected { ids, .. } | WriteError::Unprocessed { ids, .. } => ids,
        }
    }

    pub fn chunk_index(&self) -> usize {
        match self {
            WriteError::ChunkRejected { chunk_index, .. }
            | WriteError::Unprocessed { chunk_index, .. } => *chunk_index,
        }
    }
}

/// Errors that fail the whole invocation
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("record store unavailable while writing chunk {chunk_index}: {source}")]
    StoreUnavailable {
        chunk_index: usize,
        #[source]
        source: StoreError,
    },
}
