//! The small set of typed, matchable error kinds at component boundaries.
//!
//! Plumbing that can only fail for reasons nobody needs to match on keeps
//! using `anyhow::Result`; anything a caller (the driver, in practice)
//! needs to branch on -- to pick an exit code, or to decide whether a
//! phase can continue -- returns one of these instead.

use std::path::PathBuf;

use thiserror::Error;

/// Failure modes of [`crate::codec`]'s reader.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad signature: expected magic {expected:?}, found {found:?}")]
    BadSignature { expected: [u8; 4], found: [u8; 4] },

    #[error("truncated stream: expected at least {needed} more byte(s), found {available}")]
    TruncatedStream { needed: usize, available: usize },

    #[error("unexpected record shape in block {block}: {detail}")]
    UnexpectedRecordShape { block: &'static str, detail: String },

    #[error("i/o error reading/writing manifest")]
    Io(#[from] std::io::Error),
}

/// Component-boundary errors surfaced by the core, named closely after
/// the error kinds in spec §7.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not even create the temp file `atomic_write` stages its
    /// output into, alongside `path`.
    #[error("failed to create temp file for {path}")]
    FailedToCreateTempFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The writer callback, or the flush following it, failed partway
    /// through staging `path`'s new contents.
    #[error("stream error writing {path}")]
    HasStreamErrors {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The final rename of the staged temp file over `path` failed.
    #[error("failed to rename staged file into place at {path}")]
    FailedToRename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read/write manifest for {path}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("dependency graph is invalid: non-empty graph has no roots")]
    GraphInvalid,

    #[error("found cycles.\n{trace}")]
    Cycle { trace: String },

    #[error("found isolated cycles (unreachable from main: {unreachable:?})")]
    IsolatedIsland { unreachable: Vec<String> },

    #[error("{tool} exited with {status}")]
    Subprocess { tool: String, status: String },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl BuildError {
    /// Map this error onto the process exit code named in spec §6/§7.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Config(_) => 1,
            _ => 2,
        }
    }
}
