//! Executable artifacts
//!
//! An artifact is a prebuilt launcher stub with a data section appended:
//!
//! ```text
//! ┌──────────────┬──────────────────┬───────────────────┬────────┬──────────┐
//! │ stub image   │ resource records │ varint(len ^ XOR) │ block  │ trailer? │
//! └──────────────┴──────────────────┴───────────────────┴────────┴──────────┘
//!                 ▲ section start
//! ```
//!
//! The block is the codec's output. Decoded, it holds the plugin records,
//! the engine property table and finally the VM bytecode. Windows stubs
//! locate the section through their own PE section table; every other
//! platform stores the section start in an 8-byte trailer.

pub mod layout;
pub mod pe;
pub mod platform;
pub mod reader;
pub mod writer;

#[cfg(test)]
mod tests;

pub use layout::{DataSection, BYTECODE_LENGTH_XOR, TRAILER_LEN};
pub use pe::PeError;
pub use platform::{Platform, STUB_PREFIX};
pub use reader::{ArtifactReader, DecodedArtifact, LoadedArtifact};
pub use writer::{ArtifactWriter, BuildReport};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;
use crate::engine::EngineError;
use crate::runtime::FAILURE_EXIT_CODE;

/// Build errors. None of them are retryable.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No target platform given and the host is not one we build for
    #[error("Cannot determine a target platform for this host")]
    UnsupportedHost,

    #[error("Launcher stub not found at {0}")]
    StubMissing(PathBuf),

    #[error("Failed to copy {} to {}: {source}", stub.display(), output.display())]
    Copy {
        stub: PathBuf,
        output: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to patch executable header of {}: {source}", path.display())]
    Patch {
        path: PathBuf,
        #[source]
        source: PeError,
    },

    /// The serializer produced nothing
    #[error("Failed to retrieve bytecode while compiling {}", output.display())]
    EmptyBytecode { output: PathBuf },

    #[error("Bytecode block of {0} bytes exceeds the 4 GiB format limit")]
    TooLarge(usize),

    /// The property table does not cover every engine property
    #[error("Engine property table has {found} slots, expected {expected}")]
    PropertyCount { expected: usize, found: usize },

    #[error(transparent)]
    Serialize(#[from] EngineError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for build operations
pub type BuildResult<T> = Result<T, BuildError>;

/// Load errors. All of them abort process start.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot determine the artifact format of this host")]
    UnsupportedHost,

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid executable header in {}: {source}", path.display())]
    Header {
        path: PathBuf,
        #[source]
        source: PeError,
    },

    /// The located offset does not leave room for a data section
    #[error("Data section offset {offset} lies outside the {len}-byte image")]
    OffsetOutOfRange { offset: u64, len: u64 },

    #[error("Data section truncated while reading {what}")]
    Truncated { what: &'static str },

    #[error("Malformed {what}: {source}")]
    Records {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The stored property table does not fit the running engine
    #[error("Engine protocol mismatch: {0}")]
    ProtocolMismatch(#[source] EngineError),

    /// `offset` is the loader's own count; `cursor` is the codec's count of
    /// bytecode bytes handed out, excluding the records ahead of it
    #[error("Bytecode rejected at offset {offset} (cursor {cursor}): {reason}")]
    BytecodeRejected {
        offset: u64,
        cursor: u64,
        reason: String,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl LoadError {
    /// Exit code for a process that failed to start.
    pub fn exit_code(&self) -> i32 {
        FAILURE_EXIT_CODE
    }

    fn from_io(
        what: &'static str,
        source: io::Error,
    ) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            LoadError::Truncated { what }
        } else {
            LoadError::Records { what, source }
        }
    }
}

/// Result type for load operations
pub type LoadResult<T> = Result<T, LoadError>;
