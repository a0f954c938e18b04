//! Error types shared by the artifact cache and the node inventory

use std::io;
use std::path::PathBuf;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, ExtrasError>;

/// Errors surfaced by `hpc-extras`.
///
/// A build cache miss is not an error; see [`crate::cache::BuildLookup::Miss`].
#[derive(Debug, thiserror::Error)]
pub enum ExtrasError {
    /// A requested run-output cache directory does not exist or is not a directory.
    #[error("cached output directory {} does not exist or isn't a directory", path.display())]
    MissingCacheEntry {
        /// Absolute path that was expected to hold the cached output.
        path: PathBuf,
    },

    /// The filtered nodes do not share a single socket:core:thread layout.
    #[error("cannot summarise CPUs - topology differs between nodes: {}", descriptors.join(", "))]
    HeterogeneousTopology {
        /// Distinct `S:C:T` descriptors observed, sorted.
        descriptors: Vec<String>,
    },

    /// Scheduler output could not be aligned to its header.
    #[error("malformed scheduler output at line {line}: {reason}")]
    MalformedSchedulerOutput {
        /// 1-based line number in the command output.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },

    /// A scheduler command could not be run or exited unsuccessfully.
    #[error("scheduler command `{command}` failed: {reason}")]
    SchedulerUnavailable {
        /// The command line that was attempted.
        command: String,
        /// Spawn error or exit status with stderr.
        reason: String,
    },

    /// A topology descriptor was not three positive integers.
    #[error("invalid socket:core:thread descriptor '{descriptor}'")]
    InvalidTopology {
        /// The offending descriptor.
        descriptor: String,
    },

    /// A cache key component or executable path cannot be mapped to a unique cache path.
    #[error("invalid cache key: {reason}")]
    InvalidCacheKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// A path did not have the expected relationship to another path.
    #[error("invalid path {}: {reason}", path.display())]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// Parameters that would not yield a finite geometric sequence.
    #[error("invalid sequence: {reason}")]
    InvalidSequence {
        /// Why the parameters were rejected.
        reason: String,
    },

    /// A configuration file could not be parsed or serialized.
    #[error("configuration error: {reason}")]
    Config {
        /// Parser or serializer message, including the file when known.
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted, including the path.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl ExtrasError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedSchedulerOutput {
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidCacheKey {
            reason: reason.into(),
        }
    }
}

/// Attach path context to `std::io` results.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| ExtrasError::io(f(), e))
    }
}
