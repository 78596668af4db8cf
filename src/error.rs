//! Error types for cluster assembly
//!
//! Every fatal error names the operation that failed so a failure deep inside
//! a host's orchestration can be localized from the top-level message.

use thiserror::Error;

/// Main error type for kubeweave operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A remote command failed to run or exited non-zero
    #[error("{operation}: {message}")]
    Exec {
        /// Human readable description of the attempted operation
        operation: String,
        /// Captured stderr/stdout or transport error
        message: String,
    },

    /// Expected pattern missing from command output
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// What was being extracted (certificate key, join command, ...)
        what: String,
        /// Why extraction failed
        message: String,
    },

    /// A kubeadm init/join step failed on every attempt
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        /// The step that was retried
        operation: String,
        /// How many attempts were made
        attempts: u32,
        /// The error from the last attempt
        #[source]
        source: Box<Error>,
    },

    /// Invalid cluster configuration
    #[error("invalid cluster config: {0}")]
    Config(String),

    /// Kubernetes version could not be parsed or compared
    #[error("invalid kubernetes version '{version}': {message}")]
    Version {
        /// The offending version string
        version: String,
        /// Parser message
        message: String,
    },

    /// Base64 payload could not be decoded
    #[error("failed to decode {what}: {source}")]
    Decode {
        /// What was being decoded
        what: String,
        /// Underlying decode error
        #[source]
        source: base64::DecodeError,
    },

    /// Template rendering failed
    #[error("failed to render {template}: {message}")]
    Template {
        /// Template name
        template: String,
        /// Renderer message
        message: String,
    },

    /// A per-host task failed
    #[error("host {host}: {source}")]
    Host {
        /// Node name
        host: String,
        /// Failure inside that host's task
        #[source]
        source: Box<Error>,
    },

    /// Local I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an exec error for the named operation
    pub fn exec(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exec {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a version error
    pub fn version(version: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Version {
            version: version.into(),
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Wrap this error with the host it happened on
    pub fn on_host(self, host: impl Into<String>) -> Self {
        Self::Host {
            host: host.into(),
            source: Box::new(self),
        }
    }

    /// Re-label an exec error with a more specific operation description.
    ///
    /// Non-exec errors pass through unchanged.
    pub fn context(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Exec { message, .. } => Self::Exec {
                operation: operation.into(),
                message,
            },
            other => other,
        }
    }
}
