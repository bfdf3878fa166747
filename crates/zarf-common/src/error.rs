//! Error types for the Zarf admission agent
//!
//! Every error is scoped to a single admission request. Variants carry the
//! context needed to debug a rejected or unmutated object from the agent logs
//! alone: the resource kind, the reference being rewritten, or the address
//! being resolved.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The admitted object does not have the shape its kind requires
    #[error("decode error for {kind}: {message}")]
    Decode {
        /// Resource kind the hook expected (e.g., "HelmRepository")
        kind: String,
        /// Description of what failed to decode
        message: String,
    },

    /// Mirror configuration could not be loaded
    #[error("state load error [{source_name}]: {message}")]
    StateLoad {
        /// Where the state was read from (file path or secret name)
        source_name: String,
        /// Description of what failed
        message: String,
    },

    /// The service lookup backend failed while resolving an address
    ///
    /// "No matching service" is not an error; the address is used unchanged.
    #[error("service resolution error for {address}: {message}")]
    ServiceResolution {
        /// The address being resolved
        address: String,
        /// Description of what failed
        message: String,
    },

    /// An upstream image or URL reference is malformed
    #[error("invalid reference '{reference}': {message}")]
    ReferenceParse {
        /// The reference as found in the object
        reference: String,
        /// Why it could not be parsed
        message: String,
    },

    /// A mirrored reference could not be produced
    #[error("cannot transform reference '{reference}': {message}")]
    ReferenceTransform {
        /// The upstream reference
        reference: String,
        /// Why the transform failed
        message: String,
    },

    /// Patch construction violated an internal invariant
    #[error("patch build error at {path}: {message}")]
    PatchBuild {
        /// JSON pointer of the offending operation
        path: String,
        /// Description of the violation
        message: String,
    },

    /// The HTTPS listener failed
    #[error("server error: {0}")]
    Server(String),

    /// Invalid agent configuration
    #[error("configuration error [{field}]: {message}")]
    Config {
        /// The configuration option at fault
        field: String,
        /// Description of what's invalid
        message: String,
    },
}

impl Error {
    /// Create a decode error for a resource kind
    pub fn decode_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a state load error with the given message
    pub fn state_load(msg: impl Into<String>) -> Self {
        Self::StateLoad {
            source_name: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a state load error naming where the state was read from
    pub fn state_load_from(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::StateLoad {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a service resolution error for an address
    pub fn service_resolution(address: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ServiceResolution {
            address: address.into(),
            message: msg.into(),
        }
    }

    /// Create a reference parse error
    pub fn reference_parse(reference: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ReferenceParse {
            reference: reference.into(),
            message: msg.into(),
        }
    }

    /// Create a reference transform error
    pub fn reference_transform(reference: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ReferenceTransform {
            reference: reference.into(),
            message: msg.into(),
        }
    }

    /// Create a patch build error at a JSON pointer
    pub fn patch_build(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PatchBuild {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error for an option
    pub fn config(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Check whether redelivering the same request could succeed
    ///
    /// The agent never retries internally. This only informs logging and the
    /// outcome label on metrics: state and lookup failures are transient, a
    /// malformed object or reference fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::StateLoad { .. } => true,
            Error::ServiceResolution { .. } => true,
            Error::Decode { .. } => false,
            Error::ReferenceParse { .. } => false,
            Error::ReferenceTransform { .. } => false,
            Error::PatchBuild { .. } => false,
            Error::Server(_) => false,
            Error::Config { .. } => false,
        }
    }

    /// Short, stable name of the error kind for logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "kube",
            Error::Decode { .. } => "decode",
            Error::StateLoad { .. } => "state_load",
            Error::ServiceResolution { .. } => "service_resolution",
            Error::ReferenceParse { .. } => "reference_parse",
            Error::ReferenceTransform { .. } => "reference_transform",
            Error::PatchBuild { .. } => "patch_build",
            Error::Server(_) => "server",
            Error::Config { .. } => "config",
        }
    }
}
