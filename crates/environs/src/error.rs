//! Error type for environ operations

use std::sync::Arc;
use std::time::Duration;

use stratus_storage::StorageError;
use thiserror::Error;

use crate::InstanceId;
use crate::ec2::{ApiError, ImageError};

/// Result type for environ operations
pub type Result<T> = std::result::Result<T, Error>;

/// Everything an environ operation can fail with.
///
/// Each variant names what was being attempted; remote causes are kept as
/// the error source.
#[derive(Debug, Error)]
pub enum Error {
    /// Bootstrap found an existing bootstrap record
    #[error("environment '{environ}' is already bootstrapped")]
    AlreadyBootstrapped {
        /// Environment name
        environ: String,
    },

    /// An operation needing the bootstrap record found none
    #[error("environment '{environ}' is not bootstrapped")]
    NotBootstrapped {
        /// Environment name
        environ: String,
    },

    /// Some requested instances are not (yet) visible. This is the expected
    /// transient outcome of listing, not a hard failure.
    #[error("instances not found: {}", join_ids(.ids))]
    MissingInstances {
        /// Ids that were not found
        ids: Vec<InstanceId>,
    },

    /// An instance disappeared while it was being polled
    #[error("cannot find instance {id}")]
    InstanceNotFound {
        /// The vanished instance
        id: InstanceId,
    },

    /// The provider never assigned an address within the polling budget
    #[error("timed out after {waited:?} waiting for an address for instance {id}")]
    AddressTimeout {
        /// The instance still lacking an address
        id: InstanceId,
        /// The budget that was exhausted
        waited: Duration,
    },

    /// Run-instances reported a number of instances other than one
    #[error("expected 1 started instance, got {got}")]
    UnexpectedInstanceCount {
        /// How many the API reported
        got: usize,
    },

    /// A compute API call failed
    #[error("cannot {operation}: {source}")]
    Compute {
        /// What was being attempted
        operation: String,
        /// The API error
        #[source]
        source: ApiError,
    },

    /// A state store call failed
    #[error("cannot {operation}: {source}")]
    State {
        /// What was being attempted
        operation: String,
        /// The storage error, shared because a cached verification failure is
        /// handed out again on later calls
        #[source]
        source: Arc<StorageError>,
    },

    /// The stored bootstrap record could not be encoded or decoded
    #[error("bootstrap state at '{key}' is malformed: {source}")]
    StateFormat {
        /// Blob key of the record
        key: String,
        /// Serialization error
        #[source]
        source: serde_json::Error,
    },

    /// No machine image could be selected
    #[error("cannot find image: {source}")]
    Image {
        /// The selector's error
        #[source]
        source: ImageError,
    },

    /// Provider configuration was rejected
    #[error("invalid provider configuration: {reason}")]
    Config {
        /// Why it was rejected
        reason: String,
    },

    /// The configured region has no known endpoints
    #[error("no endpoints known for region '{region}', opening '{environ}'")]
    UnknownRegion {
        /// The region name
        region: String,
        /// The environment being opened
        environ: String,
    },

    /// The registry has no provider of this kind
    #[error("no registered provider for '{kind}'")]
    UnknownProvider {
        /// Requested provider kind
        kind: String,
    },

    /// A provider of this kind is already registered
    #[error("provider '{kind}' is already registered")]
    DuplicateProvider {
        /// Provider kind
        kind: String,
    },

    /// A failure wrapped with the higher-level step it interrupted
    #[error("cannot {operation}: {source}")]
    Context {
        /// The interrupted step
        operation: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn compute(operation: impl Into<String>, source: ApiError) -> Self {
        Self::Compute {
            operation: operation.into(),
            source,
        }
    }

    pub(crate) fn state(operation: impl Into<String>, source: impl Into<Arc<StorageError>>) -> Self {
        Self::State {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Wrap this error with the step it interrupted
    #[must_use]
    pub fn context(self, operation: impl Into<String>) -> Self {
        Self::Context {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any [`Error::Context`] wrappers
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this is the "still missing" listing signal
    #[must_use]
    pub fn is_missing_instances(&self) -> bool {
        matches!(self.root(), Self::MissingInstances { .. })
    }

    /// Whether this is the "already bootstrapped" precondition failure
    #[must_use]
    pub fn is_already_bootstrapped(&self) -> bool {
        matches!(self.root(), Self::AlreadyBootstrapped { .. })
    }
}

fn join_ids(ids: &[InstanceId]) -> String {
    ids.iter()
        .map(InstanceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
