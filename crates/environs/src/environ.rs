//! Provider-neutral environment contract

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Provider-assigned instance identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wrap a provider id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How to reach the cluster's control plane
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateInfo {
    /// `host:port` of each reachable control-plane instance
    pub addrs: Vec<String>,
}

/// Outcome of looking up a list of instance ids.
///
/// Slot `i` always corresponds to requested id `i`. A lookup is only handed
/// out when at least one slot is filled; `error` then records why the rest are
/// empty (usually [`Error::MissingInstances`]).
#[derive(Debug)]
pub struct InstanceLookup<I> {
    slots: Vec<Option<I>>,
    error: Option<Error>,
}

impl<I> InstanceLookup<I> {
    /// Build a lookup from its slots and the error that ended gathering
    pub fn new(slots: Vec<Option<I>>, error: Option<Error>) -> Self {
        Self { slots, error }
    }

    /// Lookup of zero ids
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Slots in request order
    #[must_use]
    pub fn slots(&self) -> &[Option<I>] {
        &self.slots
    }

    /// Why some slots are empty, if any are
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Every requested id was found
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// The instances that were found, in request order
    pub fn found(&self) -> impl Iterator<Item = &I> {
        self.slots.iter().flatten()
    }

    /// Split into slots and the terminating error
    pub fn into_parts(self) -> (Vec<Option<I>>, Option<Error>) {
        (self.slots, self.error)
    }

    /// All instances, or the error if any slot is empty
    pub fn into_complete(self) -> Result<Vec<I>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        // Without an error every slot is filled.
        Ok(self.slots.into_iter().flatten().collect())
    }

    /// Convert every found instance
    pub fn map<J>(self, mut f: impl FnMut(I) -> J) -> InstanceLookup<J> {
        InstanceLookup {
            slots: self.slots.into_iter().map(|slot| slot.map(&mut f)).collect(),
            error: self.error,
        }
    }
}

/// A compute instance belonging to an environment
#[async_trait]
pub trait Instance: Send + Sync + fmt::Debug {
    /// Provider-assigned id
    fn id(&self) -> &InstanceId;

    /// Public DNS name, waiting for the provider to assign one if needed
    async fn dns_name(&self) -> Result<String>;
}

/// A provisioned (or provisionable) cluster environment.
///
/// Implementations expect one caller per environment at a time; concurrent
/// `bootstrap` calls on the same environment are not safe.
#[async_trait]
pub trait Environ: Send + Sync + fmt::Debug {
    /// Environment name
    fn name(&self) -> &str;

    /// Start the first control-plane instance and record it durably.
    /// Fails if the environment was bootstrapped before.
    async fn bootstrap(&self) -> Result<()>;

    /// Addresses of the recorded control-plane instances
    async fn state_info(&self) -> Result<StateInfo>;

    /// Start a new instance for machine `machine_id`
    async fn start_instance(&self, machine_id: u32, info: &StateInfo) -> Result<Arc<dyn Instance>>;

    /// Terminate the given instances
    async fn stop_instances(&self, instances: &[Arc<dyn Instance>]) -> Result<()>;

    /// Look up instances by id, tolerating ids that are not visible yet
    async fn instances(&self, ids: &[InstanceId]) -> Result<InstanceLookup<Arc<dyn Instance>>>;

    /// Terminate every instance of the environment, plus `instances`, then
    /// forget the bootstrap record
    async fn destroy(&self, instances: &[Arc<dyn Instance>]) -> Result<()>;
}

/// Opens environments of one provider kind
pub trait EnvironProvider: Send + Sync {
    /// Open the environment `name` with provider-specific `config`
    fn open(&self, name: &str, config: serde_json::Value) -> Result<Arc<dyn Environ>>;
}
