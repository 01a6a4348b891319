//! Instances of an ec2 environment

use std::fmt;
use std::slice;
use std::sync::OnceLock;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::Ec2Environ;
use super::api::{InstanceRecord, InstanceState};
use crate::{Error, Instance, InstanceId, Result};

/// An instance as last seen by its environment.
///
/// The DNS name is cached once the provider reports a non-empty one; it never
/// changes after assignment.
#[derive(Clone)]
pub struct Ec2Instance {
    id: InstanceId,
    state: InstanceState,
    dns_name: OnceLock<String>,
    environ: Ec2Environ,
}

impl Ec2Instance {
    pub(crate) fn new(environ: Ec2Environ, record: InstanceRecord) -> Self {
        let dns_name = OnceLock::new();
        if let Some(name) = record.dns_name.filter(|n| !n.is_empty()) {
            let _ = dns_name.set(name);
        }
        Self {
            id: record.id,
            state: record.state,
            dns_name,
            environ,
        }
    }

    /// Provider-assigned id
    #[must_use]
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// State when this handle was created
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// The DNS name, if already known
    #[must_use]
    pub fn cached_dns_name(&self) -> Option<&str> {
        self.dns_name.get().map(String::as_str)
    }

    /// The DNS name, re-listing the instance under the long strategy until
    /// the provider assigns one.
    ///
    /// Fails with [`Error::InstanceNotFound`] if the instance stops being
    /// listed and with [`Error::AddressTimeout`] if the strategy runs out.
    #[instrument(skip(self), fields(instance = %self.id))]
    pub async fn resolve_dns_name(&self) -> Result<String> {
        if let Some(name) = self.dns_name.get() {
            return Ok(name.clone());
        }

        let strategy = self.environ.config().long_attempt;
        let mut attempt = strategy.start();
        while attempt.next().await {
            let lookup = match self.environ.list_instances(slice::from_ref(&self.id)).await {
                Ok(lookup) => lookup,
                Err(e) if e.is_missing_instances() => {
                    return Err(Error::InstanceNotFound { id: self.id.clone() });
                }
                Err(e) => return Err(e.context(format!("find instance {}", self.id))),
            };
            if let Some(name) = lookup.found().find_map(Ec2Instance::cached_dns_name) {
                debug!(dns_name = name, attempts = attempt.count(), "address assigned");
                return Ok(self.dns_name.get_or_init(|| name.to_string()).clone());
            }
            debug!(attempt = attempt.count(), "no address yet");
        }

        Err(Error::AddressTimeout {
            id: self.id.clone(),
            waited: strategy.total,
        })
    }
}

#[async_trait]
impl Instance for Ec2Instance {
    fn id(&self) -> &InstanceId {
        &self.id
    }

    async fn dns_name(&self) -> Result<String> {
        self.resolve_dns_name().await
    }
}

impl fmt::Debug for Ec2Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ec2Instance")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("dns_name", &self.dns_name.get())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Ec2Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}
