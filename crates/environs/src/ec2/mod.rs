//! Environments on an EC2-style compute API.
//!
//! An environment owns one security group, `<group_prefix>-<name>`, which
//! every instance joins, plus one group per machine. Listing and terminating
//! are scoped to pending or running members of the environment group.
//!
//! The compute API is only eventually consistent: a group that was just
//! created may not be usable yet, a started instance may not be listed yet,
//! and addresses are assigned some time after start. Each of those windows is
//! covered by one of the two retry strategies in [`ProviderConfig`], and only
//! the error that signals the window is retried.

mod api;
mod config;
mod groups;
mod image;
mod instance;
mod permissions;
mod state;

use std::fmt;
use std::slice;
use std::sync::Arc;

use async_trait::async_trait;
use stratus_storage::BlobStore;
use tracing::{debug, info, instrument, warn};

pub use api::{
    ApiError, ApiErrorKind, ApiResult, ComputeApi, InstanceFilter, InstanceRecord, InstanceState,
    IpPermission, RunInstancesRequest, SecurityGroup, SecurityGroupInfo, SourceGroup, codes,
};
pub use config::{ENV_PREFIX, ProviderConfig, REGIONS, Region};
pub use groups::{GROUP_DESCRIPTION, SecurityGroupReconciler};
pub use image::{ImageConstraint, ImageError, ImageSelector, ImageSpec};
pub use instance::Ec2Instance;
pub use permissions::{Peer, PermKey, PermSet};
pub use state::{BootstrapState, StateStore};

use crate::{Environ, EnvironProvider, Error, Instance, InstanceId, InstanceLookup, Result, StateInfo};

/// Clients for one region
#[derive(Clone)]
pub struct Clients {
    /// Compute API
    pub compute: Arc<dyn ComputeApi>,
    /// Blob store holding the bootstrap record
    pub storage: Arc<dyn BlobStore>,
}

/// Builds authenticated clients for a region. Credential handling lives
/// behind this trait.
pub trait Connector: Send + Sync {
    /// Clients for `region`, configured by `config`
    fn connect(&self, config: &ProviderConfig, region: &Region) -> Result<Clients>;
}

/// Opens ec2 environments
#[derive(Clone)]
pub struct Ec2Provider {
    connector: Arc<dyn Connector>,
    images: Arc<dyn ImageSelector>,
}

impl Ec2Provider {
    /// Provider connecting through `connector` and choosing images with
    /// `images`
    pub fn new(connector: Arc<dyn Connector>, images: Arc<dyn ImageSelector>) -> Self {
        Self { connector, images }
    }

    /// Open environment `name` with a typed configuration
    pub fn open_ec2(&self, name: &str, config: ProviderConfig) -> Result<Ec2Environ> {
        config.validate()?;
        let region = Region::lookup(&config.region).ok_or_else(|| Error::UnknownRegion {
            region: config.region.clone(),
            environ: name.to_string(),
        })?;
        let clients = self.connector.connect(&config, region)?;
        debug!(environ = %name, region = region.name, "opened ec2 environment");

        Ok(Ec2Environ {
            inner: Arc::new(Inner {
                name: name.to_string(),
                region,
                groups: SecurityGroupReconciler::new(clients.compute.clone()),
                state: StateStore::new(clients.storage, config.state_key.clone()),
                compute: clients.compute,
                images: self.images.clone(),
                config,
            }),
        })
    }
}

impl EnvironProvider for Ec2Provider {
    fn open(&self, name: &str, config: serde_json::Value) -> Result<Arc<dyn Environ>> {
        let config = ProviderConfig::from_value(config)?;
        Ok(Arc::new(self.open_ec2(name, config)?))
    }
}

struct Inner {
    name: String,
    config: ProviderConfig,
    region: &'static Region,
    compute: Arc<dyn ComputeApi>,
    images: Arc<dyn ImageSelector>,
    groups: SecurityGroupReconciler,
    state: StateStore,
}

/// One ec2 environment. Clones share the same clients and state store.
#[derive(Clone)]
pub struct Ec2Environ {
    inner: Arc<Inner>,
}

impl Ec2Environ {
    /// Environment name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    /// Region the environment lives in
    #[must_use]
    pub fn region(&self) -> &'static Region {
        self.inner.region
    }

    /// The bootstrap record store
    #[must_use]
    pub fn state_store(&self) -> &StateStore {
        &self.inner.state
    }

    /// Name of the group every instance of the environment joins
    #[must_use]
    pub fn group_name(&self) -> String {
        format!("{}-{}", self.inner.config.group_prefix, self.inner.name)
    }

    /// Name of the group only machine `machine_id` joins
    #[must_use]
    pub fn machine_group_name(&self, machine_id: u32) -> String {
        format!("{}-{machine_id}", self.group_name())
    }

    /// Reconcile the environment group and the group of `machine_id`;
    /// returns both, environment group first
    pub async fn set_up_groups(&self, machine_id: u32) -> Result<Vec<SecurityGroup>> {
        let env_rules = [
            IpPermission::tcp(22, 22, "0.0.0.0/0"),
            IpPermission::tcp(
                self.inner.config.control_plane_port,
                self.inner.config.control_plane_port,
                "0.0.0.0/0",
            ),
        ];
        let env_group = self
            .inner
            .groups
            .ensure_group(&self.group_name(), &env_rules)
            .await?;
        let machine_group = self
            .inner
            .groups
            .ensure_group(&self.machine_group_name(machine_id), &[])
            .await?;
        Ok(vec![env_group, machine_group])
    }

    /// Start one instance for `machine_id`.
    ///
    /// `info` and `is_control_plane` are handed to the instance as user data.
    /// A run that fails because a freshly created group is not visible yet is
    /// retried under the short strategy; every other failure is returned at
    /// once.
    #[instrument(skip(self, info), fields(environ = %self.inner.name))]
    pub async fn launch_instance(
        &self,
        machine_id: u32,
        info: &StateInfo,
        is_control_plane: bool,
    ) -> Result<Ec2Instance> {
        let image = self
            .inner
            .images
            .find_image(&self.inner.config.image_constraint())
            .await
            .map_err(|source| Error::Image { source })?;
        let security_groups = self.set_up_groups(machine_id).await?;

        let user_data = serde_json::json!({
            "machine-id": machine_id,
            "control-plane": is_control_plane,
            "state-addrs": info.addrs,
        });
        let request = RunInstancesRequest {
            image_id: image.image_id,
            min_count: 1,
            max_count: 1,
            instance_type: self.inner.config.instance_type.clone(),
            security_groups,
            user_data: Some(user_data.to_string().into_bytes()),
        };

        let records = self
            .inner
            .config
            .short_attempt
            .retry_while(
                || self.inner.compute.run_instances(&request),
                |e| e.has_code(codes::GROUP_NOT_FOUND),
            )
            .await
            .map_err(|e| Error::compute("run instances", e))?;

        let [record] = <[InstanceRecord; 1]>::try_from(records)
            .map_err(|records| Error::UnexpectedInstanceCount { got: records.len() })?;
        info!(instance = %record.id, machine_id, is_control_plane, "started instance");
        Ok(Ec2Instance::new(self.clone(), record))
    }

    /// One listing pass: fill the empty `slots` whose id (same index in
    /// `ids`) is now visible as a live member of the environment group.
    ///
    /// Returns [`Error::MissingInstances`] naming the ids still unfilled.
    pub async fn gather_instances(&self, ids: &[InstanceId], slots: &mut [Option<Ec2Instance>]) -> Result<()> {
        let wanted: Vec<InstanceId> = ids
            .iter()
            .zip(slots.iter())
            .filter(|(_, slot)| slot.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        if wanted.is_empty() {
            return Ok(());
        }

        let filter = InstanceFilter::live()
            .in_group(self.group_name())
            .with_ids(wanted);
        let records = match self.inner.compute.describe_instances(&filter).await {
            Ok(records) => records,
            // Filtering by id can itself report an id as unknown.
            Err(e) if e.has_code(codes::INSTANCE_NOT_FOUND) => Vec::new(),
            Err(e) => return Err(Error::compute("list instances", e)),
        };

        for record in records {
            for (id, slot) in ids.iter().zip(slots.iter_mut()) {
                if slot.is_none() && *id == record.id {
                    *slot = Some(Ec2Instance::new(self.clone(), record.clone()));
                }
            }
        }

        let missing: Vec<InstanceId> = ids
            .iter()
            .zip(slots.iter())
            .filter(|(_, slot)| slot.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingInstances { ids: missing })
        }
    }

    /// Look up `ids`, repeating listing passes under the short strategy until
    /// all are found or time runs out.
    ///
    /// Partial results are returned with the error that ended gathering. If
    /// nothing at all was found the error itself is returned.
    #[instrument(skip(self, ids), fields(environ = %self.inner.name, count = ids.len()))]
    pub async fn list_instances(&self, ids: &[InstanceId]) -> Result<InstanceLookup<Ec2Instance>> {
        if ids.is_empty() {
            return Ok(InstanceLookup::empty());
        }

        let mut slots: Vec<Option<Ec2Instance>> = ids.iter().map(|_| None).collect();
        let mut last = None;
        let mut attempt = self.inner.config.short_attempt.start();
        while attempt.next().await {
            match self.gather_instances(ids, &mut slots).await {
                Ok(()) => {
                    last = None;
                    break;
                }
                Err(e) if e.is_missing_instances() => {
                    debug!(attempt = attempt.count(), "instances not visible yet");
                    last = Some(e);
                }
                Err(e) => {
                    last = Some(e);
                    break;
                }
            }
        }

        if slots.iter().all(Option::is_none) {
            return Err(last.unwrap_or_else(|| Error::MissingInstances { ids: ids.to_vec() }));
        }
        Ok(InstanceLookup::new(slots, last))
    }

    /// Terminate `ids`. An empty list makes no calls.
    ///
    /// The bulk call is retried while it reports an unknown id. If it keeps
    /// doing so for several ids, they are terminated one at a time, counting
    /// an unknown id as already terminated; the first other failure is
    /// returned.
    #[instrument(skip(self, ids), fields(environ = %self.inner.name, count = ids.len()))]
    pub async fn terminate_instances(&self, ids: &[InstanceId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let err = match self
            .inner
            .config
            .short_attempt
            .retry_while(
                || self.inner.compute.terminate_instances(ids),
                |e| e.has_code(codes::INSTANCE_NOT_FOUND),
            )
            .await
        {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        if !err.has_code(codes::INSTANCE_NOT_FOUND) || ids.len() == 1 {
            return Err(Error::compute("terminate instances", err));
        }

        warn!("bulk terminate named an unknown instance; terminating one at a time");
        let mut first_err = None;
        for id in ids {
            match self.inner.compute.terminate_instances(slice::from_ref(id)).await {
                Ok(()) => {}
                Err(e) if e.has_code(codes::INSTANCE_NOT_FOUND) => {
                    debug!(instance = %id, "instance already gone");
                }
                Err(e) => {
                    warn!(instance = %id, error = %e, "terminate failed");
                    first_err.get_or_insert_with(|| Error::compute(format!("terminate instance {id}"), e));
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl Environ for Ec2Environ {
    fn name(&self) -> &str {
        &self.inner.name
    }

    #[instrument(skip(self), fields(environ = %self.inner.name))]
    async fn bootstrap(&self) -> Result<()> {
        if self.inner.state.load().await?.is_some() {
            return Err(Error::AlreadyBootstrapped {
                environ: self.inner.name.clone(),
            });
        }

        let instance = self
            .launch_instance(0, &StateInfo::default(), true)
            .await
            .map_err(|e| e.context("start control-plane instance"))?;
        let state = BootstrapState {
            zookeeper_instances: vec![instance.id().clone()],
        };
        if let Err(err) = self.inner.state.save(&state).await {
            if let Err(cleanup) = self.terminate_instances(slice::from_ref(instance.id())).await {
                warn!(instance = %instance.id(), error = %cleanup, "cannot clean up after failed bootstrap");
            }
            return Err(err);
        }

        info!(instance = %instance.id(), "environment bootstrapped");
        Ok(())
    }

    async fn state_info(&self) -> Result<StateInfo> {
        let state = self
            .inner
            .state
            .load()
            .await?
            .ok_or_else(|| Error::NotBootstrapped {
                environ: self.inner.name.clone(),
            })?;

        let lookup = self
            .list_instances(&state.zookeeper_instances)
            .await
            .map_err(|e| e.context("resolve control-plane addresses"))?;
        let (slots, error) = lookup.into_parts();
        if let Some(err) = error.filter(|e| !e.is_missing_instances()) {
            return Err(err.context("resolve control-plane addresses"));
        }

        let port = self.inner.config.control_plane_port;
        let mut addrs = Vec::with_capacity(slots.len());
        for (id, slot) in state.zookeeper_instances.iter().zip(slots) {
            let Some(instance) = slot else {
                warn!(instance = %id, "control-plane instance not found; skipping");
                continue;
            };
            let host = instance
                .resolve_dns_name()
                .await
                .map_err(|e| e.context("get control-plane instance address"))?;
            addrs.push(format!("{host}:{port}"));
        }
        Ok(StateInfo { addrs })
    }

    async fn start_instance(&self, machine_id: u32, info: &StateInfo) -> Result<Arc<dyn Instance>> {
        let instance = self.launch_instance(machine_id, info, false).await?;
        Ok(Arc::new(instance))
    }

    async fn stop_instances(&self, instances: &[Arc<dyn Instance>]) -> Result<()> {
        let ids: Vec<InstanceId> = instances.iter().map(|i| i.id().clone()).collect();
        self.terminate_instances(&ids).await
    }

    async fn instances(&self, ids: &[InstanceId]) -> Result<InstanceLookup<Arc<dyn Instance>>> {
        let lookup = self.list_instances(ids).await?;
        Ok(lookup.map(|i| Arc::new(i) as Arc<dyn Instance>))
    }

    #[instrument(skip(self, instances), fields(environ = %self.inner.name))]
    async fn destroy(&self, instances: &[Arc<dyn Instance>]) -> Result<()> {
        let filter = InstanceFilter::live().in_group(self.group_name());
        let listed = self
            .inner
            .compute
            .describe_instances(&filter)
            .await
            .map_err(|e| Error::compute("list environment instances", e))?;

        let mut ids: Vec<InstanceId> = listed.into_iter().map(|r| r.id).collect();
        for instance in instances {
            if !ids.contains(instance.id()) {
                ids.push(instance.id().clone());
            }
        }

        info!(instances = ids.len(), "destroying environment");
        self.terminate_instances(&ids).await?;
        self.inner.state.delete().await
    }
}

impl fmt::Debug for Ec2Environ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ec2Environ")
            .field("name", &self.inner.name)
            .field("region", &self.inner.region.name)
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Ec2Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ec2Provider").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ComputeCall, ComputeOp, FakeCompute, FakeConnector, FakeImageSelector};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use stratus_storage::{BlobOp, StorageError};

    fn open(connector: &Arc<FakeConnector>) -> Ec2Environ {
        Ec2Provider::new(connector.clone(), Arc::new(FakeImageSelector::default()))
            .open_ec2("prod", ProviderConfig::default())
            .unwrap()
    }

    fn ids(raw: &[&str]) -> Vec<InstanceId> {
        raw.iter().copied().map(InstanceId::from).collect()
    }

    #[test]
    fn group_names_follow_prefix_and_machine() {
        let environ = open(&Arc::new(FakeConnector::default()));
        assert_eq!(environ.group_name(), "stratus-prod");
        assert_eq!(environ.machine_group_name(3), "stratus-prod-3");
    }

    #[test]
    fn invalid_config_is_rejected_before_connecting() {
        let connector = Arc::new(FakeConnector::default());
        let provider = Ec2Provider::new(connector.clone(), Arc::new(FakeImageSelector::default()));
        let config = ProviderConfig {
            group_prefix: String::new(),
            ..ProviderConfig::default()
        };

        assert!(matches!(provider.open_ec2("prod", config), Err(Error::Config { .. })));
        assert_eq!(connector.connects(), Vec::<String>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn start_sets_up_both_groups_and_runs_one_instance() {
        let connector = Arc::new(FakeConnector::default());
        let environ = open(&connector);

        let instance = environ.launch_instance(2, &StateInfo::default(), false).await.unwrap();

        let compute = connector.compute();
        assert_eq!(compute.live_instances(), vec![instance.id().clone()]);
        assert_eq!(
            compute.group_permissions("stratus-prod"),
            Some(PermSet::from_permissions(&[
                IpPermission::tcp(22, 22, "0.0.0.0/0"),
                IpPermission::tcp(2181, 2181, "0.0.0.0/0"),
            ]))
        );
        assert_eq!(compute.group_permissions("stratus-prod-2"), Some(PermSet::default()));
        assert_eq!(
            compute.instance_groups(instance.id()),
            vec!["stratus-prod".to_string(), "stratus-prod-2".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_is_retried_only_while_a_group_is_invisible() {
        let connector = Arc::new(FakeConnector::default());
        let compute = connector.compute();
        let environ = open(&connector);
        compute.fail_next(ComputeOp::RunInstances, ApiError::new(codes::GROUP_NOT_FOUND, "not yet"));
        compute.fail_next(ComputeOp::RunInstances, ApiError::new(codes::GROUP_NOT_FOUND, "not yet"));

        environ.launch_instance(0, &StateInfo::default(), true).await.unwrap();
        assert_eq!(compute.count(ComputeOp::RunInstances), 3);

        compute.fail_next(
            ComputeOp::RunInstances,
            ApiError::new("InstanceLimitExceeded", "quota"),
        );
        let err = environ
            .launch_instance(1, &StateInfo::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Compute { .. }));
        assert_eq!(compute.count(ComputeOp::RunInstances), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn more_than_one_started_instance_is_an_error() {
        let connector = Arc::new(FakeConnector::default());
        connector.compute().launch_per_run(2);
        let environ = open(&connector);

        let err = environ
            .launch_instance(0, &StateInfo::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedInstanceCount { got: 2 }));
        assert_eq!(connector.compute().count(ComputeOp::RunInstances), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn image_failure_stops_before_any_api_call() {
        let connector = Arc::new(FakeConnector::default());
        let images = FakeImageSelector::failing(ImageError::Lookup {
            reason: "index offline".to_string(),
        });
        let environ = Ec2Provider::new(connector.clone(), Arc::new(images))
            .open_ec2("prod", ProviderConfig::default())
            .unwrap();

        let err = environ
            .launch_instance(0, &StateInfo::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Image { .. }));
        assert!(connector.compute().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gather_only_asks_for_unfilled_slots() {
        let connector = Arc::new(FakeConnector::default());
        let compute = connector.compute();
        let environ = open(&connector);
        let a = environ.launch_instance(0, &StateInfo::default(), false).await.unwrap();
        let b = environ.launch_instance(1, &StateInfo::default(), false).await.unwrap();
        let wanted = vec![a.id().clone(), b.id().clone(), InstanceId::from("i-gone")];

        let mut slots = vec![Some(a.clone()), None, None];
        let err = environ.gather_instances(&wanted, &mut slots).await.unwrap_err();

        assert!(matches!(&err, Error::MissingInstances { ids } if *ids == vec![InstanceId::from("i-gone")]));
        assert_eq!(slots[1].as_ref().map(|i| i.id().clone()), Some(b.id().clone()));
        let Some(ComputeCall::DescribeInstances(filter)) = compute.calls().pop() else {
            panic!("expected a describe call");
        };
        assert_eq!(filter.ids, vec![b.id().clone(), InstanceId::from("i-gone")]);
        assert_eq!(filter.group_name.as_deref(), Some("stratus-prod"));
    }

    #[tokio::test(start_paused = true)]
    async fn list_tolerates_visibility_lag() {
        let connector = Arc::new(FakeConnector::default());
        let compute = connector.compute();
        let environ = open(&connector);
        let started = environ.launch_instance(0, &StateInfo::default(), false).await.unwrap();
        compute.hide(started.id(), 3);

        let lookup = environ.list_instances(&[started.id().clone()]).await.unwrap();

        assert!(lookup.is_complete());
        assert!(lookup.error().is_none());
        assert_eq!(compute.count(ComputeOp::DescribeInstances), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn list_of_nothing_found_is_the_missing_signal() {
        let environ = open(&Arc::new(FakeConnector::default()));

        let started = tokio::time::Instant::now();
        let err = environ.list_instances(&ids(&["i-1", "i-2"])).await.unwrap_err();

        assert!(err.is_missing_instances());
        assert!(started.elapsed() <= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn list_stops_on_hard_errors() {
        let connector = Arc::new(FakeConnector::default());
        let compute = connector.compute();
        let environ = open(&connector);
        compute.fail_next(
            ComputeOp::DescribeInstances,
            ApiError::new("RequestLimitExceeded", "slow down"),
        );

        let err = environ.list_instances(&ids(&["i-1"])).await.unwrap_err();

        assert!(matches!(err, Error::Compute { .. }));
        assert_eq!(compute.count(ComputeOp::DescribeInstances), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_unknown_id_is_reported() {
        let connector = Arc::new(FakeConnector::default());
        let environ = open(&connector);

        let err = environ.terminate_instances(&ids(&["i-gone"])).await.unwrap_err();

        assert!(matches!(&err, Error::Compute { source, .. } if source.has_code(codes::INSTANCE_NOT_FOUND)));
    }

    #[tokio::test(start_paused = true)]
    async fn per_id_fallback_keeps_the_first_real_failure() {
        let connector = Arc::new(FakeConnector::default());
        let compute = connector.compute();
        let environ = open(&connector);
        let a = compute.add_instance(&["stratus-prod"]);
        let b = compute.add_instance(&["stratus-prod"]);
        compute.fail_on_terminate(&b, ApiError::new("UnauthorizedOperation", "protected"));

        let err = environ
            .terminate_instances(&[a.clone(), InstanceId::from("i-gone"), b.clone()])
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            format!("cannot terminate instance {b}: UnauthorizedOperation: protected")
        );
        assert_eq!(compute.terminated(), vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_terminates_the_new_instance() {
        let connector = Arc::new(FakeConnector::default());
        let compute = connector.compute();
        connector
            .storage()
            .inject_failure(BlobOp::Put, StorageError::unavailable("bucket offline"));
        let environ = open(&connector);

        let err = environ.bootstrap().await.unwrap_err();

        assert!(matches!(err, Error::State { .. }));
        assert_eq!(compute.count(ComputeOp::RunInstances), 1);
        assert!(compute.live_instances().is_empty());
        assert_eq!(compute.terminated().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_failure_does_not_hide_the_save_error() {
        let connector = Arc::new(FakeConnector::default());
        let compute = connector.compute();
        connector
            .storage()
            .inject_failure(BlobOp::Put, StorageError::unavailable("bucket offline"));
        compute.fail_next(
            ComputeOp::TerminateInstances,
            ApiError::new("InternalError", "try later"),
        );
        let environ = open(&connector);

        let err = environ.bootstrap().await.unwrap_err();

        assert!(matches!(err, Error::State { .. }));
        assert_eq!(compute.live_instances().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn state_load_failure_aborts_bootstrap() {
        let connector = Arc::new(FakeConnector::default());
        connector.storage().inject_failure(
            BlobOp::Get,
            StorageError::PermissionDenied {
                key: "provider-state".to_string(),
                reason: "forbidden".to_string(),
            },
        );
        let environ = open(&connector);

        let err = environ.bootstrap().await.unwrap_err();

        assert!(matches!(err, Error::State { .. }));
        assert!(connector.compute().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn state_info_without_bootstrap_is_an_error() {
        let environ = open(&Arc::new(FakeConnector::default()));
        let err = environ.state_info().await.unwrap_err();
        assert!(matches!(err, Error::NotBootstrapped { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_of_unbootstrapped_environment_succeeds() {
        let connector = Arc::new(FakeConnector::default());
        let environ = open(&connector);

        environ.destroy(&[]).await.unwrap();

        assert_eq!(connector.compute().count(ComputeOp::TerminateInstances), 0);
        assert_eq!(connector.storage().count(BlobOp::Delete), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_keeps_state_when_termination_fails() {
        let connector = Arc::new(FakeConnector::default());
        let compute = connector.compute();
        let environ = open(&connector);
        environ.bootstrap().await.unwrap();
        compute.fail_next(
            ComputeOp::TerminateInstances,
            ApiError::new("InternalError", "try later"),
        );

        assert!(environ.destroy(&[]).await.is_err());
        assert!(connector.storage().contains("provider-state"));
        assert_eq!(connector.storage().count(BlobOp::Delete), 0);
    }
}
