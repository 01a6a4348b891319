//! In-memory collaborators for exercising environs without a cloud.
//!
//! [`FakeCompute`] simulates the parts of the compute API the ec2 provider
//! relies on, including the inconsistencies it has to tolerate: instances
//! that are not listed yet, addresses assigned late, and whole-call failures
//! when one id of a terminate request is unknown. Every call is logged so
//! tests can assert on exactly what was sent.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use stratus_storage::MemoryBlobStore;

use crate::InstanceId;
use crate::Result;
use crate::ec2::{
    ApiError, ApiResult, Clients, ComputeApi, Connector, ImageConstraint, ImageError, ImageSelector,
    ImageSpec, InstanceFilter, InstanceRecord, InstanceState, IpPermission, PermKey, PermSet,
    ProviderConfig, Region, RunInstancesRequest, SecurityGroup, SecurityGroupInfo, codes,
};

/// A [`ComputeApi`] operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeOp {
    /// `run_instances`
    RunInstances,
    /// `describe_instances`
    DescribeInstances,
    /// `terminate_instances`
    TerminateInstances,
    /// `create_security_group`
    CreateSecurityGroup,
    /// `describe_security_group`
    DescribeSecurityGroup,
    /// `authorize_security_group`
    AuthorizeSecurityGroup,
    /// `revoke_security_group`
    RevokeSecurityGroup,
}

/// A logged call with the arguments that matter to assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeCall {
    /// Instances requested
    RunInstances {
        /// Image booted
        image_id: String,
        /// Instance type
        instance_type: String,
        /// Names of the groups joined
        groups: Vec<String>,
        /// User data, as text
        user_data: Option<String>,
    },
    /// Instances listed
    DescribeInstances(InstanceFilter),
    /// Instances terminated
    TerminateInstances(Vec<InstanceId>),
    /// Group created, by name
    CreateSecurityGroup(String),
    /// Group described, by name
    DescribeSecurityGroup(String),
    /// Permissions added
    AuthorizeSecurityGroup {
        /// Group name
        group: String,
        /// Flattened permissions sent
        permissions: PermSet,
    },
    /// Permissions removed
    RevokeSecurityGroup {
        /// Group name
        group: String,
        /// Flattened permissions sent
        permissions: PermSet,
    },
}

impl ComputeCall {
    /// The operation this call was made to
    #[must_use]
    pub fn op(&self) -> ComputeOp {
        match self {
            Self::RunInstances { .. } => ComputeOp::RunInstances,
            Self::DescribeInstances(_) => ComputeOp::DescribeInstances,
            Self::TerminateInstances(_) => ComputeOp::TerminateInstances,
            Self::CreateSecurityGroup(_) => ComputeOp::CreateSecurityGroup,
            Self::DescribeSecurityGroup(_) => ComputeOp::DescribeSecurityGroup,
            Self::AuthorizeSecurityGroup { .. } => ComputeOp::AuthorizeSecurityGroup,
            Self::RevokeSecurityGroup { .. } => ComputeOp::RevokeSecurityGroup,
        }
    }
}

/// When started instances get their DNS name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressPolicy {
    /// Already in the run response
    #[default]
    Immediate,
    /// Missing from the run response and from the first `n` describe calls
    /// that list the instance
    AfterDescribes(u32),
    /// Never
    Never,
}

#[derive(Debug)]
struct FakeInstance {
    id: InstanceId,
    groups: Vec<String>,
    dns_name: Option<String>,
    address_in: Option<u32>,
    hidden_for: u32,
}

impl FakeInstance {
    fn record(&self) -> InstanceRecord {
        InstanceRecord {
            id: self.id.clone(),
            state: if self.dns_name.is_some() {
                InstanceState::Running
            } else {
                InstanceState::Pending
            },
            dns_name: self.dns_name.clone(),
        }
    }

    fn matches(&self, filter: &InstanceFilter) -> bool {
        let state = self.record().state;
        (filter.states.is_empty() || filter.states.contains(&state))
            && filter
                .group_name
                .as_ref()
                .is_none_or(|group| self.groups.contains(group))
            && (filter.ids.is_empty() || filter.ids.contains(&self.id))
    }
}

#[derive(Debug)]
struct FakeGroup {
    group: SecurityGroup,
    description: String,
    permissions: BTreeSet<PermKey>,
}

#[derive(Debug, Default)]
struct State {
    instances: Vec<FakeInstance>,
    groups: BTreeMap<String, FakeGroup>,
    terminated: Vec<InstanceId>,
    failures: HashMap<ComputeOp, VecDeque<ApiError>>,
    protected: HashMap<InstanceId, ApiError>,
    calls: Vec<ComputeCall>,
    address_policy: AddressPolicy,
    launch_per_run: Option<u32>,
    next_id: u32,
}

impl State {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn launch(&mut self, groups: Vec<String>) -> InstanceId {
        let id = InstanceId::new(format!("i-{:08x}", self.next_id()));
        let (dns_name, address_in) = match self.address_policy {
            AddressPolicy::Immediate => (Some(dns_name_for(&id)), None),
            AddressPolicy::AfterDescribes(n) => (None, Some(n)),
            AddressPolicy::Never => (None, None),
        };
        self.instances.push(FakeInstance {
            id: id.clone(),
            groups,
            dns_name,
            address_in,
            hidden_for: 0,
        });
        id
    }

    fn group_by_id(&mut self, group: &SecurityGroup) -> ApiResult<&mut FakeGroup> {
        self.groups
            .values_mut()
            .find(|g| g.group.id == group.id)
            .ok_or_else(|| {
                ApiError::new(
                    codes::GROUP_NOT_FOUND,
                    format!("The security group '{}' does not exist", group.id),
                )
            })
    }
}

fn dns_name_for(id: &InstanceId) -> String {
    format!("{id}.compute.example.com")
}

/// In-memory compute API
#[derive(Debug, Default)]
pub struct FakeCompute {
    state: Mutex<State>,
}

impl FakeCompute {
    /// An empty account: no instances, no groups
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `error`. Queued errors are used
    /// in order, before the call has any effect.
    pub fn fail_next(&self, op: ComputeOp, error: ApiError) {
        self.state.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Make every terminate request naming `id` fail with `error`
    pub fn fail_on_terminate(&self, id: &InstanceId, error: ApiError) {
        self.state.lock().protected.insert(id.clone(), error);
    }

    /// How instances started from now on get their address
    pub fn set_address_policy(&self, policy: AddressPolicy) {
        self.state.lock().address_policy = policy;
    }

    /// Start `count` instances per run request regardless of what it asks
    pub fn launch_per_run(&self, count: u32) {
        self.state.lock().launch_per_run = Some(count);
    }

    /// Leave `id` out of the next `describes` describe-instances calls whose
    /// filter would have listed it
    pub fn hide(&self, id: &InstanceId, describes: u32) {
        if let Some(instance) = self.state.lock().instances.iter_mut().find(|i| i.id == *id) {
            instance.hidden_for = describes;
        }
    }

    /// Add a running instance in `groups` without logging a call
    pub fn add_instance(&self, groups: &[&str]) -> InstanceId {
        let mut state = self.state.lock();
        let id = InstanceId::new(format!("i-{:08x}", state.next_id()));
        state.instances.push(FakeInstance {
            id: id.clone(),
            groups: groups.iter().map(ToString::to_string).collect(),
            dns_name: Some(dns_name_for(&id)),
            address_in: None,
            hidden_for: 0,
        });
        id
    }

    /// Make `id` disappear as if terminated by someone else
    pub fn remove_instance(&self, id: &InstanceId) {
        self.state.lock().instances.retain(|i| i.id != *id);
    }

    /// Add a group with `permissions` without logging a call
    pub fn add_group(&self, name: &str, description: &str, permissions: &[IpPermission]) -> SecurityGroup {
        let mut state = self.state.lock();
        let group = SecurityGroup {
            id: format!("sg-{:04}", state.next_id()),
            name: name.to_string(),
        };
        state.groups.insert(
            name.to_string(),
            FakeGroup {
                group: group.clone(),
                description: description.to_string(),
                permissions: PermSet::from_permissions(permissions).iter().cloned().collect(),
            },
        );
        group
    }

    /// Every call so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<ComputeCall> {
        self.state.lock().calls.clone()
    }

    /// How many calls of `op` were made
    #[must_use]
    pub fn count(&self, op: ComputeOp) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Ids of instances that have not been terminated or removed
    #[must_use]
    pub fn live_instances(&self) -> Vec<InstanceId> {
        self.state.lock().instances.iter().map(|i| i.id.clone()).collect()
    }

    /// Ids terminated through the API, in order
    #[must_use]
    pub fn terminated(&self) -> Vec<InstanceId> {
        self.state.lock().terminated.clone()
    }

    /// Group names instance `id` joined
    #[must_use]
    pub fn instance_groups(&self, id: &InstanceId) -> Vec<String> {
        self.state
            .lock()
            .instances
            .iter()
            .find(|i| i.id == *id)
            .map(|i| i.groups.clone())
            .unwrap_or_default()
    }

    /// Current rules of group `name`
    #[must_use]
    pub fn group_permissions(&self, name: &str) -> Option<PermSet> {
        self.state
            .lock()
            .groups
            .get(name)
            .map(|g| g.permissions.iter().cloned().collect())
    }

    fn record(&self, call: ComputeCall) -> ApiResult<MutexGuard<'_, State>> {
        let op = call.op();
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn run_instances(&self, request: &RunInstancesRequest) -> ApiResult<Vec<InstanceRecord>> {
        let groups: Vec<String> = request.security_groups.iter().map(|g| g.name.clone()).collect();
        let mut state = self.record(ComputeCall::RunInstances {
            image_id: request.image_id.clone(),
            instance_type: request.instance_type.clone(),
            groups: groups.clone(),
            user_data: request
                .user_data
                .as_ref()
                .map(|data| String::from_utf8_lossy(data).into_owned()),
        })?;

        if let Some(missing) = groups.iter().find(|name| !state.groups.contains_key(*name)) {
            return Err(ApiError::new(
                codes::GROUP_NOT_FOUND,
                format!("The security group '{missing}' does not exist"),
            ));
        }

        let count = state.launch_per_run.unwrap_or(request.min_count);
        let ids: Vec<InstanceId> = (0..count).map(|_| state.launch(groups.clone())).collect();
        Ok(state
            .instances
            .iter()
            .filter(|i| ids.contains(&i.id))
            .map(FakeInstance::record)
            .collect())
    }

    async fn describe_instances(&self, filter: &InstanceFilter) -> ApiResult<Vec<InstanceRecord>> {
        let mut state = self.record(ComputeCall::DescribeInstances(filter.clone()))?;

        let mut listed = Vec::new();
        for instance in &mut state.instances {
            if !instance.matches(filter) {
                continue;
            }
            if instance.hidden_for > 0 {
                instance.hidden_for -= 1;
                continue;
            }
            if instance.dns_name.is_none() {
                match instance.address_in {
                    Some(0) => instance.dns_name = Some(dns_name_for(&instance.id)),
                    Some(n) => instance.address_in = Some(n - 1),
                    None => {}
                }
            }
            listed.push(instance.record());
        }
        Ok(listed)
    }

    async fn terminate_instances(&self, ids: &[InstanceId]) -> ApiResult<()> {
        let mut state = self.record(ComputeCall::TerminateInstances(ids.to_vec()))?;

        if let Some(unknown) = ids
            .iter()
            .find(|id| !state.instances.iter().any(|i| i.id == **id))
        {
            return Err(ApiError::new(
                codes::INSTANCE_NOT_FOUND,
                format!("The instance ID '{unknown}' does not exist"),
            ));
        }
        if let Some(err) = ids.iter().find_map(|id| state.protected.get(id)) {
            return Err(err.clone());
        }

        state.instances.retain(|i| !ids.contains(&i.id));
        state.terminated.extend(ids.iter().cloned());
        Ok(())
    }

    async fn create_security_group(&self, name: &str, description: &str) -> ApiResult<SecurityGroup> {
        let mut state = self.record(ComputeCall::CreateSecurityGroup(name.to_string()))?;
        if state.groups.contains_key(name) {
            return Err(ApiError::new(
                codes::GROUP_DUPLICATE,
                format!("The security group '{name}' already exists"),
            ));
        }

        let group = SecurityGroup {
            id: format!("sg-{:04}", state.next_id()),
            name: name.to_string(),
        };
        state.groups.insert(
            name.to_string(),
            FakeGroup {
                group: group.clone(),
                description: description.to_string(),
                permissions: BTreeSet::new(),
            },
        );
        Ok(group)
    }

    async fn describe_security_group(&self, name: &str) -> ApiResult<SecurityGroupInfo> {
        let state = self.record(ComputeCall::DescribeSecurityGroup(name.to_string()))?;
        let group = state.groups.get(name).ok_or_else(|| {
            ApiError::new(
                codes::GROUP_NOT_FOUND,
                format!("The security group '{name}' does not exist"),
            )
        })?;
        Ok(SecurityGroupInfo {
            group: group.group.clone(),
            description: group.description.clone(),
            permissions: group.permissions.iter().map(PermKey::to_permission).collect(),
        })
    }

    async fn authorize_security_group(
        &self,
        group: &SecurityGroup,
        permissions: &[IpPermission],
    ) -> ApiResult<()> {
        let keys = PermSet::from_permissions(permissions);
        let mut state = self.record(ComputeCall::AuthorizeSecurityGroup {
            group: group.name.clone(),
            permissions: keys.clone(),
        })?;

        let target = state.group_by_id(group)?;
        if keys.iter().any(|k| target.permissions.contains(k)) {
            return Err(ApiError::new(
                codes::PERMISSION_DUPLICATE,
                "the specified rule already exists",
            ));
        }
        target.permissions.extend(keys.iter().cloned());
        Ok(())
    }

    async fn revoke_security_group(
        &self,
        group: &SecurityGroup,
        permissions: &[IpPermission],
    ) -> ApiResult<()> {
        let keys = PermSet::from_permissions(permissions);
        let mut state = self.record(ComputeCall::RevokeSecurityGroup {
            group: group.name.clone(),
            permissions: keys.clone(),
        })?;

        let target = state.group_by_id(group)?;
        if keys.iter().any(|k| !target.permissions.contains(k)) {
            return Err(ApiError::new(
                codes::PERMISSION_NOT_FOUND,
                "the specified rule does not exist",
            ));
        }
        for key in keys.iter() {
            target.permissions.remove(key);
        }
        Ok(())
    }
}

/// Image selector answering every constraint with one image
#[derive(Debug)]
pub struct FakeImageSelector {
    outcome: std::result::Result<ImageSpec, ImageError>,
    requests: Mutex<Vec<ImageConstraint>>,
}

impl Default for FakeImageSelector {
    fn default() -> Self {
        Self::with_image("ami-00000001")
    }
}

impl FakeImageSelector {
    /// Always select `image_id`
    pub fn with_image(image_id: impl Into<String>) -> Self {
        Self {
            outcome: Ok(ImageSpec {
                image_id: image_id.into(),
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always fail with `error`
    #[must_use]
    pub fn failing(error: ImageError) -> Self {
        Self {
            outcome: Err(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Constraints asked for so far
    #[must_use]
    pub fn requests(&self) -> Vec<ImageConstraint> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ImageSelector for FakeImageSelector {
    async fn find_image(&self, constraint: &ImageConstraint) -> std::result::Result<ImageSpec, ImageError> {
        self.requests.lock().push(constraint.clone());
        self.outcome.clone()
    }
}

/// Connector handing out one [`FakeCompute`] and one [`MemoryBlobStore`]
/// for every region
#[derive(Debug, Default)]
pub struct FakeConnector {
    compute: Arc<FakeCompute>,
    storage: MemoryBlobStore,
    connects: Mutex<Vec<String>>,
}

impl FakeConnector {
    /// Connector sharing `compute` and `storage`
    #[must_use]
    pub fn new(compute: Arc<FakeCompute>, storage: MemoryBlobStore) -> Self {
        Self {
            compute,
            storage,
            connects: Mutex::new(Vec::new()),
        }
    }

    /// The simulated compute API
    #[must_use]
    pub fn compute(&self) -> Arc<FakeCompute> {
        self.compute.clone()
    }

    /// The blob store behind every environment opened through this connector
    #[must_use]
    pub fn storage(&self) -> &MemoryBlobStore {
        &self.storage
    }

    /// Regions connected to, in order
    #[must_use]
    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().clone()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _config: &ProviderConfig, region: &Region) -> Result<Clients> {
        self.connects.lock().push(region.name.to_string());
        Ok(Clients {
            compute: self.compute.clone(),
            storage: Arc::new(self.storage.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn terminate_with_an_unknown_id_changes_nothing() {
        let compute = FakeCompute::new();
        let a = compute.add_instance(&["g"]);

        let err = compute
            .terminate_instances(&[a.clone(), InstanceId::from("i-gone")])
            .await
            .unwrap_err();

        assert!(err.has_code(codes::INSTANCE_NOT_FOUND));
        assert_eq!(compute.live_instances(), vec![a]);
    }

    #[tokio::test]
    async fn hidden_instances_reappear() {
        let compute = FakeCompute::new();
        let a = compute.add_instance(&["g"]);
        compute.hide(&a, 1);

        let filter = InstanceFilter::live().in_group("g");
        assert!(compute.describe_instances(&filter).await.unwrap().is_empty());
        assert_eq!(compute.describe_instances(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hiding_outlasts_describes_that_would_not_list_it() {
        let compute = FakeCompute::new();
        let a = compute.add_instance(&["g"]);
        compute.add_instance(&["other"]);
        compute.hide(&a, 1);

        let other = InstanceFilter::live().in_group("other");
        assert_eq!(compute.describe_instances(&other).await.unwrap().len(), 1);
        assert_eq!(compute.describe_instances(&other).await.unwrap().len(), 1);

        let filter = InstanceFilter::live().in_group("g");
        assert!(compute.describe_instances(&filter).await.unwrap().is_empty());
        assert_eq!(compute.describe_instances(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_needs_existing_groups() {
        let compute = FakeCompute::new();
        let request = RunInstancesRequest {
            image_id: "ami-1".to_string(),
            min_count: 1,
            max_count: 1,
            instance_type: "m1.small".to_string(),
            security_groups: vec![SecurityGroup {
                id: "sg-x".to_string(),
                name: "missing".to_string(),
            }],
            user_data: None,
        };

        let err = compute.run_instances(&request).await.unwrap_err();
        assert!(err.has_code(codes::GROUP_NOT_FOUND));
    }

    #[tokio::test]
    async fn authorize_rejects_duplicates() {
        let compute = FakeCompute::new();
        let group = compute.add_group("g", "d", &[IpPermission::tcp(22, 22, "0.0.0.0/0")]);

        let err = compute
            .authorize_security_group(&group, &[IpPermission::tcp(22, 22, "0.0.0.0/0")])
            .await
            .unwrap_err();
        assert!(err.has_code(codes::PERMISSION_DUPLICATE));
    }
}
