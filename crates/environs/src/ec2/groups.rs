//! Security group reconciliation

use std::sync::Arc;

use tracing::{debug, instrument};

use super::api::{ApiErrorKind, ComputeApi, IpPermission, SecurityGroup};
use super::permissions::PermSet;
use crate::{Error, Result};

/// Description given to groups this crate creates
pub const GROUP_DESCRIPTION: &str = "stratus group";

/// Brings named security groups to an exact rule set.
///
/// Groups are created on demand but never deleted. A group that already
/// exists is adopted whatever its description; only its rules are changed.
#[derive(Clone)]
pub struct SecurityGroupReconciler {
    compute: Arc<dyn ComputeApi>,
}

impl SecurityGroupReconciler {
    /// Reconcile groups through `compute`
    pub fn new(compute: Arc<dyn ComputeApi>) -> Self {
        Self { compute }
    }

    /// Make sure group `name` exists and holds exactly `desired`.
    ///
    /// Costs one create (plus one describe if the group exists), then at most
    /// one revoke and one authorize call whatever the size of the difference.
    #[instrument(skip(self, desired), fields(group = %name))]
    pub async fn ensure_group(&self, name: &str, desired: &[IpPermission]) -> Result<SecurityGroup> {
        let (group, current) = match self
            .compute
            .create_security_group(name, GROUP_DESCRIPTION)
            .await
        {
            Ok(group) => {
                debug!(id = %group.id, "created security group");
                (group, Vec::new())
            }
            Err(e) if e.kind() == ApiErrorKind::Duplicate => {
                let info = self
                    .compute
                    .describe_security_group(name)
                    .await
                    .map_err(|e| Error::compute(format!("describe security group {name}"), e))?;
                if info.description != GROUP_DESCRIPTION {
                    debug!(
                        description = %info.description,
                        "adopting security group with foreign description"
                    );
                }
                (info.group, info.permissions)
            }
            Err(e) => return Err(Error::compute(format!("create security group {name}"), e)),
        };

        let want = PermSet::from_permissions(desired);
        let have = PermSet::from_permissions(&current);

        let revoke = have.difference(&want);
        if !revoke.is_empty() {
            debug!(rules = revoke.len(), "revoking stale permissions");
            self.compute
                .revoke_security_group(&group, &revoke.to_permissions())
                .await
                .map_err(|e| Error::compute(format!("revoke permissions on {name}"), e))?;
        }

        let authorize = want.difference(&have);
        if !authorize.is_empty() {
            debug!(rules = authorize.len(), "authorizing missing permissions");
            self.compute
                .authorize_security_group(&group, &authorize.to_permissions())
                .await
                .map_err(|e| Error::compute(format!("authorize permissions on {name}"), e))?;
        }

        Ok(group)
    }
}
