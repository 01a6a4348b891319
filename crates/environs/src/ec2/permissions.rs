//! Set semantics for security group permissions.
//!
//! The API groups several sources under one port range; for comparison each
//! (range, source) pair is one element. Source groups are identified by id
//! alone, so names and owner ids reported by the API never make two otherwise
//! identical rules differ.

use std::collections::BTreeSet;

use super::api::{IpPermission, SourceGroup};

/// Where a permitted connection may come from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Peer {
    /// Members of the security group with this id
    Group(String),
    /// An address range
    Cidr(String),
}

/// One port range opened to one peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermKey {
    /// `tcp`, `udp` or `icmp`
    pub protocol: String,
    /// First port
    pub from_port: u16,
    /// Last port
    pub to_port: u16,
    /// Permitted source
    pub peer: Peer,
}

impl PermKey {
    /// The key as a single-source permission
    #[must_use]
    pub fn to_permission(&self) -> IpPermission {
        let mut perm = IpPermission {
            protocol: self.protocol.clone(),
            from_port: self.from_port,
            to_port: self.to_port,
            ..IpPermission::default()
        };
        match &self.peer {
            Peer::Cidr(cidr) => perm.source_cidrs.push(cidr.clone()),
            Peer::Group(id) => perm.source_groups.push(SourceGroup {
                id: id.clone(),
                ..SourceGroup::default()
            }),
        }
        perm
    }
}

/// Flattened set of permissions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PermSet(BTreeSet<PermKey>);

impl PermSet {
    /// Flatten `permissions` into one key per (range, source)
    #[must_use]
    pub fn from_permissions(permissions: &[IpPermission]) -> Self {
        permissions.iter().flat_map(keys_of).collect()
    }

    /// Keys in `self` that are not in `other`
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    /// Whether `key` is in the set
    #[must_use]
    pub fn contains(&self, key: &PermKey) -> bool {
        self.0.contains(key)
    }

    /// Number of keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &PermKey> {
        self.0.iter()
    }

    /// One single-source permission per key. Not re-grouped; the API accepts
    /// either form.
    #[must_use]
    pub fn to_permissions(&self) -> Vec<IpPermission> {
        self.0.iter().map(PermKey::to_permission).collect()
    }
}

impl FromIterator<PermKey> for PermSet {
    fn from_iter<T: IntoIterator<Item = PermKey>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Every key a single API permission expands to
pub(crate) fn keys_of(perm: &IpPermission) -> impl Iterator<Item = PermKey> + '_ {
    let key = move |peer| PermKey {
        protocol: perm.protocol.clone(),
        from_port: perm.from_port,
        to_port: perm.to_port,
        peer,
    };
    let groups = perm.source_groups.iter().map(|g| Peer::Group(g.id.clone()));
    let cidrs = perm.source_cidrs.iter().map(|c| Peer::Cidr(c.clone()));
    groups.chain(cidrs).map(key)
}
