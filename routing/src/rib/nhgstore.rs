// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Module that contains a reference counted store for nexthop groups. Every group is a
//! normalized set of next-hops, shared by all the routes that use it. Groups are indexed
//! twice: by identifier and by content, so that routes with the same next-hops share a
//! single group.
//!
//! Groups come in two flavors. Groups interned on behalf of routes live as long as some
//! route references them and get identifiers below [`NHG_PROTO_LOWER`]. Groups installed by
//! protocol clients use identifiers chosen by the client, at or above [`NHG_PROTO_LOWER`],
//! and live until the client removes them (or they are swept) and no route references them.

use crate::errors::RouterError;
use crate::rib::table::{RouteOrigin, VrfId};
use crate::seqnum::seq_before;
use ahash::RandomState;
use std::collections::HashMap;
use std::net::IpAddr;

#[allow(unused)]
use tracing::{debug, error, warn};

/// Identifier of a nexthop group
pub type NhgId = u32;

/// Lowest identifier that protocol clients may use for the groups they own
pub const NHG_PROTO_LOWER: NhgId = 1 << 28;

#[derive(Debug, Default, Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum FwAction {
    #[default]
    Forward = 0,
    Drop = 1,
}

/// A single next-hop
#[derive(Debug, Default, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Nexthop {
    pub vrfid: VrfId,
    pub address: Option<IpAddr>,
    pub ifindex: Option<u32>,
    pub fwaction: FwAction,
}

#[allow(dead_code)]
impl Nexthop {
    #[must_use]
    pub fn new(vrfid: VrfId, address: Option<IpAddr>, ifindex: Option<u32>) -> Self {
        Self {
            vrfid,
            address,
            ifindex,
            fwaction: FwAction::Forward,
        }
    }
    #[must_use]
    pub fn with_drop() -> Self {
        Self {
            fwaction: FwAction::Drop,
            ..Default::default()
        }
    }
    #[must_use]
    pub fn with_address(address: IpAddr) -> Self {
        Self {
            address: Some(address),
            ..Default::default()
        }
    }
    #[must_use]
    pub fn with_ifindex(ifindex: u32) -> Self {
        Self {
            ifindex: Some(ifindex),
            ..Default::default()
        }
    }
}

/// The normalized content of a nexthop group: sorted, without duplicates and truncated
/// to the multipath limit. Two groups with the same key are the same group.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct NhgKey(Vec<Nexthop>);

impl NhgKey {
    #[must_use]
    pub fn normalize(nexthops: &[Nexthop], multipath: usize) -> Self {
        let mut nhops = nexthops.to_vec();
        nhops.sort();
        nhops.dedup();
        if nhops.len() > multipath {
            warn!(
                "Group has {} next-hops; only {multipath} will be used",
                nhops.len()
            );
            nhops.truncate(multipath);
        }
        Self(nhops)
    }
    #[must_use]
    pub fn nexthops(&self) -> &[Nexthop] {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct NexthopGroup {
    pub id: NhgId,
    pub key: NhgKey,
    /// number of routes referencing this group
    pub refcnt: u32,
    /// protocol that installed the group, if it was not interned for routes
    pub owner: Option<RouteOrigin>,
    /// sequence number of the last time the group was refreshed
    pub seq: u32,
}

impl NexthopGroup {
    fn is_unused(&self) -> bool {
        self.refcnt == 0 && self.owner.is_none()
    }
}

#[derive(Debug)]
pub struct NexthopGroupStore {
    by_id: HashMap<NhgId, NexthopGroup, RandomState>,
    by_content: HashMap<NhgKey, NhgId, RandomState>,
    next_id: NhgId,
    multipath: usize,
}

#[allow(clippy::len_without_is_empty)]
impl NexthopGroupStore {
    #[must_use]
    pub fn new(multipath: usize) -> Self {
        Self {
            by_id: HashMap::with_hasher(RandomState::with_seed(0)),
            by_content: HashMap::with_hasher(RandomState::with_seed(0)),
            next_id: 1,
            multipath: multipath.max(1),
        }
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }
    #[must_use]
    pub fn get(&self, id: NhgId) -> Option<&NexthopGroup> {
        self.by_id.get(&id)
    }
    #[must_use]
    pub fn find(&self, nexthops: &[Nexthop]) -> Option<&NexthopGroup> {
        let key = NhgKey::normalize(nexthops, self.multipath);
        let id = self.by_content.get(&key)?;
        self.by_id.get(id)
    }

    /// Groups sorted by id
    pub fn values(&self) -> impl Iterator<Item = &NexthopGroup> {
        let mut groups: Vec<_> = self.by_id.values().collect();
        groups.sort_by_key(|group| group.id);
        groups.into_iter()
    }

    fn alloc_id(&mut self) -> NhgId {
        loop {
            let id = self.next_id;
            self.next_id = if id + 1 >= NHG_PROTO_LOWER { 1 } else { id + 1 };
            if !self.by_id.contains_key(&id) {
                return id;
            }
        }
    }

    fn destroy(&mut self, id: NhgId) {
        if let Some(group) = self.by_id.remove(&id) {
            if self.by_content.get(&group.key) == Some(&id) {
                self.by_content.remove(&group.key);
            }
            debug!("Destroyed nexthop-group {id}");
        }
    }

    /// Get the group with the given next-hops, creating it if needed, and take a route
    /// reference on it.
    pub fn intern(&mut self, nexthops: &[Nexthop], seq: u32) -> NhgId {
        let key = NhgKey::normalize(nexthops, self.multipath);
        if let Some(id) = self.by_content.get(&key).copied() {
            if let Some(group) = self.by_id.get_mut(&id) {
                group.refcnt += 1;
                group.seq = seq;
                return id;
            }
        }
        let id = self.alloc_id();
        let group = NexthopGroup {
            id,
            key: key.clone(),
            refcnt: 1,
            owner: None,
            seq,
        };
        self.by_id.insert(id, group);
        self.by_content.insert(key, id);
        debug!("Created nexthop-group {id}");
        id
    }

    /// Take a route reference on an existing group
    pub fn reference(&mut self, id: NhgId, seq: u32) -> Result<(), RouterError> {
        let group = self.by_id.get_mut(&id).ok_or(RouterError::NoSuchNhg(id))?;
        group.refcnt += 1;
        group.seq = seq;
        Ok(())
    }

    /// Drop a route reference. Returns true if the group was destroyed as a result.
    pub fn release(&mut self, id: NhgId) -> Result<bool, RouterError> {
        let group = self.by_id.get_mut(&id).ok_or(RouterError::NoSuchNhg(id))?;
        if group.refcnt == 0 {
            error!("Nexthop-group {id} has no references to release");
            return Err(RouterError::Internal("Nexthop-group refcount underflow"));
        }
        group.refcnt -= 1;
        if group.is_unused() {
            self.destroy(id);
            return Ok(true);
        }
        Ok(false)
    }

    /// Install (or replace) a group owned by a protocol client
    pub fn install(
        &mut self,
        owner: RouteOrigin,
        id: NhgId,
        nexthops: &[Nexthop],
        seq: u32,
    ) -> Result<(), RouterError> {
        if id < NHG_PROTO_LOWER {
            return Err(RouterError::MalformedMessage(format!(
                "nexthop-group id {id} is reserved"
            )));
        }
        let key = NhgKey::normalize(nexthops, self.multipath);
        if let Some(group) = self.by_id.get_mut(&id) {
            let old_key = std::mem::replace(&mut group.key, key.clone());
            group.owner = Some(owner);
            group.seq = seq;
            if self.by_content.get(&old_key) == Some(&id) {
                self.by_content.remove(&old_key);
            }
            debug!("Replaced nexthop-group {id} owned by {owner:?}");
        } else {
            let group = NexthopGroup {
                id,
                key: key.clone(),
                refcnt: 0,
                owner: Some(owner),
                seq,
            };
            self.by_id.insert(id, group);
            debug!("Installed nexthop-group {id} owned by {owner:?}");
        }
        /* content lookups prefer groups interned for routes */
        self.by_content.entry(key).or_insert(id);
        Ok(())
    }

    /// Remove the ownership of a protocol client on a group. The group is destroyed
    /// right away unless routes still reference it.
    pub fn uninstall(&mut self, owner: RouteOrigin, id: NhgId) -> Result<(), RouterError> {
        let group = self.by_id.get_mut(&id).ok_or(RouterError::NoSuchNhg(id))?;
        if group.owner != Some(owner) {
            warn!("Nexthop-group {id} is not owned by {owner:?}");
            return Err(RouterError::NoSuchNhg(id));
        }
        group.owner.take();
        if group.is_unused() {
            self.destroy(id);
        }
        Ok(())
    }

    /// Disown the protocol-installed groups not refreshed since `watermark`. Returns the
    /// number of groups destroyed. Groups still referenced by routes are destroyed when
    /// their last reference is released.
    pub fn sweep(&mut self, watermark: u32) -> usize {
        let stale: Vec<NhgId> = self
            .by_id
            .values()
            .filter(|group| group.owner.is_some() && seq_before(group.seq, watermark))
            .map(|group| group.id)
            .collect();

        let mut removed = 0;
        for id in stale {
            if let Some(group) = self.by_id.get_mut(&id) {
                group.owner.take();
                if group.is_unused() {
                    self.destroy(id);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Remove all groups
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_content.clear();
    }
}
