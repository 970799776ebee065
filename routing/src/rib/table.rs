// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Routing tables. A routing table is identified by the tuple (namespace, afi, safi, table-id)
//! and stores the routes for a single address family, keyed by prefix.

use crate::rib::nhgstore::{Nexthop, NhgId};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::IpAddr;

/// Identifier of a network namespace
pub type NsId = u32;
/// Identifier of a VRF
pub type VrfId = u32;
/// Identifier of a kernel routing table
pub type TableId = u32;

pub const NS_DEFAULT: NsId = 0;
pub const VRF_DEFAULT: VrfId = 0;
pub const RT_TABLE_MAIN: TableId = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Afi {
    Unspec,
    Ipv4,
    Ipv6,
    L2vpn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Safi {
    Unspec,
    Unicast,
    Multicast,
    Mpls,
    Evpn,
}

impl Afi {
    /// The address family of an IP prefix
    #[must_use]
    pub fn of_prefix(prefix: &IpNet) -> Afi {
        match prefix {
            IpNet::V4(_) => Afi::Ipv4,
            IpNet::V6(_) => Afi::Ipv6,
        }
    }
}

/// Key of a routing table. Keys order lexicographically by (namespace, afi, safi, table-id),
/// which is the order in which tables are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableKey {
    pub ns_id: NsId,
    pub afi: Afi,
    pub safi: Safi,
    pub table_id: TableId,
}

impl TableKey {
    #[must_use]
    pub fn new(ns_id: NsId, afi: Afi, safi: Safi, table_id: TableId) -> Self {
        Self {
            ns_id,
            afi,
            safi,
            table_id,
        }
    }

    /// A key can only resolve to a table if both its afi and safi are specified
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.afi != Afi::Unspec && self.safi != Safi::Unspec
    }

    /// Tell if a prefix may be stored in the table with this key
    #[must_use]
    pub fn admits(&self, prefix: &IpNet) -> bool {
        self.afi == Afi::of_prefix(prefix)
    }
}

#[allow(unused)]
#[derive(Debug, Default, Clone, Copy, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub enum RouteOrigin {
    Kernel,
    Connected,
    Local,
    Static,
    Ospf,
    Isis,
    Bgp,
    Pim,
    Vrrp,
    Sharp,
    #[default]
    Other,
}

/// The next-hops of a route: either an explicit list that gets interned in the nexthop-group
/// store or a reference to a group installed by a protocol client.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteNexthops {
    List(Vec<Nexthop>),
    Group(NhgId),
}

impl Default for RouteNexthops {
    fn default() -> Self {
        RouteNexthops::List(vec![])
    }
}

/// A route as submitted by a client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub origin: RouteOrigin,
    pub distance: u8,
    pub metric: u32,
    pub nexthops: RouteNexthops,
}

impl Route {
    #[must_use]
    pub fn new(origin: RouteOrigin, distance: u8, metric: u32, nexthops: RouteNexthops) -> Self {
        Self {
            origin,
            distance,
            metric,
            nexthops,
        }
    }
}

/// A route as stored in a [`RouteTable`]. Next-hops are shared through the nexthop-group store
/// and referred to by id. `seq` is the sequence number of the last change that refreshed the entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteEntry {
    pub origin: RouteOrigin,
    pub distance: u8,
    pub metric: u32,
    pub nhg_id: Option<NhgId>,
    pub seq: u32,
}

/// A prefix-keyed routing table
#[derive(Debug)]
pub struct RouteTable {
    key: TableKey,
    routes: BTreeMap<IpNet, RouteEntry>,
}

#[allow(clippy::len_without_is_empty)]
impl RouteTable {
    #[must_use]
    pub fn new(key: TableKey) -> Self {
        Self {
            key,
            routes: BTreeMap::new(),
        }
    }
    #[must_use]
    pub fn key(&self) -> &TableKey {
        &self.key
    }

    /// Store a route, returning the one it replaces, if any.
    pub fn insert(&mut self, prefix: IpNet, entry: RouteEntry) -> Option<RouteEntry> {
        self.routes.insert(prefix.trunc(), entry)
    }
    pub fn remove(&mut self, prefix: &IpNet) -> Option<RouteEntry> {
        self.routes.remove(&prefix.trunc())
    }
    #[must_use]
    pub fn get(&self, prefix: &IpNet) -> Option<&RouteEntry> {
        self.routes.get(&prefix.trunc())
    }
    pub fn iter(&self) -> impl Iterator<Item = (&IpNet, &RouteEntry)> {
        self.routes.iter()
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Remove all the routes that the predicate selects and return them
    pub fn extract_if<F>(&mut self, mut pred: F) -> Vec<(IpNet, RouteEntry)>
    where
        F: FnMut(&IpNet, &RouteEntry) -> bool,
    {
        let selected: Vec<IpNet> = self
            .routes
            .iter()
            .filter(|(prefix, entry)| pred(prefix, entry))
            .map(|(prefix, _)| *prefix)
            .collect();
        selected
            .into_iter()
            .filter_map(|prefix| self.routes.remove(&prefix).map(|entry| (prefix, entry)))
            .collect()
    }

    /// Remove all routes
    pub fn drain(&mut self) -> Vec<(IpNet, RouteEntry)> {
        std::mem::take(&mut self.routes).into_iter().collect()
    }

    /// Longest prefix match. Returns nothing if the address family does not match that of
    /// the table.
    #[must_use]
    pub fn lpm(&self, target: IpAddr) -> Option<(&IpNet, &RouteEntry)> {
        let max_len = match target {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (0..=max_len).rev().find_map(|len| {
            let candidate = IpNet::new(target, len).ok()?.trunc();
            self.routes.get_key_value(&candidate)
        })
    }
}

impl Display for Afi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Afi::Unspec => write!(f, "unspec"),
            Afi::Ipv4 => write!(f, "ipv4"),
            Afi::Ipv6 => write!(f, "ipv6"),
            Afi::L2vpn => write!(f, "l2vpn"),
        }
    }
}
impl Display for Safi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Safi::Unspec => write!(f, "unspec"),
            Safi::Unicast => write!(f, "unicast"),
            Safi::Multicast => write!(f, "multicast"),
            Safi::Mpls => write!(f, "mpls"),
            Safi::Evpn => write!(f, "evpn"),
        }
    }
}
impl Display for TableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(ns {} {}/{} table {})",
            self.ns_id, self.afi, self.safi, self.table_id
        )
    }
}
