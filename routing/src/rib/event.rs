// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Route-change events fed to the RIB scheduler

use crate::rib::table::{Route, RouteOrigin, TableKey};
use ipnet::IpNet;
use std::fmt::Display;

/// Priority classes of the meta-queue, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaQueueClass {
    /// fast-converging routes: connected, kernel, local and static
    Early = 0,
    /// routes from routing protocols
    Default = 1,
    /// routes that need re-resolution after a nexthop-group change
    Late = 2,
}

impl MetaQueueClass {
    pub const COUNT: usize = 3;
    pub const ALL: [MetaQueueClass; Self::COUNT] = [Self::Early, Self::Default, Self::Late];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl From<RouteOrigin> for MetaQueueClass {
    fn from(origin: RouteOrigin) -> Self {
        match origin {
            RouteOrigin::Kernel
            | RouteOrigin::Connected
            | RouteOrigin::Local
            | RouteOrigin::Static => MetaQueueClass::Early,
            _ => MetaQueueClass::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RibOp {
    Add(Route),
    Del(RouteOrigin),
}

impl RibOp {
    #[must_use]
    pub fn origin(&self) -> RouteOrigin {
        match self {
            RibOp::Add(route) => route.origin,
            RibOp::Del(origin) => *origin,
        }
    }
}

/// A change to the route for a prefix in a table
#[derive(Debug, Clone, PartialEq)]
pub struct RibEvent {
    pub key: TableKey,
    pub prefix: IpNet,
    pub op: RibOp,
    pub class: MetaQueueClass,
    /// number of times processing was attempted
    pub attempts: u32,
}

impl RibEvent {
    #[must_use]
    pub fn new(key: TableKey, prefix: IpNet, op: RibOp) -> Self {
        let class = MetaQueueClass::from(op.origin());
        Self {
            key,
            prefix,
            op,
            class,
            attempts: 0,
        }
    }
    #[must_use]
    pub fn add(key: TableKey, prefix: IpNet, route: Route) -> Self {
        Self::new(key, prefix, RibOp::Add(route))
    }
    #[must_use]
    pub fn del(key: TableKey, prefix: IpNet, origin: RouteOrigin) -> Self {
        Self::new(key, prefix, RibOp::Del(origin))
    }
    #[must_use]
    pub fn with_class(mut self, class: MetaQueueClass) -> Self {
        self.class = class;
        self
    }
}

impl Display for MetaQueueClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaQueueClass::Early => write!(f, "early"),
            MetaQueueClass::Default => write!(f, "default"),
            MetaQueueClass::Late => write!(f, "late"),
        }
    }
}

impl Display for RibEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            RibOp::Add(_) => "add",
            RibOp::Del(_) => "del",
        };
        write!(
            f,
            "{op} {} {:?} in {} [{}]",
            self.prefix,
            self.op.origin(),
            self.key,
            self.class
        )
    }
}
