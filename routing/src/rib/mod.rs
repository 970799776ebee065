// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! RIB state: tables, their registry, nexthop groups and the scheduling of route changes

pub mod event;
pub mod metaq;
pub mod nhgstore;
pub mod registry;
pub mod table;
pub mod workq;

// re-exports
pub use event::{MetaQueueClass, RibEvent, RibOp};
pub use nhgstore::{Nexthop, NexthopGroupStore, NhgId};
pub use registry::{TableHandle, TableRegistry};
pub use table::{Afi, Route, RouteNexthops, RouteOrigin, RouteTable, Safi, TableKey};
pub use workq::{RibProcessor, WorkQueue};
