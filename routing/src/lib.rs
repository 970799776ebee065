// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A library implementing the core of a routing manager: the registry of routing tables,
//! the prioritized RIB work queue that applies route changes, the channel towards an
//! MLAG daemon, the multicast RPF lookup policy and the graceful-restart sweep.

#![allow(clippy::similar_names)]

mod event;
mod revent;

pub mod ctl;
mod display;
mod errors;
pub mod logging;
pub mod mcast;
pub mod mlag;
pub mod protodown;
pub mod rib;
mod rio;
mod router;
pub mod seqnum;
pub mod zrouter;

// re-exports
pub use errors::RouterError;
pub use mcast::{MulticastMode, RpfMatch, RpfSource};
pub use mlag::{MlagRole, MlagSender, MlagState};
pub use protodown::ProtodownReasons;
pub use router::{Router, RouterParams, RouterParamsBuilder, RouterParamsBuilderError};
pub use zrouter::{RouterState, RouterStatus, SweepResult, SweepState};
