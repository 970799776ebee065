// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Router events and event log

use crate::event::make_event_log;
use crate::mcast::MulticastMode;
use crate::rib::table::RouteOrigin;
use std::fmt::Display;

pub(crate) enum RouterEvent {
    Started,
    ShutdownRequested,
    Terminated,

    ClientConnected(RouteOrigin),
    ClientDisconnected(RouteOrigin, bool),

    MlagConnected,
    MlagDisconnected,
    MlagConnectFailed,
    MlagRetry,

    SweepArmed,
    RoutesSwept(usize),
    NhgsSwept(usize),

    MulticastModeChanged(MulticastMode),
    RibEventsDiscarded(usize),
}

impl Display for RouterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterEvent::Started => write!(f, "Started!"),
            RouterEvent::ShutdownRequested => write!(f, "Shutdown requested"),
            RouterEvent::Terminated => write!(f, "Terminated"),
            RouterEvent::ClientConnected(proto) => write!(f, "Client {proto:?} connected"),
            RouterEvent::ClientDisconnected(proto, graceful) => {
                let how = if *graceful { "gracefully" } else { "abruptly" };
                write!(f, "Client {proto:?} disconnected {how}")
            }
            RouterEvent::MlagConnected => write!(f, "Connected to MLAG daemon"),
            RouterEvent::MlagDisconnected => write!(f, "Disconnected from MLAG daemon"),
            RouterEvent::MlagConnectFailed => write!(f, "Failed to connect to MLAG daemon"),
            RouterEvent::MlagRetry => write!(f, "Retrying connection to MLAG daemon"),
            RouterEvent::SweepArmed => write!(f, "Graceful-restart sweep timer armed"),
            RouterEvent::RoutesSwept(n) => write!(f, "Swept {n} stale routes"),
            RouterEvent::NhgsSwept(n) => write!(f, "Swept {n} stale nexthop-groups"),
            RouterEvent::MulticastModeChanged(mode) => {
                write!(f, "Multicast RPF lookup mode set to {mode}")
            }
            RouterEvent::RibEventsDiscarded(n) => write!(f, "Discarded {n} pending RIB events"),
        }
    }
}

make_event_log!(ROUTER_EVENTS, RouterEvent, 1000);

macro_rules! revent {
    ($item:expr) => {
        $crate::revent::ROUTER_EVENTS.with(|evlog| evlog.borrow_mut().add($item))
    };
}
pub(crate) use revent;
