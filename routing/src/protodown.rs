// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reasons for which an interface may be held protocol-down. Reasons accumulate: an
//! interface stays down as long as any reason remains set.

use bitflags::bitflags;
use std::fmt::Display;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct ProtodownReasons: u32 {
        /// EVPN multihoming startup delay has not expired yet
        const EVPN_STARTUP_DELAY = 1 << 0;
        /// all EVPN uplinks are down
        const EVPN_UPLINK_DOWN = 1 << 1;
        const EVPN_ALL = Self::EVPN_STARTUP_DELAY.bits() | Self::EVPN_UPLINK_DOWN.bits();
    }
}

impl Display for ProtodownReasons {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::with_capacity(2);
        if self.contains(ProtodownReasons::EVPN_STARTUP_DELAY) {
            names.push("startup-delay");
        }
        if self.contains(ProtodownReasons::EVPN_UPLINK_DOWN) {
            names.push("uplinks-down");
        }
        write!(f, "{}", names.join(","))
    }
}
