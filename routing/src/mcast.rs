// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Multicast RPF lookup policy. A reverse-path lookup may be answered by the multicast RIB
//! (MRIB), the unicast RIB (URIB) or both; the configured mode tells which match wins.

use crate::rib::nhgstore::NhgId;
use crate::rib::table::RouteOrigin;
use ipnet::IpNet;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MulticastMode {
    /// behaves as [`MulticastMode::MribFirst`] but is not rendered in the config
    #[default]
    NoConfig,
    MribOnly,
    UribOnly,
    /// MRIB if it has a match at all, URIB otherwise
    MribFirst,
    /// lower administrative distance wins
    LowerDistance,
    /// longer prefix wins
    LongerPrefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpfSource {
    Mrib,
    Urib,
}

/// The result of a lookup in one of the RIBs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpfMatch {
    pub from: RpfSource,
    pub prefix: IpNet,
    pub distance: u8,
    pub origin: RouteOrigin,
    pub nhg_id: Option<NhgId>,
}

/// Pick the winner among the MRIB and URIB matches. MRIB wins all ties.
#[must_use]
pub fn resolve(
    mode: MulticastMode,
    mrib: Option<RpfMatch>,
    urib: Option<RpfMatch>,
) -> Option<RpfMatch> {
    match mode {
        MulticastMode::MribOnly => mrib,
        MulticastMode::UribOnly => urib,
        MulticastMode::NoConfig | MulticastMode::MribFirst => mrib.or(urib),
        MulticastMode::LowerDistance => match (mrib, urib) {
            (Some(m), Some(u)) => Some(if u.distance < m.distance { u } else { m }),
            (m, u) => m.or(u),
        },
        MulticastMode::LongerPrefix => match (mrib, urib) {
            (Some(m), Some(u)) => Some(if u.prefix.prefix_len() > m.prefix.prefix_len() {
                u
            } else {
                m
            }),
            (m, u) => m.or(u),
        },
    }
}

impl MulticastMode {
    /// Whether the mode is rendered in the configuration
    #[must_use]
    pub fn is_configured(&self) -> bool {
        *self != MulticastMode::NoConfig
    }
}

impl Display for MulticastMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MulticastMode::NoConfig => "no-config",
            MulticastMode::MribOnly => "mrib-only",
            MulticastMode::UribOnly => "urib-only",
            MulticastMode::MribFirst => "mrib-then-urib",
            MulticastMode::LowerDistance => "lower-distance",
            MulticastMode::LongerPrefix => "longer-prefix",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MulticastMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-config" => Ok(MulticastMode::NoConfig),
            "mrib-only" => Ok(MulticastMode::MribOnly),
            "urib-only" => Ok(MulticastMode::UribOnly),
            "mrib-then-urib" => Ok(MulticastMode::MribFirst),
            "lower-distance" => Ok(MulticastMode::LowerDistance),
            "longer-prefix" => Ok(MulticastMode::LongerPrefix),
            other => Err(format!("Unknown rpf lookup mode '{other}'")),
        }
    }
}
