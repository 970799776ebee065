// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Module that implements Display for routing objects

use crate::mlag::MlagChannel;
use crate::rib::event::MetaQueueClass;
use crate::rib::nhgstore::{FwAction, Nexthop, NexthopGroup, NexthopGroupStore};
use crate::rib::table::{RouteEntry, RouteTable};
use crate::rib::workq::WorkQueue;
use crate::revent::ROUTER_EVENTS;
use crate::zrouter::{RouterState, SweepState};
use std::fmt::Display;
use std::time::Duration;

const LINE_WIDTH: usize = 81;

/// Work-queue hold time and packets-to-process budget unless configured otherwise
const DEFAULT_RIB_HOLD_TIME: Duration = Duration::from_millis(10);
const DEFAULT_PACKETS_TO_PROCESS: usize = 1000;

pub(crate) struct Heading(pub String);
impl Display for Heading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = LINE_WIDTH.saturating_sub(self.0.len() + 2) / 2;
        write!(f, " {0:─<width$}", "─", width = len)?;
        write!(f, " {} ", self.0)?;
        writeln!(f, " {0:─<width$}", "─", width = len)
    }
}
pub(crate) fn line(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    writeln!(f, " {0:─<width$}", "─", width = LINE_WIDTH)
}

impl Display for Nexthop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(address) = self.address {
            write!(f, " via {address}")?;
        }
        if let Some(ifindex) = self.ifindex {
            write!(f, " interface:{ifindex}")?;
        }
        if self.vrfid != 0 {
            write!(f, " vrf:{}", self.vrfid)?;
        }
        if self.fwaction != FwAction::Forward {
            write!(f, " action:{:?}", self.fwaction)?;
        }
        Ok(())
    }
}

impl Display for NexthopGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "  nhg {:<10} refs:{:<5} seq:{:<8}", self.id, self.refcnt, self.seq)?;
        if let Some(owner) = self.owner {
            write!(f, " owner:{owner:?}")?;
        }
        writeln!(f)?;
        for nhop in self.key.nexthops() {
            writeln!(f, "       {nhop}")?;
        }
        Ok(())
    }
}

impl Display for NexthopGroupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Heading(format!("Nexthop-groups ({})", self.len())).fmt(f)?;
        for group in self.values() {
            group.fmt(f)?;
        }
        Ok(())
    }
}

impl Display for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} [{}/{}]", self.origin, self.distance, self.metric)?;
        match self.nhg_id {
            Some(id) => write!(f, " nhg {id}")?,
            None => write!(f, " no nexthops")?,
        }
        write!(f, " seq {}", self.seq)
    }
}

impl Display for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Heading(format!("Table {} ({} routes)", self.key(), self.len())).fmt(f)?;
        for (prefix, entry) in self.iter() {
            writeln!(f, "  {prefix:<20} {entry}")?;
        }
        Ok(())
    }
}

impl Display for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Heading("RIB work queue".to_string()).fmt(f)?;
        writeln!(
            f,
            " hold: {:?} retry: {:?} budget: {} accepting: {}",
            self.hold_time(),
            self.retry_time(),
            self.budget(),
            self.is_accepting()
        )?;
        write!(f, " pending: {}", self.len())?;
        for class in MetaQueueClass::ALL {
            write!(f, " {class}:{}", self.len_class(class))?;
        }
        writeln!(f)?;
        let stats = self.stats();
        writeln!(
            f,
            " cycles: {} processed: {} retries: {} dropped: {} failed: {}",
            stats.cycles, stats.processed, stats.retries, stats.dropped, stats.failed
        )
    }
}

impl Display for MlagChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Heading("MLAG".to_string()).fmt(f)?;
        writeln!(f, " daemon: {} ({})", self.path().display(), self.state())?;
        writeln!(f, " role: {}", self.role())?;
        if let Some((name, ifindex)) = self.peerlink() {
            writeln!(f, " peerlink: {name} (ifindex {ifindex})")?;
        }
        if let Some(mac) = self.sysmac() {
            writeln!(f, " sysmac: {mac}")?;
        }
        writeln!(
            f,
            " clients: {} pending: {} sent: {} discarded: {}",
            self.interested(),
            self.pending(),
            self.sent(),
            self.discarded()
        )?;
        let stats = self.stats();
        writeln!(
            f,
            " connects: {} disconnects: {} failures: {} rx: {}",
            stats.connects, stats.disconnects, stats.connect_failures, stats.rx_msgs
        )?;
        if let Some(time) = stats.last_conn_time {
            writeln!(f, " last connect: {}", time.format("%Y-%m-%dT %H:%M:%S"))?;
        }
        if let Some(time) = stats.last_disconn_time {
            writeln!(f, " last disconnect: {}", time.format("%Y-%m-%dT %H:%M:%S"))?;
        }
        Ok(())
    }
}

/// The router configuration that differs from the defaults
pub(crate) struct ConfigDump<'a>(pub &'a RouterState);
impl Display for ConfigDump<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0;
        let mode = state.get_multicast_mode();
        if mode.is_configured() {
            writeln!(f, "ip multicast rpf-lookup-mode {mode}")?;
        }
        let hold = state.ribq().hold_time();
        if hold != DEFAULT_RIB_HOLD_TIME {
            writeln!(f, "zebra work-queue {}", hold.as_millis())?;
        }
        if state.packets_to_process() != DEFAULT_PACKETS_TO_PROCESS {
            writeln!(f, "zebra zapi-packets {}", state.packets_to_process())?;
        }
        Ok(())
    }
}

/// Summary of the router state
pub(crate) struct TableSummary<'a>(pub &'a RouterState);
impl Display for TableSummary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0;
        Heading(format!("Router {}", state.name())).fmt(f)?;
        writeln!(f, " status: {:?}", state.status())?;
        writeln!(f, " sequence: {}", state.seq_counter().current())?;
        match state.sweep_state() {
            SweepState::Idle => writeln!(f, " sweep: idle")?,
            SweepState::Armed(_) => writeln!(f, " sweep: pending")?,
            SweepState::Done => writeln!(f, " sweep: done")?,
        }
        writeln!(f, " rpf-lookup-mode: {}", state.get_multicast_mode())?;
        writeln!(f, " evpn vrf: {}", state.evpn_vrf_id())?;
        writeln!(
            f,
            " multipath: {} asic-offload: {} notify-on-ack: {} nhg-support: {}",
            state.multipath_num(),
            state.asic_offloaded(),
            state.notify_on_ack(),
            state.supports_nhgs()
        )?;
        let clients: Vec<String> = state.clients().map(|c| format!("{c:?}")).collect();
        writeln!(f, " clients: [{}]", clients.join(", "))?;
        let stale: Vec<String> = state.stale_clients().map(|c| format!("{c:?}")).collect();
        if !stale.is_empty() {
            writeln!(f, " stale clients: [{}]", stale.join(", "))?;
        }

        Heading(format!("Tables ({})", state.registry().len())).fmt(f)?;
        for (key, handle) in state.registry().iter() {
            match handle.read() {
                Ok(table) => writeln!(f, "  {key}: {} routes", table.len())?,
                Err(_) => writeln!(f, "  {key}: (unavailable)")?,
            }
        }
        writeln!(f, " nexthop-groups: {}", state.nhgs().len())?;

        state.ribq().fmt(f)?;
        state.mlag().fmt(f)?;

        let protodown = state.protodown_map();
        if !protodown.is_empty() {
            Heading("Protodown".to_string()).fmt(f)?;
            for (ifindex, reasons) in protodown {
                writeln!(f, "  ifindex {ifindex}: {reasons}")?;
            }
        }

        Heading("Events".to_string()).fmt(f)?;
        ROUTER_EVENTS.with(|evlog| evlog.borrow().fmt(f))?;
        line(f)
    }
}

#[cfg(test)]
mod tests {
    use crate::mcast::MulticastMode;
    use crate::rib::event::RibEvent;
    use crate::rib::nhgstore::Nexthop;
    use crate::rib::table::tests::{mk_addr, mk_prefix};
    use crate::rib::table::{Afi, Route, RouteNexthops, RouteOrigin, Safi, TableKey};
    use crate::router::RouterParamsBuilder;
    use crate::zrouter::RouterState;
    use std::time::{Duration, Instant};

    #[test]
    fn test_config_dump() {
        let params = RouterParamsBuilder::default()
            .mlag_sock_path("/tmp/zebra-mlag-cfgdump.sock")
            .build()
            .unwrap();
        let mut state = RouterState::new(&params, None).unwrap();
        assert_eq!(state.config_dump(), "");

        state.set_multicast_mode(MulticastMode::MribFirst).unwrap();
        assert_eq!(
            state.config_dump(),
            "ip multicast rpf-lookup-mode mrib-then-urib\n"
        );

        let params = RouterParamsBuilder::default()
            .mlag_sock_path("/tmp/zebra-mlag-cfgdump2.sock")
            .rib_hold_time(Duration::from_millis(50))
            .packets_to_process(500usize)
            .build()
            .unwrap();
        let state = RouterState::new(&params, None).unwrap();
        assert_eq!(
            state.config_dump(),
            "zebra work-queue 50\nzebra zapi-packets 500\n"
        );
    }

    #[test]
    fn test_summary() {
        let params = RouterParamsBuilder::default()
            .name("summary")
            .mlag_sock_path("/tmp/zebra-mlag-summary.sock")
            .build()
            .unwrap();
        let mut state = RouterState::new(&params, None).unwrap();
        let key = TableKey::new(0, Afi::Ipv4, Safi::Unicast, 254);
        let route = Route::new(
            RouteOrigin::Static,
            1,
            0,
            RouteNexthops::List(vec![Nexthop::with_address(mk_addr("10.0.0.1"))]),
        );
        let now = Instant::now();
        state
            .rib_enqueue_at(RibEvent::add(key, mk_prefix("192.168.1.0/24"), route), now)
            .unwrap();
        state.run(now + Duration::from_millis(10)).unwrap();

        let summary = state.show_table_summary();
        println!("{summary}");
        assert!(summary.contains("Router summary"));
        assert!(summary.contains("(ns 0 ipv4/unicast table 254): 1 routes"));
        assert!(summary.contains("nexthop-groups: 1"));

        let table = state.registry().find(&key).unwrap();
        let shown = table.read().unwrap().to_string();
        assert!(shown.contains("192.168.1.0/24"));
        assert!(shown.contains("Static [1/0]"));
        println!("{}", state.nhgs());
    }
}
