// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The router state: the aggregate that owns every routing table, the RIB work queue, the
//! nexthop-group store and the MLAG channel, along with the router-wide sequence counter,
//! the shutdown flag and the graceful-restart sweep timer. It is the single entry point
//! for collaborators. Apart from the sequence counter, the shutdown flag and the MLAG FIFO,
//! it is only ever touched from the main context.

use crate::display::{ConfigDump, TableSummary};
use crate::errors::RouterError;
use crate::mcast::{MulticastMode, RpfMatch, RpfSource, resolve};
use crate::mlag::{MlagChannel, MlagRole, MlagSender};
use crate::protodown::ProtodownReasons;
use crate::revent::{RouterEvent, revent};
use crate::rib::event::{RibEvent, RibOp};
use crate::rib::nhgstore::{Nexthop, NexthopGroupStore, NhgId};
use crate::rib::registry::{TableHandle, TableRegistry};
use crate::rib::table::{
    Afi, NsId, RT_TABLE_MAIN, RouteEntry, RouteNexthops, RouteOrigin, RouteTable, Safi, TableId,
    TableKey, VRF_DEFAULT, VrfId,
};
use crate::rib::workq::{RibProcessor, WorkQueue, WorkQueueRun};
use crate::router::RouterParams;
use crate::seqnum::{SeqCounter, seq_before};

use bytes::Bytes;
use mac_address::MacAddress;
use mio::{Registry, Token};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLockWriteGuard, TryLockError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

#[allow(unused)]
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterStatus {
    Init,
    Running,
    ShuttingDown,
    Terminated,
}

/// State of the graceful-restart sweep. The sweep happens once per router lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Armed(Instant),
    Done,
}

/// Counts of a sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepResult {
    pub routes: usize,
    pub nhgs: usize,
}

/// Applies route-change events to the tables of the registry
struct RibApplier<'a> {
    registry: &'a mut TableRegistry,
    nhgs: &'a mut NexthopGroupStore,
    seq: &'a SeqCounter,
}

fn try_lock_table(
    handle: &TableHandle,
    key: TableKey,
) -> Result<RwLockWriteGuard<'_, RouteTable>, RouterError> {
    match handle.try_write() {
        Ok(table) => Ok(table),
        Err(TryLockError::WouldBlock) => Err(RouterError::TableBusy(key)),
        Err(TryLockError::Poisoned(_)) => Err(RouterError::Internal("Table lock poisoned")),
    }
}

/// Check that an event can ever be applied
fn validate_event(event: &RibEvent) -> Result<(), RouterError> {
    if !event.key.is_valid() {
        return Err(RouterError::MalformedKey(event.key));
    }
    if !event.key.admits(&event.prefix) {
        return Err(RouterError::AfiMismatch {
            key: event.key,
            prefix: event.prefix,
        });
    }
    Ok(())
}

impl RibProcessor for RibApplier<'_> {
    fn process(&mut self, event: &RibEvent) -> Result<(), RouterError> {
        validate_event(event)?;
        let key = event.key;
        match &event.op {
            RibOp::Add(route) => {
                if let RouteNexthops::Group(id) = &route.nexthops {
                    if self.nhgs.get(*id).is_none() {
                        return Err(RouterError::NoSuchNhg(*id));
                    }
                }
                let handle = self.registry.get_or_create(&key)?;
                let mut table = try_lock_table(&handle, key)?;
                let seq = self.seq.next();
                let nhg_id = match &route.nexthops {
                    RouteNexthops::List(nhops) if nhops.is_empty() => None,
                    RouteNexthops::List(nhops) => Some(self.nhgs.intern(nhops, seq)),
                    RouteNexthops::Group(id) => {
                        self.nhgs.reference(*id, seq)?;
                        Some(*id)
                    }
                };
                let entry = RouteEntry {
                    origin: route.origin,
                    distance: route.distance,
                    metric: route.metric,
                    nhg_id,
                    seq,
                };
                if let Some(old) = table.insert(event.prefix, entry) {
                    if let Some(id) = old.nhg_id {
                        self.nhgs.release(id)?;
                    }
                }
                Ok(())
            }
            RibOp::Del(origin) => {
                let Some(handle) = self.registry.find(&key) else {
                    debug!("Ignoring deletion of {}: no table {key}", event.prefix);
                    return Ok(());
                };
                let mut table = try_lock_table(&handle, key)?;
                match table.get(&event.prefix) {
                    Some(entry) if entry.origin == *origin => {}
                    Some(entry) => {
                        debug!(
                            "Ignoring deletion of {} by {origin:?}: route is from {:?}",
                            event.prefix, entry.origin
                        );
                        return Ok(());
                    }
                    None => return Ok(()),
                }
                if let Some(old) = table.remove(&event.prefix) {
                    self.seq.next();
                    if let Some(id) = old.nhg_id {
                        self.nhgs.release(id)?;
                    }
                }
                Ok(())
            }
        }
    }
}

pub struct RouterState {
    name: String,
    status: RouterStatus,
    shutdown: Arc<AtomicBool>,
    seq: Arc<SeqCounter>,
    registry: TableRegistry,
    nhgs: NexthopGroupStore,
    ribq: WorkQueue,
    mlag: MlagChannel,
    mlag_subscribers: Vec<UnboundedSender<Bytes>>,
    multicast_mode: MulticastMode,
    startup_time: Option<Instant>,
    startup_seq: Option<u32>,
    gr_time: Duration,
    sweep: SweepState,
    routes_swept: bool,
    nhgs_swept: bool,
    clients: BTreeSet<RouteOrigin>,
    stale_clients: BTreeSet<RouteOrigin>,
    evpn_vrf: Option<VrfId>,
    protodown: BTreeMap<u32, ProtodownReasons>,
    asic_offloaded: bool,
    notify_on_ack: bool,
    supports_nhgs: bool,
    multipath_num: usize,
    packets_to_process: usize,
}

/* construction and lifecycle */
impl RouterState {
    /// Build the router state. The optional waker gets signalled when the MLAG writer
    /// has news for the main context.
    ///
    /// # Errors
    /// Fails if the MLAG channel cannot be set up.
    pub fn new(params: &RouterParams, waker: Option<Arc<mio::Waker>>) -> Result<Self, RouterError> {
        let name = params.name.clone();
        debug!("{name}: Initializing router state...");
        let mlag = MlagChannel::new(&params.mlag_sock_path, params.mlag_retry_time, waker)?;
        Ok(Self {
            name,
            status: RouterStatus::Init,
            shutdown: Arc::new(AtomicBool::new(false)),
            seq: Arc::new(SeqCounter::default()),
            registry: TableRegistry::new(),
            nhgs: NexthopGroupStore::new(params.multipath_num),
            ribq: WorkQueue::new(
                params.rib_hold_time,
                params.rib_retry_time,
                params.packets_to_process,
                params.rib_max_retries,
            ),
            mlag,
            mlag_subscribers: vec![],
            multicast_mode: params.multicast_mode,
            startup_time: None,
            startup_seq: None,
            gr_time: params.graceful_restart_time,
            sweep: SweepState::Idle,
            routes_swept: false,
            nhgs_swept: false,
            clients: BTreeSet::new(),
            stale_clients: BTreeSet::new(),
            evpn_vrf: None,
            protodown: BTreeMap::new(),
            asic_offloaded: params.asic_offloaded,
            notify_on_ack: params.notify_on_ack,
            supports_nhgs: params.supports_nhgs,
            multipath_num: params.multipath_num,
            packets_to_process: params.packets_to_process,
        })
    }

    fn check_running(&self) -> Result<(), RouterError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RouterError::ShuttingDown);
        }
        Ok(())
    }

    /// Start the router: record the startup watermark and arm the sweep timer
    ///
    /// # Errors
    /// Fails if the router was already started or is shutting down.
    pub fn start(&mut self, now: Instant) -> Result<(), RouterError> {
        self.check_running()?;
        if self.status != RouterStatus::Init {
            return Err(RouterError::Internal("Router already started"));
        }
        self.startup_time = Some(now);
        self.startup_seq = Some(self.seq.current().wrapping_add(1));
        self.arm_sweep(now + self.gr_time)?;
        self.status = RouterStatus::Running;
        revent!(RouterEvent::Started);
        info!("{}: started", self.name);
        Ok(())
    }

    /// Begin the shutdown: no new work is accepted, the sweep is cancelled and the MLAG
    /// channel flushes what it can before closing.
    ///
    /// # Errors
    /// Fails if shutdown had already begun.
    pub fn shutdown(&mut self) -> Result<(), RouterError> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Err(RouterError::ShuttingDown);
        }
        info!("{}: shutting down...", self.name);
        self.status = RouterStatus::ShuttingDown;
        self.ribq.close();
        if let SweepState::Armed(_) = self.sweep {
            debug!("Cancelling sweep timer");
            self.sweep = SweepState::Idle;
        }
        revent!(RouterEvent::ShutdownRequested);
        self.mlag.shutdown()
    }

    /// Release everything. Starts the shutdown if needed.
    ///
    /// # Errors
    /// Fails on internal errors only.
    pub fn terminate(&mut self) -> Result<(), RouterError> {
        if self.status == RouterStatus::Terminated {
            return Ok(());
        }
        if !self.shutdown.load(Ordering::Acquire) {
            self.shutdown()?;
        }
        let discarded = self.ribq.flush();
        if discarded > 0 {
            warn!("Discarded {discarded} pending RIB events");
            revent!(RouterEvent::RibEventsDiscarded(discarded));
        }
        self.release_all_tables();
        self.mlag_subscribers.clear();
        self.status = RouterStatus::Terminated;
        revent!(RouterEvent::Terminated);
        info!("{}: terminated", self.name);
        Ok(())
    }

    /// Release every table and nexthop group, leaving the MLAG channel alone
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn cleanup(&mut self) -> Result<(), RouterError> {
        self.check_running()?;
        self.release_all_tables();
        Ok(())
    }

    fn release_all_tables(&mut self) {
        let tables = self.registry.drain();
        debug!("Releasing {} tables", tables.len());
        self.nhgs.clear();
    }

    #[must_use]
    pub fn status(&self) -> RouterStatus {
        self.status
    }
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
    /// Shared view of the shutdown flag
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }
    /// Shared view of the sequence counter
    #[must_use]
    pub fn seq_counter(&self) -> Arc<SeqCounter> {
        self.seq.clone()
    }
    #[must_use]
    pub fn startup_time(&self) -> Option<Instant> {
        self.startup_time
    }
    #[must_use]
    pub fn startup_seq(&self) -> Option<u32> {
        self.startup_seq
    }
}

/* tables */
impl RouterState {
    /// Look up a table
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn find_table(
        &self,
        ns_id: NsId,
        afi: Afi,
        safi: Safi,
        table_id: TableId,
    ) -> Result<Option<TableHandle>, RouterError> {
        self.check_running()?;
        Ok(self
            .registry
            .find(&TableKey::new(ns_id, afi, safi, table_id)))
    }

    /// Get a table, creating it if it does not exist
    ///
    /// # Errors
    /// Fails if the router is shutting down or the key is malformed.
    pub fn get_table(
        &mut self,
        ns_id: NsId,
        afi: Afi,
        safi: Safi,
        table_id: TableId,
    ) -> Result<TableHandle, RouterError> {
        self.check_running()?;
        self.registry
            .get_or_create(&TableKey::new(ns_id, afi, safi, table_id))
    }

    /// Destroy a table, if it exists. The nexthop groups of its routes are released.
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn release_table(
        &mut self,
        ns_id: NsId,
        afi: Afi,
        safi: Safi,
        table_id: TableId,
    ) -> Result<(), RouterError> {
        self.check_running()?;
        let key = TableKey::new(ns_id, afi, safi, table_id);
        let Some(handle) = self.registry.release(&key) else {
            return Ok(());
        };
        let mut table = handle
            .write()
            .map_err(|_| RouterError::Internal("Table lock poisoned"))?;
        for (_, entry) in table.drain() {
            if let Some(id) = entry.nhg_id {
                self.nhgs.release(id)?;
            }
        }
        Ok(())
    }

    pub(crate) fn registry(&self) -> &TableRegistry {
        &self.registry
    }
    pub(crate) fn nhgs(&self) -> &NexthopGroupStore {
        &self.nhgs
    }
    pub(crate) fn ribq(&self) -> &WorkQueue {
        &self.ribq
    }
    pub(crate) fn mlag(&self) -> &MlagChannel {
        &self.mlag
    }
    pub(crate) fn protodown_map(&self) -> &BTreeMap<u32, ProtodownReasons> {
        &self.protodown
    }
}

/* RIB scheduling */
impl RouterState {
    /// Queue a route change
    ///
    /// # Errors
    /// Fails if the router is shutting down or the event can never be applied.
    pub fn rib_enqueue(&mut self, event: RibEvent) -> Result<(), RouterError> {
        self.rib_enqueue_at(event, Instant::now())
    }

    /// Same as [`Self::rib_enqueue`] with an explicit time
    ///
    /// # Errors
    /// Fails if the router is shutting down or the event can never be applied.
    pub fn rib_enqueue_at(&mut self, event: RibEvent, now: Instant) -> Result<(), RouterError> {
        self.check_running()?;
        if let Err(e) = validate_event(&event) {
            error!("Rejecting event {event}: {e}");
            return Err(e);
        }
        self.ribq.enqueue(event, now)
    }

    /// Run whatever work is due: RIB processing, MLAG notifications and the sweep timer.
    /// Returns when something needs to be done next.
    ///
    /// # Errors
    /// Fails on internal errors only.
    pub fn run(&mut self, now: Instant) -> Result<Option<Instant>, RouterError> {
        if self.is_shutting_down() {
            return Ok(None);
        }
        let outcome = self.run_ribq(now);
        if outcome != WorkQueueRun::default() {
            debug!(
                "RIB run: processed {} retried {} dropped {} failed {}",
                outcome.processed, outcome.retried, outcome.dropped, outcome.failed
            );
        }
        self.mlag.service(now)?;
        if let SweepState::Armed(when) = self.sweep {
            if when <= now {
                self.sweep_now()?;
            }
        }
        Ok(self.next_deadline())
    }

    fn run_ribq(&mut self, now: Instant) -> WorkQueueRun {
        let mut applier = RibApplier {
            registry: &mut self.registry,
            nhgs: &mut self.nhgs,
            seq: &self.seq,
        };
        self.ribq.run(now, &mut applier)
    }

    /// The earliest of the pending timers
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let sweep = match self.sweep {
            SweepState::Armed(when) => Some(when),
            _ => None,
        };
        [self.ribq.deadline(), self.mlag.next_deadline(), sweep]
            .into_iter()
            .flatten()
            .min()
    }

    /// Next sequence number, to timestamp freshness
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn get_next_sequence(&self) -> Result<u32, RouterError> {
        self.check_running()?;
        Ok(self.seq.next())
    }

    #[must_use]
    pub fn notify_on_ack(&self) -> bool {
        self.notify_on_ack
    }
    #[must_use]
    pub fn asic_offloaded(&self) -> bool {
        self.asic_offloaded
    }
    #[must_use]
    pub fn supports_nhgs(&self) -> bool {
        self.supports_nhgs
    }
    pub fn set_supports_nhgs(&mut self, value: bool) {
        if self.supports_nhgs != value {
            info!("Dataplane nexthop-group support set to {value}");
        }
        self.supports_nhgs = value;
    }
    #[must_use]
    pub fn multipath_num(&self) -> usize {
        self.multipath_num
    }
    #[must_use]
    pub fn packets_to_process(&self) -> usize {
        self.packets_to_process
    }
}

/* nexthop groups owned by protocols */
impl RouterState {
    /// Install (or replace) a nexthop group on behalf of a protocol client
    ///
    /// # Errors
    /// Fails if the router is shutting down or the id is not usable by protocols.
    pub fn install_nhg(
        &mut self,
        owner: RouteOrigin,
        id: NhgId,
        nexthops: &[Nexthop],
    ) -> Result<(), RouterError> {
        self.check_running()?;
        let seq = self.seq.next();
        self.nhgs.install(owner, id, nexthops, seq)
    }

    /// Remove a nexthop group installed by a protocol client
    ///
    /// # Errors
    /// Fails if the router is shutting down or the group is not owned by the client.
    pub fn uninstall_nhg(&mut self, owner: RouteOrigin, id: NhgId) -> Result<(), RouterError> {
        self.check_running()?;
        self.nhgs.uninstall(owner, id)
    }
}

/* graceful-restart sweep */
impl RouterState {
    fn arm_sweep(&mut self, when: Instant) -> Result<(), RouterError> {
        if self.sweep != SweepState::Idle {
            return Err(RouterError::SweepAlreadyArmed);
        }
        self.sweep = SweepState::Armed(when);
        revent!(RouterEvent::SweepArmed);
        debug!("Graceful-restart sweep armed");
        Ok(())
    }

    fn watermark(&self) -> Result<u32, RouterError> {
        self.startup_seq
            .ok_or(RouterError::Internal("Sweep requested before start"))
    }

    fn sweep_done(&mut self) {
        if self.routes_swept && self.nhgs_swept {
            self.sweep = SweepState::Done;
            if !self.stale_clients.is_empty() {
                info!("Forgetting {} stale clients", self.stale_clients.len());
                self.stale_clients.clear();
            }
        }
    }

    /// Remove the routes not refreshed since startup. This only happens once; later
    /// calls remove nothing.
    ///
    /// # Errors
    /// Fails if the router is shutting down or was not started.
    pub fn sweep_routes(&mut self) -> Result<usize, RouterError> {
        self.check_running()?;
        let watermark = self.watermark()?;
        if self.routes_swept {
            debug!("Routes were already swept");
            return Ok(0);
        }
        let mut removed = 0;
        for (key, handle) in self.registry.iter() {
            let mut table = handle
                .write()
                .map_err(|_| RouterError::Internal("Table lock poisoned"))?;
            let stale = table.extract_if(|_, entry| seq_before(entry.seq, watermark));
            if !stale.is_empty() {
                debug!("Swept {} stale routes from table {key}", stale.len());
            }
            for (_, entry) in &stale {
                if let Some(id) = entry.nhg_id {
                    self.nhgs.release(id)?;
                }
            }
            removed += stale.len();
        }
        self.routes_swept = true;
        self.sweep_done();
        info!("Swept {removed} stale routes");
        revent!(RouterEvent::RoutesSwept(removed));
        Ok(removed)
    }

    /// Remove the protocol nexthop groups not refreshed since startup. Only happens once.
    ///
    /// # Errors
    /// Fails if the router is shutting down or was not started.
    pub fn sweep_nexthop_groups(&mut self) -> Result<usize, RouterError> {
        self.check_running()?;
        let watermark = self.watermark()?;
        if self.nhgs_swept {
            debug!("Nexthop-groups were already swept");
            return Ok(0);
        }
        let removed = self.nhgs.sweep(watermark);
        self.nhgs_swept = true;
        self.sweep_done();
        info!("Swept {removed} stale nexthop-groups");
        revent!(RouterEvent::NhgsSwept(removed));
        Ok(removed)
    }

    /// Sweep routes and nexthop groups
    ///
    /// # Errors
    /// Fails if the router is shutting down or was not started.
    pub fn sweep_now(&mut self) -> Result<SweepResult, RouterError> {
        let routes = self.sweep_routes()?;
        let nhgs = self.sweep_nexthop_groups()?;
        Ok(SweepResult { routes, nhgs })
    }

    #[must_use]
    pub fn sweep_state(&self) -> SweepState {
        self.sweep
    }
}

/* multicast */
impl RouterState {
    /// Set the RPF lookup mode
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn set_multicast_mode(&mut self, mode: MulticastMode) -> Result<(), RouterError> {
        self.check_running()?;
        if self.multicast_mode != mode {
            info!("Multicast RPF lookup mode changed: {} -> {mode}", self.multicast_mode);
            self.multicast_mode = mode;
            revent!(RouterEvent::MulticastModeChanged(mode));
        }
        Ok(())
    }

    #[must_use]
    pub fn get_multicast_mode(&self) -> MulticastMode {
        self.multicast_mode
    }

    fn lookup(
        &self,
        key: &TableKey,
        addr: IpAddr,
        from: RpfSource,
    ) -> Result<Option<RpfMatch>, RouterError> {
        let Some(handle) = self.registry.find(key) else {
            return Ok(None);
        };
        let table = handle
            .read()
            .map_err(|_| RouterError::Internal("Table lock poisoned"))?;
        Ok(table.lpm(addr).map(|(prefix, entry)| RpfMatch {
            from,
            prefix: *prefix,
            distance: entry.distance,
            origin: entry.origin,
            nhg_id: entry.nhg_id,
        }))
    }

    /// Reverse-path lookup of a multicast source, honoring the RPF lookup mode
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn rpf_lookup(&self, ns_id: NsId, addr: IpAddr) -> Result<Option<RpfMatch>, RouterError> {
        self.check_running()?;
        let afi = match addr {
            IpAddr::V4(_) => Afi::Ipv4,
            IpAddr::V6(_) => Afi::Ipv6,
        };
        let mrib = match self.multicast_mode {
            MulticastMode::UribOnly => None,
            _ => self.lookup(
                &TableKey::new(ns_id, afi, Safi::Multicast, RT_TABLE_MAIN),
                addr,
                RpfSource::Mrib,
            )?,
        };
        let urib = match self.multicast_mode {
            MulticastMode::MribOnly => None,
            _ => self.lookup(
                &TableKey::new(ns_id, afi, Safi::Unicast, RT_TABLE_MAIN),
                addr,
                RpfSource::Urib,
            )?,
        };
        Ok(resolve(self.multicast_mode, mrib, urib))
    }
}

/* clients, evpn and protodown */
impl RouterState {
    /// A protocol client connected. It is no longer stale, if it was.
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn client_connect(&mut self, proto: RouteOrigin) -> Result<(), RouterError> {
        self.check_running()?;
        if self.stale_clients.remove(&proto) {
            info!("Client {proto:?} is back");
        }
        self.clients.insert(proto);
        revent!(RouterEvent::ClientConnected(proto));
        Ok(())
    }

    /// A protocol client went away. Clients leaving gracefully are kept as stale until
    /// they come back or the sweep happens.
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn client_disconnect(
        &mut self,
        proto: RouteOrigin,
        graceful: bool,
    ) -> Result<(), RouterError> {
        self.check_running()?;
        if !self.clients.remove(&proto) {
            warn!("Client {proto:?} was not connected");
        }
        if graceful {
            self.stale_clients.insert(proto);
        }
        revent!(RouterEvent::ClientDisconnected(proto, graceful));
        Ok(())
    }

    pub fn clients(&self) -> impl Iterator<Item = &RouteOrigin> {
        self.clients.iter()
    }
    pub fn stale_clients(&self) -> impl Iterator<Item = &RouteOrigin> {
        self.stale_clients.iter()
    }

    pub fn set_evpn_vrf(&mut self, vrf: Option<VrfId>) {
        self.evpn_vrf = vrf;
    }
    /// The VRF used for EVPN, the default one unless configured
    #[must_use]
    pub fn evpn_vrf_id(&self) -> VrfId {
        self.evpn_vrf.unwrap_or(VRF_DEFAULT)
    }

    /// Add a protodown reason to an interface. Returns the resulting set of reasons.
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn set_protodown(
        &mut self,
        ifindex: u32,
        reason: ProtodownReasons,
    ) -> Result<ProtodownReasons, RouterError> {
        self.check_running()?;
        let reasons = self.protodown.entry(ifindex).or_default();
        *reasons |= reason;
        debug!("Interface {ifindex} protodown reasons: {reasons}");
        Ok(*reasons)
    }

    /// Remove a protodown reason from an interface. Returns the remaining reasons.
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn clear_protodown(
        &mut self,
        ifindex: u32,
        reason: ProtodownReasons,
    ) -> Result<ProtodownReasons, RouterError> {
        self.check_running()?;
        let Some(reasons) = self.protodown.get_mut(&ifindex) else {
            return Ok(ProtodownReasons::empty());
        };
        reasons.remove(reason);
        let remaining = *reasons;
        if remaining.is_empty() {
            self.protodown.remove(&ifindex);
            debug!("Interface {ifindex} is no longer protodown");
        }
        Ok(remaining)
    }

    #[must_use]
    pub fn protodown(&self, ifindex: u32) -> ProtodownReasons {
        self.protodown.get(&ifindex).copied().unwrap_or_default()
    }
}

/* MLAG */
impl RouterState {
    /// Let the MLAG channel register its socket in the poller of the main context
    pub fn mlag_attach(&mut self, registry: Registry, token: Token) {
        self.mlag.attach(registry, token);
    }

    /// # Errors
    /// Fails if the router is shutting down.
    pub fn mlag_register_client(&mut self) -> Result<u32, RouterError> {
        self.check_running()?;
        self.mlag.register_client()
    }

    /// # Errors
    /// Fails if the router is shutting down.
    pub fn mlag_unregister_client(&mut self) -> Result<u32, RouterError> {
        self.check_running()?;
        self.mlag.unregister_client()
    }

    /// Queue a message for the MLAG daemon
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn mlag_enqueue(&self, msg: Bytes) -> Result<(), RouterError> {
        self.check_running().map_err(|_| RouterError::MlagClosed)?;
        self.mlag.enqueue(msg)
    }

    #[must_use]
    pub fn mlag_sender(&self) -> MlagSender {
        self.mlag.sender()
    }

    /// Get the messages from the MLAG daemon forwarded to the given channel
    ///
    /// # Errors
    /// Fails if the router is shutting down.
    pub fn mlag_subscribe(&mut self, tx: UnboundedSender<Bytes>) -> Result<(), RouterError> {
        self.check_running()?;
        self.mlag_subscribers.push(tx);
        Ok(())
    }

    /// Read messages from the MLAG daemon and hand them to subscribers. Returns how many
    /// messages were read.
    ///
    /// # Errors
    /// Fails on internal errors only.
    pub fn mlag_recv(&mut self, now: Instant) -> Result<usize, RouterError> {
        if self.is_shutting_down() {
            return Ok(0);
        }
        let msgs = self.mlag.recv(now)?;
        for msg in &msgs {
            self.mlag_subscribers
                .retain(|tx| tx.send(msg.clone()).is_ok());
        }
        Ok(msgs.len())
    }

    pub fn set_mlag_role(&mut self, role: MlagRole) {
        self.mlag.set_role(role);
    }
    pub fn set_mlag_peerlink(&mut self, name: &str, ifindex: u32) {
        self.mlag.set_peerlink(name, ifindex);
    }
    pub fn set_mlag_sysmac(&mut self, mac: MacAddress) {
        self.mlag.set_sysmac(mac);
    }
    #[must_use]
    pub fn mlag_role(&self) -> MlagRole {
        self.mlag.role()
    }
}

/* display */
impl RouterState {
    /// The non-default configuration, as configuration commands
    #[must_use]
    pub fn config_dump(&self) -> String {
        ConfigDump(self).to_string()
    }
    /// Summary of tables, queues, MLAG and events
    #[must_use]
    pub fn show_table_summary(&self) -> String {
        TableSummary(self).to_string()
    }
}

impl Drop for RouterState {
    fn drop(&mut self) {
        if self.status != RouterStatus::Terminated {
            if let Err(e) = self.terminate() {
                error!("Failed to terminate router state: {e}");
            }
        }
    }
}
