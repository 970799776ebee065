// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Control channel for the router

use bytes::Bytes;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::mpsc::{Sender, UnboundedSender};
use tokio::sync::oneshot;
use tokio::sync::oneshot::Sender as AsyncSender;
#[allow(unused)]
use tracing::{debug, error, info, warn};

use crate::RouterError;
use crate::mcast::{MulticastMode, RpfMatch};
use crate::rib::event::RibEvent;
use crate::rib::nhgstore::{Nexthop, NhgId};
use crate::rib::registry::TableHandle;
use crate::rib::table::{NsId, RouteOrigin, TableKey};
use crate::rio::Rio;
use crate::zrouter::SweepResult;

pub(crate) type RouterCtlReplyTx = AsyncSender<Result<(), RouterError>>;
type ReplyTx<T> = AsyncSender<Result<T, RouterError>>;

pub enum RouterCtlMsg {
    Finish,
    Rib(RibEvent, Option<RouterCtlReplyTx>),
    FindTable(TableKey, ReplyTx<Option<TableHandle>>),
    GetTable(TableKey, ReplyTx<TableHandle>),
    ReleaseTable(TableKey, RouterCtlReplyTx),
    ClientConnect(RouteOrigin, RouterCtlReplyTx),
    ClientDisconnect(RouteOrigin, bool, RouterCtlReplyTx),
    InstallNhg(RouteOrigin, NhgId, Vec<Nexthop>, RouterCtlReplyTx),
    UninstallNhg(RouteOrigin, NhgId, RouterCtlReplyTx),
    MlagRegister(ReplyTx<u32>),
    MlagUnregister(ReplyTx<u32>),
    MlagSubscribe(UnboundedSender<Bytes>, RouterCtlReplyTx),
    SetMulticastMode(MulticastMode, RouterCtlReplyTx),
    GetMulticastMode(ReplyTx<MulticastMode>),
    RpfLookup(NsId, IpAddr, ReplyTx<Option<RpfMatch>>),
    Sweep(ReplyTx<SweepResult>),
    Show(ReplyTx<String>),
    ConfigDump(ReplyTx<String>),
}

// An object to send control messages to the router
#[derive(Clone)]
pub struct RouterCtlSender {
    tx: Sender<RouterCtlMsg>,
    waker: Arc<mio::Waker>,
    shutdown: Arc<AtomicBool>,
}
impl RouterCtlSender {
    pub(crate) fn new(
        tx: Sender<RouterCtlMsg>,
        waker: Arc<mio::Waker>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tx,
            waker,
            shutdown,
        }
    }
    fn check_running(&self) -> Result<(), RouterError> {
        if self.shutdown.load(Ordering::Acquire) || self.tx.is_closed() {
            return Err(RouterError::ShuttingDown);
        }
        Ok(())
    }
    fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            error!("Failed to wake router IO: {e}");
        }
    }

    /// Send a request and wait for its answer
    async fn request<T>(
        &self,
        what: &'static str,
        build: impl FnOnce(ReplyTx<T>) -> RouterCtlMsg,
    ) -> Result<T, RouterError> {
        self.check_running()?;
        debug!("Requesting router to {what}...");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RouterError::ShuttingDown)?;
        self.wake();
        reply_rx
            .await
            .map_err(|_| RouterError::Internal("Failed to receive ctl reply"))?
    }

    /// Ask the router to stop. Used by the owner of the router IO.
    pub(crate) fn finish(&self) -> Result<(), RouterError> {
        self.tx
            .try_send(RouterCtlMsg::Finish)
            .map_err(|_| RouterError::Internal("Error sending over ctl channel"))?;
        self.wake();
        Ok(())
    }

    /// Queue a route change and wait until the router accepted it
    pub async fn rib_enqueue(&self, event: RibEvent) -> Result<(), RouterError> {
        self.request("queue a RIB event", |tx| RouterCtlMsg::Rib(event, Some(tx)))
            .await
    }
    /// Queue a route change without waiting. Fails if the control channel is full.
    pub fn try_send_rib(&self, event: RibEvent) -> Result<(), RouterError> {
        self.check_running()?;
        match self.tx.try_send(RouterCtlMsg::Rib(event, None)) {
            Ok(()) => {
                self.wake();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(RouterError::Internal("Ctl channel is full")),
            Err(TrySendError::Closed(_)) => Err(RouterError::ShuttingDown),
        }
    }
    pub async fn find_table(&self, key: TableKey) -> Result<Option<TableHandle>, RouterError> {
        self.request("find a table", |tx| RouterCtlMsg::FindTable(key, tx))
            .await
    }
    pub async fn get_table(&self, key: TableKey) -> Result<TableHandle, RouterError> {
        self.request("get a table", |tx| RouterCtlMsg::GetTable(key, tx))
            .await
    }
    pub async fn release_table(&self, key: TableKey) -> Result<(), RouterError> {
        self.request("release a table", |tx| RouterCtlMsg::ReleaseTable(key, tx))
            .await
    }
    pub async fn client_connect(&self, proto: RouteOrigin) -> Result<(), RouterError> {
        self.request("register a client", |tx| RouterCtlMsg::ClientConnect(proto, tx))
            .await
    }
    pub async fn client_disconnect(
        &self,
        proto: RouteOrigin,
        graceful: bool,
    ) -> Result<(), RouterError> {
        self.request("unregister a client", |tx| {
            RouterCtlMsg::ClientDisconnect(proto, graceful, tx)
        })
        .await
    }
    pub async fn install_nhg(
        &self,
        owner: RouteOrigin,
        id: NhgId,
        nexthops: Vec<Nexthop>,
    ) -> Result<(), RouterError> {
        self.request("install a nexthop-group", |tx| {
            RouterCtlMsg::InstallNhg(owner, id, nexthops, tx)
        })
        .await
    }
    pub async fn uninstall_nhg(&self, owner: RouteOrigin, id: NhgId) -> Result<(), RouterError> {
        self.request("uninstall a nexthop-group", |tx| {
            RouterCtlMsg::UninstallNhg(owner, id, tx)
        })
        .await
    }
    /// Declare interest in MLAG. Returns the number of interested clients.
    pub async fn mlag_register(&self) -> Result<u32, RouterError> {
        self.request("register MLAG interest", RouterCtlMsg::MlagRegister)
            .await
    }
    pub async fn mlag_unregister(&self) -> Result<u32, RouterError> {
        self.request("unregister MLAG interest", RouterCtlMsg::MlagUnregister)
            .await
    }
    /// Get the messages from the MLAG daemon on the given channel
    pub async fn mlag_subscribe(&self, sink: UnboundedSender<Bytes>) -> Result<(), RouterError> {
        self.request("subscribe to MLAG", |tx| RouterCtlMsg::MlagSubscribe(sink, tx))
            .await
    }
    pub async fn set_multicast_mode(&self, mode: MulticastMode) -> Result<(), RouterError> {
        self.request("set the multicast mode", |tx| {
            RouterCtlMsg::SetMulticastMode(mode, tx)
        })
        .await
    }
    pub async fn get_multicast_mode(&self) -> Result<MulticastMode, RouterError> {
        self.request("get the multicast mode", RouterCtlMsg::GetMulticastMode)
            .await
    }
    pub async fn rpf_lookup(
        &self,
        ns_id: NsId,
        addr: IpAddr,
    ) -> Result<Option<RpfMatch>, RouterError> {
        self.request("look up an RPF", |tx| RouterCtlMsg::RpfLookup(ns_id, addr, tx))
            .await
    }
    /// Sweep the stale routes and nexthop-groups now
    pub async fn sweep(&self) -> Result<SweepResult, RouterError> {
        self.request("sweep", RouterCtlMsg::Sweep).await
    }
    pub async fn show(&self) -> Result<String, RouterError> {
        self.request("show its state", RouterCtlMsg::Show).await
    }
    pub async fn config_dump(&self) -> Result<String, RouterError> {
        self.request("dump its config", RouterCtlMsg::ConfigDump)
            .await
    }
}

fn reply<T>(reply_to: AsyncSender<T>, what: &str, result: T) {
    if reply_to.send(result).is_err() {
        warn!("Could not reply to {what} request: requestor is gone");
    }
}

/// Handle a request from the control channel
fn handle_one(rio: &mut Rio, msg: RouterCtlMsg) {
    let state = &mut rio.state;
    match msg {
        RouterCtlMsg::Finish => {
            info!("Got request to shutdown. Au revoir ...");
            rio.run = false;
        }
        RouterCtlMsg::Rib(event, reply_to) => {
            let result = state.rib_enqueue(event);
            match reply_to {
                Some(reply_to) => reply(reply_to, "rib", result),
                None => {
                    if let Err(e) = result {
                        debug!("Could not queue RIB event: {e}");
                    }
                }
            }
        }
        RouterCtlMsg::FindTable(key, reply_to) => reply(
            reply_to,
            "find-table",
            state.find_table(key.ns_id, key.afi, key.safi, key.table_id),
        ),
        RouterCtlMsg::GetTable(key, reply_to) => reply(
            reply_to,
            "get-table",
            state.get_table(key.ns_id, key.afi, key.safi, key.table_id),
        ),
        RouterCtlMsg::ReleaseTable(key, reply_to) => reply(
            reply_to,
            "release-table",
            state.release_table(key.ns_id, key.afi, key.safi, key.table_id),
        ),
        RouterCtlMsg::ClientConnect(proto, reply_to) => {
            reply(reply_to, "client-connect", state.client_connect(proto));
        }
        RouterCtlMsg::ClientDisconnect(proto, graceful, reply_to) => reply(
            reply_to,
            "client-disconnect",
            state.client_disconnect(proto, graceful),
        ),
        RouterCtlMsg::InstallNhg(owner, id, nexthops, reply_to) => reply(
            reply_to,
            "install-nhg",
            state.install_nhg(owner, id, &nexthops),
        ),
        RouterCtlMsg::UninstallNhg(owner, id, reply_to) => {
            reply(reply_to, "uninstall-nhg", state.uninstall_nhg(owner, id));
        }
        RouterCtlMsg::MlagRegister(reply_to) => {
            reply(reply_to, "mlag-register", state.mlag_register_client());
        }
        RouterCtlMsg::MlagUnregister(reply_to) => {
            reply(reply_to, "mlag-unregister", state.mlag_unregister_client());
        }
        RouterCtlMsg::MlagSubscribe(sink, reply_to) => {
            reply(reply_to, "mlag-subscribe", state.mlag_subscribe(sink));
        }
        RouterCtlMsg::SetMulticastMode(mode, reply_to) => {
            reply(reply_to, "set-multicast-mode", state.set_multicast_mode(mode));
        }
        RouterCtlMsg::GetMulticastMode(reply_to) => {
            reply(reply_to, "get-multicast-mode", Ok(state.get_multicast_mode()));
        }
        RouterCtlMsg::RpfLookup(ns_id, addr, reply_to) => {
            reply(reply_to, "rpf-lookup", state.rpf_lookup(ns_id, addr));
        }
        RouterCtlMsg::Sweep(reply_to) => reply(reply_to, "sweep", state.sweep_now()),
        RouterCtlMsg::Show(reply_to) => {
            reply(reply_to, "show", Ok(state.show_table_summary()));
        }
        RouterCtlMsg::ConfigDump(reply_to) => {
            reply(reply_to, "config-dump", Ok(state.config_dump()));
        }
    }
}

/// Handle the pending requests from the control channel
pub(crate) fn handle_ctl_msg(rio: &mut Rio) {
    while rio.run {
        match rio.ctl_rx.try_recv() {
            Ok(msg) => handle_one(rio, msg),
            Err(TryRecvError::Empty) => break,
            Err(e) => {
                error!("Error receiving from ctl channel {e:?}");
                rio.run = false;
            }
        }
    }
}
