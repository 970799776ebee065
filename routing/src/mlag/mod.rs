// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The MLAG channel: connection to the local MLAG daemon, which synchronizes state with the
//! peer switch.
//!
//! Ownership is split on purpose:
//!   * any thread may queue pre-encoded messages in the outbound FIFO ([`MlagSender`]),
//!   * the writer thread alone connects to the daemon and writes the FIFO out,
//!   * the main context (owner of [`MlagChannel`]) drives the state machine and reads the
//!     inbound messages, since handling them touches client state that lives there.
//!
//! The connection is only wanted while some client is interested in MLAG. Failures arm a
//! retry timer. Pending messages survive disconnections and are sent once connected again,
//! which makes delivery at-least-once.

mod fifo;
mod io;
pub mod test;
mod worker;

use crate::errors::RouterError;
use crate::revent::{RouterEvent, revent};
use bytes::Bytes;
use chrono::{DateTime, Local};
use fifo::{MlagFifo, WorkerCmd};
use io::{FrameReader, MlagErr};
use mac_address::MacAddress;
use mio::net::UnixStream;
use mio::{Interest, Registry, Token};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use worker::{MlagWorker, WorkerEvent};

#[allow(unused)]
use tracing::{debug, error, info, warn};

pub const DEFAULT_MLAG_SOCK_PATH: &str = "/var/run/clag-zebra.socket";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MlagRole {
    #[default]
    None,
    Primary,
    Secondary,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MlagState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Default)]
pub struct MlagStats {
    pub last_conn_time: Option<DateTime<Local>>,
    pub last_disconn_time: Option<DateTime<Local>>,
    pub connects: u64,
    pub disconnects: u64,
    pub connect_failures: u64,
    pub rx_msgs: u64,
}

/// Handle to queue messages towards the MLAG daemon from any thread
#[derive(Clone)]
pub struct MlagSender(Arc<MlagFifo>);
impl MlagSender {
    /// Queue a message. This never blocks.
    ///
    /// # Errors
    /// Fails with [`RouterError::MlagClosed`] once the channel was shut down, and with
    /// [`RouterError::MalformedMessage`] if the message is too long to be framed.
    pub fn send(&self, msg: impl Into<Bytes>) -> Result<(), RouterError> {
        self.0.push(msg.into())
    }
}

pub struct MlagChannel {
    path: PathBuf,
    retry_time: Duration,
    role: MlagRole,
    peerlink: Option<(String, u32)>,
    sysmac: Option<MacAddress>,
    interested: u32,
    state: MlagState,
    retry_at: Option<Instant>,
    conn_gen: u64,
    reader: Option<UnixStream>,
    readb: FrameReader,
    registry: Option<(Registry, Token)>,
    fifo: Arc<MlagFifo>,
    events: UnboundedReceiver<WorkerEvent>,
    worker: Option<JoinHandle<()>>,
    stats: MlagStats,
}

impl MlagChannel {
    /// Create the channel and start its writer thread. The optional waker gets
    /// signalled whenever the writer has news for the main context.
    ///
    /// # Errors
    /// Fails if the path is empty or the writer thread cannot be started.
    pub fn new(
        path: &Path,
        retry_time: Duration,
        waker: Option<Arc<mio::Waker>>,
    ) -> Result<Self, RouterError> {
        if path.as_os_str().is_empty() {
            return Err(RouterError::InvalidPath(path.display().to_string()));
        }
        let fifo = Arc::new(MlagFifo::default());
        let (tx, rx) = unbounded_channel();
        let worker = MlagWorker::new(fifo.clone(), tx, waker).spawn()?;
        Ok(Self {
            path: path.to_owned(),
            retry_time,
            role: MlagRole::None,
            peerlink: None,
            sysmac: None,
            interested: 0,
            state: MlagState::Disconnected,
            retry_at: None,
            conn_gen: 0,
            reader: None,
            readb: FrameReader::default(),
            registry: None,
            fifo,
            events: rx,
            worker: Some(worker),
            stats: MlagStats::default(),
        })
    }

    /// Let the channel register its read half in a poller
    pub fn attach(&mut self, registry: Registry, token: Token) {
        self.registry = Some((registry, token));
    }

    #[must_use]
    pub fn sender(&self) -> MlagSender {
        MlagSender(self.fifo.clone())
    }

    fn check_open(&self) -> Result<(), RouterError> {
        if self.worker.is_none() || self.fifo.is_closed() {
            return Err(RouterError::MlagClosed);
        }
        Ok(())
    }

    /// Queue a message for the daemon. Never blocks.
    ///
    /// # Errors
    /// Fails with [`RouterError::MlagClosed`] after shutdown and with
    /// [`RouterError::MalformedMessage`] if the message is too long.
    pub fn enqueue(&self, msg: Bytes) -> Result<(), RouterError> {
        self.fifo.push(msg)
    }

    /// A client became interested in MLAG. The first one triggers the connection.
    ///
    /// # Errors
    /// Fails after shutdown.
    pub fn register_client(&mut self) -> Result<u32, RouterError> {
        self.check_open()?;
        self.interested += 1;
        debug!("MLAG clients interested: {}", self.interested);
        if self.interested == 1 && self.state == MlagState::Disconnected {
            self.connect()?;
        }
        Ok(self.interested)
    }

    /// A client lost interest in MLAG. When no client is left, the connection is torn down.
    ///
    /// # Errors
    /// Fails after shutdown.
    pub fn unregister_client(&mut self) -> Result<u32, RouterError> {
        self.check_open()?;
        if self.interested == 0 {
            warn!("Unbalanced MLAG client unregistration");
            return Ok(0);
        }
        self.interested -= 1;
        debug!("MLAG clients interested: {}", self.interested);
        if self.interested == 0 {
            self.teardown()?;
        }
        Ok(self.interested)
    }

    fn connect(&mut self) -> Result<(), RouterError> {
        self.conn_gen += 1;
        self.retry_at.take();
        self.state = MlagState::Connecting;
        info!("MLAG: connecting to {}...", self.path.display());
        self.fifo.command(WorkerCmd::Connect {
            path: self.path.clone(),
            conn_gen: self.conn_gen,
        })
    }

    fn drop_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            if let Some((registry, _)) = &self.registry {
                if let Err(e) = registry.deregister(&mut reader) {
                    warn!("Failed to deregister MLAG socket: {e}");
                }
            }
        }
        self.readb.clear();
    }

    /// Go back to disconnected, without retrying
    fn teardown(&mut self) -> Result<(), RouterError> {
        let was = self.state;
        self.drop_reader();
        self.conn_gen += 1;
        self.retry_at.take();
        self.state = MlagState::Disconnected;
        if was == MlagState::Connected {
            self.stats.disconnects += 1;
            self.stats.last_disconn_time = Some(Local::now());
            revent!(RouterEvent::MlagDisconnected);
        }
        info!("MLAG: disconnected (no interested clients)");
        self.fifo.command(WorkerCmd::Disconnect)
    }

    /// Go back to disconnected after a failure and arm the retry timer
    fn fail(&mut self, now: Instant, reason: &str) -> Result<(), RouterError> {
        let was = self.state;
        self.drop_reader();
        self.conn_gen += 1;
        self.state = MlagState::Disconnected;
        self.retry_at = Some(now + self.retry_time);
        match was {
            MlagState::Connected => {
                self.stats.disconnects += 1;
                self.stats.last_disconn_time = Some(Local::now());
                warn!("MLAG: connection lost: {reason}. Will retry...");
                revent!(RouterEvent::MlagDisconnected);
            }
            _ => {
                self.stats.connect_failures += 1;
                warn!("MLAG: failed to connect: {reason}. Will retry...");
                revent!(RouterEvent::MlagConnectFailed);
            }
        }
        self.fifo.command(WorkerCmd::Disconnect)
    }

    fn connected(&mut self, stream: std::os::unix::net::UnixStream) -> Result<(), RouterError> {
        stream
            .set_nonblocking(true)
            .map_err(|_| RouterError::Internal("Failure setting non-blocking socket"))?;
        let mut reader = UnixStream::from_std(stream);
        if let Some((registry, token)) = &self.registry {
            registry
                .register(&mut reader, *token, Interest::READABLE)
                .map_err(|_| RouterError::Internal("Failed to register MLAG sock"))?;
        }
        self.reader = Some(reader);
        self.readb.clear();
        self.state = MlagState::Connected;
        self.stats.connects += 1;
        self.stats.last_conn_time = Some(Local::now());
        info!("MLAG: connected to {}", self.path.display());
        revent!(RouterEvent::MlagConnected);
        Ok(())
    }

    fn handle_worker_event(&mut self, event: WorkerEvent, now: Instant) -> Result<(), RouterError> {
        match event {
            WorkerEvent::Connected { conn_gen, stream } => {
                if conn_gen != self.conn_gen || self.state != MlagState::Connecting {
                    debug!("Ignoring stale MLAG connection (gen {conn_gen})");
                    return Ok(());
                }
                if let Err(e) = self.connected(stream) {
                    self.fail(now, &e.to_string())?;
                }
                Ok(())
            }
            WorkerEvent::ConnectFailed { conn_gen, reason } => {
                if conn_gen == self.conn_gen && self.state == MlagState::Connecting {
                    self.fail(now, &reason)?;
                }
                Ok(())
            }
            WorkerEvent::WriteFailed { conn_gen, reason } => {
                if conn_gen == self.conn_gen && self.state == MlagState::Connected {
                    self.fail(now, &reason)?;
                }
                Ok(())
            }
        }
    }

    /// Process the notifications of the writer and the retry timer
    ///
    /// # Errors
    /// Only fails on internal errors.
    pub fn service(&mut self, now: Instant) -> Result<(), RouterError> {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_worker_event(event, now)?,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if self.retry_at.is_some_and(|t| t <= now) {
            self.retry_at.take();
            if self.interested > 0 && self.state == MlagState::Disconnected {
                revent!(RouterEvent::MlagRetry);
                self.connect()?;
            }
        }
        Ok(())
    }

    /// Read all the complete messages available on the connection
    ///
    /// # Errors
    /// Only fails on internal errors. IO failures make the channel reconnect.
    pub fn recv(&mut self, now: Instant) -> Result<Vec<Bytes>, RouterError> {
        let mut msgs = vec![];
        let Some(reader) = self.reader.as_mut() else {
            return Ok(msgs);
        };
        loop {
            match self.readb.recv(reader) {
                Ok(Some(msg)) => msgs.push(msg),
                Ok(None) => break,
                Err(MlagErr::TooLong(len)) => {
                    error!("Got MLAG message too long ({len} octets). Resetting connection");
                    self.fail(now, "bad message")?;
                    break;
                }
                Err(e) => {
                    self.fail(now, &e.to_string())?;
                    break;
                }
            }
        }
        self.stats.rx_msgs += msgs.len() as u64;
        Ok(msgs)
    }

    /// Stop accepting messages, let the writer flush what it can and wait for it to exit
    ///
    /// # Errors
    /// Fails if the writer thread cannot be joined.
    pub fn shutdown(&mut self) -> Result<(), RouterError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        debug!("Shutting down MLAG channel...");
        self.drop_reader();
        self.retry_at.take();
        self.state = MlagState::Disconnected;
        self.fifo.close()?;
        worker
            .join()
            .map_err(|_| RouterError::Internal("Error joining thread"))?;
        debug!("MLAG channel is now closed");
        Ok(())
    }

    /// When the retry timer fires, if armed
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    #[must_use]
    pub fn state(&self) -> MlagState {
        self.state
    }
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == MlagState::Connected
    }
    #[must_use]
    pub fn retry_armed(&self) -> bool {
        self.retry_at.is_some()
    }
    #[must_use]
    pub fn interested(&self) -> u32 {
        self.interested
    }
    #[must_use]
    pub fn pending(&self) -> usize {
        self.fifo.len()
    }
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.fifo.sent()
    }
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.fifo.discarded()
    }
    #[must_use]
    pub fn stats(&self) -> &MlagStats {
        &self.stats
    }
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
    #[must_use]
    pub fn role(&self) -> MlagRole {
        self.role
    }
    pub fn set_role(&mut self, role: MlagRole) {
        if self.role != role {
            info!("MLAG role changed to {role}");
        }
        self.role = role;
    }
    #[must_use]
    pub fn peerlink(&self) -> Option<(&str, u32)> {
        self.peerlink.as_ref().map(|(name, ifindex)| (name.as_str(), *ifindex))
    }
    pub fn set_peerlink(&mut self, name: &str, ifindex: u32) {
        self.peerlink = Some((name.to_owned(), ifindex));
    }
    #[must_use]
    pub fn sysmac(&self) -> Option<MacAddress> {
        self.sysmac
    }
    pub fn set_sysmac(&mut self, mac: MacAddress) {
        self.sysmac = Some(mac);
    }
}

impl Drop for MlagChannel {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to shut down MLAG channel: {e}");
        }
    }
}

impl Display for MlagRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MlagRole::None => write!(f, "none"),
            MlagRole::Primary => write!(f, "primary"),
            MlagRole::Secondary => write!(f, "secondary"),
        }
    }
}

impl Display for MlagState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MlagState::Disconnected => write!(f, "disconnected"),
            MlagState::Connecting => write!(f, "connecting"),
            MlagState::Connected => write!(f, "connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::fake_mlagd::*;
    use super::*;
    use std::thread;
    use tracing_test::traced_test;

    const RETRY: Duration = Duration::from_millis(100);

    /// Drive the channel until the predicate holds or a few seconds elapse.
    /// Inbound messages are discarded.
    fn wait_until<F: Fn(&MlagChannel) -> bool>(chan: &mut MlagChannel, pred: F) -> bool {
        for _ in 0..500 {
            chan.service(Instant::now()).unwrap();
            chan.recv(Instant::now()).unwrap();
            if pred(chan) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn sock_path(name: &str) -> String {
        format!("/tmp/zebra-mlag-{name}.sock")
    }

    #[traced_test]
    #[test]
    fn test_queued_messages_are_delivered_in_order() {
        let path = sock_path("order");
        let mlagd = fake_mlagd(&path, None, None);
        let mut chan = MlagChannel::new(Path::new(&path), RETRY, None).unwrap();

        /* nobody interested yet: stays disconnected */
        for msg in ["m1", "m2", "m3"] {
            chan.enqueue(Bytes::from(msg)).unwrap();
        }
        assert!(wait_until(&mut chan, |c| c.pending() == 3));
        assert_eq!(chan.state(), MlagState::Disconnected);

        assert_eq!(chan.register_client(), Ok(1));
        assert_eq!(chan.state(), MlagState::Connecting);
        assert!(wait_until(&mut chan, MlagChannel::is_connected));

        let got = mlagd.msgs(3);
        assert_eq!(got, vec![Bytes::from("m1"), Bytes::from("m2"), Bytes::from("m3")]);
        assert!(wait_until(&mut chan, |c| c.pending() == 0 && c.sent() == 3));
        chan.shutdown().unwrap();
    }

    #[traced_test]
    #[test]
    fn test_connect_failure_arms_retry() {
        let path = sock_path("retry");
        let _ = std::fs::remove_file(&path);
        let mut chan = MlagChannel::new(Path::new(&path), RETRY, None).unwrap();
        chan.register_client().unwrap();

        assert!(wait_until(&mut chan, MlagChannel::retry_armed));
        assert_eq!(chan.state(), MlagState::Disconnected);
        assert_eq!(chan.stats().connect_failures, 1);

        /* daemon shows up: the retry timer gets us connected */
        let mlagd = fake_mlagd(&path, None, None);
        assert!(wait_until(&mut chan, MlagChannel::is_connected));
        assert_eq!(mlagd.next(), Some(MlagdEvent::Accepted));
        assert!(logs_contain("Will retry"));
        chan.shutdown().unwrap();
    }

    #[traced_test]
    #[test]
    fn test_peer_close_and_reconnect() {
        let path = sock_path("reconnect");
        let mlagd = fake_mlagd(&path, None, Some(1));
        let mut chan = MlagChannel::new(Path::new(&path), RETRY, None).unwrap();
        chan.register_client().unwrap();
        assert!(wait_until(&mut chan, MlagChannel::is_connected));

        chan.enqueue(Bytes::from("first")).unwrap();
        assert_eq!(mlagd.msgs(1), vec![Bytes::from("first")]);
        assert_eq!(mlagd.next(), Some(MlagdEvent::Closed));

        /* the main context sees the peer leaving when reading */
        assert!(wait_until(&mut chan, |c| !c.is_connected()));
        assert!(chan.retry_armed() || chan.state() == MlagState::Connecting);
        assert!(wait_until(&mut chan, MlagChannel::is_connected));
        assert_eq!(chan.stats().connects, 2);

        chan.enqueue(Bytes::from("second")).unwrap();
        assert_eq!(mlagd.msgs(1), vec![Bytes::from("second")]);
        chan.shutdown().unwrap();
    }

    #[traced_test]
    #[test]
    fn test_inbound_messages() {
        let path = sock_path("inbound");
        let _mlagd = fake_mlagd(&path, Some(b"hello from peer".to_vec()), None);
        let mut chan = MlagChannel::new(Path::new(&path), RETRY, None).unwrap();
        chan.register_client().unwrap();

        let mut got = vec![];
        for _ in 0..500 {
            chan.service(Instant::now()).unwrap();
            got.extend(chan.recv(Instant::now()).unwrap());
            if !got.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(got, vec![Bytes::from("hello from peer")]);
        assert_eq!(chan.stats().rx_msgs, 1);
        chan.shutdown().unwrap();
    }

    #[traced_test]
    #[test]
    fn test_no_interest_tears_down() {
        let path = sock_path("interest");
        let mlagd = fake_mlagd(&path, None, None);
        let mut chan = MlagChannel::new(Path::new(&path), RETRY, None).unwrap();
        assert_eq!(chan.register_client(), Ok(1));
        assert_eq!(chan.register_client(), Ok(2));
        assert!(wait_until(&mut chan, MlagChannel::is_connected));
        assert_eq!(mlagd.next(), Some(MlagdEvent::Accepted));

        assert_eq!(chan.unregister_client(), Ok(1));
        assert!(chan.is_connected());
        assert_eq!(chan.unregister_client(), Ok(0));
        assert_eq!(chan.state(), MlagState::Disconnected);
        assert!(!chan.retry_armed());
        assert_eq!(mlagd.next(), Some(MlagdEvent::Closed));

        /* messages queued without interest are kept */
        chan.enqueue(Bytes::from("kept")).unwrap();
        assert_eq!(chan.pending(), 1);
        chan.shutdown().unwrap();
    }

    #[test]
    fn test_enqueue_after_shutdown() {
        let path = sock_path("closed");
        let mut chan = MlagChannel::new(Path::new(&path), RETRY, None).unwrap();
        let sender = chan.sender();
        chan.shutdown().unwrap();
        assert_eq!(chan.enqueue(Bytes::from("late")), Err(RouterError::MlagClosed));
        assert_eq!(sender.send("late"), Err(RouterError::MlagClosed));
        assert_eq!(chan.register_client(), Err(RouterError::MlagClosed));
    }

    #[test]
    fn test_bad_path() {
        let chan = MlagChannel::new(Path::new(""), RETRY, None);
        assert!(matches!(chan, Err(RouterError::InvalidPath(_))));
    }

    #[traced_test]
    #[test]
    fn test_concurrent_producers_keep_order() {
        let path = sock_path("producers");
        let mlagd = fake_mlagd(&path, None, None);
        let mut chan = MlagChannel::new(Path::new(&path), RETRY, None).unwrap();
        chan.register_client().unwrap();
        assert!(wait_until(&mut chan, MlagChannel::is_connected));

        const PRODUCERS: u8 = 4;
        const PER_PRODUCER: u8 = 50;
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let sender = chan.sender();
                thread::spawn(move || {
                    for n in 0..PER_PRODUCER {
                        sender.send(vec![p, n]).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().expect("Producer panicked");
        }

        let got = mlagd.msgs(usize::from(PRODUCERS) * usize::from(PER_PRODUCER));
        assert_eq!(got.len(), usize::from(PRODUCERS) * usize::from(PER_PRODUCER));
        for p in 0..PRODUCERS {
            let seqs: Vec<u8> = got.iter().filter(|m| m[0] == p).map(|m| m[1]).collect();
            assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>());
        }
        chan.shutdown().unwrap();
    }

    #[traced_test]
    #[test]
    fn test_pending_messages_replayed_after_reconnect() {
        let path = sock_path("replay");
        let mlagd = fake_mlagd(&path, None, Some(1));
        let mut chan = MlagChannel::new(Path::new(&path), RETRY, None).unwrap();
        chan.register_client().unwrap();
        assert!(wait_until(&mut chan, MlagChannel::is_connected));

        chan.enqueue(Bytes::from("first")).unwrap();
        assert_eq!(mlagd.msgs(1), vec![Bytes::from("first")]);
        assert_eq!(mlagd.next(), Some(MlagdEvent::Closed));
        assert!(wait_until(&mut chan, |c| !c.is_connected()));
        assert!(chan.retry_armed());

        /* queued while disconnected: kept until the retry timer reconnects */
        for msg in ["r1", "r2", "r3"] {
            chan.enqueue(Bytes::from(msg)).unwrap();
        }
        assert_eq!(chan.pending(), 3);

        assert!(wait_until(&mut chan, MlagChannel::is_connected));
        assert_eq!(
            mlagd.msgs(3),
            vec![Bytes::from("r1"), Bytes::from("r2"), Bytes::from("r3")]
        );
        assert!(wait_until(&mut chan, |c| c.pending() == 0 && c.sent() == 4));
        assert_eq!(chan.stats().connects, 2);
        chan.shutdown().unwrap();
    }

    #[traced_test]
    #[test]
    fn test_oversize_message_does_not_block_channel() {
        let path = sock_path("oversize");
        let mlagd = fake_mlagd(&path, None, None);
        let mut chan = MlagChannel::new(Path::new(&path), RETRY, None).unwrap();
        let sender = chan.sender();

        let big = vec![0u8; super::io::MLAG_MAX_MSG_LEN + 1];
        assert!(matches!(
            sender.send(big),
            Err(RouterError::MalformedMessage(_))
        ));
        assert!(logs_contain("Refusing MLAG message"));
        chan.enqueue(Bytes::from("after")).unwrap();
        assert_eq!(chan.pending(), 1);

        chan.register_client().unwrap();
        assert!(wait_until(&mut chan, MlagChannel::is_connected));
        assert_eq!(mlagd.msgs(1), vec![Bytes::from("after")]);
        assert!(wait_until(&mut chan, |c| c.pending() == 0 && c.sent() == 1));
        assert_eq!(chan.stats().connects, 1);
        assert_eq!(chan.stats().disconnects, 0);
        chan.shutdown().unwrap();
    }
}
