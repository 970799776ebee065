// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Router IO: the loop of the main context. It owns the router state and reacts to
//! control messages, MLAG traffic and the timers of the RIB work queue, the MLAG
//! reconnection and the graceful-restart sweep.

use crate::ctl::{RouterCtlMsg, RouterCtlSender, handle_ctl_msg};
use crate::errors::RouterError;
use crate::mlag::MlagSender;
use crate::router::RouterParams;
use crate::seqnum::SeqCounter;
use crate::zrouter::RouterState;

use mio::{Events, Poll, Token, Waker};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Receiver, channel};

#[allow(unused)]
use tracing::{debug, error, info, warn};

// capacity of rio control channel. RIB events go over it too.
const CTL_CHANNEL_CAPACITY: usize = 1024;

// longest time the loop sleeps when no timer is pending
const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub struct RioHandle {
    pub ctl: RouterCtlSender,
    pub handle: Option<JoinHandle<()>>,
    pub(crate) seq: Arc<SeqCounter>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) mlag_tx: MlagSender,
}
impl RioHandle {
    /// Terminate the router IO loop / thread
    ///
    /// # Errors
    /// Fails if the channel has been dropped or the thread cannot be joined
    pub fn finish(&mut self) -> Result<(), RouterError> {
        debug!("Requesting router IO to stop..");
        let handle = self.handle.take();
        if let Some(handle) = handle {
            self.ctl.finish()?;
            debug!("Waiting for the router IO to terminate..");
            handle
                .join()
                .map_err(|_| RouterError::Internal("Error joining thread"))?;
            debug!("Router IO ended successfully");
            Ok(())
        } else {
            Err(RouterError::Internal("No handle"))
        }
    }
    #[must_use]
    pub fn get_ctl_tx(&self) -> RouterCtlSender {
        self.ctl.clone()
    }
}

pub(crate) const WAKER: Token = Token(0);
pub(crate) const MLAGSOCK: Token = Token(1);

/// `Rio` is the router IO loop state
pub(crate) struct Rio {
    pub(crate) run: bool,
    pub(crate) poller: Poll,
    pub(crate) ctl_rx: Receiver<RouterCtlMsg>,
    pub(crate) state: RouterState,
}
impl Rio {
    fn new(params: &RouterParams) -> Result<(Rio, RioHandle), RouterError> {
        /* create poller and a waker for other threads to get our attention */
        let poller = Poll::new().map_err(|_| RouterError::Internal("Poll creation failed"))?;
        let waker = Arc::new(
            Waker::new(poller.registry(), WAKER)
                .map_err(|_| RouterError::Internal("Waker creation failed"))?,
        );

        /* the router state */
        let mut state = RouterState::new(params, Some(waker.clone()))?;
        let registry = poller
            .registry()
            .try_clone()
            .map_err(|_| RouterError::Internal("Failed to clone poll registry"))?;
        state.mlag_attach(registry, MLAGSOCK);

        /* internal ctl channel */
        let (ctl_tx, ctl_rx) = channel::<RouterCtlMsg>(CTL_CHANNEL_CAPACITY);

        let handle = RioHandle {
            ctl: RouterCtlSender::new(ctl_tx, waker, state.shutdown_flag()),
            handle: None,
            seq: state.seq_counter(),
            shutdown: state.shutdown_flag(),
            mlag_tx: state.mlag_sender(),
        };
        let rio = Rio {
            run: true,
            poller,
            ctl_rx,
            state,
        };
        Ok((rio, handle))
    }

    fn poll_timeout(&self) -> Duration {
        self.state
            .next_deadline()
            .map_or(MAX_POLL_TIMEOUT, |when| {
                when.saturating_duration_since(Instant::now())
            })
            .min(MAX_POLL_TIMEOUT)
    }

    fn stop(&mut self) {
        if !self.state.is_shutting_down() {
            if let Err(e) = self.state.shutdown() {
                error!("Failed to shut down router: {e}");
            }
        }
        if let Err(e) = self.state.terminate() {
            error!("Failed to terminate router: {e}");
        }
    }
}

#[allow(clippy::missing_errors_doc)]
pub fn start_rio(params: &RouterParams) -> Result<RioHandle, RouterError> {
    let (mut rio, mut handle) = Rio::new(params)?;

    /* router IO loop */
    let rio_loop = move || {
        info!("MLAG: will connect to {}.", rio.state.mlag().path().display());
        let mut events = Events::with_capacity(64);

        if let Err(e) = rio.state.start(Instant::now()) {
            error!("Failed to start router: {e}");
            return;
        }

        info!("Entering router IO loop....");
        while rio.run {
            let timeout = rio.poll_timeout();
            if let Err(e) = rio.poller.poll(&mut events, Some(timeout)) {
                if e.kind() != std::io::ErrorKind::Interrupted {
                    error!("Poller error!: {e}");
                }
                continue;
            }

            for event in &events {
                match event.token() {
                    WAKER => {} // just check everything below
                    MLAGSOCK => {
                        if let Err(e) = rio.state.mlag_recv(Instant::now()) {
                            error!("Failed to receive from MLAG daemon: {e}");
                        }
                    }
                    _ => {}
                }
            }

            /* handle control-channel messages */
            handle_ctl_msg(&mut rio);
            if !rio.run {
                break;
            }

            /* timers and RIB processing */
            if let Err(e) = rio.state.run(Instant::now()) {
                error!("Router run failed: {e}");
            }
        }
        rio.stop();
        info!("Router IO loop ended");
    };
    let thread = thread::Builder::new()
        .name("zebraIO".to_string())
        .spawn(rio_loop)
        .map_err(|_| RouterError::Internal("Failure spawning thread"))?;

    handle.handle = Some(thread);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use crate::errors::RouterError;
    use crate::router::RouterParamsBuilder;
    use crate::rio::start_rio;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_rio_ctl() {
        let params = RouterParamsBuilder::default()
            .mlag_sock_path("/tmp/zebra-mlag-rio.sock")
            .build()
            .expect("Should succeed");

        let mut rio = start_rio(&params).expect("Should succeed");
        thread::sleep(Duration::from_millis(300));
        assert_eq!(rio.finish(), Ok(()));
        assert_eq!(rio.finish(), Err(RouterError::Internal("No handle")));
    }

    #[test]
    fn test_rio_mlag_roundtrip() {
        use crate::mlag::test::fake_mlagd::fake_mlagd;
        use bytes::Bytes;

        let path = "/tmp/zebra-mlag-rioroundtrip.sock";
        let mlagd = fake_mlagd(path, Some(b"hello".to_vec()), None);
        let params = RouterParamsBuilder::default()
            .mlag_sock_path(path)
            .build()
            .expect("Should succeed");
        let mut rio = start_rio(&params).expect("Should succeed");

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Should build runtime");
        let ctl = rio.get_ctl_tx();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        rt.block_on(async {
            ctl.mlag_subscribe(tx).await.unwrap();
            assert_eq!(ctl.mlag_register().await, Ok(1));
        });
        rio.mlag_tx.send("from-zebra").unwrap();
        assert_eq!(mlagd.msgs(1), vec![Bytes::from("from-zebra")]);

        let greeting = rt.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
        });
        assert_eq!(greeting.ok().flatten(), Some(Bytes::from("hello")));
        assert_eq!(rio.finish(), Ok(()));
    }
}
