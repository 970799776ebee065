// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The MLAG writer thread. It owns the connection to the MLAG daemon: it connects on request,
//! hands a read half of the stream back to the main context and performs every (blocking)
//! write of the outbound FIFO.

use crate::errors::RouterError;
use crate::mlag::fifo::{MlagFifo, WorkerCmd, WorkerTask};
use crate::mlag::io::{MlagErr, write_msg};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

#[allow(unused)]
use tracing::{debug, error, info, warn};

const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Notifications from the writer to the main context
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Connected { conn_gen: u64, stream: UnixStream },
    ConnectFailed { conn_gen: u64, reason: String },
    WriteFailed { conn_gen: u64, reason: String },
}

pub(crate) struct MlagWorker {
    fifo: Arc<MlagFifo>,
    events: UnboundedSender<WorkerEvent>,
    waker: Option<Arc<mio::Waker>>,
    sock: Option<(UnixStream, u64)>,
}

impl MlagWorker {
    pub(crate) fn new(
        fifo: Arc<MlagFifo>,
        events: UnboundedSender<WorkerEvent>,
        waker: Option<Arc<mio::Waker>>,
    ) -> Self {
        Self {
            fifo,
            events,
            waker,
            sock: None,
        }
    }

    fn notify(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("MLAG channel is gone; dropping worker notification");
            return;
        }
        if let Some(waker) = &self.waker {
            if let Err(e) = waker.wake() {
                error!("Failed to wake up main context: {e}");
            }
        }
    }

    fn connect(&mut self, path: &Path, conn_gen: u64) {
        self.disconnect();
        debug!("Connecting to MLAG daemon at {}...", path.display());
        let result = UnixStream::connect(path).and_then(|sock| {
            sock.set_write_timeout(Some(WRITE_TIMEOUT))?;
            let reader = sock.try_clone()?;
            Ok((sock, reader))
        });
        match result {
            Ok((sock, reader)) => {
                self.sock = Some((sock, conn_gen));
                self.notify(WorkerEvent::Connected {
                    conn_gen,
                    stream: reader,
                });
            }
            Err(e) => self.notify(WorkerEvent::ConnectFailed {
                conn_gen,
                reason: e.to_string(),
            }),
        }
    }

    fn disconnect(&mut self) {
        if let Some((sock, conn_gen)) = self.sock.take() {
            debug!("Closing MLAG connection (gen {conn_gen})");
            let _ = sock.shutdown(std::net::Shutdown::Both);
        }
    }

    fn write(&mut self, msg: &[u8]) -> Result<(), RouterError> {
        let Some((sock, conn_gen)) = self.sock.as_mut() else {
            return Ok(());
        };
        match write_msg(sock, msg) {
            Ok(()) => self.fifo.pop(),
            Err(e @ MlagErr::TooLong(_)) => {
                /* nothing was written: the connection is still usable */
                error!("Dropping MLAG message: {e}");
                self.fifo.drop_head()
            }
            Err(e) => {
                let conn_gen = *conn_gen;
                warn!("Failed to write to MLAG daemon: {e}");
                self.disconnect();
                self.notify(WorkerEvent::WriteFailed {
                    conn_gen,
                    reason: e.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Flush what can be flushed before exiting
    fn drain(&mut self) -> Result<(), RouterError> {
        while self.sock.is_some() {
            let Some(msg) = self.fifo.front()? else {
                break;
            };
            self.write(&msg)?;
        }
        let discarded = self.fifo.discard()?;
        if discarded > 0 {
            warn!("Discarded {discarded} MLAG messages at shutdown");
        }
        self.disconnect();
        Ok(())
    }

    fn run(mut self) -> Result<(), RouterError> {
        loop {
            match self.fifo.wait(self.sock.is_some())? {
                WorkerTask::Cmd(WorkerCmd::Connect { path, conn_gen }) => {
                    self.connect(&path, conn_gen);
                }
                WorkerTask::Cmd(WorkerCmd::Disconnect) => self.disconnect(),
                WorkerTask::Write(msg) => self.write(&msg)?,
                WorkerTask::Close => return self.drain(),
            }
        }
    }

    pub(crate) fn spawn(self) -> Result<JoinHandle<()>, RouterError> {
        thread::Builder::new()
            .name("zebraMlag".to_string())
            .spawn(move || {
                debug!("MLAG writer started");
                if let Err(e) = self.run() {
                    error!("MLAG writer stopped: {e}");
                } else {
                    debug!("MLAG writer finished");
                }
            })
            .map_err(|_| RouterError::Internal("Failure spawning thread"))
    }
}
