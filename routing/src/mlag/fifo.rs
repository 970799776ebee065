// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The outbound FIFO of the MLAG channel: the only state shared between the main context,
//! any producer and the MLAG writer thread. Producers push at the tail; only the writer
//! removes messages, from the head, once they were fully written.

use crate::errors::RouterError;
use crate::mlag::io::MLAG_MAX_MSG_LEN;
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

#[allow(unused)]
use tracing::{debug, error, warn};

/// Commands from the main context to the writer
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerCmd {
    Connect { path: PathBuf, conn_gen: u64 },
    Disconnect,
}

/// What the writer should do next
#[derive(Debug, PartialEq)]
pub(crate) enum WorkerTask {
    Cmd(WorkerCmd),
    Write(Bytes),
    Close,
}

#[derive(Debug, Default)]
struct FifoInner {
    msgs: VecDeque<Bytes>,
    cmd: Option<WorkerCmd>,
    closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct MlagFifo {
    inner: Mutex<FifoInner>,
    cond: Condvar,
    sent: AtomicU64,
    discarded: AtomicU64,
}

impl MlagFifo {
    fn lock(&self) -> Result<MutexGuard<'_, FifoInner>, RouterError> {
        self.inner
            .lock()
            .map_err(|_| RouterError::Internal("MLAG fifo lock poisoned"))
    }

    /// Append a message. Never blocks on IO. Messages that could not be framed are refused.
    pub(crate) fn push(&self, msg: Bytes) -> Result<(), RouterError> {
        if msg.len() > MLAG_MAX_MSG_LEN {
            error!("Refusing MLAG message of {} octets", msg.len());
            return Err(RouterError::MalformedMessage(format!(
                "MLAG message too long ({} octets)",
                msg.len()
            )));
        }
        let mut inner = self.lock()?;
        if inner.closed {
            return Err(RouterError::MlagClosed);
        }
        inner.msgs.push_back(msg);
        self.cond.notify_one();
        Ok(())
    }

    /// Hand a command to the writer. A pending command not yet picked up is superseded.
    pub(crate) fn command(&self, cmd: WorkerCmd) -> Result<(), RouterError> {
        let mut inner = self.lock()?;
        if let Some(prev) = inner.cmd.replace(cmd) {
            debug!("Superseded pending MLAG worker command {prev:?}");
        }
        self.cond.notify_one();
        Ok(())
    }

    /// Refuse any further message and wake up the writer so that it drains and exits
    pub(crate) fn close(&self) -> Result<(), RouterError> {
        let mut inner = self.lock()?;
        inner.closed = true;
        self.cond.notify_all();
        Ok(())
    }

    #[must_use]
    pub(crate) fn is_closed(&self) -> bool {
        self.lock().map(|inner| inner.closed).unwrap_or(true)
    }

    /// Block until there is something for the writer to do. Messages are only handed out
    /// while the writer is connected. The message stays at the head until [`Self::pop`].
    pub(crate) fn wait(&self, connected: bool) -> Result<WorkerTask, RouterError> {
        let mut inner = self.lock()?;
        loop {
            if let Some(cmd) = inner.cmd.take() {
                return Ok(WorkerTask::Cmd(cmd));
            }
            if inner.closed {
                return Ok(WorkerTask::Close);
            }
            if connected {
                if let Some(msg) = inner.msgs.front() {
                    return Ok(WorkerTask::Write(msg.clone()));
                }
            }
            inner = self
                .cond
                .wait(inner)
                .map_err(|_| RouterError::Internal("MLAG fifo lock poisoned"))?;
        }
    }

    /// Remove the head message after it was written
    pub(crate) fn pop(&self) -> Result<(), RouterError> {
        let mut inner = self.lock()?;
        if inner.msgs.pop_front().is_some() {
            self.sent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Remove the head message without sending it
    pub(crate) fn drop_head(&self) -> Result<(), RouterError> {
        let mut inner = self.lock()?;
        if inner.msgs.pop_front().is_some() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// The head message, if any
    pub(crate) fn front(&self) -> Result<Option<Bytes>, RouterError> {
        Ok(self.lock()?.msgs.front().cloned())
    }

    /// Drop all pending messages, returning how many were dropped
    pub(crate) fn discard(&self) -> Result<usize, RouterError> {
        let mut inner = self.lock()?;
        let count = inner.msgs.len();
        inner.msgs.clear();
        self.discarded.fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.lock().map(|inner| inner.msgs.len()).unwrap_or(0)
    }

    #[must_use]
    pub(crate) fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub(crate) fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_messages_only_while_connected() {
        let fifo = MlagFifo::default();
        fifo.push(Bytes::from_static(b"one")).unwrap();
        fifo.command(WorkerCmd::Disconnect).unwrap();
        assert_eq!(fifo.wait(false), Ok(WorkerTask::Cmd(WorkerCmd::Disconnect)));
        assert_eq!(
            fifo.wait(true),
            Ok(WorkerTask::Write(Bytes::from_static(b"one")))
        );
        /* not popped yet: handed out again */
        assert_eq!(
            fifo.wait(true),
            Ok(WorkerTask::Write(Bytes::from_static(b"one")))
        );
        fifo.pop().unwrap();
        assert_eq!(fifo.len(), 0);
        assert_eq!(fifo.sent(), 1);

        fifo.drop_head().unwrap();
        assert_eq!(fifo.discarded(), 0);

        fifo.close().unwrap();
        assert_eq!(fifo.wait(false), Ok(WorkerTask::Close));
        assert_eq!(fifo.push(Bytes::new()), Err(RouterError::MlagClosed));
    }

    #[test]
    fn test_oversize_message_refused() {
        let fifo = MlagFifo::default();
        let big = Bytes::from(vec![0u8; MLAG_MAX_MSG_LEN + 1]);
        assert!(matches!(
            fifo.push(big),
            Err(RouterError::MalformedMessage(_))
        ));
        fifo.push(Bytes::from(vec![0u8; MLAG_MAX_MSG_LEN])).unwrap();
        fifo.push(Bytes::from_static(b"after")).unwrap();
        assert_eq!(fifo.len(), 2);

        fifo.drop_head().unwrap();
        assert_eq!(fifo.discarded(), 1);
        assert_eq!(
            fifo.wait(true),
            Ok(WorkerTask::Write(Bytes::from_static(b"after")))
        );
    }

    #[test]
    fn test_wait_wakes_up_on_push() {
        let fifo = Arc::new(MlagFifo::default());
        let waiter = {
            let fifo = fifo.clone();
            thread::spawn(move || fifo.wait(true))
        };
        thread::sleep(std::time::Duration::from_millis(50));
        fifo.push(Bytes::from_static(b"late")).unwrap();
        let task = waiter.join().expect("Thread panicked");
        assert_eq!(task, Ok(WorkerTask::Write(Bytes::from_static(b"late"))));
    }
}
