// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Framing of the messages exchanged with the MLAG daemon. Every message travels as
//! |length|payload|, where length is the size of the payload as a big-endian u32.

use crate::errors::RouterError;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{ErrorKind, Read, Write};
use thiserror::Error;

#[allow(unused)]
use tracing::{debug, error, trace, warn};

pub(crate) const MLAG_HDR_LEN: usize = 4;
pub(crate) const MLAG_MAX_MSG_LEN: usize = 64 * 1024;

#[derive(Error, Debug, PartialEq)]
pub(crate) enum MlagErr {
    #[error("Peer left")]
    PeerLeft,

    #[error("Message too long ({0} octets)")]
    TooLong(usize),

    #[error("IO failure: {0}")]
    IOFailure(String),
}

impl From<MlagErr> for RouterError {
    fn from(e: MlagErr) -> Self {
        match e {
            MlagErr::TooLong(_) => RouterError::MalformedMessage(e.to_string()),
            _ => RouterError::MlagIo(e.to_string()),
        }
    }
}

/// Build the wire representation of a message
pub(crate) fn encode(msg: &[u8]) -> Result<Bytes, MlagErr> {
    if msg.len() > MLAG_MAX_MSG_LEN {
        return Err(MlagErr::TooLong(msg.len()));
    }
    let mut wire = BytesMut::with_capacity(MLAG_HDR_LEN + msg.len());
    #[allow(clippy::cast_possible_truncation)]
    wire.put_u32(msg.len() as u32);
    wire.extend_from_slice(msg);
    Ok(wire.freeze())
}

/// Write a full message on a blocking stream
pub(crate) fn write_msg<W: Write>(sock: &mut W, msg: &[u8]) -> Result<(), MlagErr> {
    let wire = encode(msg)?;
    sock.write_all(&wire).map_err(|e| match e.kind() {
        ErrorKind::WriteZero | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            MlagErr::PeerLeft
        }
        _ => MlagErr::IOFailure(e.to_string()),
    })?;
    sock.flush().map_err(|e| MlagErr::IOFailure(e.to_string()))
}

/// Reassembles messages read in pieces from a non-blocking stream
#[derive(Debug, Default)]
pub(crate) struct FrameReader {
    buffer: Vec<u8>,
    used: usize,
}

impl FrameReader {
    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
        self.used = 0;
    }

    /// The payload length announced by the header, if it was fully received
    fn msg_len(&self) -> Option<usize> {
        let hdr: [u8; MLAG_HDR_LEN] = self.buffer.get(..MLAG_HDR_LEN)?.try_into().ok()?;
        Some(u32::from_be_bytes(hdr) as usize)
    }

    /// Number of octets to read next to complete the header or the message
    fn next_read_len(&self) -> usize {
        match self.msg_len() {
            None => MLAG_HDR_LEN - self.used,
            Some(len) => (MLAG_HDR_LEN + len).saturating_sub(self.used),
        }
    }

    /// Read from the socket until a full message is available or the socket would block.
    /// Returns `Ok(None)` if the message is not complete yet.
    pub(crate) fn recv<R: Read>(&mut self, sock: &mut R) -> Result<Option<Bytes>, MlagErr> {
        loop {
            if let Some(len) = self.msg_len() {
                if len > MLAG_MAX_MSG_LEN {
                    self.clear();
                    return Err(MlagErr::TooLong(len));
                }
            }
            let pending = self.next_read_len();
            if pending == 0 {
                let msg = Bytes::copy_from_slice(&self.buffer[MLAG_HDR_LEN..self.used]);
                self.clear();
                return Ok(Some(msg));
            }
            self.buffer.resize(self.used + pending, 0);
            match sock.read(&mut self.buffer[self.used..]) {
                Ok(0) => return Err(MlagErr::PeerLeft),
                Ok(n) => {
                    self.used += n;
                    self.buffer.truncate(self.used);
                    trace!("Read {n} octets from MLAG daemon");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.buffer.truncate(self.used);
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    self.buffer.truncate(self.used);
                }
                Err(e) => {
                    self.clear();
                    return Err(MlagErr::IOFailure(e.to_string()));
                }
            }
        }
    }
}
