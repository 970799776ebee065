// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A fake MLAG daemon for tests

#[cfg(test)]
pub mod fake_mlagd {
    use bytes::Bytes;
    use std::io::{Read, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::Path;
    use std::sync::mpsc::{Receiver, Sender, channel};
    use std::thread;
    use std::time::Duration;
    use tracing::debug;

    #[derive(Debug, PartialEq)]
    pub enum MlagdEvent {
        Accepted,
        Msg(Bytes),
        Closed,
    }

    pub struct FakeMlagd {
        pub events: Receiver<MlagdEvent>,
    }

    impl FakeMlagd {
        /// Wait for the next event
        pub fn next(&self) -> Option<MlagdEvent> {
            self.events.recv_timeout(Duration::from_secs(5)).ok()
        }
        /// Wait for `count` messages, ignoring connection events
        pub fn msgs(&self, count: usize) -> Vec<Bytes> {
            let mut out = vec![];
            while out.len() < count {
                match self.next() {
                    Some(MlagdEvent::Msg(msg)) => out.push(msg),
                    Some(_) => {}
                    None => break,
                }
            }
            out
        }
    }

    fn recv_msg(sock: &mut UnixStream) -> Option<Bytes> {
        let mut hdr = [0u8; 4];
        sock.read_exact(&mut hdr).ok()?;
        let mut payload = vec![0u8; u32::from_be_bytes(hdr) as usize];
        sock.read_exact(&mut payload).ok()?;
        Some(Bytes::from(payload))
    }

    fn serve(
        mut sock: UnixStream,
        tx: &Sender<MlagdEvent>,
        greeting: Option<&[u8]>,
        close_after: Option<usize>,
    ) {
        let _ = tx.send(MlagdEvent::Accepted);
        if let Some(greeting) = greeting {
            let mut wire = (greeting.len() as u32).to_be_bytes().to_vec();
            wire.extend_from_slice(greeting);
            sock.write_all(&wire).unwrap();
        }
        let mut count = 0;
        while close_after.is_none_or(|max| count < max) {
            let Some(msg) = recv_msg(&mut sock) else {
                break;
            };
            debug!("mlagd got message of {} octets", msg.len());
            count += 1;
            let _ = tx.send(MlagdEvent::Msg(msg));
        }
        let _ = sock.shutdown(std::net::Shutdown::Both);
        let _ = tx.send(MlagdEvent::Closed);
    }

    /// Start a fake MLAG daemon listening at `path`. It serves connections one after the
    /// other. Every connection gets the optional greeting message. The first connection is
    /// closed after `close_after` messages, if given; later ones are kept open.
    pub fn fake_mlagd(
        path: &str,
        greeting: Option<Vec<u8>>,
        close_after: Option<usize>,
    ) -> FakeMlagd {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(Path::new(path)).unwrap();
        let (tx, rx) = channel();
        thread::spawn(move || {
            let mut close_after = close_after;
            for sock in listener.incoming() {
                let Ok(sock) = sock else {
                    break;
                };
                serve(sock, &tx, greeting.as_deref(), close_after.take());
            }
        });
        FakeMlagd { events: rx }
    }
}
