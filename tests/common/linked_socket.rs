//! An in-memory `DatagramSocket` pair.
//!
//! Whatever one end sends lands in the other end's inbox, unless the sender is holding
//! (then datagrams wait until [`LinkedSocket::release`] delivers them in any order) or a
//! drop rule discards them.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bubble_netplay::DatagramSocket;
use parking_lot::{Condvar, Mutex};

/// How long `recv_datagram` waits for a datagram.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(5);

#[derive(Default)]
struct Inbox {
    queue: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
}

impl Inbox {
    fn deliver(&self, datagram: Vec<u8>) {
        self.queue.lock().push_back(datagram);
        self.ready.notify_all();
    }
}

type DropRule = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// One end of a linked pair.
pub struct LinkedSocket {
    inbox: Arc<Inbox>,
    peer: Arc<Inbox>,
    held: Mutex<Option<Vec<Vec<u8>>>>,
    drop_rule: Mutex<Option<DropRule>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

/// Creates two sockets linked to each other.
pub fn linked_pair() -> (Arc<LinkedSocket>, Arc<LinkedSocket>) {
    let a = Arc::new(Inbox::default());
    let b = Arc::new(Inbox::default());
    (
        Arc::new(LinkedSocket::new(Arc::clone(&a), Arc::clone(&b))),
        Arc::new(LinkedSocket::new(b, a)),
    )
}

impl LinkedSocket {
    fn new(inbox: Arc<Inbox>, peer: Arc<Inbox>) -> Self {
        Self {
            inbox,
            peer,
            held: Mutex::new(None),
            drop_rule: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// From now on, keep sent datagrams instead of delivering them.
    pub fn hold(&self) {
        let mut held = self.held.lock();
        if held.is_none() {
            *held = Some(Vec::new());
        }
    }

    /// Number of datagrams currently held.
    pub fn held_len(&self) -> usize {
        self.held.lock().as_ref().map_or(0, Vec::len)
    }

    /// Delivers the held datagrams in `order` (indices in send order), discards the rest
    /// and stops holding.
    pub fn release(&self, order: &[usize]) {
        let held = self.held.lock().take().unwrap_or_default();
        for &index in order {
            if let Some(datagram) = held.get(index) {
                self.peer.deliver(datagram.clone());
            }
        }
    }

    /// Delivers every held datagram in send order and stops holding.
    pub fn release_all(&self) {
        let len = self.held_len();
        self.release(&(0..len).collect::<Vec<_>>());
    }

    /// Discards every sent datagram for which `rule` returns `true`.
    pub fn drop_where(&self, rule: impl FnMut(&[u8]) -> bool + Send + 'static) {
        *self.drop_rule.lock() = Some(Box::new(rule));
    }

    /// Removes the drop rule.
    pub fn clear_drop_rule(&self) {
        self.drop_rule.lock().take();
    }

    /// Puts `datagram` into this socket's own inbox, as if the peer had sent it.
    pub fn inject(&self, datagram: Vec<u8>) {
        self.inbox.deliver(datagram);
    }

    /// Every datagram handed to `send_datagram`, delivered or not.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Number of datagrams waiting in this socket's inbox.
    pub fn pending_inbound(&self) -> usize {
        self.inbox.queue.lock().len()
    }
}

impl DatagramSocket for LinkedSocket {
    fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize> {
        self.sent.lock().push(datagram.to_vec());

        if let Some(rule) = self.drop_rule.lock().as_mut() {
            if rule(datagram) {
                return Ok(datagram.len());
            }
        }
        if let Some(held) = self.held.lock().as_mut() {
            held.push(datagram.to_vec());
            return Ok(datagram.len());
        }
        self.peer.deliver(datagram.to_vec());
        Ok(datagram.len())
    }

    fn recv_datagram(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.inbox.queue.lock();
        if queue.is_empty() {
            let _ = self.inbox.ready.wait_for(&mut queue, RECV_TIMEOUT);
        }
        match queue.pop_front() {
            Some(datagram) => {
                let len = datagram.len().min(buffer.len());
                buffer[..len].copy_from_slice(&datagram[..len]);
                Ok(len)
            },
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}
