//! The datagram transport: one socket, one worker thread, one staged datagram.
//!
//! The worker loop alternates between flushing the staged datagram (if any) and one
//! receive bounded by the socket's timeout. The short timeout is what lets a single thread
//! interleave both directions without a reactor: a quiet line costs at most one timeout of
//! send latency, and every received datagram makes the loop come around sooner.
//!
//! There is no outbound queue. [`Transport::send`] stages exactly one datagram; a second
//! `send` before the worker flushed the first is rejected with [`TransportEvent::TxFlood`].
//!
//! Lock order: `control` before `mailbox`. Listener callbacks are never made while a
//! lock is held.

use std::io;
use std::thread::{self, JoinHandle, ThreadId};

use web_time::Duration;

use crate::action_sync::ActionOutbound;
use crate::network::multicast_socket::MulticastSocket;
use crate::network::transport_stats::TransportStats;
use crate::report_violation;
use crate::sessions::config::TransportConfig;
use crate::sync::{Arc, Condvar, Mutex};
use crate::telemetry::{ViolationKind, ViolationSeverity};
use crate::{DatagramSocket, NetplayError};

/// Size of the worker's receive buffer. Every protocol message is far smaller.
pub const RECV_BUFFER_SIZE: usize = 2048;
/// How long the worker backs off after a receive error other than a timeout.
const RX_ERROR_BACKOFF: Duration = Duration::from_millis(20);
const WORKER_THREAD_NAME: &str = "netplay-transport";

/// Everything a [`Transport`] reports to its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportEvent {
    /// A datagram arrived. The bytes are not decoded.
    PacketReceived(Vec<u8>),
    /// Receiving failed with something other than a timeout, or `configure` failed.
    RxFailed {
        /// The I/O error kind.
        kind: io::ErrorKind,
    },
    /// Sending the staged datagram failed. The datagram is gone.
    TxFailed {
        /// The I/O error kind.
        kind: io::ErrorKind,
    },
    /// `send` was called while a datagram was still staged; the new datagram was rejected.
    TxFlood,
    /// The worker thread has exited.
    WorkerStopped,
}

/// Receives [`TransportEvent`]s.
///
/// Except for events raised by [`Transport::configure`] and [`Transport::send`], listeners
/// run on the transport's worker thread. A listener may call `send`, `pause` and `resume`;
/// it must not expect `stop` to join.
///
/// Any `Fn(TransportEvent) + Send + Sync` closure is a listener.
pub trait TransportListener: Send + Sync {
    /// Called once per event.
    fn on_event(&self, event: TransportEvent);
}

impl<F> TransportListener for F
where
    F: Fn(TransportEvent) + Send + Sync,
{
    fn on_event(&self, event: TransportEvent) {
        self(event);
    }
}

#[derive(Debug, Default)]
struct Control {
    paused: bool,
    stopped: bool,
    running: bool,
    parked: bool,
    worker_thread: Option<ThreadId>,
}

struct Shared {
    control: Mutex<Control>,
    wakeup: Condvar,
    mailbox: Mutex<Option<Vec<u8>>>,
    socket: Mutex<Option<Arc<dyn DatagramSocket>>>,
    listener: Arc<dyn TransportListener>,
    stats: Mutex<TransportStats>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        tracing::trace!(?event, "transport event");
        self.listener.on_event(event);
    }

    /// Blocks while paused. Returns `None` once stopped, otherwise the staged datagram
    /// (if any) for this iteration.
    fn next_iteration(&self) -> Option<Option<Vec<u8>>> {
        let mut control = self.control.lock();
        loop {
            if control.stopped {
                return None;
            }
            if !control.paused {
                break;
            }
            if !control.parked {
                control.parked = true;
                self.wakeup.notify_all();
                tracing::debug!("transport worker parked");
            }
            self.wakeup.wait(&mut control);
        }
        if control.parked {
            control.parked = false;
            tracing::debug!("transport worker resumed");
        }
        Some(self.mailbox.lock().take())
    }

    fn back_off(&self) {
        let mut control = self.control.lock();
        if !control.stopped {
            let _ = self.wakeup.wait_for(&mut control, RX_ERROR_BACKOFF);
        }
    }

    fn on_worker_thread(control: &Control) -> bool {
        control.worker_thread == Some(thread::current().id())
    }
}

fn run_worker(shared: Arc<Shared>, socket: Arc<dyn DatagramSocket>) {
    shared.control.lock().worker_thread = Some(thread::current().id());
    tracing::debug!("transport worker started");

    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
    while let Some(staged) = shared.next_iteration() {
        if let Some(datagram) = staged {
            match socket.send_datagram(&datagram) {
                Ok(_) => {
                    tracing::trace!(len = datagram.len(), "datagram sent");
                    shared.stats.lock().record_sent(datagram.len());
                },
                Err(err) => {
                    shared.stats.lock().record_send_failure();
                    shared.emit(TransportEvent::TxFailed { kind: err.kind() });
                },
            }
        }

        match socket.recv_datagram(&mut buffer) {
            Ok(len) => {
                if len >= buffer.len() {
                    report_violation!(
                        ViolationSeverity::Warning,
                        ViolationKind::Transport,
                        "received datagram filled the {}-byte buffer and may be truncated",
                        buffer.len()
                    );
                }
                let bytes = buffer.get(..len).map(<[u8]>::to_vec).unwrap_or_default();
                tracing::trace!(len, "datagram received");
                shared.stats.lock().record_received(len);
                shared.emit(TransportEvent::PacketReceived(bytes));
            },
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {},
            Err(err) => {
                shared.stats.lock().record_receive_failure();
                shared.emit(TransportEvent::RxFailed { kind: err.kind() });
                shared.back_off();
            },
        }
    }

    {
        let mut control = shared.control.lock();
        control.running = false;
        control.parked = false;
        control.worker_thread = None;
        shared.wakeup.notify_all();
    }
    tracing::debug!("transport worker exited");
    shared.emit(TransportEvent::WorkerStopped);
}

/// The datagram transport of a session.
///
/// All methods take `&self`; a transport is typically shared as `Arc<Transport>` between
/// the game loop and the session glue. Dropping it stops the worker.
///
/// # Example
///
/// ```no_run
/// use bubble_netplay::{Transport, TransportConfig, TransportEvent};
///
/// let transport = Transport::new(|event: TransportEvent| {
///     if let TransportEvent::PacketReceived(bytes) = event {
///         println!("{} bytes", bytes.len());
///     }
/// });
/// transport.configure(&TransportConfig::lan());
/// transport.start()?;
/// if !transport.send(vec![1, 2]) {
///     // the previous datagram has not been flushed yet: drop or retry later
/// }
/// transport.stop();
/// # Ok::<(), bubble_netplay::NetplayError>(())
/// ```
pub struct Transport {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.shared.control.lock();
        f.debug_struct("Transport")
            .field("running", &control.running)
            .field("paused", &control.paused)
            .field("stopped", &control.stopped)
            .field("staged", &self.shared.mailbox.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates an unconfigured, stopped transport reporting to `listener`.
    pub fn new(listener: impl TransportListener + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                control: Mutex::new(Control::default()),
                wakeup: Condvar::new(),
                mailbox: Mutex::new(None),
                socket: Mutex::new(None),
                listener: Arc::new(listener),
                stats: Mutex::new(TransportStats::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Opens the socket described by `config`.
    ///
    /// Does not return errors: an invalid configuration, an unresolvable group or a
    /// failing bind raises [`TransportEvent::RxFailed`] and leaves the transport
    /// unconfigured, so that a later [`start`](Self::start) fails with
    /// [`NetplayError::NotConfigured`].
    pub fn configure(&self, config: &TransportConfig) {
        if self.is_running() {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::Transport,
                "configure() ignored: the worker is running"
            );
            return;
        }
        if let Err(err) = config.validate() {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::Transport,
                "invalid transport configuration: {}",
                err
            );
            self.shared.emit(TransportEvent::RxFailed {
                kind: io::ErrorKind::InvalidInput,
            });
            return;
        }
        match MulticastSocket::open(config) {
            Ok(socket) => {
                *self.shared.socket.lock() = Some(Arc::new(socket));
                tracing::debug!(group = %config.group, port = config.port, "transport configured");
            },
            Err(err) => {
                report_violation!(
                    ViolationSeverity::Error,
                    ViolationKind::Transport,
                    "cannot open socket for {}:{}: {}",
                    config.group,
                    config.port,
                    err
                );
                self.shared.emit(TransportEvent::RxFailed { kind: err.kind() });
            },
        }
    }

    /// Uses `socket` instead of opening one. Replaces any configured socket.
    ///
    /// # Errors
    ///
    /// [`NetplayError::AlreadyStarted`] while the worker is running.
    pub fn attach_socket(&self, socket: Arc<dyn DatagramSocket>) -> Result<(), NetplayError> {
        if self.is_running() {
            return Err(NetplayError::AlreadyStarted);
        }
        *self.shared.socket.lock() = Some(socket);
        Ok(())
    }

    /// Spawns the worker thread.
    ///
    /// A transport that was stopped can be started again after it was configured again.
    ///
    /// # Errors
    ///
    /// - [`NetplayError::NotConfigured`] if there is no socket.
    /// - [`NetplayError::AlreadyStarted`] if the worker is running.
    /// - [`NetplayError::InternalError`] if the thread cannot be spawned.
    pub fn start(&self) -> Result<(), NetplayError> {
        let mut worker = self.worker.lock();
        let socket = self
            .shared
            .socket
            .lock()
            .clone()
            .ok_or(NetplayError::NotConfigured)?;

        {
            let mut control = self.shared.control.lock();
            if control.running {
                return Err(NetplayError::AlreadyStarted);
            }
            control.running = true;
            control.stopped = false;
            control.parked = false;
        }

        // A previous worker has already exited; reap it.
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_owned())
            .spawn(move || run_worker(shared, socket));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::debug!("transport started");
                Ok(())
            },
            Err(err) => {
                self.shared.control.lock().running = false;
                Err(NetplayError::InternalError {
                    context: format!("cannot spawn transport worker: {err}"),
                })
            },
        }
    }

    /// Suspends the worker without releasing the socket.
    ///
    /// Returns once the worker is parked, which takes up to one receive timeout. After
    /// that, nothing is sent or received until [`resume`](Self::resume). `send` still
    /// stages a datagram; it is flushed after resuming. Pausing a transport that is not
    /// running only records the flag.
    pub fn pause(&self) {
        let mut control = self.shared.control.lock();
        control.paused = true;
        self.shared.wakeup.notify_all();
        if Shared::on_worker_thread(&control) {
            return;
        }
        while control.running && !control.parked && !control.stopped {
            self.shared.wakeup.wait(&mut control);
        }
        tracing::debug!("transport paused");
    }

    /// Wakes a paused worker.
    pub fn resume(&self) {
        let mut control = self.shared.control.lock();
        control.paused = false;
        self.shared.wakeup.notify_all();
        tracing::debug!("transport resumed");
    }

    /// Stops the worker, waits for it to exit and releases the socket.
    ///
    /// Takes up to one receive timeout. A staged datagram is discarded. Called from a
    /// listener (on the worker thread) it only signals the worker, which exits after the
    /// current callback returns.
    pub fn stop(&self) {
        self.shutdown(true);
    }

    fn shutdown(&self, report_self_join: bool) {
        let on_worker = {
            let mut control = self.shared.control.lock();
            control.stopped = true;
            self.shared.wakeup.notify_all();
            Shared::on_worker_thread(&control)
        };

        if on_worker {
            if report_self_join {
                report_violation!(
                    ViolationSeverity::Warning,
                    ViolationKind::Transport,
                    "stop() called from the transport worker; the worker exits without being joined"
                );
            }
        } else if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                report_violation!(
                    ViolationSeverity::Error,
                    ViolationKind::Transport,
                    "transport worker panicked"
                );
            }
            tracing::debug!("transport stopped");
        }

        self.shared.mailbox.lock().take();
        self.shared.socket.lock().take();
    }

    /// Stages `datagram` for the worker.
    ///
    /// Returns `false` without staging if a datagram is still staged (raising exactly one
    /// [`TransportEvent::TxFlood`]) or the transport was stopped. The staged datagram is
    /// never overwritten. Callers must drop or retry later; they must not spin on `send`.
    #[must_use = "a rejected datagram is not sent"]
    pub fn send(&self, datagram: Vec<u8>) -> bool {
        if self.shared.control.lock().stopped {
            tracing::trace!("send on stopped transport ignored");
            return false;
        }
        let flooded = {
            let mut mailbox = self.shared.mailbox.lock();
            if mailbox.is_some() {
                true
            } else {
                *mailbox = Some(datagram);
                false
            }
        };
        if flooded {
            self.shared.stats.lock().record_flood();
            self.shared.emit(TransportEvent::TxFlood);
        }
        !flooded
    }

    /// Returns `true` while a datagram waits for the worker.
    #[must_use]
    pub fn has_staged(&self) -> bool {
        self.shared.mailbox.lock().is_some()
    }

    /// Returns `true` while the worker thread runs (paused or not).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.control.lock().running
    }

    /// Returns `true` if [`pause`](Self::pause) was called without a matching `resume`.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.control.lock().paused
    }

    /// Returns `true` if a socket is configured or attached.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.shared.socket.lock().is_some()
    }

    /// A snapshot of the transport's counters.
    pub fn stats(&self) -> TransportStats {
        *self.shared.stats.lock()
    }
}

impl ActionOutbound for Transport {
    fn transmit(&self, datagram: Vec<u8>) -> bool {
        self.send(datagram)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use web_time::Instant;

    /// Socket whose inbound side is scripted and whose outbound side is recorded.
    #[derive(Default)]
    struct ScriptedSocket {
        inbound: Mutex<VecDeque<io::Result<Vec<u8>>>>,
        sent: Mutex<Vec<Vec<u8>>>,
        fail_sends: Mutex<bool>,
    }

    impl ScriptedSocket {
        fn push_inbound(&self, datagram: &[u8]) {
            self.inbound.lock().push_back(Ok(datagram.to_vec()));
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().clone()
        }
    }

    impl DatagramSocket for ScriptedSocket {
        fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize> {
            if *self.fail_sends.lock() {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.sent.lock().push(datagram.to_vec());
            Ok(datagram.len())
        }

        fn recv_datagram(&self, buffer: &mut [u8]) -> io::Result<usize> {
            let next = self.inbound.lock().pop_front();
            match next {
                Some(Ok(datagram)) => {
                    buffer[..datagram.len()].copy_from_slice(&datagram);
                    Ok(datagram.len())
                },
                Some(Err(err)) => Err(err),
                None => {
                    thread::sleep(std::time::Duration::from_millis(2));
                    Err(io::Error::from(io::ErrorKind::WouldBlock))
                },
            }
        }
    }

    type Events = Arc<Mutex<Vec<TransportEvent>>>;

    fn transport_with_socket() -> (Transport, Arc<ScriptedSocket>, Events) {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let transport = Transport::new(move |event: TransportEvent| sink.lock().push(event));
        let socket = Arc::new(ScriptedSocket::default());
        transport.attach_socket(socket.clone()).unwrap();
        (transport, socket, events)
    }

    #[track_caller]
    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    fn count(events: &Events, wanted: &TransportEvent) -> usize {
        events.lock().iter().filter(|e| *e == wanted).count()
    }

    #[test]
    fn start_without_socket_is_not_configured() {
        let transport = Transport::new(|_event: TransportEvent| {});
        assert!(!transport.is_configured());
        assert_eq!(transport.start(), Err(NetplayError::NotConfigured));
    }

    #[test]
    fn start_twice_is_rejected() {
        let (transport, _socket, _events) = transport_with_socket();
        transport.start().unwrap();
        assert_eq!(transport.start(), Err(NetplayError::AlreadyStarted));
        assert!(transport.attach_socket(Arc::new(ScriptedSocket::default())).is_err());
        transport.stop();
    }

    #[test]
    fn staged_datagram_is_flushed() {
        let (transport, socket, _events) = transport_with_socket();
        transport.start().unwrap();
        assert!(transport.send(vec![5, 1, 2]));
        wait_until(|| !socket.sent().is_empty());
        assert_eq!(socket.sent(), vec![vec![5, 1, 2]]);
        assert!(!transport.has_staged());
        transport.stop();
        assert_eq!(transport.stats().datagrams_sent, 1);
        assert_eq!(transport.stats().bytes_sent, 3);
    }

    #[test]
    fn second_send_while_staged_floods_once() {
        let (transport, socket, events) = transport_with_socket();
        transport.start().unwrap();
        transport.pause();

        assert!(transport.send(vec![1]));
        assert!(!transport.send(vec![2]));
        assert!(transport.has_staged());
        assert_eq!(count(&events, &TransportEvent::TxFlood), 1);

        transport.resume();
        wait_until(|| !socket.sent().is_empty());
        transport.stop();

        // The first datagram survived; the rejected one was never sent.
        assert_eq!(socket.sent(), vec![vec![1]]);
        assert_eq!(count(&events, &TransportEvent::TxFlood), 1);
        assert_eq!(transport.stats().floods, 1);
    }

    #[test]
    fn paused_worker_neither_sends_nor_receives() {
        let (transport, socket, events) = transport_with_socket();
        transport.start().unwrap();
        transport.pause();
        assert!(transport.is_paused());

        socket.push_inbound(&[9, 9]);
        assert!(transport.send(vec![3]));
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(socket.sent().is_empty());
        assert!(transport.has_staged());
        assert!(!events
            .lock()
            .iter()
            .any(|e| matches!(e, TransportEvent::PacketReceived(_))));

        transport.resume();
        wait_until(|| !socket.sent().is_empty());
        wait_until(|| count(&events, &TransportEvent::PacketReceived(vec![9, 9])) == 1);
        transport.stop();
    }

    #[test]
    fn io_failures_are_reported_and_the_loop_continues() {
        let (transport, socket, events) = transport_with_socket();
        socket
            .inbound
            .lock()
            .push_back(Err(io::Error::from(io::ErrorKind::ConnectionRefused)));
        socket.push_inbound(&[1]);
        *socket.fail_sends.lock() = true;

        // Staged before the worker starts, so the send happens in the first iteration.
        assert!(transport.send(vec![7]));
        transport.start().unwrap();
        wait_until(|| count(&events, &TransportEvent::PacketReceived(vec![1])) == 1);
        transport.stop();

        assert_eq!(
            count(
                &events,
                &TransportEvent::RxFailed {
                    kind: io::ErrorKind::ConnectionRefused
                }
            ),
            1
        );
        assert_eq!(
            count(
                &events,
                &TransportEvent::TxFailed {
                    kind: io::ErrorKind::PermissionDenied
                }
            ),
            1
        );
        let stats = transport.stats();
        assert_eq!(stats.receive_failures, 1);
        assert_eq!(stats.send_failures, 1);
    }

    #[test]
    fn stop_joins_and_releases_the_socket() {
        let (transport, _socket, events) = transport_with_socket();
        transport.start().unwrap();
        transport.stop();

        assert!(!transport.is_running());
        assert!(!transport.is_configured());
        assert_eq!(events.lock().last(), Some(&TransportEvent::WorkerStopped));
        assert!(!transport.send(vec![1]));
        assert_eq!(transport.start(), Err(NetplayError::NotConfigured));
    }

    #[test]
    fn stop_wakes_a_paused_worker() {
        let (transport, _socket, events) = transport_with_socket();
        transport.start().unwrap();
        transport.pause();
        transport.stop();
        assert_eq!(count(&events, &TransportEvent::WorkerStopped), 1);
    }

    #[test]
    fn transport_can_restart_after_stop() {
        let (transport, socket, events) = transport_with_socket();
        transport.start().unwrap();
        transport.stop();

        transport.attach_socket(socket.clone()).unwrap();
        transport.start().unwrap();
        assert!(transport.send(vec![4]));
        wait_until(|| !socket.sent().is_empty());
        transport.stop();
        assert_eq!(count(&events, &TransportEvent::WorkerStopped), 2);
    }

    #[test]
    fn invalid_configuration_raises_rx_failed() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let transport = Transport::new(move |event: TransportEvent| sink.lock().push(event));

        transport.configure(&TransportConfig {
            receive_timeout: Duration::ZERO,
            ..TransportConfig::default()
        });
        assert_eq!(
            events.lock().as_slice(),
            &[TransportEvent::RxFailed {
                kind: io::ErrorKind::InvalidInput
            }]
        );
        assert_eq!(transport.start(), Err(NetplayError::NotConfigured));
    }

    #[test]
    #[cfg(not(miri))]
    fn unresolvable_group_raises_rx_failed() {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let transport = Transport::new(move |event: TransportEvent| sink.lock().push(event));

        transport.configure(&TransportConfig {
            group: "no-such-host.invalid".to_owned(),
            port: 0,
            ..TransportConfig::default()
        });
        assert!(matches!(
            events.lock().as_slice(),
            [TransportEvent::RxFailed { .. }]
        ));
        assert!(!transport.is_configured());
    }

    #[test]
    fn listener_may_send_from_the_worker() {
        let socket = Arc::new(ScriptedSocket::default());
        let transport = Arc::new(Mutex::new(None::<crate::sync::Weak<Transport>>));
        let handle = Arc::clone(&transport);
        let owned = Arc::new(Transport::new(move |event: TransportEvent| {
            if let TransportEvent::PacketReceived(bytes) = event {
                if let Some(t) = handle.lock().as_ref().and_then(crate::sync::Weak::upgrade) {
                    let _ = t.send(bytes);
                }
            }
        }));
        *transport.lock() = Some(Arc::downgrade(&owned));
        owned.attach_socket(socket.clone()).unwrap();
        owned.start().unwrap();

        socket.push_inbound(&[8, 8]);
        wait_until(|| socket.sent() == vec![vec![8, 8]]);
        owned.stop();
    }
}
