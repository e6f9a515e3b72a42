//! Multi-process network testing.
//!
//! These tests spawn two instances of `netplay_test_peer` and let them play a scripted
//! duel over real UDP sockets on the loopback interface.
//!
//! # Requirements
//!
//! The `netplay_test_peer` binary must be built before running these tests:
//! ```bash
//! cargo build -p netplay-test-peer
//! ```
//! Without it the tests print a notice and pass.

// Allow print macros for test debugging output
#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used
)]

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serial_test::serial;

use crate::common::PortAllocator;

/// Result printed by a test peer process.
#[derive(Debug, Deserialize)]
struct TestResult {
    success: bool,
    player: u8,
    sent: u16,
    received: u16,
    sent_checksum: u64,
    received_checksum: u64,
    rebroadcast_requests: u32,
    rebroadcasts_served: u32,
    floods: u64,
    peer_started: bool,
    preferences_difficulty: i32,
    error: Option<String>,
}

impl TestResult {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            player: 0,
            sent: 0,
            received: 0,
            sent_checksum: 0,
            received_checksum: 0,
            rebroadcast_requests: 0,
            rebroadcasts_served: 0,
            floods: 0,
            peer_started: false,
            preferences_difficulty: 0,
            error: Some(error),
        }
    }

    fn diagnostic_summary(&self) -> String {
        format!(
            "player={}, sent={}, received={}, requests={}, served={}, floods={}, started={}, error={:?}",
            self.player,
            self.sent,
            self.received,
            self.rebroadcast_requests,
            self.rebroadcasts_served,
            self.floods,
            self.peer_started,
            self.error
        )
    }
}

/// Configuration for a test peer.
struct PeerConfig {
    local_port: u16,
    player: u8,
    peer_port: u16,
    actions: u16,
    timeout_secs: u64,
    drop_every: u32,
}

/// The binary name for the test peer (platform-specific).
const PEER_BINARY_NAME: &str = if cfg!(windows) {
    "netplay_test_peer.exe"
} else {
    "netplay_test_peer"
};

/// Maximum time to wait for a peer process before considering it hung.
const PEER_PROCESS_TIMEOUT: Duration = Duration::from_secs(120);

/// Finds the test peer next to the test executable's target directory.
fn find_peer_binary() -> Option<std::path::PathBuf> {
    // Test executables are in target/debug/deps/, binaries in target/debug/.
    let test_exe = std::env::current_exe().ok()?;
    let target_dir = test_exe.parent().and_then(|p| p.parent())?;
    let peer_binary = target_dir.join(PEER_BINARY_NAME);
    peer_binary.exists().then_some(peer_binary)
}

/// Skips the test if the test peer binary is not available.
macro_rules! skip_if_no_peer_binary {
    () => {
        if find_peer_binary().is_none() {
            eprintln!(
                "SKIP: {} not found. Build it with: cargo build -p netplay-test-peer",
                PEER_BINARY_NAME
            );
            return;
        }
    };
}

fn spawn_peer(config: &PeerConfig) -> std::io::Result<Child> {
    let peer_binary = find_peer_binary().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{PEER_BINARY_NAME} not found"),
        )
    })?;

    let mut cmd = Command::new(peer_binary);
    cmd.arg("--local-port")
        .arg(config.local_port.to_string())
        .arg("--player")
        .arg(config.player.to_string())
        .arg("--peer")
        .arg(format!("127.0.0.1:{}", config.peer_port))
        .arg("--actions")
        .arg(config.actions.to_string())
        .arg("--timeout")
        .arg(config.timeout_secs.to_string());
    if config.drop_every > 0 {
        cmd.arg("--drop-every").arg(config.drop_every.to_string());
    }

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()
}

/// Waits for a peer and parses the JSON on the last line of its output.
fn wait_for_peer(mut child: Child, name: &str) -> TestResult {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut stdout = String::new();
                let mut stderr = String::new();
                if let Some(mut out) = child.stdout.take() {
                    let _ = out.read_to_string(&mut stdout);
                }
                if let Some(mut err) = child.stderr.take() {
                    let _ = err.read_to_string(&mut stderr);
                }
                if !status.success() {
                    eprintln!("{name} stderr: {stderr}");
                }

                let last_line = stdout.lines().last().unwrap_or("");
                return serde_json::from_str(last_line).unwrap_or_else(|e| {
                    eprintln!("{name} stdout: {stdout}");
                    TestResult::failed(format!("failed to parse output: {e}"))
                });
            },
            Ok(None) if start.elapsed() > PEER_PROCESS_TIMEOUT => {
                let _ = child.kill();
                let _ = child.wait();
                return TestResult::failed(format!(
                    "process timed out after {:.1}s",
                    start.elapsed().as_secs_f64()
                ));
            },
            Ok(None) => thread::sleep(Duration::from_millis(50)),
            Err(e) => return TestResult::failed(format!("error checking process: {e}")),
        }
    }
}

/// Runs player one and player two against each other.
fn run_duel(actions: u16, drop_every: u32) -> (TestResult, TestResult) {
    let host_port = PortAllocator::next_port();
    let guest_port = PortAllocator::next_port();

    let host = spawn_peer(&PeerConfig {
        local_port: host_port,
        player: 1,
        peer_port: guest_port,
        actions,
        timeout_secs: 30,
        drop_every,
    })
    .expect("failed to spawn player one");

    // Give player one time to bind before player two starts knocking.
    thread::sleep(Duration::from_millis(100));

    let guest = spawn_peer(&PeerConfig {
        local_port: guest_port,
        player: 2,
        peer_port: host_port,
        actions,
        timeout_secs: 30,
        drop_every,
    })
    .expect("failed to spawn player two");

    let host_result = wait_for_peer(host, "player one");
    let guest_result = wait_for_peer(guest, "player two");
    println!("player one: {}", host_result.diagnostic_summary());
    println!("player two: {}", guest_result.diagnostic_summary());
    (host_result, guest_result)
}

fn assert_consistent(host: &TestResult, guest: &TestResult, actions: u16) {
    assert!(host.success, "player one failed: {}", host.diagnostic_summary());
    assert!(guest.success, "player two failed: {}", guest.diagnostic_summary());

    assert_eq!(host.sent, actions);
    assert_eq!(guest.sent, actions);
    assert_eq!(host.received, actions);
    assert_eq!(guest.received, actions);

    // Each side saw exactly what the other recorded, in the same order.
    assert_eq!(host.received_checksum, guest.sent_checksum);
    assert_eq!(guest.received_checksum, host.sent_checksum);

    // Both play with player one's preferences.
    assert_eq!(host.preferences_difficulty, 4);
    assert_eq!(guest.preferences_difficulty, 4);
}

#[test]
#[serial]
fn test_basic_duel() {
    skip_if_no_peer_binary!();
    let (host, guest) = run_duel(100, 0);
    assert_consistent(&host, &guest, 100);
    assert!(host.peer_started);
}

#[test]
#[serial]
fn test_duel_with_lost_actions() {
    skip_if_no_peer_binary!();
    let (host, guest) = run_duel(100, 7);
    assert_consistent(&host, &guest, 100);
    assert!(
        host.rebroadcast_requests + guest.rebroadcast_requests > 0,
        "lost actions should have been requested again"
    );
    assert!(host.rebroadcasts_served + guest.rebroadcasts_served > 0);
}
