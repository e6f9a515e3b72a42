//! Structured reporting for unexpected-but-survivable conditions.
//!
//! Nothing that goes wrong on the wire is fatal to a session: a corrupt datagram is
//! dropped, a message from a stranger is ignored, a flooded mailbox rejects the send.
//! Instead of just logging with `tracing::warn!`, such conditions are turned into
//! [`Violation`] values that can be:
//!
//! - Logged via tracing (default behavior)
//! - Collected programmatically for testing
//! - Sent to custom observers (metrics, alerting, etc.)
//!
//! # Example
//!
//! ```
//! use bubble_netplay::telemetry::{CollectingObserver, ViolationKind, ViolationObserver};
//! use bubble_netplay::report_violation_to;
//! use bubble_netplay::telemetry::ViolationSeverity;
//! use std::sync::Arc;
//!
//! let collector = Arc::new(CollectingObserver::new());
//! let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
//!
//! report_violation_to!(&observer, ViolationSeverity::Warning, ViolationKind::Codec,
//!     "dropped datagram of {} bytes", 3);
//!
//! assert!(collector.has_violation(ViolationKind::Codec));
//! ```

use std::collections::BTreeMap;

use crate::sync::{Arc, Mutex};

/// Severity of a reported violation.
///
/// Severities are ordered from least to most severe, allowing filtering
/// and comparison operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Unexpected but recoverable - operation continued with fallback.
    Warning,
    /// Serious issue - data was dropped or a peer may now be out of sync.
    Error,
    /// Critical invariant broken - state may be corrupted.
    Critical,
}

impl ViolationSeverity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem a violation was detected in.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]`. Always include a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// Socket setup, worker lifecycle, oversized datagrams.
    Transport,
    /// A datagram could not be decoded, or a value could not be encoded.
    Codec,
    /// Action stream bookkeeping: overflow, reserved sequence ids, foreign actions.
    ActionStream,
    /// Session glue: unexpected peers, preference persistence.
    Session,
}

impl ViolationKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Codec => "codec",
            Self::ActionStream => "action_stream",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded violation with enough context to diagnose it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    /// The severity level of this violation.
    pub severity: ViolationSeverity,
    /// The subsystem where the violation occurred.
    pub kind: ViolationKind,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Source location where the violation was detected (file:line).
    pub location: &'static str,
    /// Additional structured context as key-value pairs.
    pub context: BTreeMap<String, String>,
}

impl Violation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            context: BTreeMap::new(),
        }
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this violation to a JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Receives violations.
///
/// Observers are called from whichever thread detected the violation, which for
/// anything datagram-related is the transport worker.
pub trait ViolationObserver: Send + Sync {
    /// Called when a violation is detected. Keep it quick.
    fn on_violation(&self, violation: &Violation);
}

/// Built-in observer that logs violations via the `tracing` crate.
///
/// - `Warning` severity → `tracing::warn!`
/// - `Error` and `Critical` severity → `tracing::error!`
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let severity = violation.severity.as_str();
        let kind = violation.kind.as_str();
        let location = violation.location;
        let context = format!("{:?}", violation.context);

        match violation.severity {
            ViolationSeverity::Warning => {
                tracing::warn!(severity, kind, location, context = %context, "{}", violation.message);
            },
            ViolationSeverity::Error | ViolationSeverity::Critical => {
                tracing::error!(severity, kind, location, context = %context, "{}", violation.message);
            },
        }
    }
}

/// Built-in observer that collects violations for testing.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with an empty violation list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all collected violations.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    /// Returns the number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns true if no violations have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Checks if any violation of the specified kind has been collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Clears all collected violations.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Reports to `observer` when one is set, and always to the [`TracingObserver`].
pub fn report_to_observer(observer: Option<&Arc<dyn ViolationObserver>>, violation: &Violation) {
    TracingObserver.on_violation(violation);
    if let Some(observer) = observer {
        observer.on_violation(violation);
    }
}

/// Reports a violation with location tracking to the [`TracingObserver`].
///
/// ```
/// use bubble_netplay::{report_violation, telemetry::{ViolationSeverity, ViolationKind}};
///
/// report_violation!(ViolationSeverity::Warning, ViolationKind::Transport,
///     "datagram of {} bytes exceeds {}", 1600, 1500);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};
}

/// Like [`report_violation!`], but also forwards to an optional session observer
/// (`&Option<Arc<dyn ViolationObserver>>`).
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}
