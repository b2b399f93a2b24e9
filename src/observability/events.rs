//! Structured security events.
//!
//! # Responsibilities
//! - Define the event shape consumed by the external audit module
//! - Deliver events through a pluggable [`EventSink`]
//!
//! # Security Constraints
//! - Events never carry payload text, matched fragments or key material

use serde::Serialize;
use tokio::sync::mpsc;

use crate::crypto::KeyEvent;
use crate::resilience::BreakerState;
use crate::threat::{ThreatFamily, ThreatLevel};

/// An observable security decision or state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    ThreatDetected {
        principal_id: String,
        dependency: String,
        threat_level: ThreatLevel,
        families: Vec<ThreatFamily>,
        finding_count: usize,
        blocked: bool,
    },
    RateLimited {
        principal_id: String,
        retry_after_ms: u64,
        escalated: bool,
    },
    QueueFull {
        principal_id: String,
        dependency: String,
        reason: String,
        max_concurrent: usize,
        max_queue: usize,
    },
    CircuitOpen {
        dependency: String,
        retry_after_ms: Option<u64>,
    },
    CircuitTransition {
        dependency: String,
        from: BreakerState,
        to: BreakerState,
    },
    KeyLifecycle {
        key_id: String,
        transition: KeyEvent,
    },
}

impl SecurityEvent {
    /// Event name as it appears in the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            SecurityEvent::ThreatDetected { .. } => "threat_detected",
            SecurityEvent::RateLimited { .. } => "rate_limited",
            SecurityEvent::QueueFull { .. } => "queue_full",
            SecurityEvent::CircuitOpen { .. } => "circuit_open",
            SecurityEvent::CircuitTransition { .. } => "circuit_transition",
            SecurityEvent::KeyLifecycle { .. } => "key_lifecycle",
        }
    }
}

/// Destination for security events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SecurityEvent);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SecurityEvent) {
        match &event {
            SecurityEvent::ThreatDetected {
                principal_id,
                threat_level,
                finding_count,
                blocked,
                ..
            } => tracing::warn!(
                event = event.name(),
                principal = %principal_id,
                level = %threat_level,
                findings = finding_count,
                blocked = blocked,
                "Threat detected"
            ),
            SecurityEvent::RateLimited {
                principal_id,
                retry_after_ms,
                escalated,
            } => tracing::warn!(
                event = event.name(),
                principal = %principal_id,
                retry_after_ms = retry_after_ms,
                escalated = escalated,
                "Rate limit exceeded"
            ),
            SecurityEvent::QueueFull { dependency, reason, .. } => tracing::warn!(
                event = event.name(),
                dependency = %dependency,
                reason = %reason,
                "Admission rejected"
            ),
            SecurityEvent::CircuitOpen { dependency, .. } => tracing::debug!(
                event = event.name(),
                dependency = %dependency,
                "Call rejected by open circuit"
            ),
            SecurityEvent::CircuitTransition { dependency, from, to } => tracing::info!(
                event = event.name(),
                dependency = %dependency,
                from = ?from,
                to = ?to,
                "Circuit state changed"
            ),
            SecurityEvent::KeyLifecycle { key_id, transition } => tracing::info!(
                event = event.name(),
                key_id = %key_id,
                transition = ?transition,
                "Key lifecycle transition"
            ),
        }
    }
}

/// Forwards events to an async consumer such as an audit writer.
///
/// Events are also written to tracing so nothing is lost if the receiver
/// is dropped.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<SecurityEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SecurityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: SecurityEvent) {
        TracingEventSink.emit(event.clone());
        let _ = self.tx.send(event);
    }
}
