//! Event system for UI decoupling.
//!
//! Allows callers to follow protocol progress without tight coupling to the
//! state machines.

use std::fmt;
use std::sync::Mutex;

use crate::transport::Attribute;

/// Session phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Channel handed over, nothing done yet.
    Idle,
    /// Session authentication (external).
    Authenticating,
    /// Confirmation tone (external).
    Confirming,
    /// Firmware transfer in progress.
    FirmwareUpdate,
    /// Log read-out in progress.
    LogRetrieval,
    /// Exchange finished.
    Complete,
    /// Exchange aborted.
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Authenticating => write!(f, "Authenticating"),
            Phase::Confirming => write!(f, "Confirming"),
            Phase::FirmwareUpdate => write!(f, "Firmware Update"),
            Phase::LogRetrieval => write!(f, "Log Retrieval"),
            Phase::Complete => write!(f, "Complete"),
            Phase::Error => write!(f, "Error"),
        }
    }
}

/// Attribute access direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Write (Host -> Device)
    Rx, // Read (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted during a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Phase changed.
    PhaseChanged { from: Phase, to: Phase },
    /// Progress update for current operation.
    Progress {
        phase: Phase,
        operation: String,
        current: u64,
        total: u64,
    },
    /// Decoded device log text, as each block arrives.
    LogText(String),
    /// Attribute written or read.
    Packet {
        direction: PacketDirection,
        attribute: Attribute,
        length: usize,
    },
    /// Error occurred.
    Error { message: String },
    /// Exchange completed successfully.
    Complete,
}

/// Observer trait for receiving session events.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_event(&self, _event: &Event) {}
}

/// Observer that records every event, for tests and post-run reports.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Observer for RecordingObserver {
    fn on_event(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &Event) {
        match event {
            Event::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            Event::Progress {
                phase,
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    100
                };
                tracing::debug!(phase = %phase, operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            Event::LogText(text) => {
                tracing::debug!(len = text.len(), "Log block");
            }
            Event::Packet {
                direction,
                attribute,
                length,
            } => {
                tracing::trace!(dir = %direction, attribute = %attribute, len = length, "Attribute access");
            }
            Event::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            Event::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}
