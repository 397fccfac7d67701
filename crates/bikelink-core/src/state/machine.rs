//! Named states of the two device exchanges.

use std::fmt;

/// Firmware transfer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Image loaded, header computed, nothing sent.
    #[default]
    Init,
    /// Metadata header acknowledged by the write primitive.
    HeaderSent,
    /// Ciphertext chunks being written.
    Transferring,
    /// Every chunk written.
    Done,
    /// Aborted; restart from `Init`.
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Init => write!(f, "INIT"),
            TransferState::HeaderSent => write!(f, "HEADER_SENT"),
            TransferState::Transferring => write!(f, "TRANSFERRING"),
            TransferState::Done => write!(f, "DONE"),
            TransferState::Failed => write!(f, "FAILED"),
        }
    }
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Done | TransferState::Failed)
    }
}

/// Log retrieval states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogState {
    #[default]
    Init,
    ModeRead,
    SizeRead,
    Paging,
    Done,
    Failed,
}

impl fmt::Display for LogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogState::Init => write!(f, "INIT"),
            LogState::ModeRead => write!(f, "MODE_READ"),
            LogState::SizeRead => write!(f, "SIZE_READ"),
            LogState::Paging => write!(f, "PAGING"),
            LogState::Done => write!(f, "DONE"),
            LogState::Failed => write!(f, "FAILED"),
        }
    }
}

impl LogState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogState::Done | LogState::Failed)
    }
}

/// Transition to a new state.
pub(crate) fn goto<S: fmt::Display + Copy + PartialEq>(state: &mut S, next: S) {
    if *state != next {
        tracing::info!(from = %*state, to = %next, "State transition");
    }
    *state = next;
}
