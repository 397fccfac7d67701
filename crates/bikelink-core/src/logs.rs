//! Log retrieval protocol.
//!
//! `INIT -> MODE_READ -> SIZE_READ -> PAGING -> DONE`, or `FAILED`.
//!
//! The device has no end-of-stream marker: the host keeps requesting blocks
//! by offset until its running offset reaches the reported size. A response
//! that would not move the offset ends the run as stalled.
//!
//! Failures during paging keep whatever text was captured so far.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{Event, Observer, Phase};
use crate::protocol::codec::{EncodingError, decode_u8, decode_u32_be};
use crate::protocol::constants::LOG_RECORD_SIZE;
use crate::protocol::header::LogBlockRequest;
use crate::state::LogState;
use crate::state::machine::goto;
use crate::transport::{Attribute, AttributeChannel, TransportError};

/// How the request offset moves after each response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetAdvance {
    /// By the number of 16-byte records returned. What deployed devices expect.
    #[default]
    Records,
    /// By the number of bytes returned.
    Bytes,
}

impl OffsetAdvance {
    fn step(&self, response_len: usize) -> u32 {
        let step = match self {
            OffsetAdvance::Records => response_len / LOG_RECORD_SIZE,
            OffsetAdvance::Bytes => response_len,
        };
        u32::try_from(step).unwrap_or(u32::MAX)
    }
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Malformed field at offset {offset}: {source}")]
    Encoding {
        offset: u32,
        source: EncodingError,
    },
    #[error("Transport failure at offset {offset}: {source}")]
    Transport {
        offset: u32,
        source: TransportError,
    },
    #[error("Non-ASCII byte 0x{byte:02X} at position {position} of block at offset {offset}")]
    Decode { offset: u32, position: usize, byte: u8 },
    #[error("Pagination stalled at offset {offset}: {len}-byte response does not advance")]
    StalledPagination { offset: u32, len: usize },
}

impl LogError {
    /// Offset reached when the error happened.
    pub fn offset(&self) -> u32 {
        match self {
            LogError::Encoding { offset, .. }
            | LogError::Transport { offset, .. }
            | LogError::Decode { offset, .. }
            | LogError::StalledPagination { offset, .. } => *offset,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            LogError::Transport {
                source: TransportError::Cancelled,
                ..
            }
        )
    }
}

/// Log text read out of the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogCapture {
    /// Informational mode byte, if it was read.
    pub mode: Option<u8>,
    /// Size reported by the device, if it was read.
    pub size: Option<u32>,
    /// Offset reached.
    pub offset: u32,
    /// Number of LOG_BLOCK requests issued.
    pub requests: usize,
    pub text: String,
}

/// Failed retrieval, with the text captured before the failure.
#[derive(Error, Debug)]
#[error("Log retrieval failed: {error} ({} bytes captured)", .capture.text.len())]
pub struct PartialLog {
    pub capture: LogCapture,
    #[source]
    pub error: LogError,
}

/// Log retrieval state machine.
#[derive(Debug, Default)]
pub struct LogRetrieval {
    state: LogState,
    advance: OffsetAdvance,
    capture: LogCapture,
}

impl LogRetrieval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_advance(advance: OffsetAdvance) -> Self {
        Self {
            advance,
            ..Self::default()
        }
    }

    pub fn state(&self) -> LogState {
        self.state
    }

    /// Progress so far, including after a failure or cancellation.
    pub fn capture(&self) -> &LogCapture {
        &self.capture
    }

    /// Run the read-out from `INIT`.
    #[instrument(skip_all, fields(advance = ?self.advance))]
    pub async fn run<C, O>(&mut self, channel: &mut C, observer: &O) -> Result<LogCapture, PartialLog>
    where
        C: AttributeChannel,
        O: Observer + ?Sized,
    {
        self.capture = LogCapture::default();
        goto(&mut self.state, LogState::Init);

        let mode = match channel.read(Attribute::LogMode).await {
            Ok(bytes) => decode_u8("log mode", &bytes).map_err(|source| LogError::Encoding {
                offset: 0,
                source,
            }),
            Err(source) => Err(LogError::Transport { offset: 0, source }),
        };
        let mode = mode.map_err(|e| self.fail(e))?;
        self.capture.mode = Some(mode);
        goto(&mut self.state, LogState::ModeRead);
        info!(mode, "Log mode");

        let size = match channel.read(Attribute::LogSize).await {
            Ok(bytes) => decode_u32_be("log size", &bytes).map_err(|source| LogError::Encoding {
                offset: 0,
                source,
            }),
            Err(source) => Err(LogError::Transport { offset: 0, source }),
        };
        let size = size.map_err(|e| self.fail(e))?;
        self.capture.size = Some(size);
        goto(&mut self.state, LogState::SizeRead);
        info!(size, "Log size");

        if size == 0 {
            goto(&mut self.state, LogState::Done);
            return Ok(self.capture.clone());
        }

        goto(&mut self.state, LogState::Paging);
        while self.capture.offset < size {
            let offset = self.capture.offset;
            let block = self.fetch_block(channel, offset).await.map_err(|e| self.fail(e))?;

            observer.on_event(&Event::LogText(block.text.clone()));
            self.capture.text.push_str(&block.text);

            let step = self.advance.step(block.len);
            if step == 0 {
                return Err(self.fail(LogError::StalledPagination {
                    offset,
                    len: block.len,
                }));
            }
            self.capture.offset = offset.saturating_add(step);
            debug!(offset = self.capture.offset, len = block.len, "Log block");

            observer.on_event(&Event::Progress {
                phase: Phase::LogRetrieval,
                operation: "log block".to_string(),
                current: u64::from(self.capture.offset.min(size)),
                total: u64::from(size),
            });
        }

        goto(&mut self.state, LogState::Done);
        info!(
            requests = self.capture.requests,
            bytes = self.capture.text.len(),
            "Log retrieval complete"
        );
        Ok(self.capture.clone())
    }

    async fn fetch_block<C: AttributeChannel>(
        &mut self,
        channel: &mut C,
        offset: u32,
    ) -> Result<Block, LogError> {
        let request = LogBlockRequest::new(offset);
        self.capture.requests += 1;
        channel
            .write(Attribute::LogBlock, &request.to_bytes())
            .await
            .map_err(|source| LogError::Transport { offset, source })?;

        let bytes = channel
            .read(Attribute::LogBlock)
            .await
            .map_err(|source| LogError::Transport { offset, source })?;
        if bytes.is_empty() {
            return Err(LogError::StalledPagination { offset, len: 0 });
        }

        let text = decode_ascii(&bytes).map_err(|(position, byte)| LogError::Decode {
            offset,
            position,
            byte,
        })?;
        Ok(Block {
            len: bytes.len(),
            text,
        })
    }

    /// Abort an in-flight run whose future was dropped, keeping the partial text.
    pub fn cancel(&mut self) -> PartialLog {
        let offset = self.capture.offset;
        self.fail(LogError::Transport {
            offset,
            source: TransportError::Cancelled,
        })
    }

    fn fail(&mut self, error: LogError) -> PartialLog {
        warn!(offset = error.offset(), error = %error, "Log retrieval aborted");
        goto(&mut self.state, LogState::Failed);
        PartialLog {
            capture: self.capture.clone(),
            error,
        }
    }
}

struct Block {
    len: usize,
    text: String,
}

/// Strict ASCII decode; reports the first offending position and byte.
fn decode_ascii(bytes: &[u8]) -> Result<String, (usize, u8)> {
    if let Some(position) = bytes.iter().position(|b| !b.is_ascii()) {
        return Err((position, bytes[position]));
    }
    Ok(bytes.iter().map(|&b| b as char).collect())
}
