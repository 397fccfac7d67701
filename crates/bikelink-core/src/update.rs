//! Firmware transfer protocol.
//!
//! `INIT -> HEADER_SENT -> TRANSFERRING -> DONE`, or `FAILED` on any write
//! error or cancellation. There is no resume: a failed transfer restarts from
//! the header.
//!
//! The device acknowledges nothing beyond what the write primitive reports,
//! and nothing reads back what it received. A failed run may have left a
//! partial image on the device; a successful one only means every write
//! completed.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, instrument, trace};

use crate::cipher::{EncryptionKey, compute_header, encrypt_image};
use crate::events::{Event, Observer, Phase};
use crate::payload::{ChunkIterator, FirmwareError, FirmwareImage};
use crate::protocol::constants::MAX_CHUNK_SIZE;
use crate::protocol::header::MetadataHeader;
use crate::state::TransferState;
use crate::state::machine::goto;
use crate::transport::{Attribute, AttributeChannel, TransportError};

/// Write failure during a transfer.
#[derive(Error, Debug)]
#[error("Firmware transfer failed in {state} at offset {offset} (chunk {chunk}): {source}")]
pub struct TransferError {
    /// State in which the failing write was issued.
    pub state: TransferState,
    /// Ciphertext byte offset of the failing chunk.
    pub offset: usize,
    /// Index of the failing chunk.
    pub chunk: usize,
    pub source: TransportError,
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, TransportError::Cancelled)
    }
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub header: MetadataHeader,
    pub bytes_sent: usize,
    pub chunks: usize,
}

/// Firmware transfer state machine.
///
/// The header and ciphertext are prepared on construction, so key and image
/// problems surface before any I/O.
#[derive(Debug)]
pub struct FirmwareTransfer {
    state: TransferState,
    header: MetadataHeader,
    ciphertext: Vec<u8>,
    chunk_size: usize,
    offset: usize,
    chunks_sent: usize,
}

impl FirmwareTransfer {
    pub fn new(image: &FirmwareImage, key: &EncryptionKey) -> Self {
        let header = compute_header(image);
        let ciphertext = encrypt_image(image, key);
        debug!(
            len = header.length,
            crc = %format!("0x{:08x}", header.crc32),
            encrypted_len = ciphertext.len(),
            "Prepared firmware transfer"
        );
        Self {
            state: TransferState::Init,
            header,
            ciphertext,
            chunk_size: MAX_CHUNK_SIZE,
            offset: 0,
            chunks_sent: 0,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, key: &EncryptionKey) -> Result<Self, FirmwareError> {
        Ok(Self::new(&FirmwareImage::from_file(path)?, key))
    }

    /// Use chunks smaller than the 240-byte maximum.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn header(&self) -> &MetadataHeader {
        &self.header
    }

    /// Encrypted, padded stream that is sent as chunks.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Bytes of ciphertext written so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total_chunks(&self) -> usize {
        ChunkIterator::new(&self.ciphertext, self.chunk_size).total()
    }

    /// Run the transfer from `INIT` to completion.
    ///
    /// Any earlier progress is discarded first.
    #[instrument(skip_all, fields(len = self.header.length, chunks = self.total_chunks()))]
    pub async fn run<C, O>(
        &mut self,
        channel: &mut C,
        observer: &O,
    ) -> Result<TransferReport, TransferError>
    where
        C: AttributeChannel,
        O: Observer + ?Sized,
    {
        self.offset = 0;
        self.chunks_sent = 0;
        goto(&mut self.state, TransferState::Init);

        let total = self.ciphertext.len();
        let total_chunks = self.total_chunks();

        info!(header = %hex::encode(self.header.to_bytes()), "Sending metadata header");
        if let Err(source) = channel
            .write(Attribute::FirmwareMetadata, &self.header.to_bytes())
            .await
        {
            return Err(self.fail(source));
        }
        goto(&mut self.state, TransferState::HeaderSent);

        goto(&mut self.state, TransferState::Transferring);
        for (offset, chunk) in ChunkIterator::new(&self.ciphertext, self.chunk_size) {
            trace!(offset, len = chunk.len(), "Writing chunk");
            if let Err(source) = channel.write(Attribute::FirmwareBlock, chunk).await {
                goto(&mut self.state, TransferState::Failed);
                return Err(TransferError {
                    state: TransferState::Transferring,
                    offset,
                    chunk: self.chunks_sent,
                    source,
                });
            }
            self.offset = offset + chunk.len();
            self.chunks_sent += 1;

            observer.on_event(&Event::Progress {
                phase: Phase::FirmwareUpdate,
                operation: format!("chunk {}/{}", self.chunks_sent, total_chunks),
                current: self.offset as u64,
                total: total as u64,
            });
        }

        goto(&mut self.state, TransferState::Done);
        info!(bytes = self.offset, chunks = self.chunks_sent, "Firmware transfer complete");
        Ok(TransferReport {
            header: self.header,
            bytes_sent: self.offset,
            chunks: self.chunks_sent,
        })
    }

    /// Abort an in-flight run whose future was dropped.
    ///
    /// Cancellation counts as a transport failure: the machine ends in
    /// `FAILED`, never `DONE`.
    pub fn cancel(&mut self) -> TransferError {
        self.fail(TransportError::Cancelled)
    }

    fn fail(&mut self, source: TransportError) -> TransferError {
        let state = self.state;
        goto(&mut self.state, TransferState::Failed);
        TransferError {
            state,
            offset: self.offset,
            chunk: self.chunks_sent,
            source,
        }
    }
}
