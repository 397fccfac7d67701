//! Session - thin orchestrator around the two exchanges.
//!
//! Sequences authenticate, confirmation tone, then one protocol run against
//! a channel the caller has already connected. Only one exchange may run per
//! device at a time; the `&mut` channel borrow enforces that here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::cipher::{CipherError, EncryptionKey};
use crate::events::{Event, Observer, PacketDirection, Phase, TracingObserver};
use crate::logs::{LogCapture, LogRetrieval, OffsetAdvance, PartialLog};
use crate::payload::FirmwareImage;
use crate::protocol::constants::MAX_CHUNK_SIZE;
use crate::transport::{Attribute, AttributeChannel, BtleChannel, TransportError, default_adapter};
use crate::update::{FirmwareTransfer, TransferError, TransferReport};

/// Configuration for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Firmware encryption key, 32 hex digits.
    pub key: Option<String>,
    /// Device name or address filter. Unset matches any unit advertising the
    /// firmware or maintenance service.
    pub device: Option<String>,
    /// How long to scan before picking a device.
    pub scan_timeout_secs: u64,
    /// Play the confirmation tone after authenticating.
    pub confirm_tone: bool,
    /// Ciphertext bytes per BLOCK write, at most 240.
    pub chunk_size: usize,
    /// Log offset advance rule.
    pub log_offset_advance: OffsetAdvance,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: None,
            device: None,
            scan_timeout_secs: 5,
            confirm_tone: true,
            chunk_size: MAX_CHUNK_SIZE,
            log_offset_advance: OffsetAdvance::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parsed firmware key, if configured.
    pub fn encryption_key(&self) -> Result<Option<EncryptionKey>, CipherError> {
        self.key.as_deref().map(EncryptionKey::from_hex).transpose()
    }
}

/// Session authentication, supplied by the integrator.
///
/// Must leave the channel authenticated before any protocol run.
pub trait Authenticator<C: AttributeChannel>: Send {
    fn authenticate(
        &mut self,
        channel: &mut C,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Play the positive confirmation tone.
    fn confirm(&mut self, channel: &mut C) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Authentication(#[source] TransportError),
    #[error("Confirmation tone failed: {0}")]
    Confirmation(#[source] TransportError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Logs(#[from] PartialLog),
}

/// Orchestrates one exchange at a time.
pub struct Session<O: Observer> {
    config: SessionConfig,
    observer: Arc<O>,
}

impl Session<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: Observer + 'static> Session<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Find the configured device on the default adapter and connect to it.
    ///
    /// The returned channel is not authenticated yet.
    #[instrument(skip_all, fields(device = ?self.config.device))]
    pub async fn connect(&self) -> Result<BtleChannel, TransportError> {
        let adapter = default_adapter().await?;
        let channel = BtleChannel::connect(
            &adapter,
            self.config.device.as_deref(),
            Duration::from_secs(self.config.scan_timeout_secs),
        )
        .await
        .inspect_err(|e| self.report_error(e))?;
        info!("Connected");
        Ok(channel)
    }

    /// Authenticate, confirm, and push `image` to the device.
    ///
    /// If `cancel` completes first the run ends as a failed transfer with a
    /// `Cancelled` source.
    #[instrument(skip_all, fields(len = image.length()))]
    pub async fn update_firmware<C, A, F>(
        &self,
        channel: &mut C,
        auth: &mut A,
        image: &FirmwareImage,
        key: &EncryptionKey,
        cancel: F,
    ) -> Result<TransferReport, SessionError>
    where
        C: AttributeChannel,
        A: Authenticator<C>,
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let previous = self.prepare(channel, auth, &mut cancel).await?;

        self.phase(previous, Phase::FirmwareUpdate);
        let mut transfer =
            FirmwareTransfer::new(image, key).with_chunk_size(self.config.chunk_size);
        let mut observed = ObservableChannel {
            inner: channel,
            observer: self.observer.as_ref(),
        };

        let outcome = tokio::select! {
            result = transfer.run(&mut observed, self.observer.as_ref()) => Some(result),
            _ = &mut cancel => None,
        };
        let result = match outcome {
            Some(result) => result,
            None => Err(transfer.cancel()),
        };

        self.finish(
            Phase::FirmwareUpdate,
            result.as_ref().err().map(|e| e as &dyn std::error::Error),
        );
        Ok(result?)
    }

    /// Authenticate, confirm, and read the device log.
    ///
    /// On failure the error carries the text captured so far.
    #[instrument(skip_all)]
    pub async fn read_logs<C, A, F>(
        &self,
        channel: &mut C,
        auth: &mut A,
        cancel: F,
    ) -> Result<LogCapture, SessionError>
    where
        C: AttributeChannel,
        A: Authenticator<C>,
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let previous = self.prepare(channel, auth, &mut cancel).await?;

        self.phase(previous, Phase::LogRetrieval);
        let mut logs = LogRetrieval::with_advance(self.config.log_offset_advance);
        let mut observed = ObservableChannel {
            inner: channel,
            observer: self.observer.as_ref(),
        };

        let outcome = tokio::select! {
            result = logs.run(&mut observed, self.observer.as_ref()) => Some(result),
            _ = &mut cancel => None,
        };
        let result = match outcome {
            Some(result) => result,
            None => Err(logs.cancel()),
        };

        self.finish(
            Phase::LogRetrieval,
            result.as_ref().err().map(|e| e as &dyn std::error::Error),
        );
        Ok(result?)
    }

    /// Authenticate and optionally confirm. Returns the last phase entered.
    async fn prepare<C, A, F>(
        &self,
        channel: &mut C,
        auth: &mut A,
        cancel: &mut std::pin::Pin<&mut F>,
    ) -> Result<Phase, SessionError>
    where
        C: AttributeChannel,
        A: Authenticator<C>,
        F: Future<Output = ()>,
    {
        self.phase(Phase::Idle, Phase::Authenticating);
        let authenticated = tokio::select! {
            result = auth.authenticate(channel) => result,
            _ = cancel.as_mut() => Err(TransportError::Cancelled),
        };
        if let Err(e) = authenticated {
            self.report_error(&e);
            return Err(SessionError::Authentication(e));
        }
        info!("Session authenticated");

        if !self.config.confirm_tone {
            return Ok(Phase::Authenticating);
        }

        self.phase(Phase::Authenticating, Phase::Confirming);
        let confirmed = tokio::select! {
            result = auth.confirm(channel) => result,
            _ = cancel.as_mut() => Err(TransportError::Cancelled),
        };
        if let Err(e) = confirmed {
            self.report_error(&e);
            return Err(SessionError::Confirmation(e));
        }
        Ok(Phase::Confirming)
    }

    fn phase(&self, from: Phase, to: Phase) {
        self.observer.on_event(&Event::PhaseChanged { from, to });
    }

    fn report_error(&self, error: &dyn std::error::Error) {
        self.observer.on_event(&Event::Error {
            message: error.to_string(),
        });
    }

    fn finish(&self, phase: Phase, error: Option<&dyn std::error::Error>) {
        match error {
            None => {
                self.phase(phase, Phase::Complete);
                self.observer.on_event(&Event::Complete);
            }
            Some(e) => {
                self.report_error(e);
                self.phase(phase, Phase::Error);
            }
        }
    }
}

/// Channel wrapper that emits packet events.
struct ObservableChannel<'a, C: AttributeChannel, O: Observer + ?Sized> {
    inner: &'a mut C,
    observer: &'a O,
}

impl<C: AttributeChannel, O: Observer + ?Sized> AttributeChannel for ObservableChannel<'_, C, O> {
    async fn write(&mut self, attribute: Attribute, data: &[u8]) -> Result<(), TransportError> {
        let res = self.inner.write(attribute, data).await;
        if res.is_ok() {
            self.observer.on_event(&Event::Packet {
                direction: PacketDirection::Tx,
                attribute,
                length: data.len(),
            });
        }
        res
    }

    async fn read(&mut self, attribute: Attribute) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.read(attribute).await;
        if let Ok(data) = &res {
            self.observer.on_event(&Event::Packet {
                direction: PacketDirection::Rx,
                attribute,
                length: data.len(),
            });
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use crate::logs::LogError;
    use crate::protocol::codec::encode_u32_be;
    use crate::state::TransferState;
    use crate::transport::MockChannel;
    use std::time::Duration;

    #[derive(Default)]
    struct MockAuth {
        calls: Vec<&'static str>,
        fail_auth: bool,
    }

    impl Authenticator<MockChannel> for MockAuth {
        async fn authenticate(&mut self, _channel: &mut MockChannel) -> Result<(), TransportError> {
            self.calls.push("authenticate");
            if self.fail_auth {
                return Err(TransportError::Disconnected);
            }
            Ok(())
        }

        async fn confirm(&mut self, _channel: &mut MockChannel) -> Result<(), TransportError> {
            self.calls.push("confirm");
            Ok(())
        }
    }

    fn key() -> EncryptionKey {
        EncryptionKey::new([7u8; 16])
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    fn phases(observer: &RecordingObserver) -> Vec<(Phase, Phase)> {
        observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::PhaseChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_update_sequence() {
        let observer = Arc::new(RecordingObserver::new());
        let session = Session::with_observer(SessionConfig::default(), observer.clone());
        let mut mock = MockChannel::new();
        let mut auth = MockAuth::default();
        let image = FirmwareImage::from_bytes(vec![0x42; 500]).unwrap();

        let report = session
            .update_firmware(&mut mock, &mut auth, &image, &key(), never())
            .await
            .unwrap();

        assert_eq!(auth.calls, ["authenticate", "confirm"]);
        assert_eq!(report.chunks, 3);
        assert_eq!(mock.writes()[0].0, Attribute::FirmwareMetadata);

        assert_eq!(
            phases(&observer),
            [
                (Phase::Idle, Phase::Authenticating),
                (Phase::Authenticating, Phase::Confirming),
                (Phase::Confirming, Phase::FirmwareUpdate),
                (Phase::FirmwareUpdate, Phase::Complete),
            ]
        );

        let events = observer.events();
        assert!(events.contains(&Event::Complete));
        let tx = events
            .iter()
            .filter(|e| matches!(e, Event::Packet { direction: PacketDirection::Tx, .. }))
            .count();
        assert_eq!(tx, 4);
    }

    #[tokio::test]
    async fn test_confirm_tone_disabled() {
        let config = SessionConfig {
            confirm_tone: false,
            ..SessionConfig::default()
        };
        let observer = Arc::new(RecordingObserver::new());
        let session = Session::with_observer(config, observer.clone());
        let mut mock = device_with_log();
        let mut auth = MockAuth::default();

        let capture = session.read_logs(&mut mock, &mut auth, never()).await.unwrap();
        assert_eq!(auth.calls, ["authenticate"]);
        assert_eq!(capture.text, "0123456789abcdef");
        assert_eq!(
            phases(&observer),
            [
                (Phase::Idle, Phase::Authenticating),
                (Phase::Authenticating, Phase::LogRetrieval),
                (Phase::LogRetrieval, Phase::Complete),
            ]
        );
    }

    #[tokio::test]
    async fn test_auth_failure_stops_before_protocol() {
        let session = Session::with_observer(SessionConfig::default(), Arc::new(RecordingObserver::new()));
        let mut mock = MockChannel::new();
        let mut auth = MockAuth {
            fail_auth: true,
            ..MockAuth::default()
        };
        let image = FirmwareImage::from_bytes(vec![1; 16]).unwrap();

        let err = session
            .update_firmware(&mut mock, &mut auth, &image, &key(), never())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Authentication(_)));
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_update_is_failure() {
        let observer = Arc::new(RecordingObserver::new());
        let session = Session::with_observer(SessionConfig::default(), observer.clone());
        let mut mock = MockChannel::new();
        mock.hang_write(Attribute::FirmwareBlock, 3);
        let mut auth = MockAuth::default();
        let image = FirmwareImage::from_bytes(vec![9; 1000]).unwrap();

        let err = session
            .update_firmware(
                &mut mock,
                &mut auth,
                &image,
                &key(),
                tokio::time::sleep(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();

        match err {
            SessionError::Transfer(e) => {
                assert!(e.is_cancelled());
                assert_eq!(e.offset, 480);
                assert_eq!(e.state, TransferState::Transferring);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!observer.events().contains(&Event::Complete));
    }

    #[tokio::test]
    async fn test_cancelled_logs_keep_partial_text() {
        let session = Session::with_observer(
            SessionConfig {
                log_offset_advance: OffsetAdvance::Bytes,
                ..SessionConfig::default()
            },
            Arc::new(RecordingObserver::new()),
        );
        let mut mock = MockChannel::new();
        mock.queue_read(Attribute::LogMode, &[0])
            .queue_read(Attribute::LogSize, &encode_u32_be(64))
            .queue_read(Attribute::LogBlock, b"0123456789abcdef")
            .hang_read(Attribute::LogBlock, 2);
        let mut auth = MockAuth::default();

        let err = session
            .read_logs(
                &mut mock,
                &mut auth,
                tokio::time::sleep(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        match err {
            SessionError::Logs(partial) => {
                assert!(partial.error.is_cancelled());
                assert!(matches!(partial.error, LogError::Transport { offset: 16, .. }));
                assert_eq!(partial.capture.text, "0123456789abcdef");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn device_with_log() -> MockChannel {
        let mut mock = MockChannel::new();
        mock.queue_read(Attribute::LogMode, &[0])
            .queue_read(Attribute::LogSize, &encode_u32_be(1))
            .queue_read(Attribute::LogBlock, b"0123456789abcdef");
        mock
    }

    #[test]
    fn test_config_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = SessionConfig {
            key: Some("000102030405060708090a0b0c0d0e0f".into()),
            device: Some("ES3-0042".into()),
            scan_timeout_secs: 10,
            log_offset_advance: OffsetAdvance::Bytes,
            ..SessionConfig::default()
        };
        config.save_to_file(file.path()).unwrap();
        let loaded = SessionConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.encryption_key().unwrap().is_some());
    }

    #[test]
    fn test_config_defaults_and_bad_key() {
        let config: SessionConfig = toml::from_str("key = \"abcd\"").unwrap();
        assert!(config.confirm_tone);
        assert_eq!(config.chunk_size, MAX_CHUNK_SIZE);
        assert_eq!(config.scan_timeout_secs, 5);
        assert_eq!(config.device, None);
        assert_eq!(config.log_offset_advance, OffsetAdvance::Records);
        assert_eq!(
            config.encryption_key().unwrap_err(),
            CipherError::InvalidKeyLength(2)
        );
        assert_eq!(SessionConfig::default().encryption_key().unwrap(), None);
    }
}
