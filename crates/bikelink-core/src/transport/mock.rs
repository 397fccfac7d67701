//! Mock attribute channel for testing.

use std::collections::{HashMap, VecDeque};

use super::traits::{Attribute, AttributeChannel, TransportError};

/// What the mock does on a given write or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Fail,
    Hang,
}

/// Scripted in-memory device for unit testing the protocol state machines.
#[derive(Debug, Default)]
pub struct MockChannel {
    /// Queued values returned by reads, per attribute.
    read_queue: HashMap<Attribute, VecDeque<Vec<u8>>>,
    /// Captured writes, in order.
    write_log: Vec<(Attribute, Vec<u8>)>,
    /// Reads issued, in order.
    read_log: Vec<Attribute>,
    /// Faults keyed by (attribute, 1-based write number for that attribute).
    write_faults: HashMap<(Attribute, usize), Fault>,
    /// Faults keyed by (attribute, 1-based read number for that attribute).
    read_faults: HashMap<(Attribute, usize), Fault>,
    write_counts: HashMap<Attribute, usize>,
    read_counts: HashMap<Attribute, usize>,
    disconnected: bool,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a value to be returned by the next read of `attribute`.
    pub fn queue_read(&mut self, attribute: Attribute, data: &[u8]) -> &mut Self {
        self.read_queue
            .entry(attribute)
            .or_default()
            .push_back(data.to_vec());
        self
    }

    /// Fail the `nth` (1-based) write to `attribute`.
    pub fn fail_write(&mut self, attribute: Attribute, nth: usize) -> &mut Self {
        self.write_faults.insert((attribute, nth), Fault::Fail);
        self
    }

    /// Never complete the `nth` (1-based) write to `attribute`.
    pub fn hang_write(&mut self, attribute: Attribute, nth: usize) -> &mut Self {
        self.write_faults.insert((attribute, nth), Fault::Hang);
        self
    }

    /// Fail the `nth` (1-based) read of `attribute`.
    pub fn fail_read(&mut self, attribute: Attribute, nth: usize) -> &mut Self {
        self.read_faults.insert((attribute, nth), Fault::Fail);
        self
    }

    /// Never complete the `nth` (1-based) read of `attribute`.
    pub fn hang_read(&mut self, attribute: Attribute, nth: usize) -> &mut Self {
        self.read_faults.insert((attribute, nth), Fault::Hang);
        self
    }

    /// Get all captured writes.
    pub fn writes(&self) -> &[(Attribute, Vec<u8>)] {
        &self.write_log
    }

    /// Captured writes to one attribute.
    pub fn writes_to(&self, attribute: Attribute) -> Vec<Vec<u8>> {
        self.write_log
            .iter()
            .filter(|(a, _)| *a == attribute)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn reads(&self) -> &[Attribute] {
        &self.read_log
    }

    /// Simulate device disconnect.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    pub fn reconnect(&mut self) {
        self.disconnected = false;
    }
}

impl AttributeChannel for MockChannel {
    async fn write(&mut self, attribute: Attribute, data: &[u8]) -> Result<(), TransportError> {
        if self.disconnected {
            return Err(TransportError::Disconnected);
        }
        let count = self.write_counts.entry(attribute).or_default();
        *count += 1;
        match self.write_faults.get(&(attribute, *count)).copied() {
            Some(Fault::Fail) => {
                return Err(TransportError::WriteFailed {
                    attribute,
                    message: "injected failure".into(),
                });
            }
            Some(Fault::Hang) => std::future::pending::<()>().await,
            None => {}
        }
        self.write_log.push((attribute, data.to_vec()));
        Ok(())
    }

    async fn read(&mut self, attribute: Attribute) -> Result<Vec<u8>, TransportError> {
        if self.disconnected {
            return Err(TransportError::Disconnected);
        }
        let count = self.read_counts.entry(attribute).or_default();
        *count += 1;
        match self.read_faults.get(&(attribute, *count)).copied() {
            Some(Fault::Fail) => {
                return Err(TransportError::ReadFailed {
                    attribute,
                    message: "injected failure".into(),
                });
            }
            Some(Fault::Hang) => std::future::pending::<()>().await,
            None => {}
        }
        self.read_log.push(attribute);
        self.read_queue
            .get_mut(&attribute)
            .and_then(VecDeque::pop_front)
            .ok_or(TransportError::Timeout { timeout_ms: 5000 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_read_queue() {
        let mut mock = MockChannel::new();
        mock.queue_read(Attribute::LogMode, &[1])
            .queue_read(Attribute::LogMode, &[2]);

        assert_eq!(mock.read(Attribute::LogMode).await.unwrap(), vec![1]);
        assert_eq!(mock.read(Attribute::LogMode).await.unwrap(), vec![2]);

        // Queue is empty now
        assert!(matches!(
            mock.read(Attribute::LogMode).await,
            Err(TransportError::Timeout { .. })
        ));
        assert!(mock.read(Attribute::LogSize).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_write_capture_and_faults() {
        let mut mock = MockChannel::new();
        mock.fail_write(Attribute::FirmwareBlock, 2);

        mock.write(Attribute::FirmwareMetadata, b"hdr").await.unwrap();
        mock.write(Attribute::FirmwareBlock, b"one").await.unwrap();
        assert!(mock.write(Attribute::FirmwareBlock, b"two").await.is_err());
        mock.write(Attribute::FirmwareBlock, b"three").await.unwrap();

        assert_eq!(mock.writes().len(), 3);
        assert_eq!(
            mock.writes_to(Attribute::FirmwareBlock),
            vec![b"one".to_vec(), b"three".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_mock_disconnect() {
        let mut mock = MockChannel::new();
        mock.disconnect();
        assert!(matches!(
            mock.write(Attribute::LogBlock, b"x").await,
            Err(TransportError::Disconnected)
        ));
        mock.reconnect();
        assert!(mock.write(Attribute::LogBlock, b"x").await.is_ok());
    }
}
