//! Mock serial link for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{SerialLink, TransportError};

/// Mock link for unit testing framing logic.
///
/// Clones share state, so a test can keep one handle while the transport owns
/// the other.
#[derive(Clone)]
pub struct MockLink {
    /// Chunks handed out one per read.
    read_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Bytes already sitting in the input buffer; read first, dropped by
    /// `clear_input`.
    buffered: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    connected: Arc<Mutex<bool>>,
    name: String,
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            read_queue: Arc::new(Mutex::new(VecDeque::new())),
            buffered: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            name: "mock".to_string(),
        }
    }

    /// Queue bytes to be returned by a later read.
    pub fn queue_reply(&self, bytes: &[u8]) {
        self.read_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue a frame split into several reads.
    pub fn queue_chunked(&self, bytes: &[u8], chunk: usize) {
        let mut queue = self.read_queue.lock().unwrap();
        for part in bytes.chunks(chunk.max(1)) {
            queue.push_back(part.to_vec());
        }
    }

    /// Put bytes in the input buffer as if they arrived before the next write.
    pub fn queue_buffered(&self, bytes: &[u8]) {
        self.buffered.lock().unwrap().push_back(bytes.to_vec());
    }

    pub fn pending_replies(&self) -> usize {
        self.buffered.lock().unwrap().len() + self.read_queue.lock().unwrap().len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate the interface being unplugged.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for MockLink {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let mut buffered = self.buffered.lock().unwrap();
        let mut replies = self.read_queue.lock().unwrap();
        let queue = if buffered.is_empty() {
            &mut *replies
        } else {
            &mut *buffered
        };
        let Some(mut chunk) = queue.pop_front() else {
            return Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            queue.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.buffered.lock().unwrap().clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(10);

    #[test]
    fn test_mock_read_queue() {
        let mut mock = MockLink::new();
        mock.queue_reply(&[1, 2, 3]);
        mock.queue_reply(&[4]);

        let mut buf = [0u8; 8];
        assert_eq!(mock.read(&mut buf, WAIT).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(mock.read(&mut buf, WAIT).unwrap(), 1);

        // Queue is empty now
        assert!(matches!(
            mock.read(&mut buf, WAIT),
            Err(TransportError::Timeout { timeout_ms: 10 })
        ));
    }

    #[test]
    fn test_mock_small_buffer_keeps_remainder() {
        let mut mock = MockLink::new();
        mock.queue_reply(&[1, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        assert_eq!(mock.read(&mut buf, WAIT).unwrap(), 2);
        assert_eq!(mock.pending_replies(), 1);
        assert_eq!(mock.read(&mut buf, WAIT).unwrap(), 2);
        assert_eq!(mock.read(&mut buf, WAIT).unwrap(), 1);
        assert_eq!(buf[0], 5);
    }

    #[test]
    fn test_writes_logged_through_clones() {
        let mut link = MockLink::new();
        let observer = link.clone();
        link.write(&[0xA5, 0x14, 0x00, 0x00, 0xB9, 0x72]).unwrap();
        link.write(&[0xA5, 0x10]).unwrap();

        let writes = observer.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0][1], 0x14);
        observer.clear_writes();
        assert!(link.get_writes().is_empty());
    }

    #[test]
    fn test_chunked_reply_and_reconnect() {
        let mut link = MockLink::new();
        link.queue_chunked(&[9, 8, 7, 6, 5], 2);
        assert_eq!(link.pending_replies(), 3);

        link.disconnect();
        let mut buf = [0u8; 8];
        assert!(matches!(link.read(&mut buf, WAIT), Err(TransportError::Disconnected)));
        assert!(matches!(link.write(&[1]), Err(TransportError::Disconnected)));

        link.reconnect();
        assert_eq!(link.read(&mut buf, WAIT).unwrap(), 2);
        assert_eq!(&buf[..2], &[9, 8]);
    }

    #[test]
    fn test_clear_input_drops_only_buffered_bytes() {
        let mut link = MockLink::new();
        link.queue_buffered(&[0xEE, 0xEE]);
        link.queue_reply(&[1, 2]);
        assert_eq!(link.pending_replies(), 2);

        link.clear_input().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(link.read(&mut buf, WAIT).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn test_buffered_bytes_read_first() {
        let mut link = MockLink::new();
        link.queue_reply(&[1]);
        link.queue_buffered(&[9]);
        let mut buf = [0u8; 4];
        link.read(&mut buf, WAIT).unwrap();
        assert_eq!(buf[0], 9);
        link.read(&mut buf, WAIT).unwrap();
        assert_eq!(buf[0], 1);
    }
}
