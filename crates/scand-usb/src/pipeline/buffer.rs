//! Staging buffer between the device and the reader

use bytes::{Bytes, BytesMut};
use scand_core::{ScanError, ScanResult};

/// Rendered scanlines of one fill cycle
///
/// `delivered <= produced <= capacity` always holds; the pipeline only asks
/// the device for more once everything produced has been delivered.
#[derive(Debug)]
pub struct AcquisitionBuffer {
    data: BytesMut,
    line_bytes: usize,
    capacity: usize,
    produced: usize,
    delivered: usize,
}

impl AcquisitionBuffer {
    /// Buffer holding up to `capacity_lines` lines of `line_bytes` bytes
    pub fn new(line_bytes: usize, capacity_lines: usize) -> Self {
        let capacity = line_bytes * capacity_lines;
        Self {
            data: BytesMut::with_capacity(capacity),
            line_bytes,
            capacity,
            produced: 0,
            delivered: 0,
        }
    }

    pub fn line_bytes(&self) -> usize {
        self.line_bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn produced(&self) -> usize {
        self.produced
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Bytes produced but not yet delivered
    pub fn available(&self) -> usize {
        self.produced - self.delivered
    }

    pub fn is_drained(&self) -> bool {
        self.delivered == self.produced
    }

    /// Start a new fill cycle; only valid once drained
    pub fn clear(&mut self) {
        debug_assert!(self.is_drained());
        self.data.clear();
        self.produced = 0;
        self.delivered = 0;
    }

    /// Append one rendered line
    pub fn push_line(&mut self, line: &[u8]) -> ScanResult<()> {
        if line.len() != self.line_bytes {
            return Err(ScanError::io(format!(
                "rendered line of {} bytes, expected {}",
                line.len(),
                self.line_bytes
            )));
        }
        if self.produced + line.len() > self.capacity {
            return Err(ScanError::io(format!(
                "block overflows the {} byte acquisition buffer",
                self.capacity
            )));
        }
        self.data.extend_from_slice(line);
        self.produced += line.len();
        Ok(())
    }

    /// Hand out at most `max` undelivered bytes; never waits
    pub fn consume(&mut self, max: usize) -> Bytes {
        let n = max.min(self.available());
        if n == 0 {
            return Bytes::new();
        }
        self.delivered += n;
        self.data.split_to(n).freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn filled(lines: usize, line_bytes: usize) -> AcquisitionBuffer {
        let mut buffer = AcquisitionBuffer::new(line_bytes, lines + 1);
        for i in 0..lines {
            buffer.push_line(&vec![i as u8; line_bytes]).unwrap();
        }
        buffer
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(10)]
    #[case(64)]
    #[case(1000)]
    fn test_consume_never_overtakes_produce(#[case] chunk: usize) {
        let mut buffer = filled(4, 10);
        let mut out = Vec::new();
        while !buffer.is_drained() {
            let before = buffer.delivered();
            let piece = buffer.consume(chunk);
            assert!(piece.len() <= chunk);
            assert!(!piece.is_empty());
            assert!(buffer.delivered() > before);
            assert!(buffer.delivered() <= buffer.produced());
            assert!(buffer.produced() <= buffer.capacity());
            out.extend_from_slice(&piece);
        }
        assert_eq!(out.len(), 40);
        assert_eq!(&out[10..20], &[1u8; 10]);
        assert!(buffer.consume(chunk).is_empty());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut buffer = AcquisitionBuffer::new(4, 1);
        buffer.push_line(&[0; 4]).unwrap();
        assert!(buffer.push_line(&[0; 4]).is_err());
        assert!(buffer.push_line(&[0; 3]).is_err());
    }

    #[test]
    fn test_clear_starts_new_cycle() {
        let mut buffer = filled(2, 3);
        buffer.consume(usize::MAX);
        buffer.clear();
        assert_eq!(buffer.produced(), 0);
        buffer.push_line(&[9; 3]).unwrap();
        assert_eq!(&buffer.consume(2)[..], &[9, 9]);
        assert_eq!(buffer.available(), 1);
    }
}
