//! The single-slot handoff between a producer and the transport.

/// The buffer currently being drained by the transport, with a read cursor.
///
/// Bytes before the cursor have already been handed to the transport. A
/// producer may only replace the buffer once the cursor has reached the end,
/// which makes the buffer behave like a queue of capacity one: the producer
/// supplies a whole buffer, the transport consumes it piecewise, and the
/// producer gets the emptied allocation back on the next swap.
#[derive(Debug, Default)]
pub struct DoubleBuffer {
    bytes: Vec<u8>,
    /// Invariant: `cursor <= bytes.len()`
    cursor: usize,
}

impl DoubleBuffer {
    /// Creates an empty, fully drained buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    /// The bytes not yet delivered to the transport.
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.cursor..]
    }

    /// Whether every byte of the current buffer has been delivered.
    pub fn is_drained(&self) -> bool {
        self.cursor == self.bytes.len()
    }

    /// The total length of the current buffer, delivered or not.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the current buffer holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The number of bytes already delivered from the current buffer.
    pub fn delivered(&self) -> usize {
        self.cursor
    }

    /// Copies as many undelivered bytes as fit into `out` and advances the
    /// cursor past them. Returns the number of bytes copied.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let remaining = self.remaining();
        let count = remaining.len().min(out.len());
        out[..count].copy_from_slice(&remaining[..count]);
        self.cursor += count;
        count
    }

    /// Installs `next` as the current buffer and returns the previous
    /// allocation, cleared, so the producer can refill it without allocating.
    ///
    /// Callers must only swap a drained buffer. Swapping early would drop
    /// undelivered bytes.
    pub fn swap(&mut self, next: Vec<u8>) -> Vec<u8> {
        debug_assert!(self.is_drained(), "swapped a buffer with undelivered bytes");
        let mut previous = std::mem::replace(&mut self.bytes, next);
        previous.clear();
        self.cursor = 0;
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_drained() {
        let buffer = DoubleBuffer::with_capacity(16);
        assert!(buffer.is_drained());
        assert!(buffer.is_empty());
        assert_eq!(buffer.remaining(), b"");
    }

    #[test]
    fn read_advances_cursor() {
        let mut buffer = DoubleBuffer::default();
        buffer.swap(b"abcdef".to_vec());
        let mut out = [0u8; 4];

        assert_eq!(buffer.read_into(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(buffer.delivered(), 4);
        assert_eq!(buffer.remaining(), b"ef");
        assert!(!buffer.is_drained());

        assert_eq!(buffer.read_into(&mut out), 2);
        assert_eq!(&out[..2], b"ef");
        assert!(buffer.is_drained());
        assert_eq!(buffer.read_into(&mut out), 0);
        assert_eq!(buffer.delivered(), buffer.len());
    }

    #[test]
    fn swap_returns_cleared_allocation() {
        let mut buffer = DoubleBuffer::default();
        buffer.swap(Vec::with_capacity(64));
        let mut drain = [0u8; 8];
        buffer.read_into(&mut drain);

        let first = buffer.swap(b"data".to_vec());
        assert!(first.is_empty());
        assert!(first.capacity() >= 64);

        buffer.read_into(&mut drain);
        let second = buffer.swap(Vec::new());
        assert!(second.is_empty());
        assert!(second.capacity() >= 4);
        assert_eq!(buffer.delivered(), 0);
    }

    #[test]
    fn empty_read_target_copies_nothing() {
        let mut buffer = DoubleBuffer::default();
        buffer.swap(b"xyz".to_vec());
        assert_eq!(buffer.read_into(&mut []), 0);
        assert_eq!(buffer.remaining(), b"xyz");
    }
}
