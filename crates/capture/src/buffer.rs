use std::io::{self, Write};

/// An in-memory byte sink with a fixed capacity.
///
/// A write that would take the buffer past its capacity is rejected whole and
/// sets the sticky overflow flag; nothing from it is kept. Once overflowed,
/// every further non-empty write is rejected too, so the contents are always
/// exactly the writes accepted before the first rejection.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    capacity: usize,
    overflow: bool,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
            overflow: false,
        }
    }

    /// Append `bytes` if they fit, returning whether they were accepted.
    pub fn write(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        match self.data.len().checked_add(bytes.len()) {
            Some(size) if size <= self.capacity && !self.overflow => {
                self.data.extend_from_slice(bytes);
                true
            },
            _ => {
                if !self.overflow {
                    tracing::debug!(
                        capacity = self.capacity,
                        size = self.data.len(),
                        rejected = bytes.len(),
                        "buffer overflow"
                    );
                }
                self.overflow = true;
                false
            },
        }
    }

    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Drop the contents, keeping the overflow flag.
    pub fn clear(&mut self) {
        self.data = Vec::new();
    }
}

/// Rejected writes still report every byte as written, so copying a
/// connection into the buffer drains it instead of failing.
impl Write for BoundedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BoundedBuffer::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_overflowing_write_rejected_whole() {
        let mut buffer = BoundedBuffer::new(10);
        assert!(buffer.write(b"hello"));
        assert!(!buffer.is_overflow());
        assert!(!buffer.write(b"how are you?"));
        assert!(buffer.is_overflow());
        assert_eq!(buffer.as_bytes(), b"hello");
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_exact_capacity_then_one_more() {
        let mut buffer = BoundedBuffer::new(10);
        assert!(buffer.write(b"0123456789"));
        assert!(!buffer.is_overflow());
        assert!(!buffer.write(b"x"));
        assert!(buffer.is_overflow());
        assert_eq!(buffer.as_bytes(), b"0123456789");
    }

    #[test]
    fn test_overflow_is_sticky() {
        let mut buffer = BoundedBuffer::new(4);
        assert!(!buffer.write(b"12345"));
        assert!(!buffer.write(b"12"));
        assert!(buffer.write(b""));
        assert!(buffer.is_overflow());
        buffer.clear();
        assert!(buffer.is_overflow());
        assert!(buffer.is_empty());
    }

    #[rstest]
    #[case(10, &[3, 3, 3], false, 9)]
    #[case(10, &[3, 3, 3, 2], true, 9)]
    #[case(10, &[5, 6, 4], true, 5)]
    #[case(0, &[0, 0], false, 0)]
    #[case(0, &[1], true, 0)]
    fn test_size_is_sum_of_accepted(
        #[case] capacity: usize,
        #[case] sizes: &[usize],
        #[case] overflow: bool,
        #[case] expected: usize,
    ) {
        let mut buffer = BoundedBuffer::new(capacity);
        for &size in sizes {
            buffer.write(&vec![b'a'; size]);
        }
        assert_eq!(buffer.is_overflow(), overflow);
        assert_eq!(buffer.len(), expected);
    }

    #[test]
    fn test_io_copy_drains_source() {
        let mut buffer = BoundedBuffer::new(4);
        let mut source: &[u8] = b"more than four bytes";
        let copied = io::copy(&mut source, &mut buffer).unwrap();
        assert_eq!(copied, 20);
        assert!(source.is_empty());
        assert!(buffer.is_overflow());
        assert!(buffer.is_empty());
    }
}
