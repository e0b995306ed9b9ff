use slice_deque::SliceDeque;
use std::io;

type ByteDeque = SliceDeque<u8>;

// Capacity is rounded up to a whole number of 64k blocks so the mirrored
// allocation always covers full pages.
const BUF_BLOCK_SIZE: usize = 65536;

/// Bounded FIFO byte queue used for socket read/write staging. Data is
/// appended at the tail and consumed from the head; both sides expose
/// contiguous slices so the codec and the socket can work in place.
pub struct Buffer {
    data: ByteDeque,
    capacity: usize,
}

impl Buffer {
    pub fn new(min_capacity: usize) -> Buffer {
        let blocks = (min_capacity + BUF_BLOCK_SIZE - 1) / BUF_BLOCK_SIZE;
        let capacity = blocks.max(1) * BUF_BLOCK_SIZE;

        let mut data = ByteDeque::new();
        data.reserve(capacity);

        Buffer { data, capacity }
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Free space up to the fixed capacity bound.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Contiguous view of the buffered bytes.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Discard `count` bytes from the head.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.data.len());
        unsafe { self.data.move_head(count as isize) }
    }

    #[inline]
    pub fn clear(&mut self) {
        let len = self.len();
        self.consume(len);
    }

    /// Append a byte slice. Returns false without writing when the slice
    /// does not fit in the remaining capacity.
    #[inline]
    pub fn push_bytes(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free_capacity() {
            return false;
        }

        self.data.extend_from_slice(bytes);
        true
    }

    /// Drain buffered bytes into the supplied writer until empty or the
    /// writer refuses progress. Returns the number of bytes written.
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let orig_len = self.data.len();

        while !self.data.is_empty() {
            let written = writer.write(self.data.as_slice())?;

            if written == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            self.consume(written);
        }

        Ok(orig_len)
    }

    /// Fill the buffer from the supplied reader until the capacity bound is
    /// reached or the reader has nothing more. Returns the bytes read; a
    /// clean EOF surfaces as `UnexpectedEof` so callers treat it as a closed
    /// peer rather than an idle one.
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let orig_len = self.data.len();

        while self.data.len() < self.capacity {
            unsafe {
                let read = reader.read(self.data.tail_head_slice())?;

                if read == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }

                self.data.move_tail(read as isize);
            }
        }

        Ok(self.data.len() - orig_len)
    }
}
