//! Fixed-capacity stream buffer.
//!
//! The buffer is a single contiguous region with two cursors. Valid bytes live
//! in `data[consume..fill]` and are homogeneous: either look-ahead fetched from
//! the descriptor ([`LastOp::Reading`]) or writes not yet handed to it
//! ([`LastOp::Writing`]). Write data is appended at `fill` and drained from
//! `consume` (which stays at zero between flushes).
//!
//! Invariants:
//! - `consume <= fill <= data.len()`
//! - `data.len()` is fixed at creation
//! - `last_op == None` implies `consume == fill == 0`

/// Which kind of data currently occupies the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastOp {
    #[default]
    None,
    Reading,
    Writing,
}

/// Snapshot of buffer bookkeeping, for introspection and invariant checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    pub consume: usize,
    pub fill: usize,
    pub capacity: usize,
    pub last_op: LastOp,
}

impl Cursors {
    /// True when the cursor ordering and homogeneity rules hold.
    pub fn is_consistent(&self) -> bool {
        let ordered = self.consume <= self.fill && self.fill <= self.capacity;
        let homogeneous = match self.last_op {
            LastOp::None => self.consume == 0 && self.fill == 0,
            LastOp::Writing => self.consume == 0,
            LastOp::Reading => true,
        };
        ordered && homogeneous
    }
}

#[derive(Debug)]
pub struct StreamBuffer {
    data: Vec<u8>,
    consume: usize,
    fill: usize,
    last_op: LastOp,
}

impl StreamBuffer {
    /// Create an empty buffer. Zero capacity is clamped to one byte.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)],
            consume: 0,
            fill: 0,
            last_op: LastOp::None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn last_op(&self) -> LastOp {
        self.last_op
    }

    pub fn cursors(&self) -> Cursors {
        Cursors {
            consume: self.consume,
            fill: self.fill,
            capacity: self.data.len(),
            last_op: self.last_op,
        }
    }

    /// No unconsumed look-ahead and no pending writes.
    pub fn is_consumed(&self) -> bool {
        self.consume == self.fill
    }

    pub fn is_full(&self) -> bool {
        self.fill == self.data.len()
    }

    /// Bytes of look-ahead not yet handed to the caller.
    pub fn unconsumed(&self) -> usize {
        self.fill - self.consume
    }

    /// Free space after `fill`.
    pub fn spare(&self) -> usize {
        self.data.len() - self.fill
    }

    // -----------------------------------------------------------------------
    // Write side
    // -----------------------------------------------------------------------

    /// Pending write data, in order.
    pub fn pending(&self) -> &[u8] {
        if self.last_op == LastOp::Writing {
            &self.data[self.consume..self.fill]
        } else {
            &[]
        }
    }

    /// Copy as much of `src` as fits. Returns the number of bytes stored.
    ///
    /// The caller must have discarded any look-ahead first.
    pub fn push(&mut self, src: &[u8]) -> usize {
        debug_assert_ne!(self.last_op, LastOp::Reading);
        let n = src.len().min(self.spare());
        if n > 0 {
            self.data[self.fill..self.fill + n].copy_from_slice(&src[..n]);
            self.fill += n;
            self.last_op = LastOp::Writing;
        }
        n
    }

    /// Drop the first `n` pending bytes after a flush that stopped part way.
    pub fn drain_front(&mut self, n: usize) {
        debug_assert_eq!(self.consume, 0);
        let n = n.min(self.fill);
        self.data.copy_within(n..self.fill, 0);
        self.fill -= n;
        if self.fill == 0 {
            self.last_op = LastOp::None;
        }
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    /// Start a fill: if everything has been consumed, rewind both cursors so
    /// the whole capacity is available. Unconsumed look-ahead is kept.
    pub fn prepare_fill(&mut self) {
        debug_assert_ne!(self.last_op, LastOp::Writing);
        if self.is_consumed() {
            self.reset();
        }
    }

    /// Writable region after `fill`, for the descriptor read.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.fill..]
    }

    /// Record `n` bytes just read into [`spare_mut`](Self::spare_mut).
    pub fn commit_fill(&mut self, n: usize) {
        debug_assert!(n <= self.spare());
        self.fill += n;
        if self.fill > self.consume {
            self.last_op = LastOp::Reading;
        }
    }

    /// Copy look-ahead into `dest`. Returns the number of bytes copied.
    pub fn take(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.unconsumed());
        dest[..n].copy_from_slice(&self.data[self.consume..self.consume + n]);
        self.consume += n;
        n
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        if self.is_consumed() {
            return None;
        }
        let b = self.data[self.consume];
        self.consume += 1;
        Some(b)
    }

    // -----------------------------------------------------------------------
    // Reset
    // -----------------------------------------------------------------------

    /// Drop whatever the buffer holds without writing anything back.
    pub fn reset(&mut self) {
        self.consume = 0;
        self.fill = 0;
        self.last_op = LastOp::None;
    }

    /// Reset and zero the storage (after a successful flush).
    pub fn clear(&mut self) {
        let used = self.fill;
        self.data[..used].fill(0);
        self.reset();
    }
}
