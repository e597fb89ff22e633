//! Buffered tape adapters.
//!
//! A raw tape pays its simulated latency on every record. The block reader
//! and writer amortise that cost by batching records through an in-memory
//! buffer of a fixed capacity, chosen by the sorter so that the buffers of
//! one merge task stay within its per-thread budget.

use std::io;

use crate::sort::SortError;
use crate::tape::{BoxedTape, TapeValue};

/// A buffered reader over a tape.
///
/// Eagerly loads the first block on construction; refills from the tape when
/// the buffer runs out.
pub struct BlockReader<V: TapeValue> {
    capacity: usize,
    tape: BoxedTape<V>,
    values: Vec<V>,
    pos: usize,
}

impl<V: TapeValue> BlockReader<V> {
    /// Creates a reader with the given buffer capacity.
    ///
    /// Fails with [`SortError::InvalidConfig`] when `capacity` is zero.
    pub fn new(capacity: usize, tape: BoxedTape<V>) -> Result<Self, SortError> {
        if capacity == 0 {
            return Err(SortError::InvalidConfig(
                "block reader capacity must be positive".to_string(),
            ));
        }
        let mut reader = BlockReader { capacity, tape, values: Vec::new(), pos: 0 };
        reader.read_next_block();
        return Ok(reader);
    }

    /// Returns the record under the cursor.
    ///
    /// Fails with [`SortError::OutOfBounds`] once the tape is drained and
    /// the buffer consumed; that is a bug in the caller, not a data
    /// condition.
    pub fn read(&self) -> Result<V, SortError> {
        self.values.get(self.pos).copied().ok_or(SortError::OutOfBounds)
    }

    /// Moves the cursor one record forward, refilling the buffer from the
    /// tape when it is consumed.
    ///
    /// Returns `false` once the tape is drained and no record is left.
    pub fn advance(&mut self) -> bool {
        self.pos += 1;
        if self.pos == self.values.len() {
            self.read_next_block();
            return !self.values.is_empty();
        }
        return true;
    }

    fn read_next_block(&mut self) {
        self.values = self.tape.read_n(self.capacity);
        self.pos = 0;
    }
}

/// A buffered writer over a tape.
///
/// Records accumulate in the buffer and are flushed to the tape whenever it
/// reaches capacity. Callers hand the tape back with [`BlockWriter::into_tape`],
/// which performs the final flush; dropping the writer flushes as a backstop
/// and logs a failure, since a partially-written run is unusable downstream.
pub struct BlockWriter<V: TapeValue> {
    capacity: usize,
    tape: Option<BoxedTape<V>>,
    values: Vec<V>,
}

impl<V: TapeValue> BlockWriter<V> {
    /// Creates a writer with the given buffer capacity.
    ///
    /// Fails with [`SortError::InvalidConfig`] when `capacity` is zero.
    pub fn new(capacity: usize, tape: BoxedTape<V>) -> Result<Self, SortError> {
        if capacity == 0 {
            return Err(SortError::InvalidConfig(
                "block writer capacity must be positive".to_string(),
            ));
        }
        return Ok(BlockWriter {
            capacity,
            tape: Some(tape),
            values: Vec::with_capacity(capacity),
        });
    }

    /// Appends a record to the buffer, flushing to the tape at capacity.
    pub fn write(&mut self, value: V) -> Result<(), SortError> {
        self.values.push(value);
        if self.values.len() >= self.capacity {
            return self.flush();
        }
        return Ok(());
    }

    /// Forces the buffered records onto the tape; idempotent.
    pub fn flush(&mut self) -> Result<(), SortError> {
        if self.values.is_empty() {
            return Ok(());
        }
        let tape = self.tape.as_mut().expect("tape is present until into_tape");
        let written = tape.write_n(&self.values);
        if written != self.values.len() {
            self.values.drain(..written);
            return Err(SortError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "tape accepted a partial block only",
            )));
        }
        self.values.clear();
        return Ok(());
    }

    /// Flushes the remaining records and returns the underlying tape.
    pub fn into_tape(mut self) -> Result<BoxedTape<V>, SortError> {
        self.flush()?;
        return Ok(self.tape.take().expect("tape is present until into_tape"));
    }
}

impl<V: TapeValue> Drop for BlockWriter<V> {
    fn drop(&mut self) {
        if self.tape.is_none() || self.values.is_empty() {
            return;
        }
        if let Err(err) = self.flush() {
            log::error!("block writer dropped with unflushed records: {}", err);
        }
    }
}
