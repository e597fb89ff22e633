//! File-backed tape device.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::Configuration;
use crate::sort::SortError;
use crate::tape::{Tape, TapeValue};

/// Configuration key for the per-record read latency, in microseconds.
pub const READ_DURATION_KEY: &str = "read_duration";
/// Configuration key for the per-record write latency, in microseconds.
pub const WRITE_DURATION_KEY: &str = "write_duration";
/// Configuration key for the single-step head move latency, in microseconds.
pub const MOVE_DURATION_KEY: &str = "move_duration";
/// Configuration key for the begin/end rewind latency, in microseconds.
pub const REWIND_DURATION_KEY: &str = "rewind_duration";

/// Default read latency, in microseconds.
pub const DEFAULT_READ_DURATION: u64 = 7;
/// Default write latency, in microseconds.
pub const DEFAULT_WRITE_DURATION: u64 = 7;
/// Default single-step move latency, in microseconds.
pub const DEFAULT_MOVE_DURATION: u64 = 1;
/// Default rewind latency, in microseconds.
pub const DEFAULT_REWIND_DURATION: u64 = 100;

/// A tape emulated on top of a regular file.
///
/// Records are stored as dense little-endian cells of `V::WIDTH` bytes with
/// no header; the head position is the byte offset divided by the record
/// width. Each operation sleeps for its configured latency to simulate the
/// cost model of a real sequential device; setting the latencies to zero
/// turns this into a plain file-backed tape.
///
/// A read/write tape creates its file when absent and may append past the
/// current end. A read-only tape rejects writes and refuses to advance past
/// the last record.
pub struct FileTape<V: TapeValue> {
    file: File,
    pos: u64,
    writable: bool,
    read_duration: Duration,
    write_duration: Duration,
    move_duration: Duration,
    rewind_duration: Duration,
    _values: PhantomData<V>,
}

impl<V: TapeValue> FileTape<V> {
    /// Opens a read/write tape, creating the backing file if it is missing.
    pub fn new(config: &Configuration, path: impl AsRef<Path>) -> Result<Self, SortError> {
        Self::open(config, path.as_ref(), true)
    }

    /// Opens an existing file as a read-only tape.
    pub fn open_read_only(
        config: &Configuration,
        path: impl AsRef<Path>,
    ) -> Result<Self, SortError> {
        Self::open(config, path.as_ref(), false)
    }

    fn open(config: &Configuration, path: &Path, writable: bool) -> Result<Self, SortError> {
        let mut options = OpenOptions::new();
        options.read(true);
        if writable {
            options.write(true).create(true);
        }
        let file = options.open(path).map_err(|err| {
            SortError::Io(io::Error::new(
                err.kind(),
                format!("couldn't open tape file {}: {}", path.display(), err),
            ))
        })?;

        return Ok(FileTape {
            file,
            pos: 0,
            writable,
            read_duration: micros(config, READ_DURATION_KEY, DEFAULT_READ_DURATION),
            write_duration: micros(config, WRITE_DURATION_KEY, DEFAULT_WRITE_DURATION),
            move_duration: micros(config, MOVE_DURATION_KEY, DEFAULT_MOVE_DURATION),
            rewind_duration: micros(config, REWIND_DURATION_KEY, DEFAULT_REWIND_DURATION),
            _values: PhantomData,
        });
    }

    fn len(&self) -> u64 {
        self.file.metadata().map(|meta| meta.len()).unwrap_or(0)
    }

    fn pause(duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

fn micros(config: &Configuration, key: &str, default_value: u64) -> Duration {
    Duration::from_micros(config.get(key, default_value))
}

impl<V: TapeValue> Tape<V> for FileTape<V> {
    fn read(&mut self) -> Option<V> {
        if self.file.seek(SeekFrom::Start(self.pos)).is_err() {
            return None;
        }
        match V::read_from(&mut self.file) {
            Ok(value) => {
                self.pos += V::WIDTH as u64;
                Self::pause(self.read_duration + self.move_duration);
                Some(value)
            }
            Err(_) => None,
        }
    }

    fn write(&mut self, value: V) -> bool {
        if !self.writable {
            return false;
        }
        if self.file.seek(SeekFrom::Start(self.pos)).is_err() {
            return false;
        }
        match value.write_to(&mut self.file) {
            Ok(()) => {
                self.pos += V::WIDTH as u64;
                Self::pause(self.write_duration + self.move_duration);
                return true;
            }
            Err(_) => return false,
        }
    }

    fn move_forward(&mut self) -> bool {
        let next = self.pos + V::WIDTH as u64;
        if !self.writable && next > self.len() {
            return false;
        }
        self.pos = next;
        Self::pause(self.move_duration);
        return true;
    }

    fn move_backward(&mut self) -> bool {
        if self.pos < V::WIDTH as u64 {
            return false;
        }
        self.pos -= V::WIDTH as u64;
        Self::pause(self.move_duration);
        return true;
    }

    fn move_to_begin(&mut self) {
        Self::pause(self.rewind_duration);
        self.pos = 0;
    }

    fn move_to_end(&mut self) {
        Self::pause(self.rewind_duration);
        self.pos = self.len();
    }
}
