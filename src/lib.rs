//! `tape-sort` is a parallel external merge sort for tape-like storage devices.
//!
//! A tape is a sequential device holding fixed-width records under a single
//! movable head; every access pays a simulated latency and rewinds are the
//! dominant cost. Sorting happens in two overlapped phases: the input is cut
//! into chunks that fit the memory budget, sorted in RAM and written to
//! scratch tapes (runs), and the runs are then fused by k-way merges until a
//! single sorted run is streamed to the output tape.
//!
//! # Overview
//!
//! `tape-sort` supports the following features:
//!
//! * **Bounded memory:**
//!   the sorter derives every buffer size from the configured memory limit,
//!   so the records held in RAM never exceed it.
//! * **K-way merging:**
//!   runs are merged in configurable groups, paying the tape rewind and scan
//!   cost `⌈log_K(runs)⌉` times instead of `log₂(runs)`.
//! * **Multithreading support:**
//!   chunk sorting and run merging are scheduled on a lazily-growing worker
//!   pool, overlapping compute-bound and I/O-bound work.
//! * **Device emulation:**
//!   the file-backed tape simulates per-record read/write/move and rewind
//!   latencies, configurable down to zero for production use.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tape_sort::{Configuration, FileTape, SortError, TapeSorter, TempFileTapeProvider};
//!
//! fn main() -> Result<(), SortError> {
//!     let config = Configuration::from_file("config.properties");
//!
//!     let mut input = FileTape::<i64>::open_read_only(&config, "input")?;
//!     let mut output = FileTape::<i64>::new(&config, "output")?;
//!
//!     let provider = Arc::new(TempFileTapeProvider::new(&config)?);
//!     let sorter = TapeSorter::new(&config, provider, |a: &i64, b: &i64| a < b)?;
//!     sorter.sort(&mut input, &mut output)?;
//!
//!     Ok(())
//! }
//! ```

pub mod block;
pub mod config;
pub mod file_tape;
pub mod merger;
pub mod pool;
pub mod provider;
pub mod sort;
pub mod tape;

pub use block::{BlockReader, BlockWriter};
pub use config::Configuration;
pub use file_tape::FileTape;
pub use merger::merge_tapes;
pub use pool::ThreadPool;
pub use provider::{TempFileTapeProvider, TempTapeProvider};
pub use sort::{SortError, TapeSorter};
pub use tape::{BoxedTape, Tape, TapeValue, VecTape};
