//! Temporary tape providers.

use std::marker::PhantomData;

use crate::config::Configuration;
use crate::file_tape::FileTape;
use crate::sort::SortError;
use crate::tape::{BoxedTape, TapeValue};

/// A factory of fresh, empty, read/write tapes for scratch use.
///
/// Providers are shared between concurrent sort tasks and must be internally
/// synchronised. The storage behind every produced tape is released when the
/// provider is dropped.
pub trait TempTapeProvider<V: TapeValue>: Send + Sync {
    /// Produces a fresh scratch tape with the head at the beginning.
    fn get(&self) -> Result<BoxedTape<V>, SortError>;
}

/// Provides file-backed scratch tapes rooted in a private temporary
/// directory.
///
/// Tape file names are random and unique within the provider. Dropping the
/// provider deletes the directory together with every tape it handed out.
pub struct TempFileTapeProvider<V: TapeValue> {
    config: Configuration,
    dir: tempfile::TempDir,
    _values: PhantomData<V>,
}

impl<V: TapeValue> TempFileTapeProvider<V> {
    /// Creates a provider with its own scratch directory.
    ///
    /// The configuration is used to construct the devices, see [`FileTape`].
    pub fn new(config: &Configuration) -> Result<Self, SortError> {
        let dir = tempfile::Builder::new()
            .prefix("tapes-")
            .tempdir()
            .map_err(SortError::Io)?;
        log::info!("using {} as a scratch tape directory", dir.path().display());

        return Ok(TempFileTapeProvider {
            config: config.clone(),
            dir,
            _values: PhantomData,
        });
    }
}

impl<V: TapeValue> TempTapeProvider<V> for TempFileTapeProvider<V> {
    fn get(&self) -> Result<BoxedTape<V>, SortError> {
        let name = format!("{:016x}", rand::random::<u64>());
        let tape = FileTape::new(&self.config, self.dir.path().join(name))?;
        return Ok(Box::new(tape));
    }
}
