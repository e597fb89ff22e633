//! External tape sorter.

use log;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use bytesize::ByteSize;
use rayon::slice::ParallelSliceMut;

use crate::merger::merge_tapes;
use crate::pool::ThreadPool;
use crate::provider::TempTapeProvider;
use crate::tape::{BoxedTape, Tape, TapeValue};
use crate::Configuration;

/// Configuration key for the total in-memory budget, in bytes.
pub const MEMORY_LIMIT_KEY: &str = "memory_limit";
/// Configuration key for the ceiling on the worker pool size.
pub const MAX_THREAD_COUNT_KEY: &str = "max_thread_count";
/// Configuration key for the ceiling on records handled by one task.
pub const MAX_VALUE_COUNT_PER_THREAD_KEY: &str = "max_value_count_per_thread";
/// Configuration key for the merge fan-in.
pub const MAX_MERGING_GROUP_SIZE_KEY: &str = "max_merging_group_size";

/// Default in-memory budget, in bytes.
pub const DEFAULT_MEMORY_LIMIT: u64 = bytesize::GIB;
/// Default ceiling on records handled by one task.
pub const DEFAULT_MAX_VALUE_COUNT_PER_THREAD: u64 = 1_000_000;
/// Default merge fan-in.
pub const DEFAULT_MAX_MERGING_GROUP_SIZE: u64 = 50;

/// Fewer records than this can't be merged at all.
const MIN_VALUES_IN_MEMORY: usize = 4;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Configuration rejected during capacity planning.
    InvalidConfig(String),
    /// Tape device or scratch storage failure.
    Io(io::Error),
    /// A drained block reader was read; a bug in the caller, not a data
    /// condition.
    OutOfBounds,
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::Io(err) => Some(err),
            SortError::InvalidConfig(_) | SortError::OutOfBounds => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            SortError::Io(err) => write!(f, "I/O operation failed: {}", err),
            SortError::OutOfBounds => write!(f, "read out of bounds of a drained block reader"),
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::Io(err)
    }
}

/// External sorter moving records from an input tape to an output tape.
///
/// The input is split into chunks sorted in memory and written to scratch
/// tapes (runs), which are then fused by k-way merges until a single run
/// remains; that run is streamed to the output tape. Chunk sorting and
/// merging overlap on a worker pool sized so that the live buffers never
/// exceed the configured memory limit.
///
/// The comparator must be a strict weak ordering: `|a, b| a < b` sorts
/// ascending, `|a, b| a > b` descending.
pub struct TapeSorter<V, C>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool + Copy + Send + Sync + 'static,
{
    /// Number of workers the sort may occupy.
    thread_count: usize,
    /// Records that fit in memory under the configured limit.
    values_in_memory_limit: usize,
    /// Records one task may hold at a time.
    values_per_thread: usize,
    /// Provider of scratch tapes for intermediate runs.
    tape_provider: Arc<dyn TempTapeProvider<V>>,
    /// Number of runs fused by one merge task.
    merging_group_size: usize,
    comparator: C,
}

impl<V, C> TapeSorter<V, C>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool + Copy + Send + Sync + 'static,
{
    /// Creates a sorter, deriving its capacities from the configuration.
    ///
    /// Fails with [`SortError::InvalidConfig`] when the memory limit doesn't
    /// fit even four records, when the fan-in is below two or when the
    /// per-thread budget can't give every tape of a merging group at least
    /// one buffered record.
    pub fn new(
        config: &Configuration,
        tape_provider: Arc<dyn TempTapeProvider<V>>,
        comparator: C,
    ) -> Result<Self, SortError> {
        let memory_limit = config.get(MEMORY_LIMIT_KEY, DEFAULT_MEMORY_LIMIT);
        let values_in_memory_limit = (memory_limit / V::WIDTH as u64) as usize;
        if values_in_memory_limit < MIN_VALUES_IN_MEMORY {
            return Err(SortError::InvalidConfig(format!(
                "increase the memory limit: minimum is {} bytes",
                MIN_VALUES_IN_MEMORY * V::WIDTH
            )));
        }

        let max_value_count_per_thread =
            config.get(MAX_VALUE_COUNT_PER_THREAD_KEY, DEFAULT_MAX_VALUE_COUNT_PER_THREAD);
        let values_per_thread = (max_value_count_per_thread as usize).min(values_in_memory_limit);

        let merging_group_size =
            config.get(MAX_MERGING_GROUP_SIZE_KEY, DEFAULT_MAX_MERGING_GROUP_SIZE) as usize;
        if merging_group_size < 2 {
            return Err(SortError::InvalidConfig(
                "merging group size must be at least 2".to_string(),
            ));
        }
        if values_per_thread / (merging_group_size + 1) < 1 {
            return Err(SortError::InvalidConfig(format!(
                "can't merge {} runs in one thread: increase the memory limit or the value \
                 count per thread to at least {} bytes",
                merging_group_size,
                (merging_group_size + 1) * V::WIDTH
            )));
        }

        let max_thread_count =
            config.get(MAX_THREAD_COUNT_KEY, default_max_thread_count() as u64) as usize;
        let thread_count = max_thread_count
            .min(values_in_memory_limit / values_per_thread)
            .max(1);

        log::info!(
            "sorting with up to {} workers, {} values per task, {} memory limit",
            thread_count,
            values_per_thread,
            ByteSize(memory_limit)
        );

        return Ok(TapeSorter {
            thread_count,
            values_in_memory_limit,
            values_per_thread,
            tape_provider,
            merging_group_size,
            comparator,
        });
    }

    /// Sorts the records of the input tape onto the output tape.
    ///
    /// Reads the input from the current head position to the end; leaves the
    /// output tape rewound to its beginning. Scratch tapes live only for the
    /// duration of the call.
    pub fn sort(
        &self,
        input_tape: &mut dyn Tape<V>,
        output_tape: &mut dyn Tape<V>,
    ) -> Result<(), SortError> {
        let context = Arc::new(SortContext::new(
            self.thread_count,
            self.values_per_thread,
            self.merging_group_size,
        ));

        // Split the input into per-thread chunks; each is sorted and written
        // to its own scratch tape by the pool.
        log::debug!("producing initial runs ...");
        loop {
            let values = input_tape.read_n(self.values_per_thread);
            if values.is_empty() {
                break;
            }
            context.run_count.fetch_add(1, AtomicOrdering::SeqCst);
            let task_context = Arc::clone(&context);
            let provider = Arc::clone(&self.tape_provider);
            let comparator = self.comparator;
            context.pool.submit(move || {
                if let Err(err) =
                    sort_chunk_onto_tape(&task_context, provider.as_ref(), comparator, values)
                {
                    task_context.fail(err);
                }
            });
        }

        // Fuse runs in groups until a single one remains. Posting a merge of
        // k runs leaves k - 1 fewer runs once every in-flight task settles.
        log::debug!("merging runs ...");
        while context.run_count.load(AtomicOrdering::SeqCst) > 1 {
            let runs = context.pop_group_to_merge()?;
            let collapsed = runs.len() - 1;
            let task_context = Arc::clone(&context);
            let provider = Arc::clone(&self.tape_provider);
            let comparator = self.comparator;
            context.pool.submit(move || {
                if let Err(err) = merge_group(&task_context, provider.as_ref(), comparator, runs) {
                    task_context.fail(err);
                }
            });
            context.run_count.fetch_sub(collapsed, AtomicOrdering::SeqCst);
        }

        if context.run_count.load(AtomicOrdering::SeqCst) > 0 {
            let mut sorted = context.pop()?;
            log::debug!("writing the sorted run to the output tape");
            loop {
                let values = sorted.read_n(self.values_in_memory_limit);
                if values.is_empty() {
                    break;
                }
                let written = output_tape.write_n(&values);
                if written != values.len() {
                    return Err(SortError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "output tape accepted a partial block only",
                    )));
                }
            }
            output_tape.move_to_begin();
        }

        return Ok(());
    }
}

fn default_max_thread_count() -> usize {
    thread::available_parallelism().map(|count| count.get()).unwrap_or(1)
}

/// Turns a "precedes" predicate into a total-order comparator for sorting.
fn ordering<V, C>(precedes: C) -> impl Fn(&V, &V) -> Ordering
where
    C: Fn(&V, &V) -> bool,
{
    move |a, b| {
        if precedes(a, b) {
            Ordering::Less
        } else if precedes(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// Sorts one input chunk and publishes it as a run.
fn sort_chunk_onto_tape<V, C>(
    context: &SortContext<V>,
    provider: &dyn TempTapeProvider<V>,
    comparator: C,
    mut values: Vec<V>,
) -> Result<(), SortError>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool + Copy + Send + Sync,
{
    let mut tape = provider.get()?;
    values.par_sort_unstable_by(ordering(comparator));
    let written = tape.write_n(&values);
    if written != values.len() {
        return Err(SortError::Io(io::Error::new(
            io::ErrorKind::WriteZero,
            "scratch tape accepted a partial run only",
        )));
    }
    tape.move_to_begin();
    context.push(tape);
    return Ok(());
}

/// Merges a group of runs and publishes the result as a new run.
fn merge_group<V, C>(
    context: &SortContext<V>,
    provider: &dyn TempTapeProvider<V>,
    comparator: C,
    runs: Vec<BoxedTape<V>>,
) -> Result<(), SortError>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool + Copy,
{
    // Each participating tape gets an equal share of the thread's budget;
    // the +1 accounts for the output buffer.
    let block_capacity = context.values_per_thread / (runs.len() + 1);
    let output = provider.get()?;
    let merged = merge_tapes(runs, output, block_capacity, comparator)?;
    context.push(merged);
    return Ok(());
}

/// Shared state of one sort invocation: the worker pool and the queue of
/// runs awaiting their merge.
struct SortContext<V: TapeValue> {
    pool: ThreadPool,
    /// Number of runs that will exist once every in-flight task settles.
    run_count: AtomicUsize,
    /// Records one task may hold at a time.
    values_per_thread: usize,
    /// Number of runs fused by one merge task.
    merging_group_size: usize,
    state: Mutex<ContextState<V>>,
    has_runs: Condvar,
    has_merge_group: Condvar,
}

struct ContextState<V> {
    runs: VecDeque<BoxedTape<V>>,
    failure: Option<SortError>,
}

impl<V: TapeValue> SortContext<V> {
    fn new(thread_count: usize, values_per_thread: usize, merging_group_size: usize) -> Self {
        SortContext {
            pool: ThreadPool::new(thread_count),
            run_count: AtomicUsize::new(0),
            values_per_thread,
            merging_group_size,
            state: Mutex::new(ContextState { runs: VecDeque::new(), failure: None }),
            has_runs: Condvar::new(),
            has_merge_group: Condvar::new(),
        }
    }

    /// Publishes a sorted run, waking the driver when enough runs are
    /// queued for the next merge.
    fn push(&self, tape: BoxedTape<V>) {
        let mut state = self.state.lock().expect("sort context poisoned");
        state.runs.push_back(tape);
        if state.runs.len() >= self.merge_group_size() {
            self.has_merge_group.notify_one();
        }
        self.has_runs.notify_one();
    }

    /// Removes the front run, blocking until one is available.
    fn pop(&self) -> Result<BoxedTape<V>, SortError> {
        let mut state = self.state.lock().expect("sort context poisoned");
        loop {
            if let Some(err) = state.failure.take() {
                return Err(err);
            }
            if let Some(tape) = state.runs.pop_front() {
                return Ok(tape);
            }
            state = self.has_runs.wait(state).expect("sort context poisoned");
        }
    }

    /// Removes the front runs of the next merging group, blocking until the
    /// group is complete.
    ///
    /// The group shrinks below the configured fan-in near the end of a sort,
    /// when fewer runs remain outstanding.
    fn pop_group_to_merge(&self) -> Result<Vec<BoxedTape<V>>, SortError> {
        let mut state = self.state.lock().expect("sort context poisoned");
        loop {
            if let Some(err) = state.failure.take() {
                return Err(err);
            }
            let group_size = self.merge_group_size();
            if group_size > 0 && state.runs.len() >= group_size {
                return Ok(state.runs.drain(..group_size).collect());
            }
            state = self.has_merge_group.wait(state).expect("sort context poisoned");
        }
    }

    /// Poisons the invocation: the first failure is kept for the driver and
    /// every waiter is woken so the sort fails instead of waiting for a run
    /// that will never arrive.
    fn fail(&self, error: SortError) {
        log::error!("sort task failed: {}", error);
        let mut state = self.state.lock().expect("sort context poisoned");
        if state.failure.is_none() {
            state.failure = Some(error);
        }
        self.has_runs.notify_all();
        self.has_merge_group.notify_all();
    }

    // The fan-in must track the outstanding-run count, re-read under the
    // queue lock.
    fn merge_group_size(&self) -> usize {
        self.merging_group_size.min(self.run_count.load(AtomicOrdering::SeqCst))
    }
}

#[cfg(test)]
mod test {
    use std::io;
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::file_tape::{
        FileTape, MOVE_DURATION_KEY, READ_DURATION_KEY, REWIND_DURATION_KEY, WRITE_DURATION_KEY,
    };
    use crate::provider::TempFileTapeProvider;
    use crate::tape::VecTape;

    fn test_config() -> Configuration {
        let mut config = Configuration::new();
        config.set(READ_DURATION_KEY, 0);
        config.set(WRITE_DURATION_KEY, 0);
        config.set(MOVE_DURATION_KEY, 0);
        config.set(REWIND_DURATION_KEY, 0);
        config.set(MAX_VALUE_COUNT_PER_THREAD_KEY, 10_000);
        return config;
    }

    fn random_values(count: usize) -> Vec<i64> {
        (0..count).map(|_| rand::random::<i64>()).collect()
    }

    fn sort_values<C>(
        config: &Configuration,
        values: &[i64],
        comparator: C,
    ) -> Result<Vec<i64>, SortError>
    where
        C: Fn(&i64, &i64) -> bool + Copy + Send + Sync + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input");
        {
            let mut input: FileTape<i64> = FileTape::new(config, &input_path).unwrap();
            assert_eq!(input.write_n(values), values.len());
        }

        let mut input = FileTape::<i64>::open_read_only(config, &input_path).unwrap();
        let mut output = FileTape::<i64>::new(config, dir.path().join("output")).unwrap();
        let provider = Arc::new(TempFileTapeProvider::new(config).unwrap());

        let sorter = TapeSorter::new(config, provider, comparator)?;
        sorter.sort(&mut input, &mut output)?;

        return Ok(output.read_n(usize::MAX));
    }

    fn sorted<C>(mut values: Vec<i64>, comparator: C) -> Vec<i64>
    where
        C: Fn(&i64, &i64) -> bool,
    {
        values.sort_unstable_by(ordering(comparator));
        return values;
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_sorts_a_short_sequence(#[case] reversed: bool) {
        let values = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5];
        let comparator = if reversed {
            |a: &i64, b: &i64| a > b
        } else {
            |a: &i64, b: &i64| a < b
        };
        let expected = if reversed {
            vec![9, 6, 5, 5, 5, 4, 3, 3, 2, 1, 1]
        } else {
            vec![1, 1, 2, 3, 3, 4, 5, 5, 5, 6, 9]
        };

        let actual = sort_values(&test_config(), &values, comparator).unwrap();

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_sorts_random_values_ascending() {
        let values = random_values(100_000);

        let actual = sort_values(&test_config(), &values, |a, b| a < b).unwrap();

        assert_eq!(actual, sorted(values, |a, b| a < b));
    }

    #[test]
    fn test_sorts_random_values_descending() {
        let values = random_values(100_000);

        let actual = sort_values(&test_config(), &values, |a, b| a > b).unwrap();

        assert_eq!(actual, sorted(values, |a, b| a > b));
    }

    #[test]
    fn test_sorts_with_a_tight_memory_limit() {
        // A 4 KiB budget forces hundreds of runs and several merge levels.
        let values = random_values(100_000);
        let mut config = test_config();
        config.set(MEMORY_LIMIT_KEY, 4096);

        let actual = sort_values(&config, &values, |a, b| a < b).unwrap();

        assert_eq!(actual, sorted(values, |a, b| a < b));
    }

    #[test]
    fn test_sorts_empty_input() {
        let actual = sort_values(&test_config(), &[], |a, b| a < b).unwrap();

        assert!(actual.is_empty());
    }

    #[test]
    fn test_sorts_a_single_record() {
        let actual = sort_values(&test_config(), &[10], |a, b| a < b).unwrap();

        assert_eq!(actual, vec![10]);
    }

    #[test]
    fn test_sorted_input_stays_sorted() {
        let values = sorted(random_values(50_000), |a, b| a < b);

        let actual = sort_values(&test_config(), &values, |a, b| a < b).unwrap();

        assert_eq!(actual, values);
    }

    #[test]
    fn test_reverse_sorted_input() {
        let values = sorted(random_values(50_000), |a, b| a > b);

        let actual = sort_values(&test_config(), &values, |a, b| a < b).unwrap();

        assert_eq!(actual, sorted(values, |a, b| a < b));
    }

    #[test]
    fn test_pairwise_merging() {
        // A fan-in of two over sixteen runs exercises four merge levels.
        let values = random_values(1_600);
        let mut config = test_config();
        config.set(MAX_VALUE_COUNT_PER_THREAD_KEY, 100);
        config.set(MAX_MERGING_GROUP_SIZE_KEY, 2);

        let actual = sort_values(&config, &values, |a, b| a < b).unwrap();

        assert_eq!(actual, sorted(values, |a, b| a < b));
    }

    #[test]
    fn test_memory_limit_below_minimum_is_rejected() {
        let mut config = test_config();
        config.set(MEMORY_LIMIT_KEY, std::mem::size_of::<i64>() as u64);

        let result = sort_values(&config, &[1, 2, 3], |a, b| a < b);

        assert!(matches!(result, Err(SortError::InvalidConfig(_))));
    }

    #[test]
    fn test_fan_in_exceeding_thread_budget_is_rejected() {
        // Four values fit in memory but can't buffer a fifty-way merge.
        let mut config = test_config();
        config.set(MEMORY_LIMIT_KEY, 32);

        let result = sort_values(&config, &[1, 2, 3], |a, b| a < b);

        assert!(matches!(result, Err(SortError::InvalidConfig(_))));
    }

    #[test]
    fn test_fan_in_below_two_is_rejected() {
        let mut config = test_config();
        config.set(MAX_MERGING_GROUP_SIZE_KEY, 1);

        let result = sort_values(&config, &[1, 2, 3], |a, b| a < b);

        assert!(matches!(result, Err(SortError::InvalidConfig(_))));
    }

    struct FailingProvider;

    impl TempTapeProvider<i64> for FailingProvider {
        fn get(&self) -> Result<BoxedTape<i64>, SortError> {
            Err(SortError::Io(io::Error::new(io::ErrorKind::Other, "scratch area exhausted")))
        }
    }

    #[test]
    fn test_scratch_failure_poisons_the_sort() {
        let config = test_config();
        let mut input = VecTape::from_values((0..30_000).collect());
        let mut output: VecTape<i64> = VecTape::new();

        let sorter = TapeSorter::new(&config, Arc::new(FailingProvider), |a, b| a < b).unwrap();
        let result = sorter.sort(&mut input, &mut output);

        assert!(matches!(result, Err(SortError::Io(_))));
    }
}
