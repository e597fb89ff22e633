//! K-way merge of sorted runs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::block::{BlockReader, BlockWriter};
use crate::sort::SortError;
use crate::tape::{BoxedTape, TapeValue};

/// Merges sorted runs onto the output tape.
///
/// Every run is wrapped in a [`BlockReader`] and the output in a
/// [`BlockWriter`], each with a buffer of `block_capacity` records, so one
/// merge holds at most `(runs + 1) * block_capacity` records in memory. The
/// run with the least head record under `precedes` is drained one record at
/// a time through a binary heap. Time complexity is *m* \* log(*n*) in the
/// worst case where *m* is the number of records and *n* the number of runs.
///
/// Runs must be sorted under `precedes` and rewound to their beginning,
/// otherwise the result is undefined. `precedes` must be a strict weak
/// ordering. The returned tape is the output tape, flushed and rewound to
/// its beginning.
pub fn merge_tapes<V, C>(
    runs: Vec<BoxedTape<V>>,
    output: BoxedTape<V>,
    block_capacity: usize,
    precedes: C,
) -> Result<BoxedTape<V>, SortError>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool + Copy,
{
    let mut writer = BlockWriter::new(block_capacity, output)?;

    let mut cursors = BinaryHeap::with_capacity(runs.len());
    for tape in runs {
        let reader = BlockReader::new(block_capacity, tape)?;
        if let Some(cursor) = RunCursor::over(reader, precedes) {
            cursors.push(cursor);
        }
    }

    while let Some(mut cursor) = cursors.pop() {
        writer.write(cursor.head)?;
        if cursor.reader.advance() {
            cursor.head = cursor.reader.read()?;
            cursors.push(cursor);
        }
    }

    let mut merged = writer.into_tape()?;
    merged.move_to_begin();
    return Ok(merged);
}

/// A run being merged: its reader plus the record under the reader's cursor,
/// kept alongside so the heap can order cursors without touching the tape.
struct RunCursor<V: TapeValue, C> {
    head: V,
    reader: BlockReader<V>,
    precedes: C,
}

impl<V, C> RunCursor<V, C>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool,
{
    /// Positions a cursor over the first record; an exhausted run yields no
    /// cursor.
    fn over(reader: BlockReader<V>, precedes: C) -> Option<Self> {
        let head = reader.read().ok()?;
        Some(RunCursor { head, reader, precedes })
    }
}

// The heap pops its greatest entry, so a head that precedes another is the
// greater cursor. Heads that precede each other in neither direction compare
// equal; their merge order is unspecified.

impl<V, C> Ord for RunCursor<V, C>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool,
{
    fn cmp(&self, other: &Self) -> Ordering {
        if (self.precedes)(&self.head, &other.head) {
            Ordering::Greater
        } else if (self.precedes)(&other.head, &self.head) {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }
}

impl<V, C> PartialOrd for RunCursor<V, C>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V, C> PartialEq for RunCursor<V, C>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool,
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<V, C> Eq for RunCursor<V, C>
where
    V: TapeValue,
    C: Fn(&V, &V) -> bool,
{
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::merge_tapes;
    use crate::tape::{BoxedTape, VecTape};

    fn run(values: Vec<i32>) -> BoxedTape<i32> {
        Box::new(VecTape::from_values(values))
    }

    fn read_all(tape: &mut BoxedTape<i32>) -> Vec<i32> {
        tape.read_n(usize::MAX)
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![vec![], vec![]], vec![])]
    #[case(
        vec![vec![4, 5, 7], vec![1, 6], vec![3], vec![]],
        vec![1, 3, 4, 5, 6, 7],
    )]
    #[case(
        vec![vec![1, 1, 2], vec![1, 2, 2]],
        vec![1, 1, 1, 2, 2, 2],
    )]
    fn test_merges_ascending_runs(#[case] runs: Vec<Vec<i32>>, #[case] expected: Vec<i32>) {
        let runs = runs.into_iter().map(run).collect();

        let mut merged =
            merge_tapes(runs, Box::new(VecTape::new()), 2, |a: &i32, b: &i32| a < b).unwrap();

        assert_eq!(read_all(&mut merged), expected);
    }

    #[test]
    fn test_merges_descending_runs() {
        let runs = vec![run(vec![7, 5, 4]), run(vec![6, 1]), run(vec![3])];

        let mut merged =
            merge_tapes(runs, Box::new(VecTape::new()), 2, |a: &i32, b: &i32| a > b).unwrap();

        assert_eq!(read_all(&mut merged), vec![7, 6, 5, 4, 3, 1]);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(64)]
    fn test_block_capacity_does_not_change_the_result(#[case] capacity: usize) {
        let runs = vec![run((0..50).step_by(2).collect()), run((1..50).step_by(2).collect())];

        let mut merged =
            merge_tapes(runs, Box::new(VecTape::new()), capacity, |a: &i32, b: &i32| a < b)
                .unwrap();

        assert_eq!(read_all(&mut merged), (0..50).collect::<Vec<i32>>());
    }
}
