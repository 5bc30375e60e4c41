//! Contiguous sequence partitioning across ranks.

use std::ops::Range;

use crate::AttentionError;

/// A contiguous slice of the full sequence owned by one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceShard {
    pub rank: usize,
    pub start: usize,
    pub len: usize,
}

impl SequenceShard {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// Split `[0, sequence_length)` into one shard per rank.
///
/// Shards are as equal as possible; when the length is not evenly
/// divisible, earlier ranks absorb the remainder, so sizes differ by at
/// most one. Fails with `InvalidTopology` when there are no ranks or not
/// enough elements to give every rank at least one.
pub fn partition(
    sequence_length: usize,
    rank_count: usize,
) -> Result<Vec<SequenceShard>, AttentionError> {
    if rank_count == 0 {
        return Err(AttentionError::InvalidTopology(
            "rank count must be positive".into(),
        ));
    }
    if sequence_length < rank_count {
        return Err(AttentionError::InvalidTopology(format!(
            "sequence of length {sequence_length} cannot cover {rank_count} ranks"
        )));
    }

    let base = sequence_length / rank_count;
    let remainder = sequence_length % rank_count;

    let mut shards = Vec::with_capacity(rank_count);
    let mut start = 0;
    for rank in 0..rank_count {
        let len = base + usize::from(rank < remainder);
        shards.push(SequenceShard { rank, start, len });
        start += len;
    }
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(shards: &[SequenceShard], sequence_length: usize) {
        let mut expected_start = 0;
        for (rank, shard) in shards.iter().enumerate() {
            assert_eq!(shard.rank, rank);
            assert_eq!(shard.start, expected_start, "gap or overlap at rank {rank}");
            expected_start = shard.end();
        }
        assert_eq!(expected_start, sequence_length);
    }

    #[test]
    fn covers_exactly_with_bounded_spread() {
        for (len, ranks) in [(1000, 3), (7, 7), (16, 4), (100, 1), (9, 2)] {
            let shards = partition(len, ranks).unwrap();
            assert_eq!(shards.len(), ranks);
            assert_exact_cover(&shards, len);

            let max = shards.iter().map(|s| s.len).max().unwrap();
            let min = shards.iter().map(|s| s.len).min().unwrap();
            assert!(max - min <= 1, "len {len} ranks {ranks}: spread {}", max - min);
        }
    }

    #[test]
    fn remainder_goes_to_earlier_ranks() {
        let shards = partition(1000, 3).unwrap();
        let sizes: Vec<usize> = shards.iter().map(|s| s.len).collect();
        assert_eq!(sizes, vec![334, 333, 333]);
    }

    #[test]
    fn single_rank_takes_whole_sequence() {
        let shards = partition(42, 1).unwrap();
        assert_eq!(shards, vec![SequenceShard { rank: 0, start: 0, len: 42 }]);
    }

    #[test]
    fn degenerate_inputs_rejected() {
        assert!(matches!(
            partition(10, 0),
            Err(AttentionError::InvalidTopology(_))
        ));
        assert!(matches!(
            partition(3, 4),
            Err(AttentionError::InvalidTopology(_))
        ));
    }
}
