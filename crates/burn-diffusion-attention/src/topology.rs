//! Ring topology construction.
//!
//! A topology is an explicitly constructed object, not process-global
//! state: [`RingTopology::connect`] wires one mpsc channel per neighbor
//! pair and hands each rank its endpoints. Blocks travel as [`TensorData`]
//! so nodes can live on different threads and backends.

use std::sync::mpsc::{Receiver, Sender, channel};

use burn::tensor::TensorData;

use crate::AttentionError;

/// One K/V block in flight around the ring.
pub struct KvBlock {
    pub keys: TensorData,
    pub values: TensorData,
}

/// One rank's endpoints in a ring: a sender to its fixed successor and a
/// receiver from its fixed predecessor.
///
/// The neighbor assignment never changes after construction; every
/// exchange round pairs the same neighbors on every rank.
pub struct RingNode {
    rank: usize,
    rank_count: usize,
    to_next: Sender<KvBlock>,
    from_prev: Receiver<KvBlock>,
}

impl RingNode {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn rank_count(&self) -> usize {
        self.rank_count
    }

    /// Send the currently held block to the ring successor.
    pub(crate) fn send(&self, block: KvBlock, round: usize) -> Result<(), AttentionError> {
        self.to_next
            .send(block)
            .map_err(|_| AttentionError::Communication {
                round,
                reason: format!("rank {} lost its successor", self.rank),
            })
    }

    /// Block until the predecessor's block for this round arrives.
    pub(crate) fn recv(&self, round: usize) -> Result<KvBlock, AttentionError> {
        self.from_prev
            .recv()
            .map_err(|_| AttentionError::Communication {
                round,
                reason: format!("rank {} lost its predecessor", self.rank),
            })
    }
}

/// Builds the per-rank endpoints of a ring.
pub struct RingTopology;

impl RingTopology {
    /// Create a ring of `rank_count` nodes, returned in rank order.
    ///
    /// Intended to be called once at startup; the returned nodes are moved
    /// to their worker threads and live for the process (or test) lifetime.
    pub fn connect(rank_count: usize) -> Result<Vec<RingNode>, AttentionError> {
        if rank_count == 0 {
            return Err(AttentionError::InvalidTopology(
                "rank count must be positive".into(),
            ));
        }

        let mut senders = Vec::with_capacity(rank_count);
        let mut receivers = Vec::with_capacity(rank_count);
        for _ in 0..rank_count {
            let (tx, rx) = channel();
            senders.push(tx);
            receivers.push(rx);
        }

        // Channel r is the inbox of rank r; rank r sends into inbox r+1.
        Ok(receivers
            .into_iter()
            .enumerate()
            .map(|(rank, from_prev)| RingNode {
                rank,
                rank_count,
                to_next: senders[(rank + 1) % rank_count].clone(),
                from_prev,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tag: f32) -> KvBlock {
        KvBlock {
            keys: TensorData::new(vec![tag], [1]),
            values: TensorData::new(vec![-tag], [1]),
        }
    }

    #[test]
    fn connect_assigns_ranks_in_order() {
        let nodes = RingTopology::connect(4).unwrap();
        assert_eq!(nodes.len(), 4);
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.rank(), i);
            assert_eq!(node.rank_count(), 4);
        }
    }

    #[test]
    fn blocks_travel_to_the_successor() {
        let nodes = RingTopology::connect(3).unwrap();
        nodes[0].send(block(1.0), 0).unwrap();
        let received = nodes[1].recv(0).unwrap();
        assert_eq!(received.keys.to_vec::<f32>().unwrap(), vec![1.0]);

        // The ring wraps around.
        nodes[2].send(block(3.0), 0).unwrap();
        let received = nodes[0].recv(0).unwrap();
        assert_eq!(received.keys.to_vec::<f32>().unwrap(), vec![3.0]);
    }

    #[test]
    fn zero_ranks_rejected() {
        assert!(matches!(
            RingTopology::connect(0),
            Err(AttentionError::InvalidTopology(_))
        ));
    }

    #[test]
    fn dropped_neighbor_is_a_communication_failure() {
        let mut nodes = RingTopology::connect(2).unwrap();
        let survivor = nodes.remove(0);
        drop(nodes); // rank 1 gone: its inbox and sender are closed

        assert!(matches!(
            survivor.send(block(1.0), 0),
            Err(AttentionError::Communication { round: 0, .. })
        ));
    }
}
