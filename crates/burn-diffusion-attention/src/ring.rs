//! Ring-exchange attention with online softmax accumulation.

use burn::prelude::*;

use crate::AttentionError;
use crate::reference::qkv_attention;
use crate::topology::{KvBlock, RingNode};

/// Exact attention for this rank's query shard, streaming K/V shards
/// around the ring.
///
/// Inputs are this rank's shards, shaped `[batch, heads, local_len,
/// head_dim]`. In `rank_count - 1` rounds each rank forwards the K/V
/// block it currently holds to its successor and receives the next one
/// from its predecessor; the blocking receive is the per-round barrier,
/// so all ranks advance in lock-step. Scores against each block fold into
/// a running max / normalizer / weighted accumulator, which keeps peak
/// memory at O(local_len * head_dim) and makes the final normalization
/// exact without ever holding the full score matrix.
///
/// A failed send or receive aborts the call; partial ring state is not
/// resumable. With a single rank this is ordinary full attention and no
/// communication happens.
pub fn ring_attention<B: Backend>(
    node: &RingNode,
    q: Tensor<B, 4>,
    k: Tensor<B, 4>,
    v: Tensor<B, 4>,
) -> Result<Tensor<B, 4>, AttentionError> {
    let rank_count = node.rank_count();
    if rank_count == 1 {
        return Ok(qkv_attention(q, k, v));
    }

    let [batch, heads, q_len, head_dim] = q.dims();
    let scale = (head_dim as f64).powf(-0.5);
    let device = q.device();

    let mut accumulator: Tensor<B, 4> = Tensor::zeros([batch, heads, q_len, head_dim], &device);
    let mut normalizer: Tensor<B, 4> = Tensor::zeros([batch, heads, q_len, 1], &device);
    let mut running_max: Tensor<B, 4> =
        Tensor::full([batch, heads, q_len, 1], f32::NEG_INFINITY, &device);

    let mut k_block = k;
    let mut v_block = v;

    for round in 0..rank_count {
        let scores = q.clone().matmul(k_block.clone().transpose()) * scale;

        let block_max = scores.clone().max_dim(3);
        let new_max = running_max.clone().max_pair(block_max);
        let correction = (running_max - new_max.clone()).exp();
        let exp_scores = (scores - new_max.clone()).exp();

        normalizer = normalizer * correction.clone() + exp_scores.clone().sum_dim(3);
        accumulator = accumulator * correction + exp_scores.matmul(v_block.clone());
        running_max = new_max;

        // Last block accumulated locally; nothing left to exchange.
        if round + 1 < rank_count {
            node.send(
                KvBlock {
                    keys: k_block.into_data(),
                    values: v_block.into_data(),
                },
                round,
            )?;
            let incoming = node.recv(round)?;
            k_block = Tensor::from_data(incoming.keys, &device);
            v_block = Tensor::from_data(incoming.values, &device);
        }
    }

    Ok(accumulator / normalizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::RingTopology;

    type TestBackend = burn_ndarray::NdArray;

    fn filled(shape: [usize; 4], offset: f32) -> Tensor<TestBackend, 4> {
        let count: usize = shape.iter().product();
        let values: Vec<f32> = (0..count)
            .map(|i| ((i as f32 + offset) * 0.61).cos())
            .collect();
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn single_rank_matches_reference() {
        let node = RingTopology::connect(1).unwrap().remove(0);
        let q = filled([1, 2, 6, 4], 0.0);
        let k = filled([1, 2, 6, 4], 2.0);
        let v = filled([1, 2, 6, 4], 4.0);

        let ring = ring_attention(&node, q.clone(), k.clone(), v.clone()).unwrap();
        let reference = qkv_attention(q, k, v);

        let a = ring.into_data().to_vec::<f32>().unwrap();
        let b = reference.into_data().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}
