//! Attention dispatch handle handed to score models.

use burn::prelude::*;

use crate::AttentionError;
use crate::reference::qkv_attention;
use crate::ring::ring_attention;
use crate::topology::RingNode;

/// Where a model's internal attention runs.
///
/// Single-rank runs use the local kernel; multi-rank runs route through
/// the ring. The engine resolves this once per rank and passes it into
/// every model invocation, so the model itself stays topology-agnostic.
pub enum AttentionContext {
    /// Ordinary full attention on this worker.
    Local,
    /// Ring-exchange attention; this worker holds the given ring node.
    Ring(RingNode),
}

impl AttentionContext {
    pub fn rank(&self) -> usize {
        match self {
            AttentionContext::Local => 0,
            AttentionContext::Ring(node) => node.rank(),
        }
    }

    pub fn rank_count(&self) -> usize {
        match self {
            AttentionContext::Local => 1,
            AttentionContext::Ring(node) => node.rank_count(),
        }
    }

    /// Compute attention for this worker's shard of Q/K/V.
    pub fn attention<B: Backend>(
        &self,
        q: Tensor<B, 4>,
        k: Tensor<B, 4>,
        v: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>, AttentionError> {
        match self {
            AttentionContext::Local => Ok(qkv_attention(q, k, v)),
            AttentionContext::Ring(node) => ring_attention(node, q, k, v),
        }
    }
}
