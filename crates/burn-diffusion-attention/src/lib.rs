//! Distributed attention over sharded sequences.
//!
//! High-resolution and video diffusion produce token sequences too long to
//! attend over on a single worker. This crate partitions the sequence into
//! contiguous per-rank shards ([`partition`]) and computes exact attention
//! with a ring exchange ([`ring_attention`]): each rank keeps only its own
//! Q shard and streams remote K/V shards from its ring predecessor,
//! accumulating with an online softmax so no rank ever materializes the
//! full sequence.
//!
//! Topologies are explicit objects ([`RingTopology`]); several independent
//! ones can coexist in a process, which is how the tests simulate
//! multi-rank runs on threads.

pub mod context;
pub mod partition;
pub mod reference;
pub mod ring;
pub mod topology;

use thiserror::Error;

pub use context::AttentionContext;
pub use partition::{SequenceShard, partition};
pub use reference::{chunked_attention, qkv_attention};
pub use ring::ring_attention;
pub use topology::{KvBlock, RingNode, RingTopology};

#[derive(Error, Debug)]
pub enum AttentionError {
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("ring communication failure at round {round}: {reason}")]
    Communication { round: usize, reason: String },
}
