//! Single-rank attention kernels.
//!
//! The standard kernel is the rank-count-1 path of the distributed layer
//! and the oracle the ring implementation is tested against.

use burn::prelude::*;

/// Scaled dot-product attention: `softmax(Q K^T / sqrt(d)) V`.
///
/// Shapes are `[batch, heads, seq, head_dim]`. The scale is split across
/// Q and K to keep intermediate magnitudes small.
pub fn qkv_attention<B: Backend>(
    q: Tensor<B, 4>,
    k: Tensor<B, 4>,
    v: Tensor<B, 4>,
) -> Tensor<B, 4> {
    let [_batch, _heads, _seq_len, head_dim] = q.dims();
    let scale = (head_dim as f64).powf(-0.25);

    let q = q * scale;
    let k = k * scale;

    let attn = q.matmul(k.transpose());
    let attn = burn::tensor::activation::softmax(attn, 3);

    attn.matmul(v)
}

/// Memory-efficient variant processing queries in chunks.
///
/// Peak memory scales with `chunk_size * kv_len` instead of
/// `seq_len * kv_len`; output is identical to [`qkv_attention`].
pub fn chunked_attention<B: Backend>(
    q: Tensor<B, 4>,
    k: Tensor<B, 4>,
    v: Tensor<B, 4>,
    chunk_size: usize,
) -> Tensor<B, 4> {
    let [batch, heads, seq_len, head_dim] = q.dims();

    if seq_len <= chunk_size {
        return qkv_attention(q, k, v);
    }

    let num_chunks = seq_len.div_ceil(chunk_size);
    let mut outputs = Vec::with_capacity(num_chunks);

    for chunk in 0..num_chunks {
        let start = chunk * chunk_size;
        let end = (start + chunk_size).min(seq_len);

        let q_chunk = q
            .clone()
            .slice([0..batch, 0..heads, start..end, 0..head_dim]);
        outputs.push(qkv_attention(q_chunk, k.clone(), v.clone()));
    }

    Tensor::cat(outputs, 2)
}
