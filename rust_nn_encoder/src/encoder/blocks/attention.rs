//! Scaled dot-product attention and a single learned attention head.
//!
//! `attention(q, k, v) = softmax(q·kᵀ / sqrt(d_k)) · v`, computed per batch item.
//! Weights are returned as a `(batch, q_len, k_len)` tensor so callers can
//! inspect them.

use super::linear::Linear;
use crate::cpu_utils::{dot, join_name, softmax};
use crate::error::{EncoderError, Result};
use crate::layer::Parameters;
use crate::tensor::Tensor3;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Masking {
    #[default]
    None,
    /// Query `i` may only attend to keys `j <= i + (k_len - q_len)`.
    Causal,
}

impl Masking {
    fn allows(self, query: usize, key: usize, offset: usize) -> bool {
        match self {
            Masking::None => true,
            Masking::Causal => key <= query + offset,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttentionOutput {
    pub output: Tensor3,
    pub weights: Tensor3,
}

type ItemResult = (Vec<f32>, Vec<f32>);

pub fn scaled_dot_product_attention(
    q: &Tensor3,
    k: &Tensor3,
    v: &Tensor3,
    masking: Masking,
) -> Result<AttentionOutput> {
    let (batch, q_len, d_k) = q.shape();
    let (k_batch, k_len, k_dim) = k.shape();
    if k.shape() != v.shape() {
        return Err(EncoderError::shape(
            "attention keys/values",
            format!("values shaped like keys {:?}", k.shape()),
            format!("{:?}", v.shape()),
        ));
    }
    if k_batch != batch || k_dim != d_k {
        return Err(EncoderError::shape(
            "attention queries/keys",
            format!("({batch}, _, {d_k})"),
            format!("{:?}", k.shape()),
        ));
    }
    if masking == Masking::Causal && k_len < q_len {
        return Err(EncoderError::shape(
            "causal attention",
            format!("at least {q_len} keys"),
            format!("{k_len} keys"),
        ));
    }
    let offset = k_len.saturating_sub(q_len);
    let scale = 1.0 / (d_k as f32).sqrt();

    // Parallelize over batch items, each returns (output rows, weight rows)
    let per_item: Vec<ItemResult> = (0..batch)
        .into_par_iter()
        .map(|b| {
            let mut out = vec![0.0; q_len * d_k];
            let mut weights = Vec::with_capacity(q_len * k_len);
            for i in 0..q_len {
                let qi = q.row(b, i);
                let scores: Vec<f32> = (0..k_len)
                    .map(|j| {
                        if masking.allows(i, j, offset) {
                            dot(qi, k.row(b, j)) * scale
                        } else {
                            f32::NEG_INFINITY
                        }
                    })
                    .collect();
                let attn = softmax(&scores);
                let out_row = &mut out[i * d_k..(i + 1) * d_k];
                for (j, w) in attn.iter().enumerate() {
                    if *w == 0.0 {
                        continue;
                    }
                    for (o, x) in out_row.iter_mut().zip(v.row(b, j)) {
                        *o += w * x;
                    }
                }
                weights.extend(attn);
            }
            (out, weights)
        })
        .collect();

    let mut out_data = Vec::with_capacity(batch * q_len * d_k);
    let mut weight_data = Vec::with_capacity(batch * q_len * k_len);
    for (out, weights) in per_item {
        out_data.extend(out);
        weight_data.extend(weights);
    }
    Ok(AttentionOutput {
        output: Tensor3::new(batch, q_len, d_k, out_data)?,
        weights: Tensor3::new(batch, q_len, k_len, weight_data)?,
    })
}

/// One attention head: independent query/key/value projections `hidden -> head_dim`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttentionHead {
    query: Linear,
    key: Linear,
    value: Linear,
    #[serde(default)]
    masking: Masking,
}

impl AttentionHead {
    pub fn new<R: Rng + ?Sized>(hidden_size: usize, head_dim: usize, rng: &mut R) -> Self {
        AttentionHead {
            query: Linear::new(hidden_size, head_dim, rng),
            key: Linear::new(hidden_size, head_dim, rng),
            value: Linear::new(hidden_size, head_dim, rng),
            masking: Masking::None,
        }
    }

    pub fn with_masking(mut self, masking: Masking) -> Self {
        self.masking = masking;
        self
    }

    pub fn masking(&self) -> Masking {
        self.masking
    }

    pub fn head_dim(&self) -> usize {
        self.query.out_dim()
    }

    /// `(B, L, hidden)` to `(B, L, head_dim)` plus the `(B, L, L)` weights.
    pub fn forward_with_weights(&self, x: &Tensor3) -> Result<AttentionOutput> {
        let q = self.query.forward(x)?;
        let k = self.key.forward(x)?;
        let v = self.value.forward(x)?;
        scaled_dot_product_attention(&q, &k, &v, self.masking)
    }

    pub fn forward(&self, x: &Tensor3) -> Result<Tensor3> {
        Ok(self.forward_with_weights(x)?.output)
    }

    pub(crate) fn check_consistency(&self, hidden_size: usize, head_dim: usize) -> Result<()> {
        self.query
            .check_consistency("attention query projection", hidden_size, head_dim)?;
        self.key
            .check_consistency("attention key projection", hidden_size, head_dim)?;
        self.value
            .check_consistency("attention value projection", hidden_size, head_dim)
    }
}

impl Parameters for AttentionHead {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        self.query.visit_parameters(&join_name(prefix, "query"), f);
        self.key.visit_parameters(&join_name(prefix, "key"), f);
        self.value.visit_parameters(&join_name(prefix, "value"), f);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        self.query.visit_parameters_mut(&join_name(prefix, "query"), f);
        self.key.visit_parameters_mut(&join_name(prefix, "key"), f);
        self.value.visit_parameters_mut(&join_name(prefix, "value"), f);
    }
}
