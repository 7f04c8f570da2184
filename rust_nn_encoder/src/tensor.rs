//! Dense `(batch, seq_len, dim)` tensor used between every block of the encoder.
//!
//! Storage is a single row-major `Vec<f32>`; a "row" is the `dim`-wide feature
//! vector of one position in one batch item.

use crate::error::{EncoderError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor3 {
    batch: usize,
    seq_len: usize,
    dim: usize,
    data: Vec<f32>,
}

impl Tensor3 {
    pub fn new(batch: usize, seq_len: usize, dim: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != batch * seq_len * dim {
            return Err(EncoderError::shape(
                "tensor construction",
                format!("{} values for ({batch}, {seq_len}, {dim})", batch * seq_len * dim),
                format!("{} values", data.len()),
            ));
        }
        Ok(Tensor3 {
            batch,
            seq_len,
            dim,
            data,
        })
    }

    pub fn zeros(batch: usize, seq_len: usize, dim: usize) -> Self {
        Tensor3 {
            batch,
            seq_len,
            dim,
            data: vec![0.0; batch * seq_len * dim],
        }
    }

    /// Build from `[batch][position][feature]` nested vectors; every level must be rectangular.
    pub fn from_nested(nested: &[Vec<Vec<f32>>]) -> Result<Self> {
        let batch = nested.len();
        let seq_len = nested.first().map_or(0, |s| s.len());
        let dim = nested
            .first()
            .and_then(|s| s.first())
            .map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(batch * seq_len * dim);
        for seq in nested {
            if seq.len() != seq_len {
                return Err(EncoderError::shape(
                    "nested tensor",
                    format!("{seq_len} positions"),
                    format!("{} positions", seq.len()),
                ));
            }
            for row in seq {
                if row.len() != dim {
                    return Err(EncoderError::shape(
                        "nested tensor",
                        format!("{dim} features"),
                        format!("{} features", row.len()),
                    ));
                }
                data.extend_from_slice(row);
            }
        }
        Tensor3::new(batch, seq_len, dim, data)
    }

    pub fn to_nested(&self) -> Vec<Vec<Vec<f32>>> {
        (0..self.batch)
            .map(|b| {
                self.sequence(b)
                    .chunks(self.dim.max(1))
                    .map(|row| row.to_vec())
                    .collect()
            })
            .collect()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.batch, self.seq_len, self.dim)
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Feature vector at `(b, pos)`. Panics on out-of-range indices, like slice indexing.
    pub fn row(&self, b: usize, pos: usize) -> &[f32] {
        let start = (b * self.seq_len + pos) * self.dim;
        &self.data[start..start + self.dim]
    }

    /// All positions of batch item `b`, flattened `[seq_len * dim]`.
    pub fn sequence(&self, b: usize) -> &[f32] {
        let len = self.seq_len * self.dim;
        &self.data[b * len..(b + 1) * len]
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Fail with a shape error unless the trailing dimension equals `dim`.
    pub fn expect_dim(&self, context: &'static str, dim: usize) -> Result<()> {
        if self.dim != dim {
            return Err(EncoderError::shape(
                context,
                format!("(_, _, {dim})"),
                format!("{:?}", self.shape()),
            ));
        }
        Ok(())
    }

    /// Apply `f` to every row in parallel, producing rows of width `out_dim`.
    pub fn map_rows<F>(&self, out_dim: usize, f: F) -> Result<Tensor3>
    where
        F: Fn(&[f32]) -> Result<Vec<f32>> + Sync + Send,
    {
        let rows: Vec<Vec<f32>> = if self.dim == 0 {
            // zero-width rows cannot be chunked; every row is the empty slice
            (0..self.batch * self.seq_len)
                .into_par_iter()
                .map(|_| f(&[]))
                .collect::<Result<_>>()?
        } else {
            self.data
                .par_chunks(self.dim)
                .map(|row| f(row))
                .collect::<Result<_>>()?
        };
        let mut data = Vec::with_capacity(self.batch * self.seq_len * out_dim);
        for row in rows {
            if row.len() != out_dim {
                return Err(EncoderError::shape(
                    "row map",
                    format!("{out_dim} features"),
                    format!("{} features", row.len()),
                ));
            }
            data.extend(row);
        }
        Tensor3::new(self.batch, self.seq_len, out_dim, data)
    }

    /// Elementwise sum; shapes must match exactly, there is no broadcasting.
    pub fn add(&self, other: &Tensor3) -> Result<Tensor3> {
        if self.shape() != other.shape() {
            return Err(EncoderError::shape(
                "elementwise add",
                format!("{:?}", self.shape()),
                format!("{:?}", other.shape()),
            ));
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a + b)
            .collect();
        Tensor3::new(self.batch, self.seq_len, self.dim, data)
    }

    /// Concatenate along the feature axis. All parts must share batch and sequence length.
    pub fn concat_features(parts: &[Tensor3]) -> Result<Tensor3> {
        let Some(first) = parts.first() else {
            return Err(EncoderError::shape(
                "feature concatenation",
                "at least one tensor",
                "none",
            ));
        };
        let (batch, seq_len) = (first.batch, first.seq_len);
        for part in parts {
            if part.batch != batch || part.seq_len != seq_len {
                return Err(EncoderError::shape(
                    "feature concatenation",
                    format!("({batch}, {seq_len}, _)"),
                    format!("{:?}", part.shape()),
                ));
            }
        }
        let dim: usize = parts.iter().map(|p| p.dim).sum();
        let mut data = Vec::with_capacity(batch * seq_len * dim);
        for b in 0..batch {
            for pos in 0..seq_len {
                for part in parts {
                    data.extend_from_slice(part.row(b, pos));
                }
            }
        }
        Tensor3::new(batch, seq_len, dim, data)
    }
}
