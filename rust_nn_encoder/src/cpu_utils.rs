//! Shared CPU numeric helpers for the encoder blocks.

use rand::Rng;
use rand::distributions::{Distribution, Uniform};

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Numerically stable softmax. Entries equal to `-inf` get exactly zero weight.
pub fn softmax(xs: &[f32]) -> Vec<f32> {
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; xs.len()];
    }
    let exps: Vec<f32> = xs.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// Matrix-vector multiply with bias.
/// mat: flat [rows * cols] row-major, vec: [cols], bias: [rows]
pub fn matvec_mul_add_bias(mat: &[f32], cols: usize, vec: &[f32], bias: &[f32]) -> Vec<f32> {
    if cols == 0 {
        return bias.to_vec();
    }
    mat.chunks(cols)
        .zip(bias)
        .map(|(w_row, b)| dot(w_row, vec) + b)
        .collect()
}

/// Xavier/Glorot uniform samples for a `[rows][cols]` matrix, flattened row-major.
pub fn xavier_uniform<R: Rng + ?Sized>(rng: &mut R, rows: usize, cols: usize) -> Vec<f32> {
    let limit = (6.0f32 / (rows as f32 + cols as f32)).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    (0..rows * cols).map(|_| dist.sample(rng)).collect()
}

/// Lookup-table init: uniform with the variance of `N(0, 0.02^2)`.
pub fn embedding_init<R: Rng + ?Sized>(rng: &mut R, rows: usize, cols: usize) -> Vec<f32> {
    let limit = 0.02f32 * 3.0f32.sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    (0..rows * cols).map(|_| dist.sample(rng)).collect()
}

/// Prefix a parameter name with its owner's path, e.g. `layers.0` + `norm.gamma`.
pub fn join_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
