//! GELU activation, tanh approximation.
//!
//! gelu(x) = 0.5 * x * (1 + tanh(sqrt(2/pi)*(x + 0.044715x^3)))
//! from https://arxiv.org/pdf/1606.08415.pdf

const SQRT_2_OVER_PI: f32 = 0.797_884_6;

/// Compute the GELU activation for a single value.
pub fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044715 * x.powi(3))).tanh())
}
