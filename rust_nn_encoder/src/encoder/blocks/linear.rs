use crate::cpu_utils::{join_name, matvec_mul_add_bias, xavier_uniform};
use crate::error::{EncoderError, Result};
use crate::layer::Parameters;
use crate::tensor::Tensor3;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Linear {
    in_dim: usize,
    out_dim: usize,
    weight: Vec<f32>, // shape: [out_dim][in_dim], row-major
    bias: Vec<f32>,   // shape: [out_dim]
}

impl Linear {
    pub fn new<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        // Xavier/Glorot uniform initialization
        let weight = xavier_uniform(rng, out_dim, in_dim);
        let bias: Vec<f32> = (0..out_dim).map(|_| rng.gen_range(-1e-2..1e-2)).collect();
        Linear {
            in_dim,
            out_dim,
            weight,
            bias,
        }
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Project a single feature vector: `[in_dim] -> [out_dim]`.
    pub fn forward_vec(&self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() != self.in_dim {
            return Err(EncoderError::shape(
                "linear projection",
                format!("{} input features", self.in_dim),
                format!("{} input features", input.len()),
            ));
        }
        Ok(matvec_mul_add_bias(
            &self.weight,
            self.in_dim,
            input,
            &self.bias,
        ))
    }

    /// Project every position: `(B, L, in_dim) -> (B, L, out_dim)`, rows in parallel.
    pub fn forward(&self, x: &Tensor3) -> Result<Tensor3> {
        x.expect_dim("linear projection", self.in_dim)?;
        x.map_rows(self.out_dim, |row| self.forward_vec(row))
    }

    /// Fails unless this is an `in_dim -> out_dim` projection with matching storage.
    pub(crate) fn check_consistency(
        &self,
        context: &'static str,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<()> {
        if self.in_dim != in_dim
            || self.out_dim != out_dim
            || self.weight.len() != in_dim * out_dim
            || self.bias.len() != out_dim
        {
            return Err(EncoderError::shape(
                context,
                format!("[{out_dim}][{in_dim}] weight and [{out_dim}] bias"),
                format!(
                    "{} -> {} with {} weights and {} biases",
                    self.in_dim,
                    self.out_dim,
                    self.weight.len(),
                    self.bias.len()
                ),
            ));
        }
        Ok(())
    }
}

impl Parameters for Linear {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        f(&join_name(prefix, "weight"), &self.weight);
        f(&join_name(prefix, "bias"), &self.bias);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        f(&join_name(prefix, "weight"), &mut self.weight);
        f(&join_name(prefix, "bias"), &mut self.bias);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn identity_with_bias(dim: usize, bias: f32) -> Linear {
        let mut rng = StdRng::seed_from_u64(0);
        let mut linear = Linear::new(dim, dim, &mut rng);
        linear.visit_parameters_mut("", &mut |name, values| {
            if name == "weight" {
                for (i, v) in values.iter_mut().enumerate() {
                    *v = if i % (dim + 1) == 0 { 1.0 } else { 0.0 };
                }
            } else {
                values.iter_mut().for_each(|v| *v = bias);
            }
        });
        linear
    }

    #[test]
    fn forward_applies_weight_and_bias() -> Result<()> {
        let linear = identity_with_bias(3, 0.5);
        assert_eq!(linear.forward_vec(&[1.0, 2.0, 3.0])?, vec![1.5, 2.5, 3.5]);
        Ok(())
    }

    #[test]
    fn forward_maps_every_position() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let linear = Linear::new(4, 3, &mut rng);
        let x = Tensor3::new(2, 5, 4, (0..40).map(|v| v as f32 * 0.1).collect())?;
        let y = linear.forward(&x)?;
        assert_eq!(y.shape(), (2, 5, 3));
        assert_eq!(y.row(1, 2), linear.forward_vec(x.row(1, 2))?.as_slice());
        Ok(())
    }

    #[test]
    fn wrong_input_width_is_a_shape_error() {
        let mut rng = StdRng::seed_from_u64(2);
        let linear = Linear::new(4, 3, &mut rng);
        assert!(matches!(
            linear.forward_vec(&[1.0, 2.0]),
            Err(EncoderError::ShapeMismatch { .. })
        ));
        assert!(linear.forward(&Tensor3::zeros(1, 2, 5)).is_err());
    }

    #[test]
    fn zero_input_width_yields_the_bias() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(4);
        let linear = Linear::new(0, 3, &mut rng);
        let mut bias = Vec::new();
        linear.visit_parameters("", &mut |name, values| {
            if name == "bias" {
                bias = values.to_vec();
            }
        });
        assert_eq!(linear.forward_vec(&[])?, bias);
        let projected = linear.forward(&Tensor3::zeros(2, 1, 0))?;
        assert_eq!(projected.shape(), (2, 1, 3));
        assert_eq!(projected.row(1, 0), bias.as_slice());
        Ok(())
    }

    #[test]
    fn consistency_checks_declared_dimensions() {
        let mut rng = StdRng::seed_from_u64(5);
        let linear = Linear::new(4, 3, &mut rng);
        assert!(linear.check_consistency("test", 4, 3).is_ok());
        assert!(linear.check_consistency("test", 3, 4).is_err());
        assert!(linear.check_consistency("test", 4, 0).is_err());
    }

    #[test]
    fn parameters_are_enumerated() {
        let mut rng = StdRng::seed_from_u64(3);
        let linear = Linear::new(4, 3, &mut rng);
        assert_eq!(linear.num_parameters(), 4 * 3 + 3);
        assert_eq!(linear.parameter_names(), vec!["weight", "bias"]);
    }
}
