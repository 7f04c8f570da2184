use crate::cpu_utils::join_name;
use crate::dropout::ForwardMode;
use crate::error::{EncoderError, Result};
use crate::layer::{Layer, Parameters};
use crate::tensor::Tensor3;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerNorm {
    gamma: Vec<f32>, // scale
    beta: Vec<f32>,  // shift
    eps: f32,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f32) -> Self {
        LayerNorm {
            gamma: vec![1.0; dim],
            beta: vec![0.0; dim],
            eps,
        }
    }

    pub fn dim(&self) -> usize {
        self.gamma.len()
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }

    /// Normalize one feature vector to zero mean and unit variance, then scale and shift.
    pub fn forward_vec(&self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() != self.gamma.len() {
            return Err(EncoderError::shape(
                "layer norm",
                format!("{} features", self.gamma.len()),
                format!("{} features", input.len()),
            ));
        }
        let n = input.len() as f32;
        let mean = input.iter().sum::<f32>() / n;
        let var = input.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        let inv_std = 1.0 / (var + self.eps).sqrt();
        Ok(input
            .iter()
            .zip(self.gamma.iter().zip(&self.beta))
            .map(|(x, (g, b))| g * (x - mean) * inv_std + b)
            .collect())
    }

    /// Fails unless both affine vectors have `dim` entries and `eps` is positive and finite.
    pub(crate) fn check_consistency(&self, context: &'static str, dim: usize) -> Result<()> {
        if self.gamma.len() != dim || self.beta.len() != dim {
            return Err(EncoderError::shape(
                context,
                format!("{dim} scale and shift values"),
                format!("{} scale and {} shift values", self.gamma.len(), self.beta.len()),
            ));
        }
        if !(self.eps > 0.0 && self.eps.is_finite()) {
            return Err(EncoderError::InvalidConfig(format!(
                "{context} epsilon {} must be a positive finite number",
                self.eps
            )));
        }
        Ok(())
    }
}

impl Layer for LayerNorm {
    fn forward(&self, x: &Tensor3, _mode: &mut ForwardMode) -> Result<Tensor3> {
        x.expect_dim("layer norm", self.dim())?;
        x.map_rows(self.dim(), |row| self.forward_vec(row))
    }
}

impl Parameters for LayerNorm {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        f(&join_name(prefix, "gamma"), &self.gamma);
        f(&join_name(prefix, "beta"), &self.beta);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        f(&join_name(prefix, "gamma"), &mut self.gamma);
        f(&join_name(prefix, "beta"), &mut self.beta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_has_zero_mean_unit_variance() -> Result<()> {
        let norm = LayerNorm::new(4, 1e-5);
        let out = norm.forward_vec(&[1.0, 2.0, 3.0, 4.0])?;
        let mean = out.iter().sum::<f32>() / 4.0;
        let var = out.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn constant_input_stays_finite() -> Result<()> {
        let norm = LayerNorm::new(3, 1e-12);
        let out = norm.forward_vec(&[5.0, 5.0, 5.0])?;
        assert!(out.iter().all(|x| x.is_finite() && *x == 0.0));
        Ok(())
    }

    #[test]
    fn affine_parameters_are_applied() -> Result<()> {
        let mut norm = LayerNorm::new(2, 1e-5);
        norm.visit_parameters_mut("", &mut |name, values| {
            let fill = if name == "gamma" { 2.0 } else { 1.0 };
            values.iter_mut().for_each(|v| *v = fill);
        });
        let out = norm.forward_vec(&[-1.0, 1.0])?;
        assert!((out[0] + 1.0).abs() < 1e-3);
        assert!((out[1] - 3.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn normalizes_each_position_independently() -> Result<()> {
        let norm = LayerNorm::new(2, 1e-5);
        let x = Tensor3::new(1, 2, 2, vec![0.0, 2.0, 10.0, 30.0])?;
        let y = norm.forward(&x, &mut ForwardMode::inference())?;
        assert!((y.row(0, 0)[0] - y.row(0, 1)[0]).abs() < 1e-4);
        assert!(norm.forward(&Tensor3::zeros(1, 2, 3), &mut ForwardMode::inference()).is_err());
        Ok(())
    }

    #[test]
    fn consistency_rejects_bad_epsilon_and_width() {
        assert!(LayerNorm::new(4, 1e-5).check_consistency("test", 4).is_ok());
        assert!(LayerNorm::new(4, 1e-5).check_consistency("test", 5).is_err());
        for eps in [0.0, -1e-5, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                LayerNorm::new(4, eps).check_consistency("test", 4),
                Err(EncoderError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn deserialized_epsilon_is_checked() -> Result<()> {
        let norm: LayerNorm =
            serde_json::from_str(r#"{"gamma": [1.0, 1.0], "beta": [0.0, 0.0], "eps": 0.0}"#)?;
        assert!(norm.check_consistency("test", 2).is_err());
        Ok(())
    }
}
