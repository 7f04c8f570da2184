use super::layernorm::LayerNorm;
use crate::cpu_utils::join_name;
use crate::dropout::ForwardMode;
use crate::error::Result;
use crate::layer::{Layer, Parameters};
use crate::tensor::Tensor3;
use serde::{Deserialize, Serialize};

/// Pre-normalization residual: `x + inner(norm(x))`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreNormResidual<L> {
    norm: LayerNorm,
    inner: L,
}

impl<L> PreNormResidual<L> {
    pub fn new(norm: LayerNorm, inner: L) -> Self {
        PreNormResidual { norm, inner }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn norm(&self) -> &LayerNorm {
        &self.norm
    }
}

impl<L: Layer> Layer for PreNormResidual<L> {
    fn forward(&self, x: &Tensor3, mode: &mut ForwardMode) -> Result<Tensor3> {
        let normed = self.norm.forward(x, mode)?;
        let delta = self.inner.forward(&normed, mode)?;
        x.add(&delta)
    }
}

impl<L: Parameters> Parameters for PreNormResidual<L> {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        self.norm.visit_parameters(&join_name(prefix, "norm"), f);
        self.inner.visit_parameters(&join_name(prefix, "inner"), f);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        self.norm.visit_parameters_mut(&join_name(prefix, "norm"), f);
        self.inner.visit_parameters_mut(&join_name(prefix, "inner"), f);
    }
}
