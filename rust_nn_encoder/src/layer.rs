use crate::dropout::ForwardMode;
use crate::error::Result;
use crate::tensor::Tensor3;

/// A shape-preserving transform over `(batch, seq_len, hidden)` tensors.
pub trait Layer: Send + Sync {
    fn forward(&self, x: &Tensor3, mode: &mut ForwardMode) -> Result<Tensor3>;
}

/// Enumeration of learned parameters by dotted name, for optimizers and checkpoint tooling.
///
/// Each component owns its tensors; the mutable visitor is the only way to
/// change them from outside.
pub trait Parameters {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32]));

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32]));

    fn num_parameters(&self) -> usize {
        let mut count = 0;
        self.visit_parameters("", &mut |_, values| count += values.len());
        count
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.visit_parameters("", &mut |name, _| names.push(name.to_string()));
        names
    }
}
