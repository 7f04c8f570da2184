//! Forward-pass mode and inverted dropout.
//!
//! Randomness never comes from ambient state: training mode carries its own
//! seeded generator, so a pass is reproducible from `(parameters, input, seed)`.

use crate::error::{EncoderError, Result};
use crate::tensor::Tensor3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug)]
pub enum ForwardMode {
    /// Dropout is the identity.
    Inference,
    /// Dropout samples masks from the carried generator.
    Training(StdRng),
}

impl ForwardMode {
    pub fn inference() -> Self {
        ForwardMode::Inference
    }

    pub fn training(seed: u64) -> Self {
        ForwardMode::Training(StdRng::seed_from_u64(seed))
    }

    pub fn is_training(&self) -> bool {
        matches!(self, ForwardMode::Training(_))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dropout {
    #[serde(deserialize_with = "probability")]
    p: f32,
}

fn probability<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f32, D::Error> {
    let p = f32::deserialize(deserializer)?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(D::Error::custom(format!(
            "dropout probability {p} is outside [0, 1]"
        )))
    }
}

impl Dropout {
    /// `p` is clamped into `[0, 1]`; NaN becomes 0.
    pub fn new(p: f32) -> Self {
        Dropout {
            p: if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) },
        }
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    /// Zero each element with probability `p` and scale survivors by `1 / (1 - p)`.
    pub fn apply(&self, values: &mut [f32], mode: &mut ForwardMode) {
        let ForwardMode::Training(rng) = mode else {
            return;
        };
        if self.p == 0.0 {
            return;
        }
        if self.p >= 1.0 {
            values.iter_mut().for_each(|v| *v = 0.0);
            return;
        }
        let scale = 1.0 / (1.0 - self.p);
        for v in values.iter_mut() {
            if rng.gen_range(0.0f32..1.0) < self.p {
                *v = 0.0;
            } else {
                *v *= scale;
            }
        }
    }

    /// Fails unless `p` is a probability equal to `expected` (the config's `dropout_prob`).
    pub(crate) fn check_consistency(&self, context: &'static str, expected: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&self.p) || self.p != expected {
            return Err(EncoderError::InvalidConfig(format!(
                "{context} dropout probability {} does not match configured {expected}",
                self.p
            )));
        }
        Ok(())
    }

    pub fn forward(&self, mut x: Tensor3, mode: &mut ForwardMode) -> Tensor3 {
        self.apply(x.data_mut(), mode);
        x
    }
}
