//! Sequence classification on top of the encoder.
//!
//! The head reads only position 0 (the summary token) and returns raw logits;
//! softmax belongs to whatever loss consumes them.

use super::Encoder;
use super::blocks::Linear;
use crate::config::EncoderConfig;
use crate::cpu_utils::join_name;
use crate::dropout::{Dropout, ForwardMode};
use crate::error::{EncoderError, Result};
use crate::layer::Parameters;
use crate::tensor::Tensor3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// `[batch][num_labels]` unnormalized class scores.
pub type Logits = Vec<Vec<f32>>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassificationHead {
    dropout: Dropout,
    classifier: Linear,
}

impl ClassificationHead {
    pub fn new<R: Rng + ?Sized>(config: &EncoderConfig, rng: &mut R) -> Self {
        ClassificationHead {
            dropout: Dropout::new(config.dropout_prob),
            classifier: Linear::new(config.hidden_size, config.num_labels, rng),
        }
    }

    pub fn num_labels(&self) -> usize {
        self.classifier.out_dim()
    }

    pub(crate) fn check_consistency(&self, config: &EncoderConfig) -> Result<()> {
        self.classifier.check_consistency(
            "classification head",
            config.hidden_size,
            config.num_labels,
        )?;
        self.dropout
            .check_consistency("classification head", config.dropout_prob)
    }

    /// `(B, L, hidden)` to `(B, num_labels)` logits from each item's first position.
    pub fn forward(&self, hidden: &Tensor3, mode: &mut ForwardMode) -> Result<Logits> {
        hidden.expect_dim("classification head input", self.classifier.in_dim())?;
        if hidden.seq_len() == 0 {
            return Err(EncoderError::shape(
                "classification head input",
                "at least one position",
                "an empty sequence",
            ));
        }
        (0..hidden.batch())
            .map(|b| {
                let mut summary = hidden.row(b, 0).to_vec();
                self.dropout.apply(&mut summary, mode);
                self.classifier.forward_vec(&summary)
            })
            .collect()
    }
}

impl Parameters for ClassificationHead {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        self.classifier.visit_parameters(&join_name(prefix, "classifier"), f);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        self.classifier.visit_parameters_mut(&join_name(prefix, "classifier"), f);
    }
}

/// Encoder plus classification head: token ids in, logits out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequenceClassifier {
    encoder: Encoder,
    head: ClassificationHead,
}

impl SequenceClassifier {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        Self::with_rng(config, &mut StdRng::from_entropy())
    }

    pub fn with_seed(config: &EncoderConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, &mut StdRng::seed_from_u64(seed))
    }

    pub fn with_rng<R: Rng + ?Sized>(config: &EncoderConfig, rng: &mut R) -> Result<Self> {
        let encoder = Encoder::with_rng(config, rng)?;
        let head = ClassificationHead::new(config, rng);
        log::info!("attached classification head: labels={}", config.num_labels);
        Ok(SequenceClassifier { encoder, head })
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn head(&self) -> &ClassificationHead {
        &self.head
    }

    pub fn forward(&self, ids: &[Vec<usize>], mode: &mut ForwardMode) -> Result<Logits> {
        let hidden = self.encoder.forward(ids, mode)?;
        self.head.forward(&hidden, mode)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let model: SequenceClassifier = serde_json::from_reader(BufReader::new(file))?;
        model.encoder.check_consistency()?;
        model.head.check_consistency(model.encoder.config())?;
        Ok(model)
    }
}

impl Parameters for SequenceClassifier {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        self.encoder.visit_parameters(&join_name(prefix, "encoder"), f);
        self.head.visit_parameters(&join_name(prefix, "head"), f);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        self.encoder.visit_parameters_mut(&join_name(prefix, "encoder"), f);
        self.head.visit_parameters_mut(&join_name(prefix, "head"), f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EncoderConfig {
        EncoderConfig::new(100, 16, 8, 2).with_layers(1).with_labels(3)
    }

    #[test]
    fn head_reads_only_the_first_position() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(61);
        let head = ClassificationHead::new(&config(), &mut rng);
        let a = Tensor3::new(1, 2, 8, (0..16).map(|v| v as f32).collect())?;
        let mut data = a.data().to_vec();
        data[8..].iter_mut().for_each(|v| *v = -100.0);
        let b = Tensor3::new(1, 2, 8, data)?;
        let mut mode = ForwardMode::inference();
        assert_eq!(head.forward(&a, &mut mode)?, head.forward(&b, &mut mode)?);
        Ok(())
    }

    #[test]
    fn logits_have_batch_by_labels_shape() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(62);
        let head = ClassificationHead::new(&config(), &mut rng);
        let logits = head.forward(&Tensor3::zeros(4, 3, 8), &mut ForwardMode::inference())?;
        assert_eq!(logits.len(), 4);
        assert!(logits.iter().all(|row| row.len() == 3));
        Ok(())
    }

    #[test]
    fn logits_are_not_normalized() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(63);
        let mut head = ClassificationHead::new(&config(), &mut rng);
        head.visit_parameters_mut("", &mut |_, values| {
            values.iter_mut().for_each(|v| *v = 1.0);
        });
        let hidden = Tensor3::new(1, 1, 8, vec![1.0; 8])?;
        let logits = head.forward(&hidden, &mut ForwardMode::inference())?;
        assert_eq!(logits, vec![vec![9.0, 9.0, 9.0]]);
        Ok(())
    }

    #[test]
    fn empty_sequence_is_rejected() {
        let mut rng = StdRng::seed_from_u64(64);
        let head = ClassificationHead::new(&config(), &mut rng);
        assert!(matches!(
            head.forward(&Tensor3::zeros(2, 0, 8), &mut ForwardMode::inference()),
            Err(EncoderError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn classifier_round_trips_through_json() -> Result<()> {
        let model = SequenceClassifier::with_seed(&config(), 65)?;
        let path = std::env::temp_dir().join("rust_nn_encoder_classifier_round_trip.json");
        model.save_json(&path)?;
        let loaded = SequenceClassifier::load_json(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(loaded.num_parameters(), model.num_parameters());
        let ids = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let before = model.forward(&ids, &mut ForwardMode::inference())?;
        let after = loaded.forward(&ids, &mut ForwardMode::inference())?;
        for (a, b) in before.iter().flatten().zip(after.iter().flatten()) {
            assert!((a - b).abs() < 1e-5);
        }
        Ok(())
    }
}
