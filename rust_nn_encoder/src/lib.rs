//! A CPU Transformer encoder: embeddings, multi-head self-attention,
//! GELU feed-forward blocks in pre-norm residual layers, and a
//! classification head over the first position.

pub mod config;
mod cpu_utils;
pub mod dropout;
pub mod encoder;
pub mod error;
mod gelu;
pub mod layer;
pub mod tensor;

pub use config::EncoderConfig;
pub use dropout::{Dropout, ForwardMode};
pub use encoder::Encoder;
pub use encoder::blocks::{
    AttentionHead, AttentionOutput, Embeddings, EncoderLayer, FeedForward, LayerNorm, Linear,
    Masking, MultiHeadAttention, PreNormResidual, scaled_dot_product_attention,
};
pub use encoder::classifier::{ClassificationHead, Logits, SequenceClassifier};
pub use error::{EncoderError, Result};
pub use layer::{Layer, Parameters};
pub use tensor::Tensor3;
