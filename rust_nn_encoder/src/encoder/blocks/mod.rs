pub mod attention;
pub mod embedding;
pub mod encoder_layer;
pub mod feedforward;
pub mod layernorm;
pub mod linear;
pub mod multihead_attention;
pub mod residual;

pub use attention::{AttentionHead, AttentionOutput, Masking, scaled_dot_product_attention};
pub use embedding::Embeddings;
pub use encoder_layer::EncoderLayer;
pub use feedforward::FeedForward;
pub use layernorm::LayerNorm;
pub use linear::Linear;
pub use multihead_attention::MultiHeadAttention;
pub use residual::PreNormResidual;
