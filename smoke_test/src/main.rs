use clap::Parser;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_nn_encoder::{EncoderConfig, ForwardMode, Parameters, SequenceClassifier};
use std::path::PathBuf;

/// Run random token ids through a freshly initialized encoder classifier.
#[derive(Parser, Debug)]
struct Args {
    /// JSON config file; a small built-in config is used when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 2)]
    batch: usize,
    #[arg(long, default_value_t = 5)]
    seq_len: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Enable dropout, seeded from --seed
    #[arg(long)]
    train: bool,
    /// Save the initialized model to this JSON file
    #[arg(long)]
    save: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EncoderConfig::from_json_file(path)?,
        None => EncoderConfig::new(100, 16, 8, 2).with_layers(1).with_labels(3),
    };
    let model = SequenceClassifier::with_seed(&config, args.seed)?;

    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1));
    let ids: Vec<Vec<usize>> = (0..args.batch)
        .map(|_| {
            (0..args.seq_len)
                .map(|_| rng.gen_range(0..config.vocab_size))
                .collect()
        })
        .collect();

    let mut mode = if args.train {
        ForwardMode::training(args.seed)
    } else {
        ForwardMode::inference()
    };
    let hidden = model.encoder().forward(&ids, &mut mode)?;
    log::info!(
        "encoder output shape={:?} finite={}",
        hidden.shape(),
        hidden.is_finite()
    );
    let logits = model.head().forward(&hidden, &mut mode)?;
    for (i, row) in logits.iter().enumerate() {
        log::info!("logits[{}] = {:?}", i, row);
    }
    log::info!("parameters: {}", model.num_parameters());

    if let Some(path) = &args.save {
        model.save_json(path)?;
        log::info!("saved model to {}", path.display());
    }
    Ok(())
}
