use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use rnnlm::corpus::{self, DataSplits, Side};
use rnnlm::training::create_adam_trainer;
use rnnlm::{CellKind, RnnLm, RunConfig, Vocabulary};

#[derive(Parser, Debug)]
#[command(name = "rnnlm", about = "Train a recurrent language model with truncated BPTT")]
struct Args {
    /// Target language of the en-{lang} data directory
    #[arg(long, default_value = "zh")]
    language: String,

    /// Root folder holding the en-{lang} directories
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Corpus side to train on: src or mt
    #[arg(long, default_value = "src")]
    side: Side,

    /// JSON run configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    bptt_steps: Option<usize>,
    /// RNN, GRU or LSTM
    #[arg(long)]
    cell: Option<CellKind>,
    #[arg(long)]
    lr: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,

    /// Write a JSON run report here when training ends
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => RunConfig::default(),
        };

        let training = &mut config.training;
        if let Some(epochs) = self.epochs {
            training.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            training.batch_size = batch_size;
        }
        if let Some(bptt_steps) = self.bptt_steps {
            training.bptt_steps = bptt_steps;
        }
        if let Some(lr) = self.lr {
            training.learning_rate = lr;
        }
        if let Some(seed) = self.seed {
            training.seed = seed;
        }
        if let Some(cell) = self.cell {
            config.model.cell = cell;
        }

        config.validate().context("invalid run configuration")?;
        Ok(config)
    }
}

fn encode(vocab: &Vocabulary, path: PathBuf) -> Result<Vec<usize>> {
    corpus::encode_file(vocab, &path).with_context(|| format!("encoding {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = args.run_config()?;
    let splits = DataSplits::for_language(&args.data_dir, &args.language);

    // Vocabularies come from the training files of both sides.
    let src_vocab = Vocabulary::build_from_file(splits.train(Side::Source))
        .context("building source vocabulary")?;
    let mt_vocab = Vocabulary::build_from_file(splits.train(Side::MachineTranslation))
        .context("building machine translation vocabulary")?;
    info!("Source vocabulary: {}", src_vocab);
    info!("MT vocabulary: {}", mt_vocab);

    let mut encoded = Vec::with_capacity(2);
    for (side, vocab) in [(Side::Source, &src_vocab), (Side::MachineTranslation, &mt_vocab)] {
        let train = encode(vocab, splits.train(side))?;
        let valid = encode(vocab, splits.valid(side))?;
        let test = encode(vocab, splits.test(side))?;
        info!(
            "{} corpus: {} train, {} valid, {} test tokens",
            side,
            train.len(),
            valid.len(),
            test.len()
        );
        encoded.push((side, train, valid, test));
    }

    for path in splits.scores() {
        let scores = corpus::read_scores(&path)
            .with_context(|| format!("reading scores {}", path.display()))?;
        info!("Loaded {} scores from {}", scores.len(), path.display());
    }

    let vocab = match args.side {
        Side::Source => &src_vocab,
        Side::MachineTranslation => &mt_vocab,
    };
    let (_, train, valid, test) = encoded
        .into_iter()
        .find(|(side, ..)| *side == args.side)
        .context("no corpus encoded for the selected side")?;

    let mut rng = StdRng::seed_from_u64(config.training.seed);
    let model = RnnLm::new(&config.model, vocab.size(), &mut rng).context("building model")?;
    info!("\n{}", model);

    info!("Starting training!");
    let mut trainer = create_adam_trainer(model, config.training.clone());
    let report = trainer.fit(&train, &valid, &test).context("training failed")?;

    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!("Run report written to {}", path.display());
    }

    Ok(())
}
