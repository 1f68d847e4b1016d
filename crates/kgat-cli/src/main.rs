//! kgat CLI - train and evaluate knowledge-aware recommenders.
//!
//! # Usage
//!
//! ```bash
//! # Dataset statistics (reads train.txt, test.txt, kg_final.txt)
//! kgat stats data/last-fm
//!
//! # Train with defaults, keeping the best checkpoint
//! kgat train data/last-fm --epochs 100 --save-dir trained_model
//!
//! # Override the architecture
//! kgat train data/last-fm --aggregator gcn --conv-dims "[32, 16]" --dropout "[0.1, 0.1]"
//!
//! # Start from pretrained user / item vectors
//! kgat train data/last-fm --pretrain mf.safetensors
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use candle_core::Device;
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use kgat_core::CollaborativeKg;
use kgat_nn::{
    parse_dim_list, parse_dropout_list, Kgat, KgatConfig, PretrainedEmbeddings, TrainConfig,
    Trainer,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "kgat")]
#[command(about = "Knowledge-aware graph attention recommender", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show statistics about a dataset directory
    Stats {
        /// Directory holding train.txt, test.txt and kg_final.txt
        data_dir: PathBuf,
    },

    /// Train a model and report Recall@K / NDCG@K
    Train {
        /// Directory holding train.txt, test.txt and kg_final.txt
        data_dir: PathBuf,

        /// Model config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Training config (JSON)
        #[arg(long)]
        train_config: Option<PathBuf>,

        /// Number of epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// Sampler seed
        #[arg(long)]
        seed: Option<u64>,

        /// Evaluate every N epochs
        #[arg(long)]
        evaluate_every: Option<usize>,

        /// Cutoffs, e.g. "[20, 40]"
        #[arg(long)]
        ks: Option<String>,

        /// Aggregator: gcn, graphsage or bi-interaction
        #[arg(long)]
        aggregator: Option<String>,

        /// Layer widths, e.g. "[64, 32, 16]"
        #[arg(long)]
        conv_dims: Option<String>,

        /// Message dropout per layer, e.g. "[0.1, 0.1, 0.1]"
        #[arg(long)]
        dropout: Option<String>,

        /// Pretrained user / item embeddings (safetensors)
        #[arg(long)]
        pretrain: Option<PathBuf>,

        /// Keep the best checkpoint here
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Stats { data_dir } => cmd_stats(&data_dir),
        Commands::Train {
            data_dir,
            config,
            train_config,
            epochs,
            lr,
            seed,
            evaluate_every,
            ks,
            aggregator,
            conv_dims,
            dropout,
            pretrain,
            save_dir,
        } => {
            let mut model_config = match config {
                Some(path) => KgatConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to read model config {}", path.display()))?,
                None => KgatConfig::default(),
            };
            if let Some(name) = aggregator {
                model_config.aggregation_type = name;
            }
            match (conv_dims, dropout) {
                (Some(dims), Some(p)) => {
                    model_config.conv_dim_list = parse_dim_list(&dims)?;
                    model_config.mess_dropout = parse_dropout_list(&p)?;
                }
                (Some(dims), None) => {
                    let dims = parse_dim_list(&dims)?;
                    let p = model_config.mess_dropout.first().copied().unwrap_or(0.1);
                    model_config.mess_dropout = vec![p; dims.len()];
                    model_config.conv_dim_list = dims;
                }
                (None, Some(p)) => model_config.mess_dropout = parse_dropout_list(&p)?,
                (None, None) => {}
            }

            let mut train = match train_config {
                Some(path) => TrainConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to read training config {}", path.display()))?,
                None => TrainConfig::default(),
            };
            if let Some(n) = epochs {
                train.epochs = n;
            }
            if let Some(lr) = lr {
                train.lr = lr;
            }
            if let Some(seed) = seed {
                train.seed = seed;
            }
            if let Some(n) = evaluate_every {
                train.evaluate_every = n;
            }
            if let Some(ks) = ks {
                train.ks = parse_dim_list(&ks)?;
            }
            if save_dir.is_some() {
                train.save_dir = save_dir;
            }

            cmd_train(&data_dir, model_config, train, pretrain.as_deref())
        }
    }
}

fn load_ckg(dir: &Path) -> Result<CollaborativeKg> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Loading {}...", dir.display()));

    let ckg = CollaborativeKg::from_dir(dir)
        .with_context(|| format!("Failed to load dataset {}", dir.display()))?;

    pb.finish_with_message(format!("Loaded in {:.2?}", start.elapsed()));
    Ok(ckg)
}

fn cmd_stats(dir: &Path) -> Result<()> {
    let ckg = load_ckg(dir)?;
    let graph = ckg.topology()?;

    println!("Dataset Statistics");
    println!("==================");
    println!("Users:          {}", ckg.dims.n_users);
    println!("Items:          {}", ckg.dims.n_items);
    println!("Entities:       {}", ckg.dims.n_entities);
    println!("Relations:      {}", ckg.dims.n_relations);
    println!("KG facts:       {}", ckg.n_kg_facts);
    println!("CF train:       {}", ckg.n_cf_train);
    println!("CF test:        {}", ckg.n_cf_test);
    println!("CKG edges:      {}", graph.num_edges());

    Ok(())
}

fn cmd_train(
    dir: &Path,
    config: KgatConfig,
    train: TrainConfig,
    pretrain: Option<&Path>,
) -> Result<()> {
    config.validate()?;
    train.validate()?;
    let ckg = load_ckg(dir)?;
    let device = Device::Cpu;

    let pretrained = match pretrain {
        Some(path) => Some(
            PretrainedEmbeddings::load(path, &device)
                .with_context(|| format!("Failed to load pretrained embeddings {}", path.display()))?,
        ),
        None => None,
    };
    let model = Kgat::new(config, ckg.dims, pretrained.as_ref(), &device)?;
    info!(
        aggregator = %model.config().aggregation_type,
        output_dim = model.config().output_dim(),
        "model ready"
    );

    let epochs = train.epochs;
    let mut trainer = Trainer::new(model, &ckg, train)?;

    let pb = ProgressBar::new(epochs as u64);
    pb.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} epochs {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let start = Instant::now();
    let report = trainer.fit(|stats, metrics| {
        pb.inc(1);
        pb.set_message(format!("cf {:.4} kg {:.4}", stats.cf_loss, stats.kg_loss));
        if let Some(m) = metrics {
            pb.println(format!("epoch {:>4}  {}", stats.epoch, m.summary()));
        }
    })?;
    pb.finish_and_clear();

    let Some(best) = report.best() else {
        bail!("no evaluation ran");
    };
    println!(
        "Trained {} epochs in {:.2?}",
        report.epochs_run,
        start.elapsed()
    );
    if let Some(epoch) = report.best_epoch {
        println!("Best epoch:     {epoch}");
    }
    println!("{}", best.summary());
    if let Some(path) = &report.best_checkpoint {
        println!("Checkpoint:     {}", path.display());
    }
    Ok(())
}
