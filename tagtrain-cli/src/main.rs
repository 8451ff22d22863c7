//! tagtrain CLI: train a tagger / parser / entity-recognizer pipeline and
//! keep the best epoch of every component.

mod logging;

use clap::Parser;
use std::path::PathBuf;
use tagtrain_train::orchestrator::{DEFAULT_PIPELINE, parse_pipeline};
use tagtrain_train::{Orchestrator, TrainOptions};

/// Train a pipeline, checkpointing and evaluating after every epoch
#[derive(Parser, Debug)]
#[command(name = "tagtrain", about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Language code of the pipeline (e.g. en, de)
    lang: String,

    /// Directory to write model<i>/, model-final/ and model-best/ into
    output_path: PathBuf,

    /// Training corpus (file or directory)
    train_path: PathBuf,

    /// Development corpus (file or directory)
    dev_path: PathBuf,

    /// Saved pipeline to start from
    #[arg(short, long)]
    base_model: Option<PathBuf>,

    /// Comma-separated components to train
    #[arg(short, long, default_value = DEFAULT_PIPELINE)]
    pipeline: String,

    /// Word vectors to load into the vocabulary
    #[arg(short, long)]
    vectors: Option<PathBuf>,

    /// Number of epochs
    #[arg(short, long, default_value_t = 30)]
    n_iter: usize,

    /// Number of training documents to use (0 for all)
    #[arg(long, default_value_t = 0)]
    n_examples: usize,

    /// Device id for the accelerated backend; negative for baseline only
    #[arg(short = 'g', long, default_value_t = -1, allow_negative_numbers = true)]
    use_gpu: i32,

    /// Version written to the model meta
    #[arg(short = 'V', long, default_value = "0.0.0")]
    version: String,

    /// Meta file whose fields are merged into the model meta
    #[arg(short, long)]
    meta_path: Option<PathBuf>,

    /// Side objectives for the parser, comma-separated (tag, ent)
    #[arg(long, default_value = "")]
    parser_multitasks: String,

    /// Side objectives for the entity recognizer, comma-separated (dep, tag)
    #[arg(long, default_value = "")]
    entity_multitasks: String,

    /// Probability of corrupting each training token
    #[arg(long, default_value_t = 0.0)]
    noise_level: f64,

    /// Use the gold tokenization instead of re-tokenizing raw text
    #[arg(short = 'G', long)]
    gold_preproc: bool,

    /// Learn to merge subtokens the parser attaches with `subtok`
    #[arg(short = 'T', long)]
    learn_tokens: bool,

    /// Verbose log output
    #[arg(long)]
    verbose: bool,

    /// Log per-document evaluation mismatches
    #[arg(short = 'D', long)]
    debug: bool,
}

impl Cli {
    fn into_options(self) -> TrainOptions {
        let mut options =
            TrainOptions::new(self.lang, self.output_path, self.train_path, self.dev_path);
        options.base_model = self.base_model;
        options.pipeline = parse_pipeline(&self.pipeline);
        options.vectors = self.vectors;
        options.n_iter = self.n_iter;
        options.n_examples = self.n_examples;
        options.use_gpu = self.use_gpu;
        options.version = self.version;
        options.meta_path = self.meta_path;
        options.parser_multitasks = self.parser_multitasks;
        options.entity_multitasks = self.entity_multitasks;
        options.noise_level = self.noise_level;
        options.gold_preproc = self.gold_preproc;
        options.learn_tokens = self.learn_tokens;
        options.verbose = self.verbose;
        options.debug = self.debug;
        options
    }
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let (verbosity, guard) = logging::init_tracing(cli.verbose, cli.debug);

    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let settings = tagtrain_core::load_settings(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let orchestrator = Orchestrator::new(cli.into_options(), settings, &verbosity);
    match orchestrator.run() {
        Ok(summary) => {
            println!("\n  Saved final model to {}", summary.final_dir.display());
            if let Some(best) = summary.best_dir {
                println!("  Saved best model to {}", best.display());
            }
            Ok(())
        }
        Err(e) if e.is_config() => {
            eprintln!("  {e}");
            drop(guard);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["tagtrain", "en", "out", "train.json", "dev.json"]).unwrap();
        let options = cli.into_options();
        assert_eq!(options.pipeline, vec!["tagger", "parser", "ner"]);
        assert_eq!(options.n_iter, 30);
        assert_eq!(options.use_gpu, -1);
        assert_eq!(options.version, "0.0.0");
        assert!(options.parser_multitasks.is_empty());
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from([
            "tagtrain", "de", "out", "train", "dev", "-p", "tagger,ner", "-n", "5", "-g", "0",
            "-V", "1.0.0", "-G", "-T", "-D",
        ])
        .unwrap();
        let options = cli.into_options();
        assert_eq!(options.lang, "de");
        assert_eq!(options.pipeline, vec!["tagger", "ner"]);
        assert_eq!(options.n_iter, 5);
        assert_eq!(options.use_gpu, 0);
        assert_eq!(options.version, "1.0.0");
        assert!(options.gold_preproc && options.learn_tokens && options.debug);
    }

    #[test]
    fn test_negative_device_id() {
        let cli = Cli::try_parse_from(["tagtrain", "en", "o", "t", "d", "--use-gpu", "-1"]).unwrap();
        assert_eq!(cli.use_gpu, -1);
    }

    #[test]
    fn test_missing_positional_is_rejected() {
        assert!(Cli::try_parse_from(["tagtrain", "en", "out"]).is_err());
    }
}
