use clap::{Arg, Command};
use log::LevelFilter;
use phishguard::artifacts::ArtifactStore;
use phishguard::config::{default_config_yaml, PipelineConfig};
use phishguard::corpus;
use phishguard::harness::TrainingHarness;
use phishguard::predict::EmailPredictor;
use phishguard::record::EmailRecord;
use phishguard::split::{self, SplitArtifacts};
use std::path::PathBuf;
use std::process;

fn main() {
    let matches = Command::new("phishguard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Phishing email classifier pipeline: merge, balance, train, predict")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("phishguard.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("merge")
                .long("merge")
                .help("Merge and clean the configured source corpora")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("split")
                .long("split")
                .help("Partition the cleaned corpus and build resampled train variants")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("train")
                .long("train")
                .help("Train and evaluate every model family on each train variant")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .help("Run merge, split, and train in sequence")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("predict-email")
                .long("predict-email")
                .value_name("FILE")
                .help("Classify a single email given as a JSON file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        generate_default_config(path);
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match PipelineConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("Configuration OK: {config_path}");
        println!("  sources: {}", config.sources.len());
        println!("  feature strategy: {}", config.build_strategy().name());
        println!("  train variants: {}", config.resampling_specs().len());
        return;
    }

    if let Some(email_file) = matches.get_one::<String>("predict-email") {
        if let Err(e) = predict_email(&config, email_file) {
            eprintln!("Prediction failed: {e:#}");
            process::exit(1);
        }
        return;
    }

    let run_all = matches.get_flag("all");
    let mut ran_anything = false;

    if run_all || matches.get_flag("merge") {
        ran_anything = true;
        if let Err(e) = run_merge(&config) {
            eprintln!("Merge stage failed: {e:#}");
            process::exit(1);
        }
    }
    if run_all || matches.get_flag("split") {
        ran_anything = true;
        if let Err(e) = run_split(&config) {
            eprintln!("Split stage failed: {e:#}");
            process::exit(1);
        }
    }
    if run_all || matches.get_flag("train") {
        ran_anything = true;
        if let Err(e) = run_train(&config) {
            eprintln!("Training stage failed: {e:#}");
            process::exit(1);
        }
    }

    if !ran_anything {
        eprintln!("Nothing to do. Pass --merge, --split, --train, --all, or --predict-email.");
        process::exit(1);
    }
}

fn generate_default_config(path: &str) {
    if std::path::Path::new(path).exists() {
        eprintln!("Refusing to overwrite existing file: {path}");
        process::exit(1);
    }
    match std::fs::write(path, default_config_yaml()) {
        Ok(()) => println!("Default configuration written to {path}"),
        Err(e) => {
            eprintln!("Failed to write {path}: {e}");
            process::exit(1);
        }
    }
}

fn cleaned_corpus_path(config: &PipelineConfig) -> PathBuf {
    config.data_dir.join("all_emails_cleaned.csv")
}

/// Merge + clean the configured sources into the canonical checkpoint.
fn run_merge(config: &PipelineConfig) -> anyhow::Result<()> {
    let path = cleaned_corpus_path(config);
    if path.exists() {
        log::info!("cleaned corpus {} already exists, skipping merge", path.display());
        return Ok(());
    }
    let merged = corpus::merge_sources(&config.source_specs())?;
    let cleaned = corpus::clean(merged, config.seed)?;
    corpus::write_corpus_csv(&cleaned, &path)?;
    log::info!("cleaned corpus written to {}", path.display());
    Ok(())
}

fn run_split(config: &PipelineConfig) -> anyhow::Result<SplitArtifacts> {
    let path = cleaned_corpus_path(config);
    if !path.exists() {
        anyhow::bail!(
            "cleaned corpus {} not found; run --merge first",
            path.display()
        );
    }
    let records = corpus::read_corpus_csv(&path)?;
    let strategy = config.build_strategy();
    split::split_and_balance(
        &records,
        strategy.as_ref(),
        &config.split_config(),
        &config.resampling_specs(),
        &config.data_dir,
    )
}

fn run_train(config: &PipelineConfig) -> anyhow::Result<()> {
    let strategy = config.build_strategy();
    let artifacts = split::expected_artifacts(
        strategy.name(),
        &config.resampling_specs(),
        &config.data_dir,
    );
    for required in [&artifacts.val_path, &artifacts.test_path] {
        if !required.exists() {
            anyhow::bail!("{} not found; run --split first", required.display());
        }
    }
    let store = ArtifactStore::new(&config.model_dir)?;
    let harness = TrainingHarness::new(&store, &config.results_dir, config.seed)?;
    harness.run_all(&artifacts)
}

/// Classify one email from a JSON file using the configured serving model.
fn predict_email(config: &PipelineConfig, email_file: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(email_file)?;
    let email: EmailRecord = serde_json::from_str(&content)?;

    let store = ArtifactStore::new(&config.model_dir)?;
    let predictor =
        EmailPredictor::from_store(&store, &config.serving.model, config.build_strategy())?;
    let prediction = predictor.predict(&email)?;

    println!("From:    {}", email.sender);
    println!("Subject: {}", email.subject);
    println!(
        "Verdict: {} (phishing probability {:.3})",
        match prediction.label {
            phishguard::Label::Phishing => "PHISHING",
            phishguard::Label::Legitimate => "legitimate",
        },
        prediction.probability
    );
    Ok(())
}
