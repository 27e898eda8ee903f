#![forbid(unsafe_code)]

use cryptotax::basis::inventory::Policy;
use cryptotax::classifier::{ColumnClassifier, RuleClassifier, TrainedModel};
use cryptotax::config::EngineConfig;
use cryptotax::detect::{detect_exchange, scan_input_folder};
use cryptotax::engine::TaxEngine;
use cryptotax::errors::Error;
use cryptotax::normalize::{normalize, write_canonical_csv, NormalizeOptions};
use cryptotax::oracle::{CachedHttpOracle, FixedTableOracle, PriceOracle};
use cryptotax::registry::Registry;
use cryptotax::report::write_reports;
use cryptotax::validate::validate;
use error_iter::ErrorIter as _;
use is_terminal::IsTerminal as _;
use onlyargs::CliError;
use onlyargs_derive::OnlyArgs;
use rayon::prelude::*;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

/// cryptotax: deterministic tax-lot accounting over exchange exports.
#[derive(Debug, OnlyArgs)]
#[footer = "Verbs (pass via --command):"]
#[footer = "  detect          identify the exchange a file came from"]
#[footer = "  normalize       produce a canonical transaction CSV from one file"]
#[footer = "  validate        run invariant checks over a canonical CSV"]
#[footer = "  calculate       run the tax engine over canonical CSVs"]
#[footer = "  report          write report files from a prior calculation"]
#[footer = "  auto-process    detect + normalize + validate + calculate + report over a folder"]
#[footer = "  list-exchanges  print the known exchange ids"]
struct Args {
    /// The verb to execute: detect, normalize, validate, calculate, report,
    /// auto-process, or list-exchanges.
    #[long]
    command: String,

    /// Input file (detect, normalize) or input directory (auto-process).
    #[long]
    input: Option<PathBuf>,

    /// One or more already-normalized canonical CSVs (validate, calculate).
    #[long]
    canonical: Vec<PathBuf>,

    /// Exchange id, or `auto`/`unknown`/`ml` to defer to the classifier.
    #[long]
    #[default("auto")]
    exchange: String,

    /// Disposal policy: fifo, lifo, or hifo.
    #[long]
    #[default("fifo")]
    policy: String,

    /// Currency gains/income are valued in.
    #[long]
    #[default("USD")]
    tax_currency: String,

    /// Treat validation and inventory shortfalls as fatal.
    #[long]
    strict: bool,

    /// Directory reports and canonical CSVs are written into.
    #[long]
    #[default("./output")]
    output: PathBuf,

    /// Override the embedded exchange mapping document.
    #[long]
    mappings: Option<PathBuf>,

    /// Path to an on-disk `EngineConfig` RON file; defaults to the
    /// platform config directory, falling back to compiled-in defaults.
    #[long]
    config: Option<PathBuf>,

    /// Base URL of a price-oracle HTTP API; omit to use a fixed empty table.
    #[long]
    oracle_url: Option<String>,

    /// Workbook sheet name for `.xlsx` inputs.
    #[long]
    sheet: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum CliTopError {
    #[error("argument error")]
    Args(#[from] CliError),

    #[error(transparent)]
    Core(#[from] Error),

    #[error("--command '{0}' is not recognized")]
    UnknownCommand(String),

    #[error("--input is required for this command")]
    MissingInput,
}

fn main() -> ExitCode {
    let env_filter = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy();
    let term_color = env::var("TERM_COLOR").map(|c| c == "always").unwrap_or_else(|_| std::io::stdout().is_terminal());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(term_color))
        .with(env_filter)
        .init();

    match run(onlyargs::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            for source in err.sources().skip(1) {
                eprintln!("  Caused by: {source}");
            }
            match &err {
                CliTopError::Core(core) => ExitCode::from(core.exit_code() as u8),
                _ => ExitCode::from(1),
            }
        }
    }
}

fn policy_from_str(raw: &str) -> Policy {
    match raw.to_lowercase().as_str() {
        "lifo" => Policy::Lifo,
        "hifo" => Policy::Hifo,
        _ => Policy::Fifo,
    }
}

/// Layers compiled-in defaults, an optional on-disk file, and CLI flags
/// (applied last) into a single [`EngineConfig`] (spec §9, §10.3).
fn load_config(args: &Args) -> Result<EngineConfig, Error> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };

    config.method = policy_from_str(&args.policy);
    config.tax_currency = args.tax_currency.clone();
    config.strict_mode = args.strict;
    config.output_dir = args.output.clone();
    if let Some(url) = &args.oracle_url {
        config.oracle_base_url = Some(url.clone());
    }

    Ok(config)
}

fn build_oracle(config: &EngineConfig) -> Box<dyn PriceOracle> {
    match &config.oracle_base_url {
        Some(url) => Box::new(CachedHttpOracle::new(url.clone())),
        None => Box::new(FixedTableOracle::new()),
    }
}

fn load_registry(args: &Args) -> Result<Registry, Error> {
    match &args.mappings {
        Some(path) => Ok(Registry::load(path)?),
        None => Ok(Registry::load_default()?),
    }
}

fn load_classifier(registry: &Registry) -> Box<dyn ColumnClassifier> {
    match TrainedModel::fit(registry) {
        Ok(model) => Box::new(model),
        Err(err) => {
            warn!("falling back to the rule-based classifier: {err}");
            Box::new(RuleClassifier::new())
        }
    }
}

fn run(args: Result<Args, CliError>) -> Result<ExitCode, CliTopError> {
    let args = args?;

    match args.command.as_str() {
        "list-exchanges" => cmd_list_exchanges(&args),
        "detect" => cmd_detect(&args),
        "normalize" => cmd_normalize(&args),
        "validate" => cmd_validate(&args),
        "calculate" => cmd_calculate(&args),
        "auto-process" => cmd_auto_process(&args),
        // No standalone disposal/income artifact is persisted between verbs,
        // so `report` reruns the engine and writes its reports in one step.
        "report" => cmd_calculate(&args),
        other => Err(CliTopError::UnknownCommand(other.to_string())),
    }
}

fn cmd_list_exchanges(args: &Args) -> Result<ExitCode, CliTopError> {
    let registry = load_registry(args)?;
    for id in registry.list_ids() {
        println!("{id}");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_detect(args: &Args) -> Result<ExitCode, CliTopError> {
    let input = args.input.clone().ok_or(CliTopError::MissingInput)?;
    let registry = load_registry(args)?;
    let detection = detect_exchange(&input, &registry, args.sheet.as_deref()).map_err(Error::from)?;

    println!("exchange: {}", detection.exchange_id);
    println!("confidence: {:.2}", detection.confidence);
    if detection.needs_confirmation {
        println!("needs_confirmation: true");
        for (id, score) in &detection.ties {
            println!("  tie: {id} ({score:.2})");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_normalize(args: &Args) -> Result<ExitCode, CliTopError> {
    let input = args.input.clone().ok_or(CliTopError::MissingInput)?;
    let config = load_config(args)?;
    let registry = load_registry(args)?;
    let classifier = load_classifier(&registry);
    let oracle = build_oracle(&config);

    let options = NormalizeOptions {
        sheet: args.sheet.clone(),
        classifier_threshold: config.classifier_threshold,
        ..Default::default()
    };
    let (records, warnings) = normalize(&input, &args.exchange, &registry, classifier.as_ref(), Some(oracle.as_ref()), &config.tax_currency, &options)
        .map_err(Error::from)?;

    for warning in &warnings.warnings {
        warn!("{warning}");
    }

    std::fs::create_dir_all(&config.output_dir).map_err(Error::from)?;
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("input");
    let out_path = config.output_dir.join(format!("{stem}_normalized.csv"));
    write_canonical_csv(&out_path, &records).map_err(Error::from)?;

    info!("wrote {} canonical records to {}", records.len(), out_path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(args: &Args) -> Result<ExitCode, CliTopError> {
    let config = load_config(args)?;
    let mut records = Vec::new();
    for path in &args.canonical {
        records.extend(read_canonical_csv(path)?);
    }

    let report = validate(&records, 0, chrono::Utc::now());
    println!("total_transactions: {}", report.total_transactions);
    println!("errors: {}", report.errors.len());
    println!("warnings: {}", report.warnings.len());
    println!("duplicates_found: {}", report.duplicates_found);
    println!("negative_balances: {}", report.negative_balances.len());
    println!("orphan_sells: {}", report.orphan_sells.len());

    report.enforce(config.strict_mode).map_err(Error::from)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_calculate(args: &Args) -> Result<ExitCode, CliTopError> {
    let config = load_config(args)?;
    let mut records = Vec::new();
    for path in &args.canonical {
        records.extend(read_canonical_csv(path)?);
    }
    records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then(a.input_index.cmp(&b.input_index)));

    let report = validate(&records, 0, chrono::Utc::now());
    report.enforce(config.strict_mode).map_err(Error::from)?;

    let oracle = build_oracle(&config);
    let mut engine = TaxEngine::new(config.method, config.tax_currency.clone(), config.strict_mode, oracle.as_ref());
    let (output, errors) = engine.run(&records).map_err(Error::from)?;

    for warning in &errors.warnings {
        warn!("{warning}");
    }

    write_reports(&config.output_dir, &output.disposals, &output.incomes, config.method, &config.tax_currency).map_err(Error::from)?;
    info!("wrote {} disposal and {} income events to {}", output.disposals.len(), output.incomes.len(), config.output_dir.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_auto_process(args: &Args) -> Result<ExitCode, CliTopError> {
    let input_dir = args.input.clone().ok_or(CliTopError::MissingInput)?;
    let config = load_config(args)?;
    let registry = load_registry(args)?;
    let classifier = load_classifier(&registry);
    let oracle = build_oracle(&config);
    std::fs::create_dir_all(&args.output).map_err(Error::from)?;

    let detections = scan_input_folder(&input_dir, &registry).map_err(Error::from)?;

    // Each file is independent of every other, so normalization fans out
    // across a rayon thread pool (spec §5 "parallel file normalization").
    let per_file: Vec<_> = detections
        .into_par_iter()
        .map(|file_detection| {
            let detection = match file_detection.detection {
                Ok(detection) => detection,
                Err(err) => return (file_detection.path, Err(err.to_string())),
            };
            if detection.needs_confirmation {
                warn!(
                    "{}: needs confirmation (best={}, confidence={:.2})",
                    file_detection.path.display(),
                    detection.exchange_id,
                    detection.confidence
                );
            }

            let options = NormalizeOptions::default();
            let result = normalize(
                &file_detection.path,
                &detection.exchange_id,
                &registry,
                classifier.as_ref(),
                Some(oracle.as_ref()),
                &args.tax_currency,
                &options,
            )
            .map_err(|e| e.to_string());
            (file_detection.path, result)
        })
        .collect();

    let mut combined = Vec::new();
    let mut normalized_file_count = 0usize;
    for (path, result) in per_file {
        match result {
            Ok((records, warnings)) => {
                for warning in &warnings.warnings {
                    warn!("{}: {warning}", path.display());
                }
                normalized_file_count += 1;
                combined.extend(records);
            }
            Err(err) => warn!("{}: {err}", path.display()),
        }
    }

    combined.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then(a.input_index.cmp(&b.input_index)));

    // Written alongside the per-exchange canonical files whenever more than
    // one input file feeds the run, so the combined ledger used by the
    // engine is itself inspectable (spec §6.5).
    if normalized_file_count > 1 {
        write_canonical_csv(&args.output.join("combined_transactions.csv"), &combined).map_err(Error::from)?;
    }

    let validation = validate(&combined, 0, chrono::Utc::now());
    validation.enforce(args.strict).map_err(Error::from)?;

    let mut engine = TaxEngine::new(policy_from_str(&args.policy), args.tax_currency.clone(), args.strict, oracle.as_ref());
    let (output, errors) = engine.run(&combined).map_err(Error::from)?;
    for warning in &errors.warnings {
        warn!("{warning}");
    }

    write_reports(&args.output, &output.disposals, &output.incomes, policy_from_str(&args.policy), &args.tax_currency).map_err(Error::from)?;
    info!(
        "auto-process complete: {} files, {} disposals, {} incomes",
        combined.len(),
        output.disposals.len(),
        output.incomes.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn read_canonical_csv(path: &PathBuf) -> Result<Vec<cryptotax::model::TransactionRecord>, CliTopError> {
    let mut reader = csv::ReaderBuilder::new().from_path(path).map_err(|e| Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    let mut out = Vec::new();
    for (index, result) in reader.deserialize().enumerate() {
        let mut record: cryptotax::model::TransactionRecord =
            result.map_err(|e| Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        record.input_index = index;
        out.push(record);
    }
    Ok(out)
}
