// Pipeline entry point.
//
// One subcommand per pipeline stage, mirroring the weekly workflow:
//   fetch -> features -> train -> predict -> select

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use tracing::info;

use gaffer::config::{self, Config};
use gaffer::features;
use gaffer::ingest::{self, FplClient};
use gaffer::model::{self, PointsModel};
use gaffer::optimizer::{self, normalize};
use gaffer::report;

enum Command {
    Fetch { gw: u32 },
    Features { gw: u32 },
    Train { target_gw: u32 },
    Predict,
    Select { pred: PathBuf },
}

const USAGE: &str = "\
Usage: gaffer <command> [options]

Commands:
  fetch --gw N          Download and flatten one gameweek of player stats
  features --gw N       Merge a fetched gameweek into the feature table
  train --target-gw N   Fit the points model on all gameweeks before N
  predict               Predict the next gameweek from the feature table
  select --pred PATH    Select the optimal squad from a prediction CSV
";

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut iter = args.iter();
    let command = iter.next().ok_or_else(|| "missing command".to_string())?;

    let mut gw: Option<u32> = None;
    let mut target_gw: Option<u32> = None;
    let mut pred: Option<PathBuf> = None;

    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--gw" => {
                let value = iter.next().ok_or("--gw requires a value")?;
                gw = Some(value.parse().map_err(|_| format!("invalid --gw value '{value}'"))?);
            }
            "--target-gw" => {
                let value = iter.next().ok_or("--target-gw requires a value")?;
                target_gw =
                    Some(value.parse().map_err(|_| format!("invalid --target-gw value '{value}'"))?);
            }
            "--pred" => {
                let value = iter.next().ok_or("--pred requires a value")?;
                pred = Some(PathBuf::from(value));
            }
            other => return Err(format!("unknown option '{other}'")),
        }
    }

    match command.as_str() {
        "fetch" => Ok(Command::Fetch {
            gw: gw.ok_or("fetch requires --gw")?,
        }),
        "features" => Ok(Command::Features {
            gw: gw.ok_or("features requires --gw")?,
        }),
        "train" => Ok(Command::Train {
            target_gw: target_gw.ok_or("train requires --target-gw")?,
        }),
        "predict" => Ok(Command::Predict),
        "select" => Ok(Command::Select {
            pred: pred.ok_or("select requires --pred")?,
        }),
        other => Err(format!("unknown command '{other}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("error: {message}\n\n{USAGE}");
            process::exit(2);
        }
    };

    let config = config::load_config().context("failed to load configuration")?;

    match command {
        Command::Fetch { gw } => run_fetch(&config, gw).await,
        Command::Features { gw } => run_features(&config, gw),
        Command::Train { target_gw } => run_train(&config, target_gw),
        Command::Predict => run_predict(&config),
        Command::Select { pred } => run_select(&config, &pred),
    }
}

async fn run_fetch(config: &Config, gw: u32) -> anyhow::Result<()> {
    let client = FplClient::new(&config.api.base_url).context("failed to build API client")?;
    let records = ingest::fetch_gameweek(&client, gw)
        .await
        .with_context(|| format!("failed to fetch gameweek {gw}"))?;

    let path = ingest::raw_gw_path(&config.data.raw_dir, gw);
    ingest::write_gw_records(&path, &records)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(gw, players = records.len(), path = %path.display(), "gameweek stats saved");
    Ok(())
}

fn run_features(config: &Config, gw: u32) -> anyhow::Result<()> {
    let raw_path = ingest::raw_gw_path(&config.data.raw_dir, gw);
    let new_rows = features::load_gw_records(&raw_path)
        .with_context(|| format!("missing raw stats for gameweek {gw}; run `gaffer fetch` first"))?;

    let features_path = Path::new(&config.data.features_path);
    let existing = if features_path.exists() {
        features::load_feature_rows(features_path)
            .context("failed to load the existing feature table")?
            .iter()
            .map(|row| row.to_record())
            .collect()
    } else {
        Vec::new()
    };

    let merged = features::merge_gameweeks(existing, new_rows);
    let rows = features::build_features(merged);
    features::write_feature_rows(features_path, &rows)
        .context("failed to write the feature table")?;
    info!(gw, rows = rows.len(), "feature table updated");
    Ok(())
}

fn run_train(config: &Config, target_gw: u32) -> anyhow::Result<()> {
    let features_path = Path::new(&config.data.features_path);
    let rows = features::load_feature_rows(features_path)
        .context("missing feature table; run `gaffer features` first")?;

    let model = PointsModel::fit(&rows, target_gw)
        .with_context(|| format!("failed to train for target gameweek {target_gw}"))?;
    let model_path = Path::new(&config.data.model_path);
    model.save(model_path).context("failed to save the model artifact")?;
    info!(
        samples = model.train_samples,
        mae = model.train_mae,
        path = %model_path.display(),
        "points model trained"
    );
    Ok(())
}

fn run_predict(config: &Config) -> anyhow::Result<()> {
    let rows = features::load_feature_rows(Path::new(&config.data.features_path))
        .context("missing feature table; run `gaffer features` first")?;
    let model = PointsModel::load(Path::new(&config.data.model_path))
        .context("missing model artifact; run `gaffer train` first")?;

    let (next_gw, predictions) =
        model::predict_next_gw(&rows, &model).context("prediction failed")?;
    let path =
        Path::new(&config.data.predictions_dir).join(format!("predictions_gw{next_gw}.csv"));
    model::write_predictions(&path, &predictions)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(gw = next_gw, players = predictions.len(), path = %path.display(), "predictions saved");
    Ok(())
}

fn run_select(config: &Config, pred: &Path) -> anyhow::Result<()> {
    let candidates = normalize::load_candidates_from_path(pred, &config.selection)
        .with_context(|| format!("failed to load predictions from {}", pred.display()))?;
    info!(candidates = candidates.len(), "normalized prediction table");

    let squad = optimizer::select_squad(&candidates, &config.selection)
        .context("squad selection failed")?;

    let gw_tag = pred
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(report::gameweek_from_filename)
        .map(|gw| gw.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    print!("{}", report::render_squad(&squad, &gw_tag));

    let out_path = report::squad_output_path(&config.data.predictions_dir, &gw_tag);
    report::write_squad_csv(&out_path, &squad)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    info!(path = %out_path.display(), "squad saved");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gaffer=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
