// Points-prediction model.
//
// A standardized linear regressor with L2 regularization, fit by batch
// gradient descent with a decaying learning rate and early stopping. Small
// enough to retrain from scratch every gameweek; the artifact is a JSON file
// so a trained model survives between CLI invocations.

use std::io::Read;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::{latest_gameweek, FeatureRow};

/// Features the regressor consumes, in coefficient order.
pub const FEATURE_NAMES: [&str; 10] = [
    "roll3_total_points",
    "roll3_minutes",
    "roll3_goals_scored",
    "roll3_assists",
    "roll3_clean_sheets",
    "roll3_bps",
    "goal_contributions",
    "minutes_pct",
    "is_home",
    "value",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

const LR_START: f64 = 0.05;
const MAX_ITERS: usize = 2000;
const IMPROVEMENT_EPS: f64 = 1e-4;
const DEFAULT_L2: f64 = 0.01;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no training rows before gameweek {target_gw}")]
    EmptyTrainingSet { target_gw: u32 },

    #[error("feature table is empty")]
    EmptyFeatureTable,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("model artifact error in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },
}

// ---------------------------------------------------------------------------
// Model artifact
// ---------------------------------------------------------------------------

/// Trained regressor plus the standardization statistics it was fit under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsModel {
    pub feature_names: Vec<String>,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
    pub coeffs: Vec<f64>,
    pub intercept: f64,
    pub l2: f64,
    pub train_mae: f64,
    pub train_samples: usize,
    pub trained_at: String,
}

fn feature_vector(row: &FeatureRow) -> [f64; FEATURE_COUNT] {
    [
        row.roll3_total_points,
        row.roll3_minutes,
        row.roll3_goals_scored,
        row.roll3_assists,
        row.roll3_clean_sheets,
        row.roll3_bps,
        row.goal_contributions,
        row.minutes_pct,
        f64::from(row.is_home),
        row.value,
    ]
}

fn standardized(x: f64, mean: f64, std: f64) -> f64 {
    (x - mean) / std.max(1e-6)
}

fn feature_norm_stats(samples: &[[f64; FEATURE_COUNT]]) -> ([f64; FEATURE_COUNT], [f64; FEATURE_COUNT]) {
    let n = samples.len() as f64;
    let mut mean = [0.0; FEATURE_COUNT];
    for x in samples {
        for i in 0..FEATURE_COUNT {
            mean[i] += x[i];
        }
    }
    for v in &mut mean {
        *v /= n;
    }

    let mut std = [0.0; FEATURE_COUNT];
    for x in samples {
        for i in 0..FEATURE_COUNT {
            let d = x[i] - mean[i];
            std[i] += d * d;
        }
    }
    for v in &mut std {
        *v = (*v / n).sqrt().max(1e-6);
    }
    (mean, std)
}

impl PointsModel {
    /// Fit on every row strictly before `target_gw`, so the model never sees
    /// the gameweek it will be asked to predict.
    pub fn fit(rows: &[FeatureRow], target_gw: u32) -> Result<PointsModel, ModelError> {
        Self::fit_with_l2(rows, target_gw, DEFAULT_L2)
    }

    pub fn fit_with_l2(
        rows: &[FeatureRow],
        target_gw: u32,
        l2: f64,
    ) -> Result<PointsModel, ModelError> {
        let train: Vec<&FeatureRow> = rows.iter().filter(|r| r.gw < target_gw).collect();
        if train.is_empty() {
            return Err(ModelError::EmptyTrainingSet { target_gw });
        }

        let raw: Vec<[f64; FEATURE_COUNT]> = train.iter().map(|&r| feature_vector(r)).collect();
        let targets: Vec<f64> = train.iter().map(|r| r.total_points).collect();
        let (means, stds) = feature_norm_stats(&raw);

        let samples: Vec<[f64; FEATURE_COUNT]> = raw
            .iter()
            .map(|x| {
                let mut z = [0.0; FEATURE_COUNT];
                for i in 0..FEATURE_COUNT {
                    z[i] = standardized(x[i], means[i], stds[i]);
                }
                z
            })
            .collect();

        let n = samples.len() as f64;
        let mut coeffs = [0.0; FEATURE_COUNT];
        let mut intercept = targets.iter().sum::<f64>() / n;

        let mut best = (coeffs, intercept);
        let mut best_mae = mae(&coeffs, intercept, &samples, &targets);
        let mut no_improve = 0usize;

        for iter in 0..MAX_ITERS {
            let mut grad = [0.0; FEATURE_COUNT];
            let mut grad_intercept = 0.0;
            for (x, &y) in samples.iter().zip(&targets) {
                let residual = predict_standardized(&coeffs, intercept, x) - y;
                grad_intercept += residual;
                for j in 0..FEATURE_COUNT {
                    grad[j] += residual * x[j];
                }
            }

            let lr = LR_START / (1.0 + iter as f64 * 0.003);
            intercept -= lr * grad_intercept / n;
            for j in 0..FEATURE_COUNT {
                coeffs[j] -= lr * (grad[j] / n + l2 * coeffs[j]);
            }

            if iter % 20 == 0 || iter + 1 == MAX_ITERS {
                let current = mae(&coeffs, intercept, &samples, &targets);
                if current + IMPROVEMENT_EPS < best_mae {
                    best_mae = current;
                    best = (coeffs, intercept);
                    no_improve = 0;
                } else {
                    no_improve += 1;
                    if no_improve >= 20 {
                        break;
                    }
                }
            }
        }

        let (coeffs, intercept) = best;
        info!(
            samples = samples.len(),
            train_mae = best_mae,
            "fitted points model"
        );

        Ok(PointsModel {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            feature_means: means.to_vec(),
            feature_stds: stds.to_vec(),
            coeffs: coeffs.to_vec(),
            intercept,
            l2,
            train_mae: best_mae,
            train_samples: samples.len(),
            trained_at: Utc::now().to_rfc3339(),
        })
    }

    /// Predicted points for one feature row.
    pub fn predict_row(&self, row: &FeatureRow) -> f64 {
        let x = feature_vector(row);
        let mut sum = self.intercept;
        let stats = self.feature_means.iter().zip(&self.feature_stds);
        for ((&coeff, (&mean, &std)), &value) in self.coeffs.iter().zip(stats).zip(&x) {
            sum += coeff * standardized(value, mean, std);
        }
        sum
    }

    // -- Artifact persistence --

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ModelError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ModelError::Json {
            path: path.display().to_string(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> Result<PointsModel, ModelError> {
        let text = std::fs::read_to_string(path).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&text).map_err(|e| ModelError::Json {
            path: path.display().to_string(),
            source: e,
        })
    }
}

fn predict_standardized(
    coeffs: &[f64; FEATURE_COUNT],
    intercept: f64,
    x: &[f64; FEATURE_COUNT],
) -> f64 {
    let mut sum = intercept;
    for i in 0..FEATURE_COUNT {
        sum += coeffs[i] * x[i];
    }
    sum
}

fn mae(
    coeffs: &[f64; FEATURE_COUNT],
    intercept: f64,
    samples: &[[f64; FEATURE_COUNT]],
    targets: &[f64],
) -> f64 {
    if samples.is_empty() {
        return f64::INFINITY;
    }
    let total: f64 = samples
        .iter()
        .zip(targets)
        .map(|(x, &y)| (predict_standardized(coeffs, intercept, x) - y).abs())
        .sum();
    total / samples.len() as f64
}

// ---------------------------------------------------------------------------
// Prediction output
// ---------------------------------------------------------------------------

/// One row of the prediction table handed to the optimizer. Column names
/// match the CSV contract (`value`, `pred_points`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub name: String,
    pub team: String,
    pub position: String,
    pub value: f64,
    pub pred_points: f64,
}

/// Score the latest gameweek in the feature table and return the predictions
/// for the following gameweek, sorted by predicted points descending.
pub fn predict_next_gw(
    rows: &[FeatureRow],
    model: &PointsModel,
) -> Result<(u32, Vec<PredictionRow>), ModelError> {
    let current = latest_gameweek(rows).ok_or(ModelError::EmptyFeatureTable)?;

    let mut predictions: Vec<PredictionRow> = rows
        .iter()
        .filter(|r| r.gw == current)
        .map(|r| PredictionRow {
            name: r.name.clone(),
            team: r.team.clone(),
            position: r.position.clone(),
            value: r.value,
            pred_points: model.predict_row(r),
        })
        .collect();

    predictions.sort_by(|a, b| {
        b.pred_points
            .partial_cmp(&a.pred_points)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok((current + 1, predictions))
}

pub fn write_predictions(path: &Path, rows: &[PredictionRow]) -> Result<(), ModelError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ModelError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| ModelError::Csv {
        path: path.display().to_string(),
        source: e,
    })?;
    for row in rows {
        writer.serialize(row).map_err(|e| ModelError::Csv {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    writer.flush().map_err(|e| ModelError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

#[allow(dead_code)]
fn load_predictions_from_reader<R: Read>(rdr: R) -> Result<Vec<PredictionRow>, csv::Error> {
    csv::Reader::from_reader(rdr).deserialize().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{build_features, GwRecord};

    fn record(element: u32, gw: u32, points: f64, minutes: f64) -> GwRecord {
        GwRecord {
            element,
            gw,
            name: format!("P{element}"),
            team: format!("T{}", element % 4),
            position: "MID".into(),
            value: 50.0 + element as f64,
            minutes,
            goals_scored: 0.0,
            assists: 0.0,
            clean_sheets: 0.0,
            goals_conceded: 0.0,
            saves: 0.0,
            bonus: 0.0,
            bps: points * 3.0,
            yellow_cards: 0.0,
            red_cards: 0.0,
            total_points: points,
            was_home: Some(gw % 2 == 0),
            opponent_team: None,
            team_h_score: None,
            team_a_score: None,
            fixture_id: None,
            kickoff_time: None,
        }
    }

    /// Ten players whose points follow a persistent per-player level, so the
    /// rolling-points feature is genuinely predictive.
    fn synthetic_rows(gameweeks: u32) -> Vec<FeatureRow> {
        let mut records = Vec::new();
        for element in 1..=10u32 {
            let level = element as f64;
            for gw in 1..=gameweeks {
                records.push(record(element, gw, level + ((gw + element) % 3) as f64 * 0.5, 90.0));
            }
        }
        build_features(records)
    }

    #[test]
    fn fit_rejects_empty_training_slice() {
        let rows = synthetic_rows(3);
        match PointsModel::fit(&rows, 1) {
            Err(ModelError::EmptyTrainingSet { target_gw }) => assert_eq!(target_gw, 1),
            other => panic!("expected EmptyTrainingSet, got: {other:?}"),
        }
    }

    #[test]
    fn fit_beats_constant_baseline() {
        let rows = synthetic_rows(8);
        let model = PointsModel::fit(&rows, 8).unwrap();

        // Baseline: predicting the global mean for everyone.
        let train: Vec<&FeatureRow> = rows.iter().filter(|r| r.gw < 8).collect();
        let mean = train.iter().map(|r| r.total_points).sum::<f64>() / train.len() as f64;
        let baseline_mae = train
            .iter()
            .map(|r| (r.total_points - mean).abs())
            .sum::<f64>()
            / train.len() as f64;

        assert!(
            model.train_mae < baseline_mae,
            "model MAE {} should beat baseline {}",
            model.train_mae,
            baseline_mae
        );
    }

    #[test]
    fn fit_excludes_target_gameweek() {
        let rows = synthetic_rows(5);
        let model = PointsModel::fit(&rows, 4).unwrap();
        let expected = rows.iter().filter(|r| r.gw < 4).count();
        assert_eq!(model.train_samples, expected);
    }

    #[test]
    fn artifact_roundtrips_through_json() {
        let rows = synthetic_rows(5);
        let model = PointsModel::fit(&rows, 5).unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let reloaded: PointsModel = serde_json::from_str(&json).unwrap();

        assert_eq!(reloaded.coeffs, model.coeffs);
        assert_eq!(reloaded.feature_means, model.feature_means);
        let sample = &rows[0];
        assert!((reloaded.predict_row(sample) - model.predict_row(sample)).abs() < 1e-12);
    }

    #[test]
    fn predictions_cover_latest_gameweek_sorted() {
        let rows = synthetic_rows(6);
        let model = PointsModel::fit(&rows, 6).unwrap();
        let (next_gw, predictions) = predict_next_gw(&rows, &model).unwrap();

        assert_eq!(next_gw, 7);
        assert_eq!(predictions.len(), 10);
        for pair in predictions.windows(2) {
            assert!(pair[0].pred_points >= pair[1].pred_points);
        }
    }

    #[test]
    fn predict_on_empty_table_fails() {
        let rows = synthetic_rows(5);
        let model = PointsModel::fit(&rows, 5).unwrap();
        assert!(matches!(
            predict_next_gw(&[], &model),
            Err(ModelError::EmptyFeatureTable)
        ));
    }

    #[test]
    fn prediction_rows_roundtrip_through_csv() {
        let rows = vec![PredictionRow {
            name: "Salah".into(),
            team: "LIV".into(),
            position: "MID".into(),
            value: 130.0,
            pred_points: 8.4,
        }];

        let mut buffer = Vec::new();
        {
            let mut writer = csv::Writer::from_writer(&mut buffer);
            for row in &rows {
                writer.serialize(row).unwrap();
            }
            writer.flush().unwrap();
        }

        let reloaded = load_predictions_from_reader(buffer.as_slice()).unwrap();
        assert_eq!(reloaded, rows);
    }
}
