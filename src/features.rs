// Rolling-window feature construction.
//
// Builds the modelling table from raw per-player gameweek rows: rolling
// means over the three *prior* gameweeks (shifted by one so a row never sees
// its own week), plus a handful of derived features. The table accumulates
// incrementally, one gameweek at a time, deduplicated per (element, gw).

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Rolling window length, in prior gameweeks.
pub const ROLL_WINDOW: usize = 3;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One player-gameweek observation as produced by the ingest stage. Prices
/// stay in raw API units (tenths); the optimizer's normalizer owns the scale
/// question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GwRecord {
    pub element: u32,
    pub gw: u32,
    pub name: String,
    pub team: String,
    pub position: String,
    pub value: f64,
    pub minutes: f64,
    pub goals_scored: f64,
    pub assists: f64,
    pub clean_sheets: f64,
    pub goals_conceded: f64,
    pub saves: f64,
    pub bonus: f64,
    pub bps: f64,
    pub yellow_cards: f64,
    pub red_cards: f64,
    pub total_points: f64,
    pub was_home: Option<bool>,
    pub opponent_team: Option<u32>,
    pub team_h_score: Option<f64>,
    pub team_a_score: Option<f64>,
    pub fixture_id: Option<u32>,
    pub kickoff_time: Option<DateTime<Utc>>,
}

/// A `GwRecord` extended with rolling and derived features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub element: u32,
    pub gw: u32,
    pub name: String,
    pub team: String,
    pub position: String,
    pub value: f64,
    pub minutes: f64,
    pub goals_scored: f64,
    pub assists: f64,
    pub clean_sheets: f64,
    pub goals_conceded: f64,
    pub saves: f64,
    pub bonus: f64,
    pub bps: f64,
    pub yellow_cards: f64,
    pub red_cards: f64,
    pub total_points: f64,
    pub was_home: Option<bool>,
    pub roll3_total_points: f64,
    pub roll3_minutes: f64,
    pub roll3_goals_scored: f64,
    pub roll3_assists: f64,
    pub roll3_clean_sheets: f64,
    pub roll3_bps: f64,
    pub goal_contributions: f64,
    pub minutes_pct: f64,
    pub is_home: u8,
}

impl FeatureRow {
    /// Strip a feature row back to its underlying observation, so an
    /// accumulated table can be re-merged with new gameweek rows and the
    /// rolling features recomputed from scratch.
    pub fn to_record(&self) -> GwRecord {
        GwRecord {
            element: self.element,
            gw: self.gw,
            name: self.name.clone(),
            team: self.team.clone(),
            position: self.position.clone(),
            value: self.value,
            minutes: self.minutes,
            goals_scored: self.goals_scored,
            assists: self.assists,
            clean_sheets: self.clean_sheets,
            goals_conceded: self.goals_conceded,
            saves: self.saves,
            bonus: self.bonus,
            bps: self.bps,
            yellow_cards: self.yellow_cards,
            red_cards: self.red_cards,
            total_points: self.total_points,
            was_home: self.was_home,
            opponent_team: None,
            team_h_score: None,
            team_a_score: None,
            fixture_id: None,
            kickoff_time: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Merging and rolling computation
// ---------------------------------------------------------------------------

/// Append new gameweek rows to the accumulated table, keeping the last
/// occurrence per (element, gw) so a re-fetched gameweek overwrites the old
/// rows.
pub fn merge_gameweeks(base: Vec<GwRecord>, new_rows: Vec<GwRecord>) -> Vec<GwRecord> {
    let mut merged: Vec<GwRecord> = Vec::with_capacity(base.len() + new_rows.len());
    let mut slots: std::collections::HashMap<(u32, u32), usize> = std::collections::HashMap::new();

    for record in base.into_iter().chain(new_rows) {
        let key = (record.element, record.gw);
        match slots.get(&key) {
            Some(&slot) => merged[slot] = record,
            None => {
                slots.insert(key, merged.len());
                merged.push(record);
            }
        }
    }
    merged
}

/// Compute the full feature table from raw observations.
///
/// Rows are sorted by (element, gw); each row's rolling features are the
/// mean of its up-to-`ROLL_WINDOW` *prior* gameweek rows. A player's first
/// appearance has no history and gets 0.0.
pub fn build_features(mut records: Vec<GwRecord>) -> Vec<FeatureRow> {
    records.sort_by_key(|r| (r.element, r.gw));

    let mut rows = Vec::with_capacity(records.len());
    let mut group_start = 0usize;

    for i in 0..records.len() {
        if records[i].element != records[group_start].element {
            group_start = i;
        }
        let window_start = i.saturating_sub(ROLL_WINDOW).max(group_start);
        let window = &records[window_start..i];
        rows.push(feature_row(&records[i], window));
    }
    rows
}

fn rolling_mean(window: &[GwRecord], stat: impl Fn(&GwRecord) -> f64) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    window.iter().map(&stat).sum::<f64>() / window.len() as f64
}

fn feature_row(record: &GwRecord, window: &[GwRecord]) -> FeatureRow {
    FeatureRow {
        element: record.element,
        gw: record.gw,
        name: record.name.clone(),
        team: record.team.clone(),
        position: record.position.clone(),
        value: record.value,
        minutes: record.minutes,
        goals_scored: record.goals_scored,
        assists: record.assists,
        clean_sheets: record.clean_sheets,
        goals_conceded: record.goals_conceded,
        saves: record.saves,
        bonus: record.bonus,
        bps: record.bps,
        yellow_cards: record.yellow_cards,
        red_cards: record.red_cards,
        total_points: record.total_points,
        was_home: record.was_home,
        roll3_total_points: rolling_mean(window, |r| r.total_points),
        roll3_minutes: rolling_mean(window, |r| r.minutes),
        roll3_goals_scored: rolling_mean(window, |r| r.goals_scored),
        roll3_assists: rolling_mean(window, |r| r.assists),
        roll3_clean_sheets: rolling_mean(window, |r| r.clean_sheets),
        roll3_bps: rolling_mean(window, |r| r.bps),
        goal_contributions: record.goals_scored + record.assists,
        minutes_pct: record.minutes / 90.0,
        is_home: u8::from(record.was_home == Some(true)),
    }
}

/// Highest gameweek present in the table.
pub fn latest_gameweek(rows: &[FeatureRow]) -> Option<u32> {
    rows.iter().map(|r| r.gw).max()
}

// ---------------------------------------------------------------------------
// CSV persistence
// ---------------------------------------------------------------------------

fn load_records_from_reader<R: Read>(rdr: R) -> Result<Vec<GwRecord>, csv::Error> {
    csv::Reader::from_reader(rdr).deserialize().collect()
}

fn load_rows_from_reader<R: Read>(rdr: R) -> Result<Vec<FeatureRow>, csv::Error> {
    csv::Reader::from_reader(rdr).deserialize().collect()
}

pub fn load_gw_records(path: &Path) -> Result<Vec<GwRecord>, FeatureError> {
    let file = std::fs::File::open(path).map_err(|e| FeatureError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_records_from_reader(file).map_err(|e| FeatureError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

pub fn load_feature_rows(path: &Path) -> Result<Vec<FeatureRow>, FeatureError> {
    let file = std::fs::File::open(path).map_err(|e| FeatureError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_rows_from_reader(file).map_err(|e| FeatureError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

pub fn write_feature_rows(path: &Path, rows: &[FeatureRow]) -> Result<(), FeatureError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FeatureError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| FeatureError::Csv {
        path: path.display().to_string(),
        source: e,
    })?;
    for row in rows {
        writer.serialize(row).map_err(|e| FeatureError::Csv {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    writer.flush().map_err(|e| FeatureError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    info!(rows = rows.len(), path = %path.display(), "wrote feature table");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(element: u32, gw: u32, points: f64, minutes: f64) -> GwRecord {
        GwRecord {
            element,
            gw,
            name: format!("P{element}"),
            team: "T".into(),
            position: "MID".into(),
            value: 55.0,
            minutes,
            goals_scored: 0.0,
            assists: 0.0,
            clean_sheets: 0.0,
            goals_conceded: 0.0,
            saves: 0.0,
            bonus: 0.0,
            bps: 0.0,
            yellow_cards: 0.0,
            red_cards: 0.0,
            total_points: points,
            was_home: None,
            opponent_team: None,
            team_h_score: None,
            team_a_score: None,
            fixture_id: None,
            kickoff_time: None,
        }
    }

    #[test]
    fn first_appearance_has_zero_rolling_features() {
        let rows = build_features(vec![record(1, 1, 8.0, 90.0)]);
        assert_eq!(rows.len(), 1);
        assert!((rows[0].roll3_total_points - 0.0).abs() < f64::EPSILON);
        assert!((rows[0].roll3_minutes - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rolling_mean_uses_only_prior_weeks() {
        let rows = build_features(vec![
            record(1, 1, 2.0, 90.0),
            record(1, 2, 6.0, 90.0),
            record(1, 3, 10.0, 90.0),
        ]);
        // GW3's rolling mean covers GW1 and GW2 only: (2 + 6) / 2 = 4.
        assert!((rows[2].roll3_total_points - 4.0).abs() < 1e-9);
        // GW2 sees only GW1.
        assert!((rows[1].roll3_total_points - 2.0).abs() < 1e-9);
    }

    #[test]
    fn window_caps_at_three_prior_weeks() {
        let rows = build_features(vec![
            record(1, 1, 1.0, 90.0),
            record(1, 2, 2.0, 90.0),
            record(1, 3, 3.0, 90.0),
            record(1, 4, 4.0, 90.0),
            record(1, 5, 5.0, 90.0),
        ]);
        // GW5 window = GW2..GW4: (2 + 3 + 4) / 3 = 3.
        assert!((rows[4].roll3_total_points - 3.0).abs() < 1e-9);
    }

    #[test]
    fn players_do_not_share_history() {
        let rows = build_features(vec![
            record(1, 1, 10.0, 90.0),
            record(1, 2, 10.0, 90.0),
            record(2, 2, 4.0, 60.0),
        ]);
        let p2 = rows.iter().find(|r| r.element == 2).unwrap();
        assert!((p2.roll3_total_points - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_keeps_latest_row_per_element_gw() {
        let base = vec![record(1, 1, 2.0, 45.0)];
        let corrected = vec![record(1, 1, 3.0, 90.0), record(1, 2, 5.0, 90.0)];
        let merged = merge_gameweeks(base, corrected);
        assert_eq!(merged.len(), 2);
        assert!((merged[0].total_points - 3.0).abs() < f64::EPSILON);
        assert!((merged[0].minutes - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn derived_features_computed_per_row() {
        let mut r = record(1, 1, 8.0, 45.0);
        r.goals_scored = 2.0;
        r.assists = 1.0;
        r.was_home = Some(true);
        let rows = build_features(vec![r]);
        assert!((rows[0].goal_contributions - 3.0).abs() < f64::EPSILON);
        assert!((rows[0].minutes_pct - 0.5).abs() < f64::EPSILON);
        assert_eq!(rows[0].is_home, 1);
    }

    #[test]
    fn away_and_unknown_home_flag_is_zero() {
        let mut away = record(1, 1, 1.0, 90.0);
        away.was_home = Some(false);
        let unknown = record(2, 1, 1.0, 90.0);
        let rows = build_features(vec![away, unknown]);
        assert!(rows.iter().all(|r| r.is_home == 0));
    }

    #[test]
    fn feature_rows_roundtrip_through_csv() {
        let rows = build_features(vec![record(1, 1, 8.0, 90.0), record(1, 2, 4.0, 80.0)]);

        let mut buffer = Vec::new();
        {
            let mut writer = csv::Writer::from_writer(&mut buffer);
            for row in &rows {
                writer.serialize(row).unwrap();
            }
            writer.flush().unwrap();
        }

        let reloaded = load_rows_from_reader(buffer.as_slice()).unwrap();
        assert_eq!(reloaded, rows);
    }

    #[test]
    fn latest_gameweek_of_empty_table_is_none() {
        assert_eq!(latest_gameweek(&[]), None);
        let rows = build_features(vec![record(1, 1, 1.0, 90.0), record(1, 7, 1.0, 90.0)]);
        assert_eq!(latest_gameweek(&rows), Some(7));
    }
}
