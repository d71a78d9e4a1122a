// Squad report rendering and CSV artifact output.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::optimizer::squad::Squad;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },
}

/// One row of the squad CSV artifact. `selected` is always 1 here; the
/// column is kept so the artifact matches the historical output layout.
#[derive(Debug, Serialize)]
struct SquadArtifactRow<'a> {
    name: &'a str,
    team: &'a str,
    position: String,
    price: f64,
    predicted_points: f64,
    selected: u8,
    captain: u8,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Extract the gameweek number from a `...gw{N}...` file name, as used by
/// the prediction and squad artifacts.
pub fn gameweek_from_filename(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let mut search = lower.as_str();
    while let Some(pos) = search.find("gw") {
        let rest = &search[pos + 2..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return digits.parse().ok();
        }
        search = rest;
    }
    None
}

pub fn squad_output_path(predictions_dir: &str, gw_tag: &str) -> PathBuf {
    Path::new(predictions_dir).join(format!("optimal_squad_gw{gw_tag}.csv"))
}

/// Render the squad as an aligned text table with the two summary totals.
pub fn render_squad(squad: &Squad, gw_tag: &str) -> String {
    let mut name_width = 4usize;
    let mut team_width = 4usize;
    for member in &squad.members {
        name_width = name_width.max(member.player.name.len());
        team_width = team_width.max(member.player.team.len());
    }

    let mut out = String::new();
    let _ = writeln!(out, "Optimal squad for GW{gw_tag}:");
    let _ = writeln!(
        out,
        "{:<name_width$}  {:<team_width$}  POS  {:>6}  {:>6}  C",
        "NAME", "TEAM", "PRICE", "PTS"
    );
    for member in &squad.members {
        let _ = writeln!(
            out,
            "{:<name_width$}  {:<team_width$}  {:<3}  {:>6.1}  {:>6.2}  {}",
            member.player.name,
            member.player.team,
            member.player.position.to_string(),
            member.player.price,
            member.player.predicted_points,
            if member.captain { "*" } else { " " },
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Total cost: {:.2}", round2(squad.total_cost));
    let _ = writeln!(
        out,
        "Total predicted points (with captaincy): {:.2}",
        round2(squad.total_expected_points)
    );
    out
}

/// Write the squad CSV artifact (the 15 selected rows only).
pub fn write_squad_csv(path: &Path, squad: &Squad) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ReportError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| ReportError::Csv {
        path: path.display().to_string(),
        source: e,
    })?;
    for member in &squad.members {
        let row = SquadArtifactRow {
            name: &member.player.name,
            team: &member.player.team,
            position: member.player.position.to_string(),
            price: member.player.price,
            predicted_points: member.player.predicted_points,
            selected: 1,
            captain: u8::from(member.captain),
        };
        writer.serialize(row).map_err(|e| ReportError::Csv {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    writer.flush().map_err(|e| ReportError::Io {
        path: path.display().to_string(),
        source: e,
    })
}
