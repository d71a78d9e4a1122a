// Input normalization for the squad optimizer.
//
// Reads prediction CSVs produced by the modelling stage (or any external
// source matching the column contract), resolves column-name variants,
// canonicalizes position labels, and settles the price scale. Everything
// downstream of this module works on a validated candidate table.

use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::optimizer::{PriceScale, SelectionConfig, SquadError};

/// Prices above this value are assumed to be tenths of a currency unit when
/// the scale is `Auto` (e.g. 92 meaning 9.2).
pub const PRICE_SCALE_THRESHOLD: f64 = 20.0;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Canonical player positions. `Other` only occurs when permissive
/// normalization is enabled and carries the uppercased source label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Gk,
    Def,
    Mid,
    Fwd,
    Other(String),
}

impl Position {
    /// Canonicalize a source label. Known synonyms collapse onto the four
    /// canonical symbols (`GKP` is the league API's goalkeeper label);
    /// anything else is returned as `Other` with the uppercased label for
    /// the caller to accept or reject.
    pub fn from_label(label: &str) -> Position {
        let upper = label.trim().to_uppercase();
        match upper.as_str() {
            "GK" | "GKP" => Position::Gk,
            "DEF" => Position::Def,
            "MID" => Position::Mid,
            "FWD" => Position::Fwd,
            _ => Position::Other(upper),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Gk => write!(f, "GK"),
            Position::Def => write!(f, "DEF"),
            Position::Mid => write!(f, "MID"),
            Position::Fwd => write!(f, "FWD"),
            Position::Other(label) => write!(f, "{label}"),
        }
    }
}

/// One row of the optimizer's input table. Identity is the row index; the
/// table lives only for the duration of one optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerCandidate {
    pub name: String,
    pub team: String,
    pub position: Position,
    pub price: f64,
    pub predicted_points: f64,
}

// ---------------------------------------------------------------------------
// Column resolution
// ---------------------------------------------------------------------------

/// Required semantic fields and their accepted header spellings.
const REQUIRED_COLUMNS: [(&str, &[&str]); 5] = [
    ("name", &["name"]),
    ("team", &["team"]),
    ("position", &["position"]),
    ("price", &["price", "value"]),
    ("predicted_points", &["predicted_points", "pred_points"]),
];

struct ColumnIndices {
    name: usize,
    team: usize,
    position: usize,
    price: usize,
    predicted_points: usize,
}

/// Resolve the required columns against the CSV header, collecting every
/// missing field so the error names them all at once.
fn resolve_columns(headers: &csv::StringRecord) -> Result<ColumnIndices, SquadError> {
    let find = |aliases: &[&str]| -> Option<usize> {
        headers
            .iter()
            .position(|h| aliases.iter().any(|a| h.trim().eq_ignore_ascii_case(a)))
    };

    let mut missing = Vec::new();
    let mut resolved = [0usize; 5];
    for (slot, (field, aliases)) in REQUIRED_COLUMNS.iter().enumerate() {
        match find(aliases) {
            Some(index) => resolved[slot] = index,
            None => missing.push((*field).to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(SquadError::Schema { missing });
    }

    Ok(ColumnIndices {
        name: resolved[0],
        team: resolved[1],
        position: resolved[2],
        price: resolved[3],
        predicted_points: resolved[4],
    })
}

// ---------------------------------------------------------------------------
// Raw row parsing
// ---------------------------------------------------------------------------

/// A candidate row before position canonicalization and price scaling.
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub name: String,
    pub team: String,
    pub position: String,
    pub price: f64,
    pub predicted_points: f64,
}

/// Parse the raw table, checking the schema and skipping rows whose numeric
/// fields are unparsable or non-finite.
pub fn read_raw_candidates<R: Read>(rdr: R) -> Result<Vec<RawCandidate>, SquadError> {
    let mut reader = csv::Reader::from_reader(rdr);
    let columns = resolve_columns(reader.headers()?)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let name = record.get(columns.name).unwrap_or("").trim().to_string();
        let team = record.get(columns.team).unwrap_or("").trim().to_string();
        let position = record.get(columns.position).unwrap_or("").trim().to_string();

        let price = record.get(columns.price).unwrap_or("").trim().parse::<f64>();
        let points = record
            .get(columns.predicted_points)
            .unwrap_or("")
            .trim()
            .parse::<f64>();

        match (price, points) {
            (Ok(price), Ok(predicted_points))
                if price.is_finite() && predicted_points.is_finite() =>
            {
                rows.push(RawCandidate {
                    name,
                    team,
                    position,
                    price,
                    predicted_points,
                });
            }
            _ => {
                warn!(player = %name, "skipping candidate row with unparsable numeric fields");
            }
        }
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Canonicalize positions and settle the price scale, producing the
/// validated candidate table. Pure: no I/O beyond the rows it is given.
pub fn normalize(
    rows: Vec<RawCandidate>,
    config: &SelectionConfig,
) -> Result<Vec<PlayerCandidate>, SquadError> {
    let mut candidates = Vec::with_capacity(rows.len());
    for row in rows {
        let position = match Position::from_label(&row.position) {
            Position::Other(label) if !config.permissive_positions => {
                return Err(SquadError::UnknownPosition {
                    label,
                    player: row.name,
                });
            }
            position => position,
        };
        candidates.push(PlayerCandidate {
            name: row.name,
            team: row.team,
            position,
            price: row.price,
            predicted_points: row.predicted_points,
        });
    }

    if should_rescale(&candidates, config.price_scale) {
        for candidate in &mut candidates {
            candidate.price /= 10.0;
        }
    }

    Ok(candidates)
}

/// Decide whether prices are encoded in tenths. `Auto` rescales when the
/// maximum or the median exceeds the threshold; already-correctly-scaled
/// tables (max <= 20) pass through unchanged.
fn should_rescale(candidates: &[PlayerCandidate], scale: PriceScale) -> bool {
    match scale {
        PriceScale::AsIs => false,
        PriceScale::Tenths => true,
        PriceScale::Auto => {
            if candidates.is_empty() {
                return false;
            }
            let max = candidates.iter().map(|c| c.price).fold(f64::MIN, f64::max);
            max > PRICE_SCALE_THRESHOLD || median_price(candidates) > PRICE_SCALE_THRESHOLD
        }
    }
}

fn median_price(candidates: &[PlayerCandidate]) -> f64 {
    let mut prices: Vec<f64> = candidates.iter().map(|c| c.price).collect();
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = prices.len() / 2;
    if prices.len() % 2 == 0 {
        (prices[mid - 1] + prices[mid]) / 2.0
    } else {
        prices[mid]
    }
}

// ---------------------------------------------------------------------------
// Public loaders
// ---------------------------------------------------------------------------

/// Read and normalize a prediction table from any reader.
pub fn load_candidates<R: Read>(
    rdr: R,
    config: &SelectionConfig,
) -> Result<Vec<PlayerCandidate>, SquadError> {
    let raw = read_raw_candidates(rdr)?;
    normalize(raw, config)
}

/// Read and normalize a prediction table from a CSV file.
pub fn load_candidates_from_path(
    path: &Path,
    config: &SelectionConfig,
) -> Result<Vec<PlayerCandidate>, SquadError> {
    let file = std::fs::File::open(path).map_err(|e| SquadError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_candidates(file, config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
