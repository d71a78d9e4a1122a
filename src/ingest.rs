// Gameweek ingest from the fantasy league API.
//
// Pulls bootstrap (players/teams/positions), per-event live stats, and
// fixtures, then flattens them into one row per player per gameweek. The API
// lives behind the `FplApi` trait so the flattening and the CLI can be
// exercised against canned payloads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::features::GwRecord;

pub const DEFAULT_API_BASE: &str = "https://fantasy.premierleague.com/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const RETRIES: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("request to {url} returned status {status} after {attempts} attempts")]
    Status {
        url: String,
        status: u16,
        attempts: u32,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },
}

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Bootstrap {
    pub elements: Vec<Element>,
    pub teams: Vec<Team>,
    pub element_types: Vec<ElementType>,
}

/// A player entry from bootstrap-static. `now_cost` is in tenths of a
/// million; it is carried through unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct Element {
    pub id: u32,
    pub web_name: String,
    pub team: u32,
    pub now_cost: f64,
    pub element_type: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Team {
    pub id: u32,
    pub name: String,
    pub short_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElementType {
    pub id: u32,
    pub singular_name_short: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveEvent {
    pub elements: Vec<LiveElement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveElement {
    pub id: u32,
    pub stats: LiveStats,
    #[serde(default)]
    pub explain: Vec<ExplainEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LiveStats {
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
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainEntry {
    pub fixture: u32,
    #[serde(default)]
    pub was_home: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub id: u32,
    pub team_h: u32,
    pub team_a: u32,
    #[serde(default)]
    pub team_h_score: Option<f64>,
    #[serde(default)]
    pub team_a_score: Option<f64>,
    #[serde(default)]
    pub kickoff_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// API trait and HTTP client
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FplApi {
    async fn bootstrap(&self) -> Result<Bootstrap, IngestError>;
    async fn event_live(&self, gw: u32) -> Result<LiveEvent, IngestError>;
    async fn fixtures(&self, gw: u32) -> Result<Vec<Fixture>, IngestError>;
}

/// Production client over reqwest with bounded retries.
pub struct FplClient {
    http: reqwest::Client,
    base_url: String,
}

impl FplClient {
    pub fn new(base_url: &str) -> Result<Self, IngestError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(IngestError::Client)?;
        Ok(FplClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, IngestError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_status = 0u16;

        for attempt in 1..=RETRIES {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| IngestError::Http {
                    url: url.clone(),
                    source: e,
                })?;

            if response.status().is_success() {
                return response.json::<T>().await.map_err(|e| IngestError::Http {
                    url: url.clone(),
                    source: e,
                });
            }

            last_status = response.status().as_u16();
            warn!(%url, status = last_status, attempt, "request failed, retrying");
            if attempt < RETRIES {
                tokio::time::sleep(RETRY_PAUSE).await;
            }
        }

        Err(IngestError::Status {
            url,
            status: last_status,
            attempts: RETRIES,
        })
    }
}

#[async_trait]
impl FplApi for FplClient {
    async fn bootstrap(&self) -> Result<Bootstrap, IngestError> {
        self.get_json("bootstrap-static/").await
    }

    async fn event_live(&self, gw: u32) -> Result<LiveEvent, IngestError> {
        self.get_json(&format!("event/{gw}/live/")).await
    }

    async fn fixtures(&self, gw: u32) -> Result<Vec<Fixture>, IngestError> {
        self.get_json(&format!("fixtures/?event={gw}")).await
    }
}

// ---------------------------------------------------------------------------
// Flattening
// ---------------------------------------------------------------------------

/// Join bootstrap lookups with live per-player stats into gameweek rows.
///
/// A player with exactly one explain entry is enriched with home/away,
/// opponent, scores, and kickoff time from the matching fixture. Players
/// with a double gameweek keep their summed stats but no per-fixture
/// enrichment, as in the source data.
pub fn flatten_gameweek(
    bootstrap: &Bootstrap,
    live: &LiveEvent,
    fixtures: &[Fixture],
    gw: u32,
) -> Vec<GwRecord> {
    let positions: HashMap<u32, &str> = bootstrap
        .element_types
        .iter()
        .map(|t| (t.id, t.singular_name_short.as_str()))
        .collect();
    let team_short: HashMap<u32, &str> = bootstrap
        .teams
        .iter()
        .map(|t| (t.id, t.short_name.as_str()))
        .collect();
    let elements: HashMap<u32, &Element> =
        bootstrap.elements.iter().map(|e| (e.id, e)).collect();
    let fixture_by_id: HashMap<u32, &Fixture> = fixtures.iter().map(|f| (f.id, f)).collect();

    let mut records = Vec::with_capacity(live.elements.len());
    for entry in &live.elements {
        let Some(element) = elements.get(&entry.id) else {
            warn!(element = entry.id, "live stats for unknown player id, skipping");
            continue;
        };

        let mut was_home = None;
        let mut opponent_team = None;
        let mut fixture_id = None;
        let mut team_h_score = None;
        let mut team_a_score = None;
        let mut kickoff_time = None;

        if let [explain] = entry.explain.as_slice() {
            fixture_id = Some(explain.fixture);
            was_home = explain.was_home;
            if let Some(fixture) = fixture_by_id.get(&explain.fixture) {
                team_h_score = fixture.team_h_score;
                team_a_score = fixture.team_a_score;
                kickoff_time = fixture.kickoff_time;
                opponent_team = if element.team == fixture.team_h {
                    was_home = was_home.or(Some(true));
                    Some(fixture.team_a)
                } else if element.team == fixture.team_a {
                    was_home = was_home.or(Some(false));
                    Some(fixture.team_h)
                } else {
                    None
                };
            }
        }

        records.push(GwRecord {
            element: element.id,
            gw,
            name: element.web_name.clone(),
            team: team_short
                .get(&element.team)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            position: positions
                .get(&element.element_type)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            value: element.now_cost,
            minutes: entry.stats.minutes,
            goals_scored: entry.stats.goals_scored,
            assists: entry.stats.assists,
            clean_sheets: entry.stats.clean_sheets,
            goals_conceded: entry.stats.goals_conceded,
            saves: entry.stats.saves,
            bonus: entry.stats.bonus,
            bps: entry.stats.bps,
            yellow_cards: entry.stats.yellow_cards,
            red_cards: entry.stats.red_cards,
            total_points: entry.stats.total_points,
            was_home,
            opponent_team,
            team_h_score,
            team_a_score,
            fixture_id,
            kickoff_time,
        });
    }
    records
}

/// Fetch and flatten one gameweek.
pub async fn fetch_gameweek<A: FplApi + Sync>(api: &A, gw: u32) -> Result<Vec<GwRecord>, IngestError> {
    let bootstrap = api.bootstrap().await?;
    let live = api.event_live(gw).await?;
    let fixtures = api.fixtures(gw).await?;

    let records = flatten_gameweek(&bootstrap, &live, &fixtures, gw);
    info!(gw, players = records.len(), "flattened gameweek stats");
    Ok(records)
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub fn raw_gw_path(raw_dir: &str, gw: u32) -> PathBuf {
    Path::new(raw_dir).join(format!("gw{gw}_player_stats.csv"))
}

pub fn write_gw_records(path: &Path, records: &[GwRecord]) -> Result<(), IngestError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IngestError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| IngestError::Csv {
        path: path.display().to_string(),
        source: e,
    })?;
    for record in records {
        writer.serialize(record).map_err(|e| IngestError::Csv {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    writer.flush().map_err(|e| IngestError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bootstrap_fixture() -> Bootstrap {
        serde_json::from_str(
            r#"{
                "elements": [
                    {"id": 1, "web_name": "Raya", "team": 10, "now_cost": 55, "element_type": 1},
                    {"id": 2, "web_name": "Salah", "team": 11, "now_cost": 130, "element_type": 3}
                ],
                "teams": [
                    {"id": 10, "name": "Arsenal", "short_name": "ARS"},
                    {"id": 11, "name": "Liverpool", "short_name": "LIV"}
                ],
                "element_types": [
                    {"id": 1, "singular_name_short": "GKP"},
                    {"id": 3, "singular_name_short": "MID"}
                ]
            }"#,
        )
        .unwrap()
    }

    fn live_fixture() -> LiveEvent {
        serde_json::from_str(
            r#"{
                "elements": [
                    {
                        "id": 1,
                        "stats": {"minutes": 90, "total_points": 6, "saves": 3},
                        "explain": [{"fixture": 7}]
                    },
                    {
                        "id": 2,
                        "stats": {"minutes": 180, "total_points": 15, "goals_scored": 2},
                        "explain": [{"fixture": 7}, {"fixture": 8}]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    fn fixtures_fixture() -> Vec<Fixture> {
        serde_json::from_str(
            r#"[
                {
                    "id": 7,
                    "team_h": 10,
                    "team_a": 11,
                    "team_h_score": 2,
                    "team_a_score": 1,
                    "kickoff_time": "2025-08-16T14:00:00Z"
                }
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn flatten_joins_identity_and_stats() {
        let records = flatten_gameweek(&bootstrap_fixture(), &live_fixture(), &fixtures_fixture(), 1);
        assert_eq!(records.len(), 2);

        let raya = &records[0];
        assert_eq!(raya.name, "Raya");
        assert_eq!(raya.team, "ARS");
        assert_eq!(raya.position, "GKP");
        assert!((raya.value - 55.0).abs() < f64::EPSILON);
        assert!((raya.saves - 3.0).abs() < f64::EPSILON);
        assert_eq!(raya.gw, 1);
    }

    #[test]
    fn single_fixture_player_gets_home_away_enrichment() {
        let records = flatten_gameweek(&bootstrap_fixture(), &live_fixture(), &fixtures_fixture(), 1);
        let raya = &records[0];
        assert_eq!(raya.was_home, Some(true));
        assert_eq!(raya.opponent_team, Some(11));
        assert_eq!(raya.fixture_id, Some(7));
        assert_eq!(raya.team_h_score, Some(2.0));
        assert!(raya.kickoff_time.is_some());
    }

    #[test]
    fn double_gameweek_player_keeps_stats_without_enrichment() {
        let records = flatten_gameweek(&bootstrap_fixture(), &live_fixture(), &fixtures_fixture(), 1);
        let salah = &records[1];
        assert!((salah.total_points - 15.0).abs() < f64::EPSILON);
        assert!((salah.minutes - 180.0).abs() < f64::EPSILON);
        assert_eq!(salah.was_home, None);
        assert_eq!(salah.fixture_id, None);
    }

    #[test]
    fn unknown_player_id_skipped() {
        let live: LiveEvent = serde_json::from_str(
            r#"{"elements": [{"id": 99, "stats": {}, "explain": []}]}"#,
        )
        .unwrap();
        let records = flatten_gameweek(&bootstrap_fixture(), &live, &[], 1);
        assert!(records.is_empty());
    }

    #[test]
    fn missing_stats_fields_default_to_zero() {
        let live: LiveEvent = serde_json::from_str(
            r#"{"elements": [{"id": 1, "stats": {"total_points": 2}, "explain": []}]}"#,
        )
        .unwrap();
        let records = flatten_gameweek(&bootstrap_fixture(), &live, &[], 3);
        assert!((records[0].total_points - 2.0).abs() < f64::EPSILON);
        assert!((records[0].minutes - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn raw_path_embeds_gameweek() {
        let path = raw_gw_path("data/raw/current", 12);
        assert!(path.ends_with("gw12_player_stats.csv"));
    }

    struct CannedApi;

    #[async_trait]
    impl FplApi for CannedApi {
        async fn bootstrap(&self) -> Result<Bootstrap, IngestError> {
            Ok(bootstrap_fixture())
        }
        async fn event_live(&self, _gw: u32) -> Result<LiveEvent, IngestError> {
            Ok(live_fixture())
        }
        async fn fixtures(&self, _gw: u32) -> Result<Vec<Fixture>, IngestError> {
            Ok(fixtures_fixture())
        }
    }

    #[tokio::test]
    async fn fetch_gameweek_drives_the_api_trait() {
        let records = fetch_gameweek(&CannedApi, 4).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.gw == 4));
    }
}
