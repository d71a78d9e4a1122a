// Full pipeline integration: raw gameweek rows -> features -> model ->
// predictions CSV -> normalized candidates -> optimal squad.

use gaffer::features::{build_features, merge_gameweeks, GwRecord};
use gaffer::model::{predict_next_gw, write_predictions, PointsModel};
use gaffer::optimizer::normalize::load_candidates;
use gaffer::optimizer::{select_squad, SelectionConfig};

/// Twenty players (3 GK, 6 DEF, 6 MID, 5 FWD) across seven teams, with a
/// persistent per-player scoring level so the regressor has signal. Values
/// are in raw API tenths, exercising the price-scale heuristic downstream.
fn synthetic_records(gameweeks: u32) -> Vec<GwRecord> {
    let positions = [
        ("GKP", 3u32, 45.0),
        ("DEF", 6, 48.0),
        ("MID", 6, 60.0),
        ("FWD", 5, 65.0),
    ];

    let mut records = Vec::new();
    let mut element = 0u32;
    for (position, count, base_value) in positions {
        for slot in 0..count {
            element += 1;
            let level = 2.0 + (element % 7) as f64;
            for gw in 1..=gameweeks {
                let points = level + ((gw + element) % 3) as f64 * 0.7;
                records.push(GwRecord {
                    element,
                    gw,
                    name: format!("{position}{slot}"),
                    team: format!("T{}", element % 7),
                    position: position.to_string(),
                    value: base_value + slot as f64 * 4.0,
                    minutes: 90.0,
                    goals_scored: if position == "FWD" { 1.0 } else { 0.0 },
                    assists: 0.0,
                    clean_sheets: 0.0,
                    goals_conceded: 1.0,
                    saves: if position == "GKP" { 3.0 } else { 0.0 },
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
                });
            }
        }
    }
    records
}

#[test]
fn raw_rows_flow_through_to_a_valid_squad() {
    // Accumulate the table one gameweek at a time, as the CLI does.
    let mut accumulated: Vec<GwRecord> = Vec::new();
    for gw in 1..=6u32 {
        let week: Vec<GwRecord> = synthetic_records(6)
            .into_iter()
            .filter(|r| r.gw == gw)
            .collect();
        accumulated = merge_gameweeks(accumulated, week);
    }
    let rows = build_features(accumulated);

    // Train on everything before the final observed gameweek.
    let model = PointsModel::fit(&rows, 6).expect("training slice is non-empty");
    let (next_gw, predictions) = predict_next_gw(&rows, &model).expect("predictions");
    assert_eq!(next_gw, 7);
    assert_eq!(predictions.len(), 20);

    // Round-trip through the prediction CSV contract.
    let tmp = std::env::temp_dir().join("gaffer_pipeline_test");
    let _ = std::fs::remove_dir_all(&tmp);
    let pred_path = tmp.join(format!("predictions_gw{next_gw}.csv"));
    write_predictions(&pred_path, &predictions).expect("write predictions");

    let csv_text = std::fs::read_to_string(&pred_path).unwrap();
    let config = SelectionConfig::default();
    let candidates = load_candidates(csv_text.as_bytes(), &config).expect("normalize");
    assert_eq!(candidates.len(), 20);
    // Raw tenths values were rescaled into currency units.
    assert!(candidates.iter().all(|c| c.price < 20.0));

    let squad = select_squad(&candidates, &config).expect("feasible synthetic pool");
    assert_eq!(squad.members.len(), 15);
    assert!(squad.total_cost <= config.budget + 1e-6);

    let captains = squad.members.iter().filter(|m| m.captain).count();
    assert_eq!(captains, 1);

    let mut per_team = std::collections::HashMap::new();
    for member in &squad.members {
        *per_team.entry(member.player.team.clone()).or_insert(0usize) += 1;
    }
    assert!(per_team.values().all(|&c| c <= config.max_per_team));

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn refetched_gameweek_overwrites_before_training() {
    let base = synthetic_records(4);

    // A re-fetch of gameweek 4 with corrected stats.
    let corrected: Vec<GwRecord> = synthetic_records(4)
        .into_iter()
        .filter(|r| r.gw == 4)
        .map(|mut r| {
            r.total_points += 1.0;
            r
        })
        .collect();

    let merged = merge_gameweeks(base, corrected);
    let rows = build_features(merged);

    let gw4: Vec<_> = rows.iter().filter(|r| r.gw == 4).collect();
    assert_eq!(gw4.len(), 20, "no duplicate rows after the overwrite");

    let original_gw4_points: Vec<f64> = synthetic_records(4)
        .into_iter()
        .filter(|r| r.gw == 4)
        .map(|r| r.total_points)
        .collect();
    for (row, original) in gw4.iter().zip(original_gw4_points) {
        assert!((row.total_points - (original + 1.0)).abs() < 1e-9);
    }
}

#[test]
fn position_labels_from_the_api_survive_normalization() {
    // The ingest stage emits the API's GKP label; the normalizer folds it
    // into GK without the permissive flag.
    let rows = build_features(synthetic_records(3));
    let model = PointsModel::fit(&rows, 3).unwrap();
    let (_, predictions) = predict_next_gw(&rows, &model).unwrap();

    let mut buffer = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut buffer);
        for row in &predictions {
            writer.serialize(row).unwrap();
        }
        writer.flush().unwrap();
    }

    let config = SelectionConfig::default();
    let candidates = load_candidates(buffer.as_slice(), &config).expect("GKP is a known synonym");
    let goalkeepers = candidates
        .iter()
        .filter(|c| c.position == gaffer::optimizer::normalize::Position::Gk)
        .count();
    assert_eq!(goalkeepers, 3);
}
