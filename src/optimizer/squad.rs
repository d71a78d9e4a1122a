// Squad extraction and post-solve validation.
//
// The solver's optimality certificate is not trusted blind: every hard
// constraint is re-verified here against the rounded assignment, so a
// numerical artifact or rounding defect surfaces as a contract violation
// instead of an invalid squad.

use std::collections::HashMap;

use crate::optimizer::ilp::Assignment;
use crate::optimizer::normalize::PlayerCandidate;
use crate::optimizer::{SelectionConfig, SquadError};

/// Solver outputs are floating-point; a value at or above this rounds to 1.
const BINARY_ROUND_THRESHOLD: f64 = 0.5;

/// Tolerance for the budget re-check, covering accumulated float error in
/// the price sum.
const BUDGET_EPS: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One selected player, tagged with the captaincy flag.
#[derive(Debug, Clone, PartialEq)]
pub struct SquadMember {
    pub player: PlayerCandidate,
    pub captain: bool,
}

/// The validated squad for one gameweek: exactly `squad_size` members ordered
/// by predicted points descending (stable, so ties keep input order), exactly
/// one captain, and the two summary totals. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Squad {
    pub members: Vec<SquadMember>,
    pub total_cost: f64,
    pub total_expected_points: f64,
}

impl Squad {
    /// The captain row. The extractor guarantees exactly one exists.
    pub fn captain(&self) -> Option<&SquadMember> {
        self.members.iter().find(|m| m.captain)
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Reconstruct and validate the squad from an optimal assignment.
///
/// Deterministic: the same assignment always yields the same squad and the
/// same summary values.
pub fn extract_squad(
    table: &[PlayerCandidate],
    assignment: &Assignment,
    config: &SelectionConfig,
) -> Result<Squad, SquadError> {
    if assignment.select.len() != table.len() || assignment.captain.len() != table.len() {
        return Err(SquadError::ContractViolation(format!(
            "assignment covers {} select / {} captain variables for {} candidates",
            assignment.select.len(),
            assignment.captain.len(),
            table.len()
        )));
    }

    let selected: Vec<usize> = (0..table.len())
        .filter(|&i| assignment.select[i] >= BINARY_ROUND_THRESHOLD)
        .collect();
    let captains: Vec<usize> = (0..table.len())
        .filter(|&i| assignment.captain[i] >= BINARY_ROUND_THRESHOLD)
        .collect();

    verify(table, &selected, &captains, config)?;

    let mut members: Vec<SquadMember> = selected
        .iter()
        .map(|&i| SquadMember {
            player: table[i].clone(),
            captain: assignment.captain[i] >= BINARY_ROUND_THRESHOLD,
        })
        .collect();

    // Stable sort: equal predicted points keep input order.
    members.sort_by(|a, b| {
        b.player
            .predicted_points
            .partial_cmp(&a.player.predicted_points)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total_cost: f64 = members.iter().map(|m| m.player.price).sum();
    let captain_points: f64 = members
        .iter()
        .filter(|m| m.captain)
        .map(|m| m.player.predicted_points)
        .sum();
    let total_expected_points: f64 =
        members.iter().map(|m| m.player.predicted_points).sum::<f64>() + captain_points;

    Ok(Squad {
        members,
        total_cost,
        total_expected_points,
    })
}

/// Re-verify every hard constraint against the rounded selection. Any
/// violation is fatal and never silently corrected.
fn verify(
    table: &[PlayerCandidate],
    selected: &[usize],
    captains: &[usize],
    config: &SelectionConfig,
) -> Result<(), SquadError> {
    if selected.len() != config.squad_size {
        return Err(SquadError::ContractViolation(format!(
            "solver selected {} players, expected {}",
            selected.len(),
            config.squad_size
        )));
    }

    if captains.len() != config.captain_count {
        return Err(SquadError::ContractViolation(format!(
            "solver marked {} captains, expected {}",
            captains.len(),
            config.captain_count
        )));
    }

    for &i in captains {
        if !selected.contains(&i) {
            return Err(SquadError::ContractViolation(format!(
                "captain '{}' is not in the selected set",
                table[i].name
            )));
        }
    }

    for (position, quota) in config.quotas.entries() {
        let count = selected
            .iter()
            .filter(|&&i| table[i].position == position)
            .count();
        if count != quota {
            return Err(SquadError::ContractViolation(format!(
                "{} players selected at {}, quota is {}",
                count, position, quota
            )));
        }
    }

    let mut per_team: HashMap<&str, usize> = HashMap::new();
    for &i in selected {
        *per_team.entry(table[i].team.as_str()).or_insert(0) += 1;
    }
    for (team, count) in per_team {
        if count > config.max_per_team {
            return Err(SquadError::ContractViolation(format!(
                "{count} players selected from team '{team}', cap is {}",
                config.max_per_team
            )));
        }
    }

    let total_price: f64 = selected.iter().map(|&i| table[i].price).sum();
    if total_price > config.budget + BUDGET_EPS {
        return Err(SquadError::ContractViolation(format!(
            "selected squad costs {total_price:.2}, budget is {:.2}",
            config.budget
        )));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
