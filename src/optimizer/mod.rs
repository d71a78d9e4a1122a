// Squad selection optimizer.
//
// Pipeline: normalize (validated candidate table) -> build the integer
// program -> solve -> extract and re-validate the squad. Every stage is pure
// except the solver call, which is the single blocking operation.

pub mod ilp;
pub mod normalize;
pub mod squad;

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::optimizer::normalize::{PlayerCandidate, Position};
use crate::optimizer::squad::Squad;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure taxonomy for one optimization run. None of these are recoverable
/// inside the optimizer: all propagate to the caller as distinct kinds, and a
/// partial or invalid squad is never returned.
#[derive(Debug, Error)]
pub enum SquadError {
    #[error("prediction table missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("unrecognized position label '{label}' for player '{player}'")]
    UnknownPosition { label: String, player: String },

    #[error("selection config inconsistency: {0}")]
    ConfigInconsistency(String),

    #[error("no feasible squad under the configured constraints ({0})")]
    Infeasible(String),

    #[error("objective is unbounded; check predicted_points values")]
    Unbounded,

    #[error("solver failure: {0}")]
    Solver(String),

    #[error("solver contract violation: {0}")]
    ContractViolation(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

// ---------------------------------------------------------------------------
// Selection configuration
// ---------------------------------------------------------------------------

/// How to interpret the price column of the input table.
///
/// `Auto` applies the threshold heuristic inherited from the source data:
/// prices above 20 are assumed to be tenths of a currency unit. The explicit
/// variants exist for tables where the heuristic would guess wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceScale {
    Auto,
    AsIs,
    Tenths,
}

/// Exact required count of selected players per position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PositionQuotas {
    pub gk: usize,
    pub def: usize,
    pub mid: usize,
    pub fwd: usize,
}

impl Default for PositionQuotas {
    fn default() -> Self {
        PositionQuotas {
            gk: 2,
            def: 5,
            mid: 5,
            fwd: 3,
        }
    }
}

impl PositionQuotas {
    pub fn total(&self) -> usize {
        self.gk + self.def + self.mid + self.fwd
    }

    /// Quota entries in canonical order.
    pub fn entries(&self) -> [(Position, usize); 4] {
        [
            (Position::Gk, self.gk),
            (Position::Def, self.def),
            (Position::Mid, self.mid),
            (Position::Fwd, self.fwd),
        ]
    }
}

/// Immutable parameters for one optimization run, passed explicitly into the
/// model builder. There is no process-wide selection state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub budget: f64,
    pub quotas: PositionQuotas,
    pub max_per_team: usize,
    pub squad_size: usize,
    pub captain_count: usize,
    pub price_scale: PriceScale,
    /// When true, unrecognized position labels pass through uppercased
    /// instead of failing. Such rows can never be selected: the exact quotas
    /// plus the squad-size equality leave no room for an unquota'd position.
    pub permissive_positions: bool,
    pub solver_timeout_secs: Option<u64>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        SelectionConfig {
            budget: 100.0,
            quotas: PositionQuotas::default(),
            max_per_team: 3,
            squad_size: 15,
            captain_count: 1,
            price_scale: PriceScale::Auto,
            permissive_positions: false,
            solver_timeout_secs: None,
        }
    }
}

impl SelectionConfig {
    /// Reject configs that can never describe a well-formed squad. This runs
    /// before any model is built; the builder itself never fails.
    pub fn validate(&self) -> Result<(), SquadError> {
        if self.squad_size == 0 {
            return Err(SquadError::ConfigInconsistency(
                "squad_size must be greater than 0".into(),
            ));
        }
        if self.captain_count == 0 {
            return Err(SquadError::ConfigInconsistency(
                "captain_count must be greater than 0".into(),
            ));
        }
        if self.quotas.total() != self.squad_size {
            return Err(SquadError::ConfigInconsistency(format!(
                "position quotas sum to {} but squad_size is {}",
                self.quotas.total(),
                self.squad_size
            )));
        }
        Ok(())
    }

    pub fn solver_timeout(&self) -> Option<Duration> {
        self.solver_timeout_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Pipeline entry point
// ---------------------------------------------------------------------------

/// Select the optimal squad from a normalized candidate table.
///
/// 1. Validate the config (quota/size consistency).
/// 2. Build the integer program.
/// 3. Solve; any non-Optimal status aborts the run.
/// 4. Extract the squad and re-verify every hard constraint independently of
///    the solver's own guarantee.
pub fn select_squad(
    candidates: &[PlayerCandidate],
    config: &SelectionConfig,
) -> Result<Squad, SquadError> {
    config.validate()?;

    let model = ilp::build_model(candidates, config);
    let result = ilp::solve(model, config.solver_timeout());

    match result.status {
        ilp::SolveStatus::Optimal => {
            let assignment = result.assignment.ok_or_else(|| {
                SquadError::ContractViolation(
                    "solver reported Optimal without an assignment".into(),
                )
            })?;
            squad::extract_squad(candidates, &assignment, config)
        }
        ilp::SolveStatus::Infeasible => Err(SquadError::Infeasible(constraint_summary(
            candidates, config,
        ))),
        ilp::SolveStatus::Unbounded => Err(SquadError::Unbounded),
        ilp::SolveStatus::SolverError(message) => Err(SquadError::Solver(message)),
    }
}

/// One-line description of the constraint set, attached to infeasibility
/// errors so the caller can see what the solver was actually asked for.
fn constraint_summary(candidates: &[PlayerCandidate], config: &SelectionConfig) -> String {
    let mut eligible = [0usize; 4];
    for candidate in candidates {
        match candidate.position {
            Position::Gk => eligible[0] += 1,
            Position::Def => eligible[1] += 1,
            Position::Mid => eligible[2] += 1,
            Position::Fwd => eligible[3] += 1,
            Position::Other(_) => {}
        }
    }
    format!(
        "budget={}, quotas GK:{}/DEF:{}/MID:{}/FWD:{}, max_per_team={}, squad_size={}, \
         candidates={} (GK:{} DEF:{} MID:{} FWD:{})",
        config.budget,
        config.quotas.gk,
        config.quotas.def,
        config.quotas.mid,
        config.quotas.fwd,
        config.max_per_team,
        config.squad_size,
        candidates.len(),
        eligible[0],
        eligible[1],
        eligible[2],
        eligible[3],
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
