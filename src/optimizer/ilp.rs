// Integer-programming model for squad selection.
//
// Two binary variables per candidate: `select[i]` marks squad membership,
// `captain[i]` marks the captaincy. The captain contributes predicted points
// a second time through its own objective term, so the captaincy is exactly a
// doubling of one selected player's points. This two-variable encoding
// linearizes cleanly; a tagged role variable would solve the same problem.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use good_lp::variable::UnsolvedProblem;
use good_lp::{
    default_solver, variable, variables, Constraint, Expression, ResolutionError, Solution,
    SolverModel, Variable,
};
use tracing::debug;

use crate::optimizer::normalize::PlayerCandidate;
use crate::optimizer::SelectionConfig;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A built but unsolved squad-selection program: the objective, the full
/// constraint set, and the variable handles needed to read the solution back.
pub struct SquadModel {
    problem: UnsolvedProblem,
    constraints: Vec<Constraint>,
    select: Vec<Variable>,
    captain: Vec<Variable>,
}

/// Build the integer program for a candidate table and config.
///
/// Constraints, in order:
/// 1. Budget: sum of selected prices <= budget.
/// 2. Position quotas: exact count per canonical position.
/// 3. Team cap: at most `max_per_team` selected per distinct team.
/// 4. Squad size: exact total (redundant with the quotas when they sum
///    correctly; kept as an independent consistency check).
/// 5. Captain count: exact.
/// 6. Captain subset: captain[i] <= select[i] for every row.
///
/// The builder never fails. An inconsistent config is rejected before it
/// reaches this point, and a quota with zero eligible candidates is still
/// handed to the solver: infeasibility is detected at solve time.
pub fn build_model(table: &[PlayerCandidate], config: &SelectionConfig) -> SquadModel {
    let mut vars = variables!();
    let select: Vec<Variable> = table.iter().map(|_| vars.add(variable().binary())).collect();
    let captain: Vec<Variable> = table.iter().map(|_| vars.add(variable().binary())).collect();

    let mut objective = Expression::with_capacity(table.len() * 2);
    for (i, candidate) in table.iter().enumerate() {
        objective.add_mul(candidate.predicted_points, select[i]);
        objective.add_mul(candidate.predicted_points, captain[i]);
    }

    let mut constraints = Vec::new();

    // Budget
    let mut spend = Expression::with_capacity(table.len());
    for (i, candidate) in table.iter().enumerate() {
        spend.add_mul(candidate.price, select[i]);
    }
    constraints.push(spend.leq(config.budget));

    // Exact position quotas
    for (position, quota) in config.quotas.entries() {
        let mut count = Expression::default();
        for (i, candidate) in table.iter().enumerate() {
            if candidate.position == position {
                count.add_mul(1.0, select[i]);
            }
        }
        constraints.push(count.eq(quota as f64));
    }

    // Team cap, one constraint per distinct team in input order
    let mut teams: Vec<&str> = Vec::new();
    for candidate in table {
        if !teams.contains(&candidate.team.as_str()) {
            teams.push(&candidate.team);
        }
    }
    for team in teams {
        let mut count = Expression::default();
        for (i, candidate) in table.iter().enumerate() {
            if candidate.team == team {
                count.add_mul(1.0, select[i]);
            }
        }
        constraints.push(count.leq(config.max_per_team as f64));
    }

    // Exact squad size
    let mut size = Expression::with_capacity(table.len());
    for &var in &select {
        size.add_mul(1.0, var);
    }
    constraints.push(size.eq(config.squad_size as f64));

    // Exactly `captain_count` captains, each drawn from the selected set
    let mut captains = Expression::with_capacity(table.len());
    for &var in &captain {
        captains.add_mul(1.0, var);
    }
    constraints.push(captains.eq(config.captain_count as f64));
    for i in 0..table.len() {
        constraints.push((captain[i] - select[i]).leq(0.0));
    }

    debug!(
        candidates = table.len(),
        constraints = constraints.len(),
        "built squad selection model"
    );

    SquadModel {
        problem: vars.maximise(objective),
        constraints,
        select,
        captain,
    }
}

// ---------------------------------------------------------------------------
// Solver adapter
// ---------------------------------------------------------------------------

/// Termination status of the solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    SolverError(String),
}

/// Raw variable values from an optimal solve. Values are floating-point and
/// may sit near but not exactly on 0/1; the extractor owns the rounding.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub select: Vec<f64>,
    pub captain: Vec<f64>,
}

pub struct SolveResult {
    pub status: SolveStatus,
    pub assignment: Option<Assignment>,
}

/// Invoke the MILP solver on a built model.
///
/// Without a timeout the solve runs on the calling thread and may block for
/// an unbounded but practically small time (branch-and-bound). With a timeout
/// the solve runs on a dedicated worker; on expiry the wait is abandoned and
/// the result is `SolverError`. The worker owns the model and the search
/// state, so both are dropped when its scope ends regardless of outcome.
pub fn solve(model: SquadModel, timeout: Option<Duration>) -> SolveResult {
    match timeout {
        None => run_solver(model),
        Some(limit) => {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let _ = tx.send(run_solver(model));
            });
            match rx.recv_timeout(limit) {
                Ok(result) => result,
                Err(_) => SolveResult {
                    status: SolveStatus::SolverError(format!(
                        "solve exceeded the {:.1}s limit",
                        limit.as_secs_f64()
                    )),
                    assignment: None,
                },
            }
        }
    }
}

fn run_solver(model: SquadModel) -> SolveResult {
    let SquadModel {
        problem,
        constraints,
        select,
        captain,
    } = model;

    let mut solver = problem.using(default_solver);
    for constraint in constraints {
        solver = solver.with(constraint);
    }

    match solver.solve() {
        Ok(solution) => {
            let assignment = Assignment {
                select: select.iter().map(|&v| solution.value(v)).collect(),
                captain: captain.iter().map(|&v| solution.value(v)).collect(),
            };
            SolveResult {
                status: SolveStatus::Optimal,
                assignment: Some(assignment),
            }
        }
        Err(ResolutionError::Infeasible) => SolveResult {
            status: SolveStatus::Infeasible,
            assignment: None,
        },
        Err(ResolutionError::Unbounded) => SolveResult {
            status: SolveStatus::Unbounded,
            assignment: None,
        },
        Err(other) => SolveResult {
            status: SolveStatus::SolverError(other.to_string()),
            assignment: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
