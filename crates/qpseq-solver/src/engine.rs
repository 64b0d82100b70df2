use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use qpseq_problem::{QpProblem, Scalar};
use qpseq_types::Outcome;

/// Result of one engine call
#[derive(Debug, Clone, PartialEq)]
pub struct Solve<T: Scalar> {
    pub outcome: Outcome,
    /// Primal vector, `num_vars()` long when `outcome.has_solution()`,
    /// empty otherwise
    pub x: DVector<T>,
    pub iterations: usize,
}

impl<T: Scalar> Solve<T> {
    pub fn new(outcome: Outcome, x: DVector<T>, iterations: usize) -> Self {
        if outcome.has_solution() {
            Solve { outcome, x, iterations }
        } else {
            Self::without_solution(outcome, iterations)
        }
    }

    pub fn without_solution(outcome: Outcome, iterations: usize) -> Self {
        Solve {
            outcome,
            x: DVector::zeros(0),
            iterations,
        }
    }
}

/// Warm-start state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Uninitialized,
    Warm,
}

/// The last optimal primal vector an engine produced.
///
/// Only an `Optimal` outcome replaces it; anything else keeps the last good
/// vector so a failed instance does not poison the next warm start.
#[derive(Debug, Clone)]
pub struct WarmStart<T: Scalar> {
    previous: Option<DVector<T>>,
}

impl<T: Scalar> WarmStart<T> {
    pub fn new() -> Self {
        WarmStart { previous: None }
    }

    pub fn state(&self) -> EngineState {
        match self.previous {
            Some(_) => EngineState::Warm,
            None => EngineState::Uninitialized,
        }
    }

    pub fn previous(&self) -> Option<&DVector<T>> {
        self.previous.as_ref()
    }

    /// Previous result, if it fits a problem over `num_vars` variables
    pub fn guess_for(&self, num_vars: usize) -> Option<&DVector<T>> {
        self.previous.as_ref().filter(|p| p.len() == num_vars)
    }

    pub fn record(&mut self, solve: &Solve<T>) {
        if solve.outcome == Outcome::Optimal {
            self.previous = Some(solve.x.clone());
        }
    }

    pub fn invalidate(&mut self) {
        self.previous = None;
    }
}

impl<T: Scalar> Default for WarmStart<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A stateful QP engine solving a sequence of related problems.
///
/// Backends implement [`solve`](Self::solve) and expose their
/// [`WarmStart`]; the sequencing contract (`init`, `next`,
/// `next_with_guess`) is shared.
pub trait SolverEngine<T: Scalar>: Send {
    fn name(&self) -> &str;

    /// One backend call. `guess` is the starting point for a warm solve,
    /// `None` for a cold one. Must not record anything in the warm-start
    /// state.
    fn solve(&mut self, problem: &QpProblem<T>, guess: Option<&DVector<T>>) -> Solve<T>;

    /// Constraint violation the backend tolerates internally. Independent of
    /// the tolerance a caller passes to `QpProblem::verify`.
    fn set_feasibility_tolerance(&mut self, tolerance: T);

    /// How far below zero an eigenvalue of Q may be before the problem is
    /// rejected as non-convex
    fn set_psd_tolerance(&mut self, tolerance: T);

    fn warm_start(&self) -> &WarmStart<T>;

    fn warm_start_mut(&mut self) -> &mut WarmStart<T>;

    fn state(&self) -> EngineState {
        self.warm_start().state()
    }

    fn previous_result(&self) -> Option<&DVector<T>> {
        self.warm_start().previous()
    }

    /// Cold-start solve. Re-seeds the warm-start state on `Optimal`.
    fn init(&mut self, problem: &QpProblem<T>) -> Solve<T> {
        let solve = self.guarded_solve(problem, None);
        self.warm_start_mut().record(&solve);
        solve
    }

    /// Solves the next instance of the sequence, starting from the previous
    /// result. Falls back to [`init`](Self::init) when there is no previous
    /// result or the variable count changed.
    fn next(&mut self, problem: &QpProblem<T>) -> Solve<T> {
        if let Some(guess) = self.warm_start().guess_for(problem.num_vars()).cloned() {
            return self.next_with_guess(problem, &guess);
        }

        if let Some(previous) = self.previous_result() {
            debug!(
                engine = self.name(),
                previous = previous.len(),
                vars = problem.num_vars(),
                "variable count changed, dropping warm start"
            );
            self.warm_start_mut().invalidate();
        }
        self.init(problem)
    }

    /// Solves the next instance starting from `guess` instead of the
    /// recorded result. A guess of the wrong length is ignored.
    fn next_with_guess(&mut self, problem: &QpProblem<T>, guess: &DVector<T>) -> Solve<T> {
        let start = if guess.len() == problem.num_vars() {
            Some(guess)
        } else {
            debug!(
                engine = self.name(),
                guess = guess.len(),
                vars = problem.num_vars(),
                "ignoring guess of the wrong length"
            );
            None
        };

        let solve = self.guarded_solve(problem, start);
        self.warm_start_mut().record(&solve);
        solve
    }

    /// Runs [`solve`](Self::solve), turning a panic inside the backend into
    /// `Outcome::Error`.
    fn guarded_solve(&mut self, problem: &QpProblem<T>, guess: Option<&DVector<T>>) -> Solve<T> {
        match catch_unwind(AssertUnwindSafe(|| self.solve(problem, guess))) {
            Ok(solve) => solve,
            Err(_) => {
                warn!(engine = self.name(), "backend panicked during solve");
                Solve::without_solution(Outcome::Error, 0)
            }
        }
    }
}
