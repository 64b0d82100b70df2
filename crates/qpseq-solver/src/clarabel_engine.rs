use clarabel::algebra::CscMatrix;
use clarabel::solver::{DefaultSettings, DefaultSolver, IPSolver, SolverStatus, SupportedConeT};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use qpseq_problem::{QpProblem, Scalar};
use qpseq_types::Outcome;

use crate::engine::{Solve, SolverEngine, WarmStart};
use crate::settings::EngineSettings;

const DEFAULT_MAX_ITER: u32 = 200;

/// Clarabel interior-point engine (pure Rust).
///
/// Problems are solved in `f64` whatever `T` is. Clarabel has no primal warm
/// start, so every call is a cold solve; the warm-start state is still kept
/// for the sequencing contract.
pub struct ClarabelEngine<T: Scalar> {
    settings: EngineSettings,
    warm: WarmStart<T>,
}

impl<T: Scalar> ClarabelEngine<T> {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        ClarabelEngine {
            settings,
            warm: WarmStart::new(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn clarabel_settings(&self) -> DefaultSettings<f64> {
        let mut settings = DefaultSettings::default();
        settings.verbose = self.settings.verbose;
        settings.max_iter = self.settings.iteration_limit(DEFAULT_MAX_ITER);
        settings.tol_feas = self.settings.feasibility_tolerance;
        settings.tol_gap_abs = self.settings.optimality_tolerance;
        settings.tol_gap_rel = self.settings.optimality_tolerance;
        settings
    }
}

impl<T: Scalar> Default for ClarabelEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> SolverEngine<T> for ClarabelEngine<T> {
    fn name(&self) -> &str {
        "clarabel"
    }

    fn solve(&mut self, problem: &QpProblem<T>, guess: Option<&DVector<T>>) -> Solve<T> {
        if guess.is_some() {
            debug!(engine = "clarabel", "no primal warm start, solving cold");
        }

        let psd_tolerance: T = nalgebra::convert(self.settings.psd_tolerance);
        if !problem.is_q_psd(psd_tolerance) {
            warn!(engine = "clarabel", "Q is not positive semidefinite, rejecting problem");
            return Solve::without_solution(Outcome::Error, 0);
        }

        let wide: QpProblem<f64> = match problem.cast() {
            Ok(wide) => wide,
            Err(e) => {
                warn!(engine = "clarabel", error = %e, "cannot widen problem to f64");
                return Solve::without_solution(Outcome::Error, 0);
            }
        };

        let conic = ConicForm::build(&wide);
        let p_csc = to_clarabel_csc_upper(wide.q());
        let a_csc = to_clarabel_csc(&conic.a);

        let mut solver = DefaultSolver::new(
            &p_csc,
            wide.c().as_slice(),
            &a_csc,
            &conic.b,
            &conic.cones(),
            self.clarabel_settings(),
        );
        solver.solve();

        let outcome = map_status(solver.solution.status);
        let iterations = solver.info.iterations as usize;

        debug!(
            engine = "clarabel",
            status = ?solver.solution.status,
            outcome = %outcome,
            iterations,
            "clarabel solve finished"
        );

        if !outcome.has_solution() {
            return Solve::without_solution(outcome, iterations);
        }

        let mut x = DVector::from_column_slice(&solver.solution.x);
        if outcome != Outcome::Unbounded {
            snap_to_bounds(&wide, &mut x);
        }
        let x = x.map(|v| nalgebra::convert::<f64, T>(v));

        Solve::new(outcome, x, iterations)
    }

    fn set_feasibility_tolerance(&mut self, tolerance: T) {
        self.settings.feasibility_tolerance = tolerance.to_f64_lossy();
    }

    fn set_psd_tolerance(&mut self, tolerance: T) {
        self.settings.psd_tolerance = tolerance.to_f64_lossy();
    }

    fn warm_start(&self) -> &WarmStart<T> {
        &self.warm
    }

    fn warm_start_mut(&mut self) -> &mut WarmStart<T> {
        &mut self.warm
    }
}

fn map_status(status: SolverStatus) -> Outcome {
    match status {
        SolverStatus::Solved => Outcome::Optimal,
        SolverStatus::AlmostSolved => Outcome::Feasible,
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => Outcome::Infeasible,
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => Outcome::Unbounded,
        SolverStatus::NumericalError | SolverStatus::InsufficientProgress => Outcome::Error,
        _ => Outcome::Unknown,
    }
}

/// Constraints in Clarabel's `Ax + s = b, s in K` form.
///
/// Zero-cone rows (equalities) come first, then non-negative-cone rows:
/// `-a.x + s = -lb` for a finite lower side, `a.x + s = ub` for a finite
/// upper side. Variable bounds are rows of the identity.
struct ConicForm {
    a: DMatrix<f64>,
    b: Vec<f64>,
    zero_rows: usize,
    nonneg_rows: usize,
}

impl ConicForm {
    fn build(problem: &QpProblem<f64>) -> Self {
        let n = problem.num_vars();
        let mut equalities: Vec<(DVector<f64>, f64)> = Vec::new();
        let mut inequalities: Vec<(DVector<f64>, f64)> = Vec::new();

        let mut push_bounds = |row: DVector<f64>, low: f64, up: f64| {
            let low_finite = !f64::is_lower_unbounded(low) && low.is_finite();
            let up_finite = !f64::is_upper_unbounded(up) && up.is_finite();

            if low_finite && up_finite && low == up {
                equalities.push((row, low));
                return;
            }
            if low_finite {
                inequalities.push((-&row, -low));
            }
            if up_finite {
                inequalities.push((row, up));
            }
        };

        for i in 0..problem.num_constraints() {
            let row = problem.a().row(i).transpose();
            push_bounds(row, problem.lb()[i], problem.ub()[i]);
        }
        for j in 0..n {
            let mut unit = DVector::zeros(n);
            unit[j] = 1.0;
            push_bounds(unit, problem.lbx()[j], problem.ubx()[j]);
        }

        let zero_rows = equalities.len();
        let nonneg_rows = inequalities.len();
        let mut a = DMatrix::zeros(zero_rows + nonneg_rows, n);
        let mut b = Vec::with_capacity(zero_rows + nonneg_rows);

        for (k, (row, rhs)) in equalities.iter().chain(inequalities.iter()).enumerate() {
            a.row_mut(k).copy_from(&row.transpose());
            b.push(*rhs);
        }

        ConicForm {
            a,
            b,
            zero_rows,
            nonneg_rows,
        }
    }

    fn cones(&self) -> Vec<SupportedConeT<f64>> {
        let mut cones = Vec::with_capacity(2);
        if self.zero_rows > 0 {
            cones.push(SupportedConeT::ZeroConeT(self.zero_rows));
        }
        if self.nonneg_rows > 0 {
            cones.push(SupportedConeT::NonnegativeConeT(self.nonneg_rows));
        }
        cones
    }
}

/// Pulls interior-point round-off back inside variable bounds and
/// single-variable rows.
fn snap_to_bounds(problem: &QpProblem<f64>, x: &mut DVector<f64>) {
    for j in 0..problem.num_vars() {
        if !problem.is_lbx_unbounded(j) {
            x[j] = x[j].max(problem.lbx()[j]);
        }
        if !problem.is_ubx_unbounded(j) {
            x[j] = x[j].min(problem.ubx()[j]);
        }
    }

    for i in 0..problem.num_constraints() {
        let row = problem.a().row(i);
        let mut nonzero = row.iter().enumerate().filter(|(_, &v)| v != 0.0);
        let (var_idx, coeff) = match (nonzero.next(), nonzero.next()) {
            (Some((idx, &coeff)), None) => (idx, coeff),
            _ => continue,
        };

        let (low, up) = (problem.lb()[i], problem.ub()[i]);
        let (low_finite, up_finite) = (!problem.is_lb_unbounded(i), !problem.is_ub_unbounded(i));
        if coeff > 0.0 {
            if low_finite {
                x[var_idx] = x[var_idx].max(low / coeff);
            }
            if up_finite {
                x[var_idx] = x[var_idx].min(up / coeff);
            }
        } else {
            if low_finite {
                x[var_idx] = x[var_idx].min(low / coeff);
            }
            if up_finite {
                x[var_idx] = x[var_idx].max(up / coeff);
            }
        }
    }
}

/// Upper triangle of a symmetric matrix in CSC form
fn to_clarabel_csc_upper(mat: &DMatrix<f64>) -> CscMatrix<f64> {
    let mut colptr = vec![0];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for col in 0..mat.ncols() {
        for row in 0..=col {
            let val = mat[(row, col)];
            if val != 0.0 {
                rowval.push(row);
                nzval.push(val);
            }
        }
        colptr.push(nzval.len());
    }

    CscMatrix {
        m: mat.nrows(),
        n: mat.ncols(),
        colptr,
        rowval,
        nzval,
    }
}

fn to_clarabel_csc(mat: &DMatrix<f64>) -> CscMatrix<f64> {
    let mut colptr = vec![0];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for col in 0..mat.ncols() {
        for row in 0..mat.nrows() {
            let val = mat[(row, col)];
            if val != 0.0 {
                rowval.push(row);
                nzval.push(val);
            }
        }
        colptr.push(nzval.len());
    }

    CscMatrix {
        m: mat.nrows(),
        n: mat.ncols(),
        colptr,
        rowval,
        nzval,
    }
}
