use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use tracing::{debug, warn};

use qpseq_problem::{QpProblem, Scalar};
use qpseq_types::Outcome;

use crate::engine::{Solve, SolverEngine, WarmStart};
use crate::settings::EngineSettings;

const DEFAULT_MAX_ITER: u32 = 10_000;
const RHO_ADAPT_INTERVAL: usize = 25;
const PRECISION_FLOOR: f64 = 1e3;

/// Operator-splitting (ADMM) QP engine over dense matrices.
///
/// Solves `min 1/2 x'Qx + c'x  s.t.  l <= [A; I] x <= u` with the OSQP
/// iteration: one Cholesky factorization of `Q + sigma I + A' R A`, then
/// cheap projections. Warm starts reuse the primal guess and the last dual
/// iterate, which makes re-solving a slightly changed problem fast.
pub struct AdmmEngine<T: Scalar> {
    settings: EngineSettings,
    rho: T,
    sigma: T,
    alpha: T,
    warm: WarmStart<T>,
    dual: Option<DVector<T>>,
}

impl<T: Scalar> AdmmEngine<T> {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        AdmmEngine {
            settings,
            rho: nalgebra::convert(0.1),
            sigma: nalgebra::convert(1e-6),
            alpha: nalgebra::convert(1.6),
            warm: WarmStart::new(),
            dual: None,
        }
    }

    /// Step size and relaxation. `rho` is only the starting value; it is
    /// adapted while iterating.
    pub fn with_params(mut self, rho: T, sigma: T, alpha: T) -> Self {
        self.rho = rho;
        self.sigma = sigma;
        self.alpha = alpha;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn tolerance(&self, value: f64) -> T {
        nalgebra::convert(value)
    }

    /// Stopping tolerance no tighter than the precision of `T` can resolve
    fn stopping_tolerance(&self, value: f64) -> T {
        let floor = T::default_epsilon() * nalgebra::convert(PRECISION_FLOOR);
        self.tolerance(value).max(floor)
    }

    fn starting_point(&self, stacked: &Stacked<T>, guess: Option<&DVector<T>>) -> (DVector<T>, DVector<T>, DVector<T>) {
        let n = stacked.a.ncols();
        let m = stacked.rows();

        match guess {
            None => {
                let mut z = DVector::zeros(m);
                stacked.project(&mut z);
                (DVector::zeros(n), z, DVector::zeros(m))
            }
            Some(guess) => {
                let mut z = &stacked.a * guess;
                stacked.project(&mut z);
                let y = match &self.dual {
                    Some(y) if y.len() == m => y.clone(),
                    _ => DVector::zeros(m),
                };
                (guess.clone(), z, y)
            }
        }
    }
}

impl<T: Scalar> Default for AdmmEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> SolverEngine<T> for AdmmEngine<T> {
    fn name(&self) -> &str {
        "admm"
    }

    fn solve(&mut self, problem: &QpProblem<T>, guess: Option<&DVector<T>>) -> Solve<T> {
        if !problem.is_consistent() {
            debug!(engine = "admm", "inverted bounds, problem is infeasible");
            return Solve::without_solution(Outcome::Infeasible, 0);
        }

        let psd_tolerance = self.tolerance(self.settings.psd_tolerance);
        if !problem.is_q_psd(psd_tolerance) {
            warn!(engine = "admm", "Q is not positive semidefinite, rejecting problem");
            return Solve::without_solution(Outcome::Error, 0);
        }

        let stacked = Stacked::build(problem);
        let at = stacked.a.transpose();
        let p = problem.q();
        let q = problem.c();
        let one = T::one();

        let eps_abs_prim = self.stopping_tolerance(self.settings.feasibility_tolerance);
        let eps_abs_dual = self.stopping_tolerance(self.settings.optimality_tolerance);
        let eps_rel = eps_abs_dual;
        let eps_inf = self.stopping_tolerance(1e-5);

        let mut rho = self.rho;
        let mut rho_vec = stacked.rho_vector(rho);
        let mut kkt = match factor(p, self.sigma, &stacked.a, &rho_vec) {
            Some(kkt) => kkt,
            None => {
                warn!(engine = "admm", "KKT factorization failed");
                return Solve::without_solution(Outcome::Error, 0);
            }
        };

        let (mut x, mut z, mut y) = self.starting_point(&stacked, guess);
        let max_iter = self.settings.iteration_limit(DEFAULT_MAX_ITER) as usize;

        for iter in 1..=max_iter {
            let rhs = &x * self.sigma - q + &at * (rho_vec.component_mul(&z) - &y);
            let x_tilde = kkt.solve(&rhs);
            let z_tilde = &stacked.a * &x_tilde;

            let x_next = &x_tilde * self.alpha + &x * (one - self.alpha);
            let z_relaxed = &z_tilde * self.alpha + &z * (one - self.alpha);
            let mut z_next = &z_relaxed + y.component_div(&rho_vec);
            stacked.project(&mut z_next);
            let y_next = &y + rho_vec.component_mul(&(&z_relaxed - &z_next));

            let delta_x = &x_next - &x;
            let delta_y = &y_next - &y;
            x = x_next;
            z = z_next;
            y = y_next;

            if !x.iter().chain(y.iter()).all(|v| v.is_finite()) {
                warn!(engine = "admm", iteration = iter, "iterate is not finite");
                return Solve::without_solution(Outcome::Error, iter);
            }

            let res = Residuals::compute(p, q, &stacked.a, &at, &x, &z, &y);
            if res.primal <= eps_abs_prim + eps_rel * res.primal_scale
                && res.dual <= eps_abs_dual + eps_rel * res.dual_scale
            {
                debug!(engine = "admm", iterations = iter, "converged");
                self.dual = Some(y);
                return Solve::new(Outcome::Optimal, x, iter);
            }

            if stacked.certifies_primal_infeasibility(&at, &delta_y, eps_inf) {
                debug!(engine = "admm", iterations = iter, "primal infeasibility certificate");
                return Solve::without_solution(Outcome::Infeasible, iter);
            }

            if stacked.certifies_dual_infeasibility(p, q, &delta_x, eps_inf) {
                debug!(engine = "admm", iterations = iter, "dual infeasibility certificate");
                let direction = &delta_x / inf_norm(&delta_x);
                return Solve::new(Outcome::Unbounded, direction, iter);
            }

            if iter % RHO_ADAPT_INTERVAL == 0 {
                if let Some(new_rho) = res.balanced_rho(rho) {
                    rho = new_rho;
                    rho_vec = stacked.rho_vector(rho);
                    kkt = match factor(p, self.sigma, &stacked.a, &rho_vec) {
                        Some(kkt) => kkt,
                        None => {
                            warn!(engine = "admm", iteration = iter, "KKT refactorization failed");
                            return Solve::without_solution(Outcome::Error, iter);
                        }
                    };
                    debug!(engine = "admm", iteration = iter, rho = ?rho, "step size adapted");
                }
            }
        }

        debug!(engine = "admm", max_iter, "iteration limit reached");
        Solve::without_solution(Outcome::Unknown, max_iter)
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

/// `l <= a x <= u` with the problem's rows first and one identity row per
/// bounded variable after them. Unbounded sides are flagged, never stored.
struct Stacked<T: Scalar> {
    a: DMatrix<T>,
    l: DVector<T>,
    u: DVector<T>,
    l_finite: Vec<bool>,
    u_finite: Vec<bool>,
}

impl<T: Scalar> Stacked<T> {
    fn build(problem: &QpProblem<T>) -> Self {
        let n = problem.num_vars();
        let m = problem.num_constraints();
        let bounded_vars: Vec<usize> = (0..n)
            .filter(|&j| !problem.is_lbx_unbounded(j) || !problem.is_ubx_unbounded(j))
            .collect();
        let rows = m + bounded_vars.len();

        let mut a = DMatrix::zeros(rows, n);
        a.rows_mut(0, m).copy_from(problem.a());
        let mut l = DVector::zeros(rows);
        let mut u = DVector::zeros(rows);
        let mut l_finite = Vec::with_capacity(rows);
        let mut u_finite = Vec::with_capacity(rows);

        let mut set_bounds = |row: usize, low: T, up: T| {
            let low_ok = !T::is_lower_unbounded(low) && low.is_finite();
            let up_ok = !T::is_upper_unbounded(up) && up.is_finite();
            if low_ok {
                l[row] = low;
            }
            if up_ok {
                u[row] = up;
            }
            l_finite.push(low_ok);
            u_finite.push(up_ok);
        };

        for i in 0..m {
            set_bounds(i, problem.lb()[i], problem.ub()[i]);
        }
        for (k, &j) in bounded_vars.iter().enumerate() {
            a[(m + k, j)] = T::one();
            set_bounds(m + k, problem.lbx()[j], problem.ubx()[j]);
        }

        Stacked {
            a,
            l,
            u,
            l_finite,
            u_finite,
        }
    }

    fn rows(&self) -> usize {
        self.a.nrows()
    }

    fn is_equality(&self, i: usize) -> bool {
        self.l_finite[i] && self.u_finite[i] && self.l[i] == self.u[i]
    }

    /// Per-row step size: stiff on equalities, loose on free rows
    fn rho_vector(&self, rho: T) -> DVector<T> {
        let equality_scale: T = nalgebra::convert(1e3);
        let free_rho: T = nalgebra::convert(1e-6);
        DVector::from_fn(self.rows(), |i, _| {
            if self.is_equality(i) {
                rho * equality_scale
            } else if !self.l_finite[i] && !self.u_finite[i] {
                free_rho
            } else {
                rho
            }
        })
    }

    fn project(&self, v: &mut DVector<T>) {
        for i in 0..v.len() {
            if self.l_finite[i] && v[i] < self.l[i] {
                v[i] = self.l[i];
            }
            if self.u_finite[i] && v[i] > self.u[i] {
                v[i] = self.u[i];
            }
        }
    }

    /// `delta_y` separates the bounds from the range of `a`: `a' dy = 0`
    /// and `u' max(dy, 0) + l' min(dy, 0) < 0`, both relative to `|dy|`.
    fn certifies_primal_infeasibility(&self, at: &DMatrix<T>, delta_y: &DVector<T>, eps: T) -> bool {
        let mut dy = delta_y.clone();
        for i in 0..dy.len() {
            if (!self.u_finite[i] && dy[i] > T::zero()) || (!self.l_finite[i] && dy[i] < T::zero()) {
                dy[i] = T::zero();
            }
        }

        let norm = inf_norm(&dy);
        if norm <= T::default_epsilon() {
            return false;
        }
        let tol = eps * norm;

        if inf_norm(&(at * &dy)) > tol {
            return false;
        }

        let support = (0..dy.len()).fold(T::zero(), |acc, i| {
            if dy[i] > T::zero() {
                acc + self.u[i] * dy[i]
            } else {
                acc + self.l[i] * dy[i]
            }
        });
        support < -tol
    }

    /// `delta_x` is a feasible descent direction of zero curvature
    fn certifies_dual_infeasibility(&self, p: &DMatrix<T>, q: &DVector<T>, delta_x: &DVector<T>, eps: T) -> bool {
        let norm = inf_norm(delta_x);
        if norm <= T::default_epsilon() {
            return false;
        }
        let tol = eps * norm;

        if q.dot(delta_x) >= -tol || inf_norm(&(p * delta_x)) > tol {
            return false;
        }

        let ax = &self.a * delta_x;
        (0..ax.len()).all(|i| {
            let below_ok = !self.l_finite[i] || ax[i] >= -tol;
            let above_ok = !self.u_finite[i] || ax[i] <= tol;
            below_ok && above_ok
        })
    }
}

struct Residuals<T: Scalar> {
    primal: T,
    dual: T,
    primal_scale: T,
    dual_scale: T,
}

impl<T: Scalar> Residuals<T> {
    fn compute(
        p: &DMatrix<T>,
        q: &DVector<T>,
        a: &DMatrix<T>,
        at: &DMatrix<T>,
        x: &DVector<T>,
        z: &DVector<T>,
        y: &DVector<T>,
    ) -> Self {
        let ax = a * x;
        let px = p * x;
        let aty = at * y;

        Residuals {
            primal: inf_norm(&(&ax - z)),
            dual: inf_norm(&(&px + q + &aty)),
            primal_scale: inf_norm(&ax).max(inf_norm(z)),
            dual_scale: inf_norm(&px).max(inf_norm(&aty)).max(inf_norm(q)),
        }
    }

    /// Step size that balances the scaled residuals, if it differs enough
    /// from `rho` to be worth a refactorization.
    fn balanced_rho(&self, rho: T) -> Option<T> {
        let tiny = T::default_epsilon();
        if self.primal <= tiny || self.dual <= tiny {
            return None;
        }

        let primal = self.primal / (self.primal_scale + tiny);
        let dual = self.dual / (self.dual_scale + tiny);
        let rho_min: T = nalgebra::convert(1e-6);
        let rho_max: T = nalgebra::convert(1e6);
        let new_rho = (rho * (primal / dual).sqrt()).max(rho_min).min(rho_max);

        let five: T = nalgebra::convert(5.0);
        (new_rho > rho * five || new_rho * five < rho).then_some(new_rho)
    }
}

fn factor<T: Scalar>(p: &DMatrix<T>, sigma: T, a: &DMatrix<T>, rho_vec: &DVector<T>) -> Option<Cholesky<T, Dyn>> {
    let mut kkt = p.clone();
    for i in 0..kkt.nrows() {
        kkt[(i, i)] += sigma;
    }

    let mut ra = a.clone();
    for i in 0..ra.nrows() {
        ra.row_mut(i).scale_mut(rho_vec[i]);
    }
    kkt += a.transpose() * ra;

    Cholesky::new(kkt)
}

fn inf_norm<T: Scalar>(v: &DVector<T>) -> T {
    v.iter().fold(T::zero(), |acc, &e| acc.max(e.abs()))
}
