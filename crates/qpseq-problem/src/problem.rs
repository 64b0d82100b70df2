use nalgebra::{DMatrix, DVector};
use tracing::debug;

use qpseq_types::{QpError, Result};

use crate::scalar::{cast_value, Scalar};
use crate::spectral::{Definiteness, SpectralClassifier, SymmetricEigenClassifier};

/// Quadratic program
///
/// ```text
/// minimize   1/2 x^T Q x + c^T x
/// subject to lb <= A x <= ub
///            lbx <= x <= ubx
/// ```
///
/// `Q` is kept exactly symmetric: every write averages each off-diagonal
/// pair and stores the result on both sides. Q and c are only ever
/// accumulated into, never assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct QpProblem<T: Scalar> {
    pub(crate) q: DMatrix<T>,
    pub(crate) c: DVector<T>,
    pub(crate) a: DMatrix<T>,
    pub(crate) lb: DVector<T>,
    pub(crate) ub: DVector<T>,
    pub(crate) lbx: DVector<T>,
    pub(crate) ubx: DVector<T>,
    /// Penalty weight used when row i is converted to a soft constraint
    pub(crate) soft_weights: DVector<T>,
    /// Rows that `convert_to_soft` replaces by penalties
    pub(crate) soft_convertible: Vec<bool>,
}

impl<T: Scalar> QpProblem<T> {
    /// Problem over `n` variables with no constraints and no variable bounds
    pub fn new(n: usize) -> Self {
        Self::with_constraints(n, 0)
    }

    /// Problem over `n` variables with `m` preallocated free rows, to be
    /// filled with [`set_constraint`](Self::set_constraint).
    pub fn with_constraints(n: usize, m: usize) -> Self {
        QpProblem {
            q: DMatrix::zeros(n, n),
            c: DVector::zeros(n),
            a: DMatrix::zeros(m, n),
            lb: DVector::from_element(m, T::lower_sentinel()),
            ub: DVector::from_element(m, T::upper_sentinel()),
            lbx: DVector::from_element(n, T::lower_sentinel()),
            ubx: DVector::from_element(n, T::upper_sentinel()),
            soft_weights: DVector::from_element(m, T::one()),
            soft_convertible: vec![false; m],
        }
    }

    /// Get number of variables
    pub fn num_vars(&self) -> usize {
        self.c.len()
    }

    /// Get number of constraints
    pub fn num_constraints(&self) -> usize {
        self.a.nrows()
    }

    pub fn q(&self) -> &DMatrix<T> {
        &self.q
    }

    pub fn c(&self) -> &DVector<T> {
        &self.c
    }

    pub fn a(&self) -> &DMatrix<T> {
        &self.a
    }

    pub fn lb(&self) -> &DVector<T> {
        &self.lb
    }

    pub fn ub(&self) -> &DVector<T> {
        &self.ub
    }

    pub fn lbx(&self) -> &DVector<T> {
        &self.lbx
    }

    pub fn ubx(&self) -> &DVector<T> {
        &self.ubx
    }

    pub fn soft_weights(&self) -> &DVector<T> {
        &self.soft_weights
    }

    pub fn soft_convertible(&self) -> &[bool] {
        &self.soft_convertible
    }

    pub fn is_lbx_unbounded(&self, var_idx: usize) -> bool {
        T::is_lower_unbounded(self.lbx[var_idx])
    }

    pub fn is_ubx_unbounded(&self, var_idx: usize) -> bool {
        T::is_upper_unbounded(self.ubx[var_idx])
    }

    pub fn is_lb_unbounded(&self, constraint_idx: usize) -> bool {
        T::is_lower_unbounded(self.lb[constraint_idx])
    }

    pub fn is_ub_unbounded(&self, constraint_idx: usize) -> bool {
        T::is_upper_unbounded(self.ub[constraint_idx])
    }

    /// Drops every constraint, zeroes Q and c and removes all variable
    /// bounds. The variable count is kept.
    pub fn reset(&mut self) {
        let n = self.num_vars();
        *self = Self::new(n);
    }

    /// Enforces `low <= x[var_idx] <= up`. Ordering is not checked here,
    /// see [`is_consistent`](Self::is_consistent).
    pub fn set_var_limits(&mut self, var_idx: usize, low: T, up: T) -> Result<()> {
        if var_idx >= self.num_vars() {
            return Err(QpError::IndexOutOfRange(format!(
                "problem has {} variables, got variable index {}",
                self.num_vars(),
                var_idx
            )));
        }
        self.lbx[var_idx] = low;
        self.ubx[var_idx] = up;
        Ok(())
    }

    /// Appends the hard constraint `low <= coeff * x <= up`
    pub fn add_constraint(&mut self, coeff: &[T], low: T, up: T) -> Result<()> {
        self.push_row(coeff, low, up, false, T::one())
    }

    /// Appends `low <= coeff * x <= up`, marked for conversion into a
    /// penalty of the given weight by [`convert_to_soft`](Self::convert_to_soft).
    pub fn add_soft_constraint(&mut self, coeff: &[T], low: T, up: T, weight: T) -> Result<()> {
        self.push_row(coeff, low, up, true, weight)
    }

    /// Overwrites row `constraint_idx` with the hard constraint
    /// `low <= coeff * x <= up`
    pub fn set_constraint(&mut self, constraint_idx: usize, coeff: &[T], low: T, up: T) -> Result<()> {
        self.write_row(constraint_idx, coeff, low, up, false, T::one())
    }

    pub fn set_soft_constraint(
        &mut self,
        constraint_idx: usize,
        coeff: &[T],
        low: T,
        up: T,
        weight: T,
    ) -> Result<()> {
        self.write_row(constraint_idx, coeff, low, up, true, weight)
    }

    /// Adds `delta` to Q, then restores symmetry
    pub fn add_q(&mut self, delta: &DMatrix<T>) -> Result<()> {
        if delta.shape() != self.q.shape() {
            return Err(QpError::DimensionMismatch(format!(
                "Q of the problem is {}x{}, got {}x{}",
                self.q.nrows(),
                self.q.ncols(),
                delta.nrows(),
                delta.ncols()
            )));
        }
        self.q += delta;
        self.ensure_q_symmetry();
        Ok(())
    }

    /// Adds `block` to the sub-rectangle of Q starting at row `i`, column
    /// `j`, then restores symmetry
    pub fn add_q_block(&mut self, i: usize, j: usize, block: &DMatrix<T>) -> Result<()> {
        let (rows, cols) = block.shape();
        if i + rows > self.q.nrows() || j + cols > self.q.ncols() {
            return Err(QpError::BlockOutOfBounds(format!(
                "{}x{} block at ({}, {}) runs off the {}x{} Q",
                rows,
                cols,
                i,
                j,
                self.q.nrows(),
                self.q.ncols()
            )));
        }
        let mut view = self.q.view_mut((i, j), (rows, cols));
        view += block;
        self.ensure_q_symmetry();
        Ok(())
    }

    pub fn add_c(&mut self, delta: &DVector<T>) -> Result<()> {
        if delta.len() != self.c.len() {
            return Err(QpError::DimensionMismatch(format!(
                "c of the problem has {} entries, got {}",
                self.c.len(),
                delta.len()
            )));
        }
        self.c += delta;
        Ok(())
    }

    /// Adds `delta` to the entries of c starting at index `i`
    pub fn add_c_block(&mut self, i: usize, delta: &DVector<T>) -> Result<()> {
        if i + delta.len() > self.c.len() {
            return Err(QpError::BlockOutOfBounds(format!(
                "{} entries at {} run off c of length {}",
                delta.len(),
                i,
                self.c.len()
            )));
        }
        let mut view = self.c.rows_mut(i, delta.len());
        view += delta;
        Ok(())
    }

    /// No lower bound exceeds its upper bound
    pub fn is_consistent(&self) -> bool {
        let vars_ok = self.lbx.iter().zip(self.ubx.iter()).all(|(l, u)| l <= u);
        let rows_ok = self.lb.iter().zip(self.ub.iter()).all(|(l, u)| l <= u);
        vars_ok && rows_ok
    }

    /// Q is PSD: no eigenvalue is below `-tolerance`
    pub fn is_q_psd(&self, tolerance: T) -> bool {
        self.is_q_psd_with(&SymmetricEigenClassifier, tolerance)
    }

    pub fn is_q_psd_with<C: SpectralClassifier<T> + ?Sized>(&self, classifier: &C, tolerance: T) -> bool {
        classifier.is_psd(&self.q, tolerance)
    }

    /// Q is PD: every eigenvalue is strictly positive
    pub fn is_q_pd(&self) -> bool {
        self.is_q_pd_with(&SymmetricEigenClassifier)
    }

    pub fn is_q_pd_with<C: SpectralClassifier<T> + ?Sized>(&self, classifier: &C) -> bool {
        classifier.is_pd(&self.q)
    }

    pub fn definiteness(&self, tolerance: T) -> Definiteness {
        self.definiteness_with(&SymmetricEigenClassifier, tolerance)
    }

    pub fn definiteness_with<C: SpectralClassifier<T> + ?Sized>(&self, classifier: &C, tolerance: T) -> Definiteness {
        classifier.classify(&self.q, tolerance)
    }

    /// Nudges a nearly PSD Q into the PSD cone.
    ///
    /// While the smallest eigenvalue is negative but not below
    /// `-psd_tolerance`, adds `psd_tolerance * I` to Q. Matrices that are
    /// already PSD or further than `psd_tolerance` from it are left alone.
    /// Returns the number of ridge steps applied.
    pub fn regularize_q(&mut self, psd_tolerance: T) -> usize {
        self.regularize_q_with(&SymmetricEigenClassifier, psd_tolerance)
    }

    pub fn regularize_q_with<C: SpectralClassifier<T> + ?Sized>(&mut self, classifier: &C, psd_tolerance: T) -> usize {
        let n = self.num_vars();
        let mut steps = 0;
        let mut min_eig = classifier.min_eigenvalue(&self.q);

        while let Some(eig) = min_eig.filter(|&e| e < T::zero() && e >= -psd_tolerance) {
            self.q += DMatrix::<T>::identity(n, n) * psd_tolerance;
            steps += 1;
            debug!(step = steps, min_eigenvalue = ?eig, "ridge step on Q");
            min_eig = classifier.min_eigenvalue(&self.q);
        }

        steps
    }

    /// Whether `solution` satisfies every row and variable bound, each side
    /// relaxed by `tolerance`.
    pub fn verify(&self, solution: &DVector<T>, tolerance: T) -> Result<bool> {
        self.check_solution_len(solution)?;

        let ax = &self.a * solution;
        for i in 0..self.num_constraints() {
            if self.lb[i] - tolerance > ax[i] || ax[i] > self.ub[i] + tolerance {
                return Ok(false);
            }
        }

        for i in 0..self.num_vars() {
            if self.lbx[i] - tolerance > solution[i] || solution[i] > self.ubx[i] + tolerance {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Compute objective: 0.5 * x^T Q x + c^T x
    ///
    /// This is the convention every engine minimizes. Callers that built Q
    /// for the unhalved form `x^T Q x + c^T x` can evaluate it as
    /// `quadratic_form(x)? + c.dot(x)`.
    pub fn objective(&self, solution: &DVector<T>) -> Result<T> {
        let half: T = nalgebra::convert(0.5);
        Ok(self.quadratic_form(solution)? * half + self.c.dot(solution))
    }

    /// x^T Q x
    pub fn quadratic_form(&self, solution: &DVector<T>) -> Result<T> {
        self.check_solution_len(solution)?;
        Ok(solution.dot(&(&self.q * solution)))
    }

    /// Independent copy in another scalar type.
    ///
    /// Unbounded sentinels map to the destination's sentinels; a finite
    /// value the destination cannot represent is an error.
    pub fn cast<S: Scalar>(&self) -> Result<QpProblem<S>> {
        Ok(QpProblem {
            q: cast_matrix(&self.q)?,
            c: cast_vector(&self.c)?,
            a: cast_matrix(&self.a)?,
            lb: cast_vector(&self.lb)?,
            ub: cast_vector(&self.ub)?,
            lbx: cast_vector(&self.lbx)?,
            ubx: cast_vector(&self.ubx)?,
            soft_weights: cast_vector(&self.soft_weights)?,
            soft_convertible: self.soft_convertible.clone(),
        })
    }

    fn check_solution_len(&self, solution: &DVector<T>) -> Result<()> {
        if solution.len() != self.num_vars() {
            return Err(QpError::DimensionMismatch(format!(
                "problem has {} variables, but given solution has {} entries",
                self.num_vars(),
                solution.len()
            )));
        }
        Ok(())
    }

    fn check_row_len(&self, coeff: &[T]) -> Result<()> {
        if coeff.len() != self.num_vars() {
            return Err(QpError::DimensionMismatch(format!(
                "problem has {} variables, but the constraint row has {} coefficients",
                self.num_vars(),
                coeff.len()
            )));
        }
        Ok(())
    }

    fn push_row(&mut self, coeff: &[T], low: T, up: T, soft: bool, weight: T) -> Result<()> {
        self.check_row_len(coeff)?;
        self.append_row(coeff, low, up, soft, weight);
        Ok(())
    }

    /// Appends a row whose length is already known to be `num_vars()`
    pub(crate) fn append_row(&mut self, coeff: &[T], low: T, up: T, soft: bool, weight: T) {
        let m = self.num_constraints();
        let a = std::mem::replace(&mut self.a, DMatrix::zeros(0, 0));
        self.a = a.insert_row(m, T::zero());
        self.lb = std::mem::replace(&mut self.lb, DVector::zeros(0)).insert_row(m, low);
        self.ub = std::mem::replace(&mut self.ub, DVector::zeros(0)).insert_row(m, up);
        self.soft_weights = std::mem::replace(&mut self.soft_weights, DVector::zeros(0)).insert_row(m, weight);
        self.soft_convertible.push(soft);

        self.a.row_mut(m).copy_from_slice(coeff);
    }

    fn write_row(&mut self, constraint_idx: usize, coeff: &[T], low: T, up: T, soft: bool, weight: T) -> Result<()> {
        self.check_row_len(coeff)?;
        if constraint_idx >= self.num_constraints() {
            return Err(QpError::IndexOutOfRange(format!(
                "constraint index {} with {} constraints",
                constraint_idx,
                self.num_constraints()
            )));
        }

        self.a.row_mut(constraint_idx).copy_from_slice(coeff);
        self.lb[constraint_idx] = low;
        self.ub[constraint_idx] = up;
        self.soft_weights[constraint_idx] = weight;
        self.soft_convertible[constraint_idx] = soft;
        Ok(())
    }

    pub(crate) fn ensure_q_symmetry(&mut self) {
        let half: T = nalgebra::convert(0.5);
        let n = self.q.nrows();
        for i in 0..n {
            for j in (i + 1)..n {
                let v = self.q[(i, j)] * half + self.q[(j, i)] * half;
                self.q[(i, j)] = v;
                self.q[(j, i)] = v;
            }
        }
    }
}

fn cast_matrix<T: Scalar, S: Scalar>(m: &DMatrix<T>) -> Result<DMatrix<S>> {
    let values = m.iter().map(|&v| cast_value(v)).collect::<Result<Vec<S>>>()?;
    Ok(DMatrix::from_vec(m.nrows(), m.ncols(), values))
}

fn cast_vector<T: Scalar, S: Scalar>(v: &DVector<T>) -> Result<DVector<S>> {
    let values = v.iter().map(|&x| cast_value(x)).collect::<Result<Vec<S>>>()?;
    Ok(DVector::from_vec(values))
}
