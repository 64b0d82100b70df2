use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::problem::QpProblem;
use crate::scalar::Scalar;

impl<T: Scalar> QpProblem<T> {
    /// Number of slack variables [`convert_to_soft`](Self::convert_to_soft)
    /// appends: one per finite side of every soft, non-equality row.
    pub fn soft_slack_count(&self) -> usize {
        (0..self.num_constraints())
            .filter(|&i| self.soft_convertible[i] && self.lb[i] != self.ub[i])
            .map(|i| usize::from(!self.is_lb_unbounded(i)) + usize::from(!self.is_ub_unbounded(i)))
            .sum()
    }

    /// Replaces every soft-convertible row by a penalty in the objective.
    ///
    /// The first `num_vars()` variables of the result are the original
    /// ones; slack variables follow, each bounded to `[0, inf)`.
    ///
    /// * equality rows `a.x = b` add `2w a a^T` to Q and `-2w b a` to c,
    ///   which is `w (a.x - b)^2` up to a constant under the 1/2 convention;
    /// * a finite lower side becomes `a.x + s >= lb` with cost `w s`;
    /// * a finite upper side becomes `a.x - s <= ub` with cost `w s`.
    ///
    /// Hard rows are carried over unchanged.
    pub fn convert_to_soft(&self) -> QpProblem<T> {
        let n = self.num_vars();
        let new_n = n + self.soft_slack_count();
        let mut soft = QpProblem::new(new_n);

        soft.q.view_mut((0, 0), (n, n)).copy_from(&self.q);
        soft.c.rows_mut(0, n).copy_from(&self.c);
        soft.lbx.rows_mut(0, n).copy_from(&self.lbx);
        soft.ubx.rows_mut(0, n).copy_from(&self.ubx);
        soft.lbx.rows_mut(n, new_n - n).fill(T::zero());

        let two: T = nalgebra::convert(2.0);
        let mut next_slack = n;

        for i in 0..self.num_constraints() {
            let row = self.a.row(i).transpose();
            let mut coeff = DVector::<T>::zeros(new_n);
            coeff.rows_mut(0, n).copy_from(&row);

            if !self.soft_convertible[i] {
                soft.append_row(coeff.as_slice(), self.lb[i], self.ub[i], false, self.soft_weights[i]);
                continue;
            }

            let weight = self.soft_weights[i];

            if self.lb[i] == self.ub[i] {
                let q_add: DMatrix<T> = &row * row.transpose() * (two * weight);
                let mut q_view = soft.q.view_mut((0, 0), (n, n));
                q_view += &q_add;
                let mut c_view = soft.c.rows_mut(0, n);
                c_view += &row * (-two * weight * self.lb[i]);
                continue;
            }

            if !self.is_lb_unbounded(i) {
                coeff[next_slack] = T::one();
                soft.append_row(coeff.as_slice(), self.lb[i], T::upper_sentinel(), false, T::one());
                soft.c[next_slack] += weight;
                coeff[next_slack] = T::zero();
                next_slack += 1;
            }

            if !self.is_ub_unbounded(i) {
                coeff[next_slack] = -T::one();
                soft.append_row(coeff.as_slice(), T::lower_sentinel(), self.ub[i], false, T::one());
                soft.c[next_slack] += weight;
                next_slack += 1;
            }
        }

        soft.ensure_q_symmetry();

        debug!(
            vars = new_n,
            slacks = new_n - n,
            constraints = soft.num_constraints(),
            "converted soft constraints"
        );

        soft
    }
}
