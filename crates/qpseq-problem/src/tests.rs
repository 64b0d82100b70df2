// Tests for the problem data model

#[cfg(test)]
mod tests {
    use crate::*;
    use nalgebra::{DMatrix, DVector};
    use proptest::prelude::*;
    use qpseq_types::QpError;

    fn is_symmetric(m: &DMatrix<f64>) -> bool {
        (0..m.nrows()).all(|i| (0..m.ncols()).all(|j| m[(i, j)] == m[(j, i)]))
    }

    /// min x0^2 + x1^2 + x0 + x1 over 0 <= x <= 1 with x0 + x1 <= 1.5
    fn box_problem() -> QpProblem<f64> {
        let mut problem = QpProblem::new(2);
        problem
            .add_q(&DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 2.0])))
            .unwrap();
        problem.add_c(&DVector::from_vec(vec![1.0, 1.0])).unwrap();
        problem.set_var_limits(0, 0.0, 1.0).unwrap();
        problem.set_var_limits(1, 0.0, 1.0).unwrap();
        problem.add_constraint(&[1.0, 1.0], f64::MIN, 1.5).unwrap();
        problem
    }

    #[test]
    fn test_new_problem_is_unbounded() {
        let problem: QpProblem<f64> = QpProblem::new(3);

        assert_eq!(problem.num_vars(), 3);
        assert_eq!(problem.num_constraints(), 0);
        assert!(problem.q().iter().all(|&v| v == 0.0));
        assert!(problem.c().iter().all(|&v| v == 0.0));
        for i in 0..3 {
            assert!(problem.is_lbx_unbounded(i));
            assert!(problem.is_ubx_unbounded(i));
            assert_eq!(problem.lbx()[i], f64::MIN);
            assert_eq!(problem.ubx()[i], f64::MAX);
        }
    }

    #[test]
    fn test_preallocated_rows_filled_by_index() {
        let mut problem: QpProblem<f64> = QpProblem::with_constraints(2, 2);
        assert_eq!(problem.num_constraints(), 2);
        assert!(problem.is_lb_unbounded(0));
        assert!(problem.is_ub_unbounded(1));

        problem.set_constraint(1, &[1.0, -1.0], 0.0, 2.0).unwrap();
        problem.set_soft_constraint(0, &[1.0, 1.0], 1.0, 1.0, 5.0).unwrap();

        assert_eq!(problem.a().row(1)[0], 1.0);
        assert_eq!(problem.a().row(1)[1], -1.0);
        assert_eq!(problem.ub()[1], 2.0);
        assert_eq!(problem.soft_convertible(), &[true, false]);
        assert_eq!(problem.soft_weights()[0], 5.0);
    }

    #[test]
    fn test_dimension_errors() {
        let mut problem: QpProblem<f64> = QpProblem::new(2);

        assert!(matches!(
            problem.add_constraint(&[1.0], 0.0, 1.0),
            Err(QpError::DimensionMismatch(_))
        ));
        assert!(matches!(
            problem.set_constraint(0, &[1.0, 1.0], 0.0, 1.0),
            Err(QpError::IndexOutOfRange(_))
        ));
        assert!(matches!(
            problem.set_var_limits(2, 0.0, 1.0),
            Err(QpError::IndexOutOfRange(_))
        ));
        assert!(matches!(
            problem.add_q(&DMatrix::zeros(3, 3)),
            Err(QpError::DimensionMismatch(_))
        ));
        assert!(matches!(
            problem.add_q_block(1, 0, &DMatrix::zeros(2, 2)),
            Err(QpError::BlockOutOfBounds(_))
        ));
        assert!(matches!(
            problem.add_c(&DVector::zeros(3)),
            Err(QpError::DimensionMismatch(_))
        ));
        assert!(matches!(
            problem.add_c_block(1, &DVector::zeros(2)),
            Err(QpError::BlockOutOfBounds(_))
        ));
        assert!(matches!(
            problem.verify(&DVector::zeros(3), 0.0),
            Err(QpError::DimensionMismatch(_))
        ));
        assert!(matches!(
            problem.objective(&DVector::zeros(1)),
            Err(QpError::DimensionMismatch(_))
        ));

        // failed mutations leave the problem untouched
        assert_eq!(problem, QpProblem::new(2));
    }

    #[test]
    fn test_add_q_symmetrizes() {
        let mut problem: QpProblem<f64> = QpProblem::new(2);
        problem
            .add_q(&DMatrix::from_row_slice(2, 2, &[1.0, 4.0, 0.0, 1.0]))
            .unwrap();

        assert_eq!(problem.q()[(0, 1)], 2.0);
        assert_eq!(problem.q()[(1, 0)], 2.0);
        assert_eq!(problem.q()[(0, 0)], 1.0);
    }

    #[test]
    fn test_add_q_block_stacks_stage_costs() {
        // three stages of a horizon, each with the same 2x2 cost
        let stage = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let mut problem: QpProblem<f64> = QpProblem::new(6);
        for k in 0..3 {
            problem.add_q_block(2 * k, 2 * k, &stage).unwrap();
            problem
                .add_c_block(2 * k, &DVector::from_vec(vec![-1.0, -(k as f64)]))
                .unwrap();
        }

        for k in 0..3 {
            let block = problem.q().view((2 * k, 2 * k), (2, 2)).clone_owned();
            assert_eq!(block, stage);
            assert_eq!(problem.c()[2 * k + 1], -(k as f64));
        }
        assert_eq!(problem.q()[(0, 2)], 0.0);
        assert!(problem.is_q_pd());
    }

    #[test]
    fn test_off_diagonal_block_is_mirrored() {
        let mut problem: QpProblem<f64> = QpProblem::new(3);
        problem
            .add_q_block(0, 2, &DMatrix::from_row_slice(1, 1, &[4.0]))
            .unwrap();
        assert_eq!(problem.q()[(0, 2)], 2.0);
        assert_eq!(problem.q()[(2, 0)], 2.0);
    }

    #[test]
    fn test_consistency() {
        let mut problem = box_problem();
        assert!(problem.is_consistent());

        problem.set_var_limits(1, 2.0, 1.0).unwrap();
        assert!(!problem.is_consistent());

        problem.set_var_limits(1, 0.0, 1.0).unwrap();
        problem.add_constraint(&[1.0, 0.0], 3.0, 2.0).unwrap();
        assert!(!problem.is_consistent());
    }

    #[test]
    fn test_verify_with_tolerance() {
        let problem = box_problem();

        assert!(problem.verify(&DVector::from_vec(vec![0.5, 0.5]), 0.0).unwrap());
        // violates x0 + x1 <= 1.5
        assert!(!problem.verify(&DVector::from_vec(vec![1.0, 0.6]), 0.0).unwrap());
        assert!(problem.verify(&DVector::from_vec(vec![1.0, 0.6]), 0.2).unwrap());
        // violates x0 >= 0 on the lower side
        assert!(!problem.verify(&DVector::from_vec(vec![-0.1, 0.0]), 0.05).unwrap());
        assert!(problem.verify(&DVector::from_vec(vec![-0.1, 0.0]), 0.1).unwrap());
    }

    #[test]
    fn test_unconstrained_objective_example() {
        let mut problem: QpProblem<f64> = QpProblem::new(2);
        problem
            .add_q(&DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 2.0]))
            .unwrap();
        problem.add_c(&DVector::from_vec(vec![-4.0, -6.0])).unwrap();

        let x = DVector::from_vec(vec![2.0, 3.0]);
        assert_eq!(problem.objective(&x).unwrap(), -13.0);
        assert_eq!(problem.quadratic_form(&x).unwrap(), 26.0);
        // unhalved objective
        assert_eq!(problem.quadratic_form(&x).unwrap() + problem.c().dot(&x), 0.0);
        assert!(problem.verify(&x, 0.0).unwrap());
    }

    #[test]
    fn test_psd_queries() {
        let mut problem: QpProblem<f64> = QpProblem::new(2);
        assert!(problem.is_q_psd(0.0));
        assert!(!problem.is_q_pd());
        assert_eq!(problem.definiteness(0.0), Definiteness::PositiveSemidefinite);

        problem
            .add_q(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]))
            .unwrap();
        assert!(!problem.is_q_psd(0.5));
        assert!(problem.is_q_psd(1.5));
        assert!(!problem.is_q_psd_with(&SchurClassifier, 0.5));
        assert_eq!(problem.definiteness(0.0), Definiteness::Indefinite);
    }

    #[test]
    fn test_regularize_nearly_psd() {
        let mut problem: QpProblem<f64> = QpProblem::new(2);
        problem
            .add_q(&DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, -1e-7])))
            .unwrap();
        assert!(!problem.is_q_psd(0.0));

        let steps = problem.regularize_q(1e-6);
        assert_eq!(steps, 1);
        assert!(problem.is_q_psd(0.0));
        assert!((problem.q()[(1, 1)] - 9e-7).abs() < 1e-15);
    }

    #[test]
    fn test_regularize_is_idempotent() {
        let mut problem: QpProblem<f64> = QpProblem::new(2);
        problem
            .add_q(&DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, -5e-7])))
            .unwrap();

        problem.regularize_q(1e-6);
        let once = problem.q().clone();
        let steps = problem.regularize_q(1e-6);

        assert_eq!(steps, 0);
        assert_eq!(problem.q(), &once);
        assert!(problem.is_q_psd(1e-6));
    }

    #[test]
    fn test_regularize_leaves_far_indefinite_alone() {
        let mut problem: QpProblem<f64> = QpProblem::new(2);
        problem
            .add_q(&DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, -1.0])))
            .unwrap();
        let before = problem.q().clone();

        assert_eq!(problem.regularize_q(1e-6), 0);
        assert_eq!(problem.q(), &before);
        assert!(!problem.is_q_psd(1e-6));

        // zero tolerance never regularizes
        assert_eq!(problem.regularize_q(0.0), 0);
    }

    #[test]
    fn test_soft_equality_folds_into_objective() {
        let mut problem: QpProblem<f64> = QpProblem::new(1);
        problem.add_soft_constraint(&[1.0], 2.0, 2.0, 10.0).unwrap();

        let soft = problem.convert_to_soft();

        assert_eq!(soft.num_vars(), 1);
        assert_eq!(soft.num_constraints(), 0);
        assert_eq!(soft.q()[(0, 0)], 20.0);
        assert_eq!(soft.c()[0], -40.0);
    }

    #[test]
    fn test_soft_inequalities_add_slacks() {
        let mut problem: QpProblem<f64> = QpProblem::new(2);
        // two-sided soft row: two slacks
        problem.add_soft_constraint(&[1.0, 1.0], 1.0, 3.0, 4.0).unwrap();
        // upper-only soft row: one slack
        problem.add_soft_constraint(&[1.0, 0.0], f64::MIN, 0.5, 2.0).unwrap();
        // hard row passes through
        problem.add_constraint(&[0.0, 1.0], -1.0, 1.0).unwrap();
        problem.set_var_limits(0, -5.0, 5.0).unwrap();

        assert_eq!(problem.soft_slack_count(), 3);
        let soft = problem.convert_to_soft();

        assert_eq!(soft.num_vars(), 5);
        assert_eq!(soft.num_constraints(), 4);

        // a.x + s0 >= 1
        assert_eq!(soft.a().row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(soft.lb()[0], 1.0);
        assert!(soft.is_ub_unbounded(0));
        // a.x - s1 <= 3
        assert_eq!(soft.a().row(1).iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0, 0.0, -1.0, 0.0]);
        assert!(soft.is_lb_unbounded(1));
        assert_eq!(soft.ub()[1], 3.0);
        // x0 - s2 <= 0.5
        assert_eq!(soft.a().row(2).iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 0.0, 0.0, -1.0]);
        assert_eq!(soft.ub()[2], 0.5);
        // hard row, zero padded
        assert_eq!(soft.a().row(3).iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!((soft.lb()[3], soft.ub()[3]), (-1.0, 1.0));

        assert_eq!(soft.c().as_slice(), &[0.0, 0.0, 4.0, 4.0, 2.0]);
        assert_eq!((soft.lbx()[0], soft.ubx()[0]), (-5.0, 5.0));
        for slack in 2..5 {
            assert_eq!(soft.lbx()[slack], 0.0);
            assert!(soft.is_ubx_unbounded(slack));
        }
        assert!(soft.soft_convertible().iter().all(|&s| !s));

        // a violating point becomes feasible once the slacks absorb it
        let x = DVector::from_vec(vec![1.0, 0.0, 0.0, 0.0, 0.5]);
        assert!(!problem.verify(&x.rows(0, 2).clone_owned(), 0.0).unwrap());
        assert!(soft.verify(&x, 0.0).unwrap());
    }

    #[test]
    fn test_soft_conversion_without_soft_rows_is_identity() {
        let problem = box_problem();
        let soft = problem.convert_to_soft();
        assert_eq!(soft, problem);
    }

    #[test]
    fn test_reset_keeps_variable_count() {
        let mut problem = box_problem();
        problem.add_soft_constraint(&[1.0, 0.0], 0.0, 0.0, 3.0).unwrap();

        problem.reset();

        assert_eq!(problem, QpProblem::new(2));
    }

    #[test]
    fn test_cast_to_f32_and_back() {
        let problem = box_problem();
        let narrow: QpProblem<f32> = problem.cast().unwrap();

        assert_eq!(narrow.num_vars(), 2);
        assert_eq!(narrow.q()[(0, 0)], 2.0_f32);
        assert!(narrow.is_lb_unbounded(0));
        assert_eq!(narrow.lb()[0], f32::MIN);

        let wide: QpProblem<f64> = narrow.cast().unwrap();
        assert_eq!(wide, problem);
    }

    #[test]
    fn test_cast_rejects_unrepresentable_values() {
        let mut problem: QpProblem<f64> = QpProblem::new(1);
        problem.add_c(&DVector::from_vec(vec![1e200])).unwrap();
        assert!(matches!(problem.cast::<f32>(), Err(QpError::Cast(_))));
    }

    #[test]
    fn test_text_roundtrip() {
        let mut problem = box_problem();
        problem.add_soft_constraint(&[0.25, -1.0], -2.0, 2.0, 7.5).unwrap();

        let mut buffer = Vec::new();
        problem.write_to(&mut buffer).unwrap();
        let parsed = QpProblem::<f64>::read_from(&mut buffer.as_slice()).unwrap();

        assert_eq!(parsed, problem);
    }

    #[test]
    fn test_parse_symmetrizes_and_defaults_soft_metadata() {
        let text = "2 1\n1 3\n1 1\n1 1\n0\n4\n-10 -10\n10 10\n1 2\n";
        let problem: QpProblem<f64> = text.parse().unwrap();

        assert_eq!(problem.q()[(0, 1)], 2.0);
        assert_eq!(problem.q()[(1, 0)], 2.0);
        assert_eq!(problem.ub()[0], 4.0);
        assert_eq!(problem.c().as_slice(), &[1.0, 2.0]);
        assert_eq!(problem.soft_convertible(), &[false]);
        assert_eq!(problem.soft_weights()[0], 1.0);
    }

    #[test]
    fn test_parse_errors_name_the_section() {
        let err = "2 0\n1 0\n0".parse::<QpProblem<f64>>().unwrap_err();
        assert!(err.to_string().contains("Q"), "{}", err);

        let err = "1 1\n1\n1\n0\nabc\n".parse::<QpProblem<f64>>().unwrap_err();
        assert!(err.to_string().contains("ub"), "{}", err);

        let err = "1 0\n1\n0\n1\n0\n9".parse::<QpProblem<f64>>().unwrap_err();
        assert!(matches!(err, QpError::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_oversized_counts() {
        let err = "4294967296 0\n".parse::<QpProblem<f64>>().unwrap_err();
        assert!(matches!(err, QpError::Parse(_)), "{}", err);

        let err = format!("{} 0\n", usize::MAX).parse::<QpProblem<f64>>().unwrap_err();
        assert!(err.to_string().contains("too large"), "{}", err);

        let err = format!("2 {}\n", usize::MAX).parse::<QpProblem<f64>>().unwrap_err();
        assert!(err.to_string().contains("constraint count"), "{}", err);
    }

    fn arb_matrix(n: usize) -> impl Strategy<Value = DMatrix<f64>> {
        prop::collection::vec(-100.0..100.0f64, n * n).prop_map(move |v| DMatrix::from_vec(n, n, v))
    }

    proptest! {
        #[test]
        fn prop_q_stays_symmetric(
            (n, first, second) in (1usize..6).prop_flat_map(|n| (Just(n), arb_matrix(n), arb_matrix(n))),
            offset in 0usize..3,
        ) {
            let mut problem: QpProblem<f64> = QpProblem::new(n);
            problem.add_q(&first).unwrap();
            prop_assert!(is_symmetric(problem.q()));

            let size = n.saturating_sub(offset).max(1);
            let start = n - size;
            let block = second.view((0, 0), (size, size)).clone_owned();
            problem.add_q_block(start, 0, &block).unwrap();
            prop_assert!(is_symmetric(problem.q()));
        }

        #[test]
        fn prop_consistency_matches_bound_order(
            bounds in prop::collection::vec((-10.0..10.0f64, -10.0..10.0f64), 1..6),
            rows in prop::collection::vec((-10.0..10.0f64, -10.0..10.0f64), 0..4),
        ) {
            let mut problem: QpProblem<f64> = QpProblem::new(bounds.len());
            for (i, &(l, u)) in bounds.iter().enumerate() {
                problem.set_var_limits(i, l, u).unwrap();
            }
            for &(l, u) in &rows {
                problem.add_constraint(&vec![1.0; bounds.len()], l, u).unwrap();
            }

            let expected = bounds.iter().chain(rows.iter()).all(|&(l, u)| l <= u);
            prop_assert_eq!(problem.is_consistent(), expected);
        }

        #[test]
        fn prop_text_roundtrip_preserves_verdicts(
            coeffs in prop::collection::vec(-5.0..5.0f64, 6),
            limits in prop::collection::vec(-3.0..3.0f64, 4),
            x in prop::collection::vec(-4.0..4.0f64, 2),
            tolerance in 0.0..0.5f64,
        ) {
            let mut problem: QpProblem<f64> = QpProblem::new(2);
            problem.add_q(&DMatrix::from_row_slice(2, 2, &coeffs[0..4])).unwrap();
            problem.add_constraint(&coeffs[4..6], limits[0].min(limits[1]), limits[0].max(limits[1])).unwrap();
            problem.set_var_limits(0, limits[2].min(limits[3]), limits[2].max(limits[3])).unwrap();

            let parsed: QpProblem<f64> = problem.to_string().parse().unwrap();
            let x = DVector::from_vec(x);
            prop_assert_eq!(
                parsed.verify(&x, tolerance).unwrap(),
                problem.verify(&x, tolerance).unwrap()
            );
        }
    }
}
