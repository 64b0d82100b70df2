use nalgebra::{DMatrix, DVector};
use proptest::prelude::*;
use qpseq_problem::QpProblem;
use qpseq_solver::{AdmmEngine, ClarabelEngine, SolverEngine};
use qpseq_types::Outcome;

/// Strictly convex problem: Q = L L^T + I, box [-1, 1], one coupling row
fn build(n: usize, factor: &[f64], c: &[f64], cap: f64) -> QpProblem<f64> {
    let l = DMatrix::from_row_slice(n, n, factor);
    let mut problem = QpProblem::new(n);
    problem
        .add_q(&(&l * l.transpose() + DMatrix::identity(n, n)))
        .unwrap();
    problem.add_c(&DVector::from_column_slice(c)).unwrap();
    for j in 0..n {
        problem.set_var_limits(j, -1.0, 1.0).unwrap();
    }
    problem.add_constraint(&vec![1.0; n], f64::MIN, cap).unwrap();
    problem
}

fn arb_problem() -> impl Strategy<Value = QpProblem<f64>> {
    (1usize..5).prop_flat_map(|n| {
        (
            prop::collection::vec(-1.0f64..1.0, n * n),
            prop::collection::vec(-5.0f64..5.0, n),
            -0.5f64..2.0,
        )
            .prop_map(move |(factor, c, cap)| build(n, &factor, &c, cap))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_engines_agree_on_convex_problems(problem in arb_problem()) {
        let a = ClarabelEngine::<f64>::new().init(&problem);
        let b = AdmmEngine::<f64>::new().init(&problem);

        prop_assert_eq!(a.outcome, Outcome::Optimal);
        prop_assert_eq!(b.outcome, Outcome::Optimal);
        prop_assert!(problem.verify(&a.x, 1e-6).unwrap());
        prop_assert!(problem.verify(&b.x, 1e-6).unwrap());

        let fa = problem.objective(&a.x).unwrap();
        let fb = problem.objective(&b.x).unwrap();
        prop_assert!((fa - fb).abs() < 1e-5 * (1.0 + fa.abs()), "clarabel {} admm {}", fa, fb);
    }
}
