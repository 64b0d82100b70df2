use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use qpseq_problem::{QpProblem, Scalar};
use qpseq_types::Outcome;

use crate::engine::{Solve, SolverEngine};

/// One engine's result on a shared problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub engine: String,
    pub outcome: Outcome,
    /// The returned point passed `QpProblem::verify`
    pub verified: bool,
    pub objective: Option<f64>,
    pub iterations: usize,
    pub elapsed: Duration,
}

impl EngineReport {
    pub fn from_solve<T: Scalar>(
        engine: &str,
        problem: &QpProblem<T>,
        solve: &Solve<T>,
        tolerance: T,
        elapsed: Duration,
    ) -> Self {
        // Unbounded carries a direction, not a point
        let has_point = solve.outcome.has_solution() && solve.outcome != Outcome::Unbounded;

        let verified = has_point && problem.verify(&solve.x, tolerance).unwrap_or(false);
        let objective = if has_point {
            problem.objective(&solve.x).ok().map(Scalar::to_f64_lossy)
        } else {
            None
        };

        EngineReport {
            engine: engine.to_string(),
            outcome: solve.outcome,
            verified,
            objective,
            iterations: solve.iterations,
            elapsed,
        }
    }
}

/// Destination for engine reports. Shared between worker threads.
pub trait ReportSink: Sync {
    fn publish(&self, report: EngineReport);
}

/// Collects reports in memory
pub struct MemorySink {
    reports: Mutex<Vec<EngineReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Reports published so far, in arrival order
    pub fn reports(&self) -> Vec<EngineReport> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportSink for MemorySink {
    fn publish(&self, report: EngineReport) {
        match self.reports.lock() {
            Ok(mut reports) => reports.push(report),
            Err(poisoned) => poisoned.into_inner().push(report),
        }
    }
}

/// Runs `next` of every engine on its own thread against the same problem.
///
/// Each result is verified with `tolerance` and published to `sink`. All
/// threads are joined before returning; the reports come back in engine
/// order.
pub fn solve_all<T: Scalar>(
    problem: &QpProblem<T>,
    engines: &mut [Box<dyn SolverEngine<T>>],
    sink: &dyn ReportSink,
    tolerance: T,
) -> Vec<EngineReport> {
    let reports: Vec<EngineReport> = thread::scope(|scope| {
        let handles: Vec<_> = engines
            .iter_mut()
            .map(|engine| {
                scope.spawn(move || {
                    let start = Instant::now();
                    let solve = engine.next(problem);
                    let report = EngineReport::from_solve(engine.name(), problem, &solve, tolerance, start.elapsed());
                    sink.publish(report.clone());
                    report
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| match handle.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    warn!("engine worker panicked");
                    None
                }
            })
            .collect()
    });

    let optimal = reports.iter().filter(|r| r.outcome.is_optimal()).count();
    let verified = reports.iter().filter(|r| r.verified).count();
    info!(
        engines = reports.len(),
        optimal,
        verified,
        vars = problem.num_vars(),
        constraints = problem.num_constraints(),
        "engine comparison finished"
    );

    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        let report = EngineReport {
            engine: "test".to_string(),
            outcome: Outcome::Optimal,
            verified: true,
            objective: Some(-13.0),
            iterations: 4,
            elapsed: Duration::from_millis(2),
        };
        sink.publish(report.clone());

        assert_eq!(sink.reports(), vec![report.clone()]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["engine"], "test");
        assert_eq!(json["outcome"], "Optimal");
    }

    #[test]
    fn test_report_without_point() {
        let problem = QpProblem::<f64>::new(1);
        let solve = Solve::without_solution(Outcome::Infeasible, 7);
        let report = EngineReport::from_solve("x", &problem, &solve, 1e-6, Duration::ZERO);

        assert!(!report.verified);
        assert_eq!(report.objective, None);
        assert_eq!(report.iterations, 7);
    }
}
