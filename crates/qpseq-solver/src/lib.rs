mod engine;
mod settings;
mod clarabel_engine;
mod admm_engine;
pub mod compare;

pub use engine::{EngineState, Solve, SolverEngine, WarmStart};
pub use settings::EngineSettings;
pub use clarabel_engine::ClarabelEngine;
pub use admm_engine::AdmmEngine;
pub use compare::{solve_all, EngineReport, MemorySink, ReportSink};
