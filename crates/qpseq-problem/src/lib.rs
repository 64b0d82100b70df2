mod scalar;
mod spectral;
mod problem;
mod soft;
mod text;

pub use scalar::Scalar;
pub use spectral::{Definiteness, SchurClassifier, SpectralClassifier, SymmetricEigenClassifier};
pub use problem::QpProblem;

#[cfg(test)]
mod tests;
