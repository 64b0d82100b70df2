use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::scalar::Scalar;

/// Definiteness class of a square matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Definiteness {
    PositiveDefinite,
    PositiveSemidefinite,
    Indefinite,
}

/// Supplies the (real parts of the) eigenvalues of a square matrix.
///
/// Convexity queries only ever look at the real part of the spectrum, so any
/// decomposition that produces it can back them.
pub trait SpectralClassifier<T: Scalar> {
    /// Real parts of the eigenvalues, in no particular order
    fn spectrum(&self, matrix: &DMatrix<T>) -> Vec<T>;

    /// Smallest eigenvalue, `None` for an empty matrix
    fn min_eigenvalue(&self, matrix: &DMatrix<T>) -> Option<T> {
        self.spectrum(matrix)
            .into_iter()
            .fold(None, |acc, v| match acc {
                Some(m) if m <= v => Some(m),
                _ => Some(v),
            })
    }

    /// No eigenvalue below `-tolerance`
    fn is_psd(&self, matrix: &DMatrix<T>, tolerance: T) -> bool {
        self.spectrum(matrix).iter().all(|&v| v >= -tolerance)
    }

    /// Every eigenvalue strictly positive
    fn is_pd(&self, matrix: &DMatrix<T>) -> bool {
        self.spectrum(matrix).iter().all(|&v| v > T::zero())
    }

    fn classify(&self, matrix: &DMatrix<T>, tolerance: T) -> Definiteness {
        let spectrum = self.spectrum(matrix);
        if spectrum.iter().all(|&v| v > T::zero()) {
            Definiteness::PositiveDefinite
        } else if spectrum.iter().all(|&v| v >= -tolerance) {
            Definiteness::PositiveSemidefinite
        } else {
            Definiteness::Indefinite
        }
    }
}

/// Symmetric eigendecomposition. Only the lower triangle is read.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymmetricEigenClassifier;

impl<T: Scalar> SpectralClassifier<T> for SymmetricEigenClassifier {
    fn spectrum(&self, matrix: &DMatrix<T>) -> Vec<T> {
        if matrix.is_empty() {
            return Vec::new();
        }
        matrix.symmetric_eigenvalues().iter().copied().collect()
    }
}

/// Real Schur decomposition, real parts of the general spectrum.
///
/// Does not assume symmetry, at the cost of a slower decomposition.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchurClassifier;

impl<T: Scalar> SpectralClassifier<T> for SchurClassifier {
    fn spectrum(&self, matrix: &DMatrix<T>) -> Vec<T> {
        if matrix.is_empty() {
            return Vec::new();
        }
        matrix.complex_eigenvalues().iter().map(|v| v.re).collect()
    }
}
