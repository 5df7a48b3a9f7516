//! Numerical algorithms behind the operator contract.
//!
//! - [`lanczos`]: symmetric Lanczos tridiagonalization with a stored, fully
//!   reorthogonalized Krylov basis.
//! - [`root_decomposition`]: the generic `A ≈ R Rᵗ` factorization used by operators
//!   without a closed-form root, built on an exact eigendecomposition for small
//!   matrices and on Lanczos for large ones.

pub mod lanczos;
pub mod root_decomposition;

pub use lanczos::{LanczosDecomposition, lanczos_tridiagonalize};
pub use root_decomposition::root_decomposition;

/// Threshold under which a Lanczos `beta` counts as zero, relative to the running
/// estimate `scale` of the operator's norm.
pub(crate) fn breakdown_tolerance(scale: f64) -> f64 {
    f64::EPSILON.sqrt() * scale.max(1.0)
}
