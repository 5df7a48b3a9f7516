//! Symmetric Lanczos tridiagonalization with full reorthogonalization.
//!
//! Given a symmetric operator `A` and a starting vector `b`, the process builds an
//! orthonormal basis `Q_k` of the Krylov subspace `K_k(A, b)` together with the
//! symmetric tridiagonal `T_k = Q_kᵗ A Q_k`. Root decompositions use the pair to
//! approximate `A ≈ Q_k T_k Q_kᵗ`.
//!
//! Every new basis vector is orthogonalized against the whole stored basis (twice, which
//! is enough in floating point). That costs O(nk) memory and O(nk²) flops, but keeps
//! `Q_k` orthonormal to working precision, which the root reconstruction depends on.

use super::breakdown_tolerance;
use crate::error::{Result, invalid_arguments};
use faer::Mat;

/// The output of [`lanczos_tridiagonalize`].
#[derive(Debug, Clone)]
pub struct LanczosDecomposition {
    /// The `n x steps_taken` orthonormal Krylov basis.
    pub q: Mat<f64>,
    /// Diagonal of `T_k`.
    pub alphas: Vec<f64>,
    /// Off-diagonal of `T_k` (`steps_taken - 1` entries).
    pub betas: Vec<f64>,
    pub steps_taken: usize,
}

impl LanczosDecomposition {
    /// Assembles the dense symmetric tridiagonal matrix `T_k`.
    pub fn tridiagonal(&self) -> Mat<f64> {
        let k = self.steps_taken;
        Mat::from_fn(k, k, |i, j| {
            if i == j {
                self.alphas[i]
            } else if i + 1 == j {
                self.betas[i]
            } else if j + 1 == i {
                self.betas[j]
            } else {
                0.0
            }
        })
    }
}

fn dot_col(q: &Mat<f64>, col: usize, w: &Mat<f64>) -> f64 {
    (0..w.nrows()).map(|i| q[(i, col)] * w[(i, 0)]).sum()
}

/// Runs up to `k` Lanczos steps of the operator applied by `apply`, starting from `b`.
///
/// `apply` receives and returns `n x 1` column vectors. The iteration stops early when
/// the Krylov subspace becomes invariant (the next `beta` is numerically zero).
///
/// # Errors
/// Fails if `k` is zero, if `b` is the zero vector, if `apply` returns a vector of the
/// wrong size, or if `apply` itself fails.
pub fn lanczos_tridiagonalize(
    mut apply: impl FnMut(&Mat<f64>) -> Result<Mat<f64>>,
    b: &Mat<f64>,
    k: usize,
) -> Result<LanczosDecomposition> {
    if k == 0 {
        return Err(invalid_arguments("lanczos", "At least one iteration is required."));
    }
    let n = b.nrows();
    let b_norm = b.norm_l2();
    if b_norm == 0.0 {
        return Err(invalid_arguments(
            "lanczos",
            "The initial vector `b` must not be a zero vector.",
        ));
    }
    let k = k.min(n);

    // Pre-allocate the basis; early termination trims it at the end.
    let mut q = Mat::<f64>::zeros(n, k);
    for i in 0..n {
        q[(i, 0)] = b[(i, 0)] / b_norm;
    }

    let mut alphas = Vec::with_capacity(k);
    let mut betas = Vec::with_capacity(k.saturating_sub(1));
    let mut scale: f64 = 0.0;
    let mut steps_taken = 0;

    for j in 0..k {
        let v = Mat::from_fn(n, 1, |i, _| q[(i, j)]);
        let mut w = apply(&v)?;
        if w.nrows() != n || w.ncols() != 1 {
            return Err(invalid_arguments(
                "lanczos",
                format!("operator returned a {}x{} block for an {n}x1 vector", w.nrows(), w.ncols()),
            ));
        }

        let alpha = dot_col(&q, j, &w);
        // Orthogonalizing against the full basis subsumes the three-term recurrence.
        for _ in 0..2 {
            for col in 0..=j {
                let c = dot_col(&q, col, &w);
                for i in 0..n {
                    w[(i, 0)] -= c * q[(i, col)];
                }
            }
        }
        alphas.push(alpha);
        steps_taken += 1;

        if j + 1 == k {
            break;
        }

        let beta = w.norm_l2();
        scale = scale.max(alpha.abs() + beta);
        if beta <= breakdown_tolerance(scale) {
            log::debug!("Lanczos breakdown at step {steps_taken}: the Krylov subspace is invariant.");
            break;
        }

        betas.push(beta);
        for i in 0..n {
            q[(i, j + 1)] = w[(i, 0)] / beta;
        }
    }

    let q = if steps_taken == k {
        q
    } else {
        Mat::from_fn(n, steps_taken, |i, j| q[(i, j)])
    };

    Ok(LanczosDecomposition {
        q,
        alphas,
        betas,
        steps_taken,
    })
}
