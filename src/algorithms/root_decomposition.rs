//! Numerical root decompositions `A ≈ R Rᵗ` of symmetric positive semi-definite operators.
//!
//! Two paths are available:
//!
//! 1.  **Exact**: the operator is materialized and every batch matrix goes through a
//!     self-adjoint eigendecomposition `A = U Λ Uᵗ`. The root keeps the eigenpairs with
//!     a numerically positive eigenvalue, `R = U_+ Λ_+^{1/2}`.
//! 2.  **Lanczos**: only products `A x` are used. A `k`-step Lanczos process gives
//!     `A ≈ Q_k T_k Q_kᵗ`, and the small tridiagonal `T_k` is decomposed exactly, so
//!     `R = Q_k · root(T_k)`.
//!
//! Roots of different batch members may have different ranks; they are padded with
//! zero columns to a common rank, which leaves `R Rᵗ` unchanged.

use crate::{
    error::{Result, invalid_arguments},
    operators::{Index, LinearOperator},
    settings::RootDecompositionSettings,
    tensor::Tensor,
    utils::broadcasting::batch_indices,
};
use super::lanczos::lanczos_tridiagonalize;
use faer::{Mat, Side};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Seed of the Lanczos start vectors, so repeated decompositions agree.
const LANCZOS_SEED: u64 = 42;

/// Computes a root factor of shape `(*batch, n, r)` for a square operator.
pub fn root_decomposition<O: LinearOperator + ?Sized>(
    op: &O,
    settings: &RootDecompositionSettings,
) -> Result<Tensor> {
    let size = op.size();
    let (batch_shape, matrix) = size.split_at(size.len() - 2);
    let n = matrix[0];
    if n != matrix[1] {
        return Err(invalid_arguments(
            op.name(),
            format!("root_decomposition needs a square operator; got size {size:?}"),
        ));
    }
    let num_batches: usize = batch_shape.iter().product();

    let roots = if n <= settings.max_exact_size {
        log::debug!("{}: exact root decomposition of size {size:?}", op.name());
        let dense = op.to_dense()?;
        (0..num_batches)
            .map(|b| root_from_symmetric(&dense.matrix_at(b)?, settings.eigenvalue_tolerance))
            .collect::<Result<Vec<_>>>()?
    } else {
        log::debug!(
            "{}: Lanczos root decomposition of size {size:?} with at most {} iterations",
            op.name(),
            settings.max_lanczos_iterations
        );
        let mut rng = StdRng::seed_from_u64(LANCZOS_SEED);
        let mut roots = Vec::with_capacity(num_batches);
        for batch_index in batch_indices(batch_shape) {
            let start = Mat::from_fn(n, 1, |_, _| rng.random::<f64>() + 0.5);
            roots.push(lanczos_root(op, &batch_index, &start, settings)?);
        }
        roots
    };

    Tensor::from_matrices(batch_shape, &pad_to_common_rank(roots))
}

/// Root of the batch member at `batch_index` from a Lanczos tridiagonalization.
fn lanczos_root<O: LinearOperator + ?Sized>(
    op: &O,
    batch_index: &[usize],
    start: &Mat<f64>,
    settings: &RootDecompositionSettings,
) -> Result<Mat<f64>> {
    let member = if batch_index.is_empty() {
        None
    } else {
        let batch_index: Vec<Index> = batch_index.iter().copied().map(Index::At).collect();
        Some(op.getitem(&Index::Full, &Index::Full, &batch_index)?.into_operator()?)
    };

    let apply = |x: &Mat<f64>| -> Result<Mat<f64>> {
        let rhs = Tensor::from_mat(x);
        let res = match &member {
            Some(member) => member.matmul(&rhs)?,
            None => op.matmul(&rhs)?,
        };
        res.matrix_at(0)
    };

    let decomposition = lanczos_tridiagonalize(apply, start, settings.max_lanczos_iterations)?;
    let t_root = root_from_symmetric(&decomposition.tridiagonal(), settings.eigenvalue_tolerance)?;
    Ok(&decomposition.q * &t_root)
}

/// Root of a dense symmetric matrix via its eigendecomposition.
///
/// Eigenvalues at or below `tolerance · λ_max` are treated as zero. A matrix without
/// positive eigenvalues gets a single zero column.
pub fn root_from_symmetric(mat: &Mat<f64>, tolerance: f64) -> Result<Mat<f64>> {
    let n = mat.nrows();
    if n == 0 {
        return Ok(Mat::zeros(0, 1));
    }
    let evd = mat.as_ref().self_adjoint_eigen(Side::Lower)?;
    let u = evd.U();
    let s = evd.S();

    let lambda_max = (0..n).map(|i| s[i]).fold(0.0_f64, f64::max);
    let cutoff = tolerance * lambda_max;
    let kept: Vec<usize> = (0..n).filter(|&i| s[i] > cutoff && s[i] > 0.0).collect();
    if kept.is_empty() {
        return Ok(Mat::zeros(n, 1));
    }

    Ok(Mat::from_fn(n, kept.len(), |i, j| {
        let col = kept[j];
        u[(i, col)] * s[col].sqrt()
    }))
}

fn pad_to_common_rank(roots: Vec<Mat<f64>>) -> Vec<Mat<f64>> {
    let rank = roots.iter().map(|r| r.ncols()).max().unwrap_or(1);
    roots
        .into_iter()
        .map(|r| {
            if r.ncols() == rank {
                r
            } else {
                Mat::from_fn(r.nrows(), rank, |i, j| if j < r.ncols() { r[(i, j)] } else { 0.0 })
            }
        })
        .collect()
}
