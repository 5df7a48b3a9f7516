//! Shape arithmetic for batched matrix operations.
//!
//! Shapes are plain `&[usize]` slices. The trailing two dimensions of a shape are the
//! matrix dimensions and every leading dimension is a batch dimension. Batch
//! dimensions broadcast like elementwise tensor dimensions: they are aligned from the
//! right, and a dimension of size 1 stretches to match the other operand.

use crate::error::{Result, shape_mismatch};
use ndarray::{Dimension, IxDyn};

/// Computes the broadcast of two shapes, or `None` if they are incompatible.
pub fn broadcast_shapes(left: &[usize], right: &[usize]) -> Option<Vec<usize>> {
    let ndim = left.len().max(right.len());
    let mut result = Vec::with_capacity(ndim);

    for i in 0..ndim {
        let l = left.len().checked_sub(ndim - i).map_or(1, |j| left[j]);
        let r = right.len().checked_sub(ndim - i).map_or(1, |j| right[j]);
        let dim = match (l, r) {
            (l, r) if l == r => l,
            (1, r) => r,
            (l, 1) => l,
            _ => return None,
        };
        result.push(dim);
    }
    Some(result)
}

/// Computes the output shape of `left @ right` under batched matmul semantics.
///
/// A 1-D `left` is treated as a single row and a 1-D `right` as a single column;
/// the promoted dimension is removed from the result again.
pub fn matmul_broadcast_shape(left: &[usize], right: &[usize]) -> Result<Vec<usize>> {
    if left.is_empty() || right.is_empty() {
        return Err(shape_mismatch("matmul", left, right));
    }

    let left_is_vec = left.len() == 1;
    let right_is_vec = right.len() == 1;
    let lhs: Vec<usize> = if left_is_vec { vec![1, left[0]] } else { left.to_vec() };
    let rhs: Vec<usize> = if right_is_vec { vec![right[0], 1] } else { right.to_vec() };

    let (lhs_batch, lhs_mat) = lhs.split_at(lhs.len() - 2);
    let (rhs_batch, rhs_mat) = rhs.split_at(rhs.len() - 2);
    if lhs_mat[1] != rhs_mat[0] {
        return Err(shape_mismatch("matmul", left, right));
    }

    let mut output = broadcast_shapes(lhs_batch, rhs_batch)
        .ok_or_else(|| shape_mismatch("matmul", left, right))?;
    if !left_is_vec {
        output.push(lhs_mat[0]);
    }
    if !right_is_vec {
        output.push(rhs_mat[1]);
    }
    Ok(output)
}

/// The common length of gather index vectors. Length-1 vectors broadcast against the
/// others, and any empty vector makes the result empty.
pub(crate) fn broadcast_index_len(vectors: &[&[usize]]) -> Result<usize> {
    let len = if vectors.iter().any(|v| v.is_empty()) {
        0
    } else {
        vectors.iter().map(|v| v.len()).max().unwrap_or(1)
    };
    match vectors.iter().find(|v| v.len() != len && v.len() != 1) {
        Some(bad) => Err(shape_mismatch("gather", &[len], &[bad.len()])),
        None => Ok(len),
    }
}

/// Every multi-index of `batch_shape` in row-major order. An empty shape has exactly
/// one (empty) index.
pub(crate) fn batch_indices(batch_shape: &[usize]) -> impl Iterator<Item = Vec<usize>> + use<> {
    ndarray::indices(IxDyn(batch_shape))
        .into_iter()
        .map(|index| index.slice().to_vec())
}
