//! The elementwise (Hadamard) product of two equally sized operators.
//!
//! `(A ⊙ B) x` has no structured form for arbitrary `A` and `B`. When `A = R Rᵗ` has
//! rank `r`, however,
//!
//! ```text
//! (A ⊙ B) x = Σ_s diag(R[:, s]) · B · diag(R[:, s]) · x
//! ```
//!
//! so a single product of `B` with an `n × (r·m)` block replaces the `O(n²·m)` dense
//! computation. Children are therefore converted to
//! [`RootLinearOperator`](super::RootLinearOperator)s at
//! construction, unless the matrix is at most [`Settings::dense_fallback_size`] wide, in
//! which case they are kept as given and products are computed densely.
//!
//! # Precondition
//! Both children must be symmetric. [`LinearOperator::transpose`] returns the operator
//! itself and root decompositions only capture symmetric matrices.

use super::{Index, Indexed, LinearOperator, Operator, OperatorArg, getitem_default};
use crate::{
    error::{Result, invalid_arguments},
    settings::Settings,
    tensor::Tensor,
    utils::{broadcasting::matmul_broadcast_shape, memoize::Memo},
};

#[derive(Debug, Clone)]
pub struct MulLinearOperator {
    left: Operator,
    right: Operator,
    memo: Memo,
}

impl MulLinearOperator {
    const NAME: &'static str = "MulLinearOperator";

    pub fn check_args(left: &Operator, right: &Operator) -> Option<String> {
        let (l, r) = (left.size(), right.size());
        (l != r).then(|| {
            format!("MulLinearOperator expects two LinearOperators of the same size: got {l:?} and {r:?}.")
        })
    }

    /// Builds `left ⊙ right` with default [`Settings`].
    pub fn new(left: Operator, right: Operator) -> Result<Self> {
        Self::with_settings(left, right, &Settings::default())
    }

    /// Builds `left ⊙ right`, converting both children to root form unless the matrix
    /// is small enough for the dense fallback.
    pub fn with_settings(left: Operator, right: Operator, settings: &Settings) -> Result<Self> {
        if let Some(reason) = Self::check_args(&left, &right) {
            return Err(invalid_arguments(Self::NAME, reason));
        }
        let (n, _) = left.matrix_shape();
        if n <= settings.dense_fallback_size {
            log::debug!(
                "{}: size {n} is within the dense fallback size {}; keeping children as given",
                Self::NAME,
                settings.dense_fallback_size
            );
            return Self::from_parts(left, right);
        }
        let left = left.root_decomposition_with(settings)?;
        let right = right.root_decomposition_with(settings)?;
        Self::from_parts(left, right)
    }

    /// Builds the product from children exactly as given.
    pub fn from_parts(left: Operator, right: Operator) -> Result<Self> {
        if let Some(reason) = Self::check_args(&left, &right) {
            return Err(invalid_arguments(Self::NAME, reason));
        }
        Ok(Self {
            left,
            right,
            memo: Memo::new(),
        })
    }

    pub fn left(&self) -> &Operator {
        &self.left
    }

    pub fn right(&self) -> &Operator {
        &self.right
    }

    /// The cache of this product's materialization.
    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    /// Whether products go through the left child's root factor.
    pub fn uses_root_path(&self) -> bool {
        self.left.as_root().is_some()
    }
}

/// Turns `(*batch, n, k)` vectors into factors `(*batch, n, rank·k)` that contract
/// through the opposite child of the product: `Ũ[i, (s, k)] = U[i, k] · F[i, s]` where
/// `F` is the child's root factor, or its dense matrix paired with the identity.
fn hadamard_factors(child: &Operator, left_vecs: &Tensor, right_vecs: &Tensor) -> Result<(Tensor, Tensor)> {
    let left_vecs = left_vecs.unsqueeze(left_vecs.ndim() - 1)?;
    let right_vecs = right_vecs.unsqueeze(right_vecs.ndim() - 1)?;

    let (left_factor, right_factor) = match child.as_root() {
        Some(root) => {
            let r = root.root_tensor()?;
            let r = r.unsqueeze(r.ndim())?;
            (left_vecs.mul(&r)?, right_vecs.mul(&r)?)
        }
        None => {
            let dense = child.to_dense()?;
            let (n, _) = child.matrix_shape();
            let eye = Tensor::eye(n).unsqueeze(2)?;
            (left_vecs.mul(&dense.unsqueeze(dense.ndim())?)?, right_vecs.mul(&eye)?)
        }
    };
    Ok((merge_trailing(&left_factor)?, merge_trailing(&right_factor)?))
}

fn merge_trailing(t: &Tensor) -> Result<Tensor> {
    let shape = t.shape();
    let nd = shape.len();
    let mut merged = shape[..nd - 2].to_vec();
    merged.push(shape[nd - 2] * shape[nd - 1]);
    t.reshape(&merged)
}

impl LinearOperator for MulLinearOperator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> Vec<usize> {
        self.left.size()
    }

    fn args(&self) -> Vec<OperatorArg> {
        vec![
            OperatorArg::Operator(self.left.clone()),
            OperatorArg::Operator(self.right.clone()),
        ]
    }

    fn rebuild(&self, args: Vec<OperatorArg>) -> Result<Operator> {
        match <[OperatorArg; 2]>::try_from(args) {
            Ok([OperatorArg::Operator(left), OperatorArg::Operator(right)]) => {
                Ok(Operator::new(Self::from_parts(left, right)?))
            }
            _ => Err(invalid_arguments(Self::NAME, "expects two operator arguments")),
        }
    }

    fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        let output_shape = matmul_broadcast_shape(&self.size(), rhs.shape())?;

        match self.left.as_root() {
            Some(left_root) => {
                let root = left_root.root_tensor()?;
                let root = root.unsqueeze(root.ndim())?;
                let rank = left_root.rank();
                let (n, _) = self.left.matrix_shape();
                let m = rhs.shape()[rhs.ndim() - 1];
                let batch = output_shape[..output_shape.len() - 2].to_vec();

                // (*batch, n, r, m): column s holds diag(R[:, s]) · rhs.
                let scaled = rhs.unsqueeze(rhs.ndim() - 1)?.mul(&root)?;
                let mut wide = batch.clone();
                wide.extend([n, rank * m]);
                let product = self.right.matmul(&scaled.reshape(&wide)?)?;

                let mut split = batch.clone();
                split.extend([n, rank, m]);
                product.reshape(&split)?.mul(&root)?.sum_dim(batch.len() + 1)
            }
            None => {
                log::debug!("{}: left child is not a root; multiplying densely", Self::NAME);
                self.to_dense()?.matmul(rhs)
            }
        }
    }

    fn transpose_matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.matmul(rhs)
    }

    /// Returns the operator itself; valid for symmetric children only.
    fn transpose(&self, this: &Operator) -> Result<Operator> {
        Ok(this.clone())
    }

    /// Gradients of the left child's arguments, then of the right child's.
    fn quad_form_derivative(&self, left_vecs: &Tensor, right_vecs: &Tensor) -> Result<Vec<Tensor>> {
        let (left_factor, right_factor) = hadamard_factors(&self.right, left_vecs, right_vecs)?;
        let mut grads = self.left.quad_form_derivative(&left_factor, &right_factor)?;

        let (left_factor, right_factor) = hadamard_factors(&self.left, left_vecs, right_vecs)?;
        grads.extend(self.right.quad_form_derivative(&left_factor, &right_factor)?);
        Ok(grads)
    }

    fn to_dense(&self) -> Result<Tensor> {
        let dense = self.memo.get_or_try_insert("to_dense", || -> Result<Tensor> {
            self.left.to_dense()?.mul(&self.right.to_dense()?)
        })?;
        Ok((*dense).clone())
    }

    fn diagonal(&self) -> Result<Tensor> {
        self.left.diagonal()?.mul(&self.right.diagonal()?)
    }

    fn get_indices(&self, rows: &[usize], cols: &[usize], batch: &[Vec<usize>]) -> Result<Tensor> {
        let left = self.left.get_indices(rows, cols, batch)?;
        let right = self.right.get_indices(rows, cols, batch)?;
        left.mul(&right)
    }

    fn getitem(&self, rows: &Index, cols: &Index, batch: &[Index]) -> Result<Indexed> {
        if rows == cols && rows.keeps_dim() {
            let left = self.left.getitem(rows, cols, batch)?.into_operator()?;
            let right = self.right.getitem(rows, cols, batch)?.into_operator()?;
            return Ok(Indexed::Operator(Operator::new(Self::from_parts(left, right)?)));
        }
        getitem_default(self, rows, cols, batch)
    }

    fn expand_batch(&self, batch_shape: &[usize]) -> Result<Operator> {
        let left = self.left.expand_batch(batch_shape)?;
        let right = self.right.expand_batch(batch_shape)?;
        Ok(Operator::new(Self::from_parts(left, right)?))
    }

    /// `c · (A ⊙ B) = (c · A) ⊙ B`.
    fn mul_constant(&self, _this: &Operator, constant: f64) -> Result<Operator> {
        let left = self.left.mul_constant(constant)?;
        Ok(Operator::new(Self::from_parts(left, self.right.clone())?))
    }
}
