//! A linear operator backed by an explicit dense tensor.

use super::{Index, Indexed, LinearOperator, Operand, Operator, OperatorArg};
use crate::{
    error::{LinearOperatorErrorKind, Result, invalid_arguments},
    tensor::Tensor,
};

/// Wraps a tensor of shape `(*batch, rows, cols)` with at least two dimensions.
#[derive(Debug, Clone)]
pub struct DenseLinearOperator {
    tensor: Tensor,
}

impl DenseLinearOperator {
    const NAME: &'static str = "DenseLinearOperator";

    /// Returns a reason the arguments are invalid, if they are.
    pub fn check_args(tensor: &Tensor) -> Option<String> {
        (tensor.ndim() < 2).then(|| {
            format!(
                "DenseLinearOperator expects a matrix (or batches of matrices) - got a Tensor of size {:?}.",
                tensor.shape()
            )
        })
    }

    pub fn new(tensor: Tensor) -> Result<Self> {
        if let Some(reason) = Self::check_args(&tensor) {
            return Err(invalid_arguments(Self::NAME, reason));
        }
        Ok(Self { tensor })
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Solves `A x = rhs` where the wrapped tensor is a Cholesky factor of `A`.
    pub fn cholesky_solve(&self, rhs: &Tensor, upper: bool) -> Result<Tensor> {
        self.tensor.cholesky_solve(rhs, upper)
    }

    fn require_batch_dim(&self, dim: usize) -> Result<()> {
        let batch_ndim = self.tensor.ndim() - 2;
        if dim < batch_ndim {
            Ok(())
        } else {
            Err(LinearOperatorErrorKind::IndexOutOfBounds {
                index: dim,
                dim,
                size: batch_ndim,
            }
            .into())
        }
    }

    /// Sums the batch members along batch dimension `dim`.
    pub fn sum_batch(&self, dim: usize) -> Result<Self> {
        self.require_batch_dim(dim)?;
        Self::new(self.tensor.sum_dim(dim)?)
    }

    /// Multiplies the batch members elementwise along batch dimension `dim`.
    pub fn prod_batch(&self, dim: usize) -> Result<Self> {
        self.require_batch_dim(dim)?;
        Self::new(self.tensor.prod_dim(dim)?)
    }

    /// The tensor of `other` when it is dense data of at least two dimensions.
    fn dense_operand(other: &Operand) -> Option<&Tensor> {
        match other {
            Operand::Tensor(t) if t.ndim() >= 2 => Some(t),
            Operand::Operator(op) => op.as_dense().map(DenseLinearOperator::tensor),
            _ => None,
        }
    }
}

impl LinearOperator for DenseLinearOperator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> Vec<usize> {
        self.tensor.shape().to_vec()
    }

    fn args(&self) -> Vec<OperatorArg> {
        vec![OperatorArg::Tensor(self.tensor.clone())]
    }

    fn rebuild(&self, args: Vec<OperatorArg>) -> Result<Operator> {
        match <[OperatorArg; 1]>::try_from(args) {
            Ok([OperatorArg::Tensor(t)]) => Ok(Operator::new(Self::new(t)?)),
            _ => Err(invalid_arguments(Self::NAME, "expects a single tensor argument")),
        }
    }

    fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.tensor.matmul(rhs)
    }

    fn transpose_matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.tensor.transpose()?.matmul(rhs)
    }

    fn transpose(&self, _this: &Operator) -> Result<Operator> {
        Ok(Operator::new(Self::new(self.tensor.transpose()?)?))
    }

    fn quad_form_derivative(&self, left_vecs: &Tensor, right_vecs: &Tensor) -> Result<Vec<Tensor>> {
        let res = left_vecs.matmul(&right_vecs.transpose()?)?;
        Ok(vec![res.sum_to_shape(self.tensor.shape())?])
    }

    fn to_dense(&self) -> Result<Tensor> {
        Ok(self.tensor.clone())
    }

    fn diagonal(&self) -> Result<Tensor> {
        self.tensor.diagonal()
    }

    fn get_indices(&self, rows: &[usize], cols: &[usize], batch: &[Vec<usize>]) -> Result<Tensor> {
        let mut indices = batch.to_vec();
        indices.push(rows.to_vec());
        indices.push(cols.to_vec());
        self.tensor.gather(&indices)
    }

    fn getitem(&self, rows: &Index, cols: &Index, batch: &[Index]) -> Result<Indexed> {
        let batch_ndim = self.tensor.ndim() - 2;
        if batch.len() > batch_ndim {
            return Err(invalid_arguments(
                Self::NAME,
                format!("{} batch indices given for an operator of size {:?}", batch.len(), self.size()),
            ));
        }
        let mut indices = batch.to_vec();
        indices.resize(batch_ndim, Index::Full);
        indices.extend([rows.clone(), cols.clone()]);

        let sliced = self.tensor.index(&indices)?;
        if rows.keeps_dim() && cols.keeps_dim() {
            Ok(Indexed::Operator(Operator::new(Self::new(sliced)?)))
        } else {
            Ok(Indexed::Tensor(sliced))
        }
    }

    fn expand_batch(&self, batch_shape: &[usize]) -> Result<Operator> {
        let mut shape = batch_shape.to_vec();
        shape.extend_from_slice(&self.tensor.shape()[self.tensor.ndim() - 2..]);
        Ok(Operator::new(Self::new(self.tensor.broadcast_to(&shape)?)?))
    }

    fn mul_constant(&self, _this: &Operator, constant: f64) -> Result<Operator> {
        Ok(Operator::new(Self::new(self.tensor.scale(constant))?))
    }

    fn try_mul(&self, _this: &Operator, other: &Operand) -> Result<Option<Operator>> {
        match Self::dense_operand(other) {
            Some(t) => Ok(Some(Operator::new(Self::new(self.tensor.mul(t)?)?))),
            None => Ok(None),
        }
    }

    fn try_add(&self, _this: &Operator, other: &Operand) -> Result<Option<Operator>> {
        match Self::dense_operand(other) {
            Some(t) => Ok(Some(Operator::new(Self::new(self.tensor.add(t)?)?))),
            None => Ok(None),
        }
    }

    fn as_dense(&self) -> Option<&DenseLinearOperator> {
        Some(self)
    }
}

/// Converts a value into an operator.
///
/// Operators are returned unchanged (the same instance), tensors are wrapped in a
/// [`DenseLinearOperator`], and anything else is rejected.
pub fn to_operator(obj: impl Into<Operand>) -> Result<Operator> {
    match obj.into() {
        Operand::Operator(op) => Ok(op),
        Operand::Tensor(t) => Ok(Operator::new(DenseLinearOperator::new(t)?)),
        other => Err(LinearOperatorErrorKind::UnsupportedType {
            operation: "to_operator",
            type_name: other.type_name(),
        }
        .into()),
    }
}
