//! This module defines the core abstraction for structured linear operators.
//!
//! Many matrices that show up in practice have structure: they are low rank, or the
//! elementwise product of low-rank factors, or a sum of such pieces. Storing them
//! densely wastes memory, and multiplying by them densely wastes time. An operator
//! keeps the structure instead and only materializes the matrix when asked to.
//!
//! There are two layers:
//!
//! 1.  **[`LinearOperator`]** is the contract every structured variant implements.
//!     A variant only has to provide a handful of primitives (its shape, how it
//!     multiplies a matrix, how it transposes, how gradients flow through it, and how
//!     to rebuild itself from new construction arguments). Everything else has a
//!     generic default that variants override when their structure allows a faster
//!     path.
//! 2.  **[`Operator`]** is the shared, reference-counted handle callers work with. It
//!     adds the bookkeeping every variant needs (bare-vector handling, shape checks,
//!     operand dispatch for `mul`/`add`, and per-instance memoization of the root
//!     decomposition) on top of the variant's primitives.
//!
//! Operators are immutable. Operations return new operators or new dense tensors, and
//! children are shared between composite operators rather than copied.

use crate::{
    algorithms,
    error::{LinearOperatorErrorKind, Result, invalid_arguments, shape_mismatch},
    settings::{RootDecompositionSettings, Settings},
    tensor::Tensor,
    utils::{
        broadcasting::{batch_indices, broadcast_shapes, matmul_broadcast_shape},
        memoize::Memo,
    },
};
use std::{fmt, rc::Rc};

pub mod constant_mul;
pub mod dense;
pub mod mul;
pub mod root;
pub mod sum;

pub use crate::tensor::Index;
pub use constant_mul::ConstantMulLinearOperator;
pub use dense::{DenseLinearOperator, to_operator};
pub use mul::MulLinearOperator;
pub use root::RootLinearOperator;
pub use sum::SumLinearOperator;

/// A construction argument of an operator: either a child operator or a raw tensor.
#[derive(Debug, Clone)]
pub enum OperatorArg {
    Operator(Operator),
    Tensor(Tensor),
}

/// The result of [`Operator::getitem`]: a structured operator when both matrix
/// dimensions survive the slice, otherwise a dense tensor.
#[derive(Debug, Clone)]
pub enum Indexed {
    Operator(Operator),
    Tensor(Tensor),
}

impl Indexed {
    pub fn into_operator(self) -> Result<Operator> {
        match self {
            Indexed::Operator(op) => Ok(op),
            Indexed::Tensor(t) => to_operator(t),
        }
    }

    pub fn into_tensor(self) -> Result<Tensor> {
        match self {
            Indexed::Operator(op) => op.to_dense(),
            Indexed::Tensor(t) => Ok(t),
        }
    }
}

/// A right-hand operand of [`Operator::mul`] and [`Operator::add`].
#[derive(Debug, Clone)]
pub enum Operand {
    Scalar(f64),
    Tensor(Tensor),
    Operator(Operator),
}

impl Operand {
    pub fn type_name(&self) -> &'static str {
        match self {
            Operand::Scalar(_) => "f64",
            Operand::Tensor(_) => "Tensor",
            Operand::Operator(_) => "Operator",
        }
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Scalar(value)
    }
}

impl From<Tensor> for Operand {
    fn from(value: Tensor) -> Self {
        Operand::Tensor(value)
    }
}

impl From<&Tensor> for Operand {
    fn from(value: &Tensor) -> Self {
        Operand::Tensor(value.clone())
    }
}

impl From<Operator> for Operand {
    fn from(value: Operator) -> Self {
        Operand::Operator(value)
    }
}

impl From<&Operator> for Operand {
    fn from(value: &Operator) -> Self {
        Operand::Operator(value.clone())
    }
}

/// The contract every structured-matrix variant satisfies.
///
/// Shapes are `(*batch, rows, cols)`. Unless stated otherwise, tensors passed to and
/// returned from these methods carry the same batch conventions: leading dimensions
/// broadcast, the trailing two are matrix dimensions.
///
/// Methods that may return the operator itself (or wrap it) receive `this`, the
/// [`Operator`] handle that owns `self`.
pub trait LinearOperator: fmt::Debug {
    /// The variant's name, used in error messages.
    fn name(&self) -> &'static str;

    /// The full logical shape, `(*batch, rows, cols)`.
    fn size(&self) -> Vec<usize>;

    /// The construction arguments, in construction order.
    fn args(&self) -> Vec<OperatorArg>;

    /// Builds an operator of the same variant from new construction arguments.
    fn rebuild(&self, args: Vec<OperatorArg>) -> Result<Operator>;

    /// Computes `self @ rhs` for a matrix `rhs` of shape `(*batch, cols, m)`.
    fn matmul(&self, rhs: &Tensor) -> Result<Tensor>;

    /// The transposed operator, without batch dimensions moving.
    fn transpose(&self, this: &Operator) -> Result<Operator>;

    /// The gradient of `trace(Uᵗ A V)` with respect to every tensor in the operator's
    /// [`representation`](Operator::representation), in the same order.
    ///
    /// `left_vecs` is `(*batch, rows, k)` and `right_vecs` is `(*batch, cols, k)`.
    fn quad_form_derivative(&self, left_vecs: &Tensor, right_vecs: &Tensor) -> Result<Vec<Tensor>>;

    /// Computes `selfᵗ @ rhs`. The default multiplies by the materialized transpose.
    fn transpose_matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.to_dense()?.transpose()?.matmul(rhs)
    }

    /// Materializes the operator. The default multiplies by an identity matrix.
    fn to_dense(&self) -> Result<Tensor> {
        let size = self.size();
        let cols = size[size.len() - 1];
        let mut eye_shape = size[..size.len() - 2].to_vec();
        eye_shape.extend([cols, cols]);
        self.matmul(&Tensor::eye(cols).broadcast_to(&eye_shape)?)
    }

    /// The main diagonal, with shape `(*batch, min(rows, cols))`.
    fn diagonal(&self) -> Result<Tensor> {
        diagonal_from_indices(self)
    }

    /// Gathers entries `self[*batch, rows[t], cols[t]]` into a 1-D tensor. Index vectors
    /// of length 1 broadcast against the others.
    fn get_indices(&self, rows: &[usize], cols: &[usize], batch: &[Vec<usize>]) -> Result<Tensor> {
        let mut indices = batch.to_vec();
        indices.push(rows.to_vec());
        indices.push(cols.to_vec());
        self.to_dense()?.gather(&indices)
    }

    /// Slices the operator. See [`getitem_default`] for the generic behaviour.
    fn getitem(&self, rows: &Index, cols: &Index, batch: &[Index]) -> Result<Indexed> {
        getitem_default(self, rows, cols, batch)
    }

    /// Broadcasts the batch dimensions to `batch_shape`, rebuilding from expanded
    /// construction arguments.
    fn expand_batch(&self, batch_shape: &[usize]) -> Result<Operator> {
        let args = self
            .args()
            .into_iter()
            .map(|arg| match arg {
                OperatorArg::Operator(op) => op.expand_batch(batch_shape).map(OperatorArg::Operator),
                OperatorArg::Tensor(t) if t.ndim() >= 2 => {
                    let mut shape = batch_shape.to_vec();
                    shape.extend_from_slice(&t.shape()[t.ndim() - 2..]);
                    t.broadcast_to(&shape).map(OperatorArg::Tensor)
                }
                arg @ OperatorArg::Tensor(_) => Ok(arg),
            })
            .collect::<Result<Vec<_>>>()?;
        self.rebuild(args)
    }

    /// `c · self`. The default wraps the operator lazily.
    fn mul_constant(&self, this: &Operator, constant: f64) -> Result<Operator> {
        Ok(Operator::new(ConstantMulLinearOperator::new(this.clone(), constant)?))
    }

    /// A variant-specific elementwise product, or `None` to use the generic one.
    fn try_mul(&self, _this: &Operator, _other: &Operand) -> Result<Option<Operator>> {
        Ok(None)
    }

    /// A variant-specific elementwise sum, or `None` to use the generic one.
    fn try_add(&self, _this: &Operator, _other: &Operand) -> Result<Option<Operator>> {
        Ok(None)
    }

    /// A root factor `R` with `R Rᵗ ≈ self`, as an operator of shape `(*batch, n, r)`.
    /// The default computes one numerically.
    fn root_decomposition(&self, settings: &RootDecompositionSettings) -> Result<Operator> {
        let factor = algorithms::root_decomposition(self, settings)?;
        to_operator(factor)
    }

    fn as_root(&self) -> Option<&RootLinearOperator> {
        None
    }

    fn as_dense(&self) -> Option<&DenseLinearOperator> {
        None
    }
}

/// Builds the diagonal from [`LinearOperator::get_indices`], so variants with cheap
/// entry access never materialize the full matrix.
pub(crate) fn diagonal_from_indices<O: LinearOperator + ?Sized>(op: &O) -> Result<Tensor> {
    let size = op.size();
    let (batch_shape, matrix) = size.split_at(size.len() - 2);
    let len = matrix[0].min(matrix[1]);
    let num_batches: usize = batch_shape.iter().product();

    let mut batch = vec![Vec::with_capacity(num_batches * len); batch_shape.len()];
    let mut diag = Vec::with_capacity(num_batches * len);
    for batch_index in batch_indices(batch_shape) {
        for i in 0..len {
            for (dim, &idx) in batch_index.iter().enumerate() {
                batch[dim].push(idx);
            }
            diag.push(i);
        }
    }

    let mut out_shape = batch_shape.to_vec();
    out_shape.push(len);
    if num_batches * len == 0 {
        return Ok(Tensor::zeros(&out_shape));
    }
    op.get_indices(&diag, &diag, &batch)?.reshape(&out_shape)
}

/// The generic slicing rule.
///
/// Slices that only touch batch dimensions keep the variant: every construction
/// argument is sliced the same way and the operator is rebuilt. Any other slice
/// materializes the operator and slices the dense result, which is re-wrapped as a
/// dense operator if both matrix dimensions survive.
pub fn getitem_default<O: LinearOperator + ?Sized>(
    op: &O,
    rows: &Index,
    cols: &Index,
    batch: &[Index],
) -> Result<Indexed> {
    let size = op.size();
    let batch_ndim = size.len() - 2;
    if batch.len() > batch_ndim {
        return Err(invalid_arguments(
            op.name(),
            format!("{} batch indices given for an operator of size {size:?}", batch.len()),
        ));
    }

    if *rows == Index::Full && *cols == Index::Full {
        let args = op
            .args()
            .into_iter()
            .map(|arg| match arg {
                OperatorArg::Operator(child) => child
                    .getitem(&Index::Full, &Index::Full, batch)?
                    .into_operator()
                    .map(OperatorArg::Operator),
                OperatorArg::Tensor(t) if t.ndim() >= 2 => t.index(batch).map(OperatorArg::Tensor),
                arg @ OperatorArg::Tensor(_) => Ok(arg),
            })
            .collect::<Result<Vec<_>>>()?;
        return op.rebuild(args).map(Indexed::Operator);
    }

    let mut indices = batch.to_vec();
    indices.resize(batch_ndim, Index::Full);
    indices.push(rows.clone());
    indices.push(cols.clone());
    let sliced = op.to_dense()?.index(&indices)?;
    if rows.keeps_dim() && cols.keeps_dim() {
        Ok(Indexed::Operator(Operator::new(DenseLinearOperator::new(sliced)?)))
    } else {
        Ok(Indexed::Tensor(sliced))
    }
}

struct Node {
    op: Box<dyn LinearOperator>,
    memo: Memo,
}

/// A shared handle to a structured linear operator.
///
/// Cloning is cheap and yields the same instance (see [`Operator::ptr_eq`]).
#[derive(Clone)]
pub struct Operator(Rc<Node>);

impl Operator {
    pub fn new(op: impl LinearOperator + 'static) -> Self {
        Operator(Rc::new(Node {
            op: Box::new(op),
            memo: Memo::new(),
        }))
    }

    /// The variant behind the handle.
    pub fn inner(&self) -> &dyn LinearOperator {
        self.0.op.as_ref()
    }

    /// The per-instance cache of this operator.
    pub fn memo(&self) -> &Memo {
        &self.0.memo
    }

    /// Whether two handles refer to the same operator instance.
    pub fn ptr_eq(&self, other: &Operator) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn name(&self) -> &'static str {
        self.inner().name()
    }

    pub fn size(&self) -> Vec<usize> {
        self.inner().size()
    }

    pub fn ndim(&self) -> usize {
        self.size().len()
    }

    pub fn batch_shape(&self) -> Vec<usize> {
        let size = self.size();
        size[..size.len() - 2].to_vec()
    }

    /// `(rows, cols)`.
    pub fn matrix_shape(&self) -> (usize, usize) {
        let size = self.size();
        (size[size.len() - 2], size[size.len() - 1])
    }

    pub fn as_root(&self) -> Option<&RootLinearOperator> {
        self.inner().as_root()
    }

    pub fn as_dense(&self) -> Option<&DenseLinearOperator> {
        self.inner().as_dense()
    }

    /// Computes `self @ rhs`. A 1-D `rhs` is treated as a single column and the
    /// result is squeezed back to a vector.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        matmul_broadcast_shape(&self.size(), rhs.shape())?;
        if rhs.ndim() == 1 {
            let res = self.inner().matmul(&rhs.unsqueeze(1)?)?;
            res.squeeze(res.ndim() - 1)
        } else {
            self.inner().matmul(rhs)
        }
    }

    /// Computes `selfᵗ @ rhs` without forming the transpose where the variant allows.
    pub fn transpose_matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        let mut transposed_size = self.size();
        let nd = transposed_size.len();
        transposed_size.swap(nd - 2, nd - 1);
        matmul_broadcast_shape(&transposed_size, rhs.shape())?;
        if rhs.ndim() == 1 {
            let res = self.inner().transpose_matmul(&rhs.unsqueeze(1)?)?;
            res.squeeze(res.ndim() - 1)
        } else {
            self.inner().transpose_matmul(rhs)
        }
    }

    pub fn diagonal(&self) -> Result<Tensor> {
        self.inner().diagonal()
    }

    pub fn to_dense(&self) -> Result<Tensor> {
        self.inner().to_dense()
    }

    /// Alias of [`Operator::to_dense`].
    pub fn evaluate(&self) -> Result<Tensor> {
        self.to_dense()
    }

    /// Gathers individual entries; `batch` holds one index vector per batch dimension.
    pub fn get_indices(&self, rows: &[usize], cols: &[usize], batch: &[Vec<usize>]) -> Result<Tensor> {
        let batch_ndim = self.ndim() - 2;
        if batch.len() != batch_ndim {
            return Err(invalid_arguments(
                self.name(),
                format!("get_indices needs {batch_ndim} batch index vectors; got {}", batch.len()),
            ));
        }
        self.inner().get_indices(rows, cols, batch)
    }

    pub fn getitem(&self, rows: &Index, cols: &Index, batch: &[Index]) -> Result<Indexed> {
        self.inner().getitem(rows, cols, batch)
    }

    /// Broadcasts leading batch dimensions to `batch_shape`.
    pub fn expand_batch(&self, batch_shape: &[usize]) -> Result<Operator> {
        let current = self.batch_shape();
        if current == batch_shape {
            return Ok(self.clone());
        }
        if batch_shape.len() < current.len() || broadcast_shapes(&current, batch_shape).as_deref() != Some(batch_shape) {
            return Err(shape_mismatch("expand_batch", &self.size(), batch_shape));
        }
        self.inner().expand_batch(batch_shape)
    }

    pub fn mul_constant(&self, constant: f64) -> Result<Operator> {
        self.inner().mul_constant(self, constant)
    }

    /// The elementwise (Hadamard) product with a scalar, a tensor, or another operator.
    pub fn mul(&self, other: impl Into<Operand>) -> Result<Operator> {
        let other = other.into();
        match other {
            Operand::Scalar(c) => self.mul_constant(c),
            Operand::Tensor(ref t) if t.numel() == 1 => self.mul_constant(t.item()?),
            Operand::Tensor(ref t) if t.ndim() < 2 => Err(shape_mismatch("mul", &self.size(), t.shape())),
            other => {
                if let Some(res) = self.inner().try_mul(self, &other)? {
                    return Ok(res);
                }
                let other = to_operator(other)?;
                let (left, right) = self.broadcast_with(&other, "mul")?;
                Ok(Operator::new(MulLinearOperator::new(left, right)?))
            }
        }
    }

    /// The elementwise sum with a scalar, a tensor, or another operator.
    pub fn add(&self, other: impl Into<Operand>) -> Result<Operator> {
        let other = other.into();
        match other {
            Operand::Scalar(c) if c == 0.0 => Ok(self.clone()),
            Operand::Scalar(c) => self.add(Tensor::full(&self.size(), c)),
            Operand::Tensor(ref t) if t.ndim() < 2 => Err(shape_mismatch("add", &self.size(), t.shape())),
            other => {
                if let Some(res) = self.inner().try_add(self, &other)? {
                    return Ok(res);
                }
                let other = to_operator(other)?;
                let (left, right) = self.broadcast_with(&other, "add")?;
                Ok(Operator::new(SumLinearOperator::new(vec![left, right])?))
            }
        }
    }

    /// Expands both operators to their common batch shape. Matrix dimensions must agree.
    fn broadcast_with(&self, other: &Operator, operation: &'static str) -> Result<(Operator, Operator)> {
        let (left, right) = (self.size(), other.size());
        if left == right {
            return Ok((self.clone(), other.clone()));
        }
        if self.matrix_shape() != other.matrix_shape() {
            return Err(shape_mismatch(operation, &left, &right));
        }
        let batch = broadcast_shapes(&self.batch_shape(), &other.batch_shape())
            .ok_or_else(|| shape_mismatch(operation, &left, &right))?;
        Ok((self.expand_batch(&batch)?, other.expand_batch(&batch)?))
    }

    /// The gradient of `trace(Uᵗ A V)` with respect to each tensor of
    /// [`Operator::representation`]. 1-D vectors are treated as single columns.
    pub fn quad_form_derivative(&self, left_vecs: &Tensor, right_vecs: &Tensor) -> Result<Vec<Tensor>> {
        let (left_vecs, right_vecs) = if left_vecs.ndim() == 1 {
            (left_vecs.unsqueeze(1)?, right_vecs.unsqueeze(1)?)
        } else {
            (left_vecs.clone(), right_vecs.clone())
        };
        let (rows, cols) = self.matrix_shape();
        let (l, r) = (left_vecs.shape(), right_vecs.shape());
        let compatible = l.len() >= 2
            && r.len() >= 2
            && l[l.len() - 2] == rows
            && r[r.len() - 2] == cols
            && l[l.len() - 1] == r[r.len() - 1];
        if !compatible {
            return Err(shape_mismatch("quad_form_derivative", l, r));
        }
        self.inner().quad_form_derivative(&left_vecs, &right_vecs)
    }

    /// The root decomposition with default settings.
    pub fn root_decomposition(&self) -> Result<Operator> {
        self.root_decomposition_with(&Settings::default())
    }

    /// Returns a [`RootLinearOperator`] `R Rᵗ ≈ self`. Root operators return
    /// themselves; any other result is memoized on this instance per settings.
    pub fn root_decomposition_with(&self, settings: &Settings) -> Result<Operator> {
        if self.as_root().is_some() {
            return Ok(self.clone());
        }
        let (rows, cols) = self.matrix_shape();
        if rows != cols {
            return Err(invalid_arguments(
                self.name(),
                format!("root_decomposition needs a square operator; got size {:?}", self.size()),
            ));
        }

        let key = Memo::key("root_decomposition", &settings.root);
        let root = self.memo().get_or_try_insert(&key, || -> Result<Operator> {
            let factor = self.inner().root_decomposition(&settings.root)?;
            Ok(Operator::new(RootLinearOperator::new(factor)?))
        })?;
        Ok((*root).clone())
    }

    pub fn transpose(&self) -> Result<Operator> {
        self.inner().transpose(self)
    }

    /// The leaf tensors the operator is built from, depth first in construction order.
    pub fn representation(&self) -> Vec<Tensor> {
        self.inner()
            .args()
            .into_iter()
            .flat_map(|arg| match arg {
                OperatorArg::Operator(op) => op.representation(),
                OperatorArg::Tensor(t) => vec![t],
            })
            .collect()
    }

    /// Solves `self @ x = rhs` densely.
    pub fn solve(&self, rhs: &Tensor) -> Result<Tensor> {
        let (rows, cols) = self.matrix_shape();
        if rows != cols {
            return Err(LinearOperatorErrorKind::ShapeMismatch {
                operation: "solve",
                left: self.size(),
                right: rhs.shape().to_vec(),
            }
            .into());
        }
        self.to_dense()?.solve(rhs)
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Operator").field(&self.0.op).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(shape: &[usize], data: Vec<f64>) -> Operator {
        to_operator(Tensor::new(shape.to_vec(), data).unwrap()).unwrap()
    }

    /// Implements only the required methods.
    #[derive(Debug)]
    struct Explicit {
        tensor: Tensor,
    }

    impl LinearOperator for Explicit {
        fn name(&self) -> &'static str {
            "Explicit"
        }

        fn size(&self) -> Vec<usize> {
            self.tensor.shape().to_vec()
        }

        fn args(&self) -> Vec<OperatorArg> {
            vec![OperatorArg::Tensor(self.tensor.clone())]
        }

        fn rebuild(&self, args: Vec<OperatorArg>) -> Result<Operator> {
            match args.into_iter().next() {
                Some(OperatorArg::Tensor(tensor)) => Ok(Operator::new(Explicit { tensor })),
                _ => Err(invalid_arguments("Explicit", "expects a tensor")),
            }
        }

        fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
            self.tensor.matmul(rhs)
        }

        fn transpose(&self, _this: &Operator) -> Result<Operator> {
            Ok(Operator::new(Explicit {
                tensor: self.tensor.transpose()?,
            }))
        }

        fn quad_form_derivative(&self, left_vecs: &Tensor, right_vecs: &Tensor) -> Result<Vec<Tensor>> {
            Ok(vec![left_vecs.matmul(&right_vecs.transpose()?)?])
        }
    }

    #[test]
    fn test_defaults_are_built_from_required_methods() {
        let t = Tensor::new(vec![2, 2, 2], (1..=8).map(f64::from).collect()).unwrap();
        let op = Operator::new(Explicit { tensor: t.clone() });

        assert_eq!(op.to_dense().unwrap(), t);
        assert_eq!(op.diagonal().unwrap().data(), &[1.0, 4.0, 5.0, 8.0]);
        assert_eq!(op.get_indices(&[1], &[0], &[vec![1]]).unwrap().data(), &[7.0]);
        assert_eq!(op.transpose_matmul(&Tensor::full(&[2], 1.0)).unwrap().data(), &[4.0, 6.0, 12.0, 14.0]);

        let member = op.getitem(&Index::Full, &Index::Full, &[Index::At(1)]).unwrap();
        let member = member.into_operator().unwrap();
        assert_eq!(member.name(), "Explicit");
        assert_eq!(member.to_dense().unwrap().data(), &[5.0, 6.0, 7.0, 8.0]);

        let expanded = op.expand_batch(&[3, 2]).unwrap();
        assert_eq!(expanded.name(), "Explicit");
        assert_eq!(expanded.size(), vec![3, 2, 2, 2]);
    }

    #[test]
    fn test_matmul_squeezes_bare_vectors() {
        let op = to_operator(Tensor::full(&[2, 3, 4], 1.0)).unwrap();
        let res = op.matmul(&Tensor::full(&[4], 2.0)).unwrap();
        assert_eq!(res.shape(), &[2, 3]);
        assert!(res.data().iter().all(|&x| x == 8.0));

        let res = op.matmul(&Tensor::full(&[4, 5], 1.0)).unwrap();
        assert_eq!(res.shape(), &[2, 3, 5]);
    }

    #[test]
    fn test_matmul_shape_mismatch_names_shapes() {
        let op = dense(&[2, 2], vec![1.0, 0.0, 0.0, 1.0]);
        let err = op.matmul(&Tensor::zeros(&[3])).unwrap_err();
        assert_eq!(
            err.kind(),
            &LinearOperatorErrorKind::ShapeMismatch {
                operation: "matmul",
                left: vec![2, 2],
                right: vec![3],
            }
        );
    }

    #[test]
    fn test_getitem_falls_back_to_dense_slices() {
        let op = dense(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        match op.getitem(&Index::At(1), &Index::Full, &[]).unwrap() {
            Indexed::Tensor(t) => assert_eq!(t.data(), &[3.0, 4.0]),
            Indexed::Operator(_) => panic!("a row slice should be dense"),
        }
        let scalar = op.getitem(&Index::At(0), &Index::At(1), &[]).unwrap().into_tensor().unwrap();
        assert_eq!(scalar.item().unwrap(), 2.0);
    }

    #[test]
    fn test_expand_batch_rejects_incompatible_shape() {
        let op = dense(&[2, 1, 1], vec![1.0, 2.0]);
        assert_eq!(op.expand_batch(&[3, 2]).unwrap().size(), vec![3, 2, 1, 1]);
        assert!(op.expand_batch(&[3]).is_err());
    }

    #[test]
    fn test_add_zero_is_identity_and_sum_is_lazy() {
        let a = dense(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        assert!(a.add(0.0).unwrap().ptr_eq(&a));

        let r = RootLinearOperator::new(dense(&[2, 1], vec![1.0, 1.0])).unwrap();
        let sum = a.add(Operator::new(r)).unwrap();
        assert_eq!(sum.name(), "SumLinearOperator");
        assert_eq!(sum.to_dense().unwrap().data(), &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_representation_flattens_children() {
        let root = Operator::new(RootLinearOperator::new(dense(&[2, 1], vec![1.0, 2.0])).unwrap());
        let scaled = root.mul(-3.0).unwrap();
        let repr = scaled.representation();
        assert_eq!(repr.len(), 2);
        assert_eq!(repr[0].shape(), &[2, 1]);
        assert_eq!(repr[1].item().unwrap(), -3.0);
    }
}
