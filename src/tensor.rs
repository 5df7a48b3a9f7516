//! The dense backend: an immutable, batched, row-major `f64` tensor.
//!
//! Structured operators never materialize their matrix unless asked to, but they are
//! built out of ordinary dense pieces (a root factor, a right-hand side, a gathered
//! diagonal). [`Tensor`] provides those pieces with the eager primitives the operators
//! compose: batched matrix products, elementwise arithmetic with broadcasting,
//! reductions, reshapes, and indexing.
//!
//! The trailing two dimensions of a tensor with at least two dimensions are its matrix
//! dimensions; any leading dimensions are batch dimensions. Per-matrix kernels are
//! delegated to [`faer`].
//!
//! Storage is an [`ndarray::ArcArray`] kept in standard (row-major) layout, so clones,
//! reshapes and (un)squeezes are free and share memory. [`Tensor::ptr_eq`] exposes that
//! sharing, which is how callers can tell a memoized result apart from a recomputed one.


use crate::{
    error::{LinearOperatorError, LinearOperatorErrorKind, Result, invalid_arguments, shape_mismatch},
    utils::broadcasting::{batch_indices, broadcast_index_len, broadcast_shapes, matmul_broadcast_shape},
};
use faer::{
    Mat, Par,
    linalg::triangular_solve::{solve_lower_triangular_in_place, solve_upper_triangular_in_place},
    prelude::*,
};
use ndarray::{ArcArray, ArrayD, ArrayViewD, Axis, Dimension, Ix2, IxDyn, Zip};
use std::ops::Range;

/// Selects entries along one dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Index {
    /// Every entry; the dimension is kept.
    Full,
    /// A contiguous range; the dimension is kept.
    Range(Range<usize>),
    /// A single entry; the dimension is removed.
    At(usize),
    /// An arbitrary list of entries; the dimension is kept.
    List(Vec<usize>),
}

impl Index {
    /// The positions this index selects in a dimension of size `size`.
    fn positions(&self, dim: usize, size: usize) -> Result<Vec<usize>> {
        let out_of_bounds = |index: usize| -> LinearOperatorError {
            LinearOperatorErrorKind::IndexOutOfBounds { index, dim, size }.into()
        };
        match self {
            Index::Full => Ok((0..size).collect()),
            Index::Range(range) => {
                if range.end > size || range.start > range.end {
                    return Err(out_of_bounds(range.end));
                }
                Ok(range.clone().collect())
            }
            Index::At(i) => {
                if *i >= size {
                    return Err(out_of_bounds(*i));
                }
                Ok(vec![*i])
            }
            Index::List(list) => {
                if let Some(&bad) = list.iter().find(|&&i| i >= size) {
                    return Err(out_of_bounds(bad));
                }
                Ok(list.clone())
            }
        }
    }

    /// Whether the indexed dimension survives in the result.
    pub fn keeps_dim(&self) -> bool {
        !matches!(self, Index::At(_))
    }
}

/// Copies a 2-D view into a [`faer`] matrix.
fn view_to_mat(view: ArrayViewD<'_, f64>) -> Result<Mat<f64>> {
    let shape = view.shape().to_vec();
    let view = view
        .into_dimensionality::<Ix2>()
        .map_err(|_| invalid_arguments("Tensor", format!("expected a matrix; got shape {shape:?}")))?;
    Ok(Mat::from_fn(view.nrows(), view.ncols(), |i, j| view[(i, j)]))
}

fn ensure_finite(x: &Mat<f64>, operation: &str) -> Result<()> {
    let finite = (0..x.nrows()).all(|i| (0..x.ncols()).all(|j| x[(i, j)].is_finite()));
    if finite {
        Ok(())
    } else {
        Err(LinearOperatorErrorKind::Numerical(format!(
            "{operation} produced non-finite values; the matrix is singular"
        ))
        .into())
    }
}

/// An immutable N-dimensional array of `f64` in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: ArcArray<f64, IxDyn>,
}

impl Tensor {
    /// Wraps an array, copying it into standard layout if needed.
    fn from_array(array: ArrayD<f64>) -> Self {
        let array = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned()
        };
        Self {
            data: array.into_shared(),
        }
    }

    /// Creates a tensor from a shape and its row-major data.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(invalid_arguments(
                "Tensor",
                format!("shape {shape:?} needs {numel} elements but {} were given", data.len()),
            ));
        }
        let array = ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map_err(|e| invalid_arguments("Tensor", format!("cannot build shape {shape:?}: {e}")))?;
        Ok(Self::from_array(array))
    }

    /// A 0-dimensional tensor holding `value`.
    pub fn scalar(value: f64) -> Self {
        Self::full(&[], value)
    }

    pub fn full(shape: &[usize], value: f64) -> Self {
        Self::from_array(ArrayD::from_elem(IxDyn(shape), value))
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// The `n x n` identity matrix.
    pub fn eye(n: usize) -> Self {
        Self::from_array(ndarray::Array2::eye(n).into_dyn())
    }

    /// Creates a tensor by evaluating `f` at every multi-index, in row-major order.
    pub fn from_fn(shape: &[usize], mut f: impl FnMut(&[usize]) -> f64) -> Self {
        Self::from_array(ArrayD::from_shape_fn(IxDyn(shape), |idx| f(idx.slice())))
    }

    /// Copies a [`faer`] matrix into a 2-D tensor.
    pub fn from_mat(mat: &Mat<f64>) -> Self {
        let (rows, cols) = (mat.nrows(), mat.ncols());
        Self::from_fn(&[rows, cols], |idx| mat[(idx[0], idx[1])])
    }

    /// Stacks equally sized matrices into a tensor with the given batch shape.
    pub fn from_matrices(batch_shape: &[usize], mats: &[Mat<f64>]) -> Result<Self> {
        let num_batches: usize = batch_shape.iter().product();
        if mats.len() != num_batches {
            return Err(invalid_arguments(
                "Tensor",
                format!(
                    "batch shape {batch_shape:?} needs {num_batches} matrices but {} were given",
                    mats.len()
                ),
            ));
        }
        let (rows, cols) = mats.first().map_or((0, 0), |m| (m.nrows(), m.ncols()));

        let mut data = Vec::with_capacity(num_batches * rows * cols);
        for mat in mats {
            if mat.nrows() != rows || mat.ncols() != cols {
                return Err(shape_mismatch(
                    "from_matrices",
                    &[rows, cols],
                    &[mat.nrows(), mat.ncols()],
                ));
            }
            for i in 0..rows {
                for j in 0..cols {
                    data.push(mat[(i, j)]);
                }
            }
        }

        let mut shape = batch_shape.to_vec();
        shape.extend([rows, cols]);
        Self::new(shape, data)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// The elements in row-major order.
    pub fn data(&self) -> &[f64] {
        // Every constructor stores standard layout.
        self.data.as_slice().unwrap_or_default()
    }

    /// Whether both tensors share the same storage.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        self.data.as_ptr() == other.data.as_ptr()
    }

    /// The single value of a one-element tensor.
    pub fn item(&self) -> Result<f64> {
        match self.data.iter().next() {
            Some(&value) if self.numel() == 1 => Ok(value),
            _ => Err(invalid_arguments(
                "Tensor",
                format!("item() needs exactly one element; shape is {:?}", self.shape()),
            )),
        }
    }

    /// Leading dimensions of a tensor with at least two dimensions.
    pub fn batch_shape(&self) -> &[usize] {
        &self.shape()[..self.ndim().saturating_sub(2)]
    }

    fn require_matrix(&self, operation: &'static str) -> Result<(usize, usize)> {
        match *self.shape() {
            [.., rows, cols] => Ok((rows, cols)),
            _ => Err(invalid_arguments(
                "Tensor",
                format!("{operation} needs at least two dimensions; shape is {:?}", self.shape()),
            )),
        }
    }

    fn require_dim(&self, dim: usize) -> Result<()> {
        if dim < self.ndim() {
            Ok(())
        } else {
            Err(LinearOperatorErrorKind::IndexOutOfBounds {
                index: dim,
                dim,
                size: self.ndim(),
            }
            .into())
        }
    }

    /// Copies the matrix at flat batch position `batch` into a [`faer`] matrix.
    pub fn matrix_at(&self, batch: usize) -> Result<Mat<f64>> {
        let (rows, cols) = self.require_matrix("matrix_at")?;
        let num_batches: usize = self.batch_shape().iter().product();
        if batch >= num_batches {
            return Err(LinearOperatorErrorKind::IndexOutOfBounds {
                index: batch,
                dim: 0,
                size: num_batches,
            }
            .into());
        }
        let stacked = [num_batches, rows, cols];
        let view = self
            .data
            .view()
            .into_shape_with_order(IxDyn(&stacked))
            .map_err(|_| shape_mismatch("matrix_at", self.shape(), &stacked))?;
        view_to_mat(view.index_axis_move(Axis(0), batch))
    }

    /// The matrices of `self` broadcast to the batch shape `batch`, in row-major order.
    fn batch_matrices(&self, batch: &[usize], operation: &'static str) -> Result<Vec<Mat<f64>>> {
        let (rows, cols) = self.require_matrix(operation)?;
        let mut target = batch.to_vec();
        target.extend([rows, cols]);
        let view = self
            .data
            .broadcast(IxDyn(&target))
            .ok_or_else(|| shape_mismatch(operation, self.shape(), &target))?;

        batch_indices(batch)
            .map(|index| {
                let mut member = view.clone();
                for &i in &index {
                    member = member.index_axis_move(Axis(0), i);
                }
                view_to_mat(member)
            })
            .collect()
    }

    /// A view of the same data under a new shape with the same number of elements.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != self.numel() {
            return Err(shape_mismatch("reshape", self.shape(), shape));
        }
        let data = self
            .data
            .clone()
            .into_shape_with_order(IxDyn(shape))
            .map_err(|_| shape_mismatch("reshape", self.shape(), shape))?;
        Ok(Self { data })
    }

    /// Inserts a dimension of size 1 at position `dim` (`dim <= ndim`).
    pub fn unsqueeze(&self, dim: usize) -> Result<Self> {
        if dim > self.ndim() {
            return Err(LinearOperatorErrorKind::IndexOutOfBounds {
                index: dim,
                dim,
                size: self.ndim() + 1,
            }
            .into());
        }
        Ok(Self {
            data: self.data.clone().insert_axis(Axis(dim)),
        })
    }

    /// Removes dimension `dim`, which must have size 1.
    pub fn squeeze(&self, dim: usize) -> Result<Self> {
        if self.shape().get(dim) != Some(&1) {
            return Err(invalid_arguments(
                "Tensor",
                format!("cannot squeeze dimension {dim} of shape {:?}", self.shape()),
            ));
        }
        Ok(Self {
            data: self.data.clone().index_axis_move(Axis(dim), 0),
        })
    }

    /// Broadcasts (expands) the tensor to `target`, copying data where it repeats.
    pub fn broadcast_to(&self, target: &[usize]) -> Result<Self> {
        if self.shape() == target {
            return Ok(self.clone());
        }
        let view = self
            .data
            .broadcast(IxDyn(target))
            .ok_or_else(|| shape_mismatch("expand", self.shape(), target))?;
        Ok(Self::from_array(view.to_owned()))
    }

    fn zip_with(&self, other: &Tensor, operation: &'static str, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        let mismatch = || shape_mismatch(operation, self.shape(), other.shape());
        let shape = broadcast_shapes(self.shape(), other.shape()).ok_or_else(mismatch)?;
        let lhs = self.data.broadcast(IxDyn(&shape)).ok_or_else(mismatch)?;
        let rhs = other.data.broadcast(IxDyn(&shape)).ok_or_else(mismatch)?;
        Ok(Self::from_array(
            Zip::from(lhs).and(rhs).map_collect(|&a, &b| f(a, b)),
        ))
    }

    /// Elementwise product with broadcasting.
    pub fn mul(&self, other: &Tensor) -> Result<Self> {
        self.zip_with(other, "mul", |a, b| a * b)
    }

    /// Elementwise sum with broadcasting.
    pub fn add(&self, other: &Tensor) -> Result<Self> {
        self.zip_with(other, "add", |a, b| a + b)
    }

    /// Elementwise difference with broadcasting.
    pub fn sub(&self, other: &Tensor) -> Result<Self> {
        self.zip_with(other, "sub", |a, b| a - b)
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::from_array(self.data.mapv(f))
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map(|x| x * factor)
    }

    /// Sums over dimension `dim`, removing it.
    pub fn sum_dim(&self, dim: usize) -> Result<Self> {
        self.require_dim(dim)?;
        Ok(Self::from_array(self.data.sum_axis(Axis(dim))))
    }

    /// Multiplies over dimension `dim`, removing it. An empty dimension gives ones.
    pub fn prod_dim(&self, dim: usize) -> Result<Self> {
        self.require_dim(dim)?;
        Ok(Self::from_array(
            self.data.map_axis(Axis(dim), |lane| lane.product()),
        ))
    }

    /// Sums over broadcast dimensions so the result has shape `target`.
    ///
    /// This is the reduction that undoes [`Tensor::broadcast_to`]: extra leading
    /// dimensions are summed away and dimensions where `target` has size 1 are summed
    /// and kept.
    pub fn sum_to_shape(&self, target: &[usize]) -> Result<Self> {
        if self.shape() == target {
            return Ok(self.clone());
        }
        if target.len() > self.ndim() || broadcast_shapes(target, self.shape()).as_deref() != Some(self.shape()) {
            return Err(shape_mismatch("sum_to_shape", self.shape(), target));
        }

        let mut res = self.clone();
        while res.ndim() > target.len() {
            res = res.sum_dim(0)?;
        }
        for (d, &size) in target.iter().enumerate() {
            if size == 1 && res.shape()[d] != 1 {
                res = res.sum_dim(d)?.unsqueeze(d)?;
            }
        }
        Ok(res)
    }

    /// Swaps the trailing two dimensions.
    pub fn transpose(&self) -> Result<Self> {
        self.require_matrix("transpose")?;
        let ndim = self.ndim();
        let mut view = self.data.view();
        view.swap_axes(ndim - 2, ndim - 1);
        Ok(Self::from_array(view.as_standard_layout().into_owned()))
    }

    /// The main diagonal of every matrix, with shape `(*batch, min(rows, cols))`.
    pub fn diagonal(&self) -> Result<Self> {
        let (rows, cols) = self.require_matrix("diagonal")?;
        let mut shape = self.batch_shape().to_vec();
        shape.push(rows.min(cols));

        let mut position = vec![0; self.ndim()];
        Ok(Self::from_fn(&shape, |idx| {
            let (batch, i) = idx.split_at(idx.len() - 1);
            position[..batch.len()].copy_from_slice(batch);
            position[batch.len()] = i[0];
            position[batch.len() + 1] = i[0];
            self.data[&position[..]]
        }))
    }

    /// Batched matrix product with broadcasting over batch dimensions.
    ///
    /// A 1-D left operand is treated as a row vector and a 1-D right operand as a
    /// column vector; the promoted dimension is dropped from the result.
    pub fn matmul(&self, other: &Tensor) -> Result<Self> {
        let out_shape = matmul_broadcast_shape(self.shape(), other.shape())?;
        let lhs = if self.ndim() == 1 { self.unsqueeze(0)? } else { self.clone() };
        let rhs = if other.ndim() == 1 { other.unsqueeze(1)? } else { other.clone() };

        let batch = broadcast_shapes(lhs.batch_shape(), rhs.batch_shape())
            .ok_or_else(|| shape_mismatch("matmul", self.shape(), other.shape()))?;
        let products: Vec<Mat<f64>> = lhs
            .batch_matrices(&batch, "matmul")?
            .into_iter()
            .zip(rhs.batch_matrices(&batch, "matmul")?)
            .map(|(a, b)| &a * &b)
            .collect();
        Self::from_matrices(&batch, &products)?.reshape(&out_shape)
    }

    /// Selects a sub-tensor with one [`Index`] per leading dimension; missing
    /// trailing indices default to [`Index::Full`].
    pub fn index(&self, indices: &[Index]) -> Result<Self> {
        if indices.len() > self.ndim() {
            return Err(invalid_arguments(
                "Tensor",
                format!("{} indices given for a tensor of shape {:?}", indices.len(), self.shape()),
            ));
        }

        let mut selected = self.data.to_owned();
        for (dim, index) in indices.iter().enumerate() {
            if *index == Index::Full {
                continue;
            }
            let positions = index.positions(dim, self.shape()[dim])?;
            selected = selected.select(Axis(dim), &positions);
        }
        for (dim, index) in indices.iter().enumerate().rev() {
            if !index.keeps_dim() {
                selected = selected.index_axis_move(Axis(dim), 0);
            }
        }
        Ok(Self::from_array(selected))
    }

    /// Gathers individual entries. `indices` holds one index vector per dimension; the
    /// vectors must share a length `L` (length-1 vectors broadcast, also against an
    /// empty `L`). Returns a 1-D tensor of length `L`.
    pub fn gather(&self, indices: &[Vec<usize>]) -> Result<Self> {
        if indices.len() != self.ndim() {
            return Err(invalid_arguments(
                "Tensor",
                format!("gather needs {} index vectors; got {}", self.ndim(), indices.len()),
            ));
        }
        let vectors: Vec<&[usize]> = indices.iter().map(Vec::as_slice).collect();
        let len = broadcast_index_len(&vectors)?;

        let mut position = vec![0; self.ndim()];
        let mut data = Vec::with_capacity(len);
        for t in 0..len {
            for (dim, idx) in indices.iter().enumerate() {
                let i = if idx.len() == 1 { idx[0] } else { idx[t] };
                let size = self.shape()[dim];
                if i >= size {
                    return Err(LinearOperatorErrorKind::IndexOutOfBounds { index: i, dim, size }.into());
                }
                position[dim] = i;
            }
            data.push(self.data[&position[..]]);
        }
        Self::new(vec![len], data)
    }

    /// Concatenates tensors along dimension `dim`; all other dimensions must agree.
    pub fn cat(tensors: &[Tensor], dim: usize) -> Result<Self> {
        let Some(first) = tensors.first() else {
            return Err(invalid_arguments("Tensor", "cat needs at least one tensor"));
        };
        if dim >= first.ndim() {
            return Err(invalid_arguments(
                "Tensor",
                format!("cat dimension {dim} is out of range for shape {:?}", first.shape()),
            ));
        }
        let views: Vec<ArrayViewD<'_, f64>> = tensors.iter().map(|t| t.data.view()).collect();
        let joined = ndarray::concatenate(Axis(dim), &views).map_err(|_| {
            let bad = tensors
                .iter()
                .find(|t| t.ndim() != first.ndim() || (0..t.ndim()).any(|d| d != dim && t.shape()[d] != first.shape()[d]))
                .unwrap_or(first);
            shape_mismatch("cat", first.shape(), bad.shape())
        })?;
        Ok(Self::from_array(joined))
    }

    /// Solves every batch of `self` against `rhs` with `solve_one`, broadcasting batch
    /// dimensions. A 1-D `rhs` is a single column and stays 1-D in the result.
    fn batched_solve(
        &self,
        rhs: &Tensor,
        operation: &'static str,
        solve_one: impl Fn(&Mat<f64>, Mat<f64>) -> Mat<f64>,
    ) -> Result<Self> {
        let (rows, cols) = self.require_matrix(operation)?;
        if rows != cols {
            return Err(shape_mismatch(operation, self.shape(), rhs.shape()));
        }
        let is_vector = rhs.ndim() == 1;
        let rhs = if is_vector { rhs.unsqueeze(1)? } else { rhs.clone() };
        let out_shape = matmul_broadcast_shape(self.shape(), rhs.shape())?;

        let batch = &out_shape[..out_shape.len() - 2];
        let solutions = self
            .batch_matrices(batch, operation)?
            .iter()
            .zip(rhs.batch_matrices(batch, operation)?)
            .map(|(a, b)| {
                let x = solve_one(a, b);
                ensure_finite(&x, operation)?;
                Ok(x)
            })
            .collect::<Result<Vec<_>>>()?;

        let res = Self::from_matrices(batch, &solutions)?;
        if is_vector { res.squeeze(res.ndim() - 1) } else { Ok(res) }
    }

    /// Solves `self @ x = rhs` for every batch with an LU factorization.
    pub fn solve(&self, rhs: &Tensor) -> Result<Self> {
        self.batched_solve(rhs, "solve", |a, b| a.as_ref().partial_piv_lu().solve(&b))
    }

    /// Solves `A x = rhs` where `self` is a Cholesky factor of `A`: lower triangular
    /// `L` with `A = L Lᵗ`, or upper triangular `U` with `A = Uᵗ U` when `upper`.
    ///
    /// Runs one forward and one backward triangular substitution per batch; only the
    /// factor's triangle is read.
    pub fn cholesky_solve(&self, rhs: &Tensor, upper: bool) -> Result<Self> {
        self.batched_solve(rhs, "cholesky_solve", |factor, mut x| {
            let factor = factor.as_ref();
            if upper {
                solve_lower_triangular_in_place(factor.transpose(), x.as_mut(), Par::Seq);
                solve_upper_triangular_in_place(factor, x.as_mut(), Par::Seq);
            } else {
                solve_lower_triangular_in_place(factor, x.as_mut(), Par::Seq);
                solve_upper_triangular_in_place(factor.transpose(), x.as_mut(), Par::Seq);
            }
            x
        })
    }

    /// Largest absolute elementwise difference between two equally shaped tensors.
    pub fn max_abs_diff(&self, other: &Tensor) -> Result<f64> {
        if self.shape() != other.shape() {
            return Err(shape_mismatch("max_abs_diff", self.shape(), other.shape()));
        }
        Ok(Zip::from(&self.data)
            .and(&other.data)
            .fold(0.0_f64, |acc, &a, &b| acc.max((a - b).abs())))
    }

    /// Whether two tensors have the same shape and agree within `tol`.
    pub fn allclose(&self, other: &Tensor, tol: f64) -> bool {
        self.max_abs_diff(other).is_ok_and(|diff| diff <= tol)
    }
}
