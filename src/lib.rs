//! Lazy, structured linear operators with batch broadcasting.
//!
//! A [`LinearOperator`] stands in for a (batch of) matrices without necessarily storing
//! them. Variants keep the structure that makes a matrix cheap to work with, such as a
//! low-rank root `R Rᵗ` or an elementwise product of two such roots, and only
//! materialize it when [`Operator::to_dense`] is called. Gradients of quadratic forms
//! `trace(Uᵗ A V)` flow to every variant's construction arguments through
//! [`Operator::quad_form_derivative`] without densifying.
//!
//! The batched [`Tensor`] backend stores its data in [`ndarray`] arrays and hands the
//! per-matrix kernels (products, eigendecompositions, LU and triangular solves) to
//! [`faer`].
//!
//! ## Operators
//!
//! - [`DenseLinearOperator`]: an explicit tensor.
//! - [`RootLinearOperator`]: `R Rᵗ` for a root factor `R`.
//! - [`MulLinearOperator`]: the elementwise product `A ⊙ B`, multiplied through the
//!   root of `A` in `O(n·r·m)` instead of `O(n²·m)`.
//! - [`SumLinearOperator`] and [`ConstantMulLinearOperator`]: lazy sums and scalings
//!   produced by [`Operator::add`] and [`Operator::mul`].
//!
//! ## Example Usage
//!
//! ```rust
//! use linear_operator::{Operator, RootLinearOperator, Tensor, to_operator};
//!
//! // Two rank-one PSD matrices, v vᵗ and w wᵗ.
//! let v = Tensor::new(vec![3, 1], vec![1.0, 2.0, 3.0]).unwrap();
//! let w = Tensor::new(vec![3, 1], vec![1.0, 0.0, -1.0]).unwrap();
//! let a = Operator::new(RootLinearOperator::new(v).unwrap());
//! let b = Operator::new(RootLinearOperator::new(w).unwrap());
//!
//! // A ⊙ B is never formed; the product runs through the roots.
//! let product = a.mul(&b).unwrap();
//! let x = Tensor::full(&[3], 1.0);
//! let fast = product.matmul(&x).unwrap();
//!
//! let naive = a.to_dense().unwrap().mul(&b.to_dense().unwrap()).unwrap().matmul(&x).unwrap();
//! assert!(fast.allclose(&naive, 1e-12));
//!
//! // Raw tensors are wrapped, operators pass through.
//! let dense = to_operator(Tensor::eye(3)).unwrap();
//! assert!(to_operator(&dense).unwrap().ptr_eq(&dense));
//! ```
//!
//! ## Settings
//!
//! Path choices (the dense fallback of elementwise products, exact versus Lanczos root
//! decompositions) are controlled by [`Settings`], which can also be read from
//! `LINEAR_OPERATOR_*` environment variables with [`Settings::from_env`].

pub mod algorithms;
pub mod error;
pub mod operators;
pub mod settings;
pub mod tensor;
pub mod utils;

pub use error::{LinearOperatorError, LinearOperatorErrorKind, Result};
pub use operators::{
    ConstantMulLinearOperator, DenseLinearOperator, Index, Indexed, LinearOperator, MulLinearOperator, Operand,
    Operator, OperatorArg, RootLinearOperator, SumLinearOperator, to_operator,
};
pub use settings::{RootDecompositionSettings, Settings};
pub use tensor::Tensor;
