//! This module defines the custom error types for the library.
//!
//! Every failure that can arise while constructing or combining structured operators
//! is funnelled into a single public type, [`LinearOperatorError`], which wraps the
//! private-by-convention [`LinearOperatorErrorKind`].
//!
//! Using the [`thiserror`] crate keeps the `Display` implementations next to the variants.
//! Note that [`faer::linalg::evd::EvdError`] does not implement the standard
//! [`std::error::Error`] trait, so we wrap it manually to provide a compatible error type.
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LinearOperatorError>;

/// Represents all possible errors that can occur while building or applying an operator.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct LinearOperatorError(#[from] LinearOperatorErrorKind);

impl LinearOperatorError {
    /// Returns the underlying error kind, so callers can match on the failure category.
    pub fn kind(&self) -> &LinearOperatorErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub enum LinearOperatorErrorKind {
    /// A variant's argument validation rejected its construction arguments.
    #[error("Invalid arguments for {operator}: {reason}")]
    InvalidArguments {
        operator: &'static str,
        reason: String,
    },

    /// The operands of an operation cannot be broadcast or matched.
    #[error("Shape mismatch in {operation}: {left:?} and {right:?} are incompatible.")]
    ShapeMismatch {
        operation: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// An operand of a type the operation cannot combine with.
    #[error("Unsupported operand for {operation}: object of type {type_name} cannot be made into a LinearOperator.")]
    UnsupportedType {
        operation: &'static str,
        type_name: &'static str,
    },

    /// An index fell outside the dimension it addresses.
    #[error("Index {index} is out of bounds for dimension {dim} of size {size}.")]
    IndexOutOfBounds {
        index: usize,
        dim: usize,
        size: usize,
    },

    /// Wraps an error originating from [`faer`]'s eigendecomposition module.
    #[error("A numerical error occurred during an eigendecomposition: {0:?}")]
    EvdError(faer::linalg::evd::EvdError),

    /// Any other numerical failure reported by the dense backend.
    #[error("Numerical error: {0}")]
    Numerical(String),
}

impl From<faer::linalg::evd::EvdError> for LinearOperatorError {
    fn from(err: faer::linalg::evd::EvdError) -> Self {
        LinearOperatorError(LinearOperatorErrorKind::EvdError(err))
    }
}

// Manually implement PartialEq for the public error type.
// We compare the inner `LinearOperatorErrorKind`.
impl PartialEq for LinearOperatorError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

pub(crate) fn invalid_arguments(operator: &'static str, reason: impl Into<String>) -> LinearOperatorError {
    LinearOperatorErrorKind::InvalidArguments {
        operator,
        reason: reason.into(),
    }
    .into()
}

pub(crate) fn shape_mismatch(operation: &'static str, left: &[usize], right: &[usize]) -> LinearOperatorError {
    LinearOperatorErrorKind::ShapeMismatch {
        operation,
        left: left.to_vec(),
        right: right.to_vec(),
    }
    .into()
}
