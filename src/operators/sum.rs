//! Lazy sum of equally sized operators.

use super::{LinearOperator, Operand, Operator, OperatorArg};
use crate::{
    error::{Result, invalid_arguments},
    tensor::Tensor,
};

#[derive(Debug, Clone)]
pub struct SumLinearOperator {
    operators: Vec<Operator>,
}

impl SumLinearOperator {
    const NAME: &'static str = "SumLinearOperator";

    pub fn check_args(operators: &[Operator]) -> Option<String> {
        let Some(first) = operators.first() else {
            return Some("SumLinearOperator expects at least one LinearOperator.".to_string());
        };
        let size = first.size();
        operators.iter().any(|op| op.size() != size).then(|| {
            let sizes: Vec<Vec<usize>> = operators.iter().map(Operator::size).collect();
            format!("SumLinearOperator expects LinearOperators of the same size: got {sizes:?}.")
        })
    }

    /// Builds the sum. Nested sums are flattened into one.
    pub fn new(operators: Vec<Operator>) -> Result<Self> {
        if let Some(reason) = Self::check_args(&operators) {
            return Err(invalid_arguments(Self::NAME, reason));
        }
        let operators = operators
            .into_iter()
            .flat_map(|op| {
                if op.name() != Self::NAME {
                    return vec![op];
                }
                op.inner()
                    .args()
                    .into_iter()
                    .filter_map(|arg| match arg {
                        OperatorArg::Operator(child) => Some(child),
                        OperatorArg::Tensor(_) => None,
                    })
                    .collect()
            })
            .collect();
        Ok(Self { operators })
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    fn sum_each(&self, f: impl Fn(&Operator) -> Result<Tensor>) -> Result<Tensor> {
        let mut operators = self.operators.iter();
        let mut acc = match operators.next() {
            Some(first) => f(first)?,
            None => return Err(invalid_arguments(Self::NAME, "empty sum")),
        };
        for op in operators {
            acc = acc.add(&f(op)?)?;
        }
        Ok(acc)
    }
}

impl LinearOperator for SumLinearOperator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> Vec<usize> {
        self.operators[0].size()
    }

    fn args(&self) -> Vec<OperatorArg> {
        self.operators.iter().cloned().map(OperatorArg::Operator).collect()
    }

    fn rebuild(&self, args: Vec<OperatorArg>) -> Result<Operator> {
        let operators = args
            .into_iter()
            .map(|arg| match arg {
                OperatorArg::Operator(op) => Ok(op),
                OperatorArg::Tensor(t) => super::to_operator(t),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Operator::new(Self::new(operators)?))
    }

    fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.sum_each(|op| op.matmul(rhs))
    }

    fn transpose_matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.sum_each(|op| op.transpose_matmul(rhs))
    }

    fn transpose(&self, _this: &Operator) -> Result<Operator> {
        let operators = self
            .operators
            .iter()
            .map(Operator::transpose)
            .collect::<Result<Vec<_>>>()?;
        Ok(Operator::new(Self::new(operators)?))
    }

    fn quad_form_derivative(&self, left_vecs: &Tensor, right_vecs: &Tensor) -> Result<Vec<Tensor>> {
        let mut grads = Vec::new();
        for op in &self.operators {
            grads.extend(op.quad_form_derivative(left_vecs, right_vecs)?);
        }
        Ok(grads)
    }

    fn to_dense(&self) -> Result<Tensor> {
        self.sum_each(Operator::to_dense)
    }

    fn diagonal(&self) -> Result<Tensor> {
        self.sum_each(Operator::diagonal)
    }

    fn get_indices(&self, rows: &[usize], cols: &[usize], batch: &[Vec<usize>]) -> Result<Tensor> {
        self.sum_each(|op| op.get_indices(rows, cols, batch))
    }

    fn try_add(&self, _this: &Operator, other: &Operand) -> Result<Option<Operator>> {
        let Operand::Operator(other) = other else {
            return Ok(None);
        };
        if other.size() != self.size() {
            return Ok(None);
        }
        let mut operators = self.operators.clone();
        operators.push(other.clone());
        Ok(Some(Operator::new(Self::new(operators)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{RootLinearOperator, to_operator};

    #[test]
    fn test_nested_sums_flatten() {
        let a = to_operator(Tensor::eye(2)).unwrap();
        let r = Operator::new(RootLinearOperator::new(Tensor::full(&[2, 1], 1.0)).unwrap());
        let sum = a.add(&r).unwrap();
        let nested = Operator::new(SumLinearOperator::new(vec![sum.clone(), r.clone()]).unwrap());
        assert_eq!(nested.inner().args().len(), 3);
        assert_eq!(nested.to_dense().unwrap().data(), &[3.0, 2.0, 2.0, 3.0]);
        assert_eq!(nested.diagonal().unwrap().data(), &[3.0, 3.0]);
        assert_eq!(nested.quad_form_derivative(&Tensor::full(&[2], 1.0), &Tensor::full(&[2], 1.0)).unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_mismatched_sizes() {
        let a = to_operator(Tensor::eye(2)).unwrap();
        let b = to_operator(Tensor::eye(3)).unwrap();
        let err = SumLinearOperator::new(vec![a, b]).unwrap_err();
        assert!(err.to_string().contains("[[2, 2], [3, 3]]"));
    }
}
