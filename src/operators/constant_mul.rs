//! Lazy scaling of an operator by a scalar.

use super::{Index, Indexed, LinearOperator, Operator, OperatorArg};
use crate::{
    error::{Result, invalid_arguments},
    tensor::Tensor,
};

/// `constant · base`.
#[derive(Debug, Clone)]
pub struct ConstantMulLinearOperator {
    base: Operator,
    constant: f64,
}

impl ConstantMulLinearOperator {
    const NAME: &'static str = "ConstantMulLinearOperator";

    pub fn check_args(constant: f64) -> Option<String> {
        (!constant.is_finite()).then(|| format!("ConstantMulLinearOperator expects a finite constant - got {constant}."))
    }

    pub fn new(base: Operator, constant: f64) -> Result<Self> {
        if let Some(reason) = Self::check_args(constant) {
            return Err(invalid_arguments(Self::NAME, reason));
        }
        Ok(Self { base, constant })
    }

    pub fn base(&self) -> &Operator {
        &self.base
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }
}

impl LinearOperator for ConstantMulLinearOperator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> Vec<usize> {
        self.base.size()
    }

    fn args(&self) -> Vec<OperatorArg> {
        vec![
            OperatorArg::Operator(self.base.clone()),
            OperatorArg::Tensor(Tensor::scalar(self.constant)),
        ]
    }

    fn rebuild(&self, args: Vec<OperatorArg>) -> Result<Operator> {
        match <[OperatorArg; 2]>::try_from(args) {
            Ok([OperatorArg::Operator(base), OperatorArg::Tensor(constant)]) => {
                Ok(Operator::new(Self::new(base, constant.item()?)?))
            }
            _ => Err(invalid_arguments(Self::NAME, "expects an operator and a scalar tensor")),
        }
    }

    fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        Ok(self.base.matmul(rhs)?.scale(self.constant))
    }

    fn transpose_matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        Ok(self.base.transpose_matmul(rhs)?.scale(self.constant))
    }

    fn transpose(&self, _this: &Operator) -> Result<Operator> {
        Ok(Operator::new(Self::new(self.base.transpose()?, self.constant)?))
    }

    /// Gradients of the base scaled by the constant, followed by the gradient with
    /// respect to the constant itself, `Σ U ⊙ (base V)`.
    fn quad_form_derivative(&self, left_vecs: &Tensor, right_vecs: &Tensor) -> Result<Vec<Tensor>> {
        let mut grads: Vec<Tensor> = self
            .base
            .quad_form_derivative(left_vecs, right_vecs)?
            .into_iter()
            .map(|g| g.scale(self.constant))
            .collect();
        let base_right = self.base.matmul(right_vecs)?;
        let constant_grad = left_vecs.mul(&base_right)?.data().iter().sum();
        grads.push(Tensor::scalar(constant_grad));
        Ok(grads)
    }

    fn to_dense(&self) -> Result<Tensor> {
        Ok(self.base.to_dense()?.scale(self.constant))
    }

    fn diagonal(&self) -> Result<Tensor> {
        Ok(self.base.diagonal()?.scale(self.constant))
    }

    fn get_indices(&self, rows: &[usize], cols: &[usize], batch: &[Vec<usize>]) -> Result<Tensor> {
        Ok(self.base.get_indices(rows, cols, batch)?.scale(self.constant))
    }

    fn getitem(&self, rows: &Index, cols: &Index, batch: &[Index]) -> Result<Indexed> {
        match self.base.getitem(rows, cols, batch)? {
            Indexed::Operator(base) => Ok(Indexed::Operator(Operator::new(Self::new(base, self.constant)?))),
            Indexed::Tensor(t) => Ok(Indexed::Tensor(t.scale(self.constant))),
        }
    }

    fn mul_constant(&self, _this: &Operator, constant: f64) -> Result<Operator> {
        Ok(Operator::new(Self::new(self.base.clone(), self.constant * constant)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{RootLinearOperator, to_operator};

    #[test]
    fn test_scales_lazily() {
        let r = Tensor::new(vec![2, 1], vec![1.0, 2.0]).unwrap();
        let base = Operator::new(RootLinearOperator::new(r).unwrap());
        let op = base.mul(-2.0).unwrap();
        assert_eq!(op.name(), "ConstantMulLinearOperator");
        assert_eq!(op.to_dense().unwrap().data(), &[-2.0, -4.0, -4.0, -8.0]);
        assert_eq!(op.diagonal().unwrap().data(), &[-2.0, -8.0]);

        let twice = op.mul(0.5).unwrap();
        assert_eq!(twice.to_dense().unwrap().data(), &[-1.0, -2.0, -2.0, -4.0]);
    }

    #[test]
    fn test_quad_form_derivative_includes_constant() {
        let a = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let base = to_operator(a).unwrap();
        let op = Operator::new(ConstantMulLinearOperator::new(base, 3.0).unwrap());
        let u = Tensor::new(vec![2, 1], vec![1.0, 1.0]).unwrap();
        let v = Tensor::new(vec![2, 1], vec![1.0, 0.0]).unwrap();
        let grads = op.quad_form_derivative(&u, &v).unwrap();
        assert_eq!(grads.len(), 2);
        assert_eq!(grads[0].data(), &[3.0, 0.0, 3.0, 0.0]);
        // uᵗ A v = 1 + 3.
        assert_eq!(grads[1].item().unwrap(), 4.0);
    }

    #[test]
    fn test_rejects_non_finite_constant() {
        let base = to_operator(Tensor::eye(2)).unwrap();
        assert!(ConstantMulLinearOperator::new(base, f64::NAN).is_err());
    }
}
