//! Integration test suite to verify the mathematical correctness of the structured operators.
//!
//! # Test Methodology
//!
//! Every structured code path has a naive dense counterpart that is easy to trust: a
//! product `A ⊙ B` can be formed entry by entry, a root `R` can be multiplied out as
//! `R Rᵗ`, and the gradient of `trace(Uᵗ A V)` with respect to a dense `A` is `U Vᵗ`.
//! The tests below build random problems with a fixed seed, run the structured path,
//! and compare against the dense ground truth within a tolerance.

use anyhow::{Result, ensure};
use linear_operator::{
    DenseLinearOperator, Index, LinearOperator, LinearOperatorErrorKind, MulLinearOperator, Operator, RootLinearOperator, Settings,
    Tensor, to_operator,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Tolerance for paths that are exact up to floating-point rounding.
const EXACT_TOLERANCE: f64 = 1e-9;

/// Tolerance for root decompositions computed numerically.
const ROOT_TOLERANCE: f64 = 1e-7;

fn random_tensor(rng: &mut StdRng, shape: &[usize]) -> Tensor {
    Tensor::from_fn(shape, |_| rng.random::<f64>() - 0.5)
}

fn random_root(rng: &mut StdRng, shape: &[usize]) -> Result<Operator> {
    Ok(Operator::new(RootLinearOperator::new(random_tensor(rng, shape))?))
}

/// A dense symmetric positive definite matrix `B Bᵗ + I`.
fn random_spd(rng: &mut StdRng, n: usize) -> Result<Tensor> {
    let b = random_tensor(rng, &[n, n]);
    Ok(b.matmul(&b.transpose()?)?.add(&Tensor::eye(n))?)
}

fn naive_product(left: &Operator, right: &Operator) -> Result<Tensor> {
    Ok(left.to_dense()?.mul(&right.to_dense()?)?)
}

// --- Elementwise products through roots ---
// Each case compares `(A ⊙ B) X` computed through the root of `A` against the dense
// product, for a range of sizes, ranks, batch shapes and right-hand sides.

macro_rules! generate_mul_matmul_test {
    ($test_name:ident, $batch:expr, $n:expr, $rank_a:expr, $rank_b:expr, $rhs_shape:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let mut rng = StdRng::seed_from_u64(42);
            let batch: &[usize] = &$batch;

            let mut shape_a = batch.to_vec();
            shape_a.extend([$n, $rank_a]);
            let mut shape_b = batch.to_vec();
            shape_b.extend([$n, $rank_b]);
            let a = random_root(&mut rng, &shape_a)?;
            let b = random_root(&mut rng, &shape_b)?;

            let product = a.mul(&b)?;
            ensure!(product.name() == "MulLinearOperator", "expected a lazy product, got {}", product.name());

            let rhs = random_tensor(&mut rng, &$rhs_shape);
            let fast = product.matmul(&rhs)?;
            let expected = naive_product(&a, &b)?.matmul(&rhs)?;
            ensure!(
                fast.shape() == expected.shape(),
                "shape {:?} differs from {:?}",
                fast.shape(),
                expected.shape()
            );

            let err = fast.max_abs_diff(&expected)?;
            ensure!(err < EXACT_TOLERANCE, "root path error too high: {}", err);
            Ok(())
        }
    };
}

generate_mul_matmul_test!(test_mul_matmul_vector, [], 8, 2, 3, [8]);
generate_mul_matmul_test!(test_mul_matmul_matrix, [], 12, 4, 1, [12, 5]);
generate_mul_matmul_test!(test_mul_matmul_full_rank, [], 6, 6, 6, [6, 2]);
generate_mul_matmul_test!(test_mul_matmul_batched, [3], 7, 2, 2, [3, 7, 4]);
generate_mul_matmul_test!(test_mul_matmul_broadcast_rhs, [2], 5, 3, 2, [5, 3]);
generate_mul_matmul_test!(test_mul_matmul_broadcast_batches, [2], 4, 1, 2, [3, 1, 4, 2]);

#[test]
fn test_mul_of_dense_children_goes_through_roots() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let a = to_operator(random_spd(&mut rng, 10)?)?;
    let b = to_operator(random_spd(&mut rng, 10)?)?;

    let mul = MulLinearOperator::new(a.clone(), b.clone())?;
    ensure!(mul.uses_root_path(), "dense children should have been decomposed");

    let rhs = random_tensor(&mut rng, &[10, 3]);
    let expected = naive_product(&a, &b)?.matmul(&rhs)?;
    let err = Operator::new(mul).matmul(&rhs)?.max_abs_diff(&expected)?;
    ensure!(err < ROOT_TOLERANCE, "decomposed product error too high: {}", err);
    Ok(())
}

#[test]
fn test_dense_fallback_threshold() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let a = to_operator(random_spd(&mut rng, 6)?)?;
    let b = to_operator(random_spd(&mut rng, 6)?)?;
    let rhs = random_tensor(&mut rng, &[6]);
    let expected = naive_product(&a, &b)?.matmul(&rhs)?;

    for (fallback_size, root_path) in [(0, true), (5, true), (6, false), (100, false)] {
        let settings = Settings::default().with_dense_fallback_size(fallback_size);
        let mul = MulLinearOperator::with_settings(a.clone(), b.clone(), &settings)?;
        ensure!(
            mul.uses_root_path() == root_path,
            "fallback size {} chose the wrong path",
            fallback_size
        );
        let err = Operator::new(mul).matmul(&rhs)?.max_abs_diff(&expected)?;
        ensure!(err < ROOT_TOLERANCE, "fallback size {}: error {}", fallback_size, err);
    }
    Ok(())
}

#[test]
fn test_mul_diagonal_and_to_dense() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    let a = random_root(&mut rng, &[2, 6, 2])?;
    let b = random_root(&mut rng, &[2, 6, 3])?;
    let product = a.mul(&b)?;

    let expected_diag = a.diagonal()?.mul(&b.diagonal()?)?;
    let diag = product.diagonal()?;
    ensure!(diag.shape() == [2, 6], "diagonal shape {:?}", diag.shape());
    ensure!(diag.allclose(&expected_diag, EXACT_TOLERANCE), "diagonal differs from the product of diagonals");

    let dense = product.to_dense()?;
    ensure!(dense.allclose(&naive_product(&a, &b)?, EXACT_TOLERANCE), "materialization differs");

    // The second materialization is served from the cache: same storage, no recompute.
    let again = product.to_dense()?;
    ensure!(dense.ptr_eq(&again), "to_dense was recomputed");
    Ok(())
}

#[test]
fn test_mul_memo_counts_one_materialization() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    let mul = MulLinearOperator::new(random_root(&mut rng, &[5, 2])?, random_root(&mut rng, &[5, 2])?)?;
    let op = Operator::new(mul.clone());
    for _ in 0..3 {
        op.to_dense()?;
    }
    // `mul` shares nothing with the clone handed to `op`, so its cache is untouched.
    ensure!(mul.memo().is_empty(), "cache leaked between clones");

    let mul = MulLinearOperator::new(random_root(&mut rng, &[5, 2])?, random_root(&mut rng, &[5, 2])?)?;
    for _ in 0..3 {
        mul.to_dense()?;
    }
    let stats = mul.memo().stats();
    ensure!(stats.misses == 1 && stats.hits == 2, "unexpected cache stats {:?}", stats);
    Ok(())
}

#[test]
fn test_mul_get_indices_and_symmetric_slices() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let a = random_root(&mut rng, &[6, 2])?;
    let b = random_root(&mut rng, &[6, 2])?;
    let product = a.mul(&b)?;
    let dense = naive_product(&a, &b)?;

    let entries = product.get_indices(&[0, 5, 3], &[4, 5, 1], &[])?;
    let expected = dense.gather(&[vec![0, 5, 3], vec![4, 5, 1]])?;
    ensure!(entries.allclose(&expected, EXACT_TOLERANCE), "gathered entries differ");

    let rows = Index::List(vec![4, 1, 2]);
    let sliced = product.getitem(&rows, &rows, &[])?.into_operator()?;
    ensure!(sliced.name() == "MulLinearOperator", "symmetric slice lost its structure");
    let expected = dense.index(&[rows.clone(), rows])?;
    ensure!(sliced.to_dense()?.allclose(&expected, EXACT_TOLERANCE), "sliced product differs");
    Ok(())
}

#[test]
fn test_get_indices_without_entries() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(12);
    let a = random_root(&mut rng, &[2, 5, 2])?;
    let b = random_root(&mut rng, &[2, 5, 3])?;
    let product = a.mul(&b)?;
    let dense = to_operator(naive_product(&a, &b)?)?;

    for op in [&a, &product, &dense] {
        let entries = op.get_indices(&[], &[], &[vec![]])?;
        ensure!(entries.shape() == [0], "{} returned shape {:?}", op.name(), entries.shape());
        let entries = op.get_indices(&[], &[], &[vec![1]])?;
        ensure!(entries.shape() == [0], "{} returned shape {:?}", op.name(), entries.shape());
    }
    Ok(())
}

#[test]
fn test_mul_constant_scales_left_child_only() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(5);
    let a = random_root(&mut rng, &[4, 2])?;
    let b = random_root(&mut rng, &[4, 2])?;
    let product = a.mul(&b)?;

    let scaled = product.mul(2.5)?;
    let expected = naive_product(&a, &b)?.scale(2.5);
    ensure!(scaled.to_dense()?.allclose(&expected, EXACT_TOLERANCE), "scaled product differs");

    let negated = product.mul(-1.0)?;
    ensure!(negated.name() == "MulLinearOperator", "scaling changed the variant");
    let x = random_tensor(&mut rng, &[4]);
    let err = negated.matmul(&x)?.max_abs_diff(&naive_product(&a, &b)?.scale(-1.0).matmul(&x)?)?;
    ensure!(err < EXACT_TOLERANCE, "negated product error {}", err);
    Ok(())
}

#[test]
fn test_mul_expand_batch() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(9);
    let a = random_root(&mut rng, &[1, 4, 2])?;
    let b = random_root(&mut rng, &[1, 4, 2])?;
    let product = a.mul(&b)?;
    let expanded = product.expand_batch(&[3])?;
    ensure!(expanded.size() == [3, 4, 4], "expanded size {:?}", expanded.size());

    let dense = naive_product(&a, &b)?.broadcast_to(&[3, 4, 4])?;
    ensure!(expanded.to_dense()?.allclose(&dense, EXACT_TOLERANCE), "expanded product differs");
    Ok(())
}

// --- Gradients ---

#[test]
fn test_dense_quad_form_derivative_is_outer_product() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(1);
    let a = to_operator(random_tensor(&mut rng, &[5, 5]))?;
    let u = random_tensor(&mut rng, &[5, 3]);
    let v = random_tensor(&mut rng, &[5, 3]);

    let grads = a.quad_form_derivative(&u, &v)?;
    ensure!(grads.len() == 1, "dense operators have a single argument");
    let expected = u.matmul(&v.transpose()?)?;
    ensure!(grads[0] == expected, "gradient is not exactly U Vᵗ");
    Ok(())
}

#[test]
fn test_mul_quad_form_derivative_matches_finite_differences() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(2);
    let n = 4;
    let root_a = random_tensor(&mut rng, &[n, 2]);
    let root_b = random_tensor(&mut rng, &[n, 3]);
    let u = random_tensor(&mut rng, &[n, 2]);
    let v = random_tensor(&mut rng, &[n, 2]);

    let objective = |ra: &Tensor, rb: &Tensor| -> Result<f64> {
        let a = Operator::new(RootLinearOperator::new(ra.clone())?);
        let b = Operator::new(RootLinearOperator::new(rb.clone())?);
        let av = a.mul(&b)?.matmul(&v)?;
        Ok(u.mul(&av)?.data().iter().sum())
    };

    let a = Operator::new(RootLinearOperator::new(root_a.clone())?);
    let b = Operator::new(RootLinearOperator::new(root_b.clone())?);
    let grads = a.mul(&b)?.quad_form_derivative(&u, &v)?;
    ensure!(grads.len() == 2, "expected one gradient per root, got {}", grads.len());
    ensure!(grads[0].shape() == root_a.shape() && grads[1].shape() == root_b.shape(), "gradient shapes differ");

    // Central differences on every root entry; the objective is polynomial, so the
    // error is dominated by rounding.
    let h = 1e-5;
    for (which, (root, grad)) in [(&root_a, &grads[0]), (&root_b, &grads[1])].into_iter().enumerate() {
        for idx in 0..root.numel() {
            let bump = |delta: f64| -> Result<Tensor> {
                let mut data = root.data().to_vec();
                data[idx] += delta;
                Ok(Tensor::new(root.shape().to_vec(), data)?)
            };
            let (plus, minus) = (bump(h)?, bump(-h)?);
            let numeric = if which == 0 {
                (objective(&plus, &root_b)? - objective(&minus, &root_b)?) / (2.0 * h)
            } else {
                (objective(&root_a, &plus)? - objective(&root_a, &minus)?) / (2.0 * h)
            };
            let analytic = grad.data()[idx];
            ensure!(
                (numeric - analytic).abs() < 1e-6,
                "gradient {} entry {}: analytic {} vs numeric {}",
                which,
                idx,
                analytic,
                numeric
            );
        }
    }
    Ok(())
}

// --- Root decompositions ---

#[test]
fn test_root_decomposition_round_trip_exact() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(4);
    let a = to_operator(random_spd(&mut rng, 20)?)?;
    let root = a.root_decomposition()?;
    ensure!(root.as_root().is_some(), "root decomposition is not a root operator");

    let err = root.to_dense()?.max_abs_diff(&a.to_dense()?)?;
    ensure!(err < ROOT_TOLERANCE, "exact root error too high: {}", err);
    Ok(())
}

#[test]
fn test_root_decomposition_round_trip_lanczos() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(4);
    let factor = random_tensor(&mut rng, &[2, 40, 4]);
    let a = to_operator(factor.matmul(&factor.transpose()?)?)?;

    let settings = Settings::default().with_max_exact_root_size(10);
    let root = a.root_decomposition_with(&settings)?;
    let root_rank = root.as_root().map(RootLinearOperator::rank).unwrap_or(0);
    ensure!(root_rank <= 40, "rank {} exceeds the matrix size", root_rank);

    let err = root.to_dense()?.max_abs_diff(&a.to_dense()?)?;
    ensure!(err < ROOT_TOLERANCE, "Lanczos root error too high: {}", err);
    Ok(())
}

#[test]
fn test_lanczos_root_with_zero_iterations_is_an_error() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(5);
    let a = to_operator(random_spd(&mut rng, 12)?)?;
    let settings = Settings::default()
        .with_max_exact_root_size(4)
        .with_max_lanczos_iterations(0);

    let Err(err) = a.root_decomposition_with(&settings) else {
        anyhow::bail!("zero Lanczos iterations produced a root");
    };
    ensure!(
        matches!(err.kind(), LinearOperatorErrorKind::InvalidArguments { .. }),
        "unexpected error {:?}",
        err
    );
    Ok(())
}

#[test]
fn test_root_decomposition_is_memoized_per_settings() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(6);
    let a = to_operator(random_spd(&mut rng, 8)?)?;

    let first = a.root_decomposition()?;
    let second = a.root_decomposition()?;
    ensure!(first.ptr_eq(&second), "root decomposition was recomputed");

    let other = a.root_decomposition_with(&Settings::default().with_max_exact_root_size(0))?;
    ensure!(!other.ptr_eq(&first), "different settings shared a cache entry");
    let stats = a.memo().stats();
    ensure!(stats.misses == 2 && stats.hits == 1, "unexpected cache stats {:?}", stats);
    Ok(())
}

// --- Shapes, validation and conversion ---

#[test]
fn test_matmul_broadcasting_shapes() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(8);
    let a = to_operator(random_tensor(&mut rng, &[2, 3, 4]))?;

    let res = a.matmul(&random_tensor(&mut rng, &[4, 5]))?;
    ensure!(res.shape() == [2, 3, 5], "matrix rhs gave {:?}", res.shape());

    let res = a.matmul(&random_tensor(&mut rng, &[4]))?;
    ensure!(res.shape() == [2, 3], "vector rhs gave {:?}", res.shape());

    let err = a.matmul(&random_tensor(&mut rng, &[5, 2])).err();
    ensure!(
        matches!(err.as_ref().map(|e| e.kind()), Some(LinearOperatorErrorKind::ShapeMismatch { .. })),
        "mismatched rhs was accepted"
    );
    Ok(())
}

#[test]
fn test_construction_validation() -> Result<()> {
    let err = DenseLinearOperator::new(Tensor::zeros(&[4])).err();
    ensure!(
        matches!(err.as_ref().map(|e| e.kind()), Some(LinearOperatorErrorKind::InvalidArguments { .. })),
        "a 1-D tensor was accepted"
    );

    let mut rng = StdRng::seed_from_u64(10);
    let a = random_root(&mut rng, &[3, 1])?;
    let b = random_root(&mut rng, &[2, 3, 1])?;
    let message = MulLinearOperator::new(a, b).err().map(|e| e.to_string()).unwrap_or_default();
    ensure!(message.contains("[3, 3]") && message.contains("[2, 3, 3]"), "message does not name both shapes: {}", message);
    Ok(())
}

#[test]
fn test_mul_and_add_shape_mismatch() -> Result<()> {
    let a = to_operator(Tensor::eye(3))?;
    let b = Operator::new(RootLinearOperator::new(Tensor::full(&[4, 1], 1.0))?);
    for err in [a.mul(&b).err(), a.add(&b).err()] {
        ensure!(
            matches!(err.as_ref().map(|e| e.kind()), Some(LinearOperatorErrorKind::ShapeMismatch { .. })),
            "mismatched operands were combined"
        );
    }
    Ok(())
}

#[test]
fn test_to_operator() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(12);
    let t = random_tensor(&mut rng, &[3, 3]);
    let op = to_operator(t.clone())?;
    ensure!(op.as_dense().is_some(), "tensor was not wrapped densely");
    ensure!(op.to_dense()? == t, "wrapped values differ");
    ensure!(to_operator(&op)?.ptr_eq(&op), "operator was not returned unchanged");

    let err = to_operator(2.0).err();
    ensure!(
        matches!(
            err.as_ref().map(|e| e.kind()),
            Some(LinearOperatorErrorKind::UnsupportedType { type_name: "f64", .. })
        ),
        "a plain number was converted"
    );
    Ok(())
}
