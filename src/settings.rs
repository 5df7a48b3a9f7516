//! Tunable thresholds for structure-exploiting code paths.
//!
//! The defaults favour structure: elementwise products always go through root
//! decompositions, and root decompositions of matrices up to 800 rows use an exact
//! eigendecomposition before switching to Lanczos. Every value can be overridden in
//! code with the `with_*` setters or from the environment with [`Settings::from_env`].

use crate::error::{Result, invalid_arguments};

/// Environment variable overriding [`Settings::dense_fallback_size`].
pub const DENSE_FALLBACK_SIZE_ENV_VAR: &str = "LINEAR_OPERATOR_DENSE_FALLBACK_SIZE";
/// Environment variable overriding [`RootDecompositionSettings::max_exact_size`].
pub const MAX_EXACT_ROOT_SIZE_ENV_VAR: &str = "LINEAR_OPERATOR_MAX_EXACT_ROOT_SIZE";
/// Environment variable overriding [`RootDecompositionSettings::max_lanczos_iterations`].
pub const MAX_LANCZOS_ITERATIONS_ENV_VAR: &str = "LINEAR_OPERATOR_MAX_LANCZOS_ITERATIONS";

/// Controls how root decompositions are computed numerically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootDecompositionSettings {
    /// Matrices with at most this many rows are decomposed with an exact
    /// self-adjoint eigendecomposition; larger ones use Lanczos.
    pub max_exact_size: usize,
    /// Upper bound on the Lanczos iterations, and therefore on the rank of a
    /// Lanczos-based root. Must be at least 1 whenever Lanczos runs.
    pub max_lanczos_iterations: usize,
    /// Eigenvalues at or below `eigenvalue_tolerance * max_eigenvalue` are dropped
    /// from the root.
    pub eigenvalue_tolerance: f64,
}

impl Default for RootDecompositionSettings {
    fn default() -> Self {
        Self {
            max_exact_size: 800,
            max_lanczos_iterations: 100,
            eigenvalue_tolerance: 1e-10,
        }
    }
}

/// Crate-wide settings passed to operators that make path decisions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Settings {
    /// Elementwise products of operators whose matrix dimension is at most this
    /// value keep their children as given and multiply densely instead of through
    /// root decompositions. 0 means the root path is always taken.
    pub dense_fallback_size: usize,
    pub root: RootDecompositionSettings,
}

impl Settings {
    pub fn with_dense_fallback_size(mut self, size: usize) -> Self {
        self.dense_fallback_size = size;
        self
    }

    pub fn with_max_exact_root_size(mut self, size: usize) -> Self {
        self.root.max_exact_size = size;
        self
    }

    pub fn with_max_lanczos_iterations(mut self, iterations: usize) -> Self {
        self.root.max_lanczos_iterations = iterations;
        self
    }

    pub fn with_eigenvalue_tolerance(mut self, tolerance: f64) -> Self {
        self.root.eigenvalue_tolerance = tolerance;
        self
    }

    /// Builds settings from the defaults, overridden by any of the
    /// `LINEAR_OPERATOR_*` environment variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse = |name: &str| -> Result<Option<usize>> {
            match lookup(name) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<usize>().map(Some).map_err(|_| {
                    invalid_arguments("Settings", format!("{name} must be a non-negative integer; got '{raw}'"))
                }),
            }
        };

        let mut settings = Self::default();
        if let Some(size) = parse(DENSE_FALLBACK_SIZE_ENV_VAR)? {
            settings.dense_fallback_size = size;
        }
        if let Some(size) = parse(MAX_EXACT_ROOT_SIZE_ENV_VAR)? {
            settings.root.max_exact_size = size;
        }
        if let Some(iterations) = parse(MAX_LANCZOS_ITERATIONS_ENV_VAR)? {
            if iterations == 0 {
                return Err(invalid_arguments(
                    "Settings",
                    format!("{MAX_LANCZOS_ITERATIONS_ENV_VAR} must be at least 1"),
                ));
            }
            settings.root.max_lanczos_iterations = iterations;
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.dense_fallback_size, 0);
        assert_eq!(settings.root.max_exact_size, 800);
        assert_eq!(settings.root.max_lanczos_iterations, 100);
    }

    #[test]
    fn test_lookup_overrides() {
        let settings = Settings::from_lookup(|name| match name {
            DENSE_FALLBACK_SIZE_ENV_VAR => Some("16".to_string()),
            MAX_LANCZOS_ITERATIONS_ENV_VAR => Some(" 7 ".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.dense_fallback_size, 16);
        assert_eq!(settings.root.max_lanczos_iterations, 7);
        assert_eq!(settings.root.max_exact_size, 800);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = Settings::from_lookup(|name| (name == MAX_EXACT_ROOT_SIZE_ENV_VAR).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LINEAR_OPERATOR_MAX_EXACT_ROOT_SIZE"));
    }

    #[test]
    fn test_lookup_rejects_zero_lanczos_iterations() {
        let err = Settings::from_lookup(|name| (name == MAX_LANCZOS_ITERATIONS_ENV_VAR).then(|| "0".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("must be at least 1"));
    }
}
