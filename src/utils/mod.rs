//! Shared utilities for the operator implementations.
//!
//! - **`broadcasting`**: shape arithmetic for batched matrix products and elementwise
//!   broadcasting, plus batch multi-index iteration.
//!
//! - **`memoize`**: the per-instance cache operators use for idempotent derived
//!   quantities such as dense materializations and root decompositions.
//!
//! - **`perf`**: timing and peak-memory helpers for the experiment binary.

pub mod broadcasting;
pub mod memoize;
pub mod perf;
