//! This crate has no public API of its own; it exists to host the
//! workspace's property and end-to-end contract tests under `tests/`,
//! one file per dimension, the way `spark-contract-tests` lays out its
//! own suite.
