//! Error types and result definitions for the stria columnar engine.
//!
//! This crate provides a unified error type ([`Error`]) and result type alias
//! ([`Result<T>`]) used throughout the stria crates. All operations that could
//! fail return `Result<T>`, where the error variant carries enough context to
//! diagnose what went wrong.
//!
//! # Error Philosophy
//!
//! stria uses a single error enum rather than crate-specific error types.
//! Errors propagate upward with the `?` operator; none of the core crates
//! retry or recover on their own, because every failure in this layer is
//! deterministic given the same input bytes. The caller decides whether to
//! fail the query, skip the affected data unit, or abort.
//!
//! # Error Categories
//!
//! - **Shape errors** ([`Error::InvalidArgumentError`]): malformed arguments
//!   at construction or API misuse (out-of-order positions, wrong state).
//! - **Structural errors** ([`Error::CorruptedData`]): data that violates the
//!   columnar layout invariants, or undecodable stream bytes.
//! - **Encoding errors** ([`Error::UnsupportedEncoding`]): a segment declares
//!   a physical encoding this build cannot decode. Never retryable.
//! - **Internal errors** ([`Error::Internal`]): violated internal invariants;
//!   indicates a bug in stria or its caller.

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
