//! Error types and result definitions for the quill engine.
//!
//! This crate provides the unified error type ([`Error`]) and result type
//! alias ([`Result<T>`]) used throughout all quill crates. All operations
//! that can fail return `Result<T>`; errors propagate upward with the `?`
//! operator and are converted to user-facing messages at the API boundary.
//!
//! # Error Categories
//!
//! - **Data format errors** ([`Error::Arrow`]): Arrow columnar operations
//! - **User input errors** ([`Error::InvalidArgumentError`]): bad parameters
//! - **Constraint violations** ([`Error::ConstraintError`]): duplicate keys
//! - **Unsupported operations** ([`Error::NotSupported`]): valid requests the
//!   engine cannot currently satisfy (for example some DDL on staged data)
//! - **Internal errors** ([`Error::Internal`]): bugs or violated invariants

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
