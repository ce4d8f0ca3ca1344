//! Common data types for the quill engine.
//!
//! This crate hosts the core identifier aliases, the reserved value ranges
//! that partition those identifier spaces, and the scalar literal type used
//! for statistics, defaults, and scan filters. It is deliberately free of
//! storage dependencies so every other crate can depend on it.

#![forbid(unsafe_code)]

pub mod ids;
pub mod literal;
pub mod reserved;

pub use ids::{FieldId, RowId, TableId, TxnId};
pub use literal::ScalarValue;
