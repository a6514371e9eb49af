//! Core types shared by the mywire MySQL protocol engine.
//!
//! - [`Error`] classifies every failure by what it means for the connection
//! - [`Value`] is the closed set of values a column or parameter can hold
//! - [`temporal`] holds DATE/DATETIME/TIME values with explicit precision
//! - [`Row`] and [`FromValue`] provide typed access to decoded rows

pub mod error;
pub mod row;
pub mod temporal;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, LocalInfileError,
    LocalInfileErrorKind, ProtocolError, Result, ServerError, TypeError, UsageError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use temporal::{Date, DateTime, Temporal, Time};
pub use value::Value;
