//! recsink Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging setup and error handling for the recsink workspace.
//!
//! - **Error Handling**: [`RecsinkError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber configuration, see [`logging`]
//! - **Types**: [`RawRow`](types::RawRow), [`CanonicalRecord`](types::CanonicalRecord)
//!   and [`ObjectRef`](types::ObjectRef)
//!
//! # Example
//!
//! ```no_run
//! use recsink_common::logging::{init_logging, LogConfig};
//! use recsink_common::types::RawRow;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!
//!     let row: RawRow = [("name", "Alice")].into_iter().collect();
//!     tracing::info!(name = ?row.name(), "Parsed row");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

pub use error::{RecsinkError, Result};
