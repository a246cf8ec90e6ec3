//! recsink Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads records announced by storage and queue events into a key-value
//! table.
//!
//! # Pipeline
//!
//! - **Object notifications**: fetch each uploaded CSV ([`fetch`]), stream its
//!   rows ([`csv_stream`]) and normalize them ([`transform`])
//! - **Queue messages**: decode each JSON body into a row and normalize it
//! - **Persistence**: all records of an invocation are written in chunks of at
//!   most 25 by the [`writer::BatchWriter`]
//!
//! Failures are isolated per object, per message and per chunk and returned
//! in an [`dispatch::InvocationReport`].
//!
//! # Example
//!
//! ```no_run
//! use recsink_ingest::{config::Config, context::AppContext, events::QueueMessageEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = AppContext::initialize(Config::from_env()?).await;
//!     let event = QueueMessageEvent::from_bodies([r#"{"name":"Alice","email":"a@x.com"}"#]);
//!
//!     let report = context.dispatcher().handle_queue_messages(&event).await?;
//!     tracing::info!(written = report.written(), "Done");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod csv_stream;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fetch;
pub mod store;
pub mod transform;
pub mod writer;
