//! Socrata View Client
//!
//! An async client for filtering the rows of one Socrata dataset view
//! through the inline `rows.json` endpoint.
//!
//! # Features
//!
//! - **Condition builder**: compose filters against column names; ids are
//!   looked up only when a query is sent
//! - **Schema caching**: the view's columns are fetched once and shared by
//!   concurrent queries
//! - **Stale schema recovery**: when the server no longer recognises a
//!   column id the schema is re-fetched and the query resubmitted
//! - **Automatic Retries**: exponential backoff for transient HTTP failures
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use socrata_client::expr::{and, col, contains, greater_than, less_than, or, val};
//! use socrata_client::{ClientConfig, SocrataClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SocrataClient::new(
//!         ClientConfig::builder("data.seattle.gov", "it8u-sznv")
//!             .app_token("your_app_token")
//!             .build()?,
//!     )?;
//!
//!     let condition = and([
//!         greater_than([col("objectid"), val(0)]),
//!         less_than([col("objectid"), val(20)]),
//!         or([
//!             contains([col("customtext"), val("PARK")]),
//!             contains([col("categoryde"), val("PARK")]),
//!         ]),
//!     ]);
//!
//!     for record in client.query(&condition).await? {
//!         println!("{:?}", record);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return `Result<T, ClientError>`. Besides transport and
//! API errors:
//!
//! - `UnknownColumn`: the condition names a field the view doesn't have
//! - `StaleSchemaRetryExhausted`: the server kept rejecting column ids
//! - `RaggedRows`: the response rows don't line up with the columns
//! - `Cancelled`: the caller's cancellation token fired

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod expr;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports for convenience
pub use cache::{SchemaCache, SchemaCacheStats};
pub use client::{SharedClient, SocrataClient};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{ClientError, Result};
pub use expr::{Condition, Operator, ResolvedFilter};
pub use tokio_util::sync::CancellationToken;
pub use transport::{ApiRequest, HttpTransport, Transport};
pub use types::{ColumnDescriptor, Record, RowsResponse, SchemaSnapshot};
