//! View client: schema caching plus the inline filter query loop.

use crate::cache::{SchemaCache, SchemaCacheStats};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::expr::Condition;
use crate::transport::{ApiRequest, HttpTransport, Transport};
use crate::types::{
    InlineQuery, InlineQueryRequest, Record, RowsResponse, SchemaSnapshot, INLINE_FILTER_NAME,
};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Path of the inline rows endpoint.
pub const ROWS_PATH: &str = "/api/views/INLINE/rows.json?method=index";

/// Client for one Socrata view.
///
/// Cheap to share behind an `Arc`; concurrent queries share one schema
/// cache.
pub struct SocrataClient {
    transport: Arc<dyn Transport>,
    schema: SchemaCache,
    config: ClientConfig,
}

impl SocrataClient {
    /// Create a new client builder for the given host and view.
    pub fn builder(
        host: impl Into<String>,
        view_id: impl Into<String>,
    ) -> crate::config::ClientConfigBuilder {
        crate::config::ClientConfigBuilder::new(host, view_id)
    }

    /// Create a client that talks HTTP through reqwest.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let schema = SchemaCache::new(
            Arc::clone(&transport),
            config.view_id.clone(),
            config.schema_ttl,
        );
        Ok(Self {
            transport,
            schema,
            config,
        })
    }

    pub fn view_id(&self) -> &str {
        &self.config.view_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// The view's columns, fetched on first use.
    pub async fn columns(&self) -> Result<Arc<SchemaSnapshot>> {
        self.schema.ensure().await
    }

    /// Forget the cached columns.
    pub async fn invalidate_schema(&self) {
        self.schema.invalidate().await;
    }

    /// Get schema cache statistics.
    pub async fn schema_stats(&self) -> SchemaCacheStats {
        self.schema.stats().await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Fetch every row matching `condition`.
    pub async fn query(&self, condition: &Condition) -> Result<Vec<Record>> {
        self.query_with_cancel(condition, &CancellationToken::new())
            .await
    }

    /// Fetch every row matching `condition`, stopping early once `cancel`
    /// fires.
    ///
    /// If the server rejects the column ids, the schema is re-fetched and
    /// the query resubmitted, up to `max_stale_retries` submissions in
    /// total. Transport failures and unknown field names are returned
    /// immediately.
    pub async fn query_with_cancel(
        &self,
        condition: &Condition,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        let max_attempts = self.config.max_stale_retries;
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let snapshot = cancellable(cancel, self.schema.ensure()).await?;
            let filter = condition.resolve(&snapshot)?;
            attempts += 1;

            let body = serde_json::to_value(InlineQueryRequest {
                original_view_id: &self.config.view_id,
                name: INLINE_FILTER_NAME,
                columns: snapshot.columns(),
                query: InlineQuery {
                    filter_condition: filter,
                },
            })?;

            tracing::debug!(
                view_id = %self.config.view_id,
                attempt = attempts,
                columns = snapshot.len(),
                "Submitting inline filter"
            );

            let outcome =
                cancellable(cancel, self.transport.send(ApiRequest::post(ROWS_PATH, body))).await;

            let stale_message = match outcome {
                Ok(value) => {
                    let response: RowsResponse = serde_json::from_value(value).map_err(|e| {
                        ClientError::InvalidResponse(format!("Failed to parse rows: {}", e))
                    })?;
                    if !response.is_stale_schema() {
                        let records = response.into_records(&snapshot)?;
                        tracing::debug!(
                            view_id = %self.config.view_id,
                            rows = records.len(),
                            "Query complete"
                        );
                        return Ok(records);
                    }
                    response.message.unwrap_or_default()
                }
                Err(err) => match err.stale_schema_message() {
                    Some(message) => message.to_string(),
                    None => return Err(err),
                },
            };

            tracing::warn!(
                view_id = %self.config.view_id,
                attempt = attempts,
                max_attempts = max_attempts,
                message = %stale_message,
                "Server reported stale schema, refreshing columns"
            );
            self.schema.invalidate().await;

            if attempts >= max_attempts {
                return Err(ClientError::StaleSchemaRetryExhausted {
                    attempts,
                    last_message: stale_message,
                });
            }
        }
    }
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        res = fut => res,
    }
}

/// Arc-wrapped client for shared ownership.
pub type SharedClient = Arc<SocrataClient>;
