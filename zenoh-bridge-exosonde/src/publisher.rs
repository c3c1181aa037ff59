//! Publication of decoded records.
//!
//! A cycle's records are serialized to a JSON array, compressed and base64
//! encoded (`rawzb64`), then wrapped in a [`TelemetryEnvelope`] carrying the
//! acquisition timestamp.

use sondesight_common::{Format, TelemetryEnvelope, decode_rawzb64, encode, encode_rawzb64};
use std::future::Future;
use tracing::debug;
use zenoh::Session;

use crate::decoder::ParameterRecord;

/// Name of the payload carrying the packed record list.
pub const PAYLOAD_NAME: &str = "rawzb64.data";

/// Error type for publication.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to encode records: {0}")]
    Encoding(#[from] sondesight_common::Error),
    #[error("Failed to serialize records: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to publish to '{key}': {message}")]
    Put { key: String, message: String },
}

/// A sink for decoded records.
pub trait Publish {
    /// Emit one cycle's records, stamped with `acquired_at` (Unix epoch ns).
    fn publish(
        &self,
        records: &[ParameterRecord],
        acquired_at: i64,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Pack records into the `rawzb64` text form.
pub fn pack_records(records: &[ParameterRecord]) -> Result<String, PublishError> {
    let json = serde_json::to_vec(records)?;
    Ok(encode_rawzb64(&json)?)
}

/// Reverse [`pack_records`], yielding the records as generic JSON objects.
pub fn unpack_records(text: &str) -> Result<Vec<serde_json::Value>, PublishError> {
    let json = decode_rawzb64(text)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Build the key expression records of `source` are published on.
pub fn build_key_expr(prefix: &str, source: &str) -> String {
    format!("{}/{}/{}", prefix, source, PAYLOAD_NAME)
}

/// Wrap one cycle's packed records in an envelope stamped with `acquired_at`.
pub fn envelope(
    source: &str,
    records: &[ParameterRecord],
    acquired_at: i64,
) -> Result<TelemetryEnvelope, PublishError> {
    let packed = pack_records(records)?;
    Ok(TelemetryEnvelope::new(source, PAYLOAD_NAME, packed).with_timestamp(acquired_at))
}

/// Publishes packed records to Zenoh.
#[derive(Clone, Debug)]
pub struct ZenohPublisher {
    session: Session,
    key: String,
    source: String,
    format: Format,
}

impl ZenohPublisher {
    pub fn new(session: Session, key_prefix: &str, source: impl Into<String>, format: Format) -> Self {
        let source = source.into();
        Self {
            session,
            key: build_key_expr(key_prefix, &source),
            source,
            format,
        }
    }

    /// Key expression this publisher writes to.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Publish for ZenohPublisher {
    async fn publish(
        &self,
        records: &[ParameterRecord],
        acquired_at: i64,
    ) -> Result<(), PublishError> {
        let envelope = envelope(&self.source, records, acquired_at)?;
        let payload = encode(&envelope, self.format)?;
        let size = payload.len();

        self.session
            .put(&self.key, payload)
            .await
            .map_err(|e| PublishError::Put {
                key: self.key.clone(),
                message: e.to_string(),
            })?;

        debug!(key = %self.key, records = records.len(), bytes = size, "Published records");
        Ok(())
    }
}
