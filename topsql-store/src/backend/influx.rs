//! InfluxDB v2 backend.
//!
//! Writes go through the `/api/v2/write` endpoint as line protocol with second precision. Lines
//! are buffered and sent once [`InfluxConfig::batch_size`] lines have accumulated, or when
//! [`Store::flush`] is called. Queries go through `/api/v2/query` and are read back as a
//! [`FluxCursor`].

use futures_util::{StreamExt, TryStreamExt};
use reqwest::RequestBuilder;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::io::StreamReader;
use topsql_types::{ConfigSecret, CpuTimeRecord, PlanMeta, SqlMeta};

use super::Store;
use super::flux::FluxCursor;
use crate::error::{StoreError, StoreResult};

/// Measurement holding one point per CPU-time sample.
pub const CPU_TIME_MEASUREMENT: &str = "cpu_time";
/// Measurement holding normalized SQL texts.
pub const SQL_META_MEASUREMENT: &str = "sql_meta";
/// Measurement holding normalized plan texts.
pub const PLAN_META_MEASUREMENT: &str = "plan_meta";

/// Connection parameters for an InfluxDB v2 server.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InfluxConfig {
    /// Base URL of the server, for example `http://localhost:8086`.
    pub url: String,
    /// Organization owning the bucket.
    pub org: String,
    /// Bucket to write to and query from.
    pub bucket: String,
    /// API token sent as `Authorization: Token ...`. Requests are unauthenticated without one.
    pub token: Option<SecretBox<ConfigSecret>>,
    /// Number of buffered lines that triggers a write request.
    pub batch_size: usize,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_owned(),
            org: "pingcap".to_owned(),
            bucket: "test".to_owned(),
            token: None,
            batch_size: 5000,
        }
    }
}

/// A [`Store`] writing to InfluxDB.
#[derive(Debug)]
pub struct InfluxStore {
    client: reqwest::Client,
    config: InfluxConfig,
    buffer: Mutex<Vec<String>>,
}

impl InfluxStore {
    /// Creates a store with a fresh HTTP client.
    pub fn new(config: InfluxConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// The bucket this store writes to.
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Runs a Flux query and returns a cursor over the resulting records.
    pub async fn query(&self, flux: &str) -> StoreResult<FluxCursor> {
        let url = format!("{}/api/v2/query", self.config.url);
        let response = self
            .authorize(self.client.post(url))
            .query(&[("org", self.config.org.as_str())])
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(flux.to_owned())
            .send()
            .await
            .map_err(|cause| StoreError::reqwest("failed to send query", cause))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                context: "failed to run query".into(),
                status,
                body,
            });
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other).boxed();
        Ok(FluxCursor::new(StreamReader::new(stream)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => {
                let value = format!("Token {}", token.expose_secret().as_str());
                request.header(AUTHORIZATION, value)
            }
            None => request,
        }
    }

    async fn push_lines(&self, lines: impl IntoIterator<Item = String>) -> StoreResult<()> {
        let mut buffer = self.buffer.lock().await;
        buffer.extend(lines);
        if buffer.len() >= self.config.batch_size {
            self.write_lines(&mut buffer).await?;
        }
        Ok(())
    }

    async fn write_lines(&self, buffer: &mut Vec<String>) -> StoreResult<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let lines = std::mem::take(buffer);
        tracing::debug!(lines = lines.len(), "writing to influxdb");

        let url = format!("{}/api/v2/write", self.config.url);
        let response = self
            .authorize(self.client.post(url))
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "s"),
            ])
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await
            .map_err(|cause| StoreError::reqwest("failed to send write", cause))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                context: "failed to write points".into(),
                status,
                body,
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for InfluxStore {
    async fn write_cpu_time_record(&self, record: &CpuTimeRecord) -> StoreResult<()> {
        self.push_lines(cpu_time_lines(record)).await
    }

    async fn write_sql_meta(&self, meta: &SqlMeta) -> StoreResult<()> {
        let line = format!(
            "{SQL_META_MEASUREMENT},sql_digest={} normalized_sql=\"{}\"",
            escape_tag(&String::from_utf8_lossy(&meta.sql_digest)),
            escape_field(&meta.normalized_sql),
        );
        self.push_lines([line]).await
    }

    async fn write_plan_meta(&self, meta: &PlanMeta) -> StoreResult<()> {
        let line = format!(
            "{PLAN_META_MEASUREMENT},plan_digest={} normalized_plan=\"{}\"",
            escape_tag(&String::from_utf8_lossy(&meta.plan_digest)),
            escape_field(&meta.normalized_plan),
        );
        self.push_lines([line]).await
    }

    async fn flush(&self) -> StoreResult<()> {
        let mut buffer = self.buffer.lock().await;
        self.write_lines(&mut buffer).await
    }
}

/// Renders one line per sample of the record.
pub fn cpu_time_lines(record: &CpuTimeRecord) -> impl Iterator<Item = String> + '_ {
    let tags = format!(
        "{CPU_TIME_MEASUREMENT},instance_id={},sql_digest={},plan_digest={}",
        record.instance_id(),
        escape_tag(&String::from_utf8_lossy(record.sql_digest())),
        escape_tag(&String::from_utf8_lossy(record.plan_digest())),
    );
    record
        .samples()
        .map(move |(timestamp, cpu_time)| format!("{tags} value={cpu_time}u {timestamp}"))
}

fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_line_per_sample() {
        let record = CpuTimeRecord::new(
            7,
            b"i7_sql1".to_vec(),
            b"i7_plan1".to_vec(),
            vec![10, 11],
            vec![250, 0],
        )
        .unwrap();

        let lines: Vec<_> = cpu_time_lines(&record).collect();
        assert_eq!(
            lines,
            vec![
                "cpu_time,instance_id=7,sql_digest=i7_sql1,plan_digest=i7_plan1 value=250u 10",
                "cpu_time,instance_id=7,sql_digest=i7_sql1,plan_digest=i7_plan1 value=0u 11",
            ]
        );
    }

    #[test]
    fn escapes_tags_and_fields() {
        assert_eq!(escape_tag("a b,c=d"), "a\\ b\\,c\\=d");
        assert_eq!(escape_field(r#"say "hi" \o/"#), r#"say \"hi\" \\o/"#);
    }

    #[test]
    fn debug_hides_token() {
        let config = InfluxConfig {
            token: Some(SecretBox::new(Box::new(ConfigSecret::from("super-secret")))),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("super-secret"));

        let token = config.token.unwrap();
        assert_eq!(token.expose_secret().as_str(), "super-secret");
    }

    #[test]
    fn token_becomes_authorization_header() {
        let store = InfluxStore::new(InfluxConfig {
            token: Some(SecretBox::new(Box::new(ConfigSecret::from("abc")))),
            ..Default::default()
        });
        let request = store
            .authorize(store.client.get("http://localhost:8086"))
            .build()
            .unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Token abc");

        let anonymous = InfluxStore::new(InfluxConfig::default());
        let request = anonymous
            .authorize(anonymous.client.get("http://localhost:8086"))
            .build()
            .unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }
}
