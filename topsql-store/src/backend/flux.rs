//! Reading Flux query results.
//!
//! InfluxDB answers Flux queries with CSV. Each table in the result starts with a header row,
//! tables are separated by empty lines, and annotation rows start with `#`. [`FluxCursor`] walks
//! this format one record at a time without buffering the whole response.

use std::collections::BTreeMap;
use std::fmt;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::error::{StoreError, StoreResult};

/// Builds the query returning the heaviest CPU-time samples of one instance.
///
/// The samples in `[start, stop)` are grouped by timestamp and the `limit` largest values of
/// each group are kept.
pub fn top_cpu_time_flux(
    bucket: &str,
    start: i64,
    stop: i64,
    instance_id: u32,
    limit: u32,
) -> String {
    format!(
        r#"from(bucket:"{bucket}")
    |> range(start:{start}, stop:{stop})
    |> filter(fn: (r) =>
        r._measurement == "cpu_time" and
        r.instance_id == "{instance_id}"
    )
    |> drop(columns: ["_start", "_stop", "_measurement"])
    |> group(columns: ["_time"])
    |> sort(columns: ["_value"], desc: true)
    |> limit(n:{limit})
"#
    )
}

/// A single row of a Flux result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FluxRecord {
    /// Set on the first record of every table.
    pub table_changed: bool,
    /// Column name to raw value. The unnamed annotation column is dropped.
    pub values: BTreeMap<String, String>,
}

/// Streaming cursor over a CSV-encoded Flux response.
pub struct FluxCursor {
    lines: Lines<Box<dyn AsyncBufRead + Send + Unpin>>,
    header: Option<Vec<String>>,
    table: Option<Option<String>>,
}

impl fmt::Debug for FluxCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluxCursor")
            .field("header", &self.header)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl FluxCursor {
    /// Wraps a reader positioned at the start of a CSV response.
    pub fn new(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        let reader: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: reader.lines(),
            header: None,
            table: None,
        }
    }

    /// Returns the next record, or `None` once the response is exhausted.
    pub async fn next(&mut self) -> StoreResult<Option<FluxRecord>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                self.header = None;
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            let fields = split_csv_line(line)?;
            if self.header.is_none() {
                self.header = Some(fields);
                continue;
            }

            let header = self.header.as_deref().unwrap_or_default();
            if header.len() != fields.len() {
                return Err(StoreError::Response(format!(
                    "expected {} columns, got {}",
                    header.len(),
                    fields.len()
                )));
            }
            let values: BTreeMap<_, _> = header
                .iter()
                .cloned()
                .zip(fields)
                .filter(|(name, _)| !name.is_empty())
                .collect();

            let table = values.get("table").cloned();
            let table_changed = self.table.as_ref() != Some(&table);
            self.table = Some(table);

            return Ok(Some(FluxRecord {
                table_changed,
                values,
            }));
        }
        Ok(None)
    }

    /// Reads every remaining record and returns how many were read.
    ///
    /// A failing read is logged and ends the drain.
    pub async fn drain(&mut self) -> u64 {
        let mut count = 0;
        loop {
            match self.next().await {
                Ok(Some(record)) => {
                    if record.table_changed {
                        tracing::debug!(table = ?record.values.get("table"), "flux table changed");
                    }
                    tracing::trace!(values = ?record.values, "read flux record");
                    count += 1;
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        "failed to read flux record"
                    );
                    break;
                }
            }
        }
        tracing::debug!(records = count, "flux cursor drained");
        count
    }
}

fn split_csv_line(line: &str) -> StoreResult<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;

    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }

    if quoted {
        return Err(StoreError::Response(format!("unterminated quote in `{line}`")));
    }
    fields.push(field);
    Ok(fields)
}
