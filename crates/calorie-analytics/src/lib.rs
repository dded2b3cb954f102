//! Inline Analytics Aggregator. Consumes the same events as the telemetry registry (C1)
//! but writes them into a durable daily bucket keyed by `(date, chat_type)`,
//! queryable by the `/api/v1/analytics/inline-summary` endpoint.

pub mod db;
pub mod error;

use std::collections::BTreeMap;
use std::sync::Mutex;

use calorie_core::types::{ChatType, FailureReasonCount, InlineAnalyticsDaily, TriggerType};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub use error::{AnalyticsError, Result};

/// Reservoir sample cap for per-day latency observations.
pub const RESERVOIR_CAP: usize = 1024;
/// Matches the SLA envelope's accuracy tolerance.
pub const ACCURACY_TOLERANCE_PCT: f64 = 5.0;

/// Outcome of one inline-pipeline request, as recorded by the dispatcher or
/// worker once it's known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Success,
    Failure(calorie_core::FailureReason),
}

/// One inline-pipeline event to roll into the day's bucket.
#[derive(Debug, Clone)]
pub struct InlineEvent {
    pub date: NaiveDate,
    pub chat_type: ChatType,
    pub trigger_type: TriggerType,
    pub outcome: EventOutcome,
    pub permission_block: bool,
    pub ack_latency_ms: Option<u64>,
    pub result_latency_ms: Option<u64>,
    /// `Some` only when ground truth was available.
    pub accuracy_delta_pct: Option<f64>,
}

/// Internal row shape, deserialized from the JSON-in-TEXT columns.
struct BucketRow {
    trigger_counts: BTreeMap<String, u64>,
    request_count: u64,
    success_count: u64,
    failure_count: u64,
    permission_block_count: u64,
    ack_latency_samples: Vec<u64>,
    result_latency_samples: Vec<u64>,
    accuracy_within_tolerance_count: u64,
    accuracy_sample_count: u64,
    failure_reasons: BTreeMap<String, u64>,
}

impl Default for BucketRow {
    fn default() -> Self {
        Self {
            trigger_counts: BTreeMap::new(),
            request_count: 0,
            success_count: 0,
            failure_count: 0,
            permission_block_count: 0,
            ack_latency_samples: Vec::new(),
            result_latency_samples: Vec::new(),
            accuracy_within_tolerance_count: 0,
            accuracy_sample_count: 0,
            failure_reasons: BTreeMap::new(),
        }
    }
}

fn push_bounded(samples: &mut Vec<u64>, value: u64) {
    samples.push(value);
    if samples.len() > RESERVOIR_CAP {
        samples.remove(0);
    }
}

fn percentile_95(samples: &[u64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    if sorted.len() < 5 {
        return *sorted.last().unwrap() as f64;
    }
    let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx] as f64
}

fn mean(samples: &[u64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<u64>() as f64 / samples.len() as f64
}

/// Durable daily rollup of inline-pipeline telemetry. One SQLite connection
/// guarded by a `Mutex`.
pub struct InlineAnalyticsAggregator {
    conn: Mutex<Connection>,
}

impl InlineAnalyticsAggregator {
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Upsert-and-increment a single event into its day's bucket.
    /// Read-modify-write under the connection lock — there is no
    /// concurrent writer to this connection, so this is race-free.
    pub fn record_event(&self, event: &InlineEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let date_str = event.date.to_string();
        let chat_type = event.chat_type.bucket_key();

        let mut row = Self::load_row(&conn, &date_str, chat_type)?.unwrap_or_default();

        *row.trigger_counts
            .entry(event.trigger_type.as_str().to_string())
            .or_insert(0) += 1;
        row.request_count += 1;
        match event.outcome {
            EventOutcome::Success => row.success_count += 1,
            EventOutcome::Failure(reason) => {
                row.failure_count += 1;
                *row.failure_reasons
                    .entry(reason.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        if event.permission_block {
            row.permission_block_count += 1;
        }
        if let Some(ack) = event.ack_latency_ms {
            push_bounded(&mut row.ack_latency_samples, ack);
        }
        if let Some(result) = event.result_latency_ms {
            push_bounded(&mut row.result_latency_samples, result);
        }
        if let Some(delta) = event.accuracy_delta_pct {
            row.accuracy_sample_count += 1;
            if delta.abs() <= ACCURACY_TOLERANCE_PCT {
                row.accuracy_within_tolerance_count += 1;
            }
        }

        Self::store_row(&conn, &date_str, chat_type, &row)?;
        Ok(())
    }

    fn load_row(conn: &Connection, date: &str, chat_type: &str) -> Result<Option<BucketRow>> {
        let row = conn
            .query_row(
                "SELECT trigger_counts, request_count, success_count, failure_count,
                        permission_block_count, ack_latency_samples, result_latency_samples,
                        accuracy_within_tolerance_count, accuracy_sample_count, failure_reasons
                 FROM inline_analytics_daily WHERE date = ?1 AND chat_type = ?2",
                params![date, chat_type],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, u64>(1)?,
                        r.get::<_, u64>(2)?,
                        r.get::<_, u64>(3)?,
                        r.get::<_, u64>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, String>(6)?,
                        r.get::<_, u64>(7)?,
                        r.get::<_, u64>(8)?,
                        r.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            trigger_counts_json,
            request_count,
            success_count,
            failure_count,
            permission_block_count,
            ack_json,
            result_json,
            accuracy_within_tolerance_count,
            accuracy_sample_count,
            failure_reasons_json,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(BucketRow {
            trigger_counts: serde_json::from_str(&trigger_counts_json)?,
            request_count,
            success_count,
            failure_count,
            permission_block_count,
            ack_latency_samples: serde_json::from_str(&ack_json)?,
            result_latency_samples: serde_json::from_str(&result_json)?,
            accuracy_within_tolerance_count,
            accuracy_sample_count,
            failure_reasons: serde_json::from_str(&failure_reasons_json)?,
        }))
    }

    fn store_row(conn: &Connection, date: &str, chat_type: &str, row: &BucketRow) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO inline_analytics_daily
                (date, chat_type, trigger_counts, request_count, success_count,
                 failure_count, permission_block_count, ack_latency_samples,
                 result_latency_samples, accuracy_within_tolerance_count,
                 accuracy_sample_count, failure_reasons, last_updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
             ON CONFLICT (date, chat_type) DO UPDATE SET
                trigger_counts = excluded.trigger_counts,
                request_count = excluded.request_count,
                success_count = excluded.success_count,
                failure_count = excluded.failure_count,
                permission_block_count = excluded.permission_block_count,
                ack_latency_samples = excluded.ack_latency_samples,
                result_latency_samples = excluded.result_latency_samples,
                accuracy_within_tolerance_count = excluded.accuracy_within_tolerance_count,
                accuracy_sample_count = excluded.accuracy_sample_count,
                failure_reasons = excluded.failure_reasons,
                last_updated_at = excluded.last_updated_at",
            params![
                date,
                chat_type,
                serde_json::to_string(&row.trigger_counts)?,
                row.request_count,
                row.success_count,
                row.failure_count,
                row.permission_block_count,
                serde_json::to_string(&row.ack_latency_samples)?,
                serde_json::to_string(&row.result_latency_samples)?,
                row.accuracy_within_tolerance_count,
                row.accuracy_sample_count,
                serde_json::to_string(&row.failure_reasons)?,
                now,
            ],
        )?;
        Ok(())
    }

    fn row_to_daily(date: NaiveDate, chat_type: String, row: BucketRow, last_updated_at: String) -> InlineAnalyticsDaily {
        let failure_reasons = row
            .failure_reasons
            .into_iter()
            .map(|(reason, count)| FailureReasonCount { reason, count })
            .collect();
        let accuracy_within_tolerance_pct = if row.accuracy_sample_count == 0 {
            0.0
        } else {
            (row.accuracy_within_tolerance_count as f64 / row.accuracy_sample_count as f64) * 100.0
        };

        InlineAnalyticsDaily {
            date,
            chat_type,
            trigger_counts: row.trigger_counts,
            request_count: row.request_count,
            success_count: row.success_count,
            failure_count: row.failure_count,
            permission_block_count: row.permission_block_count,
            avg_ack_latency_ms: mean(&row.ack_latency_samples),
            p95_result_latency_ms: percentile_95(&row.result_latency_samples),
            accuracy_within_tolerance_pct,
            failure_reasons,
            last_updated_at: chrono::DateTime::parse_from_rfc3339(&last_updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }

    /// Range query over `[range_start, range_end]`, optionally scoped to a
    /// single `chat_type` bucket.
    pub fn range_query(
        &self,
        range_start: NaiveDate,
        range_end: NaiveDate,
        chat_type: Option<ChatType>,
    ) -> Result<Vec<InlineAnalyticsDaily>> {
        let conn = self.conn.lock().unwrap();
        let start_str = range_start.to_string();
        let end_str = range_end.to_string();

        let mut stmt = conn.prepare(
            "SELECT date, chat_type, trigger_counts, request_count, success_count,
                    failure_count, permission_block_count, ack_latency_samples,
                    result_latency_samples, accuracy_within_tolerance_count,
                    accuracy_sample_count, failure_reasons, last_updated_at
             FROM inline_analytics_daily
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date, chat_type",
        )?;

        let chat_filter = chat_type.map(|c| c.bucket_key().to_string());
        let rows = stmt.query_map(params![start_str, end_str], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, u64>(3)?,
                r.get::<_, u64>(4)?,
                r.get::<_, u64>(5)?,
                r.get::<_, u64>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, String>(8)?,
                r.get::<_, u64>(9)?,
                r.get::<_, u64>(10)?,
                r.get::<_, String>(11)?,
                r.get::<_, String>(12)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (
                date_str,
                row_chat_type,
                trigger_counts_json,
                request_count,
                success_count,
                failure_count,
                permission_block_count,
                ack_json,
                result_json,
                accuracy_within_tolerance_count,
                accuracy_sample_count,
                failure_reasons_json,
                last_updated_at,
            ) = row?;

            if let Some(filter) = &chat_filter {
                if &row_chat_type != filter {
                    continue;
                }
            }

            let date = date_str
                .parse::<NaiveDate>()
                .map_err(|e| AnalyticsError::InvalidDate(e.to_string()))?;

            let bucket = BucketRow {
                trigger_counts: serde_json::from_str(&trigger_counts_json)?,
                request_count,
                success_count,
                failure_count,
                permission_block_count,
                ack_latency_samples: serde_json::from_str(&ack_json)?,
                result_latency_samples: serde_json::from_str(&result_json)?,
                accuracy_within_tolerance_count,
                accuracy_sample_count,
                failure_reasons: serde_json::from_str(&failure_reasons_json)?,
            };

            out.push(Self::row_to_daily(date, row_chat_type, bucket, last_updated_at));
        }

        Ok(out)
    }
}
