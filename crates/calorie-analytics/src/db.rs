use rusqlite::Connection;

use crate::error::Result;

/// Initialise the analytics schema in `conn`. One row per `(date,
/// chat_type)`. Latency/accuracy samples are kept as
/// JSON-encoded arrays in TEXT columns.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS inline_analytics_daily (
            date                  TEXT    NOT NULL,
            chat_type             TEXT    NOT NULL,
            trigger_counts        TEXT    NOT NULL DEFAULT '{}',
            request_count         INTEGER NOT NULL DEFAULT 0,
            success_count         INTEGER NOT NULL DEFAULT 0,
            failure_count         INTEGER NOT NULL DEFAULT 0,
            permission_block_count INTEGER NOT NULL DEFAULT 0,
            ack_latency_samples   TEXT    NOT NULL DEFAULT '[]',
            result_latency_samples TEXT   NOT NULL DEFAULT '[]',
            accuracy_within_tolerance_count INTEGER NOT NULL DEFAULT 0,
            accuracy_sample_count INTEGER NOT NULL DEFAULT 0,
            failure_reasons       TEXT    NOT NULL DEFAULT '{}',
            last_updated_at       TEXT    NOT NULL,
            PRIMARY KEY (date, chat_type)
        ) STRICT;
        ",
    )?;
    Ok(())
}
