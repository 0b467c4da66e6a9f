//! Month-scoped order number allocation.
//!
//! Each order gets `<PREFIX><yyyy><mm><seq>` where `seq` is a zero-padded
//! 5-digit counter that resets every month, e.g. `BKC20240300007` for the
//! seventh order of March 2024. The counter lives in its own table and is
//! advanced with a single upsert-increment, so two concurrent checkouts can
//! never draw the same number.

use crate::errors::ServiceError;
use chrono::{DateTime, Datelike, Utc};
use sea_orm::{ConnectionTrait, DatabaseBackend, FromQueryResult, Statement};

#[derive(Debug, FromQueryResult)]
struct SequenceRow {
    next_seq: i64,
}

/// Formats an order number from its parts.
pub fn format_order_number(prefix: &str, at: DateTime<Utc>, seq: i64) -> String {
    format!("{}{:04}{:02}{:05}", prefix, at.year(), at.month(), seq)
}

/// The `yyyymm` key the counter is scoped to.
pub fn month_key(at: DateTime<Utc>) -> String {
    format!("{:04}{:02}", at.year(), at.month())
}

/// Atomically draws the next sequence value for the given month.
///
/// Runs inside the caller's transaction. The first draw of a month inserts
/// the counter row at 1; later draws increment it and return the new value
/// in the same statement.
pub async fn next_sequence(
    conn: &impl ConnectionTrait,
    at: DateTime<Utc>,
) -> Result<i64, ServiceError> {
    let key = month_key(at);
    let backend = conn.get_database_backend();

    let sql = match backend {
        DatabaseBackend::Postgres => {
            "INSERT INTO order_sequences (month_key, next_seq) VALUES ($1, 1) \
             ON CONFLICT (month_key) DO UPDATE SET next_seq = order_sequences.next_seq + 1 \
             RETURNING next_seq"
        }
        _ => {
            "INSERT INTO order_sequences (month_key, next_seq) VALUES (?, 1) \
             ON CONFLICT (month_key) DO UPDATE SET next_seq = order_sequences.next_seq + 1 \
             RETURNING next_seq"
        }
    };

    let row = SequenceRow::find_by_statement(Statement::from_sql_and_values(
        backend,
        sql,
        [key.clone().into()],
    ))
    .one(conn)
    .await?
    .ok_or_else(|| {
        ServiceError::InternalError(format!("Sequence upsert for {} returned no row", key))
    })?;

    Ok(row.next_seq)
}

/// Draws a sequence value and formats the full order number.
pub async fn allocate(
    conn: &impl ConnectionTrait,
    prefix: &str,
    at: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let seq = next_sequence(conn, at).await?;
    Ok(format_order_number(prefix, at, seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_zero_padding() {
        let at = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        assert_eq!(format_order_number("BKC", at, 7), "BKC20240300007");
    }

    #[test]
    fn formats_large_sequence() {
        let at = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(format_order_number("BKC", at, 12345), "BKC20241212345");
    }

    #[test]
    fn month_key_pads_single_digit_months() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(month_key(at), "202601");
    }
}
