//! Appointment ledger: an append-only SQLite table of confirmed bookings.
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::instrument;

use crate::model::Appointment;

pub type Pool = SqlitePool;

/// A ledger row as read back, with its storage metadata.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    #[serde(flatten)]
    pub appointment: Appointment,
    pub created_at: NaiveDateTime,
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open ledger at {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Make sure a file-backed SQLite URL points at an existing directory and
/// that the file is created on first use. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Append one confirmed appointment. Returns the new row id.
#[instrument(skip_all, fields(booking_id = %appt.booking_id))]
pub async fn append_appointment(pool: &Pool, appt: &Appointment) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO appointments (booking_id, patient_name, dob, doctor_id, date, start_time, is_new_patient, insurance_carrier, member_id, group_number, patient_phone) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&appt.booking_id)
    .bind(&appt.patient_name)
    .bind(&appt.dob)
    .bind(&appt.doctor_id)
    .bind(&appt.date)
    .bind(&appt.start_time)
    .bind(appt.is_new_patient)
    .bind(appt.insurance_carrier.as_deref())
    .bind(appt.member_id.as_deref())
    .bind(appt.group_number.as_deref())
    .bind(appt.patient_phone.as_deref())
    .fetch_one(pool)
    .await
    .context("failed to append appointment")?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn list_appointments(pool: &Pool) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query(
        "SELECT id, booking_id, patient_name, dob, doctor_id, date, start_time, is_new_patient, insurance_carrier, member_id, group_number, patient_phone, created_at FROM appointments ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(entry_from_row).collect()
}

#[instrument(skip_all)]
pub async fn count_appointments(pool: &Pool) -> Result<i64> {
    let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM appointments")
        .fetch_one(pool)
        .await?;
    Ok(cnt)
}

fn entry_from_row(row: &SqliteRow) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        appointment: Appointment {
            booking_id: row.try_get("booking_id")?,
            patient_name: row.try_get("patient_name")?,
            dob: row.try_get("dob")?,
            doctor_id: row.try_get("doctor_id")?,
            date: row.try_get("date")?,
            start_time: row.try_get("start_time")?,
            is_new_patient: row.try_get("is_new_patient")?,
            insurance_carrier: row.try_get("insurance_carrier")?,
            member_id: row.try_get("member_id")?,
            group_number: row.try_get("group_number")?,
            patient_phone: row.try_get("patient_phone")?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample(booking_id: &str) -> Appointment {
        Appointment {
            booking_id: booking_id.into(),
            patient_name: "Asha Rao".into(),
            dob: "1999-01-01".into(),
            doctor_id: "D001".into(),
            date: "2025-03-10".into(),
            start_time: "14:00".into(),
            is_new_patient: true,
            insurance_carrier: None,
            member_id: None,
            group_number: None,
            patient_phone: None,
        }
    }

    #[tokio::test]
    async fn append_and_list_round_trip() {
        let pool = setup_pool().await;
        assert_eq!(count_appointments(&pool).await.unwrap(), 0);

        let first = append_appointment(&pool, &sample("b-1")).await.unwrap();
        let mut second = sample("b-2");
        second.is_new_patient = false;
        second.patient_phone = Some("+15550100".into());
        let second_id = append_appointment(&pool, &second).await.unwrap();
        assert!(second_id > first);

        let rows = list_appointments(&pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].appointment, sample("b-1"));
        assert_eq!(rows[1].appointment, second);
        assert_eq!(count_appointments(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_booking_id_is_rejected() {
        let pool = setup_pool().await;
        append_appointment(&pool, &sample("dup")).await.unwrap();
        assert!(append_appointment(&pool, &sample("dup")).await.is_err());
        assert_eq!(count_appointments(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ledger_entries_serialize_flat() {
        let pool = setup_pool().await;
        append_appointment(&pool, &sample("b-json")).await.unwrap();
        let rows = list_appointments(&pool).await.unwrap();
        let value = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(value["id"], rows[0].id);
        assert_eq!(value["booking_id"], "b-json");
        assert_eq!(value["start_time"], "14:00");
        assert!(value["created_at"].is_string());
    }

    #[test]
    fn prepare_sqlite_url_handles_memory_and_files() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/appointments.db");
        let url = prepare_sqlite_url(&format!("sqlite://{}", path.display()));
        assert!(url.ends_with("appointments.db?mode=rwc"));
        assert!(dir.path().join("nested").exists());
    }
}
