//! Data-quality report log and alert lifecycle
//!
//! Rows are append-only except for alert-class rows, whose status moves
//! RAISED -> ACKED -> RESOLVED through guarded single-statement updates.

use super::models::{
    format_run_ts, CheckType, LatestStatus, NewReport, QualityReport, ReportStatus,
};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

const REPORT_COLUMNS: &str =
    "id, run_ts, symbol, timeframe, check_type, status, details, created_at";

type RawReport = (i64, String, String, Option<String>, String, String, String, String);

fn raw_report(row: &Row<'_>) -> rusqlite::Result<RawReport> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_report(raw: RawReport) -> Result<QualityReport> {
    let (id, run_ts, symbol, timeframe, check_type, status, details, created_at) = raw;
    Ok(QualityReport {
        id,
        run_ts,
        symbol,
        timeframe,
        check_type: check_type.parse()?,
        status: status.parse()?,
        details: serde_json::from_str(&details)?,
        created_at,
    })
}

fn sql_list(items: &[&str]) -> String {
    items
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

fn alert_types_sql() -> String {
    sql_list(&CheckType::ALERTS.map(|c| c.as_str()))
}

/// Append one report row, returning its id
pub fn append_report(conn: &Connection, report: &NewReport) -> Result<i64> {
    let mut details = serde_json::to_value(&report.details)?;
    if let (Some(run_id), Some(obj)) = (&report.run_id, details.as_object_mut()) {
        obj.insert("run_id".to_string(), serde_json::Value::String(run_id.clone()));
    }

    conn.execute(
        "INSERT INTO data_quality_reports (run_ts, symbol, timeframe, check_type, status, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            format_run_ts(report.run_ts),
            report.symbol,
            report.timeframe,
            report.check_type().as_str(),
            report.status.as_str(),
            details.to_string(),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Most recent reports of one kind, newest first.
///
/// With no timeframe every timeframe of the symbol matches.
pub fn read_recent(
    conn: &Connection,
    symbol: &str,
    timeframe: Option<&str>,
    check_type: CheckType,
    limit: usize,
) -> Result<Vec<QualityReport>> {
    let raws = match timeframe {
        Some(tf) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM data_quality_reports
                 WHERE symbol = ?1 AND timeframe = ?2 AND check_type = ?3
                 ORDER BY run_ts DESC, id DESC
                 LIMIT ?4",
                REPORT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![symbol, tf, check_type.as_str(), limit as i64], raw_report)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM data_quality_reports
                 WHERE symbol = ?1 AND check_type = ?2
                 ORDER BY run_ts DESC, id DESC
                 LIMIT ?3",
                REPORT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![symbol, check_type.as_str(), limit as i64], raw_report)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };

    raws.into_iter().map(into_report).collect()
}

pub fn get_report(conn: &Connection, id: i64) -> Result<Option<QualityReport>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM data_quality_reports WHERE id = ?1",
        REPORT_COLUMNS
    ))?;
    let mut rows = stmt
        .query_map(params![id], raw_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.pop().map(into_report).transpose()
}

/// Move an alert to `new_status` if its current status allows it.
///
/// Returns false when the row is missing, is not an alert, or was already
/// moved past the required prior status.
pub fn transition_alert(
    conn: &Connection,
    alert_id: i64,
    new_status: ReportStatus,
    actor: &str,
    note: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let predecessors: Vec<&str> = new_status
        .legal_predecessors()
        .iter()
        .map(|s| s.as_str())
        .collect();
    if predecessors.is_empty() {
        return Err(AppError::Validation(format!(
            "alerts cannot be moved to {}",
            new_status
        )));
    }

    let at = at.to_rfc3339();
    let rows = match new_status {
        ReportStatus::Acked => conn.execute(
            &format!(
                "UPDATE data_quality_reports
                 SET status = ?1,
                     details = json_set(COALESCE(details, '{{}}'),
                                        '$.acknowledged_by', ?2,
                                        '$.acknowledged_at', ?3)
                 WHERE id = ?4 AND check_type IN ({}) AND status IN ({})",
                alert_types_sql(),
                sql_list(&predecessors)
            ),
            params![new_status.as_str(), actor, at, alert_id],
        )?,
        _ => conn.execute(
            &format!(
                "UPDATE data_quality_reports
                 SET status = ?1,
                     details = json_set(COALESCE(details, '{{}}'),
                                        '$.resolved_by', ?2,
                                        '$.resolved_at', ?3,
                                        '$.resolution_note', ?4)
                 WHERE id = ?5 AND check_type IN ({}) AND status IN ({})",
                alert_types_sql(),
                sql_list(&predecessors)
            ),
            params![new_status.as_str(), actor, at, note.unwrap_or(""), alert_id],
        )?,
    };

    if rows > 0 {
        tracing::info!("Alert {} moved to {} by {}", alert_id, new_status, actor);
    }
    Ok(rows > 0)
}

/// Resolve every open alert of one kind for a (symbol, timeframe)
pub fn resolve_open_alerts(
    conn: &Connection,
    symbol: &str,
    timeframe: &str,
    check_type: CheckType,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE data_quality_reports
         SET status = 'RESOLVED',
             details = json_set(COALESCE(details, '{}'),
                                '$.resolved_by', ?1,
                                '$.resolved_at', ?2)
         WHERE symbol = ?3 AND timeframe = ?4 AND check_type = ?5
           AND status IN ('RAISED', 'ACKED')",
        params![actor, at.to_rfc3339(), symbol, timeframe, check_type.as_str()],
    )?;
    Ok(rows)
}

/// Alert rows still RAISED or ACKED, newest first
pub fn active_alerts(conn: &Connection) -> Result<Vec<QualityReport>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM data_quality_reports
         WHERE check_type IN ({}) AND status IN ('RAISED', 'ACKED')
         ORDER BY run_ts DESC, id DESC",
        REPORT_COLUMNS,
        alert_types_sql()
    ))?;
    let raws = stmt
        .query_map([], raw_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raws.into_iter().map(into_report).collect()
}

/// Alert rows in any state, newest first
pub fn alert_history(conn: &Connection, limit: usize) -> Result<Vec<QualityReport>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM data_quality_reports
         WHERE check_type IN ({})
         ORDER BY run_ts DESC, id DESC
         LIMIT ?1",
        REPORT_COLUMNS,
        alert_types_sql()
    ))?;
    let raws = stmt
        .query_map(params![limit as i64], raw_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raws.into_iter().map(into_report).collect()
}

/// Latest status per (symbol, timeframe, check_type)
pub fn latest_statuses(conn: &Connection) -> Result<Vec<LatestStatus>> {
    let mut stmt = conn.prepare(
        "SELECT symbol, timeframe, check_type, status FROM (
             SELECT symbol, timeframe, check_type, status,
                    ROW_NUMBER() OVER (
                        PARTITION BY symbol, timeframe, check_type
                        ORDER BY run_ts DESC, id DESC
                    ) AS rn
             FROM data_quality_reports
         )
         WHERE rn = 1
         ORDER BY symbol, timeframe, check_type",
    )?;

    let raws = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raws.into_iter()
        .map(|(symbol, timeframe, check_type, status)| {
            Ok(LatestStatus {
                symbol,
                timeframe,
                check_type: check_type.parse()?,
                status: status.parse()?,
            })
        })
        .collect()
}
