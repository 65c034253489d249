use crate::calc::{mean_percentage, AttendanceStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, parse_date_param, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn record_json(id: &str, subject: &str, date: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "subject": subject,
        "date": date,
        "status": status
    })
}

/// Upsert the status for one (subject, date) cell.
fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject = get_required_str(params, "subject")?.trim().to_string();
    if subject.is_empty() {
        return Err(HandlerErr::new("bad_params", "subject must not be empty"));
    }
    let date = parse_date_param(&get_required_str(params, "date")?)?.to_string();
    let status_raw = get_required_str(params, "status")?;
    let Some(status) = AttendanceStatus::parse(&status_raw) else {
        return Err(HandlerErr::new(
            "bad_params",
            "status must be unmarked, present, or absent",
        ));
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance_records(id, subject, date, status)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(subject, date) DO UPDATE SET
           status = excluded.status",
        (&id, &subject, &date, status.as_str()),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_records" })),
    })?;

    let stored_id: String = conn
        .query_row(
            "SELECT id FROM attendance_records WHERE subject = ? AND date = ?",
            (&subject, &date),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "record": record_json(&stored_id, &subject, &date, status.as_str()) }))
}

fn attendance_by_subject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject = get_required_str(params, "subject")?.trim().to_string();
    let exists = conn
        .query_row(
            "SELECT 1 FROM attendance_records WHERE subject = ? LIMIT 1",
            [&subject],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "no records for subject"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, subject, date, status
             FROM attendance_records
             WHERE subject = ?
             ORDER BY date",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let records = stmt
        .query_map([&subject], |r| {
            let id: String = r.get(0)?;
            let subject: String = r.get(1)?;
            let date: String = r.get(2)?;
            let status: String = r.get(3)?;
            Ok(record_json(&id, &subject, &date, &status))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "subject": subject, "records": records }))
}

fn attendance_by_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = parse_date_param(&get_required_str(params, "date")?)?.to_string();

    let mut stmt = conn
        .prepare(
            "SELECT id, subject, date, status
             FROM attendance_records
             WHERE date = ?
             ORDER BY subject",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let records = stmt
        .query_map([&date], |r| {
            let id: String = r.get(0)?;
            let subject: String = r.get(1)?;
            let date: String = r.get(2)?;
            let status: String = r.get(3)?;
            Ok(record_json(&id, &subject, &date, &status))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "date": date, "records": records }))
}

/// Per-subject present/total/percentage over marked records, plus the mean
/// of the per-subject percentages. Subjects with nothing marked yet do not
/// contribute a row; an entirely unmarked workspace is a `no_data` error,
/// never a misleading 0%.
fn attendance_stats(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT subject,
                    SUM(CASE WHEN status = 'present' THEN 1 ELSE 0 END) AS present,
                    SUM(CASE WHEN status IN ('present', 'absent') THEN 1 ELSE 0 END) AS total
             FROM attendance_records
             GROUP BY subject
             ORDER BY subject",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows: Vec<(String, i64, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut stats = Vec::new();
    let mut percentages = Vec::new();
    for (subject, present, total) in rows {
        if total == 0 {
            continue;
        }
        let percentage = 100.0 * present as f64 / total as f64;
        percentages.push(percentage);
        stats.push(json!({
            "subject": subject,
            "present": present,
            "total": total,
            "percentage": percentage
        }));
    }

    let overall = mean_percentage(percentages.iter().copied())
        .map_err(|e| HandlerErr::new("no_data", e.message))?;

    let subject_count = stats.len();
    Ok(json!({
        "stats": stats,
        "subjectCount": subject_count,
        "overallPercentage": overall
    }))
}

fn handle_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_session(conn, req) {
        return e.response(&req.id);
    }
    match attendance_mark(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_by_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_session(conn, req) {
        return e.response(&req.id);
    }
    match attendance_by_subject(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_by_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_session(conn, req) {
        return e.response(&req.id);
    }
    match attendance_by_date(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_session(conn, req) {
        return e.response(&req.id);
    }
    match attendance_stats(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_mark(state, req)),
        "attendance.bySubject" => Some(handle_by_subject(state, req)),
        "attendance.byDate" => Some(handle_by_date(state, req)),
        "attendance.stats" => Some(handle_stats(state, req)),
        _ => None,
    }
}
