use crate::calc::{week_window, AttendanceStatus, WEEKDAY_LABELS};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, parse_date_param, require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    weekday: i64,
    subject: String,
    time_range: String,
    room: String,
    attendance_status: String,
    sort_order: i64,
}

impl Entry {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "weekday": self.weekday,
            "subject": self.subject,
            "timeRange": self.time_range,
            "room": self.room,
            "attendanceStatus": self.attendance_status,
            "sortOrder": self.sort_order
        })
    }
}

fn get_entry(conn: &Connection, entry_id: &str) -> Result<Entry, HandlerErr> {
    conn.query_row(
        "SELECT id, weekday, subject, time_range, room, attendance_status, sort_order
         FROM schedule_entries
         WHERE id = ?",
        [entry_id],
        |r| {
            Ok(Entry {
                id: r.get(0)?,
                weekday: r.get(1)?,
                subject: r.get(2)?,
                time_range: r.get(3)?,
                room: r.get(4)?,
                attendance_status: r.get(5)?,
                sort_order: r.get(6)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| HandlerErr::new("not_found", "schedule entry not found"))
}

fn get_weekday_param(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let weekday = params
        .get("weekday")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing weekday"))?;
    if !(0..=6).contains(&weekday) {
        return Err(HandlerErr::new(
            "bad_params",
            "weekday must be 0 (Monday) through 6 (Sunday)",
        ));
    }
    Ok(weekday)
}

fn next_sort_order(conn: &Connection, weekday: i64) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM schedule_entries WHERE weekday = ?",
        [weekday],
        |r| r.get(0),
    )
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn timetable_week_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let reference = match get_optional_str(params, "reference") {
        Some(raw) => parse_date_param(&raw)?,
        None => Local::now().date_naive(),
    };
    let window = week_window(reference);

    let mut stmt = conn
        .prepare(
            "SELECT id, weekday, subject, time_range, room, attendance_status, sort_order
             FROM schedule_entries
             ORDER BY weekday, sort_order",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let entries = stmt
        .query_map([], |r| {
            Ok(Entry {
                id: r.get(0)?,
                weekday: r.get(1)?,
                subject: r.get(2)?,
                time_range: r.get(3)?,
                room: r.get(4)?,
                attendance_status: r.get(5)?,
                sort_order: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let days: Vec<serde_json::Value> = window
        .iter()
        .enumerate()
        .map(|(i, date)| {
            let day_entries: Vec<serde_json::Value> = entries
                .iter()
                .filter(|e| e.weekday == i as i64)
                .map(Entry::to_json)
                .collect();
            json!({
                "weekday": i,
                "label": WEEKDAY_LABELS[i],
                "date": date.to_string(),
                "entries": day_entries
            })
        })
        .collect();

    Ok(json!({
        "reference": reference.to_string(),
        "days": days
    }))
}

fn timetable_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let weekday = get_weekday_param(params)?;
    let subject = get_required_str(params, "subject")?.trim().to_string();
    let time_range = get_required_str(params, "timeRange")?.trim().to_string();
    let room = get_required_str(params, "room")?.trim().to_string();
    if subject.is_empty() {
        return Err(HandlerErr::new("bad_params", "subject must not be empty"));
    }

    let entry = Entry {
        id: Uuid::new_v4().to_string(),
        weekday,
        subject,
        time_range,
        room,
        attendance_status: AttendanceStatus::Unmarked.as_str().to_string(),
        sort_order: next_sort_order(conn, weekday)?,
    };
    conn.execute(
        "INSERT INTO schedule_entries(id, weekday, subject, time_range, room, attendance_status, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &entry.id,
            entry.weekday,
            &entry.subject,
            &entry.time_range,
            &entry.room,
            &entry.attendance_status,
            entry.sort_order,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "schedule_entries" })),
    })?;

    Ok(json!({ "entry": entry.to_json() }))
}

fn timetable_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let mut entry = get_entry(conn, &entry_id)?;

    if let Some(subject) = get_optional_str(params, "subject") {
        let subject = subject.trim().to_string();
        if subject.is_empty() {
            return Err(HandlerErr::new("bad_params", "subject must not be empty"));
        }
        entry.subject = subject;
    }
    if let Some(time_range) = get_optional_str(params, "timeRange") {
        entry.time_range = time_range.trim().to_string();
    }
    if let Some(room) = get_optional_str(params, "room") {
        entry.room = room.trim().to_string();
    }
    if params.get("weekday").is_some() {
        let weekday = get_weekday_param(params)?;
        if weekday != entry.weekday {
            entry.weekday = weekday;
            entry.sort_order = next_sort_order(conn, weekday)?;
        }
    }

    conn.execute(
        "UPDATE schedule_entries
         SET weekday = ?, subject = ?, time_range = ?, room = ?, sort_order = ?
         WHERE id = ?",
        (
            entry.weekday,
            &entry.subject,
            &entry.time_range,
            &entry.room,
            entry.sort_order,
            &entry.id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "schedule_entries" })),
    })?;

    Ok(json!({ "entry": entry.to_json() }))
}

fn timetable_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let deleted = conn
        .execute("DELETE FROM schedule_entries WHERE id = ?", [&entry_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "schedule_entries" })),
        })?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "schedule entry not found"));
    }
    Ok(json!({ "ok": true }))
}

fn timetable_cycle_attendance(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let entry = get_entry(conn, &entry_id)?;

    // Rows written before the status column was constrained normalize to unmarked.
    let current =
        AttendanceStatus::parse(&entry.attendance_status).unwrap_or(AttendanceStatus::Unmarked);
    let next = current.next();

    conn.execute(
        "UPDATE schedule_entries SET attendance_status = ? WHERE id = ?",
        (next.as_str(), &entry_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "schedule_entries" })),
    })?;

    Ok(json!({
        "entryId": entry_id,
        "attendanceStatus": next.as_str()
    }))
}

fn guarded(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_session(conn, req) {
        return e.response(&req.id);
    }
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.weekOpen" => Some(guarded(state, req, timetable_week_open)),
        "timetable.create" => Some(guarded(state, req, timetable_create)),
        "timetable.update" => Some(guarded(state, req, timetable_update)),
        "timetable.delete" => Some(guarded(state, req, timetable_delete)),
        "timetable.cycleAttendance" => Some(guarded(state, req, timetable_cycle_attendance)),
        _ => None,
    }
}
