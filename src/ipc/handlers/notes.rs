use crate::calc::{text_matches, CategorySelector};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, now_rfc3339, require_session, sha256_hex, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const ATTACHMENTS_DIR: &str = "attachments";

#[derive(Debug, Clone)]
struct NoteRow {
    id: String,
    title: String,
    body: String,
    subject: String,
    created_at: String,
    updated_at: String,
}

fn get_note(conn: &Connection, note_id: &str) -> Result<NoteRow, HandlerErr> {
    conn.query_row(
        "SELECT id, title, body, subject, created_at, updated_at FROM notes WHERE id = ?",
        [note_id],
        |r| {
            Ok(NoteRow {
                id: r.get(0)?,
                title: r.get(1)?,
                body: r.get(2)?,
                subject: r.get(3)?,
                created_at: r.get(4)?,
                updated_at: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| HandlerErr::new("not_found", "note not found"))
}

fn note_json(note: &NoteRow, attachments: &[serde_json::Value]) -> serde_json::Value {
    json!({
        "id": note.id,
        "title": note.title,
        "body": note.body,
        "subject": note.subject,
        "createdAt": note.created_at,
        "updatedAt": note.updated_at,
        "attachments": attachments
    })
}

fn attachments_by_note(
    conn: &Connection,
) -> Result<HashMap<String, Vec<serde_json::Value>>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT note_id, id, filename, mime_type, size_bytes, sha256
             FROM note_attachments
             ORDER BY created_at",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([], |r| {
            let note_id: String = r.get(0)?;
            let id: String = r.get(1)?;
            let filename: String = r.get(2)?;
            let mime_type: String = r.get(3)?;
            let size_bytes: i64 = r.get(4)?;
            let sha256: String = r.get(5)?;
            Ok((
                note_id,
                json!({
                    "id": id,
                    "filename": filename,
                    "mimeType": mime_type,
                    "sizeBytes": size_bytes,
                    "sha256": sha256
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut by_note: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    for (note_id, attachment) in rows {
        by_note.entry(note_id).or_default().push(attachment);
    }
    Ok(by_note)
}

/// Newest-first listing, narrowed by the free-text query and the subject
/// selector. Filtering happens in memory and keeps the base ordering.
fn notes_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let query = get_optional_str(params, "query").unwrap_or_default();
    let selector = CategorySelector::parse(get_optional_str(params, "subject").as_deref());

    let mut stmt = conn
        .prepare(
            "SELECT id, title, body, subject, created_at, updated_at
             FROM notes
             ORDER BY updated_at DESC",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let all = stmt
        .query_map([], |r| {
            Ok(NoteRow {
                id: r.get(0)?,
                title: r.get(1)?,
                body: r.get(2)?,
                subject: r.get(3)?,
                created_at: r.get(4)?,
                updated_at: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let by_note = attachments_by_note(conn)?;
    let empty: Vec<serde_json::Value> = Vec::new();
    let notes: Vec<serde_json::Value> = all
        .iter()
        .filter(|n| selector.matches(&n.subject) && text_matches(&query, &n.title, &n.body))
        .map(|n| note_json(n, by_note.get(&n.id).unwrap_or(&empty)))
        .collect();

    let note_count = notes.len();
    Ok(json!({ "notes": notes, "noteCount": note_count }))
}

fn notes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?.trim().to_string();
    let body = get_required_str(params, "body")?;
    let subject = get_required_str(params, "subject")?.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr::new("bad_params", "title must not be empty"));
    }
    if subject.is_empty() {
        return Err(HandlerErr::new("bad_params", "subject must not be empty"));
    }

    let now = now_rfc3339();
    let note = NoteRow {
        id: Uuid::new_v4().to_string(),
        title,
        body,
        subject,
        created_at: now.clone(),
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO notes(id, title, body, subject, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &note.id,
            &note.title,
            &note.body,
            &note.subject,
            &note.created_at,
            &note.updated_at,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "notes" })),
    })?;

    Ok(json!({ "note": note_json(&note, &[]) }))
}

fn notes_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let note_id = get_required_str(params, "noteId")?;
    let mut note = get_note(conn, &note_id)?;

    if let Some(title) = get_optional_str(params, "title") {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(HandlerErr::new("bad_params", "title must not be empty"));
        }
        note.title = title;
    }
    if let Some(body) = get_optional_str(params, "body") {
        note.body = body;
    }
    if let Some(subject) = get_optional_str(params, "subject") {
        let subject = subject.trim().to_string();
        if subject.is_empty() {
            return Err(HandlerErr::new("bad_params", "subject must not be empty"));
        }
        note.subject = subject;
    }
    note.updated_at = now_rfc3339();

    conn.execute(
        "UPDATE notes SET title = ?, body = ?, subject = ?, updated_at = ? WHERE id = ?",
        (
            &note.title,
            &note.body,
            &note.subject,
            &note.updated_at,
            &note.id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "notes" })),
    })?;

    let by_note = attachments_by_note(conn)?;
    let empty: Vec<serde_json::Value> = Vec::new();
    Ok(json!({ "note": note_json(&note, by_note.get(&note.id).unwrap_or(&empty)) }))
}

fn notes_delete(
    conn: &Connection,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let note_id = get_required_str(params, "noteId")?;
    get_note(conn, &note_id)?;

    let mut stmt = conn
        .prepare("SELECT stored_path FROM note_attachments WHERE note_id = ?")
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let stored_paths: Vec<String> = stmt
        .query_map([&note_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM note_attachments WHERE note_id = ?", [&note_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "note_attachments" })),
        })?;
    tx.execute("DELETE FROM notes WHERE id = ?", [&note_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "notes" })),
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    // File cleanup is best-effort; the rows are already gone.
    for rel in stored_paths {
        let _ = std::fs::remove_file(workspace.join(rel));
    }

    Ok(json!({ "ok": true }))
}

fn notes_upload_attachment(
    conn: &Connection,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let note_id = get_required_str(params, "noteId")?;
    get_note(conn, &note_id)?;
    let filename = get_required_str(params, "filename")?.trim().to_string();
    if filename.is_empty() {
        return Err(HandlerErr::new("bad_params", "filename must not be empty"));
    }
    let mime_type = get_required_str(params, "mimeType")?;
    let data = B64
        .decode(get_required_str(params, "dataBase64")?)
        .map_err(|_| HandlerErr::new("bad_params", "dataBase64 is not valid base64"))?;

    let attachment_id = Uuid::new_v4().to_string();
    let rel_path = format!("{}/{}", ATTACHMENTS_DIR, attachment_id);
    let dir = workspace.join(ATTACHMENTS_DIR);
    std::fs::create_dir_all(&dir)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    std::fs::write(workspace.join(&rel_path), &data)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;

    let digest = sha256_hex(&data);
    let size_bytes = data.len() as i64;
    conn.execute(
        "INSERT INTO note_attachments(id, note_id, filename, mime_type, size_bytes, sha256, stored_path, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &attachment_id,
            &note_id,
            &filename,
            &mime_type,
            size_bytes,
            &digest,
            &rel_path,
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "note_attachments" })),
    })?;

    Ok(json!({
        "attachment": {
            "id": attachment_id,
            "noteId": note_id,
            "filename": filename,
            "mimeType": mime_type,
            "sizeBytes": size_bytes,
            "sha256": digest
        }
    }))
}

fn notes_delete_attachment(
    conn: &Connection,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let attachment_id = get_required_str(params, "attachmentId")?;
    let stored_path: Option<String> = conn
        .query_row(
            "SELECT stored_path FROM note_attachments WHERE id = ?",
            [&attachment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some(stored_path) = stored_path else {
        return Err(HandlerErr::new("not_found", "attachment not found"));
    };

    conn.execute("DELETE FROM note_attachments WHERE id = ?", [&attachment_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "note_attachments" })),
        })?;
    let _ = std::fs::remove_file(workspace.join(stored_path));

    Ok(json!({ "ok": true }))
}

fn guarded(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Path, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(workspace) = state.workspace.as_deref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_session(conn, req) {
        return e.response(&req.id);
    }
    match f(conn, workspace, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notes.list" => Some(guarded(state, req, |c, _, p| notes_list(c, p))),
        "notes.create" => Some(guarded(state, req, |c, _, p| notes_create(c, p))),
        "notes.update" => Some(guarded(state, req, |c, _, p| notes_update(c, p))),
        "notes.delete" => Some(guarded(state, req, notes_delete)),
        "notes.uploadAttachment" => Some(guarded(state, req, notes_upload_attachment)),
        "notes.deleteAttachment" => Some(guarded(state, req, notes_delete_attachment)),
        _ => None,
    }
}
