use crate::ipc::error::{err, ok};
use crate::ipc::handlers::auth::{derive_password_hash, MIN_PASSWORD_LEN};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, now_rfc3339, require_session, HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const AVATARS_DIR: &str = "avatars";

#[derive(Debug, Clone)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    avatar_path: Option<String>,
    created_at: String,
}

fn get_user(conn: &Connection, user_id: &str) -> Result<UserRow, HandlerErr> {
    conn.query_row(
        "SELECT id, username, email, avatar_path, created_at FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(UserRow {
                id: r.get(0)?,
                username: r.get(1)?,
                email: r.get(2)?,
                avatar_path: r.get(3)?,
                created_at: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| HandlerErr::new("not_found", "user not found"))
}

fn user_json(user: &UserRow) -> serde_json::Value {
    json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "avatarPath": user.avatar_path,
        "createdAt": user.created_at
    })
}

fn profile_get(conn: &Connection, session: &Session) -> Result<serde_json::Value, HandlerErr> {
    let user = get_user(conn, &session.user_id)?;
    Ok(json!({ "user": user_json(&user) }))
}

fn profile_update(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut user = get_user(conn, &session.user_id)?;

    if let Some(username) = get_optional_str(params, "username") {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(HandlerErr::new("bad_params", "username must not be empty"));
        }
        let taken = conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ? AND id <> ?",
                (&username, &user.id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
            .is_some();
        if taken {
            return Err(HandlerErr::new("conflict", "username already taken"));
        }
        user.username = username;
    }
    if let Some(email) = get_optional_str(params, "email") {
        let email = email.trim().to_string();
        let at = email.find('@');
        if at.map(|i| i == 0 || i == email.len() - 1).unwrap_or(true) {
            return Err(HandlerErr::new("bad_params", "email is not valid"));
        }
        user.email = email;
    }

    conn.execute(
        "UPDATE users SET username = ?, email = ?, updated_at = ? WHERE id = ?",
        (&user.username, &user.email, now_rfc3339(), &user.id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "users" })),
    })?;

    Ok(json!({ "user": user_json(&user) }))
}

fn profile_change_password(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let current = get_required_str(params, "currentPassword")?;
    let new = get_required_str(params, "newPassword")?;
    if new.len() < MIN_PASSWORD_LEN {
        return Err(HandlerErr::new(
            "bad_params",
            format!("password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }

    let (stored_hash, salt): (String, String) = conn
        .query_row(
            "SELECT password_hash, password_salt FROM users WHERE id = ?",
            [&session.user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if derive_password_hash(&current, &salt) != stored_hash {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "current password is wrong",
        ));
    }

    let new_salt = Uuid::new_v4().simple().to_string();
    let new_hash = derive_password_hash(&new, &new_salt);
    conn.execute(
        "UPDATE users SET password_hash = ?, password_salt = ?, updated_at = ? WHERE id = ?",
        (&new_hash, &new_salt, now_rfc3339(), &session.user_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "users" })),
    })?;

    // Changing the password invalidates every other device's session.
    conn.execute(
        "DELETE FROM sessions WHERE user_id = ? AND token <> ?",
        (&session.user_id, &session.token),
    )
    .map_err(|e| HandlerErr {
        code: "db_delete_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "sessions" })),
    })?;

    Ok(json!({ "ok": true }))
}

fn avatar_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn profile_upload_avatar(
    conn: &Connection,
    workspace: &std::path::Path,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mime_type = get_required_str(params, "mimeType")?;
    let data = B64
        .decode(get_required_str(params, "dataBase64")?)
        .map_err(|_| HandlerErr::new("bad_params", "dataBase64 is not valid base64"))?;

    let user = get_user(conn, &session.user_id)?;
    let rel_path = format!(
        "{}/{}.{}",
        AVATARS_DIR,
        user.id,
        avatar_extension(&mime_type)
    );
    std::fs::create_dir_all(workspace.join(AVATARS_DIR))
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    std::fs::write(workspace.join(&rel_path), &data)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;

    // A re-upload with a different mime type leaves the old file behind.
    if let Some(old) = user.avatar_path.as_deref() {
        if old != rel_path {
            let _ = std::fs::remove_file(workspace.join(old));
        }
    }

    conn.execute(
        "UPDATE users SET avatar_path = ?, updated_at = ? WHERE id = ?",
        (&rel_path, now_rfc3339(), &user.id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "users" })),
    })?;

    Ok(json!({ "avatarPath": rel_path }))
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_session(conn, req) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    match profile_get(conn, &session) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_session(conn, req) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    match profile_update(conn, &session, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_change_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_session(conn, req) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    match profile_change_password(conn, &session, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_upload_avatar(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(workspace) = state.workspace.as_deref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_session(conn, req) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    match profile_upload_avatar(conn, workspace, &session, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "profile.get" => Some(handle_get(state, req)),
        "profile.update" => Some(handle_update(state, req)),
        "profile.changePassword" => Some(handle_change_password(state, req)),
        "profile.uploadAvatar" => Some(handle_upload_avatar(state, req)),
        _ => None,
    }
}
