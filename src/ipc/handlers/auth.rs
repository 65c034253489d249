use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, now_rfc3339, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{Duration, Utc};
use pbkdf2::pbkdf2_hmac;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SESSION_TTL_DAYS: i64 = 30;
pub(crate) const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn derive_password_hash(password: &str, salt: &str) -> String {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut key,
    );
    B64.encode(key)
}

fn create_session(conn: &Connection, user_id: &str) -> Result<(String, String), HandlerErr> {
    let token = Uuid::new_v4().to_string();
    let expires_at = (Utc::now() + Duration::days(SESSION_TTL_DAYS)).to_rfc3339();
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
        (&token, user_id, now_rfc3339(), &expires_at),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "sessions" })),
    })?;
    Ok((token, expires_at))
}

fn signed_in_result(
    token: String,
    expires_at: String,
    user_id: &str,
    username: &str,
    email: &str,
) -> serde_json::Value {
    json!({
        "token": token,
        "expiresAt": expires_at,
        "user": {
            "id": user_id,
            "username": username,
            "email": email
        }
    })
}

fn auth_register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?.trim().to_string();
    let password = get_required_str(params, "password")?;
    let email = get_required_str(params, "email")?.trim().to_string();

    if username.is_empty() {
        return Err(HandlerErr::new("bad_params", "username must not be empty"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(HandlerErr::new(
            "bad_params",
            format!("password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    let at = email.find('@');
    if at.map(|i| i == 0 || i == email.len() - 1).unwrap_or(true) {
        return Err(HandlerErr::new("bad_params", "email is not valid"));
    }

    let taken = conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [&username], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .is_some();
    if taken {
        return Err(HandlerErr::new("conflict", "username already taken"));
    }

    let user_id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().simple().to_string();
    let hash = derive_password_hash(&password, &salt);
    conn.execute(
        "INSERT INTO users(id, username, email, password_hash, password_salt, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&user_id, &username, &email, &hash, &salt, now_rfc3339()),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "users" })),
    })?;

    let (token, expires_at) = create_session(conn, &user_id)?;
    Ok(signed_in_result(token, expires_at, &user_id, &username, &email))
}

fn auth_sign_in(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?.trim().to_string();
    let password = get_required_str(params, "password")?;

    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT id, email, password_hash, password_salt FROM users WHERE username = ?",
            [&username],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    // Same code whether the user is unknown or the password is wrong.
    let Some((user_id, email, stored_hash, salt)) = row else {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "unknown username or wrong password",
        ));
    };
    if derive_password_hash(&password, &salt) != stored_hash {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "unknown username or wrong password",
        ));
    }

    let (token, expires_at) = create_session(conn, &user_id)?;
    Ok(signed_in_result(token, expires_at, &user_id, &username, &email))
}

fn auth_sign_out(conn: &Connection, token: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.execute("DELETE FROM sessions WHERE token = ?", [token])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "sessions" })),
        })?;
    Ok(json!({ "signedOut": true }))
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match auth_register(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match auth_sign_in(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_session(conn, req) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    match auth_sign_out(conn, &session.token) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_register(state, req)),
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        _ => None,
    }
}
