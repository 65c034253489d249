
use serde_json::json;
use test_support::{open_workspace, register_user, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn register_sign_in_and_session_gating() {
    let workspace = temp_dir("studytrack-auth");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    // Everything behind the gate is unauthorized without a token.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        None,
        "timetable.weekOpen",
        json!({}),
    );
    assert_eq!(code, "unauthorized");

    let token = register_user(&mut stdin, &mut reader, "amara", "correct-horse");
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        Some(&token),
        "timetable.weekOpen",
        json!({}),
    );
    assert_eq!(
        opened.get("days").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(7)
    );

    // Wrong password and unknown user produce the same code.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        None,
        "auth.signIn",
        json!({ "username": "amara", "password": "wrong" }),
    );
    assert_eq!(code, "invalid_credentials");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        None,
        "auth.signIn",
        json!({ "username": "nobody", "password": "wrong" }),
    );
    assert_eq!(code, "invalid_credentials");

    let signed_in = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        None,
        "auth.signIn",
        json!({ "username": "amara", "password": "correct-horse" }),
    );
    let second_token = signed_in
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();
    assert_ne!(second_token, token);
    assert_eq!(
        signed_in
            .get("user")
            .and_then(|u| u.get("email"))
            .and_then(|v| v.as_str()),
        Some("amara@example.edu")
    );

    // Signing out tears the session down; the token stops working.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        Some(&second_token),
        "auth.signOut",
        json!({}),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        Some(&second_token),
        "notes.list",
        json!({}),
    );
    assert_eq!(code, "unauthorized");

    // The first session is unaffected.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        Some(&token),
        "notes.list",
        json!({}),
    );
}

#[test]
fn register_validates_input_and_uniqueness() {
    let workspace = temp_dir("studytrack-auth-validate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        None,
        "auth.register",
        json!({ "username": "kofi", "password": "tiny", "email": "kofi@example.edu" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        None,
        "auth.register",
        json!({ "username": "kofi", "password": "long-enough", "email": "not-an-email" }),
    );
    assert_eq!(code, "bad_params");

    let _ = register_user(&mut stdin, &mut reader, "kofi", "long-enough");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        None,
        "auth.register",
        json!({ "username": "kofi", "password": "another-pass", "email": "k2@example.edu" }),
    );
    assert_eq!(code, "conflict");
}

#[test]
fn methods_require_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        None,
        "auth.register",
        json!({ "username": "x", "password": "long-enough", "email": "x@example.edu" }),
    );
    assert_eq!(code, "no_workspace");

    let code = request_err(&mut stdin, &mut reader, "2", None, "bogus.method", json!({}));
    assert_eq!(code, "not_implemented");
}
