
use serde_json::json;
use test_support::{open_workspace, register_user, request_err, request_ok, spawn_sidecar, temp_dir};

const HELLO_B64: &str = "aGVsbG8gd29ybGQ=";

#[test]
fn export_then_import_into_fresh_workspace() {
    let source = temp_dir("studytrack-backup-src");
    let target = temp_dir("studytrack-backup-dst");
    let bundle = temp_dir("studytrack-backup-out").join("bundle.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    // Populate the source workspace.
    open_workspace(&mut stdin, &mut reader, &source);
    let token = register_user(&mut stdin, &mut reader, "amara", "correct-horse");
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        Some(&token),
        "notes.create",
        json!({ "title": "Calculus - Derivatives", "body": "chain rule", "subject": "Mathematics" }),
    );
    let note_id = created
        .get("note")
        .and_then(|n| n.get("id"))
        .and_then(|v| v.as_str())
        .expect("note id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        Some(&token),
        "notes.uploadAttachment",
        json!({
            "noteId": note_id,
            "filename": "formulas.pdf",
            "mimeType": "application/pdf",
            "dataBase64": HELLO_B64,
        }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        Some(&token),
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("studytrack-workspace-v1")
    );
    assert_eq!(exported.get("fileCount").and_then(|v| v.as_i64()), Some(1));
    assert!(bundle.is_file());

    // Switch to a fresh workspace and pull the bundle in.
    open_workspace(&mut stdin, &mut reader, &target);
    let scratch_token = register_user(&mut stdin, &mut reader, "temp", "scratch-pass");
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        Some(&scratch_token),
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported.get("fileCount").and_then(|v| v.as_i64()), Some(1));

    // The imported database replaced the scratch one: old sessions are
    // gone, the bundled account signs in, the note and its file are back.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        Some(&scratch_token),
        "notes.list",
        json!({}),
    );
    assert_eq!(code, "unauthorized");

    let signed_in = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        None,
        "auth.signIn",
        json!({ "username": "amara", "password": "correct-horse" }),
    );
    let restored_token = signed_in
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        Some(&restored_token),
        "notes.list",
        json!({}),
    );
    assert_eq!(listed.get("noteCount").and_then(|v| v.as_i64()), Some(1));
    let note = &listed.get("notes").and_then(|v| v.as_array()).expect("notes")[0];
    let attachments = note
        .get("attachments")
        .and_then(|v| v.as_array())
        .expect("attachments");
    assert_eq!(attachments.len(), 1);
    let attachment_id = attachments[0]
        .get("id")
        .and_then(|v| v.as_str())
        .expect("attachment id");
    assert!(target.join("attachments").join(attachment_id).is_file());
}

#[test]
fn import_rejects_non_bundle_input() {
    let workspace = temp_dir("studytrack-backup-reject");
    let junk = temp_dir("studytrack-backup-junk").join("junk.zip");
    std::fs::write(&junk, b"not a zip at all").expect("write junk");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let token = register_user(&mut stdin, &mut reader, "amara", "correct-horse");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        Some(&token),
        "backup.import",
        json!({ "inPath": junk.to_string_lossy() }),
    );
    assert_eq!(code, "io_failed");

    // The workspace survives the failed import.
    let _ = request_ok(&mut stdin, &mut reader, "2", Some(&token), "profile.get", json!({}));
}
