
use serde_json::json;
use test_support::{open_workspace, register_user, request_err, request_ok, spawn_sidecar, temp_dir};

const HELLO_B64: &str = "aGVsbG8gd29ybGQ=";
const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

fn create_note(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    token: &str,
    title: &str,
    body: &str,
    subject: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        "create",
        Some(token),
        "notes.create",
        json!({ "title": title, "body": body, "subject": subject }),
    );
    created
        .get("note")
        .and_then(|n| n.get("id"))
        .and_then(|v| v.as_str())
        .expect("note id")
        .to_string()
}

fn listed_titles(result: &serde_json::Value) -> Vec<String> {
    result
        .get("notes")
        .and_then(|v| v.as_array())
        .expect("notes")
        .iter()
        .filter_map(|n| n.get("title").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .collect()
}

#[test]
fn list_filters_by_query_and_subject() {
    let workspace = temp_dir("studytrack-notes-filter");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let token = register_user(&mut stdin, &mut reader, "amara", "correct-horse");

    create_note(
        &mut stdin,
        &mut reader,
        &token,
        "Calculus - Derivatives",
        "chain rule, product rule, quotient rule",
        "Mathematics",
    );
    create_note(
        &mut stdin,
        &mut reader,
        &token,
        "Wave-Particle Duality",
        "double-slit experiment notes",
        "Physics",
    );
    create_note(
        &mut stdin,
        &mut reader,
        &token,
        "Reaction Mechanisms",
        "nucleophilic substitution and elimination",
        "Chemistry",
    );

    // No filters: everything comes back.
    let all = request_ok(&mut stdin, &mut reader, "1", Some(&token), "notes.list", json!({}));
    assert_eq!(all.get("noteCount").and_then(|v| v.as_i64()), Some(3));

    // The wildcard subject behaves the same.
    let all = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        Some(&token),
        "notes.list",
        json!({ "subject": "All" }),
    );
    assert_eq!(all.get("noteCount").and_then(|v| v.as_i64()), Some(3));

    // Query matching is case-insensitive over title and body.
    let hit = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        Some(&token),
        "notes.list",
        json!({ "query": "CALCULUS" }),
    );
    assert_eq!(listed_titles(&hit), vec!["Calculus - Derivatives"]);

    let hit = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        Some(&token),
        "notes.list",
        json!({ "query": "double-SLIT" }),
    );
    assert_eq!(listed_titles(&hit), vec!["Wave-Particle Duality"]);

    // Subject selector is an exact match.
    let hit = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        Some(&token),
        "notes.list",
        json!({ "subject": "Physics" }),
    );
    assert_eq!(listed_titles(&hit), vec!["Wave-Particle Duality"]);

    // Both predicates must hold.
    let miss = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        Some(&token),
        "notes.list",
        json!({ "query": "rule", "subject": "Physics" }),
    );
    assert_eq!(miss.get("noteCount").and_then(|v| v.as_i64()), Some(0));

    let hit = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        Some(&token),
        "notes.list",
        json!({ "query": "rule", "subject": "Mathematics" }),
    );
    assert_eq!(listed_titles(&hit), vec!["Calculus - Derivatives"]);
}

#[test]
fn update_bumps_note_to_front_of_listing() {
    let workspace = temp_dir("studytrack-notes-order");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let token = register_user(&mut stdin, &mut reader, "amara", "correct-horse");

    let first = create_note(&mut stdin, &mut reader, &token, "First", "a", "Mathematics");
    let _second = create_note(&mut stdin, &mut reader, &token, "Second", "b", "Mathematics");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u",
        Some(&token),
        "notes.update",
        json!({ "noteId": first, "body": "a, revised" }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "l", Some(&token), "notes.list", json!({}));
    assert_eq!(listed_titles(&listed), vec!["First", "Second"]);
}

#[test]
fn attachments_upload_and_travel_with_the_note() {
    let workspace = temp_dir("studytrack-notes-attach");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let token = register_user(&mut stdin, &mut reader, "amara", "correct-horse");

    let note_id = create_note(
        &mut stdin,
        &mut reader,
        &token,
        "Calculus - Derivatives",
        "chain rule",
        "Mathematics",
    );

    let uploaded = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        Some(&token),
        "notes.uploadAttachment",
        json!({
            "noteId": note_id,
            "filename": "derivative-formulas.pdf",
            "mimeType": "application/pdf",
            "dataBase64": HELLO_B64,
        }),
    );
    let attachment = uploaded.get("attachment").expect("attachment");
    assert_eq!(
        attachment.get("sizeBytes").and_then(|v| v.as_i64()),
        Some(11)
    );
    assert_eq!(
        attachment.get("sha256").and_then(|v| v.as_str()),
        Some(HELLO_SHA256)
    );
    let attachment_id = attachment
        .get("id")
        .and_then(|v| v.as_str())
        .expect("attachment id")
        .to_string();
    assert!(workspace.join("attachments").join(&attachment_id).is_file());

    let listed = request_ok(&mut stdin, &mut reader, "2", Some(&token), "notes.list", json!({}));
    let attachments = listed
        .get("notes")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|n| n.get("attachments"))
        .and_then(|v| v.as_array())
        .expect("attachments");
    assert_eq!(attachments.len(), 1);
    assert_eq!(
        attachments[0].get("filename").and_then(|v| v.as_str()),
        Some("derivative-formulas.pdf")
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        Some(&token),
        "notes.uploadAttachment",
        json!({
            "noteId": note_id,
            "filename": "bad.bin",
            "mimeType": "application/octet-stream",
            "dataBase64": "!!!not-base64!!!",
        }),
    );
    assert_eq!(code, "bad_params");

    // Deleting the note removes rows and files.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        Some(&token),
        "notes.delete",
        json!({ "noteId": note_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "5", Some(&token), "notes.list", json!({}));
    assert_eq!(listed.get("noteCount").and_then(|v| v.as_i64()), Some(0));
    assert!(!workspace.join("attachments").join(&attachment_id).exists());
}
