use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusdeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusdeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn register_and_login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id_prefix: &str,
    org_id: &str,
    email: &str,
    role: &str,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        &format!("{}-reg", id_prefix),
        "auth.register",
        json!({
            "organizationId": org_id,
            "email": email,
            "password": "pass-1234",
            "role": role,
        }),
    );
    let login = request_ok(
        stdin,
        reader,
        &format!("{}-login", id_prefix),
        "auth.login",
        json!({ "email": email, "password": "pass-1234" }),
    );
    login["token"].as_str().expect("token").to_string()
}

#[test]
fn gate_flips_only_when_all_required_fields_are_present() {
    let workspace = temp_dir("campusdesk-gate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let org = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "orgs.create",
        json!({ "name": "Unity College", "contactEmail": "admin@unity.edu" }),
    );
    let org_id = org["organizationId"].as_str().expect("orgId").to_string();

    let token = register_and_login(
        &mut stdin,
        &mut reader,
        "3",
        &org_id,
        "ada@unity.edu",
        "STUDENT",
    );

    // No profile row yet: incomplete, not an error.
    let status = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "profile.status",
        json!({ "token": token }),
    );
    assert_eq!(status["complete"], json!(false));

    // A submission missing a required field is rejected by name.
    let missing = request(
        &mut stdin,
        &mut reader,
        "5",
        "profile.complete",
        json!({ "token": token, "matricNo": "U21/001", "department": "Physics" }),
    );
    assert_eq!(missing["ok"], json!(false));
    assert_eq!(missing["error"]["code"].as_str(), Some("bad_params"));
    assert!(missing["error"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("level"));

    let completed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "profile.complete",
        json!({
            "token": token,
            "matricNo": "U21/001",
            "department": "Physics",
            "level": "300",
            "fullName": "Ada Obi",
        }),
    );
    assert_eq!(completed["profileComplete"], json!(true));

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "profile.status",
        json!({ "token": token }),
    );
    assert_eq!(status["complete"], json!(true));
}

#[test]
fn repeat_profile_completion_updates_the_single_row() {
    let workspace = temp_dir("campusdesk-gate-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let org = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "orgs.create",
        json!({ "name": "Unity College" }),
    );
    let org_id = org["organizationId"].as_str().expect("orgId").to_string();

    let student = register_and_login(
        &mut stdin,
        &mut reader,
        "3",
        &org_id,
        "obi@unity.edu",
        "STUDENT",
    );
    let super_admin = register_and_login(
        &mut stdin,
        &mut reader,
        "4",
        &org_id,
        "root@unity.edu",
        "SUPER_ADMIN",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "profile.complete",
        json!({
            "token": super_admin,
            "fullName": "Root Admin",
            "department": "Registry",
            "username": "root",
        }),
    );

    let payload = json!({
        "token": student,
        "matricNo": "U21/002",
        "department": "Chemistry",
        "level": "200",
    });
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "profile.complete",
        payload.clone(),
    );
    let _ = request_ok(&mut stdin, &mut reader, "7", "profile.complete", payload);

    // Two identical submissions leave exactly one student profile behind.
    let dashboard = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "dashboard.superadmin",
        json!({ "token": super_admin }),
    );
    assert_eq!(dashboard["counts"]["students"], json!(1));
}
