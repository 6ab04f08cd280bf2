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

struct Harness {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Harness {
    fn start(prefix: &str) -> (Self, String, PathBuf) {
        let workspace = temp_dir(prefix);
        let (child, stdin, reader) = spawn_sidecar();
        let mut h = Harness {
            _child: child,
            stdin,
            reader,
            next_id: 1,
        };
        h.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let org = h.ok("orgs.create", json!({ "name": "Unity College" }));
        let org_id = org["organizationId"].as_str().expect("orgId").to_string();
        let db_path = workspace.join("campusdesk.sqlite3");
        (h, org_id, db_path)
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.next_id.to_string();
        self.next_id += 1;
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "call failed: {}",
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn signup(&mut self, org_id: &str, email: &str, role: &str) -> String {
        self.ok(
            "auth.register",
            json!({
                "organizationId": org_id,
                "email": email,
                "password": "pass-1234",
                "role": role,
            }),
        );
        let login = self.ok(
            "auth.login",
            json!({ "email": email, "password": "pass-1234" }),
        );
        login["token"].as_str().expect("token").to_string()
    }
}

#[test]
fn login_refuses_a_role_outside_the_closed_set() {
    let (mut h, org_id, db_path) = Harness::start("campusdesk-corrupt-role");
    h.signup(&org_id, "ada@unity.edu", "STUDENT");

    // Damage the stored role from a second connection, as a bad migration
    // or external edit would.
    let side = rusqlite::Connection::open(&db_path).expect("open workspace db");
    side.execute(
        "UPDATE users SET role = 'PREFECT' WHERE email = 'ada@unity.edu'",
        [],
    )
    .expect("corrupt role");
    drop(side);

    let login = h.call(
        "auth.login",
        json!({ "email": "ada@unity.edu", "password": "pass-1234" }),
    );
    assert_eq!(login["ok"], json!(false));
    assert_eq!(login["error"]["code"].as_str(), Some("db_query_failed"));
    assert_eq!(login["error"]["message"].as_str(), Some("store failure"));
    // The damaged role must never be laundered into a real one.
    assert!(login.get("result").is_none());
}

#[test]
fn mark_read_reports_a_store_failure_when_the_lookup_breaks() {
    let (mut h, org_id, db_path) = Harness::start("campusdesk-markread-store-failure");
    let student = h.signup(&org_id, "ada@unity.edu", "STUDENT");

    let side = rusqlite::Connection::open(&db_path).expect("open workspace db");
    side.execute("DROP TABLE notifications", [])
        .expect("drop notifications");
    drop(side);

    let marked = h.call(
        "notifications.markRead",
        json!({ "token": student, "notificationId": "n-1" }),
    );
    assert_eq!(marked["ok"], json!(false));
    assert_eq!(marked["error"]["code"].as_str(), Some("db_query_failed"));
    assert_eq!(marked["error"]["message"].as_str(), Some("store failure"));
}
