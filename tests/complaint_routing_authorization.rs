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

struct Harness {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Harness {
    fn start(prefix: &str) -> (Self, String) {
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
        (h, org_id)
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.next_id.to_string();
        self.next_id += 1;
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.next_id.to_string();
        self.next_id += 1;
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
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

    fn admin_with_profile(&mut self, org_id: &str, email: &str, username: &str) -> (String, String) {
        let token = self.signup(org_id, email, "ADMIN");
        self.ok(
            "profile.complete",
            json!({
                "token": token,
                "fullName": username.to_uppercase(),
                "department": "Student Affairs",
                "username": username,
            }),
        );
        let listing = self.ok("admins.list", json!({ "token": token }));
        let admin_id = listing["admins"]
            .as_array()
            .expect("admins array")
            .iter()
            .find(|a| a["username"] == json!(username))
            .and_then(|a| a["id"].as_str())
            .expect("admin profile id")
            .to_string();
        (token, admin_id)
    }

    fn student_with_profile(&mut self, org_id: &str, email: &str, matric: &str) -> String {
        let token = self.signup(org_id, email, "STUDENT");
        self.ok(
            "profile.complete",
            json!({
                "token": token,
                "matricNo": matric,
                "department": "Physics",
                "level": "300",
            }),
        );
        token
    }
}

#[test]
fn only_assigned_admins_can_read_and_update_a_complaint() {
    let (mut h, org_id) = Harness::start("campusdesk-routing");

    let (assigned_token, assigned_id) = h.admin_with_profile(&org_id, "a1@unity.edu", "a1");
    let (outsider_token, _outsider_id) = h.admin_with_profile(&org_id, "a2@unity.edu", "a2");

    let category = h.ok(
        "categories.create",
        json!({ "token": assigned_token, "name": "Hostel" }),
    );
    let category_id = category["categoryId"].as_str().expect("categoryId");
    h.ok(
        "categories.assignAdmin",
        json!({ "token": assigned_token, "categoryId": category_id, "adminId": assigned_id }),
    );

    let student = h.student_with_profile(&org_id, "s1@unity.edu", "U21/001");
    let submitted = h.ok(
        "complaints.submit",
        json!({
            "token": student,
            "categoryId": category_id,
            "title": "Leaking roof",
            "description": "Room B12 leaks when it rains.",
        }),
    );
    let complaint_id = submitted["complaintId"].as_str().expect("complaintId");

    let got = h.ok(
        "complaints.get",
        json!({ "token": assigned_token, "complaintId": complaint_id }),
    );
    assert_eq!(got["complaint"]["title"], json!("Leaking roof"));
    assert_eq!(got["complaint"]["status"], json!("PENDING"));

    let updated = h.ok(
        "complaints.setStatus",
        json!({ "token": assigned_token, "complaintId": complaint_id, "status": "IN_PROGRESS" }),
    );
    assert_eq!(updated["status"], json!("IN_PROGRESS"));

    // An admin outside the category is denied, both read and write.
    let denied_read = h.call(
        "complaints.get",
        json!({ "token": outsider_token, "complaintId": complaint_id }),
    );
    assert_eq!(denied_read["ok"], json!(false));
    assert_eq!(denied_read["error"]["code"].as_str(), Some("forbidden"));

    let denied_write = h.call(
        "complaints.setStatus",
        json!({ "token": outsider_token, "complaintId": complaint_id, "status": "RESOLVED" }),
    );
    assert_eq!(denied_write["ok"], json!(false));
    assert_eq!(denied_write["error"]["code"].as_str(), Some("forbidden"));

    // The status stayed where the assigned admin left it.
    let after = h.ok(
        "complaints.get",
        json!({ "token": assigned_token, "complaintId": complaint_id }),
    );
    assert_eq!(after["complaint"]["status"], json!("IN_PROGRESS"));
}

#[test]
fn missing_and_unassigned_complaints_are_indistinguishable() {
    let (mut h, org_id) = Harness::start("campusdesk-routing-leak");

    let (assigned_token, assigned_id) = h.admin_with_profile(&org_id, "a1@unity.edu", "a1");
    let (outsider_token, _) = h.admin_with_profile(&org_id, "a2@unity.edu", "a2");

    let category = h.ok(
        "categories.create",
        json!({ "token": assigned_token, "name": "Library" }),
    );
    let category_id = category["categoryId"].as_str().expect("categoryId");
    h.ok(
        "categories.assignAdmin",
        json!({ "token": assigned_token, "categoryId": category_id, "adminId": assigned_id }),
    );

    let student = h.student_with_profile(&org_id, "s1@unity.edu", "U21/002");
    let submitted = h.ok(
        "complaints.submit",
        json!({
            "token": student,
            "categoryId": category_id,
            "title": "Noise",
            "description": "Reading room is noisy after 8pm.",
        }),
    );
    let complaint_id = submitted["complaintId"].as_str().expect("complaintId");

    let unassigned = h.call(
        "complaints.get",
        json!({ "token": outsider_token, "complaintId": complaint_id }),
    );
    let nonexistent = h.call(
        "complaints.get",
        json!({ "token": outsider_token, "complaintId": "no-such-complaint" }),
    );
    assert_eq!(unassigned["ok"], json!(false));
    assert_eq!(nonexistent["ok"], json!(false));
    // Same error object either way; existence is never leaked.
    assert_eq!(unassigned["error"], nonexistent["error"]);
}

#[test]
fn students_see_only_their_own_complaints() {
    let (mut h, org_id) = Harness::start("campusdesk-routing-student");

    let (admin_token, admin_id) = h.admin_with_profile(&org_id, "a1@unity.edu", "a1");
    let category = h.ok(
        "categories.create",
        json!({ "token": admin_token, "name": "Cafeteria" }),
    );
    let category_id = category["categoryId"].as_str().expect("categoryId");
    h.ok(
        "categories.assignAdmin",
        json!({ "token": admin_token, "categoryId": category_id, "adminId": admin_id }),
    );

    let owner = h.student_with_profile(&org_id, "s1@unity.edu", "U21/003");
    let other = h.student_with_profile(&org_id, "s2@unity.edu", "U21/004");

    let submitted = h.ok(
        "complaints.submit",
        json!({
            "token": owner,
            "categoryId": category_id,
            "title": "Cold food",
            "description": "Lunch is served cold.",
        }),
    );
    let complaint_id = submitted["complaintId"].as_str().expect("complaintId");

    let own = h.ok(
        "complaints.get",
        json!({ "token": owner, "complaintId": complaint_id }),
    );
    assert_eq!(own["complaint"]["id"].as_str(), Some(complaint_id));

    let denied = h.call(
        "complaints.get",
        json!({ "token": other, "complaintId": complaint_id }),
    );
    assert_eq!(denied["ok"], json!(false));
    assert_eq!(denied["error"]["code"].as_str(), Some("forbidden"));

    let own_list = h.ok("complaints.list", json!({ "token": owner }));
    assert_eq!(own_list["complaints"].as_array().map(|v| v.len()), Some(1));
    let other_list = h.ok("complaints.list", json!({ "token": other }));
    assert_eq!(other_list["complaints"].as_array().map(|v| v.len()), Some(0));
}
