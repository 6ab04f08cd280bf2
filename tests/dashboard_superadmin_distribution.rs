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
        let value = self.call(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "call failed: {}",
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn signup_with(&mut self, params: serde_json::Value, email: &str) -> String {
        self.ok("auth.register", params);
        let login = self.ok(
            "auth.login",
            json!({ "email": email, "password": "pass-1234" }),
        );
        login["token"].as_str().expect("token").to_string()
    }
}

#[test]
fn the_organization_overview_aggregates_every_entity() {
    let (mut h, org_id) = Harness::start("campusdesk-super-overview");

    let root = h.signup_with(
        json!({
            "organizationId": org_id,
            "email": "root@unity.edu",
            "password": "pass-1234",
            "role": "SUPER_ADMIN",
        }),
        "root@unity.edu",
    );
    h.ok(
        "profile.complete",
        json!({
            "token": root,
            "fullName": "Root Admin",
            "department": "Registry",
            "username": "root",
        }),
    );

    let physics = h.ok(
        "departments.create",
        json!({ "token": root, "name": "Physics" }),
    );
    let physics_id = physics["departmentId"].as_str().expect("departmentId").to_string();
    h.ok(
        "departments.create",
        json!({ "token": root, "name": "Chemistry" }),
    );

    let admin = h.signup_with(
        json!({
            "organizationId": org_id,
            "email": "a1@unity.edu",
            "password": "pass-1234",
            "role": "ADMIN",
        }),
        "a1@unity.edu",
    );
    h.ok(
        "profile.complete",
        json!({
            "token": admin,
            "fullName": "A ONE",
            "department": "Student Affairs",
            "username": "a1",
        }),
    );
    let admin_id = h.ok("admins.list", json!({ "token": root }))["admins"]
        .as_array()
        .expect("admins")
        .iter()
        .find(|a| a["username"] == json!("a1"))
        .and_then(|a| a["id"].as_str())
        .expect("admin id")
        .to_string();

    let category = h.ok(
        "categories.create",
        json!({ "token": root, "name": "Hostel" }),
    );
    let category_id = category["categoryId"].as_str().expect("categoryId").to_string();
    h.ok(
        "categories.assignAdmin",
        json!({ "token": root, "categoryId": category_id, "adminId": admin_id }),
    );

    // One student registered into Physics, one with no department.
    let in_dept = h.signup_with(
        json!({
            "organizationId": org_id,
            "email": "s1@unity.edu",
            "password": "pass-1234",
            "role": "STUDENT",
            "departmentId": physics_id,
        }),
        "s1@unity.edu",
    );
    h.ok(
        "profile.complete",
        json!({
            "token": in_dept,
            "matricNo": "U21/001",
            "department": "Physics",
            "level": "300",
        }),
    );
    let no_dept = h.signup_with(
        json!({
            "organizationId": org_id,
            "email": "s2@unity.edu",
            "password": "pass-1234",
            "role": "STUDENT",
        }),
        "s2@unity.edu",
    );
    h.ok(
        "profile.complete",
        json!({
            "token": no_dept,
            "matricNo": "U21/002",
            "department": "Chemistry",
            "level": "200",
        }),
    );

    for _ in 0..2 {
        h.ok(
            "complaints.submit",
            json!({
                "token": in_dept,
                "categoryId": category_id,
                "title": "Hostel issue",
                "description": "Recurring fault.",
            }),
        );
    }
    let odd = h.ok(
        "complaints.submit",
        json!({
            "token": no_dept,
            "categoryId": category_id,
            "title": "Another issue",
            "description": "Different reporter.",
        }),
    );
    let odd_id = odd["complaintId"].as_str().expect("complaintId").to_string();
    h.ok(
        "complaints.setStatus",
        json!({ "token": admin, "complaintId": odd_id, "status": "RESOLVED" }),
    );

    let dashboard = h.ok("dashboard.superadmin", json!({ "token": root }));
    assert_eq!(dashboard["counts"]["categories"], json!(1));
    // Root's own admin profile plus a1.
    assert_eq!(dashboard["counts"]["admins"], json!(2));
    assert_eq!(dashboard["counts"]["students"], json!(2));
    assert_eq!(dashboard["counts"]["complaints"], json!(3));

    let distribution = dashboard["statusDistribution"].as_array().expect("distribution");
    let count_for = |status: &str| {
        distribution
            .iter()
            .find(|d| d["status"] == json!(status))
            .and_then(|d| d["count"].as_i64())
            .unwrap_or(0)
    };
    assert_eq!(count_for("PENDING"), 2);
    assert_eq!(count_for("RESOLVED"), 1);

    let departments = dashboard["departmentComplaints"].as_array().expect("departments");
    let dept_count = |name: &str| {
        departments
            .iter()
            .find(|d| d["department"] == json!(name))
            .and_then(|d| d["count"].as_i64())
            .unwrap_or(0)
    };
    assert_eq!(dept_count("Physics"), 2);
    assert_eq!(dept_count("Unassigned"), 1);
}

#[test]
fn only_super_admins_see_the_organization_overview() {
    let (mut h, org_id) = Harness::start("campusdesk-super-role");
    let student = h.signup_with(
        json!({
            "organizationId": org_id,
            "email": "s1@unity.edu",
            "password": "pass-1234",
            "role": "STUDENT",
        }),
        "s1@unity.edu",
    );

    let denied = h.call("dashboard.superadmin", json!({ "token": student }));
    assert_eq!(denied["ok"], json!(false));
    assert_eq!(denied["error"]["code"].as_str(), Some("forbidden"));
}
