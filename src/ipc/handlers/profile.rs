use crate::auth::Role;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, db_failure, require_actor, required_nonempty_str};
use crate::ipc::types::{AppState, Request};
use crate::profile::{is_profile_complete, AdminProfileFields, StudentProfileFields};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_student_fields(
    conn: &Connection,
    user_id: &str,
) -> anyhow::Result<Option<StudentProfileFields>> {
    let row = conn
        .query_row(
            "SELECT matric_no, department, level FROM students WHERE user_id = ?",
            [user_id],
            |r| {
                Ok(StudentProfileFields {
                    matric_no: r.get(0)?,
                    department: r.get(1)?,
                    level: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn load_admin_fields(
    conn: &Connection,
    user_id: &str,
) -> anyhow::Result<Option<AdminProfileFields>> {
    let row = conn
        .query_row(
            "SELECT full_name, department, username FROM admins WHERE user_id = ?",
            [user_id],
            |r| {
                Ok(AdminProfileFields {
                    full_name: r.get(0)?,
                    department: r.get(1)?,
                    username: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// The completion gate over already-stored data. Used by login/verify as
/// well as profile.status.
pub fn profile_complete_for_user(
    conn: &Connection,
    user_id: &str,
    role: Role,
    email: &str,
) -> anyhow::Result<bool> {
    let student = load_student_fields(conn, user_id)?;
    let admin = load_admin_fields(conn, user_id)?;
    Ok(is_profile_complete(
        role,
        email,
        student.as_ref(),
        admin.as_ref(),
    ))
}

fn handle_complete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    // Upsert: a repeat submission updates the one existing row in place.
    if !actor.role.uses_admin_profile() {
        let matric_no = match required_nonempty_str(req, "matricNo") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let department = match required_nonempty_str(req, "department") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let level = match required_nonempty_str(req, "level") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let full_name = req
            .params
            .get("fullName")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        let res = conn.execute(
            "INSERT INTO students(id, user_id, matric_no, department, level, full_name)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                matric_no = excluded.matric_no,
                department = excluded.department,
                level = excluded.level,
                full_name = excluded.full_name",
            (
                Uuid::new_v4().to_string(),
                &actor.user_id,
                &matric_no,
                &department,
                &level,
                &full_name,
            ),
        );
        if let Err(e) = res {
            return db_failure(req, "profile.complete student upsert", e);
        }
    } else {
        let full_name = match required_nonempty_str(req, "fullName") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let department = match required_nonempty_str(req, "department") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let username = match required_nonempty_str(req, "username") {
            Ok(v) => v,
            Err(resp) => return resp,
        };

        let res = conn.execute(
            "INSERT INTO admins(id, user_id, username, department, full_name)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                department = excluded.department,
                full_name = excluded.full_name",
            (
                Uuid::new_v4().to_string(),
                &actor.user_id,
                &username,
                &department,
                &full_name,
            ),
        );
        if let Err(e) = res {
            return db_failure(req, "profile.complete admin upsert", e);
        }
    }

    let complete =
        match profile_complete_for_user(conn, &actor.user_id, actor.role, &actor.email) {
            Ok(v) => v,
            Err(e) => return db_failure(req, "profile.complete gate", e),
        };
    ok(&req.id, json!({ "profileComplete": complete }))
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match profile_complete_for_user(conn, &actor.user_id, actor.role, &actor.email) {
        Ok(complete) => ok(&req.id, json!({ "complete": complete })),
        Err(e) => db_failure(req, "profile.status", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "profile.complete" => Some(handle_complete(state, req)),
        "profile.status" => Some(handle_status(state, req)),
        _ => None,
    }
}
