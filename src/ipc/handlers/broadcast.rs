use crate::auth::Role;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_failure, opt_str, require_actor, require_admin_profile, require_role,
    required_nonempty_str, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BroadcastTarget {
    All,
    Students,
    Admins,
}

impl BroadcastTarget {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Some(Self::All),
            "STUDENTS" => Some(Self::Students),
            "ADMINS" => Some(Self::Admins),
            _ => None,
        }
    }

    fn includes_admins(self) -> bool {
        matches!(self, Self::All | Self::Admins)
    }

    fn includes_students(self) -> bool {
        matches!(self, Self::All | Self::Students)
    }
}

fn org_admin_ids(conn: &Connection, organization_id: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT a.id FROM admins a JOIN users u ON u.id = a.user_id
         WHERE u.organization_id = ? ORDER BY a.rowid",
    )?;
    let ids = stmt
        .query_map([organization_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn org_student_ids(conn: &Connection, organization_id: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT s.id FROM students s JOIN users u ON u.id = s.user_id
         WHERE u.organization_id = ? ORDER BY s.rowid",
    )?;
    let ids = stmt
        .query_map([organization_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// One transaction per recipient class. Rows address the profile sub-record
/// id (admins.id / students.id), never the user id.
fn insert_admin_batch(
    conn: &Connection,
    admin_ids: &[String],
    title: &str,
    message: &str,
    kind: &str,
) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    for admin_id in admin_ids {
        tx.execute(
            "INSERT INTO notifications(id, admin_id, student_id, title, message, kind, is_read, created_at)
             VALUES (?, ?, NULL, ?, ?, ?, 0, ?)",
            (
                Uuid::new_v4().to_string(),
                admin_id,
                title,
                message,
                kind,
                db::now_iso(),
            ),
        )?;
    }
    tx.commit()?;
    Ok(admin_ids.len())
}

fn insert_student_batch(
    conn: &Connection,
    student_ids: &[String],
    title: &str,
    message: &str,
    kind: &str,
) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    for student_id in student_ids {
        tx.execute(
            "INSERT INTO notifications(id, admin_id, student_id, title, message, kind, is_read, created_at)
             VALUES (?, NULL, ?, ?, ?, ?, 0, ?)",
            (
                Uuid::new_v4().to_string(),
                student_id,
                title,
                message,
                kind,
                db::now_iso(),
            ),
        )?;
    }
    tx.commit()?;
    Ok(student_ids.len())
}

fn handle_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(req, &actor, &[Role::Admin, Role::SuperAdmin]) {
        return resp;
    }
    let acting_admin_id = match require_admin_profile(req, &actor) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match required_nonempty_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let message = match required_nonempty_str(req, "message") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let target_raw = match required_str(req, "target") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(target) = BroadcastTarget::parse(&target_raw) else {
        return err(
            &req.id,
            "bad_params",
            "target must be one of: ALL, STUDENTS, ADMINS",
            None,
        );
    };
    let kind = opt_str(req, "kind").unwrap_or_else(|| "BROADCAST".to_string());
    let ip = opt_str(req, "ip");

    let admin_ids = if target.includes_admins() {
        match org_admin_ids(conn, &actor.organization_id) {
            Ok(v) => v,
            Err(e) => return db_failure(req, "broadcast.send admin resolve", e),
        }
    } else {
        Vec::new()
    };
    let student_ids = if target.includes_students() {
        match org_student_ids(conn, &actor.organization_id) {
            Ok(v) => v,
            Err(e) => return db_failure(req, "broadcast.send student resolve", e),
        }
    } else {
        Vec::new()
    };

    let admin_created = match insert_admin_batch(conn, &admin_ids, &title, &message, &kind) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "broadcast admin batch failed");
            return err(
                &req.id,
                "db_update_failed",
                "broadcast failed before any notification was created",
                Some(json!({ "recipientsCreated": 0 })),
            );
        }
    };

    // The admin batch is already committed; a student-batch failure is a
    // reported partial state, not a rollback.
    let student_created = match insert_student_batch(conn, &student_ids, &title, &message, &kind) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(
                error = %e,
                recipients_created = admin_created,
                "broadcast student batch failed after admin batch committed"
            );
            return err(
                &req.id,
                "partial_failure",
                "broadcast partially delivered",
                Some(json!({ "recipientsCreated": admin_created })),
            );
        }
    };

    let recipients = admin_created + student_created;

    // Recipients already have their notifications; an audit failure is
    // logged, not propagated.
    if let Err(e) = db::activity_log_append(
        conn,
        &actor.organization_id,
        Some(&acting_admin_id),
        &format!("BROADCAST_SENT: {}", title),
        ip.as_deref(),
    ) {
        tracing::error!(error = %e, "broadcast audit log append failed");
    }

    ok(&req.id, json!({ "recipients": recipients }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "broadcast.send" => Some(handle_send(state, req)),
        _ => None,
    }
}
