use crate::auth::{ActorContext, Role};
use crate::db;
use crate::export::{self, ComplaintExportRow, ExportFormat};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_failure, require_actor, require_admin_profile, require_role,
    require_student_profile, required_nonempty_str, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::routing;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplaintStatus {
    Pending,
    InProgress,
    Resolved,
    Rejected,
}

impl ComplaintStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "IN_PROGRESS" => Some(Self::InProgress),
            "RESOLVED" => Some(Self::Resolved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Resolved => "RESOLVED",
            Self::Rejected => "REJECTED",
        }
    }
}

fn complaint_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "description": r.get::<_, String>(2)?,
        "status": r.get::<_, String>(3)?,
        "submittedAt": r.get::<_, String>(4)?,
        "updatedAt": r.get::<_, String>(5)?,
        "categoryId": r.get::<_, String>(6)?,
        "categoryName": r.get::<_, String>(7)?,
        "studentId": r.get::<_, String>(8)?,
        "studentName": r.get::<_, String>(9)?,
    }))
}

const SCOPED_SELECT: &str =
    "SELECT p.id, p.title, p.description, p.status, p.submitted_at, p.updated_at,
            c.id, c.name, s.id, COALESCE(s.full_name, s.matric_no)
     FROM complaints p
     JOIN categories c ON c.id = p.category_id
     JOIN students s ON s.id = p.student_id";

/// Role-scoped complaint listing: students see their own, admins see their
/// assigned categories, super-admins see the whole organization.
fn load_scoped(
    conn: &Connection,
    actor: &ActorContext,
) -> anyhow::Result<Option<Vec<serde_json::Value>>> {
    match actor.role {
        Role::Student => {
            let Some(student_id) = actor.student_id.as_deref() else {
                return Ok(Some(Vec::new()));
            };
            let sql = format!(
                "{} WHERE p.student_id = ? ORDER BY p.submitted_at DESC, p.rowid DESC",
                SCOPED_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([student_id], complaint_json)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(rows))
        }
        Role::Admin => {
            let Some(admin_id) = actor.admin_id.as_deref() else {
                return Ok(Some(Vec::new()));
            };
            let sql = format!(
                "{} WHERE p.category_id IN
                    (SELECT category_id FROM category_admins WHERE admin_id = ?)
                 ORDER BY p.submitted_at DESC, p.rowid DESC",
                SCOPED_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([admin_id], complaint_json)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(rows))
        }
        Role::SuperAdmin => {
            let sql = format!(
                "{} WHERE c.organization_id = ? ORDER BY p.submitted_at DESC, p.rowid DESC",
                SCOPED_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([&actor.organization_id], complaint_json)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(rows))
        }
        Role::Teacher => Ok(None),
    }
}

fn notify_category_admins(
    conn: &Connection,
    category_id: &str,
    title: &str,
    message: &str,
) -> anyhow::Result<()> {
    let mut stmt =
        conn.prepare("SELECT admin_id FROM category_admins WHERE category_id = ?")?;
    let admin_ids = stmt
        .query_map([category_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for admin_id in admin_ids {
        conn.execute(
            "INSERT INTO notifications(id, admin_id, student_id, title, message, kind, is_read, created_at)
             VALUES (?, ?, NULL, ?, ?, 'COMPLAINT', 0, ?)",
            (
                Uuid::new_v4().to_string(),
                &admin_id,
                title,
                message,
                db::now_iso(),
            ),
        )?;
    }
    Ok(())
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(req, &actor, &[Role::Student]) {
        return resp;
    }
    let student_id = match require_student_profile(req, &actor) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match required_nonempty_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let description = match required_nonempty_str(req, "description") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let in_org: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE id = ? AND organization_id = ?",
        [&category_id, &actor.organization_id],
        |r| r.get(0),
    ) {
        Ok(n) => n,
        Err(e) => return db_failure(req, "complaints.submit category lookup", e),
    };
    if in_org == 0 {
        return err(&req.id, "not_found", "category not found", None);
    }

    let id = Uuid::new_v4().to_string();
    let now = db::now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO complaints(id, student_id, category_id, title, description, status,
                                submitted_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_id,
            &category_id,
            &title,
            &description,
            ComplaintStatus::Pending.as_str(),
            &now,
            &now,
        ),
    ) {
        return db_failure(req, "complaints.submit insert", e);
    }

    // Per-event notification to every assigned admin; a failure here is
    // logged, the complaint itself already exists.
    if let Err(e) = notify_category_admins(
        conn,
        &category_id,
        "New complaint",
        &format!("New complaint submitted: {}", title),
    ) {
        tracing::error!(error = %e, "failed to notify assigned admins of new complaint");
    }

    ok(
        &req.id,
        json!({ "complaintId": id, "status": ComplaintStatus::Pending.as_str() }),
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match load_scoped(conn, &actor) {
        Ok(Some(complaints)) => ok(&req.id, json!({ "complaints": complaints })),
        Ok(None) => err(&req.id, "forbidden", "not permitted for this role", None),
        Err(e) => db_failure(req, "complaints.list", e),
    }
}

/// Admin and student reads go through the routing resolver. Missing and
/// unauthorized complaints produce the same response shape.
fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let complaint_id = match required_str(req, "complaintId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let resolved = match actor.role {
        Role::Student => {
            let Some(student_id) = actor.student_id.as_deref() else {
                return err(&req.id, "forbidden", "not permitted", None);
            };
            routing::authorize_student_for_complaint(conn, student_id, &complaint_id)
        }
        Role::Admin => {
            let admin_id = match require_admin_profile(req, &actor) {
                Ok(v) => v,
                Err(resp) => return resp,
            };
            routing::authorize_admin_for_complaint(conn, &admin_id, &complaint_id)
        }
        Role::SuperAdmin => routing::authorize_super_admin_for_complaint(
            conn,
            &actor.organization_id,
            &complaint_id,
        ),
        Role::Teacher => return err(&req.id, "forbidden", "not permitted", None),
    };

    let complaint = match resolved {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "forbidden", "not permitted", None),
        Err(e) => return db_failure(req, "complaints.get", e),
    };

    let detail = conn.query_row(
        &format!("{} WHERE p.id = ?", SCOPED_SELECT),
        [&complaint.id],
        complaint_json,
    );
    match detail {
        Ok(v) => ok(&req.id, json!({ "complaint": v })),
        Err(e) => db_failure(req, "complaints.get detail", e),
    }
}

fn handle_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(req, &actor, &[Role::Admin]) {
        return resp;
    }
    let admin_id = match require_admin_profile(req, &actor) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let complaint_id = match required_str(req, "complaintId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status_raw = match required_str(req, "status") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(status) = ComplaintStatus::parse(&status_raw) else {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: PENDING, IN_PROGRESS, RESOLVED, REJECTED",
            None,
        );
    };

    let complaint = match routing::authorize_admin_for_complaint(conn, &admin_id, &complaint_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "forbidden", "not permitted", None),
        Err(e) => return db_failure(req, "complaints.setStatus authorize", e),
    };

    if let Err(e) = conn.execute(
        "UPDATE complaints SET status = ?, updated_at = ? WHERE id = ?",
        (status.as_str(), db::now_iso(), &complaint.id),
    ) {
        return db_failure(req, "complaints.setStatus update", e);
    }

    let notify = conn.execute(
        "INSERT INTO notifications(id, admin_id, student_id, title, message, kind, is_read, created_at)
         VALUES (?, NULL, ?, ?, ?, 'COMPLAINT', 0, ?)",
        (
            Uuid::new_v4().to_string(),
            &complaint.student_id,
            "Complaint updated",
            &format!("Your complaint \"{}\" is now {}", complaint.title, status.as_str()),
            db::now_iso(),
        ),
    );
    if let Err(e) = notify {
        tracing::error!(error = %e, "failed to notify student of status change");
    }

    ok(
        &req.id,
        json!({ "complaintId": complaint.id, "status": status.as_str() }),
    )
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let format_raw = match required_str(req, "format") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(format) = ExportFormat::parse(&format_raw) else {
        return err(
            &req.id,
            "bad_params",
            "format must be one of: json, csv, pdf, docx",
            None,
        );
    };

    let scoped = match load_scoped(conn, &actor) {
        Ok(Some(rows)) => rows,
        Ok(None) => return err(&req.id, "forbidden", "not permitted for this role", None),
        Err(e) => return db_failure(req, "complaints.export", e),
    };
    let rows: Vec<ComplaintExportRow> = scoped
        .iter()
        .map(|v| ComplaintExportRow {
            id: v["id"].as_str().unwrap_or_default().to_string(),
            title: v["title"].as_str().unwrap_or_default().to_string(),
            category_name: v["categoryName"].as_str().unwrap_or_default().to_string(),
            student_name: v["studentName"].as_str().unwrap_or_default().to_string(),
            status: v["status"].as_str().unwrap_or_default().to_string(),
            submitted_at: v["submittedAt"].as_str().unwrap_or_default().to_string(),
        })
        .collect();

    let payload = match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
        }
        ExportFormat::Csv => export::complaints_to_csv(&rows),
        ExportFormat::Pdf | ExportFormat::Docx => {
            export::complaints_to_plain_document(&rows, "Complaints Report")
        }
    };

    ok(
        &req.id,
        json!({
            "format": format.as_str(),
            "contentType": format.content_type(),
            "filename": format!("complaints.{}", format.as_str()),
            "payload": payload,
            "rowCount": rows.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "complaints.submit" => Some(handle_submit(state, req)),
        "complaints.list" => Some(handle_list(state, req)),
        "complaints.get" => Some(handle_get(state, req)),
        "complaints.setStatus" => Some(handle_set_status(state, req)),
        "complaints.export" => Some(handle_export(state, req)),
        _ => None,
    }
}
