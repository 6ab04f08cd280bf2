use crate::auth::Role;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_failure, require_actor, require_role, required_nonempty_str, required_str,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

/// Tenant onboarding runs before any account exists in the workspace, so
/// org creation is deliberately unauthenticated (the shell gates it).
fn handle_orgs_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_nonempty_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let contact_email = req
        .params
        .get("contactEmail")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO organizations(id, name, contact_email, active, created_at)
         VALUES (?, ?, ?, 1, ?)",
        (&id, &name, &contact_email, db::now_iso()),
    ) {
        return db_failure(req, "orgs.create", e);
    }
    ok(&req.id, json!({ "organizationId": id }))
}

fn handle_orgs_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(req, &actor, &[Role::SuperAdmin]) {
        return resp;
    }
    let organization_id = match required_str(req, "organizationId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Tenant-scoped like every other org operation: a super admin only
    // administers the organization they belong to.
    if organization_id != actor.organization_id {
        return err(&req.id, "forbidden", "not permitted for this organization", None);
    }
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing active", None);
    };

    let changed = match conn.execute(
        "UPDATE organizations SET active = ? WHERE id = ?",
        (active as i64, &organization_id),
    ) {
        Ok(n) => n,
        Err(e) => return db_failure(req, "orgs.setActive", e),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "organization not found", None);
    }
    ok(&req.id, json!({ "organizationId": organization_id, "active": active }))
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(req, &actor, &[Role::SuperAdmin]) {
        return resp;
    }
    let name = match required_nonempty_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO departments(id, organization_id, name) VALUES (?, ?, ?)",
        (&id, &actor.organization_id, &name),
    ) {
        Ok(_) => ok(&req.id, json!({ "departmentId": id })),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let _ = msg;
            err(&req.id, "conflict", "department already exists", None)
        }
        Err(e) => db_failure(req, "departments.create", e),
    }
}

fn handle_departments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name FROM departments WHERE organization_id = ? ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return db_failure(req, "departments.list prepare", e),
    };
    let rows = stmt
        .query_map([&actor.organization_id], |r| {
            Ok(json!({ "id": r.get::<_, String>(0)?, "name": r.get::<_, String>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(departments) => ok(&req.id, json!({ "departments": departments })),
        Err(e) => db_failure(req, "departments.list", e),
    }
}

fn handle_categories_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let name = match required_nonempty_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO categories(id, organization_id, name, description, created_at)
         VALUES (?, ?, ?, ?, ?)",
        (&id, &actor.organization_id, &name, &description, db::now_iso()),
    ) {
        Ok(_) => ok(&req.id, json!({ "categoryId": id })),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let _ = msg;
            err(&req.id, "conflict", "category already exists", None)
        }
        Err(e) => db_failure(req, "categories.create", e),
    }
}

fn handle_categories_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.name, c.description,
                (SELECT COUNT(*) FROM category_admins ca WHERE ca.category_id = c.id),
                (SELECT COUNT(*) FROM complaints p WHERE p.category_id = c.id)
         FROM categories c
         WHERE c.organization_id = ?
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return db_failure(req, "categories.list prepare", e),
    };
    let rows = stmt
        .query_map([&actor.organization_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "assignedAdminCount": r.get::<_, i64>(3)?,
                "complaintCount": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(categories) => ok(&req.id, json!({ "categories": categories })),
        Err(e) => db_failure(req, "categories.list", e),
    }
}

fn category_in_org(
    conn: &rusqlite::Connection,
    category_id: &str,
    organization_id: &str,
) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE id = ? AND organization_id = ?",
        [category_id, organization_id],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn admin_in_org(
    conn: &rusqlite::Connection,
    admin_id: &str,
    organization_id: &str,
) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM admins a JOIN users u ON u.id = a.user_id
         WHERE a.id = ? AND u.organization_id = ?",
        [admin_id, organization_id],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn handle_categories_assign_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let admin_id = match required_str(req, "adminId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match category_in_org(conn, &category_id, &actor.organization_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "category not found", None),
        Err(e) => return db_failure(req, "categories.assignAdmin category lookup", e),
    }
    match admin_in_org(conn, &admin_id, &actor.organization_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "admin not found", None),
        Err(e) => return db_failure(req, "categories.assignAdmin admin lookup", e),
    }

    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO category_admins(category_id, admin_id) VALUES (?, ?)",
        [&category_id, &admin_id],
    ) {
        return db_failure(req, "categories.assignAdmin insert", e);
    }
    ok(&req.id, json!({ "categoryId": category_id, "adminId": admin_id }))
}

fn handle_categories_unassign_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let category_id = match required_str(req, "categoryId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let admin_id = match required_str(req, "adminId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match category_in_org(conn, &category_id, &actor.organization_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "category not found", None),
        Err(e) => return db_failure(req, "categories.unassignAdmin category lookup", e),
    }
    let removed = match conn.execute(
        "DELETE FROM category_admins WHERE category_id = ? AND admin_id = ?",
        [&category_id, &admin_id],
    ) {
        Ok(n) => n > 0,
        Err(e) => return db_failure(req, "categories.unassignAdmin delete", e),
    };
    ok(&req.id, json!({ "removed": removed }))
}

fn handle_admins_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT a.id, a.username, a.full_name, a.department, u.role
         FROM admins a JOIN users u ON u.id = a.user_id
         WHERE u.organization_id = ?
         ORDER BY a.full_name",
    ) {
        Ok(s) => s,
        Err(e) => return db_failure(req, "admins.list prepare", e),
    };
    let rows = stmt
        .query_map([&actor.organization_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "username": r.get::<_, String>(1)?,
                "fullName": r.get::<_, String>(2)?,
                "department": r.get::<_, String>(3)?,
                "role": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(admins) => ok(&req.id, json!({ "admins": admins })),
        Err(e) => db_failure(req, "admins.list", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "orgs.create" => Some(handle_orgs_create(state, req)),
        "orgs.setActive" => Some(handle_orgs_set_active(state, req)),
        "departments.create" => Some(handle_departments_create(state, req)),
        "departments.list" => Some(handle_departments_list(state, req)),
        "categories.create" => Some(handle_categories_create(state, req)),
        "categories.list" => Some(handle_categories_list(state, req)),
        "categories.assignAdmin" => Some(handle_categories_assign_admin(state, req)),
        "categories.unassignAdmin" => Some(handle_categories_unassign_admin(state, req)),
        "admins.list" => Some(handle_admins_list(state, req)),
        _ => None,
    }
}
