use crate::auth::{self, LoginError, Role};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, db_failure, require_actor, required_nonempty_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use super::profile;

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let organization_id = match required_str(req, "organizationId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_nonempty_str(req, "email") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(resp) => return resp,
    };
    let password = match required_nonempty_str(req, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: STUDENT, TEACHER, ADMIN, SUPER_ADMIN",
            None,
        );
    };
    let department_id = req
        .params
        .get("departmentId")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let org_exists = match conn
        .query_row(
            "SELECT COUNT(*) FROM organizations WHERE id = ?",
            [&organization_id],
            |r| r.get::<_, i64>(0),
        ) {
        Ok(n) => n > 0,
        Err(e) => return db_failure(req, "auth.register org lookup", e),
    };
    if !org_exists {
        return err(&req.id, "not_found", "organization not found", None);
    }

    let taken = match conn
        .query_row(
            "SELECT COUNT(*) FROM users WHERE email = ?",
            [&email],
            |r| r.get::<_, i64>(0),
        ) {
        Ok(n) => n > 0,
        Err(e) => return db_failure(req, "auth.register email lookup", e),
    };
    if taken {
        return err(&req.id, "conflict", "email already registered", None);
    }

    let user_id = Uuid::new_v4().to_string();
    let salt = auth::new_salt();
    let hash = auth::hash_password(&password, &salt);
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, organization_id, department_id, email, password_hash,
                           password_salt, role, active, email_verified, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, 1, 0, ?)",
        (
            &user_id,
            &organization_id,
            &department_id,
            &email,
            &hash,
            &salt,
            role.as_str(),
            db::now_iso(),
        ),
    ) {
        return db_failure(req, "auth.register insert", e);
    }

    ok(&req.id, json!({ "userId": user_id, "role": role.as_str() }))
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(resp) => return resp,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let token = match auth::login(conn, &email, &password) {
        Ok(Ok(token)) => token,
        // One message for every denial; which check failed stays server-side.
        Ok(Err(reason)) => {
            tracing::warn!(?reason, "login denied");
            return err(&req.id, "unauthorized", "invalid credentials", None);
        }
        Err(e) => return db_failure(req, "auth.login", e),
    };

    let user = conn
        .query_row(
            "SELECT id, role, organization_id FROM users WHERE email = ?",
            [&email],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional();
    let Ok(Some((user_id, role_raw, organization_id))) = user else {
        return err(&req.id, "db_query_failed", "store failure", None);
    };
    // A stored role outside the closed set is corrupt data, not a default.
    let Some(role) = Role::parse(&role_raw) else {
        return db_failure(req, "auth.login stored role", format!("unknown role {:?}", role_raw));
    };
    let complete = match profile::profile_complete_for_user(conn, &user_id, role, &email) {
        Ok(v) => v,
        Err(e) => return db_failure(req, "auth.login profile gate", e),
    };

    ok(
        &req.id,
        json!({
            "token": token,
            "user": {
                "id": user_id,
                "role": role.as_str(),
                "organizationId": organization_id,
                "profileComplete": complete,
            }
        }),
    )
}

fn handle_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let complete =
        match profile::profile_complete_for_user(conn, &actor.user_id, actor.role, &actor.email) {
            Ok(v) => v,
            Err(e) => return db_failure(req, "auth.verify profile gate", e),
        };
    ok(
        &req.id,
        json!({
            "userId": actor.user_id,
            "role": actor.role.as_str(),
            "organizationId": actor.organization_id,
            "profileComplete": complete,
        }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let token = match required_str(req, "token") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match auth::logout(conn, &token) {
        Ok(removed) => ok(&req.id, json!({ "removed": removed })),
        Err(e) => db_failure(req, "auth.logout", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_register(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.verify" => Some(handle_verify(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
