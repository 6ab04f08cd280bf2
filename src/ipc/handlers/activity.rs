use crate::auth::Role;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, db_failure, require_actor, require_role};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(100)
        .clamp(1, 500);

    let mut stmt = match conn.prepare(
        "SELECT l.id, l.action, l.ip, l.created_at, a.full_name
         FROM activity_log l
         LEFT JOIN admins a ON a.id = l.admin_id
         WHERE l.organization_id = ?
         ORDER BY l.created_at DESC, l.rowid DESC
         LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return db_failure(req, "activity.list prepare", e),
    };
    let rows = stmt
        .query_map((&actor.organization_id, limit), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "action": r.get::<_, String>(1)?,
                "ip": r.get::<_, Option<String>>(2)?,
                "createdAt": r.get::<_, String>(3)?,
                "adminName": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => db_failure(req, "activity.list", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activity.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
