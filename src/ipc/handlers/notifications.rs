use crate::auth::Role;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, db_failure, require_actor, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
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

    // Notifications address the role profile, not the user row.
    let (column, profile_id) = match actor.role {
        Role::Student => ("student_id", actor.student_id.clone()),
        _ => ("admin_id", actor.admin_id.clone()),
    };
    let Some(profile_id) = profile_id else {
        return ok(&req.id, json!({ "notifications": [], "unreadCount": 0 }));
    };

    let sql = format!(
        "SELECT id, title, message, kind, is_read, created_at
         FROM notifications WHERE {} = ?
         ORDER BY created_at DESC, rowid DESC",
        column
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return db_failure(req, "notifications.list prepare", e),
    };
    let rows = stmt
        .query_map([&profile_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "message": r.get::<_, String>(2)?,
                "kind": r.get::<_, String>(3)?,
                "isRead": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let notifications = match rows {
        Ok(v) => v,
        Err(e) => return db_failure(req, "notifications.list", e),
    };
    let unread = notifications
        .iter()
        .filter(|n| n["isRead"] == json!(false))
        .count();
    ok(
        &req.id,
        json!({ "notifications": notifications, "unreadCount": unread }),
    )
}

fn handle_mark_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let notification_id = match required_str(req, "notificationId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let owner = conn
        .query_row(
            "SELECT admin_id, student_id FROM notifications WHERE id = ?",
            [&notification_id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, Option<String>>(1)?,
                ))
            },
        )
        .optional();
    let owner = match owner {
        Ok(v) => v,
        Err(e) => return db_failure(req, "notifications.markRead owner lookup", e),
    };
    let Some((admin_owner, student_owner)) = owner else {
        return err(&req.id, "not_found", "notification not found", None);
    };

    let owned = match actor.role {
        Role::Student => actor.student_id.as_deref() == student_owner.as_deref()
            && student_owner.is_some(),
        _ => actor.admin_id.as_deref() == admin_owner.as_deref() && admin_owner.is_some(),
    };
    if !owned {
        return err(&req.id, "forbidden", "not permitted", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?",
        [&notification_id],
    ) {
        return db_failure(req, "notifications.markRead", e);
    }
    ok(&req.id, json!({ "notificationId": notification_id, "isRead": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(handle_list(state, req)),
        "notifications.markRead" => Some(handle_mark_read(state, req)),
        _ => None,
    }
}
