use crate::auth::{ActorContext, Role};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_failure, opt_str, require_actor, require_admin_profile, require_student_profile,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::routing::{self, ComplaintRow};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// Resolves and authorizes the conversation's complaint for the sender.
/// Students fall back to their own most recent complaint; admins without an
/// explicit complaint id must name the student they are replying to.
fn conversation_complaint(
    conn: &Connection,
    req: &Request,
    actor: &ActorContext,
) -> Result<ComplaintRow, serde_json::Value> {
    let explicit = opt_str(req, "complaintId");

    match actor.role {
        Role::Student => {
            let student_id = require_student_profile(req, actor)?;
            match explicit {
                Some(complaint_id) => {
                    match routing::authorize_student_for_complaint(conn, &student_id, &complaint_id)
                    {
                        Ok(Some(c)) => Ok(c),
                        Ok(None) => Err(err(&req.id, "forbidden", "not permitted", None)),
                        Err(e) => Err(db_failure(req, "chat complaint authorize", e)),
                    }
                }
                None => match routing::resolve_active_complaint(conn, &student_id) {
                    Ok(Some(c)) => Ok(c),
                    Ok(None) => Err(err(
                        &req.id,
                        "not_found",
                        "no complaint on file for this conversation",
                        None,
                    )),
                    Err(e) => Err(db_failure(req, "chat complaint resolve", e)),
                },
            }
        }
        Role::Admin => {
            let admin_id = require_admin_profile(req, actor)?;
            let complaint_id = match explicit {
                Some(id) => id,
                None => {
                    let student_id = required_str(req, "studentId")?;
                    match routing::resolve_active_complaint(conn, &student_id) {
                        Ok(Some(c)) => c.id,
                        Ok(None) => {
                            return Err(err(
                                &req.id,
                                "not_found",
                                "no complaint on file for this conversation",
                                None,
                            ))
                        }
                        Err(e) => return Err(db_failure(req, "chat complaint resolve", e)),
                    }
                }
            };
            match routing::authorize_admin_for_complaint(conn, &admin_id, &complaint_id) {
                Ok(Some(c)) => Ok(c),
                Ok(None) => Err(err(&req.id, "forbidden", "not permitted", None)),
                Err(e) => Err(db_failure(req, "chat complaint authorize", e)),
            }
        }
        _ => Err(err(&req.id, "forbidden", "not permitted for this role", None)),
    }
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
    let complaint = match conversation_complaint(conn, req, &actor) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let body = opt_str(req, "body").unwrap_or_default();
    let attachment_url = opt_str(req, "attachmentUrl");
    let attachment_name = opt_str(req, "attachmentName");
    if body.trim().is_empty() && attachment_url.is_none() {
        return err(
            &req.id,
            "bad_params",
            "message needs a body or an attachment",
            None,
        );
    }

    let (sender_role, sender_id) = match actor.role {
        Role::Student => ("STUDENT", actor.student_id.clone().unwrap_or_default()),
        _ => ("ADMIN", actor.admin_id.clone().unwrap_or_default()),
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO chat_messages(id, complaint_id, sender_role, sender_id, body,
                                   attachment_url, attachment_name, sent_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &complaint.id,
            sender_role,
            &sender_id,
            &body,
            &attachment_url,
            &attachment_name,
            db::now_iso(),
        ),
    ) {
        return db_failure(req, "chat.send insert", e);
    }

    ok(
        &req.id,
        json!({ "messageId": id, "complaintId": complaint.id }),
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
    let complaint = match conversation_complaint(conn, req, &actor) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, sender_role, sender_id, body, attachment_url, attachment_name, sent_at
         FROM chat_messages
         WHERE complaint_id = ?
         ORDER BY sent_at, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return db_failure(req, "chat.list prepare", e),
    };
    let rows = stmt
        .query_map([&complaint.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "senderRole": r.get::<_, String>(1)?,
                "senderId": r.get::<_, String>(2)?,
                "body": r.get::<_, String>(3)?,
                "attachmentUrl": r.get::<_, Option<String>>(4)?,
                "attachmentName": r.get::<_, Option<String>>(5)?,
                "sentAt": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(messages) => ok(
            &req.id,
            json!({ "complaintId": complaint.id, "messages": messages }),
        ),
        Err(e) => db_failure(req, "chat.list", e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "chat.send" => Some(handle_send(state, req)),
        "chat.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
