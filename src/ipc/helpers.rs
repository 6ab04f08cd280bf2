use rusqlite::Connection;

use crate::auth::{self, ActorContext, Role};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_nonempty_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let s = required_str(req, key)?;
    if s.trim().is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(s.trim().to_string())
}

pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Derives the ActorContext for this request from params.token, exactly once.
pub fn require_actor(conn: &Connection, req: &Request) -> Result<ActorContext, serde_json::Value> {
    let token = required_str(req, "token")?;
    match auth::actor_from_token(conn, &token) {
        Ok(Some(actor)) => Ok(actor),
        Ok(None) => Err(err(&req.id, "unauthorized", "invalid or expired token", None)),
        Err(e) => {
            tracing::error!(error = %e, "token lookup failed");
            Err(err(&req.id, "db_query_failed", "store failure", None))
        }
    }
}

pub fn require_role(
    req: &Request,
    actor: &ActorContext,
    allowed: &[Role],
) -> Result<(), serde_json::Value> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(err(
            &req.id,
            "forbidden",
            "not permitted for this role",
            None,
        ))
    }
}

/// The student profile row id, required for student-scoped operations.
pub fn require_student_profile(
    req: &Request,
    actor: &ActorContext,
) -> Result<String, serde_json::Value> {
    actor.student_id.clone().ok_or_else(|| {
        err(
            &req.id,
            "forbidden",
            "complete your profile first",
            None,
        )
    })
}

pub fn require_admin_profile(
    req: &Request,
    actor: &ActorContext,
) -> Result<String, serde_json::Value> {
    actor.admin_id.clone().ok_or_else(|| {
        err(
            &req.id,
            "forbidden",
            "complete your profile first",
            None,
        )
    })
}

/// Uniform store-failure mapping: detail to the log, a generic message to
/// the client.
pub fn db_failure(req: &Request, context: &str, e: impl std::fmt::Display) -> serde_json::Value {
    tracing::error!(error = %e, context, "store operation failed");
    err(&req.id, "db_query_failed", "store failure", None)
}
