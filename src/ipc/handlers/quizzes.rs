use crate::auth::Role;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_failure, require_actor, require_admin_profile, require_role,
    require_student_profile, required_nonempty_str, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(req, &actor, &[Role::Teacher]) {
        return resp;
    }
    let teacher_admin_id = match require_admin_profile(req, &actor) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_nonempty_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO subjects(id, organization_id, teacher_admin_id, name) VALUES (?, ?, ?, ?)",
        (&id, &actor.organization_id, &teacher_admin_id, &name),
    ) {
        Ok(_) => ok(&req.id, json!({ "subjectId": id })),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let _ = msg;
            err(&req.id, "conflict", "subject already exists", None)
        }
        Err(e) => db_failure(req, "subjects.create", e),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name, s.teacher_admin_id,
                (SELECT COUNT(*) FROM quizzes q WHERE q.subject_id = s.id)
         FROM subjects s
         WHERE s.organization_id = ?
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return db_failure(req, "subjects.list prepare", e),
    };
    let rows = stmt
        .query_map([&actor.organization_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "teacherAdminId": r.get::<_, String>(2)?,
                "quizCount": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => db_failure(req, "subjects.list", e),
    }
}

fn owned_subject(
    conn: &Connection,
    subject_id: &str,
    teacher_admin_id: &str,
) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subjects WHERE id = ? AND teacher_admin_id = ?",
        [subject_id, teacher_admin_id],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn owned_quiz(conn: &Connection, quiz_id: &str, teacher_admin_id: &str) -> anyhow::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM quizzes WHERE id = ? AND teacher_admin_id = ?",
        [quiz_id, teacher_admin_id],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn handle_quizzes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(req, &actor, &[Role::Teacher]) {
        return resp;
    }
    let teacher_admin_id = match require_admin_profile(req, &actor) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match required_nonempty_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match owned_subject(conn, &subject_id, &teacher_admin_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return db_failure(req, "quizzes.create subject lookup", e),
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO quizzes(id, subject_id, teacher_admin_id, title, created_at)
         VALUES (?, ?, ?, ?, ?)",
        (&id, &subject_id, &teacher_admin_id, &title, db::now_iso()),
    ) {
        return db_failure(req, "quizzes.create insert", e);
    }
    ok(&req.id, json!({ "quizId": id }))
}

fn handle_quizzes_add_question(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(req, &actor, &[Role::Teacher]) {
        return resp;
    }
    let teacher_admin_id = match require_admin_profile(req, &actor) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let quiz_id = match required_str(req, "quizId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let prompt = match required_nonempty_str(req, "prompt") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let answer = match required_nonempty_str(req, "answer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match owned_quiz(conn, &quiz_id, &teacher_admin_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "quiz not found", None),
        Err(e) => return db_failure(req, "quizzes.addQuestion quiz lookup", e),
    }

    let next_idx: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(idx), -1) + 1 FROM questions WHERE quiz_id = ?",
        [&quiz_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_failure(req, "quizzes.addQuestion next idx", e),
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO questions(id, quiz_id, idx, prompt, answer) VALUES (?, ?, ?, ?, ?)",
        (&id, &quiz_id, next_idx, &prompt, &answer),
    ) {
        return db_failure(req, "quizzes.addQuestion insert", e);
    }
    ok(&req.id, json!({ "questionId": id, "idx": next_idx }))
}

fn handle_quizzes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };

    // Teachers see their own quizzes; everyone else sees the organization's.
    let (sql, param) = if actor.role == Role::Teacher {
        let Some(admin_id) = actor.admin_id.clone() else {
            return ok(&req.id, json!({ "quizzes": [] }));
        };
        (
            "SELECT q.id, q.title, q.subject_id, s.name, q.created_at,
                    (SELECT COUNT(*) FROM questions n WHERE n.quiz_id = q.id),
                    (SELECT COUNT(*) FROM quiz_attempts a WHERE a.quiz_id = q.id)
             FROM quizzes q JOIN subjects s ON s.id = q.subject_id
             WHERE q.teacher_admin_id = ?
             ORDER BY q.created_at DESC",
            admin_id,
        )
    } else {
        (
            "SELECT q.id, q.title, q.subject_id, s.name, q.created_at,
                    (SELECT COUNT(*) FROM questions n WHERE n.quiz_id = q.id),
                    (SELECT COUNT(*) FROM quiz_attempts a WHERE a.quiz_id = q.id)
             FROM quizzes q JOIN subjects s ON s.id = q.subject_id
             WHERE s.organization_id = ?
             ORDER BY q.created_at DESC",
            actor.organization_id.clone(),
        )
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return db_failure(req, "quizzes.list prepare", e),
    };
    let rows = stmt
        .query_map([&param], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "subjectId": r.get::<_, String>(2)?,
                "subjectName": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?,
                "questionCount": r.get::<_, i64>(5)?,
                "attemptCount": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(quizzes) => ok(&req.id, json!({ "quizzes": quizzes })),
        Err(e) => db_failure(req, "quizzes.list", e),
    }
}

fn handle_quizzes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(req, &actor, &[Role::Teacher]) {
        return resp;
    }
    let teacher_admin_id = match require_admin_profile(req, &actor) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let quiz_id = match required_str(req, "quizId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match owned_quiz(conn, &quiz_id, &teacher_admin_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "quiz not found", None),
        Err(e) => return db_failure(req, "quizzes.delete quiz lookup", e),
    }

    let attempts_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = ?",
        [&quiz_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_failure(req, "quizzes.delete attempts count", e),
    };
    if attempts_count > 0 {
        return err(
            &req.id,
            "conflict",
            "quiz has recorded attempts and cannot be deleted",
            Some(json!({ "attemptsCount": attempts_count })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM questions WHERE quiz_id = ?", [&quiz_id]) {
        return db_failure(req, "quizzes.delete questions", e);
    }
    if let Err(e) = conn.execute("DELETE FROM quizzes WHERE id = ?", [&quiz_id]) {
        return db_failure(req, "quizzes.delete quiz", e);
    }
    ok(&req.id, json!({ "deleted": true }))
}

fn handle_attempts_start(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let quiz_id = match required_str(req, "quizId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let in_org: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM quizzes q JOIN subjects s ON s.id = q.subject_id
         WHERE q.id = ? AND s.organization_id = ?",
        [&quiz_id, &actor.organization_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return db_failure(req, "attempts.start quiz lookup", e),
    };
    if in_org == 0 {
        return err(&req.id, "not_found", "quiz not found", None);
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO quiz_attempts(id, quiz_id, student_id, started_at)
         VALUES (?, ?, ?, ?)",
        (&id, &quiz_id, &student_id, db::now_iso()),
    ) {
        return db_failure(req, "attempts.start insert", e);
    }
    ok(&req.id, json!({ "attemptId": id }))
}

fn handle_attempts_complete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let attempt_id = match required_str(req, "attemptId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing score", None);
    };
    if !(0.0..=100.0).contains(&score) {
        return err(&req.id, "bad_params", "score must be in 0..=100", None);
    }
    let time_spent = req
        .params
        .get("timeSpentSeconds")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let owner: Option<String> = match conn
        .query_row(
            "SELECT student_id FROM quiz_attempts WHERE id = ?",
            [&attempt_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return db_failure(req, "attempts.complete lookup", e),
    };
    match owner {
        Some(owner_id) if owner_id == student_id => {}
        Some(_) => return err(&req.id, "forbidden", "not permitted", None),
        None => return err(&req.id, "not_found", "attempt not found", None),
    }

    if let Err(e) = conn.execute(
        "UPDATE quiz_attempts SET completed_at = ?, score = ?, time_spent_seconds = ?
         WHERE id = ?",
        (db::now_iso(), score, time_spent, &attempt_id),
    ) {
        return db_failure(req, "attempts.complete update", e);
    }
    ok(&req.id, json!({ "attemptId": attempt_id, "score": score }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "quizzes.create" => Some(handle_quizzes_create(state, req)),
        "quizzes.addQuestion" => Some(handle_quizzes_add_question(state, req)),
        "quizzes.list" => Some(handle_quizzes_list(state, req)),
        "quizzes.delete" => Some(handle_quizzes_delete(state, req)),
        "attempts.start" => Some(handle_attempts_start(state, req)),
        "attempts.complete" => Some(handle_attempts_complete(state, req)),
        _ => None,
    }
}
