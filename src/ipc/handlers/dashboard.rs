use crate::auth::Role;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, db_failure, require_actor, require_admin_profile, require_role,
    require_student_profile,
};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeSet;

/// Each dashboard is composed of several independent queries with no
/// snapshot isolation across them; a row landing mid-request can skew one
/// statistic against another for that response. Accepted.
fn status_counts(
    conn: &Connection,
    where_clause: &str,
    param: &str,
) -> anyhow::Result<(i64, i64, i64, i64, i64)> {
    let sql = format!(
        "SELECT p.status, COUNT(*) FROM complaints p
         JOIN categories c ON c.id = p.category_id
         {} GROUP BY p.status",
        where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([param], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut pending = 0;
    let mut in_progress = 0;
    let mut resolved = 0;
    let mut rejected = 0;
    for (status, count) in &rows {
        match status.as_str() {
            "PENDING" => pending = *count,
            "IN_PROGRESS" => in_progress = *count,
            "RESOLVED" => resolved = *count,
            "REJECTED" => rejected = *count,
            _ => {}
        }
    }
    let total = pending + in_progress + resolved + rejected;
    Ok((total, pending, in_progress, resolved, rejected))
}

fn handle_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let scope =
        "WHERE p.category_id IN (SELECT category_id FROM category_admins WHERE admin_id = ?)";
    let (total, pending, in_progress, resolved, rejected) =
        match status_counts(conn, scope, &admin_id) {
            Ok(v) => v,
            Err(e) => return db_failure(req, "dashboard.admin counts", e),
        };

    let year = req
        .params
        .get("year")
        .and_then(|v| v.as_i64())
        .map(|y| y as i32)
        .unwrap_or_else(|| Utc::now().year());
    let timestamps: Result<Vec<String>, _> = (|| {
        let mut stmt = conn.prepare(
            "SELECT p.submitted_at FROM complaints p
             WHERE p.category_id IN
                (SELECT category_id FROM category_admins WHERE admin_id = ?)",
        )?;
        let rows = stmt
            .query_map([&admin_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, rusqlite::Error>(rows)
    })();
    let timestamps = match timestamps {
        Ok(v) => v,
        Err(e) => return db_failure(req, "dashboard.admin trend", e),
    };
    let trend = stats::monthly_buckets(timestamps.iter().map(|s| s.as_str()), year);

    let recent: Result<Vec<serde_json::Value>, _> = (|| {
        let mut stmt = conn.prepare(
            "SELECT p.id, p.title, p.status, p.submitted_at,
                    COALESCE(s.full_name, s.matric_no), c.name
             FROM complaints p
             JOIN students s ON s.id = p.student_id
             JOIN categories c ON c.id = p.category_id
             WHERE p.category_id IN
                (SELECT category_id FROM category_admins WHERE admin_id = ?)
             ORDER BY p.submitted_at DESC, p.rowid DESC
             LIMIT 5",
        )?;
        let rows = stmt
            .query_map([&admin_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "status": r.get::<_, String>(2)?,
                    "submittedAt": r.get::<_, String>(3)?,
                    "studentName": r.get::<_, String>(4)?,
                    "categoryName": r.get::<_, String>(5)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, rusqlite::Error>(rows)
    })();
    let recent = match recent {
        Ok(v) => v,
        Err(e) => return db_failure(req, "dashboard.admin recent", e),
    };

    ok(
        &req.id,
        json!({
            "counts": {
                "total": total,
                "pending": pending,
                "inProgress": in_progress,
                "resolved": resolved,
                "rejected": rejected,
            },
            "monthlyTrend": trend,
            "year": year,
            "recentComplaints": recent,
        }),
    )
}

fn handle_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let totals: Result<(i64, i64, i64), _> = conn.query_row(
        "SELECT COUNT(*),
                COUNT(CASE WHEN a.completed_at IS NOT NULL THEN 1 END),
                COUNT(DISTINCT a.student_id)
         FROM quiz_attempts a
         JOIN quizzes q ON q.id = a.quiz_id
         WHERE q.teacher_admin_id = ?",
        [&teacher_admin_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    );
    let (total_attempts, completed_attempts, unique_students) = match totals {
        Ok(v) => v,
        Err(e) => return db_failure(req, "dashboard.teacher totals", e),
    };
    let completion_rate =
        stats::safe_ratio(completed_attempts as f64, total_attempts as f64);

    // Average excludes null and non-positive scores from both sides.
    let per_subject: Result<Vec<serde_json::Value>, _> = (|| {
        let mut stmt = conn.prepare(
            "SELECT s.id, s.name,
                    COUNT(DISTINCT a.student_id),
                    COUNT(a.id),
                    COUNT(CASE WHEN a.completed_at IS NOT NULL THEN 1 END),
                    COALESCE(AVG(CASE WHEN a.completed_at IS NOT NULL AND a.score > 0
                                      THEN a.score END), 0)
             FROM subjects s
             JOIN quizzes q ON q.subject_id = s.id
             LEFT JOIN quiz_attempts a ON a.quiz_id = q.id
             WHERE s.teacher_admin_id = ?
             GROUP BY s.id, s.name
             ORDER BY s.name",
        )?;
        let rows = stmt
            .query_map([&teacher_admin_id], |r| {
                let total: i64 = r.get(3)?;
                let completed: i64 = r.get(4)?;
                Ok(json!({
                    "subjectId": r.get::<_, String>(0)?,
                    "subjectName": r.get::<_, String>(1)?,
                    "studentCount": r.get::<_, i64>(2)?,
                    "averageScore": r.get::<_, f64>(5)?,
                    "completionRate": stats::safe_ratio(completed as f64, total as f64),
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, rusqlite::Error>(rows)
    })();
    let per_subject = match per_subject {
        Ok(v) => v,
        Err(e) => return db_failure(req, "dashboard.teacher per subject", e),
    };

    ok(
        &req.id,
        json!({
            "uniqueStudents": unique_students,
            "totalAttempts": total_attempts,
            "completedAttempts": completed_attempts,
            "completionRate": completion_rate,
            "subjects": per_subject,
        }),
    )
}

fn handle_student(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let as_of = match req.params.get("asOf").and_then(|v| v.as_str()) {
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => return err(&req.id, "bad_params", "asOf must be YYYY-MM-DD", None),
        },
        None => Utc::now().date_naive(),
    };

    let completed: Result<(i64, f64), _> = conn.query_row(
        "SELECT COUNT(*), COALESCE(AVG(score), 0)
         FROM quiz_attempts
         WHERE student_id = ? AND completed_at IS NOT NULL",
        [&student_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    );
    let (completed_count, average_score) = match completed {
        Ok(v) => v,
        Err(e) => return db_failure(req, "dashboard.student completed", e),
    };

    let attempt_days: Result<BTreeSet<NaiveDate>, _> = (|| {
        let mut stmt = conn.prepare(
            "SELECT started_at FROM quiz_attempts WHERE student_id = ?",
        )?;
        let ts = stmt
            .query_map([&student_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, rusqlite::Error>(ts.iter().filter_map(|t| stats::local_date(t)).collect())
    })();
    let attempt_days = match attempt_days {
        Ok(v) => v,
        Err(e) => return db_failure(req, "dashboard.student attempt days", e),
    };
    let streak_days = stats::study_streak(&attempt_days, as_of);

    let snapshot = stats::StudentStats {
        completed_count,
        average_score,
        streak_days,
        as_of: db::now_iso(),
    };
    let achievements = stats::evaluate_achievements(&snapshot);

    ok(
        &req.id,
        json!({
            "completedCount": snapshot.completed_count,
            "averageScore": snapshot.average_score,
            "studyStreak": snapshot.streak_days,
            "asOfDate": as_of.format("%Y-%m-%d").to_string(),
            "achievements": achievements,
        }),
    )
}

fn handle_super_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let org = actor.organization_id.clone();

    let entity_counts: Result<(i64, i64, i64, i64), _> = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM categories c WHERE c.organization_id = ?1),
            (SELECT COUNT(*) FROM admins a JOIN users u ON u.id = a.user_id
             WHERE u.organization_id = ?1),
            (SELECT COUNT(*) FROM students s JOIN users u ON u.id = s.user_id
             WHERE u.organization_id = ?1),
            (SELECT COUNT(*) FROM complaints p JOIN categories c ON c.id = p.category_id
             WHERE c.organization_id = ?1)",
        [&org],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    );
    let (categories, admins, students, complaints) = match entity_counts {
        Ok(v) => v,
        Err(e) => return db_failure(req, "dashboard.superadmin counts", e),
    };

    // Pie-shaped status distribution.
    let distribution: Result<Vec<serde_json::Value>, _> = (|| {
        let mut stmt = conn.prepare(
            "SELECT p.status, COUNT(*)
             FROM complaints p JOIN categories c ON c.id = p.category_id
             WHERE c.organization_id = ?
             GROUP BY p.status
             ORDER BY p.status",
        )?;
        let rows = stmt
            .query_map([&org], |r| {
                Ok(json!({
                    "status": r.get::<_, String>(0)?,
                    "count": r.get::<_, i64>(1)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, rusqlite::Error>(rows)
    })();
    let distribution = match distribution {
        Ok(v) => v,
        Err(e) => return db_failure(req, "dashboard.superadmin distribution", e),
    };

    // Bar-shaped per-department complaint counts; students with no
    // department resolve to "Unassigned".
    let per_department: Result<Vec<serde_json::Value>, _> = (|| {
        let mut stmt = conn.prepare(
            "SELECT COALESCE(d.name, 'Unassigned'), COUNT(p.id)
             FROM complaints p
             JOIN categories c ON c.id = p.category_id
             JOIN students s ON s.id = p.student_id
             JOIN users u ON u.id = s.user_id
             LEFT JOIN departments d ON d.id = u.department_id
             WHERE c.organization_id = ?
             GROUP BY COALESCE(d.name, 'Unassigned')
             ORDER BY COUNT(p.id) DESC, COALESCE(d.name, 'Unassigned')",
        )?;
        let rows = stmt
            .query_map([&org], |r| {
                Ok(json!({
                    "department": r.get::<_, String>(0)?,
                    "count": r.get::<_, i64>(1)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, rusqlite::Error>(rows)
    })();
    let per_department = match per_department {
        Ok(v) => v,
        Err(e) => return db_failure(req, "dashboard.superadmin per department", e),
    };

    ok(
        &req.id,
        json!({
            "counts": {
                "categories": categories,
                "admins": admins,
                "students": students,
                "complaints": complaints,
            },
            "statusDistribution": distribution,
            "departmentComplaints": per_department,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.admin" => Some(handle_admin(state, req)),
        "dashboard.teacher" => Some(handle_teacher(state, req)),
        "dashboard.student" => Some(handle_student(state, req)),
        "dashboard.superadmin" => Some(handle_super_admin(state, req)),
        _ => None,
    }
}
