use rusqlite::{Connection, OptionalExtension};

/// A complaint row with the denormalized bits the resolver and its callers
/// need.
#[derive(Debug, Clone)]
pub struct ComplaintRow {
    pub id: String,
    pub student_id: String,
    pub category_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub submitted_at: String,
    pub updated_at: String,
}

fn load_complaint(conn: &Connection, complaint_id: &str) -> anyhow::Result<Option<ComplaintRow>> {
    let row = conn
        .query_row(
            "SELECT id, student_id, category_id, title, description, status,
                    submitted_at, updated_at
             FROM complaints WHERE id = ?",
            [complaint_id],
            |r| {
                Ok(ComplaintRow {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    category_id: r.get(2)?,
                    title: r.get(3)?,
                    description: r.get(4)?,
                    status: r.get(5)?,
                    submitted_at: r.get(6)?,
                    updated_at: r.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Authorized iff the admin is in the complaint's category assignment set.
/// A missing complaint and an unassigned one both come back as `None` so the
/// caller cannot leak existence to an unauthorized admin.
pub fn authorize_admin_for_complaint(
    conn: &Connection,
    admin_id: &str,
    complaint_id: &str,
) -> anyhow::Result<Option<ComplaintRow>> {
    let Some(complaint) = load_complaint(conn, complaint_id)? else {
        return Ok(None);
    };
    let assigned: i64 = conn.query_row(
        "SELECT COUNT(*) FROM category_admins WHERE category_id = ? AND admin_id = ?",
        [&complaint.category_id, &admin_id.to_string()],
        |r| r.get(0),
    )?;
    if assigned == 0 {
        return Ok(None);
    }
    Ok(Some(complaint))
}

/// Student read access: the complaint must exist and belong to the student.
/// Same non-leaking shape as the admin check.
pub fn authorize_student_for_complaint(
    conn: &Connection,
    student_id: &str,
    complaint_id: &str,
) -> anyhow::Result<Option<ComplaintRow>> {
    let Some(complaint) = load_complaint(conn, complaint_id)? else {
        return Ok(None);
    };
    if complaint.student_id != student_id {
        return Ok(None);
    }
    Ok(Some(complaint))
}

/// Super-admin read access is tenant-wide: the complaint's category must
/// belong to the actor's organization.
pub fn authorize_super_admin_for_complaint(
    conn: &Connection,
    organization_id: &str,
    complaint_id: &str,
) -> anyhow::Result<Option<ComplaintRow>> {
    let Some(complaint) = load_complaint(conn, complaint_id)? else {
        return Ok(None);
    };
    let in_org: i64 = conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE id = ? AND organization_id = ?",
        [&complaint.category_id, &organization_id.to_string()],
        |r| r.get(0),
    )?;
    if in_org == 0 {
        return Ok(None);
    }
    Ok(Some(complaint))
}

/// When a chat message arrives without an explicit complaint id, the
/// conversation attaches to the student's most recent complaint regardless
/// of status. Ties on submitted_at break by insertion order. `None` when the
/// student has no complaints; the caller must not create one.
pub fn resolve_active_complaint(
    conn: &Connection,
    student_id: &str,
) -> anyhow::Result<Option<ComplaintRow>> {
    let row = conn
        .query_row(
            "SELECT id, student_id, category_id, title, description, status,
                    submitted_at, updated_at
             FROM complaints
             WHERE student_id = ?
             ORDER BY submitted_at DESC, rowid ASC
             LIMIT 1",
            [student_id],
            |r| {
                Ok(ComplaintRow {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    category_id: r.get(2)?,
                    title: r.get(3)?,
                    description: r.get(4)?,
                    status: r.get(5)?,
                    submitted_at: r.get(6)?,
                    updated_at: r.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}
