use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("campusdesk.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS organizations(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            contact_email TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(organization_id) REFERENCES organizations(id),
            UNIQUE(organization_id, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            department_id TEXT,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            email_verified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(organization_id) REFERENCES organizations(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_org ON users(organization_id)",
        [],
    )?;

    // Role profiles are created lazily on first profile completion.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            matric_no TEXT NOT NULL,
            department TEXT NOT NULL,
            level TEXT NOT NULL,
            full_name TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL,
            department TEXT NOT NULL,
            full_name TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(organization_id) REFERENCES organizations(id),
            UNIQUE(organization_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS category_admins(
            category_id TEXT NOT NULL,
            admin_id TEXT NOT NULL,
            PRIMARY KEY(category_id, admin_id),
            FOREIGN KEY(category_id) REFERENCES categories(id),
            FOREIGN KEY(admin_id) REFERENCES admins(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_category_admins_admin ON category_admins(admin_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS complaints(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(category_id) REFERENCES categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_complaints_student ON complaints(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_complaints_category ON complaints(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chat_messages(
            id TEXT PRIMARY KEY,
            complaint_id TEXT NOT NULL,
            sender_role TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            body TEXT NOT NULL,
            attachment_url TEXT,
            attachment_name TEXT,
            sent_at TEXT NOT NULL,
            FOREIGN KEY(complaint_id) REFERENCES complaints(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_complaint ON chat_messages(complaint_id)",
        [],
    )?;

    // Exactly one of admin_id/student_id is set per row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            admin_id TEXT,
            student_id TEXT,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            kind TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(admin_id) REFERENCES admins(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            CHECK((admin_id IS NULL) != (student_id IS NULL))
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_admin ON notifications(admin_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_student ON notifications(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            teacher_admin_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(organization_id) REFERENCES organizations(id),
            FOREIGN KEY(teacher_admin_id) REFERENCES admins(id),
            UNIQUE(organization_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS quizzes(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            teacher_admin_id TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_admin_id) REFERENCES admins(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quizzes_subject ON quizzes(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quizzes_teacher ON quizzes(teacher_admin_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            prompt TEXT NOT NULL,
            answer TEXT NOT NULL,
            FOREIGN KEY(quiz_id) REFERENCES quizzes(id),
            UNIQUE(quiz_id, idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_attempts(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            score REAL,
            time_spent_seconds INTEGER,
            FOREIGN KEY(quiz_id) REFERENCES quizzes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_attempts_quiz ON quiz_attempts(quiz_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_attempts_student ON quiz_attempts(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_log(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            admin_id TEXT,
            action TEXT NOT NULL,
            ip TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(organization_id) REFERENCES organizations(id),
            FOREIGN KEY(admin_id) REFERENCES admins(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_log_org ON activity_log(organization_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    // Older workspaces carried a single admin_id column on categories. The
    // assignment set is the only source of truth now; fold any legacy value
    // into category_admins and null the column.
    migrate_legacy_category_admin(&conn)?;

    Ok(conn)
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Append-only audit record. Failures are the caller's to report or log;
/// this never mutates existing rows.
pub fn activity_log_append(
    conn: &Connection,
    organization_id: &str,
    admin_id: Option<&str>,
    action: &str,
    ip: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO activity_log(id, organization_id, admin_id, action, ip, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            organization_id,
            admin_id,
            action,
            ip,
            now_iso(),
        ),
    )?;
    Ok(())
}

fn migrate_legacy_category_admin(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "categories", "admin_id")? {
        return Ok(());
    }
    conn.execute(
        "INSERT OR IGNORE INTO category_admins(category_id, admin_id)
         SELECT id, admin_id FROM categories WHERE admin_id IS NOT NULL",
        [],
    )?;
    conn.execute(
        "UPDATE categories SET admin_id = NULL WHERE admin_id IS NOT NULL",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
