use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Teacher,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STUDENT" => Some(Self::Student),
            "TEACHER" => Some(Self::Teacher),
            "ADMIN" => Some(Self::Admin),
            "SUPER_ADMIN" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Teacher => "TEACHER",
            Self::Admin => "ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }

    /// TEACHER shares the admin-shaped profile record.
    pub fn uses_admin_profile(self) -> bool {
        !matches!(self, Self::Student)
    }
}

/// Verified identity for one request. Derived once from the bearer token and
/// passed explicitly into every operation that needs it.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub user_id: String,
    pub role: Role,
    pub organization_id: String,
    pub email: String,
    /// Student profile row id, when role = STUDENT and the profile exists.
    pub student_id: Option<String>,
    /// Admin profile row id, for admin-shaped roles with a profile.
    pub admin_id: Option<String>,
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn new_salt() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug)]
pub enum LoginError {
    BadCredentials,
    InactiveUser,
    InactiveOrganization,
}

/// Checks credentials and tenant state, then issues a bearer token.
/// Organization deactivation is enforced here, at login time.
pub fn login(conn: &Connection, email: &str, password: &str) -> anyhow::Result<Result<String, LoginError>> {
    let row = conn
        .query_row(
            "SELECT u.id, u.password_hash, u.password_salt, u.active, o.active
             FROM users u JOIN organizations o ON o.id = u.organization_id
             WHERE u.email = ?",
            [email],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)? != 0,
                    r.get::<_, i64>(4)? != 0,
                ))
            },
        )
        .optional()?;

    let Some((user_id, hash, salt, user_active, org_active)) = row else {
        return Ok(Err(LoginError::BadCredentials));
    };
    if hash_password(password, &salt) != hash {
        return Ok(Err(LoginError::BadCredentials));
    }
    if !org_active {
        return Ok(Err(LoginError::InactiveOrganization));
    }
    if !user_active {
        return Ok(Err(LoginError::InactiveUser));
    }

    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at) VALUES (?, ?, ?)",
        (&token, &user_id, db::now_iso()),
    )?;
    Ok(Ok(token))
}

pub fn logout(conn: &Connection, token: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(n > 0)
}

/// Resolves a bearer token to an ActorContext, or None when the token is
/// unknown or the user/organization has since been deactivated.
pub fn actor_from_token(conn: &Connection, token: &str) -> anyhow::Result<Option<ActorContext>> {
    let row = conn
        .query_row(
            "SELECT u.id, u.role, u.organization_id, u.email, u.active, o.active
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             JOIN organizations o ON o.id = u.organization_id
             WHERE s.token = ?",
            [token],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)? != 0,
                    r.get::<_, i64>(5)? != 0,
                ))
            },
        )
        .optional()?;

    let Some((user_id, role_raw, organization_id, email, user_active, org_active)) = row else {
        return Ok(None);
    };
    if !user_active || !org_active {
        return Ok(None);
    }
    let Some(role) = Role::parse(&role_raw) else {
        return Ok(None);
    };

    let student_id = conn
        .query_row(
            "SELECT id FROM students WHERE user_id = ?",
            [&user_id],
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    let admin_id = conn
        .query_row("SELECT id FROM admins WHERE user_id = ?", [&user_id], |r| {
            r.get::<_, String>(0)
        })
        .optional()?;

    Ok(Some(ActorContext {
        user_id,
        role,
        organization_id,
        email,
        student_id,
        admin_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_case_insensitive_and_closed() {
        assert_eq!(Role::parse("student"), Some(Role::Student));
        assert_eq!(Role::parse("Super_Admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::parse("TEACHER"), Some(Role::Teacher));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn password_hash_depends_on_salt() {
        let a = hash_password("secret", "salt-a");
        let b = hash_password("secret", "salt-b");
        assert_ne!(a, b);
        assert_eq!(a, hash_password("secret", "salt-a"));
    }
}
