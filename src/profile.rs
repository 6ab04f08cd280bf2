use crate::auth::Role;

/// Role-specific required fields, as fetched from the profile sub-record.
/// `None` means the sub-record itself does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct StudentProfileFields {
    pub matric_no: String,
    pub department: String,
    pub level: String,
}

#[derive(Debug, Clone, Default)]
pub struct AdminProfileFields {
    pub full_name: String,
    pub department: String,
    pub username: String,
}

fn filled(s: &str) -> bool {
    !s.trim().is_empty()
}

/// Pure completeness predicate. A missing profile record is incomplete,
/// never an error; roles outside the student/admin split count as complete
/// so the shell never redirect-loops on them.
pub fn is_profile_complete(
    role: Role,
    email: &str,
    student: Option<&StudentProfileFields>,
    admin: Option<&AdminProfileFields>,
) -> bool {
    match role {
        Role::Student => match student {
            Some(p) => {
                filled(&p.matric_no) && filled(&p.department) && filled(&p.level) && filled(email)
            }
            None => false,
        },
        Role::Admin | Role::SuperAdmin | Role::Teacher => match admin {
            Some(p) => filled(&p.full_name) && filled(&p.department) && filled(email),
            None => false,
        },
    }
}
