use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use ulid::Ulid;

use crate::model::FileRecord;

/// Resolved caller role. Issued by the identity collaborator; this module
/// is the single place capability decisions are made — the engine never
/// compares role strings inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Instructor,
    Staff,
}

/// Caller identity as resolved from the connection's startup `user`
/// parameter: `student:<ulid>`, `instructor:<ulid>` or `staff:<ulid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: Ulid,
    pub role: Role,
}

impl Caller {
    pub fn parse(user: &str) -> Option<Caller> {
        let (role, id) = user.split_once(':')?;
        let role = match role.trim() {
            "student" => Role::Student,
            "instructor" => Role::Instructor,
            "staff" => Role::Staff,
            _ => return None,
        };
        let id = Ulid::from_string(id.trim()).ok()?;
        Some(Caller { id, role })
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Staff)
    }

    /// Registry records (instructors, vehicles, categories, exam forms,
    /// files) are supplied by staff only.
    pub fn can_register(&self) -> bool {
        self.is_staff()
    }

    /// Availability is managed by the instructor themself or staff.
    pub fn can_manage_availability(&self, instructor_id: Ulid) -> bool {
        match self.role {
            Role::Staff => true,
            Role::Instructor => self.id == instructor_id,
            Role::Student => false,
        }
    }

    /// Appointments are booked, moved and cancelled by the file's student
    /// or staff.
    pub fn can_book(&self, file: &FileRecord) -> bool {
        match self.role {
            Role::Staff => true,
            Role::Student => self.id == file.student_id,
            Role::Instructor => false,
        }
    }

    /// Session forms are started, marked and finalized by the file's
    /// instructor only.
    pub fn can_drive_form(&self, file: &FileRecord) -> bool {
        matches!(self.role, Role::Instructor) && file.instructor_id == Some(self.id)
    }

    /// Forms and stats are readable by the owning instructor, the file's
    /// student, or staff.
    pub fn can_view_file(&self, file: &FileRecord) -> bool {
        match self.role {
            Role::Staff => true,
            Role::Instructor => file.instructor_id == Some(self.id),
            Role::Student => self.id == file.student_id,
        }
    }

    /// Per-student listings: the student themself or staff.
    pub fn can_view_student(&self, student_id: Ulid) -> bool {
        match self.role {
            Role::Staff => true,
            Role::Student => self.id == student_id,
            Role::Instructor => false,
        }
    }
}

#[derive(Debug)]
pub struct DrivebookAuthSource {
    password: String,
}

impl DrivebookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for DrivebookAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roles() {
        let id = Ulid::new();
        let c = Caller::parse(&format!("instructor:{id}")).unwrap();
        assert_eq!(c.role, Role::Instructor);
        assert_eq!(c.id, id);

        assert!(Caller::parse(&format!("student:{id}")).is_some());
        assert!(Caller::parse(&format!("staff:{id}")).is_some());
        assert!(Caller::parse(&format!("admin:{id}")).is_none());
        assert!(Caller::parse("instructor").is_none());
        assert!(Caller::parse("instructor:not-a-ulid").is_none());
    }

    #[test]
    fn capability_matrix() {
        let instructor = Ulid::new();
        let student = Ulid::new();
        let file = FileRecord {
            id: Ulid::new(),
            student_id: student,
            instructor_id: Some(instructor),
            vehicle_id: None,
            category_id: None,
        };

        let as_instructor = Caller { id: instructor, role: Role::Instructor };
        let as_student = Caller { id: student, role: Role::Student };
        let as_staff = Caller { id: Ulid::new(), role: Role::Staff };
        let stranger = Caller { id: Ulid::new(), role: Role::Instructor };

        assert!(as_instructor.can_manage_availability(instructor));
        assert!(!stranger.can_manage_availability(instructor));
        assert!(as_staff.can_manage_availability(instructor));
        assert!(!as_student.can_manage_availability(instructor));

        assert!(as_student.can_book(&file));
        assert!(as_staff.can_book(&file));
        assert!(!as_instructor.can_book(&file));

        assert!(as_instructor.can_drive_form(&file));
        assert!(!as_staff.can_drive_form(&file));
        assert!(!as_student.can_drive_form(&file));
        assert!(!stranger.can_drive_form(&file));

        assert!(as_instructor.can_view_file(&file));
        assert!(as_student.can_view_file(&file));
        assert!(as_staff.can_view_file(&file));
        assert!(!stranger.can_view_file(&file));

        assert!(as_student.can_view_student(student));
        assert!(!as_instructor.can_view_student(student));
        assert!(as_staff.can_view_student(student));
    }
}
