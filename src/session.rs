use serde::{Deserialize, Serialize};

/// Role of an account. Stored as `user_type` in the users table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    WorkingStudent,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            "working_student" => Some(Role::WorkingStudent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::WorkingStudent => "working_student",
        }
    }

    pub fn is_student(self) -> bool {
        matches!(self, Role::Student | Role::WorkingStudent)
    }
}

/// Profile of the signed-in user, as the client mirrors it under its `user`
/// storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub department_code: Option<String>,
    /// `data:` URL of the stored profile photo.
    #[serde(default)]
    pub profile_photo: Option<String>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub login_log_id: Option<i64>,
}

/// Created on login, dropped on logout or workspace switch.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub user: SessionUser,
    pub pc_number: String,
}

impl Session {
    pub fn new(user: SessionUser, pc_number: String) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            user,
            pc_number,
        }
    }

    /// Replace the profile while keeping identity and login log.
    pub fn update_user(&mut self, mut user: SessionUser) -> Result<(), String> {
        if user.id != self.user.id {
            return Err(format!(
                "session belongs to user {}, not {}",
                self.user.id, user.id
            ));
        }
        user.login_log_id = self.user.login_log_id;
        self.user = user;
        Ok(())
    }

    pub fn to_storage_json(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(&self.user).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = v.as_object_mut() {
            obj.insert("session_id".into(), self.session_id.clone().into());
            obj.insert("pc_number".into(), self.pc_number.clone().into());
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64) -> SessionUser {
        SessionUser {
            id,
            name: "2024-0001".into(),
            role: Role::Student,
            first_name: Some("Ana".into()),
            middle_name: None,
            last_name: Some("Cruz".into()),
            gender: None,
            employee_id: None,
            student_id: Some("2024-0001".into()),
            email: None,
            contact_number: None,
            department_code: None,
            profile_photo: None,
            created: "2024-01-01 00:00:00".into(),
            login_log_id: Some(9),
        }
    }

    #[test]
    fn roles_round_trip_through_strings() {
        for r in [Role::Admin, Role::Teacher, Role::Student, Role::WorkingStudent] {
            assert_eq!(Role::parse(r.as_str()), Some(r));
        }
        assert_eq!(Role::parse("guest"), None);
        assert!(Role::WorkingStudent.is_student());
        assert!(!Role::Teacher.is_student());
    }

    #[test]
    fn update_keeps_login_log_and_rejects_other_users() {
        let mut s = Session::new(user(1), "LAB-PC-03".into());
        let mut changed = user(1);
        changed.first_name = Some("Anna".into());
        changed.login_log_id = None;
        s.update_user(changed).expect("same user");
        assert_eq!(s.user.first_name.as_deref(), Some("Anna"));
        assert_eq!(s.user.login_log_id, Some(9));

        assert!(s.update_user(user(2)).is_err());
    }

    #[test]
    fn storage_blob_carries_profile_and_session() {
        let s = Session::new(user(1), "LAB-PC-03".into());
        let blob = s.to_storage_json();
        assert_eq!(blob["role"], "student");
        assert_eq!(blob["pc_number"], "LAB-PC-03");
        assert_eq!(blob["login_log_id"], 9);
        assert_eq!(blob["session_id"].as_str(), Some(s.session_id.as_str()));
    }
}
