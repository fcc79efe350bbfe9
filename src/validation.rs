//! Form checks run before a request is sent.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{FieldError, Result, TmsError};
use crate::types::{Role, TicketPriority, WorkCategory, WorkType};

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"))
}

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    if email.trim().is_empty() {
        errors.push(FieldError::new("email", "Email is required"));
    } else if !email_pattern().is_match(email.trim()) {
        errors.push(FieldError::new("email", "Invalid email address"));
    }
}

fn check_min_len(field: &str, label: &str, value: &str, min: usize, errors: &mut Vec<FieldError>) {
    if value.trim().chars().count() < min {
        errors.push(FieldError::new(
            field,
            format!("{label} must be at least {min} characters"),
        ));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TmsError::validation(errors))
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_email(&self.email, &mut errors);
        check_min_len("password", "Password", &self.password, 6, &mut errors);
        finish(errors)
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct RegisterForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_min_len("name", "Name", &self.name, 2, &mut errors);
        check_email(&self.email, &mut errors);
        check_min_len("password", "Password", &self.password, 6, &mut errors);
        if !matches!(self.role, Role::Agent | Role::Customer) {
            errors.push(FieldError::new("role", "Role must be AGENT or CUSTOMER"));
        }
        finish(errors)
    }
}

/// New ticket as sent to `POST /tickets`.
#[derive(Serialize, Debug, Clone)]
pub struct TicketForm {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
    pub work_category: WorkCategory,
    pub work_type: WorkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_points: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
}

impl TicketForm {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.project_id.trim().is_empty() {
            errors.push(FieldError::new("project_id", "Project is required"));
        }
        check_min_len("title", "Title", &self.title, 3, &mut errors);
        check_min_len("description", "Description", &self.description, 10, &mut errors);
        if !self.work_category.allows(self.work_type) {
            errors.push(FieldError::new(
                "work_type",
                format!(
                    "{} is not a valid work type for {}",
                    self.work_type.label(),
                    self.work_category
                ),
            ));
        }
        finish(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(err: TmsError) -> Vec<String> {
        match err {
            TmsError::Validation { fields, .. } => fields.into_iter().map(|f| f.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_login_requires_valid_email_and_password() {
        let form = LoginForm {
            email: "not-an-email".into(),
            password: "123".into(),
        };
        assert_eq!(fields(form.validate().unwrap_err()), vec!["email", "password"]);

        let form = LoginForm {
            email: "ann@example.com".into(),
            password: "secret1".into(),
        };
        assert!(form.validate().is_ok());
    }

    #[test]
    fn test_register_rejects_privileged_roles() {
        let form = RegisterForm {
            name: "Ann".into(),
            email: "ann@example.com".into(),
            password: "secret1".into(),
            role: Role::Admin,
        };
        assert_eq!(fields(form.validate().unwrap_err()), vec!["role"]);
    }

    #[test]
    fn test_ticket_work_type_must_fit_category() {
        let mut form = TicketForm {
            project_id: "p-1".into(),
            title: "Login broken".into(),
            description: "Users cannot sign in since the last deploy".into(),
            priority: TicketPriority::High,
            work_category: WorkCategory::Support,
            work_type: WorkType::NewFeature,
            story_points: None,
            assignee_id: None,
        };
        assert_eq!(fields(form.validate().unwrap_err()), vec!["work_type"]);

        form.work_type = WorkType::Incident;
        assert!(form.validate().is_ok());
    }

    #[test]
    fn test_ticket_short_fields() {
        let form = TicketForm {
            project_id: " ".into(),
            title: "ab".into(),
            description: "short".into(),
            priority: TicketPriority::Low,
            work_category: WorkCategory::Development,
            work_type: WorkType::BugFix,
            story_points: Some(3),
            assignee_id: None,
        };
        assert_eq!(
            fields(form.validate().unwrap_err()),
            vec!["project_id", "title", "description"]
        );
    }
}
