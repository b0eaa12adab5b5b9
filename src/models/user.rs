use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Basic email sanity check: one `@`, non-empty local part, dotted domain.
/// Deliberately permissive; this is not RFC 5322.
fn validate_email_format(email: &str) -> Result<()> {
    let email = email.trim();

    if email.is_empty() {
        return Err(AppError::BadRequest("Email cannot be empty".into()));
    }

    let Some((local_part, domain_part)) = email.split_once('@') else {
        return Err(AppError::BadRequest("Invalid email format".into()));
    };

    if local_part.is_empty() || local_part.contains(' ') || domain_part.contains('@') {
        return Err(AppError::BadRequest("Invalid email format".into()));
    }

    if !domain_part.contains('.') || domain_part.starts_with('.') || domain_part.ends_with('.') {
        return Err(AppError::BadRequest("Invalid email format".into()));
    }

    Ok(())
}

/// A licensee within one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub project_id: String,
    pub email: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
}

impl CreateUser {
    pub fn validate(&self) -> Result<()> {
        validate_email_format(&self.email)?;
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("Name cannot be empty".into()));
        }
        Ok(())
    }
}
