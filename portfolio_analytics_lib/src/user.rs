use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

/// One entry in the user directory. Email is unique at creation time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Input to registration and admin user creation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
}

/// Partial update applied to a directory entry. Unset fields are left
/// untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    pub avatar_url: Option<String>,
}

impl UserPatch {
    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(status) = self.status {
            user.status = status;
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
        }
    }
}

/// Business-rule rejection carrying the message surfaced to the visitor.
/// These are results, not errors; nothing in the auth flow panics or
/// propagates an unhandled failure to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    InvalidCredentials,
    EmailTaken,
}

impl fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthRejection::InvalidCredentials => {
                write!(f, "Invalid credentials or inactive account")
            }
            AuthRejection::EmailTaken => write!(f, "Email already in use"),
        }
    }
}

#[test]
fn user_serializes_with_camel_case_fields() {
    let user = User {
        id: "1".to_string(),
        name: "Admin User".to_string(),
        email: "admin@example.com".to_string(),
        role: UserRole::Admin,
        status: UserStatus::Active,
        created_at: Utc::now(),
        avatar_url: None,
    };

    let json = serde_json::to_string(&user).unwrap();
    assert!(json.contains("\"createdAt\""));
    assert!(json.contains("\"role\":\"admin\""));
    assert!(json.contains("\"status\":\"active\""));
    // Absent avatar is omitted from the stored JSON.
    assert!(!json.contains("avatarUrl"));
}

#[test]
fn patch_applies_only_set_fields() {
    let mut user = User {
        id: "1".to_string(),
        name: "Admin User".to_string(),
        email: "admin@example.com".to_string(),
        role: UserRole::Admin,
        status: UserStatus::Active,
        created_at: Utc::now(),
        avatar_url: None,
    };

    let patch = UserPatch {
        name: Some("Renamed".to_string()),
        status: Some(UserStatus::Inactive),
        ..UserPatch::default()
    };
    patch.apply(&mut user);

    assert_eq!(user.name, "Renamed");
    assert_eq!(user.status, UserStatus::Inactive);
    assert_eq!(user.email, "admin@example.com");
    assert_eq!(user.role, UserRole::Admin);
}
