use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Platform role carried in the access token and stamped on chat messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Parent,
    Teacher,
    Moderator,
    Curator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Parent => "parent",
            Role::Teacher => "teacher",
            Role::Moderator => "moderator",
            Role::Curator => "curator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    #[serde(default)]
    pub role: Role,
    /// Display name, used as `sender_name` on live messages
    #[serde(default)]
    pub name: Option<String>,
    /// Additional custom claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    pub fn user_id(&self) -> &str {
        &self.sub
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }

    /// Students may only ever address their own room; staff pick the student explicitly.
    pub fn resolve_student_id(&self, requested: Option<&str>) -> Option<String> {
        if self.is_student() {
            return Some(self.sub.clone());
        }
        requested.filter(|s| !s.is_empty()).map(str::to_string)
    }

    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp < now
    }
}
