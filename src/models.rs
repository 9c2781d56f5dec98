use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{fmt, str::FromStr};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FireSafety,
    EmergencyResponse,
    Equipment,
    Evacuation,
    FirstAid,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Receptionist,
    Housekeeping,
    Security,
    Maintenance,
    FoodService,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// Stored as TEXT columns, so each enum carries its own wire name.
macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(Level, "level", {
    Beginner => "beginner",
    Intermediate => "intermediate",
    Advanced => "advanced",
});

text_enum!(Category, "category", {
    FireSafety => "fire_safety",
    EmergencyResponse => "emergency_response",
    Equipment => "equipment",
    Evacuation => "evacuation",
    FirstAid => "first_aid",
});

text_enum!(Role, "role", {
    Admin => "admin",
    Manager => "manager",
    Receptionist => "receptionist",
    Housekeeping => "housekeeping",
    Security => "security",
    Maintenance => "maintenance",
    FoodService => "food_service",
});

/// One unit of a module's content. Order inside [`Module::sections`] is the
/// order learners must follow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    /// minutes
    pub duration: i32,
    pub content: String,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Module {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Declared length in minutes. Informational; never checked against the sections.
    pub duration: i32,
    pub level: Level,
    pub category: Category,
    pub roles: Vec<Role>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Module {
    pub fn is_eligible(&self, role: Role) -> bool {
        role == Role::Admin || self.roles.contains(&role)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizOption {
    pub id: String,
    pub text: String,
    pub is_correct: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<QuizOption>,
}

impl Question {
    pub fn correct_option(&self) -> Option<&QuizOption> {
        self.options.iter().find(|o| o.is_correct)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Quiz {
    pub id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Progress {
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub percent: i32,
    pub sections_completed: i32,
    pub completed: bool,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Certificate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub score: i32,
    pub issue_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
}

// --- request bodies ---

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ModuleReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration: Option<i32>,
    pub level: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct QuizReq {
    pub module_id: Option<Uuid>,
    pub title: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProgressReq {
    pub percent: i32,
    pub completed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct QuizSubmission {
    /// question id -> selected option id
    #[serde(default)]
    pub answers: std::collections::HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AnswerReq {
    pub question_id: String,
    pub option_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CatalogQuery {
    pub category: Option<Category>,
    pub level: Option<Level>,
}
