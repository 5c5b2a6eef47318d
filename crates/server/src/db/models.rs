use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, types::Json, FromRow, Row};
use strum_macros::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserRole {
    Freelancer,
    Client,
    Admin,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Draft, Open)
                | (Open, InProgress)
                | (InProgress, Completed)
                | (Draft | Open | InProgress, Cancelled)
        )
    }

    pub fn is_editable(self) -> bool {
        matches!(self, TaskStatus::Draft | TaskStatus::Open)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ExperienceLevel {
    Entry,
    Intermediate,
    Expert,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ProjectType {
    Fixed,
    Hourly,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Proficiency {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub budget: f64,
    pub status: TaskStatus,
    pub client_id: String,
    pub freelancer_id: Option<String>,
    pub category: String,
    pub required_skills: Vec<String>,
    pub experience_level: ExperienceLevel,
    pub project_type: ProjectType,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Skills live in a JSON array column.
impl<'r> FromRow<'r, SqliteRow> for Task {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let Json(required_skills) = row.try_get::<Json<Vec<String>>, _>("required_skills")?;
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            budget: row.try_get("budget")?,
            status: row.try_get("status")?,
            client_id: row.try_get("client_id")?,
            freelancer_id: row.try_get("freelancer_id")?,
            category: row.try_get("category")?,
            required_skills,
            experience_level: row.try_get("experience_level")?,
            project_type: row.try_get("project_type")?,
            deadline: row.try_get("deadline")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub const TASK_COLUMNS: &str = "id, title, description, budget, status, client_id, freelancer_id, \
     category, required_skills, experience_level, project_type, deadline, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Application {
    pub id: String,
    pub task_id: String,
    pub freelancer_id: String,
    pub message: String,
    pub proposed_budget: Option<f64>,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: String,
    pub task_id: String,
    pub client_id: String,
    pub freelancer_id: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.freelancer_id == user_id
    }

    pub fn other_participant(&self, user_id: &str) -> &str {
        if self.client_id == user_id {
            &self.freelancer_id
        } else {
            &self.client_id
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FileAttachment {
    pub id: String,
    pub message_id: String,
    pub file_name: String,
    pub url: String,
    pub size_bytes: i64,
}

/// A message together with its attachments, as returned to clients and
/// pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub attachments: Vec<FileAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub category: String,
}

/// A skill as attached to a freelancer, joined with the skill record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserSkill {
    pub skill_id: String,
    pub name: String,
    pub category: String,
    pub proficiency: Proficiency,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioItem {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub project_url: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Rating {
    pub id: String,
    pub task_id: String,
    pub rater_id: String,
    pub ratee_id: String,
    pub score: i64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub body: String,
    pub task_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Read model shown in the freelancer catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreelancerCard {
    pub id: String,
    pub name: String,
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
    pub skills: Vec<UserSkill>,
    pub rating: Option<f64>,
    pub rating_count: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_lifecycle() {
        use TaskStatus::*;
        assert!(Draft.can_transition_to(Open));
        assert!(Open.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Open.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Cancelled));

        assert!(!Open.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Open));
        assert!(!Draft.can_transition_to(InProgress));
    }

    #[test]
    fn enum_names_round_trip_through_from_str() {
        for status in [
            TaskStatus::Draft,
            TaskStatus::Open,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!(TaskStatus::InProgress.as_ref(), "in_progress");
        assert_eq!(UserRole::Freelancer.to_string(), "freelancer");
        assert!("archived".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn catalog_enums_parse_any_case() {
        assert_eq!("Expert".parse::<ExperienceLevel>().unwrap(), ExperienceLevel::Expert);
        assert_eq!("HOURLY".parse::<ProjectType>().unwrap(), ProjectType::Hourly);
        assert!("Admin".parse::<UserRole>().is_err());
    }

    #[test]
    fn wire_names_match_database_names() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
