/// Per-workspace email template overrides
///
/// A workspace has at most one template per type. When none is stored the
/// built-in default from `email::template::default_template` is used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "email_template_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplateType {
    Invite,
    EnrollmentUpdate,
    SubmissionReviewed,
    Reminder,
    Generic,
}

impl EmailTemplateType {
    pub const ALL: [EmailTemplateType; 5] = [
        EmailTemplateType::Invite,
        EmailTemplateType::EnrollmentUpdate,
        EmailTemplateType::SubmissionReviewed,
        EmailTemplateType::Reminder,
        EmailTemplateType::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailTemplateType::Invite => "invite",
            EmailTemplateType::EnrollmentUpdate => "enrollment_update",
            EmailTemplateType::SubmissionReviewed => "submission_reviewed",
            EmailTemplateType::Reminder => "reminder",
            EmailTemplateType::Generic => "generic",
        }
    }
}

impl std::str::FromStr for EmailTemplateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailTemplateType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown email template type '{}'", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub template_type: EmailTemplateType,
    pub subject: String,
    pub html: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertEmailTemplate {
    pub subject: String,
    pub html: String,
    pub enabled: bool,
}

const TEMPLATE_COLUMNS: &str =
    "id, workspace_id, template_type, subject, html, enabled, created_at, updated_at";

impl EmailTemplate {
    pub async fn find(
        pool: &PgPool,
        workspace_id: Uuid,
        template_type: EmailTemplateType,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM email_templates \
             WHERE workspace_id = $1 AND template_type = $2"
        );

        sqlx::query_as::<_, EmailTemplate>(&query)
            .bind(workspace_id)
            .bind(template_type)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_workspace(
        pool: &PgPool,
        workspace_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM email_templates WHERE workspace_id = $1 \
             ORDER BY template_type"
        );

        sqlx::query_as::<_, EmailTemplate>(&query)
            .bind(workspace_id)
            .fetch_all(pool)
            .await
    }

    /// Creates or replaces the workspace's template of this type
    pub async fn upsert(
        pool: &PgPool,
        workspace_id: Uuid,
        template_type: EmailTemplateType,
        data: UpsertEmailTemplate,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO email_templates (workspace_id, template_type, subject, html, enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workspace_id, template_type) DO UPDATE
            SET subject = EXCLUDED.subject,
                html = EXCLUDED.html,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            RETURNING {TEMPLATE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, EmailTemplate>(&query)
            .bind(workspace_id)
            .bind(template_type)
            .bind(data.subject)
            .bind(data.html)
            .bind(data.enabled)
            .fetch_one(pool)
            .await
    }

    /// Removes the override so the default template applies again
    pub async fn delete(
        pool: &PgPool,
        workspace_id: Uuid,
        template_type: EmailTemplateType,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM email_templates WHERE workspace_id = $1 AND template_type = $2")
                .bind(workspace_id)
                .bind(template_type)
                .execute(pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_type_parsing() {
        for template_type in EmailTemplateType::ALL {
            assert_eq!(template_type.as_str().parse(), Ok(template_type));
        }
        assert!("newsletter".parse::<EmailTemplateType>().is_err());
    }

    #[test]
    fn test_template_type_serializes_snake_case() {
        let json = serde_json::to_string(&EmailTemplateType::SubmissionReviewed).unwrap();
        assert_eq!(json, "\"submission_reviewed\"");
    }
}
