/// Email template management
///
/// - `GET /api/workspaces/:slug/email-templates` - every type, custom or default
/// - `PUT /api/workspaces/:slug/email-templates/:template_type` - admins; override
/// - `DELETE /api/workspaces/:slug/email-templates/:template_type` - admins; revert

use super::admin_workspace;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use changemaker_shared::{
    auth::middleware::AuthContext,
    email::template::default_template,
    models::email_template::{EmailTemplate, EmailTemplateType, UpsertEmailTemplate},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertTemplateRequest {
    #[validate(length(min = 1, max = 200, message = "Subject must be 1-200 characters"))]
    pub subject: String,

    #[validate(length(min = 1, max = 100000, message = "Body must be 1-100000 characters"))]
    pub html: String,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// One entry per template type
#[derive(Debug, Serialize)]
pub struct TemplateView {
    pub template_type: EmailTemplateType,
    pub subject: String,
    pub html: String,
    pub enabled: bool,

    /// False when the built-in default applies
    pub customized: bool,
}

#[derive(Debug, Serialize)]
pub struct ListTemplatesResponse {
    pub templates: Vec<TemplateView>,
}

fn parse_type(raw: &str) -> ApiResult<EmailTemplateType> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown email template type '{}'", raw)))
}

/// Stored overrides merged over the defaults, in `EmailTemplateType::ALL` order
fn merge_with_defaults(custom: Vec<EmailTemplate>) -> Vec<TemplateView> {
    EmailTemplateType::ALL
        .into_iter()
        .map(|template_type| {
            match custom.iter().find(|t| t.template_type == template_type) {
                Some(t) => TemplateView {
                    template_type,
                    subject: t.subject.clone(),
                    html: t.html.clone(),
                    enabled: t.enabled,
                    customized: true,
                },
                None => {
                    let default = default_template(template_type);
                    TemplateView {
                        template_type,
                        subject: default.subject,
                        html: default.html,
                        enabled: true,
                        customized: false,
                    }
                }
            }
        })
        .collect()
}

pub async fn list_templates(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
) -> ApiResult<Json<ListTemplatesResponse>> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;
    let custom = EmailTemplate::list_by_workspace(&state.db, workspace.id).await?;
    Ok(Json(ListTemplatesResponse {
        templates: merge_with_defaults(custom),
    }))
}

pub async fn upsert_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, template_type)): Path<(String, String)>,
    Json(req): Json<UpsertTemplateRequest>,
) -> ApiResult<Json<EmailTemplate>> {
    let template_type = parse_type(&template_type)?;
    req.validate()?;
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    let template = EmailTemplate::upsert(
        &state.db,
        workspace.id,
        template_type,
        UpsertEmailTemplate {
            subject: req.subject,
            html: req.html,
            enabled: req.enabled,
        },
    )
    .await?;

    tracing::info!(
        workspace_id = %workspace.id,
        template_type = template_type.as_str(),
        enabled = template.enabled,
        "Email template saved"
    );

    Ok(Json(template))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, template_type)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let template_type = parse_type(&template_type)?;
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    if !EmailTemplate::delete(&state.db, workspace.id, template_type).await? {
        return Err(ApiError::NotFound(
            "No custom template of this type".to_string(),
        ));
    }

    tracing::info!(
        workspace_id = %workspace.id,
        template_type = template_type.as_str(),
        "Email template reverted to default"
    );
    Ok(StatusCode::NO_CONTENT)
}
