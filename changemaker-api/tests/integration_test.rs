/// Integration tests for the Changemaker API
///
/// The first group drives the router without a database: authentication,
/// webhook signatures, health and security headers.
///
/// The `#[ignore]`d group needs PostgreSQL (`DATABASE_URL`) and walks the
/// main flows end to end:
///
/// ```bash
/// cargo test -p changemaker-api --test integration_test -- --ignored --test-threads=1
/// ```

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use changemaker_shared::rewards::webhook::{sign, SIGNATURE_HEADER};
use chrono::{Duration, Utc};
use common::{offline_app, send, session_token, TestContext, WEBHOOK_SECRET};
use serde_json::json;
use tower::Service as _;

async fn post_webhook(app: &axum::Router, body: &str, signature: Option<String>) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhooks/rewardstack")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = app.clone().call(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or_default())
}

#[tokio::test]
async fn test_api_requires_session() {
    let app = offline_app();

    let (status, body) = send(&app, "GET", "/api/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&app, "GET", "/api/workspaces", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_session_is_rejected() {
    let app = offline_app();

    let (status, _) = send(&app, "GET", "/api/me", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let claims = changemaker_shared::auth::session::SupabaseClaims::new(
        uuid::Uuid::new_v4(),
        "ada@example.com",
        "authenticated",
    );
    let forged =
        changemaker_shared::auth::session::create_token(&claims, "some-other-secret-that-is-long-enough")
            .unwrap();
    let (status, _) = send(&app, "GET", "/api/me", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_requires_valid_signature() {
    let app = offline_app();
    let body = r#"{"type":"transaction.shipped","data":{"id":"tx_1"}}"#;

    let (status, _) = post_webhook(&app, body, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post_webhook(&app, body, Some(sign("wrong-secret", body.as_bytes()))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post_webhook(&app, body, Some("zz-not-hex".to_string())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_acknowledges_unhandled_events() {
    let app = offline_app();
    let body = r#"{"type":"participant.updated","data":{"id":"p_1"}}"#;

    let (status, json) = post_webhook(&app, body, Some(sign(WEBHOOK_SECRET, body.as_bytes()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "ignored");
}

#[tokio::test]
async fn test_webhook_rejects_malformed_payload() {
    let app = offline_app();
    let body = "not json";

    let (status, _) = post_webhook(&app, body, Some(sign(WEBHOOK_SECRET, body.as_bytes()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_degraded_without_database() {
    let app = offline_app();

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], "disconnected");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_security_headers_on_every_response() {
    let app = offline_app();

    let request = Request::builder()
        .uri("/api/me")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().call(request).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["cache-control"], "no-store");
    assert!(headers.get("strict-transport-security").is_none());
}

// ---------------------------------------------------------------------------
// Database-backed flows
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn test_workspace_lifecycle() {
    let ctx = TestContext::new().await.unwrap();
    let slug = ctx.create_workspace().await;

    let (status, me) = ctx.send("GET", "/api/me", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["email"], ctx.email.as_str());
    assert_eq!(me["primary_workspace"], slug.as_str());

    let (status, workspace) = ctx.send("GET", &format!("/api/workspaces/{}", slug), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(workspace["role"], "admin");
    assert_eq!(workspace["is_primary"], true);

    // Duplicate slug
    let (status, _) = ctx
        .send("POST", "/api/workspaces", Some(json!({ "slug": slug, "name": "Again" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The only admin cannot step down
    let user_id = me["user"]["id"].as_str().unwrap().to_string();
    let (status, _) = ctx
        .send(
            "PUT",
            &format!("/api/workspaces/{}/members/{}", slug, user_id),
            Some(json!({ "role": "participant" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Outsiders can't see the workspace
    let (_, _, outsider) = session_token();
    let (status, _) = ctx
        .send_as(&outsider, "GET", &format!("/api/workspaces/{}", slug), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn test_invite_challenge_and_review_flow() {
    let ctx = TestContext::new().await.unwrap();
    let slug = ctx.create_workspace().await;
    let base = format!("/api/workspaces/{}", slug);

    // Invite a participant
    let (status, invite) = ctx
        .send("POST", &format!("{}/invites", base), Some(json!({ "max_uses": 5 })))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", invite);
    let code = invite["code"].as_str().unwrap().to_string();

    let (_, _, participant) = session_token();
    let (status, _) = ctx
        .send_as(&participant, "POST", &format!("/api/invites/{}/accept", code), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx
        .send_as(&participant, "POST", &format!("/api/invites/{}/accept", code), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Running, published challenge that needs review
    let now = Utc::now();
    let (status, challenge) = ctx
        .send(
            "POST",
            &format!("{}/challenges", base),
            Some(json!({
                "title": "Plant a tree",
                "status": "published",
                "starts_at": now - Duration::hours(1),
                "ends_at": now + Duration::days(7),
                "points_per_submission": 25,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", challenge);
    let challenge_id = challenge["id"].as_str().unwrap().to_string();
    let challenge_path = format!("{}/challenges/{}", base, challenge_id);

    // Submitting before enrolling is refused
    let (status, _) = ctx
        .send_as(
            &participant,
            "POST",
            &format!("{}/submissions", challenge_path),
            Some(json!({ "content": "Planted an oak" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx
        .send_as(&participant, "POST", &format!("{}/enroll", challenge_path), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = ctx
        .send_as(&participant, "POST", &format!("{}/enroll", challenge_path), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, submission) = ctx
        .send_as(
            &participant,
            "POST",
            &format!("{}/submissions", challenge_path),
            Some(json!({ "content": "Planted an oak" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", submission);
    assert_eq!(submission["status"], "pending");
    let submission_id = submission["id"].as_str().unwrap().to_string();

    // Participants cannot review
    let review_path = format!("{}/submissions/{}/review", base, submission_id);
    let (status, _) = ctx
        .send_as(&participant, "POST", &review_path, Some(json!({ "decision": "approve" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, reviewed) = ctx
        .send("POST", &review_path, Some(json!({ "decision": "approve" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", reviewed);
    assert_eq!(reviewed["status"], "approved");
    assert_eq!(reviewed["points_awarded"], 25);
    // Rewards are off for this workspace
    assert!(reviewed.get("reward").is_none());

    let (status, _) = ctx
        .send("POST", &review_path, Some(json!({ "decision": "reject" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, points) = ctx
        .send_as(&participant, "GET", &format!("{}/points", base), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(points["total_points"], 25);

    // A challenge with submissions can't be deleted
    let (status, _) = ctx.send("DELETE", &challenge_path, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, activity) = ctx.send("GET", &format!("{}/activity?limit=50", base), None).await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = activity["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["event_type"].as_str())
        .collect();
    assert!(kinds.contains(&"submission.reviewed"));
    assert!(kinds.contains(&"member.joined"));
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn test_participants_only_see_published_challenges() {
    let ctx = TestContext::new().await.unwrap();
    let slug = ctx.create_workspace().await;
    let base = format!("/api/workspaces/{}", slug);

    let now = Utc::now();
    let (status, draft) = ctx
        .send(
            "POST",
            &format!("{}/challenges", base),
            Some(json!({
                "title": "Secret plan",
                "starts_at": now,
                "ends_at": now + Duration::days(1),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, invite) = ctx.send("POST", &format!("{}/invites", base), Some(json!({}))).await;
    let (_, _, participant) = session_token();
    ctx.send_as(
        &participant,
        "POST",
        &format!("/api/invites/{}/accept", invite["code"].as_str().unwrap()),
        None,
    )
    .await;

    let (status, list) = ctx
        .send_as(&participant, "GET", &format!("{}/challenges", base), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(list["challenges"].as_array().unwrap().is_empty());

    let (status, _) = ctx
        .send_as(
            &participant,
            "GET",
            &format!("{}/challenges/{}", base, draft["id"].as_str().unwrap()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Schedule rules
    let (status, body) = ctx
        .send(
            "POST",
            &format!("{}/challenges", base),
            Some(json!({
                "title": "Backwards",
                "starts_at": now,
                "ends_at": now - Duration::days(1),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "ends_at");
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn test_email_templates_and_send() {
    let ctx = TestContext::new().await.unwrap();
    let slug = ctx.create_workspace().await;
    let base = format!("/api/workspaces/{}", slug);

    let (status, list) = ctx.send("GET", &format!("{}/email-templates", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["templates"].as_array().unwrap().len(), 5);

    let (status, saved) = ctx
        .send(
            "PUT",
            &format!("{}/email-templates/generic", base),
            Some(json!({ "subject": "{{ subject }}!", "html": "<p>{{ message }}</p>" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", saved);

    let (status, _) = ctx
        .send(
            "PUT",
            &format!("{}/email-templates/newsletter", base),
            Some(json!({ "subject": "x", "html": "y" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, result) = ctx
        .send(
            "POST",
            &format!("{}/emails/send", base),
            Some(json!({ "audience": "workspace", "subject": "Hello", "message": "Welcome" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", result);
    assert_eq!(result["sent"], 1);
    assert_eq!(result["failed"], 0);

    let (status, _) = ctx
        .send(
            "POST",
            &format!("{}/emails/send", base),
            Some(json!({ "audience": "challenge" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = ctx
        .send("DELETE", &format!("{}/email-templates/generic", base), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn test_ai_generation_streams_and_is_rate_limited() {
    let ctx = TestContext::new().await.unwrap();
    let slug = ctx.create_workspace().await;
    let uri = format!("/api/workspaces/{}/emails/ai/generate", slug);

    let generate = || {
        Request::builder()
            .method("POST")
            .uri(&uri)
            .header("authorization", format!("Bearer {}", ctx.token))
            .header("content-type", "application/json")
            .body(Body::from(json!({ "prompt": "Invite everyone to the picnic" }).to_string()))
            .unwrap()
    };

    let response = ctx.app.clone().call(generate()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("event: token"));
    assert!(text.contains("event: done"));

    let response = ctx.app.clone().call(generate()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Test config allows two per window
    let response = ctx.app.clone().call(generate()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    let (status, usage) = ctx
        .send("GET", &format!("/api/workspaces/{}/emails/ai/usage", slug), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usage["enabled"], true);
    assert_eq!(usage["requests"], 2);
    assert_eq!(usage["prompt_tokens"], 200);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn test_manual_grant_rejects_other_workspace_challenge() {
    let ctx = TestContext::new().await.unwrap();
    let home = ctx.create_workspace().await;
    let other = ctx.create_workspace().await;

    let (_, me) = ctx.send("GET", "/api/me", None).await;
    let user_id = me["user"]["id"].as_str().unwrap().to_string();

    let now = Utc::now();
    let challenge = json!({
        "title": "Cycle to work",
        "starts_at": now - Duration::hours(1),
        "ends_at": now + Duration::days(7),
    });
    let (status, foreign) = ctx
        .send("POST", &format!("/api/workspaces/{}/challenges", other), Some(challenge.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", foreign);
    let (status, local) = ctx
        .send("POST", &format!("/api/workspaces/{}/challenges", home), Some(challenge))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", local);

    let grant = |challenge_id: &serde_json::Value| {
        json!({
            "user_id": user_id,
            "reward_type": "points",
            "amount": 10,
            "challenge_id": challenge_id,
        })
    };
    let rewards = format!("/api/workspaces/{}/rewards", home);

    let (status, body) = ctx.send("POST", &rewards, Some(grant(&foreign["id"]))).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);

    let (status, issuance) = ctx.send("POST", &rewards, Some(grant(&local["id"]))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", issuance);
    assert_eq!(issuance["challenge_id"], local["id"]);
}
