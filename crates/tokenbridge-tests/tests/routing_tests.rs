//! Route layouts, stage prefix and the stage throttle over HTTP.

use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::Value;
use tokenbridge_api::{ApiSettings, RouteLayout, ThrottleConfig};
use tokenbridge_auth::TokenResponse;
use tokenbridge_tests::{TestContext, context::default_settings};

const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ID_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";

fn unified() -> ApiSettings {
    ApiSettings {
        layout: RouteLayout::Unified,
        ..default_settings()
    }
}

#[tokio::test]
async fn test_unified_route_selects_provider_by_issuer() {
    let ctx = TestContext::with_settings(unified())
        .await
        .expect("Failed to create test context");

    let workflow = ctx.github.workflow_token("acme").await;
    let service_account = ctx.kubernetes.service_account_token("ci", "builder").await;

    for (subject_token, subject) in [
        (workflow, "repo:acme/app:ref:refs/heads/main"),
        (service_account, "system:serviceaccount:ci:builder"),
    ] {
        let resp = ctx
            .client
            .post_form(
                "/exchange",
                &[
                    ("grant_type", TOKEN_EXCHANGE_GRANT),
                    ("subject_token", subject_token.as_str()),
                    ("subject_token_type", ID_TOKEN_TYPE),
                ],
            )
            .await
            .expect("Request failed");

        assert_eq!(resp.status(), StatusCode::OK);
        let body: TokenResponse = resp.json().await.unwrap();
        let claims = ctx
            .verify_issued(&body.access_token, "/.well-known/jwks.json")
            .await
            .unwrap();
        assert_eq!(claims.sub, subject);
    }

    // Per-provider routes are not mounted.
    let resp = ctx.client.get("/github/exchange").await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unified_route_rejects_unknown_grant() {
    let ctx = TestContext::with_settings(unified())
        .await
        .expect("Failed to create test context");
    let workflow = ctx.github.workflow_token("acme").await;

    let resp = ctx
        .client
        .post_form(
            "/exchange",
            &[("grant_type", "client_credentials"), ("subject_token", workflow.as_str())],
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stage_prefix() {
    let ctx = TestContext::with_settings(ApiSettings {
        stage: Some("default".to_string()),
        ..default_settings()
    })
    .await
    .expect("Failed to create test context");

    let resp = ctx.client.get("/default/.well-known/jwks.json").await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = ctx.client.get("/.well-known/jwks.json").await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let doc: Value = ctx
        .client
        .get("/default/.well-known/openid-configuration")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["jwks_uri"]
        .as_str()
        .unwrap()
        .ends_with("/default/.well-known/jwks.json"));

    let workflow = ctx.github.workflow_token("acme").await;
    let resp = ctx
        .client
        .exchange("/default/github/exchange", &workflow)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: TokenResponse = resp.json().await.unwrap();
    ctx.verify_issued(&body.access_token, "/default/.well-known/jwks.json")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_throttle_rejects_burst_overflow() {
    let ctx = TestContext::with_settings(ApiSettings {
        throttle: ThrottleConfig {
            rate_limit: 1,
            burst_limit: 3,
        },
        ..default_settings()
    })
    .await
    .expect("Failed to create test context");

    let responses = join_all((0..6).map(|_| ctx.client.get("/.well-known/jwks.json"))).await;

    let statuses: Vec<StatusCode> = responses
        .iter()
        .map(|r| r.as_ref().expect("Request failed").status())
        .collect();
    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let throttled: Vec<_> = responses
        .into_iter()
        .filter_map(Result::ok)
        .filter(|r| r.status() == StatusCode::TOO_MANY_REQUESTS)
        .collect();

    assert_eq!(ok, 3);
    assert_eq!(throttled.len(), 3);
    for resp in &throttled {
        assert_eq!(resp.headers()["retry-after"], "1");
    }
}
