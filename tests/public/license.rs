//! POST /api/license/activate and /api/license/validate

use axum::http::StatusCode;
use serde_json::{Value, json};

#[path = "../common/mod.rs"]
mod common;
use common::*;

fn check_body(check: &LicenseCheck) -> Value {
    serde_json::to_value(check).unwrap()
}

#[tokio::test]
async fn test_health() {
    let env = setup_service();
    let (status, json) = get_json(public_app(env.state()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_activate_then_validate() {
    let env = setup_service();
    let (project, _, key) = setup_license(&env, BUILTIN_V2, 2, Some(future_timestamp(ONE_YEAR)));
    let check = license_check(&project, &key.key, "device-1", TEST_EMAIL);

    let (status, json) =
        post_json(public_app(env.state()), "/api/license/activate", &check_body(&check)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["isValid"], true);
    assert_eq!(json["maxDevices"], 2);
    assert_eq!(json["activatedDevices"], 1);
    assert_eq!(json["features"], json!(["export"]));
    assert!(json["expiryDate"].is_string());

    let (status, json) =
        post_json(public_app(env.state()), "/api/license/validate", &check_body(&check)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["isValid"], true);
    assert_eq!(json["validationCount"], 1);
    assert_eq!(json["message"], "License valid");

    // Transport metadata from the headers lands in the validation log.
    let activation = &env.service.list_activations(&key.key).unwrap()[0];
    let records = queries::list_validation_records(&env.conn(), &activation.id).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].ip_address.as_deref(), Some("203.0.113.9"));
    assert_eq!(records[1].user_agent.as_deref(), Some("licensor-tests/http"));
}

#[tokio::test]
async fn test_error_codes_and_statuses() {
    let env = setup_service();
    let (project, _, key) = setup_license(&env, BUILTIN_V1, 1, None);

    let unknown = license_check(&project, "PFX-NOPE", "device-1", TEST_EMAIL);
    let (status, json) =
        post_json(public_app(env.state()), "/api/license/activate", &check_body(&unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "INVALID_KEY");
    assert_eq!(json["message"], "License key not found");

    let wrong_email = license_check(&project, &key.key, "device-1", "x@example.com");
    let (status, json) =
        post_json(public_app(env.state()), "/api/license/activate", &check_body(&wrong_email)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "DEVICE_MISMATCH");

    let not_activated = license_check(&project, &key.key, "device-1", TEST_EMAIL);
    let (status, json) =
        post_json(public_app(env.state()), "/api/license/validate", &check_body(&not_activated)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "NOT_ACTIVATED");

    post_json(public_app(env.state()), "/api/license/activate", &check_body(&not_activated)).await;
    let second = license_check(&project, &key.key, "device-2", TEST_EMAIL);
    let (status, json) =
        post_json(public_app(env.state()), "/api/license/activate", &check_body(&second)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "MAX_DEVICES_REACHED");

    env.service.revoke_key(&key.key).unwrap();
    let (status, json) =
        post_json(public_app(env.state()), "/api/license/validate", &check_body(&not_activated)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "KEY_INACTIVE");
}

#[tokio::test]
async fn test_expired_status() {
    let env = setup_service();
    let (project, _, key) = setup_license(&env, BUILTIN_V1, 1, Some(past_timestamp(ONE_DAY)));
    let check = license_check(&project, &key.key, "device-1", TEST_EMAIL);

    let (status, json) =
        post_json(public_app(env.state()), "/api/license/activate", &check_body(&check)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "EXPIRED");
}

#[tokio::test]
async fn test_malformed_body() {
    let env = setup_service();
    let (status, json) = post_json(
        public_app(env.state()),
        "/api/license/activate",
        &json!({ "license_key": "PFX-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "BAD_REQUEST");
}
