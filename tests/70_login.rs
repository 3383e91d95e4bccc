mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;

#[tokio::test]
async fn otp_round_trip_signs_up_a_parent() -> Result<()> {
    let app = TestApp::spawn().await?;

    let sent = app.ok("requestOtp", None, json!({ "mobileNumber": "+96551234567" })).await?;
    assert_eq!(sent["message"], "Verification code sent");
    let code = sent["code"].as_str().unwrap_or_default().to_string();
    assert_eq!(code.len(), 6);

    let body = app
        .ok("loginWithMobile", None, json!({ "mobileNumber": "+96551234567", "otp": code }))
        .await?;
    assert!(body["sessionToken"].is_string());
    assert_eq!(body["mobileNumber"], "+96551234567");
    assert_eq!(body["roles"], json!(["Parent"]));
    assert!(body.get("_hashed_password").is_none());
    Ok(())
}

#[tokio::test]
async fn second_login_reuses_the_user() -> Result<()> {
    let app = TestApp::spawn().await?;
    let first = app.login_mobile("+96551111111").await?;
    let second = app.login_mobile("+96551111111").await?;
    assert_eq!(first.user_id, second.user_id);
    assert_ne!(first.token, second.token);
    Ok(())
}

#[tokio::test]
async fn wrong_code_is_rejected() -> Result<()> {
    let app = TestApp::spawn().await?;
    let sent = app.ok("requestOtp", None, json!({ "mobileNumber": "+96552222222" })).await?;
    let issued = sent["code"].as_str().unwrap_or_default();
    let wrong = if issued == "111111" { "222222" } else { "111111" };

    let (status, _) = app
        .call("loginWithMobile", None, json!({ "mobileNumber": "+96552222222", "otp": "12345" }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call("loginWithMobile", None, json!({ "mobileNumber": "+96552222222", "otp": wrong }))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn malformed_mobile_number_is_400() -> Result<()> {
    let app = TestApp::spawn().await?;
    let (status, body) = app.call("requestOtp", None, json!({ "mobileNumber": "call me" })).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Incorrect or missing mobile number.");
    Ok(())
}

#[tokio::test]
async fn password_login_and_logout() -> Result<()> {
    let app = TestApp::spawn().await?;

    let (status, body) = app
        .call("loginUser", None, json!({ "username": "super", "password": "wrong" }))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid username/password.");

    let admin = app.login_super().await?;
    let me = app.ok("getCurrentUser", Some(&admin), json!({})).await?;
    assert!(me["roles"].as_array().map_or(false, |r| r.contains(&json!("SuperAdmin"))));

    app.ok("logout", Some(&admin), json!({})).await?;
    let (status, _) = app.call("getCurrentUser", Some(&admin), json!({})).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn update_user_requires_full_name() -> Result<()> {
    let app = TestApp::spawn().await?;
    let user = app.login_mobile("+96553333333").await?;

    let (status, _) = app.call("updateUser", Some(&user), json!({ "email": "a@b.c" })).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = app
        .ok("updateUser", Some(&user), json!({ "fullName": "Sara", "fatherName": "Ali" }))
        .await?;
    assert_eq!(body["user"]["fullName"], "Sara");
    assert_eq!(body["user"]["fatherName"], "Ali");
    Ok(())
}

#[tokio::test]
async fn add_system_user_is_admin_only() -> Result<()> {
    let app = TestApp::spawn().await?;
    let parent = app.login_mobile("+96554444444").await?;
    let admin = app.login_super().await?;

    let params = json!({ "fullName": "Dr. Noor", "username": "noor", "password": "pw-123456", "role": "Psychologist" });
    let (status, _) = app.call("addSystemUser", Some(&parent), params.clone()).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let body = app.ok("addSystemUser", Some(&admin), params.clone()).await?;
    assert_eq!(body["user"]["role"], "Psychologist");
    assert!(body["user"].get("password").is_none());

    let (status, body) = app.call("addSystemUser", Some(&admin), params).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Username already taken");

    let (status, body) = app
        .call(
            "addSystemUser",
            Some(&admin),
            json!({ "fullName": "X", "username": "x1", "password": "pw", "role": "Wizard" }),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Role Wizard not found");

    let noor = app.login_password("noor", "pw-123456").await?;
    let me = app.ok("getCurrentUser", Some(&noor), json!({})).await?;
    assert_eq!(me["roles"], json!(["Psychologist"]));
    Ok(())
}
