mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;

async fn wallet_id(app: &TestApp, user: &common::Session) -> Result<String> {
    let (_, body) = app.call_get("getWalletBalance", Some(user), "").await?;
    Ok(body["wallet_id"].as_str().context("wallet_id")?.to_string())
}

#[tokio::test]
async fn first_balance_call_creates_the_wallet() -> Result<()> {
    let app = TestApp::spawn().await?;
    let user = app.login_mobile("+96560000001").await?;

    let (status, body) = app.call_get("getWalletBalance", Some(&user), "").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Wallet created successfully");
    assert_eq!(body["balance"].as_f64(), Some(0.0));

    let (_, again) = app.call_get("getWalletBalance", Some(&user), "").await?;
    assert_eq!(again["message"], "Wallet balance retrieved successfully");
    assert_eq!(again["wallet_id"], body["wallet_id"]);
    Ok(())
}

#[tokio::test]
async fn charge_request_needs_a_wallet() -> Result<()> {
    let app = TestApp::spawn().await?;
    let user = app.login_mobile("+96560000002").await?;

    let (status, body) = app.call("createChargeRequest", Some(&user), json!({ "amount": 20 })).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Wallet not found for this user");

    wallet_id(&app, &user).await?;
    let (status, _) = app.call("createChargeRequest", Some(&user), json!({ "amount": 0 })).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn approved_charge_credits_once() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let user = app.login_mobile("+96560000003").await?;
    wallet_id(&app, &user).await?;

    let request = app
        .ok("createChargeRequest", Some(&user), json!({ "amount": 12.3, "note": "bank transfer" }))
        .await?;
    let id = request["charge_request_id"].as_str().context("id")?;

    let (status, _) = app
        .call("approveChargeRequest", Some(&user), json!({ "charge_request_id": id }))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let approved = app.ok("approveChargeRequest", Some(&admin), json!({ "charge_request_id": id })).await?;
    assert_eq!(approved["new_balance"].as_f64(), Some(12.3));

    let (status, body) = app
        .call("approveChargeRequest", Some(&admin), json!({ "charge_request_id": id }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Charge request is already processed");

    app.fund_wallet(&admin, &user, 0.1).await?;
    assert_eq!(app.balance(&user).await?, 12.4);
    Ok(())
}

#[tokio::test]
async fn rejection_needs_a_note_and_is_listed() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let user = app.login_mobile("+96560000004").await?;
    wallet_id(&app, &user).await?;

    let request = app.ok("createChargeRequest", Some(&user), json!({ "amount": 5 })).await?;
    let id = request["charge_request_id"].as_str().context("id")?;

    let (status, _) = app
        .call("rejectChargeRequest", Some(&admin), json!({ "charge_request_id": id }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.ok(
        "rejectChargeRequest",
        Some(&admin),
        json!({ "charge_request_id": id, "rejection_note": "receipt unreadable" }),
    )
    .await?;

    let (status, listed) = app.call_get("getChargeRequests", Some(&admin), "status=rejected").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 1);
    let (_, pending) = app.call_get("getChargeRequests", Some(&admin), "status=pending").await?;
    assert_eq!(pending["count"], 0);
    assert_eq!(app.balance(&user).await?, 0.0);
    Ok(())
}

#[tokio::test]
async fn transfers_check_owner_and_balance() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let alice = app.login_mobile("+96560000005").await?;
    let bob = app.login_mobile("+96560000006").await?;
    let alice_wallet = wallet_id(&app, &alice).await?;
    let bob_wallet = wallet_id(&app, &bob).await?;
    app.fund_wallet(&admin, &alice, 30.0).await?;

    let transfer = |amount: f64| {
        json!({
            "from_wallet_id": alice_wallet,
            "to_wallet_id": bob_wallet,
            "amount": amount,
            "type": "gift",
        })
    };

    // Bob cannot spend from Alice's wallet.
    let (status, body) = app.call("createWalletTransaction", Some(&bob), transfer(5.0)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You can only transfer from your own wallet");

    let (status, body) = app.call("createWalletTransaction", Some(&alice), transfer(50.0)).await?;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["message"], "Insufficient balance in source wallet");

    let (status, _) = app.call("createWalletTransaction", Some(&alice), transfer(-1.0)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            "createWalletTransaction",
            Some(&alice),
            json!({ "from_wallet_id": alice_wallet, "to_wallet_id": "missing123", "amount": 1, "type": "gift" }),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let done = app.ok("createWalletTransaction", Some(&alice), transfer(10.5)).await?;
    assert!(done["transaction_id"].is_string());
    assert_eq!(app.balance(&alice).await?, 19.5);
    assert_eq!(app.balance(&bob).await?, 10.5);
    Ok(())
}
