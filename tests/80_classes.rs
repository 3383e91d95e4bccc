mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};

use common::{Session, TestApp, MASTER_KEY, MOUNT, SESSION_HEADER};

fn find_uri(class_name: &str, where_clause: Value, extra: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(where_clause.to_string().as_bytes()).collect();
    format!("{}/classes/{}?where={}&count=1{}", MOUNT, class_name, encoded, extra)
}

async fn find(app: &TestApp, uri: &str, session: Option<&Session>, master: bool) -> Result<(StatusCode, Value)> {
    let mut builder = Request::get(uri);
    if let Some(session) = session {
        builder = builder.header(SESSION_HEADER, session.token.as_str());
    }
    if master {
        builder = builder.header("x-parse-master-key", MASTER_KEY);
    }
    app.send_json(builder.body(Body::empty())?).await
}

#[tokio::test]
async fn count_only_includes_readable_objects() -> Result<()> {
    let app = TestApp::spawn().await?;
    let user = app.login_mobile("+96580000001").await?;

    let uri = find_uri("_User", json!({ "mobileNumber": "+96580000001" }), "");
    let (status, body) = find(&app, &uri, None, false).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["count"], 0);
    assert_eq!(body["results"], json!([]));

    let (_, body) = find(&app, &uri, Some(&user), false).await?;
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["objectId"], user.user_id.as_str());

    let (_, body) = find(&app, &uri, None, true).await?;
    assert_eq!(body["count"], 1);
    Ok(())
}

#[tokio::test]
async fn underscore_fields_cannot_be_queried() -> Result<()> {
    let app = TestApp::spawn().await?;
    app.login_mobile("+96580000002").await?;

    let uri = find_uri("_User", json!({ "_hashed_password": { "$gt": "0" } }), "");
    let (status, _) = find(&app, &uri, None, false).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = find_uri("_User", json!({ "$or": [{ "_session_token": "x" }] }), "");
    let (status, _) = find(&app, &uri, None, false).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = find_uri("_User", json!({}), "&order=-_hashed_password");
    let (status, _) = find(&app, &uri, None, false).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn paging_applies_after_the_acl_filter() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let mut users = Vec::new();
    for i in 0..3 {
        users.push(app.login_mobile(&format!("+9658000001{}", i)).await?);
    }
    for user in &users {
        app.call_get("getWalletBalance", Some(user), "").await?;
    }

    // Each user sees their own wallet even though it is not first in storage.
    let uri = find_uri("Wallet", json!({}), "&limit=1");
    let (_, body) = find(&app, &uri, Some(&users[2]), false).await?;
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"].as_array().map(Vec::len), Some(1));

    let uri = find_uri("Wallet", json!({}), "&limit=1&skip=1");
    let (_, body) = find(&app, &uri, Some(&admin), false).await?;
    assert_eq!(body["count"], 3);
    assert_eq!(body["results"].as_array().map(Vec::len), Some(1));
    Ok(())
}
