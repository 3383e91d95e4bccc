#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use ayn_api::app::{router, AppState};
use ayn_api::config::AppConfig;
use ayn_api::seed::seed_all;

pub const MOUNT: &str = "/api";
pub const SESSION_HEADER: &str = "x-parse-session-token";
pub const MASTER_KEY: &str = "dev-master-key";
pub const BYPASS_OTP: &str = "000000";

/// In-process server over the memory store, seeded, with files in a temp dir.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _files: TempDir,
}

/// A signed-in caller.
pub struct Session {
    pub token: String,
    pub user_id: String,
}

impl TestApp {
    pub async fn spawn() -> Result<Self> {
        let files = tempfile::tempdir().context("failed to create files dir")?;
        let mut config = AppConfig::development();
        config.files.directory = files.path().to_path_buf();

        let state = AppState::in_memory(config).context("invalid schema")?;
        seed_all(&state).await.context("seeding failed")?;

        Ok(Self {
            router: router(state.clone()),
            state,
            _files: files,
        })
    }

    pub async fn send(&self, request: Request<Body>) -> Result<axum::response::Response> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    pub async fn send_json(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = self.send(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).with_context(|| format!("non-JSON body: {:?}", bytes))?
        };
        Ok((status, body))
    }

    /// POST a cloud function with an optional session.
    pub async fn call(&self, name: &str, session: Option<&Session>, params: Value) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("{}/functions/{}", MOUNT, name))
            .header("content-type", "application/json");
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session.token.as_str());
        }
        self.send_json(builder.body(Body::from(params.to_string()))?).await
    }

    /// GET a cloud function, parameters in the query string.
    pub async fn call_get(&self, name: &str, session: Option<&Session>, query: &str) -> Result<(StatusCode, Value)> {
        let uri = if query.is_empty() {
            format!("{}/functions/{}", MOUNT, name)
        } else {
            format!("{}/functions/{}?{}", MOUNT, name, query)
        };
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session.token.as_str());
        }
        self.send_json(builder.body(Body::empty())?).await
    }

    /// Like `call`, but the function must succeed.
    pub async fn ok(&self, name: &str, session: Option<&Session>, params: Value) -> Result<Value> {
        let (status, body) = self.call(name, session, params).await?;
        anyhow::ensure!(status == StatusCode::OK, "{} returned {}: {}", name, status, body);
        Ok(body)
    }

    /// Sign in (or up) with the development bypass code.
    pub async fn login_mobile(&self, mobile: &str) -> Result<Session> {
        let body = self
            .ok("loginWithMobile", None, json!({ "mobileNumber": mobile, "otp": BYPASS_OTP }))
            .await?;
        session_from(&body)
    }

    pub async fn login_password(&self, username: &str, password: &str) -> Result<Session> {
        let body = self
            .ok("loginUser", None, json!({ "username": username, "password": password }))
            .await?;
        session_from(&body)
    }

    pub async fn login_super(&self) -> Result<Session> {
        self.login_password("super", "super").await
    }

    /// Create a user with `role` through the admin function and sign in as them.
    pub async fn user_with_role(&self, admin: &Session, username: &str, role: &str) -> Result<Session> {
        self.ok(
            "addSystemUser",
            Some(admin),
            json!({
                "fullName": format!("{} user", role),
                "username": username,
                "password": "secret-pass",
                "role": role,
            }),
        )
        .await?;
        self.login_password(username, "secret-pass").await
    }

    /// Charge `user`'s wallet through an approved charge request.
    pub async fn fund_wallet(&self, admin: &Session, user: &Session, amount: f64) -> Result<()> {
        self.call_get("getWalletBalance", Some(user), "").await?;
        let request = self.ok("createChargeRequest", Some(user), json!({ "amount": amount })).await?;
        let id = request["charge_request_id"].as_str().context("charge_request_id")?;
        self.ok("approveChargeRequest", Some(admin), json!({ "charge_request_id": id })).await?;
        Ok(())
    }

    pub async fn balance(&self, user: &Session) -> Result<f64> {
        let (status, body) = self.call_get("getWalletBalance", Some(user), "").await?;
        anyhow::ensure!(status == StatusCode::OK, "getWalletBalance returned {}: {}", status, body);
        body["balance"].as_f64().context("balance")
    }
}

fn session_from(body: &Value) -> Result<Session> {
    Ok(Session {
        token: body["sessionToken"].as_str().context("sessionToken")?.to_string(),
        user_id: body["objectId"].as_str().context("objectId")?.to_string(),
    })
}
