//! Sign-in, sessions and user administration.

use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::mobile::{generate_otp, is_valid_mobile, PROVIDER as MOBILE_PROVIDER};
use crate::auth::password::{hash_password, verify_password};
use crate::config::Environment;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{doc, ADMIN_ROLES};
use crate::store::{Document, Query, StoredObject, WriteBatch};

/// Role given to users who sign up with their mobile number.
pub const DEFAULT_SIGNUP_ROLE: &str = "Parent";
const ACTIVE_ACCOUNT_STATUS: &str = "1";
const PASSWORD_FIELD: &str = "_hashed_password";

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "requestOtp",
        FunctionConfig::post().param(ParamRule::string("mobileNumber").required()),
        request_otp,
    );
    registry.register(
        "loginWithMobile",
        FunctionConfig::post()
            .param(ParamRule::string("mobileNumber").required())
            .param(ParamRule::string("otp").required()),
        login_with_mobile,
    );
    registry.register(
        "loginUser",
        FunctionConfig::post()
            .param(ParamRule::string("username").required())
            .param(ParamRule::string("password").required()),
        login_user,
    );
    registry.register("logout", FunctionConfig::post().require_user(), logout);
    registry.register(
        "getCurrentUser",
        FunctionConfig::methods(&[axum::http::Method::GET, axum::http::Method::POST]).require_user(),
        get_current_user,
    );
    registry.register(
        "updateUser",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("fullName").required())
            .param(ParamRule::string("email"))
            .param(ParamRule::string("fatherName"))
            .param(ParamRule::string("birthDate"))
            .param(ParamRule::string("fcm_token")),
        update_user,
    );
    registry.register(
        "addSystemUser",
        FunctionConfig::post()
            .roles(ADMIN_ROLES)
            .param(ParamRule::string("fullName").required())
            .param(ParamRule::string("username").required())
            .param(ParamRule::string("password").required())
            .param(ParamRule::string("role").required())
            .param(ParamRule::string("mobile"))
            .param(ParamRule::string("email")),
        add_system_user,
    );
}

/// Queue a user with its block/deleted status objects and role membership.
/// Returns the new user's id.
pub(crate) fn queue_new_user(
    batch: &mut WriteBatch,
    mut fields: Document,
    role: Option<&StoredObject>,
    account_status: Option<&StoredObject>,
) -> String {
    let block_id = batch.create("UserBlock", doc(json!({ "isBlocked": false })));
    let deleted_id = batch.create("UserDeleted", doc(json!({ "isDeleted": false })));

    fields.insert("userBlock".to_string(), crate::store::pointer("UserBlock", &block_id));
    fields.insert("deleted".to_string(), crate::store::pointer("UserDeleted", &deleted_id));
    fields.insert("status".to_string(), Value::Bool(true));
    if let Some(status) = account_status {
        fields.insert("accountStatus".to_string(), status.pointer());
    }
    if let Some(role) = role {
        fields.insert("role".to_string(), role.pointer());
    }

    let user_id = batch.create("_User", fields);
    if let Some(role) = role {
        batch.add_role_member(&role.id, &user_id);
    }
    user_id
}

async fn active_account_status(state: &AppState) -> Result<Option<StoredObject>, ApiError> {
    state
        .data
        .first(Query::new("AccountStatus").equal_to("code", ACTIVE_ACCOUNT_STATUS))
        .await
}

/// Refuse sign-in for blocked or deleted accounts.
async fn ensure_can_sign_in(state: &AppState, user: &StoredObject) -> Result<(), ApiError> {
    if let Some(id) = user.pointer_id("userBlock") {
        let blocked = state.data.get("UserBlock", id).await?;
        if blocked.and_then(|b| b.bool_field("isBlocked")) == Some(true) {
            return Err(ApiError::forbidden("This account has been blocked"));
        }
    }
    if let Some(id) = user.pointer_id("deleted") {
        let deleted = state.data.get("UserDeleted", id).await?;
        if deleted.and_then(|d| d.bool_field("isDeleted")) == Some(true) {
            return Err(ApiError::forbidden("This account has been deleted"));
        }
    }
    Ok(())
}

async fn session_response(state: &AppState, user: &StoredObject, provider: &str) -> Result<Value, ApiError> {
    ensure_can_sign_in(state, user).await?;
    let token = state.sessions.issue(&state.data, user, provider).await?;
    let roles = state.data.user_roles(&user.id).await?;

    let mut body = user.to_json();
    body["sessionToken"] = Value::String(token);
    body["roles"] = json!(roles);
    Ok(body)
}

async fn request_otp(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let mobile = req.str_param("mobileNumber")?;
    if !is_valid_mobile(&mobile) {
        return Err(ApiError::bad_request("Incorrect or missing mobile number."));
    }

    let previous = state
        .data
        .find(&Query::new("OTPcode").equal_to("mobileNumber", mobile.as_str()))
        .await?;
    let code = generate_otp();

    let mut batch = WriteBatch::new();
    for old in &previous {
        batch.delete(old);
    }
    batch.create("OTPcode", doc(json!({ "mobileNumber": mobile, "code": code })));
    state.data.commit(batch, None).await?;
    tracing::info!("Issued verification code for {}", mobile);

    let mut body = json!({
        "message": "Verification code sent",
        "expires_in_minutes": state.config.security.otp_expiry_minutes,
    });
    // No SMS gateway in development; hand the code back instead.
    if state.config.environment == Environment::Development {
        body["code"] = Value::String(code);
    }
    Ok(body)
}

async fn login_with_mobile(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let mobile = req.str_param("mobileNumber")?;
    let otp = req.str_param("otp")?;

    let auth_data = json!({ "id": mobile, "otp": otp });
    let app_ids = [state.config.app.app_id.clone()];
    state
        .auth_adapters
        .validate(MOBILE_PROVIDER, &auth_data, &app_ids, &state.data)
        .await?;

    let existing = state
        .data
        .first(Query::new("_User").equal_to("mobileNumber", mobile.as_str()))
        .await?;

    let user = match existing {
        Some(user) => user,
        None => {
            let role = state.data.role_by_name(DEFAULT_SIGNUP_ROLE).await?;
            let status = active_account_status(&state).await?;
            let fields = doc(json!({
                "username": mobile,
                "mobileNumber": mobile,
                "mobile": mobile,
                "authData": { MOBILE_PROVIDER: { "id": mobile } },
            }));
            let mut batch = WriteBatch::new();
            let user_id = queue_new_user(&mut batch, fields, role.as_ref(), status.as_ref());
            state.data.commit(batch, None).await?;
            tracing::info!("Signed up user {} by mobile", user_id);
            state.data.fetch("_User", &user_id, "User not found").await?
        }
    };

    session_response(&state, &user, MOBILE_PROVIDER).await
}

async fn login_user(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let username = req.str_param("username")?;
    let password = req.str_param("password")?;
    let invalid = || ApiError::unauthorized("Invalid username/password.");

    let user = state
        .data
        .first(Query::new("_User").equal_to("username", username.as_str()))
        .await?
        .ok_or_else(invalid)?;
    let stored = user.str_field(PASSWORD_FIELD).ok_or_else(invalid)?;
    if !verify_password(&password, stored) {
        tracing::warn!("Failed password login for {}", username);
        return Err(invalid());
    }

    session_response(&state, &user, "password").await
}

async fn logout(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    state.sessions.revoke(&state.data, caller).await?;
    Ok(json!({ "message": "Logged out successfully" }))
}

async fn get_current_user(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let user = state.data.fetch("_User", &caller.user_id, "User not found").await?;
    let roles = state.data.user_roles(&user.id).await?;
    let mut body = user.to_json();
    body["roles"] = json!(roles);
    Ok(body)
}

async fn update_user(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let mut user = state.data.fetch("_User", &caller.user_id, "User not found").await?;

    user.set("fullName", req.str_param("fullName")?);
    for field in ["email", "fatherName", "birthDate", "fcm_token"] {
        if let Some(value) = req.opt_str(field) {
            user.set(field, value);
        }
    }
    let user = state.data.save(&user, Some(&caller.user_id)).await?;

    Ok(json!({ "message": "User updated successfully", "user": user.to_json() }))
}

async fn add_system_user(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let full_name = req.str_param("fullName")?;
    let username = req.str_param("username")?;
    let password = req.str_param("password")?;
    let role_name = req.str_param("role")?;

    let role = state
        .data
        .role_by_name(&role_name)
        .await?
        .ok_or_else(|| ApiError::bad_request(format!("Role {} not found", role_name)))?;
    let taken = state
        .data
        .count(&Query::new("_User").equal_to("username", username.as_str()))
        .await?;
    if taken > 0 {
        return Err(ApiError::conflict("Username already taken"));
    }

    let mut fields = doc(json!({
        "username": username,
        "fullName": full_name,
        PASSWORD_FIELD: hash_password(&password),
    }));
    if let Some(mobile) = req.opt_str("mobile") {
        fields.insert("mobile".to_string(), Value::String(mobile.clone()));
        fields.insert("mobileNumber".to_string(), Value::String(mobile));
    }
    if let Some(email) = req.opt_str("email") {
        fields.insert("email".to_string(), Value::String(email));
    }

    let status = active_account_status(&state).await?;
    let mut batch = WriteBatch::new();
    let user_id = queue_new_user(&mut batch, fields, Some(&role), status.as_ref());
    state.data.commit(batch, Some(&caller.user_id)).await?;
    tracing::info!("User {} created system user {} with role {}", caller.user_id, user_id, role_name);

    Ok(json!({
        "message": "User created successfully",
        "user": {
            "id": user_id,
            "username": username,
            "fullName": full_name,
            "role": role_name,
        }
    }))
}
