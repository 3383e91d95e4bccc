use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{doc, read_acl, ADMIN_ROLES};
use crate::store::{pointer, Query, StoredObject};

const CHILD_ROLE: &str = "Child";
const PROFILE_FIELDS: &[&str] = &["name", "fatherName", "birthdate", "gender", "medical_info"];

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "getMyChildProfile",
        FunctionConfig::get()
            .roles(&[CHILD_ROLE])
            .denial_message("User is not a Child"),
        get_my_child_profile,
    );
    registry.register(
        "createOrUpdateChildProfile",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("childId").required())
            .param(ParamRule::string("name"))
            .param(ParamRule::string("fatherName"))
            .param(ParamRule::string("birthdate"))
            .param(ParamRule::string("gender"))
            .param(ParamRule::string("medical_info")),
        create_or_update_child_profile,
    );
}

async fn profile_of(state: &AppState, user_id: &str) -> Result<Option<StoredObject>, ApiError> {
    state
        .data
        .first(Query::new("ChildProfile").equal_to("user", pointer("_User", user_id)))
        .await
}

async fn get_my_child_profile(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    if let Some(profile) = profile_of(&state, &caller.user_id).await? {
        return Ok(profile.to_json());
    }

    let profile = state
        .data
        .create(
            "ChildProfile",
            doc(json!({ "user": pointer("_User", &caller.user_id) })),
            Some(read_acl(&[caller.user_id.as_str()], ADMIN_ROLES)),
            Some(&caller.user_id),
        )
        .await?;
    tracing::info!("Created child profile {} for {}", profile.id, caller.user_id);
    Ok(profile.to_json())
}

async fn create_or_update_child_profile(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let child_id = req.str_param("childId")?;
    state.data.fetch("_User", &child_id, "User not found").await?;

    let roles = state.data.user_roles(&child_id).await?;
    if !roles.iter().any(|r| r == CHILD_ROLE) {
        return Err(ApiError::forbidden("User is not a Child"));
    }

    let saved = match profile_of(&state, &child_id).await? {
        Some(mut profile) => {
            for field in PROFILE_FIELDS {
                if let Some(value) = req.opt_str(field) {
                    profile.set(field, value);
                }
            }
            state.data.save(&profile, Some(&caller.user_id)).await?
        }
        None => {
            let mut data = doc(json!({ "user": pointer("_User", &child_id) }));
            for field in PROFILE_FIELDS {
                if let Some(value) = req.opt_str(field) {
                    data.insert(field.to_string(), Value::String(value));
                }
            }
            state
                .data
                .create(
                    "ChildProfile",
                    data,
                    Some(read_acl(&[child_id.as_str(), caller.user_id.as_str()], ADMIN_ROLES)),
                    Some(&caller.user_id),
                )
                .await?
        }
    };
    tracing::debug!("Child profile {} saved by {}", saved.id, caller.user_id);

    Ok(saved.to_json())
}
