//! Levels, the games inside them and a child's current level.

use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{doc, ADMIN_ROLES};
use crate::store::{pointer, Query, WriteBatch};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "addLevelByAdmin",
        FunctionConfig::post()
            .roles(ADMIN_ROLES)
            .param(ParamRule::string("name").required())
            .param(ParamRule::string("description"))
            .param(ParamRule::string("code"))
            .param(ParamRule::number("order").required()),
        add_level_by_admin,
    );
    registry.register(
        "addLevelGameByAdmin",
        FunctionConfig::post()
            .roles(ADMIN_ROLES)
            .param(ParamRule::string("levelId").required())
            .param(ParamRule::string("name").required())
            .param(ParamRule::number("order").required()),
        add_level_game_by_admin,
    );
    registry.register(
        "getLevelGames",
        FunctionConfig::methods(&[axum::http::Method::GET, axum::http::Method::POST])
            .require_user()
            .param(ParamRule::string("levelId").required()),
        get_level_games,
    );
    registry.register(
        "assignLevelToChild",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("childId").required())
            .param(ParamRule::string("levelId").required()),
        assign_level_to_child,
    );
}

async fn add_level_by_admin(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let order = req.i64_param("order")?;

    let taken = state
        .data
        .count(&Query::new("Level").equal_to("order", order))
        .await?;
    if taken > 0 {
        return Err(ApiError::conflict("Level with this order already exists"));
    }

    let mut data = doc(json!({
        "name": req.str_param("name")?,
        "description": req.opt_str("description").unwrap_or_default(),
        "order": order,
    }));
    if let Some(code) = req.opt_str("code") {
        data.insert("code".to_string(), Value::String(code));
    }
    let level = state.data.create("Level", data, None, Some(&caller.user_id)).await?;
    tracing::info!("Level {} added at order {}", level.id, order);

    Ok(json!({ "message": "Level added successfully", "level": level.to_json() }))
}

async fn add_level_game_by_admin(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let level = state
        .data
        .fetch("Level", &req.str_param("levelId")?, "Level not found")
        .await?;
    let order = req.i64_param("order")?;

    let taken = state
        .data
        .count(
            &Query::new("LevelGame")
                .equal_to("level_id", level.pointer())
                .equal_to("order", order),
        )
        .await?;
    if taken > 0 {
        return Err(ApiError::conflict("LevelGame with this order already exists in this level"));
    }

    let game = state
        .data
        .create(
            "LevelGame",
            doc(json!({
                "level_id": level.pointer(),
                "name": req.str_param("name")?,
                "order": order,
            })),
            None,
            Some(&caller.user_id),
        )
        .await?;
    tracing::info!("Level game {} added to level {}", game.id, level.id);

    Ok(json!({ "message": "LevelGame added successfully", "levelGame": game.to_json() }))
}

async fn get_level_games(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let level_id = req.str_param("levelId")?;
    let games = state
        .data
        .find(
            &Query::new("LevelGame")
                .equal_to("level_id", pointer("Level", &level_id))
                .ascending("order"),
        )
        .await?;

    let level_games: Vec<Value> = games
        .iter()
        .map(|game| {
            json!({
                "objectId": game.id,
                "name": game.str_field("name"),
                "order": game.get("order"),
            })
        })
        .collect();

    Ok(json!({ "message": "Level games fetched successfully", "levelGames": level_games }))
}

async fn assign_level_to_child(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let child = state.data.get("ChildProfile", &req.str_param("childId")?).await?;
    let level = state.data.get("Level", &req.str_param("levelId")?).await?;
    let (Some(child), Some(level)) = (child, level) else {
        return Err(ApiError::not_found("Child or Level not found"));
    };

    let existing = state
        .data
        .first(Query::new("ChildLevel").equal_to("child", child.pointer()))
        .await?;

    let mut batch = WriteBatch::new();
    match existing {
        Some(mut assignment) => {
            assignment.set("level", level.pointer());
            assignment.set("current_game_order", 1);
            batch.update(&assignment);
        }
        None => {
            batch.create(
                "ChildLevel",
                doc(json!({
                    "child": child.pointer(),
                    "level": level.pointer(),
                    "current_game_order": 1,
                })),
            );
        }
    }
    let saved = state.data.commit(batch, Some(&caller.user_id)).await?;
    tracing::info!("Child {} assigned to level {}", child.id, level.id);

    saved
        .first()
        .map(|assignment| assignment.to_json())
        .ok_or_else(|| ApiError::internal_server_error("Assignment was not saved"))
}
