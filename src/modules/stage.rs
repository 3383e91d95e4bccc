//! Stage (level game) answers: scoring a submission and reporting the
//! latest result with the next step.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{doc, last_answers, read_acl};
use crate::store::{pointer, Query, StoredObject};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "submitStageAnswers",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("level_game_id").required())
            .param(ParamRule::array("answers").required()),
        submit_stage_answers,
    );
    registry.register(
        "getStageResult",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("level_game_id").required()),
        get_stage_result,
    );
}

/// Whether `answer` is right for a question of `question_type`.
/// `None` for questions that are not scored (view only, unknown type).
pub fn is_correct(question_type: &str, correct: &Value, answer: &Value) -> Option<bool> {
    match question_type {
        "choose" => Some(correct.get("index").map_or(false, |index| index == answer)),
        "match" => {
            let expected = correct.get("pairs").and_then(Value::as_array).cloned().unwrap_or_default();
            let given = answer.as_array().cloned().unwrap_or_default();
            let same = expected.len() == given.len()
                && expected.iter().zip(&given).all(|(e, g)| {
                    e.get("left") == g.get("left") && e.get("right") == g.get("right")
                });
            Some(same)
        }
        "classify" => {
            let groups_match = |group: &str| sorted(correct.get(group)) == sorted(answer.get(group));
            Some(groups_match("boy") && groups_match("girl"))
        }
        _ => None,
    }
}

fn sorted(values: Option<&Value>) -> Vec<String> {
    let mut out: Vec<String> = values
        .and_then(Value::as_array)
        .map(|items| items.iter().map(Value::to_string).collect())
        .unwrap_or_default();
    out.sort();
    out
}

/// Rounded percentage of `score` over `total`.
pub fn percent(score: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    ((score as f64 / total as f64) * 100.0).round() as i64
}

pub fn evaluation(percent: i64) -> &'static str {
    match percent {
        p if p >= 80 => "Excellent",
        p if p >= 50 => "Good",
        _ => "Needs improvement",
    }
}

async fn level_game(state: &AppState, id: &str) -> Result<StoredObject, ApiError> {
    state.data.fetch("LevelGame", id, "LevelGame not found").await
}

async fn submit_stage_answers(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let game = level_game(&state, &req.str_param("level_game_id")?).await?;
    let answers = req.array_param("answers")?;
    if answers.is_empty() {
        return Err(ApiError::field_error("answers", "answers must not be empty"));
    }

    let latest = last_answers(answers, "question_id")
        .ok_or_else(|| ApiError::field_error("answers", "every answer needs a question_id"))?;
    let ids = latest.iter().map(|(id, _)| Value::from(*id)).collect();

    let questions = state
        .data
        .find(&Query::new("StageQuestion").contained_in("objectId", ids))
        .await?;
    let by_id: HashMap<&str, &StoredObject> = questions.iter().map(|q| (q.id.as_str(), q)).collect();

    let mut score = 0;
    for (id, answer) in &latest {
        let Some(question) = by_id.get(id) else {
            continue;
        };
        let (Some(kind), Some(correct)) = (question.str_field("question_type"), question.get("correct_answer")) else {
            continue;
        };
        let given = answer.get("answer").unwrap_or(&Value::Null);
        if is_correct(kind, correct, given) == Some(true) {
            score += 1;
        }
    }
    let total = questions.len();

    state
        .data
        .create(
            "StageResult",
            doc(json!({
                "user_id": pointer("_User", &caller.user_id),
                "level_game_id": game.pointer(),
                "score": score,
                "total_questions": total,
                "answers": latest.iter().map(|(_, answer)| *answer).collect::<Vec<_>>(),
            })),
            Some(read_acl(&[caller.user_id.as_str()], &[])),
            Some(&caller.user_id),
        )
        .await?;
    tracing::info!("User {} scored {}/{} on stage {}", caller.user_id, score, total, game.id);

    Ok(json!({
        "message": "Stage answers submitted successfully",
        "score": score,
        "total": total,
    }))
}

/// The stage after `game` in its level, or failing that the next level.
async fn next_step(state: &AppState, game: &StoredObject) -> Result<Value, ApiError> {
    let order = game.f64_field("order").unwrap_or(0.0);
    let Some(level_id) = game.pointer_id("level_id") else {
        return Ok(Value::Null);
    };

    let next_stage = state
        .data
        .first(
            Query::new("LevelGame")
                .equal_to("level_id", pointer("Level", level_id))
                .greater_than("order", order)
                .ascending("order"),
        )
        .await?;
    if let Some(stage) = next_stage {
        return Ok(json!({
            "type": "stage",
            "level_id": level_id,
            "level_game_id": stage.id,
            "title": stage.str_field("name"),
        }));
    }

    let level = state.data.get("Level", level_id).await?;
    let level_order = level.as_ref().and_then(|l| l.f64_field("order")).unwrap_or(0.0);
    let next_level = state
        .data
        .first(Query::new("Level").greater_than("order", level_order).ascending("order"))
        .await?;

    Ok(match next_level {
        Some(level) => json!({
            "type": "level",
            "level_id": level.id,
            "title": level.str_field("name"),
        }),
        None => Value::Null,
    })
}

async fn get_stage_result(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let game = level_game(&state, &req.str_param("level_game_id")?).await?;

    let result = state
        .data
        .first(
            Query::new("StageResult")
                .equal_to("user_id", pointer("_User", &caller.user_id))
                .equal_to("level_game_id", game.pointer())
                .descending("createdAt"),
        )
        .await?
        .ok_or_else(|| ApiError::not_found("No result found for this stage"))?;

    let score = result.i64_field("score").unwrap_or(0);
    let total = result.i64_field("total_questions").unwrap_or(0);
    let percent = percent(score, total);

    Ok(json!({
        "message": "Stage result fetched successfully",
        "score": score,
        "total": total,
        "percent": percent,
        "evaluation": evaluation(percent),
        "nextStep": next_step(&state, &game).await?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choose_compares_index() {
        let correct = json!({ "index": 2 });
        assert_eq!(is_correct("choose", &correct, &json!(2)), Some(true));
        assert_eq!(is_correct("choose", &correct, &json!(1)), Some(false));
    }

    #[test]
    fn match_requires_same_pairs_in_order() {
        let correct = json!({ "pairs": [{ "left": "a", "right": "1" }, { "left": "b", "right": "2" }] });
        let right = json!([{ "left": "a", "right": "1" }, { "left": "b", "right": "2" }]);
        let swapped = json!([{ "left": "b", "right": "2" }, { "left": "a", "right": "1" }]);
        assert_eq!(is_correct("match", &correct, &right), Some(true));
        assert_eq!(is_correct("match", &correct, &swapped), Some(false));
        assert_eq!(is_correct("match", &correct, &json!([])), Some(false));
    }

    #[test]
    fn classify_ignores_order_within_groups() {
        let correct = json!({ "boy": ["x", "y"], "girl": ["z"] });
        let answer = json!({ "boy": ["y", "x"], "girl": ["z"] });
        let wrong = json!({ "boy": ["x"], "girl": ["y", "z"] });
        assert_eq!(is_correct("classify", &correct, &answer), Some(true));
        assert_eq!(is_correct("classify", &correct, &wrong), Some(false));
    }

    #[test]
    fn view_only_is_not_scored() {
        assert_eq!(is_correct("view_only", &json!({}), &json!(null)), None);
    }

    #[test]
    fn bands_follow_percent() {
        assert_eq!(percent(4, 5), 80);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 0), 0);
        assert_eq!(evaluation(80), "Excellent");
        assert_eq!(evaluation(50), "Good");
        assert_eq!(evaluation(49), "Needs improvement");
    }
}
