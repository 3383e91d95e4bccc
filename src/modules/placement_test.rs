//! Placement test for children: list questions, fetch one by position,
//! score a full submission.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{file_url, last_answers};
use crate::modules::training::same_option;
use crate::store::{pointer, Query, StoredObject};

pub const PASS_PERCENT: i64 = 70;
const CHILD_ONLY: &str = "User is not a Child";

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "getPlacementTestQuestions",
        FunctionConfig::get().roles(&["Child"]).denial_message(CHILD_ONLY),
        get_placement_test_questions,
    );
    registry.register(
        "getPlacementTestQuestionByIndex",
        FunctionConfig::post()
            .roles(&["Child"])
            .denial_message(CHILD_ONLY)
            .param(ParamRule::number("index").required()),
        get_placement_test_question_by_index,
    );
    registry.register(
        "submitPlacementTestAnswers",
        FunctionConfig::post()
            .roles(&["Child"])
            .denial_message(CHILD_ONLY)
            .param(ParamRule::array("answers").required()),
        submit_placement_test_answers,
    );
}

fn describe(state: &AppState, question: &StoredObject) -> Value {
    json!({
        "id": question.id,
        "question_image_url": file_url(state, question, "question_image"),
        "options": {
            "A": file_url(state, question, "option_a_image"),
            "B": file_url(state, question, "option_b_image"),
            "C": file_url(state, question, "option_c_image"),
            "D": file_url(state, question, "option_d_image"),
        },
    })
}

/// Rounded percentage of correct answers.
pub fn score_percent(correct: usize, answered: usize) -> i64 {
    if answered == 0 {
        return 0;
    }
    ((correct as f64 / answered as f64) * 100.0).round() as i64
}

async fn get_placement_test_questions(state: AppState, _req: FunctionRequest) -> Result<Value, ApiError> {
    let questions = state
        .data
        .find(&Query::new("PlacementTestQuestion").ascending("createdAt"))
        .await?;
    Ok(Value::Array(questions.iter().map(|q| describe(&state, q)).collect()))
}

async fn get_placement_test_question_by_index(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let index = req.i64_param("index")?;
    let index = usize::try_from(index).map_err(|_| ApiError::field_error("index", "index must not be negative"))?;

    let question = state
        .data
        .first(Query::new("PlacementTestQuestion").ascending("createdAt").skip(index))
        .await?
        .ok_or_else(|| ApiError::not_found("No question found at this index"))?;
    Ok(describe(&state, &question))
}

async fn submit_placement_test_answers(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let answers = req.array_param("answers")?;
    if answers.is_empty() {
        return Err(ApiError::field_error("answers", "answers must not be empty"));
    }

    let malformed = || ApiError::field_error("answers", "every answer needs questionId and selectedOption");
    let latest = last_answers(answers, "questionId").ok_or_else(malformed)?;
    let mut submitted = Vec::with_capacity(latest.len());
    for (question, answer) in latest {
        let selected = answer
            .get("selectedOption")
            .and_then(Value::as_str)
            .ok_or_else(malformed)?;
        submitted.push((question, selected));
    }

    let keys = state
        .data
        .find(&Query::new("PlacementTestCorrectAnswer").contained_in(
            "question",
            submitted
                .iter()
                .map(|(question, _)| pointer("PlacementTestQuestion", question))
                .collect(),
        ))
        .await?;
    let key_by_question: HashMap<&str, Option<&str>> = keys
        .iter()
        .filter_map(|k| Some((k.pointer_id("question")?, k.str_field("correct_option"))))
        .collect();

    let correct_count = submitted
        .iter()
        .filter(|(question, selected)| same_option(key_by_question.get(question).copied().flatten(), selected))
        .count();
    let score = score_percent(correct_count, submitted.len());
    let passed = score >= PASS_PERCENT;

    let mut user = state.data.fetch("_User", &caller.user_id, "User not found").await?;
    user.set("placement_test_score", score);
    state.data.save(&user, Some(&caller.user_id)).await?;
    tracing::info!("User {} scored {}% on the placement test", caller.user_id, score);

    Ok(json!({
        "correctCount": correct_count,
        "score": score,
        "passed": passed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_rounded_percent() {
        assert_eq!(score_percent(7, 10), 70);
        assert_eq!(score_percent(2, 3), 67);
        assert_eq!(score_percent(0, 0), 0);
        assert!(score_percent(7, 10) >= PASS_PERCENT);
        assert!(score_percent(6, 10) < PASS_PERCENT);
    }
}
