//! Training flow: five questions per session, progress stored per user in
//! `TrainingSession` so it survives restarts and is shared by every instance.

use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::functions::{FunctionConfig, FunctionRegistry, FunctionRequest, ParamRule};
use crate::modules::{doc, file_url, read_acl};
use crate::store::{pointer, Query, StoredObject, WriteBatch};

pub const QUESTIONS_PER_SESSION: i64 = 5;
const SAVE_ATTEMPTS: usize = 3;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(
        "getNextTrainingQuestion",
        FunctionConfig::post()
            .require_user()
            .param(ParamRule::string("question_id").required())
            .param(ParamRule::string("selected_option").required()),
        get_next_training_question,
    );
}

/// Options are letters; compare them ignoring case and padding.
pub(crate) fn same_option(expected: Option<&str>, selected: &str) -> bool {
    match expected {
        Some(expected) => expected.trim().eq_ignore_ascii_case(selected.trim()),
        None => false,
    }
}

async fn correct_option(state: &AppState, question_id: &str) -> Result<Option<String>, ApiError> {
    let answer = state
        .data
        .first(
            Query::new("TrainingQuestionCorrectAnswer")
                .equal_to("question", pointer("TrainingQuestion", question_id)),
        )
        .await?;
    Ok(answer.and_then(|a| a.str_field("correct_option").map(str::to_string)))
}

async fn get_next_training_question(state: AppState, req: FunctionRequest) -> Result<Value, ApiError> {
    let caller = req.user()?;
    let question_id = req.str_param("question_id")?;
    let selected = req.str_param("selected_option")?;

    let expected = correct_option(&state, &question_id).await?;
    let is_correct = same_option(expected.as_deref(), &selected);

    // Concurrent answers race on the same session row; the loser re-reads.
    let mut attempt = 1;
    loop {
        match advance_session(&state, &caller.user_id, is_correct).await {
            Err(err) if err.status_code() == 409 && attempt < SAVE_ATTEMPTS => {
                tracing::debug!("Training session of {} changed underneath, retrying", caller.user_id);
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn advance_session(state: &AppState, user_id: &str, is_correct: bool) -> Result<Value, ApiError> {
    let session = state.data.get("TrainingSession", user_id).await?;
    let (mut correct_count, mut current_index) = match &session {
        Some(s) => (
            s.i64_field("correct_count").unwrap_or(0),
            s.i64_field("current_index").unwrap_or(0),
        ),
        None => (0, 0),
    };
    if is_correct {
        correct_count += 1;
    }
    current_index += 1;

    if current_index >= QUESTIONS_PER_SESSION {
        if let Some(session) = &session {
            state.data.destroy(session, Some(user_id)).await?;
        }
        tracing::info!(
            "User {} finished a training session with {}/{}",
            user_id,
            correct_count,
            QUESTIONS_PER_SESSION
        );
        return Ok(json!({
            "message": format!("You answered {} of {} correctly.", correct_count, QUESTIONS_PER_SESSION),
            "correct_count": correct_count,
            "total": QUESTIONS_PER_SESSION,
            "is_previous_correct": is_correct,
            "options": ["Retake intelligence test", "Continue training"],
        }));
    }

    let next = state
        .data
        .first(
            Query::new("TrainingQuestion")
                .ascending("createdAt")
                .skip(current_index as usize),
        )
        .await?;
    let Some(next) = next else {
        if let Some(session) = &session {
            state.data.destroy(session, Some(user_id)).await?;
        }
        return Err(ApiError::not_found("No training question available"));
    };

    save_progress(state, session, user_id, correct_count, current_index).await?;

    Ok(json!({
        "question_id": next.id,
        "question_image_url": file_url(state, &next, "question_image_url"),
        "options": {
            "A": file_url(state, &next, "option_a"),
            "B": file_url(state, &next, "option_b"),
            "C": file_url(state, &next, "option_c"),
        },
        "current_index": current_index,
        "is_previous_correct": is_correct,
    }))
}

/// Sessions are keyed by the user id, so two first answers cannot both
/// create one; the second insert fails as a duplicate.
async fn save_progress(
    state: &AppState,
    session: Option<StoredObject>,
    user_id: &str,
    correct_count: i64,
    current_index: i64,
) -> Result<(), ApiError> {
    let mut batch = WriteBatch::new();
    match session {
        Some(mut session) => {
            session.set("correct_count", correct_count);
            session.set("current_index", current_index);
            batch.update(&session);
        }
        None => {
            batch.insert(
                "TrainingSession",
                user_id,
                doc(json!({
                    "user_id": pointer("_User", user_id),
                    "correct_count": correct_count,
                    "current_index": current_index,
                })),
                Some(read_acl(&[user_id], &[])),
            );
        }
    }
    state.data.commit(batch, Some(user_id)).await?;
    Ok(())
}
