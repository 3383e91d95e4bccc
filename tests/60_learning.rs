mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde_json::{json, Value};

use ayn_api::store::{file_value, pointer, Document, Query};
use common::{Session, TestApp};

fn fields(value: Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

async fn add_level(app: &TestApp, admin: &Session, name: &str, order: i64) -> Result<String> {
    let body = app
        .ok("addLevelByAdmin", Some(admin), json!({ "name": name, "order": order }))
        .await?;
    Ok(body["level"]["objectId"].as_str().context("level id")?.to_string())
}

async fn add_game(app: &TestApp, admin: &Session, level: &str, name: &str, order: i64) -> Result<String> {
    let body = app
        .ok(
            "addLevelGameByAdmin",
            Some(admin),
            json!({ "levelId": level, "name": name, "order": order }),
        )
        .await?;
    Ok(body["levelGame"]["objectId"].as_str().context("game id")?.to_string())
}

async fn stage_question(app: &TestApp, game: &str, kind: &str, correct: Value) -> Result<String> {
    let question = app
        .state
        .data
        .create(
            "StageQuestion",
            fields(json!({
                "level_game_id": pointer("LevelGame", game),
                "question_type": kind,
                "correct_answer": correct,
            })),
            None,
            None,
        )
        .await?;
    Ok(question.id)
}

/// A question with its answer key, options lettered from A.
async fn keyed_question(
    app: &TestApp,
    class_name: &str,
    image_field: &str,
    answer_class: &str,
    image: &str,
    correct: &str,
) -> Result<String> {
    let question = app
        .state
        .data
        .create(class_name, fields(json!({ image_field: file_value(image) })), None, None)
        .await?;
    app.state
        .data
        .create(
            answer_class,
            fields(json!({
                "question": pointer(class_name, &question.id),
                "correct_option": correct,
            })),
            None,
            None,
        )
        .await?;
    Ok(question.id)
}

#[tokio::test]
async fn levels_and_games_keep_their_order() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let parent = app.login_mobile("+96581000001").await?;

    let (status, _) = app
        .call("addLevelByAdmin", Some(&parent), json!({ "name": "Nope", "order": 1 }))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let level = add_level(&app, &admin, "Level 1", 1).await?;
    let (status, body) = app
        .call("addLevelByAdmin", Some(&admin), json!({ "name": "Again", "order": 1 }))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Level with this order already exists");

    add_game(&app, &admin, &level, "Shapes", 2).await?;
    add_game(&app, &admin, &level, "Colors", 1).await?;
    let (status, _) = app
        .call(
            "addLevelGameByAdmin",
            Some(&admin),
            json!({ "levelId": level, "name": "Twice", "order": 2 }),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .call_get("getLevelGames", Some(&parent), &format!("levelId={}", level))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["levelGames"]
        .as_array()
        .context("levelGames")?
        .iter()
        .filter_map(|g| g["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Colors", "Shapes"]);
    Ok(())
}

#[tokio::test]
async fn assigning_a_level_resets_progress() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let child = app.user_with_role(&admin, "kid", "Child").await?;
    let profile = app
        .ok("createOrUpdateChildProfile", Some(&admin), json!({ "childId": child.user_id, "name": "Sara" }))
        .await?;
    let profile_id = profile["objectId"].as_str().context("profile id")?;

    let first = add_level(&app, &admin, "Level 1", 1).await?;
    let second = add_level(&app, &admin, "Level 2", 2).await?;

    let assigned = app
        .ok("assignLevelToChild", Some(&admin), json!({ "childId": profile_id, "levelId": first }))
        .await?;
    assert_eq!(assigned["current_game_order"], 1);
    let moved = app
        .ok("assignLevelToChild", Some(&admin), json!({ "childId": profile_id, "levelId": second }))
        .await?;
    assert_eq!(moved["objectId"], assigned["objectId"]);
    assert_eq!(moved["level"]["objectId"], second.as_str());

    let (status, body) = app
        .call("assignLevelToChild", Some(&admin), json!({ "childId": "missing", "levelId": first }))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Child or Level not found");
    Ok(())
}

#[tokio::test]
async fn stage_answers_are_scored_and_point_to_the_next_stage() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let player = app.login_mobile("+96581000002").await?;

    let level = add_level(&app, &admin, "Level 1", 1).await?;
    let game = add_game(&app, &admin, &level, "Colors", 1).await?;
    let next = add_game(&app, &admin, &level, "Shapes", 2).await?;

    let choose = stage_question(&app, &game, "choose", json!({ "index": 1 })).await?;
    let classify = stage_question(
        &app,
        &game,
        "classify",
        json!({ "boy": ["car", "ball"], "girl": ["doll"] }),
    )
    .await?;
    let viewed = stage_question(&app, &game, "view_only", json!({})).await?;

    let (status, _) = app
        .call("getStageResult", Some(&player), json!({ "level_game_id": game }))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call("submitStageAnswers", Some(&player), json!({ "level_game_id": game, "answers": [] }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let submitted = app
        .ok(
            "submitStageAnswers",
            Some(&player),
            json!({
                "level_game_id": game,
                "answers": [
                    { "question_id": choose, "answer": 1 },
                    { "question_id": classify, "answer": { "boy": ["ball", "car"], "girl": ["doll"] } },
                    { "question_id": viewed, "answer": null },
                    { "question_id": "unknown", "answer": 3 },
                ],
            }),
        )
        .await?;
    assert_eq!(submitted["score"], 2);
    assert_eq!(submitted["total"], 3);

    let result = app
        .ok("getStageResult", Some(&player), json!({ "level_game_id": game }))
        .await?;
    assert_eq!(result["percent"], 67);
    assert_eq!(result["evaluation"], "Good");
    assert_eq!(result["nextStep"]["type"], "stage");
    assert_eq!(result["nextStep"]["level_game_id"], next.as_str());
    Ok(())
}

#[tokio::test]
async fn last_stage_points_to_the_next_level() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let player = app.login_mobile("+96581000003").await?;

    let level = add_level(&app, &admin, "Level 1", 1).await?;
    let following = add_level(&app, &admin, "Level 2", 2).await?;
    let game = add_game(&app, &admin, &level, "Only", 1).await?;
    let question = stage_question(&app, &game, "choose", json!({ "index": 0 })).await?;

    app.ok(
        "submitStageAnswers",
        Some(&player),
        json!({ "level_game_id": game, "answers": [{ "question_id": question, "answer": 0 }] }),
    )
    .await?;
    let result = app
        .ok("getStageResult", Some(&player), json!({ "level_game_id": game }))
        .await?;
    assert_eq!(result["evaluation"], "Excellent");
    assert_eq!(result["nextStep"]["type"], "level");
    assert_eq!(result["nextStep"]["level_id"], following.as_str());
    Ok(())
}

#[tokio::test]
async fn repeated_stage_answers_count_once() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let player = app.login_mobile("+96581000008").await?;

    let level = add_level(&app, &admin, "Level 1", 1).await?;
    let game = add_game(&app, &admin, &level, "Only", 1).await?;
    let question = stage_question(&app, &game, "choose", json!({ "index": 2 })).await?;

    let submitted = app
        .ok(
            "submitStageAnswers",
            Some(&player),
            json!({
                "level_game_id": game,
                "answers": [
                    { "question_id": question, "answer": 2 },
                    { "question_id": question, "answer": 2 },
                    { "question_id": question, "answer": 2 },
                ],
            }),
        )
        .await?;
    assert_eq!(submitted["score"], 1);
    assert_eq!(submitted["total"], 1);

    let result = app
        .ok("getStageResult", Some(&player), json!({ "level_game_id": game }))
        .await?;
    assert_eq!(result["percent"], 100);

    // The last answer to a question is the one scored.
    let submitted = app
        .ok(
            "submitStageAnswers",
            Some(&player),
            json!({
                "level_game_id": game,
                "answers": [
                    { "question_id": question, "answer": 2 },
                    { "question_id": question, "answer": 0 },
                ],
            }),
        )
        .await?;
    assert_eq!(submitted["score"], 0);
    Ok(())
}

#[tokio::test]
async fn training_runs_five_questions_then_resets() -> Result<()> {
    let app = TestApp::spawn().await?;
    let player = app.login_mobile("+96581000004").await?;

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(
            keyed_question(
                &app,
                "TrainingQuestion",
                "question_image_url",
                "TrainingQuestionCorrectAnswer",
                &format!("t{}.png", i),
                "A",
            )
            .await?,
        );
    }

    let mut last = Value::Null;
    for (i, id) in ids.iter().take(5).enumerate() {
        let selected = if i % 2 == 0 { "a" } else { "C" };
        last = app
            .ok(
                "getNextTrainingQuestion",
                Some(&player),
                json!({ "question_id": id, "selected_option": selected }),
            )
            .await?;
        if i < 4 {
            assert_eq!(last["current_index"], (i + 1) as i64);
            assert_eq!(last["question_id"], ids[i + 1].as_str());
            assert_eq!(last["is_previous_correct"], i % 2 == 0);
        }
    }
    assert_eq!(last["correct_count"], 3);
    assert_eq!(last["total"], 5);
    assert_eq!(last["message"], "You answered 3 of 5 correctly.");

    // Progress is gone, so the next answer starts a fresh session.
    let restarted = app
        .ok(
            "getNextTrainingQuestion",
            Some(&player),
            json!({ "question_id": ids[0], "selected_option": "A" }),
        )
        .await?;
    assert_eq!(restarted["current_index"], 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_training_answers_share_one_session() -> Result<()> {
    let app = TestApp::spawn().await?;
    let player = app.login_mobile("+96581000007").await?;

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(
            keyed_question(
                &app,
                "TrainingQuestion",
                "question_image_url",
                "TrainingQuestionCorrectAnswer",
                &format!("c{}.png", i),
                "B",
            )
            .await?,
        );
    }

    let answers = ids.iter().take(3).map(|id| {
        app.call(
            "getNextTrainingQuestion",
            Some(&player),
            json!({ "question_id": id, "selected_option": "B" }),
        )
    });
    for result in futures::future::join_all(answers).await {
        let (status, body) = result?;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }

    let session = app
        .state
        .data
        .fetch("TrainingSession", &player.user_id, "missing")
        .await?;
    assert_eq!(session.i64_field("current_index"), Some(3));
    assert_eq!(session.i64_field("correct_count"), Some(3));
    let sessions = app
        .state
        .data
        .count(&Query::new("TrainingSession").equal_to("user_id", pointer("_User", &player.user_id)))
        .await?;
    assert_eq!(sessions, 1);
    Ok(())
}

#[tokio::test]
async fn placement_test_is_for_children_only() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let parent = app.login_mobile("+96581000005").await?;
    let child = app.user_with_role(&admin, "placement-kid", "Child").await?;

    let mut ids = Vec::new();
    for (i, correct) in ["A", "B", "C", "D"].iter().enumerate() {
        ids.push(
            keyed_question(
                &app,
                "PlacementTestQuestion",
                "question_image",
                "PlacementTestCorrectAnswer",
                &format!("p{}.png", i),
                correct,
            )
            .await?,
        );
    }

    let (status, body) = app.call_get("getPlacementTestQuestions", Some(&parent), "").await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "User is not a Child");

    let (status, body) = app.call_get("getPlacementTestQuestions", Some(&child), "").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(4));

    let second = app
        .ok("getPlacementTestQuestionByIndex", Some(&child), json!({ "index": 1 }))
        .await?;
    assert_eq!(second["id"], ids[1].as_str());
    let (status, _) = app
        .call("getPlacementTestQuestionByIndex", Some(&child), json!({ "index": -1 }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .call("getPlacementTestQuestionByIndex", Some(&child), json!({ "index": 9 }))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let result = app
        .ok(
            "submitPlacementTestAnswers",
            Some(&child),
            json!({
                "answers": [
                    { "questionId": ids[0], "selectedOption": "a" },
                    { "questionId": ids[1], "selectedOption": "B" },
                    { "questionId": ids[2], "selectedOption": "C" },
                    { "questionId": ids[3], "selectedOption": "A" },
                ],
            }),
        )
        .await?;
    assert_eq!(result["correctCount"], 3);
    assert_eq!(result["score"], 75);
    assert_eq!(result["passed"], true);

    let user = app.state.data.fetch("_User", &child.user_id, "missing").await?;
    assert_eq!(user.i64_field("placement_test_score"), Some(75));

    let repeated = app
        .ok(
            "submitPlacementTestAnswers",
            Some(&child),
            json!({
                "answers": [
                    { "questionId": ids[0], "selectedOption": "A" },
                    { "questionId": ids[0], "selectedOption": "A" },
                    { "questionId": ids[0], "selectedOption": "A" },
                    { "questionId": ids[1], "selectedOption": "C" },
                ],
            }),
        )
        .await?;
    assert_eq!(repeated["correctCount"], 1);
    assert_eq!(repeated["score"], 50);
    assert_eq!(repeated["passed"], false);
    Ok(())
}

#[tokio::test]
async fn child_profile_is_created_on_first_read() -> Result<()> {
    let app = TestApp::spawn().await?;
    let admin = app.login_super().await?;
    let child = app.user_with_role(&admin, "profile-kid", "Child").await?;

    let (status, first) = app.call_get("getMyChildProfile", Some(&child), "").await?;
    assert_eq!(status, StatusCode::OK);
    let (_, again) = app.call_get("getMyChildProfile", Some(&child), "").await?;
    assert_eq!(first["objectId"], again["objectId"]);

    let (status, body) = app
        .call("createOrUpdateChildProfile", Some(&admin), json!({ "childId": admin.user_id }))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "User is not a Child");
    Ok(())
}
