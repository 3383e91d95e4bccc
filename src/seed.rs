//! Startup data: custom roles, the super user, account statuses and an
//! optional YAML fixture with levels and test questions. Every step checks
//! for existing rows first, so seeding can run on every boot.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::acl::Acl;
use crate::app::AppState;
use crate::auth::password::hash_password;
use crate::error::ApiError;
use crate::modules::doc;
use crate::modules::user::queue_new_user;
use crate::store::{file_value, pointer, Query, StoredObject, WriteBatch};

pub const SUPER_ADMIN: &str = "SuperAdmin";
pub const CUSTOM_ROLES: &[&str] = &[SUPER_ADMIN, "Admin", "Parent", "Child", "Psychologist", "Doctor"];

/// Account statuses as (code, English name, Arabic name).
const ACCOUNT_STATUSES: &[(&str, &str, &str)] = &[
    ("1", "Active", "نشط"),
    ("2", "Inactive", "غير نشط"),
    ("3", "Blocked", "محظور"),
];

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Cannot read fixture {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid fixture: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub levels: Vec<LevelFixture>,
    #[serde(default)]
    pub training_questions: Vec<QuestionFixture>,
    #[serde(default)]
    pub placement_questions: Vec<QuestionFixture>,
}

#[derive(Debug, Deserialize)]
pub struct LevelFixture {
    pub name: String,
    pub order: i64,
    pub code: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub games: Vec<GameFixture>,
}

#[derive(Debug, Deserialize)]
pub struct GameFixture {
    pub name: String,
    pub order: i64,
}

/// Image-based multiple choice question. Images are file names already
/// present in the files directory.
#[derive(Debug, Deserialize)]
pub struct QuestionFixture {
    pub question_image: String,
    pub options: Vec<String>,
    pub correct_option: String,
}

/// What a seeding run created.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub roles: usize,
    pub super_user: bool,
    pub account_statuses: usize,
    pub levels: usize,
    pub level_games: usize,
    pub questions: usize,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

pub async fn seed_all(state: &AppState) -> Result<SeedReport, SeedError> {
    let mut report = SeedReport {
        roles: seed_roles(state).await?,
        ..SeedReport::default()
    };
    report.account_statuses = seed_account_statuses(state).await?;
    report.super_user = seed_super_user(state).await?;

    if let Some(path) = &state.config.seed.fixture_file {
        let fixture = Fixture::load(path)?;
        seed_fixture(state, &fixture, &mut report).await?;
    }

    info!(
        "Seeding complete: {} roles, {} statuses, super user created: {}, {} levels, {} games, {} questions",
        report.roles,
        report.account_statuses,
        report.super_user,
        report.levels,
        report.level_games,
        report.questions
    );
    Ok(report)
}

async fn seed_roles(state: &AppState) -> Result<usize, SeedError> {
    let mut batch = WriteBatch::new();
    for name in CUSTOM_ROLES {
        if state.data.role_by_name(name).await?.is_some() {
            continue;
        }
        let mut acl = Acl::new();
        acl.set_role_read_access(SUPER_ADMIN, true);
        acl.set_role_write_access(SUPER_ADMIN, true);
        batch.create_with_acl("_Role", doc(json!({ "name": name, "isCustom": true })), Some(acl));
        info!("Creating role {}", name);
    }
    let created = batch.len();
    if created > 0 {
        state.data.commit(batch, None).await?;
    }
    Ok(created)
}

async fn seed_account_statuses(state: &AppState) -> Result<usize, SeedError> {
    let mut batch = WriteBatch::new();
    for (code, en, ar) in ACCOUNT_STATUSES {
        let exists = state
            .data
            .count(&Query::new("AccountStatus").equal_to("code", *code))
            .await?;
        if exists == 0 {
            batch.create(
                "AccountStatus",
                doc(json!({ "code": code, "name": { "en": en, "ar": ar } })),
            );
        }
    }
    let created = batch.len();
    if created > 0 {
        state.data.commit(batch, None).await?;
    }
    Ok(created)
}

/// Create the super user, or make sure an existing one holds SuperAdmin.
async fn seed_super_user(state: &AppState) -> Result<bool, SeedError> {
    let settings = &state.config.seed;
    let role = state
        .data
        .role_by_name(SUPER_ADMIN)
        .await?
        .ok_or_else(|| ApiError::internal_server_error("SuperAdmin role not found"))?;

    let existing = state
        .data
        .first(Query::new("_User").equal_to("username", settings.super_username.as_str()))
        .await?;

    if let Some(user) = existing {
        let roles = state.data.user_roles(&user.id).await?;
        if !roles.iter().any(|r| r == SUPER_ADMIN) {
            let mut batch = WriteBatch::new();
            batch.add_role_member(&role.id, &user.id);
            state.data.commit(batch, None).await?;
            info!("Assigned {} to existing user {}", SUPER_ADMIN, settings.super_username);
        }
        return Ok(false);
    }

    if settings.super_password.is_empty() {
        warn!("SEED_SUPER_PASSWORD is not set; skipping super user");
        return Ok(false);
    }

    let status = state
        .data
        .first(Query::new("AccountStatus").equal_to("code", "1"))
        .await?;
    let fields = doc(json!({
        "username": settings.super_username,
        "email": settings.super_email,
        "_hashed_password": hash_password(&settings.super_password),
    }));
    let mut batch = WriteBatch::new();
    queue_new_user(&mut batch, fields, Some(&role), status.as_ref());
    state.data.commit(batch, None).await?;
    info!("Seeded super user {}", settings.super_username);
    Ok(true)
}

async fn seed_fixture(state: &AppState, fixture: &Fixture, report: &mut SeedReport) -> Result<(), SeedError> {
    for level in &fixture.levels {
        let existing = state
            .data
            .first(Query::new("Level").equal_to("order", level.order))
            .await?;
        let level_obj = match existing {
            Some(level_obj) => level_obj,
            None => {
                let mut data = doc(json!({
                    "name": level.name,
                    "order": level.order,
                    "description": level.description.clone().unwrap_or_default(),
                }));
                if let Some(code) = &level.code {
                    data.insert("code".to_string(), Value::String(code.clone()));
                }
                report.levels += 1;
                state.data.create("Level", data, None, None).await?
            }
        };
        report.level_games += seed_games(state, &level_obj, &level.games).await?;
    }

    report.questions += seed_questions(
        state,
        &fixture.training_questions,
        "TrainingQuestion",
        "question_image_url",
        &["option_a", "option_b", "option_c"],
        "TrainingQuestionCorrectAnswer",
    )
    .await?;
    report.questions += seed_questions(
        state,
        &fixture.placement_questions,
        "PlacementTestQuestion",
        "question_image",
        &["option_a_image", "option_b_image", "option_c_image", "option_d_image"],
        "PlacementTestCorrectAnswer",
    )
    .await?;
    Ok(())
}

async fn seed_games(state: &AppState, level: &StoredObject, games: &[GameFixture]) -> Result<usize, SeedError> {
    let mut batch = WriteBatch::new();
    for game in games {
        let exists = state
            .data
            .count(
                &Query::new("LevelGame")
                    .equal_to("level_id", level.pointer())
                    .equal_to("order", game.order),
            )
            .await?;
        if exists == 0 {
            batch.create(
                "LevelGame",
                doc(json!({ "level_id": level.pointer(), "name": game.name, "order": game.order })),
            );
        }
    }
    let created = batch.len();
    if created > 0 {
        state.data.commit(batch, None).await?;
    }
    Ok(created)
}

/// Questions are keyed by their question image; one already stored is skipped.
async fn seed_questions(
    state: &AppState,
    questions: &[QuestionFixture],
    class_name: &str,
    image_field: &str,
    option_fields: &[&str],
    answer_class: &str,
) -> Result<usize, SeedError> {
    let mut created = 0;
    for question in questions {
        let exists = state
            .data
            .count(&Query::new(class_name).equal_to(image_field, file_value(&question.question_image)))
            .await?;
        if exists > 0 {
            continue;
        }
        if question.options.len() > option_fields.len() {
            warn!(
                "{} question {} has {} options, keeping the first {}",
                class_name,
                question.question_image,
                question.options.len(),
                option_fields.len()
            );
        }

        let mut data = doc(json!({ image_field: file_value(&question.question_image) }));
        for (field, image) in option_fields.iter().zip(&question.options) {
            data.insert(field.to_string(), file_value(image));
        }

        let mut batch = WriteBatch::new();
        let question_id = batch.create(class_name, data);
        batch.create(
            answer_class,
            doc(json!({
                "question": pointer(class_name, &question_id),
                "correct_option": question.correct_option.trim().to_ascii_uppercase(),
            })),
        );
        state.data.commit(batch, None).await?;
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn state() -> AppState {
        match AppState::in_memory(AppConfig::development()) {
            Ok(state) => state,
            Err(e) => panic!("schema: {}", e),
        }
    }

    #[tokio::test]
    async fn seeding_twice_creates_nothing_new() {
        let state = state();
        let first = seed_all(&state).await.expect("first seed");
        assert_eq!(first.roles, CUSTOM_ROLES.len());
        assert_eq!(first.account_statuses, 3);
        assert!(first.super_user);

        let second = seed_all(&state).await.expect("second seed");
        assert_eq!(second, SeedReport::default());
    }

    #[tokio::test]
    async fn super_user_holds_super_admin() {
        let state = state();
        seed_all(&state).await.expect("seed");
        let user = state
            .data
            .first(Query::new("_User").equal_to("username", "super"))
            .await
            .expect("query")
            .expect("super user");
        let roles = state.data.user_roles(&user.id).await.expect("roles");
        assert!(roles.contains(&SUPER_ADMIN.to_string()));
    }

    #[test]
    fn fixture_parses_from_yaml() {
        let yaml = r#"
levels:
  - name: Level 1
    order: 1
    games:
      - { name: Colors, order: 1 }
training_questions:
  - question_image: q1.png
    options: [a.png, b.png, c.png]
    correct_option: b
"#;
        let fixture: Fixture = serde_yaml::from_str(yaml).expect("yaml");
        assert_eq!(fixture.levels[0].games[0].name, "Colors");
        assert_eq!(fixture.training_questions[0].options.len(), 3);
        assert!(fixture.placement_questions.is_empty());
    }

    #[tokio::test]
    async fn bundled_fixture_seeds_levels_and_questions() {
        let mut config = AppConfig::development();
        config.seed.fixture_file = Some(Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/seed.yaml"));
        let state = AppState::in_memory(config).expect("schema");

        let report = seed_all(&state).await.expect("seed");
        assert_eq!(report.levels, 2);
        assert_eq!(report.level_games, 4);
        assert_eq!(report.questions, 2);

        let again = seed_all(&state).await.expect("reseed");
        assert_eq!(again.levels + again.level_games + again.questions, 0);
    }
}
