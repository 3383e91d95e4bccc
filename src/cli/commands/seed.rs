use clap::Args;
use std::path::PathBuf;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::seed::seed_all;
use crate::server::build_state;

#[derive(Args, Debug)]
pub struct SeedArgs {
    #[arg(long, help = "YAML fixture with levels and questions (overrides SEED_FIXTURE_FILE)")]
    pub fixture: Option<PathBuf>,
}

pub async fn handle(args: SeedArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env();
    if let Some(fixture) = args.fixture {
        config.seed.fixture_file = Some(fixture);
    }

    let state = build_state(config).await?;
    let report = seed_all(&state).await?;

    output_success(
        &output_format,
        &format!(
            "Seeded {} roles, {} account statuses, {} levels, {} games and {} questions",
            report.roles, report.account_statuses, report.levels, report.level_games, report.questions
        ),
        Some(serde_json::to_value(&report)?),
    )
}
