pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "ayn")]
#[command(about = "Ayn CLI - run, seed and inspect the child development backend")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the API server (default)")]
    Serve(commands::serve::ServeArgs),

    #[command(about = "Create roles, the super user, account statuses and fixture data")]
    Seed(commands::seed::SeedArgs),

    #[command(about = "Inspect the class schema")]
    Schema {
        #[command(subcommand)]
        cmd: commands::schema::SchemaCommands,
    },

    #[command(about = "Inspect registered cloud functions")]
    Functions {
        #[command(subcommand)]
        cmd: commands::functions::FunctionCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        None => commands::serve::handle(commands::serve::ServeArgs::default(), output_format).await,
        Some(Commands::Serve(args)) => commands::serve::handle(args, output_format).await,
        Some(Commands::Seed(args)) => commands::seed::handle(args, output_format).await,
        Some(Commands::Schema { cmd }) => commands::schema::handle(cmd, output_format),
        Some(Commands::Functions { cmd }) => commands::functions::handle(cmd, output_format),
    }
}
