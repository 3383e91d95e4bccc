use clap::Args;

use crate::cli::OutputFormat;
use crate::config::AppConfig;

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    #[arg(long, help = "Port to listen on (overrides PORT)")]
    pub port: Option<u16>,

    #[arg(long, help = "Start without seeding roles and reference data")]
    pub no_seed: bool,
}

pub async fn handle(args: ServeArgs, _output_format: OutputFormat) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    crate::server::serve(config, !args.no_seed).await
}
