use clap::Subcommand;
use serde_json::{json, Value};

use crate::cli::utils::{output_document, output_rows};
use crate::cli::OutputFormat;
use crate::functions::{FunctionRegistry, RegisteredFunction};

#[derive(Subcommand)]
pub enum FunctionCommands {
    #[command(about = "List registered functions")]
    List,

    #[command(about = "Show methods, roles and parameters of one function")]
    Show {
        #[arg(help = "Function name")]
        name: String,
    },
}

fn describe(function: &RegisteredFunction) -> Value {
    let config = &function.config;
    json!({
        "name": function.name,
        "methods": config.methods.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
        "requireUser": config.require_user,
        "roles": config.roles.roles,
        "requireAllRoles": config.roles.require_all,
        "params": config.params.iter().map(|p| json!({
            "name": p.name,
            "type": format!("{:?}", p.kind),
            "required": p.required,
        })).collect::<Vec<_>>(),
    })
}

pub fn handle(cmd: FunctionCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let registry = FunctionRegistry::standard();

    match cmd {
        FunctionCommands::List => {
            let rows = registry
                .iter()
                .map(|f| {
                    let access = if !f.config.roles.is_empty() {
                        f.config.roles.roles.join("|")
                    } else if f.config.require_user {
                        "user".to_string()
                    } else {
                        "public".to_string()
                    };
                    vec![
                        f.name.clone(),
                        f.config.methods.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(","),
                        access,
                    ]
                })
                .collect();
            let json_rows = registry.iter().map(describe).collect();
            output_rows(&output_format, "functions", &["NAME", "METHODS", "ACCESS"], rows, json_rows)
        }
        FunctionCommands::Show { name } => {
            let function = registry
                .get(&name)
                .ok_or_else(|| anyhow::anyhow!("Function '{}' not found", name))?;
            output_document(&output_format, &describe(function))
        }
    }
}
