use clap::Subcommand;
use serde_json::Value;

use crate::cli::utils::{output_document, output_rows};
use crate::cli::OutputFormat;
use crate::schema::Schema;

#[derive(Subcommand)]
pub enum SchemaCommands {
    #[command(about = "List all classes")]
    List,

    #[command(about = "Show fields and permissions of one class")]
    Show {
        #[arg(help = "Class name")]
        class_name: String,
    },
}

pub fn handle(cmd: SchemaCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let schema = Schema::standard()?;

    match cmd {
        SchemaCommands::List => {
            let mut rows = Vec::new();
            let mut json_rows = Vec::new();
            for def in schema.classes() {
                let required = def.fields.iter().filter(|f| f.required).count();
                rows.push(vec![
                    def.name.clone(),
                    def.fields.len().to_string(),
                    required.to_string(),
                    if def.is_public { "yes" } else { "no" }.to_string(),
                ]);
                json_rows.push(schema.schema_definition(&def.name)?);
            }
            output_rows(&output_format, "classes", &["CLASS", "FIELDS", "REQUIRED", "PUBLIC"], rows, json_rows)
        }
        SchemaCommands::Show { class_name } => {
            let definition: Value = schema.schema_definition(&class_name)?;
            output_document(&output_format, &definition)
        }
    }
}
