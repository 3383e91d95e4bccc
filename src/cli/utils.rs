use serde_json::{json, Value};
use crate::cli::OutputFormat;

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            match (response.as_object_mut(), data) {
                (Some(map), Some(Value::Object(extra))) => map.extend(extra),
                (Some(map), Some(other)) => {
                    map.insert("data".to_string(), other);
                }
                _ => {}
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output a list of rows: a JSON array, or aligned text columns
pub fn output_rows(
    output_format: &OutputFormat,
    collection_name: &str,
    headers: &[&str],
    rows: Vec<Vec<String>>,
    json_rows: Vec<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({
                collection_name: json_rows
            }))?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No {} found", collection_name);
                return Ok(());
            }
            let widths = column_widths(headers, &rows);
            println!("{}", format_row(headers.iter().map(|h| h.to_string()), &widths));
            for row in rows {
                println!("{}", format_row(row.into_iter(), &widths));
            }
        }
    }
    Ok(())
}

/// Output a single JSON document; text mode pretty-prints it too
pub fn output_document(output_format: &OutputFormat, document: &Value) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string(document)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(document)?),
    }
    Ok(())
}

fn column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .filter_map(|r| r.get(i))
                .map(|c| c.chars().count())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect()
}

fn format_row(cells: impl Iterator<Item = String>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_columns_to_the_widest_cell() {
        let rows = vec![vec!["loginUser".to_string(), "POST".to_string()]];
        let widths = column_widths(&["NAME", "METHODS"], &rows);
        assert_eq!(widths, vec![9, 7]);
        assert_eq!(
            format_row(vec!["x".to_string(), "GET".to_string()].into_iter(), &widths),
            "x          GET"
        );
    }
}
