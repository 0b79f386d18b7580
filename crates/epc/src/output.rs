use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use epc_sexp::Value;
use serde::Serialize;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CallOutput<'a> {
    method: &'a str,
    result: String,
}

pub fn print_result(method: &str, result: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = CallOutput {
                method,
                result: result.to_string(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "RESULT"])
                .add_row(vec![method.to_string(), result.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{method} => {result}"),
        OutputFormat::Raw => println!("{result}"),
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub struct MethodRow {
    pub name: String,
    pub arg_spec: String,
    pub docstring: String,
}

/// Flatten a `methods` reply, a list of `(name arg-spec docstring)`
/// entries, into rows. Entries that are not lists still get a row so
/// nothing the peer sent is silently dropped.
pub fn method_rows(listing: &Value) -> Vec<MethodRow> {
    listing
        .as_list()
        .unwrap_or(&[])
        .iter()
        .map(|entry| {
            let fields = entry.as_list().unwrap_or(&[]);
            MethodRow {
                name: match fields.first() {
                    Some(name) => name.to_string(),
                    None => entry.to_string(),
                },
                arg_spec: fields.get(1).map(Value::to_string).unwrap_or_default(),
                docstring: fields
                    .get(2)
                    .map(|doc| match doc.as_str() {
                        Some(text) => text.to_string(),
                        None => doc.to_string(),
                    })
                    .unwrap_or_default(),
            }
        })
        .collect()
}

pub fn print_methods(listing: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let rows = method_rows(listing);
            println!(
                "{}",
                serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NAME", "ARGS", "DOC"]);
            for row in method_rows(listing) {
                table.add_row(vec![row.name, row.arg_spec, row.docstring]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in method_rows(listing) {
                println!("{} {} {}", row.name, row.arg_spec, row.docstring);
            }
        }
        OutputFormat::Raw => println!("{listing}"),
    }
}
