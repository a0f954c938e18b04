//! Table and JSON output helpers

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_config(format: &str) -> Self {
        match format {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a table followed by a count line, or a notice if there are none
pub fn display_table_with_count<T: Tabled>(rows: &[T], what: &str) {
    if rows.is_empty() {
        println!("No {} found.", what);
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
    println!("Total: {} {}", rows.len(), what);
}

/// Print a two-column key/value table
pub fn display_key_values(pairs: &[(&str, String)]) {
    #[derive(Tabled)]
    struct Row<'a> {
        #[tabled(rename = "Field")]
        field: &'a str,
        #[tabled(rename = "Value")]
        value: &'a str,
    }

    let rows: Vec<Row> = pairs
        .iter()
        .map(|(field, value)| Row {
            field: *field,
            value: value.as_str(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
}
