use comfy_table::{presets, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Print `data` as JSON (if `--json`) or hand it to `display_fn` for human-readable output.
pub fn print_output<T: Serialize>(
    data: &T,
    opts: &GlobalOptions,
    display_fn: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        display_fn(data);
    }
    Ok(())
}

/// Print `label: value` lines with the values aligned.
pub fn print_fields(fields: &[(&str, String)]) {
    let width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0) + 1;
    for (label, value) in fields {
        println!("{:<width$} {value}", format!("{label}:"));
    }
}

/// Borderless table with a header row; `right` marks right-aligned columns.
pub fn print_table(headers: &[&str], right: &[bool], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.to_vec());

    let last = headers.len().saturating_sub(1);
    for index in 0..headers.len() {
        if let Some(column) = table.column_mut(index) {
            if right.get(index).copied().unwrap_or(false) {
                column.set_cell_alignment(CellAlignment::Right);
            }
            column.set_padding((u16::from(index != 0), u16::from(index != last)));
        }
    }

    for row in rows {
        table.add_row(row);
    }
    for line in table.to_string().lines() {
        println!("{}", line.trim_end());
    }
}

/// Print captured program output under a heading, if there is any.
pub fn print_stream(name: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    println!("--- {name} ---");
    print!("{text}");
    if !text.ends_with('\n') {
        println!();
    }
}
