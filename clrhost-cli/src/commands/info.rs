use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_image},
    output::{print_fields, print_output},
};

#[derive(Debug, Serialize)]
pub struct ImageSummary {
    pub file: String,
    pub id: String,
    pub size: usize,
    pub machine: String,
    pub pe32_plus: bool,
    pub kind: String,
    pub cli_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_runtime: Option<String>,
    pub flags: Vec<String>,
    pub entry_point_token: String,
    pub managed_entry_point: bool,
}

fn machine_name(machine: u16) -> String {
    match machine {
        0x014C => "x86".to_string(),
        0x8664 => "x64".to_string(),
        0xAA64 => "arm64".to_string(),
        other => format!("0x{other:04X}"),
    }
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<i32> {
    let image = load_image(path)?;
    let info = image
        .info()
        .with_context(|| format!("not a managed image: {}", path.display()))?;

    let summary = ImageSummary {
        file: file_display_name(path),
        id: image.id().to_string(),
        size: image.len(),
        machine: machine_name(info.machine),
        pe32_plus: info.is_64,
        kind: info.kind.to_string(),
        cli_version: format!(
            "{}.{}",
            info.cli.major_runtime_version, info.cli.minor_runtime_version
        ),
        target_runtime: info.target_runtime.clone(),
        flags: info
            .cli
            .flags
            .iter_names()
            .map(|(name, _)| name.to_string())
            .collect(),
        entry_point_token: format!("0x{:08X}", info.cli.entry_point_token),
        managed_entry_point: info.cli.has_managed_entry_point(),
    };

    print_output(&summary, opts, |summary| {
        let bits = if summary.pe32_plus { "PE32+" } else { "PE32" };
        let entry = if summary.managed_entry_point {
            summary.entry_point_token.clone()
        } else {
            format!("{} (none)", summary.entry_point_token)
        };
        print_fields(&[
            ("File", summary.file.clone()),
            ("SHA-1", summary.id.clone()),
            ("Size", format!("{} bytes", summary.size)),
            ("Machine", format!("{} ({bits})", summary.machine)),
            ("Kind", summary.kind.clone()),
            ("CLI header", summary.cli_version.clone()),
            (
                "Runtime",
                summary
                    .target_runtime
                    .clone()
                    .unwrap_or_else(|| "<unknown>".to_string()),
            ),
            ("Flags", summary.flags.join(" | ")),
            ("Entry point", entry),
        ]);
    })?;
    Ok(0)
}
