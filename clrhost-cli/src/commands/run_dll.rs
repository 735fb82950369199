use std::path::Path;

use anyhow::Context;
use clrhost::LoaderConfig;
use serde::Serialize;

use crate::{app::GlobalOptions, output::print_output};

#[derive(Debug, Serialize)]
pub struct RunDllResult {
    pub method: String,
    pub result: u32,
}

pub fn run(
    path: &Path,
    type_name: &str,
    method: &str,
    argument: &str,
    runtime: &str,
    opts: &GlobalOptions,
) -> anyhow::Result<i32> {
    // ExecuteInDefaultAppDomain resolves the path itself
    let path = path
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", path.display()))?;

    let platform = clrhost::native_platform().context("the runtime is not available")?;
    let result = clrhost::execute_file_in_default_domain(
        platform.as_ref(),
        &LoaderConfig::for_version(runtime),
        &path,
        type_name,
        method,
        argument,
    )
    .with_context(|| format!("failed to run {type_name}::{method}"))?;

    print_output(
        &RunDllResult {
            method: format!("{type_name}::{method}"),
            result,
        },
        opts,
        |outcome| println!("{} returned {}", outcome.method, outcome.result),
    )?;

    // the method's int is the process exit code
    Ok(i32::from_ne_bytes(result.to_ne_bytes()))
}
