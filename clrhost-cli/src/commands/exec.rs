use std::path::Path;

use anyhow::Context;
use clrhost::{capture, Loader};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_image, loader_config},
    output::{print_output, print_stream, print_table},
};

pub struct ExecOptions<'a> {
    pub capture: bool,
    pub runtime: &'a str,
    pub validate: bool,
    pub legacy_bind: bool,
}

#[derive(Debug, Serialize)]
pub struct ExecResult {
    pub file: String,
    pub runtime: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

pub fn run(
    path: &Path,
    args: &[String],
    options: &ExecOptions,
    opts: &GlobalOptions,
) -> anyhow::Result<i32> {
    let image = load_image(path)?;
    let config = loader_config(options.runtime, options.validate, options.legacy_bind);

    // the runtime binds the standard handles when it starts, so redirect them first
    let session = if options.capture {
        Some(capture::begin().context("failed to capture standard output")?)
    } else {
        None
    };

    let outcome = Loader::native(config).and_then(|loader| {
        let code = loader.execute(&image, args)?;
        Ok((loader.runtime_version()?, code))
    });

    let captured = match session {
        Some(session) => Some(session.end().context("failed to restore standard output")?),
        None => None,
    };
    let (runtime, exit_code) =
        outcome.with_context(|| format!("failed to run {}", path.display()))?;

    let result = ExecResult {
        file: file_display_name(path),
        runtime,
        exit_code,
        stdout: captured.as_ref().map(|c| c.stdout_lossy().into_owned()),
        stderr: captured.as_ref().map(|c| c.stderr_lossy().into_owned()),
    };

    print_output(&result, opts, |result| {
        if let Some(stdout) = &result.stdout {
            print_stream("stdout", stdout);
        }
        if let Some(stderr) = &result.stderr {
            print_stream("stderr", stderr);
        }
        if options.capture {
            print_table(
                &["Program", "Runtime", "Exit"],
                &[false, false, true],
                vec![vec![
                    result.file.clone(),
                    result.runtime.clone(),
                    result.exit_code.to_string(),
                ]],
            );
        }
    })?;
    Ok(exit_code)
}
