mod app;
mod commands;
mod output;

use anyhow::Context;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    let cli = Cli::parse();

    // clrhost info+ on stderr unless --json; --verbose enables debug, --debug traces native
    // calls; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.debug {
            log::LevelFilter::Trace
        } else if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("clrhost", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    let code = match &cli.command {
        Command::Runtimes => commands::runtimes::run(&cli.global)?,
        Command::Info { path } => commands::info::run(path, &cli.global)?,
        Command::Exec {
            path,
            args,
            capture,
            runtime,
            no_validate,
            no_legacy_bind,
        } => commands::exec::run(
            path,
            args,
            &commands::exec::ExecOptions {
                capture: *capture,
                runtime,
                validate: !*no_validate,
                legacy_bind: !*no_legacy_bind,
            },
            &cli.global,
        )?,
        Command::RunDll {
            path,
            type_name,
            method,
            argument,
            runtime,
        } => commands::run_dll::run(path, type_name, method, argument, runtime, &cli.global)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
