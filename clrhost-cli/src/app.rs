use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// clrhost - host the .NET runtime and run managed programs from disk or memory
#[derive(Debug, Parser)]
#[command(name = "clrhost", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Trace every native call and its status.
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the runtime versions installed on this machine.
    Runtimes,

    /// Inspect an image without loading it: machine, kind, target runtime, entry point.
    Info {
        /// Path to the program image.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    /// Load an image from memory and run its entry point; exits with the program's exit code.
    Exec {
        /// Path to the program image.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Arguments passed to the program.
        #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Capture the program's standard output and error and print them afterwards.
        #[arg(long)]
        capture: bool,

        /// Prefer the first installed runtime whose version contains this text.
        #[arg(long, value_name = "SUBSTR", default_value = "v4")]
        runtime: String,

        /// Hand the image to the runtime without checking its headers first.
        #[arg(long)]
        no_validate: bool,

        /// Do not bind the runtime for legacy activation.
        #[arg(long)]
        no_legacy_bind: bool,
    },

    /// Run `static int Method(string)` from a library through the current-generation host.
    RunDll {
        /// Path to the library.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Fully qualified type name, e.g. `Plugin.Entry`.
        #[arg(long = "type", value_name = "TYPE")]
        type_name: String,

        /// Method name.
        #[arg(long, value_name = "METHOD")]
        method: String,

        /// The single string argument.
        #[arg(long, value_name = "ARGUMENT", default_value = "")]
        argument: String,

        /// Prefer the first installed runtime whose version contains this text.
        #[arg(long, value_name = "SUBSTR", default_value = "v4")]
        runtime: String,
    },
}
