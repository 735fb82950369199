use anyhow::Context;
use serde::Serialize;

use crate::{app::GlobalOptions, output::print_output};

#[derive(Debug, Serialize)]
pub struct RuntimeList {
    pub runtimes: Vec<String>,
}

pub fn run(opts: &GlobalOptions) -> anyhow::Result<i32> {
    let platform = clrhost::native_platform().context("the runtime is not available")?;
    let runtimes = clrhost::installed_runtimes(platform.as_ref())
        .context("failed to enumerate installed runtimes")?;

    print_output(&RuntimeList { runtimes }, opts, |list| {
        if list.runtimes.is_empty() {
            println!("No runtimes installed");
        }
        for version in &list.runtimes {
            println!("{version}");
        }
    })?;
    Ok(0)
}
