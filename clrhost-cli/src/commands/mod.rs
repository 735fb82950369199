pub mod common;
pub mod exec;
pub mod info;
pub mod run_dll;
pub mod runtimes;
