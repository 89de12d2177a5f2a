//! Layered configuration: a TOML file selected by build profile or
//! `--settings`, then the recognized environment variables on top.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
