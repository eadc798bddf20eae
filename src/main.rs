use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use noolite_link::config::{CONFIG_ENV, Config, init_logging};

mod cli;
mod rx;
mod tx;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging)?;

    match args.cmd {
        cli::Cmd::Listen(opts) => rx::run(opts, config).await,
        cli::Cmd::Send(opts) => tx::run(opts, config).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    match path {
        Some(p) => Config::load(&p).with_context(|| format!("loading {}", p.display())),
        None => Ok(Config::default()),
    }
}
