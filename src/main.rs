use std::process::exit;

use anyhow::{Context, Result};
use command_modules::AppConfig;

mod cli;

use cli::{build_app, APP_NAME};

fn main() -> Result<()> {
    // Resolve the profile directory from the environment
    let config = AppConfig::from_env(APP_NAME);

    let mut app = build_app(config).with_context(|| "failed to register commands")?;

    // Dispatch owns error reporting; only the exit code comes back
    exit(app.dispatch(std::env::args_os()));
}
