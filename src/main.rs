mod shell;
mod terminal;

use crate::shell::Shell;
use anyhow::Result;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut shell = Shell::new();
    shell.run()?;

    Ok(())
}
