use anyhow::Context;
use clap::Parser;

use libris_app::backend;
use libris_app::config::Config;
use libris_app::menu::Menu;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    libris_observability::init(config.log_format.into());
    config.validate()?;

    let store = backend::open(&config).context("failed to open store")?;
    tracing::info!(store = ?config.store, "starting libris");

    let stdin = std::io::stdin();
    let mut menu = Menu::new(store, stdin.lock(), std::io::stdout());
    menu.run().context("terminal i/o failed")?;
    Ok(())
}
