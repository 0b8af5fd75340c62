//! Show or create the configuration file

use crate::system_config;
use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(data_dir: Option<&Path>, init: bool) -> Result<()> {
    if init {
        match system_config::init_if_missing()? {
            Some(path) => println!("{} Wrote default config to {}", "✓".green(), path.display()),
            None => println!("{}", "Config file already exists".dimmed()),
        }
    }

    let config = system_config::load()?;
    let path = system_config::config_file_path();

    match &path {
        Some(p) if p.exists() => println!("{} {}", "# file:".dimmed(), p.display()),
        Some(p) => println!("{} {} (not created; defaults shown)", "# file:".dimmed(), p.display()),
        None => println!("{}", "# no config directory; defaults shown".dimmed()),
    }
    println!(
        "{} {}",
        "# data directory:".dimmed(),
        util::resolve_data_dir(data_dir, &config)?.display()
    );
    println!();
    print!("{}", system_config::render(&config)?);
    Ok(())
}
