//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::Context as _;
use anyhow::Result;
use clap::ArgMatches;
use tracing_subscriber::EnvFilter;

use ordino::cli;
use ordino::commands;
use ordino::config::Configuration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let matches = cli::cli().get_matches();
    match matches.subcommand() {
        Some(("watcher", _)) => {
            let config = load_config(&matches)?;
            commands::watcher(&config).await?;
        }
        Some(("check-allocation", matches)) => commands::check_allocation(matches)?,
        Some(("completions", matches)) => commands::completions(matches)?,
        Some((other, _)) => return Err(anyhow!("Unknown subcommand: {other}")),
        None => unreachable!("subcommand_required is set"),
    }

    Ok(())
}

fn load_config(matches: &ArgMatches) -> Result<Configuration> {
    let path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .or_else(|| std::env::var("ORDINO_CONFIG_FP").ok().map(PathBuf::from))
        .ok_or_else(|| {
            anyhow!("No configuration file given (use --config or set ORDINO_CONFIG_FP)")
        })?;
    Configuration::load(&path).with_context(|| format!("Loading configuration: {}", path.display()))
}
