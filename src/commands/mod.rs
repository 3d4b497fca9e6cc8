//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use clap::ArgMatches;
use tracing::info;

use crate::config::Configuration;
use crate::error::Error;
use crate::error::Result;
use crate::resource;
use crate::watcher::SchedulerWatcher;
use crate::watcher::WatcherEvent;

/// Run the watcher against the configured scheduler and log every observed
/// state change until ctrl-c or until the scheduler goes away.
pub async fn watcher(config: &Configuration) -> Result<()> {
    let mut handle = SchedulerWatcher::new(config).spawn();

    let interrupted = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break true,
            event = handle.events.recv() => match event {
                Some(WatcherEvent::Update(snapshot)) => {
                    info!(
                        job = %snapshot.external_id,
                        name = %snapshot.name,
                        state = %snapshot.state,
                        exit_status = ?snapshot.exit_status,
                        "scheduler state change"
                    );
                }
                Some(WatcherEvent::Quit) | None => break false,
            }
        }
    };

    if interrupted {
        info!("shutting down watcher");
        handle.stop().await;
        return Ok(());
    }
    Err(Error::Runtime(
        "Scheduler watcher terminated: status command unavailable".into(),
    ))
}

/// Validate an allocation template the way the store would on load.
pub fn check_allocation(matches: &ArgMatches) -> Result<()> {
    let template = matches
        .get_one::<String>("template")
        .ok_or_else(|| Error::Validation("Missing template argument".into()))?;
    resource::validate_template(template)?;
    println!("OK: {template}");
    Ok(())
}

/// Print completions for the given shell on stdout.
pub fn completions(matches: &ArgMatches) -> Result<()> {
    let shell = matches
        .get_one::<clap_complete::Shell>("shell")
        .copied()
        .ok_or_else(|| Error::Validation("Missing shell argument".into()))?;
    clap_complete::generate(shell, &mut crate::cli::cli(), "ordino", &mut std::io::stdout());
    Ok(())
}
