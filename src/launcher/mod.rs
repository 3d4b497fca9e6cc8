//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Execution backends.
//!
//! `local` spawns the plugin as a supervised child process; `cluster` writes
//! a batch script and submits it. Neither backend executes commands itself,
//! they only hand work to the operating system or to the scheduler.

pub mod cluster;
pub mod local;

use std::path::PathBuf;
use std::process::Stdio;

use uuid::Uuid;

use crate::config::Configuration;
use crate::error::Error;
use crate::error::Result;

/// Per-job working directory below the configured base
pub fn job_work_dir(config: &Configuration, job: Uuid) -> PathBuf {
    config.work_dir().join(job.to_string())
}

/// Run a shell command to completion, returning stdout, stderr and the exit
/// code.
pub async fn system_call(cmd: &str) -> Result<(String, String, i32)> {
    let output = tokio::process::Command::new("bash")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::Runtime(format!("Cannot execute '{cmd}': {e}")))?;

    Ok((
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
        output.status.code().unwrap_or(-1),
    ))
}
