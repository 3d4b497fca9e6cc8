//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The local process launcher.
//!
//! The plugin's start script runs as a child of this process; the child's
//! pid becomes the job's external id. A supervision task waits for the
//! child and fails the job when it exits non-zero. Unlike the cluster
//! backend there is no dependency chaining here, dependents all run
//! concurrently.

use std::path::Path;
use std::process::Stdio;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

use crate::context::Context;
use crate::error::Error;
use crate::error::Result;
use crate::job::ProcessingJob;

/// Spawn the plugin start script for a job.
///
/// Returns the child pid and the supervision task handle. The caller usually
/// detaches the handle; tests await it to observe the failure path.
pub async fn launch(
    ctx: &Context,
    env_script: &str,
    start_script: &str,
    url: &str,
    job_id: Uuid,
    work_dir: &Path,
) -> Result<(u32, JoinHandle<()>)> {
    tokio::fs::create_dir_all(work_dir).await?;

    // the spawned shell is not interactive and sources nothing, so the
    // environment script has to run in the same invocation
    let cmd = format!(
        "{}; {} {} {} {}",
        env_script,
        start_script,
        url,
        job_id,
        work_dir.display()
    );
    debug!(job = %job_id, %cmd, "launching locally");

    let mut child = tokio::process::Command::new("bash")
        .arg("-c")
        .arg(&cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Runtime(format!("Cannot launch '{cmd}': {e}")))?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Runtime(format!("Child for job {job_id} exited prematurely")))?;

    let supervisor_ctx = ctx.clone();
    let supervisor = tokio::spawn(async move {
        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                warn!(job = %job_id, error = %e, "cannot wait for local child");
                return;
            }
        };
        if output.status.success() {
            debug!(job = %job_id, "local child finished");
            return;
        }

        let error = format!(
            "error from local launcher when launching cmd='{}'\n{}\n{}",
            cmd,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if let Err(e) = ProcessingJob::new(job_id).set_error(&supervisor_ctx, &error) {
            warn!(job = %job_id, error = %e, "cannot record local launcher failure");
        }
    });

    Ok((pid, supervisor))
}
