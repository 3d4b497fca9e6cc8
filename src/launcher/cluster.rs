//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The cluster batch launcher.
//!
//! A batch script is written into the job's work directory and handed to
//! `sbatch`; the scheduler-assigned job id comes back as the external id.
//! Dependency chains ride on `-d afterok:<parent>`.

use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use crate::error::Error;
use crate::error::Result;
use crate::launcher::system_call;

/// Optional epilogue script attached to every batch script
pub const EPILOGUE_ENV: &str = "ORDINO_JOB_SCHEDULER_EPILOGUE";

/// Render the batch script for a job.
pub fn batch_script(
    work_dir: &Path,
    env_script: &str,
    start_script: &str,
    url: &str,
    job_id: Uuid,
) -> String {
    let work_dir = work_dir.display();
    let mut lines = vec![
        "#!/bin/bash".to_string(),
        format!("#SBATCH --error {work_dir}/slurm-error.txt"),
        format!("#SBATCH --output {work_dir}/slurm-output.txt"),
        "echo $SLURM_JOBID".to_string(),
        "source ~/.bash_profile".to_string(),
        env_script.to_string(),
    ];

    let epilogue = std::env::var(EPILOGUE_ENV).unwrap_or_default();
    if !epilogue.is_empty() {
        lines.push(format!("#SBATCH --epilog {epilogue}"));
    }

    lines.push(format!("{start_script} {url} {job_id} {work_dir}"));
    lines.join("\n")
}

/// The `sbatch` invocation for a written script
pub fn sbatch_command(
    parent_external_id: Option<&str>,
    resource_params: &str,
    script_path: &Path,
) -> String {
    let mut cmd = vec!["sbatch".to_string()];
    if let Some(parent) = parent_external_id {
        // the dependent must be submitted before the parent ends, or afterok
        // never fires
        cmd.push("-d".to_string());
        cmd.push(format!("afterok:{parent}"));
    }
    if !resource_params.is_empty() {
        cmd.push(resource_params.to_string());
    }
    cmd.push(script_path.display().to_string());
    cmd.join(" ")
}

/// The scheduler prints a sentence; the job id is its last token.
pub fn parse_submission(stdout: &str) -> Result<String> {
    stdout
        .split_whitespace()
        .last()
        .map(str::to_string)
        .ok_or_else(|| Error::Runtime("Scheduler returned no job id".into()))
}

/// Write the batch script and submit it. Returns the external id.
pub async fn launch(
    env_script: &str,
    start_script: &str,
    url: &str,
    job_id: Uuid,
    work_dir: &Path,
    parent_external_id: Option<&str>,
    resource_params: &str,
) -> Result<String> {
    tokio::fs::create_dir_all(work_dir).await?;

    let script = batch_script(work_dir, env_script, start_script, url, job_id);
    let script_path = script_file(work_dir, job_id);
    tokio::fs::write(&script_path, script).await?;

    let cmd = sbatch_command(parent_external_id, resource_params, &script_path);
    debug!(job = %job_id, %cmd, "submitting to the scheduler");
    let (stdout, stderr, code) = system_call(&cmd).await?;
    if code != 0 {
        return Err(Error::Runtime(format!(
            "Error submitting job: {cmd} :: {stderr}"
        )));
    }

    parse_submission(&stdout)
}

fn script_file(work_dir: &Path, job_id: Uuid) -> PathBuf {
    work_dir.join(format!("{job_id}.txt"))
}
