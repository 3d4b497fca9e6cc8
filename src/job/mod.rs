//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

mod parameters;
mod shape;
mod status;

pub use parameters::DefaultParameters;
pub use parameters::ParameterValue;
pub use parameters::Parameters;
pub use parameters::Pending;
pub use shape::shape_of;
pub use shape::Shape;
pub use status::JobStatus;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use futures::future::BoxFuture;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::trace;
use uuid::Uuid;

use crate::config::LauncherKind;
use crate::context::Context;
use crate::db::models::JobRow;
use crate::db::models::NewJob;
use crate::error::Error;
use crate::error::Result;
use crate::launcher;
use crate::notify;
use crate::platform::ArtifactId;
use crate::platform::CommandKind;
use crate::platform::CommandSpec;
use crate::platform::LogId;
use crate::platform::NewArtifact;
use crate::platform::OutputId;
use crate::platform::ParamKind;
use crate::resource;
use crate::resource::Resolved;

/// How long the validator barrier sleeps between polls
const VALIDATOR_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Pause between successive child submissions, so one release does not flood
/// the scheduler frontend
const CHILD_SUBMIT_DELAY: Duration = Duration::from_secs(1);

/// Commands that must not take the inline ENVIRONMENT submission path even
/// though their plugin environment carries the token
const INLINE_EXEMPT_COMMANDS: [&str; 2] = ["Calculate Cell Counts", "Calculate RNA Copy Counts"];

/// The artifact description a plugin reports for one command output
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArtifactData {
    /// `(filepath, filepath type)` pairs
    pub filepaths: Vec<(String, String)>,
    pub artifact_type: String,
}

/// How a validator's artifact came to be. Serialized as JSON into the
/// validator's `provenance` parameter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub job: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_out_id: Option<OutputId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_creation: Option<bool>,
}

/// What a validator stores until its parent's barrier releases it
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
enum StoredArtifactInfo {
    Wrapped {
        data_type: String,
        artifact_data: ArtifactData,
    },
    Plain(ArtifactData),
}

/// Split validators into submission chains of at most `chain_len` jobs; each
/// chain rides the cluster as one `afterok` sequence.
pub fn chain_partition<T>(items: Vec<T>, chain_len: usize) -> Vec<Vec<T>> {
    let chunks = items.into_iter().chunks(chain_len.max(1));
    let partition = chunks.into_iter().map(|chunk| chunk.collect()).collect();
    partition
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// A job that executes a registered command over a set of artifacts.
///
/// The handle is just the identity; every operation reads and writes through
/// the [`Context`] it is given. Status transitions follow this machine:
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> in_construction
///     in_construction --> queued: submit
///     in_construction --> waiting: workflow submit (non root)
///     queued --> running: first heartbeat
///     running --> success: complete / release
///     running --> waiting: definition job behind a barrier
///     running --> error
///     waiting --> queued: submit of a held dependent
///     waiting --> success: release
///     waiting --> error
///     success --> [*]
/// ```
///
/// Leaving `success` and reverting `running` to `queued` are refused; every
/// non-success state can drop to `error` (cascades, scheduler drops).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessingJob {
    id: Uuid,
}

impl ProcessingJob {
    /// A handle without an existence check; internal callers know the id is
    /// good.
    pub fn new(id: Uuid) -> Self {
        ProcessingJob { id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn exists(ctx: &Context, id: Uuid) -> Result<bool> {
        ctx.store().job_exists(id)
    }

    pub fn by_id(ctx: &Context, id: Uuid) -> Result<Self> {
        if !ctx.store().job_exists(id)? {
            return Err(Error::unknown_id("processing job", id));
        }
        Ok(ProcessingJob { id })
    }

    /// Look a job up by its launcher-assigned id. Absence is `None`.
    pub fn by_external_id(ctx: &Context, external_id: &str) -> Result<Option<Self>> {
        Ok(ctx
            .store()
            .job_by_external_id(external_id)?
            .map(ProcessingJob::new))
    }

    /// Create a new job in `in_construction`.
    ///
    /// Unless `force` is given, creation is refused when an equivalent job
    /// (same command, same parameters) is already queued, running, waiting,
    /// in construction, or succeeded with children.
    pub fn create(ctx: &Context, user: &str, parameters: Parameters, force: bool) -> Result<Self> {
        let command = ctx.catalog().command(parameters.command())?;

        if !force {
            let mut duplicates = Vec::new();
            for row in ctx.store().jobs_with_command(command.id())? {
                let relevant = match row.status {
                    JobStatus::InConstruction
                    | JobStatus::Queued
                    | JobStatus::Running
                    | JobStatus::Waiting => true,
                    JobStatus::Success => !ctx.store().children(row.id)?.is_empty(),
                    JobStatus::Error => false,
                };
                if relevant && row.parameters.equivalent(&parameters) {
                    duplicates.push((row.id, row.status));
                }
            }
            if !duplicates.is_empty() {
                return Err(Error::Validation(format!(
                    "Cannot create job because the parameters are the same as jobs \
                     that are queued, running or already have succeeded:\n{}",
                    duplicates
                        .iter()
                        .map(|(id, status)| format!("{id}: {status}"))
                        .join("\n")
                )));
            }
        }

        // concrete artifact values become input links right away; values
        // still pointing at a predecessor's output park in `pending`
        let mut pending = Pending::default();
        let mut input_artifacts = Vec::new();
        for (pname, kind) in command.parameters() {
            if *kind != ParamKind::Artifact && pname != "artifact" {
                continue;
            }
            match parameters.get(pname) {
                Some(ParameterValue::Scalar(value)) => {
                    if let Ok(artifact) = value.parse::<ArtifactId>() {
                        input_artifacts.push(artifact);
                    }
                }
                Some(ParameterValue::PredecessorOutput { job, output }) => {
                    pending
                        .entry(*job)
                        .or_default()
                        .insert(pname.clone(), output.clone());
                }
                _ => {}
            }
        }

        let id = ctx.store().insert_job(NewJob {
            user: user.to_string(),
            parameters,
            pending,
            input_artifacts,
        })?;
        trace!(job = %id, command = %command.name(), "created processing job");
        Ok(ProcessingJob { id })
    }

    fn row(&self, ctx: &Context) -> Result<JobRow> {
        ctx.store().job(self.id)
    }

    pub fn status(&self, ctx: &Context) -> Result<JobStatus> {
        Ok(self.row(ctx)?.status)
    }

    pub fn user(&self, ctx: &Context) -> Result<String> {
        Ok(self.row(ctx)?.user)
    }

    pub fn command(&self, ctx: &Context) -> Result<std::sync::Arc<CommandSpec>> {
        ctx.catalog().command(self.row(ctx)?.command)
    }

    pub fn parameters(&self, ctx: &Context) -> Result<Parameters> {
        Ok(self.row(ctx)?.parameters)
    }

    pub fn pending(&self, ctx: &Context) -> Result<Pending> {
        Ok(self.row(ctx)?.pending)
    }

    pub fn input_artifacts(&self, ctx: &Context) -> Result<Vec<ArtifactId>> {
        ctx.store().input_artifacts(self.id)
    }

    pub fn external_id(&self, ctx: &Context) -> Result<Option<String>> {
        Ok(self.row(ctx)?.external_id)
    }

    fn external_id_display(&self, ctx: &Context) -> Result<String> {
        Ok(self
            .external_id(ctx)?
            .unwrap_or_else(|| "Not Available".to_string()))
    }

    pub fn heartbeat(&self, ctx: &Context) -> Result<Option<DateTime<Utc>>> {
        Ok(self.row(ctx)?.heartbeat)
    }

    pub fn step(&self, ctx: &Context) -> Result<Option<String>> {
        Ok(self.row(ctx)?.step)
    }

    pub fn hidden(&self, ctx: &Context) -> Result<bool> {
        Ok(self.row(ctx)?.hidden)
    }

    pub fn log(&self, ctx: &Context) -> Result<Option<LogId>> {
        Ok(self.row(ctx)?.logging_ref)
    }

    pub fn children(&self, ctx: &Context) -> Result<Vec<ProcessingJob>> {
        Ok(ctx
            .store()
            .children(self.id)?
            .into_iter()
            .map(ProcessingJob::new)
            .collect())
    }

    pub fn validator_jobs(&self, ctx: &Context) -> Result<Vec<ProcessingJob>> {
        Ok(ctx
            .store()
            .validators_of(self.id)?
            .into_iter()
            .map(ProcessingJob::new)
            .collect())
    }

    /// The artifacts this job produced, keyed by output name. Success only.
    pub fn outputs(&self, ctx: &Context) -> Result<BTreeMap<String, ArtifactId>> {
        if self.status(ctx)? != JobStatus::Success {
            return Err(Error::OperationNotPermitted(
                "Can't return the outputs of a non-success job".into(),
            ));
        }
        let mut outputs = BTreeMap::new();
        for (output, artifact) in ctx.store().output_bindings(self.id)? {
            outputs.insert(ctx.catalog().output(output)?.name().clone(), artifact);
        }
        Ok(outputs)
    }

    /// Write a status, coupling the write with the notification decision.
    ///
    /// Leaving `success` and reverting `running` to `queued` are the two
    /// forbidden transitions.
    fn set_status_internal(
        &self,
        ctx: &Context,
        value: JobStatus,
        error_msg: Option<&str>,
    ) -> Result<()> {
        let row = self.row(ctx)?;
        if row.status == JobStatus::Success {
            return Err(Error::OperationNotPermitted(
                "Cannot change the status of a 'success' job".into(),
            ));
        }
        if row.status == JobStatus::Running && value == JobStatus::Queued {
            return Err(Error::OperationNotPermitted(
                "Cannot revert the status of a 'running' job to 'queued'".into(),
            ));
        }

        notify::dispatch(ctx, &row, value, error_msg);
        ctx.store().set_status(self.id, value)
    }

    /// Record liveness. Coerces `queued` to `running`; refuses once the job
    /// is past running.
    pub fn update_heartbeat(&self, ctx: &Context) -> Result<()> {
        match self.status(ctx)? {
            JobStatus::Queued => self.set_status_internal(ctx, JobStatus::Running, None)?,
            JobStatus::Running => {}
            _ => {
                return Err(Error::OperationNotPermitted(
                    "Can't execute heartbeat on job: already completed".into(),
                ))
            }
        }
        ctx.store().set_heartbeat(self.id, Utc::now())
    }

    pub fn set_step(&self, ctx: &Context, step: &str) -> Result<()> {
        if self.status(ctx)? != JobStatus::Running {
            return Err(Error::OperationNotPermitted(
                "Cannot change the step of a job whose status is not 'running'".into(),
            ));
        }
        ctx.store().set_step(self.id, Some(step.to_string()))
    }

    /// Hide an errored job from listings. Existence is untouched.
    pub fn hide(&self, ctx: &Context) -> Result<()> {
        let status = self.status(ctx)?;
        if status != JobStatus::Error {
            return Err(Error::OperationNotPermitted(format!(
                "Only jobs in error status can be hidden. Current status: {status}"
            )));
        }
        ctx.store().set_hidden(self.id, true)
    }

    /// The resource-allocation string for this job (§cluster submission).
    ///
    /// An unsatisfiable template fails the job and yields the
    /// [`resource::NOT_VALID`] marker instead of an allocation.
    pub fn resource_allocation_info(&self, ctx: &Context) -> Result<String> {
        match resource::resolve(ctx, &self.row(ctx)?)? {
            Resolved::Allocation(allocation) => Ok(allocation),
            Resolved::Invalid(message) => {
                self.set_error(ctx, &message)?;
                Ok(resource::NOT_VALID.to_string())
            }
        }
    }

    /// Submit the job for execution.
    pub async fn submit(&self, ctx: &Context) -> Result<()> {
        self.submit_with(ctx, None, Vec::new()).await
    }

    /// Submit with an optional parent dependency and a chain of dependents.
    ///
    /// On the cluster backend the dependents are submitted recursively, each
    /// held behind its predecessor with `afterok`; the local backend starts
    /// them concurrently.
    pub fn submit_with<'a>(
        &'a self,
        ctx: &'a Context,
        parent_external_id: Option<String>,
        mut dependents: Vec<ProcessingJob>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let row = self.row(ctx)?;
            if !matches!(
                row.status,
                JobStatus::InConstruction | JobStatus::Waiting
            ) {
                return Err(Error::OperationNotPermitted(format!(
                    "Can't submit job, not in 'in_construction' or 'waiting' status. \
                     Current status: {}",
                    row.status
                )));
            }
            if !row.pending.is_empty() {
                return Err(Error::OperationNotPermitted(format!(
                    "Can't submit job {}: parameters still pending on predecessor jobs",
                    self.id
                )));
            }

            // external processes observe the store, so the transition has to
            // be visible before anything is spawned
            self.set_status_internal(ctx, JobStatus::Queued, None)?;

            let command = ctx.catalog().command(row.command)?;
            let env_script = command.plugin().env_script().clone();
            let start_script = command.plugin().start_script().clone();
            let work_dir = launcher::job_work_dir(ctx.config(), self.id);
            let url = ctx.config().portal_url();

            let external_id = if env_script.contains("ENVIRONMENT")
                && !INLINE_EXEMPT_COMMANDS.contains(&command.name().as_str())
            {
                // the plugin reports its own scheduler id; it needs the job
                // in running state to take over
                self.set_status_internal(ctx, JobStatus::Running, None)?;
                tokio::fs::create_dir_all(&work_dir).await?;
                let cmd = format!(
                    "{}; {} {} {} {}",
                    env_script,
                    start_script,
                    url,
                    self.id,
                    work_dir.display()
                );
                let (stdout, stderr, code) = launcher::system_call(&cmd).await?;
                if code != 0 || !stderr.is_empty() {
                    self.set_error(ctx, &stderr)?;
                    None
                } else {
                    Some(stdout.trim().to_string())
                }
            } else {
                match ctx.config().plugin_launcher() {
                    LauncherKind::Local => {
                        let (pid, _supervisor) = launcher::local::launch(
                            ctx,
                            &env_script,
                            &start_script,
                            &url,
                            self.id,
                            &work_dir,
                        )
                        .await?;

                        // no chain semantics locally; dependents start as
                        // independent processes right away
                        for dependent in dependents.drain(..) {
                            dependent.set_status_internal(ctx, JobStatus::Queued, None)?;
                            let dep_command = ctx.catalog().command(dependent.row(ctx)?.command)?;
                            let dep_dir = launcher::job_work_dir(ctx.config(), dependent.id);
                            let (dep_pid, _s) = launcher::local::launch(
                                ctx,
                                dep_command.plugin().env_script(),
                                dep_command.plugin().start_script(),
                                &url,
                                dependent.id,
                                &dep_dir,
                            )
                            .await?;
                            ctx.store()
                                .set_external_id(dependent.id, &dep_pid.to_string())?;
                        }

                        Some(pid.to_string())
                    }

                    LauncherKind::Cluster => {
                        let resource_params = match self.resource_allocation_info(ctx) {
                            Ok(allocation) => allocation,
                            Err(e @ (Error::UnknownId { .. } | Error::Resource(_))) => {
                                self.set_error(ctx, &e.to_string())?;
                                return Ok(());
                            }
                            Err(e) => return Err(e),
                        };
                        if resource_params == resource::NOT_VALID {
                            // the job failed during resolution already
                            return Ok(());
                        }

                        let external_id = launcher::cluster::launch(
                            &env_script,
                            &start_script,
                            &url,
                            self.id,
                            &work_dir,
                            parent_external_id.as_deref(),
                            &resource_params,
                        )
                        .await?;

                        if !dependents.is_empty() {
                            let next = dependents.remove(0);
                            next.submit_with(ctx, Some(external_id.clone()), dependents)
                                .await?;
                        }

                        Some(external_id)
                    }
                }
            };

            if let Some(external_id) = external_id {
                ctx.store().set_external_id(self.id, &external_id)?;
            }
            Ok(())
        })
    }

    /// Complete the job.
    ///
    /// Success requires `running`. Definition commands produce their single
    /// artifact (or park it for the barrier); transformation and private
    /// commands fan out one validator per output.
    pub async fn complete(
        &self,
        ctx: &Context,
        success: bool,
        artifacts_data: Option<BTreeMap<String, ArtifactData>>,
        error: Option<&str>,
    ) -> Result<()> {
        if !success {
            return self.set_error(ctx, error.unwrap_or("Job failed"));
        }

        if self.status(ctx)? != JobStatus::Running {
            return Err(Error::OperationNotPermitted(
                "Can't complete job: not in a running state".into(),
            ));
        }

        let outputs = artifacts_data.unwrap_or_default();
        if outputs.is_empty() {
            return self.set_status_internal(ctx, JobStatus::Success, None);
        }

        if self.command(ctx)?.kind() == CommandKind::ArtifactDefinition {
            // a definition job creates one and only one artifact
            match outputs.into_values().next() {
                Some(data) => self.complete_artifact_definition(ctx, data).await,
                None => self.set_status_internal(ctx, JobStatus::Success, None),
            }
        } else {
            self.complete_artifact_transformation(ctx, outputs).await
        }
    }

    /// Attach an error log, cascade the failure through all descendants, and
    /// move to `error`.
    pub fn set_error(&self, ctx: &Context, error: &str) -> Result<()> {
        if self.status(ctx)? == JobStatus::Success {
            return Err(Error::OperationNotPermitted(
                "Can only set up the log for jobs whose status is 'error'".into(),
            ));
        }

        let log = ctx.log().record("Runtime", error)?;
        ctx.store().set_logging_ref(self.id, log)?;

        for child in self.children(ctx)? {
            if child.status(ctx)? == JobStatus::Success {
                continue;
            }
            child.set_error(ctx, &format!("Parent job '{}' failed.", self.id))?;
        }

        self.set_status_internal(ctx, JobStatus::Error, Some(error))
    }

    fn provenance(&self, ctx: &Context) -> Result<Option<Provenance>> {
        match self.row(ctx)?.parameters.scalar("provenance") {
            None => Ok(None),
            Some(raw) if raw.is_empty() || raw == "null" => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
        }
    }

    async fn complete_artifact_definition(&self, ctx: &Context, data: ArtifactData) -> Result<()> {
        let row = self.row(ctx)?;
        let params = &row.parameters;

        match self.provenance(ctx)? {
            Some(prov) if prov.direct_creation.unwrap_or(false) => {
                // artifact attached to an existing job outside regular
                // processing; no barrier involved
                let origin = ProcessingJob::new(prov.job);
                let origin_row = origin.row(ctx)?;
                let artifact = ctx.registry().create_artifact(
                    NewArtifact::builder()
                        .filepaths(data.filepaths)
                        .artifact_type(data.artifact_type)
                        .parents(ctx.store().input_artifacts(origin.id)?)
                        .processing_parameters(Some(origin_row.parameters.clone()))
                        .analysis(params.scalar("analysis").and_then(|s| s.parse().ok()))
                        .name(params.scalar("name").map(String::from))
                        .build(),
                )?;
                let output = prov.cmd_out_id.ok_or_else(|| {
                    Error::Validation(
                        "direct-creation provenance carries no command output".into(),
                    )
                })?;
                ctx.store()
                    .record_output_bindings(origin.id, &[(output, artifact)])?;
                self.set_status_internal(ctx, JobStatus::Success, None)
            }

            Some(prov) => {
                // regular validator: store the description, wait for the
                // parent's barrier to release it
                let info = match prov.data_type {
                    Some(data_type) => serde_json::to_value(StoredArtifactInfo::Wrapped {
                        data_type,
                        artifact_data: data,
                    })?,
                    None => serde_json::to_value(StoredArtifactInfo::Plain(data))?,
                };
                ctx.store().set_validator_info(self.id, info)?;
                self.set_status_internal(ctx, JobStatus::Waiting, None)
            }

            None => {
                // upload, or the initial artifact of an analysis
                let analysis = params.scalar("analysis").and_then(|s| s.parse().ok());
                let template = params.scalar("template").and_then(|s| s.parse().ok());
                let data_type = if analysis.is_some() {
                    params.scalar("data_type").map(String::from)
                } else if template.is_some() {
                    None
                } else {
                    Some("Job Output Folder".to_string())
                };

                let artifact_type = data.artifact_type.clone();
                let artifact = ctx.registry().create_artifact(
                    NewArtifact::builder()
                        .filepaths(data.filepaths)
                        .artifact_type(data.artifact_type)
                        .prep_template(template)
                        .analysis(analysis)
                        .data_type(data_type)
                        .name(params.scalar("name").map(String::from))
                        .build(),
                )?;

                let command = ctx.catalog().command(row.command)?;
                if let [output] = command.outputs().as_slice() {
                    ctx.store()
                        .record_output_bindings(self.id, &[(output.id(), artifact)])?;
                }
                self.set_status_internal(ctx, JobStatus::Success, None)?;

                // children hold a pending entry keyed by the artifact type
                let new_map = BTreeMap::from([(artifact_type, artifact)]);
                let ready = self.helper_update_children(ctx, &new_map)?;
                self.launch_ready_children(ctx, ready).await
            }
        }
    }

    async fn complete_artifact_transformation(
        &self,
        ctx: &Context,
        outputs: BTreeMap<String, ArtifactData>,
    ) -> Result<()> {
        let row = self.row(ctx)?;
        let command = ctx.catalog().command(row.command)?;

        // a validate job needs the preparation (or analysis) its data
        // belongs to; at most one preparation across the inputs is supported
        let inputs = ctx.store().input_artifacts(self.id)?;
        let mut templates = BTreeSet::new();
        for artifact in &inputs {
            templates.extend(
                ctx.registry()
                    .artifact(*artifact)?
                    .prep_templates()
                    .iter()
                    .copied(),
            );
        }
        let mut template = None;
        let mut analysis = None;
        if templates.len() > 1 {
            return Err(Error::Validation(format!(
                "Currently only single prep template is allowed, found {}",
                templates.len()
            )));
        } else if let Some(t) = templates.iter().next() {
            template = Some(*t);
        } else if let Some(first) = inputs.first() {
            analysis = *ctx.registry().artifact(*first)?.analysis();
        }

        let mut validators = Vec::new();
        for (out_name, data) in outputs {
            let mut filepaths: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (fp, fp_type) in &data.filepaths {
                filepaths.entry(fp_type.clone()).or_default().push(fp.clone());
            }

            let cmd_out = command.output_by_name(&out_name)?;
            let artifact_name = if command.naming_order().is_empty() {
                out_name.clone()
            } else {
                let suffix = command
                    .naming_order()
                    .iter()
                    .filter_map(|p| row.parameters.scalar(p))
                    .map(|v| v.rsplit('/').next().unwrap_or(v))
                    .join(" ");
                format!("{out_name} {suffix}")
            };

            let provenance = Provenance {
                job: self.id,
                cmd_out_id: Some(cmd_out.id()),
                name: Some(artifact_name),
                data_type: (command.kind() == CommandKind::Private)
                    .then(|| "Job Output Folder".to_string()),
                direct_creation: None,
            };

            let validate = ctx.catalog().validator_for(&data.artifact_type)?;
            let mut values = BTreeMap::new();
            values.insert(
                "files".to_string(),
                ParameterValue::scalar(serde_json::to_string(&filepaths)?),
            );
            values.insert(
                "artifact_type".to_string(),
                ParameterValue::scalar(data.artifact_type.clone()),
            );
            if let Some(template) = template {
                values.insert(
                    "template".to_string(),
                    ParameterValue::scalar(template.to_string()),
                );
            }
            if let Some(analysis) = analysis {
                values.insert(
                    "analysis".to_string(),
                    ParameterValue::scalar(analysis.to_string()),
                );
            }
            values.insert(
                "provenance".to_string(),
                ParameterValue::scalar(serde_json::to_string(&provenance)?),
            );

            validators.push(ProcessingJob::create(
                ctx,
                &row.user,
                Parameters::new(validate.id(), values),
                true,
            )?);
        }

        let listed = validators
            .iter()
            .map(|v| {
                v.external_id_display(ctx)
                    .map(|ext| format!("{} [{}]", v.id, ext))
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        self.set_step(
            ctx,
            &format!(
                "Validating outputs ({} remaining) via job(s) {}",
                validators.len(),
                listed
            ),
        )?;

        ctx.store().link_validators(
            self.id,
            &validators.iter().map(|v| v.id).collect::<Vec<_>>(),
        )?;

        // m validators ride as ceil(m/n) chains of at most n jobs
        let chain_len = ctx.config().job_scheduler_dependency_q_cnt();
        for mut chain in chain_partition(validators, chain_len) {
            if chain.is_empty() {
                continue;
            }
            let lead = chain.remove(0);
            lead.submit_with(ctx, None, chain).await?;
        }

        // the barrier runs as its own job
        let release_cmd = ctx.catalog().release_validators_command()?;
        let values = BTreeMap::from([(
            "job".to_string(),
            ParameterValue::scalar(self.id.to_string()),
        )]);
        let release_job = ProcessingJob::create(
            ctx,
            &row.user,
            Parameters::new(release_cmd.id(), values),
            false,
        )?;
        release_job.submit(ctx).await
    }

    /// Materialize this validator's artifact and succeed.
    ///
    /// Returns the `{command output -> artifact}` binding the parent
    /// assembles into its output map.
    pub fn release(&self, ctx: &Context) -> Result<BTreeMap<OutputId, ArtifactId>> {
        if self.command(ctx)?.kind() != CommandKind::ArtifactDefinition {
            return Err(Error::OperationNotPermitted(
                "Only artifact definition jobs can be released".into(),
            ));
        }

        let info = ctx
            .store()
            .validator_info(self.id)?
            .ok_or_else(|| Error::unknown_id("validator artifact info", self.id))?;
        let info: StoredArtifactInfo = serde_json::from_value(info)?;

        let prov = self.provenance(ctx)?.ok_or_else(|| {
            Error::Validation(format!("Validator {} carries no provenance", self.id))
        })?;
        let origin = ProcessingJob::new(prov.job);
        let origin_row = origin.row(ctx)?;

        let (new_artifact, cmd_out_id) = match info {
            StoredArtifactInfo::Wrapped {
                data_type,
                artifact_data,
            } => {
                // private origin: no parents or parameters carried over; an
                // analysis on the originating job replaces the output binding
                let origin_analysis = origin_row
                    .parameters
                    .scalar("analysis")
                    .and_then(|s| s.parse().ok());
                let (cmd_out_id, analysis) = match origin_analysis {
                    Some(analysis) => (None, Some(analysis)),
                    None => (prov.cmd_out_id, None),
                };
                (
                    NewArtifact::builder()
                        .filepaths(artifact_data.filepaths)
                        .artifact_type(artifact_data.artifact_type)
                        .analysis(analysis)
                        .data_type(Some(data_type))
                        .build(),
                    cmd_out_id,
                )
            }
            StoredArtifactInfo::Plain(artifact_data) => (
                NewArtifact::builder()
                    .filepaths(artifact_data.filepaths)
                    .artifact_type(artifact_data.artifact_type)
                    .parents(ctx.store().input_artifacts(origin.id)?)
                    .processing_parameters(Some(origin_row.parameters.clone()))
                    .name(prov.name.clone())
                    .build(),
                prov.cmd_out_id,
            ),
        };

        let artifact = ctx.registry().create_artifact(new_artifact)?;
        self.set_status_internal(ctx, JobStatus::Success, None)?;

        let mut mapping = BTreeMap::new();
        if let Some(output) = cmd_out_id {
            mapping.insert(output, artifact);
        }
        Ok(mapping)
    }

    /// The barrier: wait until every validator reached `waiting` or `error`,
    /// then either release them all or fail the family.
    pub async fn release_validators(&self, ctx: &Context) -> Result<()> {
        if !matches!(
            self.command(ctx)?.kind(),
            CommandKind::ArtifactTransformation | CommandKind::Private
        ) {
            return Err(Error::OperationNotPermitted(
                "Only artifact transformation and private jobs can release validators".into(),
            ));
        }

        loop {
            let mut remaining = Vec::new();
            for validator in self.validator_jobs(ctx)? {
                if !matches!(
                    validator.status(ctx)?,
                    JobStatus::Waiting | JobStatus::Error
                ) {
                    remaining.push(format!(
                        "{} [{}]",
                        validator.id,
                        validator.external_id_display(ctx)?
                    ));
                }
            }
            if remaining.is_empty() {
                break;
            }
            self.set_step(
                ctx,
                &format!(
                    "Validating outputs ({} remaining) via job(s) {}",
                    remaining.len(),
                    remaining.iter().join(", ")
                ),
            )?;
            tokio::time::sleep(VALIDATOR_POLL_INTERVAL).await;
        }

        let mut errored = Vec::new();
        let mut waiting = Vec::new();
        for validator in self.validator_jobs(ctx)? {
            match validator.status(ctx)? {
                JobStatus::Error => errored.push(validator),
                JobStatus::Waiting => waiting.push(validator),
                _ => {}
            }
        }

        if !errored.is_empty() {
            let mut messages = Vec::new();
            for validator in &errored {
                let message = match validator.log(ctx)? {
                    Some(log) => ctx.log().message(log)?,
                    None => String::new(),
                };
                messages.push(format!(
                    "Validator {} error message: {}",
                    validator.id, message
                ));
            }
            let common_error = messages.join("\n");

            let sister_error = format!(
                "{} sister validator jobs failed: {}",
                errored.len(),
                common_error
            );
            for validator in waiting {
                validator.set_error(ctx, &sister_error)?;
            }

            self.set_error(
                ctx,
                &format!("{} validator jobs failed: {}", errored.len(), common_error),
            )
        } else {
            // releasing materializes the artifacts; rollback of a failed
            // creation is the registry's business
            let mut mapping = BTreeMap::new();
            for validator in waiting {
                mapping.extend(validator.release(ctx)?);
            }

            if !mapping.is_empty() {
                let bindings: Vec<_> = mapping.iter().map(|(o, a)| (*o, *a)).collect();
                ctx.store().record_output_bindings(self.id, &bindings)?;
                self.update_and_launch_children(ctx, &mapping).await?;
            }

            self.set_status_internal(ctx, JobStatus::Success, None)
        }
    }

    async fn update_and_launch_children(
        &self,
        ctx: &Context,
        mapping: &BTreeMap<OutputId, ArtifactId>,
    ) -> Result<()> {
        let mut by_name = BTreeMap::new();
        for (output, artifact) in mapping {
            by_name.insert(ctx.catalog().output(*output)?.name().clone(), *artifact);
        }
        let ready = self.helper_update_children(ctx, &by_name)?;
        self.launch_ready_children(ctx, ready).await
    }

    /// Rewrite every child's placeholder parameters to the released
    /// artifacts. Returns the children whose pending map drained.
    fn helper_update_children(
        &self,
        ctx: &Context,
        new_map: &BTreeMap<String, ArtifactId>,
    ) -> Result<Vec<ProcessingJob>> {
        let mut ready = Vec::new();
        for child in self.children(ctx)? {
            let mut row = child.row(ctx)?;
            let links = match row.pending.remove(&self.id) {
                Some(links) => links,
                None => continue,
            };

            let mut params = row.parameters.clone();
            let mut new_inputs = Vec::new();
            for (pname, out_name) in links {
                let artifact = *new_map
                    .get(&out_name)
                    .ok_or_else(|| Error::unknown_id("command output", out_name.clone()))?;
                params.set(pname, ParameterValue::scalar(artifact.to_string()));
                new_inputs.push(artifact);
            }

            ctx.store()
                .update_parameters(child.id, &params, &row.pending, &new_inputs)?;
            if row.pending.is_empty() {
                ready.push(child);
            }
        }
        Ok(ready)
    }

    async fn launch_ready_children(&self, ctx: &Context, ready: Vec<ProcessingJob>) -> Result<()> {
        for child in ready {
            if matches!(
                child.status(ctx)?,
                JobStatus::InConstruction | JobStatus::Waiting
            ) {
                debug!(parent = %self.id, child = %child.id, "submitting ready child");
                child.submit(ctx).await?;
                tokio::time::sleep(CHILD_SUBMIT_DELAY).await;
            }
        }
        Ok(())
    }

    /// Non-public transition used by the workflow engine when it parks
    /// non-root jobs before the roots go out.
    pub(crate) fn park_waiting(&self, ctx: &Context) -> Result<()> {
        self.set_status_internal(ctx, JobStatus::Waiting, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use crate::testutil::TestBed;

    fn job_in(ctx: &crate::context::Context, status: JobStatus) -> ProcessingJob {
        let job = ProcessingJob::create(ctx, testutil::USER, testutil::transform_params(), true)
            .unwrap();
        ctx.store().set_status(job.id(), status).unwrap();
        job
    }

    #[test]
    fn permitted_transitions_succeed() {
        let TestBed { ctx, .. } = testutil::testbed();
        let permitted = [
            (JobStatus::InConstruction, JobStatus::Queued),
            (JobStatus::InConstruction, JobStatus::Waiting),
            (JobStatus::Queued, JobStatus::Running),
            (JobStatus::Queued, JobStatus::Error),
            (JobStatus::Running, JobStatus::Success),
            (JobStatus::Running, JobStatus::Waiting),
            (JobStatus::Running, JobStatus::Error),
            (JobStatus::Waiting, JobStatus::Queued),
            (JobStatus::Waiting, JobStatus::Success),
            (JobStatus::Waiting, JobStatus::Error),
        ];
        for (from, to) in permitted {
            let job = job_in(&ctx, from);
            job.set_status_internal(&ctx, to, None)
                .unwrap_or_else(|e| panic!("{from} -> {to} should be permitted: {e}"));
            assert_eq!(job.status(&ctx).unwrap(), to);
        }
    }

    #[test]
    fn success_is_terminal_and_running_never_reverts_to_queued() {
        let TestBed { ctx, .. } = testutil::testbed();
        for to in [
            JobStatus::InConstruction,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Waiting,
            JobStatus::Error,
        ] {
            let job = job_in(&ctx, JobStatus::Success);
            let err = job.set_status_internal(&ctx, to, None).unwrap_err();
            assert!(
                matches!(err, Error::OperationNotPermitted(_)),
                "success -> {to} must be refused"
            );
        }

        let job = job_in(&ctx, JobStatus::Running);
        let err = job
            .set_status_internal(&ctx, JobStatus::Queued, None)
            .unwrap_err();
        assert!(matches!(err, Error::OperationNotPermitted(_)));
    }

    #[test]
    fn heartbeat_coerces_queued_to_running_and_refuses_terminal() {
        let TestBed { ctx, .. } = testutil::testbed();

        let job = job_in(&ctx, JobStatus::Queued);
        assert!(job.heartbeat(&ctx).unwrap().is_none());
        job.update_heartbeat(&ctx).unwrap();
        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Running);
        assert!(job.heartbeat(&ctx).unwrap().is_some());

        // idempotent while running
        job.update_heartbeat(&ctx).unwrap();
        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Running);

        let done = job_in(&ctx, JobStatus::Success);
        assert!(matches!(
            done.update_heartbeat(&ctx).unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
    }

    #[test]
    fn step_is_settable_only_while_running() {
        let TestBed { ctx, .. } = testutil::testbed();

        let job = job_in(&ctx, JobStatus::Running);
        job.set_step(&ctx, "demultiplexing").unwrap();
        assert_eq!(job.step(&ctx).unwrap().as_deref(), Some("demultiplexing"));

        let queued = job_in(&ctx, JobStatus::Queued);
        assert!(matches!(
            queued.set_step(&ctx, "nope").unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
    }

    #[test]
    fn hide_requires_error_status() {
        let TestBed { ctx, .. } = testutil::testbed();

        let job = job_in(&ctx, JobStatus::Error);
        assert!(!job.hidden(&ctx).unwrap());
        job.hide(&ctx).unwrap();
        assert!(job.hidden(&ctx).unwrap());

        let running = job_in(&ctx, JobStatus::Running);
        assert!(matches!(
            running.hide(&ctx).unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
    }

    #[test]
    fn duplicate_guard_refuses_equivalent_parameters() {
        let TestBed { ctx, .. } = testutil::testbed();

        let first =
            ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), false)
                .unwrap();

        for status in [
            JobStatus::InConstruction,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Waiting,
        ] {
            ctx.store().set_status(first.id(), status).unwrap();
            let err =
                ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), false)
                    .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "guard must hold in {status}");
            assert!(err.to_string().contains(&first.id().to_string()));
        }

        // success without children is re-runnable
        ctx.store()
            .set_status(first.id(), JobStatus::Success)
            .unwrap();
        let again =
            ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), false)
                .unwrap();

        // success with children is not
        ctx.store().add_edges(&[(first.id(), again.id())]).unwrap();
        assert!(ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), false)
            .is_err());

        // force overrides the guard entirely
        ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), true).unwrap();
    }

    #[test]
    fn duplicate_guard_compares_case_insensitively() {
        let TestBed { ctx, .. } = testutil::testbed();

        let mut params = testutil::transform_params();
        params.set("barcode_type", ParameterValue::scalar("GOLAY_12"));
        ProcessingJob::create(&ctx, testutil::USER, params, false).unwrap();

        assert!(
            ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), false)
                .is_err()
        );
    }

    #[test]
    fn create_links_inputs_and_parks_placeholders() {
        let TestBed { ctx, .. } = testutil::testbed();

        let producer =
            ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), true)
                .unwrap();
        assert_eq!(
            producer.input_artifacts(&ctx).unwrap(),
            vec![testutil::ARTIFACT_PREP]
        );
        assert!(producer.pending(&ctx).unwrap().is_empty());

        let held = Parameters::new(
            testutil::CMD_CHILD,
            [
                (
                    "in".to_string(),
                    ParameterValue::PredecessorOutput {
                        job: producer.id(),
                        output: "o2".to_string(),
                    },
                ),
                ("reference".to_string(), ParameterValue::scalar("gg_13_8")),
            ]
            .into_iter()
            .collect(),
        );
        let child = ProcessingJob::create(&ctx, testutil::USER, held, true).unwrap();
        assert!(child.input_artifacts(&ctx).unwrap().is_empty());
        let pending = child.pending(&ctx).unwrap();
        assert_eq!(pending[&producer.id()]["in"], "o2");
    }

    #[tokio::test]
    async fn submit_refuses_jobs_with_pending_parameters() {
        let TestBed { ctx, .. } = testutil::testbed();

        let producer =
            ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), true)
                .unwrap();
        let held = Parameters::new(
            testutil::CMD_CHILD,
            [(
                "in".to_string(),
                ParameterValue::PredecessorOutput {
                    job: producer.id(),
                    output: "o2".to_string(),
                },
            )]
            .into_iter()
            .collect(),
        );
        let child = ProcessingJob::create(&ctx, testutil::USER, held, true).unwrap();

        let err = child.submit(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::OperationNotPermitted(_)));
        assert_eq!(child.status(&ctx).unwrap(), JobStatus::InConstruction);
    }

    #[tokio::test]
    async fn submit_refuses_outside_construction_or_waiting() {
        let TestBed { ctx, .. } = testutil::testbed();
        for status in [JobStatus::Queued, JobStatus::Running, JobStatus::Success] {
            let job = job_in(&ctx, status);
            assert!(matches!(
                job.submit(&ctx).await.unwrap_err(),
                Error::OperationNotPermitted(_)
            ));
        }
    }

    #[tokio::test]
    async fn local_submission_records_the_pid() {
        let TestBed { ctx, .. } = testutil::testbed();

        let job = ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), true)
            .unwrap();
        job.submit(&ctx).await.unwrap();

        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Queued);
        let external_id = job.external_id(&ctx).unwrap().expect("pid assigned");
        external_id.parse::<u32>().expect("pid is numeric");

        assert_eq!(
            ProcessingJob::by_external_id(&ctx, &external_id).unwrap(),
            Some(job)
        );
        assert_eq!(ProcessingJob::by_external_id(&ctx, "nope").unwrap(), None);
    }

    #[tokio::test]
    async fn environment_plugins_report_their_own_external_id() {
        let TestBed { ctx, catalog, .. } = testutil::testbed();
        catalog.insert(
            crate::platform::CommandSpec::builder()
                .id(40)
                .name("Woltka".to_string())
                .plugin(
                    crate::platform::PluginSpec::builder()
                        .name("woltka".to_string())
                        .env_script("export ENVIRONMENT=prod".to_string())
                        .start_script("echo".to_string())
                        .kind(CommandKind::ArtifactTransformation)
                        .build(),
                )
                .build(),
        );

        let job =
            ProcessingJob::create(&ctx, testutil::USER, Parameters::new(40, Default::default()), true)
                .unwrap();
        job.submit(&ctx).await.unwrap();

        // the inline path leaves the job running and takes stdout as the id
        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Running);
        let expected = format!(
            "{} {} {}",
            ctx.config().portal_url(),
            job.id(),
            crate::launcher::job_work_dir(ctx.config(), job.id()).display()
        );
        assert_eq!(job.external_id(&ctx).unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn environment_plugins_with_stderr_fail_without_external_id() {
        let TestBed { ctx, catalog, .. } = testutil::testbed();
        catalog.insert(
            crate::platform::CommandSpec::builder()
                .id(41)
                .name("Woltka".to_string())
                .plugin(
                    crate::platform::PluginSpec::builder()
                        .name("woltka".to_string())
                        .env_script("export ENVIRONMENT=prod".to_string())
                        .start_script("echo broken >&2; true".to_string())
                        .kind(CommandKind::ArtifactTransformation)
                        .build(),
                )
                .build(),
        );

        let job =
            ProcessingJob::create(&ctx, testutil::USER, Parameters::new(41, Default::default()), true)
                .unwrap();
        job.submit(&ctx).await.unwrap();

        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Error);
        assert_eq!(job.external_id(&ctx).unwrap(), None);
    }

    #[tokio::test]
    async fn failing_local_children_error_the_job() {
        let TestBed { ctx, .. } = testutil::testbed();

        let job = job_in(&ctx, JobStatus::Running);
        let work_dir = crate::launcher::job_work_dir(ctx.config(), job.id());
        let (_pid, supervisor) = crate::launcher::local::launch(
            &ctx,
            "true",
            "false",
            "url",
            job.id(),
            &work_dir,
        )
        .await
        .unwrap();
        supervisor.await.unwrap();

        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Error);
        let log = job.log(&ctx).unwrap().expect("log attached");
        assert!(ctx
            .log()
            .message(log)
            .unwrap()
            .contains("error from local launcher"));
    }

    #[test]
    fn failures_cascade_through_all_descendants() {
        let TestBed { ctx, .. } = testutil::testbed();

        let parent = job_in(&ctx, JobStatus::Running);
        let child = job_in(&ctx, JobStatus::Waiting);
        let grandchild = job_in(&ctx, JobStatus::Waiting);
        ctx.store()
            .add_edges(&[(parent.id(), child.id()), (child.id(), grandchild.id())])
            .unwrap();

        parent.set_error(&ctx, "boom").unwrap();

        assert_eq!(parent.status(&ctx).unwrap(), JobStatus::Error);
        for dependent in [child, grandchild] {
            assert_eq!(dependent.status(&ctx).unwrap(), JobStatus::Error);
            let log = dependent.log(&ctx).unwrap().expect("log attached");
            assert!(ctx
                .log()
                .message(log)
                .unwrap()
                .contains(&format!("Parent job '{}' failed.", parent.id())));
        }
    }

    #[test]
    fn chain_partition_produces_ceil_m_over_n_chains() {
        let partition = chain_partition(vec![1, 2, 3], 2);
        assert_eq!(partition, vec![vec![1, 2], vec![3]]);

        let partition = chain_partition(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(partition.len(), 3);
        assert!(partition.iter().all(|chain| chain.len() <= 2));

        let partition = chain_partition(vec![1, 2], 5);
        assert_eq!(partition, vec![vec![1, 2]]);

        assert!(chain_partition(Vec::<u8>::new(), 2).is_empty());
    }

    #[tokio::test]
    async fn definition_completion_without_provenance_creates_and_binds() {
        let TestBed { ctx, registry, .. } = testutil::testbed();

        let job = ProcessingJob::create(&ctx, testutil::USER, testutil::upload_params(), false)
            .unwrap();
        job.submit(&ctx).await.unwrap();
        job.update_heartbeat(&ctx).unwrap();

        job.complete(
            &ctx,
            true,
            Some(BTreeMap::from([(
                "out".to_string(),
                testutil::biom_payload("/data/new/table.biom"),
            )])),
            None,
        )
        .await
        .unwrap();

        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Success);
        assert!(job.validator_jobs(&ctx).unwrap().is_empty());

        let outputs = job.outputs(&ctx).unwrap();
        assert_eq!(outputs.len(), 1);
        let artifact = outputs["out"];

        let created = registry.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].prep_template, Some(testutil::PREP));
        drop(created);

        // terminal: nothing may change anymore
        assert!(matches!(
            job.complete(&ctx, true, None, None).await.unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
        assert!(artifact > 100);
    }

    #[tokio::test]
    async fn direct_creation_binds_the_artifact_to_the_originating_job() {
        let TestBed { ctx, registry, .. } = testutil::testbed();

        let origin =
            ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), true)
                .unwrap();

        let provenance = Provenance {
            job: origin.id(),
            cmd_out_id: Some(testutil::OUT_O1),
            name: None,
            data_type: None,
            direct_creation: Some(true),
        };
        let params = Parameters::new(
            testutil::CMD_UPLOAD,
            BTreeMap::from([(
                "provenance".to_string(),
                ParameterValue::scalar(serde_json::to_string(&provenance).unwrap()),
            )]),
        );
        let job = ProcessingJob::create(&ctx, testutil::USER, params, true).unwrap();
        ctx.store().set_status(job.id(), JobStatus::Running).unwrap();

        job.complete(
            &ctx,
            true,
            Some(BTreeMap::from([(
                "out".to_string(),
                testutil::biom_payload("/direct/table.biom"),
            )])),
            None,
        )
        .await
        .unwrap();

        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Success);
        assert!(job.validator_jobs(&ctx).unwrap().is_empty());

        let bindings = ctx.store().output_bindings(origin.id()).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].0, testutil::OUT_O1);

        let created = registry.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        // the new artifact descends from the originating job's inputs
        assert_eq!(created[0].parents, vec![testutil::ARTIFACT_PREP]);
    }

    #[tokio::test]
    async fn completion_without_outputs_is_a_plain_success() {
        let TestBed { ctx, .. } = testutil::testbed();
        let job = job_in(&ctx, JobStatus::Running);
        job.complete(&ctx, true, None, None).await.unwrap();
        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Success);
    }

    #[tokio::test]
    async fn completion_requires_running() {
        let TestBed { ctx, .. } = testutil::testbed();
        let job = job_in(&ctx, JobStatus::Queued);
        assert!(matches!(
            job.complete(&ctx, true, None, None).await.unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
    }

    #[test]
    fn release_is_for_definition_jobs_only() {
        let TestBed { ctx, .. } = testutil::testbed();
        let job = job_in(&ctx, JobStatus::Waiting);
        assert!(matches!(
            job.release(&ctx).unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
    }

    #[test]
    fn outputs_require_success() {
        let TestBed { ctx, .. } = testutil::testbed();
        let job = job_in(&ctx, JobStatus::Running);
        assert!(matches!(
            job.outputs(&ctx).unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
    }
}
