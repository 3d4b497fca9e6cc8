//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::db::models::JobRow;
use crate::db::models::NewJob;
use crate::db::models::WorkflowRow;
use crate::error::Result;
use crate::job::JobStatus;
use crate::job::Parameters;
use crate::job::Pending;
use crate::platform::ArtifactId;
use crate::platform::CommandId;
use crate::platform::LogId;
use crate::platform::OutputId;
use crate::platform::WorkflowId;

/// Transactional persistence of jobs, edges, validator links, workflows and
/// output bindings.
///
/// Every method is one transaction: either all of its writes land, or none
/// do. Compound updates that must be atomic (rewriting a child's parameters
/// together with its pending map and input links, recording a batch of output
/// bindings) are therefore single methods instead of call sequences.
pub trait Store: Send + Sync {
    // -- jobs ----------------------------------------------------------------

    fn insert_job(&self, job: NewJob) -> Result<Uuid>;

    fn job(&self, id: Uuid) -> Result<JobRow>;

    fn job_exists(&self, id: Uuid) -> Result<bool>;

    /// All jobs running the given command, regardless of status. Input for
    /// the duplicate-job guard.
    fn jobs_with_command(&self, command: CommandId) -> Result<Vec<JobRow>>;

    /// Reverse lookup by launcher-assigned id. Absence is `None`, not an
    /// empty handle.
    fn job_by_external_id(&self, external_id: &str) -> Result<Option<Uuid>>;

    fn set_status(&self, id: Uuid, status: JobStatus) -> Result<()>;

    /// Record the launcher-assigned id. At most one assignment per job.
    fn set_external_id(&self, id: Uuid, external_id: &str) -> Result<()>;

    fn set_heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    fn set_step(&self, id: Uuid, step: Option<String>) -> Result<()>;

    fn set_logging_ref(&self, id: Uuid, log: LogId) -> Result<()>;

    fn set_hidden(&self, id: Uuid, hidden: bool) -> Result<()>;

    /// Rewrite a job's parameters and pending map and link any newly
    /// concrete input artifacts, atomically.
    fn update_parameters(
        &self,
        id: Uuid,
        parameters: &Parameters,
        pending: &Pending,
        new_inputs: &[ArtifactId],
    ) -> Result<()>;

    // -- edges & inputs ------------------------------------------------------

    fn add_edges(&self, edges: &[(Uuid, Uuid)]) -> Result<()>;

    fn children(&self, id: Uuid) -> Result<Vec<Uuid>>;

    fn link_input(&self, artifact: ArtifactId, job: Uuid) -> Result<()>;

    /// Input artifacts of a job, ordered by artifact id
    fn input_artifacts(&self, id: Uuid) -> Result<Vec<ArtifactId>>;

    // -- validators ----------------------------------------------------------

    fn link_validators(&self, job: Uuid, validators: &[Uuid]) -> Result<()>;

    fn validators_of(&self, job: Uuid) -> Result<Vec<Uuid>>;

    fn set_validator_info(&self, validator: Uuid, info: serde_json::Value) -> Result<()>;

    fn validator_info(&self, validator: Uuid) -> Result<Option<serde_json::Value>>;

    // -- output bindings -----------------------------------------------------

    fn record_output_bindings(&self, job: Uuid, bindings: &[(OutputId, ArtifactId)])
        -> Result<()>;

    fn output_bindings(&self, job: Uuid) -> Result<Vec<(OutputId, ArtifactId)>>;

    // -- workflows -----------------------------------------------------------

    fn insert_workflow(&self, user: &str, name: &str, roots: &[Uuid]) -> Result<WorkflowId>;

    fn workflow(&self, id: WorkflowId) -> Result<WorkflowRow>;

    fn add_workflow_root(&self, workflow: WorkflowId, job: Uuid) -> Result<()>;

    /// Remove a job row together with its child-side edges, workflow-root
    /// entries and input links.
    fn remove_job(&self, id: Uuid) -> Result<()>;

    // -- resource allocations ------------------------------------------------

    fn allocation(&self, name: &str, job_type: &str) -> Result<Option<String>>;

    /// Insert or replace an allocation template. Implementations validate the
    /// template's expression fragments here, so broken arithmetic is rejected
    /// at load time rather than at submission time.
    fn set_allocation(&self, name: &str, job_type: &str, template: &str) -> Result<()>;
}

/// The logging sink for user-visible job errors.
pub trait LogSink: Send + Sync {
    fn record(&self, severity: &str, message: &str) -> Result<LogId>;

    fn message(&self, id: LogId) -> Result<String>;
}
