//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::db::models::JobRow;
use crate::db::models::LogRow;
use crate::db::models::NewJob;
use crate::db::models::WorkflowRow;
use crate::db::store::LogSink;
use crate::db::store::Store;
use crate::error::Error;
use crate::error::Result;
use crate::job::JobStatus;
use crate::job::Parameters;
use crate::job::Pending;
use crate::platform::ArtifactId;
use crate::platform::CommandId;
use crate::platform::LogId;
use crate::platform::OutputId;
use crate::platform::WorkflowId;

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, JobRow>,
    edges: Vec<(Uuid, Uuid)>,
    inputs: Vec<(ArtifactId, Uuid)>,
    validators: HashMap<Uuid, Vec<Uuid>>,
    validator_info: HashMap<Uuid, serde_json::Value>,
    bindings: Vec<(Uuid, OutputId, ArtifactId)>,
    workflows: HashMap<WorkflowId, WorkflowRow>,
    next_workflow_id: WorkflowId,
    allocations: HashMap<(String, String), String>,
    logs: HashMap<LogId, LogRow>,
    next_log_id: LogId,
}

/// The in-process store adapter.
///
/// One mutex over all tables makes every trait method an atomic transaction,
/// which is exactly the transaction granularity the trait promises. Backends
/// with a real relational engine live with the persistence layer, outside
/// this crate.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // a poisoned table mutex means a panic mid-transaction; nothing
        // sensible can continue from there
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_job<R>(&self, id: Uuid, f: impl FnOnce(&mut JobRow) -> R) -> Result<R> {
        let mut t = self.lock();
        t.jobs
            .get_mut(&id)
            .map(f)
            .ok_or_else(|| Error::unknown_id("processing job", id))
    }
}

impl Store for MemoryStore {
    fn insert_job(&self, job: NewJob) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut t = self.lock();
        for artifact in &job.input_artifacts {
            t.inputs.push((*artifact, id));
        }
        t.jobs.insert(
            id,
            JobRow {
                id,
                user: job.user,
                command: job.parameters.command(),
                parameters: job.parameters,
                pending: job.pending,
                status: JobStatus::InConstruction,
                external_id: None,
                heartbeat: None,
                step: None,
                logging_ref: None,
                hidden: false,
            },
        );
        Ok(id)
    }

    fn job(&self, id: Uuid) -> Result<JobRow> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::unknown_id("processing job", id))
    }

    fn job_exists(&self, id: Uuid) -> Result<bool> {
        Ok(self.lock().jobs.contains_key(&id))
    }

    fn jobs_with_command(&self, command: CommandId) -> Result<Vec<JobRow>> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|j| j.command == command)
            .cloned()
            .collect())
    }

    fn job_by_external_id(&self, external_id: &str) -> Result<Option<Uuid>> {
        Ok(self
            .lock()
            .jobs
            .values()
            .find(|j| j.external_id.as_deref() == Some(external_id))
            .map(|j| j.id))
    }

    fn set_status(&self, id: Uuid, status: JobStatus) -> Result<()> {
        self.with_job(id, |j| j.status = status)
    }

    fn set_external_id(&self, id: Uuid, external_id: &str) -> Result<()> {
        self.with_job(id, |j| {
            if j.external_id.is_some() {
                return Err(Error::OperationNotPermitted(format!(
                    "external id of job {id} is already assigned"
                )));
            }
            j.external_id = Some(external_id.to_string());
            Ok(())
        })?
    }

    fn set_heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with_job(id, |j| j.heartbeat = Some(at))
    }

    fn set_step(&self, id: Uuid, step: Option<String>) -> Result<()> {
        self.with_job(id, |j| j.step = step)
    }

    fn set_logging_ref(&self, id: Uuid, log: LogId) -> Result<()> {
        self.with_job(id, |j| j.logging_ref = Some(log))
    }

    fn set_hidden(&self, id: Uuid, hidden: bool) -> Result<()> {
        self.with_job(id, |j| j.hidden = hidden)
    }

    fn update_parameters(
        &self,
        id: Uuid,
        parameters: &Parameters,
        pending: &Pending,
        new_inputs: &[ArtifactId],
    ) -> Result<()> {
        let mut t = self.lock();
        let job = t
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::unknown_id("processing job", id))?;
        job.parameters = parameters.clone();
        job.pending = pending.clone();
        for artifact in new_inputs {
            t.inputs.push((*artifact, id));
        }
        Ok(())
    }

    fn add_edges(&self, edges: &[(Uuid, Uuid)]) -> Result<()> {
        self.lock().edges.extend_from_slice(edges);
        Ok(())
    }

    fn children(&self, id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .lock()
            .edges
            .iter()
            .filter(|(p, _)| *p == id)
            .map(|(_, c)| *c)
            .collect())
    }

    fn link_input(&self, artifact: ArtifactId, job: Uuid) -> Result<()> {
        self.lock().inputs.push((artifact, job));
        Ok(())
    }

    fn input_artifacts(&self, id: Uuid) -> Result<Vec<ArtifactId>> {
        let mut artifacts: Vec<_> = self
            .lock()
            .inputs
            .iter()
            .filter(|(_, j)| *j == id)
            .map(|(a, _)| *a)
            .collect();
        artifacts.sort_unstable();
        Ok(artifacts)
    }

    fn link_validators(&self, job: Uuid, validators: &[Uuid]) -> Result<()> {
        self.lock()
            .validators
            .entry(job)
            .or_default()
            .extend_from_slice(validators);
        Ok(())
    }

    fn validators_of(&self, job: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.lock().validators.get(&job).cloned().unwrap_or_default())
    }

    fn set_validator_info(&self, validator: Uuid, info: serde_json::Value) -> Result<()> {
        self.lock().validator_info.insert(validator, info);
        Ok(())
    }

    fn validator_info(&self, validator: Uuid) -> Result<Option<serde_json::Value>> {
        Ok(self.lock().validator_info.get(&validator).cloned())
    }

    fn record_output_bindings(
        &self,
        job: Uuid,
        bindings: &[(OutputId, ArtifactId)],
    ) -> Result<()> {
        let mut t = self.lock();
        for (output, artifact) in bindings {
            t.bindings.push((job, *output, *artifact));
        }
        Ok(())
    }

    fn output_bindings(&self, job: Uuid) -> Result<Vec<(OutputId, ArtifactId)>> {
        Ok(self
            .lock()
            .bindings
            .iter()
            .filter(|(j, _, _)| *j == job)
            .map(|(_, o, a)| (*o, *a))
            .collect())
    }

    fn insert_workflow(&self, user: &str, name: &str, roots: &[Uuid]) -> Result<WorkflowId> {
        let mut t = self.lock();
        t.next_workflow_id += 1;
        let id = t.next_workflow_id;
        t.workflows.insert(
            id,
            WorkflowRow {
                id,
                user: user.to_string(),
                name: name.to_string(),
                roots: roots.to_vec(),
            },
        );
        Ok(id)
    }

    fn workflow(&self, id: WorkflowId) -> Result<WorkflowRow> {
        self.lock()
            .workflows
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::unknown_id("processing workflow", id))
    }

    fn add_workflow_root(&self, workflow: WorkflowId, job: Uuid) -> Result<()> {
        let mut t = self.lock();
        t.workflows
            .get_mut(&workflow)
            .ok_or_else(|| Error::unknown_id("processing workflow", workflow))?
            .roots
            .push(job);
        Ok(())
    }

    fn remove_job(&self, id: Uuid) -> Result<()> {
        let mut t = self.lock();
        if t.jobs.remove(&id).is_none() {
            return Err(Error::unknown_id("processing job", id));
        }
        t.edges.retain(|(_, c)| *c != id);
        t.inputs.retain(|(_, j)| *j != id);
        for wf in t.workflows.values_mut() {
            wf.roots.retain(|r| *r != id);
        }
        Ok(())
    }

    fn allocation(&self, name: &str, job_type: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .allocations
            .get(&(name.to_string(), job_type.to_string()))
            .cloned())
    }

    fn set_allocation(&self, name: &str, job_type: &str, template: &str) -> Result<()> {
        crate::resource::validate_template(template)?;
        self.lock()
            .allocations
            .insert((name.to_string(), job_type.to_string()), template.to_string());
        Ok(())
    }
}

impl LogSink for MemoryStore {
    fn record(&self, severity: &str, message: &str) -> Result<LogId> {
        let mut t = self.lock();
        t.next_log_id += 1;
        let id = t.next_log_id;
        t.logs.insert(
            id,
            LogRow {
                id,
                severity: severity.to_string(),
                message: message.to_string(),
                created: Utc::now(),
            },
        );
        Ok(id)
    }

    fn message(&self, id: LogId) -> Result<String> {
        self.lock()
            .logs
            .get(&id)
            .map(|l| l.message.clone())
            .ok_or_else(|| Error::unknown_id("log entry", id))
    }
}
