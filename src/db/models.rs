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

use crate::job::JobStatus;
use crate::job::Parameters;
use crate::job::Pending;
use crate::platform::ArtifactId;
use crate::platform::CommandId;
use crate::platform::LogId;
use crate::platform::WorkflowId;

/// One row of the processing-job table.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: Uuid,
    pub user: String,
    pub command: CommandId,
    pub parameters: Parameters,
    pub pending: Pending,
    pub status: JobStatus,
    pub external_id: Option<String>,
    pub heartbeat: Option<DateTime<Utc>>,
    pub step: Option<String>,
    pub logging_ref: Option<LogId>,
    pub hidden: bool,
}

/// Insertable job row; the store assigns the UUID.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user: String,
    pub parameters: Parameters,
    pub pending: Pending,
    pub input_artifacts: Vec<ArtifactId>,
}

#[derive(Debug, Clone)]
pub struct WorkflowRow {
    pub id: WorkflowId,
    pub user: String,
    pub name: String,
    pub roots: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct LogRow {
    pub id: LogId,
    pub severity: String,
    pub message: String,
    pub created: DateTime<Utc>,
}
