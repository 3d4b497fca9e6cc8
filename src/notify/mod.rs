//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Status-transition notifications.
//!
//! Every status write asks this module whether an email goes out. The
//! decision filters (waiting writes, opted-out users, internal machinery
//! commands) live in [`message_for`]; delivery and the sysadmin escalation
//! live in [`dispatch`]. A rendering failure is never allowed to abort the
//! state transition that triggered it.

use std::collections::BTreeSet;

use itertools::Itertools;
use tracing::warn;

use crate::context::Context;
use crate::db::models::JobRow;
use crate::error::Error;
use crate::error::Result;
use crate::job::JobStatus;
use crate::platform::CommandKind;
use crate::platform::CMD_COMPLETE_JOB;
use crate::platform::CMD_RELEASE_VALIDATORS;
use crate::platform::CMD_VALIDATE;

const IGNORED_COMMANDS: [&str; 3] = [CMD_VALIDATE, CMD_COMPLETE_JOB, CMD_RELEASE_VALIDATORS];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// Decide and render the notification for a status write, `None` when the
/// transition is not notification-worthy.
pub fn message_for(
    ctx: &Context,
    job: &JobRow,
    status: JobStatus,
    error_msg: Option<&str>,
) -> Result<Option<Notification>> {
    if status == JobStatus::Waiting {
        return Ok(None);
    }

    let user = ctx.users().user(&job.user)?;
    if !user.receive_processing_job_emails() {
        return Ok(None);
    }

    let cmd = ctx.catalog().command(job.command)?;
    if cmd.kind() == CommandKind::ArtifactDefinition {
        return Ok(None);
    }
    if IGNORED_COMMANDS.contains(&cmd.name().as_str()) {
        return Ok(None);
    }

    let external_id = job
        .external_id
        .clone()
        .unwrap_or_else(|| "Not Available".to_string());
    let subject = format!("{}: {}, {} [{}]", cmd.name(), status, job.id, external_id);

    let base_url = ctx.config().base_url().as_str().trim_end_matches('/').to_string();
    let inputs = ctx.store().input_artifacts(job.id)?;
    let mut message = String::new();

    if inputs.is_empty() {
        // admin machinery without input artifacts; show what ran
        message = format!(
            "Admin Job {} {}\n",
            cmd.name(),
            serde_json::to_string(job.parameters.values())?
        );
    } else {
        for artifact in inputs {
            let info = ctx.registry().artifact(artifact)?;
            if !info.prep_templates().is_empty() {
                let preps = info
                    .prep_templates()
                    .iter()
                    .map(|p| ctx.registry().prep_template(*p))
                    .collect::<Result<Vec<_>>>()?;

                let study_ids: BTreeSet<_> = preps.iter().map(|p| p.study()).collect();
                if study_ids.len() > 1 {
                    return Err(Error::Validation(format!(
                        "More than one Study ID was found: {study_ids:?}"
                    )));
                }
                let study = preps[0].study();

                let prep_ids: BTreeSet<_> = preps.iter().map(|p| p.id()).collect();
                let study_url = if prep_ids.len() == 1 {
                    format!(
                        "{base_url}/study/description/{study}?prep_id={}",
                        preps[0].id()
                    )
                } else {
                    format!("{base_url}/study/description/{study}")
                };

                let data_types: BTreeSet<_> =
                    preps.iter().map(|p| p.data_type().clone()).collect();
                if data_types.len() > 1 {
                    return Err(Error::Validation(format!(
                        "More than one data type was found: {data_types:?}"
                    )));
                }

                message = format!(
                    "{}\nPrep IDs: {}\n{}\nData Type: {}\n",
                    cmd.name(),
                    prep_ids.iter().join(", "),
                    study_url,
                    data_types.iter().join(", "),
                );
            } else if let Some(analysis) = info.analysis() {
                message = format!(
                    "Analysis Job {}\n{base_url}/analysis/description/{analysis}/\n",
                    cmd.name()
                );
            } else {
                return Err(Error::Validation(
                    "Cannot render notification: input artifact has neither a preparation nor an analysis".into(),
                ));
            }
        }
    }

    message.push_str(&format!("New status: {status}"));
    if status == JobStatus::Error {
        if let Some(error_msg) = error_msg {
            message.push_str(&format!("\n\nError:\n{error_msg}"));
        }
    }

    Ok(Some(Notification {
        subject,
        body: message,
    }))
}

/// Render and deliver; failures are logged and swallowed so the status write
/// they ride on always lands.
pub fn dispatch(ctx: &Context, job: &JobRow, status: JobStatus, error_msg: Option<&str>) {
    let notification = match message_for(ctx, job, status, error_msg) {
        Ok(Some(n)) => n,
        Ok(None) => return,
        Err(e) => {
            warn!(job = %job.id, error = %e, "cannot render status notification");
            return;
        }
    };

    if let Err(e) = ctx
        .mailer()
        .send(&job.user, &notification.subject, &notification.body)
    {
        warn!(job = %job.id, error = %e, "cannot deliver status notification");
    }

    if status == JobStatus::Error {
        let escalate = ctx
            .users()
            .user(&job.user)
            .map(|u| u.level().is_admin())
            .unwrap_or(false);
        if escalate {
            if let Err(e) = ctx.mailer().send(
                ctx.config().sysadmin_email(),
                &notification.subject,
                &notification.body,
            ) {
                warn!(job = %job.id, error = %e, "cannot escalate error notification");
            }
        }
    }
}
