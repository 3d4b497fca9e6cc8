//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The out-of-process scheduler watcher.
//!
//! The watcher polls the cluster's XML job listing, keeps the last snapshot
//! per external id, and posts every change over an event channel. When a job
//! completes with a non-zero exit status and other jobs were held behind it
//! (`beforeok`), those are reported as `DROPPED` so the orchestrator can fail
//! them; the scheduler itself silently discards them.
//!
//! Communication is one SPSC event channel plus a watch-channel shutdown
//! sentinel; the watcher shares no state with the orchestrator.

use std::collections::HashMap;
use std::time::Duration;

use lazy_static::lazy_static;
use parse_display::Display;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::config::Configuration;
use crate::context::Context;
use crate::error::Result;
use crate::job::JobStatus;
use crate::job::ProcessingJob;
use crate::launcher::system_call;

/// The scheduler status listing command. Probed once at startup; a failing
/// probe shuts the watcher down immediately.
const STATUS_CMD: &str = "qstat -x";

lazy_static! {
    static ref JOB_RE: Regex = Regex::new(r"(?s)<Job>(.*?)</Job>").unwrap();
    static ref ID_RE: Regex = Regex::new(r"<Job_Id>(.*?)</Job_Id>").unwrap();
    static ref NAME_RE: Regex = Regex::new(r"<Job_Name>(.*?)</Job_Name>").unwrap();
    static ref STATE_RE: Regex = Regex::new(r"<job_state>(.*?)</job_state>").unwrap();
    static ref EXIT_RE: Regex = Regex::new(r"<exit_status>(.*?)</exit_status>").unwrap();
    static ref DEPEND_RE: Regex = Regex::new(r"<depend>(.*?)</depend>").unwrap();
}

/// The scheduler's native state vocabulary
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    #[display("completed")]
    Completed,
    #[display("exiting")]
    Exiting,
    #[display("held")]
    Held,
    #[display("queued")]
    Queued,
    #[display("running")]
    Running,
    #[display("moving")]
    Moving,
    #[display("waiting")]
    Waiting,
    #[display("suspended")]
    Suspended,
    /// Synthesized for jobs the scheduler discarded because the job they
    /// were held behind failed
    #[display("DROPPED")]
    Dropped,
}

impl SchedulerState {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "C" => Some(SchedulerState::Completed),
            "E" => Some(SchedulerState::Exiting),
            "H" => Some(SchedulerState::Held),
            "Q" => Some(SchedulerState::Queued),
            "R" => Some(SchedulerState::Running),
            "T" => Some(SchedulerState::Moving),
            "W" => Some(SchedulerState::Waiting),
            "S" => Some(SchedulerState::Suspended),
            _ => None,
        }
    }

    /// Translate to the orchestrator's status vocabulary. `Completed` has no
    /// direct translation: completion always arrives through the plugin's
    /// own completion call.
    pub fn as_job_status(self) -> Option<JobStatus> {
        match self {
            SchedulerState::Completed => None,
            SchedulerState::Held | SchedulerState::Queued => Some(JobStatus::Queued),
            SchedulerState::Exiting
            | SchedulerState::Running
            | SchedulerState::Moving
            | SchedulerState::Waiting
            | SchedulerState::Suspended => Some(JobStatus::Running),
            SchedulerState::Dropped => Some(JobStatus::Error),
        }
    }
}

/// One observation of one scheduler job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub external_id: String,
    pub name: String,
    pub state: SchedulerState,
    pub exit_status: Option<i32>,
    pub depend: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// The scheduler is unreachable; the watcher is gone
    Quit,
    Update(JobSnapshot),
}

/// The pure diffing core of the watcher: feed it one XML listing at a time,
/// get back the snapshots that changed.
pub struct Poller {
    owner_tag: String,
    seen: HashMap<String, JobSnapshot>,
}

impl Poller {
    pub fn new(owner: &str) -> Self {
        Poller {
            owner_tag: format!("<Job_Owner>{owner}</Job_Owner>"),
            seen: HashMap::new(),
        }
    }

    pub fn observe(&mut self, listing: &str) -> Vec<JobSnapshot> {
        let mut changed = Vec::new();

        for captures in JOB_RE.captures_iter(listing) {
            let item = &captures[1];
            if !item.contains(&self.owner_tag) {
                continue;
            }

            let external_id = match extract(&ID_RE, item) {
                Some(id) => id,
                None => {
                    warn!("scheduler listing entry without a Job_Id, skipping");
                    continue;
                }
            };
            let name = match extract(&NAME_RE, item) {
                Some(name) => name,
                None => {
                    warn!(job = %external_id, "scheduler entry without a Job_Name, skipping");
                    continue;
                }
            };
            let state = match extract(&STATE_RE, item).as_deref().and_then(SchedulerState::from_code)
            {
                Some(state) => state,
                None => {
                    warn!(job = %external_id, "scheduler entry with unknown job_state, skipping");
                    continue;
                }
            };

            // completed entries carry the exit status we need for drop
            // propagation
            let exit_status = if state == SchedulerState::Completed {
                match extract(&EXIT_RE, item).and_then(|s| s.parse().ok()) {
                    Some(status) => Some(status),
                    None => {
                        warn!(job = %external_id, "completed entry without exit_status, skipping");
                        continue;
                    }
                }
            } else {
                None
            };

            let snapshot = JobSnapshot {
                external_id: external_id.clone(),
                name,
                state,
                exit_status,
                depend: extract(&DEPEND_RE, item),
            };

            if self.seen.get(&external_id) == Some(&snapshot) {
                continue;
            }
            self.seen.insert(external_id, snapshot.clone());
            let failed = snapshot.state == SchedulerState::Completed
                && snapshot.exit_status != Some(0);
            let depend = failed.then(|| snapshot.depend.clone()).flatten();
            changed.push(snapshot);
            if let Some(depend) = depend {
                self.drop_dependents(&depend, &mut changed);
            }
        }

        changed
    }

    /// A failed job takes its `beforeok` dependents with it: every held child
    /// we track is re-emitted as `DROPPED`.
    fn drop_dependents(&mut self, depend: &str, changed: &mut Vec<JobSnapshot>) {
        let children = match depend.strip_prefix("beforeok:") {
            Some(children) => children,
            None => return,
        };
        for child in children.split(|c| c == ':' || c == ',') {
            // ids are listed as <id>@<server>; the server part is noise here
            let child_id = child.split('@').next().unwrap_or(child);
            if let Some(held) = self.seen.get_mut(child_id) {
                held.state = SchedulerState::Dropped;
                changed.push(held.clone());
            } else {
                trace!(child = %child_id, "dropped child is not tracked, ignoring");
            }
        }
    }
}

fn extract(re: &Regex, item: &str) -> Option<String> {
    re.captures(item).map(|c| c[1].to_string())
}

/// The long-running watcher process.
pub struct SchedulerWatcher {
    owner: String,
    poll_interval: Duration,
    status_cmd: String,
}

pub struct WatcherHandle {
    pub events: mpsc::UnboundedReceiver<WatcherEvent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Poison pill: the watcher posts a final `Quit` and exits.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl SchedulerWatcher {
    pub fn new(config: &Configuration) -> Self {
        SchedulerWatcher {
            owner: config.job_scheduler_owner().clone(),
            poll_interval: Duration::from_secs(config.job_scheduler_poll_val()),
            status_cmd: STATUS_CMD.to_string(),
        }
    }

    /// Override the status command (fakes in tests, site-specific wrappers in
    /// production).
    pub fn with_status_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.status_cmd = cmd.into();
        self
    }

    pub fn spawn(self) -> WatcherHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(events_tx, shutdown_rx));
        WatcherHandle {
            events: events_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(
        self,
        events: mpsc::UnboundedSender<WatcherEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // probe once; without a scheduler there is nothing to watch
        match system_call(&self.status_cmd).await {
            Ok((_, _, 0)) => {}
            _ => {
                warn!(cmd = %self.status_cmd, "scheduler status command unavailable");
                let _ = events.send(WatcherEvent::Quit);
                return;
            }
        }

        let mut poller = Poller::new(&self.owner);
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("watcher shutdown requested");
                    let _ = events.send(WatcherEvent::Quit);
                    return;
                }
                _ = interval.tick() => {
                    match system_call(&self.status_cmd).await {
                        Ok((stdout, _, 0)) => {
                            for snapshot in poller.observe(&stdout) {
                                trace!(job = %snapshot.external_id, state = %snapshot.state, "state change");
                                if events.send(WatcherEvent::Update(snapshot)).is_err() {
                                    // receiver is gone, so is our purpose
                                    return;
                                }
                            }
                        }
                        _ => {
                            let _ = events.send(WatcherEvent::Quit);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Reconcile one watcher snapshot into the job table.
pub fn apply_snapshot(ctx: &Context, snapshot: &JobSnapshot) -> Result<()> {
    let job = match ProcessingJob::by_external_id(ctx, &snapshot.external_id)? {
        Some(job) => job,
        None => {
            trace!(external_id = %snapshot.external_id, "snapshot for a job we do not own");
            return Ok(());
        }
    };

    match snapshot.state.as_job_status() {
        Some(JobStatus::Error) => job.set_error(
            ctx,
            &format!(
                "Job {} was dropped by the scheduler",
                snapshot.external_id
            ),
        ),
        Some(JobStatus::Running) => {
            if matches!(job.status(ctx)?, JobStatus::Queued | JobStatus::Running) {
                job.update_heartbeat(ctx)
            } else {
                Ok(())
            }
        }
        // queued snapshots and completions reconcile through their own paths
        _ => Ok(()),
    }
}


#[cfg(test)]
mod reconcile_tests {
    use super::*;
    use crate::testutil;
    use crate::testutil::TestBed;

    fn queued_job_with_external_id(
        ctx: &crate::context::Context,
        external_id: &str,
    ) -> ProcessingJob {
        let job = ProcessingJob::create(ctx, testutil::USER, testutil::transform_params(), true)
            .unwrap();
        ctx.store().set_status(job.id(), JobStatus::Queued).unwrap();
        ctx.store().set_external_id(job.id(), external_id).unwrap();
        job
    }

    #[test]
    fn dropped_snapshots_fail_the_held_job() {
        let TestBed { ctx, .. } = testutil::testbed();
        let parent = queued_job_with_external_id(&ctx, "31");
        let child = queued_job_with_external_id(&ctx, "32");
        ctx.store().add_edges(&[(parent.id(), child.id())]).unwrap();

        let mut poller = Poller::new("ordino");
        poller.observe(
            "<Job><Job_Id>32</Job_Id><Job_Name>v1</Job_Name>\
             <Job_Owner>ordino</Job_Owner><job_state>H</job_state></Job>",
        );
        let events = poller.observe(
            "<Job><Job_Id>31</Job_Id><Job_Name>lead</Job_Name>\
             <Job_Owner>ordino</Job_Owner><job_state>C</job_state>\
             <exit_status>1</exit_status>\
             <depend>beforeok:32@cluster.example.org</depend></Job>",
        );

        for event in &events {
            apply_snapshot(&ctx, event).unwrap();
        }

        assert_eq!(child.status(&ctx).unwrap(), JobStatus::Error);
        let log = child.log(&ctx).unwrap().expect("log attached");
        assert!(ctx
            .log()
            .message(log)
            .unwrap()
            .contains("dropped by the scheduler"));
        // the parent's completion itself is left to the regular completion path
        assert_eq!(parent.status(&ctx).unwrap(), JobStatus::Queued);
    }

    #[test]
    fn running_snapshots_double_as_heartbeats() {
        let TestBed { ctx, .. } = testutil::testbed();
        let job = queued_job_with_external_id(&ctx, "51");

        let snapshot = JobSnapshot {
            external_id: "51".to_string(),
            name: "j".to_string(),
            state: SchedulerState::Running,
            exit_status: None,
            depend: None,
        };
        apply_snapshot(&ctx, &snapshot).unwrap();

        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Running);
        assert!(job.heartbeat(&ctx).unwrap().is_some());
    }

    #[test]
    fn snapshots_for_foreign_jobs_are_ignored() {
        let TestBed { ctx, .. } = testutil::testbed();
        let snapshot = JobSnapshot {
            external_id: "9999".to_string(),
            name: "foreign".to_string(),
            state: SchedulerState::Dropped,
            exit_status: None,
            depend: None,
        };
        apply_snapshot(&ctx, &snapshot).unwrap();
    }
}
