//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

mod template;

pub use template::Connection;
pub use template::Connections;
pub use template::WorkflowTemplate;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::VecDeque;

use daggy::petgraph;
use daggy::petgraph::visit::EdgeRef;
use daggy::Dag;
use daggy::NodeIndex;
use itertools::Itertools;
use tracing::debug;
use uuid::Uuid;

use crate::context::Context;
use crate::error::Error;
use crate::error::Result;
use crate::job::JobStatus;
use crate::job::ParameterValue;
use crate::job::Parameters;
use crate::job::ProcessingJob;
use crate::platform::CommandId;
use crate::platform::WorkflowId;

/// The materialized job graph of one workflow: every job reachable from the
/// workflow roots, with the parent/child edges between them.
pub struct WorkflowGraph {
    dag: Dag<Uuid, ()>,
    index: HashMap<Uuid, NodeIndex>,
}

impl WorkflowGraph {
    pub fn jobs(&self) -> impl Iterator<Item = ProcessingJob> + '_ {
        self.dag
            .graph()
            .node_indices()
            .map(|ix| ProcessingJob::new(self.dag.graph()[ix]))
    }

    pub fn len(&self) -> usize {
        self.dag.graph().node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, job: Uuid) -> bool {
        self.index.contains_key(&job)
    }

    pub fn in_degree(&self, job: Uuid) -> usize {
        self.index
            .get(&job)
            .map(|ix| {
                self.dag
                    .graph()
                    .neighbors_directed(*ix, petgraph::Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }
}

/// A user-defined DAG of processing jobs.
///
/// A workflow is editable (`add`/`remove`) exactly while every root job is
/// still `in_construction`; the first `submit` freezes it for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingWorkflow {
    id: WorkflowId,
}

impl ProcessingWorkflow {
    pub fn new(id: WorkflowId) -> Self {
        ProcessingWorkflow { id }
    }

    pub fn id(&self) -> WorkflowId {
        self.id
    }

    pub fn name(&self, ctx: &Context) -> Result<String> {
        Ok(ctx.store().workflow(self.id)?.name)
    }

    pub fn user(&self, ctx: &Context) -> Result<String> {
        Ok(ctx.store().workflow(self.id)?.user)
    }

    pub fn roots(&self, ctx: &Context) -> Result<Vec<ProcessingJob>> {
        Ok(ctx
            .store()
            .workflow(self.id)?
            .roots
            .into_iter()
            .map(ProcessingJob::new)
            .collect())
    }

    fn common_creation_steps(
        ctx: &Context,
        user: &str,
        roots: &[ProcessingJob],
        name: Option<&str>,
    ) -> Result<Self> {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("{}'s workflow", ctx.users().user(user)?.name()),
        };
        let root_ids: Vec<Uuid> = roots.iter().map(|j| j.id()).collect();
        let id = ctx.store().insert_workflow(user, &name, &root_ids)?;
        debug!(workflow = id, roots = root_ids.len(), "created workflow");
        Ok(ProcessingWorkflow { id })
    }

    /// Single-root workflow around one freshly created job.
    pub fn from_scratch(
        ctx: &Context,
        user: &str,
        parameters: Parameters,
        name: Option<&str>,
        force: bool,
    ) -> Result<Self> {
        let job = ProcessingJob::create(ctx, user, parameters, force)?;
        Self::common_creation_steps(ctx, user, &[job], name)
    }

    /// Instantiate a workflow template: one job per node, visited in
    /// topological order so every edge can point at an already-created
    /// predecessor.
    ///
    /// `required` carries the parameter values for the template's root
    /// commands; its key set must match the root command set exactly.
    pub fn from_default(
        ctx: &Context,
        user: &str,
        template: &WorkflowTemplate,
        required: &BTreeMap<CommandId, BTreeMap<String, ParameterValue>>,
        name: Option<&str>,
        force: bool,
    ) -> Result<Self> {
        let graph = template.dag().graph();

        let root_nodes: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|ix| {
                graph
                    .neighbors_directed(*ix, petgraph::Direction::Incoming)
                    .count()
                    == 0
            })
            .collect();

        let root_commands: BTreeSet<CommandId> = root_nodes
            .iter()
            .map(|ix| graph[*ix].command())
            .collect();
        let required_commands: BTreeSet<CommandId> = required.keys().copied().collect();
        if root_commands != required_commands {
            let mut error_msg = String::from(
                "Provided required parameters do not match the initial set of \
                 commands for the workflow.",
            );
            let command_names = |ids: Vec<CommandId>| -> Result<String> {
                Ok(ids
                    .into_iter()
                    .map(|c| {
                        ctx.catalog()
                            .command(c)
                            .map(|spec| spec.name().clone())
                    })
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .join(", "))
            };
            let missing: Vec<_> = root_commands.difference(&required_commands).copied().collect();
            if !missing.is_empty() {
                error_msg.push_str(&format!(
                    " Command(s) \"{}\" are missing the required parameter set.",
                    command_names(missing)?
                ));
            }
            let extra: Vec<_> = required_commands.difference(&root_commands).copied().collect();
            if !extra.is_empty() {
                error_msg.push_str(&format!(
                    " Parameters for command(s) \"{}\" have been provided, but they \
                     are not the initial commands for the workflow.",
                    command_names(extra)?
                ));
            }
            return Err(Error::Validation(error_msg));
        }

        let mut node_to_job: HashMap<NodeIndex, ProcessingJob> = HashMap::new();
        for ix in &root_nodes {
            let dflt = &graph[*ix];
            let job = ProcessingJob::create(
                ctx,
                user,
                Parameters::from_default(dflt, &required[&dflt.command()], None),
                force,
            )?;
            node_to_job.insert(*ix, job);
        }
        let roots: Vec<ProcessingJob> = root_nodes
            .iter()
            .map(|ix| node_to_job[ix])
            .collect();

        let order = petgraph::algo::toposort(graph, None)
            .map_err(|_| Error::Validation("Workflow template contains a cycle".into()))?;
        for ix in order {
            if node_to_job.contains_key(&ix) {
                // already visited as a root
                continue;
            }

            // every incoming edge contributes the placeholders that thread
            // the predecessor's artifacts into this job
            let mut job_required: BTreeMap<String, ParameterValue> = BTreeMap::new();
            let mut parent_ids = Vec::new();
            for edge in graph.edges_directed(ix, petgraph::Direction::Incoming) {
                let source_job = node_to_job[&edge.source()];
                parent_ids.push(source_job.id());
                for link in edge.weight().links() {
                    job_required.insert(
                        link.sink_param().clone(),
                        ParameterValue::PredecessorOutput {
                            job: source_job.id(),
                            output: link.source_output().clone(),
                        },
                    );
                }
            }

            let job = ProcessingJob::create(
                ctx,
                user,
                Parameters::from_default(&graph[ix], &job_required, None),
                force,
            )?;
            let edges: Vec<(Uuid, Uuid)> =
                parent_ids.into_iter().map(|p| (p, job.id())).collect();
            ctx.store().add_edges(&edges)?;
            node_to_job.insert(ix, job);
        }

        Self::common_creation_steps(ctx, user, &roots, name)
    }

    /// Load the job graph from the store.
    pub fn graph(&self, ctx: &Context) -> Result<WorkflowGraph> {
        let row = ctx.store().workflow(self.id)?;
        let mut dag: Dag<Uuid, ()> = Dag::new();
        let mut index: HashMap<Uuid, NodeIndex> = HashMap::new();
        let mut queue: VecDeque<Uuid> = VecDeque::new();

        for root in &row.roots {
            index.entry(*root).or_insert_with(|| {
                queue.push_back(*root);
                dag.add_node(*root)
            });
        }

        while let Some(job) = queue.pop_front() {
            for child in ctx.store().children(job)? {
                let child_ix = *index.entry(child).or_insert_with(|| {
                    queue.push_back(child);
                    dag.add_node(child)
                });
                let parent_ix = index[&job];
                dag.add_edge(parent_ix, child_ix, ())
                    .map_err(|_| Error::Validation("Workflow graph contains a cycle".into()))?;
            }
        }

        Ok(WorkflowGraph { dag, index })
    }

    /// A workflow is editable only while every root job is still
    /// `in_construction`.
    fn raise_if_not_in_construction(&self, ctx: &Context) -> Result<()> {
        let row = ctx.store().workflow(self.id)?;
        let statuses: BTreeSet<JobStatus> = row
            .roots
            .iter()
            .map(|root| ProcessingJob::new(*root).status(ctx))
            .collect::<Result<_>>()?;
        let in_construction = statuses.len() == 1 && statuses.contains(&JobStatus::InConstruction);
        if !statuses.is_empty() && !in_construction {
            return Err(Error::OperationNotPermitted(
                "Workflow not in construction".into(),
            ));
        }
        Ok(())
    }

    /// Append a job, wired to its in-workflow predecessors via `connections`
    /// (`source job -> {source output -> sink parameter}`).
    pub fn add(
        &self,
        ctx: &Context,
        dflt_params: &crate::job::DefaultParameters,
        connections: Option<&BTreeMap<ProcessingJob, BTreeMap<String, String>>>,
        req_params: Option<&BTreeMap<String, ParameterValue>>,
        opt_params: Option<&BTreeMap<String, ParameterValue>>,
        force: bool,
    ) -> Result<ProcessingJob> {
        self.raise_if_not_in_construction(ctx)?;

        let graph = self.graph(ctx)?;
        let mut current_artifacts = 0;
        for job in graph.jobs() {
            let command = ctx.catalog().command(job.parameters(ctx)?.command())?;
            current_artifacts += command.outputs().len();
        }
        let to_add_artifacts = ctx
            .catalog()
            .command(dflt_params.command())?
            .outputs()
            .len();
        let total_artifacts = current_artifacts + to_add_artifacts;
        let max_artifacts = ctx.config().max_artifacts_in_workflow();
        if total_artifacts > max_artifacts {
            return Err(Error::Validation(format!(
                "Cannot add new job because it will create more artifacts (current: \
                 {current_artifacts} + new: {to_add_artifacts} = {total_artifacts}) \
                 that what is allowed in a single workflow ({max_artifacts})"
            )));
        }

        let user = self.user(ctx)?;
        match connections {
            Some(connections) => {
                let mut required = req_params.cloned().unwrap_or_default();
                for (source, mapping) in connections {
                    for (output, in_param) in mapping {
                        required.insert(
                            in_param.clone(),
                            ParameterValue::PredecessorOutput {
                                job: source.id(),
                                output: output.clone(),
                            },
                        );
                    }
                }

                let job = ProcessingJob::create(
                    ctx,
                    &user,
                    Parameters::from_default(dflt_params, &required, opt_params),
                    force,
                )?;
                let edges: Vec<(Uuid, Uuid)> = connections
                    .keys()
                    .map(|source| (source.id(), job.id()))
                    .collect();
                ctx.store().add_edges(&edges)?;
                Ok(job)
            }
            None => {
                // no in-workflow dependency: the new job is another root
                let required = req_params.cloned().unwrap_or_default();
                let job = ProcessingJob::create(
                    ctx,
                    &user,
                    Parameters::from_default(dflt_params, &required, opt_params),
                    force,
                )?;
                ctx.store().add_workflow_root(self.id, job.id())?;
                Ok(job)
            }
        }
    }

    /// Remove a job. A job with children needs `cascade`, which removes the
    /// whole subtree below it first.
    pub fn remove(&self, ctx: &Context, job: ProcessingJob, cascade: bool) -> Result<()> {
        self.raise_if_not_in_construction(ctx)?;
        self.remove_subtree(ctx, job, cascade)
    }

    fn remove_subtree(&self, ctx: &Context, job: ProcessingJob, cascade: bool) -> Result<()> {
        let children = job.children(ctx)?;
        if !children.is_empty() {
            if !cascade {
                return Err(Error::OperationNotPermitted(format!(
                    "Can't remove job '{}': it has children",
                    job.id()
                )));
            }
            for child in children {
                self.remove_subtree(ctx, child, true)?;
            }
        }
        ctx.store().remove_job(job.id())
    }

    /// Submit the workflow: park every non-root in `waiting`, then send the
    /// roots into the launcher pipeline.
    ///
    /// Parking happens first; otherwise a fast-completing root could try to
    /// submit a child the engine has not touched yet.
    pub async fn submit(&self, ctx: &Context) -> Result<()> {
        self.raise_if_not_in_construction(ctx)?;

        let graph = self.graph(ctx)?;
        let mut roots = Vec::new();
        for job in graph.jobs() {
            if graph.in_degree(job.id()) == 0 {
                roots.push(job);
            } else {
                job.park_waiting(ctx)?;
            }
        }

        for root in roots {
            root.submit(ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ArtifactData;
    use crate::job::DefaultParameters;
    use crate::job::Provenance;
    use crate::testutil;
    use crate::testutil::TestBed;

    fn pipeline_template() -> WorkflowTemplate {
        let mut template = WorkflowTemplate::new("closed-reference pipeline");
        let root = template.add_job(DefaultParameters::new(
            testutil::CMD_TRANSFORM,
            BTreeMap::from([(
                "barcode_type".to_string(),
                ParameterValue::scalar("golay_12"),
            )]),
        ));
        let child = template.add_job(DefaultParameters::new(
            testutil::CMD_CHILD,
            BTreeMap::from([(
                "reference".to_string(),
                ParameterValue::scalar("gg_13_8"),
            )]),
        ));
        template.connect(root, child, vec![("o2", "in")]).unwrap();
        template
    }

    fn root_required() -> BTreeMap<CommandId, BTreeMap<String, ParameterValue>> {
        BTreeMap::from([(
            testutil::CMD_TRANSFORM,
            BTreeMap::from([(
                "input".to_string(),
                ParameterValue::scalar(testutil::ARTIFACT_PREP.to_string()),
            )]),
        )])
    }

    fn build_pipeline(
        ctx: &crate::context::Context,
    ) -> (ProcessingWorkflow, ProcessingJob, ProcessingJob) {
        let workflow = ProcessingWorkflow::from_default(
            ctx,
            testutil::USER,
            &pipeline_template(),
            &root_required(),
            Some("test pipeline"),
            false,
        )
        .unwrap();
        let roots = workflow.roots(ctx).unwrap();
        assert_eq!(roots.len(), 1);
        let root = roots[0];
        let children = root.children(ctx).unwrap();
        assert_eq!(children.len(), 1);
        (workflow, root, children[0])
    }

    fn payloads() -> BTreeMap<String, ArtifactData> {
        BTreeMap::from([
            ("o1".to_string(), testutil::biom_payload("/out/o1/table.biom")),
            ("o2".to_string(), testutil::biom_payload("/out/o2/table.biom")),
            ("o3".to_string(), testutil::biom_payload("/out/o3/table.biom")),
        ])
    }

    fn validator_output_name(
        ctx: &crate::context::Context,
        validator: &ProcessingJob,
    ) -> String {
        let parameters = validator.parameters(ctx).unwrap();
        let provenance: Provenance =
            serde_json::from_str(parameters.scalar("provenance").unwrap()).unwrap();
        provenance.name.unwrap()
    }

    #[test]
    fn from_default_threads_outputs_into_child_parameters() {
        let TestBed { ctx, .. } = testutil::testbed();
        let (workflow, root, child) = build_pipeline(&ctx);

        assert_eq!(workflow.name(&ctx).unwrap(), "test pipeline");
        assert_eq!(workflow.user(&ctx).unwrap(), testutil::USER);

        let root_params = root.parameters(&ctx).unwrap();
        assert_eq!(
            root_params.scalar("input"),
            Some(testutil::ARTIFACT_PREP.to_string().as_str())
        );
        assert_eq!(root_params.scalar("barcode_type"), Some("golay_12"));

        let child_params = child.parameters(&ctx).unwrap();
        assert_eq!(
            child_params.get("in"),
            Some(&ParameterValue::PredecessorOutput {
                job: root.id(),
                output: "o2".to_string(),
            })
        );
        assert_eq!(child.pending(&ctx).unwrap()[&root.id()]["in"], "o2");

        let graph = workflow.graph(&ctx).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.in_degree(root.id()), 0);
        assert_eq!(graph.in_degree(child.id()), 1);
    }

    #[test]
    fn from_default_names_after_the_user_when_unnamed() {
        let TestBed { ctx, .. } = testutil::testbed();
        let workflow = ProcessingWorkflow::from_default(
            &ctx,
            testutil::USER,
            &pipeline_template(),
            &root_required(),
            None,
            false,
        )
        .unwrap();
        assert_eq!(workflow.name(&ctx).unwrap(), "Demo User's workflow");
    }

    #[test]
    fn from_default_rejects_mismatched_required_parameters() {
        let TestBed { ctx, .. } = testutil::testbed();

        let required = BTreeMap::from([(
            testutil::CMD_CHILD,
            BTreeMap::from([("in".to_string(), ParameterValue::scalar("1"))]),
        )]);
        let err = ProcessingWorkflow::from_default(
            &ctx,
            testutil::USER,
            &pipeline_template(),
            &required,
            None,
            false,
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("do not match the initial set of commands"));
        assert!(message.contains("Split libraries"));
        assert!(message.contains("Pick closed-reference OTUs"));
    }

    #[tokio::test]
    async fn submit_parks_children_before_queueing_roots() {
        let TestBed { ctx, .. } = testutil::testbed();
        let (workflow, root, child) = build_pipeline(&ctx);

        workflow.submit(&ctx).await.unwrap();

        assert_eq!(root.status(&ctx).unwrap(), JobStatus::Queued);
        assert_eq!(child.status(&ctx).unwrap(), JobStatus::Waiting);
        assert!(root.external_id(&ctx).unwrap().is_some());
        assert!(child.external_id(&ctx).unwrap().is_none());
    }

    #[tokio::test]
    async fn construction_operations_fail_once_submitted() {
        let TestBed { ctx, .. } = testutil::testbed();
        let (workflow, root, child) = build_pipeline(&ctx);
        workflow.submit(&ctx).await.unwrap();

        let dflt = DefaultParameters::new(
            testutil::CMD_UPLOAD,
            BTreeMap::from([(
                "template".to_string(),
                ParameterValue::scalar(testutil::PREP.to_string()),
            )]),
        );
        assert!(matches!(
            workflow.add(&ctx, &dflt, None, None, None, false).unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
        assert!(matches!(
            workflow.remove(&ctx, child, false).unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
        assert!(matches!(
            workflow.submit(&ctx).await.unwrap_err(),
            Error::OperationNotPermitted(_)
        ));
        let _ = root;
    }

    #[test]
    fn remove_requires_cascade_for_parents() {
        let TestBed { ctx, .. } = testutil::testbed();
        let (workflow, root, child) = build_pipeline(&ctx);

        let err = workflow.remove(&ctx, root, false).unwrap_err();
        assert!(err.to_string().contains("it has children"));

        workflow.remove(&ctx, root, true).unwrap();
        assert!(!ctx.store().job_exists(root.id()).unwrap());
        assert!(!ctx.store().job_exists(child.id()).unwrap());
        assert!(workflow.graph(&ctx).unwrap().is_empty());
    }

    #[test]
    fn add_enforces_the_workflow_artifact_cap() {
        let TestBed { ctx, .. } = testutil::testbed_with("max_artifacts_in_workflow = 4");

        let workflow = ProcessingWorkflow::from_scratch(
            &ctx,
            testutil::USER,
            testutil::transform_params(),
            None,
            false,
        )
        .unwrap();

        // 3 existing outputs + 1 fits exactly
        let child_dflt = DefaultParameters::new(
            testutil::CMD_CHILD,
            BTreeMap::from([(
                "reference".to_string(),
                ParameterValue::scalar("gg_13_8"),
            )]),
        );
        let root = workflow.roots(&ctx).unwrap()[0];
        let connections = BTreeMap::from([(
            root,
            BTreeMap::from([("o2".to_string(), "in".to_string())]),
        )]);
        workflow
            .add(&ctx, &child_dflt, Some(&connections), None, None, false)
            .unwrap();

        // one more output would exceed the cap of 4
        let upload_dflt = DefaultParameters::new(
            testutil::CMD_UPLOAD,
            BTreeMap::from([(
                "template".to_string(),
                ParameterValue::scalar(testutil::PREP.to_string()),
            )]),
        );
        let err = workflow
            .add(&ctx, &upload_dflt, None, None, None, false)
            .unwrap_err();
        assert!(err.to_string().contains("more artifacts"));
    }

    #[tokio::test(start_paused = true)]
    async fn transformation_fans_out_validators_and_releases_them() {
        let TestBed { ctx, .. } = testutil::testbed();
        let (workflow, root, child) = build_pipeline(&ctx);

        workflow.submit(&ctx).await.unwrap();
        root.update_heartbeat(&ctx).unwrap();

        root.complete(&ctx, true, Some(payloads()), None)
            .await
            .unwrap();

        // one validator per output, all submitted as chains of <= 2
        let validators = root.validator_jobs(&ctx).unwrap();
        assert_eq!(validators.len(), 3);
        for validator in &validators {
            assert_eq!(validator.status(&ctx).unwrap(), JobStatus::Queued);
            assert!(validator.external_id(&ctx).unwrap().is_some());
        }
        assert!(root
            .step(&ctx)
            .unwrap()
            .unwrap()
            .contains("Validating outputs (3 remaining)"));

        // every validator reports in
        for validator in &validators {
            validator.update_heartbeat(&ctx).unwrap();
            validator
                .complete(
                    &ctx,
                    true,
                    Some(BTreeMap::from([(
                        "out".to_string(),
                        testutil::biom_payload("/validated/table.biom"),
                    )])),
                    None,
                )
                .await
                .unwrap();
            assert_eq!(validator.status(&ctx).unwrap(), JobStatus::Waiting);
        }

        root.release_validators(&ctx).await.unwrap();

        assert_eq!(root.status(&ctx).unwrap(), JobStatus::Success);
        for validator in &validators {
            assert_eq!(validator.status(&ctx).unwrap(), JobStatus::Success);
        }

        let outputs = root.outputs(&ctx).unwrap();
        assert_eq!(outputs.len(), 3);

        // the child picked up o2's artifact and went out automatically
        assert_eq!(child.status(&ctx).unwrap(), JobStatus::Queued);
        assert!(child.pending(&ctx).unwrap().is_empty());
        let child_params = child.parameters(&ctx).unwrap();
        assert_eq!(
            child_params.scalar("in"),
            Some(outputs["o2"].to_string().as_str())
        );
        assert!(child
            .input_artifacts(&ctx)
            .unwrap()
            .contains(&outputs["o2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_validators_fail_siblings_parent_and_children() {
        let TestBed { ctx, mailer, .. } = testutil::testbed();
        let (workflow, root, child) = build_pipeline(&ctx);

        workflow.submit(&ctx).await.unwrap();
        root.update_heartbeat(&ctx).unwrap();
        root.complete(&ctx, true, Some(payloads()), None)
            .await
            .unwrap();

        let validators = root.validator_jobs(&ctx).unwrap();
        let mut failed_validator = None;
        for validator in &validators {
            validator.update_heartbeat(&ctx).unwrap();
            if validator_output_name(&ctx, validator).contains("o2") {
                validator
                    .complete(&ctx, false, None, Some("bad biom table"))
                    .await
                    .unwrap();
                failed_validator = Some(*validator);
            } else {
                validator
                    .complete(
                        &ctx,
                        true,
                        Some(BTreeMap::from([(
                            "out".to_string(),
                            testutil::biom_payload("/validated/table.biom"),
                        )])),
                        None,
                    )
                    .await
                    .unwrap();
            }
        }
        let failed_validator = failed_validator.expect("o2 validator exists");

        root.release_validators(&ctx).await.unwrap();

        assert_eq!(root.status(&ctx).unwrap(), JobStatus::Error);
        let root_log = root.log(&ctx).unwrap().expect("log attached");
        let root_message = ctx.log().message(root_log).unwrap();
        assert!(root_message.contains("1 validator jobs failed"));
        assert!(root_message.contains("bad biom table"));

        // still-waiting siblings were promoted to error with the aggregate
        for validator in &validators {
            assert_eq!(validator.status(&ctx).unwrap(), JobStatus::Error);
            if *validator != failed_validator {
                let log = validator.log(&ctx).unwrap().expect("log attached");
                assert!(ctx
                    .log()
                    .message(log)
                    .unwrap()
                    .contains("sister validator jobs failed"));
            }
        }

        // the held child is failed transitively
        assert_eq!(child.status(&ctx).unwrap(), JobStatus::Error);
        let child_log = child.log(&ctx).unwrap().expect("log attached");
        assert!(ctx
            .log()
            .message(child_log)
            .unwrap()
            .contains(&format!("Parent job '{}' failed.", root.id())));

        // the user heard about the failure
        assert!(!mailer.sent_to(testutil::USER).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn release_barrier_holds_until_every_validator_is_terminal() {
        let TestBed { ctx, .. } = testutil::testbed();
        let (workflow, root, _child) = build_pipeline(&ctx);

        workflow.submit(&ctx).await.unwrap();
        root.update_heartbeat(&ctx).unwrap();
        root.complete(&ctx, true, Some(payloads()), None)
            .await
            .unwrap();

        let validators = root.validator_jobs(&ctx).unwrap();
        let (last, settled) = validators.split_last().unwrap();
        for validator in settled {
            validator.update_heartbeat(&ctx).unwrap();
            validator
                .complete(
                    &ctx,
                    true,
                    Some(BTreeMap::from([(
                        "out".to_string(),
                        testutil::biom_payload("/validated/table.biom"),
                    )])),
                    None,
                )
                .await
                .unwrap();
        }
        last.update_heartbeat(&ctx).unwrap();

        let barrier_ctx = ctx.clone();
        let barrier_root = root;
        let barrier =
            tokio::spawn(async move { barrier_root.release_validators(&barrier_ctx).await });

        // the barrier keeps polling while one validator still runs
        for _ in 0..25 {
            tokio::task::yield_now().await;
        }
        assert_eq!(root.status(&ctx).unwrap(), JobStatus::Running);
        assert!(root
            .step(&ctx)
            .unwrap()
            .unwrap()
            .contains("Validating outputs (1 remaining)"));

        last.complete(
            &ctx,
            true,
            Some(BTreeMap::from([(
                "out".to_string(),
                testutil::biom_payload("/validated/table.biom"),
            )])),
            None,
        )
        .await
        .unwrap();

        barrier.await.unwrap().unwrap();
        assert_eq!(root.status(&ctx).unwrap(), JobStatus::Success);
    }
}
