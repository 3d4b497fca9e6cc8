//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Job shape: `(samples, columns, input_size)`.
//!
//! Consumed exclusively by the resource resolver to fill the `{samples}` /
//! `{columns}` / `{input_size}` placeholders of allocation templates. Any
//! component that cannot be determined stays `None`; whether that is fatal
//! depends on the template referencing it.

use crate::context::Context;
use crate::db::models::JobRow;
use crate::platform::AnalysisId;
use crate::platform::ArtifactInfo;
use crate::platform::CommandKind;
use crate::platform::CommandSpec;
use crate::platform::PrepTemplateInfo;
use crate::platform::StudyId;
use crate::platform::CMD_VALIDATE;
use crate::resource::Variable;

const CMD_BUILD_ANALYSIS_FILES: &str = "build_analysis_files";
const CMD_DELETE_SAMPLE_OR_COLUMN: &str = "delete_sample_or_column";
const CMD_SEQUENCE_PROCESSING: &str = "Sequence Processing Pipeline";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Shape {
    pub samples: Option<u64>,
    pub columns: Option<u64>,
    pub input_size: Option<u64>,
}

impl Shape {
    pub fn get(&self, var: Variable) -> Option<f64> {
        match var {
            Variable::Samples => self.samples.map(|v| v as f64),
            Variable::Columns => self.columns.map(|v| v as f64),
            Variable::InputSize => self.input_size.map(|v| v as f64),
        }
    }
}

/// Compute the shape of a job. Lookups that fail simply leave their
/// component undetermined.
pub fn shape_of(ctx: &Context, job: &JobRow, cmd: &CommandSpec) -> Shape {
    let mut samples = None;
    let mut columns = None;
    let mut input_size = None;
    let mut prep_info: Option<PrepTemplateInfo> = None;
    let mut study_id: Option<StudyId> = None;
    let mut analysis_id: Option<AnalysisId> = None;
    let mut artifact: Option<ArtifactInfo> = None;

    let params = &job.parameters;

    if cmd.name() == CMD_VALIDATE {
        // either the validated data has a preparation attached, or it comes
        // out of an analysis
        if let Some(template) = params.scalar("template").and_then(|s| s.parse().ok()) {
            if let Ok(info) = ctx.registry().prep_template(template) {
                study_id = Some(info.study());
                prep_info = Some(info);
            }
        } else if let Some(analysis) = params.scalar("analysis").and_then(|s| s.parse().ok()) {
            analysis_id = Some(analysis);
        }
    } else if cmd.name() == CMD_BUILD_ANALYSIS_FILES {
        // special case: the analysis artifacts are not inputs of this job yet
        if let Some(analysis) = params.scalar("analysis").and_then(|s| s.parse().ok()) {
            if let Ok(info) = ctx.registry().analysis(analysis) {
                samples = Some(
                    info.sample_groups()
                        .values()
                        .map(|group| group.len() as u64)
                        .sum(),
                );
                input_size = Some(sum_file_sizes(
                    ctx,
                    info.sample_groups().keys().copied(),
                    Some("biom"),
                ));
            }
        }
        if let Some(crate::job::ParameterValue::List(categories)) = params.get("categories") {
            columns = Some(categories.len() as u64);
        }
    } else if cmd.kind() == CommandKind::Private {
        if cmd.name() == CMD_DELETE_SAMPLE_OR_COLUMN {
            if let Some(obj_id) = params.scalar("obj_id").and_then(|s| s.parse().ok()) {
                let count = if params.scalar("obj_class") == Some("SampleTemplate") {
                    ctx.registry()
                        .sample_template(obj_id)
                        .ok()
                        .flatten()
                        .map(|st| st.samples() as u64)
                } else {
                    ctx.registry()
                        .prep_template(obj_id)
                        .ok()
                        .map(|pt| pt.samples() as u64)
                };
                samples = count;
            }
        } else if let Some(study) = scalar_id(params, &["study", "study_id"]) {
            study_id = Some(study);
        } else if let Some(analysis) = scalar_id(params, &["analysis", "analysis_id"]) {
            analysis_id = Some(analysis);
        } else if let Some(a) = params.scalar("artifact").and_then(|s| s.parse().ok()) {
            artifact = ctx.registry().artifact(a).ok();
        }
    } else if cmd.name() == CMD_SEQUENCE_PROCESSING {
        // the embedded sample sheet counts one sample per line
        if let Some(sheet) = params.scalar("sample_sheet") {
            let body = serde_json::from_str::<serde_json::Value>(sheet)
                .ok()
                .and_then(|v| v.get("body").and_then(|b| b.as_str()).map(String::from))
                .unwrap_or_default();
            let cr = body.matches('\r').count() as u64;
            let lf = body.matches('\n').count() as u64;
            samples = Some(cr.max(lf));
        }
    } else if let Ok(inputs) = ctx.store().input_artifacts(job.id) {
        if let Some(first) = inputs.first() {
            artifact = ctx.registry().artifact(*first).ok();
            let biom_only = artifact
                .as_ref()
                .map(|a| a.artifact_type() == "BIOM")
                .unwrap_or(false);
            input_size = Some(sum_file_sizes(
                ctx,
                inputs.iter().copied(),
                biom_only.then_some("biom"),
            ));
        }
    }

    if let Some(artifact) = artifact {
        if let Some(study) = artifact.study() {
            // only count samples in the prep template
            prep_info = artifact
                .prep_templates()
                .first()
                .and_then(|p| ctx.registry().prep_template(*p).ok());
            study_id = Some(*study);
        } else if let Some(analysis) = artifact.analysis() {
            analysis_id = Some(*analysis);
        }
    }

    if let Some(study) = study_id {
        let sample_template = ctx.registry().sample_template(study).ok().flatten();
        if let Some(prep) = prep_info {
            samples = Some(prep.samples() as u64);
            columns = Some(
                (prep.categories()
                    + sample_template.map(|st| st.categories()).unwrap_or_default())
                    as u64,
            );
        } else if let Some(st) = sample_template {
            samples = Some(st.samples() as u64);
            columns = Some(st.categories() as u64);
        }
    } else if let Some(analysis) = analysis_id {
        if let Ok(info) = ctx.registry().analysis(analysis) {
            if let Some((rows, cols)) = info.mapping_shape() {
                samples = Some(*rows as u64);
                columns = Some(*cols as u64);
            }
            input_size = Some(sum_file_sizes(
                ctx,
                info.sample_groups().keys().copied(),
                None,
            ));
        }
    }

    Shape {
        samples,
        columns,
        input_size,
    }
}

fn scalar_id(params: &crate::job::Parameters, names: &[&str]) -> Option<i64> {
    names
        .iter()
        .find_map(|n| params.scalar(n).and_then(|s| s.parse().ok()))
}

fn sum_file_sizes(
    ctx: &Context,
    artifacts: impl Iterator<Item = crate::platform::ArtifactId>,
    kind: Option<&str>,
) -> u64 {
    artifacts
        .filter_map(|a| ctx.registry().artifact(a).ok())
        .flat_map(|info| info.filepaths().clone())
        .filter(|fp| kind.map(|k| fp.kind() == k).unwrap_or(true))
        .map(|fp| fp.size())
        .sum()
}
