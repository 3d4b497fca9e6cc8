//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::collections::BTreeMap;

use getset::CopyGetters;
use getset::Getters;
use typed_builder::TypedBuilder;

use crate::error::Result;
use crate::job::Parameters;
use crate::platform::AnalysisId;
use crate::platform::ArtifactId;
use crate::platform::PrepId;
use crate::platform::StudyId;

/// One file of an artifact, with the type tag and size the resource shape
/// computation needs. The core never opens these files.
#[derive(Getters, CopyGetters, Debug, Clone)]
pub struct FileEntry {
    #[getset(get = "pub")]
    path: String,

    #[getset(get = "pub")]
    kind: String,

    #[getset(get_copy = "pub")]
    size: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, kind: impl Into<String>, size: u64) -> Self {
        FileEntry {
            path: path.into(),
            kind: kind.into(),
            size,
        }
    }
}

/// Read-side view of an artifact
#[derive(Getters, CopyGetters, TypedBuilder, Debug, Clone)]
pub struct ArtifactInfo {
    #[getset(get_copy = "pub")]
    id: ArtifactId,

    #[getset(get = "pub")]
    artifact_type: String,

    #[getset(get = "pub")]
    #[builder(default)]
    filepaths: Vec<FileEntry>,

    #[getset(get = "pub")]
    #[builder(default)]
    study: Option<StudyId>,

    #[getset(get = "pub")]
    #[builder(default)]
    analysis: Option<AnalysisId>,

    #[getset(get = "pub")]
    #[builder(default)]
    prep_templates: Vec<PrepId>,
}

/// Everything needed to materialize an artifact out of a validator's stored
/// description.
#[derive(TypedBuilder, Debug, Clone)]
pub struct NewArtifact {
    pub filepaths: Vec<(String, String)>,
    pub artifact_type: String,
    #[builder(default)]
    pub parents: Vec<ArtifactId>,
    #[builder(default)]
    pub processing_parameters: Option<Parameters>,
    #[builder(default)]
    pub prep_template: Option<PrepId>,
    #[builder(default)]
    pub analysis: Option<AnalysisId>,
    #[builder(default)]
    pub data_type: Option<String>,
    #[builder(default)]
    pub name: Option<String>,
}

/// Prep-template metadata used for notification rendering and job shape
#[derive(Getters, CopyGetters, TypedBuilder, Debug, Clone)]
pub struct PrepTemplateInfo {
    #[getset(get_copy = "pub")]
    id: PrepId,

    #[getset(get_copy = "pub")]
    study: StudyId,

    #[getset(get_copy = "pub")]
    samples: usize,

    #[getset(get_copy = "pub")]
    categories: usize,

    #[getset(get = "pub")]
    data_type: String,
}

#[derive(CopyGetters, TypedBuilder, Debug, Clone)]
pub struct SampleTemplateInfo {
    #[getset(get_copy = "pub")]
    samples: usize,

    #[getset(get_copy = "pub")]
    categories: usize,
}

/// Analysis metadata, including the per-artifact sample groups the shape
/// computation sums over.
#[derive(Getters, TypedBuilder, Debug, Clone)]
pub struct AnalysisInfo {
    #[getset(get = "pub")]
    #[builder(default)]
    sample_groups: BTreeMap<ArtifactId, Vec<String>>,

    #[getset(get = "pub")]
    #[builder(default)]
    reservation: Option<String>,

    /// `(rows, columns)` of the analysis mapping file; parsing happens behind
    /// this interface, not in the core
    #[getset(get = "pub")]
    #[builder(default)]
    mapping_shape: Option<(usize, usize)>,
}

/// The artifact and template data model. Out of scope for the core; consumed
/// through this interface only.
pub trait ArtifactRegistry: Send + Sync {
    fn artifact(&self, id: ArtifactId) -> Result<ArtifactInfo>;

    fn create_artifact(&self, spec: NewArtifact) -> Result<ArtifactId>;

    fn prep_template(&self, id: PrepId) -> Result<PrepTemplateInfo>;

    fn sample_template(&self, study: StudyId) -> Result<Option<SampleTemplateInfo>>;

    fn analysis(&self, id: AnalysisId) -> Result<AnalysisInfo>;
}
