//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! In-memory platform collaborators for the test suite.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use uuid::Uuid;

use crate::config::Configuration;
use crate::context::Context;
use crate::db::MemoryStore;
use crate::error::Error;
use crate::error::Result;
use crate::job::ParameterValue;
use crate::job::Parameters;
use crate::platform::AnalysisId;
use crate::platform::AnalysisInfo;
use crate::platform::ArtifactId;
use crate::platform::ArtifactInfo;
use crate::platform::ArtifactRegistry;
use crate::platform::CommandCatalog;
use crate::platform::CommandId;
use crate::platform::CommandKind;
use crate::platform::CommandOutput;
use crate::platform::CommandSpec;
use crate::platform::FileEntry;
use crate::platform::Mailer;
use crate::platform::NewArtifact;
use crate::platform::OutputId;
use crate::platform::ParamKind;
use crate::platform::PluginSpec;
use crate::platform::PrepId;
use crate::platform::PrepTemplateInfo;
use crate::platform::SampleTemplateInfo;
use crate::platform::StudyId;
use crate::platform::UserDirectory;
use crate::platform::UserInfo;
use crate::platform::UserLevel;
use crate::platform::CMD_RELEASE_VALIDATORS;
use crate::platform::CMD_VALIDATE;

pub(crate) const USER: &str = "demo@example.org";
pub(crate) const ADMIN: &str = "admin@example.org";
pub(crate) const OPTED_OUT: &str = "quiet@example.org";
pub(crate) const POWER_USER: &str = "power@example.org";

pub(crate) const CMD_UPLOAD: CommandId = 1;
pub(crate) const CMD_TRANSFORM: CommandId = 2;
pub(crate) const CMD_VALIDATE_BIOM: CommandId = 3;
pub(crate) const CMD_RELEASE: CommandId = 4;
pub(crate) const CMD_CHILD: CommandId = 5;
pub(crate) const CMD_COMPLETE: CommandId = 6;

pub(crate) const OUT_UPLOAD: OutputId = 101;
pub(crate) const OUT_O1: OutputId = 201;
pub(crate) const OUT_O2: OutputId = 202;
pub(crate) const OUT_O3: OutputId = 203;
pub(crate) const OUT_CHILD: OutputId = 501;

/// Seeded artifact linked to prep template 77 of study 700
pub(crate) const ARTIFACT_PREP: ArtifactId = 7;
/// Seeded artifact linked to analysis 800
pub(crate) const ARTIFACT_ANALYSIS: ArtifactId = 8;
pub(crate) const PREP: PrepId = 77;
pub(crate) const STUDY: StudyId = 700;
pub(crate) const ANALYSIS: AnalysisId = 800;

pub(crate) struct TestCatalog {
    commands: Mutex<HashMap<CommandId, Arc<CommandSpec>>>,
}

impl TestCatalog {
    fn plugin(kind: CommandKind) -> PluginSpec {
        PluginSpec::builder()
            .name("target-gene".to_string())
            .env_script("true".to_string())
            .start_script("true".to_string())
            .kind(kind)
            .build()
    }

    fn internal_plugin() -> PluginSpec {
        PluginSpec::builder()
            .name("ordino".to_string())
            .env_script("true".to_string())
            .start_script("true".to_string())
            .kind(CommandKind::Private)
            .build()
    }

    pub(crate) fn new() -> Self {
        let mut commands = HashMap::new();

        commands.insert(
            CMD_UPLOAD,
            Arc::new(
                CommandSpec::builder()
                    .id(CMD_UPLOAD)
                    .name("Upload data".to_string())
                    .plugin(Self::plugin(CommandKind::ArtifactDefinition))
                    .parameters(BTreeMap::from([
                        ("template".to_string(), ParamKind::Other),
                        ("name".to_string(), ParamKind::Other),
                    ]))
                    .outputs(vec![CommandOutput::new(OUT_UPLOAD, "out")])
                    .build(),
            ),
        );

        commands.insert(
            CMD_TRANSFORM,
            Arc::new(
                CommandSpec::builder()
                    .id(CMD_TRANSFORM)
                    .name("Split libraries".to_string())
                    .plugin(Self::plugin(CommandKind::ArtifactTransformation))
                    .parameters(BTreeMap::from([
                        ("input".to_string(), ParamKind::Artifact),
                        ("barcode_type".to_string(), ParamKind::Other),
                    ]))
                    .outputs(vec![
                        CommandOutput::new(OUT_O1, "o1"),
                        CommandOutput::new(OUT_O2, "o2"),
                        CommandOutput::new(OUT_O3, "o3"),
                    ])
                    .build(),
            ),
        );

        commands.insert(
            CMD_VALIDATE_BIOM,
            Arc::new(
                CommandSpec::builder()
                    .id(CMD_VALIDATE_BIOM)
                    .name(CMD_VALIDATE.to_string())
                    .plugin(Self::plugin(CommandKind::ArtifactDefinition))
                    .parameters(BTreeMap::from([
                        ("files".to_string(), ParamKind::Other),
                        ("artifact_type".to_string(), ParamKind::Other),
                        ("template".to_string(), ParamKind::Other),
                        ("analysis".to_string(), ParamKind::Other),
                        ("provenance".to_string(), ParamKind::Other),
                    ]))
                    .build(),
            ),
        );

        commands.insert(
            CMD_RELEASE,
            Arc::new(
                CommandSpec::builder()
                    .id(CMD_RELEASE)
                    .name(CMD_RELEASE_VALIDATORS.to_string())
                    .plugin(Self::internal_plugin())
                    .parameters(BTreeMap::from([("job".to_string(), ParamKind::Other)]))
                    .build(),
            ),
        );

        commands.insert(
            CMD_CHILD,
            Arc::new(
                CommandSpec::builder()
                    .id(CMD_CHILD)
                    .name("Pick closed-reference OTUs".to_string())
                    .plugin(Self::plugin(CommandKind::ArtifactTransformation))
                    .parameters(BTreeMap::from([
                        ("in".to_string(), ParamKind::Artifact),
                        ("reference".to_string(), ParamKind::Other),
                    ]))
                    .outputs(vec![CommandOutput::new(OUT_CHILD, "otu_table")])
                    .build(),
            ),
        );

        commands.insert(
            CMD_COMPLETE,
            Arc::new(
                CommandSpec::builder()
                    .id(CMD_COMPLETE)
                    .name("complete_job".to_string())
                    .plugin(Self::internal_plugin())
                    .parameters(BTreeMap::from([
                        ("payload".to_string(), ParamKind::Other),
                        ("job_id".to_string(), ParamKind::Other),
                    ]))
                    .build(),
            ),
        );

        TestCatalog {
            commands: Mutex::new(commands),
        }
    }

    pub(crate) fn insert(&self, spec: CommandSpec) {
        self.commands
            .lock()
            .unwrap()
            .insert(spec.id(), Arc::new(spec));
    }
}

impl CommandCatalog for TestCatalog {
    fn command(&self, id: CommandId) -> Result<Arc<CommandSpec>> {
        self.commands
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::unknown_id("command", id))
    }

    fn validator_for(&self, artifact_type: &str) -> Result<Arc<CommandSpec>> {
        if artifact_type == "BIOM" {
            self.command(CMD_VALIDATE_BIOM)
        } else {
            Err(Error::unknown_id("validator command", artifact_type))
        }
    }

    fn release_validators_command(&self) -> Result<Arc<CommandSpec>> {
        self.command(CMD_RELEASE)
    }

    fn output(&self, id: OutputId) -> Result<CommandOutput> {
        self.commands
            .lock()
            .unwrap()
            .values()
            .flat_map(|c| c.outputs().iter())
            .find(|o| o.id() == id)
            .cloned()
            .ok_or_else(|| Error::unknown_id("command output", id))
    }
}

#[derive(Default)]
pub(crate) struct TestRegistry {
    artifacts: Mutex<HashMap<ArtifactId, ArtifactInfo>>,
    pub(crate) created: Mutex<Vec<NewArtifact>>,
    next_id: Mutex<ArtifactId>,
    preps: Mutex<HashMap<PrepId, PrepTemplateInfo>>,
    sample_templates: Mutex<HashMap<StudyId, SampleTemplateInfo>>,
    analyses: Mutex<HashMap<AnalysisId, AnalysisInfo>>,
}

impl TestRegistry {
    pub(crate) fn new() -> Self {
        let registry = TestRegistry {
            next_id: Mutex::new(100),
            ..Default::default()
        };

        registry.seed_artifact(
            ArtifactInfo::builder()
                .id(ARTIFACT_PREP)
                .artifact_type("FASTQ".to_string())
                .filepaths(vec![
                    FileEntry::new("/data/7/seqs.fastq", "raw_forward_seqs", 4096),
                    FileEntry::new("/data/7/barcodes.fastq", "raw_barcodes", 2048),
                ])
                .study(Some(STUDY))
                .prep_templates(vec![PREP])
                .build(),
        );
        registry.seed_prep(
            PrepTemplateInfo::builder()
                .id(PREP)
                .study(STUDY)
                .samples(10)
                .categories(4)
                .data_type("16S".to_string())
                .build(),
        );
        registry.seed_sample_template(
            STUDY,
            SampleTemplateInfo::builder().samples(12).categories(6).build(),
        );

        registry.seed_artifact(
            ArtifactInfo::builder()
                .id(ARTIFACT_ANALYSIS)
                .artifact_type("BIOM".to_string())
                .filepaths(vec![
                    FileEntry::new("/data/8/table.biom", "biom", 1024),
                    FileEntry::new("/data/8/notes.txt", "log", 10),
                ])
                .analysis(Some(ANALYSIS))
                .build(),
        );
        registry.seed_analysis(
            ANALYSIS,
            AnalysisInfo::builder()
                .sample_groups(BTreeMap::from([(
                    ARTIFACT_ANALYSIS,
                    (0..20).map(|i| format!("S{i}")).collect(),
                )]))
                .reservation(Some("microbiome".to_string()))
                .mapping_shape(Some((20, 8)))
                .build(),
        );

        registry
    }

    pub(crate) fn seed_artifact(&self, info: ArtifactInfo) {
        self.artifacts.lock().unwrap().insert(info.id(), info);
    }

    pub(crate) fn seed_prep(&self, info: PrepTemplateInfo) {
        self.preps.lock().unwrap().insert(info.id(), info);
    }

    pub(crate) fn seed_sample_template(&self, study: StudyId, info: SampleTemplateInfo) {
        self.sample_templates.lock().unwrap().insert(study, info);
    }

    pub(crate) fn seed_analysis(&self, id: AnalysisId, info: AnalysisInfo) {
        self.analyses.lock().unwrap().insert(id, info);
    }
}

impl ArtifactRegistry for TestRegistry {
    fn artifact(&self, id: ArtifactId) -> Result<ArtifactInfo> {
        self.artifacts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::unknown_id("artifact", id))
    }

    fn create_artifact(&self, spec: NewArtifact) -> Result<ArtifactId> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        let info = ArtifactInfo::builder()
            .id(id)
            .artifact_type(spec.artifact_type.clone())
            .filepaths(
                spec.filepaths
                    .iter()
                    .map(|(path, kind)| FileEntry::new(path.clone(), kind.clone(), 0))
                    .collect(),
            )
            .analysis(spec.analysis)
            .prep_templates(spec.prep_template.into_iter().collect())
            .study(
                spec.prep_template
                    .and_then(|p| self.preps.lock().unwrap().get(&p).map(|i| i.study())),
            )
            .build();
        self.artifacts.lock().unwrap().insert(id, info);
        self.created.lock().unwrap().push(spec);
        Ok(id)
    }

    fn prep_template(&self, id: PrepId) -> Result<PrepTemplateInfo> {
        self.preps
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::unknown_id("prep template", id))
    }

    fn sample_template(&self, study: StudyId) -> Result<Option<SampleTemplateInfo>> {
        Ok(self.sample_templates.lock().unwrap().get(&study).cloned())
    }

    fn analysis(&self, id: AnalysisId) -> Result<AnalysisInfo> {
        self.analyses
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::unknown_id("analysis", id))
    }
}

pub(crate) struct TestUsers;

impl UserDirectory for TestUsers {
    fn user(&self, email: &str) -> Result<UserInfo> {
        let builder = UserInfo::builder()
            .email(email.to_string())
            .name("Demo User".to_string());
        Ok(match email {
            ADMIN => builder.level(UserLevel::Admin).build(),
            OPTED_OUT => builder.receive_processing_job_emails(false).build(),
            POWER_USER => builder
                .scheduler_parameters("--qos special".to_string())
                .build(),
            _ => builder.build(),
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingMailer {
    pub(crate) sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingMailer {
    pub(crate) fn sent_to(&self, recipient: &str) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _, _)| to == recipient)
            .map(|(_, subject, body)| (subject.clone(), body.clone()))
            .collect()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

pub(crate) struct TestBed {
    pub(crate) ctx: Context,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) catalog: Arc<TestCatalog>,
    pub(crate) registry: Arc<TestRegistry>,
    pub(crate) mailer: Arc<RecordingMailer>,
}

pub(crate) fn config(extra: &str) -> Configuration {
    let work_dir = std::env::temp_dir().join(format!("ordino-test-{}", Uuid::new_v4()));
    crate::config::parse(&format!(
        r#"
plugin_launcher = "local"
base_url = "https://qdata.example.org"
portal_dir = "/portal"
work_dir = "{}"
job_scheduler_owner = "ordino"
sysadmin_email = "sysadmin@example.org"
help_email = "help@example.org"
{extra}
"#,
        work_dir.display()
    ))
}

pub(crate) fn testbed() -> TestBed {
    testbed_with("")
}

pub(crate) fn testbed_with(extra_config: &str) -> TestBed {
    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(TestCatalog::new());
    let registry = Arc::new(TestRegistry::new());
    let mailer = Arc::new(RecordingMailer::default());

    let ctx = Context::builder()
        .config(Arc::new(config(extra_config)))
        .store(store.clone())
        .log(store.clone())
        .catalog(catalog.clone())
        .registry(registry.clone())
        .users(Arc::new(TestUsers))
        .mailer(mailer.clone())
        .build();

    TestBed {
        ctx,
        store,
        catalog,
        registry,
        mailer,
    }
}

pub(crate) fn upload_params() -> Parameters {
    Parameters::new(
        CMD_UPLOAD,
        BTreeMap::from([
            ("template".to_string(), ParameterValue::scalar(PREP.to_string())),
            ("name".to_string(), ParameterValue::scalar("new artifact")),
        ]),
    )
}

pub(crate) fn transform_params() -> Parameters {
    Parameters::new(
        CMD_TRANSFORM,
        BTreeMap::from([
            (
                "input".to_string(),
                ParameterValue::scalar(ARTIFACT_PREP.to_string()),
            ),
            ("barcode_type".to_string(), ParameterValue::scalar("golay_12")),
        ]),
    )
}

pub(crate) fn biom_payload(path: &str) -> crate::job::ArtifactData {
    crate::job::ArtifactData {
        filepaths: vec![(path.to_string(), "biom".to_string())],
        artifact_type: "BIOM".to_string(),
    }
}
