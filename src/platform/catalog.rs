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
use std::sync::Arc;

use getset::CopyGetters;
use getset::Getters;
use serde::Deserialize;
use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::error::Error;
use crate::error::Result;
use crate::platform::CommandId;
use crate::platform::OutputId;

/// Name of the validator command every plugin registers per artifact type
pub const CMD_VALIDATE: &str = "Validate";
/// Name of the internal command that finishes a plugin job
pub const CMD_COMPLETE_JOB: &str = "complete_job";
/// Name of the internal command that drives the validator barrier
pub const CMD_RELEASE_VALIDATORS: &str = "release_validators";
/// Name of the internal plugin-registration command
pub const CMD_REGISTER: &str = "REGISTER";

/// What a plugin's commands do with artifacts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Turns an artifact description into a durable artifact (validators,
    /// uploads)
    ArtifactDefinition,
    /// Consumes artifacts and produces new artifact descriptions
    ArtifactTransformation,
    /// Internal platform commands; completed like transformations but their
    /// outputs land as plain job-output folders
    Private,
}

/// The software bundle a command belongs to. Launchers source `env_script`
/// and then hand control to `start_script`.
#[derive(Getters, TypedBuilder, Debug, Clone)]
pub struct PluginSpec {
    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    env_script: String,

    #[getset(get = "pub")]
    start_script: String,

    #[builder(default = CommandKind::ArtifactTransformation)]
    kind: CommandKind,
}

impl PluginSpec {
    pub fn kind(&self) -> CommandKind {
        self.kind
    }
}

/// One declared output slot of a command
#[derive(Getters, CopyGetters, Debug, Clone)]
pub struct CommandOutput {
    #[getset(get_copy = "pub")]
    id: OutputId,

    #[getset(get = "pub")]
    name: String,
}

impl CommandOutput {
    pub fn new(id: OutputId, name: impl Into<String>) -> Self {
        CommandOutput {
            id,
            name: name.into(),
        }
    }
}

/// Schema kind of a declared command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Artifact,
    Other,
}

/// A registered operation of a plugin, with its declared parameter and
/// output schemas.
#[derive(Getters, CopyGetters, TypedBuilder, Debug, Clone)]
pub struct CommandSpec {
    #[getset(get_copy = "pub")]
    id: CommandId,

    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    plugin: PluginSpec,

    /// parameter name -> schema kind
    #[getset(get = "pub")]
    #[builder(default)]
    parameters: BTreeMap<String, ParamKind>,

    #[getset(get = "pub")]
    #[builder(default)]
    outputs: Vec<CommandOutput>,

    /// Parameter names whose values take part in output artifact naming
    #[getset(get = "pub")]
    #[builder(default)]
    naming_order: Vec<String>,
}

impl CommandSpec {
    pub fn kind(&self) -> CommandKind {
        self.plugin.kind()
    }

    pub fn output_by_name(&self, name: &str) -> Result<&CommandOutput> {
        self.outputs
            .iter()
            .find(|o| o.name() == name)
            .ok_or_else(|| {
                Error::unknown_id("command output", format!("{} of '{}'", name, self.name))
            })
    }
}

/// The command/plugin catalog of the platform. Out of scope for the core;
/// consumed through this interface only.
pub trait CommandCatalog: Send + Sync {
    fn command(&self, id: CommandId) -> Result<Arc<CommandSpec>>;

    /// The validator command registered for an artifact type
    fn validator_for(&self, artifact_type: &str) -> Result<Arc<CommandSpec>>;

    /// The internal command that releases the validators of a job
    fn release_validators_command(&self) -> Result<Arc<CommandSpec>>;

    /// Translate a command output id back to its declaration
    fn output(&self, id: OutputId) -> Result<CommandOutput>;
}
