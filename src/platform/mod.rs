//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The platform seams.
//!
//! Everything the orchestration core consumes but does not own lives behind
//! the traits in this module: the command/plugin catalog, the artifact data
//! model, the user directory and the mail delivery. Production wires real
//! implementations in; the test suite wires the in-memory ones from
//! `crate::testutil`.

mod catalog;
mod mailer;
mod registry;
mod users;

pub use catalog::CommandCatalog;
pub use catalog::CommandKind;
pub use catalog::CommandOutput;
pub use catalog::CommandSpec;
pub use catalog::ParamKind;
pub use catalog::PluginSpec;
pub use catalog::CMD_COMPLETE_JOB;
pub use catalog::CMD_REGISTER;
pub use catalog::CMD_RELEASE_VALIDATORS;
pub use catalog::CMD_VALIDATE;
pub use mailer::Mailer;
pub use registry::AnalysisInfo;
pub use registry::ArtifactInfo;
pub use registry::ArtifactRegistry;
pub use registry::FileEntry;
pub use registry::NewArtifact;
pub use registry::PrepTemplateInfo;
pub use registry::SampleTemplateInfo;
pub use users::UserDirectory;
pub use users::UserInfo;
pub use users::UserLevel;

pub type CommandId = i64;
pub type OutputId = i64;
pub type ArtifactId = i64;
pub type PrepId = i64;
pub type StudyId = i64;
pub type AnalysisId = i64;
pub type WorkflowId = i64;
pub type LogId = i64;
