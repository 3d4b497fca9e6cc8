//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

/// The error vocabulary of the orchestration core.
///
/// Every fallible operation in this crate returns one of these kinds, so
/// callers (HTTP handlers, plugins, the CLI) can match on the failure class
/// instead of parsing message strings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad input: malformed parameters, duplicate creation, cycle in a
    /// workflow template, ...
    #[error("{0}")]
    Validation(String),

    /// The entity exists, but its current state forbids the operation
    #[error("operation not permitted: {0}")]
    OperationNotPermitted(String),

    /// A lookup against the store or one of the platform interfaces failed
    #[error("unknown {kind}: {id}")]
    UnknownId { kind: &'static str, id: String },

    /// A resource-allocation template is unusable for this job
    #[error("{0}")]
    Resource(String),

    /// A launcher or an external submission failed
    #[error("{0}")]
    Runtime(String),

    /// A predecessor job failed and this job was cascaded into failure
    #[error("{0}")]
    Dependency(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn unknown_id(kind: &'static str, id: impl ToString) -> Self {
        Error::UnknownId {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
