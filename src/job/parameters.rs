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

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;
use crate::error::Result;
use crate::platform::CommandId;

/// A single parameter slot of a job.
///
/// Artifact-typed slots may transiently hold a [`ParameterValue::PredecessorOutput`]
/// placeholder while the job sits in a workflow behind its producer. The
/// placeholder is rewritten to a concrete artifact id (a `Scalar`) once the
/// predecessor succeeds and its outputs are released.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValue {
    Scalar(String),
    List(Vec<String>),
    PredecessorOutput { job: Uuid, output: String },
}

impl ParameterValue {
    pub fn scalar(v: impl Into<String>) -> Self {
        ParameterValue::Scalar(v.into())
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            ParameterValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, ParameterValue::PredecessorOutput { .. })
    }

    /// Case-insensitive equivalence, with lists expanded element-wise.
    /// This is the comparison the duplicate-job guard runs on.
    fn equivalent(&self, other: &ParameterValue) -> bool {
        match (self, other) {
            (ParameterValue::Scalar(a), ParameterValue::Scalar(b)) => a.eq_ignore_ascii_case(b),
            (ParameterValue::List(a), ParameterValue::List(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.eq_ignore_ascii_case(y))
            }
            (
                ParameterValue::PredecessorOutput { job: ja, output: oa },
                ParameterValue::PredecessorOutput { job: jb, output: ob },
            ) => ja == jb && oa.eq_ignore_ascii_case(ob),
            _ => false,
        }
    }
}

/// The parameter set of a job, bound to the command it feeds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    command: CommandId,
    values: BTreeMap<String, ParameterValue>,
}

impl Parameters {
    pub fn new(command: CommandId, values: BTreeMap<String, ParameterValue>) -> Self {
        Parameters { command, values }
    }

    /// Build a parameter set from a default set, overriding the defaults with
    /// the required values and then with the optional ones.
    pub fn from_default(
        dflt: &DefaultParameters,
        required: &BTreeMap<String, ParameterValue>,
        optional: Option<&BTreeMap<String, ParameterValue>>,
    ) -> Self {
        let mut values = dflt.values().clone();
        for (k, v) in required {
            values.insert(k.clone(), v.clone());
        }
        if let Some(opt) = optional {
            for (k, v) in opt {
                values.insert(k.clone(), v.clone());
            }
        }
        Parameters {
            command: dflt.command(),
            values,
        }
    }

    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn values(&self) -> &BTreeMap<String, ParameterValue> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn scalar(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParameterValue::as_scalar)
    }

    /// A scalar that must be present and parse as `T`
    pub fn require<T>(&self, name: &str) -> Result<T>
    where
        T: std::str::FromStr,
    {
        self.scalar(name)
            .ok_or_else(|| Error::Validation(format!("Missing required parameter '{name}'")))?
            .parse::<T>()
            .map_err(|_| Error::Validation(format!("Parameter '{name}' has an invalid value")))
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParameterValue) {
        self.values.insert(name.into(), value);
    }

    /// Whether two parameter sets would produce the same job (duplicate guard)
    pub fn equivalent(&self, other: &Parameters) -> bool {
        self.command == other.command
            && self.values.len() == other.values.len()
            && self.values.iter().all(|(k, v)| {
                other
                    .values
                    .get(k)
                    .map(|ov| v.equivalent(ov))
                    .unwrap_or(false)
            })
    }
}

/// A registered command's default parameter set, the unit workflow templates
/// are built from.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DefaultParameters {
    command: CommandId,
    values: BTreeMap<String, ParameterValue>,
}

impl DefaultParameters {
    pub fn new(command: CommandId, values: BTreeMap<String, ParameterValue>) -> Self {
        DefaultParameters { command, values }
    }

    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn values(&self) -> &BTreeMap<String, ParameterValue> {
        &self.values
    }
}

/// `predecessor job -> {parameter name -> predecessor output name}`
///
/// Non-empty means the job cannot be submitted yet.
pub type Pending = BTreeMap<Uuid, BTreeMap<String, String>>;
