//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use parse_display::{Display, FromStr};
use serde::Deserialize;
use serde::Serialize;

/// Lifecycle status of a processing job.
///
/// The canonical wire form is the lowercase snake_case name, which is also
/// what the store persists.
#[derive(
    Display, FromStr, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InConstruction,
    Queued,
    Running,
    Waiting,
    Success,
    Error,
}

impl JobStatus {
    /// A terminal job never reports progress again. Note that `error` jobs
    /// stay mutable (hide flag, cascaded re-logging), `success` jobs do not.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_is_snake_case() {
        assert_eq!(JobStatus::InConstruction.to_string(), "in_construction");
        assert_eq!(JobStatus::Waiting.to_string(), "waiting");
        assert_eq!(
            "in_construction".parse::<JobStatus>().unwrap(),
            JobStatus::InConstruction
        );
        assert!("IN_CONSTRUCTION".parse::<JobStatus>().is_err());
    }

    #[test]
    fn terminality() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Waiting.is_terminal());
    }
}
