//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::path::Path;
use std::path::PathBuf;

use getset::CopyGetters;
use getset::Getters;
use parse_display::Display;
use parse_display::FromStr;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::Error;
use crate::error::Result;

/// Which execution backend `Job::submit` dispatches to
#[derive(Display, FromStr, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    Local,
    Cluster,
}

/// The orchestrator settings.
///
/// Loaded from a TOML file, with `ORDINO_`-prefixed environment variables
/// taking precedence over file values.
#[derive(Getters, CopyGetters, Deserialize, Debug, Clone)]
pub struct Configuration {
    #[getset(get_copy = "pub")]
    plugin_launcher: LauncherKind,

    #[getset(get = "pub")]
    base_url: Url,

    #[getset(get = "pub")]
    #[serde(default)]
    portal_dir: String,

    /// Per-job work directories are created below this path
    #[getset(get = "pub")]
    work_dir: PathBuf,

    /// The account owning our jobs on the cluster; the watcher filters the
    /// scheduler listing down to it
    #[getset(get = "pub")]
    job_scheduler_owner: String,

    /// Seconds between watcher polls
    #[getset(get_copy = "pub")]
    #[serde(default = "default_poll_val")]
    job_scheduler_poll_val: u64,

    /// Chain length for validator submission on the cluster backend
    #[getset(get_copy = "pub")]
    #[serde(default = "default_dependency_q_cnt")]
    job_scheduler_dependency_q_cnt: usize,

    #[getset(get_copy = "pub")]
    #[serde(default = "default_max_artifacts")]
    max_artifacts_in_workflow: usize,

    #[getset(get = "pub")]
    sysadmin_email: String,

    #[getset(get = "pub")]
    help_email: String,
}

fn default_poll_val() -> u64 {
    60
}

fn default_dependency_q_cnt() -> usize {
    2
}

fn default_max_artifacts() -> usize {
    35
}

impl Configuration {
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = config::Config::new();
        settings
            .merge(config::File::from(path))
            .and_then(|s| s.merge(config::Environment::with_prefix("ORDINO")))
            .map_err(|e| Error::Validation(format!("Cannot load configuration: {e}")))?;

        let configuration = settings
            .try_into::<Configuration>()
            .map_err(|e| Error::Validation(format!("Invalid configuration: {e}")))?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_scheduler_poll_val < 60 {
            // below one minute the exit status of short cluster jobs can
            // vanish between two polls
            warn!(
                poll_val = self.job_scheduler_poll_val,
                "job_scheduler_poll_val below the recommended minimum of 60s"
            );
        }
        if self.job_scheduler_dependency_q_cnt == 0 {
            return Err(Error::Validation(
                "job_scheduler_dependency_q_cnt must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// `base_url` + portal path, the callback endpoint handed to every
    /// started plugin
    pub fn portal_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.portal_dir
        )
    }
}

/// Parse a configuration from a TOML string; fixture path for the test
/// suite.
#[cfg(test)]
pub(crate) fn parse(toml: &str) -> Configuration {
    let mut settings = config::Config::new();
    settings
        .merge(config::File::from_str(toml, config::FileFormat::Toml))
        .unwrap();
    settings.try_into().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> String {
        toml::toml! {
            plugin_launcher = "cluster"
            base_url = "https://qdata.example.org/"
            portal_dir = "/portal"
            work_dir = "/var/lib/ordino/work"
            job_scheduler_owner = "ordino"
            sysadmin_email = "sysadmin@example.org"
            help_email = "help@example.org"
        }
        .to_string()
    }

    #[test]
    fn loads_with_defaults() {
        let cfg = parse(&minimal());
        assert_eq!(cfg.plugin_launcher(), LauncherKind::Cluster);
        assert_eq!(cfg.job_scheduler_poll_val(), 60);
        assert_eq!(cfg.job_scheduler_dependency_q_cnt(), 2);
        assert_eq!(cfg.max_artifacts_in_workflow(), 35);
        cfg.validate().unwrap();
    }

    #[test]
    fn portal_url_joins_without_double_slash() {
        let cfg = parse(&minimal());
        assert_eq!(cfg.portal_url(), "https://qdata.example.org/portal");
    }

    #[test]
    fn zero_chain_length_is_rejected() {
        let mut raw = minimal();
        raw.push_str("\njob_scheduler_dependency_q_cnt = 0\n");
        let cfg = parse(&raw);
        assert!(cfg.validate().is_err());
    }
}
