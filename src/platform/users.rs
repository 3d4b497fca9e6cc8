//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use getset::CopyGetters;
use getset::Getters;
use typed_builder::TypedBuilder;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLevel {
    Admin,
    WetLabAdmin,
    User,
}

impl UserLevel {
    /// Errors of these users are escalated to the sysadmin address
    pub fn is_admin(self) -> bool {
        matches!(self, UserLevel::Admin | UserLevel::WetLabAdmin)
    }
}

#[derive(Getters, CopyGetters, TypedBuilder, Debug, Clone)]
pub struct UserInfo {
    #[getset(get = "pub")]
    email: String,

    #[getset(get = "pub")]
    name: String,

    #[getset(get_copy = "pub")]
    #[builder(default = UserLevel::User)]
    level: UserLevel,

    #[getset(get_copy = "pub")]
    #[builder(default = true)]
    receive_processing_job_emails: bool,

    /// Extra scheduler parameters granted to this user, appended verbatim to
    /// every resource allocation
    #[getset(get = "pub")]
    #[builder(default)]
    scheduler_parameters: String,
}

/// The user directory. Out of scope for the core; consumed through this
/// interface only.
pub trait UserDirectory: Send + Sync {
    fn user(&self, email: &str) -> Result<UserInfo>;
}
