//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::sync::Arc;

use getset::Getters;
use typed_builder::TypedBuilder;

use crate::config::Configuration;
use crate::db::LogSink;
use crate::db::Store;
use crate::platform::ArtifactRegistry;
use crate::platform::CommandCatalog;
use crate::platform::Mailer;
use crate::platform::UserDirectory;

/// Everything an orchestration operation needs, threaded explicitly through
/// every call. There are no process-wide singletons in this crate.
#[derive(Getters, TypedBuilder, Clone)]
#[getset(get = "pub")]
pub struct Context {
    config: Arc<Configuration>,
    store: Arc<dyn Store>,
    log: Arc<dyn LogSink>,
    catalog: Arc<dyn CommandCatalog>,
    registry: Arc<dyn ArtifactRegistry>,
    users: Arc<dyn UserDirectory>,
    mailer: Arc<dyn Mailer>,
}
