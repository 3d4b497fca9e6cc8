//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use daggy::Dag;
use daggy::NodeIndex;
use getset::Getters;

use crate::error::Error;
use crate::error::Result;
use crate::job::DefaultParameters;

/// One artifact hand-over between two template nodes: the source job's
/// output feeds the sink job's parameter.
#[derive(Getters, Debug, Clone)]
#[getset(get = "pub")]
pub struct Connection {
    source_output: String,
    sink_param: String,
}

impl Connection {
    pub fn new(source_output: impl Into<String>, sink_param: impl Into<String>) -> Self {
        Connection {
            source_output: source_output.into(),
            sink_param: sink_param.into(),
        }
    }
}

/// Edge payload: every incoming edge of a node carries the connections that
/// resolve the node's artifact parameters.
#[derive(Getters, Debug, Clone, Default)]
pub struct Connections {
    #[getset(get = "pub")]
    links: Vec<Connection>,
}

/// A reusable workflow blueprint: a DAG whose nodes carry a command's
/// default parameter set.
///
/// The DAG type refuses cycles structurally, so a template can never submit
/// into an infinite chain.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    name: String,
    dag: Dag<DefaultParameters, Connections>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        WorkflowTemplate {
            name: name.into(),
            dag: Dag::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_job(&mut self, default_parameters: DefaultParameters) -> NodeIndex {
        self.dag.add_node(default_parameters)
    }

    /// Wire `source`'s outputs into `sink`'s parameters. A connection that
    /// would close a cycle is rejected.
    pub fn connect(
        &mut self,
        source: NodeIndex,
        sink: NodeIndex,
        links: Vec<(&str, &str)>,
    ) -> Result<()> {
        let links = links
            .into_iter()
            .map(|(out, param)| Connection::new(out, param))
            .collect();
        self.dag
            .add_edge(source, sink, Connections { links })
            .map(|_| ())
            .map_err(|_| {
                Error::Validation("Workflow template connection would create a cycle".into())
            })
    }

    pub(crate) fn dag(&self) -> &Dag<DefaultParameters, Connections> {
        &self.dag
    }
}
