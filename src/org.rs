//! The derived read-permission graph.
//!
//! For every discovered agent: whose outboxes it can actually read (wildcard
//! expanded, itself and unknown names removed) and which tools it holds. The
//! graph is written to `config/org_graph_derived.json` for operators; the
//! engine never reads it back.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::resume::Agent;
use crate::error::StoreResult;
use crate::store::write_json_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgNode {
    /// Producers this agent reads, sorted.
    pub can_read: Vec<String>,
    pub tools: Vec<String>,
}

/// Agent name to its effective permissions, sorted by name.
pub type OrgGraph = BTreeMap<String, OrgNode>;

pub fn derive_org_graph(agents: &[Agent]) -> OrgGraph {
    let mut names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();

    agents
        .iter()
        .map(|agent| {
            let node = OrgNode {
                can_read: names
                    .iter()
                    .filter(|producer| agent.can_read(producer))
                    .map(|producer| producer.to_string())
                    .collect(),
                tools: agent.permissions.tools.iter().cloned().collect(),
            };
            (agent.name.clone(), node)
        })
        .collect()
}

/// Derive the graph for `agents` and write it atomically to `path`.
pub fn save_org_graph(path: &Path, agents: &[Agent]) -> StoreResult<OrgGraph> {
    let graph = derive_org_graph(agents);
    write_json_atomic(path, &graph)?;
    tracing::debug!(path = %path.display(), agents = graph.len(), "org graph written");
    Ok(graph)
}
