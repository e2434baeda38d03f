//! DAG construction from job "requires" edges.

use gantry_core::job::{JobDefinition, WorkflowDefinition};
use gantry_core::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{HashMap, HashSet};

/// A node in the job DAG.
#[derive(Debug, Clone)]
pub struct JobNode {
    pub name: String,
    pub definition: JobDefinition,
}

/// Directed acyclic graph formed by job "requires" edges. Immutable after
/// run creation; only per-job status (owned by the engine) is mutable.
#[derive(Debug)]
pub struct JobDag {
    graph: DiGraph<JobNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl JobDag {
    /// Jobs with no requirements.
    pub fn roots(&self) -> Vec<&JobNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Jobs that require the given job directly.
    pub fn successors(&self, name: &str) -> Vec<&JobNode> {
        self.name_to_index
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Outgoing)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Jobs the given job requires directly.
    pub fn predecessors(&self, name: &str) -> Vec<&JobNode> {
        self.name_to_index
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every job downstream of the given job, directly or transitively.
    /// Drives cascade-skip on failure.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&JobNode> {
        let start = match self.name_to_index.get(name) {
            Some(&idx) => idx,
            None => return Vec::new(),
        };

        let mut dependents = Vec::new();
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start
                && let Some(node) = self.graph.node_weight(idx)
            {
                dependents.push(node);
            }
        }
        dependents
    }

    /// All jobs in the DAG.
    pub fn jobs(&self) -> Vec<&JobNode> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&JobNode> {
        self.name_to_index
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Whether every requirement of the given job has succeeded.
    pub fn is_ready(&self, name: &str, succeeded: &HashSet<String>) -> bool {
        self.predecessors(name)
            .iter()
            .all(|pred| succeeded.contains(&pred.name))
    }

    fn validate_acyclic(&self) -> Result<()> {
        toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|_| Error::CyclicDependency)
    }
}

/// Builder for job DAGs.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build and validate a DAG from a workflow definition. Rejects empty
    /// workflows, duplicate job names, unknown requirements, and cycles —
    /// all before any job executes.
    pub fn build(&self, workflow: &WorkflowDefinition) -> Result<JobDag> {
        if workflow.jobs.is_empty() {
            return Err(Error::EmptyWorkflow);
        }

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for job in &workflow.jobs {
            if name_to_index.contains_key(&job.name) {
                return Err(Error::DuplicateJob(job.name.clone()));
            }
            let node = JobNode {
                name: job.name.clone(),
                definition: job.clone(),
            };
            let idx = graph.add_node(node);
            name_to_index.insert(job.name.clone(), idx);
        }

        for job in &workflow.jobs {
            let job_idx = name_to_index[&job.name];
            for required in &job.requires {
                let required_idx = name_to_index
                    .get(required)
                    .ok_or_else(|| Error::UnknownDependency(required.clone()))?;
                graph.add_edge(*required_idx, job_idx, ());
            }
        }

        let dag = JobDag {
            graph,
            name_to_index,
        };
        dag.validate_acyclic()?;

        Ok(dag)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
