//! Dependency graph over the sessions of one group.
//!
//! The [`DependencyGraph`] is built once per run. Construction validates that
//! every dependency resolves inside the group and that the graph is acyclic
//! (depth-first search with a recursion stack, reporting the offending cycle).
//! Queries take a status lookup so readiness is always computed from the
//! caller's current view of session state, never from a cached copy.

use std::collections::{HashMap, HashSet, VecDeque};

use super::types::{GroupSession, SessionStatus};

/// Invalid dependency configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Duplicate session id '{id}'")]
    DuplicateSession { id: String },

    #[error("Session '{session}' depends on itself")]
    SelfDependency { session: String },

    #[error("Session '{session}' depends on unknown session '{dependency}'")]
    UnknownDependency { session: String, dependency: String },

    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle {
        /// Ids along the cycle; the first id is repeated at the end.
        path: Vec<String>,
    },
}

/// Directed acyclic graph of session dependencies.
///
/// Nodes are stored in group-definition order; every list this type returns
/// preserves that order so scheduling is reproducible.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Session ids in group order.
    ids: Vec<String>,
    /// `session_id` -> position in `ids`.
    index: HashMap<String, usize>,
    /// Forward edges: node -> nodes it depends on.
    dependencies: Vec<Vec<usize>>,
    /// Reverse edges: node -> nodes that depend on it.
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build and validate a graph from `(id, depends_on)` pairs in group order.
    pub fn new<'a, I>(nodes: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let nodes: Vec<(&str, &[String])> = nodes.into_iter().collect();

        let mut ids = Vec::with_capacity(nodes.len());
        let mut index = HashMap::with_capacity(nodes.len());
        for (pos, (id, _)) in nodes.iter().enumerate() {
            if index.insert((*id).to_string(), pos).is_some() {
                return Err(GraphError::DuplicateSession {
                    id: (*id).to_string(),
                });
            }
            ids.push((*id).to_string());
        }

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        for (pos, (id, deps)) in nodes.iter().enumerate() {
            for dep in *deps {
                if dep.as_str() == *id {
                    return Err(GraphError::SelfDependency {
                        session: (*id).to_string(),
                    });
                }
                let Some(&dep_pos) = index.get(dep.as_str()) else {
                    return Err(GraphError::UnknownDependency {
                        session: (*id).to_string(),
                        dependency: dep.clone(),
                    });
                };
                // Repeated entries in depends_on collapse to one edge
                if !dependencies[pos].contains(&dep_pos) {
                    dependencies[pos].push(dep_pos);
                    dependents[dep_pos].push(pos);
                }
            }
        }

        let graph = Self {
            ids,
            index,
            dependencies,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Build a graph from a group's sessions.
    pub fn from_sessions(sessions: &[GroupSession]) -> Result<Self, GraphError> {
        Self::new(
            sessions
                .iter()
                .map(|s| (s.id.as_str(), s.depends_on.as_slice())),
        )
    }

    /// Pending sessions whose every dependency is completed, in group order.
    pub fn ready<F>(&self, status_of: F) -> Vec<String>
    where
        F: Fn(&str) -> SessionStatus,
    {
        (0..self.ids.len())
            .filter(|&node| status_of(&self.ids[node]) == SessionStatus::Pending)
            .filter(|&node| {
                self.dependencies[node]
                    .iter()
                    .all(|&dep| status_of(&self.ids[dep]) == SessionStatus::Completed)
            })
            .map(|node| self.ids[node].clone())
            .collect()
    }

    /// Pending sessions with at least one dependency that failed or was
    /// skipped, in group order.
    ///
    /// This is a single step: a session blocked only through another
    /// still-pending session shows up once that session is skipped. Use
    /// [`propagate_blocked`](Self::propagate_blocked) for the fixed point.
    pub fn blocked<F>(&self, status_of: F) -> Vec<String>
    where
        F: Fn(&str) -> SessionStatus,
    {
        (0..self.ids.len())
            .filter(|&node| status_of(&self.ids[node]) == SessionStatus::Pending)
            .filter(|&node| {
                self.dependencies[node]
                    .iter()
                    .any(|&dep| status_of(&self.ids[dep]).blocks_dependents())
            })
            .map(|node| self.ids[node].clone())
            .collect()
    }

    /// Every pending session that can never become ready, in group order.
    ///
    /// Worklist over the reverse adjacency index seeded with all failed and
    /// skipped sessions; equivalent to repeatedly skipping the result of
    /// [`blocked`](Self::blocked) until nothing new appears, in
    /// O(sessions + edges).
    pub fn propagate_blocked<F>(&self, status_of: F) -> Vec<String>
    where
        F: Fn(&str) -> SessionStatus,
    {
        let mut queue: VecDeque<usize> = (0..self.ids.len())
            .filter(|&node| status_of(&self.ids[node]).blocks_dependents())
            .collect();
        let mut blocked: HashSet<usize> = HashSet::new();

        while let Some(node) = queue.pop_front() {
            for &dependent in &self.dependents[node] {
                if status_of(&self.ids[dependent]) == SessionStatus::Pending
                    && blocked.insert(dependent)
                {
                    queue.push_back(dependent);
                }
            }
        }

        let mut ordered: Vec<usize> = blocked.into_iter().collect();
        ordered.sort_unstable();
        ordered.into_iter().map(|n| self.ids[n].clone()).collect()
    }

    /// Dependencies of `session_id` that are not completed yet.
    pub fn waiting_on<F>(&self, session_id: &str, status_of: F) -> Vec<String>
    where
        F: Fn(&str) -> SessionStatus,
    {
        let Some(&node) = self.index.get(session_id) else {
            return Vec::new();
        };
        self.dependencies[node]
            .iter()
            .filter(|&&dep| status_of(&self.ids[dep]) != SessionStatus::Completed)
            .map(|&dep| self.ids[dep].clone())
            .collect()
    }

    /// True when no session is pending or active.
    pub fn is_complete<F>(&self, status_of: F) -> bool
    where
        F: Fn(&str) -> SessionStatus,
    {
        self.ids.iter().all(|id| status_of(id).is_terminal())
    }

    /// Direct dependencies of a session.
    pub fn dependencies(&self, session_id: &str) -> Vec<&str> {
        self.index.get(session_id).map_or_else(Vec::new, |&node| {
            self.dependencies[node]
                .iter()
                .map(|&dep| self.ids[dep].as_str())
                .collect()
        })
    }

    /// Sessions that directly depend on `session_id`.
    pub fn dependents(&self, session_id: &str) -> Vec<&str> {
        self.index.get(session_id).map_or_else(Vec::new, |&node| {
            self.dependents[node]
                .iter()
                .map(|&dep| self.ids[dep].as_str())
                .collect()
        })
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.index.contains_key(session_id)
    }

    pub const fn len(&self) -> usize {
        self.ids.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut visited = vec![false; self.ids.len()];
        let mut on_stack = vec![false; self.ids.len()];
        let mut stack: Vec<usize> = Vec::new();

        for node in 0..self.ids.len() {
            if !visited[node] {
                self.visit(node, &mut visited, &mut on_stack, &mut stack)?;
            }
        }
        Ok(())
    }

    /// DFS helper: a dependency already on the recursion stack is a back edge.
    fn visit(
        &self,
        node: usize,
        visited: &mut [bool],
        on_stack: &mut [bool],
        stack: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        visited[node] = true;
        on_stack[node] = true;
        stack.push(node);

        for &dep in &self.dependencies[node] {
            if on_stack[dep] {
                let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                let mut path: Vec<String> = stack[start..]
                    .iter()
                    .map(|&n| self.ids[n].clone())
                    .collect();
                path.push(self.ids[dep].clone());
                return Err(GraphError::Cycle { path });
            }
            if !visited[dep] {
                self.visit(dep, visited, on_stack, stack)?;
            }
        }

        stack.pop();
        on_stack[node] = false;
        Ok(())
    }
}
