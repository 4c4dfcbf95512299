//! Task dependency graph and execution leveling.
//!
//! This module provides the DependencyGraph structure that holds a project's
//! tasks and their prerequisite relationships, and groups them into execution
//! levels whose members are mutually independent.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::tarjan_scc;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A batch of tasks with no unmet prerequisites relative to earlier levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLevel {
    /// Zero-based position of the level in the plan.
    pub index: usize,
    /// Task ids in insertion order.
    pub tasks: Vec<TaskId>,
}

/// The task dependency graph.
///
/// Nodes are tasks and an edge `a -> b` means `a` is a prerequisite of `b`.
/// Tasks may declare prerequisites that are added later; the edge is wired
/// when the prerequisite arrives. Levels are cached until the next
/// structural change.
#[derive(Clone)]
pub struct DependencyGraph {
    /// The underlying directed graph. Stable indices survive removals.
    graph: StableDiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
    /// Insertion order, used to break ties inside a level.
    order: Vec<TaskId>,
    /// Cached result of the last successful level computation.
    levels: Option<Vec<ExecutionLevel>>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            task_index: HashMap::new(),
            order: Vec::new(),
            levels: None,
        }
    }

    /// Build a graph from a task list and reject it if it cannot be leveled.
    ///
    /// # Errors
    /// Returns `CyclicDependency` or `UnknownPrerequisite`; no graph is
    /// produced in that case.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self> {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task)?;
        }
        let levels = graph.compute_levels()?;
        graph.levels = Some(levels);
        Ok(graph)
    }

    /// Add a task to the graph.
    ///
    /// Edges are wired for prerequisites already present and for existing
    /// tasks that name the new task as a prerequisite.
    ///
    /// # Errors
    /// Returns `TaskExists` if a task with the same id is already present.
    pub fn add_task(&mut self, task: Task) -> Result<NodeIndex> {
        if self.task_index.contains_key(&task.id) {
            return Err(Error::TaskExists(task.id));
        }

        let id = task.id;
        let prerequisites = task.prerequisites.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        self.order.push(id);

        for prereq in &prerequisites {
            if let Some(&from) = self.task_index.get(prereq) {
                self.graph.add_edge(from, index, ());
            }
        }

        // Forward references from tasks added earlier.
        let waiting: Vec<NodeIndex> = self
            .order
            .iter()
            .filter(|other| **other != id)
            .filter_map(|other| self.task_index.get(other).copied())
            .filter(|&other| {
                self.graph
                    .node_weight(other)
                    .is_some_and(|t| t.prerequisites.contains(&id))
            })
            .collect();
        for to in waiting {
            self.graph.add_edge(index, to, ());
        }

        self.levels = None;
        Ok(index)
    }

    /// Remove a task and strip it from its dependents' prerequisite lists.
    ///
    /// # Errors
    /// Returns `TaskNotFound` if the id is unknown.
    pub fn remove_task(&mut self, id: &TaskId) -> Result<Task> {
        let index = self
            .task_index
            .remove(id)
            .ok_or(Error::TaskNotFound(*id))?;

        let dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        for dependent in dependents {
            if let Some(task) = self.graph.node_weight_mut(dependent) {
                task.prerequisites.retain(|p| p != id);
            }
        }

        self.order.retain(|t| t != id);
        self.levels = None;
        self.graph.remove_node(index).ok_or(Error::TaskNotFound(*id))
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    ///
    /// Callers may change status and results but not prerequisites; use
    /// `remove_task`/`add_task` for structural changes.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        let index = *self.task_index.get(id)?;
        self.graph.node_weight_mut(index)
    }

    /// Get the number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of wired prerequisite edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Check if the graph contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.order.iter().filter_map(move |id| self.get_task(id))
    }

    /// Task ids in insertion order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.order
    }

    /// Direct dependents of a task, in insertion order.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let direct: HashSet<TaskId> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .filter_map(|n| self.graph.node_weight(n).map(|t| t.id))
            .filter(|t| t != id)
            .collect();
        self.in_insertion_order(&direct)
    }

    /// Every task reachable from `id` through dependent edges, in
    /// insertion order. Does not include `id` itself.
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut queue: VecDeque<TaskId> = VecDeque::from([*id]);
        while let Some(current) = queue.pop_front() {
            for next in self.dependents(&current) {
                if next != *id && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        self.in_insertion_order(&seen)
    }

    fn in_insertion_order(&self, ids: &HashSet<TaskId>) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| ids.contains(id))
            .copied()
            .collect()
    }

    // ========== Level Computation ==========

    /// Compute execution levels with Kahn-style leveling.
    ///
    /// Each round collects every remaining task whose prerequisites all sit
    /// in earlier levels. Ties inside a level follow insertion order. The
    /// graph is never modified, so repeated calls give identical results.
    ///
    /// # Errors
    /// - `UnknownPrerequisite` if a task names an id that is not in the graph
    /// - `CyclicDependency` naming the tasks that take part in a cycle
    pub fn compute_levels(&self) -> Result<Vec<ExecutionLevel>> {
        for task in self.tasks() {
            if let Some(missing) = task
                .prerequisites
                .iter()
                .find(|p| !self.task_index.contains_key(p))
            {
                return Err(Error::UnknownPrerequisite {
                    task: task.id,
                    prerequisite: *missing,
                });
            }
        }

        let mut unmet: HashMap<NodeIndex, usize> = self
            .order
            .iter()
            .filter_map(|id| self.task_index.get(id))
            .map(|&index| {
                let count = self
                    .graph
                    .neighbors_directed(index, Direction::Incoming)
                    .count();
                (index, count)
            })
            .collect();

        let mut levels = Vec::new();
        let mut remaining = self.order.len();

        while remaining > 0 {
            let current: Vec<TaskId> = self
                .order
                .iter()
                .filter(|id| {
                    self.task_index
                        .get(id)
                        .is_some_and(|index| unmet.get(index) == Some(&0))
                })
                .copied()
                .collect();

            if current.is_empty() {
                return Err(Error::CyclicDependency {
                    tasks: self.cycle_members(),
                });
            }

            for id in &current {
                if let Some(&index) = self.task_index.get(id) {
                    unmet.remove(&index);
                    for dependent in self.graph.neighbors_directed(index, Direction::Outgoing) {
                        if let Some(count) = unmet.get_mut(&dependent) {
                            *count = count.saturating_sub(1);
                        }
                    }
                }
            }

            remaining -= current.len();
            levels.push(ExecutionLevel {
                index: levels.len(),
                tasks: current,
            });
        }

        Ok(levels)
    }

    /// Return cached levels, computing them if the task set changed.
    pub fn levels(&mut self) -> Result<&[ExecutionLevel]> {
        if self.levels.is_none() {
            self.levels = Some(self.compute_levels()?);
        }
        Ok(self.levels.as_deref().unwrap_or(&[]))
    }

    /// Levels from the last computation, if the task set has not changed
    /// structurally since.
    pub fn cached_levels(&self) -> Option<&[ExecutionLevel]> {
        self.levels.as_deref()
    }

    /// Whether a computed level set is currently cached.
    pub fn has_cached_levels(&self) -> bool {
        self.levels.is_some()
    }

    /// Level index of a task in the cached plan.
    pub fn level_of(&self, id: &TaskId) -> Option<usize> {
        self.levels
            .as_ref()?
            .iter()
            .find(|level| level.tasks.contains(id))
            .map(|level| level.index)
    }

    /// Tasks that take part in a cycle, in insertion order.
    fn cycle_members(&self) -> Vec<TaskId> {
        let mut members: HashSet<TaskId> = HashSet::new();
        for component in tarjan_scc(&self.graph) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&n| self.graph.find_edge(n, n).is_some());
            if cyclic {
                members.extend(
                    component
                        .iter()
                        .filter_map(|&n| self.graph.node_weight(n).map(|t| t.id)),
                );
            }
        }
        self.in_insertion_order(&members)
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .field("cached_levels", &self.levels.as_ref().map(|l| l.len()))
            .finish()
    }
}
