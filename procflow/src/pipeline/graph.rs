//! Linearization of process dependencies.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::errors::{CyclicDependencyError, DeclarationError, ProcflowError, UnreachableProcessError};
use crate::proc::ProcDefinition;

/// Processes in execution order.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    order: Vec<Arc<ProcDefinition>>,
    successors: HashMap<String, Vec<String>>,
}

impl PipelineGraph {
    /// Returns the processes in execution order.
    #[must_use]
    pub fn order(&self) -> &[Arc<ProcDefinition>] {
        &self.order
    }

    /// Returns the process names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|p| p.name.as_str()).collect()
    }

    /// Returns the processes that require `name`, sorted by `(order, name)`.
    #[must_use]
    pub fn successors(&self, name: &str) -> &[String] {
        self.successors.get(name).map_or(&[], Vec::as_slice)
    }

    /// Returns true if no scheduled process requires `name`.
    #[must_use]
    pub fn is_terminal(&self, name: &str) -> bool {
        self.successors(name).is_empty()
    }

    /// Returns the number of scheduled processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builds a [`PipelineGraph`] from declarations.
///
/// The declarations are the given processes plus everything they
/// transitively require. Names identify processes; two different
/// declarations sharing a name are rejected.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    decls: IndexMap<String, Arc<ProcDefinition>>,
}

impl GraphBuilder {
    /// Creates a builder from declarations.
    pub fn new<'a>(decls: impl IntoIterator<Item = &'a Arc<ProcDefinition>>) -> Result<Self, DeclarationError> {
        let mut builder = Self::default();
        for decl in decls {
            builder.add(decl)?;
        }
        Ok(builder)
    }

    /// Adds a declaration and its requirements.
    pub fn add(&mut self, decl: &Arc<ProcDefinition>) -> Result<(), DeclarationError> {
        let mut stack = vec![Arc::clone(decl)];
        while let Some(proc) = stack.pop() {
            if let Some(known) = self.decls.get(&proc.name) {
                if !Arc::ptr_eq(known, &proc) {
                    return Err(DeclarationError::DuplicateName { name: proc.name.clone() });
                }
                continue;
            }
            stack.extend(proc.requires.iter().cloned());
            self.decls.insert(proc.name.clone(), proc);
        }
        Ok(())
    }

    /// Maps each process to the processes requiring it, sorted by `(order, name)`.
    fn successors(&self) -> HashMap<String, Vec<String>> {
        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        for proc in self.decls.values() {
            for req in &proc.requires {
                successors.entry(req.name.clone()).or_default().push(proc.name.clone());
            }
        }
        for names in successors.values_mut() {
            names.sort_by(|a, b| self.sort_key(a).cmp(&self.sort_key(b)));
            names.dedup();
        }
        successors
    }

    fn sort_key<'a>(&self, name: &'a str) -> (i32, &'a str) {
        (self.decls.get(name).map_or(0, |p| p.order), name)
    }

    /// Orders the processes reachable from `starts`.
    pub fn build(mut self, starts: &[Arc<ProcDefinition>]) -> Result<PipelineGraph, ProcflowError> {
        if starts.is_empty() {
            return Err(DeclarationError::NoStarts.into());
        }
        for start in starts {
            self.add(start)?;
        }
        let successors = self.successors();

        let mut placed: Vec<String> = Vec::with_capacity(self.decls.len());
        let mut placed_set: HashSet<String> = HashSet::new();
        for start in starts {
            if !placed_set.insert(start.name.clone()) {
                return Err(DeclarationError::DuplicateName { name: start.name.clone() }.into());
            }
            placed.push(start.name.clone());
        }

        let mut frontier: Vec<String> = Vec::new();
        for name in &placed {
            extend_unique(&mut frontier, successors.get(name));
        }

        while !frontier.is_empty() {
            frontier.sort_by(|a, b| self.sort_key(a).cmp(&self.sort_key(b)));
            if let Some(again) = frontier.iter().find(|c| placed_set.contains(*c)) {
                return Err(CyclicDependencyError::new(vec![again.clone()]).into());
            }

            let ready = frontier.iter().position(|candidate| {
                self.decls[candidate.as_str()]
                    .requires
                    .iter()
                    .all(|req| placed_set.contains(&req.name))
            });
            let Some(pos) = ready else {
                return Err(self.stuck(&frontier, &placed, &placed_set, &successors));
            };

            let name = frontier.remove(pos);
            debug!(proc = %name, "Placed process");
            placed_set.insert(name.clone());
            extend_unique(&mut frontier, successors.get(&name));
            placed.push(name);
        }

        Ok(PipelineGraph {
            order: placed
                .iter()
                .map(|name| Arc::clone(&self.decls[name.as_str()]))
                .collect(),
            successors,
        })
    }

    /// Explains why none of `frontier` can be placed.
    fn stuck(
        &self,
        frontier: &[String],
        placed: &[String],
        placed_set: &HashSet<String>,
        successors: &HashMap<String, Vec<String>>,
    ) -> ProcflowError {
        let mut reachable: HashSet<&str> = placed.iter().map(String::as_str).collect();
        let mut queue: VecDeque<&str> = placed.iter().map(String::as_str).collect();
        while let Some(name) = queue.pop_front() {
            for next in successors.get(name).into_iter().flatten() {
                if reachable.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                }
            }
        }

        let mut missing: Vec<String> = frontier
            .iter()
            .flat_map(|c| self.decls[c.as_str()].requires.iter())
            .filter(|req| !placed_set.contains(&req.name) && !reachable.contains(req.name.as_str()))
            .map(|req| req.name.clone())
            .collect();
        missing.sort();
        missing.dedup();

        if missing.is_empty() {
            CyclicDependencyError::new(frontier.to_vec()).into()
        } else {
            UnreachableProcessError::new(frontier.to_vec(), missing).into()
        }
    }
}

fn extend_unique(frontier: &mut Vec<String>, names: Option<&Vec<String>>) {
    for name in names.into_iter().flatten() {
        if !frontier.contains(name) {
            frontier.push(name.clone());
        }
    }
}
