//! Field dependency graph and evaluation order.
//!
//! Each field declares which fields' *previous-frame* values its update rule
//! reads. Because every read targets the previous frame, a field reading its
//! own history is not a cycle: the double buffer breaks it in time. Such
//! self-reads are stored as [`Edge::SelfPrevious`] and are skipped by cycle
//! detection. Removing that exemption would reject the motion field, which
//! only ever depends on itself.
//!
//! Cycles between *distinct* fields still have no evaluation order and are
//! rejected by [`DependencyGraph::finalize`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::SimulationError;
use crate::field::{wgsl_ident, FieldId};

/// A single declared dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// The field reads its own previous value. Exempt from ordering.
    SelfPrevious,
    /// The field reads another field's previous value.
    Field(FieldId),
}

/// Dependency declarations for every field of a session.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    names: Vec<String>,
    edges: Vec<Vec<Edge>>,
    order: Option<Vec<FieldId>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field node. Ids are assigned in declaration order.
    ///
    /// Names that only differ in characters WGSL cannot hold (`dye-a` and
    /// `dye_a`) share a shader accessor and count as duplicates.
    pub fn add_field(&mut self, name: impl Into<String>) -> Result<FieldId, SimulationError> {
        if self.order.is_some() {
            return Err(SimulationError::GraphFinalized);
        }
        let name = name.into();
        let ident = wgsl_ident(&name);
        if self.names.iter().any(|n| wgsl_ident(n) == ident) {
            return Err(SimulationError::DuplicateField(name));
        }
        self.names.push(name);
        self.edges.push(Vec::new());
        Ok(FieldId(self.names.len() - 1))
    }

    /// Look up a field by name.
    pub fn id_of(&self, name: &str) -> Option<FieldId> {
        self.names.iter().position(|n| n == name).map(FieldId)
    }

    /// Name of a field.
    pub fn name(&self, id: FieldId) -> &str {
        &self.names[id.0]
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if no fields are registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Add dependencies for `field`.
    ///
    /// May be called repeatedly; the dependency set accumulates in declaration
    /// order without duplicates. Nothing is recorded if any name is unknown.
    pub fn declare_dependency<I, S>(&mut self, field: &str, depends_on: I) -> Result<(), SimulationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.order.is_some() {
            return Err(SimulationError::GraphFinalized);
        }
        let id = self
            .id_of(field)
            .ok_or_else(|| SimulationError::UnknownField(field.to_string()))?;

        let mut resolved = Vec::new();
        for dep in depends_on {
            let dep = dep.as_ref();
            let dep_id = self
                .id_of(dep)
                .ok_or_else(|| SimulationError::UnknownField(dep.to_string()))?;
            resolved.push(if dep_id == id {
                Edge::SelfPrevious
            } else {
                Edge::Field(dep_id)
            });
        }

        let edges = &mut self.edges[id.0];
        for edge in resolved {
            if !edges.contains(&edge) {
                edges.push(edge);
            }
        }
        Ok(())
    }

    /// Declared dependencies of a field, in declaration order.
    pub fn dependencies(&self, id: FieldId) -> &[Edge] {
        &self.edges[id.0]
    }

    /// Fields whose previous values `id` reads, with self-reads resolved to `id`.
    pub fn reads(&self, id: FieldId) -> impl Iterator<Item = FieldId> + '_ {
        self.edges[id.0].iter().map(move |edge| match edge {
            Edge::SelfPrevious => id,
            Edge::Field(dep) => *dep,
        })
    }

    /// Whether [`finalize`](Self::finalize) has succeeded.
    pub fn is_finalized(&self) -> bool {
        self.order.is_some()
    }

    /// The evaluation order, once finalized.
    pub fn evaluation_order(&self) -> Option<&[FieldId]> {
        self.order.as_deref()
    }

    /// Compute and freeze the evaluation order.
    ///
    /// Dependencies come before their dependents; fields with no ordering
    /// constraint between them keep declaration order. Calling this again
    /// returns the frozen order.
    pub fn finalize(&mut self) -> Result<&[FieldId], SimulationError> {
        if self.order.is_none() {
            self.order = Some(self.topological_order()?);
        }
        Ok(self.order.as_deref().unwrap_or_default())
    }

    fn topological_order(&self) -> Result<Vec<FieldId>, SimulationError> {
        let n = self.names.len();
        let mut pending = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (field, edges) in self.edges.iter().enumerate() {
            for edge in edges {
                if let Edge::Field(dep) = edge {
                    pending[field] += 1;
                    dependents[dep.0].push(field);
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| pending[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(field)) = ready.pop() {
            order.push(FieldId(field));
            for &dependent in &dependents[field] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() < n {
            return Err(SimulationError::CyclicGraphUnsupportedAsOrdering {
                cycle: self.find_cycle(&pending),
            });
        }
        Ok(order)
    }

    /// Walk unresolved fields until one repeats. Every unresolved field has at
    /// least one unresolved cross-field dependency, so the walk always closes.
    fn find_cycle(&self, pending: &[usize]) -> Vec<String> {
        let Some(start) = pending.iter().position(|&p| p > 0) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            let next = self.edges[current].iter().find_map(|edge| match edge {
                Edge::Field(dep) if pending[dep.0] > 0 => Some(dep.0),
                _ => None,
            });
            let Some(next) = next else {
                break;
            };
            if let Some(pos) = path.iter().position(|&f| f == next) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|&f| self.names[f].clone()).collect();
                cycle.push(self.names[next].clone());
                return cycle;
            }
            path.push(next);
            current = next;
        }
        path.iter().map(|&f| self.names[f].clone()).collect()
    }
}
