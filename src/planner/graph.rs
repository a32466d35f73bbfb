//! Dependency graph over kinds.
//!
//! Edges point from a producer to its consumer: the consumer is created after
//! and deleted before the producer. The graph is built from static kind
//! dependencies plus references discovered in local descriptors, checked for
//! cycles with Tarjan's algorithm, and grouped into levels by depth.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::kinds::{KindRegistry, LocalDescriptor};

/// Where an edge came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeOrigin {
    /// Declared by the consumer kind.
    Static,
    /// Discovered in a descriptor field.
    Dynamic {
        /// Field that named the producer kind.
        field: String,
    },
}

/// A producer → consumer edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// Kind that must exist first.
    pub producer: String,
    /// Kind that references the producer.
    pub consumer: String,
    /// Origin of the edge.
    pub origin: EdgeOrigin,
}

/// Acyclic dependency graph of the kinds taking part in a run.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    display_names: BTreeMap<String, String>,
    edges: Vec<DependencyEdge>,
    levels: Vec<Vec<String>>,
    notes: Vec<String>,
}

impl DependencyGraph {
    /// Builds the graph for `selection`, pulling in every dependency.
    ///
    /// `locals` maps kind names to their local descriptors; only those
    /// contribute dynamic edges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownKind`] for an unregistered kind and
    /// [`ConfigError::DependencyCycle`] listing every cycle found.
    pub fn build(
        registry: &KindRegistry,
        selection: &[String],
        locals: &BTreeMap<String, Vec<LocalDescriptor>>,
    ) -> Result<Self, ConfigError> {
        let mut included: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut edges: BTreeMap<(String, String), EdgeOrigin> = BTreeMap::new();
        let mut notes = Vec::new();

        for name in selection {
            if !registry.contains(name) {
                return Err(ConfigError::UnknownKind {
                    kind: name.clone(),
                    referenced_by: None,
                });
            }
            if included.insert(name.clone()) {
                queue.push_back(name.clone());
            }
        }

        while let Some(consumer) = queue.pop_front() {
            let Some(kind) = registry.get(&consumer) else {
                continue;
            };

            let mut producers: Vec<(String, EdgeOrigin)> = kind
                .info()
                .dependencies
                .iter()
                .map(|dep| (dep.clone(), EdgeOrigin::Static))
                .collect();
            for local in locals.get(&consumer).into_iter().flatten() {
                for (field, producer) in kind.dynamic_dependencies(local) {
                    producers.push((producer, EdgeOrigin::Dynamic { field }));
                }
            }

            for (producer, origin) in producers {
                if !registry.contains(&producer) {
                    return Err(ConfigError::UnknownKind {
                        kind: producer,
                        referenced_by: Some(consumer.clone()),
                    });
                }

                if let EdgeOrigin::Dynamic { field } = &origin {
                    let note = format!("dynamic dependency {consumer}.{field}\u{2192}{producer}");
                    if !notes.contains(&note) {
                        notes.push(note);
                    }
                }

                let key = (producer.clone(), consumer.clone());
                if edges.contains_key(&key) {
                    continue;
                }
                if included.insert(producer.clone()) {
                    notes.push(format!(
                        "additional kinds included due to dependency {consumer}\u{2192}{producer}"
                    ));
                    queue.push_back(producer.clone());
                }
                edges.insert(key, origin);
            }
        }

        let display_names: BTreeMap<String, String> = included
            .iter()
            .filter_map(|name| {
                registry
                    .get(name)
                    .map(|kind| (name.clone(), kind.info().display_name.clone()))
            })
            .collect();

        let edges: Vec<DependencyEdge> = edges
            .into_iter()
            .map(|((producer, consumer), origin)| DependencyEdge {
                producer,
                consumer,
                origin,
            })
            .collect();

        let cycles = find_cycles(&included, &edges);
        if !cycles.is_empty() {
            return Err(ConfigError::DependencyCycle { cycles });
        }

        let mut graph = Self {
            display_names,
            edges,
            levels: Vec::new(),
            notes,
        };
        graph.levels = graph.compute_levels();

        for note in &graph.notes {
            info!("{note}");
        }
        debug!("Deploy order: {:?}", graph.deploy_order());
        Ok(graph)
    }

    /// Groups kinds by the longest producer chain leading to them.
    fn compute_levels(&self) -> Vec<Vec<String>> {
        let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
        let mut remaining: Vec<&str> = self.display_names.keys().map(String::as_str).collect();

        // Acyclic, so every pass settles at least one kind.
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|kind| {
                let producers = self.producers_of(kind);
                if producers.iter().all(|p| depth.contains_key(p.as_str())) {
                    let d = producers
                        .iter()
                        .filter_map(|p| depth.get(p.as_str()))
                        .map(|d| d + 1)
                        .max()
                        .unwrap_or(0);
                    depth.insert(*kind, d);
                    false
                } else {
                    true
                }
            });
            if remaining.len() == before {
                break;
            }
        }

        let max_depth = depth.values().copied().max().unwrap_or(0);
        let level_count = if depth.is_empty() { 0 } else { max_depth + 1 };
        let mut levels: Vec<Vec<String>> = vec![Vec::new(); level_count];
        for (kind, d) in depth {
            levels[d].push(kind.to_string());
        }
        for level in &mut levels {
            level.sort_by(|a, b| {
                (self.display_name(a), a.as_str()).cmp(&(self.display_name(b), b.as_str()))
            });
        }
        levels
    }

    fn display_name<'a>(&'a self, kind: &'a str) -> &'a str {
        self.display_names.get(kind).map_or(kind, String::as_str)
    }

    /// Returns the kinds in creation order: producers before consumers.
    #[must_use]
    pub fn deploy_order(&self) -> Vec<String> {
        self.levels.iter().flatten().cloned().collect()
    }

    /// Returns the kinds in deletion order, the exact reverse of
    /// [`Self::deploy_order`].
    #[must_use]
    pub fn delete_order(&self) -> Vec<String> {
        let mut order = self.deploy_order();
        order.reverse();
        order
    }

    /// Returns the kinds grouped by dependency depth.
    #[must_use]
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// Returns every edge.
    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Returns informational notes gathered while building.
    #[must_use]
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Returns true if `kind` takes part in the graph.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.display_names.contains_key(kind)
    }

    /// Returns the kinds `kind` depends on.
    #[must_use]
    pub fn producers_of(&self, kind: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| e.consumer == kind)
            .map(|e| e.producer.clone())
            .collect()
    }

    /// Returns the kinds that depend on `kind`.
    #[must_use]
    pub fn consumers_of(&self, kind: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| e.producer == kind)
            .map(|e| e.consumer.clone())
            .collect()
    }

    /// Returns every kind that transitively depends on `kind`.
    #[must_use]
    pub fn dependents_closure(&self, kind: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = self.consumers_of(kind).into();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.consumers_of(&next));
            }
        }
        seen
    }

    /// Returns true if `order` lists every kind and places each producer
    /// before its consumers.
    #[must_use]
    pub fn is_valid_order(&self, order: &[String]) -> bool {
        let index: BTreeMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, kind)| (kind.as_str(), i))
            .collect();
        if self.display_names.keys().any(|k| !index.contains_key(k.as_str())) {
            return false;
        }
        self.edges.iter().all(|edge| {
            match (index.get(edge.producer.as_str()), index.get(edge.consumer.as_str())) {
                (Some(p), Some(c)) => p < c,
                _ => false,
            }
        })
    }
}

/// Tarjan's strongly-connected-components state.
struct Tarjan<'a> {
    adjacency: BTreeMap<&'a str, Vec<&'a str>>,
    index: BTreeMap<&'a str, usize>,
    lowlink: BTreeMap<&'a str, usize>,
    on_stack: BTreeSet<&'a str>,
    stack: Vec<&'a str>,
    next_index: usize,
    components: Vec<Vec<&'a str>>,
}

impl<'a> Tarjan<'a> {
    fn visit(&mut self, node: &'a str) {
        self.index.insert(node, self.next_index);
        self.lowlink.insert(node, self.next_index);
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let successors = self.adjacency.get(node).cloned().unwrap_or_default();
        for next in successors {
            if !self.index.contains_key(next) {
                self.visit(next);
                let low = self.lowlink[node].min(self.lowlink[next]);
                self.lowlink.insert(node, low);
            } else if self.on_stack.contains(next) {
                let low = self.lowlink[node].min(self.index[next]);
                self.lowlink.insert(node, low);
            }
        }

        if self.lowlink[node] == self.index[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

/// Returns every cycle: components with more than one member, and
/// self-loops. Members and cycles are sorted by name.
fn find_cycles(nodes: &BTreeSet<String>, edges: &[DependencyEdge]) -> Vec<Vec<String>> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for edge in edges {
        adjacency
            .entry(edge.producer.as_str())
            .or_default()
            .push(edge.consumer.as_str());
    }

    let mut tarjan = Tarjan {
        adjacency,
        index: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        on_stack: BTreeSet::new(),
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };
    for node in nodes {
        if !tarjan.index.contains_key(node.as_str()) {
            tarjan.visit(node);
        }
    }

    let mut cycles: Vec<Vec<String>> = tarjan
        .components
        .into_iter()
        .filter(|component| {
            component.len() > 1
                || edges
                    .iter()
                    .any(|e| e.producer == component[0] && e.consumer == component[0])
        })
        .map(|component| {
            let mut members: Vec<String> = component.into_iter().map(String::from).collect();
            members.sort();
            members
        })
        .collect();
    cycles.sort();
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{ApiKind, KindSpec, ResourceKind};
    use crate::platform::memory::InMemoryPlatform;
    use crate::platform::PlatformApi;
    use serde_json::json;
    use std::sync::Arc;

    fn registry(specs: &[KindSpec]) -> KindRegistry {
        let api: Arc<dyn PlatformApi> = Arc::new(InMemoryPlatform::with_specs(specs.to_vec()));
        KindRegistry::from_kinds(specs.iter().map(|spec| {
            Arc::new(ApiKind::new(*spec, Arc::clone(&api), 10)) as Arc<dyn ResourceKind>
        }))
        .expect("registry")
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn standard() -> KindRegistry {
        let api: Arc<dyn PlatformApi> = Arc::new(InMemoryPlatform::standard());
        KindRegistry::standard(&api, 10)
    }

    #[test]
    fn test_order_respects_every_edge() {
        let registry = registry(&[
            KindSpec::minimal("a", &[]),
            KindSpec::minimal("b", &["a"]),
            KindSpec::minimal("c", &["a"]),
        ]);
        let graph = DependencyGraph::build(&registry, &names(&["a", "b", "c"]), &BTreeMap::new())
            .expect("graph");

        assert_eq!(graph.deploy_order(), names(&["a", "b", "c"]));
        assert!(graph.is_valid_order(&names(&["a", "b", "c"])));
        assert!(graph.is_valid_order(&names(&["a", "c", "b"])));
        assert!(!graph.is_valid_order(&names(&["b", "a", "c"])));
        assert_eq!(graph.delete_order(), names(&["c", "b", "a"]));
        assert_eq!(graph.levels().len(), 2);
    }

    #[test]
    fn test_mutual_dependency_is_one_cycle() {
        let registry = registry(&[
            KindSpec::minimal("a", &["b"]),
            KindSpec::minimal("b", &["a"]),
            KindSpec::minimal("c", &[]),
        ]);
        let err = DependencyGraph::build(&registry, &names(&["a", "c"]), &BTreeMap::new())
            .expect_err("cycle");
        match err {
            ConfigError::DependencyCycle { cycles } => {
                assert_eq!(cycles, vec![names(&["a", "b"])]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let registry = registry(&[KindSpec::minimal("a", &["a"])]);
        let err = DependencyGraph::build(&registry, &names(&["a"]), &BTreeMap::new())
            .expect_err("self loop");
        assert!(err.to_string().contains("{a}"));
    }

    #[test]
    fn test_unknown_dependency() {
        let registry = registry(&[KindSpec::minimal("a", &["ghost"])]);
        let err = DependencyGraph::build(&registry, &names(&["a"]), &BTreeMap::new())
            .expect_err("unknown");
        assert!(matches!(
            err,
            ConfigError::UnknownKind { ref kind, referenced_by: Some(ref by) }
                if kind == "ghost" && by == "a"
        ));
    }

    #[test]
    fn test_selection_pulls_in_dependencies_with_notes() {
        let graph = DependencyGraph::build(&standard(), &names(&["pipelines"]), &BTreeMap::new())
            .expect("graph");
        let order = graph.deploy_order();
        assert_eq!(order, names(&["datasets", "spaces", "schemas", "pipelines"]));
        assert!(graph.is_valid_order(&order));
        assert!(graph
            .notes()
            .iter()
            .any(|n| n == "additional kinds included due to dependency pipelines\u{2192}schemas"));
        let expected: BTreeSet<String> =
            ["pipelines", "schemas"].iter().map(ToString::to_string).collect();
        assert_eq!(graph.dependents_closure("spaces"), expected);
    }

    #[test]
    fn test_dynamic_dependency_adds_kind() {
        let mut locals = BTreeMap::new();
        let fields = match json!({ "space": "sp", "externalId": "dp", "sourcePipeline": "p1" }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        locals.insert(
            String::from("data_products"),
            vec![LocalDescriptor::new("data_products", fields)],
        );

        let graph = DependencyGraph::build(&standard(), &names(&["data_products"]), &locals)
            .expect("graph");
        assert!(graph.contains("pipelines"));
        assert!(graph.producers_of("data_products").contains(&String::from("pipelines")));
        assert!(graph
            .notes()
            .iter()
            .any(|n| n.starts_with("dynamic dependency data_products.sourcePipeline")));
        assert!(graph.edges().iter().any(|e| matches!(
            &e.origin,
            EdgeOrigin::Dynamic { field } if field == "sourcePipeline"
        )));
    }

    #[test]
    fn test_dynamic_reference_on_static_edge_still_noted() {
        let consumer = KindSpec {
            dynamic_references: &[("source", "a")],
            ..KindSpec::minimal("b", &["a"])
        };
        let registry = registry(&[KindSpec::minimal("a", &[]), consumer]);
        let fields = |id: &str| match json!({ "externalId": id, "source": "x" }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut locals = BTreeMap::new();
        locals.insert(
            String::from("b"),
            vec![
                LocalDescriptor::new("b", fields("b1")),
                LocalDescriptor::new("b", fields("b2")),
            ],
        );

        let graph = DependencyGraph::build(&registry, &names(&["a", "b"]), &locals).expect("graph");
        assert_eq!(graph.deploy_order(), names(&["a", "b"]));
        assert_eq!(graph.edges().len(), 1);
        let dynamic: Vec<&String> = graph
            .notes()
            .iter()
            .filter(|n| n.starts_with("dynamic dependency b.source"))
            .collect();
        assert_eq!(dynamic.len(), 1);
    }

    #[test]
    fn test_full_standard_order() {
        let registry = standard();
        let all: Vec<String> = registry.names().map(ToString::to_string).collect();
        let graph = DependencyGraph::build(&registry, &all, &BTreeMap::new()).expect("graph");
        assert_eq!(
            graph.deploy_order(),
            names(&["datasets", "spaces", "schemas", "data_products", "pipelines", "schedules"])
        );
    }
}
