//! Import graph of a translation.
//!
//! Documents are reached breadth first from the root so each is seen at its
//! shallowest depth. Imports that close a cycle, go too deep or point at an
//! unreadable document are reported on the `import` statement and dropped;
//! the remaining graph is acyclic and gives the build order.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use url::Url;

use crate::dsl::ast::Statement;
use crate::dsl::{Diagnostic, Location, Span};
use crate::semantic::error::SemanticError;

use super::{document_location, import_failed, DocumentEntry, TranslationState};

/// One `import` statement resolved to an absolute URL.
#[derive(Debug, Clone)]
struct ImportEdge {
    from: String,
    written: String,
    target: String,
    span: Span,
}

#[derive(Debug, Default)]
pub(super) struct ImportGraph {
    /// Reachable documents that parsed.
    documents: BTreeSet<String>,
    /// Reachable URLs with no text supplied yet.
    missing: BTreeSet<String>,
    diagnostics: Vec<Diagnostic>,
    /// Usable imports per document: (URL as written, resolved URL).
    imports: BTreeMap<String, Vec<(String, String)>>,
    order: Vec<String>,
}

impl ImportGraph {
    pub(super) fn walk(state: &TranslationState, max_depth: usize) -> Self {
        let mut graph = ImportGraph::default();
        let mut edges = Vec::new();
        let mut seen = BTreeSet::from([state.root.clone()]);
        let mut queue = VecDeque::from([(state.root.clone(), 0usize)]);

        while let Some((url, depth)) = queue.pop_front() {
            match state.documents.get(&url) {
                None => {
                    graph.missing.insert(url);
                }
                Some(DocumentEntry::Unreadable(message)) => {
                    // Importers report their own failed imports.
                    if url == state.root {
                        graph
                            .diagnostics
                            .push(import_failed(&url, message).at(&document_location(&url)));
                    }
                }
                Some(DocumentEntry::Rejected(diagnostics)) => {
                    graph.diagnostics.extend(diagnostics.iter().cloned());
                }
                Some(DocumentEntry::Parsed(document)) => {
                    for statement in &document.statements {
                        let Statement::Import(import) = statement else {
                            continue;
                        };
                        let location = Location::new(url.as_str(), import.span);
                        let target = match resolve(&url, &import.url) {
                            Ok(target) => target,
                            Err(err) => {
                                graph.diagnostics.push(
                                    import_failed(&import.url, &err.to_string()).at(&location),
                                );
                                continue;
                            }
                        };
                        if depth + 1 > max_depth {
                            let err = SemanticError::ImportTooDeep {
                                url: target,
                                depth: max_depth,
                            };
                            graph.diagnostics.push(err.at(&location));
                            continue;
                        }
                        tracing::trace!(from = %url, to = %target, "import");
                        edges.push(ImportEdge {
                            from: url.clone(),
                            written: import.url.clone(),
                            target: target.clone(),
                            span: import.span,
                        });
                        if seen.insert(target.clone()) {
                            queue.push_back((target, depth + 1));
                        }
                    }
                    graph.documents.insert(url);
                }
            }
        }

        if graph.missing.is_empty() {
            graph.link(state, edges);
        }
        graph
    }

    /// Drop unusable imports, report cycles and fix the build order.
    fn link(&mut self, state: &TranslationState, edges: Vec<ImportEdge>) {
        let mut usable = Vec::new();
        for edge in edges {
            match state.documents.get(&edge.target) {
                Some(DocumentEntry::Parsed(_)) => usable.push(edge),
                Some(DocumentEntry::Unreadable(message)) => {
                    let location = Location::new(edge.from.as_str(), edge.span);
                    self.diagnostics
                        .push(import_failed(&edge.target, message).at(&location));
                }
                // Parse errors of the target are already reported.
                _ => {}
            }
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let nodes: HashMap<&str, NodeIndex> = self
            .documents
            .iter()
            .map(|url| (url.as_str(), graph.add_node(url.as_str())))
            .collect();
        let endpoints = |edge: &ImportEdge| {
            Some((*nodes.get(edge.from.as_str())?, *nodes.get(edge.target.as_str())?))
        };
        let linked: Vec<(ImportEdge, NodeIndex, NodeIndex)> = usable
            .into_iter()
            .filter_map(|edge| endpoints(&edge).map(|(from, to)| (edge, from, to)))
            .collect();
        for (_, from, to) in &linked {
            graph.add_edge(*from, *to, ());
        }

        let mut component: HashMap<NodeIndex, usize> = HashMap::new();
        for (index, scc) in tarjan_scc(&graph).into_iter().enumerate() {
            let cyclic = match scc.as_slice() {
                [node] => graph.contains_edge(*node, *node),
                _ => true,
            };
            if cyclic {
                component.extend(scc.into_iter().map(|node| (node, index)));
            }
        }

        let mut acyclic = graph.clone();
        acyclic.clear_edges();
        for (edge, from, to) in linked {
            let closes_cycle = matches!(
                (component.get(&from), component.get(&to)),
                (Some(a), Some(b)) if a == b
            );
            if closes_cycle {
                let location = Location::new(edge.from.as_str(), edge.span);
                let err = SemanticError::ImportCycle {
                    url: edge.target.clone(),
                };
                self.diagnostics.push(err.at(&location));
                continue;
            }
            acyclic.add_edge(from, to, ());
            self.imports
                .entry(edge.from)
                .or_default()
                .push((edge.written, edge.target));
        }

        // Importers come before their imports; build in reverse.
        self.order = match toposort(&acyclic, None) {
            Ok(sorted) => sorted
                .into_iter()
                .rev()
                .map(|node| acyclic[node].to_string())
                .collect(),
            Err(cycle) => {
                tracing::warn!(node = ?cycle.node_id(), "import cycle survived linking");
                self.documents.iter().cloned().collect()
            }
        };
    }

    pub(super) fn documents(&self) -> &BTreeSet<String> {
        &self.documents
    }

    pub(super) fn missing(&self) -> &BTreeSet<String> {
        &self.missing
    }

    pub(super) fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Documents in dependency order, imports first.
    pub(super) fn build_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub(super) fn imports_of(&self, url: &str) -> &[(String, String)] {
        self.imports.get(url).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Resolve `target` against the importing document's URL.
fn resolve(base: &str, target: &str) -> Result<String, url::ParseError> {
    match Url::parse(base) {
        Ok(base) => base.join(target).map(String::from),
        Err(_) => Url::parse(target).map(String::from),
    }
}
