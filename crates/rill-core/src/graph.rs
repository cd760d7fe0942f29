//! Name-based dependency graph over notebook cells.
//!
//! Each node is a cell; an edge `A → B` means B reads a name that A writes.
//! The graph maintains a designated-writer index per name (last upserted
//! writer wins), rejects updates that would close a cycle while leaving the
//! prior state untouched, and answers the two affected-set queries that
//! drive reactive execution.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, VecDeque};

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::model::CellId;

/// The reactive dependency graph.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    /// The directed graph: edges go from writer to reader.
    graph: DiGraph<CellId, ()>,
    /// Cell id to node index mapping.
    node_indices: FxHashMap<CellId, NodeIndex>,
    /// Per cell, the names it reads.
    reads: FxHashMap<CellId, BTreeSet<String>>,
    /// Per cell, the names it writes.
    writes: FxHashMap<CellId, BTreeSet<String>>,
    /// Per name, the cell currently designated as its writer.
    var_writers: FxHashMap<String, CellId>,
    /// Notebook position per cell, used to break topological ties.
    order: FxHashMap<CellId, usize>,
    /// Next position assigned to cells the order map has not seen.
    next_seq: usize,
}

impl DepGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells in the graph.
    pub fn len(&self) -> usize {
        self.node_indices.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.node_indices.is_empty()
    }

    /// Whether the cell is present in the graph.
    pub fn contains(&self, cell_id: &CellId) -> bool {
        self.node_indices.contains_key(cell_id)
    }

    /// Names the cell reads, if registered.
    pub fn reads_of(&self, cell_id: &CellId) -> Option<&BTreeSet<String>> {
        self.reads.get(cell_id)
    }

    /// Names the cell writes, if registered.
    pub fn writes_of(&self, cell_id: &CellId) -> Option<&BTreeSet<String>> {
        self.writes.get(cell_id)
    }

    /// The designated writer of a name, if any.
    pub fn writer_of(&self, name: &str) -> Option<&CellId> {
        self.var_writers.get(name)
    }

    /// All edges as `(writer, reader)` pairs, sorted.
    pub fn edges(&self) -> Vec<(CellId, CellId)> {
        let mut edges: Vec<(CellId, CellId)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].clone(), self.graph[b].clone()))
            .collect();
        edges.sort();
        edges
    }

    /// Direct predecessors (cells this cell reads from).
    pub fn predecessors(&self, cell_id: &CellId) -> Vec<CellId> {
        self.neighbors(cell_id, Direction::Incoming)
    }

    /// Direct dependents (cells that read this cell's writes).
    pub fn dependents(&self, cell_id: &CellId) -> Vec<CellId> {
        self.neighbors(cell_id, Direction::Outgoing)
    }

    fn neighbors(&self, cell_id: &CellId, dir: Direction) -> Vec<CellId> {
        self.node_indices
            .get(cell_id)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, dir)
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Set the notebook position of every cell, for topological tie-breaks.
    ///
    /// Cells in the graph but absent from `cells` keep a stable position
    /// after the listed ones.
    pub fn set_order(&mut self, cells: &[CellId]) {
        let mut remaining: Vec<(usize, CellId)> = self
            .order
            .iter()
            .filter(|(id, _)| !cells.contains(id))
            .map(|(id, &seq)| (seq, id.clone()))
            .collect();
        remaining.sort();

        self.order.clear();
        for (i, id) in cells.iter().enumerate() {
            self.order.insert(id.clone(), i);
        }
        let mut next = cells.len();
        for (_, id) in remaining {
            self.order.insert(id, next);
            next += 1;
        }
        self.next_seq = next;
    }

    /// Add or redefine a cell with new dependency sets.
    ///
    /// Edges are recomputed one at a time with a reachability check before
    /// each insertion; if any insertion would close a cycle, the call fails
    /// with `CycleDetected` and the graph keeps its pre-call state.
    pub fn upsert(
        &mut self,
        cell_id: &CellId,
        reads: &BTreeSet<String>,
        writes: &BTreeSet<String>,
    ) -> Result<()> {
        let mut scratch = self.clone();
        scratch.apply_upsert(cell_id, reads, writes)?;
        *self = scratch;
        Ok(())
    }

    fn apply_upsert(
        &mut self,
        cell_id: &CellId,
        reads: &BTreeSet<String>,
        writes: &BTreeSet<String>,
    ) -> Result<()> {
        let idx = match self.node_indices.get(cell_id) {
            Some(&idx) => idx,
            None => {
                let idx = self.graph.add_node(cell_id.clone());
                self.node_indices.insert(cell_id.clone(), idx);
                self.order.entry(cell_id.clone()).or_insert_with(|| {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    seq
                });
                idx
            }
        };

        // Drop all edges incident to the cell; they are recomputed below.
        for dir in [Direction::Outgoing, Direction::Incoming] {
            loop {
                let edge = self.graph.edges_directed(idx, dir).next().map(|e| e.id());
                match edge {
                    Some(edge) => {
                        self.graph.remove_edge(edge);
                    }
                    None => break,
                }
            }
        }

        // Release names this cell no longer writes.
        if let Some(old_writes) = self.writes.get(cell_id) {
            for name in old_writes {
                if !writes.contains(name) && self.var_writers.get(name) == Some(cell_id) {
                    self.var_writers.remove(name);
                }
            }
        }

        // Take over designated-writer slots; remember whom we displaced.
        let mut displaced: BTreeSet<CellId> = BTreeSet::new();
        for name in writes {
            if let Some(prev) = self.var_writers.insert(name.clone(), cell_id.clone())
                && prev != *cell_id
            {
                displaced.insert(prev);
            }
        }

        self.reads.insert(cell_id.clone(), reads.clone());
        self.writes.insert(cell_id.clone(), writes.clone());

        // A displaced writer's outgoing edge survives only if some name it
        // still designates justifies it.
        for writer in displaced {
            let Some(&widx) = self.node_indices.get(&writer) else {
                continue;
            };
            let neighbors: Vec<NodeIndex> =
                self.graph.neighbors_directed(widx, Direction::Outgoing).collect();
            for qidx in neighbors {
                let reader = self.graph[qidx].clone();
                let justified = self
                    .writes
                    .get(&writer)
                    .is_some_and(|names| {
                        names.iter().any(|name| {
                            self.var_writers.get(name) == Some(&writer)
                                && self
                                    .reads
                                    .get(&reader)
                                    .is_some_and(|r| r.contains(name))
                        })
                    });
                if !justified && let Some(edge) = self.graph.find_edge(widx, qidx) {
                    self.graph.remove_edge(edge);
                }
            }
        }

        // Edges from designated writers of the names this cell reads.
        for name in reads {
            let Some(writer) = self.var_writers.get(name) else {
                continue;
            };
            if writer == cell_id {
                continue;
            }
            let widx = self.node_indices[writer];
            if self.graph.find_edge(widx, idx).is_none() {
                if has_path_connecting(&self.graph, idx, widx, None) {
                    return Err(Error::CycleDetected(format!(
                        "cell {cell_id} reads '{name}' from cell {writer}, which already depends on it"
                    )));
                }
                self.graph.add_edge(widx, idx, ());
            }
        }

        // Edges to cells reading names this cell now designates.
        let mut readers: Vec<&CellId> = self.reads.keys().filter(|q| *q != cell_id).collect();
        readers.sort_by_key(|q| self.order.get(*q).copied().unwrap_or(usize::MAX));
        for reader in readers {
            let wants = writes.iter().any(|name| {
                self.var_writers.get(name) == Some(cell_id)
                    && self.reads[reader].contains(name)
            });
            if !wants {
                continue;
            }
            let qidx = self.node_indices[reader];
            if self.graph.find_edge(idx, qidx).is_none() {
                if has_path_connecting(&self.graph, qidx, idx, None) {
                    return Err(Error::CycleDetected(format!(
                        "cell {reader} reads a name written by cell {cell_id}, which already depends on it"
                    )));
                }
                self.graph.add_edge(idx, qidx, ());
            }
        }

        Ok(())
    }

    /// Drop a cell and all incident edges.
    pub fn remove(&mut self, cell_id: &CellId) {
        if let Some(idx) = self.node_indices.remove(cell_id) {
            self.graph.remove_node(idx);
            // remove_node swaps the last node into the freed slot.
            if let Some(moved) = self.graph.node_weight(idx).cloned() {
                self.node_indices.insert(moved, idx);
            }
        }
        if let Some(old_writes) = self.writes.remove(cell_id) {
            for name in old_writes {
                if self.var_writers.get(&name) == Some(cell_id) {
                    self.var_writers.remove(&name);
                }
            }
        }
        self.reads.remove(cell_id);
        self.order.remove(cell_id);
    }

    /// Topologically ordered list of the cell and its transitive dependents.
    ///
    /// An unknown cell yields just itself.
    pub fn affected_on_change(&self, cell_id: &CellId) -> Result<Vec<CellId>> {
        if !self.contains(cell_id) {
            return Ok(vec![cell_id.clone()]);
        }
        let mut affected: BTreeSet<CellId> = BTreeSet::new();
        affected.insert(cell_id.clone());
        affected.extend(self.reachable(cell_id, Direction::Outgoing));
        self.topo_subset(&affected)
    }

    /// Topologically ordered list of stale ancestors (those failing
    /// `has_run`), the cell itself, and its transitive dependents.
    pub fn affected_on_run(
        &self,
        cell_id: &CellId,
        has_run: impl Fn(&CellId) -> bool,
    ) -> Result<Vec<CellId>> {
        if !self.contains(cell_id) {
            return Ok(vec![cell_id.clone()]);
        }
        let mut affected: BTreeSet<CellId> = BTreeSet::new();
        for ancestor in self.reachable(cell_id, Direction::Incoming) {
            if !has_run(&ancestor) {
                affected.insert(ancestor);
            }
        }
        affected.insert(cell_id.clone());
        affected.extend(self.reachable(cell_id, Direction::Outgoing));
        self.topo_subset(&affected)
    }

    /// Topologically order an arbitrary set of cells. Cells unknown to the
    /// graph come last, in position order.
    pub fn order_cells(&self, cells: &BTreeSet<CellId>) -> Result<Vec<CellId>> {
        let known: BTreeSet<CellId> = cells
            .iter()
            .filter(|c| self.contains(c))
            .cloned()
            .collect();
        let mut ordered = self.topo_subset(&known)?;
        ordered.extend(cells.iter().filter(|c| !self.contains(c)).cloned());
        Ok(ordered)
    }

    /// All cells reachable from `cell_id` in the given direction (excluding
    /// the cell itself).
    fn reachable(&self, cell_id: &CellId, dir: Direction) -> Vec<CellId> {
        let Some(&start) = self.node_indices.get(cell_id) else {
            return Vec::new();
        };
        let mut seen: BTreeSet<NodeIndex> = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for neighbor in self.graph.neighbors_directed(idx, dir) {
                if neighbor != start && seen.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        seen.into_iter().map(|idx| self.graph[idx].clone()).collect()
    }

    /// Kahn's algorithm over the induced subgraph, breaking ties by notebook
    /// position so execution matches visual top-to-bottom where no
    /// dependency forces otherwise.
    fn topo_subset(&self, subset: &BTreeSet<CellId>) -> Result<Vec<CellId>> {
        let mut indegree: FxHashMap<CellId, usize> = FxHashMap::default();
        for id in subset {
            let within = self
                .predecessors(id)
                .into_iter()
                .filter(|p| subset.contains(p))
                .count();
            indegree.insert(id.clone(), within);
        }

        let mut ready: BinaryHeap<Reverse<(usize, CellId)>> = indegree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(id, _)| Reverse((self.seq(id), id.clone())))
            .collect();

        let mut ordered = Vec::with_capacity(subset.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            for dependent in self.dependents(&id) {
                if let Some(degree) = indegree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.seq(&dependent), dependent)));
                    }
                }
            }
            ordered.push(id);
        }

        if ordered.len() != subset.len() {
            return Err(Error::CycleDetected(
                "cycle detected while ordering affected cells".to_string(),
            ));
        }
        Ok(ordered)
    }

    fn seq(&self, cell_id: &CellId) -> usize {
        self.order.get(cell_id).copied().unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> CellId {
        CellId::new(name)
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Structural snapshot for state-preservation assertions.
    fn snapshot(graph: &DepGraph) -> (Vec<(CellId, CellId)>, Vec<(String, CellId)>) {
        let mut writers: Vec<(String, CellId)> = graph
            .var_writers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        writers.sort();
        (graph.edges(), writers)
    }

    /// The steady-state chain used by several scenarios:
    /// c1 writes x, c2 reads x writes y, c3 reads y writes z.
    fn chain() -> DepGraph {
        let mut graph = DepGraph::new();
        graph.upsert(&id("c1"), &set(&[]), &set(&["x"])).unwrap();
        graph.upsert(&id("c2"), &set(&["x"]), &set(&["y"])).unwrap();
        graph.upsert(&id("c3"), &set(&["y"]), &set(&["z"])).unwrap();
        graph
    }

    #[test]
    fn test_empty_graph() {
        let graph = DepGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
    }

    #[test]
    fn test_linear_chain_edges_and_order() {
        let graph = chain();
        assert_eq!(
            graph.edges(),
            vec![(id("c1"), id("c2")), (id("c2"), id("c3"))]
        );
        let order = graph.affected_on_change(&id("c1")).unwrap();
        assert_eq!(order, vec![id("c1"), id("c2"), id("c3")]);
    }

    #[test]
    fn test_affected_on_change_starts_with_the_cell() {
        let graph = chain();
        let order = graph.affected_on_change(&id("c2")).unwrap();
        assert_eq!(order, vec![id("c2"), id("c3")]);
    }

    #[test]
    fn test_unknown_cell_yields_itself() {
        let graph = DepGraph::new();
        assert_eq!(
            graph.affected_on_change(&id("ghost")).unwrap(),
            vec![id("ghost")]
        );
        assert_eq!(
            graph.affected_on_run(&id("ghost"), |_| true).unwrap(),
            vec![id("ghost")]
        );
    }

    #[test]
    fn test_diamond_is_deterministic_by_position() {
        // a writes x; b and c read x; d reads both outputs.
        let mut graph = DepGraph::new();
        graph.upsert(&id("a"), &set(&[]), &set(&["x"])).unwrap();
        graph.upsert(&id("b"), &set(&["x"]), &set(&["y"])).unwrap();
        graph.upsert(&id("c"), &set(&["x"]), &set(&["z"])).unwrap();
        graph
            .upsert(&id("d"), &set(&["y", "z"]), &set(&["w"]))
            .unwrap();
        graph.set_order(&[id("a"), id("b"), id("c"), id("d")]);

        let order = graph.affected_on_change(&id("a")).unwrap();
        assert_eq!(order, vec![id("a"), id("b"), id("c"), id("d")]);

        // Flip b and c in the notebook; the tie resolves the other way.
        graph.set_order(&[id("a"), id("c"), id("b"), id("d")]);
        let order = graph.affected_on_change(&id("a")).unwrap();
        assert_eq!(order, vec![id("a"), id("c"), id("b"), id("d")]);
    }

    #[test]
    fn test_cycle_rejected_and_state_preserved() {
        let mut graph = chain();
        let before = snapshot(&graph);

        // Making c1 read z would close c1 -> c2 -> c3 -> c1.
        let result = graph.upsert(&id("c1"), &set(&["z"]), &set(&["x"]));
        assert!(matches!(result, Err(Error::CycleDetected(_))));
        assert_eq!(snapshot(&graph), before);

        // The graph still answers queries as before.
        assert_eq!(
            graph.affected_on_change(&id("c1")).unwrap(),
            vec![id("c1"), id("c2"), id("c3")]
        );
    }

    #[test]
    fn test_direct_cycle_between_two_cells() {
        let mut graph = DepGraph::new();
        graph.upsert(&id("a"), &set(&["n"]), &set(&["m"])).unwrap();
        let result = graph.upsert(&id("b"), &set(&["m"]), &set(&["n"]));
        assert!(matches!(result, Err(Error::CycleDetected(_))));
    }

    #[test]
    fn test_self_reference_creates_no_edge() {
        // Augmented assignment: the cell reads and writes the same name.
        let mut graph = DepGraph::new();
        graph.upsert(&id("a"), &set(&["x"]), &set(&["x"])).unwrap();
        assert!(graph.edges().is_empty());
        assert_eq!(graph.writer_of("x"), Some(&id("a")));
    }

    #[test]
    fn test_last_writer_wins_rewires_edges() {
        let mut graph = DepGraph::new();
        graph.upsert(&id("w1"), &set(&[]), &set(&["x"])).unwrap();
        graph.upsert(&id("r"), &set(&["x"]), &set(&[])).unwrap();
        assert_eq!(graph.edges(), vec![(id("w1"), id("r"))]);

        // A later writer of x takes over the designation and the edge.
        graph.upsert(&id("w2"), &set(&[]), &set(&["x"])).unwrap();
        assert_eq!(graph.writer_of("x"), Some(&id("w2")));
        assert_eq!(graph.edges(), vec![(id("w2"), id("r"))]);
    }

    #[test]
    fn test_displaced_edge_survives_if_another_name_justifies_it() {
        let mut graph = DepGraph::new();
        graph.upsert(&id("w"), &set(&[]), &set(&["x", "y"])).unwrap();
        graph.upsert(&id("r"), &set(&["x", "y"]), &set(&[])).unwrap();
        // Steal only x; the w -> r edge must remain for y.
        graph.upsert(&id("thief"), &set(&[]), &set(&["x"])).unwrap();
        assert_eq!(
            graph.edges(),
            vec![(id("thief"), id("r")), (id("w"), id("r"))]
        );
    }

    #[test]
    fn test_redefinition_releases_names() {
        let mut graph = DepGraph::new();
        graph.upsert(&id("a"), &set(&[]), &set(&["x", "y"])).unwrap();
        graph.upsert(&id("a"), &set(&[]), &set(&["y"])).unwrap();
        assert_eq!(graph.writer_of("x"), None);
        assert_eq!(graph.writer_of("y"), Some(&id("a")));
    }

    #[test]
    fn test_remove_drops_node_and_writer_entries() {
        let mut graph = chain();
        graph.remove(&id("c2"));
        assert!(!graph.contains(&id("c2")));
        assert_eq!(graph.writer_of("y"), None);
        assert!(graph.edges().is_empty());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_affected_on_run_includes_stale_ancestors() {
        let graph = chain();

        // Nothing has run: running c3 pulls in both ancestors.
        let order = graph.affected_on_run(&id("c3"), |_| false).unwrap();
        assert_eq!(order, vec![id("c1"), id("c2"), id("c3")]);

        // c1 already ran: only the stale c2 is included.
        let order = graph
            .affected_on_run(&id("c3"), |c| c == &id("c1"))
            .unwrap();
        assert_eq!(order, vec![id("c2"), id("c3")]);

        // Everything ran: just the requested cell and its dependents.
        let order = graph.affected_on_run(&id("c1"), |_| true).unwrap();
        assert_eq!(order, vec![id("c1"), id("c2"), id("c3")]);
    }

    #[test]
    fn test_upsert_after_remove_leaves_no_trace() {
        let mut graph = DepGraph::new();
        let before = snapshot(&graph);
        graph.upsert(&id("tmp"), &set(&["q"]), &set(&["t"])).unwrap();
        graph.remove(&id("tmp"));
        assert_eq!(snapshot(&graph), before);
    }

    #[test]
    fn test_many_upserts_stay_acyclic() {
        // Random-ish edit sequence; the graph must remain a DAG throughout.
        let mut graph = DepGraph::new();
        let cells = ["a", "b", "c", "d", "e"];
        let specs: &[(&str, &[&str], &[&str])] = &[
            ("a", &[], &["x"]),
            ("b", &["x"], &["y"]),
            ("c", &["y"], &["z"]),
            ("b", &["x", "q"], &["y"]),
            ("d", &[], &["q"]),
            ("e", &["z", "q"], &["r"]),
            ("a", &["q"], &["x"]),
        ];
        for (cell, reads, writes) in specs {
            graph.upsert(&id(cell), &set(reads), &set(writes)).unwrap();
        }
        for cell in cells {
            if graph.contains(&id(cell)) {
                // Topological ordering succeeds only on a DAG.
                graph.affected_on_change(&id(cell)).unwrap();
            }
        }
    }
}
