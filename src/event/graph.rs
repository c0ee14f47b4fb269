use std::collections::{BTreeMap, BTreeSet};

/// Directed graph with an edge from every node to the nodes depending on it.
#[derive(Clone, Debug, Default)]
pub(crate) struct DirectedGraph<N> {
    edges: BTreeMap<N, BTreeSet<N>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl<N: Ord + Clone> DirectedGraph<N> {
    pub fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, node: N) {
        self.edges.entry(node).or_default();
    }

    pub fn connect(&mut self, node: N, successor: N) {
        self.insert(successor.clone());
        self.edges.entry(node).or_default().insert(successor);
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn is_successor(&self, node: &N) -> bool {
        self.edges.values().any(|it| it.contains(node))
    }

    /// Removes and returns a node no other node points to.
    pub fn pop(&mut self) -> Option<N> {
        let node = self.edges.keys().find(|it| !self.is_successor(it))?.clone();
        self.edges.remove(&node);
        Some(node)
    }

    pub fn is_cyclic(&self) -> bool {
        let mut colors: BTreeMap<&N, Color> =
            self.edges.keys().map(|it| (it, Color::White)).collect();
        self.edges
            .keys()
            .any(|it| colors[it] == Color::White && self.has_cycle_from(it, &mut colors))
    }

    fn has_cycle_from<'a>(&'a self, node: &'a N, colors: &mut BTreeMap<&'a N, Color>) -> bool {
        colors.insert(node, Color::Gray);
        if let Some(successors) = self.edges.get(node) {
            for it in successors {
                match colors.get(it).copied().unwrap_or(Color::White) {
                    Color::Gray => return true,
                    Color::White if self.has_cycle_from(it, colors) => return true,
                    _ => (),
                }
            }
        }
        colors.insert(node, Color::Black);
        false
    }

    /// Drains the graph in dependency order, `None` if it is cyclic.
    pub fn into_topological_order(mut self) -> Option<Vec<N>> {
        let mut order = Vec::with_capacity(self.edges.len());
        while !self.is_empty() {
            order.push(self.pop()?);
        }
        Some(order)
    }
}

#[cfg(test)]
mod test {
    use super::DirectedGraph;

    #[test]
    fn test_topological_order() {
        let mut graph = DirectedGraph::new();
        graph.connect("ipc", "ratio");
        graph.connect("cpi", "ratio");
        graph.insert("gigahertz");
        assert!(!graph.is_cyclic());

        let order = graph.into_topological_order().unwrap();
        let at = |name| order.iter().position(|it| *it == name).unwrap();
        assert_eq!(order.len(), 4);
        assert!(at("ipc") < at("ratio"));
        assert!(at("cpi") < at("ratio"));
    }

    #[test]
    fn test_cycle() {
        let mut graph = DirectedGraph::new();
        graph.connect("a", "b");
        graph.connect("b", "c");
        assert!(!graph.is_cyclic());
        graph.connect("c", "a");
        assert!(graph.is_cyclic());
        assert_eq!(graph.into_topological_order(), None);
    }
}
