//! Cell dependency tracking.
//!
//! Edges are address pairs, not owning pointers: cycles live in the data, not
//! in the type system. Each node records its precedents (outgoing edges),
//! dependents (incoming edges), and range precedents; a separate index lists
//! the observers of each range. Empty nodes (no formula, no edges, no range
//! precedents) are pruned by every edge-removal operation.

use std::collections::{HashMap, HashSet};

use sheet_model::{CellId, SheetRange};

#[derive(Debug, Default)]
struct GraphNode {
    /// Cells this cell's formula reads.
    precedents: HashSet<CellId>,
    /// Cells whose formulas read this cell.
    dependents: HashSet<CellId>,
    /// Ranges this cell's formula reads.
    range_precedents: HashSet<SheetRange>,
    /// True while the cell holds a formula; keeps the node alive even with
    /// no edges.
    has_formula: bool,
}

impl GraphNode {
    fn is_empty(&self) -> bool {
        !self.has_formula
            && self.precedents.is_empty()
            && self.dependents.is_empty()
            && self.range_precedents.is_empty()
    }
}

/// Tracks cell→cell and cell→range precedence, the dirty set, and the
/// volatile set.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<CellId, GraphNode>,
    /// range → cells observing it.
    range_observers: HashMap<SheetRange, HashSet<CellId>>,
    /// Cells needing recalculation.
    dirty: HashSet<CellId>,
    /// Cells whose formulas contain a volatile builtin.
    volatile: HashSet<CellId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn cleanup_if_empty(&mut self, addr: CellId) {
        if let Some(node) = self.nodes.get(&addr) {
            if node.is_empty() {
                self.nodes.remove(&addr);
                self.dirty.remove(&addr);
            }
        }
    }

    /// Record that `from`'s formula reads `to`.
    pub fn add_cell_dependency(&mut self, from: CellId, to: CellId) {
        self.nodes.entry(from).or_default().precedents.insert(to);
        self.nodes.entry(to).or_default().dependents.insert(from);
    }

    pub fn remove_cell_dependency(&mut self, from: CellId, to: CellId) -> bool {
        let (Some(_), Some(_)) = (self.nodes.get(&from), self.nodes.get(&to)) else {
            return false;
        };

        if let Some(node) = self.nodes.get_mut(&from) {
            node.precedents.remove(&to);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.dependents.remove(&from);
        }

        self.cleanup_if_empty(from);
        self.cleanup_if_empty(to);
        true
    }

    /// Record that `from`'s formula reads `range`.
    pub fn add_range_dependency(&mut self, from: CellId, range: SheetRange) {
        self.nodes
            .entry(from)
            .or_default()
            .range_precedents
            .insert(range);
        self.range_observers.entry(range).or_default().insert(from);
    }

    pub fn remove_range_dependency(&mut self, from: CellId, range: SheetRange) -> bool {
        let Some(node) = self.nodes.get_mut(&from) else {
            return false;
        };
        node.range_precedents.remove(&range);

        if let Some(observers) = self.range_observers.get_mut(&range) {
            observers.remove(&from);
            if observers.is_empty() {
                self.range_observers.remove(&range);
            }
        }

        self.cleanup_if_empty(from);
        true
    }

    /// Drop every precedent edge of `addr` (both cell and range).
    pub fn clear_dependencies(&mut self, addr: CellId) {
        let Some(node) = self.nodes.get(&addr) else {
            return;
        };

        let precedents: Vec<CellId> = node.precedents.iter().copied().collect();
        let ranges: Vec<SheetRange> = node.range_precedents.iter().copied().collect();

        for to in precedents {
            self.remove_cell_dependency(addr, to);
        }
        for range in ranges {
            self.remove_range_dependency(addr, range);
        }
    }

    /// Remove a node and all edges touching it. Returns false if the cell
    /// was not tracked.
    pub fn remove_node(&mut self, addr: CellId) -> bool {
        let Some(node) = self.nodes.remove(&addr) else {
            return false;
        };

        for precedent in &node.precedents {
            if let Some(p) = self.nodes.get_mut(precedent) {
                p.dependents.remove(&addr);
            }
            self.cleanup_if_empty(*precedent);
        }

        // Dependent cells keep their node (they may have formulas); they are
        // pruned later once genuinely empty.
        for dependent in &node.dependents {
            if let Some(d) = self.nodes.get_mut(dependent) {
                d.precedents.remove(&addr);
            }
        }

        for range in &node.range_precedents {
            if let Some(observers) = self.range_observers.get_mut(range) {
                observers.remove(&addr);
                if observers.is_empty() {
                    self.range_observers.remove(range);
                }
            }
        }

        self.dirty.remove(&addr);
        self.volatile.remove(&addr);
        true
    }

    /// Mark the node as formula-bearing so it survives edge pruning.
    pub fn set_formula(&mut self, addr: CellId) {
        self.nodes.entry(addr).or_default().has_formula = true;
    }

    /// Drop the formula marker (the cell became a data cell).
    pub fn clear_formula(&mut self, addr: CellId) {
        if let Some(node) = self.nodes.get_mut(&addr) {
            node.has_formula = false;
        }
        self.cleanup_if_empty(addr);
    }

    pub fn mark_dirty(&mut self, addr: CellId) {
        self.dirty.insert(addr);
    }

    /// Mark every observer of exactly `range` dirty.
    pub fn mark_range_dirty(&mut self, range: SheetRange) {
        let observers: Vec<CellId> = self
            .range_observers
            .get(&range)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for observer in observers {
            self.mark_dirty(observer);
        }
    }

    /// Walk every observed range and, when `addr` lies inside one, mark all
    /// of its observers dirty. This is the bridge that makes range observers
    /// react to writes inside their range even when no explicit cell-level
    /// edge exists. Linear in the number of observed ranges.
    pub fn mark_cell_if_in_range_dirty(&mut self, addr: CellId) {
        let mut to_mark: Vec<CellId> = Vec::new();
        for (range, observers) in &self.range_observers {
            if range.contains(addr) {
                to_mark.extend(observers.iter().copied());
            }
        }
        for observer in to_mark {
            self.mark_dirty(observer);
        }
    }

    pub fn is_dirty(&self, addr: CellId) -> bool {
        self.dirty.contains(&addr)
    }

    pub fn clear_dirty(&mut self, addr: CellId) {
        self.dirty.remove(&addr);
    }

    pub fn clear_all_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Snapshot of the dirty set.
    pub fn dirty_cells(&self) -> Vec<CellId> {
        self.dirty.iter().copied().collect()
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Cells directly depending on `addr`, sorted.
    pub fn direct_dependents(&self, addr: CellId) -> Vec<CellId> {
        let mut out: Vec<CellId> = self
            .nodes
            .get(&addr)
            .map(|node| node.dependents.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// All cells transitively affected by `addr`, sorted.
    pub fn all_dependents(&self, addr: CellId) -> Vec<CellId> {
        let mut visited = HashSet::new();
        visited.insert(addr);
        let mut out = Vec::new();
        let mut stack = vec![addr];

        while let Some(cur) = stack.pop() {
            if let Some(node) = self.nodes.get(&cur) {
                for &dep in &node.dependents {
                    if visited.insert(dep) {
                        out.push(dep);
                        stack.push(dep);
                    }
                }
            }
        }

        out.sort();
        out
    }

    /// Cells `addr` directly depends on, sorted.
    pub fn direct_precedents(&self, addr: CellId) -> Vec<CellId> {
        let mut out: Vec<CellId> = self
            .nodes
            .get(&addr)
            .map(|node| node.precedents.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Ranges `addr` depends on, sorted.
    pub fn range_precedents(&self, addr: CellId) -> Vec<SheetRange> {
        let mut out: Vec<SheetRange> = self
            .nodes
            .get(&addr)
            .map(|node| node.range_precedents.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Tracked cells whose precedents (cell or range) live on `sheet_id`,
    /// sorted.
    pub fn cells_depending_on_sheet(&self, sheet_id: u32) -> Vec<CellId> {
        let mut out: Vec<CellId> = self
            .nodes
            .iter()
            .filter(|(_, node)| {
                node.precedents.iter().any(|p| p.sheet_id == sheet_id)
                    || node
                        .range_precedents
                        .iter()
                        .any(|r| r.sheet_id == sheet_id)
            })
            .map(|(&addr, _)| addr)
            .collect();
        out.sort();
        out
    }

    /// Tracked cells located on `sheet_id`, sorted.
    pub fn cells_on_sheet(&self, sheet_id: u32) -> Vec<CellId> {
        let mut out: Vec<CellId> = self
            .nodes
            .keys()
            .filter(|addr| addr.sheet_id == sheet_id)
            .copied()
            .collect();
        out.sort();
        out
    }

    pub fn mark_volatile(&mut self, addr: CellId) {
        self.volatile.insert(addr);
    }

    pub fn unmark_volatile(&mut self, addr: CellId) {
        self.volatile.remove(&addr);
    }

    pub fn is_volatile(&self, addr: CellId) -> bool {
        self.volatile.contains(&addr)
    }

    pub fn volatile_cells(&self) -> Vec<CellId> {
        let mut out: Vec<CellId> = self.volatile.iter().copied().collect();
        out.sort();
        out
    }

    /// Seed the dirty set with every volatile cell.
    pub fn mark_all_volatile_dirty(&mut self) {
        let volatile: Vec<CellId> = self.volatile.iter().copied().collect();
        for addr in volatile {
            self.mark_dirty(addr);
        }
    }

    /// A topological-ish visit order over all tracked nodes (precedents
    /// first) and whether a cycle exists.
    ///
    /// Three-color DFS: unvisited / on-stack / done. A gray→gray edge sets
    /// the cycle flag; the path is abandoned but visitation continues so
    /// every node is ordered.
    pub fn calculation_order(&self) -> (Vec<CellId>, bool) {
        // state: absent = unvisited, false = on stack, true = done.
        let mut state: HashMap<CellId, bool> = HashMap::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut has_cycle = false;

        let mut roots: Vec<CellId> = self.nodes.keys().copied().collect();
        roots.sort();

        for root in roots {
            if !state.contains_key(&root) && self.visit(root, &mut state, &mut order) {
                has_cycle = true;
            }
        }

        (order, has_cycle)
    }

    fn visit(
        &self,
        addr: CellId,
        state: &mut HashMap<CellId, bool>,
        order: &mut Vec<CellId>,
    ) -> bool {
        if let Some(&done) = state.get(&addr) {
            // Gray hit: the caller found a cycle.
            return !done;
        }

        state.insert(addr, false);
        let mut cycle = false;

        if let Some(node) = self.nodes.get(&addr) {
            let mut precedents: Vec<CellId> = node.precedents.iter().copied().collect();
            precedents.sort();
            for precedent in precedents {
                if self.visit(precedent, state, order) {
                    cycle = true;
                }
            }
        }

        state.insert(addr, true);
        order.push(addr);
        cycle
    }

    pub fn has_cycle(&self) -> bool {
        self.calculation_order().1
    }

    /// Number of tracked nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of observed ranges.
    pub fn range_observer_count(&self) -> usize {
        self.range_observers.len()
    }
}
