use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use sheet_model::CellId;

use crate::ast::Expr;

/// References a freed formula was holding on other tables, handed back to
/// the caller so the worksheet and named-range refcounts can be balanced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormulaRelease {
    /// One entry per worksheet reference occurrence in the tree.
    pub referenced_sheets: Vec<u32>,
    /// One entry per named-range reference occurrence in the tree.
    pub named_ranges: Vec<u32>,
}

/// Central formula storage with structural deduplication.
///
/// The intern key is the canonical printed form of the expression tree, so
/// two formulas with identical trees (whatever their source spelling) share
/// one id. The table also maintains the forward (`cell → id`) and reverse
/// (`id → cells`) indexes, the owning-worksheet set, and the worksheet /
/// named-range reference bookkeeping used for eager release.
#[derive(Debug, Default)]
pub struct FormulaTable {
    key_to_id: HashMap<String, u32>,
    trees: HashMap<u32, Rc<Expr>>,
    ref_counts: HashMap<u32, u32>,

    cells_using: HashMap<u32, HashSet<CellId>>,
    formula_at_cell: HashMap<CellId, u32>,

    owning_sheets: HashMap<u32, HashSet<u32>>,
    referenced_sheets: HashMap<u32, Vec<u32>>,

    named_ranges_used: HashMap<u32, Vec<u32>>,
    formulas_using_name: HashMap<u32, HashSet<u32>>,

    next_id: u32,
}

impl FormulaTable {
    pub fn new() -> Self {
        Self {
            next_id: 1, // id 0 is reserved for "no formula"
            ..Self::default()
        }
    }

    /// Intern a tree for `cell`, deduplicating on the canonical key.
    /// Returns the id and whether the tree was newly created.
    pub fn intern(&mut self, tree: Expr, cell: CellId) -> (u32, bool) {
        let key = tree.to_string();

        if let Some(&id) = self.key_to_id.get(&key) {
            *self.ref_counts.entry(id).or_insert(0) += 1;
            self.track_cell(id, cell);
            return (id, false);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.key_to_id.insert(key, id);
        self.trees.insert(id, Rc::new(tree));
        self.ref_counts.insert(id, 1);
        self.track_cell(id, cell);
        (id, true)
    }

    fn track_cell(&mut self, id: u32, cell: CellId) {
        if let Some(&old_id) = self.formula_at_cell.get(&cell) {
            if old_id != id {
                if let Some(cells) = self.cells_using.get_mut(&old_id) {
                    cells.remove(&cell);
                    if cells.is_empty() {
                        self.cells_using.remove(&old_id);
                    }
                }
            }
        }

        self.cells_using.entry(id).or_default().insert(cell);
        self.formula_at_cell.insert(cell, id);
        self.owning_sheets.entry(id).or_default().insert(cell.sheet_id);
    }

    /// The cached tree for a formula id.
    pub fn tree(&self, id: u32) -> Option<Rc<Expr>> {
        self.trees.get(&id).cloned()
    }

    /// The formula id held by a cell, if any.
    pub fn formula_at(&self, cell: CellId) -> Option<u32> {
        self.formula_at_cell.get(&cell).copied()
    }

    /// Remove a cell's reference to a formula. When the last reference goes
    /// away the formula is freed and its worksheet / named-range references
    /// are handed back for release.
    pub fn remove_cell_reference(&mut self, id: u32, cell: CellId) -> Option<FormulaRelease> {
        if let Some(cells) = self.cells_using.get_mut(&id) {
            cells.remove(&cell);
            if cells.is_empty() {
                self.cells_using.remove(&id);
            }
        }
        if self.formula_at_cell.get(&cell) == Some(&id) {
            self.formula_at_cell.remove(&cell);
        }

        let count = self.ref_counts.get_mut(&id)?;
        *count = count.saturating_sub(1);
        if *count == 0 {
            return Some(self.remove_formula(id));
        }

        self.update_sheet_ownership(id, cell.sheet_id);
        None
    }

    fn remove_formula(&mut self, id: u32) -> FormulaRelease {
        if let Some(tree) = self.trees.remove(&id) {
            self.key_to_id.remove(&tree.to_string());
        }
        self.ref_counts.remove(&id);
        self.cells_using.remove(&id);
        self.owning_sheets.remove(&id);

        let release = FormulaRelease {
            referenced_sheets: self.referenced_sheets.remove(&id).unwrap_or_default(),
            named_ranges: self.named_ranges_used.remove(&id).unwrap_or_default(),
        };

        for &name_id in &release.named_ranges {
            if let Some(formulas) = self.formulas_using_name.get_mut(&name_id) {
                formulas.remove(&id);
                if formulas.is_empty() {
                    self.formulas_using_name.remove(&name_id);
                }
            }
        }

        release
    }

    fn update_sheet_ownership(&mut self, id: u32, sheet_id: u32) {
        let still_used = self
            .cells_using
            .get(&id)
            .is_some_and(|cells| cells.iter().any(|c| c.sheet_id == sheet_id));

        if !still_used {
            if let Some(sheets) = self.owning_sheets.get_mut(&id) {
                sheets.remove(&sheet_id);
                if sheets.is_empty() {
                    self.owning_sheets.remove(&id);
                }
            }
        }
    }

    /// Record that the tree behind `id` references worksheet `sheet_id`
    /// (once per occurrence).
    pub fn track_worksheet_reference(&mut self, id: u32, sheet_id: u32) {
        self.referenced_sheets.entry(id).or_default().push(sheet_id);
    }

    /// Record that the tree behind `id` uses named range `name_id` (once per
    /// occurrence).
    pub fn track_named_range_reference(&mut self, id: u32, name_id: u32) {
        self.named_ranges_used.entry(id).or_default().push(name_id);
        self.formulas_using_name
            .entry(name_id)
            .or_default()
            .insert(id);
    }

    /// Formula ids using a specific named range, sorted.
    pub fn formulas_using_named_range(&self, name_id: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .formulas_using_name
            .get(&name_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    /// All formula-holding cells on a worksheet, sorted.
    pub fn cells_for_sheet(&self, sheet_id: u32) -> Vec<CellId> {
        let mut out: Vec<CellId> = self
            .formula_at_cell
            .keys()
            .filter(|cell| cell.sheet_id == sheet_id)
            .copied()
            .collect();
        out.sort();
        out
    }

    /// All cells holding a specific formula, sorted.
    pub fn cells_using_formula(&self, id: u32) -> Vec<CellId> {
        let mut out: Vec<CellId> = self
            .cells_using
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Worksheets containing at least one cell with this formula, sorted.
    pub fn owning_worksheets(&self, id: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .owning_sheets
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    pub fn ref_count(&self, id: u32) -> u32 {
        self.ref_counts.get(&id).copied().unwrap_or(0)
    }

    /// Number of unique interned formulas.
    pub fn count(&self) -> usize {
        self.trees.len()
    }

    pub fn total_references(&self) -> u32 {
        self.ref_counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr};

    fn sample_tree() -> Expr {
        Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::CellRef {
                sheet_id: 1,
                row_offset: -1,
                col_offset: 0,
            }),
            right: Box::new(Expr::Number(1.0)),
        }
    }

    #[test]
    fn identical_trees_share_one_id() {
        let mut table = FormulaTable::new();
        let a = CellId::new(1, 1, 0);
        let b = CellId::new(1, 2, 0);

        let (id_a, new_a) = table.intern(sample_tree(), a);
        let (id_b, new_b) = table.intern(sample_tree(), b);

        assert_eq!(id_a, id_b);
        assert!(new_a);
        assert!(!new_b);
        assert_eq!(table.count(), 1);
        assert_eq!(table.ref_count(id_a), 2);
        assert_eq!(table.cells_using_formula(id_a), vec![a, b]);
        assert_eq!(table.formula_at(a), Some(id_a));
    }

    #[test]
    fn last_reference_frees_the_tree() {
        let mut table = FormulaTable::new();
        let a = CellId::new(1, 1, 0);
        let b = CellId::new(2, 2, 0);

        let (id, _) = table.intern(sample_tree(), a);
        table.intern(sample_tree(), b);
        table.track_worksheet_reference(id, 1);
        table.track_named_range_reference(id, 9);

        assert_eq!(table.remove_cell_reference(id, a), None);
        assert_eq!(table.owning_worksheets(id), vec![2]);

        let release = table.remove_cell_reference(id, b).expect("freed");
        assert_eq!(release.referenced_sheets, vec![1]);
        assert_eq!(release.named_ranges, vec![9]);
        assert_eq!(table.count(), 0);
        assert_eq!(table.tree(id), None);
        assert!(table.formulas_using_named_range(9).is_empty());

        // A fresh intern of the same tree gets a fresh id.
        let (id2, new) = table.intern(sample_tree(), a);
        assert!(new);
        assert_ne!(id, id2);
    }

    #[test]
    fn owning_worksheets_track_cells() {
        let mut table = FormulaTable::new();
        let (id, _) = table.intern(sample_tree(), CellId::new(1, 0, 0));
        table.intern(sample_tree(), CellId::new(3, 0, 0));
        assert_eq!(table.owning_worksheets(id), vec![1, 3]);
    }
}
