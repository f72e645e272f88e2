//! The recalculation engine.
//!
//! [`Spreadsheet`] combines the cell store, the intern tables, the dependency
//! graph, and the evaluator behind a small imperative API addressed by
//! `Worksheet!A1`-style text. `set` routes literals to the store and formula
//! text through the lexer and parser; `calculate` drains the dirty set in a
//! deterministic `(worksheet, row, col)` order, forcing precedents first and
//! marking dependents dirty as results land.

use std::cell::RefCell;

use chrono::{DateTime, Local};
use sheet_model::{
    CellError, CellId, CellRef, CellValue, ErrorValue, Range, SheetRange, NO_WORKSHEET,
};

use crate::ast::Expr;
use crate::error::EngineError;
use crate::eval::{Evaluator, ValueResolver};
use crate::functions::{self, Clock, RandomSource, SystemClock, ThreadRandom};
use crate::graph::DependencyGraph;
use crate::intern::{FormulaTable, NamedRangeTable, StringTable, WorksheetTable};
use crate::lexer::Lexer;
use crate::parser::{ParseContext, Parser};
use crate::store::SheetStore;

/// Shared mutable state owned by the engine.
struct Storage {
    worksheets: WorksheetTable,
    named_ranges: NamedRangeTable,
    strings: StringTable,
    formulas: FormulaTable,
    graph: DependencyGraph,
}

impl Storage {
    fn new() -> Self {
        Self {
            worksheets: WorksheetTable::new(),
            named_ranges: NamedRangeTable::new(),
            strings: StringTable::new(),
            formulas: FormulaTable::new(),
            graph: DependencyGraph::new(),
        }
    }

    /// Rescan a formula tree for precedents: cell edges, range edges, the
    /// volatile flag, and (for newly interned trees) the worksheet and
    /// named-range references the tree holds.
    fn extract_dependencies(&mut self, tree: &Expr, cell: CellId, formula_id: u32, is_new: bool) {
        self.graph.clear_dependencies(cell);
        self.graph.unmark_volatile(cell);
        self.extract_recursive(tree, cell, formula_id, is_new);
    }

    fn extract_recursive(&mut self, expr: &Expr, cell: CellId, formula_id: u32, is_new: bool) {
        match expr {
            Expr::CellRef {
                sheet_id,
                row_offset,
                col_offset,
            } => {
                let row = i64::from(cell.cell.row) + i64::from(*row_offset);
                let col = i64::from(cell.cell.col) + i64::from(*col_offset);
                if let (Ok(row), Ok(col)) = (u32::try_from(row), u32::try_from(col)) {
                    let target_sheet = if *sheet_id == NO_WORKSHEET {
                        cell.sheet_id
                    } else {
                        *sheet_id
                    };
                    self.graph
                        .add_cell_dependency(cell, CellId::new(target_sheet, row, col));
                }
                if is_new && *sheet_id != NO_WORKSHEET {
                    self.worksheets.add_reference(*sheet_id);
                    self.formulas
                        .track_worksheet_reference(formula_id, *sheet_id);
                }
            }

            Expr::RangeRef {
                sheet_id,
                start_row_offset,
                start_col_offset,
                end_row_offset,
                end_col_offset,
            } => {
                let start_row = i64::from(cell.cell.row) + i64::from(*start_row_offset);
                let start_col = i64::from(cell.cell.col) + i64::from(*start_col_offset);
                let end_row = i64::from(cell.cell.row) + i64::from(*end_row_offset);
                let end_col = i64::from(cell.cell.col) + i64::from(*end_col_offset);

                let corners = (
                    u32::try_from(start_row),
                    u32::try_from(start_col),
                    u32::try_from(end_row),
                    u32::try_from(end_col),
                );
                if let (Ok(sr), Ok(sc), Ok(er), Ok(ec)) = corners {
                    let target_sheet = if *sheet_id == NO_WORKSHEET {
                        cell.sheet_id
                    } else {
                        *sheet_id
                    };
                    let range = SheetRange::new(
                        target_sheet,
                        Range::new(CellRef::new(sr, sc), CellRef::new(er, ec)),
                    );
                    self.graph.add_range_dependency(cell, range);
                }
                if is_new && *sheet_id != NO_WORKSHEET {
                    self.worksheets.add_reference(*sheet_id);
                    self.formulas
                        .track_worksheet_reference(formula_id, *sheet_id);
                }
            }

            Expr::Unary { operand, .. } => {
                self.extract_recursive(operand, cell, formula_id, is_new);
            }

            Expr::Binary { left, right, .. } => {
                self.extract_recursive(left, cell, formula_id, is_new);
                self.extract_recursive(right, cell, formula_id, is_new);
            }

            Expr::Call { name, args } => {
                if functions::is_volatile_function(name) {
                    self.graph.mark_volatile(cell);
                }
                for arg in args {
                    self.extract_recursive(arg, cell, formula_id, is_new);
                }
            }

            Expr::Name(name) => {
                if is_new {
                    let name_id = self.named_ranges.ensure(name);
                    self.named_ranges.add_reference(name_id);
                    self.formulas
                        .track_named_range_reference(formula_id, name_id);
                }
            }

            Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) => {}
        }
    }
}

/// Per-pass evaluation bookkeeping: the processing stack doubles as the cycle
/// detector, the completed set guarantees one evaluation per cell per pass.
#[derive(Debug, Default)]
struct CalculationStack {
    items: Vec<CellId>,
    processing: std::collections::HashSet<CellId>,
    completed: std::collections::HashSet<CellId>,
}

impl CalculationStack {
    fn reset(&mut self) {
        self.items.clear();
        self.processing.clear();
        self.completed.clear();
    }

    fn push(&mut self, addr: CellId) {
        self.items.push(addr);
        self.processing.insert(addr);
    }

    fn pop(&mut self) {
        if let Some(addr) = self.items.pop() {
            self.processing.remove(&addr);
        }
    }

    fn is_processing(&self, addr: CellId) -> bool {
        self.processing.contains(&addr)
    }

    fn mark_completed(&mut self, addr: CellId) {
        self.completed.insert(addr);
    }

    fn is_completed(&self, addr: CellId) -> bool {
        self.completed.contains(&addr)
    }
}

/// A formula calculation engine over sparse worksheets.
///
/// The engine is deterministic, single-threaded, and blocking; a host using
/// it from several threads must serialize calls on one instance.
pub struct Spreadsheet {
    storage: Storage,
    calc_stack: CalculationStack,
    clock: Box<dyn Clock>,
    rng: RefCell<Box<dyn RandomSource>>,
}

impl Default for Spreadsheet {
    fn default() -> Self {
        Self::new()
    }
}

impl Spreadsheet {
    /// An empty spreadsheet with the wall clock and the thread-local RNG.
    pub fn new() -> Self {
        Self::with_sources(Box::new(SystemClock), Box::new(ThreadRandom::new()))
    }

    /// An empty spreadsheet with injected time and randomness, for hosts and
    /// tests that need deterministic volatile functions.
    pub fn with_sources(clock: Box<dyn Clock>, rng: Box<dyn RandomSource>) -> Self {
        Self {
            storage: Storage::new(),
            calc_stack: CalculationStack::default(),
            clock,
            rng: RefCell::new(rng),
        }
    }

    // ---- cell operations ----

    /// Read a cell's displayed value. Unknown worksheets read as a `#VALUE!`
    /// error value; known-but-empty locations read as `Empty`.
    pub fn get(&self, address: &str) -> Result<CellValue, EngineError> {
        let id = self.resolve_address(address)?;

        if id.sheet_id == NO_WORKSHEET {
            return Ok(CellValue::Error(CellError::new(
                ErrorValue::Value,
                "worksheet not found",
            )));
        }

        let Some(sheet) = self.storage.worksheets.get(id.sheet_id) else {
            return Ok(CellValue::Empty);
        };
        Ok(sheet.get(id.cell.row, id.cell.col, &self.storage.strings))
    }

    /// Write a cell. Text starting with `=` is formula source; lexer and
    /// parser failures are captured as an error *value* in the cell, not
    /// returned. Setting `Empty` removes the cell.
    pub fn set(&mut self, address: &str, value: impl Into<CellValue>) -> Result<(), EngineError> {
        let value = value.into();
        let id = self.resolve_address(address)?;

        if id.sheet_id == NO_WORKSHEET {
            return Err(EngineError::invalid_argument(
                "cannot set a cell on an unknown worksheet",
            ));
        }

        match value {
            CellValue::Text(text) if text.starts_with('=') => self.set_formula_cell(id, &text),
            CellValue::Empty => {
                self.remove_cell(id);
                Ok(())
            }
            other => {
                self.set_literal_cell(id, other);
                Ok(())
            }
        }
    }

    /// Write raw text, routing it through the standalone value grammars:
    /// numbers and booleans are stored typed, quoted strings are unquoted,
    /// anything else is stored as text. `=`-prefixed input is a formula.
    pub fn set_text(&mut self, address: &str, text: &str) -> Result<(), EngineError> {
        if text.starts_with('=') {
            return self.set(address, CellValue::Text(text.to_string()));
        }

        let mut parser = Parser::with_context(ParseContext::detached(None));
        if let Ok(Expr::Number(n)) = parser.parse_number(text) {
            return self.set(address, CellValue::Number(n));
        }
        if let Ok(Expr::Bool(b)) = parser.parse_boolean(text) {
            return self.set(address, CellValue::Bool(b));
        }
        if let Ok(Expr::Text(s)) = parser.parse_string(text) {
            return self.set(address, CellValue::Text(s));
        }
        self.set(address, CellValue::Text(text.to_string()))
    }

    /// Remove a cell. Removing from unknown or undefined worksheets is a
    /// no-op.
    pub fn remove(&mut self, address: &str) -> Result<(), EngineError> {
        let id = self.resolve_address(address)?;

        if id.sheet_id == NO_WORKSHEET {
            return Ok(());
        }

        self.remove_cell(id);
        Ok(())
    }

    // ---- worksheet operations ----

    /// Define a worksheet. A name referenced by formulas but not yet defined
    /// is promoted in place, so those formulas bind to the new definition.
    pub fn add_worksheet(&mut self, name: &str) -> Result<(), EngineError> {
        if let Some(id) = self.storage.worksheets.id_of(name) {
            if self.storage.worksheets.is_defined(id) {
                return Err(EngineError::already_exists(format!(
                    "worksheet '{name}' already exists"
                )));
            }
        }

        let id = self.storage.worksheets.define(name, SheetStore::new());
        if let Some(sheet) = self.storage.worksheets.get_mut(id) {
            sheet.set_sheet_id(id);
        }
        Ok(())
    }

    pub fn remove_worksheet(&mut self, name: &str) -> Result<(), EngineError> {
        let id = self.defined_worksheet_id(name)?;

        // Everything that reads this sheet must recompute (to a #REF!).
        for cell in self.storage.graph.cells_depending_on_sheet(id) {
            self.storage.graph.mark_dirty(cell);
        }

        // Cells living on the sheet disappear along with it: release their
        // interned formulas and drop their graph nodes so they cannot linger
        // in the dirty set.
        for cell in self.storage.formulas.cells_for_sheet(id) {
            self.release_formula_at(cell);
        }
        for cell in self.storage.graph.cells_on_sheet(id) {
            self.storage.graph.remove_node(cell);
        }

        self.storage.worksheets.undefine(name);
        Ok(())
    }

    /// Rename a worksheet. The sheet's cells move with it; formulas that
    /// referenced the old name keep their already-computed results but
    /// resolve to `#REF!` the next time they are recalculated.
    pub fn rename_worksheet(&mut self, old_name: &str, new_name: &str) -> Result<(), EngineError> {
        self.defined_worksheet_id(old_name)?;
        if self.storage.worksheets.contains(new_name) {
            return Err(EngineError::already_exists(format!(
                "worksheet '{new_name}' already exists"
            )));
        }

        let Some(store) = self.storage.worksheets.undefine(old_name) else {
            return Err(EngineError::not_found(format!(
                "worksheet '{old_name}' not found"
            )));
        };
        let new_id = self.storage.worksheets.define(new_name, store);
        if let Some(sheet) = self.storage.worksheets.get_mut(new_id) {
            sheet.set_sheet_id(new_id);
        }
        Ok(())
    }

    pub fn does_worksheet_exist(&self, name: &str) -> bool {
        self.storage
            .worksheets
            .id_of(name)
            .is_some_and(|id| self.storage.worksheets.is_defined(id))
    }

    /// Names of all defined worksheets, sorted.
    pub fn list_worksheets(&self) -> Vec<String> {
        self.storage.worksheets.defined_names()
    }

    /// Names referenced by formulas but not defined, sorted.
    pub fn list_referenced_worksheets(&self) -> Vec<String> {
        self.storage.worksheets.undefined_names()
    }

    // ---- named range operations ----

    /// Register a named-range name without binding it to a rectangle yet.
    pub fn add_named_range(&mut self, name: &str) -> Result<(), EngineError> {
        if self.storage.named_ranges.contains(name) {
            return Err(EngineError::already_exists(format!(
                "named range '{name}' already exists"
            )));
        }
        self.storage.named_ranges.ensure(name);
        Ok(())
    }

    /// Bind a named range to a worksheet-qualified reference like
    /// `Data!A1:B10` (a single cell binds a 1×1 rectangle). Formulas already
    /// using the name are marked dirty so the next `calculate` resolves
    /// them.
    pub fn define_named_range(&mut self, name: &str, reference: &str) -> Result<(), EngineError> {
        let range = self.resolve_range_address(reference)?;
        let name_id = self.storage.named_ranges.define(name, range);

        for formula_id in self.storage.formulas.formulas_using_named_range(name_id) {
            for cell in self.storage.formulas.cells_using_formula(formula_id) {
                self.storage.graph.mark_dirty(cell);
            }
        }
        Ok(())
    }

    pub fn remove_named_range(&mut self, name: &str) -> Result<(), EngineError> {
        let Some(id) = self.storage.named_ranges.id_of(name) else {
            return Err(EngineError::not_found(format!(
                "named range '{name}' not found"
            )));
        };

        // Formulas using the name must recompute (to a #NAME?).
        for formula_id in self.storage.formulas.formulas_using_named_range(id) {
            for cell in self.storage.formulas.cells_using_formula(formula_id) {
                self.storage.graph.mark_dirty(cell);
            }
        }

        // Drops the definition; the entry itself survives only while
        // formulas still reference the name.
        self.storage.named_ranges.undefine(name);
        Ok(())
    }

    pub fn rename_named_range(&mut self, old_name: &str, new_name: &str) -> Result<(), EngineError> {
        if !self.storage.named_ranges.contains(old_name) {
            return Err(EngineError::not_found(format!(
                "named range '{old_name}' not found"
            )));
        }
        if self.storage.named_ranges.contains(new_name) {
            return Err(EngineError::already_exists(format!(
                "named range '{new_name}' already exists"
            )));
        }

        // Formulas keep referring to the old name (and will see #NAME?);
        // only the registration moves.
        match self.storage.named_ranges.undefine(old_name) {
            Some(range) => {
                self.storage.named_ranges.define(new_name, range);
            }
            None => {
                self.storage.named_ranges.ensure(new_name);
            }
        }
        Ok(())
    }

    pub fn does_named_range_exist(&self, name: &str) -> bool {
        self.storage
            .named_ranges
            .id_of(name)
            .is_some_and(|id| self.storage.named_ranges.is_defined(id))
    }

    /// Names of all defined named ranges, sorted.
    pub fn list_named_ranges(&self) -> Vec<String> {
        self.storage.named_ranges.defined_names()
    }

    /// Named-range names referenced by formulas but not defined, sorted.
    pub fn list_referenced_named_ranges(&self) -> Vec<String> {
        self.storage.named_ranges.undefined_names()
    }

    // ---- recalculation ----

    /// Recalculate every dirty cell (volatile cells are always re-seeded)
    /// until the store is consistent. Cells are drained in
    /// `(worksheet, row, col)` order; each cell's precedents are forced
    /// first, and dependents of a freshly computed cell are marked dirty for
    /// a later round of the drain loop.
    pub fn calculate(&mut self) -> Result<(), EngineError> {
        self.storage.graph.mark_all_volatile_dirty();
        self.calc_stack.reset();

        while self.storage.graph.dirty_len() > 0 {
            let mut dirty = self.storage.graph.dirty_cells();
            dirty.sort();

            for cell in dirty {
                if !self.storage.graph.is_dirty(cell) {
                    continue;
                }
                if self.calc_stack.is_completed(cell) {
                    self.storage.graph.clear_dirty(cell);
                    continue;
                }
                // Cycle errors have already been written into the affected
                // cells by the time they surface here.
                let _ = self.calculate_cell(cell);
            }
        }

        self.storage.graph.clear_all_dirty();
        Ok(())
    }

    /// Evaluate one cell, forcing its precedents first. `Err` carries the
    /// `#REF!` produced by a circular reference so the caller can absorb it
    /// into its own cell.
    fn calculate_cell(&mut self, cell: CellId) -> Result<(), CellError> {
        if self.calc_stack.is_completed(cell) {
            return Ok(());
        }
        if self.calc_stack.is_processing(cell) {
            return Err(CellError::new(
                ErrorValue::Ref,
                "circular reference detected",
            ));
        }

        self.calc_stack.push(cell);
        let outcome = self.calculate_cell_inner(cell);
        self.calc_stack.pop();
        self.calc_stack.mark_completed(cell);
        outcome
    }

    fn calculate_cell_inner(&mut self, cell: CellId) -> Result<(), CellError> {
        let formula_id = match self.storage.worksheets.get(cell.sheet_id) {
            Some(sheet) => sheet.formula_id(cell.cell.row, cell.cell.col),
            None => {
                self.storage.graph.clear_dirty(cell);
                return Ok(());
            }
        };

        if formula_id == 0 {
            // Data cells only change when explicitly set; nothing to do.
            self.storage.graph.clear_dirty(cell);
            return Ok(());
        }

        let Some(tree) = self.storage.formulas.tree(formula_id) else {
            self.storage.graph.clear_dirty(cell);
            return Ok(());
        };

        // A cell depending on a range that includes itself is circular.
        for range in self.storage.graph.range_precedents(cell) {
            if range.contains(cell) {
                let err = CellError::new(ErrorValue::Ref, "circular reference detected");
                self.store_result(cell, &CellValue::Error(err.clone()));
                self.storage.graph.clear_dirty(cell);
                return Err(err);
            }
        }

        // Force cell precedents first. A `#REF!` coming back means this cell
        // sits on a cycle: absorb it and propagate.
        for precedent in self.storage.graph.direct_precedents(cell) {
            if let Err(err) = self.calculate_cell(precedent) {
                if err.kind == ErrorValue::Ref {
                    self.store_result(cell, &CellValue::Error(err.clone()));
                    self.storage.graph.clear_dirty(cell);
                    return Err(err);
                }
            }
        }

        // Pre-evaluate any dirty cell inside range precedents so the lazy
        // iterators observe consistent results.
        for range in self.storage.graph.range_precedents(cell) {
            for row in range.range.start.row..=range.range.end.row {
                for col in range.range.start.col..=range.range.end.col {
                    let inner = CellId::new(range.sheet_id, row, col);
                    if self.storage.graph.is_dirty(inner) {
                        let _ = self.calculate_cell(inner);
                    }
                }
            }
        }

        let result = {
            let evaluator = Evaluator::new(&*self, cell);
            evaluator.eval_root(&tree)
        };

        self.store_result(cell, &result);
        self.storage.graph.clear_dirty(cell);

        // Lazy propagation: dependents recompute in a later drain round.
        for dependent in self.storage.graph.direct_dependents(cell) {
            self.storage.graph.mark_dirty(dependent);
        }

        Ok(())
    }

    fn store_result(&mut self, cell: CellId, result: &CellValue) {
        let Storage {
            worksheets,
            strings,
            ..
        } = &mut self.storage;
        if let Some(sheet) = worksheets.get_mut(cell.sheet_id) {
            sheet.set_formula_result(cell.cell.row, cell.cell.col, result, strings);
        }
    }

    // ---- internals ----

    fn resolve_address(&self, address: &str) -> Result<CellId, EngineError> {
        let worksheets = &self.storage.worksheets;
        // Only defined worksheets resolve; everything else is the sentinel.
        let mut resolve = |name: &str| {
            worksheets
                .id_of(name)
                .filter(|&id| worksheets.is_defined(id))
                .unwrap_or(NO_WORKSHEET)
        };
        let mut parser = Parser::with_context(ParseContext::detached(Some(&mut resolve)));

        let (sheet_id, row, col) = parser.parse_full_address(address).map_err(|err| {
            EngineError::invalid_argument(format!("invalid address '{address}': {}", err.message))
        })?;
        Ok(CellId::new(sheet_id, row, col))
    }

    /// Resolve a textual reference (cell or range, worksheet-qualified) to an
    /// absolute rectangle.
    fn resolve_range_address(&self, reference: &str) -> Result<SheetRange, EngineError> {
        let worksheets = &self.storage.worksheets;
        let mut resolve = |name: &str| {
            worksheets
                .id_of(name)
                .filter(|&id| worksheets.is_defined(id))
                .unwrap_or(NO_WORKSHEET)
        };
        let mut parser = Parser::with_context(ParseContext::detached(Some(&mut resolve)));

        let expr = parser.parse_reference(reference).map_err(|err| {
            EngineError::invalid_argument(format!(
                "invalid reference '{reference}': {}",
                err.message
            ))
        })?;

        // In a detached context offsets are absolute coordinates.
        let (sheet_id, range) = match expr {
            Expr::CellRef {
                sheet_id,
                row_offset,
                col_offset,
            } => {
                let cell = CellRef::new(row_offset as u32, col_offset as u32);
                (sheet_id, Range::new(cell, cell))
            }
            Expr::RangeRef {
                sheet_id,
                start_row_offset,
                start_col_offset,
                end_row_offset,
                end_col_offset,
            } => (
                sheet_id,
                Range::new(
                    CellRef::new(start_row_offset as u32, start_col_offset as u32),
                    CellRef::new(end_row_offset as u32, end_col_offset as u32),
                ),
            ),
            _ => {
                return Err(EngineError::invalid_argument(format!(
                    "invalid reference '{reference}'"
                )))
            }
        };

        if sheet_id == NO_WORKSHEET {
            return Err(EngineError::invalid_argument(
                "reference must name a defined worksheet",
            ));
        }
        Ok(SheetRange::new(sheet_id, range))
    }

    fn defined_worksheet_id(&self, name: &str) -> Result<u32, EngineError> {
        self.storage
            .worksheets
            .id_of(name)
            .filter(|&id| self.storage.worksheets.is_defined(id))
            .ok_or_else(|| EngineError::not_found(format!("worksheet '{name}' not found")))
    }

    fn set_formula_cell(&mut self, id: CellId, formula: &str) -> Result<(), EngineError> {
        let tokens = match Lexer::new(formula).tokenize() {
            Ok(tokens) => tokens,
            Err(err) => {
                self.set_literal_cell(id, CellValue::Error(CellError::new(err.kind, err.message)));
                return Ok(());
            }
        };

        let parsed = {
            let Storage { worksheets, .. } = &mut self.storage;
            let mut resolve = |name: &str| worksheets.ensure(name);
            let mut parser = Parser::new(
                tokens,
                ParseContext {
                    current_sheet: id.sheet_id,
                    current_row: id.cell.row,
                    current_col: id.cell.col,
                    resolve_sheet: Some(&mut resolve),
                },
            );
            parser.parse()
        };

        let tree = match parsed {
            Ok(tree) => tree,
            Err(err) => {
                self.set_literal_cell(id, CellValue::Error(CellError::new(err.kind, err.message)));
                return Ok(());
            }
        };

        self.release_formula_at(id);
        let (formula_id, is_new) = self.storage.formulas.intern(tree, id);
        if let Some(tree) = self.storage.formulas.tree(formula_id) {
            self.storage
                .extract_dependencies(&tree, id, formula_id, is_new);
        }
        self.storage.graph.set_formula(id);

        {
            let Storage {
                worksheets,
                strings,
                ..
            } = &mut self.storage;
            if let Some(sheet) = worksheets.get_mut(id.sheet_id) {
                sheet.set_formula(id.cell.row, id.cell.col, formula_id, strings);
            }
        }

        self.storage.graph.mark_dirty(id);
        Ok(())
    }

    fn set_literal_cell(&mut self, id: CellId, value: CellValue) {
        self.release_formula_at(id);
        self.storage.graph.clear_dependencies(id);
        self.storage.graph.unmark_volatile(id);
        self.storage.graph.clear_formula(id);

        {
            let Storage {
                worksheets,
                strings,
                ..
            } = &mut self.storage;
            if let Some(sheet) = worksheets.get_mut(id.sheet_id) {
                sheet.set_value(id.cell.row, id.cell.col, &value, strings);
            }
        }

        // Data cells propagate immediately: range observers covering this
        // location and direct dependents recompute on the next pass.
        self.storage.graph.mark_cell_if_in_range_dirty(id);
        for dependent in self.storage.graph.direct_dependents(id) {
            self.storage.graph.mark_dirty(dependent);
        }
    }

    fn remove_cell(&mut self, id: CellId) {
        let dependents = self.storage.graph.direct_dependents(id);

        self.release_formula_at(id);
        self.storage.graph.clear_dependencies(id);

        {
            let Storage {
                worksheets,
                strings,
                ..
            } = &mut self.storage;
            if let Some(sheet) = worksheets.get_mut(id.sheet_id) {
                sheet.remove(id.cell.row, id.cell.col, strings);
            }
        }

        self.storage.graph.mark_cell_if_in_range_dirty(id);
        for dependent in dependents {
            self.storage.graph.mark_dirty(dependent);
        }
        self.storage.graph.remove_node(id);
    }

    /// Release the formula held by a cell, if any. When the last cell using
    /// a tree goes away, the tree's worksheet and named-range references are
    /// released as well.
    fn release_formula_at(&mut self, cell: CellId) {
        let Storage {
            worksheets,
            named_ranges,
            formulas,
            ..
        } = &mut self.storage;

        let Some(formula_id) = formulas.formula_at(cell) else {
            return;
        };
        let Some(release) = formulas.remove_cell_reference(formula_id, cell) else {
            return;
        };

        for sheet_id in release.referenced_sheets {
            worksheets.remove_reference(sheet_id);
        }
        for name_id in release.named_ranges {
            named_ranges.remove_reference(name_id);
        }
    }

    // ---- diagnostics ----

    /// Read-only view of the dependency graph.
    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.storage.graph
    }

    /// Read-only view of the formula intern table.
    pub fn formula_table(&self) -> &FormulaTable {
        &self.storage.formulas
    }

    /// Read-only view of the string intern table.
    pub fn string_table(&self) -> &StringTable {
        &self.storage.strings
    }

    /// Read-only view of a worksheet's cell store.
    pub fn worksheet_store(&self, name: &str) -> Option<&SheetStore> {
        let id = self.storage.worksheets.id_of(name)?;
        self.storage.worksheets.get(id)
    }
}

impl ValueResolver for Spreadsheet {
    fn sheet_defined(&self, sheet_id: u32) -> bool {
        self.storage.worksheets.is_defined(sheet_id)
    }

    fn cell_value(&self, id: CellId) -> CellValue {
        self.storage
            .worksheets
            .get(id.sheet_id)
            .map(|sheet| sheet.get(id.cell.row, id.cell.col, &self.storage.strings))
            .unwrap_or(CellValue::Empty)
    }

    fn resolve_named_range(&self, name: &str) -> Result<SheetRange, CellError> {
        let Some(name_id) = self.storage.named_ranges.id_of(name) else {
            return Err(CellError::new(
                ErrorValue::Name,
                format!("named range '{name}' not found"),
            ));
        };
        let Some(range) = self.storage.named_ranges.get(name_id) else {
            return Err(CellError::new(
                ErrorValue::Name,
                format!("named range '{name}' is not defined"),
            ));
        };
        if !self.storage.worksheets.is_defined(range.sheet_id) {
            return Err(CellError::new(
                ErrorValue::Ref,
                "worksheet not found for named range",
            ));
        }
        Ok(*range)
    }

    fn clock_now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    fn next_random(&self) -> f64 {
        self.rng.borrow_mut().next_f64()
    }
}
