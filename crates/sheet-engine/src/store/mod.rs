//! Sparse per-worksheet cell storage.
//!
//! Cells are partitioned into fixed 256×256 chunks. Within a chunk, one
//! parallel array per attribute is stored column-major to favour the common
//! vertical access pattern; arrays other than the type tags and the occupancy
//! bitmap are allocated lazily on first write of that kind. A chunk with zero
//! occupied cells is removed.

mod chunk;

pub use chunk::{CellType, Chunk, CHUNK_CELLS, CHUNK_COLS, CHUNK_ROWS};

use std::collections::HashMap;

use sheet_model::{CellError, CellValue, ErrorValue};

use crate::intern::StringTable;

/// Sparse cell storage for one worksheet.
#[derive(Debug, Default)]
pub struct SheetStore {
    sheet_id: u32,
    chunks: HashMap<(u32, u32), Chunk>,
    total_cells: usize,
}

impl SheetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet_id(&self) -> u32 {
        self.sheet_id
    }

    pub(crate) fn set_sheet_id(&mut self, id: u32) {
        self.sheet_id = id;
    }

    fn locate(row: u32, col: u32) -> ((u32, u32), usize) {
        let key = (row / CHUNK_ROWS, col / CHUNK_COLS);
        let local_row = row % CHUNK_ROWS;
        let local_col = col % CHUNK_COLS;
        // Column-major indexing.
        let idx = (local_col * CHUNK_ROWS + local_row) as usize;
        (key, idx)
    }

    /// The displayed value of a cell: for formula cells with an evaluated
    /// result, the result; otherwise the stored literal. Absent cells (and
    /// formula cells that have not been evaluated yet) read as `Empty`.
    pub fn get(&self, row: u32, col: u32, strings: &StringTable) -> CellValue {
        let (key, idx) = Self::locate(row, col);
        let Some(chunk) = self.chunks.get(&key) else {
            return CellValue::Empty;
        };

        if chunk.formula_id(idx) != 0 {
            if let Some(result) = chunk.formula_result(idx, strings) {
                return result;
            }
            return CellValue::Empty;
        }

        chunk.base_value(idx, strings)
    }

    /// The interned formula id of a cell, 0 when the cell is a pure data
    /// cell (or absent).
    pub fn formula_id(&self, row: u32, col: u32) -> u32 {
        let (key, idx) = Self::locate(row, col);
        self.chunks
            .get(&key)
            .map(|chunk| chunk.formula_id(idx))
            .unwrap_or(0)
    }

    /// Write a literal value, replacing any formula (the caller is
    /// responsible for releasing the formula-table reference first).
    pub fn set_value(&mut self, row: u32, col: u32, value: &CellValue, strings: &mut StringTable) {
        if value.is_empty() {
            self.remove(row, col, strings);
            return;
        }

        let (key, idx) = Self::locate(row, col);
        let chunk = self.chunks.entry(key).or_default();

        let was_occupied = chunk.is_occupied(idx);
        chunk.clear_formula_slots(idx, strings);
        chunk.clear_base_value(idx, strings);
        chunk.write_base_value(idx, value, strings);

        if !was_occupied {
            chunk.set_occupied(idx, true);
            self.total_cells += 1;
        }
    }

    /// Mark a cell as holding an interned formula, clearing any literal and
    /// any previous formula slot.
    pub fn set_formula(&mut self, row: u32, col: u32, formula_id: u32, strings: &mut StringTable) {
        let (key, idx) = Self::locate(row, col);
        let chunk = self.chunks.entry(key).or_default();

        let was_occupied = chunk.is_occupied(idx);
        chunk.clear_formula_slots(idx, strings);
        chunk.clear_base_value(idx, strings);
        chunk.formula_ids_mut()[idx] = formula_id;

        if !was_occupied {
            chunk.set_occupied(idx, true);
            self.total_cells += 1;
        }
    }

    /// Store the computed result of a formula cell in the mirror arrays
    /// without disturbing the formula id. No-op when the cell holds no
    /// formula.
    pub fn set_formula_result(
        &mut self,
        row: u32,
        col: u32,
        result: &CellValue,
        strings: &mut StringTable,
    ) {
        let (key, idx) = Self::locate(row, col);
        let Some(chunk) = self.chunks.get_mut(&key) else {
            return;
        };
        if chunk.formula_id(idx) == 0 {
            return;
        }

        chunk.clear_formula_result(idx, strings);
        chunk.write_formula_result(idx, result, strings);
    }

    /// Remove a cell: release interned text, drop the formula slot, clear the
    /// tag, and delete the chunk if it has become empty.
    pub fn remove(&mut self, row: u32, col: u32, strings: &mut StringTable) {
        let (key, idx) = Self::locate(row, col);
        let Some(chunk) = self.chunks.get_mut(&key) else {
            return;
        };

        if !chunk.is_occupied(idx) {
            return;
        }

        chunk.clear_formula_slots(idx, strings);
        chunk.clear_base_value(idx, strings);
        chunk.set_occupied(idx, false);
        self.total_cells -= 1;

        if chunk.non_empty_count() == 0 {
            self.chunks.remove(&key);
        }
    }

    /// Total number of occupied cells on the worksheet.
    pub fn total_cells(&self) -> usize {
        self.total_cells
    }

    /// Number of materialized chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[cfg(test)]
    pub(crate) fn locate_for_tests(row: u32, col: u32) -> ((u32, u32), usize) {
        Self::locate(row, col)
    }
}

/// Reconstitute an error value from its numeric code and interned message.
pub(crate) fn decode_error(code: f64, string_id: u32, strings: &StringTable) -> CellValue {
    let kind = ErrorValue::from_code(code as u8).unwrap_or(ErrorValue::Other);
    let message = strings.get(string_id).unwrap_or_default().to_string();
    CellValue::Error(CellError::new(kind, message))
}
