use sheet_model::CellValue;

use crate::intern::StringTable;
use crate::store::decode_error;

/// Rows per chunk. A power of two keeps the modulo cheap.
pub const CHUNK_ROWS: u32 = 256;
/// Columns per chunk.
pub const CHUNK_COLS: u32 = 256;
/// Cells per chunk.
pub const CHUNK_CELLS: usize = (CHUNK_ROWS * CHUNK_COLS) as usize;

const BITMAP_WORDS: usize = CHUNK_CELLS / 64;

/// Cell type tag stored in the always-allocated `types` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellType {
    Empty = 0,
    Number = 1,
    Text = 2,
    Bool = 3,
    Error = 4,
}

impl CellType {
    pub const fn from_u8(tag: u8) -> Self {
        match tag {
            1 => CellType::Number,
            2 => CellType::Text,
            3 => CellType::Bool,
            4 => CellType::Error,
            _ => CellType::Empty,
        }
    }
}

/// A 256×256 tile of cells in structure-of-arrays layout.
///
/// Only `types` and the occupancy bitmap always exist; every other array is
/// allocated on first write of that attribute. Numbers double as storage for
/// booleans (0/1) and error codes, with the error message interned in the
/// string table. Formula results live in mirror arrays so a formula cell
/// keeps its id across re-evaluations.
#[derive(Debug)]
pub struct Chunk {
    types: Vec<u8>,
    occupied: Vec<u64>,
    non_empty: u32,

    numbers: Option<Vec<f64>>,
    string_ids: Option<Vec<u32>>,

    formula_ids: Option<Vec<u32>>,
    result_types: Option<Vec<u8>>,
    result_numbers: Option<Vec<f64>>,
    result_string_ids: Option<Vec<u32>>,
    result_bools: Option<Vec<u8>>,
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            types: vec![0; CHUNK_CELLS],
            occupied: vec![0; BITMAP_WORDS],
            non_empty: 0,
            numbers: None,
            string_ids: None,
            formula_ids: None,
            result_types: None,
            result_numbers: None,
            result_string_ids: None,
            result_bools: None,
        }
    }
}

impl Chunk {
    pub fn cell_type(&self, idx: usize) -> CellType {
        CellType::from_u8(self.types[idx])
    }

    pub fn formula_id(&self, idx: usize) -> u32 {
        self.formula_ids
            .as_ref()
            .map(|ids| ids[idx])
            .unwrap_or(0)
    }

    pub(crate) fn formula_ids_mut(&mut self) -> &mut Vec<u32> {
        self.formula_ids.get_or_insert_with(|| vec![0; CHUNK_CELLS])
    }

    /// Number of occupied slots (non-empty literal or formula-bearing).
    pub fn non_empty_count(&self) -> u32 {
        self.non_empty
    }

    pub fn is_occupied(&self, idx: usize) -> bool {
        self.occupied[idx / 64] & (1 << (idx % 64)) != 0
    }

    pub(crate) fn set_occupied(&mut self, idx: usize, occupied: bool) {
        let word = idx / 64;
        let bit = 1u64 << (idx % 64);
        let was = self.occupied[word] & bit != 0;
        if occupied {
            self.occupied[word] |= bit;
            if !was {
                self.non_empty += 1;
            }
        } else {
            self.occupied[word] &= !bit;
            if was {
                self.non_empty -= 1;
            }
        }
    }

    /// Reconstitute the literal value stored at `idx`.
    pub(crate) fn base_value(&self, idx: usize, strings: &StringTable) -> CellValue {
        match self.cell_type(idx) {
            CellType::Empty => CellValue::Empty,
            CellType::Number => CellValue::Number(self.number(idx)),
            CellType::Text => {
                let id = self.string_id(idx);
                CellValue::Text(strings.get(id).unwrap_or_default().to_string())
            }
            CellType::Bool => CellValue::Bool(self.number(idx) != 0.0),
            CellType::Error => decode_error(self.number(idx), self.string_id(idx), strings),
        }
    }

    /// Write a non-empty literal value at `idx`. The slot must already have
    /// been cleared.
    pub(crate) fn write_base_value(
        &mut self,
        idx: usize,
        value: &CellValue,
        strings: &mut StringTable,
    ) {
        match value {
            CellValue::Empty => {}
            CellValue::Number(n) => {
                self.types[idx] = CellType::Number as u8;
                self.numbers_mut()[idx] = *n;
            }
            CellValue::Text(s) => {
                self.types[idx] = CellType::Text as u8;
                let id = strings.intern(s);
                self.string_ids_mut()[idx] = id;
            }
            CellValue::Bool(b) => {
                self.types[idx] = CellType::Bool as u8;
                self.numbers_mut()[idx] = if *b { 1.0 } else { 0.0 };
            }
            CellValue::Error(e) => {
                self.types[idx] = CellType::Error as u8;
                self.numbers_mut()[idx] = f64::from(e.kind.code());
                let id = strings.intern(&e.message);
                self.string_ids_mut()[idx] = id;
            }
        }
    }

    /// Clear the literal slot at `idx`, releasing interned text.
    pub(crate) fn clear_base_value(&mut self, idx: usize, strings: &mut StringTable) {
        match self.cell_type(idx) {
            CellType::Text | CellType::Error => {
                let id = self.string_id(idx);
                if id != 0 {
                    strings.remove_reference(id);
                    self.string_ids_mut()[idx] = 0;
                }
            }
            _ => {}
        }
        self.types[idx] = CellType::Empty as u8;
    }

    /// The evaluated result mirrored for a formula cell, if present.
    pub(crate) fn formula_result(&self, idx: usize, strings: &StringTable) -> Option<CellValue> {
        let tag = self.result_types.as_ref().map(|t| t[idx]).unwrap_or(0);
        match CellType::from_u8(tag) {
            CellType::Empty => None,
            CellType::Number => Some(CellValue::Number(self.result_number(idx))),
            CellType::Text => {
                let id = self.result_string_id(idx);
                Some(CellValue::Text(strings.get(id).unwrap_or_default().to_string()))
            }
            CellType::Bool => {
                let b = self.result_bools.as_ref().map(|v| v[idx]).unwrap_or(0);
                Some(CellValue::Bool(b != 0))
            }
            CellType::Error => Some(decode_error(
                self.result_number(idx),
                self.result_string_id(idx),
                strings,
            )),
        }
    }

    /// Write an evaluated result into the mirror arrays. The slot must
    /// already have been cleared.
    pub(crate) fn write_formula_result(
        &mut self,
        idx: usize,
        result: &CellValue,
        strings: &mut StringTable,
    ) {
        match result {
            CellValue::Empty => {
                self.result_types_mut()[idx] = CellType::Empty as u8;
            }
            CellValue::Number(n) => {
                self.result_types_mut()[idx] = CellType::Number as u8;
                self.result_numbers_mut()[idx] = *n;
            }
            CellValue::Text(s) => {
                self.result_types_mut()[idx] = CellType::Text as u8;
                let id = strings.intern(s);
                self.result_string_ids_mut()[idx] = id;
            }
            CellValue::Bool(b) => {
                self.result_types_mut()[idx] = CellType::Bool as u8;
                self.result_bools_mut()[idx] = u8::from(*b);
            }
            CellValue::Error(e) => {
                self.result_types_mut()[idx] = CellType::Error as u8;
                self.result_numbers_mut()[idx] = f64::from(e.kind.code());
                let id = strings.intern(&e.message);
                self.result_string_ids_mut()[idx] = id;
            }
        }
    }

    /// Clear the result mirror slot, releasing interned text.
    pub(crate) fn clear_formula_result(&mut self, idx: usize, strings: &mut StringTable) {
        let tag = self.result_types.as_ref().map(|t| t[idx]).unwrap_or(0);
        match CellType::from_u8(tag) {
            CellType::Text | CellType::Error => {
                let id = self.result_string_id(idx);
                if id != 0 {
                    strings.remove_reference(id);
                    self.result_string_ids_mut()[idx] = 0;
                }
            }
            _ => {}
        }
        if let Some(types) = self.result_types.as_mut() {
            types[idx] = CellType::Empty as u8;
        }
    }

    /// Drop both the formula id and its mirrored result.
    pub(crate) fn clear_formula_slots(&mut self, idx: usize, strings: &mut StringTable) {
        self.clear_formula_result(idx, strings);
        if let Some(ids) = self.formula_ids.as_mut() {
            ids[idx] = 0;
        }
    }

    fn number(&self, idx: usize) -> f64 {
        self.numbers.as_ref().map(|v| v[idx]).unwrap_or(0.0)
    }

    fn string_id(&self, idx: usize) -> u32 {
        self.string_ids.as_ref().map(|v| v[idx]).unwrap_or(0)
    }

    fn result_number(&self, idx: usize) -> f64 {
        self.result_numbers.as_ref().map(|v| v[idx]).unwrap_or(0.0)
    }

    fn result_string_id(&self, idx: usize) -> u32 {
        self.result_string_ids.as_ref().map(|v| v[idx]).unwrap_or(0)
    }

    fn numbers_mut(&mut self) -> &mut Vec<f64> {
        self.numbers.get_or_insert_with(|| vec![0.0; CHUNK_CELLS])
    }

    fn string_ids_mut(&mut self) -> &mut Vec<u32> {
        self.string_ids.get_or_insert_with(|| vec![0; CHUNK_CELLS])
    }

    fn result_types_mut(&mut self) -> &mut Vec<u8> {
        self.result_types.get_or_insert_with(|| vec![0; CHUNK_CELLS])
    }

    fn result_numbers_mut(&mut self) -> &mut Vec<f64> {
        self.result_numbers
            .get_or_insert_with(|| vec![0.0; CHUNK_CELLS])
    }

    fn result_string_ids_mut(&mut self) -> &mut Vec<u32> {
        self.result_string_ids
            .get_or_insert_with(|| vec![0; CHUNK_CELLS])
    }

    fn result_bools_mut(&mut self) -> &mut Vec<u8> {
        self.result_bools.get_or_insert_with(|| vec![0; CHUNK_CELLS])
    }

    /// True if the slot has a type tag other than [`CellType::Empty`] or a
    /// non-zero formula id. The occupancy bitmap must agree with this.
    #[cfg(test)]
    pub(crate) fn slot_in_use(&self, idx: usize) -> bool {
        self.cell_type(idx) != CellType::Empty || self.formula_id(idx) != 0
    }
}
