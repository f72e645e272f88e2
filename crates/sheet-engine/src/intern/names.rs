use std::collections::{HashMap, HashSet};

/// A refcounted name → id table whose ids split into **defined** (carrying a
/// payload) and **undefined** (referenced by formulas but not yet defined).
///
/// Worksheets and named ranges share this lifecycle:
/// - a name referenced before it is defined is retained as undefined until
///   its reference count falls to zero;
/// - defining promotes it (the id is stable across the promotion, so parsed
///   formulas bind to the later definition);
/// - undefining demotes it back to undefined while references remain, and
///   deletes it outright once the last reference disappears.
#[derive(Debug)]
pub struct NameTable<P> {
    name_to_id: HashMap<String, u32>,
    id_to_name: HashMap<u32, String>,
    defined: HashMap<u32, P>,
    undefined: HashSet<u32>,
    ref_counts: HashMap<u32, u32>,
    next_id: u32,
}

impl<P> Default for NameTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> NameTable<P> {
    pub fn new() -> Self {
        Self {
            name_to_id: HashMap::new(),
            id_to_name: HashMap::new(),
            defined: HashMap::new(),
            undefined: HashSet::new(),
            ref_counts: HashMap::new(),
            next_id: 1, // id 0 is reserved for "none"
        }
    }

    fn insert_entry(&mut self, name: &str, initial_refs: u32) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.insert(id, name.to_string());
        self.undefined.insert(id);
        self.ref_counts.insert(id, initial_refs);
        id
    }

    fn remove_entry(&mut self, id: u32) {
        if let Some(name) = self.id_to_name.remove(&id) {
            self.name_to_id.remove(&name);
        }
        self.defined.remove(&id);
        self.undefined.remove(&id);
        self.ref_counts.remove(&id);
    }

    /// Add a reference to a name (defined or not), creating an undefined
    /// entry on first sight. Returns the id.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.name_to_id.get(name) {
            *self.ref_counts.entry(id).or_insert(0) += 1;
            return id;
        }
        self.insert_entry(name, 1)
    }

    /// Resolve a name to its id without taking a reference, creating a
    /// zero-reference undefined entry on first sight. Used by the parser so
    /// that references are counted per formula tree, not per parse.
    pub fn ensure(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        self.insert_entry(name, 0)
    }

    /// Define (or redefine) a name with a payload, promoting an undefined
    /// entry if present. The definition holds one reference of its own.
    pub fn define(&mut self, name: &str, payload: P) -> u32 {
        if let Some(&id) = self.name_to_id.get(name) {
            self.defined.insert(id, payload);
            self.undefined.remove(&id);
            *self.ref_counts.entry(id).or_insert(0) += 1;
            return id;
        }

        let id = self.insert_entry(name, 1);
        self.undefined.remove(&id);
        self.defined.insert(id, payload);
        id
    }

    /// Remove a definition, returning its payload. The entry demotes to
    /// undefined while other references remain and is deleted once the count
    /// reaches zero.
    pub fn undefine(&mut self, name: &str) -> Option<P> {
        let id = *self.name_to_id.get(name)?;
        let payload = self.defined.remove(&id);

        if payload.is_some() {
            if let Some(count) = self.ref_counts.get_mut(&id) {
                *count = count.saturating_sub(1);
            }
        }

        if self.ref_counts.get(&id).copied().unwrap_or(0) == 0 {
            self.remove_entry(id);
        } else {
            self.undefined.insert(id);
        }

        payload
    }

    pub fn add_reference(&mut self, id: u32) -> bool {
        match self.ref_counts.get_mut(&id) {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    /// Drop a reference. An undefined entry whose count reaches zero is
    /// deleted; defined entries stay regardless. Returns true if the entry
    /// was deleted.
    pub fn remove_reference(&mut self, id: u32) -> bool {
        let Some(count) = self.ref_counts.get_mut(&id) else {
            return false;
        };

        *count = count.saturating_sub(1);
        if *count == 0 && self.undefined.contains(&id) {
            self.remove_entry(id);
            return true;
        }
        false
    }

    /// The payload of a defined name.
    pub fn get(&self, id: u32) -> Option<&P> {
        self.defined.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut P> {
        self.defined.get_mut(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).copied()
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }

    /// True if the name exists at all, defined or undefined.
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    pub fn is_defined(&self, id: u32) -> bool {
        self.defined.contains_key(&id)
    }

    pub fn ref_count(&self, id: u32) -> u32 {
        self.ref_counts.get(&id).copied().unwrap_or(0)
    }

    /// Names of all defined entries, sorted.
    pub fn defined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .defined
            .keys()
            .filter_map(|id| self.id_to_name.get(id).cloned())
            .collect();
        names.sort();
        names
    }

    /// Names referenced but not defined, sorted.
    pub fn undefined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .undefined
            .iter()
            .filter_map(|id| self.id_to_name.get(id).cloned())
            .collect();
        names.sort();
        names
    }

    /// Total number of entries, defined and undefined.
    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_id.is_empty()
    }

    pub fn defined_len(&self) -> usize {
        self.defined.len()
    }

    pub fn undefined_len(&self) -> usize {
        self.undefined.len()
    }
}
