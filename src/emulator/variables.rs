//! Named, statically allocated memory regions declared before compilation.

use super::memory::{Memory, MEMORY_BASE};
use super::operand::{MemoryRef, Operand};
use super::ops::OpCode;
use super::registers::Register;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum VariableError {
    #[error("invalid variable name: \"{0}\"")]
    InvalidName(String),
    #[error("duplicate variable: \"{0}\"")]
    Duplicate(String),
    #[error("invalid variable size: {0}")]
    InvalidSize(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableContents {
    Number(u32),
    Bytes(Vec<u8>),
    /// stored as UTF-16 code units plus a terminating zero
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    Number,
    Array,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    /// bytes
    pub size: u32,
    pub kind: VariableKind,
    /// assigned by [`VariableTable::allocate`], 0 before that
    pub address: u32,
    pub initial: Option<VariableContents>,
}

impl Variable {
    /// Derives the real size and kind from the declaration. Text takes two bytes
    /// per UTF-16 unit plus the terminator, a non-empty byte array its length.
    pub fn new(
        name: &str,
        size: u32,
        initial: Option<VariableContents>,
        force_array: bool,
    ) -> Self {
        let size = match &initial {
            Some(VariableContents::Text(text)) => (text.encode_utf16().count() as u32 + 1) * 2,
            Some(VariableContents::Bytes(bytes)) if !bytes.is_empty() => bytes.len() as u32,
            _ => size,
        };
        let kind = match &initial {
            Some(VariableContents::Text(_)) => VariableKind::String,
            Some(VariableContents::Bytes(bytes)) if !bytes.is_empty() => VariableKind::Array,
            _ if size > 4 || force_array => VariableKind::Array,
            _ => VariableKind::Number,
        };
        Self {
            name: name.to_string(),
            size,
            kind,
            address: 0,
            initial,
        }
    }

    /// The variable as an instruction operand: a direct memory access of its full size.
    pub fn operand(&self) -> Operand {
        Operand::Memory(MemoryRef::direct(self.address, self.size))
    }

    /// Initial contents as they are laid out in memory.
    pub fn image(&self) -> Option<Vec<u8>> {
        match self.initial.as_ref()? {
            VariableContents::Text(text) => Some(
                text.encode_utf16()
                    .chain(std::iter::once(0))
                    .flat_map(u16::to_le_bytes)
                    .collect(),
            ),
            VariableContents::Bytes(bytes) if !bytes.is_empty() => Some(bytes.clone()),
            VariableContents::Bytes(_) => None,
            VariableContents::Number(value) => {
                let width = self.size.min(4) as usize;
                Some(value.to_le_bytes()[..width].to_vec())
            }
        }
    }
}

/// Names a variable may not take: size keywords, `ptr`, `in`, mnemonics and registers.
pub fn validate_name(name: &str) -> Result<(), VariableError> {
    let invalid = || VariableError::InvalidName(name.to_string());
    let Some(first) = name.chars().next() else {
        return Err(invalid());
    };
    if first < 'A' || name.contains([' ', '\t']) {
        return Err(invalid());
    }
    let lower = name.to_lowercase();
    if matches!(lower.as_str(), "byte" | "word" | "dword" | "ptr" | "in")
        || OpCode::from_mnemonic(&lower).is_some()
        || Register::from_name(&lower).is_some()
    {
        return Err(invalid());
    }
    Ok(())
}

/// Allocation rank: 4 first, then other multiples of 4, then 2, then other
/// even sizes, then odd sizes.
fn size_rank(size: u32) -> u8 {
    match size {
        4 => 0,
        _ if size & 3 == 0 => 1,
        2 => 2,
        _ if size & 1 == 0 => 3,
        _ => 4,
    }
}

/// Allocation order: by rank, then ascending size, then by name ignoring case.
fn allocation_key(variable: &Variable) -> (u8, u32, String, String) {
    (
        size_rank(variable.size),
        variable.size,
        variable.name.to_lowercase(),
        variable.name.clone(),
    )
}

/// Declared variables keyed by lower case name, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableTable {
    variables: IndexMap<String, Variable>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(&name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// Declares a variable. `size` may be 0 when initial contents give it one.
    pub fn add(
        &mut self,
        name: &str,
        size: u32,
        initial: Option<VariableContents>,
        force_array: bool,
        memory_size: u32,
    ) -> Result<&Variable, VariableError> {
        validate_name(name)?;
        let key = name.to_lowercase();
        if self.variables.contains_key(&key) {
            return Err(VariableError::Duplicate(name.to_string()));
        }
        if (size == 0 || size > memory_size) && (size != 0 || initial.is_none()) {
            return Err(VariableError::InvalidSize(size));
        }
        let variable = Variable::new(name, size, initial, force_array);
        if variable.size == 0 {
            return Err(VariableError::InvalidSize(0));
        }
        tracing::debug!(
            "variable {} declared: {} bytes, {:?}",
            variable.name,
            variable.size,
            variable.kind
        );
        Ok(self.variables.entry(key).or_insert(variable))
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.variables.shift_remove(&name.to_lowercase())
    }

    pub fn total_size(&self) -> u64 {
        self.variables.values().map(|v| u64::from(v.size)).sum()
    }

    /// Packs every variable from [`MEMORY_BASE`] up, without gaps.
    /// Fails with the total size when they do not fit in `memory_size` bytes.
    pub fn allocate(&mut self, memory_size: u32) -> Result<(), u64> {
        let total = self.total_size();
        if total > u64::from(memory_size) {
            return Err(total);
        }
        let mut order: Vec<&mut Variable> = self.variables.values_mut().collect();
        order.sort_by_cached_key(|variable| allocation_key(variable));
        let mut address = MEMORY_BASE;
        for variable in order {
            variable.address = address;
            tracing::trace!("{} at {:#010X}", variable.name, address);
            address += variable.size;
        }
        Ok(())
    }

    /// Writes every initial value into memory.
    pub fn fill(&self, memory: &mut Memory) {
        for variable in self.variables.values() {
            if let Some(image) = variable.image() {
                if !memory.fill(variable.address, &image) {
                    tracing::warn!("variable {} does not fit in memory", variable.name);
                }
            }
        }
    }
}

/// A variable declaration as written in a RON declaration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub initial: Option<VariableContents>,
    #[serde(default)]
    pub force_array: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn table(sizes: &[(&str, u32)]) -> VariableTable {
        let mut table = VariableTable::new();
        for (name, size) in sizes {
            table.add(name, *size, None, false, 65536).unwrap();
        }
        table
    }

    fn address(table: &VariableTable, name: &str) -> u32 {
        table.get(name).unwrap().address
    }

    #[traced_test]
    #[test]
    fn test_packing_order() {
        let mut vars = table(&[("one", 1), ("four", 4), ("two", 2)]);
        vars.allocate(65536).unwrap();
        assert_eq!(address(&vars, "four"), 1024);
        assert_eq!(address(&vars, "two"), 1028);
        assert_eq!(address(&vars, "one"), 1030);
    }

    #[traced_test]
    #[test]
    fn test_packing_order_with_arrays() {
        let mut vars = table(&[("b", 3), ("a", 8), ("c", 6), ("d", 4), ("e", 3)]);
        vars.allocate(65536).unwrap();
        // 4, 8, then the even 6, then the odd sizes by name
        assert_eq!(address(&vars, "d"), 1024);
        assert_eq!(address(&vars, "a"), 1028);
        assert_eq!(address(&vars, "c"), 1036);
        assert_eq!(address(&vars, "b"), 1042);
        assert_eq!(address(&vars, "e"), 1045);
    }

    #[traced_test]
    #[test]
    fn test_packing_ignores_declaration_order() {
        let sizes = [("v0", 6), ("v1", 10), ("v2", 3), ("v3", 12), ("v4", 2), ("v5", 8)];
        let mut forward = table(&sizes);
        forward.allocate(65536).unwrap();
        let mut reversed: Vec<_> = sizes.to_vec();
        reversed.reverse();
        let mut backward = table(&reversed);
        backward.allocate(65536).unwrap();
        for (name, _) in sizes {
            assert_eq!(address(&forward, name), address(&backward, name), "{}", name);
        }
        // 8, 12, 2, then the even 6 and 10 ascending, then 3
        assert_eq!(address(&forward, "v5"), 1024);
        assert_eq!(address(&forward, "v3"), 1032);
        assert_eq!(address(&forward, "v4"), 1044);
        assert_eq!(address(&forward, "v0"), 1046);
        assert_eq!(address(&forward, "v1"), 1052);
        assert_eq!(address(&forward, "v2"), 1062);
    }

    #[test]
    fn test_not_enough_space() {
        let mut vars = table(&[("big", 64), ("other", 1)]);
        assert_eq!(vars.allocate(64), Err(65));
    }

    #[test]
    fn test_names() {
        assert!(validate_name("counter").is_ok());
        assert!(validate_name("Ünïcode").is_ok());
        for bad in ["", "1abc", "has space", "mov", "EAX", "ptr", "In", "@x"] {
            assert_eq!(
                validate_name(bad),
                Err(VariableError::InvalidName(bad.to_string())),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_duplicates_ignore_case() {
        let mut vars = table(&[("Total", 4)]);
        assert_eq!(
            vars.add("TOTAL", 4, None, false, 65536).unwrap_err(),
            VariableError::Duplicate("TOTAL".to_string())
        );
    }

    #[test]
    fn test_sizes_and_kinds() {
        let mut vars = VariableTable::new();
        assert_eq!(
            vars.add("x", 0, None, false, 16).unwrap_err(),
            VariableError::InvalidSize(0)
        );
        assert_eq!(
            vars.add("x", 32, None, false, 16).unwrap_err(),
            VariableError::InvalidSize(32)
        );

        let text = vars
            .add("msg", 0, Some(VariableContents::Text("hi".into())), false, 16)
            .unwrap();
        assert_eq!((text.size, text.kind), (6, VariableKind::String));

        let bytes = vars
            .add("buf", 0, Some(VariableContents::Bytes(vec![1, 2, 3])), false, 16)
            .unwrap();
        assert_eq!((bytes.size, bytes.kind), (3, VariableKind::Array));

        let forced = vars.add("arr", 2, None, true, 16).unwrap();
        assert_eq!(forced.kind, VariableKind::Array);

        let number = vars.add("n", 4, None, false, 16).unwrap();
        assert_eq!(number.kind, VariableKind::Number);
    }

    #[traced_test]
    #[test]
    fn test_fill_lays_out_contents() {
        let mut vars = VariableTable::new();
        vars.add("n", 2, Some(VariableContents::Number(0x1234)), false, 64)
            .unwrap();
        vars.add("s", 0, Some(VariableContents::Text("Ab".into())), false, 64)
            .unwrap();
        vars.allocate(64).unwrap();

        let mut memory = Memory::new(64);
        vars.fill(&mut memory);
        let n = address(&vars, "n");
        let s = address(&vars, "s");
        assert_eq!(memory.read(n, 2).unwrap(), 0x1234);
        assert_eq!(memory.slice(s, 6).unwrap(), &[b'A', 0, b'b', 0, 0, 0]);
    }
}
