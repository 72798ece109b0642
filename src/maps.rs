//! eBPF map definitions as found in the object file.
//!
//! The `maps` section is an array of fixed-size records; each symbol in the
//! section names one record, and the record's index is its byte offset
//! divided by the record size.

use std::collections::BTreeMap;

use crate::error::Error;

/// Map definition record as laid out in the `maps` section: eight
/// little-endian 32-bit fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapDefinition {
    /// BPF_MAP_TYPE_* value.
    pub map_type: u32,
    /// Size of key in bytes.
    pub key_size: u32,
    /// Size of value in bytes.
    pub value_size: u32,
    /// Maximum number of entries.
    pub max_entries: u32,
    /// Index of the inner map for map-in-map types.
    pub inner_map_idx: u32,
    /// Pinning behavior.
    pub pinning: u32,
    /// Map id.
    pub id: u32,
    /// Inner map id.
    pub inner_id: u32,
}

/// Size of one in-file map definition record.
pub const MAP_RECORD_SIZE: usize = core::mem::size_of::<MapDefinition>();

impl MapDefinition {
    /// Decode one record from a [`MAP_RECORD_SIZE`]-byte slice.
    pub fn from_bytes(data: &[u8; MAP_RECORD_SIZE]) -> Self {
        let field = |i: usize| u32::from_le_bytes(data[i * 4..i * 4 + 4].try_into().unwrap());
        Self {
            map_type: field(0),
            key_size: field(1),
            value_size: field(2),
            max_entries: field(3),
            inner_map_idx: field(4),
            pinning: field(5),
            id: field(6),
            inner_id: field(7),
        }
    }
}

/// One named map with its stable index.
#[derive(Debug, Clone)]
pub struct MapEntry {
    /// The decoded record.
    pub definition: MapDefinition,
    /// Record index: byte offset in the section divided by the record size.
    pub index: usize,
}

/// All maps of a translation session, keyed by symbol name.
#[derive(Debug, Default)]
pub struct MapTable {
    entries: BTreeMap<String, MapEntry>,
}

impl MapTable {
    /// Register a map under its symbol name.
    pub fn insert(&mut self, name: String, entry: MapEntry) {
        self.entries.insert(name, entry);
    }

    /// Look up a map by symbol name.
    pub fn get(&self, name: &str) -> Option<&MapEntry> {
        self.entries.get(name)
    }

    /// True when no maps were defined.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of maps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries sorted by ascending index, for emission.
    pub fn index_ordered(&self) -> Vec<(&str, &MapEntry)> {
        let mut ordered: Vec<_> = self
            .entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry))
            .collect();
        ordered.sort_by_key(|(_, entry)| entry.index);
        ordered
    }
}

/// Extract the map table from the `maps` section and its symbols.
///
/// `symbols` is the full symbol table; only symbols whose section index
/// matches `maps_section_index` contribute. Each such symbol must span
/// exactly one record.
pub fn extract_maps(
    section_data: &[u8],
    maps_section_index: usize,
    symbols: &[crate::elf::ElfSymbol],
) -> Result<MapTable, Error> {
    if section_data.len() % MAP_RECORD_SIZE != 0 {
        return Err(Error::BadMapSection(format!(
            "section size {} is not a multiple of {}",
            section_data.len(),
            MAP_RECORD_SIZE
        )));
    }

    let mut table = MapTable::default();
    for symbol in symbols {
        if symbol.section_index as usize != maps_section_index || symbol.name.is_empty() {
            continue;
        }
        if symbol.size != MAP_RECORD_SIZE as u64 {
            return Err(Error::BadMapSection(format!(
                "symbol '{}' has size {}, expected {}",
                symbol.name, symbol.size, MAP_RECORD_SIZE
            )));
        }
        let offset = symbol.value as usize;
        let record: &[u8; MAP_RECORD_SIZE] = section_data
            .get(offset..offset + MAP_RECORD_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| {
                Error::BadMapSection(format!(
                    "symbol '{}' at offset {} overruns the section",
                    symbol.name, offset
                ))
            })?;

        let definition = MapDefinition::from_bytes(record);
        log::debug!(
            "Found map '{}': type={}, key_size={}, value_size={}, max_entries={}",
            symbol.name,
            definition.map_type,
            definition.key_size,
            definition.value_size,
            definition.max_entries
        );
        table.insert(
            symbol.name.clone(),
            MapEntry {
                definition,
                index: offset / MAP_RECORD_SIZE,
            },
        );
    }
    Ok(table)
}
