//! Configured lighting circuits.
//!
//! The circuit list is a JSON array. Each entry names one circuit:
//!
//! ```json
//! [
//!   { "comment": "Ground floor" },
//!   { "address": "1.1.2.4", "name": "Kitchen Pendants", "room": "Kitchen" },
//!   { "address": "1.1.2.5", "name": "Porch", "dimmable": false }
//! ]
//! ```
//!
//! Loading is tolerant: a bad record is logged and skipped, never fatal for
//! the rest of the list. Records whose canonical address repeats an earlier
//! one are skipped so the first occurrence wins.

use crate::{CanonicalAddress, Result, error::Error};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info, warn};

/// One record as it appears in the file.
#[derive(Debug, Deserialize)]
struct CircuitRecord {
    address: Option<String>,
    name: Option<String>,
    dimmable: Option<bool>,
    room: Option<String>,
    comment: Option<serde_json::Value>,
}

/// A configured, addressable lighting load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circuit {
    /// Canonical form of the address, used for frame correlation
    pub address: CanonicalAddress,

    /// Address as configured, without brackets (used in outbound commands)
    pub configured_address: String,

    /// Display name
    pub name: String,

    /// Whether intermediate levels are supported
    pub dimmable: bool,

    /// Optional room label
    pub room: Option<String>,
}

impl Circuit {
    /// Create a dimmable circuit without a room.
    pub fn new(address: &str, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            address: CanonicalAddress::parse(address)?,
            configured_address: address
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string(),
            name: name.into(),
            dimmable: true,
            room: None,
        })
    }
}

/// Lookup table of circuits keyed by canonical address.
#[derive(Debug, Default)]
pub struct CircuitTable {
    circuits: Vec<Circuit>,
    index: HashMap<CanonicalAddress, usize>,
}

impl CircuitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a JSON circuit list.
    ///
    /// # Errors
    /// Returns `Error::Config` if the document is not a JSON array. Problems
    /// with individual records are logged and the record is skipped.
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("circuit list is not a JSON array: {e}")))?;

        let mut table = Self::new();

        for value in records {
            match Self::circuit_from_value(&value) {
                Ok(Some(circuit)) => {
                    if let Err(e) = table.insert(circuit) {
                        warn!(error = %e, "Skipping all but the first record for this address");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(record = %value, error = %e, "Invalid device record in circuits file");
                }
            }
        }

        info!("Loaded {} circuits", table.len());
        Ok(table)
    }

    /// Read a circuit list from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Convert one record. `Ok(None)` means a pure comment entry.
    fn circuit_from_value(value: &serde_json::Value) -> Result<Option<Circuit>> {
        let record: CircuitRecord = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidCircuit(e.to_string()))?;

        let (Some(address), Some(name)) = (record.address, record.name) else {
            if record.comment.is_some() {
                return Ok(None);
            }
            return Err(Error::InvalidCircuit(
                "missing address or name".to_string(),
            ));
        };

        let mut circuit = Circuit::new(&address, name)?;
        circuit.dimmable = record.dimmable.unwrap_or(true);
        circuit.room = record.room;
        Ok(Some(circuit))
    }

    /// Add a circuit.
    ///
    /// # Errors
    /// Returns `Error::DuplicateAddress` if a circuit with the same canonical
    /// address is already present; the existing entry is kept.
    pub fn insert(&mut self, circuit: Circuit) -> Result<()> {
        if self.index.contains_key(&circuit.address) {
            return Err(Error::DuplicateAddress(circuit.configured_address));
        }
        self.index.insert(circuit.address.clone(), self.circuits.len());
        self.circuits.push(circuit);
        Ok(())
    }

    pub fn get(&self, address: &CanonicalAddress) -> Option<&Circuit> {
        self.index.get(address).map(|&i| &self.circuits[i])
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Circuits in file order.
    pub fn iter(&self) -> impl Iterator<Item = &Circuit> {
        self.circuits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn addr(s: &str) -> CanonicalAddress {
        CanonicalAddress::parse(s).unwrap()
    }

    #[test]
    fn test_load_valid_records() {
        let json = r#"[
            { "address": "1.1.2.4", "name": "Kitchen", "room": "Main" },
            { "address": "1.1.2.5", "name": "Porch", "dimmable": false }
        ]"#;

        let table = CircuitTable::from_json(json).unwrap();
        assert_eq!(table.len(), 2);

        let kitchen = table.get(&addr("01:01:02:04")).unwrap();
        assert_eq!(kitchen.name, "Kitchen");
        assert_eq!(kitchen.configured_address, "1.1.2.4");
        assert!(kitchen.dimmable);
        assert_eq!(kitchen.room.as_deref(), Some("Main"));

        let porch = table.get(&addr("1.1.2.5")).unwrap();
        assert!(!porch.dimmable);
    }

    #[test]
    fn test_skips_comments_and_incomplete_records() {
        let json = r#"[
            { "comment": "Ground floor" },
            { "address": "1.1.2.4" },
            { "name": "Nameless" },
            { "address": "1.1.2.6", "name": "Hall" }
        ]"#;

        let table = CircuitTable::from_json(json).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get(&addr("1.1.2.6")).is_some());
    }

    #[test]
    fn test_duplicate_addresses_keep_first() {
        let json = r#"[
            { "address": "1.1.2.4", "name": "First" },
            { "address": "01:01:02:04", "name": "Second" },
            { "address": "1.01.2.4", "name": "Third" }
        ]"#;

        let table = CircuitTable::from_json(json).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&addr("1.1.2.4")).unwrap().name, "First");
    }

    #[test]
    fn test_skips_bad_address_and_wrong_types() {
        let json = r#"[
            { "address": "x.y", "name": "Broken" },
            { "address": 42, "name": "Numeric" },
            { "address": "2.3", "name": "Fine" }
        ]"#;

        let table = CircuitTable::from_json(json).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.iter().next().unwrap().name, "Fine");
    }

    #[test]
    fn test_not_an_array() {
        let result = CircuitTable::from_json(r#"{ "address": "1.1" }"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_insert_duplicate() {
        let mut table = CircuitTable::new();
        table.insert(Circuit::new("1.2", "A").unwrap()).unwrap();

        let result = table.insert(Circuit::new("01:02", "B").unwrap());
        assert!(matches!(result, Err(Error::DuplicateAddress(_))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"address": "4.5", "name": "Den"}}]"#).unwrap();

        let table = CircuitTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 1);
    }
}
