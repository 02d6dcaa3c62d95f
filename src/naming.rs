//! Human-readable names for GATT attributes

use std::collections::HashMap;

use crate::btuuid::{assigned_name, BluetoothUuidExt};
use crate::registry::Attribute;
use crate::Uuid;

/// Maps attribute types to display names, overriding the Bluetooth SIG assigned names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NameTable {
    names: HashMap<Uuid, String>,
}

impl NameTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the name for `uuid`, returning the previous one.
    pub fn insert(&mut self, uuid: Uuid, name: impl Into<String>) -> Option<String> {
        self.names.insert(uuid, name.into())
    }

    /// The name registered for `uuid`.
    pub fn get(&self, uuid: &Uuid) -> Option<&str> {
        self.names.get(uuid).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(Uuid, S)> for NameTable {
    fn from_iter<T: IntoIterator<Item = (Uuid, S)>>(iter: T) -> Self {
        NameTable {
            names: iter.into_iter().map(|(uuid, name)| (uuid, name.into())).collect(),
        }
    }
}

/// Resolves the display name of `attribute`.
///
/// A service label wins, then an entry in `table`, then the SIG assigned name. Failing all of those the name is
/// the uuid in string form, shortened for uuids derived from the Bluetooth base uuid.
pub fn resolve_name(attribute: &Attribute, table: Option<&NameTable>) -> String {
    if let Attribute::Service(service) = attribute {
        if let Some(label) = service.label() {
            return label.to_owned();
        }
    }
    uuid_name(&attribute.uuid(), table)
}

/// Resolves the display name of an attribute type.
pub fn uuid_name(uuid: &Uuid, table: Option<&NameTable>) -> String {
    table
        .and_then(|t| t.get(uuid))
        .or_else(|| assigned_name(uuid))
        .map(str::to_owned)
        .unwrap_or_else(|| uuid.to_short_string())
}
