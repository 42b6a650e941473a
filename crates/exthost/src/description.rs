//! Descriptor record for a single extension.
//!
//! A descriptor is the parsed form of one embedded metadata block: a string
//! key/value map with typed accessors for the reserved keys. Descriptors are
//! immutable once the scanner has validated them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved descriptor keys.
pub mod keys {
    pub const COMPILER: &str = "compiler";
    pub const COMPILER_VERSION: &str = "compiler_version";
    pub const BUILD_TYPE: &str = "build_type";
    pub const INTERFACE_NAME: &str = "interface_name";
    pub const NAME: &str = "name";
    pub const VERSION: &str = "version";
    pub const DESCRIPTION: &str = "description";
    pub const ENTRY_POINT: &str = "entry_point";
    pub const LIBRARY_FILENAME: &str = "library_filename";
}

/// Parsed metadata for one extension within a shared library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDescription {
    data: HashMap<String, String>,
}

impl ExtensionDescription {
    pub fn new(data: HashMap<String, String>) -> Self {
        Self { data }
    }

    /// A descriptor produced by the scanner always carries data; a default
    /// constructed one is the "not found" sentinel.
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn name(&self) -> &str {
        self.get_or_empty(keys::NAME)
    }

    /// The extension version, or 0 if the value is missing or unparsable.
    pub fn version(&self) -> u32 {
        self.get_or_empty(keys::VERSION).parse().unwrap_or(0)
    }

    pub fn description(&self) -> &str {
        self.get_or_empty(keys::DESCRIPTION)
    }

    pub fn interface_name(&self) -> &str {
        self.get_or_empty(keys::INTERFACE_NAME)
    }

    /// Name of the exported factory symbol.
    pub fn entry_point(&self) -> &str {
        self.get_or_empty(keys::ENTRY_POINT)
    }

    /// Canonical path of the file the descriptor was extracted from.
    pub fn library_filename(&self) -> &str {
        self.get_or_empty(keys::LIBRARY_FILENAME)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// User-defined metadata: everything except the per-extension reserved
    /// keys. Compiler attributes stay visible here, mirroring the embedded
    /// blob.
    pub fn extended(&self) -> HashMap<String, String> {
        let mut result = self.data.clone();
        result.remove(keys::NAME);
        result.remove(keys::VERSION);
        result.remove(keys::DESCRIPTION);
        result.remove(keys::INTERFACE_NAME);
        result.remove(keys::ENTRY_POINT);
        result.remove(keys::LIBRARY_FILENAME);
        result
    }

    /// The full key/value map, user metadata included.
    pub fn data(&self) -> &HashMap<String, String> {
        &self.data
    }
}

impl fmt::Display for ExtensionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  name={}", self.name())?;
        writeln!(f, "  version={}", self.version())?;
        writeln!(f, "  description={}", self.description())?;
        writeln!(f, "  interface_name={}", self.interface_name())?;
        writeln!(f, "  entry_point={}", self.entry_point())?;
        writeln!(f, "  library_filename={}", self.library_filename())?;

        let extended = self.extended();
        if !extended.is_empty() {
            writeln!(f, "  Extended data:")?;
            let mut entries: Vec<_> = extended.iter().collect();
            entries.sort();
            for (key, value) in entries {
                writeln!(f, "    {key} = {value}")?;
            }
        }
        Ok(())
    }
}
