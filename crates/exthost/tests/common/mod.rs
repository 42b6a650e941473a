//! Helpers shared by the integration suites: synthetic library files with
//! embedded descriptor blobs.

use std::path::{Path, PathBuf};

pub const START: &str = "EXTENSION_SYSTEM_METADATA_DESCRIPTION_START";
pub const END: &str = "EXTENSION_SYSTEM_METADATA_DESCRIPTION_END";

/// Builds one descriptor blob: the API-version entry, the given
/// `key=value` entries, and the bracketing markers.
pub fn descriptor_blob(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut blob = Vec::new();
    blob.extend_from_slice(START.as_bytes());
    blob.extend_from_slice(b"=1\0");
    for (key, value) in entries {
        blob.extend_from_slice(key.as_bytes());
        blob.push(b'=');
        blob.extend_from_slice(value.as_bytes());
        blob.push(0);
    }
    blob.extend_from_slice(END.as_bytes());
    blob
}

/// The mandatory entries for a well-formed descriptor.
pub fn standard_entries<'a>(
    interface: &'a str,
    name: &'a str,
    version: &'a str,
) -> Vec<(&'a str, &'a str)> {
    vec![
        ("interface_name", interface),
        ("name", name),
        ("version", version),
        ("entry_point", "synthetic_entry"),
        ("description", "synthetic test extension"),
    ]
}

/// Writes a fake shared-library file carrying the given blobs between
/// stretches of junk bytes.
pub fn write_library(dir: &Path, file_name: &str, blobs: &[Vec<u8>]) -> PathBuf {
    let mut bytes = b"\x7fELF synthetic library ".to_vec();
    for blob in blobs {
        bytes.extend_from_slice(blob);
        bytes.extend_from_slice(b" padding between sections ");
    }
    let path = dir.join(file_name);
    std::fs::write(&path, bytes).unwrap();
    path
}
