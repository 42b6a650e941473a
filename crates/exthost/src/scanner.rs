//! Metadata scanner for candidate shared libraries.
//!
//! Reads a library file as a byte stream and extracts the embedded
//! descriptor blocks without executing any of its code. Blocks are
//! NUL-delimited `key=value` runs bracketed by the start/end markers from
//! [`crate::abi`]; extraction is followed by a validation pass that checks
//! the build environment (when enabled) and the mandatory descriptor keys.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

use memchr::memmem;
use memmap2::Mmap;
use tracing::debug;

use crate::abi::{self, end_marker, start_marker};
use crate::description::{ExtensionDescription, keys};
use crate::error::{ExtensionError, Result};

/// Configuration snapshot taken from the registry for one scan.
pub(crate) struct ScanOptions {
    pub verify_compiler: bool,
    pub check_upx: bool,
}

/// Scans the file at `canonical_path` and returns its validated
/// descriptors, each stamped with `library_filename = canonical_path`.
///
/// `display_name` is the path as the caller supplied it, used in
/// diagnostics. `buffer` is reused across files when a directory scan falls
/// back to buffered reads. The memory mapping, when one is used, is
/// released before this function returns, so the library can be opened
/// immediately afterwards.
pub(crate) fn scan_library(
    display_name: &str,
    canonical_path: &str,
    buffer: &mut Vec<u8>,
    options: &ScanOptions,
    report: &mut dyn FnMut(String),
) -> Result<Vec<ExtensionDescription>> {
    let mut file = File::open(canonical_path)?;

    let mapping = unsafe { Mmap::map(&file) }.ok();
    let contents: &[u8] = match &mapping {
        Some(map) => map,
        None => {
            let len = file.metadata()?.len() as usize;
            if len == 0 {
                return Err(ExtensionError::InvalidFile(format!(
                    "empty file {display_name}"
                )));
            }
            if buffer.len() < len {
                buffer.resize(len, 0);
            }
            file.read_exact(&mut buffer[..len])?;
            &buffer[..len]
        }
    };

    let sections = extract_sections(contents, display_name, options, report);
    debug!(
        path = display_name,
        sections = sections.len(),
        "scanned library file"
    );
    Ok(validate(
        sections,
        display_name,
        canonical_path,
        options,
        report,
    ))
}

/// Finds every marker-bracketed block and parses it into a key/value map.
fn extract_sections(
    contents: &[u8],
    display_name: &str,
    options: &ScanOptions,
    report: &mut dyn FnMut(String),
) -> Vec<HashMap<String, String>> {
    let start_tag = start_marker();
    let end_tag = end_marker();
    let start_finder = memmem::Finder::new(start_tag.as_bytes());
    let end_finder = memmem::Finder::new(end_tag.as_bytes());

    let mut sections = Vec::new();
    let mut cursor = start_finder.find(contents);

    if cursor.is_none() {
        // Only worth checking when the file carried no tags at all.
        if options.check_upx && looks_upx_compressed(contents) {
            report(format!(
                "add_dynamic_library: couldn't find any extensions in file {display_name}, \
                 it seems the file is compressed using upx"
            ));
        }
        return sections;
    }

    while let Some(start) = cursor {
        let Some(end) = end_finder
            .find(&contents[start + 1..])
            .map(|at| start + 1 + at)
        else {
            report(format!(
                "add_dynamic_library: filename={display_name} end tag was missing"
            ));
            break;
        };

        // Descriptors do not nest; a second start tag before the end tag
        // means the first one was stray bytes.
        let next_start = start_finder
            .find(&contents[start + 1..])
            .map(|at| start + 1 + at);
        if let Some(next) = next_start
            && next < end
        {
            report(format!(
                "add_dynamic_library: filename={display_name} found a start tag before the expected end tag"
            ));
            cursor = Some(next);
            continue;
        }

        // The slice stops one byte short of the end tag, dropping the NUL
        // that terminates the last entry.
        if let Some(section) = parse_section(&contents[start..end - 1], display_name, report) {
            sections.push(section);
        }

        cursor = start_finder.find(&contents[end..]).map(|at| end + at);
    }

    sections
}

/// Splits a raw section on NUL and parses each fragment as `key=value`.
/// Returns `None` (and reports why) for a malformed or empty section.
fn parse_section(
    raw: &[u8],
    display_name: &str,
    report: &mut dyn FnMut(String),
) -> Option<HashMap<String, String>> {
    let mut result = HashMap::new();

    for entry in raw.split(|&byte| byte == 0).filter(|e| !e.is_empty()) {
        let entry = String::from_utf8_lossy(entry);
        let Some(pos) = entry.find('=') else {
            report(format!(
                "add_dynamic_library: filename={display_name} '=' is missing ({entry}). Ignore entry"
            ));
            return None;
        };
        let key = entry[..pos].to_string();
        let value = entry[pos + 1..].to_string();
        if result.contains_key(&key) {
            report(format!(
                "add_dynamic_library: filename={display_name} duplicate key ({key}) found. Ignore entry"
            ));
            return None;
        }
        result.insert(key, value);
    }

    if result.is_empty() {
        report(format!(
            "add_dynamic_library: filename={display_name} metadata description didn't contain any data, ignore it"
        ));
        return None;
    }
    Some(result)
}

/// Applies compiler verification and the mandatory-key checks.
fn validate(
    sections: Vec<HashMap<String, String>>,
    display_name: &str,
    canonical_path: &str,
    options: &ScanOptions,
    report: &mut dyn FnMut(String),
) -> Vec<ExtensionDescription> {
    let marker_key = start_marker();
    let mut accepted = Vec::new();

    for mut data in sections {
        data.insert(
            keys::LIBRARY_FILENAME.to_string(),
            canonical_path.to_string(),
        );

        if options.verify_compiler && !build_environment_matches(&data, &marker_key) {
            let lookup = |key: &str| data.get(key).map(String::as_str).unwrap_or("");
            report(format!(
                "add_dynamic_library: ignore file {display_name}. Compilation options didn't match \
                 or were invalid (version={} compiler={} compiler_version={} build_type={} \
                 expected version={} compiler={} compiler_version={} build_type={})",
                lookup(&marker_key),
                lookup(keys::COMPILER),
                lookup(keys::COMPILER_VERSION),
                lookup(keys::BUILD_TYPE),
                abi::API_VERSION_STR,
                abi::COMPILER,
                abi::COMPILER_VERSION,
                abi::BUILD_TYPE,
            ));
            continue;
        }

        data.remove(&marker_key);
        let desc = ExtensionDescription::new(data);

        if desc.name().is_empty() {
            report(format!(
                "add_dynamic_library: filename={display_name} name was empty or not set"
            ));
            continue;
        }
        if desc.interface_name().is_empty() {
            report(format!(
                "add_dynamic_library: filename={display_name} name={} interface_name was empty or not set",
                desc.name()
            ));
            continue;
        }
        if desc.entry_point().is_empty() {
            report(format!(
                "add_dynamic_library: filename={display_name} name={} entry_point was empty or not set",
                desc.name()
            ));
            continue;
        }
        if desc.version() == 0 {
            report(format!(
                "add_dynamic_library: filename={display_name} name={}: version number was invalid or 0",
                desc.name()
            ));
            continue;
        }

        accepted.push(desc);
    }

    accepted
}

/// True when the descriptor was produced by a build environment this host
/// can load from: same metadata API version, and either the same compiler
/// with matching version and profile, or a member of the mutually
/// compatible compiler family.
fn build_environment_matches(data: &HashMap<String, String>, marker_key: &str) -> bool {
    if data.get(marker_key).map(String::as_str) != Some(abi::API_VERSION_STR) {
        return false;
    }

    let compiler = data.get(keys::COMPILER).map(String::as_str).unwrap_or("");
    if compiler != abi::COMPILER {
        return abi::COMPATIBLE_COMPILERS.contains(&compiler)
            && abi::COMPATIBLE_COMPILERS.contains(&abi::COMPILER);
    }

    data.get(keys::COMPILER_VERSION).map(String::as_str) == Some(abi::COMPILER_VERSION)
        && data.get(keys::BUILD_TYPE).map(String::as_str) == Some(abi::BUILD_TYPE)
}

/// Advisory heuristic: "UPX" appearing before "UPX!" suggests a packed
/// binary whose metadata would be compressed away. Never a hard rejection.
fn looks_upx_compressed(contents: &[u8]) -> bool {
    let upx = ["UP", "X"].concat();
    let upx_bang = ["UP", "X!"].concat();
    match (
        memmem::find(contents, upx.as_bytes()),
        memmem::find(contents, upx_bang.as_bytes()),
    ) {
        (Some(plain), Some(bang)) => plain < bang,
        _ => false,
    }
}
