//! Wire-level constants shared between the host and extension libraries.
//!
//! Extensions carry their metadata as a NUL-delimited `key=value` blob
//! embedded in the shared object, bracketed by a start and an end marker.
//! The markers are stored here as fragments and only assembled at runtime
//! (or inside an extension's blob), so a host binary never contains an
//! assembled marker that the scanner would mistake for a descriptor.

use std::os::raw::{c_char, c_void};

/// Version of the embedded-metadata format. Stamped into every descriptor
/// as the value of the start-marker entry.
pub const API_VERSION: u32 = 1;

/// String form of [`API_VERSION`], used when building and verifying blobs.
pub const API_VERSION_STR: &str = "1";

/// Compiler identifier stamped into descriptors built by this crate.
pub const COMPILER: &str = "rustc";

/// Full `rustc --version` string captured at build time (see `build.rs`).
pub const COMPILER_VERSION: &str = env!("EXTHOST_RUSTC_VERSION");

/// Build profile stamped into descriptors, `"debug"` or `"release"`.
pub const BUILD_TYPE: &str = if cfg!(debug_assertions) {
    "debug"
} else {
    "release"
};

/// Compilers whose artifacts are mutually link-compatible; a descriptor
/// from one member is accepted by a host built with another.
pub const COMPATIBLE_COMPILERS: &[&str] = &["clang", "g++"];

/// Signature of an extension's exported entry point.
///
/// Called as `(null, null)` to construct a new instance, `(null, &out)` to
/// construct and also expose the metadata blob, and `(instance, null)` to
/// destroy a previously constructed instance.
pub type RawEntryPoint = unsafe extern "C" fn(*mut c_void, *mut *const c_char) -> *mut c_void;

#[doc(hidden)]
pub const MARKER_STEM: &str = "EXTENSION_SYSTEM_METADATA_DESCRIPTION";
#[doc(hidden)]
pub const MARKER_START_SUFFIX: &str = "_START";
#[doc(hidden)]
pub const MARKER_END_SUFFIX: &str = "_END";

/// Assembles the start marker, which doubles as the key of the descriptor's
/// API-version entry.
pub(crate) fn start_marker() -> String {
    [MARKER_STEM, MARKER_START_SUFFIX].concat()
}

pub(crate) fn end_marker() -> String {
    [MARKER_STEM, MARKER_END_SUFFIX].concat()
}

/// Total length of the concatenation of `parts`.
///
/// Const so `export_extension!` can size the embedded blob at compile time.
#[doc(hidden)]
pub const fn blob_len(parts: &[&[u8]]) -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < parts.len() {
        total += parts[i].len();
        i += 1;
    }
    total
}

/// Concatenates `parts` into a fixed-size array at compile time.
///
/// `N` must equal [`blob_len`] of the same parts.
#[doc(hidden)]
pub const fn build_blob<const N: usize>(parts: &[&[u8]]) -> [u8; N] {
    let mut out = [0u8; N];
    let mut pos = 0;
    let mut i = 0;
    while i < parts.len() {
        let part = parts[i];
        let mut j = 0;
        while j < part.len() {
            out[pos] = part[j];
            pos += 1;
            j += 1;
        }
        i += 1;
    }
    out
}
