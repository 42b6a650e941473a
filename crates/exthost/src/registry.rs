//! Extension registry: the canonical index of known extensions and the
//! factory that materializes instances from them.
//!
//! The registry maps canonical library paths to the descriptors extracted
//! from each file. Libraries are opened lazily on the first instance
//! request and unloaded automatically once the last instance handle drops;
//! the registry itself only holds a weak reference to each open library.
//! All operations serialize on a single mutex and are safe to call from
//! parallel threads.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::os::raw::c_void;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::abi::RawEntryPoint;
use crate::description::ExtensionDescription;
use crate::error::ExtensionError;
use crate::library::{FILE_EXTENSION, SharedLibrary};
use crate::scanner::{self, ScanOptions};

/// Callback receiving one diagnostic string per reported event.
pub type MessageHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Canonical string identity of a plugin interface.
///
/// Implemented for `dyn Trait` objects via
/// [`declare_interface!`](crate::declare_interface); the name is what
/// descriptors carry in their `interface_name` field.
pub trait InterfaceName {
    const NAME: &'static str;
}

/// Per-file registry entry: the descriptors extracted from the file plus a
/// weak view of the library while any instance keeps it open.
struct LibraryRecord {
    extensions: Vec<ExtensionDescription>,
    library: Weak<SharedLibrary>,
    /// Monotonic insertion stamp; when several files provide the same
    /// (interface, name, version), the record added last wins.
    sequence: u64,
}

struct Inner {
    known: HashMap<String, LibraryRecord>,
    /// Live instances by address, for [`ExtensionRegistry::find_description_for`].
    loaded: HashMap<usize, ExtensionDescription>,
    next_sequence: u64,
    verify_compiler: bool,
    debug_output: bool,
    check_upx: bool,
    message_handler: Option<MessageHandler>,
}

impl Inner {
    fn new() -> Self {
        Self {
            known: HashMap::new(),
            loaded: HashMap::new(),
            next_sequence: 0,
            verify_compiler: true,
            debug_output: false,
            check_upx: false,
            message_handler: Some(Box::new(|msg| warn!(target: "exthost", "{msg}"))),
        }
    }

    fn emit(&self, msg: &str) {
        if let Some(handler) = &self.message_handler {
            handler(msg);
        }
    }
}

/// Thread-safe index of extension libraries and factory for their
/// instances.
///
/// Instances created through the registry may outlive it; dropping the
/// registry never invalidates a live [`Extension`].
pub struct ExtensionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A message handler may panic while the lock is held; no locked
        // section leaves `Inner` mid-mutation, so recover instead of
        // propagating the poison to every later caller.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a single library file.
    ///
    /// The path is canonicalized first; a bare name is also tried with the
    /// platform extension appended. Returns the number of descriptors
    /// admitted from the file, 0 when the file was skipped — including the
    /// case where the library is currently loaded by live instances, whose
    /// descriptors are deliberately left untouched.
    pub fn add_dynamic_library(&self, filename: impl AsRef<Path>) -> usize {
        let mut buffer = Vec::new();
        let mut inner = self.lock();
        add_locked(&mut inner, filename.as_ref(), &mut buffer)
    }

    /// Drops all descriptors provided by the library. Instances already
    /// created keep their own strong library reference and are unaffected.
    pub fn remove_dynamic_library(&self, filename: impl AsRef<Path>) {
        let Some(canonical) = real_library_path(filename.as_ref()) else {
            return;
        };
        let key = canonical.to_string_lossy().into_owned();
        self.lock().known.remove(&key);
    }

    /// Scans `path` for shared libraries with the platform extension and
    /// registers each. Returns the total number of descriptors admitted.
    pub fn search_directory(&self, path: impl AsRef<Path>, recursive: bool) -> usize {
        self.search_directory_impl(path.as_ref(), None, recursive)
    }

    /// Like [`search_directory`](Self::search_directory), restricted to
    /// file names starting with `required_prefix`.
    pub fn search_directory_with_prefix(
        &self,
        path: impl AsRef<Path>,
        required_prefix: &str,
        recursive: bool,
    ) -> usize {
        self.search_directory_impl(path.as_ref(), Some(required_prefix), recursive)
    }

    fn search_directory_impl(
        &self,
        root: &Path,
        required_prefix: Option<&str>,
        recursive: bool,
    ) -> usize {
        // One buffer for the whole walk; the scanner grows it to the
        // largest file seen.
        let mut buffer = Vec::new();
        let mut inner = self.lock();
        let mut admitted = 0;

        let mut walker = WalkDir::new(root);
        if !recursive {
            walker = walker.max_depth(1);
        }
        for entry in walker.into_iter().filter_map(|entry| entry.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(FILE_EXTENSION) {
                continue;
            }
            if let Some(prefix) = required_prefix
                && !name.starts_with(prefix)
            {
                continue;
            }
            admitted += add_locked(&mut inner, entry.path(), &mut buffer);
        }
        admitted
    }

    /// All known descriptors across all registered files.
    pub fn extensions(&self) -> Vec<ExtensionDescription> {
        let inner = self.lock();
        inner
            .known
            .values()
            .flat_map(|record| record.extensions.iter().cloned())
            .collect()
    }

    /// Descriptors matching a metadata filter.
    ///
    /// Pairs sharing a key are or-linked, distinct keys are and-linked:
    /// a descriptor matches iff for every filtered key its value is one of
    /// the values listed for that key. Descriptors lacking a filtered key
    /// never match.
    pub fn extensions_filtered(&self, filter: &[(&str, &str)]) -> Vec<ExtensionDescription> {
        let mut wanted: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (key, value) in filter {
            wanted.entry(key).or_default().insert(value);
        }

        let inner = self.lock();
        inner
            .known
            .values()
            .flat_map(|record| record.extensions.iter())
            .filter(|desc| {
                wanted
                    .iter()
                    .all(|(key, values)| desc.get(key).is_some_and(|value| values.contains(value)))
            })
            .cloned()
            .collect()
    }

    /// Descriptors for interface `T`, optionally narrowed by a metadata
    /// filter (pass `&[]` for none).
    pub fn extensions_for<T: ?Sized + InterfaceName>(
        &self,
        filter: &[(&str, &str)],
    ) -> Vec<ExtensionDescription> {
        let mut filter = filter.to_vec();
        filter.push((crate::description::keys::INTERFACE_NAME, T::NAME));
        self.extensions_filtered(&filter)
    }

    /// The highest-versioned descriptor for `(T, name)`, if any.
    pub fn find_description<T: ?Sized + InterfaceName>(
        &self,
        name: &str,
    ) -> Option<ExtensionDescription> {
        let inner = self.lock();
        find_highest(&inner, T::NAME, name).cloned()
    }

    /// The descriptor matching `(T, name, version)` exactly, if any.
    pub fn find_description_version<T: ?Sized + InterfaceName>(
        &self,
        name: &str,
        version: u32,
    ) -> Option<ExtensionDescription> {
        let inner = self.lock();
        find_exact(&inner, T::NAME, name, version).cloned()
    }

    /// The descriptor a live instance was created from.
    pub fn find_description_for<T: ?Sized>(
        &self,
        extension: &Extension<T>,
    ) -> Option<ExtensionDescription> {
        let inner = self.lock();
        inner.loaded.get(&extension.key()).cloned()
    }

    /// Creates an instance of the highest known version of `(T, name)`.
    ///
    /// Returns `None` when no matching descriptor exists or every candidate
    /// failed to load, resolve, or construct.
    pub fn create_extension<T: ?Sized + InterfaceName>(&self, name: &str) -> Option<Extension<T>> {
        let mut inner = self.lock();
        let version = find_highest(&inner, T::NAME, name).map(|desc| desc.version())?;
        create_locked(&mut inner, &self.inner, T::NAME, name, version)
    }

    /// Creates an instance of an exact `(T, name, version)` triple.
    pub fn create_extension_version<T: ?Sized + InterfaceName>(
        &self,
        name: &str,
        version: u32,
    ) -> Option<Extension<T>> {
        let mut inner = self.lock();
        create_locked(&mut inner, &self.inner, T::NAME, name, version)
    }

    /// Creates an instance from a previously obtained descriptor. Refuses a
    /// descriptor whose interface differs from `T`'s canonical name.
    pub fn create_from_description<T: ?Sized + InterfaceName>(
        &self,
        description: &ExtensionDescription,
    ) -> Option<Extension<T>> {
        let mut inner = self.lock();
        if description.interface_name() != T::NAME {
            let err = ExtensionError::InterfaceMismatch {
                expected: T::NAME.to_string(),
                got: description.interface_name().to_string(),
            };
            inner.emit(&format!("create_extension: {err}"));
            return None;
        }
        create_locked(
            &mut inner,
            &self.inner,
            T::NAME,
            description.name(),
            description.version(),
        )
    }

    /// Toggles build-environment verification for subsequent scans.
    pub fn set_verify_compiler(&self, enable: bool) {
        self.lock().verify_compiler = enable;
    }

    pub fn verify_compiler(&self) -> bool {
        self.lock().verify_compiler
    }

    /// Replaces the diagnostic callback; `None` silences diagnostics. The
    /// default handler forwards to `tracing::warn!`.
    pub fn set_message_handler(&self, handler: Option<MessageHandler>) {
        self.lock().message_handler = handler;
    }

    /// Toggles verbose diagnostics on subsequent operations.
    pub fn set_enable_debug_output(&self, enable: bool) {
        self.lock().debug_output = enable;
    }

    pub fn debug_output(&self) -> bool {
        self.lock().debug_output
    }

    /// Toggles the advisory UPX-compression hint for files that yield no
    /// descriptors at all.
    pub fn set_check_for_upx_compression(&self, enable: bool) {
        self.lock().check_upx = enable;
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A strongly-owning handle to a constructed extension instance.
///
/// Dereferences to the interface `T`. Holds the producing library open for
/// as long as it lives; dropping the handle destroys the instance through
/// the library's own entry point and releases the library reference. The
/// handle stays fully usable after its registry is gone.
pub struct Extension<T: ?Sized> {
    /// Thin pointer to the `Box<T>` constructed inside the plugin.
    instance: *mut Box<T>,
    entry: RawEntryPoint,
    library: Arc<SharedLibrary>,
    registry: Weak<Mutex<Inner>>,
}

impl<T: ?Sized> Extension<T> {
    fn key(&self) -> usize {
        self.instance as usize
    }

    /// Path of the shared library keeping this instance's code mapped.
    pub fn library_filename(&self) -> &Path {
        self.library.filename()
    }
}

impl<T: ?Sized> Deref for Extension<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `instance` points at the Box constructed by the entry
        // point and stays valid until drop destroys it.
        unsafe { &**self.instance }
    }
}

impl<T: ?Sized> DerefMut for Extension<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in deref; the handle is the sole owner.
        unsafe { &mut **self.instance }
    }
}

impl<T: ?Sized> Drop for Extension<T> {
    fn drop(&mut self) {
        // SAFETY: mirror call of the constructing entry point; the library
        // is still mapped through `self.library`.
        unsafe {
            (self.entry)(self.instance as *mut c_void, ptr::null_mut());
        }
        // Registry bookkeeping only while the registry still exists; a
        // poisoned lock is recovered the same way the registry does.
        if let Some(registry) = self.registry.upgrade() {
            let mut inner = registry.lock().unwrap_or_else(|e| e.into_inner());
            inner.loaded.remove(&self.key());
        }
    }
}

// SAFETY: the handle owns the instance exclusively, the library stays
// mapped through the Arc, and the entry point is a plain fn pointer.
unsafe impl<T: ?Sized + Send> Send for Extension<T> {}
unsafe impl<T: ?Sized + Sync> Sync for Extension<T> {}

impl<T: ?Sized> std::fmt::Debug for Extension<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extension")
            .field("library", &self.library.filename())
            .finish_non_exhaustive()
    }
}

/// Resolves the path the registry keys an entry under: the canonical form
/// of the file, trying the bare name with the platform extension appended
/// when the name itself does not exist.
fn real_library_path(filename: &Path) -> Option<PathBuf> {
    if filename.exists() {
        return std::fs::canonicalize(filename).ok();
    }
    let with_extension = PathBuf::from(format!("{}{}", filename.display(), FILE_EXTENSION));
    if with_extension.exists() {
        return std::fs::canonicalize(with_extension).ok();
    }
    None
}

fn add_locked(inner: &mut Inner, filename: &Path, buffer: &mut Vec<u8>) -> usize {
    let display = filename.display().to_string();

    let Some(canonical) = real_library_path(filename) else {
        inner.emit(&format!(
            "add_dynamic_library: neither {display} nor {display}{FILE_EXTENSION} exist"
        ));
        return 0;
    };
    if canonical.is_dir() {
        inner.emit(&format!(
            "add_dynamic_library: doesn't support adding directories directory={display}"
        ));
        return 0;
    }
    let key = canonical.to_string_lossy().into_owned();

    // Don't rescan while instances still reference the mapped library;
    // replacing the descriptors under them would lie about what's loaded.
    if let Some(record) = inner.known.get(&key)
        && record.library.upgrade().is_some()
    {
        return 0;
    }

    let options = ScanOptions {
        verify_compiler: inner.verify_compiler,
        check_upx: inner.check_upx,
    };
    let result = {
        let handler = inner.message_handler.as_ref();
        let mut report = |msg: String| {
            if let Some(handler) = handler {
                handler(&msg);
            }
        };
        scanner::scan_library(&display, &key, buffer, &options, &mut report)
    };
    let descriptors = match result {
        Ok(descriptors) => descriptors,
        Err(err) => {
            inner.emit(&format!("add_dynamic_library: {display}: {err}"));
            return 0;
        }
    };
    if descriptors.is_empty() {
        return 0;
    }

    let count = descriptors.len();
    let sequence = inner.next_sequence;
    inner.next_sequence += 1;
    debug!(path = %key, count, "admitted extension descriptors");
    inner.known.insert(
        key,
        LibraryRecord {
            extensions: descriptors,
            library: Weak::new(),
            sequence,
        },
    );
    count
}

fn find_highest<'a>(
    inner: &'a Inner,
    interface: &str,
    name: &str,
) -> Option<&'a ExtensionDescription> {
    let mut best: Option<(&ExtensionDescription, u64)> = None;
    for record in inner.known.values() {
        for desc in &record.extensions {
            if desc.interface_name() != interface || desc.name() != name {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, sequence)) => {
                    desc.version() > current.version()
                        || (desc.version() == current.version() && record.sequence > sequence)
                }
            };
            if better {
                best = Some((desc, record.sequence));
            }
        }
    }
    best.map(|(desc, _)| desc)
}

fn find_exact<'a>(
    inner: &'a Inner,
    interface: &str,
    name: &str,
    version: u32,
) -> Option<&'a ExtensionDescription> {
    let mut best: Option<(&ExtensionDescription, u64)> = None;
    for record in inner.known.values() {
        for desc in &record.extensions {
            if desc.interface_name() == interface
                && desc.name() == name
                && desc.version() == version
            {
                let better = best.is_none_or(|(_, sequence)| record.sequence > sequence);
                if better {
                    best = Some((desc, record.sequence));
                }
            }
        }
    }
    best.map(|(desc, _)| desc)
}

fn create_locked<T: ?Sized>(
    inner: &mut Inner,
    registry: &Arc<Mutex<Inner>>,
    interface: &str,
    name: &str,
    version: u32,
) -> Option<Extension<T>> {
    // When several files provide the same triple, try the one added last
    // first; the rest remain fallbacks if it fails to load.
    let mut candidates: Vec<(String, u64)> = inner
        .known
        .iter()
        .filter(|(_, record)| {
            record.extensions.iter().any(|desc| {
                desc.interface_name() == interface
                    && desc.name() == name
                    && desc.version() == version
            })
        })
        .map(|(path, record)| (path.clone(), record.sequence))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in candidates {
        let upgraded = inner
            .known
            .get(&path)
            .and_then(|record| record.library.upgrade());
        let library = match upgraded {
            Some(library) => library,
            None => match SharedLibrary::open(Path::new(&path)) {
                Ok(library) => {
                    let library = Arc::new(library);
                    if let Some(record) = inner.known.get_mut(&path) {
                        record.library = Arc::downgrade(&library);
                    }
                    library
                }
                Err(err) => {
                    inner.emit(&format!("create_extension: {err}"));
                    continue;
                }
            },
        };

        let Some(desc) = inner.known.get(&path).and_then(|record| {
            record
                .extensions
                .iter()
                .find(|desc| {
                    desc.interface_name() == interface
                        && desc.name() == name
                        && desc.version() == version
                })
                .cloned()
        }) else {
            continue;
        };

        let Some(entry) = library.entry_point(desc.entry_point()) else {
            if inner.debug_output {
                inner.emit(&format!(
                    "create_extension: entry point {} not found in {path}",
                    desc.entry_point()
                ));
            }
            continue;
        };

        // SAFETY: the descriptor's interface name was matched against the
        // caller's requested interface, so per the factory ABI the entry
        // point constructs a `Box<T>` behind the returned pointer.
        let raw = unsafe { entry(ptr::null_mut(), ptr::null_mut()) };
        if raw.is_null() {
            continue;
        }
        let instance = raw as *mut Box<T>;

        debug!(path = %path, name, version, "created extension instance");
        inner.loaded.insert(instance as usize, desc);
        return Some(Extension {
            instance,
            entry,
            library,
            registry: Arc::downgrade(registry),
        });
    }
    None
}
