//! Dynamic extension loading for Rust hosts.
//!
//! Extensions are shared libraries (`.so`/`.dylib`/`.dll`) that describe
//! themselves through a metadata blob embedded in the binary, so they can
//! be discovered and queried without executing any of their code. On
//! demand, the registry loads a library, constructs an instance behind the
//! requested interface trait, and unloads the library again once the last
//! instance is gone.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  ExtensionRegistry                   │
//! │  - canonical path → descriptors                      │
//! │  - discovery (directory scan, byte-level metadata)   │
//! │  - filtered queries                                  │
//! │  - lazy load / create / refcounted unload            │
//! └──────────────────────────────────────────────────────┘
//!        │                │                  │
//!        ▼                ▼                  ▼
//!   scanner          SharedLibrary      Extension<T>
//!   (mmap + memmem)  (dlopen wrapper)   (owning handle)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use exthost::ExtensionRegistry;
//!
//! pub trait Calculator: Send {
//!     fn value(&self) -> i32;
//! }
//! exthost::declare_interface!(Calculator);
//!
//! let registry = ExtensionRegistry::new();
//! registry.search_directory("plugins", true);
//!
//! for desc in registry.extensions_for::<dyn Calculator>(&[]) {
//!     println!("{desc}");
//! }
//!
//! // Instances may outlive the registry; the producing library stays
//! // loaded until the last one is dropped.
//! if let Some(calc) = registry.create_extension::<dyn Calculator>("Calc") {
//!     println!("{}", calc.value());
//! }
//! ```
//!
//! The authoring side lives in cdylib crates and uses
//! [`export_extension!`] to embed the metadata blob and export the C-ABI
//! factory symbol; see the demo crates next to this one.

pub mod abi;
mod description;
mod error;
mod library;
mod macros;
mod registry;
mod scanner;

pub use description::{ExtensionDescription, keys};
pub use error::{ExtensionError, Result};
pub use library::{FILE_EXTENSION, SharedLibrary};
pub use registry::{Extension, ExtensionRegistry, InterfaceName, MessageHandler};
