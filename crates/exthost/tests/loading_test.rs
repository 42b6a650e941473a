//! End-to-end lifecycle tests against the demo extension libraries.
//!
//! The demo cdylibs are workspace members; running `cargo test` from the
//! workspace root builds them into the shared target directory before any
//! test executes. When a suite is run in isolation and the artifacts are
//! missing, these tests skip rather than fail.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use exthost::{ExtensionRegistry, FILE_EXTENSION};
use exthost_demo_api::{Calculator, Greeter};

/// Directory the demo cdylib artifacts land in (`target/<profile>`),
/// derived from the test executable's own location.
fn artifact_dir() -> Option<PathBuf> {
    let mut dir = std::env::current_exe().ok()?;
    dir.pop();
    if dir.ends_with("deps") {
        dir.pop();
    }
    Some(dir)
}

fn demo_prefix() -> &'static str {
    if cfg!(windows) {
        "exthost_demo"
    } else {
        "libexthost_demo"
    }
}

fn demo_library(stem: &str) -> Option<PathBuf> {
    let prefix = if cfg!(windows) { "" } else { "lib" };
    let path = artifact_dir()?.join(format!("{prefix}{stem}{FILE_EXTENSION}"));
    path.exists().then_some(path)
}

/// Both demo libraries, or `None` when they have not been built.
fn demo_libraries() -> Option<(PathBuf, PathBuf)> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let calc = demo_library("exthost_demo_calc");
    let greeter = demo_library("exthost_demo_greeter");
    match (calc, greeter) {
        (Some(calc), Some(greeter)) => Some((calc, greeter)),
        _ => {
            eprintln!("demo extension libraries not built, skipping");
            None
        }
    }
}

#[test]
fn test_discovers_demo_descriptors() {
    let Some(_) = demo_libraries() else { return };
    let registry = ExtensionRegistry::new();
    assert!(registry.verify_compiler());

    let admitted =
        registry.search_directory_with_prefix(artifact_dir().unwrap(), demo_prefix(), false);
    assert_eq!(admitted, 3);
    assert_eq!(registry.extensions().len(), 3);

    let calculators = registry.extensions_for::<dyn Calculator>(&[]);
    assert_eq!(calculators.len(), 2);
    assert!(
        calculators
            .iter()
            .all(|d| d.interface_name() == "Calculator")
    );

    let greeters = registry.extensions_for::<dyn Greeter>(&[]);
    assert_eq!(greeters.len(), 1);
}

#[test]
fn test_user_metadata_filter_on_real_libraries() {
    let Some(_) = demo_libraries() else { return };
    let registry = ExtensionRegistry::new();
    registry.search_directory_with_prefix(artifact_dir().unwrap(), demo_prefix(), false);

    let matched = registry.extensions_filtered(&[
        ("Test1", "desc1"),
        ("Test1", "desc2"),
        ("Test3", "desc3"),
    ]);
    // Calc v100 (Test1=desc2, Test3=desc3) and Greeter (Test1=desc1,
    // Test3=desc3); Calc v110 carries no Test3.
    assert_eq!(matched.len(), 2);
}

#[test]
fn test_create_resolves_highest_version() {
    let Some((calc, _)) = demo_libraries() else {
        return;
    };
    let registry = ExtensionRegistry::new();
    assert_eq!(registry.add_dynamic_library(&calc), 2);

    let desc = registry.find_description::<dyn Calculator>("Calc").unwrap();
    assert_eq!(desc.version(), 110);

    let latest = registry.create_extension::<dyn Calculator>("Calc").unwrap();
    assert_eq!(latest.value(), 21);

    let pinned = registry
        .create_extension_version::<dyn Calculator>("Calc", 100)
        .unwrap();
    assert_eq!(pinned.value(), 42);
}

#[test]
fn test_create_greeter_round_trip() {
    let Some((_, greeter)) = demo_libraries() else {
        return;
    };
    let registry = ExtensionRegistry::new();
    assert_eq!(registry.add_dynamic_library(&greeter), 1);

    let instance = registry.create_extension::<dyn Greeter>("Greeter").unwrap();
    assert_eq!(instance.greet(), "Hello from Greeter");

    let desc = registry.find_description_for(&instance).unwrap();
    assert_eq!(desc.name(), "Greeter");
    assert_eq!(desc.version(), 100);
    assert_eq!(
        desc.library_filename(),
        instance.library_filename().to_string_lossy()
    );
}

#[test]
fn test_create_from_description_checks_interface() {
    let Some((calc, _)) = demo_libraries() else {
        return;
    };
    let registry = ExtensionRegistry::new();
    registry.add_dynamic_library(&calc);

    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    registry.set_message_handler(Some(Box::new(move |msg| {
        sink.lock().unwrap().push(msg.to_string());
    })));

    let desc = registry
        .find_description_version::<dyn Calculator>("Calc", 100)
        .unwrap();

    // The right interface constructs.
    let instance = registry
        .create_from_description::<dyn Calculator>(&desc)
        .unwrap();
    assert_eq!(instance.value(), 42);

    // A mismatched interface is refused outright.
    assert!(
        registry
            .create_from_description::<dyn Greeter>(&desc)
            .is_none()
    );
    assert!(
        messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains("interface mismatch"))
    );
}

#[test]
fn test_add_is_noop_while_instances_are_live() {
    let Some((calc, _)) = demo_libraries() else {
        return;
    };
    let registry = ExtensionRegistry::new();
    assert_eq!(registry.add_dynamic_library(&calc), 2);

    let instance = registry.create_extension::<dyn Calculator>("Calc").unwrap();

    // The library is mapped, so a re-add must not replace the descriptors.
    assert_eq!(registry.add_dynamic_library(&calc), 0);

    drop(instance);

    // Last instance gone: the weak handle expired and a re-add rescans.
    assert_eq!(registry.add_dynamic_library(&calc), 2);
}

#[test]
fn test_instances_survive_library_removal() {
    let Some((calc, _)) = demo_libraries() else {
        return;
    };
    let registry = ExtensionRegistry::new();
    registry.add_dynamic_library(&calc);

    let instance = registry.create_extension::<dyn Calculator>("Calc").unwrap();
    registry.remove_dynamic_library(&calc);

    assert!(registry.extensions().is_empty());
    assert!(registry.create_extension::<dyn Calculator>("Calc").is_none());
    // The instance holds its own strong library reference.
    assert_eq!(instance.value(), 21);
}

#[test]
fn test_instances_survive_registry_drop() {
    let Some((calc, _)) = demo_libraries() else {
        return;
    };
    let registry = ExtensionRegistry::new();
    registry.add_dynamic_library(&calc);

    let instance = registry.create_extension::<dyn Calculator>("Calc").unwrap();
    drop(registry);

    assert_eq!(instance.value(), 21);
    // Dropping after the registry is gone must not touch freed state.
    drop(instance);
}

#[test]
fn test_instance_can_drop_on_another_thread() {
    let Some((calc, _)) = demo_libraries() else {
        return;
    };
    let registry = ExtensionRegistry::new();
    registry.add_dynamic_library(&calc);

    let instance = registry.create_extension::<dyn Calculator>("Calc").unwrap();
    std::thread::spawn(move || {
        assert_eq!(instance.value(), 21);
    })
    .join()
    .unwrap();
}

#[test]
fn test_two_instances_share_one_library() {
    let Some((calc, _)) = demo_libraries() else {
        return;
    };
    let registry = ExtensionRegistry::new();
    registry.add_dynamic_library(&calc);

    let first = registry.create_extension::<dyn Calculator>("Calc").unwrap();
    let second = registry
        .create_extension_version::<dyn Calculator>("Calc", 100)
        .unwrap();
    assert_eq!(first.library_filename(), second.library_filename());

    drop(first);
    // One instance still holds the library: add remains a no-op.
    assert_eq!(registry.add_dynamic_library(&calc), 0);
    drop(second);
    assert_eq!(registry.add_dynamic_library(&calc), 2);
}
