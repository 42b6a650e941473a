//! Authoring-side macros: declare an interface's canonical name and export
//! an extension from a cdylib crate.

/// Gives a plugin interface its canonical string name by implementing
/// [`InterfaceName`](crate::InterfaceName) for the trait object.
///
/// With one argument the trait's (fully qualified) textual name is used:
///
/// ```rust,ignore
/// pub trait Calculator: Send {
///     fn value(&self) -> i32;
/// }
/// declare_interface!(Calculator);
/// ```
#[macro_export]
macro_rules! declare_interface {
    ($iface:path) => {
        $crate::declare_interface!($iface, ::core::stringify!($iface));
    };
    ($iface:path, $name:expr) => {
        impl $crate::InterfaceName for dyn $iface {
            const NAME: &'static str = $name;
        }
    };
}

/// Exports one extension from a cdylib crate.
///
/// Defines the C-ABI entry point `entry` together with the embedded
/// metadata blob the registry scans for. The entry point constructs a
/// boxed `implementation` (which must be `Default`) when called with a
/// null instance, exposes the metadata blob through the second argument
/// when one is requested, and destroys a previously constructed instance
/// when called with one.
///
/// ```rust,ignore
/// export_extension! {
///     interface: Calculator,
///     implementation: FixedCalc,
///     name: "Calc",
///     version: 100,
///     description: "answers with a constant",
///     entry: calc_v100_entry,
///     metadata: [("author", "example")],
/// }
/// ```
///
/// A crate may invoke this macro any number of times; each invocation adds
/// one descriptor to the produced library.
#[macro_export]
macro_rules! export_extension {
    (
        interface: $iface:path,
        implementation: $impl:ty,
        name: $name:literal,
        version: $version:literal,
        description: $description:literal,
        entry: $entry:ident
        $(, metadata: [ $( ($meta_key:literal, $meta_value:literal) ),* $(,)? ])?
        $(,)?
    ) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $entry(
            instance: *mut ::std::os::raw::c_void,
            metadata: *mut *const ::std::os::raw::c_char,
        ) -> *mut ::std::os::raw::c_void {
            const PARTS: &[&[u8]] = &[
                $crate::abi::MARKER_STEM.as_bytes(),
                $crate::abi::MARKER_START_SUFFIX.as_bytes(),
                b"=",
                $crate::abi::API_VERSION_STR.as_bytes(),
                b"\0compiler=",
                $crate::abi::COMPILER.as_bytes(),
                b"\0compiler_version=",
                $crate::abi::COMPILER_VERSION.as_bytes(),
                b"\0build_type=",
                $crate::abi::BUILD_TYPE.as_bytes(),
                b"\0interface_name=",
                <dyn $iface as $crate::InterfaceName>::NAME.as_bytes(),
                b"\0name=",
                $name.as_bytes(),
                b"\0version=",
                ::core::stringify!($version).as_bytes(),
                b"\0description=",
                $description.as_bytes(),
                b"\0entry_point=",
                ::core::stringify!($entry).as_bytes(),
                b"\0",
                $($(
                    $meta_key.as_bytes(),
                    b"=",
                    $meta_value.as_bytes(),
                    b"\0",
                )*)?
                $crate::abi::MARKER_STEM.as_bytes(),
                $crate::abi::MARKER_END_SUFFIX.as_bytes(),
            ];
            #[used]
            static DESCRIPTOR_BLOB: [u8; $crate::abi::blob_len(PARTS)] =
                $crate::abi::build_blob::<{ $crate::abi::blob_len(PARTS) }>(PARTS);

            if !instance.is_null() {
                // Destroy mode: the instance returns to the allocator that
                // produced it.
                drop(unsafe {
                    ::std::boxed::Box::from_raw(
                        instance as *mut ::std::boxed::Box<dyn $iface>,
                    )
                });
                return ::std::ptr::null_mut();
            }

            if !metadata.is_null() {
                unsafe {
                    *metadata = DESCRIPTOR_BLOB.as_ptr() as *const ::std::os::raw::c_char;
                }
            }

            let created: ::std::boxed::Box<dyn $iface> =
                ::std::boxed::Box::new(<$impl as ::std::default::Default>::default());
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(created))
                as *mut ::std::os::raw::c_void
        }
    };
}
