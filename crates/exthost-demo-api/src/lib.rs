//! Interfaces implemented by the demo extensions.
//!
//! Hosts and extensions must share these trait definitions; the canonical
//! names declared here are what descriptors carry in `interface_name`.

use exthost::declare_interface;

/// A calculator extension produces a single number.
pub trait Calculator: Send {
    fn value(&self) -> i32;
}
declare_interface!(Calculator);

/// A greeter extension produces a message.
pub trait Greeter: Send {
    fn greet(&self) -> String;
}
declare_interface!(Greeter);
