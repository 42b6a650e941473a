//! Demo extension library implementing the Greeter interface.

use exthost::export_extension;
use exthost_demo_api::Greeter;

#[derive(Default)]
struct FriendlyGreeter;

impl Greeter for FriendlyGreeter {
    fn greet(&self) -> String {
        "Hello from Greeter".to_string()
    }
}

export_extension! {
    interface: Greeter,
    implementation: FriendlyGreeter,
    name: "Greeter",
    version: 100,
    description: "greeter used by the loading tests",
    entry: exthost_demo_greeter_v100,
    metadata: [("Test1", "desc1"), ("Test2", "desc2"), ("Test3", "desc3")],
}
