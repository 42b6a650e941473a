//! Demo extension library exporting two versions of the "Calc" extension
//! from a single file.

use exthost::export_extension;
use exthost_demo_api::Calculator;

#[derive(Default)]
struct StableCalc;

impl Calculator for StableCalc {
    fn value(&self) -> i32 {
        42
    }
}

export_extension! {
    interface: Calculator,
    implementation: StableCalc,
    name: "Calc",
    version: 100,
    description: "stable calculator used by the loading tests",
    entry: exthost_demo_calc_v100,
    metadata: [("Test1", "desc2"), ("Test3", "desc3")],
}

#[derive(Default)]
struct NextCalc;

impl Calculator for NextCalc {
    fn value(&self) -> i32 {
        21
    }
}

export_extension! {
    interface: Calculator,
    implementation: NextCalc,
    name: "Calc",
    version: 110,
    description: "next calculator used by the loading tests",
    entry: exthost_demo_calc_v110,
    metadata: [("Test1", "desc1")],
}
