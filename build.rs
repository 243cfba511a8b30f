use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Copy the linker fragments to the build output directory so the linker
    // can find them. `device.x` names the default handler for every device
    // interrupt; cortex-m-rt includes it when built with its `device`
    // feature.
    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());
    for file in ["memory.x", "device.x"] {
        fs::copy(file, out.join(file)).unwrap();
        println!("cargo:rerun-if-changed={file}");
    }
    println!("cargo:rustc-link-search={}", out.display());

    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    if env::var_os("CARGO_FEATURE_DEFMT").is_some() {
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }
}
