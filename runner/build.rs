use std::env;
use std::fs;
use std::path::PathBuf;

// Settings and logger config travel next to the produced binary.
const CONFIG_FILES: &[&str] = &["umirs.toml", "umirs.log.toml"];

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    // OUT_DIR sits three levels below the target directory.
    let target_dir = out_dir
        .ancestors()
        .nth(3)
        .expect("Failed navigating to the target directory");

    let config_dir = manifest_dir.join("config");

    for name in CONFIG_FILES {
        fs::copy(config_dir.join(name), target_dir.join(name))
            .unwrap_or_else(|error| panic!("Failed to copy {}: {}", name, error));
    }
}
