use std::env;
use std::fs;
use std::path::Path;

const SERVER_CFG_NAME: &str = "dyewars.toml";

fn main() {
    let source_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();

    let source_path = Path::new(&source_dir).join("config");

    // Navigate three levels up to the target directory so the default
    // config lands next to the built binary.
    let out_path = Path::new(&out_dir)
        .parent()
        .and_then(|pth| pth.parent())
        .and_then(|pth| pth.parent())
        .expect("Failed navigating to the target directory");

    fs::copy(
        source_path.join(SERVER_CFG_NAME),
        out_path.join(SERVER_CFG_NAME),
    )
    .unwrap_or_else(|err| panic!("Failed to copy {}: {}", SERVER_CFG_NAME, err));

    println!("cargo:rerun-if-changed=config/{}", SERVER_CFG_NAME);
}
