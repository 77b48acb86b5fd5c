// Build script: weaves script/ into OUT_DIR/woven so src/lib.rs can include
// the generated sources.

use std::env;
use std::path::PathBuf;

use umbra_weaver::config::{ModuleConfig, WeaverConfig};
use umbra_weaver::{UmbraConfig, WeaveOptions};

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let script = manifest_dir.join("script");
    println!("cargo:rerun-if-changed={}", script.display());

    let config = UmbraConfig {
        weaver: WeaverConfig {
            manifest_dir: out_dir.join("manifests"),
            cache: out_dir.join("cache.json"),
            format: false,
        },
        modules: vec![ModuleConfig {
            name: "Fixture".to_string(),
            source: script,
            output: out_dir.join("woven"),
            package: None,
            dependencies: Vec::new(),
        }],
        externals: Vec::new(),
    };
    let options = WeaveOptions {
        only: None,
        force: true,
    };
    if let Err(e) = umbra_weaver::weave(&config, &options).and_then(|report| report.into_result()) {
        panic!("Failed to weave {}: {e}", config.modules[0].source.display());
    }
}
