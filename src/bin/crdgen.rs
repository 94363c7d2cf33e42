//! # CRD Generator
//!
//! Prints the `RunOnceDurationOverride` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/runoncedurationoverride.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use run_once_duration_override_operator::crd::RunOnceDurationOverride;

fn main() {
    match serde_yaml::to_string(&RunOnceDurationOverride::crd()) {
        Ok(yaml) => print!("{yaml}"),
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
