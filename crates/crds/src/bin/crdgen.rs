//! Prints the CAPDO CRDs as multi-document YAML
//!
//! `cargo run -p crds --bin crdgen > config/crd/bases.yaml`

use crds::{DOCluster, DOMachine};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [DOCluster::crd(), DOMachine::crd()];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
