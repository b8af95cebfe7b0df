//! Prints the BasicAuthenticator CRD manifest to stdout.
//!
//! Usage: `cargo run --bin crdgen > deploy/crd.yaml`

use basicauth_operator::crd::BasicAuthenticator;
use kube::CustomResourceExt;

fn main() {
    match serde_yaml::to_string(&BasicAuthenticator::crd()) {
        Ok(manifest) => print!("{manifest}"),
        Err(e) => {
            eprintln!("failed to render CRD: {e}");
            std::process::exit(1);
        }
    }
}
