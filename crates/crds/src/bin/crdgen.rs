//! Prints the CRD manifests for every managed kind as a multi-document YAML
//! stream, suitable for `kubectl apply -f -`.

fn main() -> anyhow::Result<()> {
    for crd in crds::all_crds() {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
