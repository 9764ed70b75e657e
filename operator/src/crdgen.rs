use kube::CustomResourceExt;

use vegeta_operator::vegeta::Vegeta;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Vegeta::crd())?);
    Ok(())
}
