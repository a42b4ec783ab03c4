use glance_api::api::v1beta1::glanceapi::GlanceAPI;
use kube::CustomResourceExt as _;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&GlanceAPI::crd())?);
    Ok(())
}
