use anyhow::Result;
use kube::CustomResourceExt;

use kube_sentry::crd::{HostSecurityPolicy, SecurityPolicy};

/// Print both CRDs' YAML to stdout for `kubectl apply -f`.
pub fn generate() -> Result<()> {
    let workload_crd = SecurityPolicy::crd();
    let host_crd = HostSecurityPolicy::crd();
    println!("{}", serde_yaml::to_string(&workload_crd)?);
    println!("---");
    println!("{}", serde_yaml::to_string(&host_crd)?);
    Ok(())
}

/// Apply both CRDs directly to the connected cluster.
pub async fn install() -> Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::{Api, Client};

    let client = Client::try_default().await?;
    let crds: Api<CustomResourceDefinition> = Api::all(client);

    for crd in [SecurityPolicy::crd(), HostSecurityPolicy::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        match crds.create(&Default::default(), &crd).await {
            Ok(_) => println!("CRD '{name}' installed successfully"),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                println!("CRD '{name}' already exists, skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
