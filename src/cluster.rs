//! Cluster-side artifacts as seen by the retention manager.

use jobkit::Kubectl;
use ledger::{Artifact, ArtifactKind, ArtifactStore, Environment};

/// ConfigMaps (snapshots) and Jobs (execution units) created by mqdeploy
pub struct KubeArtifacts {
    kubectl: Kubectl,
}

impl KubeArtifacts {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    fn resource(kind: ArtifactKind) -> ledger::Result<&'static str> {
        match kind {
            ArtifactKind::Snapshot => Ok("configmap"),
            ArtifactKind::Unit => Ok("job"),
            ArtifactKind::Record => Err(ledger::Error::Backend(
                "audit records are not stored in the cluster".to_string(),
            )),
        }
    }
}

fn backend(e: jobkit::Error) -> ledger::Error {
    ledger::Error::Backend(e.to_string())
}

impl ArtifactStore for KubeArtifacts {
    fn list(&self, environment: Environment, kind: ArtifactKind) -> ledger::Result<Vec<Artifact>> {
        let resource = Self::resource(kind)?;
        let objects = self
            .kubectl
            .list_managed(resource, environment.as_str())
            .map_err(backend)?;

        Ok(objects
            .into_iter()
            .map(|o| Artifact {
                name: o.name,
                kind,
                environment,
                created_at: o.created_at,
            })
            .collect())
    }

    fn delete(&self, artifact: &Artifact) -> ledger::Result<()> {
        let resource = Self::resource(artifact.kind)?;
        self.kubectl
            .delete(resource, &artifact.name)
            .map_err(backend)
    }
}
