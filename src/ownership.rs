use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

use crate::kinds::Gvk;

/// Identifies a controller object for the purpose of matching the objects it
/// owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
    pub gvk: Gvk,
    /// For owners whose children are scoped to a single generation, the
    /// generation children must carry to be considered current.
    pub generation: Option<i64>,
}

impl ResourceId {
    pub fn new(namespace: &str, name: &str, gvk: Gvk) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            gvk,
            generation: None,
        }
    }

    pub fn from_resource<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        let meta = obj.meta();
        Self::new(
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default(),
            Gvk::of::<K>(),
        )
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }
}

/// Whether any owner reference on `meta` points at `owner`, comparing
/// apiVersions after canonicalization.
pub fn is_owned_by(meta: &ObjectMeta, owner: &ResourceId) -> bool {
    let want = owner.gvk.canonical();
    meta.owner_references
        .iter()
        .flatten()
        .any(|reference| {
            reference.name == owner.name
                && Gvk::from_api_version(&reference.api_version, &reference.kind).canonical()
                    == want
        })
}

/// Whether `meta` belongs to `owner`: same namespace, same generation for
/// generation-scoped owners, and an owner reference matching `owner`.
///
/// Dependents that do not record a generation are not excluded by it.
pub fn related_resource(owner: &ResourceId, meta: &ObjectMeta) -> bool {
    if meta.namespace.as_deref().unwrap_or_default() != owner.namespace {
        return false;
    }
    if let (Some(want), Some(have)) = (owner.generation, meta.generation) {
        if want != have {
            return false;
        }
    }
    is_owned_by(meta, owner)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Pod;
    use serde_json::json;

    use super::*;

    fn pod(namespace: &str, generation: i64, api_version: &str, kind: &str, owner: &str) -> Pod {
        serde_json::from_value(json!({
            "metadata": {
                "name": "p",
                "namespace": namespace,
                "generation": generation,
                "ownerReferences": [{
                    "apiVersion": api_version,
                    "kind": kind,
                    "name": owner,
                    "uid": "u",
                }],
            },
        }))
        .unwrap()
    }

    #[test]
    fn matches_across_api_group_aliases() {
        let owner = ResourceId::new("default", "foo", Gvk::new("apps", "v1", "Deployment"));
        let p = pod("default", 0, "extensions/v1beta1", "Deployment", "foo");
        assert!(is_owned_by(&p.metadata, &owner));
        assert!(related_resource(&owner, &p.metadata));

        let legacy = ResourceId::new(
            "default",
            "foo",
            Gvk::new("extensions", "v1beta1", "Deployment"),
        );
        let p = pod("default", 0, "apps/v1", "Deployment", "foo");
        assert!(related_resource(&legacy, &p.metadata));
    }

    #[test]
    fn requires_namespace_name_and_kind() {
        let owner = ResourceId::new("default", "foo", Gvk::new("batch", "v1", "Job"));
        assert!(!related_resource(&owner, &pod("other", 0, "batch/v1", "Job", "foo").metadata));
        assert!(!related_resource(&owner, &pod("default", 0, "batch/v1", "Job", "bar").metadata));
        assert!(!related_resource(
            &owner,
            &pod("default", 0, "apps/v1", "ReplicaSet", "foo").metadata
        ));
    }

    #[test]
    fn generation_scoped_owner() {
        let owner =
            ResourceId::new("default", "foo", Gvk::new("batch", "v1", "Job")).with_generation(2);
        assert!(related_resource(&owner, &pod("default", 2, "batch/v1", "Job", "foo").metadata));
        assert!(!related_resource(&owner, &pod("default", 1, "batch/v1", "Job", "foo").metadata));

        let mut untracked = pod("default", 0, "batch/v1", "Job", "foo");
        untracked.metadata.generation = None;
        assert!(related_resource(&owner, &untracked.metadata));
    }
}
