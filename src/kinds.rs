use std::fmt;

use kube::Resource;

use crate::cluster::ServerVersion;

/// A group, version, and kind triple. The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Splits an `apiVersion` string such as `apps/v1` or `v1`.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self::new(&K::group(&()), &K::version(&()), &K::kind(&()))
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Maps apiVersions that were renamed across Kubernetes releases onto
    /// the group the kind is served from today.
    pub fn canonical(&self) -> Gvk {
        let api_version = self.api_version();
        let canonical = match (self.kind.as_str(), api_version.as_str()) {
            (
                "Deployment" | "DaemonSet" | "ReplicaSet",
                "extensions/v1beta1" | "apps/v1beta1" | "apps/v1beta2",
            ) => "apps/v1",
            ("StatefulSet", "apps/v1beta1" | "apps/v1beta2") => "apps/v1",
            ("Ingress", "extensions/v1beta1" | "networking.k8s.io/v1beta1") => {
                "networking.k8s.io/v1"
            }
            _ => return self.clone(),
        };
        Gvk::from_api_version(canonical, &self.kind)
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Whether `gvk` has a newer replacement.
pub fn deprecated_api_version(gvk: &Gvk) -> bool {
    suggested_api_version(gvk) != gvk.to_string()
}

/// The `apiVersion/Kind` a user should switch to, or `gvk` itself when it is
/// already current.
pub fn suggested_api_version(gvk: &Gvk) -> String {
    let kind = gvk.kind.as_str();
    let replacement = match gvk.api_version().as_str() {
        "admissionregistration.k8s.io/v1beta1" => "admissionregistration.k8s.io/v1",
        "apiextensions.k8s.io/v1beta1" => "apiextensions.k8s.io/v1",
        "apiregistration.k8s.io/v1beta1" => "apiregistration.k8s.io/v1",
        "apps/v1beta1" | "apps/v1beta2" => "apps/v1",
        "authentication.k8s.io/v1beta1" => "authentication.k8s.io/v1",
        "authorization.k8s.io/v1beta1" => "authorization.k8s.io/v1",
        "autoscaling/v2beta1" => "autoscaling/v1",
        "coordination.k8s.io/v1beta1" => "coordination.k8s.io/v1",
        "extensions/v1beta1" => match kind {
            "DaemonSet" | "Deployment" | "ReplicaSet" => "apps/v1",
            "Ingress" => "networking.k8s.io/v1",
            "NetworkPolicy" => "networking.k8s.io/v1",
            "PodSecurityPolicy" => "policy/v1beta1",
            _ => return gvk.to_string(),
        },
        "networking.k8s.io/v1beta1" if kind == "Ingress" => "networking.k8s.io/v1",
        "rbac.authorization.k8s.io/v1alpha1" | "rbac.authorization.k8s.io/v1beta1" => {
            "rbac.authorization.k8s.io/v1"
        }
        "scheduling.k8s.io/v1alpha1" | "scheduling.k8s.io/v1beta1" => "scheduling.k8s.io/v1",
        "storage.k8s.io/v1alpha1" | "storage.k8s.io/v1beta1" => "storage.k8s.io/v1",
        _ => return gvk.to_string(),
    };
    format!("{}/{}", replacement, kind)
}

/// The Kubernetes release which stopped serving `gvk`, if any.
pub fn removed_in_version(gvk: &Gvk) -> Option<ServerVersion> {
    let (major, minor) = match gvk.api_version().as_str() {
        "admissionregistration.k8s.io/v1beta1" | "apiextensions.k8s.io/v1beta1" => (1, 19),
        "authentication.k8s.io/v1beta1"
        | "authorization.k8s.io/v1beta1"
        | "coordination.k8s.io/v1beta1" => (1, 22),
        "extensions/v1beta1" | "apps/v1beta1" | "apps/v1beta2" => {
            if gvk.kind == "Ingress" {
                (1, 20)
            } else {
                (1, 16)
            }
        }
        "networking.k8s.io/v1beta1" if gvk.kind == "Ingress" => (1, 22),
        "rbac.authorization.k8s.io/v1alpha1" | "rbac.authorization.k8s.io/v1beta1" => (1, 22),
        "scheduling.k8s.io/v1alpha1" | "scheduling.k8s.io/v1beta1" => (1, 17),
        _ => return None,
    };
    Some(ServerVersion::new(major, minor, 0))
}

/// Whether `gvk` is no longer served by a cluster running `version`, along
/// with the release that removed it.
pub fn removed_api_version(
    gvk: &Gvk,
    version: &ServerVersion,
) -> (bool, Option<ServerVersion>) {
    match removed_in_version(gvk) {
        Some(removed_in) => (version >= &removed_in, Some(removed_in)),
        None => (false, None),
    }
}

pub(crate) fn upstream_docs_link(version: &ServerVersion) -> Option<&'static str> {
    match (version.major, version.minor) {
        (1, 16) => Some(
            "https://git.k8s.io/kubernetes/CHANGELOG/CHANGELOG-1.16.md#deprecations-and-removals",
        ),
        (1, 17) => Some(
            "https://git.k8s.io/kubernetes/CHANGELOG/CHANGELOG-1.17.md#deprecations-and-removals",
        ),
        (1, 19) => Some("https://git.k8s.io/kubernetes/CHANGELOG/CHANGELOG-1.19.md#deprecation-1"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Pod;

    use super::*;

    #[test]
    fn typed_gvk() {
        assert_eq!(Gvk::of::<Deployment>().to_string(), "apps/v1/Deployment");
        assert_eq!(Gvk::of::<Pod>().to_string(), "v1/Pod");
        assert_eq!(Gvk::of::<Pod>().api_version(), "v1");
    }

    #[test]
    fn canonicalizes_renamed_groups() {
        for api_version in ["extensions/v1beta1", "apps/v1beta1", "apps/v1beta2", "apps/v1"] {
            assert_eq!(
                Gvk::from_api_version(api_version, "Deployment").canonical(),
                Gvk::new("apps", "v1", "Deployment")
            );
        }
        assert_eq!(
            Gvk::from_api_version("extensions/v1beta1", "Ingress").canonical(),
            Gvk::new("networking.k8s.io", "v1", "Ingress")
        );
        assert_eq!(
            Gvk::from_api_version("batch/v1", "Job").canonical(),
            Gvk::new("batch", "v1", "Job")
        );
    }

    #[test]
    fn suggestions_and_removals() {
        let old = Gvk::new("extensions", "v1beta1", "Deployment");
        assert!(deprecated_api_version(&old));
        assert_eq!(suggested_api_version(&old), "apps/v1/Deployment");
        assert!(!deprecated_api_version(&Gvk::new("apps", "v1", "Deployment")));

        assert_eq!(
            removed_api_version(&old, &ServerVersion::new(1, 15, 3)),
            (false, Some(ServerVersion::new(1, 16, 0)))
        );
        assert!(removed_api_version(&old, &ServerVersion::new(1, 16, 0)).0);
        assert_eq!(
            removed_in_version(&Gvk::new("extensions", "v1beta1", "Ingress")),
            Some(ServerVersion::new(1, 20, 0))
        );
        assert_eq!(removed_in_version(&Gvk::new("", "v1", "Pod")), None);
    }
}
