//! Mapping from property keys to candidate files.

use crate::config::MonitorConfig;
use crate::types::Locations;
use std::path::{Component, Path, PathBuf};

/// Looks up where a key's value lives.
pub trait LocationResolver: Send + Sync + 'static {
    /// Candidate files for `key`. Empty when the key is unknown.
    fn locations(&self, key: &str) -> Locations;
}

/// Resolver for the `<root>/namespaces/<Namespace>/<Property>` layout.
///
/// Key `Battery.ChargePercentage` maps to
/// `<root>/namespaces/Battery/ChargePercentage` under each root.
#[derive(Clone, Debug)]
pub struct StateDirResolver {
    user_root: Option<PathBuf>,
    system_root: PathBuf,
}

impl StateDirResolver {
    pub fn new(user_root: Option<PathBuf>, system_root: impl Into<PathBuf>) -> Self {
        Self {
            user_root,
            system_root: system_root.into(),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.user_root.clone(), config.system_root.clone())
    }

    /// Relative path for a key, or None if the key cannot name a property.
    fn relative_path(key: &str) -> Option<PathBuf> {
        let (namespace, property) = key.split_once('.')?;
        if namespace.is_empty() || property.is_empty() {
            return None;
        }
        let rel = Path::new("namespaces").join(namespace).join(property);
        // Only plain names below the root
        let plain = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain || rel.components().count() != 3 {
            return None;
        }
        Some(rel)
    }
}

impl LocationResolver for StateDirResolver {
    fn locations(&self, key: &str) -> Locations {
        let Some(rel) = Self::relative_path(key) else {
            return Locations::default();
        };
        Locations::new(
            self.user_root.as_ref().map(|root| root.join(&rel)),
            Some(self.system_root.join(&rel)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_layout() {
        let resolver = StateDirResolver::new(Some("/run/user/1000/state".into()), "/run/state");
        let locs = resolver.locations("Battery.ChargePercentage");
        assert_eq!(
            locs.user,
            Some(PathBuf::from(
                "/run/user/1000/state/namespaces/Battery/ChargePercentage"
            ))
        );
        assert_eq!(
            locs.system,
            Some(PathBuf::from("/run/state/namespaces/Battery/ChargePercentage"))
        );
    }

    #[test]
    fn test_property_part_may_contain_dots() {
        let resolver = StateDirResolver::new(None, "/s");
        let locs = resolver.locations("Internet.Network.Name");
        assert_eq!(locs.user, None);
        assert_eq!(
            locs.system,
            Some(PathBuf::from("/s/namespaces/Internet/Network.Name"))
        );
    }

    #[test]
    fn test_unknown_keys() {
        let resolver = StateDirResolver::new(None, "/s");
        for key in ["", "NoNamespace", ".Empty", "Empty.", "A./etc", "../x.y", "A.b/c"] {
            assert!(resolver.locations(key).is_empty(), "key {:?}", key);
        }
    }
}
