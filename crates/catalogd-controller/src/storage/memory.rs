//! In-memory stores backed by `DashMap`

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AddonStorage, ChartStorage, StorageError};
use crate::catalog::{AddonPackage, Chart};
use crate::Scope;

type Key = (Scope, String, String);

fn key(scope: &Scope, name: &str, version: &str) -> Key {
    (scope.clone(), name.to_string(), version.to_string())
}

/// Addon store kept in process memory
#[derive(Default)]
pub struct InMemoryAddonStorage {
    addons: DashMap<Key, AddonPackage>,
}

impl InMemoryAddonStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AddonStorage for InMemoryAddonStorage {
    async fn upsert(&self, scope: &Scope, addon: AddonPackage) -> Result<bool, StorageError> {
        let key = key(scope, &addon.name, &addon.version);
        Ok(self.addons.insert(key, addon).is_some())
    }

    async fn get(
        &self,
        scope: &Scope,
        name: &str,
        version: &str,
    ) -> Result<AddonPackage, StorageError> {
        self.addons
            .get(&key(scope, name, version))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::not_found("addon", scope, name, version))
    }

    async fn remove(&self, scope: &Scope, name: &str, version: &str) -> Result<(), StorageError> {
        self.addons
            .remove(&key(scope, name, version))
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("addon", scope, name, version))
    }

    async fn find_all(&self, scope: &Scope) -> Result<Vec<AddonPackage>, StorageError> {
        let mut addons: Vec<AddonPackage> = self
            .addons
            .iter()
            .filter(|entry| &entry.key().0 == scope)
            .map(|entry| entry.value().clone())
            .collect();
        addons.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        Ok(addons)
    }
}

/// Chart store kept in process memory
#[derive(Default)]
pub struct InMemoryChartStorage {
    charts: DashMap<Key, Chart>,
}

impl InMemoryChartStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, scope: &Scope, name: &str, version: &str) -> bool {
        self.charts.contains_key(&key(scope, name, version))
    }
}

#[async_trait]
impl ChartStorage for InMemoryChartStorage {
    async fn upsert(&self, scope: &Scope, chart: Chart) -> Result<bool, StorageError> {
        let key = key(scope, &chart.name, &chart.version);
        Ok(self.charts.insert(key, chart).is_some())
    }

    async fn remove(&self, scope: &Scope, name: &str, version: &str) -> Result<(), StorageError> {
        self.charts
            .remove(&key(scope, name, version))
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("chart", scope, name, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addon(name: &str, version: &str, id: &str) -> AddonPackage {
        AddonPackage {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_reports_existing_key_and_keeps_identical_content() {
        let storage = InMemoryAddonStorage::new();
        let scope = Scope::namespace("stage");

        assert!(!storage.upsert(&scope, addon("redis", "0.0.1", "aaa")).await.unwrap());
        assert!(storage.upsert(&scope, addon("redis", "0.0.1", "aaa")).await.unwrap());

        let stored = storage.get(&scope, "redis", "0.0.1").await.unwrap();
        assert_eq!(stored, addon("redis", "0.0.1", "aaa"));
        assert_eq!(storage.find_all(&scope).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let storage = InMemoryAddonStorage::new();
        storage
            .upsert(&Scope::namespace("a"), addon("redis", "0.0.1", "aaa"))
            .await
            .unwrap();

        assert!(storage
            .get(&Scope::namespace("b"), "redis", "0.0.1")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(storage.find_all(&Scope::Cluster).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_missing_addon_is_not_found() {
        let storage = InMemoryAddonStorage::new();
        let err = storage
            .remove(&Scope::Cluster, "redis", "0.0.1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("redis:0.0.1"));
    }

    #[tokio::test]
    async fn find_all_is_sorted() {
        let storage = InMemoryAddonStorage::new();
        let scope = Scope::Cluster;
        for (name, version) in [("testing", "0.0.1"), ("redis", "0.0.2"), ("redis", "0.0.1")] {
            storage
                .upsert(&scope, addon(name, version, name))
                .await
                .unwrap();
        }
        let keys: Vec<_> = storage
            .find_all(&scope)
            .await
            .unwrap()
            .iter()
            .map(AddonPackage::key)
            .collect();
        assert_eq!(keys, vec!["redis:0.0.1", "redis:0.0.2", "testing:0.0.1"]);
    }

    #[tokio::test]
    async fn chart_upsert_and_remove() {
        let charts = InMemoryChartStorage::new();
        let scope = Scope::namespace("stage");
        let chart = Chart {
            name: "redis".to_string(),
            version: "0.0.1".to_string(),
            content: "opaque".to_string(),
        };
        assert!(!charts.upsert(&scope, chart.clone()).await.unwrap());
        assert!(charts.upsert(&scope, chart).await.unwrap());
        assert!(charts.contains(&scope, "redis", "0.0.1"));

        charts.remove(&scope, "redis", "0.0.1").await.unwrap();
        assert!(!charts.contains(&scope, "redis", "0.0.1"));
    }
}
