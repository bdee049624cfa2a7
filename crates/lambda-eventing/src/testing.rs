//! In-memory cluster for topology tests
//!
//! Behaves like the API server for the calls [`ClusterApi`] makes: creates
//! race into AlreadyExists, replaces need the live resourceVersion, and list
//! of an uninstalled kind returns 404. Every call is counted.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::discovery::ApiResource;

use crate::client::{ClusterApi, CreateOutcome};
use crate::document::Document;
use crate::error::{api_error, EventingError};
use crate::resource::ResourceKind;

type Key = (String, String, String);

/// Per-verb call counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Calls {
    pub gets: usize,
    pub creates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub lists: usize,
    /// Creates per kind, including ones that hit AlreadyExists
    pub creates_by_kind: BTreeMap<String, usize>,
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    objects: Mutex<BTreeMap<Key, Document>>,
    uninstalled: Mutex<HashSet<String>>,
    calls: Mutex<Calls>,
    versions: AtomicU64,
}

fn key(kind: &str, namespace: &str, name: &str) -> Key {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

fn selector_matches(document: &Document, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => document.label(k) == Some(v),
            None => false,
        })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make list and create of `kind` fail as if its CRD were missing
    pub fn uninstall(&self, kind: ResourceKind) {
        self.uninstalled
            .lock()
            .unwrap()
            .insert(kind.kind().to_string());
    }

    /// Seed an object without counting a call
    pub fn seed(&self, document: Document) {
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let mut document = document;
        document.set_resource_version(Some(version.to_string()));
        self.objects.lock().unwrap().insert(
            key(document.kind(), document.namespace(), document.name()),
            document,
        );
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        *self.calls.lock().unwrap() = Calls::default();
    }

    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<Document> {
        self.objects
            .lock()
            .unwrap()
            .get(&key(kind, namespace, name))
            .cloned()
    }

    /// Names of every stored object of `kind` in `namespace`
    pub fn names(&self, kind: &str, namespace: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, ns, _)| k == kind && ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Count of stored objects of `kind` across all namespaces
    pub fn count(&self, kind: &str) -> usize {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _, _)| k == kind)
            .count()
    }

    fn is_uninstalled(&self, kind: &str) -> bool {
        self.uninstalled.lock().unwrap().contains(kind)
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Document>, EventingError> {
        self.calls.lock().unwrap().gets += 1;
        tokio::task::yield_now().await;
        Ok(self.object(&api_resource.kind, namespace, name))
    }

    async fn create(&self, document: &Document) -> Result<CreateOutcome, EventingError> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.creates += 1;
            *calls
                .creates_by_kind
                .entry(document.kind().to_string())
                .or_default() += 1;
        }
        tokio::task::yield_now().await;

        if self.is_uninstalled(document.kind()) {
            return Err(EventingError::apply(
                document.kind(),
                document.name(),
                document.namespace(),
                api_error(404, "NotFound"),
            ));
        }

        let k = key(document.kind(), document.namespace(), document.name());
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&k) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = document.clone();
        stored.set_resource_version(Some(version.to_string()));
        objects.insert(k, stored);
        Ok(CreateOutcome::Created)
    }

    async fn replace(&self, document: &Document) -> Result<(), EventingError> {
        self.calls.lock().unwrap().replaces += 1;
        let k = key(document.kind(), document.namespace(), document.name());
        let mut objects = self.objects.lock().unwrap();
        let conflict = |code: u16, reason: &str| {
            EventingError::apply(
                document.kind(),
                document.name(),
                document.namespace(),
                api_error(code, reason),
            )
        };
        let live = objects.get(&k).ok_or_else(|| conflict(404, "NotFound"))?;
        if live.resource_version() != document.resource_version() {
            return Err(conflict(409, "Conflict"));
        }
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = document.clone();
        stored.set_resource_version(Some(version.to_string()));
        objects.insert(k, stored);
        Ok(())
    }

    async fn delete(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<bool, EventingError> {
        self.calls.lock().unwrap().deletes += 1;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .remove(&key(&api_resource.kind, namespace, name))
            .is_some())
    }

    async fn list(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Document>, EventingError> {
        self.calls.lock().unwrap().lists += 1;
        if self.is_uninstalled(&api_resource.kind) {
            return Err(EventingError::Api(api_error(404, "NotFound")));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((kind, ns, _), _)| *kind == api_resource.kind && ns == namespace)
            .map(|(_, doc)| doc)
            .filter(|doc| selector_matches(doc, label_selector))
            .cloned()
            .collect())
    }
}
