//! Dependency resolution.
//!
//! Walks the `com.skr.dependencies` graph breadth-first from a root
//! reference, pulling missing nodes through an optional [`Puller`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use skr_core::error::Result;

use crate::oci::manifest::Descriptor;
use crate::oci::store::Store;

/// Fetches a reference from somewhere into the local store.
#[async_trait]
pub trait Puller: Send + Sync {
    async fn pull(&self, reference: &str) -> Result<()>;
}

/// Computes the install closure of a skill reference.
pub struct Resolver {
    store: Arc<Store>,
    puller: Option<Arc<dyn Puller>>,
}

impl Resolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            puller: None,
        }
    }

    /// Pull references that are missing from the store through `puller`.
    pub fn with_puller(mut self, puller: Arc<dyn Puller>) -> Self {
        self.puller = Some(puller);
        self
    }

    /// Every reference reachable from `root`, root first, in BFS order.
    ///
    /// Each reference appears once: shared dependencies are visited once and
    /// cycles terminate. The first unresolvable node fails the whole call.
    pub async fn resolve(&self, root: &str) -> Result<Vec<String>> {
        let mut queue = VecDeque::from([root.to_string()]);
        let mut visited: HashSet<String> = HashSet::new();
        // Discovery parent of each reference, for cycle diagnostics
        let mut parents: HashMap<String, String> = HashMap::new();
        let mut resolved = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            resolved.push(current.clone());

            let descriptor = self.resolve_node(&current).await?;
            let manifest = self
                .store
                .fetch_manifest(&descriptor)
                .await
                .map_err(|e| e.context(format!("failed to read manifest for {}", current)))?;
            let dependencies = manifest
                .dependencies()
                .map_err(|e| e.context(format!("failed to parse dependencies of {}", current)))?;

            for dependency in dependencies {
                if is_ancestor(&parents, &current, &dependency) {
                    tracing::warn!(
                        from = %current,
                        to = %dependency,
                        "Dependency cycle detected"
                    );
                }
                if visited.contains(&dependency) {
                    continue;
                }
                parents
                    .entry(dependency.clone())
                    .or_insert_with(|| current.clone());
                queue.push_back(dependency);
            }
        }

        tracing::debug!(root = %root, count = resolved.len(), "Resolved dependency closure");
        Ok(resolved)
    }

    /// Resolve one node locally, pulling it once if it is missing.
    async fn resolve_node(&self, reference: &str) -> Result<Descriptor> {
        match self.store.resolve(reference).await {
            Ok(descriptor) => Ok(descriptor),
            Err(e) if e.is_not_found() => {
                let Some(puller) = &self.puller else {
                    return Err(e.context(format!("failed to resolve {}", reference)));
                };
                tracing::info!(reference = %reference, "Pulling missing dependency");
                puller.pull(reference).await.map_err(|pull_err| {
                    pull_err.context(format!(
                        "failed to resolve {} locally and pull failed",
                        reference
                    ))
                })?;
                self.store
                    .resolve(reference)
                    .await
                    .map_err(|e| e.context(format!("failed to resolve {} after pull", reference)))
            }
            Err(e) => Err(e.context(format!("failed to resolve {}", reference))),
        }
    }
}

/// Whether `candidate` is `node` or one of its discovery ancestors.
fn is_ancestor(parents: &HashMap<String, String>, node: &str, candidate: &str) -> bool {
    let mut cursor = Some(node);
    let mut steps = 0usize;
    while let Some(current) = cursor {
        if current == candidate {
            return true;
        }
        // Parent links always point at earlier discoveries; the bound is a backstop
        steps += 1;
        if steps > parents.len() + 1 {
            return false;
        }
        cursor = parents.get(current).map(String::as_str);
    }
    false
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use skr_core::error::SkrError;
    use crate::oci::manifest::{ANNOTATION_DEPENDENCIES, MEDIA_TYPE_OCI_MANIFEST};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Build a skill named after its reference's repository with the given
    /// dependency list and tag it as `reference`.
    pub(crate) async fn build_skill(store: &Store, work: &Path, reference: &str, deps: &[&str]) {
        let name = reference.split(':').next().unwrap().replace('/', "-");
        let dir = work.join(format!("src-{}", reference.replace([':', '/'], "_")));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {}\ndescription: test\n---\n", name),
        )
        .unwrap();

        let mut annotations = BTreeMap::new();
        if !deps.is_empty() {
            annotations.insert(
                ANNOTATION_DEPENDENCIES.to_string(),
                serde_json::to_string(deps).unwrap(),
            );
        }
        store.build(&dir, reference, annotations).await.unwrap();
    }

    /// Puller that builds requested references from a fixed recipe list.
    pub(crate) struct RecipePuller {
        pub store: Arc<Store>,
        pub work: std::path::PathBuf,
        pub recipes: Vec<(String, Vec<String>)>,
        pub pulled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Puller for RecipePuller {
        async fn pull(&self, reference: &str) -> Result<()> {
            self.pulled.lock().unwrap().push(reference.to_string());
            let Some((_, deps)) = self.recipes.iter().find(|(r, _)| r == reference) else {
                return Err(SkrError::Registry {
                    registry: "test".to_string(),
                    message: format!("unknown {}", reference),
                });
            };
            let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
            build_skill(&self.store, &self.work, reference, &deps).await;
            Ok(())
        }
    }

    /// Puller that always fails.
    pub(crate) struct FailingPuller;

    #[async_trait]
    impl Puller for FailingPuller {
        async fn pull(&self, reference: &str) -> Result<()> {
            Err(SkrError::Registry {
                registry: "test".to_string(),
                message: format!("cannot reach registry for {}", reference),
            })
        }
    }

    async fn setup() -> (TempDir, Arc<Store>) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&tmp.path().join("store")).await.unwrap());
        (tmp, store)
    }

    #[tokio::test]
    async fn test_single_node() {
        let (tmp, store) = setup().await;
        build_skill(&store, tmp.path(), "solo:v1", &[]).await;

        let order = Resolver::new(store).resolve("solo:v1").await.unwrap();
        assert_eq!(order, vec!["solo:v1"]);
    }

    #[tokio::test]
    async fn test_diamond_resolves_shared_once() {
        let (tmp, store) = setup().await;
        build_skill(&store, tmp.path(), "d:v1", &[]).await;
        build_skill(&store, tmp.path(), "b:v1", &["d:v1"]).await;
        build_skill(&store, tmp.path(), "c:v1", &["d:v1"]).await;
        build_skill(&store, tmp.path(), "a:v1", &["b:v1", "c:v1"]).await;

        let order = Resolver::new(store).resolve("a:v1").await.unwrap();
        assert_eq!(order, vec!["a:v1", "b:v1", "c:v1", "d:v1"]);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let (tmp, store) = setup().await;
        build_skill(&store, tmp.path(), "a:v1", &["b:v1"]).await;
        build_skill(&store, tmp.path(), "b:v1", &["a:v1"]).await;

        let order = Resolver::new(store).resolve("a:v1").await.unwrap();
        assert_eq!(order, vec!["a:v1", "b:v1"]);
    }

    #[tokio::test]
    async fn test_self_dependency() {
        let (tmp, store) = setup().await;
        build_skill(&store, tmp.path(), "a:v1", &["a:v1"]).await;

        let order = Resolver::new(store).resolve("a:v1").await.unwrap();
        assert_eq!(order, vec!["a:v1"]);
    }

    #[tokio::test]
    async fn test_missing_without_puller_fails() {
        let (tmp, store) = setup().await;
        build_skill(&store, tmp.path(), "a:v1", &["ghost:v1"]).await;

        let err = Resolver::new(store).resolve("a:v1").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("ghost:v1"));
    }

    #[tokio::test]
    async fn test_malformed_dependencies_fail() {
        let (tmp, store) = setup().await;
        let dir = tmp.path().join("bad");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), "---\nname: bad\ndescription: x\n---\n").unwrap();
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_DEPENDENCIES.to_string(), "{oops".to_string());
        store.build(&dir, "bad:v1", annotations).await.unwrap();

        let err = Resolver::new(store).resolve("bad:v1").await.unwrap_err();
        assert!(matches!(err, SkrError::ManifestDecode(_)));
    }

    #[tokio::test]
    async fn test_puller_fetches_missing_nodes() {
        let (tmp, store) = setup().await;
        build_skill(&store, tmp.path(), "app:v1", &["lib:v1"]).await;

        let puller = Arc::new(RecipePuller {
            store: store.clone(),
            work: tmp.path().to_path_buf(),
            recipes: vec![
                ("lib:v1".to_string(), vec!["base:v1".to_string()]),
                ("base:v1".to_string(), vec![]),
            ],
            pulled: Mutex::new(Vec::new()),
        });

        let order = Resolver::new(store)
            .with_puller(puller.clone())
            .resolve("app:v1")
            .await
            .unwrap();
        assert_eq!(order, vec!["app:v1", "lib:v1", "base:v1"]);
        assert_eq!(*puller.pulled.lock().unwrap(), vec!["lib:v1", "base:v1"]);
    }

    #[tokio::test]
    async fn test_failed_pull_aborts() {
        let (tmp, store) = setup().await;
        build_skill(&store, tmp.path(), "app:v1", &["nowhere:v1"]).await;

        let err = Resolver::new(store)
            .with_puller(Arc::new(FailingPuller))
            .resolve("app:v1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pull failed"));
    }

    #[tokio::test]
    async fn test_resolves_by_digest() {
        let (tmp, store) = setup().await;
        build_skill(&store, tmp.path(), "solo:v1", &[]).await;
        let descriptor = store.resolve("solo:v1").await.unwrap();
        assert_eq!(descriptor.media_type, MEDIA_TYPE_OCI_MANIFEST);

        let root = descriptor.digest.to_string();
        let order = Resolver::new(store).resolve(&root).await.unwrap();
        assert_eq!(order, vec![root]);
    }

    #[test]
    fn test_is_ancestor() {
        let mut parents = HashMap::new();
        parents.insert("b".to_string(), "a".to_string());
        parents.insert("c".to_string(), "b".to_string());
        assert!(is_ancestor(&parents, "c", "a"));
        assert!(is_ancestor(&parents, "c", "c"));
        assert!(!is_ancestor(&parents, "b", "c"));
    }
}
