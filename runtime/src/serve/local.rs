//! Registry responses served from the local store.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use http::response::Builder;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use skr_core::error::{Result, SkrError};
use tokio_util::io::ReaderStream;

use super::{error_response, plain_response, RegistryBackend};
use crate::oci::digest::Digest;
use crate::oci::manifest::Descriptor;
use crate::oci::reference::split_repository_tag;
use crate::oci::store::Store;

const API_VERSION_HEADER: &str = "docker-distribution-api-version";
const CONTENT_DIGEST_HEADER: &str = "docker-content-digest";

/// Serves the read side of the distribution API from a [`Store`].
pub struct LocalBackend {
    store: Arc<Store>,
}

impl LocalBackend {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    async fn route(&self, path: &str) -> Result<Response<Body>> {
        if path.is_empty() {
            return Ok(Response::new(Body::empty()));
        }
        if path == "_catalog" {
            return self.catalog().await;
        }
        if let Some(name) = path.strip_suffix("/tags/list") {
            return self.tags(name).await;
        }
        if let Some((_, digest)) = path.rsplit_once("/blobs/") {
            return self.blob(digest).await;
        }
        if let Some((name, reference)) = path.rsplit_once("/manifests/") {
            return self.manifest(name, reference).await;
        }
        Err(SkrError::NotFound(format!("Unknown route: /v2/{}", path)))
    }

    async fn catalog(&self) -> Result<Response<Body>> {
        let listed = self.store.list().await?;
        let repositories: BTreeSet<&str> = listed.iter().map(|t| repository_of(t)).collect();
        json_response(&serde_json::json!({ "repositories": repositories }))
    }

    async fn tags(&self, name: &str) -> Result<Response<Body>> {
        let listed = self.store.list().await?;
        let mut found = false;
        let mut tags = BTreeSet::new();
        for entry in &listed {
            if repository_of(entry) != name {
                continue;
            }
            found = true;
            if entry.contains('@') {
                continue;
            }
            if let (_, Some(tag)) = split_repository_tag(entry) {
                tags.insert(tag);
            }
        }
        if !found {
            return Err(SkrError::NotFound(format!("Repository not found: {}", name)));
        }
        json_response(&serde_json::json!({ "name": name, "tags": tags }))
    }

    async fn blob(&self, digest: &str) -> Result<Response<Body>> {
        let digest = Digest::parse(digest)
            .map_err(|_| SkrError::NotFound(format!("Blob not found: {}", digest)))?;
        let descriptor = Descriptor::new("application/octet-stream", digest, 0);
        let file = self.store.fetch(&descriptor).await?;
        let size = file.metadata().await?.len();

        finish(
            Response::builder()
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(CONTENT_LENGTH, size)
                .header(CONTENT_DIGEST_HEADER, descriptor.digest.to_string()),
            Body::wrap_stream(ReaderStream::new(file)),
        )
    }

    async fn manifest(&self, name: &str, reference: &str) -> Result<Response<Body>> {
        let resolved = if Digest::parse(reference).is_ok() {
            self.store.resolve(reference).await
        } else {
            self.store.resolve(&format!("{}:{}", name, reference)).await
        };
        // A malformed name or reference can never resolve
        let descriptor = resolved.map_err(|e| match e {
            SkrError::InvalidReference(msg) => {
                SkrError::NotFound(format!("Manifest not found: {}", msg))
            }
            other => other,
        })?;
        let file = self.store.fetch(&descriptor).await?;

        finish(
            Response::builder()
                .header(CONTENT_TYPE, descriptor.media_type.as_str())
                .header(CONTENT_LENGTH, descriptor.size)
                .header(CONTENT_DIGEST_HEADER, descriptor.digest.to_string()),
            Body::wrap_stream(ReaderStream::new(file)),
        )
    }
}

#[async_trait]
impl RegistryBackend for LocalBackend {
    async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let head = req.method() == Method::HEAD;
        let mut response = if req.method() != Method::GET && !head {
            plain_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        } else {
            let path = req.uri().path().to_string();
            let rest = match path.as_str() {
                "/v2" => Some(""),
                p => p.strip_prefix("/v2/"),
            };
            match rest {
                Some(rest) => match self.route(rest).await {
                    Ok(response) => response,
                    Err(e) => error_response(&e),
                },
                None => plain_response(StatusCode::NOT_FOUND, "not found"),
            }
        };

        response
            .headers_mut()
            .insert(API_VERSION_HEADER, HeaderValue::from_static("registry/2.0"));
        if head {
            *response.body_mut() = Body::empty();
        }
        response
    }

    fn describe(&self) -> String {
        format!("local store at {}", self.store.root().display())
    }
}

/// Repository part of a listed tag (`repo:tag` or `repo@digest`).
fn repository_of(entry: &str) -> &str {
    let name = entry.split('@').next().unwrap_or(entry);
    split_repository_tag(name).0
}

fn json_response(value: &serde_json::Value) -> Result<Response<Body>> {
    let body = serde_json::to_vec(value)?;
    finish(
        Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len()),
        Body::from(body),
    )
}

fn finish(builder: Builder, body: Body) -> Result<Response<Body>> {
    builder
        .status(StatusCode::OK)
        .body(body)
        .map_err(|e| SkrError::Other(format!("Failed to build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::super::handle;
    use super::*;
    use crate::resolve::tests::build_skill;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<Store>, Arc<dyn RegistryBackend>) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&tmp.path().join("store")).await.unwrap());
        let backend: Arc<dyn RegistryBackend> = Arc::new(LocalBackend::new(store.clone()));
        (tmp, store, backend)
    }

    async fn call(
        backend: &Arc<dyn RegistryBackend>,
        method: Method,
        path: &str,
    ) -> (StatusCode, hyper::HeaderMap, Vec<u8>) {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = handle(backend.clone(), req).await;
        let status = response.status();
        let headers = response.headers().clone();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, headers, body.to_vec())
    }

    #[tokio::test]
    async fn test_version_check() {
        let (_tmp, _store, backend) = setup().await;
        let (status, headers, body) = call(&backend, Method::GET, "/v2/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[API_VERSION_HEADER], "registry/2.0");
        assert_eq!(headers["Access-Control-Allow-Origin"], "*");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_empty() {
        let (_tmp, _store, backend) = setup().await;
        let (status, _, body) = call(&backend, Method::GET, "/v2/_catalog").await;
        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc, serde_json::json!({ "repositories": [] }));
    }

    #[tokio::test]
    async fn test_catalog_distinct_sorted() {
        let (tmp, store, backend) = setup().await;
        build_skill(&store, tmp.path(), "zeta:v1", &[]).await;
        build_skill(&store, tmp.path(), "alpha:v1", &[]).await;
        build_skill(&store, tmp.path(), "alpha:v2", &[]).await;
        build_skill(&store, tmp.path(), "localhost:5000/team/tool:v1", &[]).await;

        let (_, _, body) = call(&backend, Method::GET, "/v2/_catalog").await;
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            doc["repositories"],
            serde_json::json!(["alpha", "localhost:5000/team/tool", "zeta"])
        );
    }

    #[tokio::test]
    async fn test_tags_list() {
        let (tmp, store, backend) = setup().await;
        build_skill(&store, tmp.path(), "alpha:v2", &[]).await;
        build_skill(&store, tmp.path(), "alpha:v1", &[]).await;
        build_skill(&store, tmp.path(), "beta:v1", &[]).await;

        let (status, _, body) = call(&backend, Method::GET, "/v2/alpha/tags/list").await;
        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc, serde_json::json!({ "name": "alpha", "tags": ["v1", "v2"] }));

        let (status, _, _) = call(&backend, Method::GET, "/v2/gamma/tags/list").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_manifest_by_tag_and_digest() {
        let (tmp, store, backend) = setup().await;
        build_skill(&store, tmp.path(), "alpha:v1", &[]).await;
        let descriptor = store.resolve("alpha:v1").await.unwrap();
        let stored = store.fetch_bytes(&descriptor).await.unwrap();

        let (status, headers, body) = call(&backend, Method::GET, "/v2/alpha/manifests/v1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, stored);
        assert_eq!(headers[CONTENT_TYPE], descriptor.media_type.as_str());
        assert_eq!(
            headers[CONTENT_DIGEST_HEADER],
            descriptor.digest.to_string().as_str()
        );
        assert_eq!(
            headers[CONTENT_LENGTH],
            descriptor.size.to_string().as_str()
        );

        let path = format!("/v2/alpha/manifests/{}", descriptor.digest);
        let (status, _, body) = call(&backend, Method::GET, &path).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, stored);
    }

    #[tokio::test]
    async fn test_unknown_manifest() {
        let (_tmp, _store, backend) = setup().await;
        let (status, _, _) = call(&backend, Method::GET, "/v2/alpha/manifests/v9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let path = format!("/v2/alpha/manifests/sha256:{}", "0".repeat(64));
        let (status, _, _) = call(&backend, Method::GET, &path).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_manifest_reference_is_not_found() {
        let (tmp, store, backend) = setup().await;
        build_skill(&store, tmp.path(), "alpha:v1", &[]).await;

        for path in [
            "/v2/Upper/manifests/v1",
            "/v2/alpha/manifests/sha256:short",
            "/v2/alpha/manifests/bad!tag",
        ] {
            let (status, _, _) = call(&backend, Method::GET, path).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", path);
        }
    }

    #[tokio::test]
    async fn test_tags_list_after_digest_tag() {
        let (tmp, store, backend) = setup().await;
        build_skill(&store, tmp.path(), "alpha:v1", &[]).await;
        let descriptor = store.resolve("alpha:v1").await.unwrap();
        store
            .tag(&descriptor, &format!("beta@{}", descriptor.digest))
            .await
            .unwrap();

        let (_, _, body) = call(&backend, Method::GET, "/v2/_catalog").await;
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["repositories"], serde_json::json!(["alpha", "beta"]));

        let (status, _, body) = call(&backend, Method::GET, "/v2/beta/tags/list").await;
        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc, serde_json::json!({ "name": "beta", "tags": [] }));
    }

    #[tokio::test]
    async fn test_blob_fetch() {
        let (tmp, store, backend) = setup().await;
        build_skill(&store, tmp.path(), "alpha:v1", &[]).await;
        let descriptor = store.resolve("alpha:v1").await.unwrap();
        let manifest = store.fetch_manifest(&descriptor).await.unwrap();
        let layer = &manifest.layers[0];
        let expected = store.fetch_bytes(layer).await.unwrap();

        let path = format!("/v2/alpha/blobs/{}", layer.digest);
        let (status, headers, body) = call(&backend, Method::GET, &path).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, expected);
        assert_eq!(headers[CONTENT_LENGTH], expected.len().to_string().as_str());
        assert_eq!(headers[CONTENT_DIGEST_HEADER], layer.digest.to_string().as_str());

        let (status, headers, body) = call(&backend, Method::HEAD, &path).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(headers[CONTENT_LENGTH], expected.len().to_string().as_str());
    }

    #[tokio::test]
    async fn test_blob_missing_or_malformed() {
        let (_tmp, _store, backend) = setup().await;
        let path = format!("/v2/alpha/blobs/sha256:{}", "a".repeat(64));
        let (status, _, _) = call(&backend, Method::GET, &path).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = call(&backend, Method::GET, "/v2/alpha/blobs/nonsense").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_method_and_path_rejections() {
        let (_tmp, _store, backend) = setup().await;
        let (status, headers, _) = call(&backend, Method::DELETE, "/v2/alpha/manifests/v1").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers[API_VERSION_HEADER], "registry/2.0");

        let (status, _, _) = call(&backend, Method::GET, "/index.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = call(&backend, Method::GET, "/v2/alpha/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_repository_of() {
        assert_eq!(repository_of("alpha:v1"), "alpha");
        assert_eq!(repository_of("localhost:5000/alpha:v1"), "localhost:5000/alpha");
        assert_eq!(repository_of("localhost:5000/alpha"), "localhost:5000/alpha");
        assert_eq!(repository_of("beta@sha256:abc"), "beta");
    }
}
