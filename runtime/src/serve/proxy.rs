//! Registry responses forwarded from an upstream registry.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::{HeaderName, AUTHORIZATION, HOST};
use hyper::{Body, HeaderMap, Method, Request, Response, StatusCode};
use skr_core::error::{Result, SkrError};

use super::{plain_response, RegistryBackend};
use crate::oci::credentials::{Credential, CredentialProvider};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards every request to one upstream registry.
pub struct ProxyBackend {
    upstream: reqwest::Url,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl ProxyBackend {
    pub fn new(upstream: &str, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let url = reqwest::Url::parse(upstream)
            .map_err(|e| SkrError::Config(format!("Invalid upstream URL '{}': {}", upstream, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(SkrError::Config(format!(
                "Upstream URL must be http(s) with a host: {}",
                upstream
            )));
        }

        // Redirects (e.g. to blob storage) are passed through to the client
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SkrError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            upstream: url,
            client,
            credentials,
        })
    }

    /// `host[:port]` of the upstream, the key for credential lookups.
    fn server(&self) -> String {
        let host = self.upstream.host_str().unwrap_or_default();
        match self.upstream.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Upstream URL for a request, joining the upstream base path.
    fn target_url(&self, uri: &hyper::Uri) -> reqwest::Url {
        let mut url = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base, uri.path()));
        url.set_query(uri.query());
        url
    }

    async fn credential(&self) -> Option<Credential> {
        let provider = self.credentials.clone();
        let server = self.server();
        let lookup = server.clone();
        match tokio::task::spawn_blocking(move || provider.get(&lookup)).await {
            Ok(Ok(credential)) => credential,
            Ok(Err(e)) => {
                tracing::warn!(registry = %server, error = %e, "Credential lookup failed, forwarding anonymously");
                None
            }
            Err(e) => {
                tracing::warn!(registry = %server, error = %e, "Credential lookup task failed");
                None
            }
        }
    }

    async fn forward(&self, req: Request<Body>) -> std::result::Result<Response<Body>, reqwest::Error> {
        let (parts, body) = req.into_parts();
        let url = self.target_url(&parts.uri);

        let mut builder = self
            .client
            .request(parts.method.clone(), url)
            .headers(forwarded_headers(&parts.headers, &[HOST]));

        if !parts.headers.contains_key(AUTHORIZATION) {
            match self.credential().await {
                Some(Credential::Basic { username, password }) => {
                    builder = builder.basic_auth(username, Some(password));
                }
                Some(Credential::Token(token)) => {
                    builder = builder.basic_auth("<token>", Some(token));
                }
                None => {}
            }
        }

        if !matches!(parts.method, Method::GET | Method::HEAD) {
            builder = builder.body(reqwest::Body::wrap_stream(body));
        }

        let upstream = builder.send().await?;
        let status = upstream.status();
        // The local listener sets its own framing
        let headers = forwarded_headers(upstream.headers(), &[]);

        let mut response = Response::new(Body::wrap_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

#[async_trait]
impl RegistryBackend for ProxyBackend {
    async fn handle(&self, req: Request<Body>) -> Response<Body> {
        match self.forward(req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(upstream = %self.upstream, error = %e, "Upstream request failed");
                plain_response(StatusCode::BAD_GATEWAY, "bad gateway")
            }
        }
    }

    fn describe(&self) -> String {
        format!("proxy to {}", self.upstream)
    }
}

/// Copy of `headers` without hop-by-hop headers and the named extras.
fn forwarded_headers(headers: &HeaderMap, skip: &[HeaderName]) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()) && !skip.contains(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::handle;
    use super::*;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::Server;
    use std::convert::Infallible;
    use std::net::SocketAddr;

    struct Static(Option<Credential>);

    impl CredentialProvider for Static {
        fn get(&self, _server: &str) -> Result<Option<Credential>> {
            Ok(self.0.clone())
        }
    }

    /// Upstream that echoes the request line and selected headers as JSON.
    async fn echo_upstream() -> SocketAddr {
        let make_svc = make_service_fn(|_conn| async {
            Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
                let header = |name: &str| {
                    req.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                let doc = serde_json::json!({
                    "method": req.method().as_str(),
                    "path": req.uri().path(),
                    "query": req.uri().query(),
                    "host": header("host"),
                    "authorization": header("authorization"),
                    "accept": header("accept"),
                });
                let mut response = Response::new(Body::from(doc.to_string()));
                *response.status_mut() = StatusCode::ACCEPTED;
                response
                    .headers_mut()
                    .insert("x-upstream", "yes".parse().unwrap());
                Ok::<_, Infallible>(response)
            }))
        });
        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }

    async fn call(backend: ProxyBackend, req: Request<Body>) -> (StatusCode, HeaderMap, serde_json::Value) {
        let response = handle(Arc::new(backend), req).await;
        let status = response.status();
        let headers = response.headers().clone();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let doc = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, headers, doc)
    }

    #[tokio::test]
    async fn test_forwards_request_and_response() {
        let addr = echo_upstream().await;
        let backend = ProxyBackend::new(&format!("http://{}", addr), Arc::new(Static(None))).unwrap();
        let req = Request::builder()
            .uri("/v2/alpha/tags/list?n=5")
            .header("Host", "skr.local:8080")
            .header("Accept", "application/json")
            .body(Body::empty())
            .unwrap();

        let (status, headers, doc) = call(backend, req).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(headers["x-upstream"], "yes");
        assert_eq!(headers["Access-Control-Allow-Origin"], "*");
        assert_eq!(doc["method"], "GET");
        assert_eq!(doc["path"], "/v2/alpha/tags/list");
        assert_eq!(doc["query"], "n=5");
        assert_eq!(doc["host"], addr.to_string());
        assert_eq!(doc["accept"], "application/json");
        assert!(doc["authorization"].is_null());
    }

    #[tokio::test]
    async fn test_passes_redirect_through() {
        let make_svc = make_service_fn(|_conn| async {
            Ok::<_, Infallible>(service_fn(|_req: Request<Body>| async {
                let response = Response::builder()
                    .status(StatusCode::TEMPORARY_REDIRECT)
                    .header("location", "https://blobs.example.com/abc")
                    .body(Body::from("moved"))
                    .unwrap();
                Ok::<_, Infallible>(response)
            }))
        });
        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);

        let backend = ProxyBackend::new(&format!("http://{}", addr), Arc::new(Static(None))).unwrap();
        let req = Request::get("/v2/alpha/blobs/sha256:abc").body(Body::empty()).unwrap();
        let response = handle(Arc::new(backend), req).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()["location"], "https://blobs.example.com/abc");
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"moved");
    }

    #[tokio::test]
    async fn test_injects_credentials() {
        let addr = echo_upstream().await;
        let credential = Credential::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let backend =
            ProxyBackend::new(&format!("http://{}", addr), Arc::new(Static(Some(credential)))).unwrap();
        let req = Request::get("/v2/").body(Body::empty()).unwrap();

        let (_, _, doc) = call(backend, req).await;
        // base64("user:pass")
        assert_eq!(doc["authorization"], "Basic dXNlcjpwYXNz");
    }

    #[tokio::test]
    async fn test_client_authorization_wins() {
        let addr = echo_upstream().await;
        let credential = Credential::Token("secret".to_string());
        let backend =
            ProxyBackend::new(&format!("http://{}", addr), Arc::new(Static(Some(credential)))).unwrap();
        let req = Request::get("/v2/")
            .header("Authorization", "Bearer from-client")
            .body(Body::empty())
            .unwrap();

        let (_, _, doc) = call(backend, req).await;
        assert_eq!(doc["authorization"], "Bearer from-client");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        // Bind and drop to find a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = ProxyBackend::new(&format!("http://{}", addr), Arc::new(Static(None))).unwrap();
        let req = Request::get("/v2/").body(Body::empty()).unwrap();
        let (status, headers, _) = call(backend, req).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(headers["Access-Control-Allow-Origin"], "*");
    }

    #[test]
    fn test_target_url_joins_base_path() {
        let backend =
            ProxyBackend::new("https://registry.example.com/mirror/", Arc::new(Static(None))).unwrap();
        let uri: hyper::Uri = "/v2/alpha/manifests/v1?x=1".parse().unwrap();
        assert_eq!(
            backend.target_url(&uri).as_str(),
            "https://registry.example.com/mirror/v2/alpha/manifests/v1?x=1"
        );
        assert_eq!(backend.server(), "registry.example.com");
    }

    #[test]
    fn test_rejects_bad_upstream() {
        assert!(ProxyBackend::new("not a url", Arc::new(Static(None))).is_err());
        assert!(ProxyBackend::new("ftp://example.com", Arc::new(Static(None))).is_err());
    }

    #[test]
    fn test_forwarded_headers_drop_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("host", "a".parse().unwrap());
        headers.insert("accept", "*/*".parse().unwrap());

        let kept = forwarded_headers(&headers, &[HOST]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept["accept"], "*/*");
    }
}
