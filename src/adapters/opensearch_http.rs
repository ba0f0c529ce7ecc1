use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::app::ports::{
    BackendConnectorPort, ClusterDirectoryPort, ClusterInfo, ConnectionInfo, IndexSummary,
    RawRequest, RequestBody, SearchBackendPort, SearchOptions, ShardRow,
};
use crate::domain::{
    errors::{DomainError, Result},
    models::BaseArgs,
    types::{HttpMethod, Version},
};

pub const ENV_URL: &str = "OPENSEARCH_URL";
pub const ENV_USERNAME: &str = "OPENSEARCH_USERNAME";
pub const ENV_PASSWORD: &str = "OPENSEARCH_PASSWORD";
pub const ENV_SSL_VERIFY: &str = "OPENSEARCH_SSL_VERIFY";
pub const ENV_SERVERLESS: &str = "AWS_OPENSEARCH_SERVERLESS";
pub const ENV_IAM_ARN: &str = "AWS_IAM_ARN";
pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_PROFILE: &str = "AWS_PROFILE";

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

// ── Connection settings ───────────────────────────────────────────────────────

/// Default connection built from environment variables.
///
/// TLS verification stays on unless `OPENSEARCH_SSL_VERIFY` is `false`;
/// serverless is on only for `AWS_OPENSEARCH_SERVERLESS=true`.
pub fn connection_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConnectionInfo {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    ConnectionInfo {
        url: lookup(ENV_URL).unwrap_or_default().trim().to_string(),
        username: non_empty(ENV_USERNAME),
        password: non_empty(ENV_PASSWORD),
        is_serverless: lookup(ENV_SERVERLESS)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false),
        verify_ssl: !lookup(ENV_SSL_VERIFY)
            .map(|v| v.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(false),
        iam_arn: non_empty(ENV_IAM_ARN),
        aws_region: non_empty(ENV_REGION),
        profile: non_empty(ENV_PROFILE),
    }
}

pub fn connection_from_env() -> ConnectionInfo {
    connection_from_lookup(|key| std::env::var(key).ok())
}

fn wants_request_signing(info: &ConnectionInfo) -> bool {
    info.iam_arn.is_some() || info.profile.is_some() || info.aws_region.is_some()
}

/// Named clusters that ask for AWS request signing without basic
/// credentials are refused before any request is sent.
fn unsupported_auth(name: &str, info: &ConnectionInfo) -> Option<DomainError> {
    let has_basic = info.username.is_some() && info.password.is_some();
    if has_basic || !(wants_request_signing(info) || info.is_serverless) {
        return None;
    }
    Some(DomainError::Backend(format!(
        "cluster '{}': IAM auth not supported (iam_arn, aws_region, profile and serverless \
         clusters need AWS request signing); configure opensearch_username and \
         opensearch_password instead",
        name
    )))
}

// ── Client ────────────────────────────────────────────────────────────────────

/// One OpenSearch endpoint reached over HTTP.
pub struct OpenSearchClient {
    http: Client,
    base_url: Url,
    credentials: Option<(String, String)>,
    serverless: bool,
}

impl OpenSearchClient {
    pub fn new(info: &ConnectionInfo) -> Result<Self> {
        let raw_url = info.url.trim();
        if raw_url.is_empty() {
            return Err(DomainError::Backend(
                "OpenSearch URL must be provided using config file or OPENSEARCH_URL environment variable"
                    .into(),
            ));
        }
        if !(raw_url.starts_with("http://") || raw_url.starts_with("https://")) {
            return Err(DomainError::Backend(format!(
                "OpenSearch URL '{}' must start with http:// or https://",
                raw_url
            )));
        }
        let base_url = Url::parse(raw_url)
            .map_err(|e| DomainError::Backend(format!("invalid OpenSearch URL '{}': {}", raw_url, e)))?;

        let credentials = match (&info.username, &info.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };
        if credentials.is_none() && wants_request_signing(info) {
            tracing::warn!(
                "AWS request signing is not supported; connecting to {} without credentials",
                base_url
            );
        }

        let http = Client::builder()
            .danger_accept_invalid_certs(!info.verify_ssl)
            .build()
            .map_err(|e| DomainError::Backend(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            credentials,
            serverless: info.is_serverless,
        })
    }

    /// Appends percent-encoded segments to the base URL path.
    fn url<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DomainError::Backend(format!("OpenSearch URL '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request<S: AsRef<str>>(&self, method: Method, segments: &[S]) -> Result<RequestBuilder> {
        let builder = self.http.request(method, self.url(segments)?);
        Ok(match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, String)> {
        let response = builder
            .send()
            .await
            .map_err(|e| DomainError::Backend(format!("request to OpenSearch failed: {}", e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DomainError::Backend(format!("failed to read OpenSearch response: {}", e)))?;
        Ok((status, text))
    }

    async fn send_ok(&self, builder: RequestBuilder) -> Result<String> {
        let (status, text) = self.send(builder).await?;
        if !status.is_success() {
            return Err(DomainError::Backend(format!(
                "OpenSearch returned {}: {}",
                status, text
            )));
        }
        Ok(text)
    }

    async fn get_json(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Value> {
        let builder = self.request(Method::GET, segments)?.query(query);
        let text = self.send_ok(builder).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Patch => Method::PATCH,
    }
}

/// JSON when the body parses, otherwise the raw text (`_cat` without
/// `format=json` answers in plain text).
fn response_value(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[async_trait]
impl SearchBackendPort for OpenSearchClient {
    fn is_serverless(&self) -> bool {
        self.serverless
    }

    async fn info(&self) -> Result<ClusterInfo> {
        let body = self.get_json(&[], &[]).await?;
        let number = body
            .pointer("/version/number")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::Backend("cluster info carries no version number".into()))?;
        Ok(ClusterInfo {
            version: Version::parse(number)?,
            distribution: body
                .pointer("/version/distribution")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn cat_indices(&self) -> Result<Vec<IndexSummary>> {
        let body = self.get_json(&["_cat", "indices"], &[("format", "json")]).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn get_mapping(&self, index: &str) -> Result<Value> {
        self.get_json(&[index, "_mapping"], &[]).await
    }

    async fn search(&self, index: &str, body: &Value, options: &SearchOptions) -> Result<Value> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(cache) = options.request_cache {
            query.push(("request_cache", bool_param(cache)));
        }
        if let Some(partial) = options.allow_partial_search_results {
            query.push(("allow_partial_search_results", bool_param(partial)));
        }
        let builder = self
            .request(Method::POST, &[index, "_search"])?
            .query(&query)
            .json(body);
        let text = self.send_ok(builder).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn cat_shards(&self, index: &str) -> Result<Vec<ShardRow>> {
        let mut segments = vec!["_cat", "shards"];
        if !index.trim().is_empty() {
            segments.push(index);
        }
        let body = self.get_json(&segments, &[("format", "json")]).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn raw_request(&self, request: RawRequest) -> Result<Value> {
        let mut builder = self
            .request(to_reqwest_method(request.method), &request.segments)?
            .query(&request.query);
        builder = match request.body {
            Some(RequestBody::Json(body)) => builder.json(&body),
            Some(RequestBody::Ndjson(body)) => builder
                .header(reqwest::header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
                .body(body),
            None => builder,
        };

        if request.method == HttpMethod::Head {
            let (status, _) = self.send(builder).await?;
            return Ok(Value::Bool(status.is_success()));
        }
        let text = self.send_ok(builder).await?;
        Ok(response_value(text))
    }
}

// ── Connector ─────────────────────────────────────────────────────────────────

/// Resolves base args to clients: the environment connection when no
/// cluster is named, the cluster directory otherwise. Clients are cached
/// per cluster name.
pub struct OpenSearchConnector {
    default: ConnectionInfo,
    directory: Option<Arc<dyn ClusterDirectoryPort>>,
    clients: Mutex<HashMap<String, Arc<OpenSearchClient>>>,
}

impl OpenSearchConnector {
    pub fn new(default: ConnectionInfo, directory: Option<Arc<dyn ClusterDirectoryPort>>) -> Self {
        Self {
            default,
            directory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn connection_for(&self, base: &BaseArgs) -> Result<ConnectionInfo> {
        if !base.has_cluster() {
            return Ok(self.default.clone());
        }
        let name = base.cluster_name.trim();
        let mut info = self
            .directory
            .as_ref()
            .and_then(|directory| directory.resolve_cluster_name(name))
            .ok_or_else(|| {
                DomainError::Backend(format!(
                    "cluster '{}' is not defined in the cluster configuration",
                    name
                ))
            })?;
        if let Some(err) = unsupported_auth(name, &info) {
            return Err(err);
        }
        info.is_serverless |= self.default.is_serverless;
        info.verify_ssl &= self.default.verify_ssl;
        Ok(info)
    }
}

#[async_trait]
impl BackendConnectorPort for OpenSearchConnector {
    async fn connect(&self, base: &BaseArgs) -> Result<Arc<dyn SearchBackendPort>> {
        let key = base.cluster_name.trim().to_string();
        if let Some(client) = self
            .clients
            .lock()
            .map_err(|_| DomainError::Backend("client cache poisoned".into()))?
            .get(&key)
        {
            return Ok(client.clone());
        }

        let info = self.connection_for(base)?;
        let client = Arc::new(OpenSearchClient::new(&info)?);
        if client.serverless {
            tracing::info!("Using OpenSearch Serverless for {}", client.base_url);
        }
        self.clients
            .lock()
            .map_err(|_| DomainError::Backend("client cache poisoned".into()))?
            .insert(key, client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::{Path, RawQuery};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn fake_cluster() -> String {
        let app = Router::new()
            .route(
                "/",
                get(|| async { Json(json!({ "version": { "number": "2.19.1", "distribution": "opensearch" } })) }),
            )
            .route(
                "/_cat/indices",
                get(|| async {
                    Json(json!([
                        { "index": "logs", "health": "green", "status": "open", "docs.count": "42" }
                    ]))
                }),
            )
            .route(
                "/_cat/shards/{index}",
                get(|Path(index): Path<String>| async move {
                    Json(json!([
                        { "index": index, "shard": "0", "prirep": "p", "state": "STARTED",
                          "docs": "42", "store": "1kb", "ip": "127.0.0.1", "node": "n1" },
                        { "index": index, "shard": "0", "prirep": "r", "state": "UNASSIGNED",
                          "docs": null, "store": null, "ip": null, "node": null }
                    ]))
                }),
            )
            .route(
                "/{index}/_search",
                post(|RawQuery(query): RawQuery, Json(body): Json<Value>| async move {
                    Json(json!({ "query_string": query, "echo": body }))
                }),
            )
            .route(
                "/_msearch",
                post(|headers: HeaderMap, body: Bytes| async move {
                    let content_type = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    Json(json!({
                        "content_type": content_type,
                        "lines": String::from_utf8_lossy(&body).lines().count()
                    }))
                }),
            )
            .route("/_cat/health", get(|| async { "green\n" }))
            .route(
                "/{index}/_mapping",
                get(|Path(index): Path<String>| async move {
                    if index == "missing" {
                        return (axum::http::StatusCode::NOT_FOUND, "no such index".to_string())
                            .into_response();
                    }
                    Json(json!({ "index_seen": index })).into_response()
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(url: &str) -> OpenSearchClient {
        OpenSearchClient::new(&ConnectionInfo {
            url: url.to_string(),
            verify_ssl: true,
            ..ConnectionInfo::default()
        })
        .unwrap()
    }

    #[test]
    fn test_connection_from_lookup() {
        let info = connection_from_lookup(|key| match key {
            ENV_URL => Some(" https://search.local:9200 ".into()),
            ENV_USERNAME => Some("admin".into()),
            ENV_PASSWORD => Some("".into()),
            ENV_SSL_VERIFY => Some("FALSE".into()),
            ENV_SERVERLESS => Some("True".into()),
            _ => None,
        });
        assert_eq!(info.url, "https://search.local:9200");
        assert_eq!(info.username.as_deref(), Some("admin"));
        assert_eq!(info.password, None);
        assert!(!info.verify_ssl);
        assert!(info.is_serverless);

        let defaults = connection_from_lookup(|_| None);
        assert!(defaults.verify_ssl);
        assert!(!defaults.is_serverless);
        assert!(defaults.url.is_empty());
    }

    #[test]
    fn test_client_requires_url() {
        let err = OpenSearchClient::new(&ConnectionInfo::default()).err().unwrap();
        assert!(err.to_string().contains("OPENSEARCH_URL"));

        let err = OpenSearchClient::new(&ConnectionInfo {
            url: "search.local:9200".into(),
            ..ConnectionInfo::default()
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_response_value_falls_back_to_text() {
        assert_eq!(response_value("{\"a\":1}".into()), json!({ "a": 1 }));
        assert_eq!(response_value("green\n".into()), json!("green\n"));
        assert_eq!(response_value("  ".into()), Value::Null);
    }

    #[tokio::test]
    async fn test_client_against_fake_cluster() {
        let url = fake_cluster().await;
        let client = client_for(&format!("{}/", url));

        let info = client.info().await.unwrap();
        assert_eq!(info.version, Version::new(2, 19, 1));
        assert_eq!(info.distribution.as_deref(), Some("opensearch"));

        let indices = client.cat_indices().await.unwrap();
        assert_eq!(indices[0].index, "logs");
        assert_eq!(indices[0].docs_count.as_deref(), Some("42"));

        let shards = client.cat_shards("logs").await.unwrap();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[1].node, None);

        let options = SearchOptions {
            request_cache: Some(true),
            allow_partial_search_results: Some(false),
        };
        let response = client
            .search("logs", &json!({ "size": 1 }), &options)
            .await
            .unwrap();
        assert_eq!(
            response["query_string"],
            "request_cache=true&allow_partial_search_results=false"
        );
        assert_eq!(response["echo"], json!({ "size": 1 }));
    }

    #[tokio::test]
    async fn test_raw_requests_and_errors() {
        let url = fake_cluster().await;
        let client = client_for(&url);

        let response = client
            .raw_request(RawRequest {
                method: HttpMethod::Post,
                segments: vec!["_msearch".into()],
                query: vec![],
                body: Some(RequestBody::Ndjson("{}\n{\"query\": {}}\n".into())),
            })
            .await
            .unwrap();
        assert_eq!(response["content_type"], NDJSON_CONTENT_TYPE);
        assert_eq!(response["lines"], 2);

        let text = client
            .raw_request(RawRequest {
                method: HttpMethod::Get,
                segments: vec!["_cat".into(), "health".into()],
                query: vec![],
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(text, json!("green\n"));

        let err = client.get_mapping("missing").await.unwrap_err();
        assert!(err.to_string().contains("404"), "{}", err);
        assert!(err.to_string().contains("no such index"));
    }

    #[tokio::test]
    async fn test_path_values_are_percent_encoded() {
        let url = fake_cluster().await;
        let client = client_for(&url);

        let mapping = client.get_mapping("logs/2024?x#y").await.unwrap();
        assert_eq!(mapping["index_seen"], "logs/2024?x#y");

        let response = client
            .raw_request(RawRequest {
                method: HttpMethod::Get,
                segments: vec!["a b,c*".into(), "_mapping".into()],
                query: vec![],
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(response["index_seen"], "a b,c*");

        let built = client.url(&["a/b", "_search"]).unwrap();
        assert!(built.as_str().ends_with("/a%2Fb/_search"), "{}", built);
    }

    #[test]
    fn test_base_url_path_prefix_is_kept() {
        let client = client_for("https://search.local:9200/prefix/");
        let built = client.url(&["_cat", "indices"]).unwrap();
        assert_eq!(built.as_str(), "https://search.local:9200/prefix/_cat/indices");
    }

    struct OneCluster(ConnectionInfo);

    impl ClusterDirectoryPort for OneCluster {
        fn resolve_cluster_name(&self, name: &str) -> Option<ConnectionInfo> {
            (name == "prod").then(|| self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_connector_resolves_named_clusters() {
        let url = fake_cluster().await;
        let named = ConnectionInfo {
            url: url.clone(),
            username: Some("admin".into()),
            password: Some("secret".into()),
            verify_ssl: true,
            is_serverless: true,
            ..ConnectionInfo::default()
        };
        let connector = OpenSearchConnector::new(
            ConnectionInfo {
                verify_ssl: true,
                ..ConnectionInfo::default()
            },
            Some(Arc::new(OneCluster(named))),
        );

        let backend = connector.connect(&BaseArgs::for_cluster("prod")).await.unwrap();
        assert!(backend.is_serverless());
        assert_eq!(backend.info().await.unwrap().version, Version::new(2, 19, 1));

        let again = connector.connect(&BaseArgs::for_cluster("prod")).await.unwrap();
        assert_eq!(
            Arc::as_ptr(&backend) as *const (),
            Arc::as_ptr(&again) as *const ()
        );

        let err = connector.connect(&BaseArgs::for_cluster("dev")).await.err().unwrap();
        assert!(err.to_string().contains("cluster 'dev'"));

        let err = connector.connect(&BaseArgs::default()).await.err().unwrap();
        assert!(err.to_string().contains("OPENSEARCH_URL"));
    }

    #[tokio::test]
    async fn test_connector_refuses_iam_only_clusters() {
        let directory = crate::adapters::clusters_yaml::YamlClusterDirectory::parse(
            r#"
clusters:
  iam:
    opensearch_url: "https://search.us-east-1.es.amazonaws.com"
    iam_arn: "arn:aws:iam::123456789012:role/search"
    aws_region: us-east-1
  regional:
    opensearch_url: "https://search.us-east-1.es.amazonaws.com"
    aws_region: us-east-1
  basic:
    opensearch_url: "https://search.local:9200"
    aws_region: us-east-1
    opensearch_username: admin
    opensearch_password: secret
"#,
        )
        .unwrap();
        let connector = OpenSearchConnector::new(
            ConnectionInfo {
                verify_ssl: true,
                ..ConnectionInfo::default()
            },
            Some(Arc::new(directory)),
        );

        for name in ["iam", "regional"] {
            let err = connector.connect(&BaseArgs::for_cluster(name)).await.err().unwrap();
            assert!(err.to_string().contains("IAM auth not supported"), "{}", err);
            assert!(err.to_string().contains(name));
        }
        assert!(connector.connect(&BaseArgs::for_cluster("basic")).await.is_ok());
    }
}
