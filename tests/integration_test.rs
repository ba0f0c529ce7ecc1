use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcp_opensearch::{
    adapters::mcp::{serve_io, McpHandler},
    app::{
        ports::{
            BackendConnectorPort, ClusterInfo, IndexSummary, RawRequest, SearchBackendPort,
            SearchOptions, ShardRow, SpecSourcePort,
        },
        startup::{build_dispatcher, StartupOptions},
        tool_filter::EnvPolicyInputs,
    },
    domain::{
        errors::{DomainError, Result},
        models::{BaseArgs, CLUSTER_NAME_FIELD},
        types::{HttpMethod, ServerMode, Version},
    },
};

const CORE_SPEC: &str = r#"
paths:
  /_count:
    get:
      x-operation-group: count
      description: Returns number of documents matching a query.
      parameters:
        - $ref: '#/components/parameters/count::query.q'
  /{index}/_count:
    get:
      x-operation-group: count
      description: Returns number of documents matching a query.
      parameters:
        - $ref: '#/components/parameters/count::path.index'
        - $ref: '#/components/parameters/count::query.q'
  /_msearch:
    post:
      x-operation-group: msearch
      description: Allows to execute several search operations in one request.
      requestBody:
        $ref: '#/components/requestBodies/msearch'
  /{index}/_explain/{id}:
    post:
      x-operation-group: explain
      x-version-added: '2.0'
      x-version-deprecated: '2.99'
      description: Returns information about why a specific document matches a query.
      parameters:
        - in: path
          name: index
          required: true
          schema:
            type: string
        - in: path
          name: id
          required: true
          schema:
            type: string
      requestBody:
        $ref: '#/components/requestBodies/explain'
  /_bulk:
    post:
      x-operation-group: bulk
      description: Not exposed.
components:
  parameters:
    count::path.index:
      in: path
      name: index
      required: true
      schema:
        type: string
    count::query.q:
      in: query
      name: q
      description: Query in the Lucene query string syntax.
      schema:
        type: string
"#;

// ── Test doubles ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeBackend {
    version: Option<Version>,
    serverless: bool,
    info_calls: AtomicUsize,
    raw_requests: Mutex<Vec<RawRequest>>,
}

#[async_trait]
impl SearchBackendPort for FakeBackend {
    fn is_serverless(&self) -> bool {
        self.serverless
    }

    async fn info(&self) -> Result<ClusterInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let version = self
            .version
            .ok_or_else(|| DomainError::Backend("connection refused".into()))?;
        Ok(ClusterInfo {
            version,
            distribution: Some("opensearch".into()),
        })
    }

    async fn cat_indices(&self) -> Result<Vec<IndexSummary>> {
        Ok(vec![IndexSummary {
            index: "logs-2024".into(),
            health: Some("green".into()),
            status: Some("open".into()),
            docs_count: Some("12".into()),
        }])
    }

    async fn get_mapping(&self, index: &str) -> Result<Value> {
        Ok(json!({ index: { "mappings": {} } }))
    }

    async fn search(&self, _index: &str, _body: &Value, _options: &SearchOptions) -> Result<Value> {
        Ok(json!({ "hits": { "hits": [] } }))
    }

    async fn cat_shards(&self, _index: &str) -> Result<Vec<ShardRow>> {
        Ok(Vec::new())
    }

    async fn raw_request(&self, request: RawRequest) -> Result<Value> {
        self.raw_requests.lock().unwrap().push(request);
        Ok(json!({ "count": 12 }))
    }
}

struct FakeConnector {
    backend: Arc<FakeBackend>,
    clusters: Mutex<Vec<String>>,
}

impl FakeConnector {
    fn new(backend: FakeBackend) -> Arc<Self> {
        Arc::new(Self {
            backend: Arc::new(backend),
            clusters: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BackendConnectorPort for FakeConnector {
    async fn connect(&self, base: &BaseArgs) -> Result<Arc<dyn SearchBackendPort>> {
        self.clusters.lock().unwrap().push(base.cluster_name.clone());
        Ok(self.backend.clone())
    }
}

struct FakeSpecSource;

#[async_trait]
impl SpecSourcePort for FakeSpecSource {
    async fn fetch_spec(&self, file_name: &str) -> Result<String> {
        match file_name {
            "_core.yaml" => Ok(CORE_SPEC.to_string()),
            other => Err(DomainError::SpecFetch(format!("{} unavailable", other))),
        }
    }
}

fn names(handler_tools: &Value) -> Vec<String> {
    let mut names: Vec<String> = handler_tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    names
}

async fn rpc(handler: &McpHandler, id: u64, method: &str, params: Value) -> Value {
    handler
        .handle_value(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
        .await
        .unwrap()
}

// ── Startup pipeline ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_single_mode_pipeline_with_config_file() {
    let tmp = tempfile::tempdir().unwrap();
    let config = tmp.path().join("config.yml");
    std::fs::write(
        &config,
        r#"
tool_filters:
  disabled_tools:
    - GetShardsTool
  disabled_tools_regex:
    - "agg.*"
tools:
  SearchIndexTool:
    display_name: QueryIndex
  CountTool:
    description: Counts documents.
"#,
    )
    .unwrap();

    let connector = FakeConnector::new(FakeBackend {
        version: Some(Version::new(3, 0, 0)),
        ..FakeBackend::default()
    });
    let options = StartupOptions {
        mode: ServerMode::Single,
        config_file: Some(config),
        env_policy: EnvPolicyInputs::default(),
        cli_overrides: vec![("tool.CountTool.name".into(), "DocCount".into())],
    };
    let dispatcher = build_dispatcher(connector.clone(), &FakeSpecSource, &options).await;
    let handler = McpHandler::new(Arc::new(dispatcher));

    let listed = rpc(&handler, 1, "tools/list", json!({})).await;
    assert_eq!(
        names(&listed),
        vec!["DocCount", "IndexMappingTool", "ListIndexTool", "MsearchTool", "QueryIndex"]
    );

    let tools = listed["result"]["tools"].as_array().unwrap();
    let count = tools.iter().find(|t| t["name"] == "DocCount").unwrap();
    assert_eq!(count["description"], "Counts documents.");
    assert!(count["inputSchema"]["properties"].get(CLUSTER_NAME_FIELD).is_none());
    assert_eq!(connector.backend.info_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_env_policy_write_gating_and_categories() {
    let connector = FakeConnector::new(FakeBackend {
        version: Some(Version::new(2, 19, 0)),
        ..FakeBackend::default()
    });
    let options = StartupOptions {
        mode: ServerMode::Single,
        env_policy: EnvPolicyInputs {
            tool_categories: r#"{"inspection": ["ListIndexTool", "IndexMappingTool"]}"#.into(),
            disabled_categories: "inspection".into(),
            allow_write: Some("false".into()),
            ..EnvPolicyInputs::default()
        },
        ..StartupOptions::default()
    };
    let dispatcher = build_dispatcher(connector, &FakeSpecSource, &options).await;
    let ids = dispatcher.registry().ids();

    assert!(!ids.contains(&"ListIndexTool"));
    assert!(!ids.contains(&"IndexMappingTool"));
    // POST-only operations are write tools.
    assert!(!ids.contains(&"MsearchTool"));
    assert!(!ids.contains(&"ExplainTool"));
    assert!(ids.contains(&"CountTool"));
    assert!(ids.contains(&"SearchIndexTool"));
}

#[tokio::test]
async fn test_multi_mode_keeps_everything_and_advertises_cluster_name() {
    let connector = FakeConnector::new(FakeBackend {
        version: Some(Version::new(1, 3, 0)),
        ..FakeBackend::default()
    });
    let options = StartupOptions {
        mode: ServerMode::Multi,
        env_policy: EnvPolicyInputs {
            disabled_tools: "ListIndexTool".into(),
            ..EnvPolicyInputs::default()
        },
        ..StartupOptions::default()
    };
    let dispatcher = build_dispatcher(connector.clone(), &FakeSpecSource, &options).await;
    let handler = McpHandler::new(Arc::new(dispatcher));

    let listed = rpc(&handler, 1, "tools/list", json!({})).await;
    let all = names(&listed);
    assert!(all.contains(&"ListIndexTool".to_string()));
    assert!(all.contains(&"ExplainTool".to_string()));
    for tool in listed["result"]["tools"].as_array().unwrap() {
        assert!(tool["inputSchema"]["properties"].get(CLUSTER_NAME_FIELD).is_some());
    }
    assert_eq!(connector.backend.info_calls.load(Ordering::SeqCst), 0);

    let reply = rpc(
        &handler,
        2,
        "tools/call",
        json!({ "name": "ListIndexTool", "arguments": { CLUSTER_NAME_FIELD: "prod" } }),
    )
    .await;
    assert_eq!(reply["result"]["content"][0]["text"], "logs-2024");
    assert_eq!(*connector.clusters.lock().unwrap(), vec!["prod".to_string()]);
    assert_eq!(connector.backend.info_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_cluster_skips_version_gating() {
    let connector = FakeConnector::new(FakeBackend::default());
    let dispatcher =
        build_dispatcher(connector, &FakeSpecSource, &StartupOptions::default()).await;
    assert!(dispatcher.registry().ids().contains(&"ExplainTool"));
}

// ── Generated tool calls ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_generated_tools_build_requests() {
    let connector = FakeConnector::new(FakeBackend {
        serverless: true,
        ..FakeBackend::default()
    });
    let dispatcher =
        build_dispatcher(connector.clone(), &FakeSpecSource, &StartupOptions::default()).await;
    let handler = McpHandler::new(Arc::new(dispatcher));

    let reply = rpc(
        &handler,
        1,
        "tools/call",
        json!({ "name": "CountTool", "arguments": { "index": "logs-2024", "q": "level:error" } }),
    )
    .await;
    assert_eq!(reply["result"]["content"][0]["text"], r#"{"count": 12}"#);

    let reply = rpc(
        &handler,
        2,
        "tools/call",
        json!({
            "name": "MsearchTool",
            "arguments": { "body": [{ "index": "logs-2024" }, { "query": { "match_all": {} } }] }
        }),
    )
    .await;
    assert_eq!(reply["result"]["isError"], false);

    let requests = connector.backend.raw_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert_eq!(requests[0].path(), "/logs-2024/_count");
    assert_eq!(requests[0].query, vec![("q".to_string(), "level:error".to_string())]);
    assert_eq!(requests[1].path(), "/_msearch");
    assert!(requests[1].body.is_some());

    let missing = rpc(
        &handler,
        3,
        "tools/call",
        json!({ "name": "ExplainTool", "arguments": { "index": "logs-2024" } }),
    )
    .await;
    assert_eq!(missing["error"]["code"], -32602);
}

// ── Stdio session ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stdio_session_end_to_end() {
    let connector = FakeConnector::new(FakeBackend {
        version: Some(Version::new(2, 19, 0)),
        ..FakeBackend::default()
    });
    let dispatcher =
        build_dispatcher(connector, &FakeSpecSource, &StartupOptions::default()).await;
    let handler = McpHandler::new(Arc::new(dispatcher));

    let input = [
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": { "protocolVersion": "2025-03-26" } }),
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": { "name": "IndexMappingTool", "arguments": { "index": "logs-2024" } } }),
        json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": { "name": "NoSuchTool", "arguments": {} } }),
        json!({ "jsonrpc": "2.0", "id": 4, "method": "shutdown" }),
        json!({ "jsonrpc": "2.0", "method": "exit" }),
    ]
    .iter()
    .map(|message| format!("{}\n", message))
    .collect::<String>();

    let mut output = Vec::new();
    serve_io(handler, input.as_bytes(), &mut output, Duration::from_secs(5))
        .await
        .unwrap();

    let replies: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(replies.len(), 4);
    assert_eq!(replies[0]["result"]["protocolVersion"], "2025-03-26");
    assert!(replies[1]["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .starts_with("Mapping for logs-2024:\n"));
    assert_eq!(replies[2]["error"]["code"], -32602);
    assert_eq!(replies[3]["id"], 4);
}
