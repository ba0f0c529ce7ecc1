use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::json_text::pretty;
use crate::app::ports::{BackendConnectorPort, SearchOptions, ShardRow};
use crate::app::registry::{check_tool_compatibility, ToolDescriptor, ToolHandler, ToolRegistry};
use crate::domain::{
    errors::{DomainError, Result},
    models::{ArgsModel, ParamKind, ParamSpec, ToolArgs},
    types::{ContentBlock, HttpMethod, VersionRange},
};

pub const LIST_INDEX_TOOL: &str = "ListIndexTool";
pub const INDEX_MAPPING_TOOL: &str = "IndexMappingTool";
pub const SEARCH_INDEX_TOOL: &str = "SearchIndexTool";
pub const AGGREGATION_TOOL: &str = "AggregationTool";
pub const GET_SHARDS_TOOL: &str = "GetShardsTool";

const AGGREGATION_TIMEOUT: &str = "30s";
const SHARDS_HEADER: &str = "index | shard | prirep | state | docs | store | ip | node";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinKind {
    ListIndices,
    IndexMapping,
    SearchIndex,
    Aggregation,
    GetShards,
}

impl BuiltinKind {
    fn error_label(&self) -> &'static str {
        match self {
            Self::ListIndices => "Error listing indices",
            Self::IndexMapping => "Error getting mapping",
            Self::SearchIndex => "Error searching index",
            Self::Aggregation => "Error executing aggregation query",
            Self::GetShards => "Error getting shards information",
        }
    }
}

struct BuiltinHandler {
    kind: BuiltinKind,
    tool_id: &'static str,
    versions: VersionRange,
    connector: Arc<dyn BackendConnectorPort>,
}

#[async_trait]
impl ToolHandler for BuiltinHandler {
    async fn call(&self, args: ToolArgs) -> Vec<ContentBlock> {
        match self.run(&args).await {
            Ok(text) => vec![ContentBlock::text(text)],
            Err(err) => {
                tracing::debug!("{} failed: {}", self.tool_id, err);
                vec![ContentBlock::text(format!(
                    "{}: {}",
                    self.kind.error_label(),
                    err
                ))]
            }
        }
    }
}

impl BuiltinHandler {
    async fn run(&self, args: &ToolArgs) -> Result<String> {
        let backend = self.connector.connect(&args.base).await?;
        check_tool_compatibility(self.tool_id, &self.versions, backend.as_ref()).await?;

        match self.kind {
            BuiltinKind::ListIndices => {
                let indices = backend.cat_indices().await?;
                Ok(indices
                    .iter()
                    .map(|summary| summary.index.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            BuiltinKind::IndexMapping => {
                let index = args.req_str("index")?;
                let mapping = backend.get_mapping(index).await?;
                Ok(format!("Mapping for {}:\n{}", index, pretty(&mapping)))
            }
            BuiltinKind::SearchIndex => {
                let index = args.req_str("index")?;
                let body = build_search_body(args)?;
                let result = backend
                    .search(index, &body, &SearchOptions::default())
                    .await?;
                Ok(format!("Search results from {}:\n{}", index, pretty(&result)))
            }
            BuiltinKind::Aggregation => {
                let index = args.req_str("index")?;
                let aggs = args
                    .get("aggs")
                    .cloned()
                    .ok_or_else(|| DomainError::Validation("'aggs' is required".into()))?;
                let body = build_aggregation_body(aggs, args.get("query").cloned());
                let options = SearchOptions {
                    request_cache: Some(true),
                    allow_partial_search_results: Some(false),
                };
                let result = backend.search(index, &body, &options).await?;
                Ok(format_aggregations(index, &result))
            }
            BuiltinKind::GetShards => {
                let index = args.req_str("index")?;
                let rows = backend.cat_shards(index).await?;
                Ok(format_shards(&rows))
            }
        }
    }
}

/// Search body with only the fields the caller supplied.
pub(crate) fn build_search_body(args: &ToolArgs) -> Result<Value> {
    let query = args
        .get("query")
        .cloned()
        .ok_or_else(|| DomainError::Validation("'query' is required".into()))?;
    let mut body = json!({ "query": query });
    for key in ["size", "from", "sort", "aggs"] {
        if let Some(value) = args.get(key) {
            body[key] = value.clone();
        }
    }
    Ok(body)
}

/// Aggregation-only body: no hits, no source, bounded server-side.
pub(crate) fn build_aggregation_body(aggs: Value, query: Option<Value>) -> Value {
    let query = query
        .filter(|q| !q.is_null())
        .unwrap_or_else(|| json!({ "match_all": {} }));
    let mut body = json!({ "aggs": aggs, "query": query });
    body["size"] = json!(0);
    body["_source"] = json!(false);
    body["track_total_hits"] = json!(false);
    body["timeout"] = json!(AGGREGATION_TIMEOUT);
    body
}

fn format_aggregations(index: &str, response: &Value) -> String {
    let aggregations = response.get("aggregations").filter(|aggs| match aggs {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    });
    match aggregations {
        Some(aggs) => format!("Aggregation results from {}:\n{}", index, pretty(aggs)),
        None => format!(
            "No aggregation results found for index '{}'. Please verify your aggregation query \
             contains valid 'aggs' or 'aggregations' field and that the index has matching documents.",
            index
        ),
    }
}

pub(crate) fn format_shards(rows: &[ShardRow]) -> String {
    let mut text = String::from(SHARDS_HEADER);
    text.push('\n');
    for row in rows {
        let cells = [
            &row.index,
            &row.shard,
            &row.prirep,
            &row.state,
            &row.docs,
            &row.store,
            &row.ip,
            &row.node,
        ];
        let line = cells
            .iter()
            .map(|cell| cell.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(" | ");
        text.push_str(&line);
        text.push('\n');
    }
    text
}

fn builtin(
    kind: BuiltinKind,
    tool_id: &'static str,
    description: &str,
    args_model: ArgsModel,
    methods: &[HttpMethod],
    connector: &Arc<dyn BackendConnectorPort>,
) -> ToolDescriptor {
    let versions = VersionRange::default();
    let handler = Arc::new(BuiltinHandler {
        kind,
        tool_id,
        versions: versions.clone(),
        connector: connector.clone(),
    });
    ToolDescriptor::new(tool_id, description, args_model, handler)
        .with_versions(versions)
        .with_http_methods(methods.iter().copied())
}

fn index_field(description: &str) -> ParamSpec {
    ParamSpec::new("index", ParamKind::String)
        .required()
        .with_description(description)
}

/// The fixed set of built-in tools, in listing order.
pub fn builtin_tools(connector: Arc<dyn BackendConnectorPort>) -> ToolRegistry {
    let read = [HttpMethod::Get];
    let query = [HttpMethod::Get, HttpMethod::Post];

    [
        builtin(
            BuiltinKind::ListIndices,
            LIST_INDEX_TOOL,
            "Lists all indices in OpenSearch",
            ArgsModel::new("ListIndicesArgs"),
            &read,
            &connector,
        ),
        builtin(
            BuiltinKind::IndexMapping,
            INDEX_MAPPING_TOOL,
            "Retrieves index mapping and setting information for an index in OpenSearch",
            ArgsModel::new("GetIndexMappingArgs")
                .with_field(index_field("The name of the index to get mapping information for")),
            &read,
            &connector,
        ),
        builtin(
            BuiltinKind::SearchIndex,
            SEARCH_INDEX_TOOL,
            "Searches an index using a query written in query domain-specific language (DSL) in OpenSearch",
            ArgsModel::new("SearchIndexArgs")
                .with_field(index_field("The name of the index to search in"))
                .with_field(
                    ParamSpec::new("query", ParamKind::Object)
                        .required()
                        .with_description(
                            "Query DSL describing which documents to match. Placed in the `query` \
                             section of the search request body.",
                        ),
                )
                .with_field(ParamSpec::new("size", ParamKind::Integer).with_description(
                    "Maximum number of search hits to return. Defaults to 10 when omitted.",
                ))
                .with_field(ParamSpec::new("from", ParamKind::Integer).with_description(
                    "How many search hits to skip before returning results. Useful for pagination.",
                ))
                .with_field(
                    ParamSpec::new("sort", ParamKind::Array)
                        .with_description("List of sort directives for ordering search results"),
                )
                .with_field(ParamSpec::new("aggs", ParamKind::Object).with_description(
                    "Aggregations to compute over the matched documents, keyed by aggregation name.",
                )),
            &query,
            &connector,
        ),
        builtin(
            BuiltinKind::Aggregation,
            AGGREGATION_TOOL,
            "Runs aggregation-only queries against an OpenSearch index and returns just the \
             aggregation results",
            ArgsModel::new("AggregationArgs")
                .with_field(index_field(
                    "Name of the OpenSearch index to run the aggregation query on.",
                ))
                .with_field(
                    ParamSpec::new("aggs", ParamKind::Object)
                        .required()
                        .with_description(
                            "Aggregations to compute, keyed by name. Common types: avg, sum, min, \
                             max, terms, histogram. You can nest aggregations. Example: \
                             {\"avg_price\": {\"avg\": {\"field\": \"price\"}}}",
                        ),
                )
                .with_field(
                    ParamSpec::new("query", ParamKind::Object)
                        .with_default(json!({ "match_all": {} }))
                        .with_description(
                            "Query DSL to filter documents before aggregation. Defaults to match \
                             all documents. Example: {\"range\": {\"price\": {\"gte\": 100}}}",
                        ),
                ),
            &query,
            &connector,
        ),
        builtin(
            BuiltinKind::GetShards,
            GET_SHARDS_TOOL,
            "Gets information about shards in OpenSearch",
            ArgsModel::new("GetShardsArgs")
                .with_field(index_field("The name of the index to get shard information for")),
            &read,
            &connector,
        ),
    ]
    .into_iter()
    .collect()
}
