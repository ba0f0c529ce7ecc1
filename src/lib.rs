pub mod cli;

pub mod domain {
    pub mod errors;
    pub mod models;
    pub mod types;
}

pub mod app {
    pub mod builtin_tools;
    pub mod dispatch;
    pub mod json_text;
    pub mod ports;
    pub mod registry;
    pub mod startup;
    pub mod tool_config;
    pub mod tool_filter;
    pub mod tool_generator;

    #[cfg(test)]
    pub(crate) mod testing;
}

pub mod adapters {
    pub mod clusters_yaml;
    pub mod mcp;
    pub mod opensearch_http;
    pub mod spec_http;
}
