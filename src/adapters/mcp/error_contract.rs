use serde_json::Value;

use crate::adapters::mcp::rpc::{RpcEnvelope, INTERNAL_ERROR, INVALID_PARAMS};
use crate::domain::errors::DomainError;

/// Maps a `tools/call` failure onto a JSON-RPC error. Only lookup and
/// argument failures reach this point; handler errors are already text.
pub(super) fn domain_error_response(id: Value, err: &DomainError) -> RpcEnvelope {
    let code = match err {
        DomainError::UnknownTool(_) | DomainError::Validation(_) | DomainError::InvalidData(_) => {
            INVALID_PARAMS
        }
        _ => INTERNAL_ERROR,
    };
    RpcEnvelope::rpc_error(id, code, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_map_to_invalid_params() {
        let unknown = domain_error_response(Value::from(1), &DomainError::UnknownTool("X".into()));
        let error = unknown.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(error.message, "unknown or disabled tool: X");

        let invalid = domain_error_response(
            Value::from("req-2"),
            &DomainError::Validation("'index' is required".into()),
        );
        assert_eq!(invalid.id, Value::from("req-2"));
        assert_eq!(invalid.error.unwrap().code, INVALID_PARAMS);
    }

    #[test]
    fn test_other_errors_map_to_internal() {
        let envelope = domain_error_response(Value::Null, &DomainError::Io("disk".into()));
        assert_eq!(envelope.error.unwrap().code, INTERNAL_ERROR);
    }
}
