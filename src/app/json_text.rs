use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;
use std::io;

/// Single-line JSON with `", "` and `": "` separators (`{"index": "t"}`).
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

pub fn spaced(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => value.to_string(),
    }
}

pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Each item on its own line, every line terminated by `\n`.
pub fn to_ndjson(items: &[Value]) -> String {
    items.iter().map(|item| spaced(item) + "\n").collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spaced_uses_python_separators() {
        let value = json!({ "query": { "match_all": {} }, "size": [1, 2] });
        assert_eq!(spaced(&value), r#"{"query": {"match_all": {}}, "size": [1, 2]}"#);
    }

    #[test]
    fn test_ndjson_lines_reparse_in_order() {
        let items = vec![json!({ "index": "t" }), json!({ "query": { "match_all": {} } })];
        let text = to_ndjson(&items);
        assert_eq!(text, "{\"index\": \"t\"}\n{\"query\": {\"match_all\": {}}}\n");
        let reparsed: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(reparsed, items);
    }
}
