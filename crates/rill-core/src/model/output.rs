//! Output bundles produced by cell execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Known MIME types for output bundles.
pub mod mime {
    pub const PLAIN: &str = "text/plain";
    pub const PNG: &str = "image/png";
    /// Structured JSON, including the `{type: "table", columns, rows}` bundle.
    pub const JSON: &str = "application/json";
    pub const PLOTLY: &str = "application/vnd.plotly.v1+json";
    pub const VEGA_LITE: &str = "application/vnd.vegalite.v6+json";
}

/// One renderable result of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub mime_type: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

impl Output {
    pub fn new(mime_type: impl Into<String>, data: Value) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
            metadata: None,
        }
    }

    /// Plain-text output from a display string.
    pub fn text(data: impl Into<String>) -> Self {
        Self::new(mime::PLAIN, Value::String(data.into()))
    }

    /// A `{type: "table", columns, rows, truncated}` bundle.
    pub fn table(columns: Vec<Value>, rows: Vec<Value>, truncated: String) -> Self {
        Self::new(
            mime::JSON,
            serde_json::json!({
                "type": "table",
                "columns": columns,
                "rows": rows,
                "truncated": truncated,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_omitted_when_absent() {
        let output = Output::text("hi");
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["mime_type"], "text/plain");
        assert_eq!(json["data"], "hi");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_table_bundle_shape() {
        let output = Output::table(
            vec!["id".into()],
            vec![serde_json::json!([1])],
            String::new(),
        );
        assert_eq!(output.mime_type, mime::JSON);
        assert_eq!(output.data["type"], "table");
        assert_eq!(output.data["columns"][0], "id");
    }
}
