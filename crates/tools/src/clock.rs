//! Current time tool.

use async_trait::async_trait;
use chrono::{Local, Utc};
use contextloop_core::error::ToolError;
use contextloop_core::tool::Tool;
use std::path::Path;

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current local date and time."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError> {
        let local = Local::now();
        Ok(serde_json::json!({
            "local": local.format("%Y-%m-%d %H:%M:%S").to_string(),
            "weekday": local.format("%A").to_string(),
            "utc": Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_parseable_utc() {
        let result = CurrentTimeTool
            .execute(serde_json::json!({}), Path::new("."))
            .await
            .unwrap();
        let utc = result["utc"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(utc).is_ok());
        assert_eq!(result["local"].as_str().unwrap().len(), 19);
    }
}
