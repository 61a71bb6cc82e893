use async_trait::async_trait;
use serde_json::json;
use threadrun_common::{Error, Result};

use crate::tools::{Tool, ToolContext};

/// Reports the current time, optionally in an IANA timezone.
pub struct CurrentTime;

#[async_trait]
impl Tool for CurrentTime {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Optionally pass an IANA timezone name \
         (e.g. 'Europe/Rome'); defaults to UTC."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone name such as 'America/New_York'. Defaults to 'UTC'."
                }
            }
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<String> {
        let tz_name = args["timezone"].as_str().unwrap_or("UTC");
        let tz: chrono_tz::Tz = tz_name
            .parse()
            .map_err(|_| Error::InvalidRequest(format!("unknown timezone: '{tz_name}'")))?;

        let now = chrono::Utc::now().with_timezone(&tz);
        Ok(json!({
            "timezone": tz_name,
            "now": now.to_rfc3339(),
            "weekday": now.format("%A").to_string(),
        })
        .to_string())
    }
}
