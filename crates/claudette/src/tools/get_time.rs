use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use serde_json::{json, Map, Value};

use super::ToolHandler;
use crate::errors::AgentResult;
use crate::models::tool::Tool;

pub const NAME: &str = "get_current_time";

pub struct GetCurrentTime;

pub fn describe_time<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "Current Date and Time Information:\n\n\
         Full: {}\n\
         Date: {}\n\
         Time: {}\n\
         Day of Week: {}\n\
         Month: {}\n\
         Year: {}\n\n\
         ISO Format: {}\n\
         Unix Timestamp: {}\n\n\
         Timezone: System local time ({})",
        now.format("%A, %B %d, %Y at %H:%M:%S"),
        now.format("%Y-%m-%d"),
        now.format("%H:%M:%S"),
        now.format("%A"),
        now.format("%B"),
        now.format("%Y"),
        now.to_rfc3339(),
        now.timestamp(),
        now.offset(),
    )
}

#[async_trait]
impl ToolHandler for GetCurrentTime {
    fn definition(&self) -> Tool {
        Tool::new(
            NAME,
            "Get the current date and time with detailed temporal information. Returns current date, time, day of week, and Unix timestamp.",
            json!({"type": "object", "properties": {}, "required": []}),
        )
    }

    // Extra arguments are ignored: models like to pass a timezone here
    async fn execute(&self, _arguments: Map<String, Value>) -> AgentResult<String> {
        Ok(describe_time(&Local::now()))
    }
}
