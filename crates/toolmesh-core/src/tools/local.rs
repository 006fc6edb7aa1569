//! Tools implemented in-process
//!
//! Every local tool declares a [`ToolSchema`]; arguments are validated
//! against it by the registry before `execute` runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::schema::{PropertySchema, SchemaKind, ToolSchema};

use super::calculator;

/// A tool executed inside this process
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Name advertised to the model
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Input schema; arguments reaching `execute` already conform to it
    fn schema(&self) -> ToolSchema {
        ToolSchema::empty()
    }

    /// Run the tool. `Err` text is fed back to the model as an error result.
    async fn execute(&self, args: Value) -> Result<String, String>;
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Simulated weather report
pub struct GetWeather;

#[async_trait]
impl LocalTool for GetWeather {
    fn name(&self) -> &str {
        "getWeather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a specific city"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::object(vec![
            PropertySchema::new("city", SchemaKind::String)
                .required()
                .with_description("The name of the city"),
            PropertySchema::new("unit", SchemaKind::Enum(vec!["C".into(), "F".into()]))
                .with_description("The temperature unit (Celsius or Fahrenheit)"),
        ])
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let city = str_arg(&args, "city").ok_or("missing city")?;
        let unit = str_arg(&args, "unit").unwrap_or("C");
        let temperature = if unit == "F" { 72 } else { 22 };

        Ok(format!(
            "The weather in {} is {}°{} with Partly cloudy. Humidity: 65%, Wind speed: 12 km/h.",
            city, temperature, unit
        ))
    }
}

/// Current date and time in an IANA zone, UTC, or a fixed offset
pub struct GetCurrentTime;

impl GetCurrentTime {
    fn offset(timezone: &str) -> Option<FixedOffset> {
        let tz = timezone.trim();
        let rest = ["UTC", "GMT"]
            .iter()
            .find_map(|prefix| tz.strip_prefix(prefix))
            .unwrap_or(tz);
        if rest.is_empty() || tz == "Z" {
            return FixedOffset::east_opt(0);
        }

        let (sign, rest) = match rest.as_bytes().first()? {
            b'+' => (1, &rest[1..]),
            b'-' => (-1, &rest[1..]),
            _ => return None,
        };
        let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
        let hours: i32 = hours.parse().ok()?;
        let minutes: i32 = minutes.parse().ok()?;
        if hours > 14 || minutes > 59 {
            return None;
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
    }

    pub fn format_at(now: DateTime<Utc>, timezone: &str) -> Result<String, String> {
        const FORMAT: &str = "%A, %B %-d, %Y at %-I:%M:%S %p %:z";

        let formatted = match timezone.trim().parse::<Tz>() {
            Ok(zone) => now.with_timezone(&zone).format(FORMAT).to_string(),
            Err(_) => {
                let offset =
                    Self::offset(timezone).ok_or_else(|| format!("Error: unknown timezone {}", timezone))?;
                now.with_timezone(&offset).format(FORMAT).to_string()
            }
        };
        Ok(format!("Current time in {}: {}", timezone, formatted))
    }
}

#[async_trait]
impl LocalTool for GetCurrentTime {
    fn name(&self) -> &str {
        "getCurrentTime"
    }

    fn description(&self) -> &str {
        "Get the current date and time"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::object(vec![PropertySchema::new("timezone", SchemaKind::String)
            .with_description("The timezone (e.g., America/New_York, Europe/London, UTC, +02:00)")])
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let timezone = str_arg(&args, "timezone").unwrap_or("UTC");
        // Unknown zones are reported as a normal result, not a failed call
        Ok(Self::format_at(Utc::now(), timezone).unwrap_or_else(|e| e))
    }
}

/// Basic arithmetic
pub struct Calculate;

#[async_trait]
impl LocalTool for Calculate {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Perform basic mathematical calculations"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::object(vec![PropertySchema::new("expression", SchemaKind::String)
            .required()
            .with_description("The mathematical expression to evaluate (e.g., '2 + 2', '10 * 5')")])
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let expression = str_arg(&args, "expression").ok_or("missing expression")?;
        let sanitized: String = expression
            .chars()
            .filter(|c| c.is_ascii_digit() || "+-*/(). ".contains(*c) || c.is_whitespace())
            .collect();

        Ok(match calculator::evaluate(&sanitized) {
            Ok(value) => format!("The result of {} is {}", expression, calculator::format_number(value)),
            Err(_) => format!("Error calculating {}: Invalid expression", expression),
        })
    }
}

/// Simulated knowledge search
pub struct SearchInfo;

#[async_trait]
impl LocalTool for SearchInfo {
    fn name(&self) -> &str {
        "searchInfo"
    }

    fn description(&self) -> &str {
        "Search for information on a given topic"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::object(vec![
            PropertySchema::new("query", SchemaKind::String)
                .required()
                .with_description("The search query"),
            PropertySchema::new(
                "category",
                SchemaKind::Enum(
                    ["general", "technology", "science", "history"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                ),
            )
            .with_description("The category of information to search"),
        ])
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = str_arg(&args, "query").ok_or("missing query")?;
        let category = str_arg(&args, "category").unwrap_or("general");

        Ok(format!(
            "Search results for \"{}\" in {}: This is a simulated response. In a real implementation, this would connect to a search API or knowledge base.",
            query, category
        ))
    }
}

/// The built-in local tool set
pub fn builtin_tools() -> Vec<Arc<dyn LocalTool>> {
    vec![
        Arc::new(GetWeather),
        Arc::new(GetCurrentTime),
        Arc::new(Calculate),
        Arc::new(SearchInfo),
    ]
}
