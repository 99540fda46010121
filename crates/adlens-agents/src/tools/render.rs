use adlens_common::{ChartSeries, Error, ResponseBlock, Result, TableBlock};
use async_trait::async_trait;
use serde_json::json;

use crate::tools::{Tool, ToolContext, ToolOutput};

/// Formats tabular data into a table block for the final response. Local
/// only, no upstream calls.
pub struct RenderTable;

#[async_trait]
impl Tool for RenderTable {
    fn name(&self) -> &'static str {
        "render_table"
    }

    fn description(&self) -> &'static str {
        "Render tabular data as a table in the final answer. Use this instead \
         of writing a table in prose."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Table heading." },
                "columns": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Column headers, in display order."
                },
                "rows": {
                    "type": "array",
                    "items": { "type": "array", "items": { "type": "string" } },
                    "description": "Row values, one array per row, matching the column order."
                }
            },
            "required": ["title", "columns", "rows"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let title = args["title"]
            .as_str()
            .ok_or_else(|| Error::tool(self.name(), "missing 'title' argument"))?
            .to_string();
        let columns = string_array(&args["columns"])
            .ok_or_else(|| Error::tool(self.name(), "missing or invalid 'columns' argument"))?;
        let rows: Vec<Vec<String>> = args["rows"]
            .as_array()
            .ok_or_else(|| Error::tool(self.name(), "missing 'rows' argument"))?
            .iter()
            .map(|row| {
                string_array(row)
                    .ok_or_else(|| Error::tool(self.name(), "rows must be arrays of strings"))
            })
            .collect::<Result<_>>()?;

        for row in &rows {
            if row.len() != columns.len() {
                return Err(Error::tool(
                    self.name(),
                    format!(
                        "row has {} cells but there are {} columns",
                        row.len(),
                        columns.len()
                    ),
                ));
            }
        }

        let block = ResponseBlock::Table {
            table: TableBlock {
                title,
                columns,
                rows,
            },
        };
        Ok(ToolOutput::with_block("table rendered", block))
    }
}

/// Formats series data into a chart block for the final response.
pub struct RenderChart;

#[async_trait]
impl Tool for RenderChart {
    fn name(&self) -> &'static str {
        "render_chart"
    }

    fn description(&self) -> &'static str {
        "Render numeric series as a chart in the final answer. Supported \
         chart types: 'line', 'bar', 'pie'."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "chart_type": {
                    "type": "string",
                    "enum": ["line", "bar", "pie"]
                },
                "title": { "type": "string", "description": "Chart heading." },
                "labels": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "X-axis labels (or slice labels for pie)."
                },
                "series": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "values": { "type": "array", "items": { "type": "number" } }
                        },
                        "required": ["name", "values"]
                    }
                }
            },
            "required": ["chart_type", "title", "labels", "series"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let chart_type = args["chart_type"]
            .as_str()
            .ok_or_else(|| Error::tool(self.name(), "missing 'chart_type' argument"))?;
        if !matches!(chart_type, "line" | "bar" | "pie") {
            return Err(Error::tool(
                self.name(),
                format!("unsupported chart type '{chart_type}'"),
            ));
        }
        let title = args["title"]
            .as_str()
            .ok_or_else(|| Error::tool(self.name(), "missing 'title' argument"))?
            .to_string();
        let labels = string_array(&args["labels"])
            .ok_or_else(|| Error::tool(self.name(), "missing or invalid 'labels' argument"))?;

        let series: Vec<ChartSeries> = args["series"]
            .as_array()
            .ok_or_else(|| Error::tool(self.name(), "missing 'series' argument"))?
            .iter()
            .map(|entry| {
                let name = entry["name"]
                    .as_str()
                    .ok_or_else(|| Error::tool(self.name(), "series entry missing 'name'"))?
                    .to_string();
                let values = entry["values"]
                    .as_array()
                    .ok_or_else(|| Error::tool(self.name(), "series entry missing 'values'"))?
                    .iter()
                    .map(|v| {
                        v.as_f64().ok_or_else(|| {
                            Error::tool(self.name(), "series values must be numbers")
                        })
                    })
                    .collect::<Result<Vec<f64>>>()?;
                Ok(ChartSeries { name, values })
            })
            .collect::<Result<_>>()?;

        for s in &series {
            if s.values.len() != labels.len() {
                return Err(Error::tool(
                    self.name(),
                    format!(
                        "series '{}' has {} values but there are {} labels",
                        s.name,
                        s.values.len(),
                        labels.len()
                    ),
                ));
            }
        }

        let block = ResponseBlock::Chart {
            chart_type: chart_type.to_string(),
            title,
            labels,
            series,
        };
        Ok(ToolOutput::with_block("chart rendered", block))
    }
}

fn string_array(value: &serde_json::Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(|s| s.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            user_id: "u1".into(),
        }
    }

    #[tokio::test]
    async fn render_table_produces_a_table_block() {
        let output = RenderTable
            .execute(
                &context(),
                json!({
                    "title": "Campaigns",
                    "columns": ["Name", "Clicks"],
                    "rows": [["Spring Sale", "120"], ["Brand", "80"]]
                }),
            )
            .await
            .expect("render should succeed");

        assert_eq!(output.blocks.len(), 1);
        match &output.blocks[0] {
            ResponseBlock::Table { table } => {
                assert_eq!(table.columns.len(), 2);
                assert_eq!(table.rows.len(), 2);
            }
            other => panic!("expected table block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn render_table_rejects_ragged_rows() {
        let result = RenderTable
            .execute(
                &context(),
                json!({
                    "title": "Bad",
                    "columns": ["A", "B"],
                    "rows": [["only one cell"]]
                }),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn render_chart_rejects_unknown_chart_type() {
        let result = RenderChart
            .execute(
                &context(),
                json!({
                    "chart_type": "sparkline",
                    "title": "Clicks",
                    "labels": ["mon"],
                    "series": [{ "name": "clicks", "values": [1.0] }]
                }),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn render_chart_checks_series_length_against_labels() {
        let result = RenderChart
            .execute(
                &context(),
                json!({
                    "chart_type": "line",
                    "title": "Clicks",
                    "labels": ["mon", "tue"],
                    "series": [{ "name": "clicks", "values": [1.0] }]
                }),
            )
            .await;
        assert!(result.is_err());
    }
}
