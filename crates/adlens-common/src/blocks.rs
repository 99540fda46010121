use serde::{Deserialize, Serialize};

/// The final payload returned to the chat caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub blocks: Vec<ResponseBlock>,
}

/// Typed content units the UI collaborator renders in order. Each variant
/// carries a fixed field set; no raw upstream payloads leave the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Text {
        text: String,
    },
    Table {
        #[serde(flatten)]
        table: TableBlock,
    },
    Chart {
        chart_type: String,
        title: String,
        labels: Vec<String>,
        series: Vec<ChartSeries>,
    },
    ActionList {
        title: String,
        actions: Vec<String>,
    },
    Image {
        url: String,
        alt: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBlock {
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub values: Vec<f64>,
}

impl ChatResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ResponseBlock::Text { text: text.into() }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_serialize_with_type_tag() {
        let response = ChatResponse {
            blocks: vec![
                ResponseBlock::Text {
                    text: "hello".into(),
                },
                ResponseBlock::Chart {
                    chart_type: "line".into(),
                    title: "Clicks".into(),
                    labels: vec!["mon".into(), "tue".into()],
                    series: vec![ChartSeries {
                        name: "clicks".into(),
                        values: vec![10.0, 12.0],
                    }],
                },
            ],
        };

        let json = serde_json::to_value(&response).expect("response should serialize");
        assert_eq!(json["blocks"][0]["type"], "text");
        assert_eq!(json["blocks"][1]["type"], "chart");
        assert_eq!(json["blocks"][1]["labels"][1], "tue");
    }
}
