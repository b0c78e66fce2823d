use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of block types a renderer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Text,
    Table,
    List,
    Code,
    Markdown,
    Quote,
    Divider,
    Callout,
    KeyValue,
    Json,
    Metric,
    Steps,
    Media,
    Error,
    Unknown,
}

impl BlockType {
    pub const RECOGNIZED: [BlockType; 14] = [
        BlockType::Text,
        BlockType::Table,
        BlockType::List,
        BlockType::Code,
        BlockType::Markdown,
        BlockType::Quote,
        BlockType::Divider,
        BlockType::Callout,
        BlockType::KeyValue,
        BlockType::Json,
        BlockType::Metric,
        BlockType::Steps,
        BlockType::Media,
        BlockType::Error,
    ];

    pub fn parse(name: &str) -> Option<BlockType> {
        let block_type = match name {
            "text" => BlockType::Text,
            "table" => BlockType::Table,
            "list" => BlockType::List,
            "code" => BlockType::Code,
            "markdown" => BlockType::Markdown,
            "quote" => BlockType::Quote,
            "divider" => BlockType::Divider,
            "callout" => BlockType::Callout,
            "key_value" => BlockType::KeyValue,
            "json" => BlockType::Json,
            "metric" => BlockType::Metric,
            "steps" => BlockType::Steps,
            "media" => BlockType::Media,
            "error" => BlockType::Error,
            "unknown" => BlockType::Unknown,
            _ => return None,
        };
        Some(block_type)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Table => "table",
            BlockType::List => "list",
            BlockType::Code => "code",
            BlockType::Markdown => "markdown",
            BlockType::Quote => "quote",
            BlockType::Divider => "divider",
            BlockType::Callout => "callout",
            BlockType::KeyValue => "key_value",
            BlockType::Json => "json",
            BlockType::Metric => "metric",
            BlockType::Steps => "steps",
            BlockType::Media => "media",
            BlockType::Error => "error",
            BlockType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Streamed fields always arrive as text, so flags and floats accept their
// string spellings as well.

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean: {}", other))),
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(de::Error::custom(format!("invalid boolean: {}", n))),
        },
        other => Err(de::Error::custom(format!("invalid boolean: {}", other))),
    }
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| de::Error::custom("number out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid number {:?}: {}", s, e))),
        other => Err(de::Error::custom(format!("invalid number: {}", other))),
    }
}

fn scalar_map<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Map<String, Value>, D::Error> {
    let map = Map::<String, Value>::deserialize(deserializer)?;
    if let Some((key, _)) = map
        .iter()
        .find(|(_, v)| !matches!(v, Value::String(_) | Value::Number(_)))
    {
        return Err(de::Error::custom(format!(
            "value for {:?} must be a string or number",
            key
        )));
    }
    Ok(map)
}

/// Renderer hints shared by every block shape.
///
/// `extra` keeps every accumulated field the shape does not name, so a block
/// that validates still carries all of its data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderHints {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub collapsible: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub initially_collapsed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A string or a number, for metric values and key/value entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    pub content: String,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListData {
    pub items: Vec<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub ordered: bool,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeData {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkdownData {
    pub content: String,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteData {
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DividerData {
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalloutVariant {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalloutData {
    pub variant: CalloutVariant,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueData {
    #[serde(deserialize_with = "scalar_map")]
    pub items: Map<String, Value>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonData {
    pub data: Map<String, Value>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub label: String,
    pub value: Scalar,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub delta: Option<f64>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsData {
    pub steps: Vec<String>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaData {
    pub media_type: MediaType,
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(flatten)]
    pub hints: RenderHints,
}

/// Fallback shape: the original type name and every original field, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownData {
    pub raw: Map<String, Value>,
}

/// Validated block payload, one variant per known shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BlockBody {
    Text(TextData),
    Table(TableData),
    List(ListData),
    Code(CodeData),
    Markdown(MarkdownData),
    Quote(QuoteData),
    Divider(DividerData),
    Callout(CalloutData),
    KeyValue(KeyValueData),
    Json(JsonData),
    Metric(MetricData),
    Steps(StepsData),
    Media(MediaData),
    Error(ErrorData),
    Unknown(UnknownData),
}

fn shape<T: DeserializeOwned>(fields: &Value) -> serde_json::Result<T> {
    T::deserialize(fields)
}

impl BlockBody {
    /// Validate accumulated fields against the shape named by `type_name`.
    ///
    /// Never fails: an unrecognized type, or fields that do not fit the
    /// shape, produce [`BlockBody::Unknown`] with everything preserved.
    pub fn validate(type_name: &str, fields: Map<String, Value>) -> BlockBody {
        let block_type = match BlockType::parse(type_name) {
            Some(t) if t != BlockType::Unknown => t,
            _ => {
                tracing::warn!(block_type = %type_name, "Unrecognized block type, keeping as unknown");
                return BlockBody::unknown(type_name, fields);
            }
        };

        let value = Value::Object(fields);
        let parsed = match block_type {
            BlockType::Text => shape(&value).map(BlockBody::Text),
            BlockType::Table => shape(&value).map(BlockBody::Table),
            BlockType::List => shape(&value).map(BlockBody::List),
            BlockType::Code => shape(&value).map(BlockBody::Code),
            BlockType::Markdown => shape(&value).map(BlockBody::Markdown),
            BlockType::Quote => shape(&value).map(BlockBody::Quote),
            BlockType::Divider => shape(&value).map(BlockBody::Divider),
            BlockType::Callout => shape(&value).map(BlockBody::Callout),
            BlockType::KeyValue => shape(&value).map(BlockBody::KeyValue),
            BlockType::Json => shape(&value).map(BlockBody::Json),
            BlockType::Metric => shape(&value).map(BlockBody::Metric),
            BlockType::Steps => shape(&value).map(BlockBody::Steps),
            BlockType::Media => shape(&value).map(BlockBody::Media),
            BlockType::Error => shape(&value).map(BlockBody::Error),
            BlockType::Unknown => Err(de::Error::custom("unknown is not a concrete shape")),
        };

        match parsed {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    block_type = %type_name,
                    error = %e,
                    "Block failed shape validation, keeping as unknown"
                );
                let fields = match value {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                BlockBody::unknown(type_name, fields)
            }
        }
    }

    /// Wrap fields as an unknown block, recording the original type first
    pub fn unknown(original_type: &str, fields: Map<String, Value>) -> BlockBody {
        let mut raw = Map::with_capacity(fields.len() + 1);
        raw.insert(
            "original_type".to_string(),
            Value::String(original_type.to_string()),
        );
        for (key, value) in fields {
            if key != "original_type" {
                raw.insert(key, value);
            }
        }
        BlockBody::Unknown(UnknownData { raw })
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            BlockBody::Text(_) => BlockType::Text,
            BlockBody::Table(_) => BlockType::Table,
            BlockBody::List(_) => BlockType::List,
            BlockBody::Code(_) => BlockType::Code,
            BlockBody::Markdown(_) => BlockType::Markdown,
            BlockBody::Quote(_) => BlockType::Quote,
            BlockBody::Divider(_) => BlockType::Divider,
            BlockBody::Callout(_) => BlockType::Callout,
            BlockBody::KeyValue(_) => BlockType::KeyValue,
            BlockBody::Json(_) => BlockType::Json,
            BlockBody::Metric(_) => BlockType::Metric,
            BlockBody::Steps(_) => BlockType::Steps,
            BlockBody::Media(_) => BlockType::Media,
            BlockBody::Error(_) => BlockType::Error,
            BlockBody::Unknown(_) => BlockType::Unknown,
        }
    }
}

/// A finished block, ready for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentBlock {
    pub id: String,
    #[serde(flatten)]
    pub body: BlockBody,
    /// Set when the stream ended before the block did
    pub partial: bool,
}

impl ContentBlock {
    pub fn new(id: impl Into<String>, body: BlockBody, partial: bool) -> Self {
        Self {
            id: id.into(),
            body,
            partial,
        }
    }

    pub fn block_type(&self) -> BlockType {
        self.body.block_type()
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.body, BlockBody::Unknown(_))
    }

    /// Type name the producer used, for blocks re-tagged as unknown
    pub fn original_type(&self) -> Option<&str> {
        match &self.body {
            BlockBody::Unknown(data) => data.raw.get("original_type").and_then(|t| t.as_str()),
            _ => None,
        }
    }

    /// Field mapping view of the block, including `id` (and `partial` when set)
    pub fn data(&self) -> Map<String, Value> {
        let mut data = match serde_json::to_value(&self.body) {
            Ok(Value::Object(mut tagged)) => match tagged.remove("data") {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        };
        data.insert("id".to_string(), Value::String(self.id.clone()));
        if self.partial {
            data.insert("partial".to_string(), Value::Bool(true));
        }
        data
    }
}
