use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One page of the PTO database, as returned by the query and retrieve endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub id: String,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub in_trash: bool,
    #[serde(default, deserialize_with = "lenient_user")]
    pub created_by: Option<PartialUser>,
    #[serde(default)]
    pub properties: Properties,
}

impl Record {
    pub fn is_live(&self) -> bool {
        !self.archived && !self.in_trash
    }

    /// Decodes a raw page object. Returns `None` when the identifying fields
    /// (`id`, `created_time`) are absent or malformed.
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

/// Property name to typed value, in the order the API returned them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct Properties(Vec<(String, PropertyValue)>);

impl Properties {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// First property whose name contains `label`, ignoring case.
    pub fn find_like(&self, label: &str) -> Option<&PropertyValue> {
        let needle = label.to_lowercase();
        self.iter()
            .find(|(name, _)| name.to_lowercase().contains(&needle))
            .map(|(_, value)| value)
    }
}

impl From<Map<String, Value>> for Properties {
    fn from(map: Map<String, Value>) -> Self {
        Self(
            map.into_iter()
                .map(|(name, value)| (name, PropertyValue::from(value)))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Title(Vec<TextRun>),
    RichText(Vec<TextRun>),
    Select(Option<SelectOption>),
    MultiSelect(Vec<SelectOption>),
    Date(Option<DateRange>),
    People(Vec<PartialUser>),
    CreatedBy(Option<PartialUser>),
    Unsupported,
}

impl PropertyValue {
    pub fn text_runs(&self) -> &[TextRun] {
        match self {
            PropertyValue::Title(runs) | PropertyValue::RichText(runs) => runs,
            _ => &[],
        }
    }
}

/// Never fails: a value of unknown type, or whose payload has an unexpected
/// shape, becomes `Unsupported` or an empty variant.
impl From<Value> for PropertyValue {
    fn from(mut value: Value) -> Self {
        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => return PropertyValue::Unsupported,
        };
        let payload = value
            .as_object_mut()
            .and_then(|obj| obj.remove(&kind))
            .unwrap_or(Value::Null);

        match kind.as_str() {
            "title" => PropertyValue::Title(decode_list(payload)),
            "rich_text" => PropertyValue::RichText(decode_list(payload)),
            "select" => {
                PropertyValue::Select(serde_json::from_value::<Option<SelectOption>>(payload).ok().flatten())
            }
            "multi_select" => PropertyValue::MultiSelect(decode_list(payload)),
            "date" => {
                PropertyValue::Date(serde_json::from_value::<Option<DateRange>>(payload).ok().flatten())
            }
            "people" => PropertyValue::People(decode_list(payload)),
            "created_by" => PropertyValue::CreatedBy(serde_json::from_value(payload).ok()),
            _ => PropertyValue::Unsupported,
        }
    }
}

/// Decodes each element on its own so one malformed entry does not discard
/// its well-formed neighbours.
fn decode_list<T: for<'de> Deserialize<'de>>(payload: Value) -> Vec<T> {
    match payload {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn lenient_user<'de, D>(deserializer: D) -> Result<Option<PartialUser>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    #[serde(default)]
    pub text: Option<TextContent>,
    #[serde(default)]
    pub plain_text: Option<String>,
}

impl TextRun {
    pub fn content(&self) -> Option<&str> {
        self.text
            .as_ref()
            .and_then(|t| t.content.as_deref())
            .or(self.plain_text.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub person: Option<PersonDetail>,
}

impl PartialUser {
    pub fn email(&self) -> Option<&str> {
        self.person.as_ref().and_then(|p| p.email.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonDetail {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}
