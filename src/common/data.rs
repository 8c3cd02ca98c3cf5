use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value;
use std::{
    fmt::{self, Display},
    path::Path,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("rule for '{0}' does not declare an action")]
    MissingAction(String),
    #[error("rule for '{0}' declares an invalid HTTP status code {1}")]
    InvalidStatusCode(String, u16),
    #[error("cannot read rules file: {0}")]
    RulesFileError(#[from] std::io::Error),
    #[error("cannot parse JSON rules: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("cannot parse YAML rules: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// The rule set as it travels over the control channel and as it is reported by
/// `GET /rules`: a map from URL pattern to rule definition.
///
/// Entries keep the order in which they were written, since registration order decides
/// between equally specific rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default, with = "ordered_urls")]
    pub urls: Vec<(String, RuleDefinition)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, url: S, definition: RuleDefinition) {
        self.urls.push((url.into(), definition));
    }

    pub fn get(&self, url: &str) -> Option<&RuleDefinition> {
        self.urls
            .iter()
            .rev()
            .find(|(key, _)| key == url)
            .map(|(_, definition)| definition)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Reads a rules file in the wire shape (`{ "urls": { ... } }`). Files ending in
    /// `.yaml` or `.yml` are parsed as YAML, everything else as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_yaml = path
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);

        if is_yaml {
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }
}

/// A single rule in wire form. A valid definition carries at least one action key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_error: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_http_error: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<Value>,
}

/// An API error code rendered into the synthetic error body. Codes are usually numeric but
/// strings are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Number(code) => write!(f, "{}", code),
            ErrorCode::Text(code) => f.write_str(code),
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode::Number(code)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode::Number(code.into())
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::Text(code.to_string())
    }
}

/// Messages sent from the driver to a stub server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<RuleSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate: Option<bool>,
}

impl ControlMessage {
    pub fn configure(rules: RuleSet) -> Self {
        Self {
            rules: Some(rules),
            terminate: None,
        }
    }

    pub fn terminate() -> Self {
        Self {
            rules: None,
            terminate: Some(true),
        }
    }

    pub fn is_terminate(&self) -> bool {
        self.terminate.unwrap_or(false)
    }
}

/// Messages sent from a stub server back to its driver: a one-off `ready` signal once the
/// listener is bound, and one acknowledgement (the full rule snapshot) per applied batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<RuleSet>,
}

impl ServerMessage {
    pub fn ready(port: u16) -> Self {
        Self {
            ready: Some(true),
            port: Some(port),
            rules: None,
        }
    }

    pub fn ack(snapshot: RuleSet) -> Self {
        Self {
            ready: None,
            port: None,
            rules: Some(snapshot),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.unwrap_or(false)
    }

    pub fn is_ack(&self) -> bool {
        self.rules.is_some()
    }
}

mod ordered_urls {
    use super::*;

    pub fn serialize<S>(urls: &[(String, RuleDefinition)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(urls.len()))?;
        for (url, definition) in urls {
            map.serialize_entry(url, definition)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, RuleDefinition)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(UrlsVisitor)
    }

    struct UrlsVisitor;

    impl<'de> Visitor<'de> for UrlsVisitor {
        type Value = Vec<(String, RuleDefinition)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map from URL pattern to rule definition")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut urls = Vec::with_capacity(access.size_hint().unwrap_or(0));
            // An ill-typed entry must not take the rest of its batch down with it.
            while let Some((url, value)) = access.next_entry::<String, serde_json::Value>()? {
                match serde_json::from_value::<RuleDefinition>(value) {
                    Ok(definition) => urls.push((url, definition)),
                    Err(err) => tracing::warn!("skipping rule for '{}': {}", url, err),
                }
            }
            Ok(urls)
        }
    }
}
