use crate::common::{pattern::RequestQuery, rule::Rule};
use bytes::Bytes;
use http::{header::CONTENT_TYPE, Request};
use serde_json::{Map, Value};

/// The parts of an incoming request that take part in rule matching.
#[derive(Debug, Clone, PartialEq)]
pub struct StubRequest {
    pub path: String,
    pub query: RequestQuery,
    pub body: Value,
}

impl StubRequest {
    pub fn from_http(req: &Request<Bytes>) -> Self {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());

        Self {
            path: req.uri().path().to_string(),
            query: RequestQuery::parse(req.uri().query()),
            body: parse_body(content_type, req.body()),
        }
    }
}

/// Decodes a request body into a JSON value for `formData` comparison.
///
/// JSON bodies are parsed as-is, form encoded bodies become an object of strings (repeated
/// keys become arrays in order of appearance). Empty, unparsable or otherwise typed bodies
/// become an empty object.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Value {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match mime.as_deref() {
        Some("application/json") => {
            serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Map::new()))
        }
        Some("application/x-www-form-urlencoded") => parse_form(body),
        _ => Value::Object(Map::new()),
    }
}

fn parse_form(body: &[u8]) -> Value {
    let mut fields = Map::new();

    for (key, value) in form_urlencoded::parse(body) {
        let value = Value::String(value.into_owned());
        match fields.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key.into_owned(), value);
            }
        }
    }

    Value::Object(fields)
}

/// Ranks candidate rules. Rules that require more query parameters win; among equally
/// specific rules the one registered last wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    pub required_params: usize,
    pub sequence: u64,
}

/// Picks the rule that handles `req` out of `candidates`, each paired with its registration
/// sequence number.
pub fn select<'a, I>(candidates: I, req: &StubRequest) -> Option<&'a Rule>
where
    I: IntoIterator<Item = (&'a Rule, u64)>,
{
    candidates
        .into_iter()
        .filter(|(rule, _)| rule.pattern().path() == req.path)
        .filter(|(rule, _)| rule.pattern().is_satisfied_by(&req.query))
        .filter(|(rule, _)| match rule.form_data() {
            Some(expected) => expected == &req.body,
            None => true,
        })
        .max_by_key(|(rule, sequence)| Specificity {
            required_params: rule.pattern().specificity(),
            sequence: *sequence,
        })
        .map(|(rule, _)| rule)
}
