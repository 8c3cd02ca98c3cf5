use crate::{
    api::Error,
    common::{
        data::{ControlMessage, ErrorCode, RuleSet},
        pattern::{apply_slugs, encode_query, format_path, UrlPattern},
        rule::{Action, Rule},
    },
};
use serde_json::Value;
use std::path::PathBuf;

/// An API endpoint in `/prefix/resource/action` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub prefix: Option<String>,
    pub resource: String,
    pub action: String,
}

impl Endpoint {
    pub fn new<R: Into<String>, A: Into<String>>(resource: R, action: A) -> Self {
        Self {
            prefix: None,
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn path(&self) -> String {
        format_path(self.prefix.as_deref(), &self.resource, &self.action)
    }
}

/// Assembles a [`Rule`] step by step.
///
/// ```
/// use httpstub::api::{Endpoint, RuleBuilder};
///
/// let rule = RuleBuilder::for_endpoint(&Endpoint::new("basket", "get"))
///     .with_parameters(vec![("basketId", "blah")])
///     .responds_with_http_status(500)
///     .build()
///     .unwrap();
///
/// assert_eq!(rule.key(), "/basket/get?basketId=blah");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuleBuilder {
    path: String,
    parameters: Vec<(String, String)>,
    slugs: Vec<(String, String)>,
    form_data: Option<Value>,
    action: Option<Action>,
}

impl RuleBuilder {
    pub fn for_path<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn for_endpoint(endpoint: &Endpoint) -> Self {
        Self::for_path(endpoint.path())
    }

    /// Query parameters a request must carry, in addition to any already present in the
    /// path.
    pub fn with_parameters<I, K, V>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters
            .extend(parameters.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Restricts the rule to requests whose parsed body equals `form_data`.
    pub fn with_form_data(mut self, form_data: Value) -> Self {
        self.form_data = Some(form_data);
        self
    }

    /// Values for `:name` placeholders in the path.
    pub fn with_slugs<I, K, V>(mut self, slugs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.slugs
            .extend(slugs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn responds_with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.action = Some(Action::ServeFile(path.into()));
        self
    }

    pub fn responds_with_error_code<C: Into<ErrorCode>>(mut self, code: C) -> Self {
        self.action = Some(Action::ReturnSyntheticError(code.into()));
        self
    }

    pub fn responds_with_http_status(mut self, status: u16) -> Self {
        self.action = Some(Action::ReturnHttpStatus(status));
        self
    }

    pub fn rewrites_to<S: Into<String>>(mut self, url: S) -> Self {
        self.action = Some(Action::RewriteTo(url.into()));
        self
    }

    /// The pattern URL this rule registers: slugs substituted, parameters appended.
    pub fn url(&self) -> String {
        let path = apply_slugs(&self.path, self.slugs.iter().map(|(k, v)| (k, v)));

        if self.parameters.is_empty() {
            return path;
        }

        let separator = if path.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}",
            path,
            separator,
            encode_query(self.parameters.iter().map(|(k, v)| (k, v)))
        )
    }

    pub fn build(self) -> Result<Rule, Error> {
        let url = self.url();

        let action = match self.action {
            None => return Err(Error::MissingAction(url)),
            Some(action) => action,
        };

        match &action {
            Action::ServeFile(path) if path.as_os_str().is_empty() => {
                return Err(Error::EmptyFilePath(url));
            }
            Action::ReturnHttpStatus(status) if http::StatusCode::from_u16(*status).is_err() => {
                return Err(Error::InvalidStatusCode(url, *status));
            }
            Action::RewriteTo(destination) => {
                let parsed = url::Url::parse(destination)
                    .map_err(|err| Error::InvalidRewriteUrl(destination.clone(), err.to_string()))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(Error::InvalidRewriteUrl(
                        destination.clone(),
                        format!("unsupported scheme '{}'", parsed.scheme()),
                    ));
                }
            }
            _ => {}
        }

        Ok(Rule::new(UrlPattern::parse(&url), action).with_form_data(self.form_data))
    }
}

/// Rules that are sent to a stub server in a single control message and acknowledged
/// together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationBatch {
    rules: Vec<Rule>,
}

impl ConfigurationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Builds every rule and collects them into a batch. Fails on the first invalid rule.
    pub fn from_builders<I>(builders: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = RuleBuilder>,
    {
        builders.into_iter().map(RuleBuilder::build).collect()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn to_rule_set(&self) -> RuleSet {
        let mut rule_set = RuleSet::new();
        for rule in &self.rules {
            rule_set.insert(rule.key(), rule.to_definition());
        }
        rule_set
    }

    pub fn to_message(&self) -> ControlMessage {
        ControlMessage::configure(self.to_rule_set())
    }
}

impl From<Rule> for ConfigurationBatch {
    fn from(rule: Rule) -> Self {
        Self { rules: vec![rule] }
    }
}

impl From<Vec<Rule>> for ConfigurationBatch {
    fn from(rules: Vec<Rule>) -> Self {
        Self { rules }
    }
}

impl FromIterator<Rule> for ConfigurationBatch {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}
