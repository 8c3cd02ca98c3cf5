use crate::common::{
    data::{Error, ErrorCode, RuleDefinition},
    pattern::UrlPattern,
};
use serde_json::Value;
use std::path::PathBuf;

/// What a stub server does with a request that matched a rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Replay the contents of a file verbatim.
    ServeFile(PathBuf),
    /// Render the XML error template with the given API error code.
    ReturnSyntheticError(ErrorCode),
    /// Respond with a bare status code and no body.
    ReturnHttpStatus(u16),
    /// Fetch the given URL and stream its response back to the caller.
    RewriteTo(String),
}

/// A URL pattern bound to exactly one action, optionally restricted to requests whose
/// parsed body equals `form_data`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pattern: UrlPattern,
    action: Action,
    form_data: Option<Value>,
}

impl Rule {
    pub fn new(pattern: UrlPattern, action: Action) -> Self {
        Self {
            pattern,
            action,
            form_data: None,
        }
    }

    pub fn with_form_data(mut self, form_data: Option<Value>) -> Self {
        self.form_data = form_data;
        self
    }

    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn form_data(&self) -> Option<&Value> {
        self.form_data.as_ref()
    }

    pub fn key(&self) -> String {
        self.pattern.key()
    }

    /// Converts a wire definition into a rule. When a definition carries several action
    /// keys, `rewriteTo` wins over `returnError`, which wins over `returnHttpError`, which
    /// wins over `serveFile`.
    pub fn from_definition(url: &str, definition: RuleDefinition) -> Result<Self, Error> {
        let action = if let Some(destination) = definition.rewrite_to {
            Action::RewriteTo(destination)
        } else if let Some(code) = definition.return_error {
            Action::ReturnSyntheticError(code)
        } else if let Some(status) = definition.return_http_error {
            if http::StatusCode::from_u16(status).is_err() {
                return Err(Error::InvalidStatusCode(url.to_string(), status));
            }
            Action::ReturnHttpStatus(status)
        } else if let Some(path) = definition.serve_file {
            Action::ServeFile(PathBuf::from(path))
        } else {
            return Err(Error::MissingAction(url.to_string()));
        };

        Ok(Rule::new(UrlPattern::parse(url), action).with_form_data(definition.form_data))
    }

    pub fn to_definition(&self) -> RuleDefinition {
        let mut definition = RuleDefinition {
            form_data: self.form_data.clone(),
            ..Default::default()
        };

        match &self.action {
            Action::ServeFile(path) => {
                definition.serve_file = Some(path.to_string_lossy().into_owned())
            }
            Action::ReturnSyntheticError(code) => definition.return_error = Some(code.clone()),
            Action::ReturnHttpStatus(status) => definition.return_http_error = Some(*status),
            Action::RewriteTo(url) => definition.rewrite_to = Some(url.clone()),
        }

        definition
    }
}
