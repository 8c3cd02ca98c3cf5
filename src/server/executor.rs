use crate::common::{
    http::{empty, full, Error as UpstreamError, ResponseBody, UpstreamClient},
    rule::Action,
};
use http::{
    header::{ACCEPT_RANGES, CONTENT_TYPE},
    HeaderMap, HeaderValue, Response, StatusCode, Uri,
};
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;

/// The error body rendered for `returnError` rules unless a template file is configured.
pub const DEFAULT_ERROR_TEMPLATE: &str = include_str!("../../responses/error-template.xml");

/// Placeholder in the error template that is replaced with the rule's error code.
pub const ERROR_CODE_PLACEHOLDER: &str = "error-code";

pub const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot serve file {0}: {1}")]
    ServeFile(PathBuf, std::io::Error),
    #[error("invalid HTTP status code {0}")]
    InvalidStatusCode(u16),
    #[error("invalid rewrite destination '{0}'")]
    InvalidRewriteUrl(String),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("cannot create response: {0}")]
    ResponseConstruction(#[from] http::Error),
}

/// Headers every stubbed response carries unless the action sets them itself.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers
}

/// Turns a matched rule's action into a response.
pub struct ActionExecutor {
    upstream: Arc<dyn UpstreamClient + Send + Sync>,
    error_template: String,
    default_headers: HeaderMap,
}

impl ActionExecutor {
    pub fn new(
        upstream: Arc<dyn UpstreamClient + Send + Sync>,
        error_template: String,
        default_headers: HeaderMap,
    ) -> Self {
        Self {
            upstream,
            error_template,
            default_headers,
        }
    }

    pub async fn execute(&self, action: &Action) -> Result<Response<ResponseBody>, Error> {
        let mut response = match action {
            Action::ServeFile(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|err| Error::ServeFile(path.clone(), err))?;

                Response::builder().status(StatusCode::OK).body(full(content))?
            }
            Action::ReturnSyntheticError(code) => {
                let body = self
                    .error_template
                    .replacen(ERROR_CODE_PLACEHOLDER, &code.to_string(), 1);

                Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                    .body(full(body))?
            }
            Action::ReturnHttpStatus(status) => {
                let status =
                    StatusCode::from_u16(*status).map_err(|_| Error::InvalidStatusCode(*status))?;

                Response::builder().status(status).body(empty())?
            }
            Action::RewriteTo(destination) => {
                let uri: Uri = destination
                    .parse()
                    .map_err(|_| Error::InvalidRewriteUrl(destination.clone()))?;
                if uri.scheme().is_none() || uri.authority().is_none() {
                    return Err(Error::InvalidRewriteUrl(destination.clone()));
                }

                self.upstream.get(uri).await?
            }
        };

        for (name, value) in &self.default_headers {
            if !response.headers().contains_key(name) {
                response.headers_mut().insert(name.clone(), value.clone());
            }
        }

        Ok(response)
    }
}
