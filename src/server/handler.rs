use crate::{
    common::{
        data::ServerMessage,
        http::{full, ResponseBody},
    },
    server::{
        executor::{self, ActionExecutor},
        matcher::StubRequest,
        registry::RuleStore,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{header::CONTENT_TYPE, Method, Request, Response, StatusCode};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot execute rule for {0}: {1}")]
    ActionError(String, executor::Error),
    #[error("cannot serialize rules: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("cannot create response: {0}")]
    ResponseConstructionError(#[from] http::Error),
}

#[async_trait]
pub trait Handler {
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, Error>;
}

/// Answers every request from the live rule store: a matching rule is executed, `GET /rules`
/// reports the rule set and everything else gets a descriptive 404.
pub struct StubHandler<S>
where
    S: RuleStore + Send + Sync + 'static,
{
    rules: Arc<S>,
    executor: ActionExecutor,
}

impl<S> StubHandler<S>
where
    S: RuleStore + Send + Sync + 'static,
{
    pub fn new(rules: Arc<S>, executor: ActionExecutor) -> Self {
        Self { rules, executor }
    }

    fn rules_response(&self) -> Result<Response<ResponseBody>, Error> {
        let body = serde_json::to_vec(&ServerMessage::ack(self.rules.snapshot()))?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(full(body))?)
    }

    fn not_found_response(&self, req: &Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        let rules = serde_json::to_string_pretty(&ServerMessage::ack(self.rules.snapshot()))?;

        let body = format!(
            "Stub is configured using rules. \n\nRequest URL: \n\n {}\n\n The rules it knows about are: \n\n {}",
            req.uri(),
            rules
        );

        Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(full(body))?)
    }
}

#[async_trait]
impl<S> Handler for StubHandler<S>
where
    S: RuleStore + Send + Sync + 'static,
{
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<ResponseBody>, Error> {
        let stub_request = StubRequest::from_http(&req);

        if let Some(rule) = self.rules.find(&stub_request) {
            tracing::info!("applying rule {} to {} {}", rule.key(), req.method(), req.uri());
            return self
                .executor
                .execute(rule.action())
                .await
                .map_err(|err| Error::ActionError(rule.key(), err));
        }

        if req.method() == Method::GET && req.uri().path() == "/rules" {
            return self.rules_response();
        }

        tracing::debug!("no rule matches {} {}", req.method(), req.uri());
        self.not_found_response(&req)
    }
}
