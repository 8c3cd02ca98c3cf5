//! `httpstub` is a programmable HTTP/HTTPS stub server for integration tests.
//!
//! A test harness (the *driver*) spawns one `httpstub` process per faked backend and
//! configures it over the process' stdin with newline-delimited JSON. Every configuration
//! message carries a set of *rules*, each binding a URL pattern to one action:
//!
//! * `serveFile`: reply with the contents of a file,
//! * `returnError`: reply with an XML error document carrying an API error code,
//! * `returnHttpError`: reply with a bare HTTP status code,
//! * `rewriteTo`: fetch another URL and stream its response back.
//!
//! The server acknowledges every message on stdout with the merged rule set, so the driver
//! knows when its configuration is live.
//!
//! Incoming requests are matched by exact path, then by required query parameters and an
//! optional required body. The rule requiring the most query parameters wins. Ties go to
//! the rule registered last.
//!
//! # Example
//! ```no_run
//! use httpstub::api::{Driver, DriverConfig, RuleBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Driver::new(DriverConfig::from_env().port(0));
//!
//! let stub = driver
//!     .stub()
//!     .configure(
//!         RuleBuilder::for_path("/basket/get")
//!             .with_parameters(vec![("basketId", "blah")])
//!             .responds_with_http_status(500)
//!             .build()?,
//!     )
//!     .run()
//!     .await?;
//!
//! let response = reqwest::get(stub.url("/basket/get?basketId=blah")).await?;
//! assert_eq!(response.status(), 500);
//! # Ok(())
//! # }
//! ```
pub mod api;
pub mod common;
pub mod server;

pub use api::{ConfigurationBatch, Driver, DriverConfig, Endpoint, RuleBuilder, StubHandle};
pub use common::{
    data::{ErrorCode, RuleDefinition, RuleSet},
    rule::{Action, Rule},
};
pub use server::{RuleRegistry, StubServer, StubServerBuilder};
