mod builder;
pub mod control;
pub mod executor;
mod handler;
pub mod matcher;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod server;
#[cfg(feature = "https")]
pub mod tls;

pub use builder::{
    default_cert_dir, DefaultStubServer, Error as BuilderError, StubServerBuilder, DEFAULT_DRAIN_TIMEOUT,
    DEFAULT_PORT,
};
pub use control::{Lifecycle, LifecycleTracker};
pub use executor::ActionExecutor;
pub use handler::{Error as HandlerError, Handler, StubHandler};
pub use matcher::{Specificity, StubRequest};
pub use registry::{RuleRegistry, RuleStore};
pub use server::{Error, StubServer, StubServerConfig};
