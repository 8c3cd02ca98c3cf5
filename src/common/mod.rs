pub mod channel;
pub mod data;
pub mod http;
pub mod pattern;
pub mod rule;
pub mod runtime;
