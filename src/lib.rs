pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod proxy;
pub mod waf;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use pipeline::*;
pub use proxy::*;
pub use waf::*;
