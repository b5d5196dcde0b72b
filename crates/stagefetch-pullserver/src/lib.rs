//! stagefetch pull service - serves the intermediate output of finished
//! tasks to the tasks of the next stage.
//!
//! A request names a stage, a partition or key range, and one or more task
//! attempts; the service resolves each attempt to a byte range of a local
//! file ([`chunk`]) and streams the concatenation back ([`transfer`]).

pub mod app;
pub mod chunk;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod health;
pub mod layout;
pub mod meta;
pub mod metrics;
pub mod server;
pub mod service;
pub mod transfer;

pub use app::{AppIdentity, AppRegistry};
pub use chunk::FileChunk;
pub use config::PullServerConfig;
pub use error::{FetchError, PullError};
pub use fetcher::{FetchOutcome, Fetcher};
pub use layout::OutputLayout;
pub use meta::{deserialize_meta, serialize_meta};
pub use metrics::ShuffleMetrics;
pub use server::{ConnectionOptions, PullServer};
pub use service::{pull_router, ShuffleState};
