pub mod backend;
pub mod config;
pub mod continuation;
pub mod error;
pub mod logging;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod translate;

pub use backend::{Backend, ChunkStream, HttpBackend};
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use logging::SharedPromptLog;
pub use server::{build_router, AppState};
pub use translate::{convert, ConversionContext, ConversionKind, Protocol};
