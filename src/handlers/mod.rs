//! Job handlers and dispatch
//!
//! ## Key Components
//!
//! - [`JobHandler`] - Trait implemented by every media handler
//! - [`HandlerRegistry`] - Job type to handler map, built once at startup
//! - [`Dispatcher`] - Routes a decoded job to its handler
//! - [`MediaTools`] - Seam over yt-dlp/ffmpeg ([`ProcessTools`] in production)
//!
//! ## Example
//!
//! ```rust,ignore
//! use mediajobs::handlers::{Dispatcher, HandlerRegistry};
//!
//! let dispatcher = Dispatcher::new(HandlerRegistry::with_media_handlers(services));
//! let file = dispatcher.dispatch("op-1", "EXTRACT", params, 1).await?;
//! ```

mod download;
mod extract;
mod registry;
mod services;
pub mod tools;
mod traits;
mod transcode;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use download::DownloadHandler;
pub use extract::ExtractHandler;
pub use registry::{DispatchError, Dispatcher, HandlerRegistry};
pub use services::HandlerServices;
pub use tools::{MediaTools, ProcessTools, ToolError};
pub use traits::{HandlerError, JobHandler};
pub use transcode::TranscodeHandler;
pub use types::{ConvertParams, DownloadParams, ExtractParams, JobContext, SourceRef};
