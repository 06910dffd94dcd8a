//! Download management: classify, fetch, decide, deliver

pub mod artifact;
pub mod classifier;
pub mod decider;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod queue;
pub mod resolver;
pub mod send;
pub mod temp_files;
pub mod ytdlp;
pub mod ytdlp_errors;

// Re-exports for convenience
pub use artifact::{DownloadRequest, MediaArtifact, RequesterId};
pub use classifier::{Classification, UrlClassifier};
pub use decider::{decide, DeliveryRoute, SizeThresholds};
pub use pipeline::{DeliveryReport, Pipeline};
pub use queue::DownloadQueue;
pub use send::{ChatTransport, TelegramTransport};
pub use temp_files::TempFileSet;
