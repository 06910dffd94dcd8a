//! Fetchgram - Telegram bot that downloads videos from links and sends them back
//!
//! A text message is classified as a supported link, fetched with yt-dlp,
//! compressed with ffmpeg when its size calls for it, and delivered to the
//! chat (or to a cloud upload target). Every local file is removed afterwards.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging, metrics, retry, and common utilities
//! - `download`: Classification, fetching, routing, the pipeline and its worker pool
//! - `conversion`: ffmpeg transcoding
//! - `storage`: Cloud upload target
//! - `telegram`: Telegram bot integration and handlers

pub mod cli;
pub mod conversion;
pub mod core;
pub mod download;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use crate::core::{config, AppError, AppResult, PipelineSettings};
pub use download::{DownloadQueue, Pipeline};
