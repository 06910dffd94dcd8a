//! Off-chat storage for finished artifacts

pub mod cloud;

pub use cloud::{CloudSettings, CloudUploader, HttpCloudUploader};
