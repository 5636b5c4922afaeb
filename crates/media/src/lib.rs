//! Media retrieval through `yt-dlp`.

pub mod download;
pub mod error;

pub use {
    download::{Downloader, MediaKind, download_media},
    error::{Error, Result},
};
