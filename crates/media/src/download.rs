use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use {
    serde::{Deserialize, Serialize},
    tokio::process::Command,
    tracing::{debug, info, warn},
};

use crate::error::{Context, Error, Result};

const YT_DLP: &str = "yt-dlp";
const EXT_PLACEHOLDER: &str = "%(ext)s";

/// Which stream to fetch. Both pick the smallest usable rendition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Audio,
    Video,
}

impl MediaKind {
    /// `yt-dlp -f` selector.
    pub fn format(self) -> &'static str {
        match self {
            Self::Audio => "worstaudio[ext=m4a]/worstaudio",
            Self::Video => "bv*[height<=144]+ba/bestvideo+bestaudio/best",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(Error::invalid_input(format!(
                "unknown media kind {other:?}, expected audio or video"
            ))),
        }
    }
}

/// A located `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct Downloader {
    program: PathBuf,
}

impl Downloader {
    /// Use `program` if given, otherwise search `PATH` for `yt-dlp`.
    pub fn locate(program: Option<&Path>) -> Result<Self> {
        let program = match program {
            Some(path) => path.to_path_buf(),
            None => which::which(YT_DLP).map_err(|source| Error::ToolNotFound {
                tool: YT_DLP.to_string(),
                source,
            })?,
        };
        debug!(program = %program.display(), "using yt-dlp");
        Ok(Self { program })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Download `url` to `template` and return the path of the written file.
    ///
    /// `template` is a `yt-dlp` output template such as
    /// `/tmp/downloads/clip.%(ext)s`. Its directory is created if missing. The
    /// result is the first file in that directory whose name starts with the
    /// template's file name minus the extension placeholder.
    pub async fn download(&self, url: &str, template: &Path, kind: MediaKind) -> Result<PathBuf> {
        if url.trim().is_empty() {
            return Err(Error::invalid_input("download url is empty"));
        }
        let (dir, prefix) = split_template(template)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating output directory {}", dir.display()))?;

        info!(url, kind = %kind, template = %template.display(), "downloading media");
        let output = Command::new(&self.program)
            .arg("--quiet")
            .arg("-f")
            .arg(kind.format())
            .arg("-o")
            .arg(template)
            .arg(url)
            .output()
            .await
            .map_err(|e| Error::external(format!("running {}", self.program.display()), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(url, status = %output.status, stderr = %stderr, "yt-dlp failed");
            return Err(Error::DownloadFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        let path = find_output(&dir, &prefix).await?;
        debug!(path = %path.display(), "media downloaded");
        Ok(path)
    }

    /// `yt-dlp --version` output.
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .map_err(|e| Error::external(format!("running {}", self.program.display()), e))?;
        if !output.status.success() {
            return Err(Error::DownloadFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Locate `yt-dlp` on `PATH` and download `url` to `template`.
pub async fn download_media(url: &str, template: &Path, kind: MediaKind) -> Result<PathBuf> {
    Downloader::locate(None)?
        .download(url, template, kind)
        .await
}

fn split_template(template: &Path) -> Result<(PathBuf, String)> {
    let name = template
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("output template {} has no file name", template.display()))?;
    let prefix = name.replace(EXT_PLACEHOLDER, "");
    if prefix.is_empty() {
        return Err(Error::invalid_input(format!(
            "output template {} has an empty base name",
            template.display()
        )));
    }
    let dir = match template.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, prefix))
}

async fn find_output(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            matches.push(entry.path());
        }
    }
    matches.sort();
    matches.into_iter().next().ok_or_else(|| Error::NoOutput {
        dir: dir.to_path_buf(),
        prefix: prefix.to_string(),
    })
}
