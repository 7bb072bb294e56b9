//! External media tools (yt-dlp, ffmpeg) behind the [`MediaTools`] seam

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ToolsConfig;

/// Output template: the platform's media id names the file
const DOWNLOAD_TEMPLATE: &str = "%(id)s.%(ext)s";

/// Leftovers of an interrupted or in-progress yt-dlp run
const PARTIAL_SUFFIXES: [&str; 3] = [".part", ".ytdl", ".temp"];

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} produced no output file in {dir}")]
    MissingOutput { tool: String, dir: PathBuf },
}

/// Media operations a handler can ask for
///
/// All paths live inside the handler's scratch directory.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Download the media behind `url` into `dir`, returning the produced file
    async fn download(
        &self,
        url: &str,
        format: Option<&str>,
        dir: &Path,
    ) -> Result<PathBuf, ToolError>;

    /// Re-encode `input` into `output`; the container follows the output extension
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), ToolError>;

    /// Write the audio track of `input` to `output`
    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), ToolError>;
}

/// [`MediaTools`] backed by the yt-dlp and ffmpeg binaries
#[derive(Debug, Clone)]
pub struct ProcessTools {
    ffmpeg: String,
    yt_dlp: String,
    proxy: Option<String>,
}

impl ProcessTools {
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            yt_dlp: config.yt_dlp.clone(),
            proxy: config.proxy.clone(),
        }
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<(), ToolError> {
        debug!(program, ?args, "Running media tool");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                tool: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::Failed {
                tool: program.to_string(),
                status: output.status.to_string(),
                stderr: tail(&stderr, 2000),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl MediaTools for ProcessTools {
    async fn download(
        &self,
        url: &str,
        format: Option<&str>,
        dir: &Path,
    ) -> Result<PathBuf, ToolError> {
        let args = yt_dlp_args(url, format, self.proxy.as_deref(), dir);
        self.run(&self.yt_dlp, &args).await?;

        let produced = find_download(dir).await.ok_or_else(|| ToolError::MissingOutput {
            tool: self.yt_dlp.clone(),
            dir: dir.to_path_buf(),
        })?;
        info!(url, file = %produced.display(), "Media downloaded");
        Ok(produced)
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        self.run(&self.ffmpeg, &ffmpeg_args(input, output, &[]))
            .await
    }

    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        let format = output
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        let mut extra = vec!["-vn".to_string()];
        if let Some(codec) = audio_codec(format) {
            extra.push("-c:a".to_string());
            extra.push(codec.to_string());
        }

        self.run(&self.ffmpeg, &ffmpeg_args(input, output, &extra))
            .await
    }
}

/// `ffmpeg -y -v error -i <input> [extra..] <output>`
pub fn ffmpeg_args(input: &Path, output: &Path, extra: &[String]) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
    ];
    args.extend(extra.iter().cloned());
    args.push(output.to_string_lossy().to_string());
    args
}

pub fn yt_dlp_args(url: &str, format: Option<&str>, proxy: Option<&str>, dir: &Path) -> Vec<String> {
    let template = dir.join(DOWNLOAD_TEMPLATE);
    let mut args = vec![
        "--no-playlist".to_string(),
        "--no-progress".to_string(),
        "-o".to_string(),
        template.to_string_lossy().to_string(),
    ];

    if let Some(format) = format {
        args.push("-f".to_string());
        args.push(format.to_string());
    }
    if let Some(proxy) = proxy {
        args.push("--proxy".to_string());
        args.push(proxy.to_string());
    }

    args.push(url.to_string());
    args
}

fn audio_codec(format: &str) -> Option<&'static str> {
    match format {
        "mp3" => Some("libmp3lame"),
        "m4a" | "aac" => Some("aac"),
        "wav" => Some("pcm_s16le"),
        "ogg" => Some("libvorbis"),
        "opus" => Some("libopus"),
        "flac" => Some("flac"),
        _ => None,
    }
}

async fn find_download(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let partial = PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix));
        if !partial && !name.starts_with('.') && entry.file_type().await.is_ok_and(|t| t.is_file()) {
            return Some(entry.path());
        }
    }
    None
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    text.chars()
        .skip(count.saturating_sub(max_chars))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ffmpeg_args_order() {
        let args = ffmpeg_args(
            Path::new("/tmp/in.mp4"),
            Path::new("/tmp/out.mp3"),
            &["-vn".to_string()],
        );
        assert_eq!(
            args,
            vec!["-y", "-v", "error", "-i", "/tmp/in.mp4", "-vn", "/tmp/out.mp3"]
        );
    }

    #[test]
    fn test_yt_dlp_args() {
        let args = yt_dlp_args(
            "https://youtube.com/watch?v=x",
            Some("mp4"),
            Some("http://proxy:8080"),
            Path::new("/scratch"),
        );

        assert_eq!(args[2], "-o");
        assert_eq!(args[3], "/scratch/%(id)s.%(ext)s");
        assert!(args.windows(2).any(|w| w == ["-f", "mp4"]));
        assert!(args.windows(2).any(|w| w == ["--proxy", "http://proxy:8080"]));
        assert_eq!(args.last().unwrap(), "https://youtube.com/watch?v=x");
    }

    #[test]
    fn test_audio_codecs() {
        assert_eq!(audio_codec("mp3"), Some("libmp3lame"));
        assert_eq!(audio_codec("xyz"), None);
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail(" short ", 100), "short");
    }

    #[tokio::test]
    async fn test_find_download_skips_partials() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("dQw4w9WgXcQ.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("dQw4w9WgXcQ.mp4.ytdl"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("fragments")).unwrap();
        assert!(find_download(dir.path()).await.is_none());

        std::fs::write(dir.path().join("dQw4w9WgXcQ.webm"), b"x").unwrap();
        assert_eq!(
            find_download(dir.path()).await.unwrap(),
            dir.path().join("dQw4w9WgXcQ.webm")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let tools = ProcessTools {
            ffmpeg: "mediajobs-no-such-ffmpeg".to_string(),
            yt_dlp: "mediajobs-no-such-yt-dlp".to_string(),
            proxy: None,
        };
        let dir = TempDir::new().unwrap();

        let err = tools
            .transcode(&dir.path().join("a.mp4"), &dir.path().join("b.webm"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
