//! Per-channel append log on disk.
//!
//! One file per channel ID under `dir`, one video ID per line. `add` appends
//! and then rewrites the file with only the newest `per_channel` lines.
//! The rewrite is not crash-atomic: a crash between read and write can lose
//! the log for that channel, which only costs a spurious UPLOAD later.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{VideoHistory, DEFAULT_PER_CHANNEL};
use crate::model::{validate_channel_id, Channel, Video};

#[derive(Debug)]
pub struct FileHistory {
    dir: PathBuf,
    per_channel: usize,
    // serializes append+truncate across concurrent deliveries
    write_lock: Mutex<()>,
}

impl FileHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_limit(dir, DEFAULT_PER_CHANNEL)
    }

    pub fn with_limit(dir: impl Into<PathBuf>, per_channel: usize) -> Self {
        Self {
            dir: dir.into(),
            per_channel: per_channel.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn per_channel(&self) -> usize {
        self.per_channel
    }

    /// Location of the log for `channel`.
    pub fn path_for(&self, channel: &Channel) -> io::Result<PathBuf> {
        validate_channel_id(&channel.id)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        Ok(self.dir.join(&channel.id))
    }

    /// Keep only the newest `per_channel` lines. Missing file is a no-op.
    pub async fn truncate(&self, channel: &Channel) -> io::Result<()> {
        let path = self.path_for(channel)?;
        let content = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() <= self.per_channel {
            return Ok(());
        }

        let keep = &lines[lines.len() - self.per_channel..];
        let mut out = keep.join("\n");
        out.push('\n');
        fs::write(&path, out).await
    }
}

#[async_trait]
impl VideoHistory for FileHistory {
    async fn has(&self, video: &Video) -> io::Result<bool> {
        let path = self.path_for(&video.channel)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content.lines().any(|l| l.trim() == video.id)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn add(&self, video: &Video) -> io::Result<()> {
        let path = self.path_for(&video.channel)?;
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(&self.dir).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        tracing::debug!(video_id = %video.id, channel_id = %video.channel.id, "adding video to history");
        file.write_all(format!("{}\n", video.id).as_bytes()).await?;
        file.flush().await?;
        drop(file);

        self.truncate(&video.channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    const NUM_VIDEOS: usize = 100;

    #[tokio::test]
    async fn has_reads_existing_log() {
        let tmp = tempfile::tempdir().unwrap();
        let h = FileHistory::with_limit(tmp.path(), NUM_VIDEOS);
        let v = fixtures::video("mock_video_id", "mock_channel_id", true);

        assert!(!h.has(&v).await.unwrap());
        std::fs::write(h.path_for(&v.channel).unwrap(), &v.id).unwrap();
        assert!(h.has(&v).await.unwrap());

        let other = fixtures::video("-1", "mock_channel_id", true);
        assert!(!h.has(&other).await.unwrap());
    }

    #[tokio::test]
    async fn truncate_keeps_newest_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let h = FileHistory::with_limit(tmp.path(), NUM_VIDEOS);
        let ch = fixtures::channel("c1");

        // no file yet
        h.truncate(&ch).await.unwrap();

        let body: String = (0..NUM_VIDEOS + 5).map(|i| format!("{i}\n")).collect();
        std::fs::write(h.path_for(&ch).unwrap(), body).unwrap();
        h.truncate(&ch).await.unwrap();

        let content = std::fs::read_to_string(h.path_for(&ch).unwrap()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), NUM_VIDEOS);
        assert_eq!(lines[0], "5");
        assert_eq!(*lines.last().unwrap(), (NUM_VIDEOS + 4).to_string());
    }

    #[tokio::test]
    async fn add_appends_and_bounds_the_log() {
        let tmp = tempfile::tempdir().unwrap();
        let h = FileHistory::with_limit(tmp.path().join("nested"), NUM_VIDEOS);
        let v = fixtures::video("vid", "c1", true);

        h.add(&v).await.unwrap();
        let path = h.path_for(&v.channel).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "vid");

        for _ in 0..NUM_VIDEOS + 5 {
            h.add(&v).await.unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), NUM_VIDEOS);
        assert!(h.has(&v).await.unwrap());
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let h = FileHistory::new(tmp.path());
        h.add(&fixtures::video("v", "a", true)).await.unwrap();
        assert!(!h.has(&fixtures::video("v", "b", true)).await.unwrap());
    }

    #[tokio::test]
    async fn path_traversal_channel_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let h = FileHistory::new(tmp.path());
        let v = fixtures::video("v", "../escape", true);
        let err = h.add(&v).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
