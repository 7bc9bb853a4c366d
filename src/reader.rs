//! Asynchronous JSONL tail reader with file rotation detection

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

pub struct TailReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    poll_interval: Duration,
}

impl TailReader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            inode: None,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Open the file, positioned at the end when `from_end` is set
    pub async fn start(&mut self, from_end: bool) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;

        #[cfg(unix)]
        {
            self.inode = Some(file.metadata().await?.ino());
        }

        let mut reader = BufReader::new(file);
        if from_end {
            reader.seek(SeekFrom::End(0)).await?;
        }
        self.file = Some(reader);

        log::info!("📖 Started tailing: {}", self.path.display());
        Ok(())
    }

    /// Read the next non-empty line, waiting for more data if necessary
    pub async fn read_line(&mut self) -> std::io::Result<String> {
        loop {
            if self.detect_rotation().await? {
                log::info!("🔄 File rotation detected, reopening: {}", self.path.display());
                self.start(false).await?;
            }

            let Some(reader) = self.file.as_mut() else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "File not opened",
                ));
            };

            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                sleep(self.poll_interval).await;
                continue;
            }

            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }

    async fn detect_rotation(&mut self) -> std::io::Result<bool> {
        #[cfg(unix)]
        {
            let current_inode = match tokio::fs::metadata(&self.path).await {
                Ok(metadata) => metadata.ino(),
                // Rotated away and not yet recreated
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e),
            };
            Ok(self.inode.is_some_and(|old| old != current_inode))
        }

        #[cfg(not(unix))]
        {
            if let Some(ref mut file) = self.file {
                let current_pos = file.stream_position().await?;
                let metadata = tokio::fs::metadata(&self.path).await?;
                Ok(metadata.len() < current_pos)
            } else {
                Ok(false)
            }
        }
    }
}
