//! Zip-backed transient archive of committed window payloads

use super::{ArchiveError, Backend};
use crate::usage::UsageMap;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::io::{Read, Seek, SeekFrom, Write};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Outcome of looking up a window in the archive
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveLookup {
    Found(UsageMap),
    NotFound,
    /// The container or the entry exists but could not be read back
    Corrupt(String),
}

impl ArchiveLookup {
    pub fn into_usage(self) -> Option<UsageMap> {
        match self {
            ArchiveLookup::Found(usage) => Some(usage),
            ArchiveLookup::NotFound | ArchiveLookup::Corrupt(_) => None,
        }
    }
}

/// One month of committed windows for one identity.
///
/// Entries are write-once: adding a window whose key already exists is a no-op.
/// Single writer only.
pub struct TransientArchive<S> {
    name: String,
    stream: S,
}

fn calendar(timestamp: i64) -> Result<DateTime<Utc>, ArchiveError> {
    DateTime::from_timestamp(timestamp, 0).ok_or(ArchiveError::InvalidTimestamp(timestamp))
}

impl<S: Read + Write + Seek> TransientArchive<S> {
    /// Open (creating if absent) the container named `name`
    pub fn open<B>(backend: &B, name: &str) -> Result<Self, ArchiveError>
    where
        B: Backend<Stream = S>,
    {
        let stream = backend.open(name)?;
        log::debug!("📦 Opened archive container: {}", name);
        Ok(Self {
            name: name.to_string(),
            stream,
        })
    }

    /// Container holding `identity`'s windows for the month of `timestamp`
    pub fn container_name(identity: &str, timestamp: i64) -> Result<String, ArchiveError> {
        let dt = calendar(timestamp)?;
        Ok(format!("{}-{}-{:02}.zip", identity, dt.year(), dt.month()))
    }

    /// Entry key for the window starting at `timestamp`
    pub fn entry_name(timestamp: i64) -> Result<String, ArchiveError> {
        let dt = calendar(timestamp)?;
        Ok(format!(
            "{}-{:02}-{:02}-{}-{}.json",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute()
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_blank(&mut self) -> std::io::Result<bool> {
        Ok(self.stream.seek(SeekFrom::End(0))? == 0)
    }

    /// Keys of every entry stored so far
    pub fn entry_names(&mut self) -> Result<Vec<String>, ArchiveError> {
        if self.is_blank()? {
            return Ok(Vec::new());
        }
        let archive = ZipArchive::new(&mut self.stream)?;
        Ok(archive.file_names().map(str::to_string).collect())
    }

    pub fn contains(&mut self, key: &str) -> Result<bool, ArchiveError> {
        Ok(self.entry_names()?.iter().any(|name| name == key))
    }

    /// Store `usage` under the key derived from `window_start`.
    ///
    /// Returns `false` without touching the container when the key already exists.
    pub fn add(&mut self, window_start: i64, usage: &UsageMap) -> Result<bool, ArchiveError> {
        let key = Self::entry_name(window_start)?;
        if self.contains(&key)? {
            log::debug!("Archive entry {} already present in {}, skipping", key, self.name);
            return Ok(false);
        }

        let payload = serde_json::to_vec(usage)?;
        let options = SimpleFileOptions::default();

        if self.is_blank()? {
            self.stream.seek(SeekFrom::Start(0))?;
            let mut writer = ZipWriter::new(&mut self.stream);
            writer.start_file(key.as_str(), options)?;
            writer.write_all(&payload)?;
            writer.finish()?;
        } else {
            let mut writer = ZipWriter::new_append(&mut self.stream)?;
            writer.start_file(key.as_str(), options)?;
            writer.write_all(&payload)?;
            writer.finish()?;
        }
        self.stream.flush()?;

        log::debug!("📝 Archived {} ({} bytes) into {}", key, payload.len(), self.name);
        Ok(true)
    }

    /// Look up the window starting at `window_start`, telling missing and unreadable apart
    pub fn fetch(&mut self, window_start: i64) -> Result<ArchiveLookup, ArchiveError> {
        let key = Self::entry_name(window_start)?;
        Ok(self.read_entry(&key))
    }

    /// Lenient lookup: missing and unreadable entries both come back as `None`
    pub fn get(&mut self, window_start: i64) -> Result<Option<UsageMap>, ArchiveError> {
        let lookup = self.fetch(window_start)?;
        if let ArchiveLookup::Corrupt(reason) = &lookup {
            log::warn!(
                "Unreadable archive entry for window {} in {}: {}",
                window_start,
                self.name,
                reason
            );
        }
        Ok(lookup.into_usage())
    }

    fn read_entry(&mut self, key: &str) -> ArchiveLookup {
        match self.is_blank() {
            Ok(true) => return ArchiveLookup::NotFound,
            Ok(false) => {}
            Err(e) => return ArchiveLookup::Corrupt(e.to_string()),
        }

        let mut archive = match ZipArchive::new(&mut self.stream) {
            Ok(archive) => archive,
            Err(e) => return ArchiveLookup::Corrupt(e.to_string()),
        };

        let mut content = String::new();
        match archive.by_name(key) {
            Ok(mut file) => {
                if let Err(e) = file.read_to_string(&mut content) {
                    return ArchiveLookup::Corrupt(e.to_string());
                }
            }
            Err(zip::result::ZipError::FileNotFound) => return ArchiveLookup::NotFound,
            Err(e) => return ArchiveLookup::Corrupt(e.to_string()),
        }

        match serde_json::from_str(&content) {
            Ok(usage) => ArchiveLookup::Found(usage),
            Err(e) => ArchiveLookup::Corrupt(e.to_string()),
        }
    }
}
