//! Storage backend handing out create-if-missing byte streams by name

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

/// Factory for named, random-access byte streams.
///
/// Opening never truncates: an existing stream keeps its content and a
/// missing one is created empty.
pub trait Backend {
    type Stream: Read + Write + Seek;

    fn open(&self, name: &str) -> io::Result<Self::Stream>;

    /// Whether a stream named `name` already exists, without creating it
    fn exists(&self, name: &str) -> io::Result<bool>;
}

/// Backend storing each stream as a file under a root directory
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to create data directory {}: {}", root.display(), e),
            )
        })?;
        Ok(Self { root })
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Backend for FsBackend {
    type Stream = File;

    fn open(&self, name: &str) -> io::Result<File> {
        check_name(name)?;
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path_for(name))
    }

    fn exists(&self, name: &str) -> io::Result<bool> {
        check_name(name)?;
        self.path_for(name).try_exists()
    }
}

fn check_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid stream name: {:?}", name),
        ));
    }
    Ok(())
}
