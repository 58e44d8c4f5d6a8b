// SPDX-License-Identifier: MIT OR Apache-2.0
//! Size-based log rotation, mirroring Python's
//! `logging.handlers.RotatingFileHandler(maxBytes=..., backupCount=3)`.
//!
//! `tracing-appender`'s `rolling` module only rotates on a fixed time
//! interval (minutely/hourly/daily), not on size, so this is a small
//! hand-rolled equivalent rather than a dependency swap.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const BACKUP_COUNT: u32 = 3;

/// A file that rotates itself once it would exceed `max_bytes`, keeping up
/// to [`BACKUP_COUNT`] numbered backups (`path.1`, `path.2`, `path.3`),
/// oldest last.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    size: u64,
}

impl RotatingFile {
    /// Open (creating if necessary) the file at `path` for appending.
    pub fn open(path: impl AsRef<Path>, max_bytes: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            file,
            size,
        })
    }

    /// Append one line (a trailing `\n` is added), rotating first if the
    /// line would push the file past `max_bytes`.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let needed = line.len() as u64 + 1;
        if self.size > 0 && self.size + needed > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        self.size += needed;
        Ok(())
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        let oldest = self.backup_path(BACKUP_COUNT);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..BACKUP_COUNT).rev() {
            let src = self.backup_path(n);
            if src.exists() {
                fs::rename(&src, self.backup_path(n + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_accumulate_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let mut f = RotatingFile::open(&path, 1_000_000).unwrap();
        f.write_line("hello").unwrap();
        f.write_line("world").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "hello\nworld\n");
    }

    #[test]
    fn rotates_when_max_bytes_exceeded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let mut f = RotatingFile::open(&path, 10).unwrap();
        f.write_line("0123456789").unwrap();
        f.write_line("next").unwrap();
        assert!(dir.path().join("audit.log.1").exists());
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "next\n");
        let backup = fs::read_to_string(dir.path().join("audit.log.1")).unwrap();
        assert_eq!(backup, "0123456789\n");
    }

    #[test]
    fn keeps_only_backup_count_backups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let mut f = RotatingFile::open(&path, 5).unwrap();
        for i in 0..10 {
            f.write_line(&format!("line{i}")).unwrap();
        }
        assert!(dir.path().join("audit.log.1").exists());
        assert!(dir.path().join("audit.log.2").exists());
        assert!(dir.path().join("audit.log.3").exists());
        assert!(!dir.path().join("audit.log.4").exists());
    }

    #[test]
    fn reopening_an_existing_file_preserves_its_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        {
            let mut f = RotatingFile::open(&path, 1_000_000).unwrap();
            f.write_line("persisted").unwrap();
        }
        let mut f = RotatingFile::open(&path, 1_000_000).unwrap();
        f.write_line("appended").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "persisted\nappended\n");
    }
}
