//! Mirror shared-link folders into local directories.
//!
//! Each file is compared by exact modification time: a local file whose
//! last-write time equals the remote `server_modified` is left alone,
//! anything else is downloaded again. Downloads go to a temporary file in
//! the destination directory and are renamed into place, so an interrupted
//! download never replaces a good file.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::client::RemoteSource;
use crate::error::{Result, SyncError};
use crate::links::safe_component;
use crate::models::{format_size, Entry, FileEntry};

/// What happened to a single remote entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Local copy already has the remote timestamp.
    Unchanged,
    /// Content fetched and written.
    Downloaded { bytes: u64 },
    /// The provider returned no bytes; the local file was left alone.
    Empty,
    /// Not a file.
    NotAFile,
}

/// Summary for one shared link.
#[derive(Debug, Clone, Default)]
pub struct LinkReport {
    pub link: String,
    pub name: String,
    pub local_dir: PathBuf,
    pub downloaded: usize,
    pub unchanged: usize,
    pub empty: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl LinkReport {
    fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Unchanged => self.unchanged += 1,
            EntryOutcome::Downloaded { bytes } => {
                self.downloaded += 1;
                self.bytes += bytes;
            }
            EntryOutcome::Empty => self.empty += 1,
            EntryOutcome::NotAFile => {}
        }
    }
}

impl fmt::Display for LinkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} downloaded ({}), {} unchanged, {} empty, {} failed -> {}",
            self.name,
            self.downloaded,
            format_size(self.bytes),
            self.unchanged,
            self.empty,
            self.failed,
            self.local_dir.display()
        )
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub links: Vec<LinkReport>,
    pub failed_links: Vec<String>,
}

impl SyncReport {
    pub fn failed_entries(&self) -> usize {
        self.links.iter().map(|l| l.failed).sum()
    }
}

/// Mirrors shared links below a documents root.
pub struct SyncDriver<R> {
    remote: R,
    documents_root: PathBuf,
}

impl<R: RemoteSource> SyncDriver<R> {
    pub fn new(remote: R, documents_root: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            documents_root: documents_root.into(),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Sync every link in order. A failing link is logged and skipped.
    pub async fn sync_all(&self, links: &[String]) -> SyncReport {
        let mut report = SyncReport::default();

        for link in links {
            match self.sync_link(link).await {
                Ok(link_report) => {
                    info!("Download complete: {}", link_report.name);
                    report.links.push(link_report);
                }
                Err(e) => {
                    error!(category = ?e.category(), "Failed to sync shared link {}: {}", link, e);
                    report.failed_links.push(link.clone());
                }
            }
        }

        report
    }

    /// Sync one shared link. Per-entry failures are logged and counted.
    pub async fn sync_link(&self, link: &str) -> Result<LinkReport> {
        let metadata = self.remote.shared_link_metadata(link).await?;
        if !metadata.is_folder() {
            return Err(SyncError::InvalidSharedLink(format!(
                "{} is a {}, not a folder",
                link, metadata.tag
            )));
        }
        info!("Shared link name: {}", metadata.name);

        let local_dir = self.documents_root.join(safe_component(&metadata.name)?);
        fs::create_dir_all(&local_dir)?;
        info!("Shared link local folder: {}", local_dir.display());

        let entries = self.remote.list_entries(link).await?;
        debug!("{} entries in {}", entries.len(), metadata.name);

        let mut report = LinkReport {
            link: link.to_string(),
            name: metadata.name.clone(),
            local_dir: local_dir.clone(),
            ..LinkReport::default()
        };

        for entry in &entries {
            let name = entry.name().unwrap_or("<unnamed>");
            info!("Processing: {}", name);

            match self.sync_entry(link, &local_dir, entry).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    error!("Failed during download of {}: {}", name, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Bring one entry up to date inside `local_dir`.
    pub async fn sync_entry(&self, link: &str, local_dir: &Path, entry: &Entry) -> Result<EntryOutcome> {
        let file = match entry {
            Entry::File(file) => file,
            Entry::Folder(folder) => {
                debug!("Skipping folder: {}", folder.name);
                return Ok(EntryOutcome::NotAFile);
            }
            Entry::Other => {
                debug!("Skipping entry of unknown type");
                return Ok(EntryOutcome::NotAFile);
            }
        };

        let local_path = local_dir.join(safe_component(&file.name)?);

        if let Some(local_modified) = last_write_time(&local_path)? {
            debug!("  Checking {} with {}", file.server_modified, local_modified);
            if local_modified == file.server_modified {
                info!("  Skipping unchanged file: {}", file.name);
                return Ok(EntryOutcome::Unchanged);
            }
        }

        self.download_to(link, local_dir, &local_path, file).await
    }

    async fn download_to(
        &self,
        link: &str,
        local_dir: &Path,
        local_path: &Path,
        file: &FileEntry,
    ) -> Result<EntryOutcome> {
        info!("  Downloading: {}", file.name);

        let tmp = NamedTempFile::new_in(local_dir)?;
        let mut sink = tokio::fs::File::from_std(tmp.as_file().try_clone()?);

        let remote_path = format!("/{}", file.name);
        let written = self.remote.download(link, &remote_path, &mut sink).await?;
        sink.flush().await?;
        drop(sink);

        if written == 0 {
            warn!("No bytes downloaded for {}; keeping existing file", file.name);
            return Ok(EntryOutcome::Empty);
        }

        set_timestamps(tmp.as_file(), tmp.path(), file.server_modified)?;
        tmp.persist(local_path)?;

        debug!("  Wrote {} ({})", local_path.display(), format_size(written));
        Ok(EntryOutcome::Downloaded { bytes: written })
    }
}

/// Last-write time of a local file in UTC, or `None` if it does not exist.
pub fn last_write_time(path: &Path) -> Result<Option<DateTime<Utc>>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_file() {
        return Err(SyncError::IoError(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a file", path.display()),
        )));
    }

    let mtime = FileTime::from_last_modification_time(&metadata);
    Ok(DateTime::from_timestamp(mtime.unix_seconds(), mtime.nanoseconds()))
}

/// Set access and modification times (and creation time where the platform
/// supports it) to `timestamp`.
fn set_timestamps(file: &fs::File, path: &Path, timestamp: DateTime<Utc>) -> Result<()> {
    let ft = FileTime::from_unix_time(timestamp.timestamp(), timestamp.timestamp_subsec_nanos());
    filetime::set_file_times(path, ft, ft)?;

    #[cfg(windows)]
    {
        use std::os::windows::fs::FileTimesExt;
        let created = std::time::SystemTime::from(timestamp);
        file.set_times(fs::FileTimes::new().set_created(created))?;
    }
    #[cfg(not(windows))]
    let _ = file;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_last_write_time_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(last_write_time(&dir.path().join("nope")).unwrap(), None);
    }

    #[test]
    fn test_set_timestamps_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"data").unwrap();

        let when = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        set_timestamps(&file, &path, when).unwrap();

        assert_eq!(last_write_time(&path).unwrap(), Some(when));
    }

    #[test]
    fn test_last_write_time_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(last_write_time(dir.path()).is_err());
    }

    #[test]
    fn test_link_report_records_outcomes() {
        let mut report = LinkReport::default();
        report.record(&EntryOutcome::Downloaded { bytes: 10 });
        report.record(&EntryOutcome::Downloaded { bytes: 5 });
        report.record(&EntryOutcome::Unchanged);
        report.record(&EntryOutcome::Empty);
        report.record(&EntryOutcome::NotAFile);

        assert_eq!(report.downloaded, 2);
        assert_eq!(report.bytes, 15);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.empty, 1);
        assert_eq!(report.failed, 0);
    }
}
