use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::model::Snapshot;

/// The on-disk snapshot. Every save rewrites the whole file.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    pub file_path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: &Path) -> Self {
        Self { file_path: path.to_path_buf() }
    }

    /// Missing file means an empty store.
    pub fn load(&self) -> Result<Snapshot> {
        let file = match File::open(&self.file_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.file_path.display(), "no snapshot found, starting empty");
                return Ok(Snapshot::default());
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))?;
        info!(
            path = %self.file_path.display(),
            records = snapshot.store.len(),
            buckets = snapshot.fingerprints.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Write to a sibling temp file, then rename over the target so a crash
    /// mid-write never leaves a truncated snapshot behind.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.tmp_path();
        let written = self
            .write_tmp(&tmp_path, snapshot)
            .and_then(|()| Ok(fs::rename(&tmp_path, &self.file_path)?));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        debug!(
            path = %self.file_path.display(),
            records = snapshot.store.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// `<file name>.tmp` beside the target, so `db.json` and `db.bak` never share one.
    fn tmp_path(&self) -> PathBuf {
        let mut name = self.file_path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".tmp");
        self.file_path.with_file_name(name)
    }

    fn write_tmp(&self, tmp_path: &Path, snapshot: &Snapshot) -> Result<()> {
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}
