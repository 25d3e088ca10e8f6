//! Append-only JSON-lines vote store
//!
//! Every saved row is appended as one line and flushed before `save`
//! returns. Loading replays the whole file; lines that fail to parse are
//! logged and skipped so a torn final write cannot block startup. A torn
//! write is terminated with a newline before the next row is appended, so
//! it never swallows a later vote.

use crate::{latest_rows, Result, VoteRow, VoteStore};
use fvr_core::LocaleId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File-backed vote store
pub struct JsonlVoteStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonlVoteStore {
    /// Open a store, creating the file and its parent directories if needed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().read(true).create(true).append(true).open(&path)?;
        if terminate_partial_line(&mut file)? {
            warn!(file = %path.display(), "Terminated a torn final vote row");
        }

        Ok(Self {
            path,
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every well-formed row in file order
    pub fn read_all(&self) -> Result<Vec<VoteRow>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut rows = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<VoteRow>(&line) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(
                    file = %self.path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping corrupt vote row"
                ),
            }
        }

        Ok(rows)
    }

    /// Rewrite the file keeping only the latest row per user and path.
    ///
    /// The new content is written to a temporary file in the same directory
    /// and renamed over the old one.
    pub fn compact(&self) -> Result<usize> {
        let _guard = self.writer.lock();
        let before = self.read_all()?;
        let current = latest_rows(before.iter().cloned());

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            for row in &current {
                serde_json::to_writer(&mut out, row)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!(
            file = %self.path.display(),
            before = before.len(),
            after = current.len(),
            "Compacted vote log"
        );
        Ok(current.len())
    }
}

impl VoteStore for JsonlVoteStore {
    fn save(&self, row: &VoteRow) -> Result<()> {
        let mut line = serde_json::to_vec(row)?;
        line.push(b'\n');

        let _guard = self.writer.lock();
        let mut file = OpenOptions::new().read(true).create(true).append(true).open(&self.path)?;
        if terminate_partial_line(&mut file)? {
            warn!(file = %self.path.display(), "Terminated a torn vote row before appending");
        }
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn load_locale(&self, locale: &LocaleId) -> Result<Vec<VoteRow>> {
        let rows = self.read_all()?;
        Ok(latest_rows(rows.into_iter().filter(|r| &r.locale == locale)))
    }

    fn locales(&self) -> Result<Vec<LocaleId>> {
        let locales: BTreeSet<LocaleId> = self.read_all()?.into_iter().map(|r| r.locale).collect();
        Ok(locales.into_iter().collect())
    }
}

/// Append a newline when the file does not end with one.
///
/// Returns whether the file was repaired. The file must be open for reading
/// and appending.
fn terminate_partial_line(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(false);
    }
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(true)
}
