use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{Action, Event, Record};
use crate::{Error, Result};

const LOG_FILE: &str = "data.wal";
const COMPACT_EXTENSION: &str = "wal.compact";
const WRITE_BUFFER: usize = 64 * 1024;

/// File handle the log appends to.
pub(crate) trait Segment: Write + Send {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&self, len: u64) -> io::Result<()>;
    fn sync_data(&self) -> io::Result<()>;
    fn sync_all(&self) -> io::Result<()>;
}

impl Segment for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync_data(&self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }
}

/// Append-only event log backing the engine.
///
/// Lines go straight to the file, one `write` per event. An append that fails
/// part way is cut back off the file, so the log only ever holds whole lines
/// for events that were reported as written.
pub struct Wal {
    segment: Mutex<Option<Box<dyn Segment>>>,
    path: PathBuf,
    max_record_size: usize,
    sync_writes: bool,
}

impl Wal {
    pub fn open(dir: impl AsRef<Path>, max_record_size: usize, sync_writes: bool) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| Error::Open {
            path: dir.to_path_buf(),
            source,
        })?;
        let dir = fs::canonicalize(dir).map_err(|source| Error::Open {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(LOG_FILE);
        let file = open_append(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), "write-ahead log opened");

        Ok(Self {
            segment: Mutex::new(Some(Box::new(file))),
            path,
            max_record_size,
            sync_writes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays the whole log into the state it describes.
    ///
    /// Any malformed line aborts the replay; nothing is recovered from a log
    /// that cannot be read completely.
    pub fn read(&self) -> Result<HashMap<String, Record>> {
        let file = File::open(&self.path).map_err(|source| Error::Open {
            path: self.path.clone(),
            source,
        })?;
        let reader = BufReader::new(file);

        let mut snapshot = HashMap::new();
        let mut events = 0usize;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }

            let event: Event =
                serde_json::from_str(&line).map_err(|e| Error::Corruption {
                    line: index + 1,
                    reason: e.to_string(),
                })?;

            match event.action {
                Action::Set => {
                    snapshot.insert(event.record.key.clone(), event.record);
                }
                Action::Delete => {
                    snapshot.remove(&event.record.key);
                }
            }
            events += 1;
        }

        debug!(events, records = snapshot.len(), "write-ahead log replayed");
        Ok(snapshot)
    }

    pub async fn write(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        if line.len() > self.max_record_size {
            return Err(Error::RecordTooLarge {
                size: line.len(),
                max: self.max_record_size,
            });
        }

        let mut guard = self.segment.lock().await;
        let segment = guard.as_mut().ok_or(Error::Closed)?;
        let size = segment.size()?;

        if let Err(e) = append(segment.as_mut(), &line, self.sync_writes) {
            match segment.truncate(size) {
                Ok(()) => warn!(error = %e, "append failed, log rolled back"),
                Err(rollback) => {
                    // the tail is unknown from here on; refuse further appends
                    error!(error = %rollback, "failed append could not be rolled back, closing log");
                    *guard = None;
                }
            }
            return Err(e.into());
        }

        Ok(())
    }

    /// Rewrites the log so that it holds one set event per live record.
    ///
    /// The new log is written beside the old one and renamed over it. The
    /// handle used to write it becomes the append handle.
    pub async fn compact<'a, I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut guard = self.segment.lock().await;
        if guard.is_none() {
            return Err(Error::Closed);
        }

        let temp_path = self.path.with_extension(COMPACT_EXTENSION);
        match fs::remove_file(&temp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&temp_path)?;

        let mut kept = 0usize;
        {
            let mut writer = BufWriter::with_capacity(WRITE_BUFFER, &file);
            for record in records {
                serde_json::to_writer(&mut writer, &Event::set(record.clone()))?;
                writer.write_all(b"\n")?;
                kept += 1;
            }
            writer.flush()?;
        }
        file.sync_all()?;

        fs::rename(&temp_path, &self.path)?;
        *guard = Some(Box::new(file));

        if let Some(dir) = self.path.parent() {
            File::open(dir)?.sync_all()?;
        }

        info!(records = kept, "write-ahead log compacted");
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        let mut guard = self.segment.lock().await;
        if let Some(mut segment) = guard.take() {
            segment.flush()?;
            segment.sync_all()?;
            debug!(path = %self.path.display(), "write-ahead log closed");
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn replace_segment(&self, segment: Box<dyn Segment>) {
        *self.segment.lock().await = Some(segment);
    }
}

fn append(segment: &mut dyn Segment, line: &[u8], sync: bool) -> io::Result<()> {
    segment.write_all(line)?;
    segment.flush()?;
    if sync {
        segment.sync_data()?;
    }
    Ok(())
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
