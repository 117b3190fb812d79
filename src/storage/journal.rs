//! JSONL-based journal storage backend.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;

use super::memory::{heartbeat_in_place, reserve_in_place};
use super::{MemoryStorage, Storage, check_was, transition};
use crate::error::{Error, Result};
use crate::trial::{Trial, TrialResult, TrialStatus};

/// Journals longer than this are compacted once most of their lines are
/// superseded snapshots.
const COMPACT_MIN_LINES: usize = 256;

/// A storage backend that journals trial snapshots as JSON lines.
///
/// Every mutation appends the full updated trial to the file; replaying
/// the file keeps the last snapshot of each id. Mutations run under an
/// exclusive file lock after replaying the journal, so the duplicate check
/// and the conditional status updates stay atomic across processes
/// sharing the file. Reads are served from memory and refreshed with
/// [`refresh`](Storage::refresh).
///
/// Heartbeats append a snapshot each, so the file is rewritten in place
/// with one line per trial when it is opened, and whenever superseded
/// snapshots outnumber live ones past `COMPACT_MIN_LINES` lines.
///
/// # Examples
///
/// ```no_run
/// use trial_worker::storage::JournalStorage;
///
/// let storage = JournalStorage::open("trials.jsonl").unwrap();
/// ```
pub struct JournalStorage {
    memory: MemoryStorage,
    path: PathBuf,
    /// Serialise in-process writes so we only hold the file lock briefly.
    write_lock: Mutex<()>,
    lines: Mutex<usize>,
}

impl JournalStorage {
    /// Opens (or lazily creates) a journal, loads the stored trials and
    /// compacts the file if it holds superseded snapshots.
    ///
    /// # Errors
    ///
    /// Returns a [`Storage`](Error::Storage) error if the file exists but
    /// cannot be read, parsed or rewritten.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let trials = load_trials_from_file(&path)?;
        let lines = trials.len();
        let storage = Self {
            memory: MemoryStorage::with_trials(trials),
            path,
            write_lock: Mutex::new(()),
            lines: Mutex::new(lines),
        };
        if lines > storage.memory.len() {
            storage.compact()?;
        }
        Ok(storage)
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the journal with only the latest snapshot of each trial.
    ///
    /// # Errors
    ///
    /// Returns a [`Storage`](Error::Storage) error if the file cannot be
    /// read or rewritten.
    pub fn compact(&self) -> Result<()> {
        self.with_locked_file(|file| {
            let trials = read_trials(&*file)?;
            let mut lines = self.lines.lock();
            self.memory.load(trials);
            *lines = self.rewrite(file)?;
            Ok(())
        })
    }

    /// Replays the journal, runs `op` against the fresh state and appends
    /// the trial it returns, all under an exclusive file lock.
    fn mutate(&self, op: impl FnOnce(&MemoryStorage) -> Result<Trial>) -> Result<Trial> {
        self.with_locked_file(|file| self.replay_and_apply(file, op))
    }

    fn with_locked_file<T>(&self, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(storage_err)?;
        file.lock_exclusive().map_err(storage_err)?;

        let result = f(&mut file);

        file.unlock().map_err(storage_err)?;
        result
    }

    fn replay_and_apply(
        &self,
        file: &mut File,
        op: impl FnOnce(&MemoryStorage) -> Result<Trial>,
    ) -> Result<Trial> {
        let trials = read_trials(&*file)?;
        let mut lines = self.lines.lock();
        *lines = trials.len();
        self.memory.load(trials);

        let trial = op(&self.memory)?;
        if *lines + 1 >= COMPACT_MIN_LINES && *lines + 1 > 2 * self.memory.len() {
            *lines = self.rewrite(file)?;
            return Ok(trial);
        }
        let line = serde_json::to_string(&trial).map_err(storage_err)?;
        writeln!(file, "{line}").map_err(storage_err)?;
        file.flush().map_err(storage_err)?;
        *lines += 1;
        Ok(trial)
    }

    /// Truncates the locked file and writes one line per trial in memory.
    /// Returns the new line count.
    fn rewrite(&self, file: &mut File) -> Result<usize> {
        let trials = self.memory.snapshot();
        let mut buf = String::new();
        for trial in &trials {
            buf.push_str(&serde_json::to_string(trial).map_err(storage_err)?);
            buf.push('\n');
        }
        file.set_len(0).map_err(storage_err)?;
        file.write_all(buf.as_bytes()).map_err(storage_err)?;
        file.flush().map_err(storage_err)?;
        Ok(trials.len())
    }
}

impl Storage for JournalStorage {
    fn register_trial(&self, trial: &Trial) -> Result<()> {
        self.mutate(|memory| memory.insert(trial)).map(drop)
    }

    fn get_trial(&self, id: &str) -> Option<Trial> {
        self.memory.get_trial(id)
    }

    fn fetch_trials(&self, experiment: &str) -> Vec<Trial> {
        self.refresh();
        self.memory.fetch_trials(experiment)
    }

    fn fetch_trials_by_status(&self, experiment: &str, statuses: &[TrialStatus]) -> Vec<Trial> {
        self.refresh();
        self.memory.fetch_trials_by_status(experiment, statuses)
    }

    fn set_trial_status(
        &self,
        id: &str,
        status: TrialStatus,
        was: Option<TrialStatus>,
    ) -> Result<Trial> {
        self.mutate(|memory| {
            memory.modify(id, |trial| {
                check_was(trial, was)?;
                transition(trial, status, chrono::Utc::now());
                Ok(())
            })
        })
    }

    fn reserve(&self, id: &str, owner: &str) -> Result<Trial> {
        self.mutate(|memory| memory.modify(id, |trial| reserve_in_place(trial, owner)))
    }

    fn reserve_trial(&self, experiment: &str, owner: &str) -> Result<Option<Trial>> {
        let reserved = self.mutate(|memory| {
            let id = memory
                .next_reservable(experiment)
                .ok_or_else(|| Error::TrialNotFound(experiment.to_owned()))?;
            memory.modify(&id, |trial| reserve_in_place(trial, owner))
        });
        match reserved {
            Ok(trial) => Ok(Some(trial)),
            Err(Error::TrialNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn update_heartbeat(&self, id: &str, owner: &str) -> Result<()> {
        self.mutate(|memory| memory.modify(id, |trial| heartbeat_in_place(trial, owner)))
            .map(drop)
    }

    fn set_working_dir(&self, id: &str, dir: &Path) -> Result<()> {
        self.mutate(|memory| {
            memory.modify(id, |trial| {
                trial.working_dir = Some(dir.to_path_buf());
                Ok(())
            })
        })
        .map(drop)
    }

    fn push_results(&self, id: &str, results: &[TrialResult]) -> Result<()> {
        self.mutate(|memory| {
            memory.modify(id, |trial| {
                trial.results.extend_from_slice(results);
                Ok(())
            })
        })
        .map(drop)
    }

    fn refresh(&self) -> bool {
        let Ok(loaded) = load_trials_from_file(&self.path) else {
            return false;
        };
        // A compaction elsewhere shrinks the file, so any change of length
        // means newer state.
        let mut lines = self.lines.lock();
        if loaded.len() != *lines {
            *lines = loaded.len();
            self.memory.load(loaded);
            true
        } else {
            false
        }
    }
}

fn storage_err(e: impl ToString) -> Error {
    Error::Storage(e.to_string())
}

/// Read every snapshot from a JSONL file. Returns an empty vec if the
/// file does not exist.
fn load_trials_from_file(path: &Path) -> Result<Vec<Trial>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(storage_err(e)),
    };

    file.lock_shared().map_err(storage_err)?;
    let trials = read_trials(&file);
    file.unlock().map_err(storage_err)?;
    trials
}

fn read_trials(file: &File) -> Result<Vec<Trial>> {
    let reader = BufReader::new(file);
    let mut trials = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(storage_err)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let trial: Trial = serde_json::from_str(line).map_err(storage_err)?;
        trials.push(trial);
    }

    Ok(trials)
}
