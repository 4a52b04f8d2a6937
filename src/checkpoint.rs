//! Durable sync checkpoints
//!
//! Every synced activity resumes from a checkpoint: the timestamp of its last successful
//! pass, plus (for token-based sources) the opaque sync token to read the next delta from.
//! Checkpoints are only ever written after a pass completed without an unrecovered error,
//! so a failed pass leaves the stored value untouched and the next pass re-scans the same
//! window.

use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// The point a sync activity resumes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Wall-clock time of the last successful pass, in the configured zone
    pub last_sync: DateTime<FixedOffset>,
    /// Opaque cursor issued by the remote service, when the activity uses one
    pub sync_token: Option<String>,
}

/// A store that keeps one [`Checkpoint`] per activity in a local JSON file.
///
/// The store is shared process-wide; each reconciler owns exactly one activity's entry, and
/// each activity has at most one worker, so there are no concurrent writers to a given key.
#[derive(Debug, PartialEq)]
pub struct CheckpointStore {
    backing_file: PathBuf,
    data: HashMap<String, Checkpoint>,
}

impl CheckpointStore {
    /// Open a store backed by `path`, loading its content if the file exists.
    ///
    /// A missing file is a normal first run (every activity reports "never synced"); an
    /// unreadable or unparsable file is an error.
    pub fn open(path: &Path) -> Result<Self, Box<dyn Error>> {
        let data = match std::fs::File::open(path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(format!("Unable to open file {:?}: {}", path, err).into());
            }
            Ok(file) => serde_json::from_reader(file)?,
        };

        Ok(Self {
            backing_file: PathBuf::from(path),
            data,
        })
    }

    /// The checkpoint of `activity`, or `None` if it never completed a pass.
    pub fn load(&self, activity: &str) -> Option<Checkpoint> {
        self.data.get(activity).cloned()
    }

    /// Record a completed pass for `activity` and persist the store.
    ///
    /// The file is replaced atomically (write to a sidecar, then rename), so a crash mid-
    /// write can never truncate the previous checkpoints.
    pub fn save(&mut self, activity: &str, checkpoint: Checkpoint) -> Result<(), Box<dyn Error>> {
        self.data.insert(activity.to_string(), checkpoint);
        self.persist()
    }

    fn persist(&self) -> Result<(), Box<dyn Error>> {
        let tmp_path = self.backing_file.with_extension("json.tmp");

        let file = std::fs::File::create(&tmp_path)
            .map_err(|err| format!("Unable to create file {:?}: {}", tmp_path, err))?;
        serde_json::to_writer(file, &self.data)?;

        std::fs::rename(&tmp_path, &self.backing_file)
            .map_err(|err| format!("Unable to replace file {:?}: {}", self.backing_file, err))?;
        Ok(())
    }
}
