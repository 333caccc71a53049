use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::breadcrumbs::Breadcrumbs;
use crate::error::BreadcrumbsError;
use crate::store::{BreadcrumbStore, BreadcrumbsFile};
use crate::text::CommitTextReport;

/// Orders the writes of one session. Held for the whole of each write.
#[derive(Debug, Default)]
struct WriteGate {
    /// Generation of the newest snapshot on disk.
    written: u64,
    /// Set by `finish`; later writes are dropped.
    finished: bool,
}

/// One editing session of a target file and the breadcrumbs that let it be
/// resumed.
///
/// The record lives behind a mutex; writers always serialize a clone taken
/// under the lock, so a save never observes a half-applied edit. Every
/// snapshot gets a generation, and a write only lands if nothing newer has
/// been written and the session has not finished, so a slow background save
/// can never resurrect breadcrumbs that `finish` already discarded.
pub struct EditSession {
    store: Arc<BreadcrumbStore>,
    crumbs: Arc<Mutex<BreadcrumbsFile>>,
    generation: Arc<AtomicU64>,
    gate: Arc<Mutex<WriteGate>>,
    resumed_exit_status: Option<i32>,
}

impl EditSession {
    /// Resume the stored session for `target` if the store's policy allows it,
    /// otherwise start with empty breadcrumbs. Expired records left by other
    /// targets are swept on the way.
    pub fn start(store: Arc<BreadcrumbStore>, target: &Path) -> Self {
        let (file, resumed_exit_status) = match store.load(target) {
            Some(file) => {
                let status = file.exit_status;
                (file, Some(status))
            }
            None => (store.create(target), None),
        };
        store.sweep_stale();
        Self {
            store,
            crumbs: Arc::new(Mutex::new(file)),
            generation: Arc::new(AtomicU64::new(0)),
            gate: Arc::new(Mutex::new(WriteGate::default())),
            resumed_exit_status,
        }
    }

    #[must_use]
    pub fn resumed(&self) -> bool {
        self.resumed_exit_status.is_some()
    }

    /// Exit status recorded by the interrupted session this one resumed.
    #[must_use]
    pub fn resumed_exit_status(&self) -> Option<i32> {
        self.resumed_exit_status
    }

    pub fn target(&self) -> PathBuf {
        self.crumbs.lock().target().to_path_buf()
    }

    /// Mutate the record under the session lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut Breadcrumbs) -> R) -> R {
        let mut guard = self.crumbs.lock();
        f(&mut **guard)
    }

    /// Replace the recorded ranges with those of a fresh text analysis.
    pub fn record_analysis(&self, report: &CommitTextReport) {
        self.update(|crumbs| report.apply_to(crumbs));
    }

    pub fn set_spell_checking(&self, enabled: bool) {
        self.update(|crumbs| crumbs.spell_checking = enabled);
    }

    /// A consistent copy of the record.
    pub fn snapshot(&self) -> BreadcrumbsFile {
        self.crumbs.lock().clone()
    }

    fn numbered_snapshot(&self) -> (u64, BreadcrumbsFile) {
        let guard = self.crumbs.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (generation, guard.clone())
    }

    pub fn save(&self) -> Result<(), BreadcrumbsError> {
        let (generation, snapshot) = self.numbered_snapshot();
        write_if_current(&self.store, &self.gate, generation, &snapshot)
    }

    /// Snapshot now, write on a worker thread. Edits made after this call
    /// returns are not part of the write, and the write is dropped if a newer
    /// save or `finish` got there first.
    pub fn save_in_background(&self) -> JoinHandle<Result<(), BreadcrumbsError>> {
        let (generation, snapshot) = self.numbered_snapshot();
        let store = Arc::clone(&self.store);
        let gate = Arc::clone(&self.gate);
        std::thread::spawn(move || {
            let result = write_if_current(&store, &gate, generation, &snapshot);
            if let Err(e) = &result {
                log::warn!("Background breadcrumbs save failed: {}", e);
            }
            result
        })
    }

    /// Record how the editor is exiting. A successful commit ends the session
    /// and discards its breadcrumbs; any other status keeps them for resuming.
    /// Saves still in flight are dropped.
    pub fn finish(&self, exit_status: i32) -> Result<(), BreadcrumbsError> {
        let snapshot = {
            let mut guard = self.crumbs.lock();
            guard.exit_status = exit_status;
            guard.clone()
        };
        let mut gate = self.gate.lock();
        gate.finished = true;
        if exit_status == 0 {
            self.store.discard(snapshot.target())
        } else {
            self.store.save(&snapshot)
        }
    }
}

fn write_if_current(
    store: &BreadcrumbStore,
    gate: &Mutex<WriteGate>,
    generation: u64,
    snapshot: &BreadcrumbsFile,
) -> Result<(), BreadcrumbsError> {
    let mut gate = gate.lock();
    if gate.finished || gate.written >= generation {
        log::debug!(
            "Dropping breadcrumbs snapshot {} for {:?}; superseded",
            generation,
            snapshot.target()
        );
        return Ok(());
    }
    store.save(snapshot)?;
    gate.written = generation;
    Ok(())
}
