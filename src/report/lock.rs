//! Generation lock: at most one section generation per report view.
//!
//! The backend generation call is expensive, so the lock is global across
//! sections rather than per section. Acquisition never waits: a caller that
//! finds the lock held is told the view is busy.
//!
//! - `try_acquire()` is a single compare-and-swap, so first requester wins
//! - The returned guard owns its handle and can move into a spawned task
//! - Dropping the guard is the only way to release, so every exit path releases
//! - `current()` reports which section holds the lock and since when

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::types::SectionId;

/// Snapshot of the generation currently holding the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveGeneration {
    pub section_id: SectionId,
    pub force_reload: bool,
    /// When the lock was taken (ISO 8601).
    pub started_at: String,
}

#[derive(Default)]
struct LockState {
    held: AtomicBool,
    current: Mutex<Option<ActiveGeneration>>,
}

impl LockState {
    fn current(&self) -> MutexGuard<'_, Option<ActiveGeneration>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle; clones share one lock.
#[derive(Clone, Default)]
pub struct GenerationLock {
    state: Arc<LockState>,
}

impl GenerationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `section_id`, or `None` if a generation is running.
    pub fn try_acquire(&self, section_id: &SectionId, force_reload: bool) -> Option<GenerationGuard> {
        self.state
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        *self.state.current() = Some(ActiveGeneration {
            section_id: section_id.clone(),
            force_reload,
            started_at: chrono::Utc::now().to_rfc3339(),
        });
        tracing::debug!(section = %section_id, force_reload, "Generation lock acquired");

        Some(GenerationGuard {
            state: Arc::clone(&self.state),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.state.held.load(Ordering::Acquire)
    }

    /// What holds the lock, if anything.
    pub fn current(&self) -> Option<ActiveGeneration> {
        self.state.current().clone()
    }
}

impl std::fmt::Debug for GenerationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationLock")
            .field("busy", &self.is_busy())
            .field("current", &self.current())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════
// GenerationGuard: RAII release
// ═══════════════════════════════════════════════════════════

/// Held for the whole check-then-generate sequence. Dropping it releases the
/// lock and clears the active generation.
#[must_use = "dropping the guard releases the generation lock"]
pub struct GenerationGuard {
    state: Arc<LockState>,
}

impl GenerationGuard {
    pub fn section_id(&self) -> Option<SectionId> {
        self.state.current().as_ref().map(|g| g.section_id.clone())
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        // Clear before release so a new holder's record is never wiped.
        let finished = self.state.current().take();
        self.state.held.store(false, Ordering::Release);
        if let Some(generation) = finished {
            tracing::debug!(section = %generation.section_id, "Generation lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SectionId {
        SectionId::new(s)
    }

    #[test]
    fn new_lock_is_idle() {
        let lock = GenerationLock::new();
        assert!(!lock.is_busy());
        assert!(lock.current().is_none());
    }

    #[test]
    fn acquire_records_active_generation() {
        let lock = GenerationLock::new();
        let guard = lock.try_acquire(&id("3"), true).unwrap();

        let active = lock.current().unwrap();
        assert_eq!(active.section_id, id("3"));
        assert!(active.force_reload);
        assert!(!active.started_at.is_empty());
        assert_eq!(guard.section_id(), Some(id("3")));
    }

    #[test]
    fn second_acquire_refused_while_held() {
        let lock = GenerationLock::new();
        let _guard = lock.try_acquire(&id("1"), false).unwrap();
        assert!(lock.is_busy());
        assert!(lock.try_acquire(&id("2"), false).is_none());
        assert_eq!(lock.current().unwrap().section_id, id("1"));
    }

    #[test]
    fn drop_releases_lock() {
        let lock = GenerationLock::new();
        {
            let _guard = lock.try_acquire(&id("1"), false).unwrap();
        }
        assert!(!lock.is_busy());
        assert!(lock.current().is_none());
        assert!(lock.try_acquire(&id("2"), false).is_some());
    }

    #[test]
    fn clones_share_state() {
        let lock = GenerationLock::new();
        let other = lock.clone();
        let _guard = lock.try_acquire(&id("1"), false).unwrap();
        assert!(other.is_busy());
        assert!(other.try_acquire(&id("1"), false).is_none());
    }

    #[test]
    fn guard_releases_when_moved_task_ends() {
        let lock = GenerationLock::new();
        let guard = lock.try_acquire(&id("5"), false).unwrap();
        std::thread::spawn(move || drop(guard)).join().unwrap();
        assert!(!lock.is_busy());
    }

    #[test]
    fn active_generation_serializes() {
        let active = ActiveGeneration {
            section_id: id("4"),
            force_reload: false,
            started_at: "2026-02-22T10:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&active).unwrap();
        assert!(json.contains(r#""section_id":"4""#));
        assert!(json.contains("started_at"));
    }
}
