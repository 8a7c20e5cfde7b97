use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::error::{LindenError, Result};
use crate::index::{GenerationState, IndexCore};
use crate::lifecycle::naming::{GenerationName, parse_swap_target};
use crate::lifecycle::{GenerationStore, IndexLifecycle, LifecycleKind};
use crate::search::request::SearchRequest;
use crate::search::result::ShardResult;

#[derive(Debug)]
struct HotSwapState {
    current: Arc<IndexCore>,
    current_ts: i64,
    next: BTreeMap<i64, Arc<IndexCore>>,
}

impl HotSwapState {
    fn fresh_timestamp(&self) -> i64 {
        let newest = self
            .next
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.current_ts)
            .max(self.current_ts);
        Utc::now().timestamp_millis().max(newest + 1)
    }
}

/// One current generation serving reads plus a bounded set of pending
/// `next` generations that are written to until one is swapped in.
#[derive(Debug)]
pub struct HotSwapLifecycle {
    store: GenerationStore,
    max_next: usize,
    state: RwLock<HotSwapState>,
    transitions: Mutex<()>,
}

impl HotSwapLifecycle {
    /// Adopt the newest `current_*` directory, reopen `next_*` directories
    /// and purge anything left half-deleted.
    pub fn open(store: GenerationStore, max_next: usize) -> Result<Self> {
        store.purge_deleted()?;

        let mut currents = Vec::new();
        let mut nexts = Vec::new();
        for name in store.scan()? {
            match name {
                GenerationName::Current(ts) => currents.push(ts),
                GenerationName::Next(ts) => nexts.push(ts),
                _ => {}
            }
        }
        currents.sort_unstable();
        nexts.sort_unstable();

        let current_ts = match currents.pop() {
            Some(ts) => ts,
            None => Utc::now().timestamp_millis(),
        };
        for stale in currents {
            warn!("removing stale generation current_{stale}");
            store.remove(&GenerationName::Current(stale))?;
        }
        let current = store.open(&GenerationName::Current(current_ts))?;

        let max_next = max_next.max(1);
        while nexts.len() > max_next {
            let oldest = nexts.remove(0);
            warn!("removing next_{oldest} beyond the pending cap");
            store.remove(&GenerationName::Next(oldest))?;
        }
        let mut next = BTreeMap::new();
        for ts in nexts {
            let core = store.open(&GenerationName::Next(ts))?;
            core.set_state(GenerationState::Pending);
            next.insert(ts, core);
        }

        info!(
            "hot swap serving current_{current_ts} with {} pending",
            next.len()
        );
        Ok(Self {
            store,
            max_next,
            state: RwLock::new(HotSwapState {
                current,
                current_ts,
                next,
            }),
            transitions: Mutex::new(()),
        })
    }

    pub fn current_timestamp(&self) -> i64 {
        self.state.read().current_ts
    }

    /// Timestamps of the pending generations, oldest first.
    pub fn next_timestamps(&self) -> Vec<i64> {
        self.state.read().next.keys().copied().collect()
    }

    fn next_generation(&self, ts: Option<i64>) -> Result<Arc<IndexCore>> {
        {
            let state = self.state.read();
            let existing = match ts {
                Some(ts) => state.next.get(&ts),
                None => state.next.values().next_back(),
            };
            if let Some(core) = existing {
                return Ok(core.clone());
            }
        }

        let _guard = self.transitions.lock();
        let (ts, evicted) = {
            let mut state = self.state.write();
            let ts = match ts {
                Some(ts) => ts,
                None => state.fresh_timestamp(),
            };
            if let Some(core) = state.next.get(&ts) {
                return Ok(core.clone());
            }
            if ts <= state.current_ts {
                return Err(LindenError::invalid_transition(format!(
                    "next_{ts} is not newer than current_{}",
                    state.current_ts
                )));
            }
            let evicted = if state.next.len() >= self.max_next {
                // At the cap the new generation must outlive the one it evicts.
                if state.next.keys().next().is_some_and(|oldest| ts < *oldest) {
                    return Err(LindenError::invalid_transition(format!(
                        "next_{ts} is older than every pending generation"
                    )));
                }
                state.next.pop_first()
            } else {
                None
            };
            (ts, evicted)
        };

        if let Some((old_ts, old)) = evicted {
            info!("evicting oldest pending generation next_{old_ts}");
            self.store.destroy(&old, &GenerationName::Next(old_ts))?;
        }

        let core = self.store.open(&GenerationName::Next(ts))?;
        core.set_state(GenerationState::Pending);
        self.state.write().next.insert(ts, core.clone());
        info!("created pending generation next_{ts}");
        Ok(core)
    }
}

impl IndexLifecycle for HotSwapLifecycle {
    fn kind(&self) -> LifecycleKind {
        LifecycleKind::HotSwap
    }

    fn search(&self, request: &SearchRequest) -> Result<ShardResult> {
        let current = self.state.read().current.clone();
        current.search(request)
    }

    /// `None` or `current` writes to the current generation, `next` to the
    /// newest pending one and `next_<ts>` / `next:<ts>` to that one,
    /// creating it if needed.
    fn writer_for(&self, target: Option<&str>) -> Result<Arc<IndexCore>> {
        match target {
            None | Some("current") => Ok(self.state.read().current.clone()),
            Some("next") => self.next_generation(None),
            Some(name) => {
                if let Some(GenerationName::Current(ts)) = GenerationName::parse(name) {
                    let state = self.state.read();
                    if ts == state.current_ts {
                        return Ok(state.current.clone());
                    }
                    return Err(LindenError::invalid_transition(format!(
                        "'{name}' is not the current generation"
                    )));
                }
                self.next_generation(Some(parse_swap_target(name)?))
            }
        }
    }

    fn generations(&self) -> Vec<Arc<IndexCore>> {
        let state = self.state.read();
        std::iter::once(state.current.clone())
            .chain(state.next.values().cloned())
            .collect()
    }

    fn swap(&self, target: &str) -> Result<()> {
        let ts = parse_swap_target(target)?;
        let _guard = self.transitions.lock();

        let (pending, old_ts) = {
            let state = self.state.read();
            if ts == state.current_ts {
                info!("current generation is already current_{ts}; swap is a no-op");
                return Ok(());
            }
            let pending = state.next.get(&ts).cloned().ok_or_else(|| {
                LindenError::invalid_transition(format!("no pending generation next_{ts}"))
            })?;
            (pending, state.current_ts)
        };

        pending.set_state(GenerationState::Retiring);
        pending.close()?;
        self.store
            .rename(&GenerationName::Next(ts), &GenerationName::Current(ts))?;
        let promoted = self.store.open(&GenerationName::Current(ts))?;

        let old = {
            let mut state = self.state.write();
            state.next.remove(&ts);
            state.current_ts = ts;
            std::mem::replace(&mut state.current, promoted)
        };
        info!("swapped current_{old_ts} for current_{ts}");

        self.store.destroy(&old, &GenerationName::Current(old_ts))
    }

    fn close(&self) -> Result<()> {
        let _guard = self.transitions.lock();
        for generation in self.generations() {
            generation.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Document;
    use crate::lifecycle::test_support::{dirs, make_store};
    use tempfile::TempDir;

    fn write(core: &IndexCore, id: &str) {
        core.index_doc(id, Document::new().add_text("body", id)).unwrap();
    }

    #[test]
    fn test_writes_to_next_are_invisible_until_swap() {
        let dir = TempDir::new().unwrap();
        let lifecycle = HotSwapLifecycle::open(make_store(&dir), 3).unwrap();

        write(&lifecycle.writer_for(None).unwrap(), "old");
        let next = lifecycle.writer_for(Some("next")).unwrap();
        write(&next, "new-1");
        write(&next, "new-2");
        next.refresh().unwrap();

        let all = SearchRequest::default();
        lifecycle.writer_for(None).unwrap().refresh().unwrap();
        assert_eq!(lifecycle.search(&all).unwrap().total_hits, 1);

        let ts = lifecycle.next_timestamps()[0];
        lifecycle.swap(&format!("next:{ts}")).unwrap();
        assert_eq!(lifecycle.current_timestamp(), ts);
        assert!(lifecycle.next_timestamps().is_empty());
        assert_eq!(lifecycle.search(&all).unwrap().total_hits, 2);
        assert_eq!(dirs(&dir), vec![format!("current_{ts}")]);
    }

    #[test]
    fn test_swap_to_current_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let lifecycle = HotSwapLifecycle::open(make_store(&dir), 3).unwrap();
        let ts = lifecycle.current_timestamp();

        lifecycle.swap(&format!("next_{ts}")).unwrap();
        lifecycle.swap(&format!("next_{ts}")).unwrap();
        assert_eq!(lifecycle.current_timestamp(), ts);

        assert!(matches!(
            lifecycle.swap(&format!("current_{ts}")),
            Err(LindenError::InvalidTransition(_))
        ));
        assert!(matches!(
            lifecycle.swap("next_1"),
            Err(LindenError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_pending_generations_are_bounded() {
        let dir = TempDir::new().unwrap();
        let lifecycle = HotSwapLifecycle::open(make_store(&dir), 2).unwrap();
        let base = lifecycle.current_timestamp();

        for offset in 1..=3 {
            lifecycle
                .writer_for(Some(&format!("next_{}", base + offset)))
                .unwrap();
        }
        assert_eq!(
            lifecycle.next_timestamps(),
            vec![base + 2, base + 3]
        );
        assert_eq!(lifecycle.generations().len(), 3);
        assert!(!dirs(&dir).contains(&format!("next_{}", base + 1)));
    }

    #[test]
    fn test_stale_next_targets_are_rejected() {
        let dir = TempDir::new().unwrap();
        let lifecycle = HotSwapLifecycle::open(make_store(&dir), 2).unwrap();
        let base = lifecycle.current_timestamp();

        for ts in [base, base - 1] {
            assert!(matches!(
                lifecycle.writer_for(Some(&format!("next_{ts}"))),
                Err(LindenError::InvalidTransition(_))
            ));
        }

        for offset in [5, 6] {
            lifecycle
                .writer_for(Some(&format!("next_{}", base + offset)))
                .unwrap();
        }
        assert!(matches!(
            lifecycle.writer_for(Some(&format!("next_{}", base + 1))),
            Err(LindenError::InvalidTransition(_))
        ));
        assert_eq!(lifecycle.next_timestamps(), vec![base + 5, base + 6]);
        assert!(!dirs(&dir).contains(&format!("next_{}", base + 1)));
    }

    #[test]
    fn test_recovery_adopts_newest_current() {
        let dir = TempDir::new().unwrap();
        let store = make_store(&dir);
        std::fs::create_dir(dir.path().join("current_100")).unwrap();
        std::fs::create_dir(dir.path().join("current_200")).unwrap();
        std::fs::create_dir(dir.path().join("next_300")).unwrap();
        std::fs::create_dir(dir.path().join("delete_current_50")).unwrap();

        let lifecycle = HotSwapLifecycle::open(store, 3).unwrap();
        assert_eq!(lifecycle.current_timestamp(), 200);
        assert_eq!(lifecycle.next_timestamps(), vec![300]);
        assert_eq!(dirs(&dir), vec!["current_200", "next_300"]);

        let states: Vec<GenerationState> =
            lifecycle.generations().iter().map(|g| g.state()).collect();
        assert_eq!(states, vec![GenerationState::Live, GenerationState::Pending]);
    }
}
