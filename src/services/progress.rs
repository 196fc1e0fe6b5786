// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Progress store: owner of the current user's progress document.
//!
//! Mutations are applied to the in-memory document right away and written
//! to the backend later. Each mutation re-arms one shared debounce timer, so
//! a burst of mutations costs a single write. `flush` writes immediately.
//!
//! The document is tied to the owner it was loaded for. When the backend
//! reports a different owner, the old document is flushed for its owner and
//! dropped before the new owner's document is read.

use crate::error::Result;
use crate::models::{NarrationMode, ProgressDocument, ThemeMode};
use crate::services::backend::{BackendKind, Owner, ProgressBackend};
use crate::time_utils::Clock;
use chrono::NaiveDate;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Delay between the last mutation and the write it triggers.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_secs(5);

/// Persistence state as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Everything in memory has been written.
    Synced,
    /// Changes are waiting for the debounce timer.
    Pending,
    /// The last write failed; changes are kept on this device only.
    LocalOnly(String),
}

#[derive(Default)]
struct State {
    /// Owner `document` was loaded for
    owner: Option<Owner>,
    document: Option<ProgressDocument>,
    dirty: bool,
    last_error: Option<String>,
}

#[derive(Default)]
struct Timer {
    /// Bumped on every re-arm or cancel; a waking task with an older value exits.
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    backend: Arc<dyn ProgressBackend>,
    clock: Clock,
    debounce: Duration,
    state: Mutex<State>,
    timer: Mutex<Timer>,
    /// Serializes backend writes so an older snapshot never lands last.
    save_lock: tokio::sync::Mutex<()>,
}

/// Shared handle to the progress store.
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<Inner>,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn ProgressBackend>, clock: Clock, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                clock,
                debounce,
                state: Mutex::new(State::default()),
                timer: Mutex::new(Timer::default()),
                save_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    fn today(&self) -> NaiveDate {
        self.inner.clock.today()
    }

    // ─── Reads ───────────────────────────────────────────────────

    /// Current document, loading and upgrading it on first use.
    ///
    /// Applies the day-boundary streak rule and writes the document back if
    /// migration or a day change modified it.
    pub async fn load_progress(&self) -> Result<ProgressDocument> {
        let today = self.today();
        let owner = self.inner.backend.current_owner().await?;
        self.switch_owner(&owner).await;

        let cached = {
            let mut guard = self.inner.state();
            let state = &mut *guard;
            match state.document.as_mut() {
                Some(doc) => {
                    let rolled = doc.touch(today);
                    let copy = doc.clone();
                    state.dirty |= rolled;
                    Some((copy, rolled))
                }
                None => None,
            }
        };
        if let Some((doc, rolled)) = cached {
            if rolled {
                self.flush(false).await?;
            }
            return Ok(doc);
        }

        let (mut doc, mut changed) = match self.inner.backend.load(&owner).await? {
            Some(raw) => ProgressDocument::migrate(raw, today),
            None => {
                tracing::info!("No stored progress, starting fresh");
                (ProgressDocument::new(today), false)
            }
        };
        changed |= doc.touch(today);

        {
            let mut state = self.inner.state();
            // A concurrent load for the same owner finished first; its document wins.
            if state.owner.as_ref() == Some(&owner) {
                if let Some(existing) = &state.document {
                    return Ok(existing.clone());
                }
            }
            state.owner = Some(owner);
            state.document = Some(doc.clone());
            state.dirty = changed;
            state.last_error = None;
        }

        if changed {
            tracing::info!(streak = doc.streak, "Progress upgraded on load, saving");
            self.flush(false).await?;
        }
        Ok(doc)
    }

    /// Save and forget a document loaded for someone other than `owner`.
    async fn switch_owner(&self, owner: &Owner) {
        let previous = {
            let state = self.inner.state();
            match &state.owner {
                Some(current) if current != owner => current.clone(),
                _ => return,
            }
        };

        tracing::info!(from = ?previous, to = ?owner, "Progress owner changed");
        if let Err(e) = self.flush(true).await {
            tracing::warn!(error = %e, "Unsaved progress of previous owner not uploaded");
        }
        self.inner.cancel_timer();

        let mut state = self.inner.state();
        if state.owner.as_ref() == Some(&previous) {
            *state = State::default();
        }
    }

    /// Copy of the in-memory document, if loaded.
    pub fn current(&self) -> Option<ProgressDocument> {
        self.inner.state().document.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state().dirty
    }

    pub fn sync_status(&self) -> SyncStatus {
        let state = self.inner.state();
        match (&state.last_error, state.dirty) {
            (Some(reason), _) => SyncStatus::LocalOnly(reason.clone()),
            (None, true) => SyncStatus::Pending,
            (None, false) => SyncStatus::Synced,
        }
    }

    // ─── Writes ──────────────────────────────────────────────────

    /// Apply `transform` to a copy of the latest document and schedule a save.
    pub async fn apply_mutation<F>(&self, transform: F) -> Result<ProgressDocument>
    where
        F: FnOnce(&mut ProgressDocument),
    {
        // Also picks up a change of owner since the last call.
        self.load_progress().await?;

        let updated = {
            let mut state = self.inner.state();
            let mut next = state
                .document
                .clone()
                .unwrap_or_else(|| ProgressDocument::new(self.today()));
            transform(&mut next);
            state.document = Some(next.clone());
            state.dirty = true;
            next
        };

        Inner::schedule_save(&self.inner);
        Ok(updated)
    }

    pub async fn award_xp(&self, amount: u64) -> Result<ProgressDocument> {
        let today = self.today();
        self.apply_mutation(|doc| doc.award_xp(amount, today)).await
    }

    pub async fn increment_completion(&self, kind: &str, by: u64) -> Result<ProgressDocument> {
        let today = self.today();
        self.apply_mutation(|doc| doc.increment_completion(kind, by, today))
            .await
    }

    pub async fn mark_learned(&self, word: &str) -> Result<ProgressDocument> {
        let today = self.today();
        self.apply_mutation(|doc| {
            if doc.mark_learned(word, today) {
                tracing::debug!(word, "New word learned");
            }
        })
        .await
    }

    pub async fn mark_error(&self, word: &str) -> Result<ProgressDocument> {
        let today = self.today();
        self.apply_mutation(|doc| doc.mark_error(word, today)).await
    }

    pub async fn record_review(&self, word: &str) -> Result<ProgressDocument> {
        let today = self.today();
        self.apply_mutation(|doc| doc.record_review(word, today))
            .await
    }

    pub async fn set_narration_mode(&self, mode: NarrationMode) -> Result<ProgressDocument> {
        self.apply_mutation(|doc| doc.set_narration_mode(mode)).await
    }

    pub async fn set_theme_mode(&self, theme: ThemeMode) -> Result<ProgressDocument> {
        self.apply_mutation(|doc| doc.set_theme_mode(theme)).await
    }

    pub async fn set_activity_mode(&self, activity: &str, mode: &str) -> Result<ProgressDocument> {
        self.apply_mutation(|doc| doc.set_activity_mode(activity, mode))
            .await
    }

    pub async fn reset_pack_progress<S: AsRef<str>>(
        &self,
        words: &[S],
    ) -> Result<ProgressDocument> {
        self.apply_mutation(|doc| doc.reset_pack_progress(words))
            .await
    }

    /// Replace the stored document with a fresh one, bypassing the debounce.
    ///
    /// If the backend cannot be cleared, the fresh document stays in memory
    /// and is written by the regular debounced save instead.
    pub async fn reset_all(&self) -> Result<ProgressDocument> {
        let owner = self.inner.backend.current_owner().await?;
        self.switch_owner(&owner).await;

        let fresh = ProgressDocument::new(self.today());
        self.inner.cancel_timer();

        let result = {
            let _guard = self.inner.save_lock.lock().await;
            {
                let mut state = self.inner.state();
                state.owner = Some(owner.clone());
                state.document = Some(fresh.clone());
                state.dirty = true;
            }
            match self.inner.backend.clear(&owner).await {
                Ok(()) => self.inner.save_locked().await,
                Err(e) => {
                    self.inner.state().last_error = Some(e.to_string());
                    Err(e)
                }
            }
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "Progress reset not stored, retrying after debounce");
            Inner::schedule_save(&self.inner);
            return Err(e);
        }

        tracing::info!("Progress reset");
        Ok(fresh)
    }

    /// Write pending changes now, cancelling the debounce timer.
    ///
    /// With `immediate` a failed write is returned to the caller. Otherwise
    /// it is logged and retried after another debounce interval.
    pub async fn flush(&self, immediate: bool) -> Result<()> {
        Inner::flush(&self.inner, immediate).await
    }

    /// Drop the in-memory document and read it again from the backend.
    ///
    /// Pending changes are flushed first when possible.
    pub async fn reload(&self) -> Result<ProgressDocument> {
        if let Err(e) = self.flush(true).await {
            tracing::warn!(error = %e, "Unsaved progress dropped before reload");
        }
        self.inner.cancel_timer();
        *self.inner.state() = State::default();
        self.load_progress().await
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn timer(&self) -> MutexGuard<'_, Timer> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm the debounce timer, replacing any pending one.
    fn schedule_save(this: &Arc<Self>) {
        let mut timer = this.timer();
        timer.generation += 1;
        let generation = timer.generation;
        if let Some(previous) = timer.handle.take() {
            previous.abort();
        }

        let inner = Arc::clone(this);
        let delay = this.debounce;
        timer.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timer = inner.timer();
                if timer.generation != generation {
                    return;
                }
                // Detach ourselves so the flush below cannot abort this task.
                timer.handle = None;
            }
            if let Err(e) = Inner::flush(&inner, false).await {
                tracing::warn!(error = %e, "Debounced progress save failed");
            }
        }));
    }

    fn cancel_timer(&self) {
        let mut timer = self.timer();
        timer.generation += 1;
        if let Some(pending) = timer.handle.take() {
            pending.abort();
        }
    }

    async fn flush(this: &Arc<Self>, immediate: bool) -> Result<()> {
        if !this.state().dirty {
            return Ok(());
        }
        this.cancel_timer();

        let result = {
            let _guard = this.save_lock.lock().await;
            this.save_locked().await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if immediate => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Progress save failed, retrying after debounce");
                Self::schedule_save(this);
                Ok(())
            }
        }
    }

    /// Write the latest document if dirty. Caller must hold `save_lock`.
    async fn save_locked(&self) -> Result<()> {
        let (owner, snapshot, value) = {
            let mut state = self.state();
            if !state.dirty {
                return Ok(());
            }
            let (Some(owner), Some(doc)) = (state.owner.clone(), state.document.clone()) else {
                state.dirty = false;
                return Ok(());
            };
            let value = serde_json::to_value(&doc)?;
            // Mutations made while the write is in flight set this again.
            state.dirty = false;
            (owner, doc, value)
        };

        match self.backend.save(&owner, &value).await {
            Ok(()) => {
                self.state().last_error = None;
                tracing::debug!(xp = snapshot.xp, streak = snapshot.streak, "Progress saved");
                Ok(())
            }
            Err(e) => {
                let mut state = self.state();
                state.dirty = true;
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
