//! Install / activate / claim for one cache generation.
//!
//! States follow `installing → waiting → active → superseded`; a failed
//! install ends in `redundant` and never activates. Transitions share one
//! lock, so stale generations are purged only after this generation's shell
//! has been fully precached.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{CacheManager, CacheStorage};
use crate::net::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Nothing done yet
  Parsed,
  Installing,
  /// Shell precached; waiting to be activated
  Waiting,
  Active,
  /// A newer generation has taken over
  Superseded,
  /// Install failed
  Redundant,
}

/// Result of an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
  /// Stale generations deleted during activation
  pub purged: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
  Waiting,
  Activated(Activation),
}

pub struct LifecycleController<S: CacheStorage> {
  cache: Arc<CacheManager<S>>,
  network: Arc<dyn Network>,
  shell: Vec<Url>,
  skip_waiting: bool,
  state: Mutex<LifecycleState>,
  /// Whether open clients are routed through the interceptor
  controlling: AtomicBool,
}

impl<S: CacheStorage> LifecycleController<S> {
  pub fn new(
    cache: Arc<CacheManager<S>>,
    network: Arc<dyn Network>,
    shell: Vec<Url>,
    skip_waiting: bool,
  ) -> Self {
    Self {
      cache,
      network,
      shell,
      skip_waiting,
      state: Mutex::new(LifecycleState::Parsed),
      controlling: AtomicBool::new(false),
    }
  }

  pub async fn state(&self) -> LifecycleState {
    *self.state.lock().await
  }

  pub fn is_controlling(&self) -> bool {
    self.controlling.load(Ordering::SeqCst)
  }

  /// Pick up where a previous process left off.
  ///
  /// An activated generation in storage means this worker is active and in
  /// control; a precached one means it is waiting.
  pub async fn restore(&self) -> Result<LifecycleState> {
    let mut state = self.state.lock().await;
    if *state != LifecycleState::Parsed {
      return Ok(*state);
    }

    if let Some(generation) = self.cache.storage().generation(self.cache.name())? {
      *state = if generation.activated_at.is_some() {
        self.controlling.store(true, Ordering::SeqCst);
        LifecycleState::Active
      } else {
        LifecycleState::Waiting
      };
      let restored = *state;
      info!(cache = %generation.name, state = ?restored, "Restored worker state");
    }
    Ok(*state)
  }

  /// Precache the shell into this generation.
  ///
  /// A failure leaves the worker redundant and any previous generation
  /// untouched. With `skip_waiting` the worker activates right away.
  pub async fn install(&self) -> Result<InstallOutcome> {
    let mut state = self.state.lock().await;
    match *state {
      LifecycleState::Parsed | LifecycleState::Redundant | LifecycleState::Waiting => {}
      other => return Err(eyre!("Cannot install from state {:?}", other)),
    }

    *state = LifecycleState::Installing;
    info!(cache = %self.cache.name(), "Installing");

    if let Err(e) = self.cache.precache(self.network.as_ref(), &self.shell).await {
      *state = LifecycleState::Redundant;
      error!(cache = %self.cache.name(), "Install failed: {}", e);
      return Err(e.wrap_err(format!("Failed to install {}", self.cache.name())));
    }
    *state = LifecycleState::Waiting;

    if self.skip_waiting {
      let activation = self.activate_locked(&mut state)?;
      return Ok(InstallOutcome::Activated(activation));
    }
    Ok(InstallOutcome::Waiting)
  }

  /// Promote this generation, purge the others and claim open clients.
  pub async fn activate(&self) -> Result<Activation> {
    let mut state = self.state.lock().await;
    self.activate_locked(&mut state)
  }

  fn activate_locked(&self, state: &mut LifecycleState) -> Result<Activation> {
    match *state {
      LifecycleState::Waiting | LifecycleState::Active => {}
      other => return Err(eyre!("Cannot activate from state {:?}", other)),
    }

    self.cache.storage().mark_activated(self.cache.name())?;
    *state = LifecycleState::Active;

    // Purge is idempotent; a failure here is retried on the next activation.
    let purged = self
      .cache
      .purge_stale(self.cache.name())
      .unwrap_or_else(|e| {
        warn!("Failed to purge stale caches: {}", e);
        Vec::new()
      });

    self.controlling.store(true, Ordering::SeqCst);
    info!(cache = %self.cache.name(), purged = purged.len(), "Activated and claimed clients");
    Ok(Activation { purged })
  }

  /// Detect that a newer generation deleted ours.
  pub async fn check_superseded(&self) -> Result<LifecycleState> {
    let mut state = self.state.lock().await;
    if *state == LifecycleState::Active && !self.cache.exists()? {
      *state = LifecycleState::Superseded;
      self.controlling.store(false, Ordering::SeqCst);
      info!(cache = %self.cache.name(), "Superseded by a newer generation");
    }
    Ok(*state)
  }
}
