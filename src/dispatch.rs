//! Execution contexts the reader service runs its work on.
//!
//! Store I/O and CPU transforms are synchronous closures; a [`Dispatcher`]
//! decides where such a closure runs and how many may run at once.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::DispatchConfig;

/// Where a unit of synchronous work runs.
#[derive(Debug, Clone)]
pub enum Dispatcher {
  /// Blocking thread pool, at most `permits` closures at a time
  Pool {
    name: &'static str,
    permits: Arc<Semaphore>,
  },
  /// Blocking thread pool, no cap
  Blocking,
  /// On the calling task
  Inline,
}

impl Dispatcher {
  pub fn pool(name: &'static str, size: usize) -> Self {
    Self::Pool {
      name,
      permits: Arc::new(Semaphore::new(size.max(1))),
    }
  }

  /// Run `f` on this dispatcher and wait for its result.
  pub async fn run<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    match self {
      Self::Pool { name, permits } => {
        let permit = permits
          .clone()
          .acquire_owned()
          .await
          .map_err(|e| eyre!("{} dispatcher closed: {}", name, e))?;

        // The permit travels with the closure so a cancelled caller
        // doesn't free a slot while the work is still running
        tokio::task::spawn_blocking(move || {
          let _permit = permit;
          f()
        })
        .await
        .map_err(|e| eyre!("{} task failed: {}", name, e))
      }
      Self::Blocking => tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| eyre!("blocking task failed: {}", e)),
      Self::Inline => Ok(f()),
    }
  }
}

/// The four contexts handed to services.
#[derive(Debug, Clone)]
pub struct DispatcherProvider {
  io: Dispatcher,
  compute: Dispatcher,
  main: Dispatcher,
  unconfined: Dispatcher,
}

impl DispatcherProvider {
  /// Bounded pools for store I/O and compute.
  pub fn from_config(config: &DispatchConfig) -> Self {
    Self {
      io: Dispatcher::pool("io", config.io_concurrency),
      compute: Dispatcher::pool("compute", config.compute_concurrency),
      main: Dispatcher::Inline,
      unconfined: Dispatcher::Blocking,
    }
  }

  /// Everything on the calling task. For tests.
  pub fn inline() -> Self {
    Self {
      io: Dispatcher::Inline,
      compute: Dispatcher::Inline,
      main: Dispatcher::Inline,
      unconfined: Dispatcher::Inline,
    }
  }

  /// Local store operations
  pub fn io(&self) -> &Dispatcher {
    &self.io
  }

  /// CPU-bound transforms (mapping, sorting)
  pub fn compute(&self) -> &Dispatcher {
    &self.compute
  }

  /// UI-facing observation
  pub fn main(&self) -> &Dispatcher {
    &self.main
  }

  /// Uncapped blocking work outside the store pool (opening the database)
  pub fn unconfined(&self) -> &Dispatcher {
    &self.unconfined
  }
}
