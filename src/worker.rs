//! The background worker: one handler per event, returning the effects it
//! produced.
//!
//! All process-wide state (the cache generation, the durable store, the
//! queue) lives in an explicit [`Worker`] value built once at startup, so
//! tests can build one over an in-memory store and a fake network.

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;

use crate::cache::{CacheManager, CacheStorage};
use crate::commands::{self, ForegroundCommand};
use crate::config::{Config, NotificationsConfig};
use crate::interceptor::Interceptor;
use crate::lifecycle::{InstallOutcome, LifecycleController, LifecycleState};
use crate::net::{Network, Request, Response};
use crate::notify::{self, ClickAction, Notification, PushPayload, WindowClient};
use crate::queue::{OfflineQueue, QueueStore};
use crate::sync::{FlushCoordinator, FlushReport, FlushTrigger, Relay};

/// Events delivered to the worker
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  /// A request issued by the application
  Fetch(Request),
  /// A message posted by the application (e.g. `{"type": "FLUSH_QUEUE"}`)
  Message(Value),
  /// The application's connectivity changed
  Connectivity { online: bool },
  /// The application's visibility changed
  Visibility { visible: bool },
  /// Push message with optional raw data
  Push(Option<Vec<u8>>),
  /// A notification was clicked; lists the currently open windows
  NotificationClick { clients: Vec<WindowClient> },
}

/// Observable outcome of handling an event
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
  Respond(Response),
  Installed(LifecycleState),
  Activated { purged: Vec<String> },
  ClaimClients,
  Flushed(FlushReport),
  ShowNotification(Notification),
  FocusClient(String),
  OpenWindow(Url),
}

pub struct Worker<S>
where
  S: CacheStorage + QueueStore + 'static,
{
  cache: Arc<CacheManager<S>>,
  queue: Arc<OfflineQueue<S>>,
  interceptor: Interceptor<S, S>,
  lifecycle: LifecycleController<S>,
  flusher: FlushCoordinator<S>,
  network: Arc<dyn Network>,
  notifications: NotificationsConfig,
  icon: Url,
  click_url: Url,
}

impl<S> Worker<S>
where
  S: CacheStorage + QueueStore + 'static,
{
  pub fn new(
    config: &Config,
    storage: Arc<S>,
    network: Arc<dyn Network>,
    relay: Arc<dyn Relay>,
  ) -> Result<Self> {
    let scope = config.scope()?;
    let cache = Arc::new(CacheManager::new(
      Arc::clone(&storage),
      &config.cache.prefix,
      &config.cache.version,
    ));
    let queue = Arc::new(OfflineQueue::new(storage)?);

    let interceptor = Interceptor::new(
      scope.clone(),
      Arc::clone(&cache),
      Arc::clone(&queue),
      Arc::clone(&network),
      &config.queue.default_type,
      config.shell_index()?,
    );
    let lifecycle = LifecycleController::new(
      Arc::clone(&cache),
      Arc::clone(&network),
      config.shell_urls()?,
      config.cache.skip_waiting,
    );
    let flusher = FlushCoordinator::new(Arc::clone(&queue), relay);

    Ok(Self {
      cache,
      queue,
      interceptor,
      lifecycle,
      flusher,
      network,
      notifications: config.notifications.clone(),
      icon: scope.resolve(&config.notifications.icon)?,
      click_url: scope.resolve(&config.notifications.click_route)?,
    })
  }

  pub fn cache(&self) -> &Arc<CacheManager<S>> {
    &self.cache
  }

  pub fn queue(&self) -> &Arc<OfflineQueue<S>> {
    &self.queue
  }

  pub fn lifecycle(&self) -> &LifecycleController<S> {
    &self.lifecycle
  }

  /// Handle one event.
  ///
  /// Errors are limited to a failed install/activation and to network
  /// failures of requests the worker does not intercept.
  pub async fn handle(&self, event: WorkerEvent) -> Result<Vec<Effect>> {
    match event {
      WorkerEvent::Install => match self.lifecycle.install().await? {
        InstallOutcome::Waiting => Ok(vec![Effect::Installed(LifecycleState::Waiting)]),
        InstallOutcome::Activated(activation) => Ok(vec![
          Effect::Installed(LifecycleState::Active),
          Effect::Activated {
            purged: activation.purged,
          },
          Effect::ClaimClients,
        ]),
      },
      WorkerEvent::Activate => {
        let activation = self.lifecycle.activate().await?;
        Ok(vec![
          Effect::Activated {
            purged: activation.purged,
          },
          Effect::ClaimClients,
        ])
      }
      WorkerEvent::Fetch(request) => Ok(vec![Effect::Respond(self.fetch(request).await?)]),
      WorkerEvent::Message(message) => match commands::parse_message(&message) {
        Some(ForegroundCommand::FlushQueue) => Ok(self.flush(FlushTrigger::Command).await),
        None => {
          debug!(%message, "Ignoring unknown message");
          Ok(Vec::new())
        }
      },
      WorkerEvent::Connectivity { online: true } => Ok(self.flush(FlushTrigger::Online).await),
      WorkerEvent::Visibility { visible: true } => Ok(self.flush(FlushTrigger::Visible).await),
      WorkerEvent::Connectivity { online: false } | WorkerEvent::Visibility { visible: false } => {
        Ok(Vec::new())
      }
      WorkerEvent::Push(data) => {
        let payload = PushPayload::parse(data.as_deref());
        let notification = notify::notification_for(payload, &self.notifications, self.icon.clone());
        Ok(vec![Effect::ShowNotification(notification)])
      }
      WorkerEvent::NotificationClick { clients } => {
        match notify::click_action(&clients, self.click_url.clone()) {
          ClickAction::Focus(id) => Ok(vec![Effect::FocusClient(id)]),
          ClickAction::Open(url) => Ok(vec![Effect::OpenWindow(url)]),
        }
      }
    }
  }

  /// Wait for background cache refreshes to finish.
  pub async fn settle(&self) {
    self.interceptor.settle().await;
  }

  /// Until this worker controls its clients, requests go straight out.
  async fn fetch(&self, request: Request) -> Result<Response> {
    if self.lifecycle.is_controlling() {
      self.interceptor.handle(request).await
    } else {
      self.network.fetch(request).await
    }
  }

  /// Store failures abandon this cycle; the next trigger retries.
  async fn flush(&self, trigger: FlushTrigger) -> Vec<Effect> {
    match self.flusher.flush(trigger).await {
      Ok(report) => vec![Effect::Flushed(report)],
      Err(e) => {
        error!(?trigger, "Failed to flush offline queue: {}", e);
        Vec::new()
      }
    }
  }
}
