//! Explicit plugin registration.
//!
//! A plugin contributes at most one recurring task and any number of event
//! handlers. The registry collects them under stable keys, installs the
//! handlers on a worker, and schedules the tasks.
//!
//! ## Keys
//!
//! - task: `<plugin>.<task>.<interval_ms>`
//! - event handler: `<plugin>.<event>`

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};

use tasker_core::{Interval, JobRecord};
use tasker_infra::{EventHandler, HandlerResult, ResultStore, WorkQueue, Worker};

use crate::error::{ScheduleError, SchedulerError};
use crate::scheduler::Scheduler;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("invalid plugin name `{0}`")]
    InvalidName(String),

    #[error("invalid task interval for plugin `{plugin}`: {reason}")]
    InvalidInterval { plugin: String, reason: String },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Scan(#[from] SchedulerError),
}

/// A recurring task contributed by a plugin.
pub struct TaskDefinition {
    pub name: String,
    pub interval: Duration,
    pub context: JsonValue,
    pub handler: EventHandler,
}

impl TaskDefinition {
    pub fn new<F>(name: impl Into<String>, interval: Duration, handler: F) -> Self
    where
        F: Fn(&JobRecord) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            interval,
            context: JsonValue::Null,
            handler: Box::new(handler),
        }
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = context;
        self
    }
}

/// A handler for a named event.
pub struct EventHandlerInfo {
    pub event: String,
    pub handler: EventHandler,
}

impl EventHandlerInfo {
    pub fn new<F>(event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&JobRecord) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            event: event.into(),
            handler: Box::new(handler),
        }
    }
}

/// What a plugin can contribute. Both parts are optional.
pub trait Plugin: Send + Sync {
    fn task(&self) -> Option<TaskDefinition> {
        None
    }

    fn event_handlers(&self) -> Vec<EventHandlerInfo> {
        Vec::new()
    }
}

struct RegisteredTask {
    key: String,
    interval: Interval,
    context: JsonValue,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashSet<String>,
    tasks: Vec<RegisteredTask>,
    handlers: Vec<(String, EventHandler)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the task and handlers of `plugin` under `name`.
    pub fn register(&mut self, name: &str, plugin: &dyn Plugin) -> Result<(), RegistryError> {
        let name = name.trim();
        if name.is_empty() || name.contains('.') {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if self.plugins.contains(name) {
            return Err(RegistryError::DuplicatePlugin(name.to_string()));
        }

        let task = plugin
            .task()
            .map(|task| {
                let interval =
                    Interval::new(task.interval).map_err(|e| RegistryError::InvalidInterval {
                        plugin: name.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok::<_, RegistryError>((task, interval))
            })
            .transpose()?;

        if let Some((task, interval)) = task {
            let key = task_key(name, &task.name, interval);
            debug!(plugin = %name, task = %key, "registered task");
            self.handlers.push((key.clone(), task.handler));
            self.tasks.push(RegisteredTask {
                key,
                interval,
                context: task.context,
            });
        }

        for info in plugin.event_handlers() {
            let key = format!("{name}.{}", info.event);
            debug!(plugin = %name, event = %key, "registered event handler");
            self.handlers.push((key, info.handler));
        }

        self.plugins.insert(name.to_string());
        Ok(())
    }

    /// Keys of the registered tasks, in registration order.
    pub fn task_keys(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.key.as_str()).collect()
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Move every collected handler onto `worker`.
    ///
    /// Handlers are moved, not copied: a second install adds nothing.
    pub fn install<Q, R>(&mut self, worker: &mut Worker<Q, R>) -> usize
    where
        Q: WorkQueue + ?Sized + 'static,
        R: ResultStore + ?Sized + 'static,
    {
        let handlers = std::mem::take(&mut self.handlers);
        let installed = handlers.len();
        for (key, handler) in handlers {
            worker.register_handler(key, handler);
        }
        info!(installed, "installed plugin handlers");
        installed
    }

    /// Schedule every registered task as a recurring job. Tasks that already
    /// have a pending job are skipped. Returns how many were scheduled.
    pub async fn schedule_tasks<Q, R>(
        &self,
        scheduler: &Scheduler<Q, R>,
    ) -> Result<usize, RegistryError>
    where
        Q: WorkQueue + ?Sized + 'static,
        R: ResultStore + ?Sized + 'static,
    {
        let mut scheduled = 0;
        for task in &self.tasks {
            if scheduler.is_scheduled(&task.key).await? {
                debug!(task = %task.key, "task already scheduled");
                continue;
            }
            scheduler
                .schedule(
                    &task.key,
                    task.context.clone(),
                    Some(task.interval.as_duration()),
                )
                .await?;
            scheduled += 1;
        }
        info!(scheduled, total = self.tasks.len(), "scheduled plugin tasks");
        Ok(scheduled)
    }
}

fn task_key(plugin: &str, task: &str, interval: Interval) -> String {
    format!("{plugin}.{task}.{}", interval.as_millis())
}
