use crate::{
    config::{AppConfig, PipelineTarget, TargetConfig},
    models::RunReport,
    runner::Runner,
    targets::{RemoteError, RemoteTrigger},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    task::JoinHandle,
};
use tracing::{info, warn};

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        finished_at: DateTime<Utc>,
        report: RunReport,
    },
    /// A remote target accepted the trigger; its outcome is not tracked here.
    Dispatched {
        at: DateTime<Utc>,
    },
    Failed {
        finished_at: DateTime<Utc>,
        stage: Option<String>,
        error: String,
    },
}

#[derive(Clone, Serialize)]
pub struct TargetStatus {
    pub target: String,
    pub title: String,
    #[serde(flatten)]
    pub state: RunState,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("unknown target `{0}`")]
    UnknownTarget(String),
    #[error("{0} is already running")]
    AlreadyRunning(String),
    #[error("failed to start {title}: {source}")]
    Remote {
        title: String,
        #[source]
        source: RemoteError,
    },
}

pub struct Started {
    pub title: String,
    /// Set for in-process pipeline runs.
    pub handle: Option<JoinHandle<()>>,
}

/// Starts targets with at most one run per target in flight and remembers the
/// last outcome of each.
#[derive(Clone)]
pub struct RunRegistry {
    config: Arc<AppConfig>,
    runner: Runner,
    remote: RemoteTrigger,
    locks: Arc<HashMap<String, Arc<Mutex<()>>>>,
    statuses: Arc<Mutex<HashMap<String, RunState>>>,
}

impl RunRegistry {
    pub fn new(config: Arc<AppConfig>, runner: Runner, remote: RemoteTrigger) -> Self {
        let locks = config
            .targets
            .keys()
            .map(|name| (name.clone(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            config,
            runner,
            remote,
            locks: Arc::new(locks),
            statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn trigger(&self, name: &str) -> Result<Started, TriggerError> {
        let (Some(target), Some(lock)) = (self.config.target(name), self.locks.get(name)) else {
            return Err(TriggerError::UnknownTarget(name.to_string()));
        };
        let title = target.title(name).to_string();
        let guard = lock
            .clone()
            .try_lock_owned()
            .map_err(|_| TriggerError::AlreadyRunning(title.clone()))?;
        info!(target = "feeds.webhook", target_name = name, "trigger accepted");

        match target {
            TargetConfig::Pipeline(pipeline) => {
                self.set(name, RunState::Running { started_at: Utc::now() })
                    .await;
                let handle = self.spawn_pipeline(name.to_string(), pipeline.clone(), guard);
                Ok(Started {
                    title,
                    handle: Some(handle),
                })
            }
            TargetConfig::Url(url) => {
                let result = self.remote.hit_url(url).await;
                self.finish_remote(name, title, result, guard).await
            }
            TargetConfig::Workflow(workflow) => {
                let result = self.remote.dispatch_workflow(workflow).await;
                self.finish_remote(name, title, result, guard).await
            }
        }
    }

    fn spawn_pipeline(
        &self,
        name: String,
        target: PipelineTarget,
        guard: OwnedMutexGuard<()>,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let state = match registry.runner.run_target(&name, &target).await {
                Ok(report) => RunState::Completed {
                    finished_at: Utc::now(),
                    report,
                },
                Err(err) => RunState::Failed {
                    finished_at: Utc::now(),
                    stage: Some(err.stage().to_string()),
                    error: err.detail().to_string(),
                },
            };
            registry.set(&name, state).await;
            drop(guard);
        })
    }

    async fn finish_remote(
        &self,
        name: &str,
        title: String,
        result: Result<(), RemoteError>,
        guard: OwnedMutexGuard<()>,
    ) -> Result<Started, TriggerError> {
        let outcome = match result {
            Ok(()) => {
                self.set(name, RunState::Dispatched { at: Utc::now() }).await;
                Ok(Started {
                    title,
                    handle: None,
                })
            }
            Err(source) => {
                warn!(target = "feeds.webhook", target_name = name, error = %source, "remote trigger failed");
                self.set(
                    name,
                    RunState::Failed {
                        finished_at: Utc::now(),
                        stage: None,
                        error: source.to_string(),
                    },
                )
                .await;
                Err(TriggerError::Remote { title, source })
            }
        };
        drop(guard);
        outcome
    }

    async fn set(&self, name: &str, state: RunState) {
        self.statuses.lock().await.insert(name.to_string(), state);
    }

    pub async fn status(&self, name: &str) -> Option<TargetStatus> {
        let target = self.config.target(name)?;
        let state = self
            .statuses
            .lock()
            .await
            .get(name)
            .cloned()
            .unwrap_or(RunState::Idle);
        Some(TargetStatus {
            target: name.to_string(),
            title: target.title(name).to_string(),
            state,
        })
    }
}
