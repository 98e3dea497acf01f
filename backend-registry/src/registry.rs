use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::error::AppError;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::{
    backends::{llm::LlmTranslator, mock::MockTranslator, nllb::NllbHttpTranslator},
    BackendCapabilities, BackendKind, ModelDescriptor, Translator,
};

/// How long a failed load keeps the slot in `Failed` before a retry is
/// treated as a fresh `Absent` load.
const FAILURE_COOLDOWN: Duration = Duration::from_secs(30);

/// Externally visible lifecycle state of a registered model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Absent,
    Loading,
    Ready,
    Failed,
    Unloading,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub name: String,
    pub state: ModelState,
    pub refcount: usize,
}

enum Slot {
    Absent,
    Loading {
        notify: Arc<Notify>,
    },
    Ready {
        backend: Arc<dyn Translator>,
        refcount: usize,
    },
    Failed {
        at: Instant,
    },
    Unloading,
}

struct ModelSlot {
    descriptor: ModelDescriptor,
    slot: Slot,
    /// Times the backend constructor actually ran; concurrent loads share one.
    load_invocations: u64,
}

/// Owns every `ModelHandle`. Controllers borrow backends through refcounted
/// guards for the duration of one translation; loads are single-flight per
/// name.
pub struct ModelRegistry {
    slots: Mutex<HashMap<String, ModelSlot>>,
    cooldown: Duration,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            cooldown: FAILURE_COOLDOWN,
        }
    }

    #[cfg(test)]
    fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    /// Record a descriptor. Re-registering an absent model replaces the
    /// descriptor; a loaded model must be unloaded first.
    pub fn register(&self, descriptor: ModelDescriptor) -> Result<(), AppError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get(&descriptor.name) {
            Some(existing) if !matches!(existing.slot, Slot::Absent | Slot::Failed { .. }) => {
                Err(AppError::InvalidRequest(format!(
                    "model '{}' is loaded; unload before re-registering",
                    descriptor.name
                )))
            }
            _ => {
                slots.insert(
                    descriptor.name.clone(),
                    ModelSlot {
                        descriptor,
                        slot: Slot::Absent,
                        load_invocations: 0,
                    },
                );
                Ok(())
            }
        }
    }

    /// Bring a registered model to `Ready`. Concurrent callers for the same
    /// name share a single load; a failed load sits in cooldown before the
    /// next attempt.
    pub async fn load(&self, name: &str) -> Result<(), AppError> {
        loop {
            enum Action {
                Done,
                Wait(Arc<Notify>),
                Build {
                    descriptor: ModelDescriptor,
                    notify: Arc<Notify>,
                },
            }

            let action = {
                let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
                let entry = slots.get_mut(name).ok_or_else(|| AppError::ModelLoadFailed {
                    name: name.to_string(),
                    reason: "backend not registered".to_string(),
                })?;

                match &entry.slot {
                    Slot::Ready { .. } => Action::Done,
                    Slot::Loading { notify } => Action::Wait(Arc::clone(notify)),
                    Slot::Unloading => {
                        return Err(AppError::ModelLoadFailed {
                            name: name.to_string(),
                            reason: "unload in progress".to_string(),
                        })
                    }
                    Slot::Failed { at } if at.elapsed() < self.cooldown => {
                        return Err(AppError::ModelLoadFailed {
                            name: name.to_string(),
                            reason: "cooling down after failed load".to_string(),
                        })
                    }
                    Slot::Absent | Slot::Failed { .. } => {
                        let notify = Arc::new(Notify::new());
                        entry.slot = Slot::Loading {
                            notify: Arc::clone(&notify),
                        };
                        entry.load_invocations += 1;
                        Action::Build {
                            descriptor: entry.descriptor.clone(),
                            notify,
                        }
                    }
                }
            };

            match action {
                Action::Done => return Ok(()),
                Action::Wait(notify) => {
                    notify.notified().await;
                }
                Action::Build { descriptor, notify } => {
                    info!(model = name, "loading backend");
                    let built = build_backend(&descriptor).await;

                    let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
                    let entry = slots.get_mut(name).ok_or_else(|| {
                        AppError::InternalError(format!("model slot '{name}' vanished mid-load"))
                    })?;

                    match built {
                        Ok(backend) => {
                            entry.slot = Slot::Ready {
                                backend,
                                refcount: 0,
                            };
                            notify.notify_waiters();
                            info!(model = name, "backend ready");
                            return Ok(());
                        }
                        Err(err) => {
                            entry.slot = Slot::Failed { at: Instant::now() };
                            notify.notify_waiters();
                            warn!(model = name, error = %err, "backend load failed");
                            return Err(AppError::ModelLoadFailed {
                                name: name.to_string(),
                                reason: err.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Borrow a `Ready` backend; the guard holds the refcount until dropped.
    pub fn acquire(self: &Arc<Self>, name: &str) -> Result<ModelGuard, AppError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let entry = slots
            .get_mut(name)
            .ok_or_else(|| AppError::ModelNotLoaded(name.to_string()))?;

        match &mut entry.slot {
            Slot::Ready { backend, refcount } => {
                *refcount += 1;
                Ok(ModelGuard {
                    registry: Arc::clone(self),
                    name: name.to_string(),
                    backend: Arc::clone(backend),
                })
            }
            _ => Err(AppError::ModelNotLoaded(name.to_string())),
        }
    }

    /// Drop a `Ready` backend. Rejected while any guard is outstanding.
    pub fn unload(&self, name: &str) -> Result<(), AppError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let entry = slots
            .get_mut(name)
            .ok_or_else(|| AppError::ModelNotLoaded(name.to_string()))?;

        match &entry.slot {
            Slot::Ready { refcount, .. } if *refcount > 0 => Err(AppError::InvalidRequest(
                format!("model '{name}' has {refcount} active borrowers"),
            )),
            Slot::Ready { .. } => {
                // Unloading is observable only through this lock, so the
                // backend Arc drops and the slot settles in one step.
                entry.slot = Slot::Unloading;
                entry.slot = Slot::Absent;
                info!(model = name, "backend unloaded");
                Ok(())
            }
            _ => Err(AppError::ModelNotLoaded(name.to_string())),
        }
    }

    pub fn health(&self, name: &str) -> Result<ModelState, AppError> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let entry = slots
            .get(name)
            .ok_or_else(|| AppError::ModelNotLoaded(name.to_string()))?;
        Ok(self.visible_state(&entry.slot))
    }

    pub fn list(&self) -> Vec<ModelStatus> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut statuses: Vec<ModelStatus> = slots
            .iter()
            .map(|(name, entry)| ModelStatus {
                name: name.clone(),
                state: self.visible_state(&entry.slot),
                refcount: match &entry.slot {
                    Slot::Ready { refcount, .. } => *refcount,
                    _ => 0,
                },
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn capabilities(&self, name: &str) -> Result<BackendCapabilities, AppError> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let entry = slots
            .get(name)
            .ok_or_else(|| AppError::ModelNotLoaded(name.to_string()))?;
        match &entry.slot {
            Slot::Ready { backend, .. } => Ok(backend.capabilities()),
            _ => Err(AppError::ModelNotLoaded(name.to_string())),
        }
    }

    /// Times the backend constructor ran for `name`.
    pub fn load_invocations(&self, name: &str) -> u64 {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(name).map_or(0, |entry| entry.load_invocations)
    }

    fn visible_state(&self, slot: &Slot) -> ModelState {
        match slot {
            Slot::Absent => ModelState::Absent,
            Slot::Loading { .. } => ModelState::Loading,
            Slot::Ready { .. } => ModelState::Ready,
            // A cooled-down failure reads as Absent: the next load may retry.
            Slot::Failed { at } if at.elapsed() >= self.cooldown => ModelState::Absent,
            Slot::Failed { .. } => ModelState::Failed,
            Slot::Unloading => ModelState::Unloading,
        }
    }

    fn release(&self, name: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = slots.get_mut(name) {
            if let Slot::Ready { refcount, .. } = &mut entry.slot {
                *refcount = refcount.saturating_sub(1);
            }
        }
    }
}

async fn build_backend(descriptor: &ModelDescriptor) -> Result<Arc<dyn Translator>, AppError> {
    match &descriptor.kind {
        BackendKind::Mock(config) => {
            // Simulated load latency lets tests overlap concurrent loads.
            if config.latency_ms > 0 {
                tokio::time::sleep(Duration::from_millis(config.latency_ms)).await;
            }
            Ok(Arc::new(MockTranslator::new(config.clone())))
        }
        BackendKind::NllbLike { url } => {
            Ok(Arc::new(NllbHttpTranslator::new(&descriptor.name, url)?))
        }
        BackendKind::LlmInstructTuned {
            base_url,
            api_key,
            model,
        } => Ok(Arc::new(LlmTranslator::new(base_url, api_key, model))),
    }
}

/// RAII borrow of a loaded backend; releasing decrements the refcount.
pub struct ModelGuard {
    registry: Arc<ModelRegistry>,
    name: String,
    backend: Arc<dyn Translator>,
}

impl ModelGuard {
    pub fn backend(&self) -> &Arc<dyn Translator> {
        &self.backend
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ModelGuard {
    fn drop(&mut self) {
        self.registry.release(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockConfig;

    fn mock_descriptor(name: &str, latency_ms: u64) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            kind: BackendKind::Mock(MockConfig {
                latency_ms,
                ..MockConfig::default()
            }),
        }
    }

    #[tokio::test]
    async fn load_transitions_to_ready() {
        let registry = Arc::new(ModelRegistry::new());
        registry.register(mock_descriptor("mock", 0)).expect("register");

        assert_eq!(registry.health("mock").expect("health"), ModelState::Absent);
        registry.load("mock").await.expect("load");
        assert_eq!(registry.health("mock").expect("health"), ModelState::Ready);
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_build() {
        let registry = Arc::new(ModelRegistry::new());
        registry
            .register(mock_descriptor("mock", 50))
            .expect("register");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.load("mock").await }));
        }
        for handle in handles {
            handle.await.expect("join").expect("load");
        }

        assert_eq!(registry.load_invocations("mock"), 1);
        assert_eq!(registry.health("mock").expect("health"), ModelState::Ready);
    }

    #[tokio::test]
    async fn acquire_requires_ready_state() {
        let registry = Arc::new(ModelRegistry::new());
        registry.register(mock_descriptor("mock", 0)).expect("register");

        assert!(matches!(
            registry.acquire("mock"),
            Err(AppError::ModelNotLoaded(_))
        ));

        registry.load("mock").await.expect("load");
        let guard = registry.acquire("mock").expect("acquire");
        assert_eq!(guard.name(), "mock");
    }

    #[tokio::test]
    async fn unload_rejected_while_borrowed() {
        let registry = Arc::new(ModelRegistry::new());
        registry.register(mock_descriptor("mock", 0)).expect("register");
        registry.load("mock").await.expect("load");

        let guard = registry.acquire("mock").expect("acquire");
        assert!(registry.unload("mock").is_err());

        drop(guard);
        registry.unload("mock").expect("unload");
        assert_eq!(registry.health("mock").expect("health"), ModelState::Absent);
        assert!(matches!(
            registry.acquire("mock"),
            Err(AppError::ModelNotLoaded(_))
        ));
    }

    #[tokio::test]
    async fn failed_load_cools_down_then_retries() {
        let registry = Arc::new(ModelRegistry::with_cooldown(Duration::from_millis(40)));
        registry.register(mock_descriptor("mock", 0)).expect("register");

        {
            let mut slots = registry.slots.lock().unwrap_or_else(|e| e.into_inner());
            let entry = slots.get_mut("mock").expect("slot");
            entry.slot = Slot::Failed { at: Instant::now() };
        }

        assert_eq!(registry.health("mock").expect("health"), ModelState::Failed);
        assert!(matches!(
            registry.load("mock").await,
            Err(AppError::ModelLoadFailed { .. })
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.health("mock").expect("health"), ModelState::Absent);
        registry.load("mock").await.expect("load after cooldown");
        assert_eq!(registry.health("mock").expect("health"), ModelState::Ready);
    }

    #[tokio::test]
    async fn register_rejected_while_loaded() {
        let registry = Arc::new(ModelRegistry::new());
        registry.register(mock_descriptor("mock", 0)).expect("register");
        registry.load("mock").await.expect("load");

        assert!(registry.register(mock_descriptor("mock", 0)).is_err());

        registry.unload("mock").expect("unload");
        assert!(registry.register(mock_descriptor("mock", 0)).is_ok());
    }
}
