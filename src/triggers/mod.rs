//! Per-class hooks run around writes: before-save hooks may rewrite or
//! reject an object, after-save and after-delete hooks only clean up.

pub mod image;
pub mod staff_profile;
pub mod user;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

use crate::acl::Acl;
use crate::files::LocalFilesAdapter;
use crate::store::{Document, StoredObject};

#[derive(Debug, Error)]
pub enum TriggerError {
    /// The hook refused the write; the message goes back to the caller.
    #[error("{0}")]
    Rejected(String),

    #[error("Trigger {trigger} failed: {message}")]
    Failed { trigger: &'static str, message: String },

    #[error("Trigger {0} timed out")]
    Timeout(&'static str),
}

impl TriggerError {
    pub fn failed(trigger: &'static str, message: impl std::fmt::Display) -> Self {
        TriggerError::Failed {
            trigger,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerPhase {
    BeforeSave,
    AfterSave,
    AfterDelete,
}

/// The object being written, as seen by a hook.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub class_name: String,
    /// Allocated before the before-save hooks run, so creates have one too.
    pub object_id: Option<String>,
    pub data: Document,
    pub acl: Option<Acl>,
    /// Stored state before this write; `None` for creates.
    pub original: Option<StoredObject>,
    pub user_id: Option<String>,
    pub master: bool,
}

impl TriggerContext {
    pub fn new(class_name: &str, data: Document) -> Self {
        Self {
            class_name: class_name.to_string(),
            object_id: None,
            data,
            acl: None,
            original: None,
            user_id: None,
            master: false,
        }
    }

    pub fn for_object(object: &StoredObject) -> Self {
        Self {
            class_name: object.class_name.clone(),
            object_id: Some(object.id.clone()),
            data: object.data.clone(),
            acl: object.acl.clone(),
            original: None,
            user_id: None,
            master: false,
        }
    }

    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    /// True when the field differs from the stored value, or the object is new
    /// and has the field.
    pub fn field_changed(&self, field: &str) -> bool {
        let current = self.data.get(field).filter(|v| !v.is_null());
        match &self.original {
            None => current.is_some(),
            Some(original) => current != original.get(field),
        }
    }
}

pub trait Trigger: Send + Sync {
    fn name(&self) -> &'static str;

    fn class_name(&self) -> &'static str;

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

#[async_trait]
pub trait BeforeSaveTrigger: Trigger {
    async fn execute(&self, ctx: &mut TriggerContext) -> Result<(), TriggerError>;
}

#[async_trait]
pub trait AfterSaveTrigger: Trigger {
    async fn execute(&self, ctx: &TriggerContext) -> Result<(), TriggerError>;
}

#[async_trait]
pub trait AfterDeleteTrigger: Trigger {
    async fn execute(&self, ctx: &TriggerContext) -> Result<(), TriggerError>;
}

pub enum TriggerBox {
    BeforeSave(Box<dyn BeforeSaveTrigger>),
    AfterSave(Box<dyn AfterSaveTrigger>),
    AfterDelete(Box<dyn AfterDeleteTrigger>),
}

impl TriggerBox {
    pub fn phase(&self) -> TriggerPhase {
        match self {
            TriggerBox::BeforeSave(_) => TriggerPhase::BeforeSave,
            TriggerBox::AfterSave(_) => TriggerPhase::AfterSave,
            TriggerBox::AfterDelete(_) => TriggerPhase::AfterDelete,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TriggerBox::BeforeSave(t) => t.name(),
            TriggerBox::AfterSave(t) => t.name(),
            TriggerBox::AfterDelete(t) => t.name(),
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            TriggerBox::BeforeSave(t) => t.class_name(),
            TriggerBox::AfterSave(t) => t.class_name(),
            TriggerBox::AfterDelete(t) => t.class_name(),
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            TriggerBox::BeforeSave(t) => t.timeout(),
            TriggerBox::AfterSave(t) => t.timeout(),
            TriggerBox::AfterDelete(t) => t.timeout(),
        }
    }
}

/// Registered hooks keyed by phase, run in registration order.
#[derive(Default)]
pub struct TriggerPipeline {
    triggers: HashMap<TriggerPhase, Vec<TriggerBox>>,
}

impl TriggerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The application's hooks.
    pub fn standard(files: Arc<LocalFilesAdapter>) -> Self {
        let mut pipeline = Self::new();
        pipeline.register(TriggerBox::BeforeSave(Box::new(user::UserAcl)));
        pipeline.register(TriggerBox::BeforeSave(Box::new(staff_profile::StaffProfileAcl)));
        pipeline.register(TriggerBox::BeforeSave(Box::new(image::ProcessImage::new(files.clone()))));
        pipeline.register(TriggerBox::AfterSave(Box::new(image::RemoveReplacedImage::new(files.clone()))));
        pipeline.register(TriggerBox::AfterDelete(Box::new(image::RemoveImageFiles::new(files))));
        pipeline
    }

    pub fn register(&mut self, trigger: TriggerBox) {
        let phase = trigger.phase();
        let name = trigger.name();
        let class_name = trigger.class_name();
        self.triggers.entry(phase).or_default().push(trigger);
        tracing::debug!("Registered trigger '{}' for {:?} on {}", name, phase, class_name);
    }

    fn for_class<'a>(&'a self, phase: TriggerPhase, class_name: &'a str) -> impl Iterator<Item = &'a TriggerBox> {
        self.triggers
            .get(&phase)
            .into_iter()
            .flatten()
            .filter(move |t| t.class_name() == class_name)
    }

    pub fn has_triggers(&self, phase: TriggerPhase, class_name: &str) -> bool {
        self.for_class(phase, class_name).next().is_some()
    }

    /// Run before-save hooks; the first failure aborts the write.
    pub async fn before_save(&self, ctx: &mut TriggerContext) -> Result<(), TriggerError> {
        let class_name = ctx.class_name.clone();
        for trigger in self.for_class(TriggerPhase::BeforeSave, &class_name) {
            let TriggerBox::BeforeSave(hook) = trigger else { continue };
            let started = Instant::now();
            match timeout(hook.timeout(), hook.execute(ctx)).await {
                Ok(Ok(())) => {
                    tracing::debug!("Trigger: {} completed in {:?}", hook.name(), started.elapsed());
                }
                Ok(Err(error)) => {
                    tracing::warn!("Trigger: {} failed in {:?}: {}", hook.name(), started.elapsed(), error);
                    return Err(error);
                }
                Err(_) => {
                    tracing::error!("Trigger: {} timed out after {:?}", hook.name(), hook.timeout());
                    return Err(TriggerError::Timeout(hook.name()));
                }
            }
        }
        Ok(())
    }

    /// Run after-save hooks. The write is already committed, so failures are logged only.
    pub async fn after_save(&self, ctx: &TriggerContext) {
        for trigger in self.for_class(TriggerPhase::AfterSave, &ctx.class_name) {
            if let TriggerBox::AfterSave(hook) = trigger {
                report(hook.name(), timeout(hook.timeout(), hook.execute(ctx)).await);
            }
        }
    }

    pub async fn after_delete(&self, ctx: &TriggerContext) {
        for trigger in self.for_class(TriggerPhase::AfterDelete, &ctx.class_name) {
            if let TriggerBox::AfterDelete(hook) = trigger {
                report(hook.name(), timeout(hook.timeout(), hook.execute(ctx)).await);
            }
        }
    }
}

fn report(name: &str, result: Result<Result<(), TriggerError>, tokio::time::error::Elapsed>) {
    match result {
        Ok(Ok(())) => tracing::debug!("Trigger: {} completed", name),
        Ok(Err(error)) => tracing::warn!("Trigger: {} failed after commit: {}", name, error),
        Err(_) => tracing::error!("Trigger: {} timed out after commit", name),
    }
}
