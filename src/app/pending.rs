use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Zero-argument continuation resumed once a gate resolves.
pub type Continuation = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

/// What a suspended action is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Login,
    Purchase { chapter_id: String },
}

pub struct PendingAction {
    gate: Gate,
    label: String,
    resume: Continuation,
}

impl PendingAction {
    pub fn new<F, Fut>(gate: Gate, label: impl Into<String>, resume: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            gate,
            label: label.into(),
            resume: Box::new(move || Box::pin(resume())),
        }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn run(self) {
        tracing::debug!(label = %self.label, gate = ?self.gate, "resuming pending action");
        (self.resume)().await;
    }
}

impl std::fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAction")
            .field("gate", &self.gate)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Holds at most one pending action. Setting a new one drops the previous
/// one (last write wins); it is not a queue.
#[derive(Debug, Default)]
pub struct PendingSlot {
    slot: Mutex<Option<PendingAction>>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, action: PendingAction) {
        let mut slot = self.lock();
        if let Some(replaced) = slot.replace(action) {
            tracing::debug!(label = %replaced.label, "pending action replaced");
        }
    }

    /// Takes the action if it waits for login.
    pub fn take_login(&self) -> Option<PendingAction> {
        self.take_if(|gate| *gate == Gate::Login)
    }

    /// Takes the action if it waits for any of the given chapters.
    pub fn take_purchased(&self, chapter_ids: &[String]) -> Option<PendingAction> {
        self.take_if(|gate| match gate {
            Gate::Purchase { chapter_id } => chapter_ids.contains(chapter_id),
            Gate::Login => false,
        })
    }

    pub fn clear(&self) -> Option<PendingAction> {
        self.lock().take()
    }

    pub fn gate(&self) -> Option<Gate> {
        self.lock().as_ref().map(|a| a.gate.clone())
    }

    fn take_if(&self, pred: impl FnOnce(&Gate) -> bool) -> Option<PendingAction> {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|a| pred(&a.gate)) {
            slot.take()
        } else {
            None
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<PendingAction>> {
        // A panic while holding the guard cannot leave the Option half-written.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
