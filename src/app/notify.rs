use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::access::GateAction;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Chapter,
    Book,
    Cart,
}

/// Outcome signals for the presentation layer, which owns all copy.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    LoginRequired { action: GateAction, item_type: ItemType },
    PurchaseRequired { chapter_id: String },
    PurchaseSucceeded { chapter_id: String },
    PurchaseFailed { reason: String },
    CartAdded { chapter_id: String },
    AlreadyOwned { chapter_id: String },
    AlreadyFree { chapter_id: String },
    AlreadyInCart { chapter_id: String },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginRequired { action, item_type } => {
                write!(f, "login_required action={} item={item_type:?}", action.as_str())
            }
            Self::PurchaseRequired { chapter_id } => write!(f, "purchase_required {chapter_id}"),
            Self::PurchaseSucceeded { chapter_id } => write!(f, "purchase_succeeded {chapter_id}"),
            Self::PurchaseFailed { reason } => write!(f, "purchase_failed {reason}"),
            Self::CartAdded { chapter_id } => write!(f, "cart_added {chapter_id}"),
            Self::AlreadyOwned { chapter_id } => write!(f, "already_owned {chapter_id}"),
            Self::AlreadyFree { chapter_id } => write!(f, "already_free {chapter_id}"),
            Self::AlreadyInCart { chapter_id } => write!(f, "already_in_cart {chapter_id}"),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Forwards notifications to a channel the UI drains.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}

/// Keeps every notification; handy for inspecting a session after the fact.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.seen.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_notifier_delivers_in_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notification::CartAdded {
            chapter_id: "c2".to_owned(),
        });
        notifier.notify(Notification::AlreadyInCart {
            chapter_id: "c2".to_owned(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::CartAdded {
                chapter_id: "c2".to_owned()
            }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            Notification::AlreadyInCart { .. }
        ));
    }

    #[test]
    fn notification_serializes_with_kind_tag() {
        let json = serde_json::to_value(Notification::LoginRequired {
            action: GateAction::Read,
            item_type: ItemType::Chapter,
        })
        .unwrap();
        assert_eq!(json["kind"], "login_required");
        assert_eq!(json["action"], "read");
        assert_eq!(json["item_type"], "chapter");
    }
}
