//! Read-access decisions for a (user, chapter) pair.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::formats::Chapter;

/// The user action a login gate interrupted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Read,
    Purchase,
    AddToCart,
    Checkout,
}

impl GateAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Purchase => "purchase",
            Self::AddToCart => "add_to_cart",
            Self::Checkout => "checkout",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Allow,
    RequireLogin { action: GateAction },
    RequirePurchase,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Classifies a read attempt. First matching rule wins:
/// free chapters need a login, paid chapters need a login and then ownership.
pub fn evaluate(
    chapter: &Chapter,
    is_authenticated: bool,
    owned_chapter_ids: &BTreeSet<String>,
) -> AccessDecision {
    match (chapter.is_free, is_authenticated) {
        (true, false) => AccessDecision::RequireLogin {
            action: GateAction::Read,
        },
        (true, true) => AccessDecision::Allow,
        (false, false) => AccessDecision::RequireLogin {
            action: GateAction::Purchase,
        },
        (false, true) if owned_chapter_ids.contains(&chapter.id) => AccessDecision::Allow,
        (false, true) => AccessDecision::RequirePurchase,
    }
}
