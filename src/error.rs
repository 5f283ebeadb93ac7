use thiserror::Error;

/// Failures a purchase flow reports back to its caller.
///
/// None of these leave partial ownership behind, except `OwnershipNotRecorded`,
/// where the charge went through but the ownership write did not.
#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("login required")]
    LoginRequired,

    #[error("nothing to purchase")]
    NothingToPurchase,

    #[error("purchase already in progress for chapter {0}")]
    AlreadyInFlight(String),

    #[error("payment failed: {reason}")]
    PaymentFailed { reason: String, retryable: bool },

    #[error("payment timed out")]
    TimedOut,

    #[error("purchase cancelled")]
    Cancelled,

    #[error("catalog unavailable: {0:#}")]
    CatalogUnavailable(anyhow::Error),

    #[error("payment {payment_reference} succeeded but ownership was not recorded: {source:#}")]
    OwnershipNotRecorded {
        payment_reference: String,
        source: anyhow::Error,
    },
}

impl PurchaseError {
    /// Whether the user may simply try the same purchase again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PaymentFailed { retryable, .. } => *retryable,
            Self::TimedOut
            | Self::Cancelled
            | Self::AlreadyInFlight(_)
            | Self::CatalogUnavailable(_) => true,
            Self::NotFound(_)
            | Self::LoginRequired
            | Self::NothingToPurchase
            | Self::OwnershipNotRecorded { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declined_payment_retryability_follows_gateway() {
        let soft = PurchaseError::PaymentFailed {
            reason: "declined".to_owned(),
            retryable: true,
        };
        let hard = PurchaseError::PaymentFailed {
            reason: "card blocked".to_owned(),
            retryable: false,
        };
        assert!(soft.is_retryable());
        assert!(!hard.is_retryable());
        assert!(PurchaseError::TimedOut.is_retryable());
    }

    #[test]
    fn ownership_not_recorded_names_payment() {
        let err = PurchaseError::OwnershipNotRecorded {
            payment_reference: "pay-1".to_owned(),
            source: anyhow::anyhow!("disk full"),
        };
        let msg = err.to_string();
        assert!(msg.contains("pay-1"));
        assert!(msg.contains("disk full"));
    }
}
