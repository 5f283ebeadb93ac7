use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::formats::Price;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub order_id: String,
    pub user_id: String,
    pub chapter_ids: Vec<String>,
    pub amount: Price,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub reference: String,
    pub amount: Price,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDeclined {
    pub reason: String,
    pub retryable: bool,
}

/// External payment collaborator. Implementations must not record ownership.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest)
    -> Result<PaymentConfirmation, PaymentDeclined>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMode {
    Approve,
    Decline,
}

impl PaymentMode {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw =
            std::env::var("STORYSHELF_PAYMENT_MODE").unwrap_or_else(|_| "approve".to_string());
        Self::parse(&raw).with_context(|| {
            format!("invalid STORYSHELF_PAYMENT_MODE={raw:?}. expected one of: approve, decline")
        })
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "approve" => Ok(Self::Approve),
            "decline" => Ok(Self::Decline),
            other => anyhow::bail!("unsupported payment mode: {other}"),
        }
    }
}

/// Stand-in gateway that waits `latency` and then approves or declines.
#[derive(Debug, Clone)]
pub struct SimulatedPaymentGateway {
    mode: PaymentMode,
    latency: Duration,
}

impl SimulatedPaymentGateway {
    pub fn new(mode: PaymentMode, latency: Duration) -> Self {
        Self { mode, latency }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<PaymentConfirmation, PaymentDeclined> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.mode {
            PaymentMode::Approve => {
                tracing::debug!(
                    order_id = %request.order_id,
                    amount = %request.amount,
                    "simulated charge approved"
                );
                Ok(PaymentConfirmation {
                    reference: format!("sim-{}", request.order_id),
                    amount: request.amount,
                })
            }
            PaymentMode::Decline => Err(PaymentDeclined {
                reason: "card declined".to_string(),
                retryable: true,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_approve_variants() {
        assert_eq!(PaymentMode::parse("approve").unwrap(), PaymentMode::Approve);
        assert_eq!(PaymentMode::parse(" APPROVE ").unwrap(), PaymentMode::Approve);
        assert_eq!(PaymentMode::parse("").unwrap(), PaymentMode::Approve);
    }

    #[test]
    fn parse_decline() {
        assert_eq!(PaymentMode::parse("Decline").unwrap(), PaymentMode::Decline);
    }

    #[test]
    fn parse_invalid() {
        let err = PaymentMode::parse("maybe").unwrap_err().to_string();
        assert!(err.contains("unsupported payment mode"));
    }

    #[tokio::test]
    async fn simulated_gateway_declines_in_decline_mode() {
        let gateway = SimulatedPaymentGateway::new(PaymentMode::Decline, Duration::ZERO);
        let request = ChargeRequest {
            order_id: "o1".to_owned(),
            user_id: "u1".to_owned(),
            chapter_ids: vec!["c2".to_owned()],
            amount: Price::from_cents(299),
        };
        let err = gateway.charge(&request).await.unwrap_err();
        assert!(err.retryable);
    }
}
