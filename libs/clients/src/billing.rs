use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pvm_core::{PlanId, SubscriptionInfo};

use crate::error::{ApiError, ApiResult};

/// Billing collaborator: plan subscription and cancellation.
#[async_trait]
pub trait BillingApi: Send + Sync {
    /// Creates a subscription; depending on the payment setup the result is
    /// either immediate activation or a checkout link to hand to the user.
    async fn create_subscription(
        &self,
        user_id: &str,
        plan: PlanId,
    ) -> ApiResult<SubscriptionOutcome>;
    async fn cancel_subscription(&self, user_id: &str) -> ApiResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionOutcome {
    Activated(SubscriptionInfo),
    CheckoutRequired { url: String },
}

pub struct HttpBillingClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBillingClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionRequest<'a> {
    user_id: &'a str,
    plan: PlanId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionResponse {
    #[serde(default)]
    checkout_url: Option<String>,
    #[serde(default)]
    subscription: Option<SubscriptionInfo>,
}

#[async_trait]
impl BillingApi for HttpBillingClient {
    async fn create_subscription(
        &self,
        user_id: &str,
        plan: PlanId,
    ) -> ApiResult<SubscriptionOutcome> {
        let response = self
            .http
            .post(self.url("/api/v1/subscriptions"))
            .json(&CreateSubscriptionRequest { user_id, plan })
            .send()
            .await?;
        let parsed: CreateSubscriptionResponse = ApiError::check(response).await?.json().await?;
        if let Some(url) = parsed.checkout_url {
            return Ok(SubscriptionOutcome::CheckoutRequired { url });
        }
        match parsed.subscription {
            Some(subscription) => Ok(SubscriptionOutcome::Activated(subscription)),
            None => Err(ApiError::Status {
                status: 502,
                body: "subscription response carried neither checkout url nor subscription".into(),
            }),
        }
    }

    async fn cancel_subscription(&self, user_id: &str) -> ApiResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/users/{user_id}/subscription")))
            .send()
            .await?;
        ApiError::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_wins_over_subscription_body() {
        let raw = r#"{
            "checkoutUrl": "https://pay.example/cs_1",
            "subscription": { "plan": "basic", "status": "active", "currentPeriodEnd": "2026-09-01" }
        }"#;
        let parsed: CreateSubscriptionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.checkout_url.as_deref(), Some("https://pay.example/cs_1"));
        assert!(parsed.subscription.is_some());
    }

    #[test]
    fn create_request_serializes_plan_id() {
        let raw = serde_json::to_value(CreateSubscriptionRequest {
            user_id: "u1",
            plan: PlanId::Premium,
        })
        .unwrap();
        assert_eq!(raw, serde_json::json!({ "userId": "u1", "plan": "premium" }));
    }
}
