use async_trait::async_trait;
use tokio::sync::RwLock;

use super::check_toggle;
use crate::dlq::DeadLetter;
use crate::interfaces::{DeadLetterStore, Result};
use crate::model::CanonicalTenantId;

#[derive(Default)]
pub struct MockDeadLetterStore {
    dead_letters: RwLock<Vec<DeadLetter>>,
    unavailable: RwLock<bool>,
}

impl MockDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }
}

#[async_trait]
impl DeadLetterStore for MockDeadLetterStore {
    async fn insert(&self, dead_letter: &DeadLetter) -> Result<()> {
        check_toggle(&self.unavailable, "dead letter store").await?;
        self.dead_letters.write().await.push(dead_letter.clone());
        Ok(())
    }

    async fn list(
        &self,
        site_id: Option<CanonicalTenantId>,
        limit: usize,
    ) -> Result<Vec<DeadLetter>> {
        check_toggle(&self.unavailable, "dead letter store").await?;
        Ok(self
            .dead_letters
            .read()
            .await
            .iter()
            .rev()
            .filter(|dl| site_id.map_or(true, |site| dl.site_id == site))
            .take(limit)
            .cloned()
            .collect())
    }
}
