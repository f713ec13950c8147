//! Production refresh target
//!
//! Routes refresh requests into the typed read layer and feeds every
//! user-scope refresh's allowance back into the approval tracker, which is
//! how the tracker self-corrects against externally changed allowances.

use async_trait::async_trait;
use std::sync::Arc;

use crate::adapters::VaultReader;
use crate::error::Result;
use crate::services::RefreshTarget;
use crate::workflow::approval::ApprovalTracker;

pub struct VaultRefreshTarget {
    reader: Arc<VaultReader>,
    approval: Arc<ApprovalTracker>,
}

impl VaultRefreshTarget {
    pub fn new(reader: Arc<VaultReader>, approval: Arc<ApprovalTracker>) -> Self {
        Self { reader, approval }
    }
}

#[async_trait]
impl RefreshTarget for VaultRefreshTarget {
    async fn refresh_user(&self) -> Result<()> {
        let snapshot = self.reader.refresh_user().await?;
        if !self.reader.context().native_asset {
            self.approval.observe_allowance(snapshot.allowance);
        }
        Ok(())
    }

    async fn refresh_global(&self) -> Result<()> {
        self.reader.refresh_global().await?;
        Ok(())
    }
}
