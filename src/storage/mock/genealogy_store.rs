//! In-memory GenealogyStore.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{AccountId, GenealogyNode, Side};
use crate::storage::{Account, GenealogyStore, Result, StorageError};

/// Genealogy store that keeps accounts and placement nodes in memory.
#[derive(Default)]
pub struct MockGenealogyStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
    nodes: RwLock<HashMap<AccountId, GenealogyNode>>,
}

impl MockGenealogyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node without slot validation, for corrupt-tree tests.
    pub async fn insert_node_unchecked(&self, node: GenealogyNode) {
        self.nodes.write().await.insert(node.account_id, node);
    }
}

#[async_trait]
impl GenealogyStore for MockGenealogyStore {
    async fn register_account(&self, account: AccountId, sponsor: Option<AccountId>) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account) {
            return Err(StorageError::AlreadyRegistered(account));
        }
        if let Some(sponsor) = sponsor {
            if !accounts.contains_key(&sponsor) {
                return Err(StorageError::UnknownAccount(sponsor));
            }
        }
        accounts.insert(
            account,
            Account {
                account_id: account,
                sponsor_account_id: sponsor,
            },
        );
        Ok(())
    }

    async fn account(&self, account: AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&account).cloned())
    }

    async fn place(&self, node: &GenealogyNode) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.account_id) {
            return Err(StorageError::AlreadyPlaced(node.account_id));
        }
        if let Some(parent) = node.parent_account_id {
            if !nodes.contains_key(&parent) {
                return Err(StorageError::UnknownAccount(parent));
            }
            if let Some(side) = node.side {
                let taken = nodes
                    .values()
                    .any(|n| n.parent_account_id == Some(parent) && n.side == Some(side));
                if taken {
                    return Err(StorageError::SlotTaken { parent, side });
                }
            }
        }
        nodes.insert(node.account_id, node.clone());
        Ok(())
    }

    async fn node(&self, account: AccountId) -> Result<Option<GenealogyNode>> {
        Ok(self.nodes.read().await.get(&account).cloned())
    }

    async fn children(&self, parent: AccountId) -> Result<Vec<GenealogyNode>> {
        let nodes = self.nodes.read().await;
        let mut children: Vec<GenealogyNode> = nodes
            .values()
            .filter(|n| n.parent_account_id == Some(parent))
            .cloned()
            .collect();
        children.sort_by_key(|n| match n.side {
            Some(Side::Left) => 0,
            Some(Side::Right) => 1,
            None => 2,
        });
        Ok(children)
    }
}
