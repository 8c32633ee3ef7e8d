//! Bounded ancestor traversal shared by both engines.
//!
//! The walker climbs one parent per call over any [`ParentLookup`]. The
//! pairing engine walks the placement tree, the commission engine walks the
//! sponsorship chain. Both stop at a root, at the level cap, at a record that
//! does not exist, or on the first repeated account.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::model::{AccountId, GenealogyNode, Side};
use crate::storage::{GenealogyStore, Result};

/// Where an account points in a parent relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLink {
    /// No record for the account.
    Missing,
    /// The account exists and has no parent.
    Root,
    Parent {
        parent: AccountId,
        /// Side the account occupies under its parent, when the relation has
        /// sides.
        side: Option<Side>,
    },
}

/// One parent relation over accounts.
#[async_trait]
pub trait ParentLookup: Send + Sync {
    async fn parent_of(&self, account: AccountId) -> Result<ParentLink>;
}

/// Placement tree relation: parent and left/right slot.
pub struct PlacementTree {
    store: Arc<dyn GenealogyStore>,
}

impl PlacementTree {
    pub fn new(store: Arc<dyn GenealogyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ParentLookup for PlacementTree {
    async fn parent_of(&self, account: AccountId) -> Result<ParentLink> {
        Ok(match self.store.node(account).await? {
            None => ParentLink::Missing,
            Some(node) => link_of(&node),
        })
    }
}

/// Sponsorship relation: sponsor only, no sides.
pub struct SponsorTree {
    store: Arc<dyn GenealogyStore>,
}

impl SponsorTree {
    pub fn new(store: Arc<dyn GenealogyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ParentLookup for SponsorTree {
    async fn parent_of(&self, account: AccountId) -> Result<ParentLink> {
        Ok(match self.store.account(account).await? {
            None => ParentLink::Missing,
            Some(record) => match record.sponsor_account_id {
                None => ParentLink::Root,
                Some(sponsor) => ParentLink::Parent {
                    parent: sponsor,
                    side: None,
                },
            },
        })
    }
}

fn link_of(node: &GenealogyNode) -> ParentLink {
    match node.parent_account_id {
        None => ParentLink::Root,
        Some(parent) => ParentLink::Parent {
            parent,
            side: node.side,
        },
    }
}

/// Why an ascent stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AscentHalt {
    /// Reached an account with no parent.
    Root,
    /// Reached the configured maximum level.
    LevelCap,
    /// The bonus at this level is zero, and so is every level above it.
    ZeroAmount { level: u32 },
    /// No record exists for this account.
    MissingAncestor(AccountId),
    /// This account has no side under its parent.
    MissingSide(AccountId),
    /// This account was reached twice.
    Cycle(AccountId),
}

impl AscentHalt {
    /// Whether the stop came from bad genealogy data rather than the end of
    /// the chain.
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            AscentHalt::MissingAncestor(_) | AscentHalt::MissingSide(_) | AscentHalt::Cycle(_)
        )
    }
}

impl fmt::Display for AscentHalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AscentHalt::Root => f.write_str("root"),
            AscentHalt::LevelCap => f.write_str("level cap"),
            AscentHalt::ZeroAmount { level } => write!(f, "zero amount at level {level}"),
            AscentHalt::MissingAncestor(id) => write!(f, "missing ancestor {id}"),
            AscentHalt::MissingSide(id) => write!(f, "missing side for {id}"),
            AscentHalt::Cycle(id) => write!(f, "cycle at {id}"),
        }
    }
}

/// One rung of an ascent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorStep {
    pub ancestor: AccountId,
    /// 1-based distance from the starting account.
    pub level: u32,
    /// The path child directly beneath `ancestor`.
    pub child: AccountId,
    /// Side `child` occupies under `ancestor`.
    pub child_side: Option<Side>,
}

pub struct AncestorWalker<'a, L: ParentLookup + ?Sized> {
    lookup: &'a L,
    child: AccountId,
    link: ParentLink,
    level: u32,
    max_depth: u32,
    visited: HashSet<AccountId>,
    halt: Option<AscentHalt>,
}

impl<'a, L: ParentLookup + ?Sized> AncestorWalker<'a, L> {
    /// Walk upward from an account whose own link is already known.
    pub fn from_link(lookup: &'a L, start: AccountId, link: ParentLink, max_depth: u32) -> Self {
        Self {
            lookup,
            child: start,
            link,
            level: 0,
            max_depth,
            visited: HashSet::from([start]),
            halt: None,
        }
    }

    /// Walk upward from a placement node that may not be stored yet.
    pub fn from_node(lookup: &'a L, node: &GenealogyNode, max_depth: u32) -> Self {
        Self::from_link(lookup, node.account_id, link_of(node), max_depth)
    }

    /// Walk upward from a stored account.
    pub async fn start(lookup: &'a L, start: AccountId, max_depth: u32) -> Result<Self> {
        let link = lookup.parent_of(start).await?;
        Ok(Self::from_link(lookup, start, link, max_depth))
    }

    /// Why the walk ended, once it has.
    pub fn halt(&self) -> Option<AscentHalt> {
        self.halt
    }

    /// Yield the next ancestor, or `None` once the walk has ended.
    ///
    /// An ancestor is only yielded after its own record has been read, so a
    /// dangling parent id ends the walk before that level is reported.
    pub async fn next_ancestor(&mut self) -> Result<Option<AncestorStep>> {
        if self.halt.is_some() {
            return Ok(None);
        }

        let (parent, side) = match self.link {
            ParentLink::Root => return Ok(self.stop(AscentHalt::Root)),
            ParentLink::Missing => return Ok(self.stop(AscentHalt::MissingAncestor(self.child))),
            ParentLink::Parent { parent, side } => (parent, side),
        };

        if self.level >= self.max_depth {
            return Ok(self.stop(AscentHalt::LevelCap));
        }
        if !self.visited.insert(parent) {
            return Ok(self.stop(AscentHalt::Cycle(parent)));
        }

        let next = self.lookup.parent_of(parent).await?;
        if next == ParentLink::Missing {
            return Ok(self.stop(AscentHalt::MissingAncestor(parent)));
        }

        self.level += 1;
        let step = AncestorStep {
            ancestor: parent,
            level: self.level,
            child: self.child,
            child_side: side,
        };
        self.child = parent;
        self.link = next;
        Ok(Some(step))
    }

    fn stop(&mut self, reason: AscentHalt) -> Option<AncestorStep> {
        if reason.is_anomaly() {
            warn!(from = %self.child, level = self.level, reason = %reason, "Ascent halted");
        } else {
            debug!(from = %self.child, level = self.level, reason = %reason, "Ascent finished");
        }
        self.halt = Some(reason);
        None
    }
}
