use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;

use super::*;
use crate::storage::{MockGenealogyStore, MockLedgerStore};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap()
}

struct Fixture {
    genealogy: Arc<MockGenealogyStore>,
    ledger: Arc<MockLedgerStore>,
    matcher: PairingMatcher,
    config: CompensationConfig,
    tick: i64,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(CompensationConfig::default())
    }

    fn with_config(config: CompensationConfig) -> Self {
        let genealogy = Arc::new(MockGenealogyStore::new());
        let ledger = Arc::new(MockLedgerStore::new());
        let matcher = PairingMatcher::new(genealogy.clone(), ledger.clone());
        Self {
            genealogy,
            ledger,
            matcher,
            config,
            tick: 0,
        }
    }

    async fn root(&self, id: i64) -> GenealogyNode {
        let node = GenealogyNode::root(AccountId(id));
        self.genealogy.place(&node).await.unwrap();
        node
    }

    /// Store a child node without running the matcher.
    async fn attach(&self, id: i64, parent: i64, side: Side) -> GenealogyNode {
        let parent = self.genealogy.node(AccountId(parent)).await.unwrap().unwrap();
        let node = GenealogyNode::child(AccountId(id), &parent, side);
        self.genealogy.place(&node).await.unwrap();
        node
    }

    async fn run(&mut self, node: &GenealogyNode, commit: PairingCommit) -> PlacementReport {
        self.tick += 1;
        let now = t0() + Duration::seconds(self.tick);
        self.matcher
            .handle_new_placement(&self.config, node, commit, now)
            .await
            .unwrap()
    }

    /// Store a child node and run the matcher for it in per-level mode.
    async fn place(&mut self, id: i64, parent: i64, side: Side) -> PlacementReport {
        let node = self.attach(id, parent, side).await;
        self.run(&node, PairingCommit::PerLevel).await
    }
}

fn matched(outcome: &LevelOutcome) -> (i64, i64, Decimal) {
    match &outcome.result {
        ClaimResult::Matched { pairing, .. } => (
            pairing.left_account_id.0,
            pairing.right_account_id.0,
            pairing.amount,
        ),
        other => panic!("expected a match, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sibling_placements_complete_one_pair() {
    let mut fx = Fixture::new();
    fx.root(1).await;

    let first = fx.place(2, 1, Side::Left).await;
    assert_eq!(first.levels.len(), 1);
    assert!(matches!(first.levels[0].result, ClaimResult::Queued(_)));
    assert_eq!(first.halt, AscentHalt::Root);
    let waiting = fx
        .ledger
        .pending_entries(AccountId(1), 1, Side::Left)
        .await
        .unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].node_account_id, AccountId(2));
    assert!(fx.ledger.pairing_history(AccountId(1)).await.unwrap().is_empty());

    let second = fx.place(3, 1, Side::Right).await;
    assert_eq!(second.matches(), 1);
    assert_eq!(matched(&second.levels[0]), (2, 3, dec!(300)));
    assert_eq!(fx.ledger.queue_len().await, 0);

    let history = fx.ledger.pairing_history(AccountId(1)).await.unwrap();
    assert_eq!(history.len(), 1);
    let income = fx.ledger.income_history(AccountId(1)).await.unwrap();
    assert_eq!(income.len(), 1);
    assert_eq!(income[0].amount, dec!(300));
    assert_eq!(income[0].pairing_history_id, history[0].id);
    assert_eq!(income[0].source, "pairing");
}

#[tokio::test]
async fn test_side_is_resolved_per_ancestor() {
    let mut fx = Fixture::new();
    fx.root(1).await;
    fx.place(2, 1, Side::Left).await;
    fx.place(3, 1, Side::Right).await;

    // 4 sits left under 2, and 2 sits left under 1
    let report = fx.place(4, 2, Side::Left).await;
    assert_eq!(report.levels.len(), 2);
    assert_eq!(report.levels[1].ancestor, AccountId(1));
    assert_eq!(report.levels[1].side, Side::Left);

    // 5 sits left under 3, but 3 sits right under 1
    let report = fx.place(5, 3, Side::Left).await;
    assert_eq!(report.levels[0].side, Side::Left);
    assert!(matches!(report.levels[0].result, ClaimResult::Queued(_)));
    assert_eq!(report.levels[1].side, Side::Right);
    assert_eq!(matched(&report.levels[1]), (4, 5, dec!(270)));
    assert_eq!(report.total_paid(), dec!(270));
}

#[tokio::test]
async fn test_oldest_waiting_half_is_claimed_first() {
    let mut fx = Fixture::new();
    fx.root(1).await;
    fx.place(2, 1, Side::Left).await;
    fx.place(3, 1, Side::Right).await;
    fx.place(4, 2, Side::Left).await;
    fx.place(5, 2, Side::Right).await;

    let waiting = fx
        .ledger
        .pending_entries(AccountId(1), 2, Side::Left)
        .await
        .unwrap();
    let nodes: Vec<i64> = waiting.iter().map(|e| e.node_account_id.0).collect();
    assert_eq!(nodes, vec![4, 5]);

    let report = fx.place(6, 3, Side::Left).await;
    assert_eq!(matched(&report.levels[1]), (4, 6, dec!(270)));

    let report = fx.place(7, 3, Side::Right).await;
    assert_eq!(matched(&report.levels[0]), (6, 7, dec!(300)));
    assert_eq!(matched(&report.levels[1]), (5, 7, dec!(270)));
    assert_eq!(fx.ledger.queue_len().await, 0);
}

#[tokio::test]
async fn test_missing_side_halts_ascent() {
    let mut fx = Fixture::new();
    fx.root(1).await;
    fx.genealogy
        .insert_node_unchecked(GenealogyNode {
            account_id: AccountId(2),
            parent_account_id: Some(AccountId(1)),
            side: None,
            level: 1,
        })
        .await;

    let report = fx.place(3, 2, Side::Left).await;
    assert_eq!(report.levels.len(), 1);
    assert_eq!(report.levels[0].ancestor, AccountId(2));
    assert_eq!(report.halt, AscentHalt::MissingSide(AccountId(2)));
    // level 1 stays committed
    assert_eq!(fx.ledger.queue_len().await, 1);
}

#[tokio::test]
async fn test_dangling_parent_records_nothing() {
    let mut fx = Fixture::new();
    let node = GenealogyNode {
        account_id: AccountId(5),
        parent_account_id: Some(AccountId(99)),
        side: Some(Side::Left),
        level: 1,
    };
    let report = fx.run(&node, PairingCommit::PerLevel).await;
    assert!(report.levels.is_empty());
    assert_eq!(report.halt, AscentHalt::MissingAncestor(AccountId(99)));
    assert_eq!(fx.ledger.queue_len().await, 0);
}

#[tokio::test]
async fn test_root_placement_is_noop() {
    let mut fx = Fixture::new();
    let root = fx.root(1).await;
    let report = fx.run(&root, PairingCommit::PerLevel).await;
    assert!(report.levels.is_empty());
    assert_eq!(report.halt, AscentHalt::Root);
}

#[tokio::test]
async fn test_zero_amount_stops_ascent() {
    let mut fx = Fixture::with_config(CompensationConfig {
        pairing_base: dec!(60),
        pairing_decrement: dec!(30),
        ..CompensationConfig::default()
    });
    fx.root(1).await;
    fx.place(2, 1, Side::Left).await;
    fx.place(3, 2, Side::Left).await;

    let report = fx.place(4, 3, Side::Left).await;
    assert_eq!(report.levels.len(), 2);
    assert_eq!(report.halt, AscentHalt::ZeroAmount { level: 3 });
    assert!(fx
        .ledger
        .pending_entries(AccountId(1), 3, Side::Left)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_level_cap_limits_ascent() {
    let mut fx = Fixture::with_config(CompensationConfig {
        pairing_max_level: 1,
        ..CompensationConfig::default()
    });
    fx.root(1).await;
    fx.place(2, 1, Side::Left).await;

    let report = fx.place(3, 2, Side::Right).await;
    assert_eq!(report.levels.len(), 1);
    assert_eq!(report.levels[0].ancestor, AccountId(2));
    assert_eq!(report.halt, AscentHalt::LevelCap);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let mut fx = Fixture::new();
    fx.root(1).await;
    let left = fx.attach(2, 1, Side::Left).await;
    fx.run(&left, PairingCommit::PerLevel).await;
    let right = fx.attach(3, 1, Side::Right).await;
    fx.run(&right, PairingCommit::PerLevel).await;

    for node in [&left, &right] {
        let again = fx.run(node, PairingCommit::PerLevel).await;
        assert_eq!(again.levels.len(), 1);
        assert_eq!(again.levels[0].result, ClaimResult::AlreadySettled);
    }
    assert_eq!(fx.ledger.pairing_history(AccountId(1)).await.unwrap().len(), 1);
    assert_eq!(fx.ledger.queue_len().await, 0);

    // a queued half is settled too
    let lone = fx.attach(4, 2, Side::Left).await;
    fx.run(&lone, PairingCommit::PerLevel).await;
    let again = fx.run(&lone, PairingCommit::PerLevel).await;
    assert!(again
        .levels
        .iter()
        .all(|l| l.result == ClaimResult::AlreadySettled));
    assert_eq!(fx.ledger.queue_len().await, 2);
}

#[tokio::test]
async fn test_whole_ascent_settles_every_level() {
    let mut fx = Fixture::new();
    fx.root(1).await;
    let two = fx.attach(2, 1, Side::Left).await;
    fx.run(&two, PairingCommit::WholeAscent).await;
    let four = fx.attach(4, 2, Side::Left).await;

    let report = fx.run(&four, PairingCommit::WholeAscent).await;
    assert_eq!(report.levels.len(), 2);
    assert_eq!(
        report.levels.iter().map(|l| l.level).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(fx.ledger.queue_len().await, 3);
}

#[tokio::test]
async fn test_whole_ascent_failure_writes_nothing() {
    let mut fx = Fixture::new();
    fx.root(1).await;
    let two = fx.attach(2, 1, Side::Left).await;
    let four = fx.attach(4, 2, Side::Left).await;

    fx.ledger.set_contention_failures(1).await;
    let err = fx
        .matcher
        .handle_new_placement(&fx.config, &four, PairingCommit::WholeAscent, t0())
        .await
        .unwrap_err();
    assert!(err.is_contention());
    assert_eq!(fx.ledger.queue_len().await, 0);

    let report = fx.run(&two, PairingCommit::WholeAscent).await;
    assert_eq!(report.levels.len(), 1);
}

#[tokio::test]
async fn test_per_level_failure_keeps_lower_levels_and_resumes() {
    let mut fx = Fixture::new();
    fx.root(1).await;
    fx.place(2, 1, Side::Left).await;
    // 5 waits on the right under 2 and on the left under 1
    fx.place(5, 2, Side::Right).await;
    let four = fx.attach(4, 2, Side::Left).await;

    fx.ledger.set_outage_after(Some(1)).await;
    let err = fx
        .matcher
        .handle_new_placement(&fx.config, &four, PairingCommit::PerLevel, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert!(!err.is_contention());

    let history = fx.ledger.pairing_history(AccountId(2)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].left_account_id, AccountId(4));
    assert_eq!(history[0].right_account_id, AccountId(5));
    let waiting = fx
        .ledger
        .pending_entries(AccountId(1), 2, Side::Left)
        .await
        .unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].node_account_id, AccountId(5));

    fx.ledger.set_outage_after(None).await;
    let report = fx.run(&four, PairingCommit::PerLevel).await;
    assert_eq!(report.levels.len(), 2);
    assert_eq!(report.levels[0].result, ClaimResult::AlreadySettled);
    assert!(matches!(report.levels[1].result, ClaimResult::Queued(_)));
    assert_eq!(report.levels[1].ancestor, AccountId(1));

    let waiting = fx
        .ledger
        .pending_entries(AccountId(1), 2, Side::Left)
        .await
        .unwrap();
    assert_eq!(
        waiting.iter().map(|e| e.node_account_id).collect::<Vec<_>>(),
        vec![AccountId(5), AccountId(4)]
    );
    assert_eq!(fx.ledger.pairing_history(AccountId(2)).await.unwrap().len(), 1);
}
