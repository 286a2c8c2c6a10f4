//! Taskforce rule pipeline scenarios against the in-memory board system.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use habsync_core::{BoardId, CardId, Error, LabelId, UserId, Username};
use regex::Regex;
use habsync_reconciler::{
    AuthMethod, BoardSystem, CancelFlag, DesiredState, DesiredUser, InMemoryBoards, Pipeline, ReconcilerConfig,
    StageName,
};

struct Fixture {
    boards: Arc<InMemoryBoards>,
    board: BoardId,
    label: LabelId,
    card: CardId,
    user: UserId,
}

async fn fixture() -> Fixture {
    let boards = Arc::new(InMemoryBoards::new());
    let board = boards.seed_board("tableau-nord", &["T", "V"]).await;
    let label = LabelId::new("tableau-nord:T");
    let card = boards.seed_card(&board, &[label.clone()], &[]).await;
    let user = boards.seed_user("u@x.org", AuthMethod::Oauth2).await;
    Fixture {
        boards,
        board,
        label,
        card,
        user,
    }
}

fn member(taskforces: &[&str]) -> DesiredState {
    let user = taskforces.iter().fold(
        DesiredUser::new("u@x.org")
            .with_scope("wekan")
            .with_board("tableau-nord"),
        |user, t| user.with_taskforce(*t),
    );
    DesiredState::new().with_user(user).unwrap()
}

fn pipeline(boards: &Arc<InMemoryBoards>) -> Pipeline {
    Pipeline::taskforce(boards.clone(), ReconcilerConfig::default(), CancelFlag::new())
}

async fn card_members(boards: &InMemoryBoards, card: &CardId) -> Vec<UserId> {
    boards
        .snapshot()
        .await
        .cards
        .into_iter()
        .find(|c| &c.id == card)
        .map(|c| c.members)
        .unwrap_or_default()
}

#[tokio::test]
async fn test_add_creates_one_rule_and_card_membership() {
    // GIVEN: U in taskforce T, board carrying label T on one card
    let f = fixture().await;

    // WHEN: running the pipeline up to the add stage
    let report = pipeline(&f.boards)
        .stop_after(&member(&["T"]), StageName::AddMissingRulesAndCardMembership)
        .await
        .unwrap();

    // THEN: exactly one rule (board, T, U) and U on the card
    assert_eq!(report.stages.len(), 1);
    let rules = f.boards.list_rules(&f.board).await.unwrap();
    assert_eq!(rules.len(), 1);
    let rule = rules.first().unwrap();
    assert_eq!(rule.label_id, f.label);
    assert_eq!(rule.username, Username::new("u@x.org"));
    assert_eq!(card_members(&f.boards, &f.card).await, vec![f.user.clone()]);
}

#[tokio::test]
async fn test_empty_taskforces_remove_rule_and_card_membership() {
    let f = fixture().await;
    pipeline(&f.boards).run(&member(&["T"])).await.unwrap();

    // WHEN: U leaves every taskforce
    pipeline(&f.boards).run(&member(&[])).await.unwrap();

    // THEN
    assert!(f.boards.list_rules(&f.board).await.unwrap().is_empty());
    assert!(card_members(&f.boards, &f.card).await.is_empty());
}

#[tokio::test]
async fn test_leaving_board_scope_removes_rule() {
    let f = fixture().await;
    pipeline(&f.boards).run(&member(&["T"])).await.unwrap();

    let outside = DesiredState::new()
        .with_user(
            DesiredUser::new("u@x.org")
                .with_board("tableau-nord")
                .with_taskforce("T"),
        )
        .unwrap();
    pipeline(&f.boards).run(&outside).await.unwrap();

    assert!(f.boards.list_rules(&f.board).await.unwrap().is_empty());
    assert!(card_members(&f.boards, &f.card).await.is_empty());
}

#[tokio::test]
async fn test_leaving_board_removes_rule() {
    let f = fixture().await;
    pipeline(&f.boards).run(&member(&["T"])).await.unwrap();

    let elsewhere = DesiredState::new()
        .with_user(DesiredUser::new("u@x.org").with_scope("wekan").with_taskforce("T"))
        .unwrap();
    pipeline(&f.boards).run(&elsewhere).await.unwrap();

    assert!(f.boards.list_rules(&f.board).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_taskforce_without_label_is_skipped() {
    let f = fixture().await;

    let report = pipeline(&f.boards).run(&member(&["absent"])).await.unwrap();

    assert!(!report.has_failures());
    assert!(f.boards.list_rules(&f.board).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_card_membership_kept_while_another_taskforce_justifies_it() {
    // GIVEN: a card carrying both T and V, U in both taskforces
    let f = fixture().await;
    let both = f
        .boards
        .seed_card(
            &f.board,
            &[f.label.clone(), LabelId::new("tableau-nord:V")],
            &[],
        )
        .await;
    pipeline(&f.boards).run(&member(&["T", "V"])).await.unwrap();

    // WHEN: U leaves T only
    pipeline(&f.boards).run(&member(&["V"])).await.unwrap();

    // THEN: the V rule stays and keeps U on the shared card
    let rules = f.boards.list_rules(&f.board).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(card_members(&f.boards, &both).await, vec![f.user.clone()]);
    assert!(card_members(&f.boards, &f.card).await.is_empty());
}

#[tokio::test]
async fn test_duplicate_rules_are_collapsed() {
    let f = fixture().await;
    f.boards.seed_rule(&f.board, &f.label, "u@x.org").await;
    f.boards.seed_rule(&f.board, &f.label, "u@x.org").await;

    pipeline(&f.boards).run(&member(&["T"])).await.unwrap();

    assert_eq!(f.boards.list_rules(&f.board).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let f = fixture().await;
    pipeline(&f.boards).run(&member(&["T"])).await.unwrap();

    let second = pipeline(&f.boards).run(&member(&["T"])).await.unwrap();

    assert!(second.is_converged());
}

#[tokio::test]
async fn test_failed_card_release_keeps_rule_for_next_run() {
    // GIVEN: U on the card through taskforce T, card updates failing
    let f = fixture().await;
    pipeline(&f.boards).run(&member(&["T"])).await.unwrap();
    f.boards
        .inject_failure(
            "remove_card_member",
            None,
            Error::transport("remove card member", "connection reset"),
        )
        .await;

    // WHEN: U leaves T while the board system fails
    let failed = pipeline(&f.boards).run(&member(&[])).await;

    // THEN: the rule survives to drive the cleanup of the next run
    assert!(failed.is_err());
    assert_eq!(f.boards.list_rules(&f.board).await.unwrap().len(), 1);
    assert_eq!(card_members(&f.boards, &f.card).await, vec![f.user.clone()]);

    // AND: a run on the healthy system finishes the job
    f.boards.clear_failures().await;
    pipeline(&f.boards).run(&member(&[])).await.unwrap();
    assert!(f.boards.list_rules(&f.board).await.unwrap().is_empty());
    assert!(card_members(&f.boards, &f.card).await.is_empty());
}

#[tokio::test]
async fn test_rejected_card_release_is_reported_and_retried() {
    let f = fixture().await;
    pipeline(&f.boards).run(&member(&["T"])).await.unwrap();
    f.boards
        .inject_failure("remove_card_member", None, Error::rejected("remove card member", "locked"))
        .await;

    let report = pipeline(&f.boards).run(&member(&[])).await.unwrap();

    assert!(report.has_failures());
    assert_eq!(f.boards.list_rules(&f.board).await.unwrap().len(), 1);

    f.boards.clear_failures().await;
    let retry = pipeline(&f.boards).run(&member(&[])).await.unwrap();
    assert!(!retry.has_failures());
    assert!(card_members(&f.boards, &f.card).await.is_empty());
    assert!(f.boards.list_rules(&f.board).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rules_on_dropped_board_outside_domain_are_removed() {
    // GIVEN: a domain restricted to "tableau-" boards and U in T on "atelier"
    let boards = Arc::new(InMemoryBoards::new().with_domain(Regex::new("^tableau-").unwrap()));
    let atelier = boards.seed_board("atelier", &["T"]).await;
    let label = LabelId::new("atelier:T");
    let card = boards.seed_card(&atelier, &[label], &[]).await;
    boards.seed_user("u@x.org", AuthMethod::Oauth2).await;
    let listed = DesiredState::new()
        .with_user(
            DesiredUser::new("u@x.org")
                .with_scope("wekan")
                .with_board("atelier")
                .with_taskforce("T"),
        )
        .unwrap();
    pipeline(&boards).run(&listed).await.unwrap();
    assert_eq!(boards.list_rules(&atelier).await.unwrap().len(), 1);

    // WHEN: nobody lists the board any more
    let dropped = DesiredState::new()
        .with_user(DesiredUser::new("u@x.org").with_scope("wekan").with_taskforce("T"))
        .unwrap();
    pipeline(&boards).run(&dropped).await.unwrap();

    // THEN: its rule and card membership are still cleaned up
    assert!(boards.list_rules(&atelier).await.unwrap().is_empty());
    assert!(card_members(&boards, &card).await.is_empty());
}
