//! Taskforce automation rules and the card memberships they imply.
//!
//! A desired user listing board `B` and taskforce `T` implies one rule
//! `(B, label "T", user)` whenever `B` carries a label named `T`, and card
//! membership on every card of `B` carrying that label.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use habsync_core::{BoardId, BoardSlug, Error, LabelId, Outcome, Result, ResultExt, UserId, Username};
use tracing::{debug, info, warn};

use crate::boards::{AutomationRule, Board, BoardSystem, Card};
use crate::desired::DesiredState;
use crate::report::StageReport;
use crate::stage::{Stage, StageContext, StageName};

/// Identity of a rule: two rules with the same key are duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey {
    pub board: BoardId,
    pub label: LabelId,
    pub username: Username,
}

impl RuleKey {
    fn of(rule: &AutomationRule) -> Self {
        Self {
            board: rule.board_id.clone(),
            label: rule.label_id.clone(),
            username: rule.username.clone(),
        }
    }
}

/// Rules the desired state implies on `boards`.
///
/// Taskforces without a matching label on a board are skipped.
pub fn implied_rules(desired: &DesiredState, boards: &[Board]) -> BTreeSet<RuleKey> {
    let by_slug: HashMap<&BoardSlug, &Board> = boards.iter().map(|b| (&b.slug, b)).collect();
    let mut implied = BTreeSet::new();
    for user in desired.users().filter(|u| !u.taskforces.is_empty()) {
        for board in user.boards.iter().filter_map(|slug| by_slug.get(slug)) {
            for taskforce in &user.taskforces {
                match board.label_named(taskforce) {
                    Some(label) => {
                        implied.insert(RuleKey {
                            board: board.id.clone(),
                            label: label.id.clone(),
                            username: user.username.clone(),
                        });
                    }
                    None => {
                        debug!(board = %board.slug, taskforce = %taskforce, "board has no label for taskforce");
                    }
                }
            }
        }
    }
    implied
}

/// Whether a still-implied rule keeps `username` on `card`.
fn justified(implied: &BTreeSet<RuleKey>, card: &Card, username: &Username) -> bool {
    card.label_ids.iter().any(|label| {
        implied.contains(&RuleKey {
            board: card.board_id.clone(),
            label: label.clone(),
            username: username.clone(),
        })
    })
}

/// Domain boards plus every board a desired user lists.
///
/// Listed boards that cannot be found are recorded in `report`.
async fn load_boards(
    system: &dyn BoardSystem,
    desired: &DesiredState,
    report: &mut StageReport,
) -> Result<Vec<Board>> {
    let mut boards = system.list_domain_boards().await?;
    let listed: BTreeSet<&BoardSlug> = desired.users().flat_map(|u| u.boards.iter()).collect();
    for slug in listed {
        if boards.iter().any(|b| &b.slug == slug) {
            continue;
        }
        match system.get_board(slug).await.entity_scoped()? {
            Ok(board) => boards.push(board),
            Err(e) => {
                warn!(board = %slug, error = %e, "listed board not found");
                report.record_failure(slug.to_string(), "resolve board", e);
            }
        }
    }
    Ok(boards)
}

/// [`load_boards`] plus every board still carrying a rule, so rules left on
/// boards nobody lists any more are reached too.
async fn load_boards_with_rules(
    system: &dyn BoardSystem,
    desired: &DesiredState,
    report: &mut StageReport,
) -> Result<Vec<Board>> {
    let mut boards = load_boards(system, desired, report).await?;
    for id in system.list_ruled_boards().await? {
        if boards.iter().any(|b| b.id == id) {
            continue;
        }
        match system.get_board_by_id(&id).await.entity_scoped()? {
            Ok(board) => boards.push(board),
            Err(e) => {
                warn!(board = %id, error = %e, "board carrying rules not found");
                report.record_failure(id.to_string(), "resolve board", e);
            }
        }
    }
    Ok(boards)
}

async fn user_ids(system: &dyn BoardSystem) -> Result<HashMap<Username, UserId>> {
    Ok(system
        .list_users()
        .await?
        .into_iter()
        .map(|u| (u.username, u.id))
        .collect())
}

async fn cards_with_label(
    system: &dyn BoardSystem,
    key: &RuleKey,
    report: &mut StageReport,
) -> Result<Option<Vec<Card>>> {
    match system
        .list_cards_with_label(&key.board, &key.label)
        .await
        .entity_scoped()?
    {
        Ok(cards) => Ok(Some(cards)),
        Err(e) => {
            report.record_failure(format!("{}/{}", key.board, key.label), "list cards", e);
            Ok(None)
        }
    }
}

/// Record one card membership change; `false` when it failed.
fn record_card(
    report: &mut StageReport,
    card: &Card,
    key: &RuleKey,
    operation: &'static str,
    outcome: Result<Outcome>,
) -> Result<bool> {
    match outcome.entity_scoped()? {
        Ok(Outcome::Changed) => {
            info!(card = %card.id, username = %key.username, operation, "card membership changed");
            report.record_change();
            Ok(true)
        }
        Ok(Outcome::Unchanged) => {
            report.record_unchanged();
            Ok(true)
        }
        Err(e) => {
            warn!(card = %card.id, username = %key.username, operation, error = %e, "card membership change failed");
            report.record_failure(format!("{}/{}", card.id, key.username), operation, e);
            Ok(false)
        }
    }
}

/// Creates missing rules and adds taskforce members to labelled cards.
pub struct AddMissingRulesStage {
    boards: Arc<dyn BoardSystem>,
}

impl AddMissingRulesStage {
    pub fn new(boards: Arc<dyn BoardSystem>) -> Self {
        Self { boards }
    }
}

#[async_trait]
impl Stage for AddMissingRulesStage {
    fn name(&self) -> StageName {
        StageName::AddMissingRulesAndCardMembership
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let system = self.boards.as_ref();
        let boards = load_boards(system, ctx.desired, &mut report).await?;
        let implied = implied_rules(ctx.desired, &boards);
        let ids = user_ids(system).await?;

        for board in &boards {
            let wanted: Vec<&RuleKey> = implied.iter().filter(|k| k.board == board.id).collect();
            if wanted.is_empty() {
                continue;
            }
            let existing: BTreeSet<RuleKey> = system
                .list_rules(&board.id)
                .await?
                .iter()
                .map(RuleKey::of)
                .collect();

            for key in wanted {
                ctx.cancel.check()?;
                if existing.contains(key) {
                    report.record_unchanged();
                } else {
                    match system
                        .create_rule(&key.board, &key.label, &key.username)
                        .await
                        .entity_scoped()?
                    {
                        Ok(rule) => {
                            info!(board = %board.slug, label = %key.label, username = %key.username, rule = %rule, "created taskforce rule");
                            report.record_change();
                        }
                        Err(e) => {
                            warn!(board = %board.slug, label = %key.label, username = %key.username, error = %e, "failed to create taskforce rule");
                            report.record_failure(format!("{}/{}/{}", board.slug, key.label, key.username), "create rule", e);
                            continue;
                        }
                    }
                }

                let Some(user) = ids.get(&key.username) else {
                    debug!(username = %key.username, "taskforce member has no board account yet");
                    continue;
                };
                let Some(cards) = cards_with_label(system, key, &mut report).await? else {
                    continue;
                };
                for card in cards.iter().filter(|c| !c.has_member(user)) {
                    let outcome = system.add_card_member(&card.id, user).await;
                    record_card(&mut report, card, key, "add card member", outcome)?;
                }
            }
        }
        Ok(report)
    }
}

/// Removes the card memberships nothing justifies any more, then deletes
/// the rules no longer implied, and duplicates.
///
/// A rule is only deleted once every membership it implied is gone, so a
/// failed or interrupted run leaves the rule behind for the next one.
pub struct RemoveExtraRulesStage {
    boards: Arc<dyn BoardSystem>,
}

impl RemoveExtraRulesStage {
    pub fn new(boards: Arc<dyn BoardSystem>) -> Self {
        Self { boards }
    }

    async fn delete(&self, rule: &AutomationRule, board: &Board, report: &mut StageReport) -> Result<()> {
        match self.boards.delete_rule(&rule.id).await.entity_scoped()? {
            Ok(()) => {
                info!(board = %board.slug, label = %rule.label_id, username = %rule.username, rule = %rule.id, "deleted taskforce rule");
                report.record_change();
            }
            Err(Error::NotFound { .. }) => report.record_unchanged(),
            Err(e) => {
                warn!(board = %board.slug, rule = %rule.id, error = %e, "failed to delete taskforce rule");
                report.record_failure(rule.id.to_string(), "delete rule", e);
            }
        }
        Ok(())
    }

    /// Take the user of `key` off the labelled cards no implied rule keeps
    /// them on; `false` when any of it failed.
    async fn release_cards(
        &self,
        key: &RuleKey,
        implied: &BTreeSet<RuleKey>,
        ids: &HashMap<Username, UserId>,
        report: &mut StageReport,
    ) -> Result<bool> {
        let system = self.boards.as_ref();
        let Some(user) = ids.get(&key.username) else {
            return Ok(true);
        };
        let Some(cards) = cards_with_label(system, key, report).await? else {
            return Ok(false);
        };
        let mut released = true;
        for card in cards
            .iter()
            .filter(|c| c.has_member(user) && !justified(implied, c, &key.username))
        {
            let outcome = system.remove_card_member(&card.id, user).await;
            released &= record_card(report, card, key, "remove card member", outcome)?;
        }
        Ok(released)
    }
}

#[async_trait]
impl Stage for RemoveExtraRulesStage {
    fn name(&self) -> StageName {
        StageName::RemoveExtraRulesAndCardMembership
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let system = self.boards.as_ref();
        let boards = load_boards_with_rules(system, ctx.desired, &mut report).await?;
        let implied = implied_rules(ctx.desired, &boards);
        let ids = user_ids(system).await?;

        for board in &boards {
            let rules = system.list_rules(&board.id).await?;
            let mut seen: BTreeMap<RuleKey, usize> = BTreeMap::new();

            for rule in &rules {
                ctx.cancel.check()?;
                let key = RuleKey::of(rule);
                let occurrence = {
                    let count = seen.entry(key.clone()).or_default();
                    *count = count.saturating_add(1);
                    *count
                };

                if occurrence > 1 {
                    debug!(board = %board.slug, rule = %rule.id, "duplicate taskforce rule");
                    self.delete(rule, board, &mut report).await?;
                    continue;
                }
                if implied.contains(&key) {
                    report.record_unchanged();
                    continue;
                }
                if !self.release_cards(&key, &implied, &ids, &mut report).await? {
                    warn!(board = %board.slug, rule = %rule.id, "card memberships left, rule kept for the next run");
                    continue;
                }
                self.delete(rule, board, &mut report).await?;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::boards::BoardLabel;
    use crate::desired::DesiredUser;

    fn board_with_label(slug: &str, label: &str) -> Board {
        Board {
            id: BoardId::new(format!("id-{slug}")),
            slug: BoardSlug::new(slug),
            title: String::new(),
            members: Vec::new(),
            labels: vec![BoardLabel {
                id: LabelId::new(format!("{slug}-{label}")),
                name: label.to_string(),
                color: String::new(),
            }],
        }
    }

    #[test]
    fn test_implied_rules_need_board_and_label() {
        let desired = DesiredState::new()
            .with_user(
                DesiredUser::new("a@x.org")
                    .with_board("nord")
                    .with_taskforce("covid")
                    .with_taskforce("missing"),
            )
            .and_then(|s| s.with_user(DesiredUser::new("b@x.org").with_taskforce("covid")))
            .unwrap();
        let boards = vec![board_with_label("nord", "covid"), board_with_label("sud", "covid")];

        let implied = implied_rules(&desired, &boards);

        assert_eq!(implied.len(), 1);
        let key = implied.iter().next().unwrap();
        assert_eq!(key.board, BoardId::new("id-nord"));
        assert_eq!(key.label, LabelId::new("nord-covid"));
        assert_eq!(key.username, Username::new("a@x.org"));
    }

    #[test]
    fn test_card_membership_justified_by_other_label() {
        let implied: BTreeSet<RuleKey> = [RuleKey {
            board: BoardId::new("b"),
            label: LabelId::new("kept"),
            username: Username::new("a@x.org"),
        }]
        .into_iter()
        .collect();
        let card = Card {
            id: habsync_core::CardId::new("c"),
            board_id: BoardId::new("b"),
            title: String::new(),
            label_ids: vec![LabelId::new("dropped"), LabelId::new("kept")],
            members: vec![UserId::new("u")],
        };

        assert!(justified(&implied, &card, &Username::new("a@x.org")));
        assert!(!justified(&implied, &card, &Username::new("b@x.org")));
    }
}
