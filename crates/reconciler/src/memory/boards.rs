use std::path::Path;

use async_trait::async_trait;
use habsync_core::{BoardId, BoardSlug, CardId, EntityKind, Error, LabelId, Outcome, Result, RuleId, UserId, Username};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{Faults, new_id, read_snapshot, write_snapshot};
use crate::boards::{AuthMethod, AutomationRule, Board, BoardLabel, BoardMember, BoardSystem, BoardUser, Card, NewBoardUser};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardsSnapshot {
    #[serde(default)]
    pub users: Vec<BoardUser>,
    #[serde(default)]
    pub boards: Vec<Board>,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub rules: Vec<AutomationRule>,
}

impl BoardsSnapshot {
    fn board_mut(&mut self, id: &BoardId) -> Result<&mut Board> {
        self.boards
            .iter_mut()
            .find(|b| &b.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Board, id.as_str()))
    }

    fn user_mut(&mut self, id: &UserId) -> Result<&mut BoardUser> {
        self.users
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::User, id.as_str()))
    }

    fn card_mut(&mut self, id: &CardId) -> Result<&mut Card> {
        self.cards
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Card, id.as_str()))
    }
}

/// In-memory board system.
#[derive(Debug, Default)]
pub struct InMemoryBoards {
    state: RwLock<BoardsSnapshot>,
    domain: Option<Regex>,
    faults: Faults,
}

impl InMemoryBoards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: BoardsSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            ..Self::default()
        }
    }

    /// Restrict domain boards to slugs matching `pattern`.
    #[must_use]
    pub fn with_domain(mut self, pattern: Regex) -> Self {
        self.domain = Some(pattern);
        self
    }

    /// # Errors
    ///
    /// Fails when the file cannot be read or is not a snapshot.
    pub async fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_snapshot(read_snapshot(path).await?))
    }

    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        write_snapshot(path, &*self.state.read().await).await
    }

    pub async fn snapshot(&self) -> BoardsSnapshot {
        self.state.read().await.clone()
    }

    /// Make `operation` fail with `error`, for every key or only `key`.
    pub async fn inject_failure(&self, operation: &'static str, key: Option<&str>, error: Error) {
        self.faults.arm(operation, key.map(str::to_string), error).await;
    }

    pub async fn clear_failures(&self) {
        self.faults.clear().await;
    }

    /// Add an enabled account whose email is its username.
    pub async fn seed_user(&self, username: &str, auth_method: AuthMethod) -> UserId {
        let id = UserId::new(new_id());
        let username = Username::new(username);
        self.state.write().await.users.push(BoardUser {
            id: id.clone(),
            emails: vec![username.as_str().to_string()],
            username,
            auth_method,
            login_disabled: false,
            full_name: String::new(),
            initials: String::new(),
        });
        id
    }

    /// Add a board carrying one label per name; label ids are `slug:name`.
    pub async fn seed_board(&self, slug: &str, labels: &[&str]) -> BoardId {
        let id = BoardId::new(new_id());
        self.state.write().await.boards.push(Board {
            id: id.clone(),
            slug: BoardSlug::new(slug),
            title: slug.to_string(),
            members: Vec::new(),
            labels: labels
                .iter()
                .map(|name| BoardLabel {
                    id: LabelId::new(format!("{slug}:{name}")),
                    name: (*name).to_string(),
                    color: String::new(),
                })
                .collect(),
        });
        id
    }

    pub async fn seed_card(&self, board: &BoardId, labels: &[LabelId], members: &[UserId]) -> CardId {
        let id = CardId::new(new_id());
        self.state.write().await.cards.push(Card {
            id: id.clone(),
            board_id: board.clone(),
            title: String::new(),
            label_ids: labels.to_vec(),
            members: members.to_vec(),
        });
        id
    }

    pub async fn seed_rule(&self, board: &BoardId, label: &LabelId, username: &str) -> RuleId {
        let id = RuleId::new(new_id());
        self.state.write().await.rules.push(AutomationRule {
            id: id.clone(),
            board_id: board.clone(),
            label_id: label.clone(),
            username: Username::new(username),
        });
        id
    }

    fn in_domain(&self, board: &Board) -> bool {
        self.domain
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(board.slug.as_str()))
    }

    async fn set_login_disabled(&self, id: &UserId, disabled: bool) -> Result<Outcome> {
        let mut state = self.state.write().await;
        let user = state.user_mut(id)?;
        let changed = user.login_disabled != disabled;
        user.login_disabled = disabled;
        Ok(Outcome::from_changed(changed))
    }
}

#[async_trait]
impl BoardSystem for InMemoryBoards {
    async fn list_users(&self) -> Result<Vec<BoardUser>> {
        self.faults.check("list_users", "").await?;
        Ok(self.state.read().await.users.clone())
    }

    async fn insert_user(&self, user: &NewBoardUser) -> Result<UserId> {
        self.faults.check("insert_user", user.username.as_str()).await?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.users.iter().find(|u| {
            u.username == user.username || u.emails.iter().any(|e| e.eq_ignore_ascii_case(&user.email))
        }) {
            return Err(Error::conflict(
                EntityKind::User,
                user.username.as_str(),
                Some(existing.id.to_string()),
            ));
        }
        let id = UserId::new(new_id());
        state.users.push(BoardUser {
            id: id.clone(),
            username: user.username.clone(),
            emails: vec![user.email.clone()],
            auth_method: AuthMethod::Oauth2,
            login_disabled: false,
            full_name: user.full_name.clone(),
            initials: user.initials.clone(),
        });
        Ok(id)
    }

    async fn enable_user(&self, id: &UserId) -> Result<Outcome> {
        self.faults.check("enable_user", id.as_str()).await?;
        self.set_login_disabled(id, false).await
    }

    async fn disable_user(&self, id: &UserId) -> Result<Outcome> {
        self.faults.check("disable_user", id.as_str()).await?;
        self.set_login_disabled(id, true).await
    }

    async fn get_board(&self, slug: &BoardSlug) -> Result<Board> {
        self.faults.check("get_board", slug.as_str()).await?;
        self.state
            .read()
            .await
            .boards
            .iter()
            .find(|b| &b.slug == slug)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Board, slug.as_str()))
    }

    async fn get_board_by_id(&self, id: &BoardId) -> Result<Board> {
        self.faults.check("get_board_by_id", id.as_str()).await?;
        self.state
            .read()
            .await
            .boards
            .iter()
            .find(|b| &b.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Board, id.as_str()))
    }

    async fn list_domain_boards(&self) -> Result<Vec<Board>> {
        self.faults.check("list_domain_boards", "").await?;
        Ok(self
            .state
            .read()
            .await
            .boards
            .iter()
            .filter(|b| self.in_domain(b))
            .cloned()
            .collect())
    }

    async fn ensure_active_member(&self, board: &BoardId, user: &UserId) -> Result<Outcome> {
        self.faults.check("ensure_active_member", user.as_str()).await?;
        let mut state = self.state.write().await;
        let board = state.board_mut(board)?;
        match board.members.iter_mut().find(|m| &m.user_id == user) {
            Some(member) if member.is_active => Ok(Outcome::Unchanged),
            Some(member) => {
                member.is_active = true;
                Ok(Outcome::Changed)
            }
            None => {
                board.members.push(BoardMember {
                    user_id: user.clone(),
                    is_active: true,
                    is_admin: false,
                });
                Ok(Outcome::Changed)
            }
        }
    }

    async fn ensure_inactive_member(&self, board: &BoardId, user: &UserId) -> Result<Outcome> {
        self.faults.check("ensure_inactive_member", user.as_str()).await?;
        let mut state = self.state.write().await;
        let board = state.board_mut(board)?;
        match board.members.iter_mut().find(|m| &m.user_id == user) {
            Some(member) if member.is_active => {
                member.is_active = false;
                Ok(Outcome::Changed)
            }
            Some(_) | None => Ok(Outcome::Unchanged),
        }
    }

    async fn ensure_board_admin(&self, board: &BoardId, user: &UserId) -> Result<Outcome> {
        self.faults.check("ensure_board_admin", board.as_str()).await?;
        let mut state = self.state.write().await;
        let board = state.board_mut(board)?;
        match board.members.iter_mut().find(|m| &m.user_id == user) {
            Some(member) if member.is_active && member.is_admin => Ok(Outcome::Unchanged),
            Some(member) => {
                member.is_active = true;
                member.is_admin = true;
                Ok(Outcome::Changed)
            }
            None => {
                board.members.push(BoardMember {
                    user_id: user.clone(),
                    is_active: true,
                    is_admin: true,
                });
                Ok(Outcome::Changed)
            }
        }
    }

    async fn list_rules(&self, board: &BoardId) -> Result<Vec<AutomationRule>> {
        self.faults.check("list_rules", board.as_str()).await?;
        Ok(self
            .state
            .read()
            .await
            .rules
            .iter()
            .filter(|r| &r.board_id == board)
            .cloned()
            .collect())
    }

    async fn list_ruled_boards(&self) -> Result<Vec<BoardId>> {
        self.faults.check("list_ruled_boards", "").await?;
        let state = self.state.read().await;
        let mut ids: Vec<BoardId> = state.rules.iter().map(|r| r.board_id.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn create_rule(&self, board: &BoardId, label: &LabelId, username: &Username) -> Result<RuleId> {
        self.faults.check("create_rule", username.as_str()).await?;
        let mut state = self.state.write().await;
        if state.board_mut(board)?.labels.iter().all(|l| &l.id != label) {
            return Err(Error::not_found(EntityKind::Label, label.as_str()));
        }
        let id = RuleId::new(new_id());
        state.rules.push(AutomationRule {
            id: id.clone(),
            board_id: board.clone(),
            label_id: label.clone(),
            username: username.clone(),
        });
        Ok(id)
    }

    async fn delete_rule(&self, rule: &RuleId) -> Result<()> {
        self.faults.check("delete_rule", rule.as_str()).await?;
        let mut state = self.state.write().await;
        let before = state.rules.len();
        state.rules.retain(|r| &r.id != rule);
        if state.rules.len() == before {
            return Err(Error::not_found(EntityKind::Rule, rule.as_str()));
        }
        Ok(())
    }

    async fn list_cards_with_label(&self, board: &BoardId, label: &LabelId) -> Result<Vec<Card>> {
        self.faults.check("list_cards_with_label", label.as_str()).await?;
        Ok(self
            .state
            .read()
            .await
            .cards
            .iter()
            .filter(|c| &c.board_id == board && c.label_ids.contains(label))
            .cloned()
            .collect())
    }

    async fn add_card_member(&self, card: &CardId, user: &UserId) -> Result<Outcome> {
        self.faults.check("add_card_member", card.as_str()).await?;
        let mut state = self.state.write().await;
        let card = state.card_mut(card)?;
        if card.has_member(user) {
            return Ok(Outcome::Unchanged);
        }
        card.members.push(user.clone());
        Ok(Outcome::Changed)
    }

    async fn remove_card_member(&self, card: &CardId, user: &UserId) -> Result<Outcome> {
        self.faults.check("remove_card_member", card.as_str()).await?;
        let mut state = self.state.write().await;
        let card = state.card_mut(card)?;
        let before = card.members.len();
        card.members.retain(|m| m != user);
        Ok(Outcome::from_changed(card.members.len() != before))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_membership_is_deactivated_not_deleted() {
        let boards = InMemoryBoards::new();
        let board = boards.seed_board("nord", &[]).await;
        let user = boards.seed_user("a@x.org", AuthMethod::Oauth2).await;

        assert_eq!(boards.ensure_active_member(&board, &user).await.unwrap(), Outcome::Changed);
        assert_eq!(boards.ensure_active_member(&board, &user).await.unwrap(), Outcome::Unchanged);
        assert_eq!(boards.ensure_inactive_member(&board, &user).await.unwrap(), Outcome::Changed);

        let board = boards.get_board_by_id(&board).await.unwrap();
        assert_eq!(board.members.len(), 1);
        assert!(!board.is_active_member(&user));
    }

    #[tokio::test]
    async fn test_domain_filter() {
        let boards = InMemoryBoards::new().with_domain(Regex::new("^tableau-").unwrap());
        boards.seed_board("tableau-nord", &[]).await;
        boards.seed_board("templates", &[]).await;

        let domain = boards.list_domain_boards().await.unwrap();

        assert_eq!(domain.len(), 1);
        assert_eq!(domain[0].slug, BoardSlug::new("tableau-nord"));
    }

    #[tokio::test]
    async fn test_rule_needs_existing_label() {
        let boards = InMemoryBoards::new();
        let board = boards.seed_board("nord", &["covid"]).await;

        let missing = boards
            .create_rule(&board, &LabelId::new("nord:other"), &Username::new("a@x.org"))
            .await;
        let created = boards
            .create_rule(&board, &LabelId::new("nord:covid"), &Username::new("a@x.org"))
            .await;

        assert!(matches!(missing, Err(Error::NotFound { kind: EntityKind::Label, .. })));
        assert!(created.is_ok());
    }
}
