//! Collaborator decorators that read for real and only log mutations.
//!
//! Idempotent board calls still report the outcome a real run would get, so
//! a dry run logs the same transitions.

use std::sync::Arc;

use async_trait::async_trait;
use habsync_core::{
    BoardId, BoardSlug, CardId, ClientId, EntityKind, Error, LabelId, Outcome, Result, RuleId, UserId, Username,
};
use tracing::info;

use crate::boards::{AutomationRule, Board, BoardSystem, BoardUser, Card, NewBoardUser};
use crate::directory::{ClientSpec, DirectoryRole, DirectoryUser, IdentityDirectory, NewDirectoryUser, UserFields};

fn planned_id(key: &str) -> String {
    format!("dry-run:{key}")
}

pub struct DryRunDirectory {
    inner: Arc<dyn IdentityDirectory>,
}

impl DryRunDirectory {
    pub fn new(inner: Arc<dyn IdentityDirectory>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl IdentityDirectory for DryRunDirectory {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>> {
        self.inner.list_users().await
    }

    async fn create_user(&self, user: &NewDirectoryUser) -> Result<UserId> {
        info!(username = %user.username, "dry run: would create directory user");
        Ok(UserId::new(planned_id(user.username.as_str())))
    }

    async fn update_user(&self, id: &UserId, _fields: &UserFields) -> Result<()> {
        info!(id = %id, "dry run: would update directory user");
        Ok(())
    }

    async fn set_enabled(&self, id: &UserId, enabled: bool) -> Result<()> {
        info!(id = %id, enabled, "dry run: would change directory user state");
        Ok(())
    }

    async fn list_client_roles(&self, client: &ClientId) -> Result<Vec<DirectoryRole>> {
        self.inner.list_client_roles(client).await
    }

    async fn list_user_roles(&self, user: &UserId, client: &ClientId) -> Result<Vec<DirectoryRole>> {
        self.inner.list_user_roles(user, client).await
    }

    async fn create_role(&self, client: &ClientId, name: &str) -> Result<()> {
        info!(client = %client, role = name, "dry run: would create role");
        Ok(())
    }

    async fn grant_role(&self, user: &UserId, client: &ClientId, role: &str) -> Result<()> {
        info!(id = %user, client = %client, role, "dry run: would grant role");
        Ok(())
    }

    async fn revoke_role(&self, user: &UserId, client: &ClientId, role: &str) -> Result<()> {
        info!(id = %user, client = %client, role, "dry run: would revoke role");
        Ok(())
    }

    async fn resolve_client_id(&self, client_name: &str) -> Result<ClientId> {
        self.inner.resolve_client_id(client_name).await
    }

    async fn save_client(&self, client: &ClientSpec) -> Result<Outcome> {
        info!(client = %client.client_id, "dry run: would save client");
        Ok(Outcome::Changed)
    }
}

pub struct DryRunBoards {
    inner: Arc<dyn BoardSystem>,
}

impl DryRunBoards {
    pub fn new(inner: Arc<dyn BoardSystem>) -> Self {
        Self { inner }
    }

    async fn user(&self, id: &UserId) -> Result<BoardUser> {
        self.inner
            .list_users()
            .await?
            .into_iter()
            .find(|u| &u.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::User, id.as_str()))
    }
}

#[async_trait]
impl BoardSystem for DryRunBoards {
    async fn list_users(&self) -> Result<Vec<BoardUser>> {
        self.inner.list_users().await
    }

    async fn insert_user(&self, user: &NewBoardUser) -> Result<UserId> {
        info!(username = %user.username, "dry run: would insert board user");
        Ok(UserId::new(planned_id(user.username.as_str())))
    }

    async fn enable_user(&self, id: &UserId) -> Result<Outcome> {
        let user = self.user(id).await?;
        Ok(Outcome::from_changed(user.login_disabled))
    }

    async fn disable_user(&self, id: &UserId) -> Result<Outcome> {
        let user = self.user(id).await?;
        Ok(Outcome::from_changed(!user.login_disabled))
    }

    async fn get_board(&self, slug: &BoardSlug) -> Result<Board> {
        self.inner.get_board(slug).await
    }

    async fn get_board_by_id(&self, id: &BoardId) -> Result<Board> {
        self.inner.get_board_by_id(id).await
    }

    async fn list_domain_boards(&self) -> Result<Vec<Board>> {
        self.inner.list_domain_boards().await
    }

    async fn ensure_active_member(&self, board: &BoardId, user: &UserId) -> Result<Outcome> {
        let board = self.inner.get_board_by_id(board).await?;
        Ok(Outcome::from_changed(!board.is_active_member(user)))
    }

    async fn ensure_inactive_member(&self, board: &BoardId, user: &UserId) -> Result<Outcome> {
        let board = self.inner.get_board_by_id(board).await?;
        Ok(Outcome::from_changed(board.is_active_member(user)))
    }

    async fn ensure_board_admin(&self, board: &BoardId, user: &UserId) -> Result<Outcome> {
        let board = self.inner.get_board_by_id(board).await?;
        let is_admin = board.member(user).is_some_and(|m| m.is_active && m.is_admin);
        Ok(Outcome::from_changed(!is_admin))
    }

    async fn list_rules(&self, board: &BoardId) -> Result<Vec<AutomationRule>> {
        self.inner.list_rules(board).await
    }

    async fn list_ruled_boards(&self) -> Result<Vec<BoardId>> {
        self.inner.list_ruled_boards().await
    }

    async fn create_rule(&self, board: &BoardId, label: &LabelId, username: &Username) -> Result<RuleId> {
        info!(board = %board, label = %label, username = %username, "dry run: would create rule");
        Ok(RuleId::new(planned_id(&format!("{board}/{label}/{username}"))))
    }

    async fn delete_rule(&self, rule: &RuleId) -> Result<()> {
        info!(rule = %rule, "dry run: would delete rule");
        Ok(())
    }

    async fn list_cards_with_label(&self, board: &BoardId, label: &LabelId) -> Result<Vec<Card>> {
        self.inner.list_cards_with_label(board, label).await
    }

    async fn add_card_member(&self, card: &CardId, user: &UserId) -> Result<Outcome> {
        info!(card = %card, id = %user, "dry run: would add card member");
        Ok(Outcome::Changed)
    }

    async fn remove_card_member(&self, card: &CardId, user: &UserId) -> Result<Outcome> {
        info!(card = %card, id = %user, "dry run: would remove card member");
        Ok(Outcome::Changed)
    }
}
