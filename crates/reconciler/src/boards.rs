//! Board-system collaborator contract.

use async_trait::async_trait;
use habsync_core::{BoardId, BoardSlug, CardId, LabelId, Outcome, Result, RuleId, UserId, Username};
use serde::{Deserialize, Serialize};

/// How a board account authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Authenticated by the identity directory.
    Oauth2,
    /// Local password, managed by hand.
    Password,
}

/// A board-system account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardUser {
    pub id: UserId,
    pub username: Username,
    #[serde(default)]
    pub emails: Vec<String>,
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub login_disabled: bool,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub initials: String,
}

impl BoardUser {
    /// Whether the account takes part in automated lifecycle changes.
    ///
    /// Natively managed accounts never do; the administrator always does.
    #[must_use]
    pub fn is_genuine(&self, admin: &Username) -> bool {
        self.auth_method == AuthMethod::Oauth2 || &self.username == admin
    }
}

/// Account to insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBoardUser {
    pub username: Username,
    pub email: String,
    pub full_name: String,
    pub initials: String,
}

/// Membership record; deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMember {
    pub user_id: UserId,
    pub is_active: bool,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardLabel {
    pub id: LabelId,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub slug: BoardSlug,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub members: Vec<BoardMember>,
    #[serde(default)]
    pub labels: Vec<BoardLabel>,
}

impl Board {
    /// Label carrying a taskforce name.
    #[must_use]
    pub fn label_named(&self, name: &str) -> Option<&BoardLabel> {
        self.labels.iter().find(|label| label.name == name)
    }

    #[must_use]
    pub fn member(&self, user: &UserId) -> Option<&BoardMember> {
        self.members.iter().find(|member| &member.user_id == user)
    }

    #[must_use]
    pub fn is_active_member(&self, user: &UserId) -> bool {
        self.member(user).is_some_and(|member| member.is_active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub board_id: BoardId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub label_ids: Vec<LabelId>,
    #[serde(default)]
    pub members: Vec<UserId>,
}

impl Card {
    #[must_use]
    pub fn has_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }
}

/// "When `label_id` is applied to a card of `board_id`, add `username` as a card member."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub board_id: BoardId,
    pub label_id: LabelId,
    pub username: Username,
}

/// Operations the reconcilers consume from the board system.
#[async_trait]
pub trait BoardSystem: Send + Sync {
    async fn list_users(&self) -> Result<Vec<BoardUser>>;

    /// Insert an account; `Conflict` when the username or an email is taken.
    async fn insert_user(&self, user: &NewBoardUser) -> Result<UserId>;

    async fn enable_user(&self, id: &UserId) -> Result<Outcome>;

    async fn disable_user(&self, id: &UserId) -> Result<Outcome>;

    async fn get_board(&self, slug: &BoardSlug) -> Result<Board>;

    async fn get_board_by_id(&self, id: &BoardId) -> Result<Board>;

    /// Boards of the managed domain.
    async fn list_domain_boards(&self) -> Result<Vec<Board>>;

    async fn ensure_active_member(&self, board: &BoardId, user: &UserId) -> Result<Outcome>;

    async fn ensure_inactive_member(&self, board: &BoardId, user: &UserId) -> Result<Outcome>;

    async fn ensure_board_admin(&self, board: &BoardId, user: &UserId) -> Result<Outcome>;

    async fn list_rules(&self, board: &BoardId) -> Result<Vec<AutomationRule>>;

    /// Boards carrying at least one automation rule, in or out of the domain.
    async fn list_ruled_boards(&self) -> Result<Vec<BoardId>>;

    async fn create_rule(&self, board: &BoardId, label: &LabelId, username: &Username) -> Result<RuleId>;

    async fn delete_rule(&self, rule: &RuleId) -> Result<()>;

    async fn list_cards_with_label(&self, board: &BoardId, label: &LabelId) -> Result<Vec<Card>>;

    async fn add_card_member(&self, card: &CardId, user: &UserId) -> Result<Outcome>;

    async fn remove_card_member(&self, card: &CardId, user: &UserId) -> Result<Outcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, auth_method: AuthMethod) -> BoardUser {
        BoardUser {
            id: UserId::new(name),
            username: Username::new(name),
            emails: vec![],
            auth_method,
            login_disabled: false,
            full_name: String::new(),
            initials: String::new(),
        }
    }

    #[test]
    fn test_genuine_accounts() {
        let admin = Username::new("admin");

        assert!(user("a@x.org", AuthMethod::Oauth2).is_genuine(&admin));
        assert!(user("admin", AuthMethod::Password).is_genuine(&admin));
        assert!(!user("local", AuthMethod::Password).is_genuine(&admin));
    }

    #[test]
    fn test_board_lookups() {
        let board = Board {
            id: BoardId::new("b"),
            slug: BoardSlug::new("tableau"),
            title: String::new(),
            members: vec![BoardMember {
                user_id: UserId::new("u"),
                is_active: false,
                is_admin: false,
            }],
            labels: vec![BoardLabel {
                id: LabelId::new("l"),
                name: "covid".into(),
                color: "red".into(),
            }],
        };

        assert!(board.member(&UserId::new("u")).is_some());
        assert!(!board.is_active_member(&UserId::new("u")));
        assert_eq!(board.label_named("covid").map(|l| l.id.clone()), Some(LabelId::new("l")));
        assert!(board.label_named("other").is_none());
    }
}
