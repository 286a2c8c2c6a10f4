//! End-to-end tests of the `habsync` binary against snapshot backends.
//!
//! These tests verify that:
//! - A run converges both snapshots and writes them back
//! - A dry run leaves the snapshots untouched
//! - Configuration problems are all reported with a non-zero exit

#![allow(clippy::unwrap_used, clippy::panic)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use habsync_core::Username;
use habsync_reconciler::{AuthMethod, IdentityDirectory, InMemoryBoards, InMemoryDirectory};
use tempfile::TempDir;

const STOCK: &str = r"
- username: jane@x.org
  given_name: Jane
  surname: Doe
  scopes: [wekan]
  roles:
    signauxfaibles: [bdf]
  boards: [tableau-nord]
  taskforces: [T]
";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();

        let directory = InMemoryDirectory::new();
        directory.seed_client("signauxfaibles").await;
        directory.seed_client("account").await;
        directory.seed_user("gone@x.org", true).await;
        directory.save(&dir.path().join("directory.json")).await.unwrap();

        let boards = InMemoryBoards::new();
        boards.seed_user("admin", AuthMethod::Password).await;
        boards.seed_board("tableau-nord", &["T"]).await;
        boards.save(&dir.path().join("boards.json")).await.unwrap();

        std::fs::write(dir.path().join("users.yaml"), STOCK).unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            format!(
                r#"
[log]
level = "debug"
file = "{log}"

[stock]
desired_state = "{users}"
role_clients = ["signauxfaibles"]

[directory]
kind = "snapshot"
path = "{directory}"

[boards]
kind = "snapshot"
path = "{boards}"
admin = "admin"
"#,
                log = path(&dir, "habsync.log"),
                users = path(&dir, "users.yaml"),
                directory = path(&dir, "directory.json"),
                boards = path(&dir, "boards.json"),
            ),
        )
        .unwrap();

        Self { dir }
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn habsync(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_habsync"))
            .arg("--main-config")
            .arg(self.file("config.toml"))
            .args(args)
            .env_remove("RUST_LOG")
            .env_remove("HABSYNC_CONFIG")
            .output()
            .unwrap()
    }
}

fn path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).display().to_string().replace('\\', "/")
}

fn exists(users: &[habsync_reconciler::DirectoryUser], name: &str, enabled: bool) -> bool {
    users
        .iter()
        .any(|u| u.username == Username::new(name) && u.enabled == enabled)
}

#[tokio::test]
async fn test_run_converges_snapshots() {
    // GIVEN: a stale directory and an empty board system
    let ws = Workspace::new().await;

    // WHEN
    let output = ws.habsync(&["run"]);

    // THEN: both snapshots were written back converged
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let directory = InMemoryDirectory::load(&ws.file("directory.json")).await.unwrap();
    let users = directory.list_users().await.unwrap();
    assert!(exists(&users, "jane@x.org", true));
    assert!(exists(&users, "gone@x.org", false));

    let boards = InMemoryBoards::load(&ws.file("boards.json")).await.unwrap().snapshot().await;
    assert_eq!(boards.rules.len(), 1);
    assert!(Path::new(&ws.file("habsync.log")).exists());

    // AND: a second run has nothing left to do
    let again = ws.habsync(&["run"]);
    assert!(again.status.success());
    let stdout = String::from_utf8_lossy(&again.stdout);
    assert!(stdout.lines().skip(1).all(|line| line.split_whitespace().nth(1) == Some("0")), "{stdout}");
}

#[tokio::test]
async fn test_dry_run_leaves_snapshots_untouched() {
    let ws = Workspace::new().await;
    let before = std::fs::read_to_string(ws.file("directory.json")).unwrap();

    let output = ws.habsync(&["run", "--dry-run"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(std::fs::read_to_string(ws.file("directory.json")).unwrap(), before);
}

#[tokio::test]
async fn test_stop_after_runs_a_prefix() {
    let ws = Workspace::new().await;

    let output = ws.habsync(&["run", "--stop-after", "directory-users"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("directory-users"));
    assert!(!stdout.contains("board-users"));
}

#[tokio::test]
async fn test_invalid_configuration_lists_problems() {
    let ws = Workspace::new().await;
    std::fs::write(
        ws.file("override.toml"),
        "[stock]\nmax_changes = 0\n\n[boards]\nslug_domain_regexp = \"(\"\n",
    )
    .unwrap();
    let override_file = ws.file("override.toml");

    let output = ws.habsync(&["-c", override_file.to_str().unwrap(), "check-config"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("stock.max_changes"), "{stderr}");
    assert!(stderr.contains("boards.slug_domain_regexp"), "{stderr}");
}

#[test]
fn test_stages_are_listed_in_order() {
    let output = Command::new(env!("CARGO_BIN_EXE_habsync"))
        .arg("stages")
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stages: Vec<&str> = stdout.lines().collect();
    assert_eq!(stages.first(), Some(&"directory-clients"));
    assert_eq!(stages.last(), Some(&"remove-extra-rules-and-card-membership"));
    assert_eq!(stages.len(), 9);
}
