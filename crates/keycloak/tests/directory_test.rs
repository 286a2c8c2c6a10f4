//! Integration tests for the Keycloak directory using wiremock.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::BTreeMap;

use habsync_core::{ClientId, EntityKind, Error, Outcome, UserId, Username};
use habsync_keycloak::{Credentials, KeycloakDirectory};
use habsync_reconciler::{ClientSpec, IdentityDirectory, NewDirectoryUser};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Test Helpers
// =============================================================================

const TOKEN_PATH: &str = "/realms/master/protocol/openid-connect/token";
const REALM: &str = "/admin/realms/signauxfaibles";

async fn setup_mock_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok"})))
        .mount(&server)
        .await;
    server
}

fn directory(server: &MockServer) -> KeycloakDirectory {
    KeycloakDirectory::new(Credentials {
        url: Url::parse(&server.uri()).unwrap(),
        realm: "signauxfaibles".into(),
        login_realm: "master".into(),
        username: "kc-admin".into(),
        password: "secret".into(),
    })
    .unwrap()
}

fn new_user(username: &str) -> NewDirectoryUser {
    NewDirectoryUser {
        username: Username::new(username),
        email: username.to_string(),
        first_name: "Jane".into(),
        last_name: "Doe".into(),
        enabled: true,
        attributes: BTreeMap::new(),
    }
}

// =============================================================================
// Users
// =============================================================================

#[tokio::test]
async fn test_list_users_maps_representations() {
    let server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/users")))
        .and(query_param("first", "0"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "u-1", "username": "jane@x.org", "enabled": true, "email": "jane@x.org",
             "firstName": "Jane", "lastName": "Doe", "attributes": {"segment": ["bdf"]}},
            {"id": "u-2", "username": "bob@x.org", "enabled": false}
        ])))
        .mount(&server)
        .await;

    let users = directory(&server).list_users().await.unwrap();

    assert_eq!(users.len(), 2);
    let jane = users.first().unwrap();
    assert_eq!(jane.id, UserId::new("u-1"));
    assert_eq!(jane.attributes.get("segment"), Some(&vec!["bdf".to_string()]));
    assert!(!users.get(1).unwrap().enabled);
}

#[tokio::test]
async fn test_token_is_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/users")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    let directory = directory(&server);

    directory.list_users().await.unwrap();
    directory.list_users().await.unwrap();
}

#[tokio::test]
async fn test_failed_login_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
        .mount(&server)
        .await;

    let err = directory(&server).list_users().await.err().unwrap();

    assert!(matches!(err, Error::Transport { .. }));
}

#[tokio::test]
async fn test_create_user_returns_location_id() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path(format!("{REALM}/users")))
        .and(body_json(json!({
            "username": "jane@x.org", "enabled": true, "email": "jane@x.org",
            "firstName": "Jane", "lastName": "Doe", "attributes": {}
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Location", format!("{}{REALM}/users/u-42", server.uri()).as_str()),
        )
        .mount(&server)
        .await;

    let id = directory(&server).create_user(&new_user("jane@x.org")).await.unwrap();

    assert_eq!(id, UserId::new("u-42"));
}

#[tokio::test]
async fn test_create_user_conflict_names_existing_account() {
    // GIVEN: the email already belongs to another account
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path(format!("{REALM}/users")))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"errorMessage": "User exists with same email"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/users")))
        .and(query_param("email", "jane@x.org"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "u-7", "username": "jdoe"}])))
        .mount(&server)
        .await;

    // WHEN
    let err = directory(&server)
        .create_user(&new_user("jane@x.org"))
        .await
        .err()
        .unwrap();

    // THEN
    assert_eq!(
        err,
        Error::conflict(EntityKind::User, "jane@x.org", Some("u-7".to_string()))
    );
}

#[tokio::test]
async fn test_server_error_is_transport() {
    let server = setup_mock_server().await;
    Mock::given(method("PUT"))
        .and(path(format!("{REALM}/users/u-1")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = directory(&server)
        .set_enabled(&UserId::new("u-1"), false)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, Error::Transport { .. }));
    assert!(!err.is_entity_level());
}

#[tokio::test]
async fn test_forbidden_update_is_rejected() {
    let server = setup_mock_server().await;
    Mock::given(method("PUT"))
        .and(path(format!("{REALM}/users/u-1")))
        .and(body_json(json!({"enabled": false})))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = directory(&server)
        .set_enabled(&UserId::new("u-1"), false)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, Error::Rejected { .. }));
    assert!(err.is_entity_level());
}

// =============================================================================
// Clients and roles
// =============================================================================

#[tokio::test]
async fn test_resolve_unknown_client_is_not_found() {
    let server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/clients")))
        .and(query_param("clientId", "ghost"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = directory(&server).resolve_client_id("ghost").await.err().unwrap();

    assert_eq!(err, Error::not_found(EntityKind::Client, "ghost"));
}

#[tokio::test]
async fn test_grant_role_posts_the_role_representation() {
    let server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/clients/c-1/roles/bdf")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "r-1", "name": "bdf"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{REALM}/users/u-1/role-mappings/clients/c-1")))
        .and(body_json(json!([{"id": "r-1", "name": "bdf"}])))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    directory(&server)
        .grant_role(&UserId::new("u-1"), &ClientId::new("c-1"), "bdf")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_grant_role_escapes_reserved_characters() {
    // GIVEN: a role whose name holds url delimiters, and a shorter role it could be mistaken for
    let server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/clients/c-1/roles/lecture%23restreinte%2Fa%3Fb")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "r-9", "name": "lecture#restreinte/a?b"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/clients/c-1/roles/lecture")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "r-1", "name": "lecture"})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{REALM}/users/u-1/role-mappings/clients/c-1")))
        .and(body_json(json!([{"id": "r-9", "name": "lecture#restreinte/a?b"}])))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    // WHEN
    directory(&server)
        .grant_role(&UserId::new("u-1"), &ClientId::new("c-1"), "lecture#restreinte/a?b")
        .await
        .unwrap();

    // THEN: the mocks verify that only the exact role was fetched and granted
}

#[tokio::test]
async fn test_grant_unknown_role_is_not_found() {
    let server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/clients/c-1/roles/nope")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = directory(&server)
        .grant_role(&UserId::new("u-1"), &ClientId::new("c-1"), "nope")
        .await
        .err()
        .unwrap();

    assert_eq!(err, Error::not_found(EntityKind::Role, "nope"));
}

#[tokio::test]
async fn test_create_existing_role_is_duplicate() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path(format!("{REALM}/clients/c-1/roles")))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = directory(&server)
        .create_role(&ClientId::new("c-1"), "bdf")
        .await
        .err()
        .unwrap();

    assert_eq!(err, Error::duplicate_role("c-1", "bdf"));
}

#[tokio::test]
async fn test_save_client_creates_missing_client() {
    let server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/clients")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{REALM}/clients")))
        .and(body_json(json!({"clientId": "portal", "publicClient": true})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    let spec = ClientSpec {
        public_client: Some(true),
        ..ClientSpec::new("portal")
    };

    let outcome = directory(&server).save_client(&spec).await.unwrap();

    assert_eq!(outcome, Outcome::Changed);
}

#[tokio::test]
async fn test_save_client_leaves_matching_client_alone() {
    let server = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/clients")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "c-9", "clientId": "portal"}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{REALM}/clients/c-9")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c-9", "clientId": "portal", "publicClient": true, "rootUrl": "https://portal.example.org"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{REALM}/clients/c-9")))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    let spec = ClientSpec {
        public_client: Some(true),
        ..ClientSpec::new("portal")
    };

    let outcome = directory(&server).save_client(&spec).await.unwrap();

    assert_eq!(outcome, Outcome::Unchanged);
}
