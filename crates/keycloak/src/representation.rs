//! JSON bodies of the Keycloak admin API.

use std::collections::BTreeMap;

use habsync_core::{ClientId, UserId, Username};
use habsync_reconciler::{ClientSpec, DirectoryRole, DirectoryUser, NewDirectoryUser, UserFields};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRepresentation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, Vec<String>>>,
}

impl UserRepresentation {
    /// Domain view, `None` for records missing an id or a username.
    #[must_use]
    pub fn into_user(self) -> Option<DirectoryUser> {
        Some(DirectoryUser {
            id: UserId::new(self.id?),
            username: Username::new(self.username?),
            enabled: self.enabled.unwrap_or(false),
            email: self.email,
            first_name: self.first_name.unwrap_or_default(),
            last_name: self.last_name.unwrap_or_default(),
            attributes: self.attributes.unwrap_or_default(),
        })
    }
}

impl From<&NewDirectoryUser> for UserRepresentation {
    fn from(user: &NewDirectoryUser) -> Self {
        Self {
            id: None,
            username: Some(user.username.to_string()),
            enabled: Some(user.enabled),
            email: Some(user.email.clone()),
            first_name: Some(user.first_name.clone()),
            last_name: Some(user.last_name.clone()),
            attributes: Some(user.attributes.clone()),
        }
    }
}

impl From<&UserFields> for UserRepresentation {
    fn from(fields: &UserFields) -> Self {
        Self {
            first_name: Some(fields.first_name.clone()),
            last_name: Some(fields.last_name.clone()),
            attributes: Some(fields.attributes.clone()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "clientRole")]
    pub client_role: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "containerId")]
    pub container_id: Option<String>,
}

impl RoleRepresentation {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            client_role: None,
            container_id: None,
        }
    }

    #[must_use]
    pub fn into_role(self, client: &ClientId) -> DirectoryRole {
        DirectoryRole {
            client: client.clone(),
            name: self.name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRepresentation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uris: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_client: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_accounts_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_access_grants_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implicit_flow_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_services_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,
}

impl ClientRepresentation {
    /// Settings the reconciler manages, as a spec.
    #[must_use]
    pub fn to_spec(&self) -> ClientSpec {
        ClientSpec {
            client_id: self.client_id.clone(),
            name: self.name.clone(),
            root_url: self.root_url.clone(),
            admin_url: self.admin_url.clone(),
            redirect_uris: self.redirect_uris.clone(),
            web_origins: self.web_origins.clone(),
            public_client: self.public_client,
            bearer_only: self.bearer_only,
            service_accounts_enabled: self.service_accounts_enabled,
            direct_access_grants_enabled: self.direct_access_grants_enabled,
            implicit_flow_enabled: self.implicit_flow_enabled,
            authorization_services_enabled: self.authorization_services_enabled,
            attributes: self.attributes.clone(),
        }
    }

    #[must_use]
    pub fn from_spec(id: Option<String>, spec: &ClientSpec) -> Self {
        Self {
            id,
            client_id: spec.client_id.clone(),
            name: spec.name.clone(),
            root_url: spec.root_url.clone(),
            admin_url: spec.admin_url.clone(),
            redirect_uris: spec.redirect_uris.clone(),
            web_origins: spec.web_origins.clone(),
            public_client: spec.public_client,
            bearer_only: spec.bearer_only,
            service_accounts_enabled: spec.service_accounts_enabled,
            direct_access_grants_enabled: spec.direct_access_grants_enabled,
            implicit_flow_enabled: spec.implicit_flow_enabled,
            authorization_services_enabled: spec.authorization_services_enabled,
            attributes: spec.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_user_fields_serialize_only_managed_keys() {
        let fields = UserFields {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            attributes: BTreeMap::new(),
        };

        let json = serde_json::to_value(UserRepresentation::from(&fields)).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"firstName": "Jane", "lastName": "Doe", "attributes": {}})
        );
    }

    #[test]
    fn test_user_without_id_is_skipped() {
        let user = UserRepresentation {
            username: Some("jane".into()),
            ..UserRepresentation::default()
        };
        assert!(user.into_user().is_none());
    }

    #[test]
    fn test_client_spec_round_trip_keeps_unmanaged_fields_out() {
        let json = serde_json::json!({
            "id": "c-1",
            "clientId": "portal",
            "rootUrl": "https://portal.example.org",
            "protocol": "openid-connect"
        });

        let client: ClientRepresentation = serde_json::from_value(json).unwrap();

        assert_eq!(client.to_spec().root_url.as_deref(), Some("https://portal.example.org"));
        assert_eq!(client.id.as_deref(), Some("c-1"));
    }
}
