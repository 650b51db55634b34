use serde::{Deserialize, Serialize};

use crate::{AdminClient, AdminClientError};

pub const SINGLE_LINE_TEXT_FIELD: &str = "single_line_text_field";

const CURRENT_APP_INSTALLATION_QUERY: &str = r"query CurrentAppInstallation {
  currentAppInstallation {
    id
  }
}";

const APP_INSTALLATION_METAFIELDS_QUERY: &str = r"query AppInstallationMetafields($namespace: String!, $first: Int!) {
  currentAppInstallation {
    metafields(first: $first, namespace: $namespace) {
      edges {
        node {
          key
          value
        }
      }
    }
  }
}";

const METAFIELDS_SET_MUTATION: &str = r"mutation MetafieldsSet($metafields: [MetafieldsSetInput!]!) {
  metafieldsSet(metafields: $metafields) {
    metafields {
      key
      namespace
      value
      createdAt
      updatedAt
    }
    userErrors {
      field
      message
      code
    }
  }
}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafieldNode {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetafieldsSetInput {
    pub namespace: String,
    pub key: String,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl MetafieldsSetInput {
    #[must_use]
    pub fn single_line_text(
        namespace: impl Into<String>,
        key: impl Into<String>,
        owner_id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            owner_id: owner_id.into(),
            kind: SINGLE_LINE_TEXT_FIELD.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetMetafield {
    pub key: String,
    pub namespace: String,
    pub value: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafieldsSetUserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl MetafieldsSetUserError {
    /// Dotted field path, e.g. `metafields.0.value`.
    #[must_use]
    pub fn field_path(&self) -> String {
        self.field
            .as_ref()
            .map(|segments| segments.join("."))
            .unwrap_or_default()
    }
}

/// Payload of the `metafieldsSet` mutation as returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetafieldsSetPayload {
    #[serde(default)]
    pub metafields: Option<Vec<SetMetafield>>,
    #[serde(default)]
    pub user_errors: Vec<MetafieldsSetUserError>,
}

impl MetafieldsSetPayload {
    #[must_use]
    pub fn has_user_errors(&self) -> bool {
        !self.user_errors.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallationIdData {
    current_app_installation: Option<InstallationId>,
}

#[derive(Debug, Deserialize)]
struct InstallationId {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallationMetafieldsData {
    current_app_installation: Option<InstallationMetafields>,
}

#[derive(Debug, Deserialize)]
struct InstallationMetafields {
    metafields: MetafieldConnection,
}

#[derive(Debug, Deserialize)]
struct MetafieldConnection {
    #[serde(default)]
    edges: Vec<MetafieldEdge>,
}

#[derive(Debug, Deserialize)]
struct MetafieldEdge {
    node: MetafieldNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetafieldsSetData {
    metafields_set: Option<MetafieldsSetPayload>,
}

#[derive(Debug, Serialize)]
struct MetafieldsQueryVariables<'a> {
    namespace: &'a str,
    first: u32,
}

#[derive(Debug, Serialize)]
struct MetafieldsSetVariables<'a> {
    metafields: &'a [MetafieldsSetInput],
}

impl AdminClient {
    /// GID of this app's installation on the bound shop.
    pub async fn current_app_installation_id(&self) -> Result<String, AdminClientError> {
        let data: InstallationIdData = self
            .graphql::<(), _>(CURRENT_APP_INSTALLATION_QUERY, None)
            .await?;
        data.current_app_installation
            .map(|installation| installation.id)
            .filter(|id| !id.trim().is_empty())
            .ok_or(AdminClientError::MissingData {
                field: "currentAppInstallation.id",
            })
    }

    pub async fn app_installation_metafields(
        &self,
        namespace: &str,
        first: u32,
    ) -> Result<Vec<MetafieldNode>, AdminClientError> {
        let variables = MetafieldsQueryVariables { namespace, first };
        let data: InstallationMetafieldsData = self
            .graphql(APP_INSTALLATION_METAFIELDS_QUERY, Some(&variables))
            .await?;
        let installation = data
            .current_app_installation
            .ok_or(AdminClientError::MissingData {
                field: "currentAppInstallation",
            })?;

        Ok(installation
            .metafields
            .edges
            .into_iter()
            .map(|edge| edge.node)
            .collect())
    }

    /// Bulk-sets metafields in one mutation. User errors are returned in the
    /// payload, not as `Err`.
    pub async fn metafields_set(
        &self,
        metafields: &[MetafieldsSetInput],
    ) -> Result<MetafieldsSetPayload, AdminClientError> {
        let variables = MetafieldsSetVariables { metafields };
        let data: MetafieldsSetData = self
            .graphql(METAFIELDS_SET_MUTATION, Some(&variables))
            .await?;
        data.metafields_set.ok_or(AdminClientError::MissingData {
            field: "metafieldsSet",
        })
    }
}
