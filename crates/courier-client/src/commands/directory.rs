//! Read-only lookups answered by the daemon: accounts, contacts, groups and
//! the daemon's version.

use serde::{Deserialize, Serialize};

use courier_shared::constants::methods;

use crate::error::ClientError;
use crate::session::Session;

/// An account registered with the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Account {
    pub number: Option<String>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Contact {
    pub number: Option<String>,
    pub uuid: Option<String>,
    /// Name from the local address book.
    pub name: Option<String>,
    pub profile_name: Option<String>,
    pub is_blocked: bool,
}

impl Contact {
    /// Best name to show for this contact.
    pub fn display_name(&self) -> &str {
        [&self.name, &self.profile_name, &self.number, &self.uuid]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .find(|v| !v.trim().is_empty())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_member: bool,
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupMember {
    pub number: Option<String>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonVersion {
    pub version: String,
}

impl Session {
    pub async fn list_accounts(&self) -> Result<Vec<Account>, ClientError> {
        Ok(self.rpc.call_as(methods::LIST_ACCOUNTS, None).await?)
    }

    pub async fn list_contacts(&self) -> Result<Vec<Contact>, ClientError> {
        Ok(self.rpc.call_as(methods::LIST_CONTACTS, None).await?)
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, ClientError> {
        Ok(self.rpc.call_as(methods::LIST_GROUPS, None).await?)
    }

    pub async fn daemon_version(&self) -> Result<DaemonVersion, ClientError> {
        Ok(self.rpc.call_as(methods::VERSION, None).await?)
    }
}
