/// JSON-RPC version tag carried by every request
pub const JSONRPC_VERSION: &str = "2.0";

/// Application name
pub const APP_NAME: &str = "Courier";

/// Default deadline for a daemon call, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default deadline for `finishLink`, which waits on a human scanning a code
pub const DEFAULT_LINK_TIMEOUT_SECS: u64 = 600;

/// Device name announced to the primary device when linking
pub const DEFAULT_DEVICE_NAME: &str = "courier";

/// Sender recorded on messages the local account sent
pub const SELF_SENDER: &str = "self";

/// Prefix of client-generated ids for messages not yet confirmed by the daemon
pub const OPTIMISTIC_ID_PREFIX: &str = "local-";

/// Placeholder content for messages that carry attachments but no text
pub const ATTACHMENT_PLACEHOLDER: &str = "[attachment]";

/// Daemon methods used by the client
pub mod methods {
    pub const START_LINK: &str = "startLink";
    pub const FINISH_LINK: &str = "finishLink";
    pub const LIST_ACCOUNTS: &str = "listAccounts";
    pub const LIST_CONTACTS: &str = "listContacts";
    pub const LIST_GROUPS: &str = "listGroups";
    pub const SEND: &str = "send";
    pub const VERSION: &str = "version";
}
