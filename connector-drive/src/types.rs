//! Wire types for the Drive v3 REST API.
//!
//! Shapes follow the upstream JSON contract; everything Drive may omit is
//! optional. `size` stays a string because that is how Drive serialises it.

use serde::{Deserialize, Serialize};

/// File or folder metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by_me: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trashed: Option<bool>,
}

impl DriveFile {
    /// Folders are files with the folder MIME type.
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some("application/vnd.google-apps.folder")
    }
}

/// `files.list` response page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_search: Option<bool>,
}

/// One entry in the change feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub removed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<DriveFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
}

/// `changes.list` response page.
///
/// Exactly one of `next_page_token` / `new_start_page_token` is normally
/// present: the former while pages remain, the latter once the feed is
/// caught up.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChangeList {
    #[serde(default)]
    pub changes: Vec<Change>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_start_page_token: Option<String>,
}

/// `changes.getStartPageToken` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPageToken {
    pub start_page_token: String,
}

/// Watch subscription request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    pub address: String,
    pub token: String,
    pub params: WatchParams,
}

/// Channel parameters; Drive expects the TTL as a string.
#[derive(Debug, Clone, Serialize)]
pub struct WatchParams {
    pub ttl: String,
}

/// `changes.watch` response.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,
    /// Epoch milliseconds, serialised as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

/// `channels.stop` request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopChannelRequest {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

/// A permission on a file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub permission_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_file_discovery: Option<bool>,
}

/// `permissions.list` response.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PermissionList {
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Permission grant request body.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub role: String,
    #[serde(rename = "type")]
    pub permission_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_file_discovery: Option<bool>,
}

/// Permission update request body.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PermissionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_file_discovery: Option<bool>,
}

/// A shared drive (or the synthetic "My Drive" entry).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SharedDrive {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `drives.list` response page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DriveList {
    #[serde(default)]
    pub drives: Vec<SharedDrive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_list_deserializes_camel_case() {
        let json = r#"{
            "files": [
                {"id": "f1", "name": "doc.txt", "mimeType": "text/plain", "size": "42"}
            ],
            "nextPageToken": "page-2"
        }"#;

        let list: FileList = serde_json::from_str(json).unwrap();
        assert_eq!(list.files.len(), 1);
        assert_eq!(list.files[0].mime_type.as_deref(), Some("text/plain"));
        assert_eq!(list.next_page_token.as_deref(), Some("page-2"));
    }

    #[test]
    fn folder_detection() {
        let folder: DriveFile = serde_json::from_str(
            r#"{"id": "d1", "mimeType": "application/vnd.google-apps.folder"}"#,
        )
        .unwrap();
        assert!(folder.is_folder());

        let file: DriveFile =
            serde_json::from_str(r#"{"id": "f1", "mimeType": "text/plain"}"#).unwrap();
        assert!(!file.is_folder());
    }

    #[test]
    fn change_list_carries_both_cursor_fields() {
        let json = r#"{
            "changes": [{"fileId": "abc", "removed": true}],
            "newStartPageToken": "nsp"
        }"#;

        let list: ChangeList = serde_json::from_str(json).unwrap();
        assert_eq!(list.changes.len(), 1);
        assert!(list.changes[0].removed);
        assert_eq!(list.new_start_page_token.as_deref(), Some("nsp"));
        assert!(list.next_page_token.is_none());
    }

    #[test]
    fn watch_request_serialises_type_field() {
        let request = WatchRequest {
            id: "chan".to_string(),
            channel_type: "web_hook".to_string(),
            address: "https://example.com/hook".to_string(),
            token: "secret".to_string(),
            params: WatchParams {
                ttl: "86400".to_string(),
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "web_hook");
        assert_eq!(json["params"]["ttl"], "86400");
    }

    #[test]
    fn permission_request_skips_absent_fields() {
        let request = PermissionRequest {
            role: "reader".to_string(),
            permission_type: "user".to_string(),
            email_address: Some("person@example.com".to_string()),
            ..Default::default()
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "user");
        assert!(json.get("domain").is_none());
    }
}
