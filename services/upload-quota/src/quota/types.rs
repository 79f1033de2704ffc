use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatus {
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    pub date_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotReservation {
    pub reservation_id: String,
    pub date_key: String,
    pub count: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedUpload {
    pub success: bool,
    pub reservation_id: String,
}

/// Completion report of an upload, as received from the client.
#[derive(Debug, Clone)]
pub struct FinalizeUpload {
    pub reservation_id: String,
    pub full_path: String,
    pub size: u64,
}
