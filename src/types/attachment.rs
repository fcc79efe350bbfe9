use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Attachment {
    pub id: String,
    #[serde(alias = "filename")]
    pub file_name: String,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    #[serde(alias = "file_url")]
    pub url: Option<String>,
    pub created_at: String,
}
