use serde::{Deserialize, Serialize};

use super::Role;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub project_code: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub owner_id: Option<String>,
    pub owner_name: Option<String>,
    #[serde(default)]
    pub members: Vec<ProjectMember>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ProjectMember {
    #[serde(alias = "id")]
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub role: Option<String>,
}

/// Staff user returned by the agent search used when assigning work.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Option<Role>,
}
