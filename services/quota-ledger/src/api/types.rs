use serde::{Deserialize, Serialize};

use crate::storage::{OrganisationQuota, ProjectQuota};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertOrgQuotaRequest {
    pub org_id: i64,
    pub max_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgQuotaResponse {
    pub org_id: i64,
    pub max_bytes: u64,
    pub used_bytes: u64,
}

impl From<OrganisationQuota> for OrgQuotaResponse {
    fn from(row: OrganisationQuota) -> Self {
        Self {
            org_id: row.org_id,
            max_bytes: row.max_bytes,
            used_bytes: row.used_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertProjectQuotaRequest {
    pub org_id: i64,
    pub project_id: i64,
    pub max_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectQuotaResponse {
    pub org_id: i64,
    pub project_id: i64,
    pub max_bytes: u64,
    pub used_bytes: u64,
}

impl From<ProjectQuota> for ProjectQuotaResponse {
    fn from(row: ProjectQuota) -> Self {
        Self {
            org_id: row.org_id,
            project_id: row.project_id,
            max_bytes: row.max_bytes,
            used_bytes: row.used_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
}
