//! API response types for consistent JSON responses

use serde::Serialize;

use crate::space::SpaceSummary;

/// Body of `GET /api`
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub message: String,
    /// RFC 3339 time of the response
    pub timestamp: String,
    pub version: &'static str,
}

/// Body of `GET /api/spaces`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpacesResponse {
    pub connections: usize,
    pub space_count: usize,
    pub uptime_secs: u64,
    pub spaces: Vec<SpaceSummary>,
}

/// Body of `GET /api/spaces/:space_id`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceDetail {
    pub space_id: String,
    pub owner: Option<String>,
    pub members: Vec<crate::protocol::events::MemberInfo>,
}
