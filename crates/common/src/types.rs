// Core domain rows shared across all scout crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::solution::SolutionStatus;

/// Opaque brief identifier. Scopes every collection and every channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BriefId(String);

impl BriefId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BriefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BriefId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BriefId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A chat turn on a brief. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub brief_id: BriefId,
    #[serde(default)]
    pub user_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub is_ai: bool,
    pub created_at: DateTime<Utc>,
}

/// An AI-proposed approach to a brief.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Solution {
    pub id: String,
    pub brief_id: BriefId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ai_confidence: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub status: SolutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Set by the server when a fast search quota unit was given back.
    #[serde(default)]
    pub fast_search_refunded: bool,
}

/// A supplier row matched against one of the brief's solutions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supplier {
    pub id: String,
    pub brief_id: BriefId,
    #[serde(default)]
    pub solution_id: Option<String>,
    pub company_name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A product offered by a matched supplier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub brief_id: BriefId,
    pub supplier_id: String,
    #[serde(default)]
    pub solution_id: Option<String>,
    pub product_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Match score in `[0, 100]` assigned by the scoring function.
    #[serde(default)]
    pub ai_score: Option<f64>,
    #[serde(default)]
    pub ai_explanation: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Server-side counters for a brief's dashboard.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KpiAggregate {
    #[serde(default)]
    pub solutions_count: u64,
    #[serde(default)]
    pub suppliers_count: u64,
    #[serde(default)]
    pub products_count: u64,
    #[serde(default)]
    pub fast_searches_used: u64,
}

/// Role of the signed-in user, as reported by the backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn solution_decodes_with_missing_optional_fields() {
        let solution: Solution = serde_json::from_value(json!({
            "id": "sol-1",
            "brief_id": "brief-1",
            "title": "Recycled PET packaging",
            "status": "proposed",
            "created_at": "2026-03-01T10:00:00+00:00",
            "updated_at": "2026-03-01T10:00:00.123456+00:00"
        }))
        .expect("solution should decode");

        assert_eq!(solution.brief_id, BriefId::new("brief-1"));
        assert_eq!(solution.status, SolutionStatus::Proposed);
        assert!(solution.keywords.is_empty());
        assert!(!solution.fast_search_refunded);
        assert!(solution.metadata.is_none());
    }

    #[test]
    fn brief_id_serializes_transparently() {
        let message = ChatMessage {
            id: "m1".into(),
            brief_id: BriefId::new("brief-7"),
            user_id: None,
            content: "hi".into(),
            is_ai: false,
            created_at: "2026-03-01T10:00:00Z".parse().expect("timestamp"),
        };
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["brief_id"], "brief-7");
    }

    #[test]
    fn user_role_defaults_to_user() {
        assert_eq!(UserRole::default(), UserRole::User);
        let role: UserRole = serde_json::from_value(json!("admin")).expect("role");
        assert_eq!(role, UserRole::Admin);
    }
}
