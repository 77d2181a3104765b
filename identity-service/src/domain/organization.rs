use chrono::{DateTime, Utc};
use common_db::EventBuffer;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::events::OrganizationCreated;
use crate::domain::DomainError;

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap());

/// Per-organization metadata: timezone/language for localization, branding
/// for white-label presentation, `features`/`limits` for plan gating.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationMetadata {
    pub timezone: Option<String>,
    pub language: Option<String>,
    pub branding: Value,
    pub features: Value,
    pub limits: Value,
}

#[derive(Debug, Clone)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub industry: Option<String>,
    pub metadata: OrganizationMetadata,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) events: EventBuffer,
}

impl Organization {
    pub fn create(name: String, slug: String, industry: Option<String>) -> Result<Self, DomainError> {
        let slug = slug.trim().to_lowercase();
        if !SLUG_RE.is_match(&slug) {
            return Err(DomainError::Validation(format!(
                "slug must be lowercase kebab-case: {slug}"
            )));
        }
        if name.trim().is_empty() {
            return Err(DomainError::Validation("organization name cannot be empty".into()));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut events = EventBuffer::default();
        events.push(OrganizationCreated {
            aggregate_id: id,
            organization_id: Some(id),
            name: name.clone(),
            slug: slug.clone(),
        });

        Ok(Self {
            id,
            name,
            slug,
            industry,
            metadata: OrganizationMetadata::default(),
            is_active: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            events,
        })
    }

    pub fn deactivate(&mut self) {
        if !self.is_active {
            return;
        }
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    pub fn reactivate(&mut self) {
        if self.is_active {
            return;
        }
        self.is_active = true;
        self.updated_at = Utc::now();
    }

    pub fn soft_delete(&mut self) {
        if self.deleted_at.is_some() {
            return;
        }
        self.deleted_at = Some(Utc::now());
        self.is_active = false;
    }

    pub fn update_metadata(&mut self, metadata: OrganizationMetadata) {
        self.metadata = metadata;
        self.updated_at = Utc::now();
    }

    pub fn drain_events(&mut self) -> Vec<Box<dyn common_db::DomainEvent>> {
        self.events.drain_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_kebab_slug() {
        assert!(Organization::create("Acme".into(), "Acme Corp".into(), None).is_err());
    }

    #[test]
    fn create_emits_organization_created() {
        let mut org = Organization::create("Acme".into(), "acme-corp".into(), None).unwrap();
        let events = org.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "organization.created");
        assert!(org.drain_events().is_empty());
    }

    #[test]
    fn soft_delete_also_deactivates() {
        let mut org = Organization::create("Acme".into(), "acme-corp".into(), None).unwrap();
        org.drain_events();
        org.soft_delete();
        assert!(!org.is_active);
        assert!(org.deleted_at.is_some());
    }
}
