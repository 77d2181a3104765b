use chrono::{DateTime, Utc};
use common_db::EventBuffer;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::events::{TemplateCreated, TemplateSubmitted};
use crate::domain::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl TemplateStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::Draft => "draft",
            TemplateStatus::Pending => "pending",
            TemplateStatus::Approved => "approved",
            TemplateStatus::Rejected => "rejected",
        }
    }
}

/// A WhatsApp message template, mirroring the provider's own approval
/// workflow: a template is authored as `draft`, submitted for review
/// (`pending`), and eventually `approved` or `rejected` by the provider. Only
/// `approved` templates may be used to open a conversation outside the
/// customer-service window.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub channel_id: Uuid,
    pub name: String,
    pub language: String,
    pub category: String,
    pub body: String,
    pub variables: Vec<String>,
    pub status: TemplateStatus,
    pub provider_template_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) events: EventBuffer,
}

impl Template {
    pub fn create(
        organization_id: Uuid,
        channel_id: Uuid,
        name: String,
        language: String,
        category: String,
        body: String,
        variables: Vec<String>,
    ) -> Result<Self, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::Validation("template name cannot be empty".into()));
        }
        if body.trim().is_empty() {
            return Err(DomainError::Validation("template body cannot be empty".into()));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut events = EventBuffer::default();
        events.push(TemplateCreated {
            aggregate_id: id,
            organization_id: Some(organization_id),
            name: name.clone(),
            language: language.clone(),
        });

        Ok(Self {
            id,
            organization_id,
            channel_id,
            name,
            language,
            category,
            body,
            variables,
            status: TemplateStatus::Draft,
            provider_template_id: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
            events,
        })
    }

    pub fn submit(&mut self) -> Result<(), DomainError> {
        if self.status != TemplateStatus::Draft {
            return Err(DomainError::InvalidTransition(format!(
                "cannot submit template from status {}",
                self.status.as_str()
            )));
        }
        self.status = TemplateStatus::Pending;
        self.updated_at = Utc::now();
        self.events.push(TemplateSubmitted {
            aggregate_id: self.id,
            organization_id: Some(self.organization_id),
        });
        Ok(())
    }

    pub fn approve(&mut self, provider_template_id: String) -> Result<(), DomainError> {
        if self.status != TemplateStatus::Pending {
            return Err(DomainError::InvalidTransition(format!(
                "cannot approve template from status {}",
                self.status.as_str()
            )));
        }
        self.status = TemplateStatus::Approved;
        self.provider_template_id = Some(provider_template_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn reject(&mut self, reason: String) -> Result<(), DomainError> {
        if self.status != TemplateStatus::Pending {
            return Err(DomainError::InvalidTransition(format!(
                "cannot reject template from status {}",
                self.status.as_str()
            )));
        }
        self.status = TemplateStatus::Rejected;
        self.rejection_reason = Some(reason);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_usable(&self) -> bool {
        self.status == TemplateStatus::Approved
    }

    /// Renders the body by substituting `{{var}}` placeholders positionally,
    /// used by the `/templates/{id}/test` endpoint to build a preview
    /// message without persisting a real send.
    pub fn render(&self, values: &[String]) -> String {
        let mut rendered = self.body.clone();
        for (name, value) in self.variables.iter().zip(values.iter()) {
            rendered = rendered.replace(&format!("{{{{{name}}}}}"), value);
        }
        rendered
    }

    pub fn drain_events(&mut self) -> Vec<Box<dyn common_db::DomainEvent>> {
        self.events.drain_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Template {
        Template::create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "order_confirmation".into(),
            "en_US".into(),
            "utility".into(),
            "Hi {{name}}, your order {{order_id}} shipped.".into(),
            vec!["name".into(), "order_id".into()],
        )
        .unwrap()
    }

    #[test]
    fn submit_moves_draft_to_pending() {
        let mut template = sample();
        template.submit().unwrap();
        assert_eq!(template.status, TemplateStatus::Pending);
    }

    #[test]
    fn cannot_submit_twice() {
        let mut template = sample();
        template.submit().unwrap();
        assert!(template.submit().is_err());
    }

    #[test]
    fn approve_requires_pending() {
        let mut template = sample();
        assert!(template.approve("wa-tpl-1".into()).is_err());
        template.submit().unwrap();
        template.approve("wa-tpl-1".into()).unwrap();
        assert!(template.is_usable());
    }

    #[test]
    fn render_substitutes_variables() {
        let template = sample();
        let rendered = template.render(&["Alice".into(), "A-100".into()]);
        assert_eq!(rendered, "Hi Alice, your order A-100 shipped.");
    }
}
