use common_db::DomainEvent;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

macro_rules! messaging_event {
    ($name:ident, $event_type:literal, $aggregate_type:literal, { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Serialize)]
        pub struct $name {
            pub aggregate_id: Uuid,
            pub organization_id: Option<Uuid>,
            $(pub $field: $ty,)*
        }

        impl DomainEvent for $name {
            fn event_type(&self) -> &'static str {
                $event_type
            }

            fn aggregate_type(&self) -> &'static str {
                $aggregate_type
            }

            fn aggregate_id(&self) -> Uuid {
                self.aggregate_id
            }

            fn organization_id(&self) -> Option<Uuid> {
                self.organization_id
            }

            fn payload(&self) -> Value {
                serde_json::to_value(self).unwrap_or(Value::Null)
            }
        }
    };
}

messaging_event!(ChannelCreated, "channel.created", "Channel", {
    phone_number_id: String,
});

messaging_event!(ChannelDeactivated, "channel.deactivated", "Channel", {});

messaging_event!(ChannelSuspended, "channel.suspended", "Channel", {
    reason: String,
});

messaging_event!(MessageSendRequested, "message.send_requested", "Message", {
    channel_id: Uuid,
    to_phone: String,
});

messaging_event!(MessageStatusChanged, "message.status_changed", "Message", {
    status: String,
});

messaging_event!(TemplateCreated, "template.created", "Template", {
    name: String,
    language: String,
});

messaging_event!(TemplateSubmitted, "template.submitted", "Template", {});
