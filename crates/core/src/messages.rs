//! Runtime error message catalog
//!
//! Formatted messages for faults raised on the request path come from a
//! [`MessageCatalog`]: an immutable table built explicitly by the owner of
//! the dispatcher and shared through an `Arc`. There is no process-global
//! instance; two clients may carry different catalogs.
//!
//! Templates use positional `{}` placeholders filled left to right.
//! Missing arguments render as an empty string, surplus arguments are ignored.

use std::collections::HashMap;
use std::fmt::{self, Display, Write};

/// Identifies one message template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Args: elapsed ms, operation name
    RequestTimedOut,
    /// Args: rep group, operation name
    NoNodeAvailable,
    /// Args: rep group, active request limit
    AllNodesBusy,
    /// Args: partition
    PartitionNotInTopology,
    /// Args: rep group
    GroupNotInTopology,
    /// Args: first index, offending index
    BatchSpansPartitions,
    /// No args
    EmptyBatch,
    /// Args: operation count, limit
    BatchTooLarge,
    /// Args: operation name
    NotAllowedInBatch,
    /// Args: rep group, consistency
    ConsistencyUnsatisfiable,
    /// Args: attempts, last error
    RetriesExhausted,
    /// Args: partition, rep group
    PartitionNotHosted,
}

/// Immutable table of message templates
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    templates: HashMap<MessageId, String>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        let entries = [
            (MessageId::RequestTimedOut, "request timed out after {}ms during {}"),
            (MessageId::NoNodeAvailable, "no node of {} is available for {}"),
            (MessageId::AllNodesBusy, "every node of {} has reached {} active requests"),
            (MessageId::PartitionNotInTopology, "partition {} is not in the current topology"),
            (MessageId::GroupNotInTopology, "rep group {} is not in the current topology"),
            (
                MessageId::BatchSpansPartitions,
                "operation {} and operation {} have different major paths",
            ),
            (MessageId::EmptyBatch, "execute requires at least one operation"),
            (MessageId::BatchTooLarge, "batch of {} operations exceeds the limit of {}"),
            (MessageId::NotAllowedInBatch, "{} is not allowed inside execute"),
            (MessageId::ConsistencyUnsatisfiable, "no node of {} satisfies consistency {}"),
            (MessageId::RetriesExhausted, "gave up after {} attempts: {}"),
            (MessageId::PartitionNotHosted, "partition {} is not hosted by {}"),
        ];

        Self {
            templates: entries
                .into_iter()
                .map(|(id, t)| (id, t.to_string()))
                .collect(),
        }
    }
}

impl MessageCatalog {
    /// Replace one template, returning the updated catalog
    pub fn with_template(mut self, id: MessageId, template: impl Into<String>) -> Self {
        self.templates.insert(id, template.into());
        self
    }

    /// Raw template for `id`
    pub fn template(&self, id: MessageId) -> &str {
        self.templates.get(&id).map(String::as_str).unwrap_or("{}")
    }

    /// Render the template for `id` with positional arguments
    pub fn format(&self, id: MessageId, args: &[&dyn Display]) -> String {
        let template = self.template(id);
        let mut out = String::with_capacity(template.len() + 16);
        let mut args = args.iter();
        let mut rest = template;

        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            if let Some(arg) = args.next() {
                // Writing into a String cannot fail
                let _ = write!(out, "{}", arg);
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fills_placeholders() {
        let catalog = MessageCatalog::default();
        let msg = catalog.format(MessageId::RequestTimedOut, &[&250u64, &"put"]);
        assert_eq!(msg, "request timed out after 250ms during put");
    }

    #[test]
    fn test_format_tolerates_arity_mismatch() {
        let catalog = MessageCatalog::default();
        assert_eq!(
            catalog.format(MessageId::PartitionNotInTopology, &[]),
            "partition  is not in the current topology"
        );
        assert_eq!(
            catalog.format(MessageId::EmptyBatch, &[&1, &2]),
            "execute requires at least one operation"
        );
    }

    #[test]
    fn test_with_template_overrides() {
        let catalog =
            MessageCatalog::default().with_template(MessageId::EmptyBatch, "leere Liste");
        assert_eq!(catalog.format(MessageId::EmptyBatch, &[]), "leere Liste");
        // Other entries untouched
        assert!(catalog
            .format(MessageId::BatchTooLarge, &[&5, &4])
            .contains("exceeds"));
    }
}
