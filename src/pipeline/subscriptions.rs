//! Merging per-consumer subscriptions into the player-facing set.

use std::collections::BTreeMap;

use crate::player::SubscribePayload;

/// Merge many consumers' subscription payloads into one de-duplicated list.
///
/// A whole-message subscription for a topic dominates any field subsets for
/// the same topic; otherwise field subsets union. The result is sorted by
/// topic so repeated merges of the same inputs are identical.
pub fn merge_subscriptions(
    payloads: impl IntoIterator<Item = SubscribePayload>,
) -> Vec<SubscribePayload> {
    let mut merged: BTreeMap<String, SubscribePayload> = BTreeMap::new();
    for payload in payloads {
        match merged.get_mut(&payload.topic) {
            None => {
                merged.insert(payload.topic.clone(), payload);
            }
            Some(existing) => match (&mut existing.fields, payload.fields) {
                // Whole-message subscription already dominates
                (None, _) => {}
                (_, None) => existing.fields = None,
                (Some(existing_fields), Some(fields)) => {
                    existing_fields.extend(fields);
                }
            },
        }
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn fields(names: &[&str]) -> Option<BTreeSet<String>> {
        Some(names.iter().map(|n| n.to_string()).collect())
    }

    #[test]
    fn duplicate_topics_collapse() {
        let merged = merge_subscriptions(vec![
            SubscribePayload::topic("/a"),
            SubscribePayload::topic("/a"),
            SubscribePayload::topic("/b"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].topic, "/a");
        assert_eq!(merged[1].topic, "/b");
    }

    #[test]
    fn whole_message_dominates_field_subsets() {
        let merged = merge_subscriptions(vec![
            SubscribePayload { topic: "/a".into(), fields: fields(&["x"]) },
            SubscribePayload::topic("/a"),
            SubscribePayload { topic: "/a".into(), fields: fields(&["y"]) },
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].fields, None);
    }

    #[test]
    fn field_subsets_union() {
        let merged = merge_subscriptions(vec![
            SubscribePayload { topic: "/a".into(), fields: fields(&["x"]) },
            SubscribePayload { topic: "/a".into(), fields: fields(&["y"]) },
        ]);
        assert_eq!(merged[0].fields, fields(&["x", "y"]));
    }
}
