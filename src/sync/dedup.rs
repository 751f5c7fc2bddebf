use crate::model::Message;

/// How two messages of one batch are recognized as the same logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DuplicateRule {
    RowId,
    Attributes,
    CustomId,
}

impl DuplicateRule {
    fn for_anchor(message: &Message) -> Self {
        if message.id > 0 {
            DuplicateRule::RowId
        } else if message.custom_id.is_empty() {
            DuplicateRule::Attributes
        } else {
            DuplicateRule::CustomId
        }
    }

    fn matches(self, a: &Message, b: &Message) -> bool {
        match self {
            DuplicateRule::RowId => a.id == b.id,
            DuplicateRule::Attributes => (&a.title, &a.url, &a.author) == (&b.title, &b.url, &b.author),
            DuplicateRule::CustomId => a.custom_id == b.custom_id,
        }
    }
}

/// Collapses duplicates within a fetched batch, keeping order otherwise.
///
/// Each surviving message in turn becomes an anchor whose identity shape
/// fixes the rule for its cluster. The rest of the batch is compared against
/// the currently kept duplicate; of two duplicates the one created later
/// survives, and on equal timestamps the one further down the list.
pub fn remove_duplicate_messages(messages: &mut Vec<Message>) {
    let mut removed = vec![false; messages.len()];

    for anchor in 0..messages.len() {
        if removed[anchor] {
            continue;
        }

        let rule = DuplicateRule::for_anchor(&messages[anchor]);
        let mut kept = anchor;

        for candidate in anchor + 1..messages.len() {
            if removed[candidate] || !rule.matches(&messages[kept], &messages[candidate]) {
                continue;
            }

            let loser = if messages[kept].created_millis() <= messages[candidate].created_millis() {
                std::mem::replace(&mut kept, candidate)
            } else {
                candidate
            };

            tracing::warn!(
                title = %messages[loser].title,
                "Removing message before saving it, because it is a duplicate"
            );
            removed[loser] = true;
        }
    }

    let mut flags = removed.into_iter();
    messages.retain(|_| !flags.next().unwrap_or(false));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn msg(title: &str, url: &str, created: i64) -> Message {
        Message {
            title: title.into(),
            url: url.into(),
            created: Utc.timestamp_millis_opt(created).single(),
            ..Default::default()
        }
    }

    fn with_custom_id(mut message: Message, custom_id: &str) -> Message {
        message.custom_id = custom_id.into();
        message
    }

    fn summary(messages: &[Message]) -> Vec<(String, i64)> {
        messages
            .iter()
            .map(|m| (m.title.clone(), m.created_millis()))
            .collect()
    }

    #[test]
    fn test_later_duplicate_wins_regardless_of_order() {
        let mut forward = vec![msg("X", "u", 1), msg("X", "u", 2), msg("Y", "v", 1)];
        remove_duplicate_messages(&mut forward);
        assert_eq!(summary(&forward), vec![("X".into(), 2), ("Y".into(), 1)]);

        let mut backward = vec![msg("X", "u", 2), msg("X", "u", 1), msg("Y", "v", 1)];
        remove_duplicate_messages(&mut backward);
        assert_eq!(summary(&backward), vec![("X".into(), 2), ("Y".into(), 1)]);
    }

    #[test]
    fn test_equal_timestamps_keep_the_later_position() {
        let first = with_custom_id(msg("First copy", "u", 5), "guid");
        let second = with_custom_id(msg("Second copy", "u", 5), "guid");
        let mut batch = vec![first, second];

        remove_duplicate_messages(&mut batch);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].title, "Second copy");
    }

    #[test]
    fn test_survivor_keeps_its_own_position() {
        let mut batch = vec![
            with_custom_id(msg("A old", "", 1), "a"),
            with_custom_id(msg("B", "", 1), "b"),
            with_custom_id(msg("A new", "", 9), "a"),
            with_custom_id(msg("C", "", 1), "c"),
        ];
        remove_duplicate_messages(&mut batch);

        let titles: Vec<&str> = batch.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A new", "C"]);
    }

    #[test]
    fn test_cluster_rule_is_fixed_by_anchor() {
        // The anchor has no custom id, so attributes decide, even though the
        // second message carries one.
        let mut batch = vec![
            msg("Same", "u", 1),
            with_custom_id(msg("Same", "u", 2), "guid"),
        ];
        remove_duplicate_messages(&mut batch);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].custom_id, "guid");

        // With the custom id message first, the attribute twin is not a duplicate.
        let mut batch = vec![
            with_custom_id(msg("Same", "u", 2), "guid"),
            msg("Same", "u", 1),
        ];
        remove_duplicate_messages(&mut batch);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_row_id_rule() {
        let mut a = msg("Edited title", "u", 3);
        a.id = 10;
        let mut b = msg("Original title", "other", 1);
        b.id = 10;
        let mut batch = vec![a, b];

        remove_duplicate_messages(&mut batch);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].title, "Edited title");
    }

    #[test]
    fn test_long_cluster_collapses_to_newest() {
        let mut batch: Vec<Message> = [4, 9, 2, 9, 7]
            .iter()
            .map(|&created| with_custom_id(msg(&format!("copy {}", created), "", created), "same"))
            .collect();
        batch[3].title = "last nine".into();

        remove_duplicate_messages(&mut batch);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].title, "last nine");
    }
}
