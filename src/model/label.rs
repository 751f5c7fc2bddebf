use std::collections::BTreeMap;

/// Key a message uses to reference a label: the label's custom id.
pub type LabelKey = String;

/// A user-defined tag owned by an account.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Label {
    pub id: i64,
    pub account_id: i64,
    pub custom_id: String,
    pub title: String,
    pub color: String,
}

/// Labels of one account, keyed by custom id.
///
/// Messages never own labels; they hold [`LabelKey`]s that are resolved
/// against the registry when the label itself is needed.
#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    labels: BTreeMap<LabelKey, Label>,
}

impl LabelRegistry {
    pub fn new(labels: impl IntoIterator<Item = Label>) -> Self {
        Self {
            labels: labels
                .into_iter()
                .map(|label| (label.custom_id.clone(), label))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Label> {
        self.labels.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
