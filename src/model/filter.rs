/// A stored user filter script.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageFilter {
    pub id: i64,
    pub title: String,
    pub script: String,
}
