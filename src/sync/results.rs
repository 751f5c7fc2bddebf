/// Feeds that received new unread messages during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDownloadResults {
    updated_feeds: Vec<(String, usize)>,
}

impl FeedDownloadResults {
    pub fn append_updated_feed(&mut self, title: impl Into<String>, unread: usize) {
        self.updated_feeds.push((title.into(), unread));
    }

    /// Orders feeds by descending unread count; equal counts keep their
    /// processing order.
    pub fn sort(&mut self) {
        self.updated_feeds.sort_by(|a, b| b.1.cmp(&a.1));
    }

    pub fn clear(&mut self) {
        self.updated_feeds.clear();
    }

    pub fn updated_feeds(&self) -> &[(String, usize)] {
        &self.updated_feeds
    }

    pub fn is_empty(&self) -> bool {
        self.updated_feeds.is_empty()
    }

    /// Human readable summary of the first `how_many_feeds` entries.
    pub fn overview(&self, how_many_feeds: usize) -> String {
        let mut overview = self
            .updated_feeds
            .iter()
            .take(how_many_feeds)
            .map(|(title, unread)| format!("{}: {}", title, unread))
            .collect::<Vec<_>>()
            .join("\n");

        if self.updated_feeds.len() > how_many_feeds {
            let others = self.updated_feeds.len() - how_many_feeds;
            let noun = if others == 1 { "feed" } else { "feeds" };
            overview.push_str(&format!("\n\n+ {} other {}.", others, noun));
        }

        overview
    }
}
