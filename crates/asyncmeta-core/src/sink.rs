use asyncmeta_common::SearchEntry;
use tokio::sync::mpsc;

/// Something streamed to a searching client before the final result.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Entry(SearchEntry),
    Reference(Vec<String>),
}

/// Receives search results as they arrive from the targets.
///
/// Called with the operation's lock held, so implementations must not
/// block.
pub trait SearchSink: Send + Sync {
    fn entry(&self, entry: SearchEntry);

    fn reference(&self, urls: Vec<String>);
}

impl SearchSink for mpsc::UnboundedSender<SearchEvent> {
    fn entry(&self, entry: SearchEntry) {
        // A closed receiver means the client is gone; the reaper cleans up.
        let _ = self.send(SearchEvent::Entry(entry));
    }

    fn reference(&self, urls: Vec<String>) {
        let _ = self.send(SearchEvent::Reference(urls));
    }
}
