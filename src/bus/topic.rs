//! Dispenser topic scheme.
//!
//! All dispenser traffic lives under one root:
//!
//! ```text
//! {root}/discovery            bidirectional discover/announce
//! {root}/{device_id}/status   device presence
//! {root}/{device_id}/data     device telemetry
//! {root}/{device_id}/commands client -> device command envelopes
//! {root}/{device_id}/response device -> client command results
//! ```
//!
//! `status`, `data` and `response` are subscribed with a single-segment
//! wildcard; the device id is recovered from the topic at classification
//! time.

/// Builds and classifies topics under a fixed root.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    root: String,
}

/// The role of an inbound topic, with the device segment extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    /// `{root}/discovery` — discover requests and device announcements.
    Discovery,
    /// `{root}/{id}/status`
    Status(String),
    /// `{root}/{id}/data`
    Data(String),
    /// `{root}/{id}/response`
    Response(String),
}

impl TopicScheme {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    /// The shared discovery topic.
    pub fn discovery(&self) -> String {
        format!("{}/discovery", self.root)
    }

    /// Command topic for a specific device.
    pub fn commands(&self, device_id: &str) -> String {
        format!("{}/{}/commands", self.root, device_id)
    }

    /// Wildcard filters the embedder should subscribe to, discovery first.
    pub fn subscriptions(&self) -> [String; 4] {
        [
            self.discovery(),
            format!("{}/+/status", self.root),
            format!("{}/+/data", self.root),
            format!("{}/+/response", self.root),
        ]
    }

    /// Classify an inbound topic. Returns `None` for topics outside the
    /// scheme (including the command topic, which the client only writes).
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        let rest = topic.strip_prefix(self.root.as_str())?.strip_prefix('/')?;

        if rest == "discovery" {
            return Some(TopicKind::Discovery);
        }

        let (device_id, leaf) = rest.split_once('/')?;
        if device_id.is_empty() {
            return None;
        }
        match leaf {
            "status" => Some(TopicKind::Status(device_id.to_string())),
            "data" => Some(TopicKind::Data(device_id.to_string())),
            "response" => Some(TopicKind::Response(device_id.to_string())),
            _ => None,
        }
    }
}
