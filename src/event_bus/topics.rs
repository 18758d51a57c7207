//! Bus topic layout
//!
//! - `{prefix}/{camera}/motion`            camera observed movement
//! - `{prefix}/{camera}/snapshot/request`  ask a camera for a capture
//! - `{prefix}/{camera}/snapshot/image`    raw image bytes from a camera

/// Kind of message carried on a camera topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Motion,
    SnapshotRequest,
    SnapshotImage,
}

/// Parsed camera topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraTopic {
    pub camera_id: String,
    pub kind: TopicKind,
}

/// Topic builder/parser bound to a prefix
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Subscription filter for motion on any camera
    pub fn motion_filter(&self) -> String {
        format!("{}/+/motion", self.prefix)
    }

    /// Subscription filter for image deliveries from any camera
    pub fn image_filter(&self) -> String {
        format!("{}/+/snapshot/image", self.prefix)
    }

    pub fn motion(&self, camera_id: &str) -> String {
        format!("{}/{}/motion", self.prefix, camera_id)
    }

    pub fn snapshot_request(&self, camera_id: &str) -> String {
        format!("{}/{}/snapshot/request", self.prefix, camera_id)
    }

    pub fn snapshot_image(&self, camera_id: &str) -> String {
        format!("{}/{}/snapshot/image", self.prefix, camera_id)
    }

    /// Parse a concrete topic; None for anything outside the layout
    pub fn parse(&self, topic: &str) -> Option<CameraTopic> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let (camera_id, suffix) = rest.split_once('/')?;
        if camera_id.is_empty() || camera_id == "+" || camera_id == "#" {
            return None;
        }

        let kind = match suffix {
            "motion" => TopicKind::Motion,
            "snapshot/request" => TopicKind::SnapshotRequest,
            "snapshot/image" => TopicKind::SnapshotImage,
            _ => return None,
        };

        Some(CameraTopic {
            camera_id: camera_id.to_string(),
            kind,
        })
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("camera")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_topics() {
        let topics = Topics::new("camera/");
        assert_eq!(topics.motion("side"), "camera/side/motion");
        assert_eq!(topics.snapshot_request("side"), "camera/side/snapshot/request");
        assert_eq!(topics.snapshot_image("side"), "camera/side/snapshot/image");
        assert_eq!(topics.motion_filter(), "camera/+/motion");
        assert_eq!(topics.image_filter(), "camera/+/snapshot/image");
    }

    #[test]
    fn test_parse_known_topics() {
        let topics = Topics::default();
        assert_eq!(
            topics.parse("camera/side/motion"),
            Some(CameraTopic {
                camera_id: "side".to_string(),
                kind: TopicKind::Motion
            })
        );
        assert_eq!(
            topics.parse("camera/back_yard/snapshot/image").map(|t| t.kind),
            Some(TopicKind::SnapshotImage)
        );
    }

    #[test]
    fn test_parse_rejects_foreign_topics() {
        let topics = Topics::default();
        assert!(topics.parse("other/side/motion").is_none());
        assert!(topics.parse("camera//motion").is_none());
        assert!(topics.parse("camera/side/zoom").is_none());
        assert!(topics.parse("camera/side").is_none());
        assert!(topics.parse("cameras/side/motion").is_none());
    }

    #[test]
    fn test_nested_prefix() {
        let topics = Topics::new("home/yard");
        assert_eq!(
            topics.parse("home/yard/side/motion").map(|t| t.camera_id),
            Some("side".to_string())
        );
    }
}
