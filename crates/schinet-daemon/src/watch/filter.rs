//! Live event filter: fans an inbound platform message out to every watch
//! session whose source and channel scope match.

use schinet_core::PlatformMessage;
use tracing::{debug, trace};

use super::registry::WatchRegistry;
use super::types::{ChannelScope, RelayFrame};

/// Format one chat message as a viewer line.
///
/// The channel name is only shown when the session watches all channels.
pub fn format_line(
    scope: &ChannelScope,
    channel_name: &str,
    author_name: &str,
    author_discriminator: &str,
    content: &str,
) -> String {
    let mut line = String::with_capacity(content.len() + author_name.len() + 16);
    if scope.is_all() && !channel_name.is_empty() {
        line.push('[');
        line.push_str(channel_name);
        line.push_str("] ");
    }
    line.push('[');
    line.push_str(author_name);
    line.push('#');
    line.push_str(author_discriminator);
    line.push_str("] ");
    line.push_str(content);
    line
}

/// Whether a session on `source_id` with `scope` should see the message.
pub fn matches(source_id: &str, scope: &ChannelScope, msg: &PlatformMessage) -> bool {
    if msg.source_id != source_id {
        return false;
    }
    match scope.channel_id() {
        None => true,
        Some(channel_id) => channel_id == msg.channel_id,
    }
}

/// Enqueue the message on every matching live session. Returns the number of
/// sessions that received a copy.
pub async fn dispatch(registry: &WatchRegistry, msg: &PlatformMessage) -> usize {
    let mut delivered = 0;
    for route in registry.live_routes().await {
        if !matches(&route.source_id, &route.scope, msg) {
            continue;
        }
        let line = format_line(
            &route.scope,
            &msg.channel_name,
            &msg.author_name,
            &msg.author_discriminator,
            &msg.content,
        );
        if route.queue.send(RelayFrame::Line(line)).is_ok() {
            delivered += 1;
        } else {
            // The relay loop is tearing down; its entry is about to go.
            debug!(session_id = %route.id, "Dropped event for closing session");
        }
    }
    trace!(source_id = %msg.source_id, delivered, "Dispatched platform message");
    delivered
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::watch::registry::PortRange;
    use crate::watch::types::SourceRef;

    fn scoped(id: &str) -> ChannelScope {
        ChannelScope::Channel {
            id: id.to_string(),
            name: format!("{id}-name"),
        }
    }

    fn message(source: &str, channel: &str, content: &str) -> PlatformMessage {
        PlatformMessage {
            source_id: source.to_string(),
            source_name: String::new(),
            channel_id: channel.to_string(),
            channel_name: "general".to_string(),
            author_name: "bob".to_string(),
            author_discriminator: "0042".to_string(),
            content: content.to_string(),
            timestamp: None,
        }
    }

    #[test]
    fn all_scope_shows_channel() {
        let line = format_line(&ChannelScope::All, "general", "bob", "0042", "hello");
        assert_eq!(line, "[general] [bob#0042] hello");
    }

    #[test]
    fn channel_scope_hides_channel() {
        let line = format_line(&scoped("c1"), "general", "bob", "0042", "hello");
        assert_eq!(line, "[bob#0042] hello");
    }

    #[test]
    fn missing_channel_or_discriminator() {
        assert_eq!(
            format_line(&ChannelScope::All, "", "amy", "", "psst"),
            "[amy#] psst"
        );
    }

    #[test]
    fn matching_rules() {
        let msg = message("g1", "c1", "x");
        assert!(matches("g1", &ChannelScope::All, &msg));
        assert!(matches("g1", &scoped("c1"), &msg));
        assert!(!matches("g1", &scoped("c2"), &msg));
        assert!(!matches("g2", &ChannelScope::All, &msg));
    }

    #[tokio::test]
    async fn every_matching_session_gets_its_own_copy() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();
        let ports = PortRange {
            base: 8444,
            span: 8,
        };
        let source = SourceRef {
            id: "g1".into(),
            name: "Guild".into(),
        };

        let mut all = registry
            .reserve(source.clone(), ChannelScope::All, ports, &HashSet::new(), &root)
            .await
            .unwrap();
        let mut c1 = registry
            .reserve(source.clone(), scoped("c1"), ports, &HashSet::new(), &root)
            .await
            .unwrap();
        let mut c2 = registry
            .reserve(source, scoped("c2"), ports, &HashSet::new(), &root)
            .await
            .unwrap();
        for id in [all.id, c1.id, c2.id] {
            registry.attach(id, "1".into()).await.unwrap();
        }

        let delivered = dispatch(&registry, &message("g1", "c1", "hi")).await;
        assert_eq!(delivered, 2);

        assert_eq!(
            all.queue_rx.try_recv().unwrap(),
            RelayFrame::Line("[general] [bob#0042] hi".into())
        );
        assert_eq!(
            c1.queue_rx.try_recv().unwrap(),
            RelayFrame::Line("[bob#0042] hi".into())
        );
        assert!(c2.queue_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn other_sources_are_ignored() {
        let registry = WatchRegistry::new();
        let root = CancellationToken::new();
        let mut r = registry
            .reserve(
                SourceRef {
                    id: "g1".into(),
                    name: "Guild".into(),
                },
                ChannelScope::All,
                PortRange {
                    base: 8444,
                    span: 8,
                },
                &HashSet::new(),
                &root,
            )
            .await
            .unwrap();
        registry.attach(r.id, "1".into()).await.unwrap();

        assert_eq!(dispatch(&registry, &message("g2", "c1", "x")).await, 0);
        assert!(r.queue_rx.try_recv().is_err());
    }
}
