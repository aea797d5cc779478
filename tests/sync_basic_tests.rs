// End-to-end behavior of the sync engine against mock collaborators:
// pagination merged with live pushes, conversation index maintenance, and
// conversation-created dedup across the REST and broadcast paths.

mod common;
use common::{attach_mock_channel, conv, settle, test_client, user, wire_msg, MockHistory};

use parley::sync::{InboundEvent, OutboundEvent};
use tokio::time::Duration;

#[tokio::test]
async fn test_activation_loads_history_and_joins_room() {
    let history = MockHistory::new();
    history.set_page(
        "c1",
        1,
        vec![
            wire_msg("a", "c1", "peer", "hello", 0),
            wire_msg("b", "c1", "me", "hi back", 20),
        ],
    );
    let client = test_client(history);
    let (channel, _events) = attach_mock_channel(&client);

    client.upsert_conversation(conv("c1", "peer")).await;
    client.set_active_conversation("c1").await.unwrap();

    let messages = client.messages("c1").await.expect("timeline materialized");
    let order: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(order, vec!["a", "b"]);

    let sent = channel.sent_events();
    assert!(sent
        .iter()
        .any(|e| matches!(e, OutboundEvent::ConversationJoin { conv_id, .. } if conv_id == "c1")));

    // Preview follows the newest merged message
    let conversations = client.conversations().await;
    assert_eq!(
        conversations[0].last_message_preview.as_deref(),
        Some("hi back")
    );
}

#[tokio::test]
async fn test_push_lands_between_paginated_entries() {
    let history = MockHistory::new();
    history.set_page(
        "c1",
        1,
        vec![
            wire_msg("a", "c1", "peer", "A", 0),
            wire_msg("b", "c1", "peer", "B", 20),
        ],
    );
    let client = test_client(history);
    let (_channel, events) = attach_mock_channel(&client);

    client.upsert_conversation(conv("c1", "peer")).await;
    client.set_active_conversation("c1").await.unwrap();

    // Live push referencing a timestamp older than the newest page entry
    events
        .send(InboundEvent::MessageReceived {
            conv_id: "c1".to_string(),
            message: wire_msg("c", "c1", "peer", "C", 10),
        })
        .await
        .unwrap();
    settle().await;

    let messages = client.messages("c1").await.unwrap();
    let order: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(order, vec!["a", "c", "b"]);

    // The same push delivered again is dropped silently
    events
        .send(InboundEvent::MessageReceived {
            conv_id: "c1".to_string(),
            message: wire_msg("c", "c1", "peer", "C", 10),
        })
        .await
        .unwrap();
    settle().await;
    assert_eq!(client.messages("c1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_inactive_conversation_updates_preview_only() {
    let history = MockHistory::new();
    let client = test_client(history);
    let (_channel, events) = attach_mock_channel(&client);

    client.upsert_conversation(conv("c1", "peer")).await;
    client.upsert_conversation(conv("c2", "other")).await;
    client.set_active_conversation("c1").await.unwrap();

    events
        .send(InboundEvent::MessageReceived {
            conv_id: "c2".to_string(),
            message: wire_msg("m1", "c2", "other", "pssst", 30),
        })
        .await
        .unwrap();
    settle().await;

    // No list materialized for the inactive conversation
    assert!(client.messages("c2").await.is_none());

    // But the index reordered and the preview refreshed
    let conversations = client.conversations().await;
    assert_eq!(conversations[0].id, "c2");
    assert_eq!(
        conversations[0].last_message_preview.as_deref(),
        Some("pssst")
    );
}

#[tokio::test]
async fn test_push_for_unknown_conversation_is_dropped() {
    let history = MockHistory::new();
    let client = test_client(history);
    let (_channel, events) = attach_mock_channel(&client);

    events
        .send(InboundEvent::MessageReceived {
            conv_id: "ghost".to_string(),
            message: wire_msg("m1", "ghost", "other", "boo", 0),
        })
        .await
        .unwrap();
    settle().await;

    assert!(client.conversations().await.is_empty());
    assert!(client.messages("ghost").await.is_none());
}

#[tokio::test]
async fn test_transient_history_failure_leaves_cache_untouched() {
    let history = MockHistory::new();
    history.set_page("c1", 1, vec![wire_msg("a", "c1", "peer", "A", 0)]);
    let client = test_client(history.clone());

    client.upsert_conversation(conv("c1", "peer")).await;
    client.set_active_conversation("c1").await.unwrap();
    assert_eq!(client.messages("c1").await.unwrap().len(), 1);

    history.set_fail_gets(true);
    let result = client.load_page("c1", 2).await;
    assert!(result.is_err(), "transient failure surfaces to the caller");
    assert_eq!(
        client.messages("c1").await.unwrap().len(),
        1,
        "cache untouched on failure"
    );

    // Retry succeeds once the backend recovers
    history.set_fail_gets(false);
    history.set_page("c1", 2, vec![wire_msg("b", "c1", "peer", "B", 5)]);
    client.load_page("c1", 2).await.unwrap();
    assert_eq!(client.messages("c1").await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_history_response_ignored_after_switch() {
    let history = MockHistory::new();
    history.set_page("c1", 1, vec![wire_msg("a", "c1", "peer", "old", 0)]);
    history.set_page("c2", 1, vec![wire_msg("b", "c2", "other", "new", 0)]);
    history.set_get_delay("c1", Duration::from_secs(5));
    let client = test_client(history);

    client.upsert_conversation(conv("c1", "peer")).await;
    client.upsert_conversation(conv("c2", "other")).await;

    // Slow activation of c1, then an immediate switch to c2
    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.set_active_conversation("c1").await })
    };
    settle().await;
    client.set_active_conversation("c2").await.unwrap();

    tokio::time::advance(Duration::from_secs(6)).await;
    slow.await.unwrap().unwrap();

    // The c1 response arrived after the switch and was discarded
    assert!(client.messages("c1").await.is_none());
    assert_eq!(client.messages("c2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_conversation_created_loopback_echo_is_deduped() {
    let history = MockHistory::new();
    let client = test_client(history);
    let (channel, events) = attach_mock_channel(&client);

    let created = client.create_conversation("peer", "d").await.unwrap();
    assert_eq!(client.conversations().await.len(), 1);
    assert!(channel
        .sent_events()
        .iter()
        .any(|e| matches!(e, OutboundEvent::ConversationCreate { .. })));

    // The server reflects our own create back at us
    events
        .send(InboundEvent::ConversationCreated {
            conversation: created.clone(),
            initiator: user("me"),
        })
        .await
        .unwrap();
    settle().await;
    assert_eq!(client.conversations().await.len(), 1, "echo is a no-op");

    // A peer-initiated conversation lands once, duplicates are no-ops
    events
        .send(InboundEvent::ConversationCreated {
            conversation: conv("c7", "stranger"),
            initiator: user("stranger"),
        })
        .await
        .unwrap();
    events
        .send(InboundEvent::ConversationCreated {
            conversation: conv("c7", "stranger"),
            initiator: user("stranger"),
        })
        .await
        .unwrap();
    settle().await;
    assert_eq!(client.conversations().await.len(), 2);
}

#[tokio::test]
async fn test_failed_conversation_create_leaves_index_untouched() {
    let history = MockHistory::new();
    history.set_fail_creates(true);
    let client = test_client(history);

    let result = client.create_conversation("peer", "d").await;
    assert!(result.is_err());
    assert!(client.conversations().await.is_empty());
}
