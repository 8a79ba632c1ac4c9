use super::*;
use crate::model::{Board, Card, EntityId, List};
use crate::router;
use crate::store::{CardChanges, CardMove, EntityStore, Origin, Patch};

fn change(kind: &str, card: &str) -> PendingChange {
    PendingChange::new(kind, serde_json::json!({ "cardId": card }))
}

fn kinds_and_cards(changes: &[PendingChange]) -> Vec<(String, String)> {
    changes
        .iter()
        .map(|c| (c.kind.clone(), c.payload["cardId"].as_str().unwrap_or_default().to_owned()))
        .collect()
}

#[test]
fn replay_preserves_enqueue_order() {
    let mut queue = OfflineQueue::new();
    queue.push(change("card-updated", "a"));
    queue.push(change("card-moved", "b"));
    queue.push(change("card-deleted", "c"));

    let flushed = queue.take_for_flush(OfflineFlush::Replay);
    assert!(queue.is_empty());
    assert_eq!(
        kinds_and_cards(&flushed),
        vec![
            ("card-updated".to_owned(), "a".to_owned()),
            ("card-moved".to_owned(), "b".to_owned()),
            ("card-deleted".to_owned(), "c".to_owned()),
        ]
    );
}

#[test]
fn replay_collapses_only_adjacent_repeats() {
    let mut queue = OfflineQueue::new();
    queue.push(change("card-moved", "a"));
    queue.push(change("card-moved", "a"));
    queue.push(change("card-moved", "b"));
    queue.push(change("card-moved", "a"));

    let flushed = queue.take_for_flush(OfflineFlush::Replay);
    let cards: Vec<_> = flushed.iter().map(|c| c.payload["cardId"].clone()).collect();
    assert_eq!(cards, vec!["a", "b", "a"]);
}

// =============================================================================
// Peer convergence
// =============================================================================

/// Board B with L1=[a, b] and L2=[].
fn peer_board() -> EntityStore {
    let mut store = EntityStore::new();
    let mut board = Board::new("B", "Board");
    let mut l1 = List::new("L1", "Todo", 0);
    l1.cards = vec![Card::new("a", "A"), Card::new("b", "B")];
    board.lists = vec![l1, List::new("L2", "Done", 1)];
    store.apply(Patch::ReplaceBoard(board), Origin::Local);
    store
}

fn moved(source: &str, target: &str) -> (Patch, PendingChange) {
    let patch = Patch::MoveCard(CardMove {
        source_list_id: EntityId::from(source),
        target_list_id: EntityId::from(target),
        card_id: EntityId::from("a"),
        new_index: 0,
    });
    let payload = serde_json::json!({
        "boardId": "B",
        "sourceListId": source,
        "targetListId": target,
        "cardId": "a",
        "newIndex": 0,
    });
    (patch, PendingChange::new("card-moved", payload))
}

fn retitled(title: &str) -> (Patch, PendingChange) {
    let patch = Patch::UpdateCard {
        card_id: EntityId::from("a"),
        changes: CardChanges { title: Some(title.to_owned()), ..CardChanges::default() },
    };
    let payload = serde_json::json!({
        "boardId": "B",
        "listId": "L1",
        "card": { "id": "a", "title": title },
    });
    (patch, PendingChange::new("card-updated", payload))
}

/// Apply every change locally while queueing its broadcast, replay the queue
/// into a second store and return both.
fn sender_and_peer(changes: Vec<(Patch, PendingChange)>) -> (EntityStore, EntityStore) {
    let mut sender = peer_board();
    let mut queue = OfflineQueue::new();
    for (patch, pending) in changes {
        sender.apply(patch, Origin::Local);
        queue.push(pending);
    }

    let mut peer = peer_board();
    for pending in queue.take_for_flush(OfflineFlush::Replay) {
        let text = frames::encode_envelope(&pending.to_envelope());
        router::dispatch(&mut peer, &text).expect("replayed change routes");
    }
    (sender, peer)
}

fn placement(store: &EntityStore) -> Option<(String, String)> {
    store
        .card(&EntityId::from("a"))
        .map(|(list, card)| (list.id.to_string(), card.title.clone()))
}

#[test]
fn replayed_moves_back_and_forth_converge_on_peer() {
    let (sender, peer) = sender_and_peer(vec![moved("L1", "L2"), moved("L2", "L1"), moved("L1", "L2")]);
    assert_eq!(placement(&sender), Some(("L2".to_owned(), "A".to_owned())));
    assert_eq!(placement(&peer), placement(&sender));
}

#[test]
fn replayed_title_edits_converge_on_peer() {
    let (sender, peer) = sender_and_peer(vec![retitled("X"), retitled("Y"), retitled("X")]);
    assert_eq!(placement(&sender), Some(("L1".to_owned(), "X".to_owned())));
    assert_eq!(placement(&peer), placement(&sender));
}

#[test]
fn discard_empties_queue_without_returning_entries() {
    let mut queue = OfflineQueue::new();
    queue.push(change("card-moved", "a"));
    let flushed = queue.take_for_flush(OfflineFlush::Discard);
    assert!(flushed.is_empty());
    assert!(queue.is_empty());
}

#[test]
fn requeue_front_restores_order_ahead_of_newer_entries() {
    let mut queue = OfflineQueue::new();
    queue.push(change("card-moved", "new"));
    queue.requeue_front(vec![change("card-moved", "old1"), change("card-moved", "old2")]);
    let cards: Vec<_> = queue.iter().map(|c| c.payload["cardId"].clone()).collect();
    assert_eq!(cards, vec!["old1", "old2", "new"]);
}

#[test]
fn to_envelope_keeps_queue_time() {
    let pending = change("card-deleted", "a");
    let env = pending.to_envelope();
    assert_eq!(env.kind, "card-deleted");
    assert_eq!(env.timestamp, frames::format_timestamp(pending.queued_at));
}
