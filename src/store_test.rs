use super::*;

fn id(raw: &str) -> EntityId {
    EntityId::from(raw)
}

fn list_with(list_id: &str, cards: &[&str]) -> List {
    let mut list = List::new(list_id, list_id, 0);
    list.cards = cards.iter().map(|c| Card::new(*c, c.to_uppercase())).collect();
    list
}

/// Board B with L1=[a, b, c] and L2=[].
fn store_with_board() -> EntityStore {
    let mut store = EntityStore::new();
    let mut board = Board::new("B", "Board");
    board.lists = vec![list_with("L1", &["a", "b", "c"]), list_with("L2", &[])];
    store.apply(Patch::ReplaceBoard(board), Origin::Local);
    store
}

fn card_ids(store: &EntityStore, list_id: &str) -> Vec<String> {
    store
        .list(&id(list_id))
        .expect("list exists")
        .cards
        .iter()
        .map(|c| c.id.to_string())
        .collect()
}

fn mv(source: &str, target: &str, card: &str, new_index: usize) -> Patch {
    Patch::MoveCard(CardMove {
        source_list_id: id(source),
        target_list_id: id(target),
        card_id: id(card),
        new_index,
    })
}

// =============================================================
// move-card
// =============================================================

#[test]
fn move_card_between_lists_inserts_at_index() {
    let mut store = store_with_board();
    let applied = store.apply(mv("L1", "L2", "a", 0), Origin::Local);
    assert!(applied.changed());
    assert_eq!(card_ids(&store, "L1"), vec!["b", "c"]);
    assert_eq!(card_ids(&store, "L2"), vec!["a"]);
}

#[test]
fn move_card_clamps_index_to_target_length() {
    let mut store = store_with_board();
    store.apply(mv("L1", "L2", "a", 0), Origin::Local);
    store.apply(mv("L1", "L2", "b", 99), Origin::Local);
    assert_eq!(card_ids(&store, "L2"), vec!["a", "b"]);
}

#[test]
fn move_card_within_same_list_is_a_reorder() {
    let mut store = store_with_board();
    store.apply(mv("L1", "L1", "a", 2), Origin::Local);
    assert_eq!(card_ids(&store, "L1"), vec!["b", "c", "a"]);

    store.apply(mv("L1", "L1", "a", 50), Origin::Local);
    assert_eq!(card_ids(&store, "L1"), vec!["b", "c", "a"]);

    store.apply(mv("L1", "L1", "c", 0), Origin::Local);
    assert_eq!(card_ids(&store, "L1"), vec!["c", "b", "a"]);
}

#[test]
fn move_card_missing_from_source_is_a_noop() {
    let mut store = store_with_board();
    let before = store.revision();
    let applied = store.apply(mv("L2", "L1", "a", 0), Origin::Remote);
    assert_eq!(applied, Applied::Unchanged(Noop::UnknownCard));
    assert_eq!(card_ids(&store, "L1"), vec!["a", "b", "c"]);
    assert_eq!(store.revision(), before);
}

#[test]
fn move_card_to_unknown_list_keeps_card_in_place() {
    let mut store = store_with_board();
    let applied = store.apply(mv("L1", "nope", "a", 0), Origin::Remote);
    assert_eq!(applied, Applied::Unchanged(Noop::UnknownList));
    assert_eq!(card_ids(&store, "L1"), vec!["a", "b", "c"]);
}

// =============================================================
// upsert idempotence
// =============================================================

#[test]
fn upsert_card_twice_matches_applying_once() {
    let mut once = store_with_board();
    let patch = Patch::UpsertCard { list_id: id("L2"), card: Card::new("n", "New") };
    once.apply(patch.clone(), Origin::Remote);

    let mut twice = once.clone();
    let second = twice.apply(patch, Origin::Local);

    assert_eq!(second, Applied::Unchanged(Noop::Duplicate));
    assert_eq!(twice.current_board(), once.current_board());
    assert_eq!(twice.revision(), once.revision());
}

#[test]
fn upsert_card_rejects_id_already_in_another_list() {
    let mut store = store_with_board();
    let applied = store.apply(Patch::UpsertCard { list_id: id("L2"), card: Card::new("a", "dup") }, Origin::Remote);
    assert_eq!(applied, Applied::Unchanged(Noop::Duplicate));
    assert!(card_ids(&store, "L2").is_empty());
}

#[test]
fn upsert_card_into_unknown_list_is_ignored() {
    let mut store = store_with_board();
    let applied = store.apply(Patch::UpsertCard { list_id: id("L9"), card: Card::new("n", "New") }, Origin::Remote);
    assert_eq!(applied, Applied::Unchanged(Noop::UnknownList));
}

#[test]
fn upsert_list_twice_matches_applying_once() {
    let mut once = store_with_board();
    once.apply(Patch::UpsertList(List::new("L3", "Later", 2)), Origin::Remote);
    let mut twice = once.clone();
    let second = twice.apply(Patch::UpsertList(List::new("L3", "Later", 2)), Origin::Remote);
    assert_eq!(second, Applied::Unchanged(Noop::Duplicate));
    assert_eq!(twice.current_board(), once.current_board());
}

#[test]
fn upsert_list_drops_cards_that_already_live_elsewhere() {
    let mut store = store_with_board();
    store.apply(Patch::UpsertList(list_with("L3", &["a", "x", "x"])), Origin::Remote);
    assert_eq!(card_ids(&store, "L3"), vec!["x"]);
    assert_eq!(card_ids(&store, "L1"), vec!["a", "b", "c"]);
}

// =============================================================
// removal
// =============================================================

#[test]
fn removing_absent_list_or_card_is_a_noop() {
    let mut store = store_with_board();
    let snapshot = store.current_board().cloned();
    assert_eq!(store.apply(Patch::RemoveList { list_id: id("zz") }, Origin::Remote), Applied::Unchanged(Noop::UnknownList));
    assert_eq!(store.apply(Patch::RemoveCard { card_id: id("zz") }, Origin::Remote), Applied::Unchanged(Noop::UnknownCard));
    assert_eq!(store.current_board().cloned(), snapshot);
}

#[test]
fn remove_card_and_list() {
    let mut store = store_with_board();
    assert!(store.apply(Patch::RemoveCard { card_id: id("b") }, Origin::Remote).changed());
    assert_eq!(card_ids(&store, "L1"), vec!["a", "c"]);
    assert!(store.apply(Patch::RemoveList { list_id: id("L2") }, Origin::Remote).changed());
    assert!(store.list(&id("L2")).is_none());
}

#[test]
fn mutations_without_open_board_are_ignored() {
    let mut store = EntityStore::new();
    let applied = store.apply(Patch::UpsertList(List::new("L1", "Todo", 0)), Origin::Remote);
    assert_eq!(applied, Applied::Unchanged(Noop::NoBoard));
    assert_eq!(store.apply(Patch::CloseBoard, Origin::Local), Applied::Unchanged(Noop::NoBoard));
}

// =============================================================
// updates and revisions
// =============================================================

#[test]
fn update_card_merges_only_given_fields() {
    let mut store = store_with_board();
    store.apply(
        Patch::UpdateCard {
            card_id: id("a"),
            changes: CardChanges { description: Some("details".into()), ..CardChanges::default() },
        },
        Origin::Local,
    );
    let (list, card) = store.card(&id("a")).expect("card present");
    assert_eq!(list.id, id("L1"));
    assert_eq!(card.title, "A");
    assert_eq!(card.description, "details");
}

#[test]
fn later_patch_wins_and_carries_higher_revision() {
    let mut store = store_with_board();
    let first = store.apply(
        Patch::UpdateCard {
            card_id: id("a"),
            changes: CardChanges { title: Some("local".into()), ..CardChanges::default() },
        },
        Origin::Local,
    );
    let second = store.apply(
        Patch::UpdateCard {
            card_id: id("a"),
            changes: CardChanges { title: Some("remote".into()), ..CardChanges::default() },
        },
        Origin::Remote,
    );
    let (Applied::Changed { revision: r1 }, Applied::Changed { revision: r2 }) = (first, second) else {
        panic!("both patches should apply");
    };
    assert!(r2 > r1);
    let (_, card) = store.card(&id("a")).expect("card present");
    assert_eq!(card.title, "remote");
    assert_eq!(card.rev, r2);
}

#[test]
fn update_board_touches_catalogue_and_open_board() {
    let mut store = EntityStore::new();
    store.apply(
        Patch::SetCatalogue(vec![BoardSummary { id: id("B"), name: "Old".into(), description: String::new() }]),
        Origin::Local,
    );
    store.apply(Patch::ReplaceBoard(Board::new("B", "Old")), Origin::Local);
    store.apply(
        Patch::UpdateBoard {
            board_id: id("B"),
            changes: BoardChanges { name: Some("New".into()), description: None },
        },
        Origin::Remote,
    );
    assert_eq!(store.catalogue()[0].name, "New");
    assert_eq!(store.current_board().map(|b| b.name.as_str()), Some("New"));

    let unknown = store.apply(
        Patch::UpdateBoard { board_id: id("X"), changes: BoardChanges::default() },
        Origin::Remote,
    );
    assert_eq!(unknown, Applied::Unchanged(Noop::UnknownBoard));
}

#[test]
fn add_and_remove_board_maintain_catalogue() {
    let mut store = EntityStore::new();
    store.apply(Patch::AddBoard(Board::new("B1", "One")), Origin::Local);
    store.apply(Patch::AddBoard(Board::new("B2", "Two")), Origin::Local);
    assert_eq!(store.catalogue().len(), 2);
    assert_eq!(store.current_board_id(), Some(&id("B2")));

    store.apply(Patch::RemoveBoard { board_id: id("B2") }, Origin::Local);
    assert_eq!(store.catalogue().len(), 1);
    assert!(store.current_board().is_none());
    assert_eq!(
        store.apply(Patch::RemoveBoard { board_id: id("B2") }, Origin::Local),
        Applied::Unchanged(Noop::UnknownBoard)
    );
}
