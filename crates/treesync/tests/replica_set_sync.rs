//! End-to-end replication of sets and GUID-keyed collections through the
//! tree's delta and full frames.

use std::cell::RefCell;
use std::rc::Rc;

use treesync::{FieldValue, NodeId, SetValue, SyncEvent, SyncTree, TreeConfig};
use treesync_buffers::{Reader, Writer};

fn set_tree(window: u32) -> (SyncTree, NodeId) {
    let mut tree = SyncTree::new(TreeConfig::default());
    tree.set_owner(tree.root(), "entity").unwrap();
    let set = tree.replica_set(window);
    tree.add_field(tree.root(), set, "tags").unwrap();
    (tree, set)
}

fn collection_tree() -> (SyncTree, NodeId) {
    let mut tree = SyncTree::new(TreeConfig::default());
    tree.set_owner(tree.root(), "entity").unwrap();
    let coll = tree.collection();
    tree.add_field(tree.root(), coll, "inventory").unwrap();
    (tree, coll)
}

fn transfer_delta(sender: &mut SyncTree, receiver: &mut SyncTree) {
    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    let bytes = w.flush();
    receiver
        .read_delta(receiver.root(), &mut Reader::new(&bytes))
        .unwrap();
}

#[test]
fn set_membership_converges_without_delay() {
    let (mut sender, s_set) = set_tree(0);
    let (mut receiver, r_set) = set_tree(0);

    sender.set_insert(s_set, "alpha".into()).unwrap();
    sender.set_insert(s_set, "beta".into()).unwrap();
    transfer_delta(&mut sender, &mut receiver);
    receiver.step();

    assert!(receiver.set_contains(r_set, &"alpha".into()).unwrap());
    assert!(receiver.set_contains(r_set, &"beta".into()).unwrap());
    assert_eq!(receiver.set_len(r_set).unwrap(), 2);
}

#[test]
fn flush_clears_the_outgoing_queue() {
    let (mut sender, s_set) = set_tree(0);
    sender.set_insert(s_set, "x".into()).unwrap();

    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    // count=1, mask bit set, one change: insert Str "x".
    assert_eq!(w.flush(), [0x01, 0x01, 0x01, 0x00, 0x02, 0x01, b'x']);
    assert!(!sender.is_dirty(s_set));

    // Nothing pending: the next frame is an empty mask.
    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    assert_eq!(w.flush(), [0x01, 0x00]);
}

#[test]
fn delayed_set_applies_only_after_its_window() {
    let (mut sender, s_set) = set_tree(0);
    let (mut receiver, r_set) = set_tree(3);

    sender.set_insert(s_set, SetValue::Int(7)).unwrap();
    transfer_delta(&mut sender, &mut receiver);

    // Not yet: the change is queued with a due tick three ahead.
    receiver.step();
    receiver.step();
    assert!(!receiver.set_contains(r_set, &SetValue::Int(7)).unwrap());

    receiver.step();
    assert!(receiver.set_contains(r_set, &SetValue::Int(7)).unwrap());
}

#[test]
fn set_events_fire_exactly_once_per_membership_change() {
    let (mut sender, s_set) = set_tree(0);
    let (mut receiver, _) = set_tree(2);

    let local = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&local);
    sender.observe(move |event| {
        if matches!(event, SyncEvent::SetAdded { .. }) {
            *sink.borrow_mut() += 1;
        }
    });
    let remote = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&remote);
    receiver.observe(move |event| {
        if matches!(event, SyncEvent::SetAdded { .. }) {
            *sink.borrow_mut() += 1;
        }
    });

    sender.set_insert(s_set, "once".into()).unwrap();
    // Duplicate insert changes nothing and fires nothing.
    sender.set_insert(s_set, "once".into()).unwrap();
    assert_eq!(*local.borrow(), 1);

    transfer_delta(&mut sender, &mut receiver);
    for _ in 0..4 {
        receiver.step();
    }
    assert_eq!(*remote.borrow(), 1);
}

#[test]
fn removal_propagates_through_a_delta() {
    let (mut sender, s_set) = set_tree(0);
    let (mut receiver, r_set) = set_tree(0);

    sender.set_insert(s_set, "gone".into()).unwrap();
    transfer_delta(&mut sender, &mut receiver);
    receiver.step();
    assert!(receiver.set_contains(r_set, &"gone".into()).unwrap());

    sender.set_remove(s_set, &"gone".into()).unwrap();
    transfer_delta(&mut sender, &mut receiver);
    receiver.step();
    assert!(!receiver.set_contains(r_set, &"gone".into()).unwrap());
    assert_eq!(receiver.set_len(r_set).unwrap(), 0);
}

#[test]
fn set_full_frame_recreates_membership_without_delay() {
    let (mut sender, s_set) = set_tree(0);
    let (mut receiver, r_set) = set_tree(5);

    sender.set_insert(s_set, SetValue::Int(1)).unwrap();
    sender.set_insert(s_set, SetValue::Enum(2)).unwrap();
    receiver.set_insert(r_set, SetValue::Int(99)).unwrap();

    let mut w = Writer::new();
    sender.write_full(sender.root(), &mut w).unwrap();
    let bytes = w.flush();
    receiver
        .read_full(receiver.root(), &mut Reader::new(&bytes))
        .unwrap();

    // No ticking required: full frames apply immediately and replace
    // whatever membership the receiver had.
    assert_eq!(receiver.set_len(r_set).unwrap(), 2);
    assert!(receiver.set_contains(r_set, &SetValue::Int(1)).unwrap());
    assert!(!receiver.set_contains(r_set, &SetValue::Int(99)).unwrap());
}

#[test]
fn collection_entries_share_guids_across_peers() {
    let (mut sender, s_coll) = collection_tree();
    let (mut receiver, r_coll) = collection_tree();

    let apple = sender.collection_add(s_coll, FieldValue::Str("apple".into())).unwrap();
    let count = sender.collection_add(s_coll, FieldValue::Int(3)).unwrap();
    transfer_delta(&mut sender, &mut receiver);

    assert_eq!(receiver.collection_len(r_coll).unwrap(), 2);
    assert_eq!(
        receiver.collection_get(r_coll, apple).unwrap(),
        Some(&FieldValue::Str("apple".into()))
    );
    assert_eq!(
        receiver.collection_get(r_coll, count).unwrap(),
        Some(&FieldValue::Int(3))
    );
}

#[test]
fn collection_update_and_remove_replay_in_order() {
    let (mut sender, s_coll) = collection_tree();
    let (mut receiver, r_coll) = collection_tree();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    receiver.observe(move |event| {
        let tag = match event {
            SyncEvent::ItemAdded { .. } => "added",
            SyncEvent::ItemUpdated { .. } => "updated",
            SyncEvent::ItemRemoved { .. } => "removed",
            _ => return,
        };
        sink.borrow_mut().push(tag);
    });

    let g = sender.collection_add(s_coll, FieldValue::Int(1)).unwrap();
    let doomed = sender.collection_add(s_coll, FieldValue::Int(2)).unwrap();
    sender.collection_update(s_coll, g, FieldValue::Int(10)).unwrap();
    sender.collection_remove(s_coll, &FieldValue::Int(2)).unwrap();
    transfer_delta(&mut sender, &mut receiver);

    assert_eq!(
        seen.borrow().as_slice(),
        &["added", "added", "updated", "removed"]
    );
    assert_eq!(receiver.collection_values(r_coll).unwrap(), &[FieldValue::Int(10)]);
    assert_eq!(receiver.collection_get(r_coll, doomed).unwrap(), None);
}

#[test]
fn collection_full_frame_seeds_a_late_joiner() {
    let (mut sender, s_coll) = collection_tree();
    let (mut joiner, j_coll) = collection_tree();

    sender.collection_add(s_coll, FieldValue::Bool(true)).unwrap();
    sender.collection_add(s_coll, FieldValue::Vec2 { x: 1.0, y: 2.0 }).unwrap();
    joiner.collection_add(j_coll, FieldValue::Int(99)).unwrap();

    let mut w = Writer::new();
    sender.write_full(sender.root(), &mut w).unwrap();
    let bytes = w.flush();
    joiner
        .read_full(joiner.root(), &mut Reader::new(&bytes))
        .unwrap();

    assert_eq!(joiner.collection_len(j_coll).unwrap(), 2);
    assert_eq!(
        joiner.collection_values(j_coll).unwrap()[0],
        FieldValue::Bool(true)
    );
}

#[test]
fn remove_where_replicates_every_removal() {
    let (mut sender, s_coll) = collection_tree();
    let (mut receiver, r_coll) = collection_tree();

    for i in 0..5 {
        sender.collection_add(s_coll, FieldValue::Int(i)).unwrap();
    }
    transfer_delta(&mut sender, &mut receiver);
    assert_eq!(receiver.collection_len(r_coll).unwrap(), 5);

    let removed = sender
        .collection_remove_where(s_coll, |v| matches!(v, FieldValue::Int(i) if i % 2 == 0))
        .unwrap();
    assert_eq!(removed, 3);
    transfer_delta(&mut sender, &mut receiver);
    assert_eq!(
        receiver.collection_values(r_coll).unwrap(),
        &[FieldValue::Int(1), FieldValue::Int(3)]
    );
}
