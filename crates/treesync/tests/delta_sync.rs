//! Delta and full-frame synchronization between two mirrored trees.

use treesync::{
    FieldConfig, FieldValue, NodeId, PeerSlot, SyncError, SyncTree, TreeConfig, VersionVector,
};
use treesync_buffers::{Reader, Writer};

/// Builds a tree with three int fields under the root, mirroring the shape
/// on both ends of a connection.
fn three_int_tree() -> (SyncTree, [NodeId; 3]) {
    let mut tree = SyncTree::new(TreeConfig::default());
    tree.set_owner(tree.root(), "entity").unwrap();
    let root = tree.root();
    let a = tree.field(FieldValue::Int(0), FieldConfig::default());
    let b = tree.field(FieldValue::Int(0), FieldConfig::default());
    let c = tree.field(FieldValue::Int(0), FieldConfig::default());
    tree.add_field(root, a, "a").unwrap();
    tree.add_field(root, b, "b").unwrap();
    tree.add_field(root, c, "c").unwrap();
    (tree, [a, b, c])
}

/// What a session layer does before handing a frame to the tree: map the
/// sender's local counter onto the receiver's slot for that peer.
fn sync_clocks(sender: &SyncTree, receiver: &mut SyncTree, sender_slot: PeerSlot) {
    let mut remote = VersionVector::new();
    remote.set(sender_slot, sender.clock().local_tick());
    receiver.observe_clock(&remote);
}

fn transfer_delta(sender: &mut SyncTree, receiver: &mut SyncTree, sender_slot: PeerSlot) {
    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    let bytes = w.flush();
    sync_clocks(sender, receiver, sender_slot);
    receiver
        .read_delta(receiver.root(), &mut Reader::new(&bytes))
        .unwrap();
}

#[test]
fn dirty_subset_delta_changes_only_that_subset() {
    let (mut sender, [_, sb, _]) = three_int_tree();
    let (mut receiver, [ra, rb, rc]) = three_int_tree();
    let slot = receiver.add_peer();

    sender.step();
    sender.set_value(sb, FieldValue::Int(42)).unwrap();
    transfer_delta(&mut sender, &mut receiver, slot);

    assert_eq!(receiver.value(ra).unwrap(), &FieldValue::Int(0));
    assert_eq!(receiver.value(rb).unwrap(), &FieldValue::Int(42));
    assert_eq!(receiver.value(rc).unwrap(), &FieldValue::Int(0));
}

#[test]
fn middle_child_delta_frame_is_count_mask_payload() {
    let (mut sender, [_, sb, _]) = three_int_tree();
    sender.set_value(sb, FieldValue::Int(42)).unwrap();
    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    // count=3, mask=0b010, one 4-byte int payload.
    assert_eq!(w.flush(), [0x03, 0x02, 0x00, 0x00, 0x00, 0x2A]);
}

#[test]
fn delta_write_cleans_the_sender() {
    let (mut sender, [sa, ..]) = three_int_tree();
    sender.set_value(sa, FieldValue::Int(1)).unwrap();
    assert!(sender.is_dirty(sender.root()));
    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    assert!(!sender.is_dirty(sender.root()));
    assert!(!sender.is_dirty(sa));
    // Nothing dirty: the next frame is count + empty mask only.
    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    assert_eq!(w.flush(), [0x03, 0x00]);
}

#[test]
fn duplicate_frame_is_rejected_by_the_priority_gate() {
    let (mut sender, [sa, ..]) = three_int_tree();
    let (mut receiver, [ra, ..]) = three_int_tree();
    let slot = receiver.add_peer();

    sender.step();
    sender.set_value(sa, FieldValue::Int(5)).unwrap();
    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    let frame = w.flush();

    sync_clocks(&sender, &mut receiver, slot);
    receiver
        .read_delta(receiver.root(), &mut Reader::new(&frame))
        .unwrap();
    assert_eq!(receiver.value(ra).unwrap(), &FieldValue::Int(5));

    // Replay the identical frame: no new counters were observed, so the
    // derived stamp no longer dominates and the local value must stand.
    receiver.set_value(ra, FieldValue::Int(99)).unwrap();
    let mut replay = Reader::new(&frame);
    receiver.read_delta(receiver.root(), &mut replay).unwrap();
    assert_eq!(receiver.value(ra).unwrap(), &FieldValue::Int(99));
}

#[test]
fn stale_frame_cannot_overwrite_newer_state() {
    let (mut sender, [sa, ..]) = three_int_tree();
    let (mut receiver, [ra, ..]) = three_int_tree();
    let slot = receiver.add_peer();

    sender.step();
    sender.set_value(sa, FieldValue::Int(1)).unwrap();
    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    let old_frame = w.flush();

    sender.step();
    sender.set_value(sa, FieldValue::Int(2)).unwrap();
    transfer_delta(&mut sender, &mut receiver, slot);
    assert_eq!(receiver.value(ra).unwrap(), &FieldValue::Int(2));

    // The older frame arrives late; its stamp is dominated.
    let mut r = Reader::new(&old_frame);
    receiver.read_delta(receiver.root(), &mut r).unwrap();
    assert_eq!(receiver.value(ra).unwrap(), &FieldValue::Int(2));
}

#[test]
fn mismatched_variant_write_never_reaches_the_wire() {
    let (mut sender, [sa, sb, _]) = three_int_tree();
    let (mut receiver, [ra, rb, _]) = three_int_tree();
    let slot = receiver.add_peer();

    // The write is rejected outright: no value change, no dirty state.
    let err = sender
        .set_value(sa, FieldValue::Str("hi".into()))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidPayload { kind: "string" }));
    assert_eq!(sender.value(sa).unwrap(), &FieldValue::Int(0));
    assert!(!sender.is_dirty(sa));

    // The frames that follow stay well-formed int payloads.
    sender.step();
    sender.set_value(sb, FieldValue::Int(7)).unwrap();
    transfer_delta(&mut sender, &mut receiver, slot);
    assert_eq!(receiver.value(ra).unwrap(), &FieldValue::Int(0));
    assert_eq!(receiver.value(rb).unwrap(), &FieldValue::Int(7));
}

#[test]
fn full_round_trip_reproduces_the_whole_tree() {
    let (mut sender, [sa, sb, sc]) = three_int_tree();
    let (mut receiver, [ra, rb, rc]) = three_int_tree();

    sender.set_value(sa, FieldValue::Int(-1)).unwrap();
    sender.set_value(sb, FieldValue::Int(7)).unwrap();
    sender.set_value(sc, FieldValue::Int(100)).unwrap();

    let mut w = Writer::new();
    sender.write_full(sender.root(), &mut w).unwrap();
    let bytes = w.flush();
    receiver
        .read_full(receiver.root(), &mut Reader::new(&bytes))
        .unwrap();

    assert_eq!(receiver.value(ra).unwrap(), &FieldValue::Int(-1));
    assert_eq!(receiver.value(rb).unwrap(), &FieldValue::Int(7));
    assert_eq!(receiver.value(rc).unwrap(), &FieldValue::Int(100));
    // Full writes do not consume dirty state on the sender.
    assert!(sender.is_dirty(sender.root()));
}

#[test]
fn full_read_cancels_inflight_interpolation() {
    let mut receiver = SyncTree::new(TreeConfig::default());
    let root = receiver.root();
    let f = receiver.field(
        FieldValue::Float(0.0),
        FieldConfig {
            window: 10,
            ..FieldConfig::default()
        },
    );
    receiver.add_field(root, f, "pos").unwrap();
    let slot = receiver.add_peer();

    // A delta opens a long blend window...
    let mut remote = VersionVector::new();
    remote.set(slot, 1);
    receiver.observe_clock(&remote);
    let mut w = Writer::new();
    FieldValue::Float(10.0).encode(&mut w);
    let delta = {
        let mut frame = Writer::new();
        frame.vu57(1);
        frame.u8(0x01);
        frame.buf(&w.flush());
        frame.flush()
    };
    receiver.read_delta(root, &mut Reader::new(&delta)).unwrap();
    receiver.step();
    assert_ne!(receiver.value(f).unwrap(), &FieldValue::Float(10.0));

    // ...then a snapshot lands and the blend is gone.
    let mut w = Writer::new();
    FieldValue::Float(3.0).encode(&mut w);
    let bytes = w.flush();
    receiver.read_full(root, &mut Reader::new(&bytes)).unwrap();
    assert_eq!(receiver.value(f).unwrap(), &FieldValue::Float(3.0));
    assert!(!receiver.step());
}

#[test]
fn child_count_mismatch_is_fatal_and_annotated() {
    let mut sender = SyncTree::new(TreeConfig::default());
    let sub = sender.container();
    sender.set_owner(sub, "entity").unwrap();
    let f1 = sender.field(FieldValue::Int(0), FieldConfig::default());
    let f2 = sender.field(FieldValue::Int(0), FieldConfig::default());
    sender.add_field(sender.root(), sub, "sub").unwrap();
    sender.add_field(sub, f1, "f1").unwrap();
    sender.add_field(sub, f2, "f2").unwrap();

    // Receiver was built with only one field in the nested container.
    let mut receiver = SyncTree::new(TreeConfig::default());
    let rsub = receiver.container();
    receiver.set_owner(rsub, "entity").unwrap();
    let rf1 = receiver.field(FieldValue::Int(0), FieldConfig::default());
    receiver.add_field(receiver.root(), rsub, "sub").unwrap();
    receiver.add_field(rsub, rf1, "f1").unwrap();

    sender.set_value(f1, FieldValue::Int(1)).unwrap();
    let mut w = Writer::new();
    sender.write_delta(sender.root(), &mut w).unwrap();
    let bytes = w.flush();

    let err = receiver
        .read_delta(receiver.root(), &mut Reader::new(&bytes))
        .unwrap_err();
    match err {
        SyncError::Child { name, source } => {
            assert_eq!(name, "sub");
            assert!(matches!(
                *source,
                SyncError::ChildCountMismatch {
                    received: 2,
                    local: 1
                }
            ));
        }
        other => panic!("expected annotated child error, got {other}"),
    }
}

#[test]
fn truncated_frame_reports_buffer_error() {
    let (mut receiver, _) = three_int_tree();
    // count=3, mask says child 0 present, but the payload is missing.
    let bytes = [0x03, 0x01];
    let err = receiver
        .read_delta(receiver.root(), &mut Reader::new(&bytes))
        .unwrap_err();
    assert!(matches!(err, SyncError::Child { .. }));
}

#[test]
fn attaching_an_owned_field_fails_and_mutates_neither_tree() {
    let mut tree = SyncTree::new(TreeConfig::default());
    let c1 = tree.container();
    let c2 = tree.container();
    tree.set_owner(c1, "left").unwrap();
    tree.set_owner(c2, "right").unwrap();
    tree.add_field(tree.root(), c1, "left").unwrap();
    tree.add_field(tree.root(), c2, "right").unwrap();
    let f = tree.field(FieldValue::Bool(false), FieldConfig::default());
    tree.add_field(c1, f, "flag").unwrap();

    let err = tree.add_field(c2, f, "flag").unwrap_err();
    assert!(matches!(err, SyncError::AlreadyAttached { .. }));
    assert!(err.to_string().contains("already part of another tree"));
    // The field still answers through its original parent only.
    sanity_single_parent(&mut tree, c1, c2, f);
}

fn sanity_single_parent(tree: &mut SyncTree, c1: NodeId, c2: NodeId, f: NodeId) {
    tree.set_value(f, FieldValue::Bool(true)).unwrap();
    assert!(tree.is_dirty(c1));
    assert!(!tree.is_dirty(c2));
}

#[test]
fn copy_from_duplicates_values_and_marks_clean() {
    let (mut src, [sa, sb, sc]) = three_int_tree();
    let (mut dst, [da, db, dc]) = three_int_tree();
    src.set_value(sa, FieldValue::Int(1)).unwrap();
    src.set_value(sb, FieldValue::Int(2)).unwrap();
    src.set_value(sc, FieldValue::Int(3)).unwrap();

    dst.copy_from(dst.root(), &src, src.root()).unwrap();
    assert_eq!(dst.value(da).unwrap(), &FieldValue::Int(1));
    assert_eq!(dst.value(db).unwrap(), &FieldValue::Int(2));
    assert_eq!(dst.value(dc).unwrap(), &FieldValue::Int(3));
    assert!(!dst.is_dirty(dst.root()));
}

#[test]
fn validation_accepts_well_formed_links() {
    let config = TreeConfig {
        validate: true,
        ..TreeConfig::default()
    };
    let mut tree = SyncTree::new(config);
    let root = tree.root();
    tree.set_owner(root, "entity").unwrap();
    let f = tree.field(FieldValue::Int(0), FieldConfig::default());
    tree.add_field(root, f, "hp").unwrap();
    tree.validate_links(root).unwrap();
    // Serialization re-validates before writing.
    let mut w = Writer::new();
    tree.write_delta(root, &mut w).unwrap();
}
