use databag::data_item::DataItem;
use databag::object_id::{
    IdKind, ObjectId, allocate, allocate_dicts, allocate_explicit_schema, allocate_lists, allocate_single_object,
    create_implicit_schema, create_uuid_from_fields, nofollow_schema, nofollow_target,
};

#[test]
fn allocations_hand_out_offsets_of_one_kind() {
    let alloc = allocate(5);
    assert_eq!(alloc.capacity(), 8, "capacity is rounded up to a power of two");
    let third = alloc.object_by_offset(3);
    assert_eq!(third.offset(), 3);
    assert_eq!(third.allocation(), alloc);
    assert!(alloc.contains(third));
    assert!(third.is_entity());
    assert!(!allocate(5).contains(third), "a new allocation must not contain old ids");

    let list = allocate_lists(2).object_by_offset(1);
    assert!(list.is_list() && !list.is_dict() && !list.is_entity());
    let dict = allocate_dicts(2).object_by_offset(0);
    assert!(dict.is_dict() && !dict.is_list());
    let schema = allocate_explicit_schema();
    assert!(schema.is_schema() && schema.is_explicit_schema() && !schema.is_implicit_schema());
}

#[test]
fn object_ids_round_trip_through_text() {
    let id = allocate(3).object_by_offset(2);
    let text = id.to_string();
    assert!(text.starts_with('$'), "unexpected format {text}");
    let parsed: ObjectId = text.parse().expect("parse id");
    assert_eq!(parsed, id);
    assert!("not an id".parse::<ObjectId>().is_err());
    assert!("$zz:1".parse::<ObjectId>().is_err());
}

#[test]
fn uuids_depend_on_content_only() {
    let a = create_uuid_from_fields(
        IdKind::Entity,
        "seed",
        &["a", "b"],
        &[DataItem::Int32(1), DataItem::from("x")],
    );
    let swapped = create_uuid_from_fields(
        IdKind::Entity,
        "seed",
        &["b", "a"],
        &[DataItem::from("x"), DataItem::Int32(1)],
    );
    assert_eq!(a, swapped, "field order must not matter");
    assert!(a.is_uuid());
    let other_seed = create_uuid_from_fields(
        IdKind::Entity,
        "other",
        &["a", "b"],
        &[DataItem::Int32(1), DataItem::from("x")],
    );
    assert_ne!(a, other_seed);
    let other_type = create_uuid_from_fields(
        IdKind::Entity,
        "seed",
        &["a", "b"],
        &[DataItem::Int64(1), DataItem::from("x")],
    );
    assert_ne!(a, other_type, "INT32 1 and INT64 1 are different fields");
}

#[test]
fn implicit_schemas_follow_their_object() {
    let object = allocate_single_object();
    let schema = create_implicit_schema(object);
    assert!(schema.is_schema() && schema.is_implicit_schema());
    assert_eq!(schema, create_implicit_schema(object));
    assert_ne!(schema, create_implicit_schema(allocate_single_object()));
}

#[test]
fn nofollow_wraps_schemas_once() {
    let schema = allocate_explicit_schema();
    let wrapped = nofollow_schema(schema).expect("nofollow");
    assert!(wrapped.is_nofollow_schema() && wrapped.is_schema());
    assert_eq!(nofollow_target(wrapped).expect("target"), schema);
    assert!(nofollow_schema(wrapped).is_err(), "nofollow twice must fail");
    assert!(nofollow_schema(allocate_single_object()).is_err());
    assert!(nofollow_target(schema).is_err());
}

#[test]
fn new_like_keeps_kind_and_capacity() {
    let lists = allocate_lists(4);
    let copy = lists.new_like();
    assert_ne!(copy, lists);
    assert!(copy.is_lists_alloc());
    assert_eq!(copy.capacity(), lists.capacity());

    let uuid = create_uuid_from_fields(IdKind::Entity, "s", &[], &[]);
    assert!(!uuid.allocation().new_like().is_uuid(), "clones of uuids are regular ids");
}
