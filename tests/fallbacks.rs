use std::sync::Arc;

use databag::bag::DataBag;
use databag::bag_impl::ListRange;
use databag::data_item::DataItem;
use databag::data_slice::DataSlice;
use databag::dtype::DType;
use databag::error::DataBagError;
use databag::object_factories::{Creator, EntityCreator, ObjectCreator, create_dict_shaped, create_list_shaped};
use databag::shape::JaggedShape;

fn int(value: i32) -> DataSlice {
    DataSlice::from_item(value).expect("int")
}

#[test]
fn enriched_prefers_the_own_bag_and_updated_the_new_ones() {
    let bag1 = DataBag::empty();
    let entity = EntityCreator::from_attrs(&bag1, &["x"], &[int(1)]).expect("entity");
    let bag2 = DataBag::empty();
    entity
        .with_bag(Some(bag2.clone()))
        .set_attr_with_update_schema("x", &int(2))
        .expect("x in bag2");

    let enriched = entity.enriched(&[bag2.clone()]);
    assert_eq!(enriched.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)]);
    let updated = entity.updated(&[bag2.clone()]);
    assert_eq!(updated.get_attr("x").expect("x").items(), vec![DataItem::Int32(2)]);

    let combined = enriched.bag().expect("bag");
    assert!(!combined.is_mutable(), "bags made from fallbacks are read only");
    assert_eq!(combined.fallbacks().len(), 2);
    assert!(Arc::ptr_eq(&combined.fallbacks()[0], &bag1));
}

#[test]
fn fallback_values_fill_gaps_only() {
    let base = DataBag::empty();
    let entity = EntityCreator::from_attrs(&base, &["x", "y"], &[int(1), int(2)]).expect("entity");
    let top = DataBag::empty_with_fallbacks(vec![base.clone()]);
    let layered = entity.with_bag(Some(top.clone()));
    layered.set_attr("x", &int(10)).expect("shadow x");

    assert_eq!(layered.get_attr("x").expect("x").items(), vec![DataItem::Int32(10)]);
    assert_eq!(layered.get_attr("y").expect("y").items(), vec![DataItem::Int32(2)]);
    assert_eq!(entity.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)], "the fallback is untouched");

    layered.del_attr("y").expect("delete y");
    assert_eq!(
        layered.get_attr("y").expect("y").items(),
        vec![DataItem::Int32(2)],
        "a removal in the main bag does not hide the fallback value"
    );
}

#[test]
fn frozen_bags_reject_writes() {
    let bag = DataBag::empty();
    let object = ObjectCreator::from_attrs(&bag, &["a"], &[int(1)]).expect("object");
    bag.freeze();
    assert!(!bag.is_mutable());
    let result = object.set_attr("a", &int(2));
    assert!(matches!(result, Err(DataBagError::Immutable)), "unexpected {:?}", result);
    assert!(ObjectCreator::from_attrs(&bag, &["a"], &[int(3)]).is_err());

    let enriched = object.enriched(&[]);
    assert!(matches!(enriched.set_attr("a", &int(2)), Err(DataBagError::Immutable)));
}

#[test]
fn freeze_bag_takes_a_snapshot() {
    let bag = DataBag::empty();
    let entity = EntityCreator::from_attrs(&bag, &["x"], &[int(1)]).expect("entity");
    let frozen = entity.freeze_bag().expect("freeze");
    entity.set_attr("x", &int(2)).expect("write to the original");

    assert_eq!(frozen.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)]);
    assert_eq!(entity.get_attr("x").expect("x").items(), vec![DataItem::Int32(2)]);
    assert!(!frozen.bag().expect("bag").is_mutable());
    assert!(bag.is_mutable(), "freezing a copy leaves the original writable");
}

#[test]
fn forks_are_independent() {
    let bag = DataBag::empty();
    let entity = EntityCreator::from_attrs(&bag, &["x"], &[int(1)]).expect("entity");
    let forked = entity.fork_bag().expect("fork");
    forked.set_attr("x", &int(5)).expect("write to the fork");
    entity.set_attr("x", &int(7)).expect("write to the original");

    assert_eq!(forked.get_attr("x").expect("x").items(), vec![DataItem::Int32(5)]);
    assert_eq!(entity.get_attr("x").expect("x").items(), vec![DataItem::Int32(7)]);
    assert_ne!(
        bag.fingerprint().expect("fingerprint"),
        forked.bag().expect("bag").fingerprint().expect("fingerprint")
    );
}

#[test]
fn fork_with_fallbacks_needs_a_merge_first() {
    let base = DataBag::empty();
    let entity = EntityCreator::from_attrs(&base, &["x"], &[int(1)]).expect("entity");
    let layered = entity.with_bag(Some(DataBag::empty_with_fallbacks(vec![base.clone()])));
    let result = layered.fork_bag();
    assert!(
        matches!(result, Err(DataBagError::FailedPrecondition(_))),
        "unexpected {:?}",
        result.map(|s| s.to_string())
    );

    let merged = layered.with_merged_bag().expect("merge");
    let merged_bag = merged.bag().expect("bag");
    assert!(!merged_bag.has_fallbacks() && merged_bag.is_mutable());
    assert_eq!(merged.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)]);

    let frozen = layered.freeze_bag().expect("freeze merges fallbacks");
    assert!(!frozen.bag().expect("bag").has_fallbacks());
    assert_eq!(frozen.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)]);
}

#[test]
fn lists_dicts_and_schemas_read_through_fallbacks() {
    let base = DataBag::empty();
    let values = DataSlice::from_items(vec![DataItem::Int32(1), DataItem::Int32(2)]).expect("values");
    let list = create_list_shaped(&base, JaggedShape::scalar(), Some(&values), None).expect("list");
    let keys = DataSlice::from_items(vec![DataItem::from("a"), DataItem::from("b")]).expect("keys");
    let dict = create_dict_shaped(&base, JaggedShape::scalar(), Some(&keys), Some(&values), None, None).expect("dict");
    let object = ObjectCreator::from_attrs(&base, &["items", "tags"], &[list, dict]).expect("object");
    let entity = EntityCreator::from_attrs(&base, &["x"], &[int(3)]).expect("entity");

    let top = DataBag::empty_with_fallbacks(vec![base.clone()]);
    let layered = object.with_bag(Some(top.clone()));
    let items = layered.get_attr("items").expect("items");
    assert_eq!(items.schema(), object.get_attr("items").expect("items").schema(), "implicit schema from the fallback");
    assert_eq!(
        items.explode_list(ListRange::all()).expect("explode").items(),
        vec![DataItem::Int32(1), DataItem::Int32(2)]
    );
    let tags = layered.get_attr("tags").expect("tags");
    assert_eq!(tags.get_dict_keys().expect("keys").items(), vec![DataItem::from("a"), DataItem::from("b")]);
    assert_eq!(
        tags.get_from_dict(&DataSlice::from_item("b").expect("b")).expect("b").items(),
        vec![DataItem::Int32(2)]
    );
    assert_eq!(
        entity.with_bag(Some(top.clone())).get_schema().get_attr("x").expect("x schema").items(),
        vec![DataItem::DType(DType::Int32)]
    );

    tags.set_in_dict(&DataSlice::from_item("c").expect("c"), &int(3)).expect("new key");
    assert_eq!(
        tags.get_dict_keys().expect("keys").items(),
        vec![DataItem::from("a"), DataItem::from("b"), DataItem::from("c")],
        "main bag keys join the fallback keys"
    );
    let base_tags = object.get_attr("tags").expect("tags");
    assert_eq!(base_tags.dict_size().expect("size").items(), vec![DataItem::Int64(2)], "the fallback is untouched");
}

#[test]
fn reads_do_not_change_after_a_freeze() {
    let bag = DataBag::empty();
    let values = DataSlice::from_items(vec![DataItem::Int32(1), DataItem::Int32(2)]).expect("values");
    let list = create_list_shaped(&bag, JaggedShape::scalar(), Some(&values), None).expect("list");
    let object = ObjectCreator::from_attrs(&bag, &["a", "items"], &[int(1), list]).expect("object");
    let read = || {
        (
            object.get_attr("a").expect("a").items(),
            object
                .get_attr("items")
                .expect("items")
                .explode_list(ListRange::all())
                .expect("explode")
                .items(),
            bag.fingerprint().expect("fingerprint"),
        )
    };
    let before = read();
    bag.freeze();

    let _ = object.set_attr("a", &int(2));
    let _ = object.set_attr("b", &int(2));
    let _ = object.get_attr("items").expect("items").append_to_list(&int(3));
    let _ = object.get_attr("items").expect("items").clear_list();
    let _ = object.del_attr("a");
    assert_eq!(read(), before);
}
