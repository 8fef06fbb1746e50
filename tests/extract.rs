use databag::bag::DataBag;
use databag::data_item::DataItem;
use databag::data_slice::DataSlice;
use databag::dtype::DType;
use databag::error::DataBagError;
use databag::object_factories::{Creator, EntityCreator, get_nofollowed_schema, nofollow};
use databag::shape::JaggedShape;

#[test]
fn only_reachable_triples_are_kept() {
    let bag = DataBag::empty();
    let kept = EntityCreator::from_attrs(&bag, &["x"], &[DataSlice::from_item(1i32).expect("1")]).expect("kept");
    let dropped = EntityCreator::from_attrs(&bag, &["y"], &[DataSlice::from_item(2i32).expect("2")]).expect("dropped");

    let extracted = kept.extract().expect("extract");
    assert_eq!(extracted.items(), kept.items(), "extraction keeps the ids");
    assert_eq!(extracted.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)]);

    let stats = extracted.bag().expect("bag").statistics().expect("statistics");
    assert_eq!(stats.entity_and_object_count, 1);
    assert_eq!(stats.attr_values_sizes.get("y"), None, "{:?}", stats.attr_values_sizes);

    let orphan = dropped.with_bag(extracted.bag().cloned());
    assert!(orphan.get_attr("y").is_err(), "the other entity's schema was not extracted");
}

#[test]
fn fallbacks_are_flattened() {
    let base = DataBag::empty();
    let entity = EntityCreator::from_attrs(&base, &["x"], &[DataSlice::from_item(1i32).expect("1")]).expect("entity");
    let layered = DataBag::empty_with_fallbacks(vec![base.clone()]);
    let on_top = entity.with_bag(Some(layered));
    on_top
        .set_attr_with_update_schema("y", &DataSlice::from_item("hello").expect("text"))
        .expect("y");

    let extracted = on_top.extract().expect("extract");
    let extracted_bag = extracted.bag().expect("bag");
    assert!(!extracted_bag.has_fallbacks());
    assert_eq!(extracted.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)]);
    assert_eq!(extracted.get_attr("y").expect("y").items(), vec![DataItem::from("hello")]);
    assert!(entity.get_attr_names(false).expect("names").iter().all(|name| name != "y"));
}

#[test]
fn nofollow_children_are_not_followed() {
    let bag = DataBag::empty();
    let child = EntityCreator::from_attrs(&bag, &["v"], &[DataSlice::from_item(5i32).expect("5")]).expect("child");
    let parent = EntityCreator::from_attrs(&bag, &["child"], &[nofollow(&child).expect("nofollow")]).expect("parent");

    let extracted = parent.extract().expect("extract");
    let reference = extracted.get_attr("child").expect("child");
    assert_eq!(reference.items(), child.items(), "the reference itself is kept");
    let followed = get_nofollowed_schema(&reference.get_schema()).expect("followed schema");
    assert_eq!(followed.item(), Some(child.schema()));

    let stats = extracted.bag().expect("bag").statistics().expect("statistics");
    assert_eq!(stats.attr_values_sizes.get("v"), None, "child attributes stay behind");
}

#[test]
fn any_schema_is_rejected() {
    let bag = DataBag::empty();
    let entities = EntityCreator::shaped(&bag, JaggedShape::flat(3)).expect("entities");
    let result = entities.with_schema(DataItem::DType(DType::Any)).expect("as ANY").extract();
    match result {
        Err(DataBagError::InvalidArgument(message)) => {
            assert!(message.contains("extract does not support"), "unexpected message {message}")
        }
        other => panic!("expected InvalidArgument, got {:?}", other.map(|s| s.to_string())),
    }
}

#[test]
fn primitives_need_no_bag() {
    let plain = DataSlice::from_items(vec![DataItem::Int32(1), DataItem::Missing]).expect("plain");
    let extracted = plain.extract().expect("extract");
    assert!(extracted.bag().is_none());
    assert_eq!(extracted.items(), plain.items());
}

#[test]
fn enrichment_is_visible_but_not_extracted() {
    let bag_a = DataBag::empty();
    let a = EntityCreator::from_attrs(&bag_a, &["x"], &[DataSlice::from_item(1i32).expect("1")]).expect("a");
    let bag_b = DataBag::empty();
    let b = EntityCreator::from_attrs(&bag_b, &["z"], &[DataSlice::from_item(5i32).expect("5")]).expect("b");

    let enriched = a.enriched(&[bag_b.clone()]);
    let b_through_a = b.with_bag(enriched.bag().cloned());
    assert_eq!(b_through_a.get_attr("z").expect("z").items(), vec![DataItem::Int32(5)]);

    let extracted = enriched.extract().expect("extract");
    assert_eq!(extracted.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)]);
    let stats = extracted.bag().expect("bag").statistics().expect("statistics");
    assert_eq!(stats.attr_values_sizes.get("z"), None, "{:?}", stats.attr_values_sizes);
    assert!(b.with_bag(extracted.bag().cloned()).get_attr("z").is_err());
    assert_eq!(enriched.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)]);
}
