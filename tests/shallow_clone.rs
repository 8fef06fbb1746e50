use databag::bag::DataBag;
use databag::data_item::DataItem;
use databag::data_slice::DataSlice;
use databag::object_factories::{Creator, EntityCreator, ObjectCreator, create_entity_schema};
use databag::dtype::DType;

#[test]
fn top_level_items_get_new_ids() {
    let bag = DataBag::empty();
    let child = EntityCreator::from_attrs(&bag, &["v"], &[DataSlice::from_item(9i32).expect("9")]).expect("child");
    let parent = EntityCreator::from_attrs(
        &bag,
        &["child", "n"],
        &[child.clone(), DataSlice::from_item(1i64).expect("1")],
    )
    .expect("parent");

    let clone = parent.shallow_clone().expect("shallow clone");
    assert_ne!(clone.items(), parent.items());
    assert_eq!(clone.schema(), parent.schema());
    assert_eq!(clone.get_attr("n").expect("n").items(), vec![DataItem::Int64(1)]);

    let shared_child = clone.get_attr("child").expect("child");
    assert_eq!(shared_child.items(), child.items(), "attribute values are not cloned");
    let child_attrs = shared_child.get_attr("v").expect("v");
    assert_eq!(child_attrs.present_count(), 0, "the child's own triples are not copied");
}

#[test]
fn objects_get_their_own_implicit_schema() {
    let bag = DataBag::empty();
    let object = ObjectCreator::from_attrs(&bag, &["a"], &[DataSlice::from_item("x").expect("x")]).expect("object");
    let clone = object.shallow_clone().expect("shallow clone");

    assert!(clone.schema().is_dtype(DType::Object));
    assert_eq!(clone.get_attr("a").expect("a").items(), vec![DataItem::from("x")]);
    let original_schema = object.get_attr("__schema__").expect("schema").items();
    let cloned_schema = clone.get_attr("__schema__").expect("schema").items();
    assert_ne!(original_schema, cloned_schema);
    assert!(cloned_schema[0].is_implicit_schema());
    assert_eq!(clone.get_attr_names(false).expect("names"), vec!["a".to_string()]);
}

#[test]
fn schema_slices_copy_their_attributes() {
    let bag = DataBag::empty();
    let int32 = DataSlice::create_item(DataItem::DType(DType::Int32), DataItem::DType(DType::Schema), None)
        .expect("INT32");
    let schema = create_entity_schema(&bag, &["x"], &[int32]).expect("schema");
    let clone = schema.shallow_clone().expect("shallow clone");
    assert_ne!(clone.item(), schema.item());
    assert_eq!(clone.get_attr_names(false).expect("names"), vec!["x".to_string()]);
}

#[test]
fn missing_items_stay_missing() {
    let bag = DataBag::empty();
    let present = EntityCreator::from_attrs(&bag, &["x"], &[DataSlice::from_item(1i32).expect("1")]).expect("entity");
    let mask = DataSlice::from_items(vec![DataItem::Int32(1), DataItem::Missing]).expect("mask");
    let sparse = EntityCreator::like(&bag, &mask).expect("sparse");
    let clone = sparse.shallow_clone().expect("shallow clone");
    assert_eq!(clone.present_count(), 1);
    assert!(clone.items()[1].is_missing());
    assert!(present.shallow_clone().expect("clone").item().is_some_and(DataItem::has_value));
}
