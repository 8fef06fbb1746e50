use databag::bag::DataBag;
use databag::data_item::DataItem;
use databag::data_slice::DataSlice;
use databag::dtype::DType;
use databag::error::DataBagError;
use databag::object_factories::{Creator, EntityCreator, ObjectCreator, create_entity_schema};
use databag::shape::{Edge, JaggedShape};

fn int(value: i32) -> DataSlice {
    DataSlice::from_item(value).expect("int")
}

fn schema(dtype: DType) -> DataSlice {
    DataSlice::create_item(DataItem::DType(dtype), DataItem::DType(DType::Schema), None).expect("schema")
}

#[test]
fn explicit_schemas_must_declare_attributes() {
    let bag = DataBag::empty();
    let entity = EntityCreator::from_attrs(&bag, &["x"], &[int(1)]).expect("entity");
    match entity.set_attr("y", &int(2)) {
        Err(DataBagError::InvalidArgument(message)) => {
            assert_eq!(message, "The attribute 'y' is missing on the schema.")
        }
        other => panic!("expected InvalidArgument, got {:?}", other),
    }
    assert!(entity.get_attr("y").is_err());

    entity.set_attr_with_update_schema("y", &int(2)).expect("update schema");
    assert_eq!(entity.get_attr("y").expect("y").items(), vec![DataItem::Int32(2)]);
    assert_eq!(entity.get_attr_names(false).expect("names"), vec!["x".to_string(), "y".to_string()]);
}

#[test]
fn values_are_cast_to_the_declared_schema() {
    let bag = DataBag::empty();
    let schema = create_entity_schema(&bag, &["n", "s"], &[schema(DType::Int64), schema(DType::Text)]).expect("schema");
    let entity = EntityCreator::from_attrs_with_schema(&bag, &[], &[], &schema, false).expect("entity");

    entity.set_attr("n", &int(3)).expect("INT32 widens");
    let n = entity.get_attr("n").expect("n");
    assert!(n.schema().is_dtype(DType::Int64));
    assert_eq!(n.items(), vec![DataItem::Int64(3)]);

    match entity.set_attr("s", &int(3)) {
        Err(DataBagError::InvalidArgument(message)) => {
            assert!(message.starts_with("The schema for attribute 's' is incompatible."), "{message}")
        }
        other => panic!("expected InvalidArgument, got {:?}", other),
    }
}

#[test]
fn values_broadcast_over_the_items() {
    let bag = DataBag::empty();
    let entities = EntityCreator::shaped(&bag, JaggedShape::flat(3)).expect("entities");
    entities.set_attr_with_update_schema("v", &int(7)).expect("broadcast");
    assert_eq!(entities.get_attr("v").expect("v").items(), vec![DataItem::Int32(7); 3]);

    let too_deep = DataSlice::from_items(vec![DataItem::Int32(1); 3])
        .expect("flat")
        .reshape(JaggedShape::from_edges(vec![Edge::from_sizes(&[1]), Edge::from_sizes(&[3])]).expect("shape"))
        .expect("rank 2");
    let single = EntityCreator::shaped(&bag, JaggedShape::scalar()).expect("single");
    let result = single.set_attr_with_update_schema("v", &too_deep);
    assert!(matches!(result, Err(DataBagError::InvalidArgument(message)) if message.contains("list factory")));
}

#[test]
fn objects_follow_their_values() {
    let bag = DataBag::empty();
    let object = ObjectCreator::from_attrs(&bag, &["a"], &[int(1)]).expect("object");
    object.set_attr("a", &DataSlice::from_item("now text").expect("text")).expect("implicit schemas follow");
    let a = object.get_attr("a").expect("a");
    assert!(a.schema().is_dtype(DType::Text));
    object.set_attr("b", &int(2)).expect("new attribute");
    assert_eq!(object.get_attr_names(true).expect("names"), vec!["a".to_string(), "b".to_string()]);

    object.del_attr("a").expect("delete");
    assert_eq!(object.get_attr_names(false).expect("names"), vec!["b".to_string()]);
    assert!(object.get_attr("a").is_err());
    assert!(object.del_attr("missing").is_err());
}

#[test]
fn deleting_keeps_explicit_schemas() {
    let bag = DataBag::empty();
    let entity = EntityCreator::from_attrs(&bag, &["x"], &[int(1)]).expect("entity");
    entity.del_attr("x").expect("delete");
    let x = entity.get_attr("x").expect("still declared");
    assert!(x.items()[0].is_missing());
    assert_eq!(entity.get_attr_names(false).expect("names"), vec!["x".to_string()]);
}

#[test]
fn defaults_fill_missing_values() {
    let bag = DataBag::empty();
    let entities = EntityCreator::shaped(&bag, JaggedShape::flat(2)).expect("entities");
    let filled = entities.get_attr_with_default("x", &int(0)).expect("default");
    assert_eq!(filled.items(), vec![DataItem::Int32(0), DataItem::Int32(0)]);

    let object = ObjectCreator::from_attrs(&bag, &["x"], &[int(5)]).expect("object");
    assert_eq!(
        object.get_attr_with_default("x", &int(0)).expect("present").items(),
        vec![DataItem::Int32(5)]
    );
}

#[test]
fn embedding_turns_entities_into_objects() {
    let bag = DataBag::empty();
    let entity = EntityCreator::from_attrs(&bag, &["x"], &[int(1)]).expect("entity");
    let object = entity.embed_schema(false).expect("embed");
    assert!(object.schema().is_dtype(DType::Object));
    assert_eq!(object.get_attr("__schema__").expect("schema").item(), Some(entity.schema()));
    assert_eq!(object.get_attr("x").expect("x").items(), vec![DataItem::Int32(1)]);

    let other_schema = create_entity_schema(&bag, &[], &[]).expect("other schema");
    let conflicting = entity.with_schema(other_schema.item().expect("item").clone()).expect("retyped");
    assert!(conflicting.embed_schema(false).is_err());
    assert!(conflicting.embed_schema(true).is_ok());
}

#[test]
fn schema_attribute_rules() {
    let bag = DataBag::empty();
    let entity = EntityCreator::from_attrs(&bag, &["x"], &[int(1)]).expect("entity");
    let schema_slice = entity.get_schema();
    assert!(entity.set_attr("__schema__", &schema_slice).is_err(), "entities keep their schema outside");

    let object = ObjectCreator::from_attrs(&bag, &[], &[]).expect("object");
    assert!(object.set_attr("__schema__", &int(1)).is_err());
    object.set_attr("__schema__", &schema_slice).expect("objects accept a schema");
    assert_eq!(object.get_attr("x").expect("x via new schema").items(), vec![DataItem::Missing]);

    let primitives = DataSlice::from_items(vec![DataItem::Int32(1)]).expect("ints");
    assert!(primitives.get_attr_names(false).is_err(), "no bag attached");
    assert!(primitives.with_bag(Some(bag.clone())).set_attr("a", &int(1)).is_err());
    assert!(
        DataSlice::create_item(DataItem::Int32(1), DataItem::DType(DType::ItemId), Some(bag.clone())).is_err(),
        "ITEMID slices hold ids only"
    );
}
