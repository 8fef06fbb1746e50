use databag::bag::{DataBag, DataBagPtr};
use databag::bag_impl::ListRange;
use databag::data_item::DataItem;
use databag::data_slice::DataSlice;
use databag::dtype::DType;
use databag::error::DataBagError;
use databag::object_factories::{
    create_empty_list, create_list_like, create_list_shaped, create_lists_from_last_dimension, create_nested_list,
    list_schema,
};
use databag::shape::{Edge, JaggedShape};

fn ints(values: &[i64]) -> Vec<DataItem> {
    values.iter().copied().map(DataItem::Int64).collect()
}

fn int_slice(values: &[i64]) -> DataSlice {
    DataSlice::from_items(ints(values)).expect("ints")
}

fn numbers(bag: &DataBagPtr) -> DataSlice {
    create_list_shaped(bag, JaggedShape::scalar(), Some(&int_slice(&[1, 2, 3, 4])), None).expect("list")
}

#[test]
fn explode_honours_ranges() {
    let bag = DataBag::empty();
    let list = numbers(&bag);
    assert_eq!(list.explode_list(ListRange::all()).expect("all").items(), ints(&[1, 2, 3, 4]));
    assert_eq!(list.explode_list(ListRange::new(1, Some(3))).expect("middle").items(), ints(&[2, 3]));
    assert_eq!(list.explode_list(ListRange::new(-2, None)).expect("tail").items(), ints(&[3, 4]));
    assert_eq!(list.explode_list(ListRange::new(3, Some(1))).expect("empty").size(), 0);
    assert_eq!(list.list_size().expect("size").items(), vec![DataItem::Int64(4)]);
}

#[test]
fn items_are_read_and_written_by_index() {
    let bag = DataBag::empty();
    let list = numbers(&bag);
    let picked = list.get_from_list(&int_slice(&[0, -1, 10])).expect("get");
    assert_eq!(picked.items(), vec![DataItem::Int64(1), DataItem::Int64(4), DataItem::Missing]);

    list.set_in_list(&DataSlice::from_item(1i64).expect("index"), &DataSlice::from_item(20i64).expect("value"))
        .expect("set");
    list.set_in_list(&DataSlice::from_item(99i64).expect("index"), &DataSlice::from_item(0i64).expect("value"))
        .expect("out of range is ignored");
    assert_eq!(list.explode_list(ListRange::all()).expect("all").items(), ints(&[1, 20, 3, 4]));

    assert!(list.get_from_list(&DataSlice::from_item("0").expect("text")).is_err());
}

#[test]
fn append_pop_and_remove() {
    let bag = DataBag::empty();
    let list = numbers(&bag);
    list.append_to_list(&DataSlice::from_item(5i64).expect("5")).expect("append one");
    list.append_to_list(&int_slice(&[6, 7])).expect("append a row");
    assert_eq!(list.list_size().expect("size").items(), vec![DataItem::Int64(7)]);

    let popped = list.pop_from_list(-1).expect("pop");
    assert_eq!(popped.items(), vec![DataItem::Int64(7)]);
    let first = list.pop_from_list(0).expect("pop first");
    assert_eq!(first.items(), vec![DataItem::Int64(1)]);

    list.remove_in_list(ListRange::new(0, Some(2))).expect("remove range");
    assert_eq!(list.explode_list(ListRange::all()).expect("all").items(), ints(&[4, 5, 6]));
    list.remove_in_list_by_indices(&[0, -1]).expect("remove indices");
    assert_eq!(list.explode_list(ListRange::all()).expect("all").items(), ints(&[5]));
}

#[test]
fn replace_takes_one_row_per_list() {
    let bag = DataBag::empty();
    let list = numbers(&bag);
    list.replace_in_list(ListRange::new(1, Some(3)), &int_slice(&[8]))
        .expect("replace");
    assert_eq!(list.explode_list(ListRange::all()).expect("all").items(), ints(&[1, 8, 4]));
    assert!(
        list.replace_in_list(ListRange::all(), &DataSlice::from_item(1i64).expect("scalar")).is_err(),
        "values need one more dimension than the lists"
    );

    list.clear_list().expect("clear");
    assert_eq!(list.list_size().expect("size").items(), vec![DataItem::Int64(0)]);
}

#[test]
fn item_schema_is_enforced() {
    let bag = DataBag::empty();
    let list = numbers(&bag);
    let result = list.append_to_list(&DataSlice::from_item("text").expect("text"));
    match result {
        Err(DataBagError::InvalidArgument(message)) => assert!(
            message.starts_with("The schema for List Items is incompatible."),
            "unexpected message {message}"
        ),
        other => panic!("expected InvalidArgument, got {:?}", other),
    }
    list.append_to_list(&DataSlice::from_item(9i32).expect("9")).expect("INT32 widens to INT64");
    assert_eq!(list.get_from_list(&DataSlice::from_item(-1i64).expect("index")).expect("last").items(), ints(&[9]));
}

#[test]
fn factories_build_lists_of_every_shape() {
    let bag = DataBag::empty();
    let empty = create_empty_list(&bag, None).expect("empty");
    assert_eq!(empty.list_size().expect("size").items(), vec![DataItem::Int64(0)]);
    assert!(empty.explode_list(ListRange::all()).expect("items").schema().is_dtype(DType::Object));

    let rows = int_slice(&[1, 2, 3])
        .reshape(JaggedShape::from_edges(vec![Edge::from_sizes(&[2]), Edge::from_sizes(&[2, 1])]).expect("shape"))
        .expect("rows");
    let lists = create_lists_from_last_dimension(&bag, &rows, None).expect("lists");
    assert_eq!(lists.rank(), 1);
    assert_eq!(lists.list_size().expect("sizes").items(), vec![DataItem::Int64(2), DataItem::Int64(1)]);

    let nested = create_nested_list(&bag, &rows, None).expect("nested");
    assert_eq!(nested.rank(), 0);
    let inner = nested.explode_list(ListRange::all()).expect("inner");
    assert_eq!(inner.explode_list(ListRange::all()).expect("leaves").items(), ints(&[1, 2, 3]));

    let mask = DataSlice::from_items(vec![DataItem::Missing, DataItem::Int32(1)]).expect("mask");
    let sparse = create_list_like(&bag, &mask, None, None).expect("like");
    assert_eq!(sparse.present_count(), 1);
    assert!(create_lists_from_last_dimension(&bag, &DataSlice::from_item(1i32).expect("1"), None).is_err());
}

#[test]
fn list_schemas_are_shared_by_item_schema() {
    let bag = DataBag::empty();
    let int64 = DataSlice::create_item(DataItem::DType(DType::Int64), DataItem::DType(DType::Schema), None)
        .expect("INT64");
    let schema = list_schema(&bag, &int64).expect("schema");
    assert_eq!(numbers(&bag).schema(), schema.item().expect("schema item"));
    let items = schema.get_attr("__items__").expect("items schema");
    assert_eq!(items.items(), vec![DataItem::DType(DType::Int64)]);
}

#[test]
fn writes_through_a_fallback_start_from_the_fallback_list() {
    let base = DataBag::empty();
    let list = create_list_shaped(&base, JaggedShape::scalar(), Some(&int_slice(&[1, 2])), None).expect("list");
    let layered = list.with_bag(Some(DataBag::empty_with_fallbacks(vec![base.clone()])));

    layered
        .set_in_list(&DataSlice::from_item(5i64).expect("index"), &DataSlice::from_item(9i64).expect("value"))
        .expect("out of range is ignored");
    assert_eq!(layered.explode_list(ListRange::all()).expect("all").items(), ints(&[1, 2]));

    layered.append_to_list(&DataSlice::from_item(3i64).expect("3")).expect("append");
    assert_eq!(layered.explode_list(ListRange::all()).expect("all").items(), ints(&[1, 2, 3]));
    let popped = layered.pop_from_list(0).expect("pop");
    assert_eq!(popped.items(), ints(&[1]));
    assert_eq!(layered.explode_list(ListRange::all()).expect("all").items(), ints(&[2, 3]));
    assert_eq!(list.explode_list(ListRange::all()).expect("all").items(), ints(&[1, 2]), "the fallback is untouched");

    layered.clear_list().expect("clear");
    assert_eq!(layered.list_size().expect("size").items(), vec![DataItem::Int64(0)]);
    assert_eq!(list.list_size().expect("size").items(), vec![DataItem::Int64(2)]);
}
