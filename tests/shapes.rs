use databag::data_item::DataItem;
use databag::data_slice::DataSlice;
use databag::shape::{Edge, JaggedShape};

fn two_by_jagged() -> JaggedShape {
    JaggedShape::from_edges(vec![Edge::from_sizes(&[2]), Edge::from_sizes(&[2, 3])]).expect("shape")
}

#[test]
fn edges_validate_split_points() {
    assert!(Edge::from_split_points(vec![1, 2]).is_err(), "must start at 0");
    assert!(Edge::from_split_points(vec![0, 3, 2]).is_err(), "must be sorted");
    let edge = Edge::from_split_points(vec![0, 2, 5]).expect("edge");
    assert_eq!(edge.parent_size(), 2);
    assert_eq!(edge.child_size(), 5);
    assert_eq!(edge.sizes(), vec![2, 3]);
}

#[test]
fn shapes_chain_their_edges() {
    let shape = two_by_jagged();
    assert_eq!(shape.rank(), 2);
    assert_eq!(shape.size(), 5);
    assert_eq!(JaggedShape::scalar().size(), 1);
    assert_eq!(JaggedShape::flat(4).size(), 4);
    let broken = JaggedShape::from_edges(vec![Edge::from_sizes(&[3]), Edge::from_sizes(&[1, 1])]);
    assert!(broken.is_err(), "second edge must have 3 parents");
    assert_eq!(shape.to_string(), "JaggedShape(2, [2, 3])");
}

#[test]
fn broadcasting_repeats_parents() {
    let shape = two_by_jagged();
    let flat = shape.remove_dims(1);
    assert!(flat.is_broadcastable_to(&shape));
    assert!(!shape.is_broadcastable_to(&flat));
    assert_eq!(flat.broadcast_indices(&shape).expect("indices"), vec![0, 0, 1, 1, 1]);
    assert!(JaggedShape::flat(3).broadcast_indices(&shape).is_err());

    let values = DataSlice::from_items(vec![DataItem::Int32(1), DataItem::Int32(2)]).expect("slice");
    let expanded = values.broadcast_to_shape(&shape).expect("broadcast");
    assert_eq!(
        expanded.items(),
        vec![1, 1, 2, 2, 2].into_iter().map(DataItem::Int32).collect::<Vec<_>>()
    );
    assert_eq!(expanded.rank(), 2);
}

#[test]
fn flatten_merges_or_inserts_dimensions() {
    let shape = two_by_jagged();
    let merged = shape.flatten(0, 2).expect("flatten");
    assert_eq!(merged.rank(), 1);
    assert_eq!(merged.size(), 5);
    let inserted = shape.flatten(1, 1).expect("unit dimension");
    assert_eq!(inserted.rank(), 3);
    assert_eq!(inserted.size(), 5);
    assert!(shape.flatten(1, 3).is_err());

    let items = DataSlice::from_items((0..5).map(DataItem::Int64))
        .expect("slice")
        .reshape(shape.clone())
        .expect("reshape");
    assert_eq!(items.flatten(0, 2).expect("flatten slice").rank(), 1);
    assert!(items.reshape(JaggedShape::flat(4)).is_err(), "sizes must match");
}
