use databag::bag::{DataBag, DataBagPtr};
use databag::bag_impl::ListRange;
use databag::data_item::DataItem;
use databag::data_slice::DataSlice;
use databag::error::DataBagError;
use databag::object_factories::{Creator, EntityCreator, ObjectCreator, create_dict_shaped, create_list_shaped};
use databag::persist::{PersistenceMode, Persistor};
use databag::shape::JaggedShape;

// One entity, one object, a list and a dict in a single bag.
fn populated() -> (DataBagPtr, DataSlice, DataSlice) {
    let bag = DataBag::empty();
    let entity = EntityCreator::from_attrs(&bag, &["name"], &[DataSlice::from_item("ann").expect("name")]).expect("entity");
    let values = DataSlice::from_items(vec![DataItem::Int32(1), DataItem::Int32(2)]).expect("values");
    let list = create_list_shaped(&bag, JaggedShape::scalar(), Some(&values), None).expect("list");
    let empty_list = create_list_shaped(&bag, JaggedShape::scalar(), None, None).expect("empty list");
    let keys = DataSlice::from_items(vec![DataItem::from("k")]).expect("keys");
    let dict = create_dict_shaped(
        &bag,
        JaggedShape::scalar(),
        Some(&keys),
        Some(&DataSlice::from_items(vec![DataItem::Int64(9)]).expect("value")),
        None,
        None,
    )
    .expect("dict");
    let object = ObjectCreator::from_attrs(&bag, &["list", "dict", "empty"], &[list, dict, empty_list]).expect("object");
    (bag, entity, object)
}

#[test]
fn in_memory_mode_round_trips_snapshots() {
    let (bag, entity, object) = populated();
    let mut persistor = Persistor::new(PersistenceMode::InMemory).expect("persistor");
    assert_eq!(persistor.mode(), &PersistenceMode::InMemory);

    let info = persistor.save_snapshot("first", &bag).expect("save");
    assert_eq!(info.name, "first");
    assert_eq!(info.fingerprint, bag.fingerprint().expect("fingerprint"));
    assert!(info.triples > 0);
    assert_eq!(persistor.snapshot_info("first").expect("info"), Some(info.clone()));

    let loaded = persistor.load_snapshot("first").expect("load");
    assert_eq!(loaded.fingerprint().expect("fingerprint"), info.fingerprint);
    assert!(loaded.is_mutable() && !loaded.has_fallbacks());

    let entity = entity.with_bag(Some(loaded.clone()));
    assert_eq!(entity.get_attr("name").expect("name").items(), vec![DataItem::from("ann")]);
    let object = object.with_bag(Some(loaded));
    let list = object.get_attr("list").expect("list");
    assert_eq!(
        list.explode_list(ListRange::all()).expect("items").items(),
        vec![DataItem::Int32(1), DataItem::Int32(2)]
    );
    assert_eq!(object.get_attr("empty").expect("empty").list_size().expect("size").items(), vec![DataItem::Int64(0)]);
    assert_eq!(
        object.get_attr("dict").expect("dict").get_from_dict(&DataSlice::from_item("k").expect("key")).expect("k").items(),
        vec![DataItem::Int64(9)]
    );
}

#[test]
fn saving_again_replaces_the_snapshot() {
    let (bag, entity, _) = populated();
    let mut persistor = Persistor::new(PersistenceMode::InMemory).expect("persistor");
    persistor.save_snapshot("b", &bag).expect("save b");
    persistor.save_snapshot("a", &bag).expect("save a");
    assert_eq!(persistor.snapshots().expect("names"), vec!["a".to_string(), "b".to_string()]);

    entity.set_attr("name", &DataSlice::from_item("bob").expect("bob")).expect("rename");
    let info = persistor.save_snapshot("a", &bag).expect("save a again");
    let loaded = persistor.load_snapshot("a").expect("load a");
    assert_eq!(loaded.fingerprint().expect("fingerprint"), info.fingerprint);
    assert_eq!(
        entity.with_bag(Some(loaded)).get_attr("name").expect("name").items(),
        vec![DataItem::from("bob")]
    );

    assert!(persistor.delete_snapshot("b").expect("delete"));
    assert!(!persistor.delete_snapshot("b").expect("delete twice"));
    assert_eq!(persistor.snapshots().expect("names"), vec!["a".to_string()]);
}

#[test]
fn missing_snapshots_are_reported() {
    let persistor = Persistor::new(PersistenceMode::InMemory).expect("persistor");
    assert_eq!(persistor.snapshot_info("nope").expect("info"), None);
    match persistor.load_snapshot("nope") {
        Err(DataBagError::Persistence(message)) => assert!(message.contains("no snapshot named"), "{message}"),
        other => panic!("expected a persistence error, got {:?}", other.map(|bag| bag.fingerprint())),
    }
}

#[test]
fn file_mode_survives_reopening() {
    // Use a temp path; remove leftovers from earlier runs first
    let path = "test_databag_snapshots.db".to_string();
    let _ = std::fs::remove_file(&path);
    let (bag, entity, _) = populated();
    let fingerprint = {
        let mut persistor = Persistor::new(PersistenceMode::File(path.clone())).expect("persistor");
        persistor.save_snapshot("kept", &bag).expect("save").fingerprint
    };

    let reopened = Persistor::new(PersistenceMode::File(path.clone())).expect("reopen");
    assert_eq!(reopened.snapshots().expect("names"), vec!["kept".to_string()]);
    let loaded = reopened.load_snapshot("kept").expect("load");
    assert_eq!(loaded.fingerprint().expect("fingerprint"), fingerprint);
    assert_eq!(
        entity.with_bag(Some(loaded)).get_attr("name").expect("name").items(),
        vec![DataItem::from("ann")]
    );
    drop(reopened);
    // Clean up
    let _ = std::fs::remove_file(&path);
}

#[test]
fn many_dicts_and_schemas_are_regrouped_on_load() {
    let bag = DataBag::empty();
    let keys = DataSlice::from_items(vec![DataItem::from("a"), DataItem::from("b"), DataItem::from("c")]).expect("keys");
    let mut dicts = Vec::new();
    for offset in 0..3i64 {
        let values = DataSlice::from_items((0..3).map(|v| DataItem::Int64(v + 10 * offset))).expect("values");
        let dict = create_dict_shaped(&bag, JaggedShape::scalar(), Some(&keys), Some(&values), None, None).expect("dict");
        dicts.push(ObjectCreator::from_attrs(&bag, &["d", "n"], &[dict, DataSlice::from_item(offset).expect("n")]).expect("object"));
    }
    let mut persistor = Persistor::new(PersistenceMode::InMemory).expect("persistor");
    let info = persistor.save_snapshot("dicts", &bag).expect("save");
    let loaded = persistor.load_snapshot("dicts").expect("load");
    assert_eq!(loaded.fingerprint().expect("fingerprint"), info.fingerprint);

    for (offset, object) in dicts.iter().enumerate() {
        let object = object.with_bag(Some(loaded.clone()));
        assert_eq!(object.get_attr("n").expect("n").items(), vec![DataItem::Int64(offset as i64)]);
        let dict = object.get_attr("d").expect("d");
        assert_eq!(
            dict.get_dict_values().expect("values").items(),
            (0..3).map(|v| DataItem::Int64(v + 10 * offset as i64)).collect::<Vec<_>>()
        );
    }
}
