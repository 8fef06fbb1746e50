use databag::bag_impl::DataBagImpl;
use databag::data_item::DataItem;
use databag::dtype::{DICT_KEYS_SCHEMA_ATTR, DICT_VALUES_SCHEMA_ATTR, DType, LIST_ITEMS_SCHEMA_ATTR};
use databag::error::{DataBagError, Result};
use databag::object_id::{allocate, allocate_explicit_schema, allocate_single_dict, allocate_single_list};
use databag::slice_impl::DataSliceImpl;
use databag::traverser::{AbstractVisitor, Traverser};

#[derive(Default)]
struct Recorder {
    previsited: Vec<(DataItem, DataItem)>,
    objects: Vec<(DataItem, Vec<String>, Vec<DataItem>)>,
    schemas: Vec<DataItem>,
    lists: Vec<(DataItem, Vec<DataItem>)>,
    dicts: Vec<(DataItem, Vec<DataItem>, Vec<DataItem>)>,
    primitives: usize,
}

impl AbstractVisitor for Recorder {
    fn previsit(&mut self, item: &DataItem, schema: &DataItem) -> Result<()> {
        self.previsited.push((item.clone(), schema.clone()));
        Ok(())
    }

    fn get_value(&self, item: &DataItem, _schema: &DataItem) -> Result<DataItem> {
        Ok(item.clone())
    }

    fn visit_object(
        &mut self,
        object: &DataItem,
        _schema: &DataItem,
        _is_object_schema: bool,
        attr_names: &[String],
        attr_values: &[DataItem],
    ) -> Result<()> {
        self.objects
            .push((object.clone(), attr_names.to_vec(), attr_values.to_vec()));
        Ok(())
    }

    fn visit_list(&mut self, list: &DataItem, _schema: &DataItem, _is_object_schema: bool, items: &[DataItem]) -> Result<()> {
        self.lists.push((list.clone(), items.to_vec()));
        Ok(())
    }

    fn visit_dict(
        &mut self,
        dict: &DataItem,
        _schema: &DataItem,
        _is_object_schema: bool,
        keys: &[DataItem],
        values: &[DataItem],
    ) -> Result<()> {
        self.dicts.push((dict.clone(), keys.to_vec(), values.to_vec()));
        Ok(())
    }

    fn visit_schema(
        &mut self,
        schema_item: &DataItem,
        _schema: &DataItem,
        _is_object_schema: bool,
        _attr_names: &[String],
        _attr_schemas: &[DataItem],
    ) -> Result<()> {
        self.schemas.push(schema_item.clone());
        Ok(())
    }

    fn visit_primitive(&mut self, _item: &DataItem, _schema: &DataItem) -> Result<()> {
        self.primitives += 1;
        Ok(())
    }
}

// Two nodes pointing at each other under one schema.
fn cycle(bag: &mut DataBagImpl) -> (DataItem, DataItem, DataItem) {
    let schema = DataItem::ObjectId(allocate_explicit_schema());
    let alloc = allocate(2);
    let a = DataItem::ObjectId(alloc.object_by_offset(0));
    let b = DataItem::ObjectId(alloc.object_by_offset(1));
    bag.set_schema_attr(&schema, "next", schema.clone()).expect("schema attr");
    bag.set_attr(&a, "next", b.clone()).expect("a.next");
    bag.set_attr(&b, "next", a.clone()).expect("b.next");
    (schema, a, b)
}

#[test]
fn cycles_are_visited_once() {
    let mut bag = DataBagImpl::new();
    let (schema, a, b) = cycle(&mut bag);
    let mut recorder = Recorder::default();
    Traverser::new(&bag, &[])
        .traverse_item(&a, &schema, &mut recorder)
        .expect("traverse");
    assert_eq!(recorder.previsited.len(), 3, "schema, a and b: {:?}", recorder.previsited);
    assert_eq!(recorder.schemas, vec![schema.clone()]);
    let visited: Vec<DataItem> = recorder.objects.iter().map(|(object, _, _)| object.clone()).collect();
    assert!(visited.contains(&a) && visited.contains(&b));
    assert_eq!(recorder.objects.len(), 2);
}

#[test]
fn fallbacks_supply_attribute_values() {
    let mut main = DataBagImpl::new();
    let mut fallback = DataBagImpl::new();
    let schema = DataItem::ObjectId(allocate_explicit_schema());
    let object = DataItem::ObjectId(allocate(1).object_by_offset(0));
    main.set_schema_attr(&schema, "x", DataItem::DType(DType::Int32)).expect("schema x");
    fallback.set_schema_attr(&schema, "y", DataItem::DType(DType::Text)).expect("schema y");
    main.set_attr(&object, "x", DataItem::Int32(1)).expect("x");
    fallback.set_attr(&object, "y", DataItem::from("from fallback")).expect("y");

    let mut recorder = Recorder::default();
    Traverser::new(&main, &[&fallback])
        .traverse_item(&object, &schema, &mut recorder)
        .expect("traverse");
    let (_, names, values) = &recorder.objects[0];
    assert_eq!(names, &vec!["x".to_string(), "y".to_string()]);
    assert_eq!(values, &vec![DataItem::Int32(1), DataItem::from("from fallback")]);
    assert_eq!(recorder.primitives, 2, "both attribute values are primitive leaves");
}

#[test]
fn objects_need_an_embedded_schema() {
    let bag = DataBagImpl::new();
    let object = DataItem::ObjectId(allocate(1).object_by_offset(0));
    let mut recorder = Recorder::default();
    let result = Traverser::new(&bag, &[]).traverse_item(&object, &DataItem::DType(DType::Object), &mut recorder);
    assert!(
        matches!(result, Err(DataBagError::MissingObjectSchema(_))),
        "unexpected {:?}",
        result
    );
    let not_a_schema = Traverser::new(&bag, &[]).traverse_item(&object, &DataItem::Int32(1), &mut recorder);
    assert!(matches!(not_a_schema, Err(DataBagError::InvalidArgument(_))));
}

#[test]
fn primitives_are_leaves() {
    let bag = DataBagImpl::new();
    let items = DataSliceImpl::from_items(vec![DataItem::Int32(1), DataItem::Missing, DataItem::Int32(2)]);
    let mut recorder = Recorder::default();
    Traverser::new(&bag, &[])
        .traverse_slice(&items, &DataItem::DType(DType::Int32), &mut recorder)
        .expect("traverse");
    assert_eq!(recorder.previsited.len(), 2, "missing items are skipped");
    assert_eq!(recorder.primitives, 2);
    assert!(recorder.objects.is_empty());
}

// An object holding a list and a dict, everything written to `bag`.
fn containers(bag: &mut DataBagImpl) -> (DataItem, DataItem, DataItem, DataItem) {
    let schema = DataItem::ObjectId(allocate_explicit_schema());
    let list_schema = DataItem::ObjectId(allocate_explicit_schema());
    let dict_schema = DataItem::ObjectId(allocate_explicit_schema());
    bag.set_schema_attr(&schema, "items", list_schema.clone()).expect("items schema");
    bag.set_schema_attr(&schema, "tags", dict_schema.clone()).expect("tags schema");
    bag.set_schema_attr(&list_schema, LIST_ITEMS_SCHEMA_ATTR, DataItem::DType(DType::Int32)).expect("list items");
    bag.set_schema_attr(&dict_schema, DICT_KEYS_SCHEMA_ATTR, DataItem::DType(DType::Text)).expect("dict keys");
    bag.set_schema_attr(&dict_schema, DICT_VALUES_SCHEMA_ATTR, DataItem::DType(DType::Int32)).expect("dict values");

    let object = DataItem::ObjectId(allocate(1).object_by_offset(0));
    let list = DataItem::ObjectId(allocate_single_list());
    let dict = DataItem::ObjectId(allocate_single_dict());
    bag.set_attr(&object, "items", list.clone()).expect("items");
    bag.set_attr(&object, "tags", dict.clone()).expect("tags");
    bag.extend_list(&list, &[DataItem::Int32(1), DataItem::Int32(2)]).expect("list");
    bag.set_in_dict(&dict, &DataItem::from("b"), DataItem::Int32(2)).expect("b");
    bag.set_in_dict(&dict, &DataItem::from("a"), DataItem::Int32(1)).expect("a");
    (schema, object, list, dict)
}

#[test]
fn containers_are_walked_the_same_from_main_bag_and_fallback() {
    for in_fallback in [false, true] {
        let mut main = DataBagImpl::new();
        let mut fallback = DataBagImpl::new();
        let (schema, object, list, dict) = containers(if in_fallback { &mut fallback } else { &mut main });

        let mut recorder = Recorder::default();
        Traverser::new(&main, &[&fallback])
            .traverse_item(&object, &schema, &mut recorder)
            .expect("traverse");
        assert_eq!(
            recorder.lists,
            vec![(list.clone(), vec![DataItem::Int32(1), DataItem::Int32(2)])],
            "in_fallback={in_fallback}"
        );
        assert_eq!(
            recorder.dicts,
            vec![(
                dict.clone(),
                vec![DataItem::from("a"), DataItem::from("b")],
                vec![DataItem::Int32(1), DataItem::Int32(2)]
            )],
            "in_fallback={in_fallback}"
        );
        assert_eq!(recorder.objects.len(), 1, "in_fallback={in_fallback}");
        assert_eq!(recorder.schemas.len(), 3, "object, list and dict schemas: in_fallback={in_fallback}");
    }
}
