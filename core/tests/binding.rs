use treebind_core::{
    BindingErrorKind, Children, Declaration, Node, Origin, Registry, Value,
};

fn widget_registry() -> Registry {
    Registry::compile([Declaration::new(
        "widget",
        [
            "target=Widget",
            "@name=optional",
            "@name=datatype:String",
            "key=@name",
            "keyed-as=Widget",
            "<widget>=Widget",
        ],
    )])
    .unwrap()
}

fn widget(name: &str) -> Node {
    Node::new("widget").with_attribute("name", name)
}

#[test]
fn keyed_widgets_are_retrievable_in_order() {
    let registry = widget_registry();
    let tree = widget("root").with_children([widget("a"), widget("b")]);

    let bound = registry.bind(&tree).unwrap();
    let widgets = bound.keyed("widget").unwrap();
    assert_eq!(widgets.keys().collect::<Vec<_>>(), ["a", "b"]);
    assert_eq!(widgets["a"].value("name"), Some(&Value::String("a".into())));
    assert_eq!(widgets["b"].value("name"), Some(&Value::String("b".into())));
}

#[test]
fn duplicate_widget_key_is_reported() {
    let registry = widget_registry();
    let tree = widget("root").with_children([widget("a"), widget("a")]);

    let err = registry.bind(&tree).unwrap_err();
    assert_eq!(
        err.kind,
        BindingErrorKind::DuplicateKey {
            element: "widget".into(),
            key: "a".into(),
        }
    );
    assert!(err.to_string().contains("\"a\""), "{err}");
}

#[test]
fn nested_errors_carry_the_keyed_path() {
    let registry = widget_registry();
    let tree = widget("root").with_child(widget("a").with_child(Node::new("widget")));

    let err = registry.bind(&tree).unwrap_err();
    assert_eq!(err.path.to_string(), "widget[root]/widget[a]/widget");
    assert!(matches!(err.kind, BindingErrorKind::MissingAttribute { ref attribute, .. } if attribute == "name"));
}

#[test]
fn optional_attributes_fall_back_to_defaults() {
    let registry = Registry::compile([Declaration::from_metadata(
        "listener",
        "target=Listener,@port=datatype:Integer,@port=default:8080,@host=optional,@secure=datatype:Boolean,@secure=optional",
    )])
    .unwrap();

    let bound = registry.bind(&Node::new("listener")).unwrap();
    let port = bound.attribute("port").unwrap();
    assert_eq!(port.value, Value::Integer(8080));
    assert_eq!(port.origin, Origin::Default);

    let host = bound.attribute("host").unwrap();
    assert_eq!(host.value, Value::String(String::new()));
    assert_eq!(host.origin, Origin::Implicit);
    assert_eq!(bound.value("secure"), Some(&Value::Boolean(false)));
}

#[test]
fn unregistered_children_need_a_permissive_descriptor() {
    let strict = Registry::compile([Declaration::new("panel", ["target=Panel"])]).unwrap();
    let lenient =
        Registry::compile([Declaration::new("panel", ["target=Panel", "<*>=ignore"])]).unwrap();
    let tree = Node::new("panel").with_child(Node::new("gadget"));

    assert!(matches!(
        strict.bind(&tree).unwrap_err().kind,
        BindingErrorKind::UnknownChild { ref child, .. } if child == "gadget"
    ));
    let bound = lenient.bind(&tree).unwrap();
    assert!(bound.children("gadget").is_none());
}

#[test]
fn recursive_types_bind_to_any_depth() {
    let registry = Registry::compile([Declaration::new(
        "group",
        ["target=Group", "@label=optional", "<group>=collection:Group"],
    )])
    .unwrap();

    let mut tree = Node::new("group").with_attribute("label", "leaf");
    for depth in 0..16 {
        tree = Node::new("group")
            .with_attribute("label", depth.to_string())
            .with_child(tree);
    }

    let mut bound = &registry.bind(&tree).unwrap();
    let mut depth = 0;
    while let Some(Children::List(groups)) = bound.children("group") {
        bound = &groups[0];
        depth += 1;
    }
    assert_eq!(depth, 16);
    assert_eq!(bound.value("label"), Some(&Value::String("leaf".into())));
}

#[test]
fn registry_is_shared_across_threads() {
    let registry = widget_registry();
    std::thread::scope(|scope| {
        for i in 0..4 {
            let registry = &registry;
            scope.spawn(move || {
                let tree = widget("root").with_child(widget(&format!("w{i}")));
                let bound = registry.bind(&tree).unwrap();
                assert!(bound.keyed("widget").unwrap().contains_key(&format!("w{i}")));
            });
        }
    });
}
