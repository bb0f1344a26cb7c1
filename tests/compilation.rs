mod common;

use common::*;

use anyhow::Result;
use declarus::ast::{BinaryOp, CollectorKind, NodeMatcher, Query, QueryOp, ResourceForm};
use declarus::{Node, Relationship, Value, ValueHash};

#[test]
fn resource_declaration_and_override() -> Result<()> {
    // notify { 'a': message => 'hi' }  Notify['a'] { message => 'bye' }
    let catalog = compile(vec![
        resource("notify", vec![body(string("a"), vec![attr("message", string("hi"))])]),
        override_resource(
            access(type_ref("Notify"), vec![string("a")]),
            vec![attr("message", string("bye"))],
        ),
    ])?;
    assert_eq!(
        attribute_of(&catalog, "notify", "a", "message"),
        Some(Value::from("bye"))
    );
    Ok(())
}

#[test]
fn override_before_declaration_applies_at_declaration() -> Result<()> {
    let catalog = compile(vec![
        override_resource(
            access(type_ref("Notify"), vec![string("a")]),
            vec![attr("message", string("bye"))],
        ),
        resource("notify", vec![body(string("a"), vec![attr("message", string("hi"))])]),
    ])?;
    assert_eq!(
        attribute_of(&catalog, "notify", "a", "message"),
        Some(Value::from("bye"))
    );
    Ok(())
}

#[test]
fn override_append_merges_values() -> Result<()> {
    let catalog = compile(vec![
        resource("notify", vec![body(string("a"), vec![attr("message", string("x"))])]),
        override_resource(
            access(type_ref("Notify"), vec![string("a")]),
            vec![attr_append("message", string("y"))],
        ),
    ])?;
    assert_eq!(
        attribute_of(&catalog, "notify", "a", "message"),
        Some(Value::from(vec![Value::from("x"), Value::from("y")]))
    );
    Ok(())
}

#[test]
fn override_without_target_fails() {
    let result = compile(vec![override_resource(
        access(type_ref("Notify"), vec![string("ghost")]),
        vec![attr("message", string("x"))],
    )]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("does not exist in the catalog"), "{message}");
}

#[test]
fn append_in_resource_body_is_rejected() {
    let result = compile(vec![resource(
        "notify",
        vec![body(string("a"), vec![attr_append("message", string("x"))])],
    )]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("only '=>' is supported"), "{message}");
}

#[test]
fn class_evaluates_once() -> Result<()> {
    // class c {} include c  include c
    let catalog = compile(vec![
        class_def("c", vec![resource("notify", vec![body(string("inner"), vec![])])]),
        call("include", vec![name("c")]),
        call("include", vec![name("c")]),
    ])?;
    let classes: Vec<_> = catalog
        .resources()
        .filter(|(_, r)| r.type_name() == "Class" && r.title() == "c")
        .collect();
    assert_eq!(classes.len(), 1);
    assert!(catalog.find("notify", "inner").is_some());
    Ok(())
}

#[test]
fn class_resource_form_declares() -> Result<()> {
    let catalog = compile(vec![
        class_def_full(
            "web",
            vec![default_param("port", int(80))],
            None,
            vec![resource(
                "notify",
                vec![body(string("p"), vec![attr("message", variable("port"))])],
            )],
        ),
        resource("class", vec![body(string("web"), vec![attr("port", int(8080))])]),
    ])?;
    assert_eq!(
        attribute_of(&catalog, "notify", "p", "message"),
        Some(Value::Integer(8080))
    );
    Ok(())
}

#[test]
fn class_inheritance_parents_the_scope() -> Result<()> {
    let catalog = compile(vec![
        class_def("base", vec![assign("setting", int(42))]),
        class_def_full(
            "child",
            vec![],
            Some("base"),
            vec![resource(
                "notify",
                vec![body(string("x"), vec![attr("message", variable("setting"))])],
            )],
        ),
        call("include", vec![name("child")]),
    ])?;
    assert_eq!(
        attribute_of(&catalog, "notify", "x", "message"),
        Some(Value::Integer(42))
    );
    // The parent class was declared too.
    assert!(catalog.find("class", "base").is_some());
    Ok(())
}

#[test]
fn qualified_variable_lookup() -> Result<()> {
    let catalog = compile(vec![
        class_def("settings_holder", vec![assign("port", int(9090))]),
        call("include", vec![name("settings_holder")]),
        resource(
            "notify",
            vec![body(
                string("q"),
                vec![attr("message", variable("settings_holder::port"))],
            )],
        ),
    ])?;
    assert_eq!(
        attribute_of(&catalog, "notify", "q", "message"),
        Some(Value::Integer(9090))
    );
    Ok(())
}

#[test]
fn invalid_class_parameter_is_rejected() {
    let result = compile(vec![
        class_def("c", vec![]),
        resource("class", vec![body(string("c"), vec![attr("bogus", int(1))])]),
    ]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("not a valid parameter"), "{message}");
}

#[test]
fn defined_type_fans_out_titles_in_order() -> Result<()> {
    // define d($n) { notify { $n: } }   d { ['x','y']: n => $title }
    let catalog = compile(vec![
        defined_type(
            "d",
            vec![param("n")],
            vec![resource("notify", vec![body(variable("n"), vec![])])],
        ),
        resource(
            "d",
            vec![body(
                array(vec![string("x"), string("y")]),
                vec![attr("n", variable("title"))],
            )],
        ),
    ])?;
    let titles: Vec<String> = catalog
        .resources()
        .filter(|(_, r)| r.type_name() == "Notify")
        .map(|(_, r)| r.title().to_string())
        .collect();
    assert_eq!(titles, vec!["x", "y"]);
    Ok(())
}

#[test]
fn defined_type_duplicate_title_fails_with_prior_location() {
    let result = compile(vec![
        defined_type("d", vec![], vec![]),
        resource("d", vec![body(string("x"), vec![])]),
        resource("d", vec![body(string("x"), vec![])]),
    ]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("previously declared at test.dcl"), "{message}");
}

#[test]
fn typed_defined_type_parameter_is_validated() {
    let result = compile(vec![
        defined_type(
            "d",
            vec![typed_param("n", type_ref("Integer"))],
            vec![],
        ),
        resource("d", vec![body(string("x"), vec![attr("n", string("oops"))])]),
    ]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("expected Integer for parameter $n"), "{message}");
}

#[test]
fn nested_defined_types_are_picked_up_in_the_same_pass() -> Result<()> {
    let catalog = compile(vec![
        defined_type(
            "outer",
            vec![],
            vec![resource("inner", vec![body(string("one"), vec![])])],
        ),
        defined_type(
            "inner",
            vec![],
            vec![resource("notify", vec![body(string("deep"), vec![])])],
        ),
        resource("outer", vec![body(string("o"), vec![])]),
    ])?;
    assert!(catalog.find("notify", "deep").is_some());
    Ok(())
}

#[test]
fn virtual_resource_is_inert_until_collected() -> Result<()> {
    // @notify { 'v': } with no collector stays out of the catalog output.
    let catalog = compile(vec![resource_form(
        ResourceForm::Virtual,
        "notify",
        vec![body(string("v"), vec![])],
    )])?;
    let id = catalog.find("notify", "v").expect("expected the resource");
    assert!(catalog.get(id).is_virtual());
    Ok(())
}

#[test]
fn collector_realizes_virtual_resources() -> Result<()> {
    // @notify { 'v': }   Notify <| |>
    let catalog = compile(vec![
        resource_form(ResourceForm::Virtual, "notify", vec![body(string("v"), vec![])]),
        collector("Notify", CollectorKind::All, None),
    ])?;
    let id = catalog.find("notify", "v").expect("expected the resource");
    assert!(!catalog.get(id).is_virtual());
    Ok(())
}

#[test]
fn collector_query_filters_on_attributes() -> Result<()> {
    let query = Query::Attribute {
        span: sp(),
        name: "message".to_string(),
        op: QueryOp::Equals,
        value: Box::new(string("keep")),
    };
    let catalog = compile(vec![
        resource_form(
            ResourceForm::Virtual,
            "notify",
            vec![
                body(string("kept"), vec![attr("message", string("keep"))]),
                body(string("dropped"), vec![attr("message", string("drop"))]),
            ],
        ),
        collector("Notify", CollectorKind::All, Some(query)),
    ])?;
    let kept = catalog.find("notify", "kept").expect("expected resource");
    let dropped = catalog.find("notify", "dropped").expect("expected resource");
    assert!(!catalog.get(kept).is_virtual());
    assert!(catalog.get(dropped).is_virtual());
    Ok(())
}

#[test]
fn exported_collector_only_matches_exported() -> Result<()> {
    let catalog = compile(vec![
        resource_form(ResourceForm::Virtual, "notify", vec![body(string("v"), vec![])]),
        resource_form(ResourceForm::Exported, "notify", vec![body(string("e"), vec![])]),
        collector("Notify", CollectorKind::Exported, None),
    ])?;
    let plain = catalog.find("notify", "v").expect("expected resource");
    let exported = catalog.find("notify", "e").expect("expected resource");
    assert!(catalog.get(plain).is_virtual());
    assert!(!catalog.get(exported).is_virtual());
    assert!(!catalog.get(exported).is_exported());
    Ok(())
}

#[test]
fn collector_override_applies_to_collected() -> Result<()> {
    // Notify <| |> { message => 'set' }
    let catalog = compile(vec![
        resource_form(ResourceForm::Virtual, "notify", vec![body(string("v"), vec![])]),
        override_resource(
            collector("Notify", CollectorKind::All, None),
            vec![attr("message", string("set"))],
        ),
    ])?;
    assert_eq!(
        attribute_of(&catalog, "notify", "v", "message"),
        Some(Value::from("set"))
    );
    Ok(())
}

#[test]
fn realize_function_uses_a_list_collector() -> Result<()> {
    let catalog = compile(vec![
        resource_form(ResourceForm::Virtual, "notify", vec![body(string("v"), vec![])]),
        call("realize", vec![access(type_ref("Notify"), vec![string("v")])]),
    ])?;
    let id = catalog.find("notify", "v").expect("expected the resource");
    assert!(!catalog.get(id).is_virtual());
    Ok(())
}

#[test]
fn realize_of_missing_resource_fails() {
    let result = compile(vec![call(
        "realize",
        vec![access(type_ref("Notify"), vec![string("ghost")])],
    )]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("does not exist in the catalog"), "{message}");
}

#[test]
fn virtual_defined_type_body_waits_for_realization() -> Result<()> {
    let statements = |collect: bool| {
        let mut s = vec![
            defined_type(
                "d",
                vec![],
                vec![resource("notify", vec![body(string("inner"), vec![])])],
            ),
            resource_form(ResourceForm::Virtual, "d", vec![body(string("v"), vec![])]),
        ];
        if collect {
            s.push(collector("D", CollectorKind::All, None));
        }
        s
    };

    let uncollected = compile(statements(false))?;
    assert!(uncollected.find("notify", "inner").is_none());

    let collected = compile(statements(true))?;
    assert!(collected.find("notify", "inner").is_some());
    Ok(())
}

#[test]
fn classes_cannot_be_virtual() {
    let result = compile(vec![
        class_def("c", vec![]),
        resource_form(ResourceForm::Virtual, "class", vec![body(string("c"), vec![])]),
    ]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("classes cannot be virtual"), "{message}");
}

#[test]
fn edge_operators_record_relationships() -> Result<()> {
    // Notify['a'] -> Notify['b']
    let catalog = compile(vec![
        resource("notify", vec![body(string("a"), vec![])]),
        resource("notify", vec![body(string("b"), vec![])]),
        op(
            access(type_ref("Notify"), vec![string("a")]),
            BinaryOp::InEdge,
            access(type_ref("Notify"), vec![string("b")]),
        ),
    ])?;
    let a = catalog.find("notify", "a").expect("expected a");
    let b = catalog.find("notify", "b").expect("expected b");
    assert!(catalog
        .relationships()
        .iter()
        .any(|e| e.source == a && e.target == b && e.relationship == Relationship::Before));
    Ok(())
}

#[test]
fn reverse_edge_operator_swaps_direction() -> Result<()> {
    // Notify['a'] <~ Notify['b']: b notifies a.
    let catalog = compile(vec![
        resource("notify", vec![body(string("a"), vec![])]),
        resource("notify", vec![body(string("b"), vec![])]),
        op(
            access(type_ref("Notify"), vec![string("a")]),
            BinaryOp::OutEdgeSubscribe,
            access(type_ref("Notify"), vec![string("b")]),
        ),
    ])?;
    let a = catalog.find("notify", "a").expect("expected a");
    let b = catalog.find("notify", "b").expect("expected b");
    assert!(catalog
        .relationships()
        .iter()
        .any(|e| e.source == b && e.target == a && e.relationship == Relationship::Notify));
    Ok(())
}

#[test]
fn relationship_metaparameters_populate_edges() -> Result<()> {
    let catalog = compile(vec![
        resource("notify", vec![body(string("a"), vec![])]),
        resource(
            "notify",
            vec![body(string("b"), vec![attr("require", string("Notify[a]"))])],
        ),
    ])?;
    let a = catalog.find("notify", "a").expect("expected a");
    let b = catalog.find("notify", "b").expect("expected b");
    assert!(catalog
        .relationships()
        .iter()
        .any(|e| e.source == b && e.target == a && e.relationship == Relationship::Require));
    Ok(())
}

#[test]
fn relationship_to_missing_resource_fails() {
    let result = compile(vec![resource(
        "notify",
        vec![body(string("a"), vec![attr("before", string("Notify[ghost]"))])],
    )]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("does not exist in the catalog"), "{message}");
}

#[test]
fn metaparameter_type_is_validated() {
    let result = compile(vec![resource(
        "notify",
        vec![body(string("a"), vec![attr("noop", string("yes"))])],
    )]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("expected Boolean for attribute 'noop'"), "{message}");
}

#[test]
fn splat_attribute_expands_a_hash() -> Result<()> {
    let catalog = compile(vec![resource(
        "notify",
        vec![body(
            string("a"),
            vec![attr(
                "*",
                hash(vec![(string("message"), string("hi"))]),
            )],
        )],
    )])?;
    assert_eq!(
        attribute_of(&catalog, "notify", "a", "message"),
        Some(Value::from("hi"))
    );
    Ok(())
}

#[test]
fn default_body_attributes_apply_to_all_titles() -> Result<()> {
    let catalog = compile(vec![resource(
        "notify",
        vec![
            body(default_value(), vec![attr("message", string("shared"))]),
            body(string("a"), vec![]),
            body(string("b"), vec![attr("message", string("own"))]),
        ],
    )])?;
    assert_eq!(
        attribute_of(&catalog, "notify", "a", "message"),
        Some(Value::from("shared"))
    );
    assert_eq!(
        attribute_of(&catalog, "notify", "b", "message"),
        Some(Value::from("own"))
    );
    Ok(())
}

#[test]
fn undefined_resource_type_fails() {
    let result = compile(vec![resource("nonsense", vec![body(string("a"), vec![])])]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("has not been defined"), "{message}");
}

#[test]
fn node_definitions_match_most_specific_name_first() -> Result<()> {
    let node = Node::new("web01.example.com", "production", ValueHash::new());
    let catalog = compile_for(
        &node,
        vec![
            node_def(
                vec![NodeMatcher::Name("web01".to_string())],
                vec![resource("notify", vec![body(string("by-prefix"), vec![])])],
            ),
            node_def(
                vec![NodeMatcher::Default],
                vec![resource("notify", vec![body(string("by-default"), vec![])])],
            ),
        ],
    )?;
    assert!(catalog.find("notify", "by-prefix").is_some());
    assert!(catalog.find("notify", "by-default").is_none());
    assert!(catalog.find("node", "web01").is_some());
    Ok(())
}

#[test]
fn node_regex_matcher_applies_in_declaration_order() -> Result<()> {
    let node = Node::new("db7.example.com", "production", ValueHash::new());
    let catalog = compile_for(
        &node,
        vec![
            node_def(
                vec![NodeMatcher::Regex("^db\\d+".to_string())],
                vec![resource("notify", vec![body(string("db"), vec![])])],
            ),
            node_def(
                vec![NodeMatcher::Default],
                vec![resource("notify", vec![body(string("other"), vec![])])],
            ),
        ],
    )?;
    assert!(catalog.find("notify", "db").is_some());
    Ok(())
}

#[test]
fn unmatched_node_fails_when_definitions_exist() {
    let node = Node::new("stray.example.com", "production", ValueHash::new());
    let result = compile_for(
        &node,
        vec![node_def(vec![NodeMatcher::Name("other".to_string())], vec![])],
    );
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("could not find"), "{message}");
}

#[test]
fn facts_are_published_to_the_top_scope() -> Result<()> {
    let mut facts = ValueHash::new();
    facts.insert(Value::from("role"), Value::from("database"));
    let node = Node::new("db.example.com", "production", facts);
    let catalog = compile_for(
        &node,
        vec![resource(
            "notify",
            vec![body(string("f"), vec![attr("message", variable("role"))])],
        )],
    )?;
    assert_eq!(
        attribute_of(&catalog, "notify", "f", "message"),
        Some(Value::from("database"))
    );
    Ok(())
}

#[test]
fn initial_resources_are_seeded() -> Result<()> {
    let catalog = compile(vec![])?;
    assert!(catalog.find("stage", "main").is_some());
    assert!(catalog.find("class", "settings").is_some());
    assert!(catalog.find("class", "main").is_some());
    Ok(())
}

#[test]
fn compilation_is_deterministic() -> Result<()> {
    let statements = || {
        vec![
            defined_type(
                "d",
                vec![param("n")],
                vec![resource("notify", vec![body(variable("n"), vec![])])],
            ),
            resource(
                "d",
                vec![body(
                    array(vec![string("x"), string("y"), string("z")]),
                    vec![attr("n", variable("title"))],
                )],
            ),
            resource("notify", vec![body(string("direct"), vec![])]),
        ]
    };
    let first = compile(statements())?.to_json_str()?;
    let second = compile(statements())?.to_json_str()?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn epp_templates_render_to_a_string() -> Result<()> {
    use declarus::ast::{Expr, SyntaxTree};
    use declarus::{Registry, Source};

    let source = Source::from_contents("greeting.epp", "");
    let mut template = SyntaxTree::new(
        source.clone(),
        vec![
            Expr::EppRenderString {
                span: source.span(),
                text: "Hello ".to_string(),
            },
            Expr::EppRender {
                span: source.span(),
                expression: Box::new(variable("who")),
            },
        ],
    );
    template.parameters = Some(vec![param("who")]);

    let registry = Registry::new();
    let node = test_node();
    let mut arguments = ValueHash::new();
    arguments.insert(Value::from("who"), Value::from("world"));
    let rendered = node.evaluate_epp(&registry, &template, Some(arguments))?;
    assert_eq!(rendered, "Hello world");
    Ok(())
}

#[test]
fn epp_render_outside_a_template_fails() {
    let result = compile(vec![declarus::ast::Expr::EppRenderString {
        span: sp(),
        text: "text".to_string(),
    }]);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("not allowed in this context"), "{message}");
}

#[test]
fn containment_edges_follow_declaration() -> Result<()> {
    let catalog = compile(vec![
        class_def("c", vec![resource("notify", vec![body(string("inner"), vec![])])]),
        call("include", vec![name("c")]),
    ])?;
    let class_id = catalog.find("class", "c").expect("expected the class");
    let inner = catalog.find("notify", "inner").expect("expected inner");
    assert!(catalog
        .containment()
        .iter()
        .any(|(container, contained)| *container == class_id && *contained == inner));
    Ok(())
}

#[test]
fn tags_accumulate_from_attributes_and_function() -> Result<()> {
    let catalog = compile(vec![
        class_def(
            "c",
            vec![
                call("tag", vec![string("extra")]),
                resource("notify", vec![body(string("t"), vec![attr("tag", string("own"))])]),
            ],
        ),
        call("include", vec![name("c")]),
    ])?;
    let class_id = catalog.find("class", "c").expect("expected the class");
    assert!(catalog.get(class_id).tags().contains("extra"));
    let t = catalog.find("notify", "t").expect("expected the resource");
    assert!(catalog.get(t).tags().contains("own"));
    assert!(catalog.get(t).tags().contains("notify"));
    Ok(())
}
