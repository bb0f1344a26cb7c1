mod common;

use common::*;

use anyhow::Result;
use declarus::ast::{BinaryOp, UnaryOp};
use declarus::{Type, Value};

#[test]
fn arithmetic_precedence() -> Result<()> {
    // $x = 2 + 3 * 4
    let value = top_variable(
        vec![assign(
            "x",
            binary(
                int(2),
                vec![(BinaryOp::Plus, int(3)), (BinaryOp::Multiply, int(4))],
            ),
        )],
        "x",
    )?;
    assert_eq!(value, Value::Integer(14));
    Ok(())
}

#[test]
fn short_circuit_skips_the_right_operand() -> Result<()> {
    // $x = false and (1 / 0); the division must never evaluate.
    let value = top_variable(
        vec![assign(
            "x",
            binary(
                boolean(false),
                vec![(BinaryOp::And, op(int(1), BinaryOp::Divide, int(0)))],
            ),
        )],
        "x",
    )?;
    assert_eq!(value, Value::Boolean(false));
    Ok(())
}

#[test]
fn short_circuit_resumes_at_lower_precedence() -> Result<()> {
    // $x = false and 1 / 0 or true is (false and (1/0)) or true.
    let value = top_variable(
        vec![assign(
            "x",
            binary(
                boolean(false),
                vec![
                    (BinaryOp::And, int(1)),
                    (BinaryOp::Divide, int(0)),
                    (BinaryOp::Or, boolean(true)),
                ],
            ),
        )],
        "x",
    )?;
    assert_eq!(value, Value::Boolean(true));
    Ok(())
}

#[test]
fn assignment_is_right_associative() -> Result<()> {
    // $a = $b = 3 binds both variables.
    let statements = vec![binary(
        variable("a"),
        vec![(BinaryOp::Assignment, variable("b")), (BinaryOp::Assignment, int(3))],
    )];
    assert_eq!(top_variable(statements.clone(), "a")?, Value::Integer(3));
    assert_eq!(top_variable(statements, "b")?, Value::Integer(3));
    Ok(())
}

#[test]
fn variable_redefinition_fails() {
    let result = top_variable(vec![assign("x", int(1)), assign("x", int(2))], "x");
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("previously assigned"), "{message}");
}

#[test]
fn unresolved_variable_is_undef() -> Result<()> {
    let value = top_variable(vec![assign("x", variable("missing"))], "x")?;
    assert_eq!(value, Value::Undef);
    Ok(())
}

#[test]
fn selector_falls_through_to_default() -> Result<()> {
    // $x = 'z' ? { 'a' => 1, default => 2 }
    let value = top_variable(
        vec![assign(
            "x",
            selector(
                string("z"),
                vec![(string("a"), int(1)), (default_value(), int(2))],
            ),
        )],
        "x",
    )?;
    assert_eq!(value, Value::Integer(2));
    Ok(())
}

#[test]
fn selector_without_match_fails() {
    let result = top_variable(
        vec![assign("x", selector(string("z"), vec![(string("a"), int(1))]))],
        "x",
    );
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("no matching selector case"), "{message}");
}

#[test]
fn case_matches_with_regex_and_captures() -> Result<()> {
    // case 'hello' { /h(e)llo/: { $x = $1 } }
    let value = top_variable(
        vec![case_expr(
            string("hello"),
            vec![
                (vec![regex("h(e)llo")], vec![assign("x", variable("1"))]),
                (vec![default_value()], vec![assign("x", string("nope"))]),
            ],
        )],
        "x",
    )?;
    assert_eq!(value, Value::from("e"));
    Ok(())
}

#[test]
fn case_splat_option_is_flattened() -> Result<()> {
    let value = top_variable(
        vec![case_expr(
            string("b"),
            vec![
                (
                    vec![splat(array(vec![string("a"), string("b")]))],
                    vec![assign("x", int(1))],
                ),
                (vec![default_value()], vec![assign("x", int(2))]),
            ],
        )],
        "x",
    )?;
    assert_eq!(value, Value::Integer(1));
    Ok(())
}

#[test]
fn if_branches_yield_values() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            if_expr(boolean(false), vec![int(1)], Some(vec![int(2)])),
        )],
        "x",
    )?;
    assert_eq!(value, Value::Integer(2));

    let missing_else = top_variable(
        vec![assign("x", if_expr(boolean(false), vec![int(1)], None))],
        "x",
    )?;
    assert_eq!(missing_else, Value::Undef);
    Ok(())
}

#[test]
fn match_operator_against_type() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            op(
                int(5),
                BinaryOp::Match,
                access(type_ref("Integer"), vec![int(1), int(10)]),
            ),
        )],
        "x",
    )?;
    assert_eq!(value, Value::Boolean(true));
    Ok(())
}

#[test]
fn match_captures_are_scoped_to_the_expression() -> Result<()> {
    // if 'abc' =~ /a(b)c/ { $x = $1 }
    let value = top_variable(
        vec![if_expr(
            op(string("abc"), BinaryOp::Match, regex("a(b)c")),
            vec![assign("x", variable("1"))],
            None,
        )],
        "x",
    )?;
    assert_eq!(value, Value::from("b"));
    // The captures are gone after the expression.
    let after = top_variable(
        vec![
            if_expr(
                op(string("abc"), BinaryOp::Match, regex("a(b)c")),
                vec![int(0)],
                None,
            ),
            assign("x", variable("1")),
        ],
        "x",
    )?;
    assert_eq!(after, Value::Undef);
    Ok(())
}

#[test]
fn in_operator() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            op(
                string("b"),
                BinaryOp::In,
                array(vec![string("a"), string("b")]),
            ),
        )],
        "x",
    )?;
    assert_eq!(value, Value::Boolean(true));
    Ok(())
}

#[test]
fn unary_operators() -> Result<()> {
    assert_eq!(
        top_variable(vec![assign("x", unary(UnaryOp::Negate, int(5)))], "x")?,
        Value::Integer(-5)
    );
    assert_eq!(
        top_variable(vec![assign("x", unary(UnaryOp::LogicalNot, int(0)))], "x")?,
        Value::Boolean(false)
    );
    assert_eq!(
        top_variable(vec![assign("x", splat(string("one")))], "x")?,
        Value::from(vec![Value::from("one")])
    );
    Ok(())
}

#[test]
fn array_splat_unfolds() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            array(vec![int(1), splat(array(vec![int(2), int(3)])), int(4)]),
        )],
        "x",
    )?;
    assert_eq!(
        value,
        Value::from(vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(3),
            Value::Integer(4),
        ])
    );
    Ok(())
}

#[test]
fn access_parametrises_types() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            access(
                type_ref("Array"),
                vec![access(type_ref("String"), vec![]), int(1), int(3)],
            ),
        )],
        "x",
    );
    // An access expression with no arguments is an error; parametrise with
    // the bare type reference instead.
    assert!(value.is_err());

    let value = top_variable(
        vec![assign(
            "x",
            access(type_ref("Array"), vec![type_ref("String"), int(1), int(3)]),
        )],
        "x",
    )?;
    let t = value.as_type().expect("expected a type").clone();
    assert_eq!(t.to_string(), "Array[String, 1, 3]");
    Ok(())
}

#[test]
fn type_display_round_trips_through_parse() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            access(
                type_ref("Variant"),
                vec![
                    access(type_ref("Integer"), vec![int(1), int(10)]),
                    access(type_ref("Enum"), vec![string("red"), string("green")]),
                ],
            ),
        )],
        "x",
    )?;
    let t = value.as_type().expect("expected a type").clone();
    let parsed = declarus::types::parse(&t.to_string())?;
    assert_eq!(parsed, (*t).clone());
    Ok(())
}

#[test]
fn instance_and_specialization_checks() {
    let bounded = Type::integer(1, 10);
    assert!(bounded.is_instance(&Value::Integer(5)));
    assert!(!bounded.is_instance(&Value::Integer(11)));
    assert!(Type::integer_unbounded().is_specialization(&bounded));
}

#[test]
fn map_over_array() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            method(
                array(vec![int(1), int(2), int(3)]),
                "map",
                vec![],
                Some(lambda(
                    vec!["v"],
                    vec![op(variable("v"), BinaryOp::Multiply, int(2))],
                )),
            ),
        )],
        "x",
    )?;
    assert_eq!(
        value,
        Value::from(vec![Value::Integer(2), Value::Integer(4), Value::Integer(6)])
    );
    Ok(())
}

#[test]
fn map_arity_two_supplies_the_index() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            method(
                array(vec![string("a"), string("b")]),
                "map",
                vec![],
                Some(lambda(vec!["i", "v"], vec![variable("i")])),
            ),
        )],
        "x",
    )?;
    assert_eq!(value, Value::from(vec![Value::Integer(0), Value::Integer(1)]));
    Ok(())
}

#[test]
fn each_over_integer_counts_from_zero() -> Result<()> {
    // $x = [] ... each(3) appends 0, 1, 2; observed via reduce instead
    // since scope variables are single-assignment.
    let value = top_variable(
        vec![assign(
            "x",
            method(
                int(3),
                "map",
                vec![],
                Some(lambda(vec!["v"], vec![variable("v")])),
            ),
        )],
        "x",
    )?;
    assert_eq!(
        value,
        Value::from(vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)])
    );
    Ok(())
}

#[test]
fn filter_keeps_hash_shape() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            method(
                hash(vec![
                    (string("a"), int(1)),
                    (string("b"), int(2)),
                ]),
                "filter",
                vec![],
                Some(lambda(
                    vec!["k", "v"],
                    vec![op(variable("v"), BinaryOp::GreaterThan, int(1))],
                )),
            ),
        )],
        "x",
    )?;
    let result = value.as_hash().expect("expected a hash").clone();
    assert_eq!(result.len(), 1);
    assert_eq!(result.get(&Value::from("b")), Some(&Value::Integer(2)));
    Ok(())
}

#[test]
fn reduce_folds_with_seed() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            method(
                array(vec![int(1), int(2), int(3)]),
                "reduce",
                vec![int(10)],
                Some(lambda(
                    vec!["memo", "v"],
                    vec![op(variable("memo"), BinaryOp::Plus, variable("v"))],
                )),
            ),
        )],
        "x",
    )?;
    assert_eq!(value, Value::Integer(16));
    Ok(())
}

#[test]
fn strings_enumerate_by_grapheme() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            method(
                string("a\u{0301}b"),
                "map",
                vec![],
                Some(lambda(vec!["g"], vec![variable("g")])),
            ),
        )],
        "x",
    )?;
    assert_eq!(
        value,
        Value::from(vec![Value::from("a\u{0301}"), Value::from("b")])
    );
    Ok(())
}

#[test]
fn split_and_versioncmp() -> Result<()> {
    let parts = top_variable(
        vec![assign("x", call("split", vec![string("a.b.c"), string(r"\.")]))],
        "x",
    )?;
    assert_eq!(
        parts,
        Value::from(vec![Value::from("a"), Value::from("b"), Value::from("c")])
    );

    let newer = top_variable(
        vec![assign(
            "x",
            call("versioncmp", vec![string("2.10.1"), string("2.9.8")]),
        )],
        "x",
    )?;
    assert_eq!(newer, Value::Integer(1));
    Ok(())
}

#[test]
fn type_function_infers() -> Result<()> {
    let value = top_variable(vec![assign("x", call("type", vec![int(5)]))], "x")?;
    assert_eq!(value, Value::from(Type::integer(5, 5)));
    Ok(())
}

#[test]
fn fail_aborts_evaluation() {
    let result = top_variable(vec![call("fail", vec![string("boom")]), assign("x", int(1))], "x");
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("boom"), "{message}");
}

#[test]
fn unknown_function_reports_the_name() {
    let result = top_variable(vec![call("no_such_function", vec![])], "x");
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("unknown function 'no_such_function'"), "{message}");
}

#[test]
fn lambda_defaults_apply() -> Result<()> {
    let with = declarus::ast::Lambda {
        span: sp(),
        parameters: vec![param("a"), default_param("b", int(10))],
        body: vec![op(variable("a"), BinaryOp::Plus, variable("b"))],
    };
    let value = top_variable(
        vec![assign("x", method(int(1), "with", vec![], Some(with)))],
        "x",
    )?;
    assert_eq!(value, Value::Integer(11));
    Ok(())
}

#[test]
fn fallback_resolver_handles_unknown_functions() -> Result<()> {
    use declarus::{Context, Evaluator, Registry};

    let manifest = tree(vec![assign("x", call("custom_sum", vec![int(1), int(2)]))]);
    let mut registry = Registry::new();
    registry.import(&manifest)?;
    let node = test_node();
    let mut context = Context::new(&node, &registry)?;
    context.set_function_resolver(Box::new(|name, arguments| {
        if name != "custom_sum" {
            return None;
        }
        let total: i64 = arguments.iter().filter_map(|v| v.as_integer()).sum();
        Some(Ok(Value::Integer(total)))
    }));
    {
        let mut evaluator = Evaluator::new(&mut context);
        evaluator.evaluate_tree(&manifest)?;
        evaluator.finalize()?;
    }
    let value = context
        .lookup_variable("x", &sp(), false)
        .map(|v| (*v).clone());
    assert_eq!(value, Some(Value::Integer(3)));
    Ok(())
}

#[test]
fn unknown_namespace_warns_and_yields_undef() -> Result<()> {
    use declarus::{Context, Evaluator, Level, Registry};

    let manifest = tree(vec![assign("x", variable("nope::value"))]);
    let mut registry = Registry::new();
    registry.import(&manifest)?;
    let node = test_node();
    let mut context = Context::new(&node, &registry)?;
    {
        let mut evaluator = Evaluator::new(&mut context);
        evaluator.evaluate_tree(&manifest)?;
    }
    let value = context
        .lookup_variable("x", &sp(), false)
        .map(|v| (*v).clone());
    assert_eq!(value, Some(Value::Undef));
    assert!(context
        .diagnostics()
        .iter()
        .any(|d| d.level == Level::Warning && d.message.contains("nope")));
    Ok(())
}

#[test]
fn string_indexing() -> Result<()> {
    let value = top_variable(
        vec![assign("x", access(string("hello"), vec![int(-2), int(2)]))],
        "x",
    )?;
    assert_eq!(value, Value::from("lo"));
    Ok(())
}

#[test]
fn hash_indexing_missing_key_is_undef() -> Result<()> {
    let value = top_variable(
        vec![assign(
            "x",
            access(hash(vec![(string("a"), int(1))]), vec![string("z")]),
        )],
        "x",
    )?;
    assert_eq!(value, Value::Undef);
    Ok(())
}
