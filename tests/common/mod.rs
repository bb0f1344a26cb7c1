//! AST construction helpers standing in for the external parser, plus
//! compile drivers shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use declarus::ast::{
    AttributeExpr, AttributeOp, BinaryOp, BinaryOperand, ClassExpr, CollectorExpr, CollectorKind,
    DefinedTypeExpr, Expr, Lambda, NodeExpr, NodeMatcher, Parameter, Query, ResourceBody,
    ResourceForm, SelectorCase, SyntaxTree, UnaryOp,
};
use declarus::{Catalog, Context, Evaluator, Node, Registry, Source, Span, Value, ValueHash};

pub fn sp() -> Span {
    Source::from_contents("test.dcl", "").span()
}

pub fn undef() -> Expr {
    Expr::Undef(sp())
}

pub fn default_value() -> Expr {
    Expr::Default(sp())
}

pub fn boolean(value: bool) -> Expr {
    Expr::Boolean(sp(), value)
}

pub fn int(value: i64) -> Expr {
    Expr::Integer(sp(), value)
}

pub fn float(value: f64) -> Expr {
    Expr::Float(sp(), value)
}

pub fn string(value: &str) -> Expr {
    Expr::String(sp(), value.to_string())
}

pub fn name(value: &str) -> Expr {
    Expr::Name(sp(), value.to_string())
}

pub fn regex(pattern: &str) -> Expr {
    Expr::Regex(sp(), pattern.to_string())
}

pub fn variable(name: &str) -> Expr {
    Expr::Variable(sp(), name.to_string())
}

pub fn type_ref(name: &str) -> Expr {
    Expr::TypeRef(sp(), name.to_string())
}

pub fn array(items: Vec<Expr>) -> Expr {
    Expr::Array { span: sp(), items }
}

pub fn hash(entries: Vec<(Expr, Expr)>) -> Expr {
    Expr::Hash { span: sp(), entries }
}

/// A flat binary operand chain; the evaluator's precedence climbing
/// resolves the grouping.
pub fn binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    Expr::Operation {
        span: sp(),
        first: Box::new(first),
        rest: rest
            .into_iter()
            .map(|(op, operand)| BinaryOperand {
                op,
                op_span: sp(),
                operand,
            })
            .collect(),
    }
}

pub fn op(left: Expr, operator: BinaryOp, right: Expr) -> Expr {
    binary(left, vec![(operator, right)])
}

pub fn assign(name: &str, value: Expr) -> Expr {
    op(variable(name), BinaryOp::Assignment, value)
}

pub fn unary(operator: UnaryOp, operand: Expr) -> Expr {
    Expr::Unary {
        span: sp(),
        op: operator,
        operand: Box::new(operand),
    }
}

pub fn splat(operand: Expr) -> Expr {
    unary(UnaryOp::Splat, operand)
}

pub fn access(operand: Expr, arguments: Vec<Expr>) -> Expr {
    Expr::Access {
        span: sp(),
        operand: Box::new(operand),
        arguments,
    }
}

pub fn call(name: &str, arguments: Vec<Expr>) -> Expr {
    Expr::FunctionCall {
        span: sp(),
        name: name.to_string(),
        arguments,
        lambda: None,
    }
}

pub fn param(name: &str) -> Parameter {
    Parameter::new(sp(), name)
}

pub fn typed_param(name: &str, type_expr: Expr) -> Parameter {
    Parameter {
        span: sp(),
        name: name.to_string(),
        type_expr: Some(type_expr),
        default: None,
    }
}

pub fn default_param(name: &str, default: Expr) -> Parameter {
    Parameter {
        span: sp(),
        name: name.to_string(),
        type_expr: None,
        default: Some(default),
    }
}

pub fn lambda(parameters: Vec<&str>, body: Vec<Expr>) -> Lambda {
    Lambda {
        span: sp(),
        parameters: parameters.into_iter().map(param).collect(),
        body,
    }
}

pub fn method(receiver: Expr, name: &str, arguments: Vec<Expr>, with: Option<Lambda>) -> Expr {
    Expr::MethodCall {
        span: sp(),
        receiver: Box::new(receiver),
        name: name.to_string(),
        arguments,
        lambda: with,
    }
}

pub fn attr(name: &str, value: Expr) -> AttributeExpr {
    AttributeExpr {
        name_span: sp(),
        name: name.to_string(),
        op: AttributeOp::Assignment,
        value,
    }
}

pub fn attr_append(name: &str, value: Expr) -> AttributeExpr {
    AttributeExpr {
        name_span: sp(),
        name: name.to_string(),
        op: AttributeOp::Append,
        value,
    }
}

pub fn body(title: Expr, attributes: Vec<AttributeExpr>) -> ResourceBody {
    ResourceBody {
        span: sp(),
        title,
        attributes,
    }
}

pub fn resource(type_name: &str, bodies: Vec<ResourceBody>) -> Expr {
    resource_form(ResourceForm::Realized, type_name, bodies)
}

pub fn resource_form(form: ResourceForm, type_name: &str, bodies: Vec<ResourceBody>) -> Expr {
    Expr::Resource {
        span: sp(),
        form,
        type_expr: Box::new(name(type_name)),
        bodies,
    }
}

pub fn override_resource(reference: Expr, attributes: Vec<AttributeExpr>) -> Expr {
    Expr::ResourceOverride {
        span: sp(),
        reference: Box::new(reference),
        attributes,
    }
}

pub fn class_def(name: &str, body: Vec<Expr>) -> Expr {
    class_def_full(name, vec![], None, body)
}

pub fn class_def_full(
    name: &str,
    parameters: Vec<Parameter>,
    parent: Option<&str>,
    body: Vec<Expr>,
) -> Expr {
    Expr::Class(ClassExpr {
        span: sp(),
        name: name.to_string(),
        parameters,
        parent: parent.map(str::to_string),
        body,
    })
}

pub fn defined_type(name: &str, parameters: Vec<Parameter>, body: Vec<Expr>) -> Expr {
    Expr::DefinedType(DefinedTypeExpr {
        span: sp(),
        name: name.to_string(),
        parameters,
        body,
    })
}

pub fn node_def(matchers: Vec<NodeMatcher>, body: Vec<Expr>) -> Expr {
    Expr::Node(NodeExpr {
        span: sp(),
        matchers,
        body,
    })
}

pub fn collector(type_name: &str, kind: CollectorKind, query: Option<Query>) -> Expr {
    Expr::Collector(CollectorExpr {
        span: sp(),
        type_name: type_name.to_string(),
        kind,
        query,
    })
}

pub fn selector(operand: Expr, cases: Vec<(Expr, Expr)>) -> Expr {
    Expr::Selector {
        span: sp(),
        operand: Box::new(operand),
        cases: cases
            .into_iter()
            .map(|(option, result)| SelectorCase {
                span: sp(),
                option,
                result,
            })
            .collect(),
    }
}

pub fn case_expr(conditional: Expr, propositions: Vec<(Vec<Expr>, Vec<Expr>)>) -> Expr {
    Expr::Case {
        span: sp(),
        conditional: Box::new(conditional),
        propositions: propositions
            .into_iter()
            .map(|(options, body)| declarus::ast::Proposition {
                span: sp(),
                options,
                body,
            })
            .collect(),
    }
}

pub fn if_expr(conditional: Expr, body: Vec<Expr>, else_body: Option<Vec<Expr>>) -> Expr {
    Expr::If {
        span: sp(),
        conditional: Box::new(conditional),
        body,
        elsifs: vec![],
        else_body,
    }
}

pub fn tree(statements: Vec<Expr>) -> SyntaxTree {
    SyntaxTree::new(Source::from_contents("test.dcl", ""), statements)
}

pub fn test_node() -> Node {
    Node::new("test.example.com", "production", ValueHash::new())
}

pub fn compile(statements: Vec<Expr>) -> Result<Catalog> {
    compile_for(&test_node(), statements)
}

pub fn compile_for(node: &Node, statements: Vec<Expr>) -> Result<Catalog> {
    let manifest = tree(statements);
    let mut registry = Registry::new();
    registry.import(&manifest)?;
    node.compile(&registry, &[&manifest])
}

/// Evaluates statements and returns the final value of a top-scope
/// variable; finalization runs so deferred work settles first.
pub fn top_variable(statements: Vec<Expr>, name: &str) -> Result<Value> {
    let manifest = tree(statements);
    let mut registry = Registry::new();
    registry.import(&manifest)?;
    let node = test_node();
    let mut context = Context::new(&node, &registry)?;
    {
        let mut evaluator = Evaluator::new(&mut context);
        evaluator.evaluate_tree(&manifest)?;
        evaluator.finalize()?;
    }
    Ok(context
        .lookup_variable(name, &sp(), false)
        .map(|value| (*value).clone())
        .unwrap_or(Value::Undef))
}

pub fn attribute_of(
    catalog: &Catalog,
    type_name: &str,
    title: &str,
    attribute: &str,
) -> Option<Value> {
    catalog
        .find(type_name, title)
        .and_then(|id| catalog.get(id).value_of(attribute).cloned())
}
