use crate::access;
use crate::ast::{
    AttributeExpr, AttributeOp, BinaryOp, BinaryOperand, CollectorKind, Expr, Parameter, Query,
    QueryOp, ResourceBody, ResourceForm, SyntaxTree, UnaryOp,
};
use crate::catalog::{reference_list, Attribute, Edge, Relationship, ResourceId};
use crate::context::{
    Collector, CollectorQuery, Context, DeclaredDefinedType, ResourceOverride,
    ResourceRelationship,
};
use crate::functions;
use crate::operators;
use crate::scope::ScopeId;
use crate::source::Span;
use crate::types::{canonicalize_type_name, normalize_class_name, Type};
use crate::value::{Value, ValueHash, ValueRegex};

use std::collections::HashSet;
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};

const FINALIZE_ITERATION_LIMIT: u32 = 1000;

/// Metaparameters common to every resource; never bound as class or
/// defined-type parameters.
const METAPARAMETERS: &[&str] = &[
    "alias",
    "audit",
    "before",
    "loglevel",
    "noop",
    "notify",
    "require",
    "schedule",
    "stage",
    "subscribe",
    "tag",
];

const BUILTIN_RESOURCE_TYPES: &[&str] = &[
    "Cron",
    "Exec",
    "File",
    "Filebucket",
    "Group",
    "Host",
    "Mount",
    "Node",
    "Notify",
    "Package",
    "Schedule",
    "Service",
    "Stage",
    "Tidy",
    "User",
];

pub(crate) fn is_builtin_type(canonical: &str) -> bool {
    BUILTIN_RESOURCE_TYPES.contains(&canonical)
}

/// The tree-walk expression evaluator, parameterised by an explicit mutable
/// evaluation context.
pub struct Evaluator<'c, 'src> {
    pub(crate) ctx: &'c mut Context<'src>,
}

impl<'c, 'src> Evaluator<'c, 'src> {
    pub fn new(ctx: &'c mut Context<'src>) -> Evaluator<'c, 'src> {
        Evaluator { ctx }
    }

    pub fn context(&mut self) -> &mut Context<'src> {
        self.ctx
    }

    /// Evaluates a manifest's top-level statements.
    pub fn evaluate_tree(&mut self, tree: &'src SyntaxTree) -> Result<()> {
        for statement in &tree.statements {
            self.evaluate(statement)?;
        }
        Ok(())
    }

    /// Evaluates an EPP template against a fresh output stream, binding the
    /// template's parameter block from `arguments`, and returns the
    /// rendered text.
    pub fn evaluate_template(
        &mut self,
        template: &'src SyntaxTree,
        arguments: Option<ValueHash>,
    ) -> Result<String> {
        let arguments = arguments.unwrap_or_default();
        let template_span = template.source.span();
        self.ctx.push_stream();
        let result = self.with_local_scope(None, |ev| {
            match &template.parameters {
                Some(parameters) => {
                    ev.bind_parameters(parameters, &arguments, &template_span)?;
                }
                None => {
                    // Templates without a parameter block see the arguments
                    // as plain variables.
                    let scope = ev.ctx.current_scope();
                    for (key, value) in arguments.iter() {
                        if let Some(name) = key.as_string() {
                            let name = name.to_string();
                            ev.ctx
                                .scopes
                                .get_mut(scope)
                                .set(&name, Rc::new(value.clone()));
                        }
                    }
                }
            }
            ev.evaluate_body(&template.statements)
        });
        let rendered = self.ctx.pop_stream();
        result.map(|_| rendered)
    }

    /// Evaluates the node definition matching the context's node, if node
    /// definitions exist.
    pub fn evaluate_node(&mut self) -> Result<()> {
        let registry = self.ctx.registry();
        if !registry.has_nodes() {
            return Ok(());
        }
        let Some((definition, name)) = registry.find_node(self.ctx.node()) else {
            bail!(
                "could not find a default node or a node matching '{}'.",
                self.ctx.node().name()
            );
        };
        let expression = definition.expression();
        let stage = self.ctx.catalog().find("stage", "main");
        let id = self
            .ctx
            .catalog_mut()
            .add("node", &name, stage, expression.span.clone(), false, false)
            .ok_or_else(|| anyhow!("internal error: node resource already declared"))?;
        let scope = self
            .ctx
            .scopes
            .alloc("", Some(self.ctx.top_scope()), Some(id));
        self.ctx.set_node_scope(scope);
        let result = self.with_local_scope(Some(scope), |ev| ev.evaluate_body(&expression.body));
        self.ctx.clear_node_scope();
        result.map(|_| ())
    }

    // Scoped acquisitions. Each helper pushes on entry and pops after the
    // closure returns, on the value and error paths alike.

    pub(crate) fn with_match_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.ctx.push_match_scope();
        let result = f(self);
        self.ctx.pop_match_scope();
        result
    }

    /// Pushes a scope (a fresh ephemeral scope when none is given) together
    /// with a match scope, and pops both on exit.
    pub(crate) fn with_local_scope<T>(
        &mut self,
        scope: Option<ScopeId>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let scope = match scope {
            Some(scope) => scope,
            None => {
                let parent = self.ctx.current_scope();
                self.ctx.scopes.alloc("", Some(parent), None)
            }
        };
        self.ctx.push_match_scope();
        self.ctx.push_scope(scope);
        let result = f(self);
        self.ctx.pop_scope();
        self.ctx.pop_match_scope();
        result
    }

    /// Evaluates a block; the value of the block is the value of its last
    /// expression, or undef for an empty block.
    pub fn evaluate_body(&mut self, body: &'src [Expr]) -> Result<Value> {
        let mut result = Value::Undef;
        for expression in body {
            result = self.evaluate(expression)?;
        }
        Ok(result)
    }

    pub fn evaluate(&mut self, expression: &'src Expr) -> Result<Value> {
        match expression {
            Expr::Undef(_) => Ok(Value::Undef),
            Expr::Default(_) => Ok(Value::Default),
            Expr::Boolean(_, b) => Ok(Value::Boolean(*b)),
            Expr::Integer(_, i) => Ok(Value::Integer(*i)),
            Expr::Float(_, f) => Ok(Value::Float(*f)),
            Expr::String(_, s) | Expr::Name(_, s) => Ok(Value::from(s.as_str())),
            Expr::Regex(span, pattern) => {
                ValueRegex::new(pattern).map(Value::Regex).map_err(|e| span.error(e.to_string()))
            }
            Expr::Variable(span, name) => self.evaluate_variable(span, name),
            Expr::TypeRef(_, name) => Ok(Value::from(type_from_name(name))),
            Expr::Array { items, .. } => {
                let mut result = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.evaluate(item)?;
                    if item.is_splat() {
                        if let Some(unfolded) = value.as_array() {
                            result.extend(unfolded.iter().cloned());
                            continue;
                        }
                    }
                    result.push(value.into_dereferenced());
                }
                Ok(Value::from(result))
            }
            Expr::Hash { entries, .. } => {
                let mut hash = ValueHash::new();
                for (key, value) in entries {
                    let key = self.evaluate(key)?.into_dereferenced();
                    let value = self.evaluate(value)?.into_dereferenced();
                    hash.insert(key, value);
                }
                Ok(Value::from(hash))
            }
            Expr::Operation { first, rest, .. } => {
                let left = self.evaluate(first)?;
                let mut iter = rest.iter().peekable();
                self.climb(left, first.span(), 0, &mut iter)
            }
            Expr::Unary { op, operand, .. } => {
                let value = self.evaluate(operand)?;
                match op {
                    UnaryOp::Negate => operators::negate(&value, operand.span()),
                    UnaryOp::LogicalNot => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Splat => Ok(operators::splat(&value)),
                }
            }
            Expr::Case {
                conditional,
                propositions,
                ..
            } => self.with_match_scope(|ev| {
                let result = ev.evaluate(conditional)?;
                let mut default_index = None;
                for (i, proposition) in propositions.iter().enumerate() {
                    for option in &proposition.options {
                        let option_value = ev.evaluate(option)?;
                        if option_value.is_default() {
                            default_index = Some(i);
                            continue;
                        }
                        if option.is_splat() {
                            if let Some(elements) = option_value.as_array() {
                                let elements = elements.clone();
                                for element in elements.iter() {
                                    if ev.is_match(&result, element)? {
                                        return ev.evaluate_body(&proposition.body);
                                    }
                                }
                                continue;
                            }
                        }
                        if ev.is_match(&result, &option_value)? {
                            return ev.evaluate_body(&proposition.body);
                        }
                    }
                }
                match default_index {
                    Some(i) => ev.evaluate_body(&propositions[i].body),
                    None => Ok(Value::Undef),
                }
            }),
            Expr::If {
                conditional,
                body,
                elsifs,
                else_body,
                ..
            } => self.with_match_scope(|ev| {
                if ev.evaluate(conditional)?.is_truthy() {
                    return ev.evaluate_body(body);
                }
                for elsif in elsifs {
                    if ev.evaluate(&elsif.conditional)?.is_truthy() {
                        return ev.evaluate_body(&elsif.body);
                    }
                }
                match else_body {
                    Some(body) => ev.evaluate_body(body),
                    None => Ok(Value::Undef),
                }
            }),
            Expr::Unless {
                conditional,
                body,
                else_body,
                ..
            } => self.with_match_scope(|ev| {
                if !ev.evaluate(conditional)?.is_truthy() {
                    return ev.evaluate_body(body);
                }
                match else_body {
                    Some(body) => ev.evaluate_body(body),
                    None => Ok(Value::Undef),
                }
            }),
            Expr::Selector {
                span,
                operand,
                cases,
            } => {
                let value = self.evaluate(operand)?;
                self.with_match_scope(|ev| {
                    let mut default_index = None;
                    for (i, case) in cases.iter().enumerate() {
                        let option = ev.evaluate(&case.option)?;
                        if option.is_default() {
                            default_index = Some(i);
                            continue;
                        }
                        if case.option.is_splat() {
                            if let Some(elements) = option.as_array() {
                                let elements = elements.clone();
                                for element in elements.iter() {
                                    if ev.is_match(&value, element)? {
                                        return ev.evaluate(&case.result);
                                    }
                                }
                                continue;
                            }
                        }
                        if ev.is_match(&value, &option)? {
                            return ev.evaluate(&case.result);
                        }
                    }
                    match default_index {
                        Some(i) => ev.evaluate(&cases[i].result),
                        None => Err(span
                            .error(format!("no matching selector case for value '{value}'."))),
                    }
                })
            }
            Expr::Access {
                span,
                operand,
                arguments,
            } => {
                let value = self.evaluate(operand)?;
                let mut args = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    let arg_value = self.evaluate(argument)?;
                    if argument.is_splat() {
                        if let Some(unfolded) = arg_value.as_array() {
                            for item in unfolded.iter() {
                                args.push((item.clone(), argument.span().clone()));
                            }
                            continue;
                        }
                    }
                    args.push((arg_value.into_dereferenced(), argument.span().clone()));
                }
                access::evaluate(value, operand.span(), args, span)
            }
            Expr::FunctionCall {
                span,
                name,
                arguments,
                lambda,
            } => functions::dispatch(self, name, span, arguments, lambda.as_ref(), None),
            Expr::MethodCall {
                span,
                receiver,
                name,
                arguments,
                lambda,
            } => {
                let receiver_value = self.evaluate(receiver)?;
                functions::dispatch(
                    self,
                    name,
                    span,
                    arguments,
                    lambda.as_ref(),
                    Some((receiver_value, receiver.span(), receiver.is_splat())),
                )
            }
            Expr::Resource {
                span,
                form,
                type_expr,
                bodies,
            } => self.evaluate_resource(span, *form, type_expr, bodies),
            Expr::ResourceOverride {
                span,
                reference,
                attributes,
            } => self.evaluate_override(span, reference, attributes),
            Expr::Class(class) => {
                // Definitions are indexed by the registry scan; evaluating
                // one yields a reference to the class.
                let scope = self.ctx.current_scope();
                let qualified = self.ctx.scopes.get(scope).qualify(&class.name);
                Ok(Value::from(Type::class(&qualified)))
            }
            Expr::DefinedType(defined_type) => {
                let scope = self.ctx.current_scope();
                let qualified = self.ctx.scopes.get(scope).qualify(&defined_type.name);
                Ok(Value::from(Type::resource(&qualified)))
            }
            Expr::Node(_) => Ok(Value::Undef),
            Expr::Collector(collector) => {
                let registered = Collector {
                    query: CollectorQuery::Expression {
                        type_name: canonicalize_type_name(&collector.type_name),
                        exported: collector.kind == CollectorKind::Exported,
                        query: collector.query.as_ref(),
                    },
                    scope: self.ctx.current_scope(),
                    attributes: Vec::new(),
                    collected: HashSet::new(),
                };
                let index = self.ctx.add_collector(registered);
                Ok(Value::from(Type::Runtime(Some(index))))
            }
            Expr::EppRender { span, expression } => {
                let value = self.evaluate(expression)?;
                if !self.ctx.epp_write(&value.to_string()) {
                    bail!(span.error("EPP expressions are not allowed in this context."));
                }
                Ok(Value::Undef)
            }
            Expr::EppRenderBlock { span, body } => {
                let value = self.evaluate_body(body)?;
                if !self.ctx.epp_write(&value.to_string()) {
                    bail!(span.error("EPP expressions are not allowed in this context."));
                }
                Ok(Value::Undef)
            }
            Expr::EppRenderString { span, text } => {
                if !self.ctx.epp_write(text) {
                    bail!(span.error("EPP expressions are not allowed in this context."));
                }
                Ok(Value::Undef)
            }
        }
    }

    fn evaluate_variable(&mut self, span: &Span, name: &str) -> Result<Value> {
        if name.is_empty() {
            bail!(span.error("variable name cannot be empty."));
        }
        let value = if name.bytes().all(|b| b.is_ascii_digit()) {
            let index: usize = name
                .parse()
                .map_err(|_| span.error("match variable index is out of range."))?;
            self.ctx.lookup_match(index)
        } else {
            self.ctx.lookup_variable(name, span, true)
        };
        Ok(Value::variable(
            name,
            value.unwrap_or_else(|| Rc::new(Value::Undef)),
        ))
    }

    // Precedence climbing over a flat operand chain.
    fn climb(
        &mut self,
        mut left: Value,
        left_span: &'src Span,
        min_precedence: u8,
        iter: &mut core::iter::Peekable<core::slice::Iter<'src, BinaryOperand>>,
    ) -> Result<Value> {
        while let Some(next) = iter.peek() {
            let op = next.op;
            let precedence = operators::precedence(op);
            if precedence < min_precedence {
                break;
            }
            let Some(operand) = iter.next() else { break };

            // Short-circuit: when the left side decides a logical operator,
            // the right operand is consumed without being evaluated.
            if (op == BinaryOp::And && !left.is_truthy())
                || (op == BinaryOp::Or && left.is_truthy())
            {
                left = Value::Boolean(op == BinaryOp::Or);
                let skip_above = precedence + 1;
                while let Some(following) = iter.peek() {
                    if operators::precedence(following.op) >= skip_above {
                        iter.next();
                    } else {
                        break;
                    }
                }
                continue;
            }

            let right = self.evaluate(&operand.operand)?;
            let next_precedence = precedence + u8::from(!operators::is_right_associative(op));
            let right = self.climb(right, operand.operand.span(), next_precedence, iter)?;
            left = self.apply_binary(
                left,
                left_span,
                op,
                &operand.op_span,
                right,
                operand.operand.span(),
            )?;
        }
        Ok(left)
    }

    fn apply_binary(
        &mut self,
        left: Value,
        left_span: &Span,
        op: BinaryOp,
        op_span: &Span,
        right: Value,
        right_span: &Span,
    ) -> Result<Value> {
        match op {
            BinaryOp::Assignment => self.assign(left, right, left_span, op_span),
            // A non-short-circuited logical operator is decided by its
            // right operand.
            BinaryOp::And | BinaryOp::Or => Ok(Value::Boolean(right.is_truthy())),
            BinaryOp::Match => self.match_operator(&left, &right, right_span, false),
            BinaryOp::NotMatch => self.match_operator(&left, &right, right_span, true),
            BinaryOp::InEdge => {
                self.queue_relationship(Relationship::Before, left, left_span, &right, right_span);
                Ok(right)
            }
            BinaryOp::InEdgeSubscribe => {
                self.queue_relationship(Relationship::Notify, left, left_span, &right, right_span);
                Ok(right)
            }
            BinaryOp::OutEdge => {
                self.queue_reverse_relationship(
                    Relationship::Before,
                    left,
                    left_span,
                    &right,
                    right_span,
                );
                Ok(right)
            }
            BinaryOp::OutEdgeSubscribe => {
                self.queue_reverse_relationship(
                    Relationship::Notify,
                    left,
                    left_span,
                    &right,
                    right_span,
                );
                Ok(right)
            }
            _ => operators::binary(op, &left, left_span, &right, right_span),
        }
    }

    fn queue_relationship(
        &mut self,
        relationship: Relationship,
        source: Value,
        source_span: &Span,
        target: &Value,
        target_span: &Span,
    ) {
        self.ctx.add_relationship(ResourceRelationship {
            relationship,
            source: source.into_dereferenced(),
            source_span: source_span.clone(),
            target: target.clone().into_dereferenced(),
            target_span: target_span.clone(),
        });
    }

    fn queue_reverse_relationship(
        &mut self,
        relationship: Relationship,
        target: Value,
        target_span: &Span,
        source: &Value,
        source_span: &Span,
    ) {
        self.ctx.add_relationship(ResourceRelationship {
            relationship,
            source: source.clone().into_dereferenced(),
            source_span: source_span.clone(),
            target: target.into_dereferenced(),
            target_span: target_span.clone(),
        });
    }

    fn assign(
        &mut self,
        left: Value,
        right: Value,
        left_span: &Span,
        op_span: &Span,
    ) -> Result<Value> {
        let Value::Variable(variable) = &left else {
            bail!(left_span.error("assignment must be to a variable."));
        };
        let name = variable.name.as_ref();
        if name.bytes().all(|b| b.is_ascii_digit()) {
            bail!(left_span.error(format!("cannot assign to match variable ${name}.")));
        }
        if name.contains("::") {
            bail!(left_span.error(format!(
                "cannot assign to ${name}: assignment to qualified variables is not allowed."
            )));
        }
        let scope = self.ctx.current_scope();
        let value = Rc::new(right.clone().into_dereferenced());
        if !self.ctx.scopes.get_mut(scope).set(name, value) {
            bail!(op_span.error(format!(
                "cannot assign to ${name}: the variable was previously assigned in this scope."
            )));
        }
        Ok(right)
    }

    /// The equal-or-regex-match rule used by case and selector options.
    pub(crate) fn is_match(&mut self, actual: &Value, expected: &Value) -> Result<bool> {
        if let Some(regex) = expected.as_regex() {
            return Ok(self.regex_match(actual, &regex.clone()));
        }
        Ok(actual == expected)
    }

    fn regex_match(&mut self, value: &Value, regex: &ValueRegex) -> bool {
        let Some(s) = value.as_string() else {
            return false;
        };
        match regex.regex().captures(s) {
            Some(captures) => {
                self.ctx.set_matches(operators::capture_values(&captures));
                true
            }
            None => false,
        }
    }

    fn match_operator(
        &mut self,
        left: &Value,
        right: &Value,
        right_span: &Span,
        negate: bool,
    ) -> Result<Value> {
        let matched = match right.dereference() {
            Value::Regex(regex) => {
                let regex = regex.clone();
                self.regex_match(left, &regex)
            }
            Value::String(pattern) => {
                let regex = ValueRegex::new(pattern).map_err(|e| right_span.error(e.to_string()))?;
                self.regex_match(left, &regex)
            }
            Value::Type(t) => t.is_instance(left),
            other => bail!(right_span.error(format!(
                "expected Regexp, String, or Type for match but found {}.",
                other.type_name()
            ))),
        };
        Ok(Value::Boolean(matched != negate))
    }

    // Resource expressions

    fn evaluate_resource(
        &mut self,
        span: &'src Span,
        form: ResourceForm,
        type_expr: &'src Expr,
        bodies: &'src [ResourceBody],
    ) -> Result<Value> {
        let type_value = self.evaluate(type_expr)?;
        let mut type_name = String::new();
        if let Some(s) = type_value.as_string() {
            type_name = s.to_string();
        } else if let Some(t) = type_value.as_type() {
            if let Type::Resource {
                type_name: name,
                title,
            } = t.as_ref()
            {
                if title.is_empty() {
                    type_name = name.to_string();
                }
            }
        }
        if type_name.is_empty() {
            bail!(type_expr.span().error(format!(
                "expected String or qualified Resource for resource type but found {}.",
                type_value.type_name()
            )));
        }
        let canonical = canonicalize_type_name(&type_name);
        let is_class = canonical == "Class";

        if is_class && form == ResourceForm::Virtual {
            bail!(span.error("classes cannot be virtual resources."));
        }
        if is_class && form == ResourceForm::Exported {
            bail!(span.error("classes cannot be exported resources."));
        }

        // The default body's attributes apply to every other body.
        let mut defaults = Vec::new();
        let mut default_seen = false;
        for body in bodies {
            if matches!(body.title, Expr::Default(_)) {
                if default_seen {
                    bail!(body
                        .span
                        .error("only one default body is supported in a resource expression."));
                }
                default_seen = true;
                defaults = self.evaluate_attributes(is_class, &body.attributes)?;
            }
        }

        let registry = self.ctx.registry();
        let definition = if !is_class && !is_builtin_type(&canonical) {
            match registry.find_defined_type(&type_name.to_lowercase()) {
                Some(definition) => Some(definition),
                None => bail!(type_expr
                    .span()
                    .error(format!("type '{canonical}' has not been defined."))),
            }
        } else {
            None
        };

        let is_exported = form == ResourceForm::Exported;
        let is_virtual = is_exported || form == ResourceForm::Virtual;
        let container = if is_class {
            None
        } else {
            self.ctx.scopes.containing_resource(self.ctx.current_scope())
        };

        let mut declared = Vec::new();
        let mut class_titles = Vec::new();
        for body in bodies {
            if matches!(body.title, Expr::Default(_)) {
                continue;
            }
            let title_value = self.evaluate(&body.title)?;
            let attributes = self.evaluate_attributes(is_class, &body.attributes)?;

            let mut titles = Vec::new();
            match title_value.dereference() {
                Value::String(s) => titles.push(s.to_string()),
                Value::Array(items) => {
                    for item in items.iter() {
                        match item.as_string() {
                            Some(s) => titles.push(s.to_string()),
                            None => bail!(body.span.error(
                                "expected String or an array of String for resource title."
                            )),
                        }
                    }
                }
                _ => bail!(body
                    .span
                    .error("expected String or an array of String for resource title.")),
            }

            for title in titles {
                if title.is_empty() {
                    bail!(body.span.error("resource title cannot be empty."));
                }
                let title = if is_class {
                    normalize_class_name(&title)
                } else {
                    title
                };
                let id = match self.ctx.catalog_mut().add(
                    &canonical,
                    &title,
                    container,
                    body.span.clone(),
                    is_virtual,
                    is_exported,
                ) {
                    Some(id) => id,
                    None => {
                        let previous = self
                            .ctx
                            .catalog()
                            .find(&canonical, &title)
                            .map(|id| self.ctx.catalog().get(id).span().location())
                            .unwrap_or_default();
                        bail!(body.span.error(format!(
                            "resource {canonical}[{title}] was previously declared at {previous}."
                        )));
                    }
                };
                self.set_resource_attributes(id, &defaults)?;
                self.set_resource_attributes(id, &attributes)?;
                if let Some(definition) = definition {
                    self.ctx.add_defined_type(DeclaredDefinedType {
                        resource: id,
                        name: definition.name().to_string(),
                        definition: definition.expression(),
                        evaluated: false,
                    });
                }
                self.ctx.evaluate_overrides(&canonical, &title)?;
                declared.push(Value::from(self.ctx.catalog().get(id).reference()));
                if is_class {
                    class_titles.push((title, body.span.clone()));
                }
            }
        }

        // Classes are declared now; defined types are evaluated when the
        // context is finalized.
        for (title, title_span) in class_titles {
            self.declare_class(&title, &title_span)?;
        }
        Ok(Value::from(declared))
    }

    /// Applies evaluated attributes to a newly declared resource; only the
    /// assignment form is legal inside a resource body.
    fn set_resource_attributes(
        &mut self,
        id: ResourceId,
        attributes: &[(AttributeOp, Rc<Attribute>)],
    ) -> Result<()> {
        for (op, attribute) in attributes {
            if *op != AttributeOp::Assignment {
                bail!(attribute.name_span.error(format!(
                    "illegal attribute operation '{op}': only '=>' is supported in a resource expression.",
                    op = AttributeOp::Append
                )));
            }
            if attribute.name == "tag" {
                for tag in attribute.value.to_array() {
                    if let Some(tag) = tag.as_string() {
                        let tag = tag.to_string();
                        self.ctx.catalog_mut().get_mut(id).tag(tag);
                    }
                }
            }
            self.ctx
                .catalog_mut()
                .get_mut(id)
                .apply(attribute.clone(), AttributeOp::Assignment)?;
        }
        Ok(())
    }

    fn evaluate_attributes(
        &mut self,
        is_class: bool,
        expressions: &'src [AttributeExpr],
    ) -> Result<Vec<(AttributeOp, Rc<Attribute>)>> {
        let mut names: HashSet<String> = HashSet::new();
        let mut attributes = Vec::with_capacity(expressions.len());
        for expression in expressions {
            let name = expression.name.as_str();

            if name == "title" {
                bail!(expression
                    .name_span
                    .error("title is not a valid parameter name."));
            }

            // An attribute named '*' takes a hash and expands into one
            // attribute per key.
            if name == "*" {
                let value = self.evaluate(&expression.value)?;
                let Some(hash) = value.as_hash() else {
                    bail!(expression.value.span().error(format!(
                        "expected a Hash for attribute expansion but found {}.",
                        value.type_name()
                    )));
                };
                for (key, item) in hash.iter() {
                    let Some(key) = key.as_string() else {
                        bail!(expression.value.span().error(format!(
                            "expected all keys in hash to be String but found {}.",
                            key.type_name()
                        )));
                    };
                    if !names.insert(key.to_string()) {
                        bail!(expression
                            .value
                            .span()
                            .error(format!("attribute '{key}' already exists in the list.")));
                    }
                    let item =
                        validate_attribute(key, item.clone(), expression.value.span())?;
                    attributes.push((
                        expression.op,
                        Rc::new(Attribute {
                            name: key.to_string(),
                            name_span: expression.name_span.clone(),
                            value: item,
                            value_span: expression.value.span().clone(),
                        }),
                    ));
                }
                continue;
            }

            if !is_class && name == "stage" {
                bail!(expression
                    .name_span
                    .error("attribute 'stage' is only valid for classes."));
            }
            if !names.insert(name.to_string()) {
                bail!(expression
                    .name_span
                    .error(format!("attribute '{name}' already exists in the list.")));
            }

            let value = self.evaluate(&expression.value)?.into_dereferenced();
            let value = validate_attribute(name, value, expression.value.span())?;
            attributes.push((
                expression.op,
                Rc::new(Attribute {
                    name: name.to_string(),
                    name_span: expression.name_span.clone(),
                    value,
                    value_span: expression.value.span().clone(),
                }),
            ));
        }
        Ok(attributes)
    }

    fn evaluate_override(
        &mut self,
        span: &'src Span,
        reference: &'src Expr,
        attributes: &'src [AttributeExpr],
    ) -> Result<Value> {
        let reference_value = self.evaluate(reference)?;
        let attributes = self.evaluate_attributes(false, attributes)?;
        let scope = self.ctx.current_scope();

        let mut queue_for = |ev: &mut Self, t: &Type| -> Result<()> {
            match t {
                Type::Class(_) => {
                    bail!(span.error("cannot override attributes of a class resource."))
                }
                Type::Resource { type_name, title } => {
                    if type_name.is_empty() || title.is_empty() {
                        bail!(span.error(
                            "expected a fully qualified resource reference for an override."
                        ));
                    }
                    ev.ctx.add_override(ResourceOverride {
                        type_name: type_name.to_string(),
                        title: title.to_string(),
                        span: span.clone(),
                        attributes: attributes.clone(),
                        scope,
                    })
                }
                other => bail!(span.error(format!(
                    "expected qualified Resource for resource reference but found {other}."
                ))),
            }
        };

        if let Some(items) = reference_value.as_array() {
            let items = items.clone();
            for item in items.iter() {
                match item.as_type() {
                    Some(t) => queue_for(self, t)?,
                    None => bail!(span.error(format!(
                        "expected qualified Resource for array element but found {}.",
                        item.type_name()
                    ))),
                }
            }
        } else if let Some(t) = reference_value.as_type() {
            // A collector value chains the attributes onto every resource
            // the collector goes on to collect.
            if let Type::Runtime(Some(index)) = t.as_ref() {
                let index = *index;
                if let Some(collector) = self.ctx.collectors.get_mut(index) {
                    collector.attributes = attributes;
                }
                return Ok(reference_value);
            }
            let t = t.clone();
            queue_for(self, &t)?;
        } else {
            bail!(span.error(format!(
                "expected qualified Resource for resource reference but found {}.",
                reference_value.type_name()
            )));
        }
        Ok(reference_value)
    }

    // Classes and defined types

    /// Declares a class: creates its `Class[name]` resource, establishes
    /// the class scope beneath the evaluated parent, and evaluates every
    /// definition body. Subsequent declarations return the existing
    /// resource; the body never evaluates twice.
    pub fn declare_class(&mut self, name: &str, span: &Span) -> Result<ResourceId> {
        let name = normalize_class_name(name);
        if name.is_empty() {
            bail!(span.error("expected a class name."));
        }
        if self.ctx.is_class_declared(&name) {
            if let Some(id) = self.ctx.catalog().find("class", &name) {
                return Ok(id);
            }
        }
        let registry = self.ctx.registry();
        let Some(definitions) = registry.find_class(&name) else {
            bail!(span.error(format!(
                "cannot evaluate class '{name}' because it has not been defined."
            )));
        };

        let container = self.ctx.scopes.containing_resource(self.ctx.current_scope());
        let id = match self.ctx.catalog().find("class", &name) {
            Some(id) => {
                // The resource expression that created the class left it
                // uncontained; declaration records the containment edge.
                if let Some(container) = container {
                    if self.ctx.catalog().get(id).container().is_none() {
                        self.ctx.catalog_mut().add_containment(container, id);
                    }
                }
                id
            }
            None => self
                .ctx
                .catalog_mut()
                .add("class", &name, container, span.clone(), false, false)
                .ok_or_else(|| anyhow!("internal error: class resource already declared"))?,
        };
        self.ctx.mark_class_declared(&name);

        // Establish the parent chain before the class's own scope.
        let mut parent_scope = self.ctx.top_scope();
        if let Some(parent) = definitions
            .iter()
            .find_map(|d| d.expression().parent.clone())
        {
            let parent_name = normalize_class_name(&parent);
            self.declare_class(&parent_name, span)?;
            if let Some(scope) = self.ctx.find_scope(&parent_name) {
                parent_scope = scope;
            }
        }

        let scope = self.ctx.scopes.alloc(name.clone(), Some(parent_scope), Some(id));
        self.ctx.add_scope(&name, scope);
        {
            let class_scope = self.ctx.scopes.get_mut(scope);
            class_scope.set("title", Rc::new(Value::from(name.as_str())));
            class_scope.set("name", Rc::new(Value::from(name.as_str())));
        }

        for (index, definition) in definitions.iter().enumerate() {
            let expression = definition.expression();
            self.with_local_scope(Some(scope), |ev| {
                if index == 0 {
                    let arguments = ev.arguments_from_resource(id, &expression.parameters)?;
                    ev.bind_parameters(&expression.parameters, &arguments, span)?;
                }
                ev.evaluate_body(&expression.body)
            })?;
        }
        Ok(id)
    }

    /// Collects a resource's non-metaparameter attributes as arguments for
    /// parameter binding, rejecting attributes that match no parameter.
    fn arguments_from_resource(
        &mut self,
        id: ResourceId,
        parameters: &[Parameter],
    ) -> Result<ValueHash> {
        let mut arguments = ValueHash::new();
        let resource = self.ctx.catalog().get(id);
        for attribute in resource.attributes() {
            if METAPARAMETERS.contains(&attribute.name.as_str()) {
                continue;
            }
            if parameters.iter().any(|p| p.name == attribute.name) {
                arguments.insert(
                    Value::from(attribute.name.as_str()),
                    attribute.value.clone(),
                );
            } else {
                bail!(attribute
                    .name_span
                    .error(format!("'{}' is not a valid parameter.", attribute.name)));
            }
        }
        Ok(arguments)
    }

    /// Binds parameters into the current scope: explicit argument, then the
    /// default expression, then an error for a missing required parameter.
    /// Typed parameters validate the bound value.
    pub(crate) fn bind_parameters(
        &mut self,
        parameters: &'src [Parameter],
        arguments: &ValueHash,
        span: &Span,
    ) -> Result<()> {
        for parameter in parameters {
            let key = Value::from(parameter.name.as_str());
            // An explicit undef argument falls back to the default as if the
            // argument were absent.
            let value = match arguments.get(&key) {
                Some(value) if !value.is_undef() => value.clone(),
                provided => match &parameter.default {
                    Some(default) => self.evaluate(default)?.into_dereferenced(),
                    None if provided.is_some() => Value::Undef,
                    None => bail!(parameter.span.error(format!(
                        "parameter ${} is required but no value was given.",
                        parameter.name
                    ))),
                },
            };
            if let Some(type_expr) = &parameter.type_expr {
                let declared = self.evaluate(type_expr)?;
                let Some(declared) = declared.as_type() else {
                    bail!(type_expr.span().error(format!(
                        "expected Type for parameter ${} but found {}.",
                        parameter.name,
                        declared.type_name()
                    )));
                };
                if !declared.is_instance(&value) {
                    bail!(parameter.span.error(format!(
                        "expected {declared} for parameter ${} but found {}.",
                        parameter.name,
                        value.type_name()
                    )));
                }
            }
            let scope = self.ctx.current_scope();
            if !self
                .ctx
                .scopes
                .get_mut(scope)
                .set(&parameter.name, Rc::new(value))
            {
                bail!(parameter.span.error(format!(
                    "parameter ${} was previously assigned in this scope.",
                    parameter.name
                )));
            }
        }
        for key in arguments.keys() {
            if let Some(name) = key.as_string() {
                if !parameters.iter().any(|p| p.name.as_str() == name.as_ref()) {
                    bail!(span.error(format!("'{name}' is not a valid parameter.")));
                }
            }
        }
        Ok(())
    }

    /// Invokes a lambda with positional arguments in a fresh ephemeral
    /// scope; missing trailing arguments fall back to parameter defaults.
    pub fn yield_lambda(
        &mut self,
        lambda: &'src crate::ast::Lambda,
        arguments: Vec<Value>,
    ) -> Result<Value> {
        self.with_local_scope(None, |ev| {
            for (index, parameter) in lambda.parameters.iter().enumerate() {
                let value = match arguments.get(index) {
                    Some(value) => value.clone().into_dereferenced(),
                    None => match &parameter.default {
                        Some(default) => ev.evaluate(default)?.into_dereferenced(),
                        None => bail!(parameter.span.error(format!(
                            "parameter ${} is required but no value was given.",
                            parameter.name
                        ))),
                    },
                };
                if let Some(type_expr) = &parameter.type_expr {
                    let declared = ev.evaluate(type_expr)?;
                    let Some(declared) = declared.as_type() else {
                        bail!(type_expr.span().error(format!(
                            "expected Type for parameter ${} but found {}.",
                            parameter.name,
                            declared.type_name()
                        )));
                    };
                    if !declared.is_instance(&value) {
                        bail!(parameter.span.error(format!(
                            "expected {declared} for parameter ${} but found {}.",
                            parameter.name,
                            value.type_name()
                        )));
                    }
                }
                let scope = ev.ctx.current_scope();
                if !ev
                    .ctx
                    .scopes
                    .get_mut(scope)
                    .set(&parameter.name, Rc::new(value))
                {
                    bail!(parameter.span.error(format!(
                        "parameter ${} was previously assigned in this scope.",
                        parameter.name
                    )));
                }
            }
            ev.evaluate_body(&lambda.body)
        })
    }

    fn evaluate_defined_type(&mut self, index: usize) -> Result<()> {
        let entry = &self.ctx.defined_types[index];
        let id = entry.resource;
        let definition = entry.definition;
        let resource = self.ctx.catalog().get(id);
        let title = resource.title().to_string();

        let scope = self
            .ctx
            .scopes
            .alloc("", Some(self.ctx.node_or_top()), Some(id));
        {
            let type_scope = self.ctx.scopes.get_mut(scope);
            type_scope.set("title", Rc::new(Value::from(title.as_str())));
            type_scope.set("name", Rc::new(Value::from(title.as_str())));
        }
        self.with_local_scope(Some(scope), |ev| {
            let arguments = ev.arguments_from_resource(id, &definition.parameters)?;
            ev.bind_parameters(&definition.parameters, &arguments, &definition.span)?;
            ev.evaluate_body(&definition.body)
        })
        .map(|_| ())
    }

    // Finalization

    /// Discharges the deferred work to a fixed point: collectors, then
    /// declared defined types, then overrides, repeated while any pass
    /// produces work; then relationships. Bounded to guard against
    /// pathological manifests.
    pub fn finalize(&mut self) -> Result<()> {
        let mut passes = 0u32;
        loop {
            passes += 1;
            if passes > FINALIZE_ITERATION_LIMIT {
                bail!(
                    "catalog finalization did not converge after {FINALIZE_ITERATION_LIMIT} passes."
                );
            }
            let mut work = self.run_collectors()?;
            work |= self.run_defined_types()?;
            work |= self.run_overrides()?;
            if !work {
                break;
            }
        }

        // Anything still queued targets a resource that was never declared.
        if let Some(remaining) = self.ctx.overrides.first() {
            bail!(remaining.span.error(format!(
                "resource {}[{}] does not exist in the catalog.",
                remaining.type_name, remaining.title
            )));
        }
        self.detect_uncollected()?;
        self.run_relationships()
    }

    fn run_collectors(&mut self) -> Result<bool> {
        let mut work = false;
        let mut index = 0;
        while index < self.ctx.collectors.len() {
            match &self.ctx.collectors[index].query {
                CollectorQuery::Expression {
                    type_name,
                    exported,
                    query,
                } => {
                    let type_name = type_name.clone();
                    let exported = *exported;
                    let query = *query;
                    let scope = self.ctx.collectors[index].scope;
                    work |= self.run_query_collector(index, &type_name, exported, query, scope)?;
                }
                CollectorQuery::List(_) => {
                    work |= self.run_list_collector(index)?;
                }
            }
            index += 1;
        }
        Ok(work)
    }

    fn run_query_collector(
        &mut self,
        index: usize,
        type_name: &str,
        exported: bool,
        query: Option<&'src Query>,
        scope: ScopeId,
    ) -> Result<bool> {
        let mut work = false;
        let candidates: Vec<ResourceId> = self
            .ctx
            .catalog()
            .resources()
            .filter(|(_, r)| r.type_name() == type_name)
            .filter(|(_, r)| !exported || r.is_exported())
            .map(|(id, _)| id)
            .collect();

        for id in candidates {
            if self.ctx.collectors[index].collected.contains(&id) {
                continue;
            }
            if let Some(query) = query {
                if !self.match_query(id, query, scope)? {
                    continue;
                }
            }
            self.ctx.collectors[index].collected.insert(id);
            if self.ctx.catalog().get(id).is_virtual() {
                self.ctx.catalog_mut().get_mut(id).realize();
                if let Some(container) = self.ctx.scopes.containing_resource(scope) {
                    self.ctx.catalog_mut().add_containment(container, id);
                }
                work = true;
            }
            let attributes = self.ctx.collectors[index].attributes.clone();
            for (op, attribute) in attributes {
                self.ctx
                    .catalog_mut()
                    .get_mut(id)
                    .apply(attribute, op)?;
            }
        }
        Ok(work)
    }

    fn run_list_collector(&mut self, index: usize) -> Result<bool> {
        let CollectorQuery::List(entries) = &mut self.ctx.collectors[index].query else {
            return Ok(false);
        };
        let entries = std::mem::take(entries);
        let scope = self.ctx.collectors[index].scope;
        let mut remaining = Vec::new();
        let mut work = false;
        for (reference, span) in entries {
            match self.ctx.catalog().find_type(&reference) {
                Some(id) => {
                    self.ctx.collectors[index].collected.insert(id);
                    if self.ctx.catalog().get(id).is_virtual() {
                        self.ctx.catalog_mut().get_mut(id).realize();
                        if let Some(container) = self.ctx.scopes.containing_resource(scope) {
                            self.ctx.catalog_mut().add_containment(container, id);
                        }
                        work = true;
                    }
                }
                None => remaining.push((reference, span)),
            }
        }
        if let CollectorQuery::List(list) = &mut self.ctx.collectors[index].query {
            *list = remaining;
        }
        Ok(work)
    }

    fn match_query(&mut self, id: ResourceId, query: &'src Query, scope: ScopeId) -> Result<bool> {
        match query {
            Query::And(left, right) => {
                Ok(self.match_query(id, left, scope)? && self.match_query(id, right, scope)?)
            }
            Query::Or(left, right) => {
                Ok(self.match_query(id, left, scope)? || self.match_query(id, right, scope)?)
            }
            Query::Attribute {
                name, op, value, ..
            } => {
                let expected = self
                    .with_local_scope(Some(scope), |ev| ev.evaluate(value))?
                    .into_dereferenced();
                let resource = self.ctx.catalog().get(id);
                let matched = if name == "title" {
                    Value::from(resource.title()) == expected
                } else {
                    match resource.value_of(name) {
                        // An array-valued attribute matches when it
                        // contains the expected value.
                        Some(actual) => match actual.as_array() {
                            Some(items) => {
                                items.iter().any(|item| *item == expected) || *actual == expected
                            }
                            None => *actual == expected,
                        },
                        None => false,
                    }
                };
                Ok(match op {
                    QueryOp::Equals => matched,
                    QueryOp::NotEquals => !matched,
                })
            }
        }
    }

    /// Walks the declared defined types, evaluating every entry that is not
    /// yet evaluated and no longer virtual. Evaluating a body may append
    /// more declarations; they are picked up in the same pass.
    fn run_defined_types(&mut self) -> Result<bool> {
        let mut work = false;
        let mut index = 0;
        while index < self.ctx.defined_types.len() {
            let entry = &self.ctx.defined_types[index];
            if !entry.evaluated && !self.ctx.catalog().get(entry.resource).is_virtual() {
                self.ctx.defined_types[index].evaluated = true;
                self.evaluate_defined_type(index)?;
                work = true;
            }
            index += 1;
        }
        Ok(work)
    }

    fn run_overrides(&mut self) -> Result<bool> {
        let mut work = false;
        let queue = std::mem::take(&mut self.ctx.overrides);
        let mut remaining = Vec::new();
        for resource_override in queue {
            if self.ctx.try_apply_override(&resource_override)? {
                work = true;
            } else {
                remaining.push(resource_override);
            }
        }
        self.ctx.overrides.extend(remaining);
        Ok(work)
    }

    /// A list collector with uncollected references is a user error; report
    /// the first missing resource.
    fn detect_uncollected(&self) -> Result<()> {
        for collector in &self.ctx.collectors {
            if let CollectorQuery::List(remaining) = &collector.query {
                if let Some((reference, span)) = remaining.first() {
                    bail!(span
                        .error(format!("resource {reference} does not exist in the catalog.")));
                }
            }
        }
        Ok(())
    }

    fn run_relationships(&mut self) -> Result<()> {
        for relationship in std::mem::take(&mut self.ctx.relationships) {
            let sources = reference_list(&relationship.source);
            if sources.is_empty() {
                bail!(relationship.source_span.error(format!(
                    "expected a resource reference for relationship source but found {}.",
                    relationship.source.type_name()
                )));
            }
            let targets = reference_list(&relationship.target);
            if targets.is_empty() {
                bail!(relationship.target_span.error(format!(
                    "expected a resource reference for relationship target but found {}.",
                    relationship.target.type_name()
                )));
            }
            for source in &sources {
                let source_id = self.ctx.catalog().find_type(source).ok_or_else(|| {
                    relationship
                        .source_span
                        .error(format!("resource {source} does not exist in the catalog."))
                })?;
                for target in &targets {
                    let target_id = self.ctx.catalog().find_type(target).ok_or_else(|| {
                        relationship
                            .target_span
                            .error(format!("resource {target} does not exist in the catalog."))
                    })?;
                    self.ctx.catalog_mut().add_relationship(Edge {
                        source: source_id,
                        target: target_id,
                        relationship: relationship.relationship,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Validates metaparameter values on assignment, wrapping single values to
/// arrays where the metaparameter is array-valued.
fn validate_attribute(name: &str, value: Value, span: &Span) -> Result<Value> {
    if value.is_undef() {
        return Ok(value);
    }
    let (expected, wrap) = match name {
        "alias" | "tag" => (Type::array(Type::string()), true),
        "audit" => (
            Type::Variant(vec![Type::string(), Type::array(Type::string())]),
            false,
        ),
        "before" | "notify" | "require" | "subscribe" => (
            Type::array(Type::Variant(vec![Type::string(), Type::CatalogEntry])),
            true,
        ),
        "loglevel" => (
            Type::Enum(
                crate::Level::NAMES
                    .iter()
                    .map(|n| Rc::from(*n))
                    .collect(),
            ),
            false,
        ),
        "noop" => (Type::Boolean, false),
        "schedule" | "stage" => (Type::string(), false),
        _ => return Ok(value),
    };
    let found = value.type_name();
    let value = if wrap && value.as_array().is_none() {
        Value::from(vec![value])
    } else {
        value
    };
    if !expected.is_instance(&value) {
        bail!(span.error(format!(
            "expected {expected} for attribute '{name}' but found {found}."
        )));
    }
    Ok(value)
}

/// Resolves a bare type reference name. Known names map to the built-in
/// types; an unknown name denotes a resource type.
pub(crate) fn type_from_name(name: &str) -> Type {
    match name {
        "Any" => Type::Any,
        "Array" => Type::array(Type::Data),
        "Boolean" => Type::Boolean,
        "Callable" => Type::Callable {
            params: vec![],
            block: None,
        },
        "CatalogEntry" => Type::CatalogEntry,
        "Class" => Type::Class(None),
        "Collection" => Type::Collection,
        "Data" => Type::Data,
        "Default" => Type::Default,
        "Enum" => Type::Enum(vec![]),
        "Float" => Type::float_unbounded(),
        "Hash" => Type::hash(Type::Scalar, Type::Data),
        "Integer" => Type::integer_unbounded(),
        "NotUndef" => Type::NotUndef(None),
        "Numeric" => Type::Numeric,
        "Optional" => Type::Optional(None),
        "Pattern" => Type::Pattern(vec![]),
        "Regexp" => Type::Regexp(None),
        "Resource" => Type::resource(""),
        "Runtime" => Type::Runtime(None),
        "Scalar" => Type::Scalar,
        "String" => Type::string(),
        "Struct" => Type::Struct(vec![]),
        "Tuple" => Type::Tuple {
            types: vec![],
            from: i64::MIN,
            to: i64::MAX,
        },
        "Type" => Type::Type(None),
        "Undef" => Type::Undef,
        "Variant" => Type::Variant(vec![]),
        other => Type::resource(other),
    }
}
