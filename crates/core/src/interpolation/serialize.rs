//! Render an [`Ast`] back to source text.
//!
//! For well-formed input, `parse(to_source(parse(s)))` yields the same tree.

use std::fmt::Write;

use serde_json::Value;

use super::ast::{Ast, Expr, Formatter, Node, PathSegment};

pub fn to_source(ast: &Ast) -> String {
    let mut out = String::new();
    write_nodes(&mut out, &ast.nodes);
    out
}

fn write_nodes(out: &mut String, nodes: &[Node]) {
    for node in nodes {
        match node {
            Node::Literal { text } => out.push_str(&text.replace('@', "@@")),
            Node::VariableRef(r) => {
                out.push('@');
                out.push_str(&r.name);
                write_path(out, &r.path);
                for f in &r.formatters {
                    out.push('|');
                    write_formatter(out, f);
                }
            }
            Node::Conditional { cond, then_branch, else_branch } => {
                out.push_str("{{#if ");
                write_expr(out, cond);
                out.push_str("}}");
                write_nodes(out, then_branch);
                if !else_branch.is_empty() {
                    out.push_str("{{else}}");
                    write_nodes(out, else_branch);
                }
                out.push_str("{{/if}}");
            }
            Node::Expression { expr, formatters } => {
                out.push_str("{{ ");
                write_expr(out, expr);
                for f in formatters {
                    out.push_str(" | ");
                    write_formatter(out, f);
                }
                out.push_str(" }}");
            }
        }
    }
}

fn write_path(out: &mut String, path: &[PathSegment]) {
    for segment in path {
        match segment {
            PathSegment::Field(name) => {
                out.push('.');
                out.push_str(name);
            }
            PathSegment::Index(i) => {
                let _ = write!(out, "[{i}]");
            }
            PathSegment::Key(key) => {
                out.push('[');
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(']');
            }
        }
    }
}

fn write_formatter(out: &mut String, f: &Formatter) {
    out.push_str(&f.name);
    if f.args.is_empty() {
        return;
    }
    let args: Vec<String> = f.args.iter().map(Value::to_string).collect();
    let _ = write!(out, "({})", args.join(", "));
}

fn write_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Literal { value } => out.push_str(&value.to_string()),
        Expr::Var { name, path } => {
            out.push('@');
            out.push_str(name);
            write_path(out, path);
        }
        Expr::Op { op, operands } if op.is_unary() => {
            out.push_str(op.symbol());
            if let Some(operand) = operands.first() {
                write_operand(out, operand);
            }
        }
        Expr::Op { op, operands } => {
            for (i, operand) in operands.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, " {} ", op.symbol());
                }
                write_operand(out, operand);
            }
        }
    }
}

fn write_operand(out: &mut String, expr: &Expr) {
    if matches!(expr, Expr::Op { .. }) {
        out.push('(');
        write_expr(out, expr);
        out.push(')');
    } else {
        write_expr(out, expr);
    }
}
