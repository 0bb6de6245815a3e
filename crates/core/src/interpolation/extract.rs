use std::collections::BTreeSet;

use super::ast::{Ast, Expr, Node};

/// Names of every variable referenced anywhere in the tree, including
/// conditions and both branches of conditionals.
pub fn extract_variable_dependencies(ast: &Ast) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_nodes(&ast.nodes, &mut names);
    names
}

fn collect_nodes(nodes: &[Node], names: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            Node::Literal { .. } => {}
            Node::VariableRef(r) => {
                names.insert(r.name.clone());
            }
            Node::Conditional { cond, then_branch, else_branch } => {
                collect_expr(cond, names);
                collect_nodes(then_branch, names);
                collect_nodes(else_branch, names);
            }
            Node::Expression { expr, .. } => collect_expr(expr, names),
        }
    }
}

fn collect_expr(expr: &Expr, names: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal { .. } => {}
        Expr::Var { name, .. } => {
            names.insert(name.clone());
        }
        Expr::Op { operands, .. } => {
            for operand in operands {
                collect_expr(operand, names);
            }
        }
    }
}
