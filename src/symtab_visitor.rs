//! Pass 1: builds symbol tables from the AST, then resolves inheritance.
//!
//! Two stages. First, a straightforward walk declares every class, member,
//! free function and local into its scope, recording `node.scope`/
//! `node.entry` back onto the AST as it goes. Second, the four-step
//! inheritance pipeline runs over the declared classes:
//!
//! 1. [`topo_sort`] orders classes base-first (a derived class's scope isn't
//!    complete until its ancestors are).
//! 2. [`check_undefined_member_functions`] flags a member function that was
//!    declared in a class body but never defined anywhere.
//! 3. [`link_member_function_defs_to_decl`] reparents an out-of-class
//!    `Class::method(...) { ... }` definition's function scope onto the
//!    class that declared it.
//! 4. [`copy_inherited_entries`] copies each base class's member variables
//!    into the derived class's scope (shadowed by [`InsertContext::InheritedCopy`]
//!    when the derived class redeclares the same name), then removes the
//!    now-redundant out-of-class definitions from the global scope.

use crate::ast::{Ast, NodeId, NodeKind};
use crate::diagnostics::Diagnostics;
use crate::symtab::{AddOutcome, EntryKind, InsertContext, ScopeId, SymTabs, Visibility};
use crate::types::Type;
use std::collections::{HashMap, HashSet};

pub struct SymtabResult {
    pub tabs: SymTabs,
    pub global: ScopeId,
    /// Declared classes, in source order: `(name, class node, class scope)`.
    pub classes: Vec<(String, NodeId, ScopeId)>,
}

pub fn build(ast: &mut Ast, root: NodeId, diags: &mut Diagnostics) -> SymtabResult {
    let mut tabs = SymTabs::new();
    let global = tabs.new_scope("global", None, 0);
    ast.get_mut(root).scope = Some(global);

    let children = ast.children(root).to_vec();
    let class_list = children[0];
    let func_list = children[1];
    let main_body = children[2];

    let mut classes = Vec::new();
    for &class_node in &ast.children(class_list).to_vec() {
        if let Some((name, scope)) = declare_class(ast, class_node, global, &mut tabs, diags) {
            classes.push((name, class_node, scope));
        }
    }

    let func_defs = ast.children(func_list).to_vec();
    for &func_def in &func_defs {
        declare_free_func(ast, func_def, global, &mut tabs, diags);
    }

    declare_func_body(ast, main_body, "main", global, &[], &mut tabs, diags);

    resolve_inheritance(ast, &mut tabs, global, &classes, &func_defs, diags);

    SymtabResult { tabs, global, classes }
}

fn parse_type(name_leaf: &str) -> Type {
    match name_leaf {
        "integer" => Type::Integer,
        "float" => Type::Float,
        "void" => Type::Void,
        other => Type::Class(other.to_string()),
    }
}

fn dims_of(ast: &Ast, dim_nodes: &[NodeId]) -> Vec<Option<u32>> {
    dim_nodes
        .iter()
        .map(|&id| {
            let val = &ast.get(id).val;
            if val.is_empty() {
                None
            } else {
                val.parse().ok()
            }
        })
        .collect()
}

fn declare_class(
    ast: &mut Ast,
    class_node: NodeId,
    global: ScopeId,
    tabs: &mut SymTabs,
    diags: &mut Diagnostics,
) -> Option<(String, ScopeId)> {
    let line = ast.get(class_node).line;
    let name = ast.get(class_node).val.clone();
    let (id, outcome) = tabs.add_class(global, &name, line);
    report(diags, &outcome);
    let Some(_) = id else { return None };

    let class_scope = tabs.new_scope(name.clone(), Some(global), 1);
    ast.get_mut(class_node).scope = Some(class_scope);

    let children = ast.children(class_node).to_vec();
    let inherit_list_node = children[1];
    let inherit_names: Vec<String> = ast
        .children(inherit_list_node)
        .iter()
        .map(|&id| ast.get(id).val.clone())
        .collect();
    tabs.add_inherit(class_scope, inherit_names);

    for &member in &children[2..] {
        declare_member(ast, member, &name, class_scope, tabs, diags);
    }
    Some((name, class_scope))
}

fn declare_member(
    ast: &mut Ast,
    member: NodeId,
    class_name: &str,
    class_scope: ScopeId,
    tabs: &mut SymTabs,
    diags: &mut Diagnostics,
) {
    let kind = ast.get(member).kind;
    let visibility = if ast.get(member).val == "private" {
        Visibility::Private
    } else {
        Visibility::Public
    };
    match kind {
        NodeKind::MemberVarDecl => {
            let children = ast.children(member).to_vec();
            let line = ast.get(children[0]).line;
            let name = ast.get(children[0]).val.clone();
            let ty = parse_type(&ast.get(children[1]).val);
            let dims = dims_of(ast, &children[2..]);
            let ty = if dims.is_empty() { ty } else { Type::Array(Box::new(ty), dims.clone()) };
            let (id, outcome) = tabs.add_member_var(
                class_scope,
                &name,
                ty,
                line,
                dims,
                class_name,
                visibility,
                InsertContext::Declaration,
            );
            report(diags, &outcome);
            ast.get_mut(member).entry = id;
        }
        NodeKind::MemberFuncDecl => {
            let func_head = ast.children(member)[0];
            let (name, ret_ty, params, _) = func_head_signature(ast, func_head);
            let line = ast.get(func_head).line;
            let (id, outcome) = tabs.add_member_func(
                class_scope,
                &name,
                ret_ty,
                line,
                params,
                class_name,
                visibility,
                InsertContext::Declaration,
            );
            report(diags, &outcome);
            ast.get_mut(member).entry = id;
        }
        _ => {}
    }
}

/// Reads a `FuncHead` node's `(name, return type, params, scope-qualifier)`.
/// `scope-qualifier` is `Some(class)` when the head used `Class::method`.
fn func_head_signature(ast: &Ast, func_head: NodeId) -> (String, Type, Vec<(String, Type)>, Option<String>) {
    let children = ast.children(func_head).to_vec();
    let head_name_node = children[0];
    let fparams_node = children[1];
    let ret_ty = parse_type(&ast.get(children[2]).val);

    let (name, qualifier) = if ast.get(head_name_node).kind == NodeKind::ScopeRes {
        let scope_children = ast.children(head_name_node);
        let class_name = ast.get(scope_children[0]).val.clone();
        let method_name = ast.get(scope_children[1]).val.clone();
        (method_name, Some(class_name))
    } else {
        (ast.get(head_name_node).val.clone(), None)
    };

    let params = ast
        .children(fparams_node)
        .iter()
        .map(|&fparam| {
            let fc = ast.children(fparam).to_vec();
            let pname = ast.get(fc[0]).val.clone();
            let base = parse_type(&ast.get(fc[1]).val);
            let dims = dims_of(ast, &fc[2..]);
            let ty = if dims.is_empty() { base } else { Type::Array(Box::new(base), dims) };
            (pname, ty)
        })
        .collect();

    (name, ret_ty, params, qualifier)
}

fn declare_free_func(
    ast: &mut Ast,
    func_def: NodeId,
    global: ScopeId,
    tabs: &mut SymTabs,
    diags: &mut Diagnostics,
) {
    let children = ast.children(func_def).to_vec();
    let func_head = children[0];
    let func_body = children[1];
    let (name, ret_ty, params, qualifier) = func_head_signature(ast, func_head);
    let line = ast.get(func_head).line;
    let (id, outcome) = tabs.add_free_func(
        global,
        "global",
        &name,
        ret_ty,
        line,
        params.clone(),
        qualifier.clone().unwrap_or_default(),
    );
    report(diags, &outcome);
    ast.get_mut(func_def).entry = id;

    declare_func_body(ast, func_body, &name, global, &params, tabs, diags);
    if let Some(entry_id) = id {
        let body_scope = ast.get(func_body).scope.unwrap();
        tabs.entry_mut(entry_id).link = Some(body_scope);
    }
}

/// A parameter is declared twice over: once in the owning `Func`/`MemberFunc`
/// entry's `params` list (read for signature matching and call-site argument
/// checks), and once as its own `LocalVar` entry in the function's own body
/// scope, right alongside its locals -- a parameter needs a stack offset the
/// same way a local does.
fn declare_func_body(
    ast: &mut Ast,
    func_body: NodeId,
    scope_name: &str,
    parent: ScopeId,
    params: &[(String, Type)],
    tabs: &mut SymTabs,
    diags: &mut Diagnostics,
) {
    let body_scope = tabs.new_scope(scope_name, Some(parent), 1);
    ast.get_mut(func_body).scope = Some(body_scope);
    let line = ast.get(func_body).line;
    for (pname, pty) in params {
        let dims = match pty {
            Type::Array(_, dims) => dims.clone(),
            _ => Vec::new(),
        };
        let (_, outcome) = tabs.add_local_var(body_scope, pname, pty.clone(), line, dims);
        report(diags, &outcome);
    }
    let children = ast.children(func_body).to_vec();
    let var_list = children[0];
    for &var_decl in &ast.children(var_list).to_vec() {
        let vc = ast.children(var_decl).to_vec();
        let line = ast.get(vc[0]).line;
        let name = ast.get(vc[0]).val.clone();
        let ty = parse_type(&ast.get(vc[1]).val);
        let dims = dims_of(ast, &vc[2..]);
        let (id, outcome) = tabs.add_local_var(body_scope, &name, ty, line, dims);
        report(diags, &outcome);
        ast.get_mut(var_decl).entry = id;
    }
}

fn report(diags: &mut Diagnostics, outcome: &AddOutcome) {
    match outcome {
        AddOutcome::Inserted => {}
        AddOutcome::ShadowWarning(msg) => diags.warning(msg.clone(), 0),
        AddOutcome::OverloadWarning(msg) => diags.warning(msg.clone(), 0),
        AddOutcome::DuplicateError(msg) => diags.error(msg.clone(), 0),
    }
}

/// Step 1: base-classes-first topological order, cycle-safe. `inherits` is
/// modeled as an edge from the derived class to its base, so the post-order
/// DFS visits a base before any of its derived classes.
pub fn topo_sort(classes: &[(String, NodeId, ScopeId)], tabs: &SymTabs, diags: &mut Diagnostics) -> Vec<usize> {
    let index_of: HashMap<&str, usize> = classes.iter().enumerate().map(|(i, (n, _, _))| (n.as_str(), i)).collect();
    let mut order = Vec::new();
    let mut visited = vec![false; classes.len()];
    let mut on_stack = vec![false; classes.len()];

    fn visit(
        i: usize,
        classes: &[(String, NodeId, ScopeId)],
        tabs: &SymTabs,
        index_of: &HashMap<&str, usize>,
        visited: &mut [bool],
        on_stack: &mut [bool],
        order: &mut Vec<usize>,
        diags: &mut Diagnostics,
    ) {
        if visited[i] {
            return;
        }
        if on_stack[i] {
            diags.error(format!("class '{}' participates in an inheritance cycle", classes[i].0), 0);
            return;
        }
        on_stack[i] = true;
        let scope = classes[i].2;
        if let Some(inherit_id) = tabs.get_entry(scope, EntryKind::Inherit, "inherit") {
            for base in tabs.entry(inherit_id).inherit_list.clone() {
                if let Some(&bi) = index_of.get(base.as_str()) {
                    visit(bi, classes, tabs, index_of, visited, on_stack, order, diags);
                } else {
                    diags.error(format!("class '{}' inherits from undefined class '{base}'", classes[i].0), 0);
                }
            }
        }
        on_stack[i] = false;
        visited[i] = true;
        order.push(i);
    }

    for i in 0..classes.len() {
        visit(i, classes, tabs, &index_of, &mut visited, &mut on_stack, &mut order, diags);
    }
    order
}

/// Step 2: a member function declared in a class body with no matching
/// definition anywhere (in-class or out-of-class) is an error.
fn check_undefined_member_functions(
    ast: &Ast,
    class_node: NodeId,
    class_name: &str,
    global: ScopeId,
    tabs: &SymTabs,
    diags: &mut Diagnostics,
) {
    for &member in &ast.children(class_node)[2..] {
        if ast.get(member).kind != NodeKind::MemberFuncDecl {
            continue;
        }
        let func_head = ast.children(member)[0];
        let (name, _, params, _) = func_head_signature(ast, func_head);
        let class_scope = ast.get(class_node).scope.unwrap();
        let sig_key = {
            let entry_id = tabs.get_entry_by_name(class_scope, &name);
            entry_id.map(|id| tabs.entry(id).signature(class_name))
        };
        let defined_in_class = sig_key
            .as_ref()
            .and_then(|sig| tabs.get_entry(class_scope, EntryKind::MemberFunc, sig))
            .is_some();
        let defined_out_of_class = {
            let params_match = |eid: crate::symtab::EntryId| {
                let e = tabs.entry(eid);
                e.name == name && e.class == class_name && e.params.len() == params.len()
            };
            tabs.scope(global).entries_in_order().iter().any(|&id| params_match(id))
        };
        if !defined_in_class && !defined_out_of_class {
            diags.error(
                format!("member function '{class_name}::{name}' is declared but never defined"),
                ast.get(func_head).line,
            );
        }
    }
}

/// Step 3: reparents an out-of-class `Class::method(...) { ... }` definition
/// onto its class's scope and links its body scope in.
fn link_member_function_defs_to_decl(
    ast: &Ast,
    func_def: NodeId,
    global: ScopeId,
    tabs: &mut SymTabs,
    classes: &[(String, NodeId, ScopeId)],
) {
    let children = ast.children(func_def).to_vec();
    let func_head = children[0];
    let func_body = children[1];
    let (name, _, params, qualifier) = func_head_signature(ast, func_head);
    let Some(class_name) = qualifier else { return };
    let Some((_, _, class_scope)) = classes.iter().find(|(n, _, _)| *n == class_name) else {
        return;
    };

    let global_entries = tabs.scope(global).entries_in_order().to_vec();
    let Some(&entry_id) = global_entries.iter().find(|&&id| {
        let e = tabs.entry(id);
        e.kind == EntryKind::Func && e.name == name && e.class == class_name && e.params.len() == params.len()
    }) else {
        return;
    };

    let sig = tabs.entry(entry_id).signature(&class_name);
    let body_scope = ast.get(func_body).scope.unwrap();
    tabs.entry_mut(entry_id).link = Some(body_scope);
    tabs.set_parent(body_scope, *class_scope);
    tabs.increment_level(*class_scope);

    if tabs.get_entry(*class_scope, EntryKind::MemberFunc, &sig).is_none() {
        let entry = tabs.entry(entry_id).clone();
        let (_, outcome) = tabs.add_member_func(
            *class_scope,
            &entry.name,
            entry.ty,
            entry.line,
            entry.params,
            class_name,
            entry.visibility,
            InsertContext::Declaration,
        );
        let _ = outcome;
    }
}

/// Step 4: copies each base class's member variables (and functions not
/// already overridden) into the derived class's scope, base-first order,
/// then strips the out-of-class defs that have been linked in.
fn copy_inherited_entries(
    order: &[usize],
    classes: &[(String, NodeId, ScopeId)],
    tabs: &mut SymTabs,
    diags: &mut Diagnostics,
) {
    let mut resolved: HashSet<usize> = HashSet::new();
    for &i in order {
        let (derived_name, _, derived_scope) = &classes[i];
        let Some(inherit_id) = tabs.get_entry(*derived_scope, EntryKind::Inherit, "inherit") else {
            resolved.insert(i);
            continue;
        };
        let bases = tabs.entry(inherit_id).inherit_list.clone();
        for base_name in bases {
            let Some(base_i) = classes.iter().position(|(n, _, _)| *n == base_name) else {
                continue;
            };
            if !resolved.contains(&base_i) {
                continue;
            }
            let base_scope = classes[base_i].2;
            let base_entries = tabs.scope(base_scope).entries_in_order().to_vec();
            for eid in base_entries {
                let entry = tabs.entry(eid).clone();
                match entry.kind {
                    EntryKind::MemberVar => {
                        let (_, outcome) = tabs.add_member_var(
                            *derived_scope,
                            &entry.name,
                            entry.ty,
                            entry.line,
                            entry.dims,
                            derived_name,
                            entry.visibility,
                            InsertContext::InheritedCopy,
                        );
                        report(diags, &outcome);
                    }
                    EntryKind::MemberFunc => {
                        let (_, outcome) = tabs.add_member_func(
                            *derived_scope,
                            &entry.name,
                            entry.ty,
                            entry.line,
                            entry.params,
                            derived_name,
                            entry.visibility,
                            InsertContext::InheritedCopy,
                        );
                        report(diags, &outcome);
                    }
                    _ => {}
                }
            }
        }
        resolved.insert(i);
    }
}

fn resolve_inheritance(
    ast: &mut Ast,
    tabs: &mut SymTabs,
    global: ScopeId,
    classes: &[(String, NodeId, ScopeId)],
    func_defs: &[NodeId],
    diags: &mut Diagnostics,
) {
    let order = topo_sort(classes, tabs, diags);

    for (name, node, _) in classes {
        check_undefined_member_functions(ast, *node, name, global, tabs, diags);
    }

    for &func_def in func_defs {
        link_member_function_defs_to_decl(ast, func_def, global, tabs, classes);
    }

    copy_inherited_entries(&order, classes, tabs, diags);
    tabs.remove_member_function_definitions(global);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use crate::lexer::Lexer;
    use crate::parser::parse_tokens;
    use crate::token::{Token, TokenType};

    fn parse(src: &str) -> (Ast, NodeId) {
        let mut lexer = Lexer::new(src);
        let mut tokens = Vec::new();
        loop {
            let tk = lexer.next_token();
            let done = tk.ty == TokenType::Eos;
            if !tk.is_comment() {
                tokens.push(tk);
            }
            if done {
                break;
            }
        }
        let grammar = Grammar::parse(crate::grammar::embedded_grammar());
        parse_tokens(&grammar, tokens).unwrap_or_else(|e| {
            panic!("parse failed: {}", e.iter().map(|x| x.message.clone()).collect::<Vec<_>>().join("; "))
        })
    }

    #[test]
    fn declares_global_locals_and_main_scope() {
        let (mut ast, root) = parse("main {\n local x: integer;\n}\n");
        let mut diags = Diagnostics::new();
        let result = build(&mut ast, root, &mut diags);
        assert!(!diags.has_errors());
        assert!(result.classes.is_empty());
    }

    #[test]
    fn duplicate_local_var_is_an_error() {
        let (mut ast, root) = parse("main {\n local x: integer;\n local x: integer;\n}\n");
        let mut diags = Diagnostics::new();
        build(&mut ast, root, &mut diags);
        assert!(diags.has_errors());
    }

    #[test]
    fn inheritance_copies_base_member_var_into_derived_scope() {
        let src = "class Base {\n public x: integer;\n};\n\
                   class Derived inherits Base {\n};\n\
                   main {\n}\n";
        let (mut ast, root) = parse(src);
        let mut diags = Diagnostics::new();
        let result = build(&mut ast, root, &mut diags);
        let derived_scope = result.classes.iter().find(|(n, _, _)| n == "Derived").unwrap().2;
        assert!(result.tabs.get_entry(derived_scope, EntryKind::MemberVar, "x").is_some());
    }

    #[test]
    fn inheritance_from_undefined_class_is_an_error() {
        let src = "class Derived inherits Ghost {\n};\nmain {\n}\n";
        let (mut ast, root) = parse(src);
        let mut diags = Diagnostics::new();
        build(&mut ast, root, &mut diags);
        assert!(diags.has_errors());
    }
}
