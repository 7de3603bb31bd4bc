//! Pass 3: assigns sizes and stack offsets to every symbol-table entry, and
//! synthesizes the entries an expression needs but no declaration produced --
//! a temp slot for the result of a binary operator, a call, a comparison, or
//! a `not`; a literal slot for a numeric constant.
//!
//! Offsets are assigned per scope by walking entries in declaration order and
//! counting down from zero, the same direction the target stack grows.

use crate::ast::{Ast, NodeId, NodeKind};
use crate::diagnostics::Diagnostics;
use crate::symtab::{EntryKind, ScopeId, SymTabs};
use crate::symtab_visitor::{topo_sort, SymtabResult};
use crate::types::Type;
use std::collections::HashMap;

struct Sizer {
    type_sizes: HashMap<String, u32>,
    temp_counter: u32,
    lit_counter: u32,
}

impl Sizer {
    fn temp_name(&mut self) -> String {
        self.temp_counter += 1;
        format!("temp{}", self.temp_counter)
    }

    fn lit_name(&mut self) -> String {
        self.lit_counter += 1;
        format!("lit{}", self.lit_counter)
    }

    fn entry_size(&self, ty: &Type, dims: &[Option<u32>]) -> u32 {
        let elem = ty.scalar_size(|name| self.type_sizes.get(name).copied());
        dims.iter().fold(elem, |acc, d| match d {
            Some(n) => acc * n,
            None => acc,
        })
    }
}

pub fn assign(ast: &mut Ast, root: NodeId, result: &mut SymtabResult, diags: &mut Diagnostics) {
    let mut sizer = Sizer {
        type_sizes: HashMap::from([
            ("integer".to_string(), 4),
            ("float".to_string(), 8),
            ("void".to_string(), 0),
        ]),
        temp_counter: 0,
        lit_counter: 0,
    };

    let order = topo_sort(&result.classes, &result.tabs, &mut Diagnostics::new());
    for &i in &order {
        let (name, _, class_scope) = &result.classes[i];
        let mut size = 0u32;
        for &eid in result.tabs.scope(*class_scope).entries_in_order() {
            let entry = result.tabs.entry(eid);
            if entry.kind == EntryKind::MemberVar {
                size += sizer.entry_size(&entry.ty, &entry.dims);
            }
        }
        sizer.type_sizes.insert(name.clone(), size);
    }

    for &i in &order {
        let (_, _, class_scope) = &result.classes[i];
        size_and_offset_scope(&mut result.tabs, *class_scope, &sizer, &[EntryKind::Inherit]);
    }

    let children = ast.children(root).to_vec();
    let func_list = children[1];
    let main_body = children[2];

    for &func_def in &ast.children(func_list).to_vec() {
        let func_children = ast.children(func_def).to_vec();
        let func_head = func_children[0];
        let func_body = func_children[1];
        let ret_name = ast.get(ast.children(func_head)[2]).val.clone();
        let scope = ast.get(func_body).scope.unwrap();
        synth_func_body(ast, func_body, scope, &mut sizer, &mut result.tabs, diags);

        let ret_size = sizer.type_sizes.get(&ret_name).copied().unwrap_or(0);
        let scope_size = result.tabs.scope(scope).scope_size;
        result.tabs.scope_mut(scope).scope_size = scope_size - ret_size as i32 - 4;
        size_and_offset_scope(&mut result.tabs, scope, &sizer, &[]);
    }

    let main_scope = ast.get(main_body).scope.unwrap();
    synth_func_body(ast, main_body, main_scope, &mut sizer, &mut result.tabs, diags);
    size_and_offset_scope(&mut result.tabs, main_scope, &sizer, &[]);

    // Global scope: classes and free functions get a nominal size (matching
    // how every other entry is sized) but no per-entry offset -- they aren't
    // addressed through a stack frame.
    let global_entries = result.tabs.scope(result.global).entries_in_order().to_vec();
    for eid in global_entries {
        let (ty, dims) = {
            let e = result.tabs.entry(eid);
            (e.ty.clone(), e.dims.clone())
        };
        let size = sizer.entry_size(&ty, &dims);
        result.tabs.entry_mut(eid).size = size;
    }
}

/// Sets `size`/`offset` on every entry of `scope` in declaration order,
/// counting down from the scope's current `scope_size`. Kinds in `skip`
/// (e.g. the single `Inherit` marker entry of a class scope) are left alone.
fn size_and_offset_scope(tabs: &mut SymTabs, scope: ScopeId, sizer: &Sizer, skip: &[EntryKind]) {
    let ids = tabs.scope(scope).entries_in_order().to_vec();
    let mut running = tabs.scope(scope).scope_size;
    for id in ids {
        let kind = tabs.entry(id).kind;
        if skip.contains(&kind) {
            continue;
        }
        let (ty, dims) = {
            let e = tabs.entry(id);
            (e.ty.clone(), e.dims.clone())
        };
        let size = sizer.entry_size(&ty, &dims);
        running -= size as i32;
        let entry = tabs.entry_mut(id);
        entry.size = size;
        entry.offset = running;
    }
    tabs.scope_mut(scope).scope_size = running;
}

fn synth_func_body(ast: &mut Ast, func_body: NodeId, scope: ScopeId, sizer: &mut Sizer, tabs: &mut SymTabs, diags: &mut Diagnostics) {
    let stat_list = ast.children(func_body)[1];
    for &stat in &ast.children(stat_list).to_vec() {
        synth_stat(ast, stat, scope, sizer, tabs, diags);
    }
}

fn synth_block(ast: &mut Ast, block: NodeId, scope: ScopeId, sizer: &mut Sizer, tabs: &mut SymTabs, diags: &mut Diagnostics) {
    for &stat in &ast.children(block).to_vec() {
        synth_stat(ast, stat, scope, sizer, tabs, diags);
    }
}

fn synth_stat(ast: &mut Ast, stat: NodeId, scope: ScopeId, sizer: &mut Sizer, tabs: &mut SymTabs, diags: &mut Diagnostics) {
    match ast.get(stat).kind {
        NodeKind::Assign => {
            let children = ast.children(stat).to_vec();
            synth_expr(ast, children[0], scope, sizer, tabs, diags);
            synth_expr(ast, children[1], scope, sizer, tabs, diags);
        }
        NodeKind::IfStat => {
            let children = ast.children(stat).to_vec();
            synth_expr(ast, children[0], scope, sizer, tabs, diags);
            synth_block(ast, children[1], scope, sizer, tabs, diags);
            synth_block(ast, children[2], scope, sizer, tabs, diags);
        }
        NodeKind::WhileStat => {
            let children = ast.children(stat).to_vec();
            synth_expr(ast, children[0], scope, sizer, tabs, diags);
            synth_block(ast, children[1], scope, sizer, tabs, diags);
        }
        NodeKind::Read | NodeKind::Write | NodeKind::Return => {
            let expr = ast.children(stat)[0];
            synth_expr(ast, expr, scope, sizer, tabs, diags);
            ast.get_mut(stat).entry = ast.get(expr).entry;
        }
        NodeKind::FuncCall | NodeKind::DataMember | NodeKind::Var => {
            synth_expr(ast, stat, scope, sizer, tabs, diags);
        }
        _ => {}
    }
}

/// Bottom-up: children are synthesized first, then this node either adopts a
/// child's entry (`Var`/`DataMember`/`ArithExpr`-shaped passthroughs) or gets
/// a fresh temp/literal entry of its own.
fn synth_expr(ast: &mut Ast, node: NodeId, scope: ScopeId, sizer: &mut Sizer, tabs: &mut SymTabs, diags: &mut Diagnostics) {
    let kind = ast.get(node).kind;
    let children = ast.children(node).to_vec();
    for &child in &children {
        synth_expr(ast, child, scope, sizer, tabs, diags);
    }

    match kind {
        NodeKind::AddOp | NodeKind::MultOp | NodeKind::RelOp | NodeKind::FuncCall | NodeKind::Not => {
            if kind == NodeKind::FuncCall {
                // The type-check pass left the resolved function/method entry
                // on this node; move it onto the callee leaf before this
                // node's own `entry` is replaced by the temp holding the
                // call's return value, so codegen can still find it.
                let callee = children[0];
                let resolved = ast.get(node).entry;
                ast.get_mut(callee).entry = resolved;
            }
            let ty = ast.get(node).ty.clone().unwrap_or(Type::TypeError);
            let line = ast.get(node).line;
            let name = sizer.temp_name();
            let (id, outcome) = tabs.add_local_var(scope, name, ty, line, Vec::new());
            let _ = outcome;
            ast.get_mut(node).entry = id;
        }
        NodeKind::IntNum | NodeKind::FloatNum => {
            let ty = ast.get(node).ty.clone().unwrap_or(Type::TypeError);
            let line = ast.get(node).line;
            let name = sizer.lit_name();
            let (id, outcome) = tabs.add_local_var(scope, name, ty, line, Vec::new());
            let _ = outcome;
            ast.get_mut(node).entry = id;
        }
        NodeKind::Sign => {
            if let Some(&child) = children.first() {
                if ast.get(node).val == "-" {
                    // unary minus is computed, so it needs its own temp
                    // slot; unary plus is a no-op and can alias the child's.
                    let ty = ast.get(node).ty.clone().unwrap_or(Type::TypeError);
                    let line = ast.get(node).line;
                    let name = sizer.temp_name();
                    let (id, outcome) = tabs.add_local_var(scope, name, ty, line, Vec::new());
                    let _ = outcome;
                    ast.get_mut(node).entry = id;
                } else {
                    ast.get_mut(node).entry = ast.get(child).entry;
                }
            }
        }
        NodeKind::DataMember => {
            // `entry` is already set by the type-check pass's name
            // resolution; nothing further to synthesize.
        }
        NodeKind::Var => {
            if let Some(&head) = children.first() {
                ast.get_mut(node).entry = ast.get(head).entry;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use crate::lexer::Lexer;
    use crate::parser::parse_tokens;
    use crate::symtab_visitor;
    use crate::token::TokenType;
    use crate::typecheck;

    fn compile_through_memsize(src: &str) -> (Ast, NodeId, SymtabResult, Diagnostics) {
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
        let (mut ast, root) = parse_tokens(&grammar, tokens).expect("parse failed");
        let mut diags = Diagnostics::new();
        let mut result = symtab_visitor::build(&mut ast, root, &mut diags);
        typecheck::check(&mut ast, root, &result, &mut diags);
        assign(&mut ast, root, &mut result, &mut diags);
        (ast, root, result, diags)
    }

    #[test]
    fn local_int_gets_a_four_byte_negative_offset() {
        let (ast, root, result, diags) = compile_through_memsize("main {\n local x: integer;\n}\n");
        assert!(!diags.has_errors());
        let main_body = ast.children(root)[2];
        let scope = ast.get(main_body).scope.unwrap();
        let id = result.tabs.get_entry_by_name(scope, "x").unwrap();
        assert_eq!(result.tabs.entry(id).size, 4);
        assert_eq!(result.tabs.entry(id).offset, -4);
    }

    #[test]
    fn array_local_multiplies_element_size_by_length() {
        let src = "main {\n local x: integer[10];\n}\n";
        let (ast, root, result, diags) = compile_through_memsize(src);
        assert!(!diags.has_errors());
        let main_body = ast.children(root)[2];
        let scope = ast.get(main_body).scope.unwrap();
        let id = result.tabs.get_entry_by_name(scope, "x").unwrap();
        assert_eq!(result.tabs.entry(id).size, 40);
    }

    #[test]
    fn class_size_is_sum_of_member_var_sizes() {
        let src = "class Point {\n public x: integer;\n public y: float;\n};\nmain {\n}\n";
        let (_, _, result, diags) = compile_through_memsize(src);
        assert!(!diags.has_errors());
        let class_entry = result.tabs.get_entry(result.global, EntryKind::Class, "Point").unwrap();
        assert_eq!(result.tabs.entry(class_entry).size, 12);
    }

    #[test]
    fn arithmetic_expression_gets_a_temp_var_entry() {
        let src = "main {\n write(1 + 2);\n}\n";
        let (ast, root, result, diags) = compile_through_memsize(src);
        assert!(!diags.has_errors());
        let main_body = ast.children(root)[2];
        let scope = ast.get(main_body).scope.unwrap();
        assert!(result.tabs.get_entry_by_name(scope, "temp1").is_some());
        assert!(result.tabs.get_entry_by_name(scope, "lit1").is_some());
    }

    #[test]
    fn func_def_reserves_return_value_and_return_address_slots() {
        let src = "f(): integer {\n return(1)\n}\nmain {\n}\n";
        let (ast, root, result, diags) = compile_through_memsize(src);
        assert!(!diags.has_errors());
        let func_def = ast.children(ast.children(root)[1])[0];
        let func_body = ast.children(func_def)[1];
        let scope = ast.get(func_body).scope.unwrap();
        // scope_size accounts for the 4-byte return value plus the 4-byte
        // return address before any locals/temps are subtracted.
        assert!(result.tabs.scope(scope).scope_size <= -8);
    }
}
