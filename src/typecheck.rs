//! Pass 2: bottom-up type propagation.
//!
//! Every expression node gets its `ty` field filled in from its children's
//! types, innermost first. A node whose type can't be determined (an
//! undeclared name, an operator applied to incompatible operands, a wrong
//! argument count) gets [`Type::TypeError`] instead of failing the whole
//! pass -- that sentinel then propagates upward so one root cause doesn't
//! cascade into a wall of follow-on errors about everything downstream of
//! it.

use crate::ast::{Ast, NodeId, NodeKind};
use crate::diagnostics::Diagnostics;
use crate::symtab::{EntryKind, ScopeId, SymTabs, Visibility};
use crate::symtab_visitor::SymtabResult;
use crate::types::Type;
use std::collections::HashMap;

struct Checker<'a> {
    tabs: &'a SymTabs,
    classes: HashMap<String, ScopeId>,
}

pub fn check(ast: &mut Ast, root: NodeId, result: &SymtabResult, diags: &mut Diagnostics) {
    let classes = result.classes.iter().map(|(n, _, s)| (n.clone(), *s)).collect();
    let checker = Checker {
        tabs: &result.tabs,
        classes,
    };

    let children = ast.children(root).to_vec();
    let class_list = children[0];
    let func_list = children[1];
    let main_body = children[2];

    for &class_node in &ast.children(class_list).to_vec() {
        for &member in &ast.children(class_node).to_vec()[2..] {
            if ast.get(member).kind == NodeKind::MemberVarDecl {
                checker.check_decl_type(ast, member, diags);
            }
        }
    }

    // Member function declarations carry no expressions of their own to
    // check; in-class and out-of-class function bodies are both reached
    // through `func_list` below.
    for &func_def in &ast.children(func_list).to_vec() {
        let func_children = ast.children(func_def).to_vec();
        let func_head = func_children[0];
        let func_body = func_children[1];
        let ret_ty = checker.return_type_of(ast, func_head);
        let scope = ast.get(func_body).scope.unwrap();
        checker.check_var_decl_list(ast, func_body, diags);
        checker.check_func_body(ast, func_body, scope, &ret_ty, diags);
    }

    let main_scope = ast.get(main_body).scope.unwrap();
    checker.check_var_decl_list(ast, main_body, diags);
    checker.check_func_body(ast, main_body, main_scope, &Type::Void, diags);
}

impl<'a> Checker<'a> {
    fn return_type_of(&self, ast: &Ast, func_head: NodeId) -> Type {
        let children = ast.children(func_head);
        let ret_leaf = children[2];
        self.parse_type(&ast.get(ret_leaf).val)
    }

    fn parse_type(&self, name: &str) -> Type {
        match name {
            "integer" => Type::Integer,
            "float" => Type::Float,
            "void" => Type::Void,
            other => Type::Class(other.to_string()),
        }
    }

    fn check_func_body(&self, ast: &mut Ast, func_body: NodeId, scope: ScopeId, ret_ty: &Type, diags: &mut Diagnostics) {
        let stat_list = ast.children(func_body)[1];
        for &stat in &ast.children(stat_list).to_vec() {
            self.check_stat(ast, stat, scope, ret_ty, diags);
        }
    }

    fn check_var_decl_list(&self, ast: &Ast, func_body: NodeId, diags: &mut Diagnostics) {
        let var_list = ast.children(func_body)[0];
        for &var_decl in &ast.children(var_list).to_vec() {
            self.check_decl_type(ast, var_decl, diags);
        }
    }

    /// `VarDecl`/`MemberVarDecl` share a `[name, type, dims...]` shape; the
    /// declared type must be `integer`, `float`, or a declared class.
    fn check_decl_type(&self, ast: &Ast, decl: NodeId, diags: &mut Diagnostics) {
        let type_leaf = ast.children(decl)[1];
        let name = &ast.get(type_leaf).val;
        if name != "integer" && name != "float" && !self.classes.contains_key(name) {
            let line = ast.get(type_leaf).line;
            diags.error(format!("undefined type '{name}'"), line);
        }
    }

    fn check_stat_block(&self, ast: &mut Ast, block: NodeId, scope: ScopeId, ret_ty: &Type, diags: &mut Diagnostics) {
        for &stat in &ast.children(block).to_vec() {
            self.check_stat(ast, stat, scope, ret_ty, diags);
        }
    }

    fn check_stat(&self, ast: &mut Ast, stat: NodeId, scope: ScopeId, ret_ty: &Type, diags: &mut Diagnostics) {
        let line = ast.get(stat).line;
        match ast.get(stat).kind {
            NodeKind::Assign => {
                let children = ast.children(stat).to_vec();
                let lhs_ty = self.infer(ast, children[0], scope, diags);
                let rhs_ty = self.infer(ast, children[1], scope, diags);
                if lhs_ty != rhs_ty && lhs_ty != Type::TypeError && rhs_ty != Type::TypeError {
                    diags.error(format!("cannot assign {rhs_ty} to {lhs_ty}"), line);
                }
            }
            NodeKind::IfStat => {
                let children = ast.children(stat).to_vec();
                let cond_ty = self.infer(ast, children[0], scope, diags);
                if cond_ty != Type::Integer && cond_ty != Type::TypeError {
                    diags.error(format!("if condition must be integer, found {cond_ty}"), line);
                }
                self.check_stat_block(ast, children[1], scope, ret_ty, diags);
                self.check_stat_block(ast, children[2], scope, ret_ty, diags);
            }
            NodeKind::WhileStat => {
                let children = ast.children(stat).to_vec();
                let cond_ty = self.infer(ast, children[0], scope, diags);
                if cond_ty != Type::Integer && cond_ty != Type::TypeError {
                    diags.error(format!("while condition must be integer, found {cond_ty}"), line);
                }
                self.check_stat_block(ast, children[1], scope, ret_ty, diags);
            }
            NodeKind::Read => {
                let target = ast.children(stat)[0];
                let ty = self.infer(ast, target, scope, diags);
                if ty.is_class_type() && ty != Type::TypeError {
                    diags.error(format!("cannot read into a value of type {ty}"), line);
                }
            }
            NodeKind::Write => {
                let expr = ast.children(stat)[0];
                let ty = self.infer(ast, expr, scope, diags);
                if ty.is_class_type() && ty != Type::TypeError {
                    diags.error(format!("cannot write a value of type {ty}"), line);
                }
            }
            NodeKind::Return => {
                let expr = ast.children(stat)[0];
                let ty = self.infer(ast, expr, scope, diags);
                if &ty != ret_ty && ty != Type::TypeError {
                    diags.error(format!("return type mismatch: expected {ret_ty}, found {ty}"), line);
                }
            }
            NodeKind::FuncCall | NodeKind::DataMember | NodeKind::Var => {
                self.infer(ast, stat, scope, diags);
            }
            _ => {}
        }
    }

    fn infer(&self, ast: &mut Ast, node: NodeId, scope: ScopeId, diags: &mut Diagnostics) -> Type {
        if let Some(ty) = &ast.get(node).ty {
            return ty.clone();
        }
        let ty = self.infer_uncached(ast, node, scope, diags);
        ast.get_mut(node).ty = Some(ty.clone());
        ty
    }

    fn infer_uncached(&self, ast: &mut Ast, node: NodeId, scope: ScopeId, diags: &mut Diagnostics) -> Type {
        let line = ast.get(node).line;
        match ast.get(node).kind {
            NodeKind::IntNum => Type::Integer,
            NodeKind::FloatNum => Type::Float,
            NodeKind::AddOp | NodeKind::MultOp => {
                let children = ast.children(node).to_vec();
                let lhs = self.infer(ast, children[0], scope, diags);
                let rhs = self.infer(ast, children[1], scope, diags);
                self.arith_result(&lhs, &rhs, line, diags)
            }
            NodeKind::RelOp => {
                let children = ast.children(node).to_vec();
                let lhs = self.infer(ast, children[0], scope, diags);
                let rhs = self.infer(ast, children[1], scope, diags);
                if lhs != rhs && lhs != Type::TypeError && rhs != Type::TypeError {
                    diags.error(format!("cannot compare {lhs} with {rhs}"), line);
                    Type::TypeError
                } else {
                    Type::Integer
                }
            }
            NodeKind::Not => {
                let child = ast.children(node)[0];
                let ty = self.infer(ast, child, scope, diags);
                if ty != Type::Integer && ty != Type::TypeError {
                    diags.error(format!("'not' requires an integer operand, found {ty}"), line);
                    return Type::TypeError;
                }
                Type::Integer
            }
            NodeKind::Sign => {
                let child = ast.children(node)[0];
                let ty = self.infer(ast, child, scope, diags);
                if ty != Type::Integer && ty != Type::Float && ty != Type::TypeError {
                    diags.error(format!("sign requires a numeric operand, found {ty}"), line);
                    return Type::TypeError;
                }
                ty
            }
            NodeKind::DataMember => self.infer_data_member(ast, node, scope, diags),
            NodeKind::Var => self.infer_var(ast, node, scope, diags),
            NodeKind::FuncCall => self.infer_func_call(ast, node, scope, diags),
            _ => Type::TypeError,
        }
    }

    fn arith_result(&self, lhs: &Type, rhs: &Type, line: u32, diags: &mut Diagnostics) -> Type {
        match (lhs, rhs) {
            (Type::TypeError, _) | (_, Type::TypeError) => Type::TypeError,
            (Type::Integer, Type::Integer) => Type::Integer,
            (Type::Float, Type::Float) => Type::Float,
            _ => {
                diags.error(format!("cannot apply an arithmetic operator to {lhs} and {rhs}"), line);
                Type::TypeError
            }
        }
    }

    fn infer_data_member(&self, ast: &mut Ast, node: NodeId, scope: ScopeId, diags: &mut Diagnostics) -> Type {
        let line = ast.get(node).line;
        let children = ast.children(node).to_vec();
        let name_leaf = children[0];
        let indices = ast.children(children[1]).to_vec();
        let name = ast.get(name_leaf).val.clone();

        let Some(entry_id) = self.tabs.get_entry_by_name(scope, &name) else {
            diags.error(format!("undeclared identifier '{name}'"), line);
            return Type::TypeError;
        };
        ast.get_mut(node).entry = Some(entry_id);
        let entry = self.tabs.entry(entry_id);
        let declared_dims = entry.dims.len();
        let base = entry.ty.base().clone();
        let remaining_dims = entry.dims[indices.len().min(declared_dims)..].to_vec();

        for &idx in &indices {
            let idx_ty = self.infer(ast, idx, scope, diags);
            if idx_ty != Type::Integer && idx_ty != Type::TypeError {
                diags.error(format!("array index must be integer, found {idx_ty}"), line);
            }
        }
        if indices.len() > declared_dims {
            diags.error(format!("too many indices for '{name}'"), line);
            return Type::TypeError;
        }
        if indices.len() < declared_dims {
            return Type::Array(Box::new(base), remaining_dims);
        }
        base
    }

    fn infer_var(&self, ast: &mut Ast, node: NodeId, scope: ScopeId, diags: &mut Diagnostics) -> Type {
        let line = ast.get(node).line;
        let children = ast.children(node).to_vec();
        let head_ty = self.infer(ast, children[0], scope, diags);
        let Type::Class(class_name) = head_ty.base().clone() else {
            if head_ty != Type::TypeError {
                diags.error(format!("'.' requires a class-typed value, found {head_ty}"), line);
            }
            return Type::TypeError;
        };
        let Some(&class_scope) = self.classes.get(&class_name) else {
            diags.error(format!("unknown class '{class_name}'"), line);
            return Type::TypeError;
        };
        let tail_ty = self.infer(ast, children[1], class_scope, diags);
        if let Some(entry_id) = ast.get(children[1]).entry {
            let entry = self.tabs.entry(entry_id);
            if entry.visibility == Visibility::Private {
                diags.error(format!("'{}' is private, inaccessible from outside class '{class_name}'", entry.name), line);
            }
        }
        tail_ty
    }

    fn infer_func_call(&self, ast: &mut Ast, node: NodeId, scope: ScopeId, diags: &mut Diagnostics) -> Type {
        let line = ast.get(node).line;
        let children = ast.children(node).to_vec();
        let callee = children[0];
        let aparams = ast.children(children[1]).to_vec();
        let arg_types: Vec<Type> = aparams.iter().map(|&a| self.infer(ast, a, scope, diags)).collect();

        let (name, lookup_scope) = if ast.get(callee).kind == NodeKind::ScopeRes {
            let sc = ast.children(callee).to_vec();
            let class_name = ast.get(sc[0]).val.clone();
            let method_name = ast.get(sc[1]).val.clone();
            let Some(&class_scope) = self.classes.get(&class_name) else {
                diags.error(format!("unknown class '{class_name}'"), line);
                return Type::TypeError;
            };
            (method_name, class_scope)
        } else {
            (ast.get(callee).val.clone(), scope)
        };

        let Some(entry_id) = self.tabs.get_entry_by_name(lookup_scope, &name) else {
            diags.error(format!("call to undeclared function '{name}'"), line);
            return Type::TypeError;
        };
        ast.get_mut(node).entry = Some(entry_id);
        let entry = self.tabs.entry(entry_id);
        if entry.kind != EntryKind::Func && entry.kind != EntryKind::MemberFunc {
            diags.error(format!("'{name}' is not a function"), line);
            return Type::TypeError;
        }
        if entry.params.len() != arg_types.len() {
            diags.error(
                format!("'{name}' expects {} argument(s), found {}", entry.params.len(), arg_types.len()),
                line,
            );
            return Type::TypeError;
        }
        for (i, (pname, pty)) in entry.params.iter().enumerate() {
            if &arg_types[i] != pty && arg_types[i] != Type::TypeError {
                diags.error(
                    format!("argument {} ('{pname}') of '{name}' expects {pty}, found {}", i + 1, arg_types[i]),
                    line,
                );
            }
        }
        entry.ty.clone()
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

    fn parse_and_check(src: &str) -> Diagnostics {
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
        let result = symtab_visitor::build(&mut ast, root, &mut diags);
        check(&mut ast, root, &result, &mut diags);
        diags
    }

    #[test]
    fn arithmetic_of_matching_types_is_fine() {
        let diags = parse_and_check("main {\n write(1 + 2 * 3);\n}\n");
        assert!(!diags.has_errors());
    }

    #[test]
    fn using_an_undeclared_variable_is_an_error() {
        let diags = parse_and_check("main {\n write(x);\n}\n");
        assert!(diags.has_errors());
    }

    #[test]
    fn assigning_mismatched_types_is_an_error() {
        let diags = parse_and_check("main {\n local x: integer;\n x = 1.5;\n}\n");
        assert!(diags.has_errors());
    }

    #[test]
    fn if_condition_must_be_a_comparison_result() {
        let diags = parse_and_check(
            "main {\n local x: integer;\n x = 1;\n if (x == 1) then write(x); else write(x); ;\n}\n",
        );
        assert!(!diags.has_errors());
    }

    #[test]
    fn mixing_integer_and_float_in_arithmetic_is_an_error() {
        let diags = parse_and_check(
            "main {\n local x: integer;\n local y: float;\n x = 1;\n y = 1.5;\n write(x + y);\n}\n",
        );
        assert!(diags.has_errors());
    }

    #[test]
    fn accessing_a_private_member_through_the_dot_operator_is_an_error() {
        let diags = parse_and_check(
            "class Point {\n private x: integer;\n};\n\
             main {\n local p: Point;\n write(p.x);\n}\n",
        );
        assert!(diags.has_errors());
    }

    #[test]
    fn accessing_a_public_member_through_the_dot_operator_is_fine() {
        let diags = parse_and_check(
            "class Point {\n public x: integer;\n};\n\
             main {\n local p: Point;\n write(p.x);\n}\n",
        );
        assert!(!diags.has_errors());
    }

    #[test]
    fn declaring_a_variable_of_an_undefined_type_is_an_error() {
        let diags = parse_and_check("main {\n local x: Ghost;\n}\n");
        assert!(diags.has_errors());
    }

    #[test]
    fn declaring_a_member_variable_of_an_undefined_type_is_an_error() {
        let diags = parse_and_check("class A {\n public g: Ghost;\n};\nmain {\n}\n");
        assert!(diags.has_errors());
    }
}
