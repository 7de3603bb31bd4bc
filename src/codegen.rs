//! Pass 4: emits target assembly from the fully typed, sized AST.
//!
//! Two LIFO register pools back every expression: a general-purpose pool for
//! operands/results, and a small offset pool reserved for the register an
//! array index gets computed into. Every load/store that might be reading
//! through an array index brackets itself with [`CodeGen::start_offset_if`]/
//! [`CodeGen::end_offset_if`], which bump `r14` by the index register for the
//! duration of the single instruction that needs it and put the index
//! register right back when it's returned.
//!
//! Three accumulators collect the program as it's visited: `exec_code` (the
//! instruction stream), `data_code` (currently unused -- the source language
//! has no string/data literals to pool), and `procedures` (library routines
//! pulled in on first use by [`CodeGen::add_lib_procedure`]).

use crate::ast::{Ast, NodeId, NodeKind};
use crate::config::{CompilerConfig, RegisterPoolPolicy};
use crate::symtab::{Entry, EntryId, EntryKind, ScopeId, SymTabs};
use crate::types::Type;
use std::collections::HashMap;

pub fn generate(ast: &mut Ast, root: NodeId, tabs: &mut SymTabs, global: ScopeId, config: &CompilerConfig) -> String {
    let mut gen = CodeGen::new(tabs, global, config);
    gen.gen_prog(ast, root);
    format!("{}{}{}", gen.exec_code, gen.data_code, gen.procedures)
}

struct CodeGen<'a> {
    tabs: &'a mut SymTabs,
    global: ScopeId,
    config: &'a CompilerConfig,
    general: Vec<String>,
    offset_pool: Vec<String>,
    exec_code: String,
    data_code: String,
    procedures: String,
    available_procedures: HashMap<&'static str, &'static str>,
    indent: &'static str,
    ifstat_num: u32,
    not_num: u32,
    and_num: u32,
    or_num: u32,
    synth_counter: u32,
    /// The function (or main) body currently being visited -- used to
    /// address a callee's frame relative to the caller's and as the scope
    /// synthesized var-chain/temp entries land in.
    current_scope: ScopeId,
}

impl<'a> CodeGen<'a> {
    fn new(tabs: &'a mut SymTabs, global: ScopeId, config: &CompilerConfig) -> Self {
        let general_top = match config.register_pool_policy {
            RegisterPoolPolicy::Disjoint => 8,
            RegisterPoolPolicy::Overlapping => 9,
        };
        let general = (1..=general_top).rev().map(|i| format!("r{i}")).collect();
        let offset_pool = (9..=12).rev().map(|i| format!("r{i}")).collect();
        CodeGen {
            tabs,
            global,
            config,
            general,
            offset_pool,
            exec_code: String::new(),
            data_code: String::new(),
            procedures: String::new(),
            available_procedures: HashMap::from([("putint", PUTINT), ("getint", GETINT)]),
            indent: "      ",
            ifstat_num: 1,
            not_num: 1,
            and_num: 0,
            or_num: 0,
            synth_counter: 0,
            current_scope: global,
        }
    }

    fn reg(&mut self) -> String {
        self.general.pop().expect("general-purpose register pool exhausted")
    }

    fn unreg(&mut self, r: String) {
        self.general.push(r);
    }

    fn offset_reg(&mut self) -> String {
        self.offset_pool.pop().expect("offset register pool exhausted")
    }

    fn add_exec_line(&mut self, line: impl AsRef<str>) {
        self.exec_code.push_str(self.indent);
        self.exec_code.push_str(line.as_ref());
        self.exec_code.push('\n');
    }

    fn add_comment(&mut self, comment: impl AsRef<str>) {
        if !self.config.emit_comments {
            return;
        }
        self.exec_code.push_str("% ");
        self.exec_code.push_str(comment.as_ref());
        self.exec_code.push('\n');
    }

    fn add_header_comment(&mut self, comment: impl AsRef<str>) {
        let rule = "--------------------------------------------------------------%";
        self.add_comment(rule);
        self.add_comment(comment);
        self.add_comment(rule);
    }

    /// Bumps `r14` by `regist` for the duration of the one instruction that
    /// needs it, when the node's load/store goes through an array index.
    fn start_offset_if(&mut self, regist: &Option<String>) {
        if let Some(r) = regist {
            self.add_comment("start array offsetting");
            self.add_exec_line(format!("add r14, r14, {r}"));
        }
    }

    fn end_offset_if(&mut self, regist: Option<String>) {
        if let Some(r) = regist {
            self.add_comment("end array offsetting");
            self.add_exec_line(format!("sub r14, r14, {r}"));
            self.offset_pool.push(r);
        }
    }

    fn add_lib_procedure(&mut self, name: &'static str) {
        if let Some(body) = self.available_procedures.remove(name) {
            self.procedures.push_str(body);
            self.procedures.push('\n');
        }
    }

    fn instruction_for_op(&self, op: &str) -> &'static str {
        match op {
            "+" => "add ",
            "-" => "sub ",
            "or" => "or ",
            "*" => "mul ",
            "/" => "div ",
            "and" => "and ",
            "==" => "ceq ",
            "<>" => "cne ",
            "<" => "clt ",
            ">" => "cgt ",
            "<=" => "cle ",
            ">=" => "cge ",
            other => panic!("no instruction mnemonic for operator '{other}'"),
        }
    }

    fn scalar_size(&self, ty: &Type) -> u32 {
        ty.scalar_size(|name| self.tabs.get_entry(self.global, EntryKind::Class, name).map(|id| self.tabs.entry(id).size))
    }

    fn regist_of(&self, ast: &Ast, node: NodeId) -> Option<String> {
        ast.get(node).regist.clone()
    }

    fn entry_of(&self, ast: &Ast, node: NodeId) -> EntryId {
        ast.get(node)
            .entry
            .unwrap_or_else(|| panic!("codegen reached an expression node with no resolved symbol-table entry"))
    }

    // ---- top-level structure -------------------------------------------

    fn gen_prog(&mut self, ast: &mut Ast, root: NodeId) {
        let children = ast.children(root).to_vec();
        let func_list = children[1];
        let main_body = children[2];
        for &func_def in &ast.children(func_list).to_vec() {
            self.gen_func_def(ast, func_def);
        }
        self.gen_main(ast, main_body);
    }

    fn gen_main(&mut self, ast: &mut Ast, main_body: NodeId) {
        self.add_header_comment("Start of main");
        self.add_exec_line("entry");
        self.add_exec_line("addi r14, r0, topaddr");
        self.exec_code.push('\n');
        self.current_scope = ast.get(main_body).scope.expect("main body has no linked scope");
        self.gen_func_body(ast, main_body);
        self.add_exec_line("hlt");
        self.add_header_comment("End of main");
    }

    fn gen_func_def(&mut self, ast: &mut Ast, func_def: NodeId) {
        let children = ast.children(func_def).to_vec();
        let func_body = children[1];
        let entry_id = ast
            .get(func_def)
            .entry
            .unwrap_or_else(|| panic!("function definition has no linked symbol-table entry"));
        let entry = self.tabs.entry(entry_id).clone();
        let tag = self.func_tag(&entry);
        let ret_size = self.scalar_size(&entry.ty);
        let offset = -(ret_size as i32);

        self.add_header_comment(format!("Start of function definition: {tag}"));
        self.add_exec_line(format!("{tag} sw {offset}(r14), r15"));
        self.current_scope = ast.get(func_body).scope.expect("function body has no linked scope");
        self.gen_func_body(ast, func_body);
        self.add_exec_line(format!("lw r15, {offset}(r14)"));
        self.add_exec_line("jr r15");
        self.add_header_comment(format!("End of function definition: {tag}"));
    }

    fn func_tag(&self, entry: &Entry) -> String {
        let mut tag = format!("{}{}", entry.class, entry.name);
        for (_, ty) in &entry.params {
            tag.push_str(&ty.to_string());
        }
        tag.chars().filter(|c| c.is_alphanumeric()).collect()
    }

    fn gen_func_body(&mut self, ast: &mut Ast, func_body: NodeId) {
        let stat_list = ast.children(func_body)[1];
        for &stat in &ast.children(stat_list).to_vec() {
            self.gen_stat(ast, stat);
        }
    }

    fn gen_block(&mut self, ast: &mut Ast, block: NodeId) {
        for &stat in &ast.children(block).to_vec() {
            self.gen_stat(ast, stat);
        }
    }

    // ---- statements -------------------------------------------------------

    fn gen_stat(&mut self, ast: &mut Ast, stat: NodeId) {
        match ast.get(stat).kind {
            NodeKind::Assign => self.gen_assign(ast, stat),
            NodeKind::IfStat => self.gen_if(ast, stat),
            NodeKind::WhileStat => self.gen_while(ast, stat),
            NodeKind::Read => self.gen_read(ast, stat),
            NodeKind::Write => self.gen_write(ast, stat),
            NodeKind::Return => self.gen_return(ast, stat),
            NodeKind::FuncCall | NodeKind::DataMember | NodeKind::Var => {
                self.gen_expr(ast, stat);
            }
            _ => {}
        }
    }

    fn gen_assign(&mut self, ast: &mut Ast, stat: NodeId) {
        let children = ast.children(stat).to_vec();
        let lhs = children[0];
        let rhs = children[1];
        self.gen_expr(ast, rhs);
        self.gen_expr(ast, lhs);

        let r1 = self.reg();
        let lhs_entry = self.entry_of(ast, lhs);
        let rhs_entry = self.entry_of(ast, rhs);
        let lhs_offset = self.tabs.entry(lhs_entry).offset;
        let rhs_offset = self.tabs.entry(rhs_entry).offset;
        self.add_comment(format!("{} = {}", self.tabs.entry(lhs_entry).name, self.tabs.entry(rhs_entry).name));

        let rhs_regist = self.regist_of(ast, rhs);
        self.start_offset_if(&rhs_regist);
        self.add_exec_line(format!("lw {r1}, {rhs_offset}(r14)"));
        self.end_offset_if(rhs_regist);

        let lhs_regist = self.regist_of(ast, lhs);
        self.start_offset_if(&lhs_regist);
        self.add_exec_line(format!("sw {lhs_offset}(r14), {r1}"));
        self.exec_code.push('\n');
        self.end_offset_if(lhs_regist);

        self.unreg(r1);
    }

    fn gen_if(&mut self, ast: &mut Ast, stat: NodeId) {
        let children = ast.children(stat).to_vec();
        let tagnum = self.ifstat_num;
        self.ifstat_num += 1;
        let elsetag = format!("else{tagnum}");
        let endiftag = format!("endif{tagnum}");

        self.gen_expr(ast, children[0]);
        let r1 = self.reg();
        let cond_entry = self.entry_of(ast, children[0]);
        let cond_offset = self.tabs.entry(cond_entry).offset;
        self.add_comment("if");
        let regist = self.regist_of(ast, children[0]);
        self.start_offset_if(&regist);
        self.add_exec_line(format!("lw {r1}, {cond_offset}(r14)"));
        self.end_offset_if(regist);
        self.add_exec_line(format!("bz {r1}, {elsetag}"));
        self.unreg(r1);

        self.add_comment("then");
        self.gen_block(ast, children[1]);
        self.add_exec_line(format!("j {endiftag}"));
        self.add_comment("else");
        self.add_exec_line(&elsetag);
        self.gen_block(ast, children[2]);
        self.add_exec_line(&endiftag);
    }

    fn gen_while(&mut self, ast: &mut Ast, stat: NodeId) {
        let children = ast.children(stat).to_vec();
        let tagnum = self.ifstat_num;
        self.ifstat_num += 1;
        let gowhiletag = format!("gowhile{tagnum}");
        let endwhiletag = format!("endwhile{tagnum}");

        self.add_comment("while loop");
        self.add_exec_line(&gowhiletag);
        self.gen_expr(ast, children[0]);
        let r1 = self.reg();
        let cond_entry = self.entry_of(ast, children[0]);
        let cond_offset = self.tabs.entry(cond_entry).offset;
        let regist = self.regist_of(ast, children[0]);
        self.start_offset_if(&regist);
        self.add_exec_line(format!("lw {r1}, {cond_offset}(r14)"));
        self.end_offset_if(regist);
        self.add_exec_line(format!("bz {r1}, {endwhiletag}"));
        self.unreg(r1);

        self.add_comment("inside the while loop");
        self.gen_block(ast, children[1]);
        self.add_exec_line(format!("j {gowhiletag}"));
        self.add_exec_line(&endwhiletag);
    }

    fn gen_read(&mut self, ast: &mut Ast, stat: NodeId) {
        let target = ast.children(stat)[0];
        self.gen_expr(ast, target);
        self.add_lib_procedure("getint");
        let entry = self.entry_of(ast, target);
        let offset = self.tabs.entry(entry).offset;
        self.add_comment("reading from stdin");
        self.add_exec_line("jl r15, getint");
        self.exec_code.push('\n');
        let regist = self.regist_of(ast, target);
        self.start_offset_if(&regist);
        self.add_exec_line(format!("sw {offset}(r14), r1"));
        self.exec_code.push('\n');
        self.end_offset_if(regist);
    }

    fn gen_write(&mut self, ast: &mut Ast, stat: NodeId) {
        let expr = ast.children(stat)[0];
        self.gen_expr(ast, expr);
        self.add_lib_procedure("putint");
        let r1 = self.reg();
        let entry = self.entry_of(ast, expr);
        let offset = self.tabs.entry(entry).offset;
        self.add_comment("writing to stdout");
        let regist = self.regist_of(ast, expr);
        self.start_offset_if(&regist);
        self.add_exec_line(format!("lw {r1}, {offset}(r14)"));
        self.end_offset_if(regist);
        self.add_exec_line("jl r15, putint");
        self.exec_code.push('\n');
        self.unreg(r1);
    }

    fn gen_return(&mut self, ast: &mut Ast, stat: NodeId) {
        let expr = ast.children(stat)[0];
        self.gen_expr(ast, expr);
        let r1 = self.reg();
        self.add_comment("return");
        let entry = self.entry_of(ast, expr);
        let offset = self.tabs.entry(entry).offset;
        self.add_exec_line(format!("lw {r1}, {offset}(r14)"));
        self.add_exec_line(format!("sw 0(r14), {r1}"));
        self.unreg(r1);
    }

    // ---- expressions --------------------------------------------------

    fn gen_expr(&mut self, ast: &mut Ast, node: NodeId) {
        match ast.get(node).kind {
            NodeKind::IntNum | NodeKind::FloatNum => self.gen_literal(ast, node),
            NodeKind::AddOp => self.gen_add_op(ast, node),
            NodeKind::MultOp => self.gen_mult_op(ast, node),
            NodeKind::RelOp => self.gen_rel_op(ast, node),
            NodeKind::Not => self.gen_not(ast, node),
            NodeKind::Sign => self.gen_sign(ast, node),
            NodeKind::DataMember => self.gen_data_member(ast, node),
            NodeKind::Var => self.gen_var(ast, node),
            NodeKind::FuncCall => self.gen_func_call(ast, node),
            _ => {}
        }
    }

    fn gen_literal(&mut self, ast: &mut Ast, node: NodeId) {
        let entry = self.entry_of(ast, node);
        let offset = self.tabs.entry(entry).offset;
        let val = ast.get(node).val.clone();
        let r1 = self.reg();
        self.add_comment(format!("storing literal {val}"));
        self.add_exec_line(format!("addi {r1}, r0, {val}"));
        self.add_exec_line(format!("sw {offset}(r14), {r1}"));
        self.exec_code.push('\n');
        self.unreg(r1);
    }

    fn gen_add_op(&mut self, ast: &mut Ast, node: NodeId) {
        let op = ast.get(node).val.clone();
        if op == "or" {
            self.gen_or(ast, node);
            return;
        }
        self.gen_arith_binary(ast, node, &op);
    }

    fn gen_mult_op(&mut self, ast: &mut Ast, node: NodeId) {
        let op = ast.get(node).val.clone();
        if op == "and" {
            self.gen_and(ast, node);
            return;
        }
        self.gen_arith_binary(ast, node, &op);
    }

    fn gen_rel_op(&mut self, ast: &mut Ast, node: NodeId) {
        let op = ast.get(node).val.clone();
        self.gen_arith_binary(ast, node, &op);
    }

    fn gen_arith_binary(&mut self, ast: &mut Ast, node: NodeId, op: &str) {
        let children = ast.children(node).to_vec();
        self.gen_expr(ast, children[0]);
        self.gen_expr(ast, children[1]);

        let instruction = self.instruction_for_op(op);
        let r2 = self.reg();
        let r3 = self.reg();
        let r4 = self.reg();

        let lhs_entry = self.entry_of(ast, children[0]);
        let rhs_entry = self.entry_of(ast, children[1]);
        let lhs_offset = self.tabs.entry(lhs_entry).offset;
        let rhs_offset = self.tabs.entry(rhs_entry).offset;
        let tmp_entry = self.entry_of(ast, node);
        let tmp_offset = self.tabs.entry(tmp_entry).offset;
        let lhs_name = self.tabs.entry(lhs_entry).name.clone();
        let rhs_name = self.tabs.entry(rhs_entry).name.clone();
        self.add_comment(format!("{lhs_name} {op} {rhs_name}"));

        let lhs_regist = self.regist_of(ast, children[0]);
        self.start_offset_if(&lhs_regist);
        self.add_exec_line(format!("lw {r2}, {lhs_offset}(r14)"));
        self.end_offset_if(lhs_regist);

        let rhs_regist = self.regist_of(ast, children[1]);
        self.start_offset_if(&rhs_regist);
        self.add_exec_line(format!("lw {r3}, {rhs_offset}(r14)"));
        self.end_offset_if(rhs_regist);

        self.add_exec_line(format!("{instruction}{r4}, {r2}, {r3}"));
        self.add_exec_line(format!("sw {tmp_offset}(r14), {r4}"));
        self.exec_code.push('\n');

        self.unreg(r4);
        self.unreg(r3);
        self.unreg(r2);
    }

    fn gen_and(&mut self, ast: &mut Ast, node: NodeId) {
        let children = ast.children(node).to_vec();
        self.gen_expr(ast, children[0]);
        self.gen_expr(ast, children[1]);

        let r2 = self.reg();
        let r3 = self.reg();
        let r4 = self.reg();
        let lhs_entry = self.entry_of(ast, children[0]);
        let rhs_entry = self.entry_of(ast, children[1]);
        let lhs_offset = self.tabs.entry(lhs_entry).offset;
        let rhs_offset = self.tabs.entry(rhs_entry).offset;
        let tmp_entry = self.entry_of(ast, node);
        let tmp_offset = self.tabs.entry(tmp_entry).offset;
        let lhs_name = self.tabs.entry(lhs_entry).name.clone();
        let rhs_name = self.tabs.entry(rhs_entry).name.clone();
        self.add_comment(format!("{lhs_name} and {rhs_name}"));

        let lhs_regist = self.regist_of(ast, children[0]);
        self.start_offset_if(&lhs_regist);
        self.add_exec_line(format!("lw {r2}, {lhs_offset}(r14)"));
        self.end_offset_if(lhs_regist);
        let rhs_regist = self.regist_of(ast, children[1]);
        self.start_offset_if(&rhs_regist);
        self.add_exec_line(format!("lw {r3}, {rhs_offset}(r14)"));
        self.end_offset_if(rhs_regist);

        let tagnum = self.and_num;
        self.and_num += 1;
        let endtag = format!("endand{tagnum}");
        let zerotag = format!("andzero{tagnum}");
        self.add_exec_line(format!("bz {r2}, {zerotag}"));
        self.add_exec_line(format!("bz {r3}, {zerotag}"));
        self.add_exec_line(format!("addi {r4}, r0, 1"));
        self.add_exec_line(format!("j {endtag}"));
        self.add_exec_line(format!("{zerotag} addi {r4}, r0, 0"));
        self.add_exec_line(format!("{endtag} sw {tmp_offset}(r14), {r4}"));

        self.unreg(r4);
        self.unreg(r3);
        self.unreg(r2);
    }

    fn gen_or(&mut self, ast: &mut Ast, node: NodeId) {
        let children = ast.children(node).to_vec();
        self.gen_expr(ast, children[0]);
        self.gen_expr(ast, children[1]);

        let r2 = self.reg();
        let r3 = self.reg();
        let r4 = self.reg();
        let lhs_entry = self.entry_of(ast, children[0]);
        let rhs_entry = self.entry_of(ast, children[1]);
        let lhs_offset = self.tabs.entry(lhs_entry).offset;
        let rhs_offset = self.tabs.entry(rhs_entry).offset;
        let tmp_entry = self.entry_of(ast, node);
        let tmp_offset = self.tabs.entry(tmp_entry).offset;
        let lhs_name = self.tabs.entry(lhs_entry).name.clone();
        let rhs_name = self.tabs.entry(rhs_entry).name.clone();
        self.add_comment(format!("{lhs_name} or {rhs_name}"));

        let lhs_regist = self.regist_of(ast, children[0]);
        self.start_offset_if(&lhs_regist);
        self.add_exec_line(format!("lw {r2}, {lhs_offset}(r14)"));
        self.end_offset_if(lhs_regist);
        let rhs_regist = self.regist_of(ast, children[1]);
        self.start_offset_if(&rhs_regist);
        self.add_exec_line(format!("lw {r3}, {rhs_offset}(r14)"));
        self.end_offset_if(rhs_regist);

        let tagnum = self.or_num;
        self.or_num += 1;
        let endtag = format!("endor{tagnum}");
        let nonzerotag = format!("ornonzero{tagnum}");
        self.add_exec_line(format!("bnz {r2}, {nonzerotag}"));
        self.add_exec_line(format!("bnz {r3}, {nonzerotag}"));
        self.add_exec_line(format!("addi {r4}, r0, 0"));
        self.add_exec_line(format!("j {endtag}"));
        self.add_exec_line(format!("{nonzerotag} addi {r4}, r0, 1"));
        self.add_exec_line(format!("{endtag} sw {tmp_offset}(r14), {r4}"));

        self.unreg(r4);
        self.unreg(r3);
        self.unreg(r2);
    }

    fn gen_not(&mut self, ast: &mut Ast, node: NodeId) {
        let child = ast.children(node)[0];
        self.gen_expr(ast, child);
        let r1 = self.reg();
        let tagnum = self.not_num;
        self.not_num += 1;
        let nonzerotag = format!("notnonzero{tagnum}");
        let endtag = format!("endnot{tagnum}");
        self.add_comment("not");
        let tmp_entry = self.entry_of(ast, node);
        let child_entry = self.entry_of(ast, child);
        let tmp_offset = self.tabs.entry(tmp_entry).offset;
        let child_offset = self.tabs.entry(child_entry).offset;
        self.add_exec_line(format!("lw {r1}, {child_offset}(r14)"));
        self.add_exec_line(format!("bnz {r1}, {nonzerotag}"));
        self.add_exec_line(format!("addi {r1}, r0, 1"));
        self.add_exec_line(format!("sw {tmp_offset}(r14), {r1}"));
        self.add_exec_line(format!("j {endtag}"));
        self.add_exec_line(format!("{nonzerotag} sw {tmp_offset}(r14), r0"));
        self.add_exec_line(&endtag);
        self.unreg(r1);
    }

    fn gen_sign(&mut self, ast: &mut Ast, node: NodeId) {
        let child = ast.children(node)[0];
        self.gen_expr(ast, child);

        if ast.get(node).val != "-" {
            ast.get_mut(node).entry = ast.get(child).entry;
            ast.get_mut(node).regist = ast.get(child).regist.clone();
            return;
        }

        let r1 = self.reg();
        let r2 = self.reg();
        let child_entry = self.entry_of(ast, child);
        let tmp_entry = self.entry_of(ast, node);
        let child_offset = self.tabs.entry(child_entry).offset;
        let tmp_offset = self.tabs.entry(tmp_entry).offset;
        self.add_comment("unary minus");

        let child_regist = self.regist_of(ast, child);
        self.start_offset_if(&child_regist);
        self.add_exec_line(format!("lw {r1}, {child_offset}(r14)"));
        self.end_offset_if(child_regist);
        self.add_exec_line(format!("sub {r2}, r0, {r1}"));
        self.add_exec_line(format!("sw {tmp_offset}(r14), {r2}"));

        self.unreg(r2);
        self.unreg(r1);
    }

    /// Computes an offset register for `a[i][j]`-style indexing using each
    /// index's real element stride (the product of every subsequent
    /// dimension's length times the element's own scalar size), not a
    /// hardcoded word size.
    fn gen_data_member(&mut self, ast: &mut Ast, node: NodeId) {
        let children = ast.children(node).to_vec();
        let indice_list = children[1];
        let indices = ast.children(indice_list).to_vec();
        for &idx in &indices {
            self.gen_expr(ast, idx);
        }

        let entry_id = self.entry_of(ast, node);
        if indices.is_empty() {
            return;
        }

        let (dims, elem_size) = {
            let entry = self.tabs.entry(entry_id);
            (entry.dims.clone(), self.scalar_size(entry.ty.base()))
        };

        let regist = self.offset_reg();
        self.add_exec_line(format!("add {regist}, r0, r0"));
        for (i, &idx) in indices.iter().enumerate() {
            self.add_comment("calculating offset");
            let idx_entry = self.entry_of(ast, idx);
            let idx_offset = self.tabs.entry(idx_entry).offset;
            self.add_exec_line(format!("lw r1, {idx_offset}(r14)"));
            let stride: u32 = dims[i + 1..].iter().map(|d| d.unwrap_or(1)).product::<u32>() * elem_size;
            self.add_exec_line(format!("muli r2, r1, {stride}"));
            self.add_exec_line(format!("add {regist}, {regist}, r2"));
        }
        ast.get_mut(node).regist = Some(regist);
    }

    /// Resolves a `head.tail` chain into a single synthesized entry whose
    /// offset already accounts for each hop from the stack-resident base
    /// object down to the final field -- member offsets are stored relative
    /// to their own class's layout, so they're subtracted back out of the
    /// running total at each step rather than simply added.
    fn gen_var(&mut self, ast: &mut Ast, node: NodeId) {
        let segments = self.flatten_var_chain(ast, node);
        for &seg in &segments {
            self.gen_expr(ast, seg);
        }

        let mut offset = 0i32;
        let mut name = String::new();
        let mut sep = "";
        let mut last_ty = Type::Void;
        for &seg in &segments {
            let entry_id = self.entry_of(ast, seg);
            let entry = self.tabs.entry(entry_id).clone();
            name.push_str(sep);
            name.push_str(&entry.name);
            if entry.kind == EntryKind::MemberVar {
                offset -= entry.offset + entry.size as i32;
            } else {
                offset += entry.offset;
            }
            sep = ".";
            last_ty = entry.ty.clone();
        }

        self.synth_counter += 1;
        let synth_name = format!("{name}${}", self.synth_counter);
        let (id, _) = self.tabs.add_local_var(self.current_scope, synth_name, last_ty, 0, Vec::new());
        let id = id.expect("synthesized var-chain entry name collided");
        self.tabs.entry_mut(id).offset = offset;
        ast.get_mut(node).entry = Some(id);
        let head = segments[0];
        ast.get_mut(node).regist = ast.get(head).regist.clone();
    }

    fn flatten_var_chain(&self, ast: &Ast, node: NodeId) -> Vec<NodeId> {
        let children = ast.children(node).to_vec();
        let head = children[0];
        let tail = children[1];
        if ast.get(tail).kind == NodeKind::Var {
            let mut rest = self.flatten_var_chain(ast, tail);
            let mut out = vec![head];
            out.append(&mut rest);
            out
        } else {
            vec![head, tail]
        }
    }

    fn gen_func_call(&mut self, ast: &mut Ast, node: NodeId) {
        let children = ast.children(node).to_vec();
        let callee = children[0];
        let aparams_node = children[1];
        let aparams = ast.children(aparams_node).to_vec();
        for &p in &aparams {
            self.gen_expr(ast, p);
        }

        let entry_id = self.entry_of(ast, node);
        let func_entry_id = ast
            .get(callee)
            .entry
            .expect("function call has no resolved target (mem-size pass should have stashed it on the callee leaf)");
        let func_entry = self.tabs.entry(func_entry_id).clone();
        let tag = self.func_tag(&func_entry);
        let body_scope = func_entry.link.expect("called function has no linked body scope");
        let caller_scope_size = self.caller_scope_size();

        let r1 = self.reg();
        self.add_comment(format!("function call to {tag}"));

        for (i, &param) in aparams.iter().enumerate() {
            let param_entry_id = self.entry_of(ast, param);
            let param_entry = self.tabs.entry(param_entry_id).clone();
            let (pname, _) = &func_entry.params[i];
            let callee_param_id = self
                .tabs
                .get_entry(body_scope, EntryKind::LocalVar, pname)
                .expect("parameter has no matching local entry in callee scope");
            let callee_param_offset = self.tabs.entry(callee_param_id).offset;

            let regist = self.regist_of(ast, param);
            self.start_offset_if(&regist);
            self.add_exec_line(format!("lw {r1}, {}(r14)", param_entry.offset));
            self.end_offset_if(regist);
            self.add_exec_line(format!("sw {}(r14), {r1}", caller_scope_size + callee_param_offset));
        }

        self.add_exec_line(format!("addi r14, r14, {caller_scope_size}"));
        self.add_exec_line(format!("jl r15, {tag}"));
        self.add_exec_line(format!("subi r14, r14, {caller_scope_size}"));
        self.add_exec_line(format!("lw {r1}, {caller_scope_size}(r14)"));
        let tmp_offset = self.tabs.entry(entry_id).offset;
        self.add_exec_line(format!("sw {tmp_offset}(r14), {r1}"));
        self.unreg(r1);
    }

    /// A caller's own frame has already had its offsets assigned by the
    /// mem-size pass; that scope size is the fixed displacement used to
    /// address the callee's frame while `r14` still points at the caller's.
    fn caller_scope_size(&self) -> i32 {
        self.tabs.scope(self.current_scope).scope_size
    }
}

const PUTINT: &str = "\
%
% --------------------------------------------------------------%
% putint                                                        %
% --------------------------------------------------------------%
% Writes an integer to stdout, converting to an ASCII string and
% taking the sign into account.
% Entry : integer number -> r1
% Exit  : none.
%
putint\talign
\tadd\tr2,r0,r0\t\t% buffer index i
\tcge\tr3,r1,r0\t\t% true if N >= 0
\tbnz\tr3,putint1
\tsub\tr1,r0,r1\t\t% N = -N
putint1\tmodi\tr4,r1,10
\taddi\tr4,r4,48
\tdivi\tr1,r1,10
\tsb\tputint9(r2),r4
\taddi\tr2,r2,1
\tbnz\tr1,putint1
\tbnz\tr3,putint2
\taddi\tr3,r0,45
\tsb\tputint9(r2),r3
\taddi\tr2,r2,1
\tadd\tr1,r0,r0
putint2\tsubi\tr2,r2,1
\tlb\tr1,putint9(r2)
\tputc\tr1
\tbnz\tr2,putint2
\taddi\tr2,r0,10
\tputc\tr2
\tjr\tr15
putint9\tres\t12
\talign
";

const GETINT: &str = "\
%
% --------------------------------------------------------------%
% getint                                                        %
% --------------------------------------------------------------%
% Reads an integer from stdin, accepting a leading + or - sign.
% Entry : none.
% Exit  : result -> r1
%
getint\talign
\tadd\tr1,r0,r0
\tadd\tr2,r0,r0
\tadd\tr4,r0,r0
getint1\tgetc\tr1
\tceqi\tr3,r1,43
\tbnz\tr3,getint1
\tceqi\tr3,r1,45
\tbz\tr3,getint2
\taddi\tr4,r0,1
\tj\tgetint1
getint2\tclti\tr3,r1,48
\tbnz\tr3,getint3
\tcgti\tr3,r1,57
\tbnz\tr3,getint3
\tsb\tgetint9(r2),r1
\taddi\tr2,r2,1
\tj\tgetint1
getint3\tsb\tgetint9(r2),r0
\tadd\tr2,r0,r0
\tadd\tr1,r0,r0
\tadd\tr3,r0,r0
getint4\tlb\tr3,getint9(r2)
\tbz\tr3,getint5
\tsubi\tr3,r3,48
\tmuli\tr1,r1,10
\tadd\tr1,r1,r3
\taddi\tr2,r2,1
\tj\tgetint4
getint5\tbz\tr4,getint6
\tsub\tr1,r0,r1
getint6\tjr\tr15
getint9\tres\t12
\talign
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::grammar::Grammar;
    use crate::lexer::Lexer;
    use crate::memsize;
    use crate::parser::parse_tokens;
    use crate::symtab_visitor;
    use crate::token::TokenType;
    use crate::typecheck;

    fn compile(src: &str) -> String {
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
        let mut diags = crate::diagnostics::Diagnostics::new();
        let mut result = symtab_visitor::build(&mut ast, root, &mut diags);
        typecheck::check(&mut ast, root, &result, &mut diags);
        memsize::assign(&mut ast, root, &mut result, &mut diags);
        assert!(!diags.has_errors(), "{}", diags.render());
        let config = CompilerConfig::default();
        generate(&mut ast, root, &mut result.tabs, result.global, &config)
    }

    #[test]
    fn write_of_a_literal_emits_entry_and_putint_call() {
        let asm = compile("main {\n write(42);\n}\n");
        assert!(asm.contains("entry"));
        assert!(asm.contains("jl r15, putint"));
        assert!(asm.contains("putint\talign"));
    }

    #[test]
    fn arithmetic_emits_add_and_store() {
        let asm = compile("main {\n write(1 + 2);\n}\n");
        assert!(asm.contains("add r4, r2, r3"));
    }

    #[test]
    fn while_loop_emits_matching_labels() {
        let asm = compile("main {\n local x: integer;\n x = 1;\n while (x < 5) x = x + 1;\n}\n");
        assert!(asm.contains("gowhile"));
        assert!(asm.contains("endwhile"));
    }

    #[test]
    fn function_call_emits_jump_and_link() {
        let src = "f(): integer {\n return(1)\n}\nmain {\n local x: integer;\n x = f();\n}\n";
        let asm = compile(src);
        assert!(asm.contains("jl r15,"));
    }
}
