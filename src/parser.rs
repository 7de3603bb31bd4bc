//! Two-stack LL(1) parser driver.
//!
//! Parsing keeps two stacks: the symbol stack (grammar symbols still to be
//! matched, seeded with `['$', <START>]`) and the semantic stack (partially
//! built AST pieces). Terminals on top of the symbol stack are matched
//! against the lookahead token; nonterminals are expanded via the parsing
//! table; semantic-action symbols run one of a handful of primitives against
//! the semantic stack. The symbol stack empties exactly when the lookahead
//! is the end-of-stream marker.

use crate::ast::{Ast, NodeId, NodeKind};
use crate::grammar::{Grammar, Symbol, SymbolType};
use crate::parser_gen::ParsingTable;
use crate::token::{Token, TokenType};

pub struct ParseError {
    pub message: String,
    pub line: u32,
}

pub struct Parser<'a> {
    table: &'a ParsingTable,
    tokens: Vec<Token>,
    pos: usize,
    symbol_stack: Vec<Symbol>,
    semantic_stack: Vec<Option<NodeId>>,
    pending_visibility: Vec<String>,
    prev_token: Token,
    ast: Ast,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    pub fn new(table: &'a ParsingTable, tokens: Vec<Token>) -> Self {
        // Vec's top is its last element: '$' sits at the bottom, <START> on
        // top so it's expanded first.
        let symbol_stack = vec![Symbol::end(), Symbol::start()];
        Parser {
            table,
            tokens,
            pos: 0,
            symbol_stack,
            semantic_stack: Vec::new(),
            pending_visibility: Vec::new(),
            prev_token: Token::new(TokenType::Eos, String::new(), 0),
            ast: Ast::new(),
            errors: Vec::new(),
        }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        self.prev_token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    /// Runs the driver to completion, returning the finished AST and its
    /// root node, plus any syntax errors encountered (recovered from by
    /// simple panic-mode skipping).
    pub fn parse(mut self) -> (Ast, Option<NodeId>, Vec<ParseError>) {
        loop {
            let Some(top) = self.symbol_stack.last().cloned() else {
                break;
            };
            match top.ty() {
                SymbolType::End => {
                    if self.current().ty == TokenType::Eos {
                        self.symbol_stack.pop();
                        break;
                    }
                    self.errors.push(ParseError {
                        message: format!("unexpected trailing input: {}", self.current()),
                        line: self.current().line,
                    });
                    break;
                }
                SymbolType::Term => {
                    if top.matches_token(self.current()) {
                        self.symbol_stack.pop();
                        self.advance();
                    } else {
                        self.errors.push(ParseError {
                            message: format!("expected {top}, found {}", self.current()),
                            line: self.current().line,
                        });
                        self.symbol_stack.pop();
                    }
                }
                SymbolType::Action => {
                    self.symbol_stack.pop();
                    self.run_action(top.raw_str());
                }
                SymbolType::NonTerm | SymbolType::Start => {
                    let lookahead = Symbol::from_token(self.current());
                    match self.table.lookup(&top, &lookahead) {
                        Some((_, rhs)) => {
                            self.symbol_stack.pop();
                            for symb in rhs.iter().rev() {
                                if symb.ty() != SymbolType::Epsilon {
                                    self.symbol_stack.push(symb.clone());
                                }
                            }
                        }
                        None => {
                            self.errors.push(ParseError {
                                message: format!("unexpected {} while parsing {top}", self.current()),
                                line: self.current().line,
                            });
                            self.symbol_stack.pop();
                        }
                    }
                }
                SymbolType::Epsilon => {
                    self.symbol_stack.pop();
                }
            }
        }
        let root = self.semantic_stack.last().copied().flatten();
        (self.ast, root, self.errors)
    }

    fn push_marker(&mut self) {
        self.semantic_stack.push(None);
    }

    fn pop_node(&mut self) -> NodeId {
        match self.semantic_stack.pop() {
            Some(Some(id)) => id,
            _ => unreachable!("semantic stack underflow or unexpected marker"),
        }
    }

    /// Pops siblings down to (and including) the nearest marker, returning
    /// them in the order they were pushed.
    fn pop_to_marker(&mut self) -> Vec<NodeId> {
        let mut rev = Vec::new();
        while let Some(top) = self.semantic_stack.pop() {
            match top {
                Some(id) => rev.push(id),
                None => break,
            }
        }
        rev.reverse();
        rev
    }

    fn run_action(&mut self, action: &str) {
        if action == "start" {
            self.push_marker();
            return;
        }
        if action == "op" {
            self.op_action();
            return;
        }
        if action == "op_assign" {
            let rhs = self.pop_node();
            let lvalue = self.pop_node();
            let node = self.ast.push_internal(NodeKind::Assign, vec![lvalue, rhs]);
            self.semantic_stack.push(Some(node));
            return;
        }
        if action == "end_sign" {
            self.end_sign_action();
            return;
        }
        if action == "end_scoperes" {
            self.end_scope_res_action();
            return;
        }
        if action == "end_funcCall" {
            let params = self.pop_node();
            let name = self.pop_node();
            let node = self.ast.push_internal(NodeKind::FuncCall, vec![name, params]);
            self.semantic_stack.push(Some(node));
            return;
        }
        if action == "end_dataMember" {
            let indices = self.pop_node();
            let name = self.pop_node();
            let node = self.ast.push_internal(NodeKind::DataMember, vec![name, indices]);
            self.semantic_stack.push(Some(node));
            return;
        }
        if action == "end_var" {
            let tail = self.pop_node();
            let head = self.ast.push_internal(NodeKind::Var, vec![self.pop_node(), tail]);
            self.semantic_stack.push(Some(head));
            return;
        }
        if let Some(kind_name) = action.strip_prefix("push_") {
            self.push_action(kind_name);
            return;
        }
        if let Some(kind_name) = action.strip_prefix("end_") {
            self.generic_end_action(kind_name);
            return;
        }
        unreachable!("unhandled semantic action '{action}'");
    }

    fn push_action(&mut self, what: &str) {
        let tk = self.prev_token.clone();
        match what {
            "id" => {
                let node = self.ast.push_leaf(NodeKind::Id, tk.lexeme.clone(), tk.line);
                self.semantic_stack.push(Some(node));
            }
            "type" => {
                let node = self.ast.push_leaf(NodeKind::Type, tk.lexeme.clone(), tk.line);
                self.semantic_stack.push(Some(node));
            }
            "dim" => {
                let val = if tk.ty == TokenType::IntNum { tk.lexeme.clone() } else { String::new() };
                let node = self.ast.push_leaf(NodeKind::Dim, val, tk.line);
                self.semantic_stack.push(Some(node));
            }
            "intnum" => {
                let node = self.ast.push_leaf(NodeKind::IntNum, tk.lexeme.clone(), tk.line);
                self.semantic_stack.push(Some(node));
            }
            "floatnum" => {
                let node = self.ast.push_leaf(NodeKind::FloatNum, tk.lexeme.clone(), tk.line);
                self.semantic_stack.push(Some(node));
            }
            "relop" => {
                let node = self.ast.push_leaf(NodeKind::RelOp, tk.lexeme.clone(), tk.line);
                self.semantic_stack.push(Some(node));
            }
            "addop" => {
                let node = self.ast.push_leaf(NodeKind::AddOp, tk.lexeme.clone(), tk.line);
                self.semantic_stack.push(Some(node));
            }
            "multop" => {
                let node = self.ast.push_leaf(NodeKind::MultOp, tk.lexeme.clone(), tk.line);
                self.semantic_stack.push(Some(node));
            }
            "sign" => {
                let node = self.ast.push_leaf(NodeKind::Sign, tk.lexeme.clone(), tk.line);
                self.semantic_stack.push(Some(node));
            }
            "visibility" => {
                let text = match tk.ty {
                    TokenType::Public => "public",
                    TokenType::Private => "private",
                    _ => "public",
                };
                self.pending_visibility.push(text.to_string());
            }
            other => unreachable!("unhandled push action 'push_{other}'"),
        }
    }

    /// Pop-to-marker actions: build one new node of `kind` from whatever sits
    /// above the nearest marker (an empty list if the marker is on top).
    fn generic_end_action(&mut self, kind_name: &str) {
        let children = self.pop_to_marker();
        let kind = match kind_name {
            "prog" => NodeKind::Prog,
            "classDeclList" => NodeKind::ClassDeclList,
            "class" => NodeKind::Class,
            "inheritList" => NodeKind::InheritList,
            "memberVarDecl" => NodeKind::MemberVarDecl,
            "memberFuncDecl" => NodeKind::MemberFuncDecl,
            "funcDefList" => NodeKind::FuncDefList,
            "funcDef" => NodeKind::FuncDef,
            "funcHead" => NodeKind::FuncHead,
            "fParamsList" => NodeKind::FParamsList,
            "fParam" => NodeKind::FParam,
            "varDecl" => NodeKind::VarDecl,
            "funcBody" => {
                let (var_decls, stats): (Vec<NodeId>, Vec<NodeId>) = children
                    .into_iter()
                    .partition(|id| self.ast.get(*id).kind == NodeKind::VarDecl);
                let var_list = self.ast.push_internal(NodeKind::VarDeclList, var_decls);
                let stat_list = self.ast.push_internal(NodeKind::StatList, stats);
                let node = self.ast.push_internal(NodeKind::FuncBody, vec![var_list, stat_list]);
                self.semantic_stack.push(Some(node));
                return;
            }
            "statBlock" => NodeKind::StatBlock,
            "ifStat" => NodeKind::IfStat,
            "whileStat" => NodeKind::WhileStat,
            "read" => NodeKind::Read,
            "write" => NodeKind::Write,
            "return" => NodeKind::Return,
            "aParamsList" => NodeKind::AParamsList,
            "indiceList" => NodeKind::IndiceList,
            "not" => NodeKind::Not,
            other => unreachable!("unhandled end action 'end_{other}'"),
        };

        if kind_name == "memberVarDecl" || kind_name == "memberFuncDecl" {
            let visibility = self.pending_visibility.pop().unwrap_or_else(|| "public".to_string());
            let node = self.ast.push_internal(kind, children);
            self.ast.get_mut(node).val = visibility;
            self.semantic_stack.push(Some(node));
            return;
        }

        let node = self.ast.push_internal(kind, children);
        if kind_name == "class" {
            if let Some(&name_child) = node_children_first(&self.ast, node) {
                let name = self.ast.get(name_child).val.clone();
                self.ast.get_mut(node).val = name;
            }
        }
        if kind_name == "prog" {
            // children: [ClassDeclList, FuncDefList, FuncBody-of-main]; retag
            // the main block so downstream passes can tell it apart from an
            // ordinary function body.
            let all = self.ast.children(node).to_vec();
            if let Some(&main_body) = all.last() {
                self.ast.get_mut(main_body).kind = NodeKind::Main;
            }
        }
        self.semantic_stack.push(Some(node));
    }

    fn op_action(&mut self) {
        let n1 = self.pop_node();
        let n2 = self.pop_node();
        let n3 = self.pop_node();
        self.ast.get_mut(n2).children.push(n3);
        self.ast.get_mut(n2).children.push(n1);
        self.semantic_stack.push(Some(n2));
    }

    fn end_sign_action(&mut self) {
        let factor = self.pop_node();
        let sign_leaf = self.pop_node();
        self.semantic_stack.pop(); // discard the marker below the sign leaf
        self.ast.get_mut(sign_leaf).children = vec![factor];
        self.semantic_stack.push(Some(sign_leaf));
    }

    fn end_scope_res_action(&mut self) {
        let method = self.pop_node();
        let class_name = self.pop_node();
        let node = self.ast.push_internal(NodeKind::ScopeRes, vec![class_name, method]);
        self.semantic_stack.push(Some(node));
    }
}

fn node_children_first(ast: &Ast, node: NodeId) -> Option<&NodeId> {
    ast.children(node).first()
}

/// Parses a fully lexed, comment-filtered token stream (with a trailing
/// `Eos` token) against `grammar`, returning the resulting AST and its root.
pub fn parse_tokens(grammar: &Grammar, tokens: Vec<Token>) -> Result<(Ast, NodeId), Vec<ParseError>> {
    let gen = crate::parser_gen::ParserGen::new(grammar.clone());
    let table = gen.build_table();
    let parser = Parser::new(&table, tokens);
    let (ast, root, errors) = parser.parse();
    if !errors.is_empty() {
        return Err(errors);
    }
    match root {
        Some(root) => Ok((ast, root)),
        None => Err(vec![ParseError {
            message: "parser produced no root node".to_string(),
            line: 0,
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn lex_all(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tk = lexer.next_token();
            let done = tk.ty == TokenType::Eos;
            if !tk.is_comment() {
                out.push(tk);
            }
            if done {
                break;
            }
        }
        out
    }

    fn embedded_grammar_parsed() -> Grammar {
        Grammar::parse(crate::grammar::embedded_grammar())
    }

    #[test]
    fn parses_empty_program() {
        let src = "main {\n}\n";
        let tokens = lex_all(src);
        let grammar = embedded_grammar_parsed();
        let (ast, root) = parse_tokens(&grammar, tokens).unwrap_or_else(|errs| {
            panic!("parse errors: {}", errs.iter().map(|e| e.message.clone()).collect::<Vec<_>>().join("; "))
        });
        assert_eq!(ast.get(root).kind, NodeKind::Prog);
    }

    #[test]
    fn parses_a_write_statement() {
        let src = "main {\n write(1);\n}\n";
        let tokens = lex_all(src);
        let grammar = embedded_grammar_parsed();
        let (ast, root) = parse_tokens(&grammar, tokens).expect("should parse");
        let prog = ast.get(root);
        assert_eq!(prog.kind, NodeKind::Prog);
        let main_body = *prog.children.last().unwrap();
        assert_eq!(ast.get(main_body).kind, NodeKind::Main);
    }

    #[test]
    fn parses_arithmetic_expression_with_precedence() {
        let src = "main {\n write(1 + 2 * 3);\n}\n";
        let tokens = lex_all(src);
        let grammar = embedded_grammar_parsed();
        let (ast, root) = parse_tokens(&grammar, tokens).expect("should parse");
        // write's child is the arith expr root: should be an AddOp node at the top.
        let main_body = *ast.get(root).children.last().unwrap();
        let stat_list = ast.children(main_body)[1];
        let write_stat = ast.children(stat_list)[0];
        let expr_root = ast.children(write_stat)[0];
        assert_eq!(ast.get(expr_root).kind, NodeKind::AddOp);
    }

    #[test]
    fn parses_class_with_inheritance_and_member_var() {
        let src = "class Base {\n public x: integer;\n};\nclass Derived inherits Base {\n};\nmain {\n}\n";
        let tokens = lex_all(src);
        let grammar = embedded_grammar_parsed();
        let (ast, root) = parse_tokens(&grammar, tokens).expect("should parse");
        let class_list = ast.children(root)[0];
        assert_eq!(ast.children(class_list).len(), 2);
        let derived = ast.children(class_list)[1];
        assert_eq!(ast.get(derived).val, "Derived");
    }

    #[test]
    fn reports_error_on_malformed_input() {
        let src = "main {\n write(;\n}\n";
        let tokens = lex_all(src);
        let grammar = embedded_grammar_parsed();
        let result = parse_tokens(&grammar, tokens);
        assert!(result.is_err());
    }
}
