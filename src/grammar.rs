//! Grammar symbols and the context-free grammar they form.
//!
//! A grammar is a map from left-hand-side [`Symbol`] to the list of its
//! right-hand-side alternatives (each a sequence of symbols, semantic
//! actions included).

use crate::token::Token;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// The embedded LL(1) grammar text for the source language, loaded once and
/// shared for the lifetime of the process.
static EMBEDDED_GRAMMAR: LazyLock<&'static str> =
    LazyLock::new(|| include_str!("../grammar/source_language.g"));

/// Returns the text of the embedded grammar. The on-disk grammar file
/// *format* is not part of this crate's contract; this text is simply the
/// one concrete grammar shipped with the compiler.
pub fn embedded_grammar() -> &'static str {
    &EMBEDDED_GRAMMAR
}

/// The kind of a grammar symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolType {
    Term,
    NonTerm,
    Action,
    Epsilon,
    Start,
    End,
}

/// A symbol in a grammar production: a terminal (`'if'`), a nonterminal
/// (`<stmt>`), a semantic action (`!push!`), or one of the three sentinels
/// `EPSILON`, `<START>`, `'$'`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    raw: String,
    ty: SymbolType,
}

impl Symbol {
    /// Parses a symbol from its textual grammar-file spelling.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let ty = if s == "EPSILON" {
            SymbolType::Epsilon
        } else if s == "'$'" {
            SymbolType::End
        } else if s == "<START>" {
            SymbolType::Start
        } else if s.starts_with('!') && s.ends_with('!') && s.len() >= 2 {
            SymbolType::Action
        } else if s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2 {
            SymbolType::Term
        } else {
            SymbolType::NonTerm
        };
        Symbol {
            raw: s.to_string(),
            ty,
        }
    }

    pub fn epsilon() -> Self {
        Symbol {
            raw: "EPSILON".to_string(),
            ty: SymbolType::Epsilon,
        }
    }

    pub fn start() -> Self {
        Symbol {
            raw: "<START>".to_string(),
            ty: SymbolType::Start,
        }
    }

    pub fn end() -> Self {
        Symbol {
            raw: "'$'".to_string(),
            ty: SymbolType::End,
        }
    }

    /// Builds the terminal symbol matching a given token's type.
    pub fn from_token(tk: &Token) -> Self {
        Symbol::parse(&format!("'{}'", tk.ty))
    }

    pub fn ty(&self) -> SymbolType {
        self.ty
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The symbol text with surrounding quotes/brackets/bangs stripped.
    pub fn raw_str(&self) -> &str {
        match self.ty {
            SymbolType::Term | SymbolType::Action => &self.raw[1..self.raw.len() - 1],
            _ => &self.raw,
        }
    }

    pub fn is_term(&self) -> bool {
        matches!(self.ty, SymbolType::Term | SymbolType::Epsilon)
    }

    /// True if this terminal symbol matches the given token's type.
    pub fn matches_token(&self, tk: &Token) -> bool {
        self.raw_str() == tk.ty.as_str()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

pub type Rhs = Vec<Symbol>;
pub type Production = (Symbol, Rhs);

/// A context-free grammar: left-hand-side symbols mapped to their ordered
/// list of right-hand-side alternatives.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    productions: BTreeMap<Symbol, Vec<Rhs>>,
}

impl Grammar {
    /// Parses a grammar from text in the `<lhs> ::= sym sym ...` format, one
    /// production per line, blank lines ignored.
    pub fn parse(text: &str) -> Self {
        let mut productions: BTreeMap<Symbol, Vec<Rhs>> = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(idx) = line.find("::=") else {
                continue;
            };
            let lhs = Symbol::parse(&line[..idx]);
            let rhs: Rhs = line[idx + 3..]
                .split_whitespace()
                .map(Symbol::parse)
                .collect();
            productions.entry(lhs).or_default().push(rhs);
        }
        Grammar { productions }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Vec<Rhs>)> {
        self.productions.iter()
    }

    /// Productions with `symb` as the left-hand side, with semantic-action
    /// symbols stripped from each right-hand side.
    pub fn productions_for_symbol(&self, symb: &Symbol) -> Vec<Production> {
        self.productions
            .get(symb)
            .into_iter()
            .flat_map(|rhss| rhss.iter())
            .map(|rhs| (symb.clone(), strip_actions(rhs)))
            .collect()
    }

    /// Same as [`Self::productions_for_symbol`] but keeps semantic-action
    /// symbols in place -- what the parser driver needs to execute actions
    /// while it shifts/reduces.
    pub fn raw_productions_for_symbol(&self, symb: &Symbol) -> Vec<Production> {
        self.productions
            .get(symb)
            .into_iter()
            .flat_map(|rhss| rhss.iter())
            .map(|rhs| (symb.clone(), rhs.clone()))
            .collect()
    }

    /// Every nonterminal that appears as a left-hand side.
    pub fn nonterminals(&self) -> impl Iterator<Item = &Symbol> {
        self.productions.keys()
    }

    /// All productions in which `symb` appears anywhere on the right-hand
    /// side, action symbols stripped.
    pub fn productions_with_symbol(&self, symb: &Symbol) -> Vec<Production> {
        let mut out = Vec::new();
        for (lhs, rhss) in &self.productions {
            for rhs in rhss {
                if rhs.contains(symb) {
                    out.push((lhs.clone(), strip_actions(rhs)));
                }
            }
        }
        out
    }
}

fn strip_actions(rhs: &[Symbol]) -> Rhs {
    rhs.iter()
        .filter(|s| s.ty() != SymbolType::Action)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_symbol_kinds() {
        assert_eq!(Symbol::parse("'if'").ty(), SymbolType::Term);
        assert_eq!(Symbol::parse("<stmt>").ty(), SymbolType::NonTerm);
        assert_eq!(Symbol::parse("!push!").ty(), SymbolType::Action);
        assert_eq!(Symbol::parse("EPSILON").ty(), SymbolType::Epsilon);
        assert_eq!(Symbol::parse("<START>").ty(), SymbolType::Start);
        assert_eq!(Symbol::parse("'$'").ty(), SymbolType::End);
    }

    #[test]
    fn raw_str_strips_delimiters() {
        assert_eq!(Symbol::parse("'if'").raw_str(), "if");
        assert_eq!(Symbol::parse("!push_id!").raw_str(), "push_id");
    }

    #[test]
    fn parses_simple_grammar() {
        let g = Grammar::parse("<a> ::= 'x' <b>\n<a> ::= EPSILON\n<b> ::= 'y'\n");
        let prods = g.productions_for_symbol(&Symbol::parse("<a>"));
        assert_eq!(prods.len(), 2);
        assert_eq!(prods[0].1.len(), 2);
        assert_eq!(prods[1].1.len(), 1);
    }

    #[test]
    fn embedded_grammar_loads_and_parses() {
        let g = Grammar::parse(embedded_grammar());
        assert!(g.productions_for_symbol(&Symbol::start()).len() >= 1);
    }
}
