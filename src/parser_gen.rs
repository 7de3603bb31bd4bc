//! FIRST/FOLLOW computation and LL(1) parsing-table construction.
//!
//! FOLLOW is computed in two passes: a direct pass that adds whatever a
//! production's right-hand side contributes locally, plus a dependency
//! graph recording "FOLLOW(A) must also include FOLLOW(B)" edges for the
//! cases that can't be resolved locally (B is the last symbol of a
//! production for A, or every symbol after B in the production is
//! nullable). The graph is then closed with a BFS so dependencies
//! propagate however deep the chain runs.

use crate::grammar::{Grammar, Production, Rhs, Symbol, SymbolType};
use std::collections::{HashMap, HashSet, VecDeque};

pub struct ParserGen {
    grammar: Grammar,
    first: HashMap<Symbol, HashSet<Symbol>>,
    follow: HashMap<Symbol, HashSet<Symbol>>,
}

impl ParserGen {
    pub fn new(grammar: Grammar) -> Self {
        let mut gen = ParserGen {
            grammar,
            first: HashMap::new(),
            follow: HashMap::new(),
        };
        gen.compute_first();
        gen.compute_follow();
        gen
    }

    pub fn first_of(&self, symb: &Symbol) -> &HashSet<Symbol> {
        &self.first[symb]
    }

    pub fn follow_of(&self, symb: &Symbol) -> &HashSet<Symbol> {
        &self.follow[symb]
    }

    fn compute_first(&mut self) {
        for nt in self.grammar.nonterminals() {
            self.first.entry(nt.clone()).or_default();
        }
        let mut changed = true;
        while changed {
            changed = false;
            let nonterms: Vec<Symbol> = self.first.keys().cloned().collect();
            for nt in nonterms {
                for (_, rhs) in self.grammar.productions_for_symbol(&nt) {
                    let (set, _) = self.first_of_sequence(&rhs);
                    let entry = self.first.get_mut(&nt).unwrap();
                    let before = entry.len();
                    entry.extend(set);
                    if entry.len() != before {
                        changed = true;
                    }
                }
            }
        }
    }

    /// FIRST of a whole symbol sequence: union FIRST of each symbol in turn,
    /// stopping at the first non-nullable one. Returns the set plus whether
    /// the whole sequence is nullable (epsilon).
    fn first_of_sequence(&self, seq: &[Symbol]) -> (HashSet<Symbol>, bool) {
        let mut out = HashSet::new();
        if seq.is_empty() {
            out.insert(Symbol::epsilon());
            return (out, true);
        }
        for symb in seq {
            let symb_first = match symb.ty() {
                SymbolType::Term | SymbolType::End => {
                    let mut s = HashSet::new();
                    s.insert(symb.clone());
                    s
                }
                SymbolType::Epsilon => {
                    let mut s = HashSet::new();
                    s.insert(Symbol::epsilon());
                    s
                }
                SymbolType::NonTerm | SymbolType::Start => {
                    self.first.get(symb).cloned().unwrap_or_default()
                }
                SymbolType::Action => continue,
            };
            let nullable = symb_first.contains(&Symbol::epsilon());
            out.extend(symb_first.iter().filter(|s| s.ty() != SymbolType::Epsilon).cloned());
            if !nullable {
                return (out, false);
            }
        }
        out.insert(Symbol::epsilon());
        (out, true)
    }

    fn compute_follow(&mut self) {
        for nt in self.grammar.nonterminals() {
            self.follow.entry(nt.clone()).or_default();
        }
        let start = Symbol::start();
        if let Some(set) = self.follow.get_mut(&start) {
            set.insert(Symbol::end());
        } else {
            let mut set = HashSet::new();
            set.insert(Symbol::end());
            self.follow.insert(start, set);
        }

        let mut deps: HashMap<Symbol, HashSet<Symbol>> = HashMap::new();
        let nonterms: Vec<Symbol> = self.grammar.nonterminals().cloned().collect();
        for lhs in &nonterms {
            for (_, rhs) in self.grammar.productions_for_symbol(lhs) {
                self.direct_follow_pass(lhs, &rhs, &mut deps);
            }
        }
        self.resolve_dependencies(&deps);
    }

    /// One production's direct contribution to FOLLOW, plus any
    /// "FOLLOW(B) needs FOLLOW(lhs)" edges it creates.
    fn direct_follow_pass(&mut self, lhs: &Symbol, rhs: &Rhs, deps: &mut HashMap<Symbol, HashSet<Symbol>>) {
        let symbols: Vec<&Symbol> = rhs.iter().filter(|s| s.ty() != SymbolType::Action).collect();
        for (i, symb) in symbols.iter().enumerate() {
            if symb.ty() != SymbolType::NonTerm {
                continue;
            }
            let rest = &symbols[i + 1..];
            let rest_owned: Vec<Symbol> = rest.iter().map(|s| (*s).clone()).collect();
            let (rest_first, rest_nullable) = self.first_of_sequence(&rest_owned);
            let entry = self.follow.entry((*symb).clone()).or_default();
            entry.extend(rest_first.iter().filter(|s| s.ty() != SymbolType::Epsilon).cloned());
            if rest.is_empty() || rest_nullable {
                deps.entry((*symb).clone()).or_default().insert(lhs.clone());
            }
        }
    }

    /// BFS closure over the dependency graph: propagate FOLLOW(from) into
    /// FOLLOW(to) for every recorded `to -> from` edge, repeating until the
    /// whole graph is saturated.
    fn resolve_dependencies(&mut self, deps: &HashMap<Symbol, HashSet<Symbol>>) {
        let mut queue: VecDeque<Symbol> = deps.keys().cloned().collect();
        let mut in_queue: HashSet<Symbol> = queue.iter().cloned().collect();
        while let Some(to) = queue.pop_front() {
            in_queue.remove(&to);
            let Some(froms) = deps.get(&to) else { continue };
            let mut added_any = false;
            for from in froms {
                let from_set = self.follow.get(from).cloned().unwrap_or_default();
                let to_set = self.follow.entry(to.clone()).or_default();
                let before = to_set.len();
                to_set.extend(from_set);
                if to_set.len() != before {
                    added_any = true;
                }
            }
            if added_any {
                for (dependent, froms2) in deps {
                    if froms2.contains(&to) && !in_queue.contains(dependent) {
                        queue.push_back(dependent.clone());
                        in_queue.insert(dependent.clone());
                    }
                }
            }
        }
    }

    /// Builds the LL(1) parsing table. On a FIRST/FIRST or FIRST/FOLLOW
    /// conflict the later production in grammar-file order wins.
    pub fn build_table(&self) -> ParsingTable {
        let mut table: HashMap<(Symbol, Symbol), Production> = HashMap::new();
        let nonterms: Vec<Symbol> = self.grammar.nonterminals().cloned().collect();
        for lhs in &nonterms {
            for (lhs2, raw_rhs) in self.grammar.raw_productions_for_symbol(lhs) {
                let stripped: Rhs = raw_rhs
                    .iter()
                    .filter(|s| s.ty() != SymbolType::Action)
                    .cloned()
                    .collect();
                let (first_set, nullable) = self.first_of_sequence(&stripped);
                for term in first_set.iter().filter(|s| s.ty() != SymbolType::Epsilon) {
                    table.insert((lhs2.clone(), term.clone()), (lhs2.clone(), raw_rhs.clone()));
                }
                if nullable {
                    for term in self.follow.get(lhs).cloned().unwrap_or_default() {
                        table.insert((lhs2.clone(), term.clone()), (lhs2.clone(), raw_rhs.clone()));
                    }
                }
            }
        }
        ParsingTable { table }
    }
}

/// The LL(1) parsing table: `(nonterminal, lookahead terminal) -> production`,
/// productions retained with their semantic actions intact.
pub struct ParsingTable {
    table: HashMap<(Symbol, Symbol), Production>,
}

impl ParsingTable {
    pub fn lookup(&self, lhs: &Symbol, lookahead: &Symbol) -> Option<&Production> {
        self.table.get(&(lhs.clone(), lookahead.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_grammar() -> Grammar {
        // <S> ::= 'a' <A> 'b' | EPSILON
        // <A> ::= 'c' | EPSILON
        Grammar::parse(
            "<START> ::= <S>\n\
             <S> ::= 'a' <A> 'b'\n\
             <S> ::= EPSILON\n\
             <A> ::= 'c'\n\
             <A> ::= EPSILON\n",
        )
    }

    #[test]
    fn first_sets_include_nullable_epsilon_propagation() {
        let gen = ParserGen::new(toy_grammar());
        let s = Symbol::parse("<S>");
        let first_s = gen.first_of(&s);
        assert!(first_s.contains(&Symbol::parse("'a'")));
        assert!(first_s.contains(&Symbol::epsilon()));
    }

    #[test]
    fn follow_of_nonterm_includes_what_comes_after() {
        let gen = ParserGen::new(toy_grammar());
        let a = Symbol::parse("<A>");
        let follow_a = gen.follow_of(&a);
        assert!(follow_a.contains(&Symbol::parse("'b'")));
    }

    #[test]
    fn follow_of_start_includes_end_marker() {
        let gen = ParserGen::new(toy_grammar());
        let follow_start = gen.follow_of(&Symbol::start());
        assert!(follow_start.contains(&Symbol::end()));
    }

    #[test]
    fn table_lookup_resolves_production_by_lookahead() {
        let gen = ParserGen::new(toy_grammar());
        let table = gen.build_table();
        let s = Symbol::parse("<S>");
        let prod = table.lookup(&s, &Symbol::parse("'a'"));
        assert!(prod.is_some());
        assert_eq!(prod.unwrap().1[0], Symbol::parse("'a'"));
    }

    #[test]
    fn epsilon_production_reachable_via_follow_set() {
        let gen = ParserGen::new(toy_grammar());
        let table = gen.build_table();
        let a = Symbol::parse("<A>");
        // <A> can go to EPSILON when lookahead is 'b' (FOLLOW(<A>))
        let prod = table.lookup(&a, &Symbol::parse("'b'"));
        assert!(prod.is_some());
        assert_eq!(prod.unwrap().1, vec![Symbol::epsilon()]);
    }

    #[test]
    fn embedded_grammar_builds_a_table_without_panicking() {
        let gen = ParserGen::new(Grammar::parse(crate::grammar::embedded_grammar()));
        let _table = gen.build_table();
    }
}
