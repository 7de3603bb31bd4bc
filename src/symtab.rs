//! Arena-based symbol tables.
//!
//! Scopes and entries are addressed by integer handles (`ScopeId`,
//! `EntryId`) into flat arenas owned by [`SymTabs`], replacing the original
//! shared-pointer parent-chain model. A scope keeps its entries twice: once
//! in insertion order (memory-layout offsets are assigned by walking this
//! order) and once in a map keyed by `(EntryKind, key)` for exact lookups.

use crate::types::Type;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    LocalVar,
    MemberVar,
    Func,
    MemberFunc,
    Class,
    Inherit,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::LocalVar => "local",
            EntryKind::MemberVar => "memberVar",
            EntryKind::Func => "func",
            EntryKind::MemberFunc => "memberFunc",
            EntryKind::Class => "class",
            EntryKind::Inherit => "inherit",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// An entry in a symbol table. Fields not relevant to a given `kind` are
/// left at their defaults (empty string / empty vec).
#[derive(Debug, Clone)]
pub struct Entry {
    pub kind: EntryKind,
    pub name: String,
    pub ty: Type,
    pub line: u32,
    /// The scope this entry owns (a class body, a function body).
    pub link: Option<ScopeId>,
    pub size: u32,
    pub offset: i32,
    /// Declared array dimensions, `None` for an unspecified leading
    /// dimension in a formal parameter.
    pub dims: Vec<Option<u32>>,
    /// Owning class (`MemberVar`/`MemberFunc`), or the out-of-class scope a
    /// `Func` definition was written under (`Class::method`), empty if none.
    pub class: String,
    pub visibility: Visibility,
    /// Parameter `(name, type)` pairs, for `Func`/`MemberFunc`.
    pub params: Vec<(String, Type)>,
    /// Parent class names, for the single `Inherit` entry of a class scope.
    pub inherit_list: Vec<String>,
}

impl Entry {
    fn new(kind: EntryKind, name: impl Into<String>, ty: Type, line: u32) -> Self {
        Entry {
            kind,
            name: name.into(),
            ty,
            line,
            link: None,
            size: 0,
            offset: 0,
            dims: Vec::new(),
            class: String::new(),
            visibility: Visibility::Public,
            params: Vec::new(),
            inherit_list: Vec::new(),
        }
    }

    /// `"<scope>::<name>(<type1>, <type2>, ...)"`, matching the signature
    /// convention used to key overloaded functions.
    pub fn signature(&self, scope_name: &str) -> String {
        let params = self
            .params
            .iter()
            .map(|(_, t)| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{scope_name}::{}({params})", self.name)
    }
}

#[derive(Debug)]
pub struct Scope {
    pub name: String,
    pub level: i32,
    pub parent: Option<ScopeId>,
    pub scope_size: i32,
    order: Vec<EntryId>,
    index: HashMap<(EntryKind, String), EntryId>,
    /// Bare `<scope>::<name>` keys seen, for overload-vs-duplicate detection.
    funcs_seen: HashSet<String>,
}

impl Scope {
    fn new(name: impl Into<String>, parent: Option<ScopeId>, level: i32) -> Self {
        Scope {
            name: name.into(),
            level,
            parent,
            scope_size: 0,
            order: Vec::new(),
            index: HashMap::new(),
            funcs_seen: HashSet::new(),
        }
    }

    pub fn entries_in_order(&self) -> &[EntryId] {
        &self.order
    }
}

/// Outcome of inserting an entry: `Inserted` cleanly, a recoverable
/// `ShadowWarning`/`OverloadWarning` (the entry is still inserted), or a
/// hard `DuplicateError` (the entry is rejected).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    ShadowWarning(String),
    OverloadWarning(String),
    DuplicateError(String),
}

/// When adding a member variable or member function, whether this is the
/// class's own declaration or a copy made while resolving inheritance --
/// the distinction the original tool makes between "same-class duplicate"
/// (error) and "shadows an inherited member" (warning).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertContext {
    Declaration,
    InheritedCopy,
}

/// Owns every scope and entry of one compilation.
#[derive(Debug, Default)]
pub struct SymTabs {
    scopes: Vec<Scope>,
    entries: Vec<Entry>,
}

impl SymTabs {
    pub fn new() -> Self {
        SymTabs {
            scopes: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn new_scope(&mut self, name: impl Into<String>, parent: Option<ScopeId>, level: i32) -> ScopeId {
        self.scopes.push(Scope::new(name, parent, level));
        ScopeId((self.scopes.len() - 1) as u32)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        &self.entries[id.0 as usize]
    }

    pub fn entry_mut(&mut self, id: EntryId) -> &mut Entry {
        &mut self.entries[id.0 as usize]
    }

    pub fn increment_level(&mut self, id: ScopeId) {
        self.scopes[id.0 as usize].level += 1;
    }

    /// Reparents a scope -- used to hook an out-of-class member function
    /// definition's body scope under its class once inheritance linking
    /// finds it, so member-variable lookups from inside the body resolve.
    pub fn set_parent(&mut self, scope: ScopeId, parent: ScopeId) {
        self.scopes[scope.0 as usize].parent = Some(parent);
    }

    /// Exact-key lookup, walking up the parent chain.
    pub fn get_entry(&self, scope: ScopeId, kind: EntryKind, key: &str) -> Option<EntryId> {
        let mut cur = Some(scope);
        while let Some(s) = cur {
            let scope_ref = &self.scopes[s.0 as usize];
            if let Some(&id) = scope_ref.index.get(&(kind, key.to_string())) {
                return Some(id);
            }
            cur = scope_ref.parent;
        }
        None
    }

    /// Linear by-name lookup across all entry kinds, walking up the parent
    /// chain. Distinct from [`Self::get_entry`]: this scans every entry in a
    /// scope regardless of kind, matching a bare identifier against
    /// whichever kind declared it.
    pub fn get_entry_by_name(&self, scope: ScopeId, name: &str) -> Option<EntryId> {
        let mut cur = Some(scope);
        while let Some(s) = cur {
            let scope_ref = &self.scopes[s.0 as usize];
            for &id in &scope_ref.order {
                if self.entries[id.0 as usize].name == name {
                    return Some(id);
                }
            }
            cur = scope_ref.parent;
        }
        None
    }

    fn insert(&mut self, scope: ScopeId, kind: EntryKind, key: String, entry: Entry) -> EntryId {
        self.entries.push(entry);
        let id = EntryId((self.entries.len() - 1) as u32);
        let scope_ref = &mut self.scopes[scope.0 as usize];
        scope_ref.order.push(id);
        scope_ref.index.insert((kind, key), id);
        id
    }

    fn replace(&mut self, scope: ScopeId, kind: EntryKind, key: String, entry: Entry) -> EntryId {
        if let Some(&old) = self.scopes[scope.0 as usize].index.get(&(kind, key.clone())) {
            self.entries[old.0 as usize] = entry;
            old
        } else {
            self.insert(scope, kind, key, entry)
        }
    }

    pub fn add_local_var(
        &mut self,
        scope: ScopeId,
        name: impl Into<String>,
        ty: Type,
        line: u32,
        dims: Vec<Option<u32>>,
    ) -> (Option<EntryId>, AddOutcome) {
        let name = name.into();
        let key = (EntryKind::LocalVar, name.clone());
        if self.scopes[scope.0 as usize].index.contains_key(&key) {
            return (
                None,
                AddOutcome::DuplicateError(format!("'{name}' is already declared in this scope")),
            );
        }
        let mut entry = Entry::new(EntryKind::LocalVar, &name, ty, line);
        entry.dims = dims;
        let id = self.insert(scope, EntryKind::LocalVar, name, entry);
        (Some(id), AddOutcome::Inserted)
    }

    pub fn add_member_var(
        &mut self,
        scope: ScopeId,
        name: impl Into<String>,
        ty: Type,
        line: u32,
        dims: Vec<Option<u32>>,
        class: impl Into<String>,
        visibility: Visibility,
        ctx: InsertContext,
    ) -> (Option<EntryId>, AddOutcome) {
        let name = name.into();
        let class = class.into();
        let key = (EntryKind::MemberVar, name.clone());
        let already = self.scopes[scope.0 as usize].index.get(&key).copied();
        let mut entry = Entry::new(EntryKind::MemberVar, &name, ty, line);
        entry.dims = dims;
        entry.class = class.clone();
        entry.visibility = visibility;

        match (already, ctx) {
            (Some(_), InsertContext::Declaration) => (
                None,
                AddOutcome::DuplicateError(format!(
                    "member variable '{name}' is already declared in class '{class}'"
                )),
            ),
            (Some(_), InsertContext::InheritedCopy) => {
                let id = self.replace(scope, EntryKind::MemberVar, name.clone(), entry);
                (
                    Some(id),
                    AddOutcome::ShadowWarning(format!(
                        "member variable '{name}' in class '{class}' shadows an inherited member"
                    )),
                )
            }
            (None, _) => {
                let id = self.insert(scope, EntryKind::MemberVar, name, entry);
                (Some(id), AddOutcome::Inserted)
            }
        }
    }

    pub fn add_free_func(
        &mut self,
        scope: ScopeId,
        scope_name: &str,
        name: impl Into<String>,
        ty: Type,
        line: u32,
        params: Vec<(String, Type)>,
        out_of_class_scope: impl Into<String>,
    ) -> (Option<EntryId>, AddOutcome) {
        let name = name.into();
        let out_of_class_scope = out_of_class_scope.into();
        let mut entry = Entry::new(EntryKind::Func, &name, ty, line);
        entry.params = params;
        entry.class = out_of_class_scope;
        let sig = entry.signature(scope_name);
        let bare = format!("{scope_name}::{name}");

        let key = (EntryKind::Func, sig.clone());
        if self.scopes[scope.0 as usize].index.contains_key(&key) {
            return (
                None,
                AddOutcome::DuplicateError(format!("function '{name}' is already declared with this signature")),
            );
        }
        let seen_bare = self.scopes[scope.0 as usize].funcs_seen.contains(&bare);
        let id = self.insert(scope, EntryKind::Func, sig, entry);
        self.scopes[scope.0 as usize].funcs_seen.insert(bare);
        if seen_bare {
            (
                Some(id),
                AddOutcome::OverloadWarning(format!("function '{name}' is overloaded")),
            )
        } else {
            (Some(id), AddOutcome::Inserted)
        }
    }

    pub fn add_member_func(
        &mut self,
        scope: ScopeId,
        name: impl Into<String>,
        ty: Type,
        line: u32,
        params: Vec<(String, Type)>,
        class: impl Into<String>,
        visibility: Visibility,
        ctx: InsertContext,
    ) -> (Option<EntryId>, AddOutcome) {
        let name = name.into();
        let class = class.into();
        let mut entry = Entry::new(EntryKind::MemberFunc, &name, ty, line);
        entry.params = params;
        entry.class = class.clone();
        entry.visibility = visibility;
        let sig = entry.signature(&class);
        let bare = format!("{class}::{name}");

        let key = (EntryKind::MemberFunc, sig.clone());
        let already = self.scopes[scope.0 as usize].index.contains_key(&key);
        if already && ctx == InsertContext::Declaration {
            return (
                None,
                AddOutcome::DuplicateError(format!(
                    "member function '{name}' is already declared with this signature in class '{class}'"
                )),
            );
        }
        if ctx == InsertContext::InheritedCopy {
            let id = self.replace(scope, EntryKind::MemberFunc, sig, entry);
            return (
                Some(id),
                AddOutcome::ShadowWarning(format!(
                    "member function '{name}' in class '{class}' shadows an inherited member"
                )),
            );
        }
        let seen_bare = self.scopes[scope.0 as usize].funcs_seen.contains(&bare);
        let id = self.insert(scope, EntryKind::MemberFunc, sig, entry);
        self.scopes[scope.0 as usize].funcs_seen.insert(bare);
        if seen_bare {
            (
                Some(id),
                AddOutcome::OverloadWarning(format!("member function '{name}' is overloaded")),
            )
        } else {
            (Some(id), AddOutcome::Inserted)
        }
    }

    pub fn add_class(
        &mut self,
        scope: ScopeId,
        name: impl Into<String>,
        line: u32,
    ) -> (Option<EntryId>, AddOutcome) {
        let name = name.into();
        let key = (EntryKind::Class, name.clone());
        if self.scopes[scope.0 as usize].index.contains_key(&key) {
            return (
                None,
                AddOutcome::DuplicateError(format!("class '{name}' is already declared")),
            );
        }
        let entry = Entry::new(EntryKind::Class, &name, Type::Class(name.clone()), line);
        let id = self.insert(scope, EntryKind::Class, name, entry);
        (Some(id), AddOutcome::Inserted)
    }

    pub fn add_inherit(&mut self, scope: ScopeId, inherit_list: Vec<String>) -> EntryId {
        let mut entry = Entry::new(EntryKind::Inherit, "inherit", Type::Void, 0);
        entry.inherit_list = inherit_list;
        self.insert(scope, EntryKind::Inherit, "inherit".to_string(), entry)
    }

    /// Removes every `Func` entry whose `class` (out-of-class scope) is
    /// non-empty from `scope` -- the out-of-class definitions that have
    /// already been linked into their class's scope and no longer need a
    /// free-standing copy.
    pub fn remove_member_function_definitions(&mut self, scope: ScopeId) {
        let scope_ref = &mut self.scopes[scope.0 as usize];
        let entries = &self.entries;
        scope_ref
            .order
            .retain(|id| {
                let e = &entries[id.0 as usize];
                !(e.kind == EntryKind::Func && !e.class.is_empty())
            });
        scope_ref
            .index
            .retain(|_, id| {
                let e = &entries[id.0 as usize];
                !(e.kind == EntryKind::Func && !e.class.is_empty())
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_var_duplicate_is_an_error() {
        let mut tabs = SymTabs::new();
        let s = tabs.new_scope("main", None, 0);
        let (_, outcome) = tabs.add_local_var(s, "x", Type::Integer, 1, vec![]);
        assert_eq!(outcome, AddOutcome::Inserted);
        let (_, outcome) = tabs.add_local_var(s, "x", Type::Integer, 2, vec![]);
        assert!(matches!(outcome, AddOutcome::DuplicateError(_)));
    }

    #[test]
    fn member_var_inherited_copy_shadows_and_replaces() {
        let mut tabs = SymTabs::new();
        let s = tabs.new_scope("Derived", None, 0);
        tabs.add_member_var(
            s,
            "x",
            Type::Integer,
            1,
            vec![],
            "Derived",
            Visibility::Public,
            InsertContext::Declaration,
        );
        let (id, outcome) = tabs.add_member_var(
            s,
            "x",
            Type::Float,
            2,
            vec![],
            "Base",
            Visibility::Public,
            InsertContext::InheritedCopy,
        );
        assert!(matches!(outcome, AddOutcome::ShadowWarning(_)));
        assert_eq!(tabs.entry(id.unwrap()).ty, Type::Float);
    }

    #[test]
    fn free_func_overload_vs_duplicate() {
        let mut tabs = SymTabs::new();
        let s = tabs.new_scope("global", None, 0);
        let (_, o1) = tabs.add_free_func(s, "global", "f", Type::Integer, 1, vec![], "");
        assert_eq!(o1, AddOutcome::Inserted);
        let (_, o2) = tabs.add_free_func(
            s,
            "global",
            "f",
            Type::Integer,
            2,
            vec![("a".into(), Type::Float)],
            "",
        );
        assert!(matches!(o2, AddOutcome::OverloadWarning(_)));
        let (_, o3) = tabs.add_free_func(s, "global", "f", Type::Integer, 3, vec![], "");
        assert!(matches!(o3, AddOutcome::DuplicateError(_)));
    }

    #[test]
    fn get_entry_walks_parent_chain_by_exact_key() {
        let mut tabs = SymTabs::new();
        let parent = tabs.new_scope("global", None, 0);
        let child = tabs.new_scope("f", Some(parent), 1);
        tabs.add_local_var(parent, "g", Type::Integer, 1, vec![]);
        assert!(tabs.get_entry(child, EntryKind::LocalVar, "g").is_some());
        assert!(tabs.get_entry(child, EntryKind::LocalVar, "missing").is_none());
    }

    #[test]
    fn get_entry_by_name_scans_every_kind() {
        let mut tabs = SymTabs::new();
        let s = tabs.new_scope("C", None, 0);
        tabs.add_class(s, "C", 1);
        assert!(tabs.get_entry_by_name(s, "C").is_some());
    }

    #[test]
    fn remove_member_function_definitions_strips_out_of_class_defs() {
        let mut tabs = SymTabs::new();
        let s = tabs.new_scope("global", None, 0);
        tabs.add_free_func(s, "global", "inScope", Type::Void, 1, vec![], "");
        tabs.add_free_func(s, "global", "method", Type::Void, 2, vec![], "Shape");
        assert_eq!(tabs.scope(s).entries_in_order().len(), 2);
        tabs.remove_member_function_definitions(s);
        assert_eq!(tabs.scope(s).entries_in_order().len(), 1);
    }
}
