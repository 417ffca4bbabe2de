//! Scope tree and declaration records.
//!
//! The tree is both the symbol table and the only durable program
//! representation: classes, methods, fields, variables, and constants all
//! live in it, and method records double as anchors for recorded body
//! offsets.  Nodes are stored in an arena and addressed by [`ScopeId`];
//! child lists are index vectors.

use std::fmt;

/// Index of one node in the scope arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// What kind of entity a declaration record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// Sentinel for the global scope and anonymous blocks.
    Empty,
    Variable,
    Constant,
    Class,
    Method,
    Function,
    Field,
}

/// Primitive type of a declared name; `Undefined` for class-typed and
/// sentinel records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimType {
    Undefined,
    Int,
    Double,
}

impl PrimType {
    pub fn is_numeric(self) -> bool {
        matches!(self, PrimType::Int | PrimType::Double)
    }

    /// The type's zero value; declared names are readable before any
    /// assignment.
    pub fn default_value(self) -> Value {
        match self {
            PrimType::Int => Value::Int(0),
            PrimType::Double => Value::Double(0.0),
            PrimType::Undefined => Value::Unknown,
        }
    }
}

impl fmt::Display for PrimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimType::Int => write!(f, "int"),
            PrimType::Double => write!(f, "double"),
            PrimType::Undefined => write!(f, "undefined"),
        }
    }
}

/// A runtime value.  `Unknown` while only checking (no side effects) and for
/// class-typed records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Unknown,
    Int(i64),
    Double(f64),
}

impl Value {
    pub fn as_int(self) -> i64 {
        match self {
            Value::Int(n) => n,
            Value::Double(d) => d as i64,
            Value::Unknown => 0,
        }
    }

    pub fn as_double(self) -> f64 {
        match self {
            Value::Int(n) => n as f64,
            Value::Double(d) => d,
            Value::Unknown => 0.0,
        }
    }

    pub fn is_truthy(self) -> bool {
        match self {
            Value::Int(n) => n != 0,
            Value::Double(d) => d != 0.0,
            Value::Unknown => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Double(d) => write!(f, "{}", d),
            Value::Unknown => write!(f, "?"),
        }
    }
}

/// Metadata for one declared name.
///
/// `class_name` is set when the declared type is a user class and is mutually
/// exclusive with a numeric `prim`.
#[derive(Debug, Clone)]
pub struct Decl {
    pub name: String,
    pub kind: DeclKind,
    pub prim: PrimType,
    pub initialized: bool,
    pub class_name: String,
    pub value: Value,
}

impl Decl {
    pub fn new(name: impl Into<String>, kind: DeclKind, prim: PrimType) -> Decl {
        Decl {
            name: name.into(),
            kind,
            prim,
            initialized: false,
            class_name: String::new(),
            value: prim.default_value(),
        }
    }

    /// A class-typed variable or field.
    pub fn object(name: impl Into<String>, kind: DeclKind, class_name: impl Into<String>) -> Decl {
        Decl {
            name: name.into(),
            kind,
            prim: PrimType::Undefined,
            initialized: false,
            class_name: class_name.into(),
            value: Value::Unknown,
        }
    }

    /// Sentinel record for an anonymous block scope.
    fn block() -> Decl {
        Decl::new("", DeclKind::Empty, PrimType::Undefined)
    }
}

#[derive(Debug)]
struct ScopeNode {
    decl: Decl,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
}

/// The scope tree, rooted at one global scope, with a cursor for the scope
/// currently being parsed or executed.
#[derive(Debug)]
pub struct ScopeTree {
    nodes: Vec<ScopeNode>,
    current: ScopeId,
}

impl ScopeTree {
    pub fn new() -> ScopeTree {
        ScopeTree {
            nodes: vec![ScopeNode {
                decl: Decl::new("global", DeclKind::Empty, PrimType::Undefined),
                parent: None,
                children: vec![],
            }],
            current: ScopeId(0),
        }
    }

    pub fn current(&self) -> ScopeId {
        self.current
    }

    /// Moves the cursor to `id`, e.g. when entering a method body for
    /// execution.  The caller saves and restores the previous cursor.
    pub fn set_current(&mut self, id: ScopeId) {
        self.current = id;
    }

    /// Attaches `decl` as a child of the current scope without entering it.
    /// Used for leaf declarations: variables, fields, constants.
    pub fn declare(&mut self, decl: Decl) -> ScopeId {
        let id = ScopeId(self.nodes.len());
        self.nodes.push(ScopeNode {
            decl,
            parent: Some(self.current),
            children: vec![],
        });
        let cur = self.current.0;
        self.nodes[cur].children.push(id);
        id
    }

    /// Attaches `decl` as a child of the current scope and makes it the new
    /// current scope.  Used when entering a class or method.
    pub fn open_scope(&mut self, decl: Decl) -> ScopeId {
        let id = self.declare(decl);
        self.current = id;
        id
    }

    /// Opens an anonymous block scope.
    pub fn open_block(&mut self) -> ScopeId {
        self.open_scope(Decl::block())
    }

    /// The current scope becomes its parent; no-op at the root.
    pub fn close_scope(&mut self) {
        if let Some(parent) = self.nodes[self.current.0].parent {
            self.current = parent;
        }
    }

    pub fn decl(&self, id: ScopeId) -> &Decl {
        &self.nodes[id.0].decl
    }

    pub fn decl_mut(&mut self, id: ScopeId) -> &mut Decl {
        &mut self.nodes[id.0].decl
    }

    /// Name resolution for expression identifiers: search the current scope's
    /// direct children, then each enclosing parent's, up to the root.  The
    /// innermost declaration wins, which gives shadowing; the search never
    /// descends into a sibling's subtree.
    pub fn lookup_lexical(&self, name: &str) -> Option<ScopeId> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            if let Some(found) = self.lookup_child(id, name) {
                return Some(found);
            }
            scope = self.nodes[id.0].parent;
        }
        None
    }

    /// Duplicate-declaration check: search only the current scope's direct
    /// children.
    pub fn lookup_local(&self, name: &str) -> Option<ScopeId> {
        self.lookup_child(self.current, name)
    }

    /// Member resolution: search only the direct children of `of`.
    /// Deliberately non-recursive; members are not inherited.
    pub fn lookup_child(&self, of: ScopeId, name: &str) -> Option<ScopeId> {
        self.nodes[of.0]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child.0].decl.name == name)
    }

    /// Finds a class declaration anywhere in the tree.  Classes are only ever
    /// declared at top level; the whole-tree search is defensive.
    pub fn lookup_global_class(&self, name: &str) -> Option<ScopeId> {
        self.nodes
            .iter()
            .position(|n| n.decl.kind == DeclKind::Class && n.decl.name == name)
            .map(ScopeId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Decl {
        Decl::new(name, DeclKind::Variable, PrimType::Int)
    }

    #[test]
    fn declare_and_lookup_in_one_scope() {
        let mut t = ScopeTree::new();
        let x = t.declare(var("x"));
        assert_eq!(t.lookup_lexical("x"), Some(x));
        assert_eq!(t.lookup_local("x"), Some(x));
        assert_eq!(t.lookup_lexical("y"), None);
    }

    #[test]
    fn lexical_lookup_walks_up_to_enclosing_scopes() {
        let mut t = ScopeTree::new();
        let x = t.declare(var("x"));
        t.open_block();
        assert_eq!(t.lookup_lexical("x"), Some(x));
        assert_eq!(t.lookup_local("x"), None);
    }

    #[test]
    fn inner_declaration_shadows_outer() {
        let mut t = ScopeTree::new();
        let outer = t.declare(var("x"));
        t.open_block();
        let inner = t.declare(var("x"));
        assert_eq!(t.lookup_lexical("x"), Some(inner));
        t.close_scope();
        assert_eq!(t.lookup_lexical("x"), Some(outer));
    }

    #[test]
    fn lookup_never_descends_into_sibling_scopes() {
        let mut t = ScopeTree::new();
        t.open_block();
        t.declare(var("hidden"));
        t.close_scope();
        t.open_block();
        assert_eq!(t.lookup_lexical("hidden"), None);
    }

    #[test]
    fn child_lookup_is_not_recursive() {
        let mut t = ScopeTree::new();
        let class = t.open_scope(Decl::new("C", DeclKind::Class, PrimType::Undefined));
        let method = t.open_scope(Decl::new("m", DeclKind::Method, PrimType::Int));
        t.declare(var("local"));
        t.close_scope();
        t.close_scope();
        assert_eq!(t.lookup_child(class, "m"), Some(method));
        assert_eq!(t.lookup_child(class, "local"), None);
    }

    #[test]
    fn global_class_search_finds_classes_only() {
        let mut t = ScopeTree::new();
        t.declare(var("C"));
        let class = t.open_scope(Decl::new("D", DeclKind::Class, PrimType::Undefined));
        t.close_scope();
        t.open_block();
        t.open_block();
        assert_eq!(t.lookup_global_class("D"), Some(class));
        assert_eq!(t.lookup_global_class("C"), None);
    }

    #[test]
    fn close_scope_at_root_is_a_noop() {
        let mut t = ScopeTree::new();
        let root = t.current();
        t.close_scope();
        assert_eq!(t.current(), root);
    }

    #[test]
    fn typed_declarations_start_at_zero() {
        assert_eq!(var("x").value, Value::Int(0));
        assert_eq!(
            Decl::new("d", DeclKind::Field, PrimType::Double).value,
            Value::Double(0.0)
        );
        assert_eq!(Decl::object("c", DeclKind::Variable, "C").value, Value::Unknown);
    }
}
