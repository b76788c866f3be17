//! Lock-expression tree.
//!
//! Locks have their own small grammar, independent of softcode. A stored
//! lock is its canonical source string; the tree below is the parsed form
//! consumed by the three compiler passes. Immutable once parsed.

/// One lock-expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum LockNode {
    True,
    False,
    Not(Box<LockNode>),
    And(Box<LockNode>, Box<LockNode>),
    Or(Box<LockNode>, Box<LockNode>),
    /// Parenthesized sub-expression, kept so canonical output preserves the
    /// written grouping.
    Enclosed(Box<LockNode>),
    /// `$obj`: unlocker shares ownership with the named object.
    Owner(String),
    /// `+obj`: unlocker carries the named object.
    Carry(String),
    /// `=obj`: unlocker is exactly the named object (`me` for the gated
    /// object itself).
    ExactObject(String),
    /// `@obj` or `@obj/kind`: delegate to another object's stored lock.
    Indirect {
        object: String,
        kind: Option<String>,
    },
    /// `flag^NAME`
    BitFlag(String),
    /// `power^NAME`
    BitPower(String),
    /// `type^KIND`
    BitType(String),
    /// `channel^NAME`
    Channel(String),
    /// `dbreflist^ATTR`
    DbRefList(String),
    /// `ip^PATTERN`
    Ip(String),
    /// `hostname^PATTERN`
    HostName(String),
    /// `name^PATTERN`
    Name(String),
    /// `attr:value`: attribute comparison on the unlocker.
    Attribute { name: String, value: String },
    /// `attr/value`: attribute on the gated object evaluated as softcode,
    /// result compared to `value`.
    Evaluation { name: String, value: String },
}

impl LockNode {
    pub fn not(inner: LockNode) -> LockNode {
        LockNode::Not(Box::new(inner))
    }

    pub fn and(left: LockNode, right: LockNode) -> LockNode {
        LockNode::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: LockNode, right: LockNode) -> LockNode {
        LockNode::Or(Box::new(left), Box::new(right))
    }

    /// Canonical source form of this tree.
    pub fn source(&self) -> String {
        match self {
            LockNode::True => "#true".to_string(),
            LockNode::False => "#false".to_string(),
            LockNode::Not(inner) => format!("!{}", inner.source()),
            LockNode::And(left, right) => format!("{}&{}", left.source(), right.source()),
            LockNode::Or(left, right) => format!("{}|{}", left.source(), right.source()),
            LockNode::Enclosed(inner) => format!("({})", inner.source()),
            LockNode::Owner(object) => format!("${}", object),
            LockNode::Carry(object) => format!("+{}", object),
            LockNode::ExactObject(object) => format!("={}", object),
            LockNode::Indirect { object, kind } => match kind {
                Some(kind) => format!("@{}/{}", object, kind),
                None => format!("@{}", object),
            },
            LockNode::BitFlag(name) => format!("flag^{}", name),
            LockNode::BitPower(name) => format!("power^{}", name),
            LockNode::BitType(name) => format!("type^{}", name),
            LockNode::Channel(name) => format!("channel^{}", name),
            LockNode::DbRefList(attr) => format!("dbreflist^{}", attr),
            LockNode::Ip(pattern) => format!("ip^{}", pattern),
            LockNode::HostName(pattern) => format!("hostname^{}", pattern),
            LockNode::Name(pattern) => format!("name^{}", pattern),
            LockNode::Attribute { name, value } => format!("{}:{}", name, value),
            LockNode::Evaluation { name, value } => format!("{}/{}", name, value),
        }
    }
}

/// Storage flags carried alongside a lock's source string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockFlags {
    pub visual: bool,
    pub no_inherit: bool,
    pub wizard: bool,
    pub locked: bool,
}

/// A lock as persisted: canonical source plus flags. Recompiled into a
/// predicate on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLock {
    pub source: String,
    pub flags: LockFlags,
}

impl StoredLock {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: LockFlags::default(),
        }
    }
}
