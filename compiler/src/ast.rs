//! The node set handed to the compiler by a parser.
//!
//! Nodes own their children and carry a source line. Constructors that
//! can be given an ill-formed shape return `Result` and reject it with
//! [`CompileError::MalformedNode`]; the plain [`Node::new`] trusts its
//! input, and emission re-checks what it depends on.

use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub line: u32,
    pub kind: NodeKind,
}

/// Where a constant lives: `Name`, `scope::Name` or `::Name`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstPath {
    Name(String),
    Scoped(Box<Node>, String),
    Top(String),
}

impl ConstPath {
    pub fn name(&self) -> &str {
        match self {
            ConstPath::Name(n) | ConstPath::Scoped(_, n) | ConstPath::Top(n) => n,
        }
    }
}

/// Formal arguments of a method or block, in slot order: required,
/// optional, splat, block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormalArgs {
    pub required: Vec<String>,
    /// Each default is a local assignment to the argument's own name.
    pub optional: Vec<Node>,
    pub splat: Option<String>,
    pub block: Option<String>,
}

impl FormalArgs {
    pub fn new(
        line: u32,
        required: Vec<String>,
        optional: Vec<Node>,
        splat: Option<String>,
        block: Option<String>,
    ) -> Result<Self, CompileError> {
        let args = Self {
            required,
            optional,
            splat,
            block,
        };
        for opt in &args.optional {
            match &opt.kind {
                NodeKind::LocalAssign {
                    value: Some(_), ..
                } => {}
                _ => {
                    return Err(CompileError::malformed(
                        line,
                        "optional argument default must assign the argument",
                    ));
                }
            }
        }
        let names = args.names();
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(CompileError::malformed(line, "empty argument name"));
            }
            if names[..i].contains(name) {
                return Err(CompileError::malformed(
                    line,
                    format!("duplicate argument `{name}`"),
                ));
            }
        }
        Ok(args)
    }

    /// Plain required arguments.
    pub fn required(
        line: u32,
        names: &[&str],
    ) -> Result<Self, CompileError> {
        Self::new(
            line,
            names.iter().map(|n| n.to_string()).collect(),
            Vec::new(),
            None,
            None,
        )
    }

    pub fn optional_names(&self) -> impl Iterator<Item = &str> {
        self.optional.iter().filter_map(|n| match &n.kind {
            NodeKind::LocalAssign { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Every argument name in slot order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> =
            self.required.iter().map(String::as_str).collect();
        names.extend(self.optional_names());
        names.extend(self.splat.as_deref());
        names.extend(self.block.as_deref());
        names
    }

    pub fn required_count(&self) -> u32 {
        self.required.len() as u32
    }

    pub fn total_count(&self) -> u32 {
        (self.required.len() + self.optional.len()) as u32
    }
}

/// One `when` arm of a `case`.
#[derive(Debug, Clone, PartialEq)]
pub struct When {
    pub line: u32,
    /// May contain [`NodeKind::Splat`] conditions.
    pub conditions: Vec<Node>,
    pub body: Option<Box<Node>>,
}

impl When {
    pub fn new(
        line: u32,
        conditions: Vec<Node>,
        body: Option<Node>,
    ) -> Result<Self, CompileError> {
        if conditions.is_empty() {
            return Err(CompileError::malformed(line, "`when` without conditions"));
        }
        Ok(Self {
            line,
            conditions,
            body: body.map(Box::new),
        })
    }
}

/// One `rescue` clause. No conditions means `StandardError`.
#[derive(Debug, Clone, PartialEq)]
pub struct RescueClause {
    pub line: u32,
    pub conditions: Vec<Node>,
    /// Local that receives the exception (`rescue Foo => e`).
    pub assign: Option<String>,
    pub body: Option<Box<Node>>,
}

impl RescueClause {
    pub fn new(
        line: u32,
        conditions: Vec<Node>,
        assign: Option<&str>,
        body: Option<Node>,
    ) -> Result<Self, CompileError> {
        if assign.is_some_and(str::is_empty) {
            return Err(CompileError::malformed(line, "empty exception variable"));
        }
        Ok(Self {
            line,
            conditions,
            assign: assign.map(str::to_string),
            body: body.map(Box::new),
        })
    }
}

/// A literal as the parser first sees it, before it is specialized.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Nil,
    True,
    False,
    /// Integer source text, e.g. `-12_000` or a value past `i64`.
    Number(String),
    Float(f64),
    Str(String),
    Symbol(String),
    Regex { source: String, flags: u32 },
    Range { first: i64, last: i64, exclusive: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Nil,
    True,
    False,
    SelfRef,
    Integer(i64),
    /// Decimal digits, optionally with a leading `-`.
    BigInteger(String),
    Float(f64),
    Str(String),
    Symbol(String),
    Regex {
        source: String,
        flags: u32,
    },
    /// Interpolated string; `Str` parts are used as-is, others via `to_s`.
    DynamicString(Vec<Node>),
    DynamicSymbol(Vec<Node>),
    /// Interpolated regex. With `once` the pattern is built the first
    /// time the code runs and reused after that.
    DynamicRegex {
        parts: Vec<Node>,
        flags: u32,
        once: bool,
    },
    /// `` `cmd` ``, sent to self as `` ` ``.
    ExecuteString(String),
    DynamicExecuteString(Vec<Node>),
    /// `__FILE__`.
    File,
    Array(Vec<Node>),
    Hash(Vec<(Node, Node)>),
    Range {
        first: Box<Node>,
        last: Box<Node>,
        exclusive: bool,
    },

    LocalVar(String),
    /// With `value: None` the node assigns the value on top of the stack
    /// (a multiple-assignment or block-argument target).
    LocalAssign {
        name: String,
        value: Option<Box<Node>>,
    },
    IVar(String),
    IVarAssign {
        name: String,
        value: Option<Box<Node>>,
    },
    GVar(String),
    GVarAssign {
        name: String,
        value: Option<Box<Node>>,
    },
    /// `$&`, `` $` ``, `$'` or `$+` of the last match.
    BackRef(char),
    /// `$1`, `$2`, ...: a group of the last match.
    NthRef(u32),
    CVar(String),
    CVarAssign {
        name: String,
        value: Option<Box<Node>>,
    },
    Const(String),
    ScopedConst {
        scope: Box<Node>,
        name: String,
    },
    TopConst(String),
    ConstAssign {
        path: ConstPath,
        value: Option<Box<Node>>,
    },

    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    /// `target ||= value`, holding the assignment node.
    OrAssign(Box<Node>),
    /// `target &&= value`, holding the assignment node.
    AndAssign(Box<Node>),
    /// `receiver[args] op= value`; `op` is `||`, `&&` or a method name.
    IndexOpAssign {
        receiver: Box<Node>,
        args: Vec<Node>,
        op: String,
        value: Box<Node>,
    },
    /// `receiver.name op= value`.
    AttrOpAssign {
        receiver: Box<Node>,
        name: String,
        op: String,
        value: Box<Node>,
    },
    /// `pattern =~ value`, or `value =~ pattern` when the pattern is not
    /// a literal and the value is the receiver.
    Match {
        pattern: Box<Node>,
        value: Box<Node>,
        pattern_first: bool,
    },
    /// A bare regex used as a condition, matched against `$_`.
    LastLineMatch(Box<Node>),
    /// `start..finish` (or `...`) as a condition: true from the time
    /// `start` holds until `finish` does.
    FlipFlop {
        start: Box<Node>,
        finish: Box<Node>,
        exclusive: bool,
    },

    If {
        cond: Box<Node>,
        then: Option<Box<Node>>,
        otherwise: Option<Box<Node>>,
    },
    While {
        cond: Box<Node>,
        body: Option<Box<Node>>,
        /// `false` for `begin .. end while cond`.
        check_first: bool,
        until: bool,
    },
    Loop(Option<Box<Node>>),
    /// `for var in iter`: `var` is an assignment target without a value.
    For {
        iter: Box<Node>,
        var: Box<Node>,
        body: Option<Box<Node>>,
    },
    Case {
        receiver: Option<Box<Node>>,
        whens: Vec<When>,
        otherwise: Option<Box<Node>>,
    },
    Block(Vec<Node>),

    Begin(Box<Node>),
    Rescue {
        body: Option<Box<Node>>,
        clauses: Vec<RescueClause>,
        otherwise: Option<Box<Node>>,
    },
    Ensure {
        body: Option<Box<Node>>,
        ensure: Option<Box<Node>>,
    },

    Return(Option<Box<Node>>),
    Break(Option<Box<Node>>),
    Next(Option<Box<Node>>),
    Redo,
    Retry,

    /// `receiver.name(args) block`. No receiver means a call on self.
    Call {
        receiver: Option<Box<Node>>,
        name: String,
        args: Vec<Node>,
        block: Option<Box<Node>>,
    },
    /// A block literal.
    Iter {
        args: FormalArgs,
        body: Option<Box<Node>>,
    },
    /// `&expr` passed as the block.
    BlockPass(Box<Node>),
    /// `*expr`, only valid as the last call argument, an array element or
    /// a `when`/`rescue` condition.
    Splat(Box<Node>),
    Yield(Vec<Node>),
    Super {
        args: Vec<Node>,
        block: Option<Box<Node>>,
    },
    /// `super` without arguments: passes the method's own arguments.
    ZSuper {
        block: Option<Box<Node>>,
    },
    /// `receiver.name = value`, `receiver[args] = value` (name `[]=`).
    /// Evaluates to `value`.
    AttrAssign {
        receiver: Box<Node>,
        name: String,
        args: Vec<Node>,
        value: Option<Box<Node>>,
    },
    MultipleAssign {
        targets: Vec<Node>,
        splat: Option<Box<Node>>,
        value: Option<Box<Node>>,
    },

    Def {
        name: String,
        args: FormalArgs,
        body: Option<Box<Node>>,
    },
    DefSingleton {
        receiver: Box<Node>,
        name: String,
        args: FormalArgs,
        body: Option<Box<Node>>,
    },
    Class {
        path: ConstPath,
        superclass: Option<Box<Node>>,
        body: Option<Box<Node>>,
    },
    Module {
        path: ConstPath,
        body: Option<Box<Node>>,
    },
    SingletonClass {
        receiver: Box<Node>,
        body: Option<Box<Node>>,
    },

    Alias {
        new: String,
        old: String,
    },
    Undef(String),
    /// `alias $new $old`.
    GlobalAlias {
        new: String,
        old: String,
    },
    Defined(Box<Node>),

    Script(Option<Box<Node>>),
}

fn boxed(node: Option<Node>) -> Option<Box<Node>> {
    node.map(Box::new)
}

fn require_name(line: u32, what: &str, name: &str) -> Result<(), CompileError> {
    if name.is_empty() {
        Err(CompileError::malformed(line, format!("empty {what} name")))
    } else {
        Ok(())
    }
}

impl Node {
    pub fn new(line: u32, kind: NodeKind) -> Self {
        Self { line, kind }
    }

    /// Build the specialized node for a literal value.
    pub fn literal(line: u32, value: LiteralValue) -> Result<Self, CompileError> {
        let kind = match value {
            LiteralValue::Nil => NodeKind::Nil,
            LiteralValue::True => NodeKind::True,
            LiteralValue::False => NodeKind::False,
            LiteralValue::Number(text) => number_kind(line, &text)?,
            LiteralValue::Float(f) => NodeKind::Float(f),
            LiteralValue::Str(s) => NodeKind::Str(s),
            LiteralValue::Symbol(s) => {
                require_name(line, "symbol", &s)?;
                NodeKind::Symbol(s)
            }
            LiteralValue::Regex { source, flags } => {
                NodeKind::Regex { source, flags }
            }
            LiteralValue::Range {
                first,
                last,
                exclusive,
            } => NodeKind::Range {
                first: Box::new(Node::int(line, first)),
                last: Box::new(Node::int(line, last)),
                exclusive,
            },
        };
        Ok(Node::new(line, kind))
    }

    pub fn nil(line: u32) -> Self {
        Node::new(line, NodeKind::Nil)
    }

    pub fn boolean(line: u32, value: bool) -> Self {
        Node::new(line, if value { NodeKind::True } else { NodeKind::False })
    }

    pub fn self_ref(line: u32) -> Self {
        Node::new(line, NodeKind::SelfRef)
    }

    pub fn int(line: u32, value: i64) -> Self {
        Node::new(line, NodeKind::Integer(value))
    }

    pub fn string(line: u32, value: &str) -> Self {
        Node::new(line, NodeKind::Str(value.to_string()))
    }

    pub fn symbol(line: u32, value: &str) -> Self {
        Node::new(line, NodeKind::Symbol(value.to_string()))
    }

    pub fn array(line: u32, elements: Vec<Node>) -> Self {
        Node::new(line, NodeKind::Array(elements))
    }

    pub fn splat(line: u32, value: Node) -> Self {
        Node::new(line, NodeKind::Splat(Box::new(value)))
    }

    pub fn local(line: u32, name: &str) -> Result<Self, CompileError> {
        require_name(line, "local", name)?;
        Ok(Node::new(line, NodeKind::LocalVar(name.to_string())))
    }

    pub fn assign_local(
        line: u32,
        name: &str,
        value: Option<Node>,
    ) -> Result<Self, CompileError> {
        require_name(line, "local", name)?;
        Ok(Node::new(line, NodeKind::LocalAssign {
            name: name.to_string(),
            value: boxed(value),
        }))
    }

    pub fn ivar(line: u32, name: &str) -> Self {
        Node::new(line, NodeKind::IVar(name.to_string()))
    }

    pub fn assign_ivar(line: u32, name: &str, value: Option<Node>) -> Self {
        Node::new(line, NodeKind::IVarAssign {
            name: name.to_string(),
            value: boxed(value),
        })
    }

    pub fn constant(line: u32, name: &str) -> Result<Self, CompileError> {
        require_name(line, "constant", name)?;
        Ok(Node::new(line, NodeKind::Const(name.to_string())))
    }

    pub fn assign_const(
        line: u32,
        path: ConstPath,
        value: Option<Node>,
    ) -> Result<Self, CompileError> {
        require_name(line, "constant", path.name())?;
        Ok(Node::new(line, NodeKind::ConstAssign {
            path,
            value: boxed(value),
        }))
    }

    /// A call. A splat argument must come last; blocks are attached with
    /// [`Node::with_block`].
    pub fn call(
        line: u32,
        receiver: Option<Node>,
        name: &str,
        args: Vec<Node>,
    ) -> Result<Self, CompileError> {
        require_name(line, "method", name)?;
        check_args(line, &args)?;
        Ok(Node::new(line, NodeKind::Call {
            receiver: boxed(receiver),
            name: name.to_string(),
            args,
            block: None,
        }))
    }

    /// Attach a block literal or block pass to a call or super.
    pub fn with_block(mut self, block: Node) -> Result<Self, CompileError> {
        if !matches!(block.kind, NodeKind::Iter { .. } | NodeKind::BlockPass(_))
        {
            return Err(CompileError::malformed(
                block.line,
                "block must be a block literal or `&expr`",
            ));
        }
        match &mut self.kind {
            NodeKind::Call { block: slot, .. }
            | NodeKind::Super { block: slot, .. }
            | NodeKind::ZSuper { block: slot } => {
                if slot.is_some() {
                    return Err(CompileError::malformed(
                        self.line,
                        "call already has a block",
                    ));
                }
                *slot = Some(Box::new(block));
                Ok(self)
            }
            _ => Err(CompileError::malformed(
                self.line,
                "only calls and super take a block",
            )),
        }
    }

    pub fn iter(line: u32, args: FormalArgs, body: Option<Node>) -> Self {
        Node::new(line, NodeKind::Iter {
            args,
            body: boxed(body),
        })
    }

    pub fn attr_assign(
        line: u32,
        receiver: Node,
        name: &str,
        args: Vec<Node>,
        value: Option<Node>,
    ) -> Result<Self, CompileError> {
        require_name(line, "method", name)?;
        check_args(line, &args)?;
        if args.iter().any(|a| matches!(a.kind, NodeKind::Splat(_))) {
            return Err(CompileError::malformed(
                line,
                "splat in attribute assignment",
            ));
        }
        Ok(Node::new(line, NodeKind::AttrAssign {
            receiver: Box::new(receiver),
            name: name.to_string(),
            args,
            value: boxed(value),
        }))
    }

    pub fn seq(line: u32, statements: Vec<Node>) -> Self {
        Node::new(line, NodeKind::Block(statements))
    }

    pub fn if_else(
        line: u32,
        cond: Node,
        then: Option<Node>,
        otherwise: Option<Node>,
    ) -> Self {
        Node::new(line, NodeKind::If {
            cond: Box::new(cond),
            then: boxed(then),
            otherwise: boxed(otherwise),
        })
    }

    pub fn while_loop(
        line: u32,
        cond: Node,
        body: Option<Node>,
        check_first: bool,
    ) -> Self {
        Node::new(line, NodeKind::While {
            cond: Box::new(cond),
            body: boxed(body),
            check_first,
            until: false,
        })
    }

    pub fn until_loop(
        line: u32,
        cond: Node,
        body: Option<Node>,
        check_first: bool,
    ) -> Self {
        Node::new(line, NodeKind::While {
            cond: Box::new(cond),
            body: boxed(body),
            check_first,
            until: true,
        })
    }

    pub fn case(
        line: u32,
        receiver: Option<Node>,
        whens: Vec<When>,
        otherwise: Option<Node>,
    ) -> Self {
        Node::new(line, NodeKind::Case {
            receiver: boxed(receiver),
            whens,
            otherwise: boxed(otherwise),
        })
    }

    pub fn rescue(
        line: u32,
        body: Option<Node>,
        clauses: Vec<RescueClause>,
        otherwise: Option<Node>,
    ) -> Self {
        Node::new(line, NodeKind::Rescue {
            body: boxed(body),
            clauses,
            otherwise: boxed(otherwise),
        })
    }

    pub fn ensure(line: u32, body: Option<Node>, ensure: Option<Node>) -> Self {
        Node::new(line, NodeKind::Ensure {
            body: boxed(body),
            ensure: boxed(ensure),
        })
    }

    pub fn ret(line: u32, value: Option<Node>) -> Self {
        Node::new(line, NodeKind::Return(boxed(value)))
    }

    pub fn brk(line: u32, value: Option<Node>) -> Self {
        Node::new(line, NodeKind::Break(boxed(value)))
    }

    pub fn next(line: u32, value: Option<Node>) -> Self {
        Node::new(line, NodeKind::Next(boxed(value)))
    }

    /// `targets, *splat = value`. Targets are assignments without a value
    /// or nested multiple assignments.
    pub fn multiple_assign(
        line: u32,
        targets: Vec<Node>,
        splat: Option<Node>,
        value: Option<Node>,
    ) -> Result<Self, CompileError> {
        for t in targets.iter().chain(splat.as_ref()) {
            if !t.is_target() {
                return Err(CompileError::malformed(
                    t.line,
                    "multiple assignment target is not assignable",
                ));
            }
        }
        Ok(Node::new(line, NodeKind::MultipleAssign {
            targets,
            splat: boxed(splat),
            value: boxed(value),
        }))
    }

    /// `target ||= value`.
    pub fn or_assign(line: u32, assignment: Node) -> Result<Self, CompileError> {
        check_op_assign(line, &assignment)?;
        Ok(Node::new(line, NodeKind::OrAssign(Box::new(assignment))))
    }

    /// `target &&= value`.
    pub fn and_assign(line: u32, assignment: Node) -> Result<Self, CompileError> {
        check_op_assign(line, &assignment)?;
        Ok(Node::new(line, NodeKind::AndAssign(Box::new(assignment))))
    }

    /// `receiver[args] op= value`.
    pub fn index_op_assign(
        line: u32,
        receiver: Node,
        args: Vec<Node>,
        op: &str,
        value: Node,
    ) -> Result<Self, CompileError> {
        require_name(line, "operator", op)?;
        check_args(line, &args)?;
        if args.iter().any(|a| matches!(a.kind, NodeKind::Splat(_))) {
            return Err(CompileError::malformed(line, "splat in index assignment"));
        }
        Ok(Node::new(line, NodeKind::IndexOpAssign {
            receiver: Box::new(receiver),
            args,
            op: op.to_string(),
            value: Box::new(value),
        }))
    }

    /// `receiver.name op= value`.
    pub fn attr_op_assign(
        line: u32,
        receiver: Node,
        name: &str,
        op: &str,
        value: Node,
    ) -> Result<Self, CompileError> {
        require_name(line, "method", name)?;
        require_name(line, "operator", op)?;
        Ok(Node::new(line, NodeKind::AttrOpAssign {
            receiver: Box::new(receiver),
            name: name.to_string(),
            op: op.to_string(),
            value: Box::new(value),
        }))
    }

    pub fn regex_match(line: u32, pattern: Node, value: Node, pattern_first: bool) -> Self {
        Node::new(line, NodeKind::Match {
            pattern: Box::new(pattern),
            value: Box::new(value),
            pattern_first,
        })
    }

    pub fn dynamic_regex(line: u32, parts: Vec<Node>, flags: u32, once: bool) -> Self {
        Node::new(line, NodeKind::DynamicRegex { parts, flags, once })
    }

    pub fn back_ref(line: u32, kind: char) -> Result<Self, CompileError> {
        if !matches!(kind, '&' | '`' | '\'' | '+') {
            return Err(CompileError::malformed(line, format!("no back reference `${kind}`")));
        }
        Ok(Node::new(line, NodeKind::BackRef(kind)))
    }

    pub fn nth_ref(line: u32, group: u32) -> Result<Self, CompileError> {
        if group == 0 {
            return Err(CompileError::malformed(line, "match groups count from 1"));
        }
        Ok(Node::new(line, NodeKind::NthRef(group)))
    }

    pub fn global_alias(line: u32, new: &str, old: &str) -> Result<Self, CompileError> {
        for name in [new, old] {
            if name.len() < 2 || !name.starts_with('$') {
                return Err(CompileError::malformed(
                    line,
                    format!("`{name}` is not a global variable"),
                ));
            }
        }
        Ok(Node::new(line, NodeKind::GlobalAlias {
            new: new.to_string(),
            old: old.to_string(),
        }))
    }

    pub fn flip_flop(line: u32, start: Node, finish: Node, exclusive: bool) -> Self {
        Node::new(line, NodeKind::FlipFlop {
            start: Box::new(start),
            finish: Box::new(finish),
            exclusive,
        })
    }

    /// `for var in iter; body; end`. `var` must be an assignment target.
    pub fn for_loop(
        line: u32,
        iter: Node,
        var: Node,
        body: Option<Node>,
    ) -> Result<Self, CompileError> {
        if !var.is_target() {
            return Err(CompileError::malformed(var.line, "`for` variable is not assignable"));
        }
        Ok(Node::new(line, NodeKind::For {
            iter: Box::new(iter),
            var: Box::new(var),
            body: boxed(body),
        }))
    }

    pub fn def(
        line: u32,
        name: &str,
        args: FormalArgs,
        body: Option<Node>,
    ) -> Result<Self, CompileError> {
        require_name(line, "method", name)?;
        Ok(Node::new(line, NodeKind::Def {
            name: name.to_string(),
            args,
            body: boxed(body),
        }))
    }

    pub fn class(
        line: u32,
        path: ConstPath,
        superclass: Option<Node>,
        body: Option<Node>,
    ) -> Result<Self, CompileError> {
        require_name(line, "class", path.name())?;
        Ok(Node::new(line, NodeKind::Class {
            path,
            superclass: boxed(superclass),
            body: boxed(body),
        }))
    }

    pub fn module(
        line: u32,
        path: ConstPath,
        body: Option<Node>,
    ) -> Result<Self, CompileError> {
        require_name(line, "module", path.name())?;
        Ok(Node::new(line, NodeKind::Module {
            path,
            body: boxed(body),
        }))
    }

    pub fn script(line: u32, body: Option<Node>) -> Self {
        Node::new(line, NodeKind::Script(boxed(body)))
    }

    /// Can receive a value from the stack in a multiple assignment.
    pub fn is_target(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::LocalAssign { value: None, .. }
                | NodeKind::IVarAssign { value: None, .. }
                | NodeKind::GVarAssign { value: None, .. }
                | NodeKind::CVarAssign { value: None, .. }
                | NodeKind::ConstAssign { value: None, .. }
                | NodeKind::AttrAssign { value: None, .. }
                | NodeKind::MultipleAssign { value: None, .. }
        )
    }

    /// An assignment that carries its own value.
    pub fn is_assignment(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::LocalAssign { value: Some(_), .. }
                | NodeKind::IVarAssign { value: Some(_), .. }
                | NodeKind::GVarAssign { value: Some(_), .. }
                | NodeKind::CVarAssign { value: Some(_), .. }
                | NodeKind::ConstAssign { value: Some(_), .. }
                | NodeKind::AttrAssign { value: Some(_), .. }
        )
    }
}

fn check_args(line: u32, args: &[Node]) -> Result<(), CompileError> {
    for (i, arg) in args.iter().enumerate() {
        match arg.kind {
            NodeKind::Splat(_) if i + 1 != args.len() => {
                return Err(CompileError::malformed(
                    line,
                    "splat argument must come last",
                ));
            }
            NodeKind::BlockPass(_) | NodeKind::Iter { .. } => {
                return Err(CompileError::malformed(
                    line,
                    "block given as a plain argument",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_op_assign(line: u32, assignment: &Node) -> Result<(), CompileError> {
    if assignment.is_assignment() {
        Ok(())
    } else {
        Err(CompileError::malformed(
            line,
            "operator assignment needs an assignment with a value",
        ))
    }
}

fn number_kind(line: u32, text: &str) -> Result<NodeKind, CompileError> {
    let digits: String = text.chars().filter(|&c| c != '_').collect();
    if let Ok(v) = digits.parse::<i64>() {
        return Ok(NodeKind::Integer(v));
    }
    let unsigned = digits.strip_prefix('-').unwrap_or(&digits);
    if !unsigned.is_empty() && unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(NodeKind::BigInteger(digits));
    }
    Err(CompileError::malformed(
        line,
        format!("`{text}` is not an integer"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_normalization() {
        let n = Node::literal(1, LiteralValue::Number("12_000".into())).unwrap();
        assert_eq!(n.kind, NodeKind::Integer(12_000));

        let big = "123456789012345678901234567890";
        let n = Node::literal(1, LiteralValue::Number(big.into())).unwrap();
        assert_eq!(n.kind, NodeKind::BigInteger(big.into()));

        let n = Node::literal(1, LiteralValue::Range {
            first: 1,
            last: 3,
            exclusive: true,
        })
        .unwrap();
        assert!(matches!(n.kind, NodeKind::Range { exclusive: true, .. }));

        assert!(Node::literal(4, LiteralValue::Number("1x".into())).is_err());
    }

    #[test]
    fn when_needs_conditions() {
        assert_eq!(
            When::new(7, vec![], None),
            Err(CompileError::malformed(7, "`when` without conditions"))
        );
    }

    #[test]
    fn multiple_assign_targets() {
        let a = Node::assign_local(1, "a", None).unwrap();
        let ok = Node::multiple_assign(1, vec![a.clone()], None, None);
        assert!(ok.is_ok());

        let valued = Node::assign_local(1, "b", Some(Node::int(1, 1))).unwrap();
        assert!(Node::multiple_assign(1, vec![a, valued], None, None).is_err());

        let lit = Node::int(2, 3);
        let err = Node::multiple_assign(1, vec![lit], None, None).unwrap_err();
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn formal_args_validation() {
        let dflt = Node::assign_local(1, "b", Some(Node::nil(1))).unwrap();
        let args = FormalArgs::new(
            1,
            vec!["a".into()],
            vec![dflt],
            Some("rest".into()),
            Some("blk".into()),
        )
        .unwrap();
        assert_eq!(args.names(), vec!["a", "b", "rest", "blk"]);
        assert_eq!(args.required_count(), 1);
        assert_eq!(args.total_count(), 2);

        assert!(FormalArgs::required(1, &["a", "a"]).is_err());
        assert!(FormalArgs::required(1, &[""]).is_err());
        assert!(
            FormalArgs::new(1, vec![], vec![Node::nil(1)], None, None).is_err()
        );
    }

    #[test]
    fn match_references_and_aliases() {
        assert!(Node::nth_ref(1, 1).is_ok());
        assert!(Node::nth_ref(2, 0).is_err());
        assert!(Node::back_ref(1, '&').is_ok());
        assert!(Node::back_ref(1, 'x').is_err());
        assert!(Node::global_alias(1, "$new", "$old").is_ok());
        assert!(Node::global_alias(1, "new", "$old").is_err());
        assert!(Node::global_alias(1, "$", "$old").is_err());
    }

    #[test]
    fn op_assign_shapes() {
        let recv = Node::self_ref(1);
        let splat = Node::splat(1, Node::nil(1));
        assert!(Node::index_op_assign(1, recv.clone(), vec![splat], "+", Node::int(1, 1)).is_err());
        assert!(Node::index_op_assign(1, recv.clone(), vec![], "", Node::int(1, 1)).is_err());
        assert!(Node::attr_op_assign(1, recv, "count", "+", Node::int(1, 1)).is_ok());
    }

    #[test]
    fn for_variable_must_be_a_target() {
        let iter = Node::array(1, vec![]);
        let var = Node::assign_local(1, "x", None).unwrap();
        assert!(Node::for_loop(1, iter.clone(), var, None).is_ok());
        let err = Node::for_loop(1, iter, Node::int(3, 1), None).unwrap_err();
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn call_argument_shapes() {
        let splat = Node::splat(1, Node::self_ref(1));
        assert!(Node::call(1, None, "f", vec![splat.clone()]).is_ok());
        assert!(
            Node::call(1, None, "f", vec![splat, Node::nil(1)]).is_err()
        );
        assert!(Node::call(1, None, "", vec![]).is_err());

        let call = Node::call(1, None, "each", vec![]).unwrap();
        let blk = Node::iter(1, FormalArgs::default(), None);
        let call = call.with_block(blk.clone()).unwrap();
        assert!(call.with_block(blk).is_err());
    }

    #[test]
    fn op_assign_needs_value() {
        let target = Node::assign_local(1, "a", None).unwrap();
        assert!(Node::or_assign(1, target).is_err());
        let assign = Node::assign_local(1, "a", Some(Node::int(1, 1))).unwrap();
        assert!(Node::or_assign(1, assign).is_ok());
    }
}
