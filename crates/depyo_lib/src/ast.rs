use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::code::Const;

/// Comparison operators in bytecode table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
    ExcMatch,
}

impl CmpOp {
    pub fn from_arg(arg: u32) -> Option<CmpOp> {
        Some(match arg {
            0 => CmpOp::Lt,
            1 => CmpOp::Le,
            2 => CmpOp::Eq,
            3 => CmpOp::Ne,
            4 => CmpOp::Gt,
            5 => CmpOp::Ge,
            6 => CmpOp::In,
            7 => CmpOp::NotIn,
            8 => CmpOp::Is,
            9 => CmpOp::IsNot,
            10 => CmpOp::ExcMatch,
            _ => return None,
        })
    }

    pub fn text(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::ExcMatch => "exception match",
        }
    }

    pub fn is_identity(self) -> bool {
        matches!(self, CmpOp::Is | CmpOp::IsNot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Power,
    Multiply,
    MatMultiply,
    Divide,
    FloorDivide,
    Modulo,
    Add,
    Subtract,
    Lshift,
    Rshift,
    And,
    Xor,
    Or,
}

impl BinOp {
    pub fn text(self) -> &'static str {
        match self {
            BinOp::Power => "**",
            BinOp::Multiply => "*",
            BinOp::MatMultiply => "@",
            BinOp::Divide => "/",
            BinOp::FloorDivide => "//",
            BinOp::Modulo => "%",
            BinOp::Add => "+",
            BinOp::Subtract => "-",
            BinOp::Lshift => "<<",
            BinOp::Rshift => ">>",
            BinOp::And => "&",
            BinOp::Xor => "^",
            BinOp::Or => "|",
        }
    }

    pub fn precedence(self) -> i32 {
        match self {
            BinOp::Power => 14,
            BinOp::Multiply
            | BinOp::MatMultiply
            | BinOp::Divide
            | BinOp::FloorDivide
            | BinOp::Modulo => 12,
            BinOp::Add | BinOp::Subtract => 11,
            BinOp::Lshift | BinOp::Rshift => 10,
            BinOp::And => 9,
            BinOp::Xor => 8,
            BinOp::Or => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Positive,
    Negative,
    Invert,
    Not,
}

impl UnOp {
    pub fn text(self) -> &'static str {
        match self {
            UnOp::Positive => "+",
            UnOp::Negative => "-",
            UnOp::Invert => "~",
            UnOp::Not => "not ",
        }
    }

    pub fn precedence(self) -> i32 {
        match self {
            UnOp::Not => 5,
            _ => 13,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompKind {
    List,
    Set,
    Dict,
    Generator,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DictItem {
    Pair(Expr, Expr),
    Unpack(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Pos(Expr),
    Star(Expr),
    Kw(String, Expr),
    DoubleStar(Expr),
}

/// An expression tree node. Rendering is precedence driven: a child is
/// parenthesized when its precedence loses against its position.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Const),
    Name(String),
    Attribute(Box<Expr>, String),
    Subscript(Box<Expr>, Box<Expr>),
    Tuple {
        values: Vec<Expr>,
        wrap_lines: u32,
    },
    List {
        values: Vec<Expr>,
        wrap_lines: u32,
    },
    Set {
        values: Vec<Expr>,
        wrap_lines: u32,
    },
    Dict {
        items: Vec<DictItem>,
        wrap_lines: u32,
    },
    KeyValue(Box<Expr>, Box<Expr>),
    Starred(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Compare {
        operands: Vec<Expr>,
        ops: Vec<CmpOp>,
    },
    BoolAnd {
        left: Box<Expr>,
        right: Box<Expr>,
        fold: bool,
    },
    BoolOr {
        left: Box<Expr>,
        right: Box<Expr>,
        fold: bool,
    },
    IfElse {
        cond: Box<Expr>,
        on_true: Box<Expr>,
        on_false: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<CallArg>,
    },
    Slice(Vec<Expr>),
    Lambda {
        params: String,
        body: String,
    },
    Comp {
        kind: CompKind,
        body: String,
    },
    FormatValue {
        value: Box<Expr>,
        format: String,
    },
    FString(Vec<Expr>),
    Yield(Box<Expr>),
    YieldFrom(Box<Expr>),
    Awaited(Box<Expr>),
}

impl Expr {
    pub fn name(text: impl Into<String>) -> Expr {
        Expr::Name(text.into())
    }

    pub fn tuple(values: Vec<Expr>) -> Expr {
        Expr::Tuple {
            values,
            wrap_lines: 1,
        }
    }

    pub fn precedence(&self) -> i32 {
        match self {
            Expr::Const(Const::Int(_)) => 14,
            Expr::Const(_) | Expr::Name(_) | Expr::FString(_) | Expr::FormatValue { .. } => 100,
            Expr::Tuple { .. } => 0,
            Expr::List { .. } | Expr::Set { .. } | Expr::Dict { .. } | Expr::Comp { .. } => 16,
            Expr::Attribute(..) | Expr::Subscript(..) | Expr::Call { .. } | Expr::Starred(_) => 15,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { op, .. } => op.precedence(),
            Expr::Compare { .. } => 6,
            Expr::BoolAnd { .. } => 4,
            Expr::BoolOr { .. } => 3,
            Expr::IfElse { .. } => 2,
            Expr::Slice(_) | Expr::Lambda { .. } | Expr::KeyValue(..) => 1,
            Expr::Yield(_) | Expr::YieldFrom(_) => 0,
            Expr::Awaited(_) => 13,
        }
    }

    pub fn wrap_if(&self, cond: bool) -> String {
        if cond {
            format!("({self})")
        } else {
            self.to_string()
        }
    }

    /// Whether this condition starts with an identity comparison; those
    /// never get negated when boolean jumps are folded.
    pub fn starts_with_identity_cmp(&self) -> bool {
        match self {
            Expr::Compare { ops, .. } => ops.first().is_some_and(|op| op.is_identity()),
            _ => false,
        }
    }

    /// Extends a comparison chain: `a < b` chained with `b < c` gives
    /// `a < b < c`.
    pub fn chain_compare(self, other: Expr) -> Expr {
        match (self, other) {
            (
                Expr::Compare {
                    mut operands,
                    mut ops,
                },
                Expr::Compare {
                    operands: mut other_operands,
                    ops: mut other_ops,
                },
            ) => {
                operands.append(&mut other_operands.drain(1..).collect());
                ops.append(&mut other_ops);
                Expr::Compare { operands, ops }
            }
            (left, _) => left,
        }
    }

    /// Logical negation with De Morgan folding of foldable and/or nodes.
    pub fn negated(self) -> Expr {
        match self {
            Expr::Unary {
                op: UnOp::Not,
                operand,
            } => *operand,
            Expr::BoolAnd { left, right, fold } if fold => Expr::BoolOr {
                left: Box::new(left.negated()),
                right: Box::new(right.negated()),
                fold: true,
            },
            Expr::BoolOr { left, right, fold } if fold => Expr::BoolAnd {
                left: Box::new(left.negated()),
                right: Box::new(right.negated()),
                fold: true,
            },
            other => Expr::Unary {
                op: UnOp::Not,
                operand: Box::new(other),
            },
        }
    }
}

fn join_wrapped(parts: Vec<String>, wrap_lines: u32) -> String {
    if wrap_lines <= 1 || parts.len() < 2 {
        return parts.join(", ");
    }
    let chunk = parts.len().div_ceil(wrap_lines as usize).max(1);
    parts
        .chunks(chunk)
        .map(|c| c.join(", "))
        .collect::<Vec<_>>()
        .join(",\n")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => f.write_str(&const_repr(c)),
            Expr::Name(name) => f.write_str(name),
            Expr::Attribute(obj, name) => {
                write!(f, "{}.{}", obj.wrap_if(obj.precedence() < 15), name)
            }
            Expr::Subscript(obj, index) => {
                write!(f, "{}[{}]", obj.wrap_if(obj.precedence() < 15), index)
            }
            Expr::Tuple { values, wrap_lines } => {
                if values.is_empty() {
                    return f.write_str("()");
                }
                if values.len() == 1 {
                    return write!(f, "{},", values[0]);
                }
                let parts = values.iter().map(Expr::to_string).collect();
                f.write_str(&join_wrapped(parts, *wrap_lines))
            }
            Expr::List { values, wrap_lines } => {
                let parts = values.iter().map(Expr::to_string).collect();
                write!(f, "[{}]", join_wrapped(parts, *wrap_lines))
            }
            Expr::Set { values, wrap_lines } => {
                if values.is_empty() {
                    return f.write_str("set()");
                }
                let parts = values.iter().map(Expr::to_string).collect();
                write!(f, "{{{}}}", join_wrapped(parts, *wrap_lines))
            }
            Expr::Dict { items, wrap_lines } => {
                let parts = items
                    .iter()
                    .map(|item| match item {
                        DictItem::Pair(k, v) => format!("{k}: {v}"),
                        DictItem::Unpack(e) => format!("**{e}"),
                    })
                    .collect();
                write!(f, "{{{}}}", join_wrapped(parts, *wrap_lines))
            }
            Expr::KeyValue(key, value) => {
                write!(
                    f,
                    "{}: {}",
                    key.wrap_if(key.precedence() < 1),
                    value.wrap_if(value.precedence() <= 1)
                )
            }
            Expr::Starred(e) => write!(f, "*{}", e.wrap_if(e.precedence() < 15)),
            Expr::Binary { op, left, right } => {
                write!(
                    f,
                    "{} {} {}",
                    left.wrap_if(left.precedence() < op.precedence()),
                    op.text(),
                    right.wrap_if(right.precedence() <= op.precedence())
                )
            }
            Expr::Unary { op, operand } => {
                write!(
                    f,
                    "{}{}",
                    op.text(),
                    operand.wrap_if(operand.precedence() < op.precedence())
                )
            }
            Expr::Compare { operands, ops } => {
                let mut text = operands[0].wrap_if(operands[0].precedence() <= 6);
                for (op, operand) in ops.iter().zip(operands.iter().skip(1)) {
                    text.push(' ');
                    text.push_str(op.text());
                    text.push(' ');
                    text.push_str(&operand.wrap_if(operand.precedence() <= 6));
                }
                f.write_str(&text)
            }
            Expr::BoolAnd { left, right, .. } => {
                write!(
                    f,
                    "{} and {}",
                    left.wrap_if(left.precedence() < 4),
                    right.wrap_if(right.precedence() <= 4)
                )
            }
            Expr::BoolOr { left, right, .. } => {
                write!(
                    f,
                    "{} or {}",
                    left.wrap_if(left.precedence() < 3),
                    right.wrap_if(right.precedence() <= 3)
                )
            }
            Expr::IfElse {
                cond,
                on_true,
                on_false,
            } => {
                write!(
                    f,
                    "{} if {} else {}",
                    on_true.wrap_if(on_true.precedence() <= 2),
                    cond.wrap_if(cond.precedence() <= 2),
                    on_false.wrap_if(on_false.precedence() < 2)
                )
            }
            Expr::Call { func, args } => {
                let func_text = func.wrap_if(func.precedence() < 15);
                if let [CallArg::Pos(Expr::Comp {
                    kind: CompKind::Generator,
                    body,
                })] = args.as_slice()
                {
                    // sole generator-expression argument keeps no parens
                    return write!(f, "{func_text}({body})");
                }
                let parts: Vec<String> = args
                    .iter()
                    .map(|arg| match arg {
                        CallArg::Pos(e) => e.wrap_if(e.precedence() <= 0),
                        CallArg::Star(e) => format!("*{e}"),
                        CallArg::Kw(name, e) => {
                            format!("{}={}", name, e.wrap_if(e.precedence() <= 0))
                        }
                        CallArg::DoubleStar(e) => format!("**{e}"),
                    })
                    .collect();
                write!(f, "{}({})", func_text, parts.join(", "))
            }
            Expr::Slice(parts) => {
                let text: Vec<String> = parts
                    .iter()
                    .map(|p| match p {
                        Expr::Const(Const::None) => String::new(),
                        other => other.to_string(),
                    })
                    .collect();
                f.write_str(&text.join(":"))
            }
            Expr::Lambda { params, body } => {
                if params.is_empty() {
                    write!(f, "lambda: {body}")
                } else {
                    write!(f, "lambda {params}: {body}")
                }
            }
            Expr::Comp { kind, body } => match kind {
                CompKind::List => write!(f, "[{body}]"),
                CompKind::Set | CompKind::Dict => write!(f, "{{{body}}}"),
                CompKind::Generator => write!(f, "({body})"),
            },
            Expr::FormatValue { .. } => write!(f, "f'{}'", fstring_part(self)),
            Expr::FString(parts) => {
                let text: String = parts.iter().map(fstring_part).collect();
                write!(f, "f'{text}'")
            }
            Expr::Yield(value) => write!(f, "(yield {value})"),
            Expr::YieldFrom(value) => write!(f, "(yield from {value})"),
            Expr::Awaited(e) => write!(f, "await {}", e.wrap_if(e.precedence() < 13)),
        }
    }
}

fn fstring_part(part: &Expr) -> String {
    match part {
        Expr::Const(Const::Str(s)) => s.replace('\'', "\\'"),
        Expr::FormatValue { value, format } => format!("{{{value}{format}}}"),
        other => format!("{{{other}}}"),
    }
}

/// Python literal text for a constant.
pub fn const_repr(c: &Const) -> String {
    match c {
        Const::None => "None".to_owned(),
        Const::Ellipsis => "...".to_owned(),
        Const::Bool(true) => "True".to_owned(),
        Const::Bool(false) => "False".to_owned(),
        Const::Int(i) => i.to_string(),
        Const::Float(x) => float_repr(*x),
        Const::Str(s) => str_repr(s),
        Const::Bytes(b) => bytes_repr(b),
        Const::Tuple(values) => {
            if values.is_empty() {
                "()".to_owned()
            } else if values.len() == 1 {
                format!("({},)", const_repr(&values[0]))
            } else {
                let parts: Vec<String> = values.iter().map(const_repr).collect();
                format!("({})", parts.join(", "))
            }
        }
        Const::Code(obj) => format!("<code object {}>", obj.name),
    }
}

fn float_repr(x: f64) -> String {
    if x.is_finite() && x == x.trunc() && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn bytes_repr(bytes: &[u8]) -> String {
    let mut out = String::from("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('\'');
    out
}

#[derive(Debug, Clone)]
pub struct IfStmt {
    pub cond: Expr,
    pub true_suite: Suite,
    pub false_suite: Option<Suite>,
}

#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub cond: Expr,
    pub body: Suite,
    pub else_body: Option<Suite>,
}

#[derive(Debug, Clone)]
pub struct ForStmt {
    pub iterable: Expr,
    pub dest: Option<Expr>,
    pub body: Suite,
    pub else_body: Option<Suite>,
    pub is_async: bool,
}

impl ForStmt {
    pub fn new(iterable: Expr) -> ForStmt {
        ForStmt {
            iterable,
            dest: None,
            body: Suite::default(),
            else_body: None,
            is_async: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExceptClause {
    pub exc_type: Option<Expr>,
    pub name: Option<Expr>,
    pub suite: Suite,
}

#[derive(Debug, Clone, Default)]
pub struct TryStmt {
    pub try_suite: Suite,
    pub clauses: Vec<ExceptClause>,
    pub else_suite: Option<Suite>,
    /// Executor plumbing: where the next except clause starts, wired up
    /// while matching exception types.
    pub next_start_except: Option<usize>,
}

impl TryStmt {
    pub fn add_clause(&mut self, exc_type: Option<Expr>, suite: Suite) {
        self.clauses.push(ExceptClause {
            exc_type,
            name: None,
            suite,
        });
    }
}

#[derive(Debug, Clone)]
pub struct WithStmt {
    pub expr: Expr,
    pub name: Option<Expr>,
    pub suite: Suite,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct DefStmt {
    pub name: Option<Expr>,
    pub params: String,
    pub ret: Option<String>,
    pub docstring: Option<String>,
    pub suite: Suite,
    pub is_async: bool,
    pub decorators: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct ClassStmt {
    pub name: Option<Expr>,
    pub parents: Vec<Expr>,
    pub kwargs: Vec<(String, Expr)>,
    pub suite: Suite,
    pub decorators: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromList {
    /// `import name`
    Plain,
    /// `from name import *`
    Star,
    /// `from name import a, b as c`
    Names(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ImportStmt {
    pub name: String,
    pub alias: Option<Expr>,
    pub level: u32,
    pub fromlist: FromList,
    pub aslist: Vec<String>,
}

impl ImportStmt {
    pub fn new(name: String, level: u32, fromlist: FromList) -> ImportStmt {
        ImportStmt {
            name,
            alias: None,
            level,
            fromlist,
            aslist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Simple(String),
    DocString(String),
    Assign(Vec<Expr>),
    InPlace {
        op: BinOp,
        left: Expr,
        right: Expr,
    },
    If(IfStmt),
    While(WhileStmt),
    For(Rc<RefCell<ForStmt>>),
    Try(Rc<RefCell<TryStmt>>),
    Finally {
        body: Suite,
        finalizer: Suite,
    },
    With(Rc<RefCell<WithStmt>>),
    Def(Rc<RefCell<DefStmt>>),
    Class(Rc<RefCell<ClassStmt>>),
    Import(Rc<RefCell<ImportStmt>>),
}

impl Stmt {
    pub fn simple(text: impl Into<String>) -> Stmt {
        Stmt::Simple(text.into())
    }

    /// Whether this is a `Simple` whose text starts with `prefix`.
    pub fn simple_starts_with(&self, prefix: &str) -> bool {
        matches!(self, Stmt::Simple(text) if text.starts_with(prefix))
    }

    pub fn is_simple_eq(&self, text: &str) -> bool {
        matches!(self, Stmt::Simple(t) if t == text)
    }

    fn display(&self, w: &mut SourceWriter) {
        match self {
            Stmt::Simple(text) => w.line(text),
            Stmt::DocString(text) => w.raw_line(&docstring_text(text)),
            Stmt::Assign(chain) => {
                let parts: Vec<String> = chain.iter().map(Expr::to_string).collect();
                w.line(&parts.join(" = "));
            }
            Stmt::InPlace { op, left, right } => {
                w.line(&format!("{} {}= {}", left, op.text(), right));
            }
            Stmt::If(s) => display_if(s, w, false),
            Stmt::While(s) => {
                w.line(&format!("while {}:", s.cond));
                w.indented(|w| s.body.display(w));
                if let Some(else_body) = &s.else_body {
                    if !else_body.is_empty() {
                        w.line("else:");
                        w.indented(|w| else_body.display(w));
                    }
                }
            }
            Stmt::For(s) => {
                let s = s.borrow();
                let prefix = if s.is_async { "async " } else { "" };
                let dest = opt_expr_text(&s.dest);
                w.line(&format!("{}for {} in {}:", prefix, dest, s.iterable));
                w.indented(|w| s.body.display(w));
                if let Some(else_body) = &s.else_body {
                    if !else_body.is_empty() {
                        w.line("else:");
                        w.indented(|w| else_body.display(w));
                    }
                }
            }
            Stmt::Try(s) => display_try(&s.borrow(), w),
            Stmt::Finally { body, finalizer } => {
                // fold `try/except` + `finally` into one statement
                if body.len() == 1 {
                    if let Stmt::Try(inner) = &body.statements[0] {
                        display_try(&inner.borrow(), w);
                        w.line("finally:");
                        w.indented(|w| finalizer.display(w));
                        return;
                    }
                }
                w.line("try:");
                w.indented(|w| body.display(w));
                w.line("finally:");
                w.indented(|w| finalizer.display(w));
            }
            Stmt::With(s) => {
                let mut args = Vec::new();
                display_with(&s.borrow(), w, &mut args);
            }
            Stmt::Def(s) => {
                let s = s.borrow();
                w.sep();
                for deco in s.decorators.iter().rev() {
                    w.line(&format!("@{deco}"));
                }
                let prefix = if s.is_async { "async " } else { "" };
                let name = opt_expr_text(&s.name);
                match &s.ret {
                    Some(ret) => {
                        w.line(&format!("{}def {}({}) -> {}:", prefix, name, s.params, ret))
                    }
                    None => w.line(&format!("{}def {}({}):", prefix, name, s.params)),
                }
                w.indented(|w| {
                    if let Some(doc) = &s.docstring {
                        w.raw_line(&docstring_text(doc));
                    }
                    s.suite.display(w);
                });
                w.sep();
            }
            Stmt::Class(s) => {
                let s = s.borrow();
                w.sep();
                for deco in s.decorators.iter().rev() {
                    w.line(&format!("@{deco}"));
                }
                let name = opt_expr_text(&s.name);
                if s.parents.is_empty() && s.kwargs.is_empty() {
                    w.line(&format!("class {name}:"));
                } else {
                    let mut args: Vec<String> = s.parents.iter().map(Expr::to_string).collect();
                    args.extend(s.kwargs.iter().map(|(k, v)| format!("{k}={v}")));
                    w.line(&format!("class {}({}):", name, args.join(", ")));
                }
                w.indented(|w| s.suite.display(w));
                w.sep();
            }
            Stmt::Import(s) => display_import(&s.borrow(), w),
        }
    }

    fn gen_display(&self, seq: &[String]) -> String {
        match self {
            Stmt::Simple(val) => {
                let mut parts = vec![val.clone()];
                parts.extend_from_slice(seq);
                parts.join(" ")
            }
            Stmt::If(s) => {
                let mut text = "if ".to_owned();
                if let Some(last) = seq.last() {
                    if last.ends_with(" or") || last.ends_with(" and") {
                        text.clear();
                    }
                }
                if let Some(false_suite) = &s.false_suite {
                    if !false_suite.is_empty() {
                        if matches!(s.true_suite.statements.first(), Some(Stmt::If(_))) {
                            text.push_str(&format!("not {} or", s.cond));
                            let mut next = seq.to_vec();
                            next.push(text);
                            return s.true_suite.gen_display(&next);
                        }
                        if matches!(false_suite.statements.first(), Some(Stmt::If(_))) {
                            text.push_str(&format!("{} or", s.cond));
                            let mut next = seq.to_vec();
                            next.push(text);
                            return false_suite.gen_display(&next);
                        }
                        return "<unrecognised generator condition>".to_owned();
                    }
                }
                if matches!(s.cond, Expr::IfElse { .. }) {
                    text.push_str(&format!("({})", s.cond));
                } else {
                    text.push_str(&s.cond.to_string());
                }
                if matches!(s.true_suite.statements.first(), Some(Stmt::If(_))) {
                    text.push_str(" and");
                }
                let mut next = seq.to_vec();
                next.push(text);
                s.true_suite.gen_display(&next)
            }
            Stmt::For(s) => {
                let s = s.borrow();
                let prefix = if s.is_async { "async " } else { "" };
                let iterable = s
                    .iterable
                    .wrap_if(matches!(s.iterable, Expr::IfElse { .. }));
                let text = format!("{}for {} in {}", prefix, opt_expr_text(&s.dest), iterable);
                let mut next = seq.to_vec();
                next.push(text);
                s.body.gen_display(&next)
            }
            _ => "<unrecognised generator body>".to_owned(),
        }
    }
}

fn opt_expr_text(e: &Option<Expr>) -> String {
    match e {
        Some(e) => e.to_string(),
        None => "<unrecognised>".to_owned(),
    }
}

fn display_if(s: &IfStmt, w: &mut SourceWriter, is_elif: bool) {
    let head = if is_elif { "elif" } else { "if" };
    w.line(&format!("{} {}:", head, s.cond));
    w.indented(|w| s.true_suite.display(w));
    let Some(false_suite) = &s.false_suite else {
        return;
    };
    if false_suite.is_empty() {
        return;
    }
    if false_suite.len() == 1 {
        if let Stmt::If(inner) = &false_suite.statements[0] {
            display_if(inner, w, true);
            return;
        }
    }
    w.line("else:");
    w.indented(|w| false_suite.display(w));
}

fn display_try(s: &TryStmt, w: &mut SourceWriter) {
    w.line("try:");
    w.indented(|w| s.try_suite.display(w));
    for clause in &s.clauses {
        match (&clause.exc_type, &clause.name) {
            (None, _) => w.line("except:"),
            (Some(t), None) => w.line(&format!("except {t}:")),
            (Some(t), Some(name)) => w.line(&format!("except {t} as {name}:")),
        }
        w.indented(|w| clause.suite.display(w));
    }
    if let Some(else_suite) = &s.else_suite {
        if !else_suite.is_empty() {
            w.line("else:");
            w.indented(|w| else_suite.display(w));
        }
    }
}

// Adjacent context managers collapse into one header:
// `with a as x:` directly wrapping `with b as y:` renders as
// `with a as x, b as y:`.
fn display_with(s: &WithStmt, w: &mut SourceWriter, args: &mut Vec<String>) {
    match &s.name {
        Some(name) => args.push(format!("{} as {}", s.expr, name)),
        None => args.push(s.expr.to_string()),
    }
    if s.suite.len() == 1 {
        if let Stmt::With(inner) = &s.suite.statements[0] {
            display_with(&inner.borrow(), w, args);
            return;
        }
    }
    let prefix = if s.is_async { "async " } else { "" };
    w.line(&format!("{}with {}:", prefix, args.join(", ")));
    w.indented(|w| s.suite.display(w));
}

fn display_import(s: &ImportStmt, w: &mut SourceWriter) {
    let dots = ".".repeat(s.level as usize);
    match &s.fromlist {
        FromList::Plain => {
            let alias = match &s.alias {
                Some(a) => a.to_string(),
                None => s.name.clone(),
            };
            if s.name == alias || s.name.starts_with(&format!("{alias}.")) {
                w.line(&format!("import {}", s.name));
            } else {
                w.line(&format!("import {} as {}", s.name, alias));
            }
        }
        FromList::Star => w.line(&format!("from {}{} import *", dots, s.name)),
        FromList::Names(names) => {
            let mut parts = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                match s.aslist.get(i) {
                    Some(alias) if alias != name => parts.push(format!("{name} as {alias}")),
                    _ => parts.push(name.clone()),
                }
            }
            w.line(&format!("from {}{} import {}", dots, s.name, parts.join(", ")));
        }
    }
}

fn docstring_text(text: &str) -> String {
    if !text.contains('\n') {
        return str_repr(text);
    }
    let fence = if text.contains("'''") { "\"\"\"" } else { "'''" };
    let escaped = text.replace('\\', "\\\\").replace(fence, &format!("\\{fence}"));
    format!("{fence}{escaped}{fence}")
}

/// A decompiled statement block.
#[derive(Debug, Clone, Default)]
pub struct Suite {
    pub statements: Vec<Stmt>,
}

impl Suite {
    pub fn add(&mut self, stmt: Stmt) {
        self.statements.push(stmt);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn display(&self, w: &mut SourceWriter) {
        if self.statements.is_empty() {
            w.line("pass");
        } else {
            for stmt in &self.statements {
                stmt.display(w);
            }
        }
    }

    /// Renders the suite as a standalone module body.
    pub fn to_source(&self, indent_width: usize) -> String {
        let mut w = SourceWriter::new(indent_width);
        self.display(&mut w);
        w.finish()
    }

    /// Renders the single for/if pipeline of a comprehension body as
    /// `item for target in iterable if cond` text.
    pub fn gen_display(&self, seq: &[String]) -> String {
        if self.statements.len() != 1 {
            return "<unrecognised generator body>".to_owned();
        }
        self.statements[0].gen_display(seq)
    }
}

/// Accumulates indented source lines.
pub struct SourceWriter {
    lines: Vec<String>,
    level: usize,
    width: usize,
}

impl SourceWriter {
    pub fn new(width: usize) -> SourceWriter {
        SourceWriter {
            lines: Vec::new(),
            level: 0,
            width,
        }
    }

    pub fn line(&mut self, text: &str) {
        let pad = " ".repeat(self.level * self.width);
        if text.contains('\n') {
            // wrapped-literal continuations indent one level past the
            // statement that carries them
            let cont = " ".repeat((self.level + 1) * self.width);
            self.lines
                .push(format!("{pad}{}", text.replace('\n', &format!("\n{cont}"))));
        } else {
            self.lines.push(format!("{pad}{text}"));
        }
    }

    /// Verbatim multi-line text; continuation lines belong to a string
    /// literal and keep their own spacing.
    pub fn raw_line(&mut self, text: &str) {
        let pad = " ".repeat(self.level * self.width);
        self.lines.push(format!("{pad}{text}"));
    }

    /// Blank separator line, collapsed against an existing one.
    pub fn sep(&mut self) {
        if self.lines.last().is_none_or(|l| !l.is_empty()) {
            self.lines.push(String::new());
        }
    }

    pub fn indented(&mut self, f: impl FnOnce(&mut SourceWriter)) {
        self.level += 1;
        f(self);
        self.level -= 1;
    }

    pub fn finish(self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn name(n: &str) -> Expr {
        Expr::name(n)
    }

    #[test]
    fn binary_precedence_drives_parentheses() {
        let product = Expr::Binary {
            op: BinOp::Multiply,
            left: Box::new(Expr::Binary {
                op: BinOp::Add,
                left: Box::new(name("a")),
                right: Box::new(name("b")),
            }),
            right: Box::new(name("c")),
        };
        assert_eq!(product.to_string(), "(a + b) * c");
    }

    #[test]
    fn left_folded_bool_chain_needs_no_parentheses() {
        let chain = Expr::BoolAnd {
            left: Box::new(Expr::BoolAnd {
                left: Box::new(name("a")),
                right: Box::new(name("b")),
                fold: true,
            }),
            right: Box::new(name("c")),
            fold: true,
        };
        assert_eq!(chain.to_string(), "a and b and c");
    }

    #[test]
    fn chained_comparison_renders_as_single_chain() {
        let cmp = Expr::Compare {
            operands: vec![name("a"), name("b")],
            ops: vec![CmpOp::Lt],
        };
        let chained = cmp.chain_compare(Expr::Compare {
            operands: vec![name("b"), name("c")],
            ops: vec![CmpOp::Le],
        });
        assert_eq!(chained.to_string(), "a < b <= c");
    }

    #[test]
    fn negation_folds_de_morgan_only_when_allowed() {
        let foldable = Expr::BoolAnd {
            left: Box::new(name("a")),
            right: Box::new(name("b")),
            fold: true,
        };
        assert_eq!(foldable.negated().to_string(), "not a or not b");

        let rigid = Expr::BoolAnd {
            left: Box::new(name("a")),
            right: Box::new(name("b")),
            fold: false,
        };
        assert_eq!(rigid.negated().to_string(), "not (a and b)");
    }

    #[test]
    fn string_repr_picks_quotes_like_the_source_language() {
        assert_eq!(str_repr("plain"), "'plain'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
    }

    #[test]
    fn conditional_expression_renders_inline() {
        let e = Expr::IfElse {
            cond: Box::new(name("flag")),
            on_true: Box::new(name("a")),
            on_false: Box::new(name("b")),
        };
        assert_eq!(e.to_string(), "a if flag else b");
    }

    #[test]
    fn empty_suite_renders_pass() {
        let mut w = SourceWriter::new(4);
        let suite = Suite::default();
        suite.display(&mut w);
        assert_eq!(w.finish(), "pass\n");
    }

    #[test]
    fn if_else_chain_collapses_to_elif() {
        let inner = IfStmt {
            cond: name("b"),
            true_suite: Suite {
                statements: vec![Stmt::simple("y = 2")],
            },
            false_suite: None,
        };
        let outer = IfStmt {
            cond: name("a"),
            true_suite: Suite {
                statements: vec![Stmt::simple("x = 1")],
            },
            false_suite: Some(Suite {
                statements: vec![Stmt::If(inner)],
            }),
        };
        let suite = Suite {
            statements: vec![Stmt::If(outer)],
        };
        assert_eq!(suite.to_source(4), "if a:\n    x = 1\nelif b:\n    y = 2\n");
    }

    #[test]
    fn nested_with_statements_collapse_into_one_header() {
        let inner = WithStmt {
            expr: name("b"),
            name: Some(name("y")),
            suite: Suite {
                statements: vec![Stmt::simple("work()")],
            },
            is_async: false,
        };
        let outer = WithStmt {
            expr: name("a"),
            name: Some(name("x")),
            suite: Suite {
                statements: vec![Stmt::With(Rc::new(RefCell::new(inner)))],
            },
            is_async: false,
        };
        let suite = Suite {
            statements: vec![Stmt::With(Rc::new(RefCell::new(outer)))],
        };
        assert_eq!(
            suite.to_source(4),
            "with a as x, b as y:\n    work()\n"
        );
    }

    #[test]
    fn comprehension_pipeline_text() {
        let for_stmt = ForStmt {
            iterable: name("items"),
            dest: Some(name("x")),
            body: Suite {
                statements: vec![Stmt::If(IfStmt {
                    cond: name("keep"),
                    true_suite: Suite {
                        statements: vec![Stmt::simple("x * 2")],
                    },
                    false_suite: None,
                })],
            },
            else_body: None,
            is_async: false,
        };
        let suite = Suite {
            statements: vec![Stmt::For(Rc::new(RefCell::new(for_stmt)))],
        };
        assert_eq!(suite.gen_display(&[]), "x * 2 for x in items if keep");
    }

    #[test]
    fn wrapped_literals_indent_relative_to_statement() {
        let values = (0..4).map(|i| Expr::Const(Const::Int(i))).collect();
        let body = Suite {
            statements: vec![Stmt::Assign(vec![
                name("xs"),
                Expr::List {
                    values,
                    wrap_lines: 2,
                },
            ])],
        };
        let suite = Suite {
            statements: vec![Stmt::If(IfStmt {
                cond: name("c"),
                true_suite: body,
                false_suite: None,
            })],
        };
        assert_eq!(suite.to_source(2), "if c:\n  xs = [0, 1,\n    2, 3]\n");
    }

    #[test]
    fn docstring_body_keeps_its_own_spacing() {
        let body = Suite {
            statements: vec![Stmt::DocString("First.\n  Indented.".to_owned())],
        };
        let suite = Suite {
            statements: vec![Stmt::If(IfStmt {
                cond: name("c"),
                true_suite: body,
                false_suite: None,
            })],
        };
        assert_eq!(
            suite.to_source(4),
            "if c:\n    '''First.\n  Indented.'''\n"
        );
    }
}
