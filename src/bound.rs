//! Bound operations: the expressions and statements handed to us by the binder.
//!
//! Every expression carries an [ExprId] that is unique within its routine. The analysis records
//! one type per id, which is what code generation reads back. Ids are assigned when a routine body
//! is lowered (see [crate::cfg::Builder]); the constructors below leave them at zero.
use crate::common::{Name, NumTy};
use crate::types::TypeHint;

pub type ExprId = NumTy;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(Name),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Le,
    Gt,
    Ge,
    Coalesce,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Eq | NotEq | Identical | NotIdentical | Lt | Le | Gt | Ge
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    Silence,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CastKind {
    Long,
    Double,
    Bool,
    String,
    Array,
    Object,
    Unset,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IncDec {
    PreInc,
    PostInc,
    PreDec,
    PostDec,
}

impl IncDec {
    pub fn is_increment(self) -> bool {
        matches!(self, IncDec::PreInc | IncDec::PostInc)
    }
    pub fn is_prefix(self) -> bool {
        matches!(self, IncDec::PreInc | IncDec::PreDec)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Variable(Name),
    Assign(Box<Expr> /* target */, Box<Expr>),
    CompoundAssign(BinaryOp, Box<Expr> /* target */, Box<Expr>),
    IncDec(IncDec, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Cast(CastKind, Box<Expr>),
    /// `cond ? t : f`; `cond ?: f` when the middle operand is missing.
    Conditional(Box<Expr>, Option<Box<Expr>>, Box<Expr>),
    Call(Name, Vec<Expr>),
    MethodCall(Box<Expr>, Name, Vec<Expr>),
    New(Name, Vec<Expr>),
    FieldAccess(Box<Expr>, Name),
    /// `$a[$k]`, or `$a[]` (append) when the key is missing.
    ArrayItem(Box<Expr>, Option<Box<Expr>>),
    ArrayInit(Vec<(Option<Expr>, Expr)>),
    InstanceOf(Box<Expr>, Name),
    IsSet(Vec<Expr>),
    Concat(Vec<Expr>),
}

fn b(e: Expr) -> Box<Expr> {
    Box::new(e)
}

impl Expr {
    pub fn new(kind: ExprKind) -> Expr {
        Expr { id: 0, kind }
    }
    pub fn null() -> Expr {
        Expr::new(ExprKind::Literal(Literal::Null))
    }
    pub fn bool(v: bool) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Bool(v)))
    }
    pub fn long(v: i64) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Long(v)))
    }
    pub fn double(v: f64) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Double(v)))
    }
    pub fn string(v: &str) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Str(v.into())))
    }
    pub fn var(name: &str) -> Expr {
        Expr::new(ExprKind::Variable(name.into()))
    }
    pub fn assign(target: Expr, value: Expr) -> Expr {
        Expr::new(ExprKind::Assign(b(target), b(value)))
    }
    pub fn compound_assign(op: BinaryOp, target: Expr, value: Expr) -> Expr {
        Expr::new(ExprKind::CompoundAssign(op, b(target), b(value)))
    }
    pub fn inc_dec(kind: IncDec, target: Expr) -> Expr {
        Expr::new(ExprKind::IncDec(kind, b(target)))
    }
    pub fn post_inc(target: Expr) -> Expr {
        Expr::inc_dec(IncDec::PostInc, target)
    }
    pub fn binary(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::new(ExprKind::Binary(op, b(l), b(r)))
    }
    pub fn and(l: Expr, r: Expr) -> Expr {
        Expr::binary(BinaryOp::And, l, r)
    }
    pub fn or(l: Expr, r: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, l, r)
    }
    pub fn unary(op: UnaryOp, e: Expr) -> Expr {
        Expr::new(ExprKind::Unary(op, b(e)))
    }
    pub fn not(e: Expr) -> Expr {
        Expr::unary(UnaryOp::Not, e)
    }
    pub fn cast(kind: CastKind, e: Expr) -> Expr {
        Expr::new(ExprKind::Cast(kind, b(e)))
    }
    pub fn conditional(cond: Expr, t: Option<Expr>, f: Expr) -> Expr {
        Expr::new(ExprKind::Conditional(b(cond), t.map(b), b(f)))
    }
    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::Call(name.into(), args))
    }
    pub fn method_call(instance: Expr, name: &str, args: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::MethodCall(b(instance), name.into(), args))
    }
    pub fn new_object(class: &str, args: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::New(class.into(), args))
    }
    pub fn field(instance: Expr, name: &str) -> Expr {
        Expr::new(ExprKind::FieldAccess(b(instance), name.into()))
    }
    pub fn item(array: Expr, key: Option<Expr>) -> Expr {
        Expr::new(ExprKind::ArrayItem(b(array), key.map(b)))
    }
    pub fn array(items: Vec<(Option<Expr>, Expr)>) -> Expr {
        Expr::new(ExprKind::ArrayInit(items))
    }
    pub fn instance_of(e: Expr, class: &str) -> Expr {
        Expr::new(ExprKind::InstanceOf(b(e), class.into()))
    }
    pub fn isset(vars: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::IsSet(vars))
    }
    pub fn concat(parts: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::Concat(parts))
    }

    /// The variable named by this expression, if it is a plain variable.
    pub fn as_variable(&self) -> Option<&Name> {
        match &self.kind {
            ExprKind::Variable(n) => Some(n),
            _ => None,
        }
    }

    /// Immediate subexpressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        use ExprKind::*;
        match &self.kind {
            Literal(_) | Variable(_) => vec![],
            Assign(t, v) | CompoundAssign(_, t, v) => vec![&**t, &**v],
            IncDec(_, e) | Unary(_, e) | Cast(_, e) | FieldAccess(e, _) | InstanceOf(e, _) => {
                vec![&**e]
            }
            Binary(_, l, r) => vec![&**l, &**r],
            Conditional(c, t, f) => {
                let mut res = vec![&**c];
                if let Some(t) = t {
                    res.push(&**t);
                }
                res.push(&**f);
                res
            }
            Call(_, args) | New(_, args) | IsSet(args) | Concat(args) => args.iter().collect(),
            MethodCall(inst, _, args) => {
                let mut res = vec![&**inst];
                res.extend(args.iter());
                res
            }
            ArrayItem(a, k) => {
                let mut res = vec![&**a];
                if let Some(k) = k {
                    res.push(&**k);
                }
                res
            }
            ArrayInit(items) => {
                let mut res = Vec::with_capacity(items.len() * 2);
                for (k, v) in items.iter() {
                    if let Some(k) = k {
                        res.push(k);
                    }
                    res.push(v);
                }
                res
            }
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        use ExprKind::*;
        match &mut self.kind {
            Literal(_) | Variable(_) => vec![],
            Assign(t, v) | CompoundAssign(_, t, v) => vec![&mut **t, &mut **v],
            IncDec(_, e) | Unary(_, e) | Cast(_, e) | FieldAccess(e, _) | InstanceOf(e, _) => {
                vec![&mut **e]
            }
            Binary(_, l, r) => vec![&mut **l, &mut **r],
            Conditional(c, t, f) => {
                let mut res = vec![&mut **c];
                if let Some(t) = t {
                    res.push(&mut **t);
                }
                res.push(&mut **f);
                res
            }
            Call(_, args) | New(_, args) | IsSet(args) | Concat(args) => {
                args.iter_mut().collect()
            }
            MethodCall(inst, _, args) => {
                let mut res = vec![&mut **inst];
                res.extend(args.iter_mut());
                res
            }
            ArrayItem(a, k) => {
                let mut res = vec![&mut **a];
                if let Some(k) = k {
                    res.push(&mut **k);
                }
                res
            }
            ArrayInit(items) => {
                let mut res = Vec::with_capacity(items.len() * 2);
                for (k, v) in items.iter_mut() {
                    if let Some(k) = k {
                        res.push(k);
                    }
                    res.push(v);
                }
                res
            }
        }
    }

    /// Assigns fresh ids to this expression and its subexpressions, pre-order.
    pub(crate) fn number(&mut self, next: &mut ExprId) {
        self.id = *next;
        *next += 1;
        for c in self.children_mut() {
            c.number(next);
        }
    }

    /// Pre-order traversal.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for c in self.children() {
            c.visit(f);
        }
    }
}

/// Straight-line operations inside a basic block.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Expr(Expr),
    /// `static $name = init;`
    Static(Name, Option<Expr>),
    /// `global $a, $b;`
    Global(Vec<Name>),
    Unset(Vec<Name>),
}

impl Op {
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Op::Expr(e) | Op::Static(_, Some(e)) => vec![e],
            Op::Static(_, None) | Op::Global(_) | Op::Unset(_) => vec![],
        }
    }
    pub(crate) fn number(&mut self, next: &mut ExprId) {
        match self {
            Op::Expr(e) | Op::Static(_, Some(e)) => e.number(next),
            Op::Static(_, None) | Op::Global(_) | Op::Unset(_) => {}
        }
    }
}

/// Structured statements, lowered into a control-flow graph by [crate::cfg::Builder].
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Block(Vec<Stmt>),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    While(Expr, Vec<Stmt>),
    Foreach {
        source: Expr,
        key: Option<Name>,
        value: Name,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Static(Name, Option<Expr>),
    Global(Vec<Name>),
    Unset(Vec<Name>),
}

impl Stmt {
    pub fn expr(e: Expr) -> Stmt {
        Stmt::Expr(e)
    }
    pub fn if_(cond: Expr, t: Vec<Stmt>, f: Vec<Stmt>) -> Stmt {
        Stmt::If(cond, t, f)
    }
    pub fn while_(cond: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::While(cond, body)
    }
    pub fn ret(e: Option<Expr>) -> Stmt {
        Stmt::Return(e)
    }
    pub fn foreach(source: Expr, key: Option<&str>, value: &str, body: Vec<Stmt>) -> Stmt {
        Stmt::Foreach {
            source,
            key: key.map(Into::into),
            value: value.into(),
            body,
        }
    }
    pub fn static_(name: &str, init: Option<Expr>) -> Stmt {
        Stmt::Static(name.into(), init)
    }
}

/// A formal parameter as declared in source.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: Name,
    pub hint: Option<TypeHint>,
    /// Type from a documentation comment (`@param`).
    pub doc: Option<TypeHint>,
    pub by_ref: bool,
    pub default: Option<Expr>,
}

impl Param {
    pub fn new(name: &str) -> Param {
        Param {
            name: name.into(),
            hint: None,
            doc: None,
            by_ref: false,
            default: None,
        }
    }
    pub fn hint(mut self, hint: TypeHint) -> Param {
        self.hint = Some(hint);
        self
    }
    pub fn doc(mut self, doc: TypeHint) -> Param {
        self.doc = Some(doc);
        self
    }
    pub fn by_ref(mut self) -> Param {
        self.by_ref = true;
        self
    }
    pub fn default(mut self, e: Expr) -> Param {
        self.default = Some(e);
        self
    }
}

/// A routine as handed over by the binder, before lowering.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutineDecl {
    pub name: Name,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    /// Exported routines may be called from code we never see, so their parameters cannot be
    /// typed from observed call sites.
    pub exported: bool,
}

impl RoutineDecl {
    pub fn new(name: &str) -> RoutineDecl {
        RoutineDecl {
            name: name.into(),
            params: Vec::new(),
            body: Vec::new(),
            exported: true,
        }
    }
    pub fn param(mut self, p: Param) -> RoutineDecl {
        self.params.push(p);
        self
    }
    pub fn body(mut self, body: Vec<Stmt>) -> RoutineDecl {
        self.body = body;
        self
    }
    pub fn internal(mut self) -> RoutineDecl {
        self.exported = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_is_preorder_and_unique() {
        let mut e = Expr::assign(
            Expr::var("x"),
            Expr::binary(BinaryOp::Add, Expr::long(1), Expr::var("y")),
        );
        let mut next = 5;
        e.number(&mut next);
        assert_eq!(next, 10);
        let mut ids = Vec::new();
        e.visit(&mut |e| ids.push(e.id));
        assert_eq!(ids, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn children_cover_optional_operands() {
        let e = Expr::conditional(Expr::var("c"), None, Expr::long(1));
        assert_eq!(e.children().len(), 2);
        let e = Expr::item(Expr::var("a"), None);
        assert_eq!(e.children().len(), 1);
        let e = Expr::array(vec![(Some(Expr::string("k")), Expr::long(1)), (None, Expr::null())]);
        assert_eq!(e.children().len(), 3);
    }
}
