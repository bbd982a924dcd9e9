//! Portable statement tree.
//!
//! This is the subset of SQL the layer translates between dialects:
//! single-row-source DML, single-table SELECT and bare expressions. Trees
//! held by the AST cache are shared and never mutated; the translator works
//! on a clone.
use crate::schema::FieldType;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    /// A bare expression parsed through [`crate::ast::AstCache::get_ast_expression`].
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStmt {
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: Option<TableName>,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub asc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableName {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: TableName,
    pub assignments: Vec<Assignment>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: TableName,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Variable reference, possibly dotted (`table.field`).
    Column(String),
    Literal(Literal),
    /// Bind placeholder exactly as written (`$1`, `?`).
    Param(String),
    Binary {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        ty: FieldType,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Nested(Box<Expr>),
    /// `*` inside `COUNT(*)`.
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    /// Kept as written so printing does not change precision.
    Float(String),
    Text(String),
    /// Hex digits of an `X'..'` literal.
    Hex(String),
}

impl Literal {
    /// Type inferred from the literal kind; `None` for NULL.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Literal::Null => None,
            Literal::Bool(_) => Some(FieldType::Bool),
            Literal::Int(_) => Some(FieldType::Int64),
            Literal::Float(_) => Some(FieldType::Float64),
            Literal::Text(_) => Some(FieldType::Text),
            Literal::Hex(_) => Some(FieldType::Bin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Like,
    NotLike,
    Concat,
}

impl BinaryOperator {
    pub fn as_sql(self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Like => "LIKE",
            BinaryOperator::NotLike => "NOT LIKE",
            BinaryOperator::Concat => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
}

impl Statement {
    /// Visit every expression in the statement, outermost first.
    pub fn walk_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Statement::Select(s) => {
                for item in &s.projection {
                    if let SelectItem::Expr { expr, .. } = item {
                        expr.walk(f);
                    }
                }
                if let Some(filter) = &s.filter {
                    filter.walk(f);
                }
                for o in &s.order_by {
                    o.expr.walk(f);
                }
            }
            Statement::Insert(i) => {
                for row in &i.rows {
                    for e in row {
                        e.walk(f);
                    }
                }
            }
            Statement::Update(u) => {
                for a in &u.assignments {
                    a.value.walk(f);
                }
                if let Some(filter) = &u.filter {
                    filter.walk(f);
                }
            }
            Statement::Delete(d) => {
                if let Some(filter) = &d.filter {
                    filter.walk(f);
                }
            }
            Statement::Expr(e) => e.walk(f),
        }
    }

    /// Mutable counterpart of [`Statement::walk_exprs`], children first.
    pub fn walk_exprs_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match self {
            Statement::Select(s) => {
                for item in &mut s.projection {
                    if let SelectItem::Expr { expr, .. } = item {
                        expr.walk_mut(f);
                    }
                }
                if let Some(filter) = &mut s.filter {
                    filter.walk_mut(f);
                }
                for o in &mut s.order_by {
                    o.expr.walk_mut(f);
                }
            }
            Statement::Insert(i) => {
                for row in &mut i.rows {
                    for e in row {
                        e.walk_mut(f);
                    }
                }
            }
            Statement::Update(u) => {
                for a in &mut u.assignments {
                    a.value.walk_mut(f);
                }
                if let Some(filter) = &mut u.filter {
                    filter.walk_mut(f);
                }
            }
            Statement::Delete(d) => {
                if let Some(filter) = &mut d.filter {
                    filter.walk_mut(f);
                }
            }
            Statement::Expr(e) => e.walk_mut(f),
        }
    }
}

impl Expr {
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Unary { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Nested(expr) => expr.walk(f),
            Expr::Function { args, .. } => {
                for a in args {
                    a.walk(f);
                }
            }
            Expr::InList { expr, list, .. } => {
                expr.walk(f);
                for e in list {
                    e.walk(f);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.walk(f);
                low.walk(f);
                high.walk(f);
            }
            Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) | Expr::Wildcard => {}
        }
    }

    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match self {
            Expr::Binary { left, right, .. } => {
                left.walk_mut(f);
                right.walk_mut(f);
            }
            Expr::Unary { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Nested(expr) => expr.walk_mut(f),
            Expr::Function { args, .. } => {
                for a in args {
                    a.walk_mut(f);
                }
            }
            Expr::InList { expr, list, .. } => {
                expr.walk_mut(f);
                for e in list {
                    e.walk_mut(f);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.walk_mut(f);
                low.walk_mut(f);
                high.walk_mut(f);
            }
            Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) | Expr::Wildcard => {}
        }
        f(self);
    }

    /// Strip redundant parentheses.
    pub fn unnested(&self) -> &Expr {
        let mut e = self;
        while let Expr::Nested(inner) = e {
            e = inner;
        }
        e
    }
}
