use serde::{Deserialize, Serialize};

/// Dialect-neutral intermediate representation of the statements the lineage
/// engine understands. The [`crate::adapter`] module lowers `sqlparser` ASTs
/// into this closed set of nodes; everything downstream dispatches on it with
/// exhaustive matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    Query(Query),
    CreateView(CreateView),
    CreateTable(CreateTable),
    Insert(Insert),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateView {
    pub name: String,
    /// Declared output column names; empty when the view inherits the names
    /// of its query's projection.
    pub columns: Vec<String>,
    pub query: Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<String>,
    /// Present for `CREATE TABLE ... AS SELECT`.
    pub query: Option<Query>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insert {
    pub table: String,
    /// Explicit target column list, empty when omitted.
    pub columns: Vec<String>,
    pub source: Option<Query>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub ctes: Vec<Cte>,
    pub recursive: bool,
    pub body: QueryBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cte {
    pub name: String,
    /// Declared column aliases, empty when inherited from the query.
    pub columns: Vec<String>,
    pub query: Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryBody {
    Select(Box<Select>),
    SetOp(SetOpExpr),
    Query(Box<Query>),
    Values(Vec<Vec<Expr>>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOpExpr {
    pub op: SetOpKind,
    pub left: Box<QueryBody>,
    pub right: Box<QueryBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Select {
    pub projection: Vec<SelectItem>,
    pub from: Vec<TableWithJoins>,
    pub selection: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub qualify: Option<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SelectItem {
    Expr { expr: Expr, alias: Option<String> },
    Wildcard,
    QualifiedWildcard(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableWithJoins {
    pub relation: Relation,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Relation {
    Table {
        name: String,
        alias: Option<String>,
    },
    Derived {
        query: Box<Query>,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Join {
    pub relation: Relation,
    pub constraint: JoinConstraint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JoinConstraint {
    On(Expr),
    Using(Vec<String>),
    Natural,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnExpr),
    Literal(Literal),
    FunctionCall(FunctionCallExpr),
    BinaryOp(BinaryOpExpr),
    UnaryOp(Box<Expr>),
    Case(CaseExpr),
    Window(WindowExpr),
    Subquery(Box<Query>),
    /// `*` appearing in expression position, e.g. `count(*)`.
    Star,
    Tuple(Vec<Expr>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnExpr {
    /// Leading qualifier parts joined with `.`, e.g. `t` or `db.t`.
    pub qualifier: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    Number(String),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallExpr {
    /// Lowercased dotted function name.
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryOpExpr {
    pub left: Box<Expr>,
    pub op: String,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseExpr {
    pub operand: Option<Box<Expr>>,
    pub when_thens: Vec<(Expr, Expr)>,
    pub else_expr: Option<Box<Expr>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowExpr {
    pub name: String,
    pub args: Vec<Expr>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<Expr>,
}
