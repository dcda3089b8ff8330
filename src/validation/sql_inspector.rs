use serde::{Deserialize, Serialize};
use sqlparser::ast::{Expr, Query, SetExpr, Statement, TableFactor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;

/// Column referenced from a `WHERE` clause, resolved to its table when possible
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

/// Statement inspection used by the cache and the slow-query analyzer
pub struct SqlInspector;

impl SqlInspector {
    /// Collapse whitespace and drop trailing semicolons
    ///
    /// Statements differing only in layout normalize to the same text.
    pub fn normalize(sql: &str) -> String {
        sql.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end_matches(';')
            .trim_end()
            .to_string()
    }

    fn parse(sql: &str) -> Option<Vec<Statement>> {
        let dialect = PostgreSqlDialect {};
        let mut parser = Parser::new(&dialect).try_with_sql(sql).ok()?;
        parser.parse_statements().ok()
    }

    /// True when every statement is a query (SELECT-class) that writes nothing
    ///
    /// Data-modifying CTEs and `SELECT ... INTO` disqualify a query.
    /// Unparseable input is treated as not read-only.
    pub fn is_read_only(sql: &str) -> bool {
        match Self::parse(sql) {
            Some(statements) if !statements.is_empty() => statements.iter().all(|stmt| match stmt {
                Statement::Query(query) => !Self::query_writes(query),
                _ => false,
            }),
            _ => false,
        }
    }

    fn query_writes(query: &Query) -> bool {
        let cte_writes = query
            .with
            .as_ref()
            .is_some_and(|with| with.cte_tables.iter().any(|cte| Self::query_writes(&cte.query)));
        cte_writes || Self::set_expr_writes(&query.body)
    }

    fn set_expr_writes(body: &SetExpr) -> bool {
        match body {
            SetExpr::Select(select) => select.into.is_some(),
            SetExpr::Query(query) => Self::query_writes(query),
            SetExpr::SetOperation { left, right, .. } => {
                Self::set_expr_writes(left) || Self::set_expr_writes(right)
            }
            SetExpr::Values(_) | SetExpr::Table(_) => false,
            // INSERT / UPDATE / DELETE / MERGE bodies
            _ => true,
        }
    }

    /// Columns referenced by the `WHERE` clauses of a query, in order of appearance
    pub fn where_columns(sql: &str) -> Vec<ColumnRef> {
        let mut columns = Vec::new();
        if let Some(statements) = Self::parse(sql) {
            for stmt in &statements {
                if let Statement::Query(query) = stmt {
                    Self::collect_query(query, &mut columns);
                }
            }
        }
        columns
    }

    fn collect_query(query: &Query, out: &mut Vec<ColumnRef>) {
        Self::collect_set_expr(&query.body, out);
    }

    fn collect_set_expr(body: &SetExpr, out: &mut Vec<ColumnRef>) {
        match body {
            SetExpr::Select(select) => {
                // alias or table name -> table name
                let mut tables: HashMap<String, String> = HashMap::new();
                let mut table_names = Vec::new();
                for table in &select.from {
                    let factors = std::iter::once(&table.relation)
                        .chain(table.joins.iter().map(|join| &join.relation));
                    for factor in factors {
                        if let TableFactor::Table { name, alias, .. } = factor {
                            let table_name = name.to_string();
                            tables.insert(table_name.clone(), table_name.clone());
                            if let Some(alias) = alias {
                                tables.insert(alias.name.value.clone(), table_name.clone());
                            }
                            table_names.push(table_name);
                        }
                    }
                }
                let default_table = if table_names.len() == 1 {
                    table_names.first().cloned()
                } else {
                    None
                };

                if let Some(selection) = &select.selection {
                    Self::collect_expr(selection, &tables, &default_table, out);
                }
            }
            SetExpr::Query(query) => Self::collect_query(query, out),
            SetExpr::SetOperation { left, right, .. } => {
                Self::collect_set_expr(left, out);
                Self::collect_set_expr(right, out);
            }
            _ => {}
        }
    }

    fn collect_expr(
        expr: &Expr,
        tables: &HashMap<String, String>,
        default_table: &Option<String>,
        out: &mut Vec<ColumnRef>,
    ) {
        match expr {
            Expr::Identifier(ident) => push_unique(
                out,
                ColumnRef {
                    table: default_table.clone(),
                    column: ident.value.clone(),
                },
            ),
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                let qualifier = &parts[parts.len() - 2].value;
                let column = &parts[parts.len() - 1].value;
                push_unique(
                    out,
                    ColumnRef {
                        table: Some(tables.get(qualifier).cloned().unwrap_or_else(|| qualifier.clone())),
                        column: column.clone(),
                    },
                );
            }
            Expr::BinaryOp { left, right, .. } => {
                Self::collect_expr(left, tables, default_table, out);
                Self::collect_expr(right, tables, default_table, out);
            }
            Expr::Nested(inner)
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::UnaryOp { expr: inner, .. }
            | Expr::InList { expr: inner, .. }
            | Expr::InSubquery { expr: inner, .. }
            | Expr::Between { expr: inner, .. }
            | Expr::Like { expr: inner, .. }
            | Expr::ILike { expr: inner, .. } => {
                Self::collect_expr(inner, tables, default_table, out);
            }
            _ => {}
        }
    }
}

fn push_unique(out: &mut Vec<ColumnRef>, column: ColumnRef) {
    if !out.contains(&column) {
        out.push(column);
    }
}
