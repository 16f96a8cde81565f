//! Scope predicate injection.
//!
//! The injector never edits the parsed statements in place. Every level that
//! changes is cloned and rebuilt with the new child, so the input AST stays
//! untouched and unchanged subtrees are reused as they were parsed.

use std::sync::Arc;

use pgreflect_core::{InterceptionRule, MatchKind, TenantScope};
use serde::Serialize;
use sqlparser::ast::{
    BinaryOperator, Expr, Ident, Query, Select, SetExpr, Statement, TableFactor, TableWithJoins,
    Value, With,
};

use crate::error::RlsError;
use crate::parser::{SqlAnalyzer, TableReference};

/// Injects scoping predicates into queries over intercepted tables.
#[derive(Debug, Clone)]
pub struct ScopeInjector {
    analyzer: SqlAnalyzer,
    rules: Arc<[InterceptionRule]>,
}

/// Result of scoping one query text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionResult {
    /// The SQL as received.
    pub original_sql: String,
    /// The rewritten SQL, or `None` when no predicate was needed.
    pub rewritten_sql: Option<String>,
    /// Tables that received a predicate, as written in the query.
    pub tables_scoped: Vec<String>,
    /// The predicates that were added.
    pub predicates_added: Vec<String>,
}

#[derive(Default)]
struct Injections {
    tables: Vec<String>,
    predicates: Vec<String>,
}

impl ScopeInjector {
    /// Create an injector over a fixed rule table.
    pub fn new(rules: impl Into<Arc<[InterceptionRule]>>) -> Self {
        Self {
            analyzer: SqlAnalyzer::new(),
            rules: rules.into(),
        }
    }

    pub fn rules(&self) -> &[InterceptionRule] {
        &self.rules
    }

    /// Rewrite `sql` for `scope`.
    ///
    /// Returns `None` when the original text should be forwarded as is:
    /// either nothing needed scoping or the text could not be parsed.
    pub fn rewrite(&self, sql: &str, scope: &TenantScope) -> Option<String> {
        match self.inject(sql, scope) {
            Ok(result) => result.rewritten_sql,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    tenant = %scope.tenant_id,
                    query = %sql,
                    "Query could not be parsed, forwarding unmodified"
                );
                None
            }
        }
    }

    /// Scope `sql` and report what was added.
    pub fn inject(&self, sql: &str, scope: &TenantScope) -> Result<InjectionResult, RlsError> {
        let statements = self.analyzer.parse(sql)?;

        let mut injections = Injections::default();
        let mut rewritten = Vec::with_capacity(statements.len());
        for stmt in &statements {
            let scoped = self.scope_statement(stmt, scope, &mut injections);
            rewritten.push(scoped.unwrap_or_else(|| stmt.clone()));
        }

        let rewritten_sql = if injections.predicates.is_empty() {
            None
        } else {
            Some(
                rewritten
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        Ok(InjectionResult {
            original_sql: sql.to_string(),
            rewritten_sql,
            tables_scoped: injections.tables,
            predicates_added: injections.predicates,
        })
    }

    fn scope_statement(
        &self,
        stmt: &Statement,
        scope: &TenantScope,
        out: &mut Injections,
    ) -> Option<Statement> {
        match stmt {
            Statement::Query(query) => self
                .scope_query(query, scope, out)
                .map(|q| Statement::Query(Box::new(q))),
            _ => None,
        }
    }

    fn scope_query(&self, query: &Query, scope: &TenantScope, out: &mut Injections) -> Option<Query> {
        let with = query
            .with
            .as_ref()
            .and_then(|with| self.scope_with(with, scope, out));
        let body = self.scope_set_expr(&query.body, scope, out);

        if with.is_none() && body.is_none() {
            return None;
        }

        let mut scoped = query.clone();
        if let Some(with) = with {
            scoped.with = Some(with);
        }
        if let Some(body) = body {
            scoped.body = Box::new(body);
        }
        Some(scoped)
    }

    fn scope_with(&self, with: &With, scope: &TenantScope, out: &mut Injections) -> Option<With> {
        let mut changed = false;
        let mut cte_tables = Vec::with_capacity(with.cte_tables.len());
        for cte in &with.cte_tables {
            let mut cte = cte.clone();
            if let Some(query) = self.scope_query(&cte.query, scope, out) {
                cte.query = Box::new(query);
                changed = true;
            }
            cte_tables.push(cte);
        }

        if !changed {
            return None;
        }
        let mut scoped = with.clone();
        scoped.cte_tables = cte_tables;
        Some(scoped)
    }

    fn scope_set_expr(
        &self,
        set_expr: &SetExpr,
        scope: &TenantScope,
        out: &mut Injections,
    ) -> Option<SetExpr> {
        match set_expr {
            SetExpr::Select(select) => self
                .scope_select(select, scope, out)
                .map(|s| SetExpr::Select(Box::new(s))),
            SetExpr::Query(query) => self
                .scope_query(query, scope, out)
                .map(|q| SetExpr::Query(Box::new(q))),
            SetExpr::SetOperation { left, right, .. } => {
                let new_left = self.scope_set_expr(left, scope, out);
                let new_right = self.scope_set_expr(right, scope, out);
                if new_left.is_none() && new_right.is_none() {
                    return None;
                }

                let mut scoped = set_expr.clone();
                if let SetExpr::SetOperation { left, right, .. } = &mut scoped {
                    if let Some(new_left) = new_left {
                        *left = Box::new(new_left);
                    }
                    if let Some(new_right) = new_right {
                        *right = Box::new(new_right);
                    }
                }
                Some(scoped)
            }
            _ => None,
        }
    }

    fn scope_select(&self, select: &Select, scope: &TenantScope, out: &mut Injections) -> Option<Select> {
        let from = self.scope_derived_tables(&select.from, scope, out);
        let predicates = self.predicates_for(select, scope, out);

        if from.is_none() && predicates.is_empty() {
            return None;
        }

        let mut scoped = select.clone();
        if let Some(from) = from {
            scoped.from = from;
        }
        if !predicates.is_empty() {
            scoped.selection = conjoin(select.selection.as_ref(), predicates);
        }
        Some(scoped)
    }

    /// New predicates for the tables of `select`, skipping any already
    /// present as a conjunct of its `WHERE`.
    fn predicates_for(&self, select: &Select, scope: &TenantScope, out: &mut Injections) -> Vec<Expr> {
        let mut present = select
            .selection
            .as_ref()
            .map(conjuncts)
            .unwrap_or_default();
        let mut predicates = Vec::new();

        for table in self.analyzer.extract_tables(select) {
            let rules = self
                .rules
                .iter()
                .filter(|r| r.matches_table(&table.table.value, table.is_quoted()));
            for rule in rules {
                let values = scope.values(rule.scope_source);
                if values.is_empty() {
                    tracing::debug!(
                        table = %table.name,
                        source = %rule.scope_source,
                        tenant = %scope.tenant_id,
                        "Scope value empty, rule skipped"
                    );
                    continue;
                }

                let predicate = build_predicate(&table, rule, &values);
                let rendered = predicate.to_string();
                if present.contains(&rendered) {
                    continue;
                }

                present.push(rendered.clone());
                out.tables.push(table.name.clone());
                out.predicates.push(rendered);
                predicates.push(predicate);
            }
        }

        predicates
    }

    fn scope_derived_tables(
        &self,
        from: &[TableWithJoins],
        scope: &TenantScope,
        out: &mut Injections,
    ) -> Option<Vec<TableWithJoins>> {
        let mut changed = false;
        let mut scoped = Vec::with_capacity(from.len());
        for table_with_joins in from {
            match self.scope_table_with_joins(table_with_joins, scope, out) {
                Some(new) => {
                    changed = true;
                    scoped.push(new);
                }
                None => scoped.push(table_with_joins.clone()),
            }
        }
        changed.then_some(scoped)
    }

    fn scope_table_with_joins(
        &self,
        table_with_joins: &TableWithJoins,
        scope: &TenantScope,
        out: &mut Injections,
    ) -> Option<TableWithJoins> {
        let relation = self.scope_table_factor(&table_with_joins.relation, scope, out);
        let joins: Vec<_> = table_with_joins
            .joins
            .iter()
            .map(|join| self.scope_table_factor(&join.relation, scope, out))
            .collect();

        if relation.is_none() && joins.iter().all(Option::is_none) {
            return None;
        }

        let mut scoped = table_with_joins.clone();
        if let Some(relation) = relation {
            scoped.relation = relation;
        }
        for (join, new_relation) in scoped.joins.iter_mut().zip(joins) {
            if let Some(new_relation) = new_relation {
                join.relation = new_relation;
            }
        }
        Some(scoped)
    }

    fn scope_table_factor(
        &self,
        factor: &TableFactor,
        scope: &TenantScope,
        out: &mut Injections,
    ) -> Option<TableFactor> {
        match factor {
            TableFactor::Derived { subquery, .. } => {
                let query = self.scope_query(subquery, scope, out)?;
                let mut scoped = factor.clone();
                if let TableFactor::Derived { subquery, .. } = &mut scoped {
                    *subquery = Box::new(query);
                }
                Some(scoped)
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                let inner = self.scope_table_with_joins(table_with_joins, scope, out)?;
                let mut scoped = factor.clone();
                if let TableFactor::NestedJoin {
                    table_with_joins, ..
                } = &mut scoped
                {
                    *table_with_joins = Box::new(inner);
                }
                Some(scoped)
            }
            _ => None,
        }
    }
}

/// `qualifier.column = 'v'` or `qualifier.column IN ('v1', ...)`.
fn build_predicate(table: &TableReference, rule: &InterceptionRule, values: &[&str]) -> Expr {
    let column = Expr::CompoundIdentifier(vec![
        table.qualifier(),
        Ident::new(rule.column_name.clone()),
    ]);
    let literal =
        |value: &str| Expr::Value(Value::SingleQuotedString(value.to_string()).with_empty_span());

    match (rule.match_kind, values) {
        (MatchKind::Equals, [single]) => Expr::BinaryOp {
            left: Box::new(column),
            op: BinaryOperator::Eq,
            right: Box::new(literal(single)),
        },
        _ => Expr::InList {
            expr: Box::new(column),
            list: values.iter().map(|v| literal(v)).collect(),
            negated: false,
        },
    }
}

/// `(existing) AND p1 AND p2 ...`
fn conjoin(existing: Option<&Expr>, predicates: Vec<Expr>) -> Option<Expr> {
    let base = existing.map(|expr| match expr {
        Expr::Nested(_) => expr.clone(),
        _ => Expr::Nested(Box::new(expr.clone())),
    });

    predicates.into_iter().fold(base, |acc, predicate| {
        Some(match acc {
            Some(left) => Expr::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::And,
                right: Box::new(predicate),
            },
            None => predicate,
        })
    })
}

/// The rendered top-level conjuncts of a condition.
fn conjuncts(expr: &Expr) -> Vec<String> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut parts = conjuncts(left);
            parts.extend(conjuncts(right));
            parts
        }
        Expr::Nested(inner) => conjuncts(inner),
        other => vec![other.to_string()],
    }
}
