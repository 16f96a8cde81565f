//! SQL parsing and table reference extraction.

use crate::error::RlsError;
use sqlparser::ast::{Ident, ObjectNamePart, Select, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Parses PostgreSQL statements and lists the tables a `SELECT` reads.
pub struct SqlAnalyzer {
    dialect: PostgreSqlDialect,
}

impl Clone for SqlAnalyzer {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for SqlAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SqlAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SqlAnalyzer(postgres)")
    }
}

impl SqlAnalyzer {
    /// Create a new SQL analyzer.
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Parse a SQL string into statements.
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, RlsError> {
        Parser::parse_sql(&self.dialect, sql).map_err(|e| RlsError::ParseError(e.to_string()))
    }

    /// Plain tables referenced directly by the `FROM` clause of `select`,
    /// including joined tables and tables inside parenthesised joins.
    ///
    /// Derived tables are not listed; they are separate queries.
    pub fn extract_tables(&self, select: &Select) -> Vec<TableReference> {
        let mut tables = Vec::new();
        for table_with_joins in &select.from {
            self.visit_table_with_joins(table_with_joins, &mut tables);
        }
        tables
    }

    fn visit_table_with_joins(&self, table_with_joins: &TableWithJoins, tables: &mut Vec<TableReference>) {
        self.visit_table_factor(&table_with_joins.relation, tables);
        for join in &table_with_joins.joins {
            self.visit_table_factor(&join.relation, tables);
        }
    }

    fn visit_table_factor(&self, table_factor: &TableFactor, tables: &mut Vec<TableReference>) {
        match table_factor {
            TableFactor::Table { name, alias, .. } => {
                // `FROM some_function_part(...)` style names have no table identifier.
                let Some(table) = name.0.last().and_then(ObjectNamePart::as_ident) else {
                    return;
                };
                tables.push(TableReference {
                    name: name.to_string(),
                    table: table.clone(),
                    alias: alias.as_ref().map(|a| a.name.clone()),
                });
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.visit_table_with_joins(table_with_joins, tables),
            _ => {}
        }
    }
}

/// A reference to a table in a `FROM` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReference {
    /// The table name as written, possibly schema-qualified.
    pub name: String,
    /// Last segment of the name, with its quoting.
    pub table: Ident,
    /// Optional alias.
    pub alias: Option<Ident>,
}

impl TableReference {
    /// The identifier columns of this reference are qualified with: the
    /// alias if present, else the unqualified table name.
    pub fn qualifier(&self) -> Ident {
        self.alias.clone().unwrap_or_else(|| self.table.clone())
    }

    /// Whether the table identifier was written in quotes, which makes it
    /// case-sensitive.
    pub fn is_quoted(&self) -> bool {
        self.table.quote_style.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::SetExpr;

    fn first_select(analyzer: &SqlAnalyzer, sql: &str) -> Select {
        let stmts = analyzer.parse(sql).unwrap();
        match &stmts[0] {
            Statement::Query(query) => match query.body.as_ref() {
                SetExpr::Select(select) => select.as_ref().clone(),
                other => panic!("expected select, got {other:?}"),
            },
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let analyzer = SqlAnalyzer::new();
        let select = first_select(&analyzer, "SELECT * FROM pg_tables");
        let tables = analyzer.extract_tables(&select);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "pg_tables");
        assert_eq!(tables[0].qualifier().value, "pg_tables");
    }

    #[test]
    fn test_parse_join_with_aliases() {
        let analyzer = SqlAnalyzer::new();
        let select = first_select(
            &analyzer,
            "SELECT * FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace",
        );
        let tables = analyzer.extract_tables(&select);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "pg_class");
        assert_eq!(tables[0].qualifier().value, "c");
        assert_eq!(tables[1].name, "pg_namespace");
        assert_eq!(tables[1].qualifier().value, "n");
    }

    #[test]
    fn test_qualified_name_uses_last_segment() {
        let analyzer = SqlAnalyzer::new();
        let select = first_select(&analyzer, "SELECT * FROM information_schema.schemata");
        let tables = analyzer.extract_tables(&select);
        assert_eq!(tables[0].name, "information_schema.schemata");
        assert_eq!(tables[0].qualifier().to_string(), "schemata");
    }

    #[test]
    fn test_quoted_name_keeps_quotes() {
        let analyzer = SqlAnalyzer::new();
        let select = first_select(&analyzer, r#"SELECT * FROM pg_catalog."pg_tables""#);
        let tables = analyzer.extract_tables(&select);
        assert_eq!(tables[0].qualifier().to_string(), r#""pg_tables""#);
        assert!(tables[0].is_quoted());
    }

    #[test]
    fn test_quoted_name_with_dot_is_one_identifier() {
        let analyzer = SqlAnalyzer::new();
        let select = first_select(&analyzer, r#"SELECT * FROM "weird.pg_tables""#);
        let tables = analyzer.extract_tables(&select);
        assert_eq!(tables[0].table.value, "weird.pg_tables");
        assert_eq!(tables[0].qualifier().to_string(), r#""weird.pg_tables""#);
    }

    #[test]
    fn test_parse_error() {
        let analyzer = SqlAnalyzer::new();
        assert!(matches!(
            analyzer.parse("SELEC nonsense FROM"),
            Err(RlsError::ParseError(_))
        ));
    }
}
