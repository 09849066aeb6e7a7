//! SQL text for the Transact-SQL dialect spoken by SQL Server and the Kusto
//! SQL endpoint.
//!
//! Rename statements are executed directly, not parameterized: the names come
//! from the caller's own metadata handles, not from untrusted text.

/// `'a.b.c'`: dot-join the parts and wrap the result in single quotes.
pub fn single_quote(parts: &[&str]) -> String {
    format!("'{}'", parts.join("."))
}

/// `sp_rename 'catalog.schema.table', 'new_table'`
pub fn rename_table_sql(catalog: &str, schema: &str, table: &str, new_table: &str) -> String {
    format!(
        "sp_rename {}, {}",
        single_quote(&[catalog, schema, table]),
        single_quote(&[new_table])
    )
}

/// `sp_rename 'catalog.schema.table.column', 'new_column', 'COLUMN'`
pub fn rename_column_sql(
    catalog: &str,
    schema: &str,
    table: &str,
    column: &str,
    new_column: &str,
) -> String {
    format!(
        "sp_rename {}, {}, 'COLUMN'",
        single_quote(&[catalog, schema, table, column]),
        single_quote(&[new_column])
    )
}

/// `[name]`, with `]` doubled.
pub fn quote_bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Whether `sql` reads only, judged by its leading keyword (`SELECT` or
/// `WITH`). Used to keep read-only sessions from running other statements.
pub fn is_read_statement(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    keyword.eq_ignore_ascii_case("select") || keyword.eq_ignore_ascii_case("with")
}
