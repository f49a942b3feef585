//! Validation and scope rewriting for model-produced queries.
//!
//! The rewriting pass works on a lexical token stream (word tokens with
//! byte offsets and parenthesis depth; string literals, quoted identifiers
//! and comments are opaque) instead of raw regular expressions, so injected
//! clauses land at clause boundaries instead of inside arbitrary text.

use std::collections::HashSet;

/// Mutating keywords that must never appear anywhere in a candidate query,
/// regardless of position. Checked as whole tokens, case-insensitively.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "create", "alter", "drop", "delete", "update", "insert", "truncate", "grant", "replace",
    "execute", "call", "copy",
];

/// Clause keywords that terminate a table reference in a FROM/JOIN list.
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "join", "left", "right", "inner", "outer", "full", "cross", "on", "group", "having",
    "order", "limit", "offset", "union", "intersect", "except",
];

/// Keywords a new WHERE clause must be inserted before when the query has
/// no WHERE of its own.
const TAIL_KEYWORDS: &[&str] = &["group", "having", "order", "limit", "offset"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("Forbidden operation. Only SELECT statements are allowed.")]
    ForbiddenOperation,
    #[error("Potential SQL injection detected: {0}")]
    InjectionSuspected(String),
}

/// Caller identity every finalized query is scoped to. `manager_id` is set
/// only for line managers, who may only see their own assigned tickets.
#[derive(Debug, Clone)]
pub struct CallerScope {
    pub company_id: i32,
    pub manager_id: Option<i32>,
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    start: usize,
    end: usize,
    depth: u32,
}

pub struct QueryGuard {
    denylist: HashSet<String>,
}

impl QueryGuard {
    pub fn new(denylist: &[&str]) -> Self {
        Self {
            denylist: denylist.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Validate a candidate query and rewrite it so it cannot escape the
    /// caller's scope. Returns the query to execute.
    pub fn finalize(&self, candidate: &str, scope: &CallerScope) -> Result<String, GuardError> {
        let mut sql = strip_fences(candidate);
        sql = sql.replace("{company_id}", &scope.company_id.to_string());
        sql = sql.replace("{manager_id}", &scope.manager_id.unwrap_or(0).to_string());
        let sql = sql.trim().to_string();

        let tokens = tokenize(&sql);
        match tokens.first() {
            Some(tok) if tok.text == "select" => {}
            _ => return Err(GuardError::ForbiddenOperation),
        }
        for token in &tokens {
            if self.denylist.contains(&token.text) {
                return Err(GuardError::InjectionSuspected(token.text.clone()));
            }
        }

        let mut sql = self.scope_to_company(sql, scope.company_id);
        if let Some(manager_id) = scope.manager_id.filter(|m| *m > 0) {
            sql = self.scope_to_manager(sql, manager_id);
        }
        Ok(sql)
    }

    /// Guarantee a `company_id` filter. Idempotent: a query that already
    /// mentions `company_id` anywhere is left untouched. The filter uses
    /// the alias of the primary ticket-like table referenced by the query,
    /// defaulting to `tickets`.
    fn scope_to_company(&self, sql: String, company_id: i32) -> String {
        let tokens = tokenize(&sql);
        if tokens.iter().any(|t| t.text == "company_id") {
            return sql;
        }
        let alias = ["tickets", "ticket_analysis"]
            .into_iter()
            .find(|t| references_table(&tokens, t))
            .map(|t| table_alias(&tokens, t).unwrap_or_else(|| t.to_string()))
            .unwrap_or_else(|| "tickets".to_string());
        conjoin_filter(&sql, &tokens, &format!("{alias}.company_id = {company_id}"))
    }

    /// Guarantee a `manager_id` filter through the assignments relation for
    /// queries touching ticket data. Queries that already filter on
    /// `manager_id` are left untouched.
    fn scope_to_manager(&self, sql: String, manager_id: i32) -> String {
        let tokens = tokenize(&sql);
        if tokens.iter().any(|t| t.text == "manager_id") {
            return sql;
        }

        let mut sql = sql;
        let alias = if references_table(&tokens, "assignments") {
            table_alias(&tokens, "assignments").unwrap_or_else(|| "assignments".to_string())
        } else {
            let primary = ["tickets", "ticket_analysis"]
                .into_iter()
                .find(|t| references_table(&tokens, t));
            let Some(primary) = primary else {
                // The query does not touch ticket data; nothing to scope.
                return sql;
            };
            let t_alias = table_alias(&tokens, primary).unwrap_or_else(|| primary.to_string());
            let Some(insert_at) = table_ref_end(&tokens, primary) else {
                return sql;
            };
            sql.insert_str(
                insert_at,
                &format!(" JOIN assignments ON {t_alias}.id = assignments.ticket_id"),
            );
            "assignments".to_string()
        };

        let tokens = tokenize(&sql);
        conjoin_filter(&sql, &tokens, &format!("{alias}.manager_id = {manager_id}"))
    }
}

impl Default for QueryGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST)
    }
}

fn strip_fences(candidate: &str) -> String {
    candidate.replace("```sql", "").replace("```", "")
}

/// Produce lowercase word tokens with byte offsets and paren depth.
/// String literals, quoted identifiers and comments never yield tokens.
fn tokenize(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut depth = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '(' => {
                depth += 1;
                i += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            '\'' => {
                // String literal; '' is an escaped quote.
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
            }
            '"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    i += 1;
                }
                i += 1;
            }
            '-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() {
                    let b = bytes[i] as char;
                    if b.is_ascii_alphanumeric() || b == '_' || b == '$' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    text: sql[start..i].to_lowercase(),
                    start,
                    end: i,
                    depth,
                });
            }
            _ => {
                i += 1;
            }
        }
    }
    tokens
}

/// Find the alias a table is referenced under, if it has one.
fn table_alias(tokens: &[Token], table: &str) -> Option<String> {
    let idx = table_ref_index(tokens, table)?;
    let mut next = tokens.get(idx + 1)?;
    if next.text == "as" {
        next = tokens.get(idx + 2)?;
    }
    if CLAUSE_KEYWORDS.contains(&next.text.as_str()) {
        return None;
    }
    Some(next.text.clone())
}

/// Index of the token referencing `table` as a FROM/JOIN target.
fn table_ref_index(tokens: &[Token], table: &str) -> Option<usize> {
    tokens.iter().enumerate().position(|(i, t)| {
        t.text == table
            && i > 0
            && matches!(tokens[i - 1].text.as_str(), "from" | "join")
    })
}

fn references_table(tokens: &[Token], table: &str) -> bool {
    table_ref_index(tokens, table).is_some()
}

/// Byte offset just past a table reference and its alias, where a JOIN can
/// be spliced in.
fn table_ref_end(tokens: &[Token], table: &str) -> Option<usize> {
    let idx = table_ref_index(tokens, table)?;
    let mut end = tokens[idx].end;
    let mut look = idx + 1;
    if tokens.get(look).map(|t| t.text == "as").unwrap_or(false) {
        look += 1;
    }
    if let Some(next) = tokens.get(look) {
        if !CLAUSE_KEYWORDS.contains(&next.text.as_str()) {
            end = next.end;
        }
    }
    Some(end)
}

/// Conjoin `condition` into the statement's top-level WHERE clause,
/// creating one at the right position when the query has none.
fn conjoin_filter(sql: &str, tokens: &[Token], condition: &str) -> String {
    let mut out = sql.to_string();
    if let Some(where_tok) = tokens.iter().find(|t| t.depth == 0 && t.text == "where") {
        out.insert_str(where_tok.end, &format!(" {condition} AND"));
        return out;
    }
    let from_idx = tokens
        .iter()
        .position(|t| t.depth == 0 && t.text == "from")
        .unwrap_or(0);
    if let Some(tail) = tokens
        .iter()
        .skip(from_idx)
        .find(|t| t.depth == 0 && TAIL_KEYWORDS.contains(&t.text.as_str()))
    {
        out.insert_str(tail.start, &format!("WHERE {condition} "));
        return out;
    }
    out.push_str(&format!(" WHERE {condition}"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company_scope(company_id: i32) -> CallerScope {
        CallerScope {
            company_id,
            manager_id: None,
        }
    }

    fn manager_scope(company_id: i32, manager_id: i32) -> CallerScope {
        CallerScope {
            company_id,
            manager_id: Some(manager_id),
        }
    }

    #[test]
    fn test_rejects_non_select() {
        let guard = QueryGuard::default();
        let err = guard
            .finalize("SHOW TABLES", &company_scope(1))
            .unwrap_err();
        assert_eq!(err, GuardError::ForbiddenOperation);
    }

    #[test]
    fn test_rejects_empty_candidate() {
        let guard = QueryGuard::default();
        assert_eq!(
            guard.finalize("", &company_scope(1)).unwrap_err(),
            GuardError::ForbiddenOperation
        );
    }

    #[test]
    fn test_rejects_denylisted_keyword_anywhere() {
        let guard = QueryGuard::default();
        let err = guard
            .finalize(
                "SELECT 1 FROM tickets; DROP TABLE tickets",
                &company_scope(1),
            )
            .unwrap_err();
        assert_eq!(err, GuardError::InjectionSuspected("drop".to_string()));
    }

    #[test]
    fn test_denylist_is_case_insensitive() {
        let guard = QueryGuard::default();
        let err = guard
            .finalize("SELECT 1 FROM tickets WHERE Delete = 1", &company_scope(1))
            .unwrap_err();
        assert_eq!(err, GuardError::InjectionSuspected("delete".to_string()));
    }

    #[test]
    fn test_denylist_does_not_match_inside_identifiers() {
        let guard = QueryGuard::default();
        // "updated_at" contains "update" but is a single token.
        let sql = guard
            .finalize(
                "SELECT updated_at FROM tickets WHERE tickets.company_id = 1",
                &company_scope(1),
            )
            .unwrap();
        assert!(sql.contains("updated_at"));
    }

    #[test]
    fn test_denylist_ignores_string_literals() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT segment FROM tickets WHERE subject = 'please delete my account' \
                 AND tickets.company_id = 1",
                &company_scope(1),
            )
            .unwrap();
        assert!(sql.contains("please delete my account"));
    }

    #[test]
    fn test_strips_code_fences() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "```sql\nSELECT id FROM tickets WHERE tickets.company_id = 1\n```",
                &company_scope(1),
            )
            .unwrap();
        assert!(sql.starts_with("SELECT"));
        assert!(!sql.contains("```"));
    }

    #[test]
    fn test_placeholders_are_substituted() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT id FROM tickets WHERE tickets.company_id = {company_id}",
                &company_scope(42),
            )
            .unwrap();
        assert_eq!(sql, "SELECT id FROM tickets WHERE tickets.company_id = 42");
    }

    #[test]
    fn test_company_filter_appended_without_where() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize("SELECT id FROM tickets", &company_scope(7))
            .unwrap();
        assert_eq!(sql, "SELECT id FROM tickets WHERE tickets.company_id = 7");
    }

    #[test]
    fn test_company_filter_conjoined_into_existing_where() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT id FROM tickets WHERE segment = 'VIP'",
                &company_scope(7),
            )
            .unwrap();
        assert_eq!(
            sql,
            "SELECT id FROM tickets WHERE tickets.company_id = 7 AND segment = 'VIP'"
        );
    }

    #[test]
    fn test_company_filter_inserted_before_group_by() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT segment, COUNT(*) FROM tickets GROUP BY segment",
                &company_scope(7),
            )
            .unwrap();
        assert_eq!(
            sql,
            "SELECT segment, COUNT(*) FROM tickets WHERE tickets.company_id = 7 GROUP BY segment"
        );
    }

    #[test]
    fn test_company_filter_respects_table_alias() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize("SELECT t.id FROM tickets t", &company_scope(7))
            .unwrap();
        assert_eq!(sql, "SELECT t.id FROM tickets t WHERE t.company_id = 7");
    }

    #[test]
    fn test_company_filter_respects_as_alias() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize("SELECT t.id FROM tickets AS t", &company_scope(7))
            .unwrap();
        assert_eq!(sql, "SELECT t.id FROM tickets AS t WHERE t.company_id = 7");
    }

    #[test]
    fn test_company_filter_not_duplicated() {
        let guard = QueryGuard::default();
        let original = "SELECT id FROM tickets WHERE tickets.company_id = 7";
        let sql = guard.finalize(original, &company_scope(7)).unwrap();
        assert_eq!(sql, original);
        // Running the pass twice must also be a no-op.
        let again = guard.finalize(&sql, &company_scope(7)).unwrap();
        assert_eq!(again, sql);
    }

    #[test]
    fn test_company_filter_detection_is_case_insensitive() {
        let guard = QueryGuard::default();
        let original = "SELECT id FROM tickets WHERE tickets.COMPANY_ID = 7";
        let sql = guard.finalize(original, &company_scope(7)).unwrap();
        assert_eq!(sql, original);
    }

    #[test]
    fn test_subquery_where_does_not_count_as_top_level() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT id FROM tickets JOIN (SELECT ticket_id FROM ticket_analysis WHERE priority > 3) x ON x.ticket_id = tickets.id",
                &company_scope(7),
            )
            .unwrap();
        assert!(
            sql.ends_with("WHERE tickets.company_id = 7"),
            "filter must attach to the outer query, got: {sql}"
        );
    }

    #[test]
    fn test_manager_scope_joins_assignments_when_missing() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize("SELECT id FROM tickets", &manager_scope(7, 3))
            .unwrap();
        assert!(
            sql.contains("JOIN assignments ON tickets.id = assignments.ticket_id"),
            "got: {sql}"
        );
        assert!(sql.contains("assignments.manager_id = 3"));
        assert!(sql.contains("tickets.company_id = 7"));
    }

    #[test]
    fn test_manager_scope_with_aliased_tickets() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize("SELECT t.id FROM tickets t", &manager_scope(7, 3))
            .unwrap();
        assert!(
            sql.contains("FROM tickets t JOIN assignments ON t.id = assignments.ticket_id"),
            "got: {sql}"
        );
    }

    #[test]
    fn test_manager_scope_reuses_existing_assignments_alias() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT t.id FROM tickets t JOIN assignments a ON a.ticket_id = t.id",
                &manager_scope(7, 3),
            )
            .unwrap();
        assert!(sql.contains("a.manager_id = 3"), "got: {sql}");
        assert_eq!(sql.matches("JOIN assignments").count(), 1);
    }

    #[test]
    fn test_manager_scope_on_ticket_analysis() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT ticket_type, COUNT(*) FROM ticket_analysis GROUP BY ticket_type",
                &manager_scope(7, 3),
            )
            .unwrap();
        assert!(
            sql.contains("JOIN assignments ON ticket_analysis.id = assignments.ticket_id"),
            "got: {sql}"
        );
        assert!(sql.contains("assignments.manager_id = 3"));
    }

    #[test]
    fn test_manager_scope_on_assignments_directly() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT COUNT(*) FROM assignments",
                &manager_scope(7, 3),
            )
            .unwrap();
        assert!(sql.contains("assignments.manager_id = 3"), "got: {sql}");
        assert_eq!(sql.matches("JOIN").count(), 0);
    }

    #[test]
    fn test_manager_scope_skipped_when_already_filtered() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT t.id FROM tickets t JOIN assignments a ON a.ticket_id = t.id \
                 WHERE a.manager_id = {manager_id}",
                &manager_scope(7, 3),
            )
            .unwrap();
        assert_eq!(sql.matches("manager_id").count(), 1);
    }

    #[test]
    fn test_company_only_scope_gets_no_manager_filter() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize("SELECT id FROM tickets", &company_scope(7))
            .unwrap();
        assert!(!sql.contains("manager_id"));
    }

    #[test]
    fn test_manager_scope_ignores_non_ticket_tables() {
        let guard = QueryGuard::default();
        let sql = guard
            .finalize(
                "SELECT office FROM business_units WHERE business_units.company_id = {company_id}",
                &manager_scope(7, 3),
            )
            .unwrap();
        assert!(!sql.contains("manager_id"));
        assert!(!sql.contains("JOIN"));
    }
}
