// src/aggregate/sandbox.rs
//
// Read-only execution of untrusted SQL against the `data` table.
//
// Every action the engine plans is routed through a `QueryPolicy` for as long
// as the statement lives. Anything the policy does not explicitly allow is
// denied, and the connection is switched to `query_only` before the caller's
// text is compiled.

use std::collections::HashSet;
use std::panic::RefUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use lazy_static::lazy_static;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{is_authorization_denial, AggregateError, Result};
use super::models::QueryResult;

lazy_static! {
    /// Functions an aggregation query may call, lower-case.
    pub static ref ALLOWED_FUNCTIONS: HashSet<&'static str> = [
        // json
        "json_extract", "json_each", "json_array_length", "json_type",
        "json_insert", "json_replace", "json_set", "json_remove",
        "json_valid", "json_quote", "json_object", "json_array",
        // aggregates
        "min", "max", "avg", "sum", "total", "count", "group_concat",
        // strings
        "length", "lower", "upper", "substr", "trim", "ltrim", "rtrim", "replace",
        // numeric
        "abs", "round", "cast", "pow", "power", "sqrt", "log", "ln", "log10",
        "exp", "ceil", "ceiling", "floor",
        // nulls
        "coalesce", "ifnull", "nullif",
        // date and time
        "date", "time", "datetime", "strftime",
    ]
    .into_iter()
    .collect();
}

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Instructions between two deadline checks of the progress handler.
const PROGRESS_STEP: i32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

/// Decides, per planned engine action, whether a query may proceed.
pub trait QueryPolicy {
    fn evaluate(&self, action: &AuthAction<'_>) -> Verdict;
}

/// Default-deny policy: plain selects, column reads and whitelisted functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyPolicy;

impl QueryPolicy for ReadOnlyPolicy {
    fn evaluate(&self, action: &AuthAction<'_>) -> Verdict {
        match action {
            AuthAction::Select => Verdict::Allow,
            // SQLITE_READ carries the numeric code of SQLITE_MISMATCH (20);
            // reads of the loaded table's columns are what that allowance covers.
            AuthAction::Read { .. } => Verdict::Allow,
            AuthAction::Function { function_name } if is_allowed_function(function_name) => {
                Verdict::Allow
            }
            // CREATE and DROP touch the schema table before the statement-level
            // check, which is the one that gets refused and reported.
            AuthAction::Insert { table_name } | AuthAction::Delete { table_name }
                if is_schema_table(table_name) =>
            {
                Verdict::Allow
            }
            _ => Verdict::Deny,
        }
    }
}

pub fn is_allowed_function(name: &str) -> bool {
    ALLOWED_FUNCTIONS.contains(name.to_ascii_lowercase().as_str())
}

fn is_schema_table(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "sqlite_master" | "sqlite_schema" | "sqlite_temp_master" | "sqlite_temp_schema"
    )
}

#[derive(Debug, Clone, Copy)]
pub struct SandboxOptions {
    /// Wall-clock budget for compiling and stepping the statement.
    pub timeout: Duration,
    /// Run an `EXPLAIN QUERY PLAN` pass before the real statement so malformed
    /// SQL is reported as a syntax error.
    pub validate: bool,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_QUERY_TIMEOUT,
            validate: true,
        }
    }
}

/// Human-readable name of an engine action, used in denial messages.
pub fn describe_action(action: &AuthAction<'_>) -> String {
    match action {
        AuthAction::Function { function_name } => format!("call to function '{}'", function_name),
        AuthAction::CreateTable { table_name } | AuthAction::CreateTempTable { table_name } => {
            format!("CREATE TABLE {}", table_name)
        }
        AuthAction::DropTable { table_name } | AuthAction::DropTempTable { table_name } => {
            format!("DROP TABLE {}", table_name)
        }
        AuthAction::AlterTable { table_name, .. } => format!("ALTER TABLE {}", table_name),
        AuthAction::Insert { table_name } => format!("INSERT INTO {}", table_name),
        AuthAction::Update { table_name, column_name } => {
            format!("UPDATE {}.{}", table_name, column_name)
        }
        AuthAction::Delete { table_name } => format!("DELETE FROM {}", table_name),
        AuthAction::Pragma { pragma_name, .. } => format!("PRAGMA {}", pragma_name),
        AuthAction::Attach { filename } => format!("ATTACH '{}'", filename),
        AuthAction::Detach { database_name } => format!("DETACH {}", database_name),
        AuthAction::Transaction { operation } => format!("transaction control ({:?})", operation),
        AuthAction::Savepoint { savepoint_name, .. } => format!("SAVEPOINT {}", savepoint_name),
        AuthAction::Recursive => "recursive common table expression".to_string(),
        other => format!("{:?}", other),
    }
}

/// Keeps a policy installed as the connection authorizer and remembers the
/// first action it refused. Uninstalls on drop.
struct AuthorizerGuard<'c> {
    conn: &'c Connection,
    denied: Arc<Mutex<Option<String>>>,
}

impl<'c> AuthorizerGuard<'c> {
    fn install<P>(conn: &'c Connection, policy: P) -> Self
    where
        P: QueryPolicy + Send + RefUnwindSafe + 'static,
    {
        let denied = Arc::new(Mutex::new(None::<String>));
        let slot = Arc::clone(&denied);
        conn.authorizer(Some(move |ctx: AuthContext<'_>| {
            match policy.evaluate(&ctx.action) {
                Verdict::Allow => Authorization::Allow,
                Verdict::Deny => {
                    let description = describe_action(&ctx.action);
                    warn!(action = %description, "denied sql action");
                    if let Ok(mut first) = slot.lock() {
                        first.get_or_insert(description);
                    }
                    Authorization::Deny
                }
            }
        }));
        Self { conn, denied }
    }

    /// The first action the policy refused, if any.
    fn denied_action(&self) -> Option<String> {
        self.denied.lock().ok().and_then(|first| first.clone())
    }
}

impl Drop for AuthorizerGuard<'_> {
    fn drop(&mut self) {
        self.conn
            .authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
    }
}

/// Interrupts the running statement once the deadline passes.
struct DeadlineGuard<'c> {
    conn: &'c Connection,
}

impl<'c> DeadlineGuard<'c> {
    fn install(conn: &'c Connection, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        conn.progress_handler(PROGRESS_STEP, Some(move || Instant::now() >= deadline));
        Self { conn }
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

/// Executes `sql` under [`ReadOnlyPolicy`].
pub fn run_query(conn: &Connection, sql: &str, options: &SandboxOptions) -> Result<QueryResult> {
    run_query_with_policy(conn, sql, ReadOnlyPolicy, options)
}

pub fn run_query_with_policy<P>(
    conn: &Connection,
    sql: &str,
    policy: P,
    options: &SandboxOptions,
) -> Result<QueryResult>
where
    P: QueryPolicy + Send + RefUnwindSafe + 'static,
{
    let sql = single_statement(sql)?;

    conn.pragma_update(None, "query_only", true)
        .map_err(|e| AggregateError::Storage(e.to_string()))?;

    let auth = AuthorizerGuard::install(conn, policy);
    let _deadline = DeadlineGuard::install(conn, options.timeout);

    if options.validate {
        explain(conn, sql).map_err(|e| classify(e, &auth, options, Stage::Compile))?;
    }

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| classify(e, &auth, options, Stage::Compile))?;
    // Statements the authorizer never sees, such as REINDEX on a table
    // without indexes, are refused here.
    if !stmt.readonly() || !is_query_statement(sql) {
        return Err(AggregateError::DeniedOperation {
            action: leading_keyword(sql),
        });
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let arity = columns.len();

    let mut rows = stmt
        .query([])
        .map_err(|e| classify(e, &auth, options, Stage::Execute))?;
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| classify(e, &auth, options, Stage::Execute))?
    {
        let mut values = Vec::with_capacity(arity);
        for idx in 0..arity {
            let value = row
                .get_ref(idx)
                .map_err(|e| classify(e, &auth, options, Stage::Execute))?;
            values.push(to_json(value));
        }
        out.push(values);
    }
    debug!(rows = out.len(), columns = arity, "query finished");

    Ok(QueryResult { columns, rows: out })
}

/// Compiles `sql` under the read-only policy without running it.
pub fn validate_sql(conn: &Connection, sql: &str) -> Result<()> {
    let sql = single_statement(sql)?;
    let options = SandboxOptions::default();
    let auth = AuthorizerGuard::install(conn, ReadOnlyPolicy);
    explain(conn, sql).map_err(|e| classify(e, &auth, &options, Stage::Compile))
}

fn explain(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {}", sql))?;
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Compile,
    Execute,
}

fn classify(
    err: rusqlite::Error,
    auth: &AuthorizerGuard<'_>,
    options: &SandboxOptions,
    stage: Stage,
) -> AggregateError {
    // Refused functions surface as a plain SQLITE_ERROR, so the recorded
    // denial is checked before the error code.
    if let Some(action) = auth.denied_action() {
        return AggregateError::DeniedOperation { action };
    }
    if is_authorization_denial(&err) {
        return AggregateError::DeniedOperation {
            action: "unknown action".to_string(),
        };
    }
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        if e.code == ErrorCode::OperationInterrupted {
            return AggregateError::Runtime(format!(
                "query exceeded the {} ms execution limit",
                options.timeout.as_millis()
            ));
        }
    }
    match stage {
        Stage::Compile => AggregateError::Syntax(err.to_string()),
        Stage::Execute => AggregateError::Runtime(err.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}

fn leading_keyword(sql: &str) -> String {
    let rest = skip_trivia(sql);
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    rest[..end].to_ascii_uppercase()
}

fn is_query_statement(sql: &str) -> bool {
    matches!(leading_keyword(sql).as_str(), "SELECT" | "WITH" | "VALUES")
}

/// Skips whitespace, separators and comments.
fn skip_trivia(mut rest: &str) -> &str {
    loop {
        rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
        if let Some(line) = rest.strip_prefix("--") {
            rest = line.find('\n').map_or("", |end| &line[end..]);
        } else if let Some(block) = rest.strip_prefix("/*") {
            rest = block.find("*/").map_or("", |end| &block[end + 2..]);
        } else {
            return rest;
        }
    }
}

fn only_trivia(rest: &str) -> bool {
    skip_trivia(rest).is_empty()
}

/// Trims the statement and rejects input holding more than one statement.
/// Quotes, bracketed identifiers and comments are skipped while scanning for
/// separators; a separator followed only by comments ends the statement.
fn single_statement(sql: &str) -> Result<&str> {
    let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if only_trivia(trimmed) {
        return Err(AggregateError::Syntax("query is empty".into()));
    }

    let bytes = trimmed.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote is an escaped quote
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b';' if only_trivia(&trimmed[i + 1..]) => return Ok(trimmed[..i].trim_end()),
            b';' => {
                return Err(AggregateError::Syntax(
                    "only a single SQL statement is allowed".into(),
                ))
            }
            _ => {}
        }
        i += 1;
    }
    Ok(trimmed)
}
