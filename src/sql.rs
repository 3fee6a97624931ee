use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectNamePart,
    SelectItem, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{Ms, Weekday};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProvider {
        id: Ulid,
        name: Option<String>,
    },
    UpdateProvider {
        id: Ulid,
        name: Option<String>,
    },
    DeleteProvider {
        id: Ulid,
    },
    InsertScheduleRule {
        id: Ulid,
        provider_id: Ulid,
        weekday: Weekday,
        start_sec: Option<u32>,
        end_sec: Option<u32>,
    },
    UpdateScheduleRule {
        id: Ulid,
        start_sec: Option<u32>,
        end_sec: Option<u32>,
    },
    DeleteScheduleRule {
        id: Ulid,
    },
    InsertModifier {
        id: Ulid,
        provider_id: Ulid,
        start: Ms,
        end: Ms,
        exclusive: bool,
    },
    DeleteModifier {
        id: Ulid,
    },
    ToggleModifier {
        provider_id: Ulid,
        at: Ms,
        slot_ms: Option<Ms>,
    },
    InsertAppointmentType {
        id: Ulid,
        provider_id: Ulid,
        name: String,
        duration_min: u32,
        price_cents: Option<i64>,
        description: Option<String>,
    },
    DeleteAppointmentType {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        provider_id: Ulid,
        appointment_type_id: Ulid,
        customer_id: Ulid,
        start: Ms,
        end: Ms,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectProviders,
    SelectSchedule {
        provider_id: Ulid,
    },
    SelectModifiers {
        provider_id: Ulid,
        since: Option<Ms>,
    },
    SelectAppointmentTypes {
        provider_id: Ulid,
    },
    SelectAppointments {
        provider_id: Ulid,
    },
    SelectAvailability {
        provider_id: Ulid,
        day: NaiveDate,
    },
    SelectSlots {
        provider_id: Ulid,
        day: NaiveDate,
        appointment_type_id: Ulid,
    },
    SelectCalendar {
        provider_id: Ulid,
        from_day: NaiveDate,
        to_day: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "providers" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("providers", 1, 0));
            }
            let id = parse_ulid_expr(&values[0])?;
            let name = if values.len() >= 2 {
                parse_string_or_null(&values[1])?
            } else {
                None
            };
            Ok(Command::InsertProvider { id, name })
        }
        "schedule" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("schedule", 3, values.len()));
            }
            let start_sec = if values.len() >= 4 {
                parse_u32_or_null(&values[3])?
            } else {
                None
            };
            let end_sec = if values.len() >= 5 {
                parse_u32_or_null(&values[4])?
            } else {
                None
            };
            Ok(Command::InsertScheduleRule {
                id: parse_ulid_expr(&values[0])?,
                provider_id: parse_ulid_expr(&values[1])?,
                weekday: parse_weekday_expr(&values[2])?,
                start_sec,
                end_sec,
            })
        }
        "modifiers" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("modifiers", 5, values.len()));
            }
            Ok(Command::InsertModifier {
                id: parse_ulid_expr(&values[0])?,
                provider_id: parse_ulid_expr(&values[1])?,
                start: parse_i64_expr(&values[2])?,
                end: parse_i64_expr(&values[3])?,
                exclusive: parse_bool_expr(&values[4])?,
            })
        }
        "appointment_types" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("appointment_types", 4, values.len()));
            }
            let price_cents = if values.len() >= 5 {
                parse_i64_or_null(&values[4])?
            } else {
                None
            };
            let description = if values.len() >= 6 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            Ok(Command::InsertAppointmentType {
                id: parse_ulid_expr(&values[0])?,
                provider_id: parse_ulid_expr(&values[1])?,
                name: parse_string_expr(&values[2])?,
                duration_min: parse_u32_expr(&values[3])?,
                price_cents,
                description,
            })
        }
        "appointments" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("appointments", 6, values.len()));
            }
            Ok(Command::InsertAppointment {
                id: parse_ulid_expr(&values[0])?,
                provider_id: parse_ulid_expr(&values[1])?,
                appointment_type_id: parse_ulid_expr(&values[2])?,
                customer_id: parse_ulid_expr(&values[3])?,
                start: parse_i64_expr(&values[4])?,
                end: parse_i64_expr(&values[5])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "providers" => Ok(Command::DeleteProvider { id }),
        "schedule" => Ok(Command::DeleteScheduleRule { id }),
        "modifiers" => Ok(Command::DeleteModifier { id }),
        "appointment_types" => Ok(Command::DeleteAppointmentType { id }),
        "appointments" => Ok(Command::DeleteAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "providers" => {
            let name_expr = assignment_value(assignments, "name")
                .ok_or(SqlError::MissingFilter("name"))?;
            Ok(Command::UpdateProvider {
                id,
                name: parse_string_or_null(name_expr)?,
            })
        }
        "schedule" => {
            let start_sec = match assignment_value(assignments, "start_sec") {
                Some(expr) => parse_u32_or_null(expr)?,
                None => None,
            };
            let end_sec = match assignment_value(assignments, "end_sec") {
                Some(expr) => parse_u32_or_null(expr)?,
                None => None,
            };
            Ok(Command::UpdateScheduleRule { id, start_sec, end_sec })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    // Function-style calls have no FROM clause: SELECT toggle_modifier(...).
    if select.from.is_empty() {
        return parse_select_function(&select.projection);
    }

    let table = table_factor_name(&select.from[0].relation)?;
    let mut filters = FilterSet::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters);
    }

    match table.as_str() {
        "providers" => Ok(Command::SelectProviders),
        "schedule" => Ok(Command::SelectSchedule {
            provider_id: filters.require_ulid("provider_id")?,
        }),
        "modifiers" => Ok(Command::SelectModifiers {
            provider_id: filters.require_ulid("provider_id")?,
            since: filters.optional_i64_ge("end")?,
        }),
        "appointment_types" => Ok(Command::SelectAppointmentTypes {
            provider_id: filters.require_ulid("provider_id")?,
        }),
        "appointments" => Ok(Command::SelectAppointments {
            provider_id: filters.require_ulid("provider_id")?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            provider_id: filters.require_ulid("provider_id")?,
            day: filters.require_day_eq("day")?,
        }),
        "slots" => Ok(Command::SelectSlots {
            provider_id: filters.require_ulid("provider_id")?,
            day: filters.require_day_eq("day")?,
            appointment_type_id: filters.require_ulid("appointment_type_id")?,
        }),
        "calendar" => Ok(Command::SelectCalendar {
            provider_id: filters.require_ulid("provider_id")?,
            from_day: filters.require_day_ge("day")?,
            to_day: filters.require_day_le("day")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select_function(projection: &[SelectItem]) -> Result<Command, SqlError> {
    let expr = match projection.first() {
        Some(SelectItem::UnnamedExpr(expr)) => expr,
        _ => return Err(SqlError::Unsupported("SELECT without FROM".into())),
    };
    let func = match expr {
        Expr::Function(func) => func,
        _ => return Err(SqlError::Unsupported("SELECT without FROM".into())),
    };
    let name = object_name_last(&func.name)
        .ok_or_else(|| SqlError::Parse("empty function name".into()))?;
    if name != "toggle_modifier" {
        return Err(SqlError::Unsupported(format!("function {name}")));
    }

    let args = function_args(func)?;
    if args.len() < 2 {
        return Err(SqlError::WrongArity("toggle_modifier", 2, args.len()));
    }
    let slot_ms = if args.len() >= 3 {
        Some(parse_i64_expr(args[2])?)
    } else {
        None
    };
    Ok(Command::ToggleModifier {
        provider_id: parse_ulid_expr(args[0])?,
        at: parse_i64_expr(args[1])?,
        slot_ms,
    })
}

// ── WHERE-clause filters ──────────────────────────────────────────

#[derive(Default)]
struct FilterSet<'a> {
    eq: Vec<(String, &'a Expr)>,
    ge: Vec<(String, &'a Expr)>,
    le: Vec<(String, &'a Expr)>,
}

/// Walk an AND tree collecting column comparisons. Anything else in the
/// WHERE clause is ignored, matching the rest of this deliberately small
/// dialect.
fn collect_filters<'a>(expr: &'a Expr, out: &mut FilterSet<'a>) {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                collect_filters(left, out);
                collect_filters(right, out);
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    out.eq.push((col, right));
                }
            }
            ast::BinaryOperator::GtEq => {
                if let Some(col) = expr_column_name(left) {
                    out.ge.push((col, right));
                }
            }
            ast::BinaryOperator::LtEq => {
                if let Some(col) = expr_column_name(left) {
                    out.le.push((col, right));
                }
            }
            _ => {}
        }
    }
}

impl<'a> FilterSet<'a> {
    fn find(list: &[(String, &'a Expr)], col: &str) -> Option<&'a Expr> {
        list.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    fn require_ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        let expr = Self::find(&self.eq, col).ok_or(SqlError::MissingFilter(col))?;
        parse_ulid_expr(expr)
    }

    fn require_day_eq(&self, col: &'static str) -> Result<NaiveDate, SqlError> {
        let expr = Self::find(&self.eq, col).ok_or(SqlError::MissingFilter(col))?;
        parse_day_expr(expr)
    }

    fn require_day_ge(&self, col: &'static str) -> Result<NaiveDate, SqlError> {
        let expr = Self::find(&self.ge, col).ok_or(SqlError::MissingFilter(col))?;
        parse_day_expr(expr)
    }

    fn require_day_le(&self, col: &'static str) -> Result<NaiveDate, SqlError> {
        let expr = Self::find(&self.le, col).ok_or(SqlError::MissingFilter(col))?;
        parse_day_expr(expr)
    }

    fn optional_i64_ge(&self, col: &'static str) -> Result<Option<Ms>, SqlError> {
        match Self::find(&self.ge, col) {
            Some(expr) => Ok(Some(parse_i64_expr(expr)?)),
            None => Ok(None),
        }
    }
}

// ── AST helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn assignment_value<'a>(assignments: &'a [ast::Assignment], col: &str) -> Option<&'a Expr> {
    assignments.iter().find_map(|a| match &a.target {
        ast::AssignmentTarget::ColumnName(name)
            if object_name_last(name).as_deref() == Some(col) =>
        {
            Some(&a.value)
        }
        _ => None,
    })
}

fn function_args(func: &ast::Function) -> Result<Vec<&Expr>, SqlError> {
    let list = match &func.args {
        FunctionArguments::List(list) => list,
        _ => return Err(SqlError::Parse("expected function argument list".into())),
    };
    list.args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Ok(expr),
            other => Err(SqlError::Parse(format!("unsupported argument {other}"))),
        })
        .collect()
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_i64_expr(expr)?)),
    }
}

fn parse_u32_expr(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_u32_expr(expr)?)),
    }
}

fn parse_weekday_expr(expr: &Expr) -> Result<Weekday, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v)
        .ok()
        .and_then(Weekday::from_index)
        .ok_or_else(|| SqlError::Parse(format!("weekday must be 0..=6, got {v}")))
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_string_expr(expr)?)),
    }
}

fn parse_bool_expr(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Calendar days cross the wire as 'YYYY-MM-DD' strings.
fn parse_day_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad day '{s}': {e}")))
}

// ── Errors ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
