use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::ExamItem;

/// Parsed command from SQL input. Time-of-day values stay raw strings —
/// the engine owns minute-granularity parsing and its error taxonomy.
#[derive(Debug, PartialEq)]
pub enum Command {
    RegisterInstructor {
        id: Ulid,
        name: Option<String>,
    },
    RegisterVehicle {
        id: Ulid,
        name: Option<String>,
    },
    DefineCategory {
        id: Ulid,
        name: Option<String>,
        session_minutes: u16,
        exam_form_id: Option<Ulid>,
    },
    DefineExamForm {
        id: Ulid,
        max_points: u32,
    },
    AddExamItems {
        form_id: Ulid,
        items: Vec<ExamItem>,
    },
    OpenFile {
        id: Ulid,
        student_id: Ulid,
        instructor_id: Option<Ulid>,
        vehicle_id: Option<Ulid>,
        category_id: Option<Ulid>,
    },
    InsertAvailability {
        id: Ulid,
        instructor_id: Ulid,
        date: NaiveDate,
        start: String,
        end: String,
    },
    UpdateAvailability {
        id: Ulid,
        date: NaiveDate,
        start: String,
        end: String,
    },
    DeleteAvailability {
        id: Ulid,
    },
    SelectAvailability {
        instructor_id: Ulid,
    },
    SelectSlots {
        file_id: Ulid,
        date: NaiveDate,
    },
    InsertAppointment {
        id: Ulid,
        file_id: Ulid,
        date: NaiveDate,
        start: String,
        end: String,
    },
    UpdateAppointment {
        id: Ulid,
        date: NaiveDate,
        start: String,
        end: String,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectAppointments {
        file_id: Ulid,
    },
    StartForm {
        id: Ulid,
        appointment_id: Ulid,
    },
    MarkMistake {
        form_id: Ulid,
        item_id: Ulid,
        delta: i32,
    },
    FinalizeForm {
        form_id: Ulid,
    },
    SelectForm {
        form_id: Ulid,
    },
    SelectFormsByStudent {
        student_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        page: u32,
        per_page: u32,
    },
    SelectTrend {
        file_id: Ulid,
    },
    SelectHeatmap {
        file_id: Ulid,
    },
    SelectAverage {
        file_id: Ulid,
        window: u32,
    },
}

/// Default page size for session-form listings when the query names none.
pub const DEFAULT_PER_PAGE: u32 = 50;

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "instructors" | "vehicles" => {
            let values = extract_insert_values(insert)?;
            if values.is_empty() {
                return Err(SqlError::WrongArity("instructors/vehicles", 1, 0));
            }
            let id = parse_ulid(&values[0])?;
            let name = if values.len() >= 2 {
                parse_string_or_null(&values[1])?
            } else {
                None
            };
            if table == "instructors" {
                Ok(Command::RegisterInstructor { id, name })
            } else {
                Ok(Command::RegisterVehicle { id, name })
            }
        }
        "categories" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 3 {
                return Err(SqlError::WrongArity("categories", 3, values.len()));
            }
            let session_minutes = parse_u32(&values[2])?;
            let session_minutes = u16::try_from(session_minutes)
                .map_err(|_| SqlError::Parse(format!("{session_minutes} out of u16 range")))?;
            Ok(Command::DefineCategory {
                id: parse_ulid(&values[0])?,
                name: parse_string_or_null(&values[1])?,
                session_minutes,
                exam_form_id: if values.len() >= 4 {
                    parse_ulid_or_null(&values[3])?
                } else {
                    None
                },
            })
        }
        "exam_forms" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("exam_forms", 2, values.len()));
            }
            Ok(Command::DefineExamForm {
                id: parse_ulid(&values[0])?,
                max_points: parse_u32(&values[1])?,
            })
        }
        "exam_items" => {
            // (id, form_id, description, penalty_points, order_index), any
            // number of rows; all rows must target the same form.
            let rows = extract_all_insert_rows(insert)?;
            let mut form_id: Option<Ulid> = None;
            let mut items = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 5 {
                    return Err(SqlError::WrongArity("exam_items row", 5, row.len()));
                }
                let row_form = parse_ulid(&row[1])
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                match form_id {
                    None => form_id = Some(row_form),
                    Some(fid) if fid != row_form => {
                        return Err(SqlError::Parse("exam_items rows span multiple forms".into()));
                    }
                    Some(_) => {}
                }
                items.push(ExamItem {
                    id: parse_ulid(&row[0]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    description: parse_string(&row[2])
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    penalty_points: parse_u32(&row[3])
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    order_index: parse_u32(&row[4])
                        .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                });
            }
            let form_id = form_id.ok_or(SqlError::Parse("empty VALUES".into()))?;
            Ok(Command::AddExamItems { form_id, items })
        }
        "files" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("files", 2, values.len()));
            }
            Ok(Command::OpenFile {
                id: parse_ulid(&values[0])?,
                student_id: parse_ulid(&values[1])?,
                instructor_id: if values.len() >= 3 {
                    parse_ulid_or_null(&values[2])?
                } else {
                    None
                },
                vehicle_id: if values.len() >= 4 {
                    parse_ulid_or_null(&values[3])?
                } else {
                    None
                },
                category_id: if values.len() >= 5 {
                    parse_ulid_or_null(&values[4])?
                } else {
                    None
                },
            })
        }
        "availability" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 5 {
                return Err(SqlError::WrongArity("availability", 5, values.len()));
            }
            Ok(Command::InsertAvailability {
                id: parse_ulid(&values[0])?,
                instructor_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                start: parse_string(&values[3])?,
                end: parse_string(&values[4])?,
            })
        }
        "appointments" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 5 {
                return Err(SqlError::WrongArity("appointments", 5, values.len()));
            }
            Ok(Command::InsertAppointment {
                id: parse_ulid(&values[0])?,
                file_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                start: parse_string(&values[3])?,
                end: parse_string(&values[4])?,
            })
        }
        "session_forms" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("session_forms", 2, values.len()));
            }
            Ok(Command::StartForm {
                id: parse_ulid(&values[0])?,
                appointment_id: parse_ulid(&values[1])?,
            })
        }
        "mistakes" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 3 {
                return Err(SqlError::WrongArity("mistakes", 3, values.len()));
            }
            let delta = parse_i64(&values[2])?;
            let delta = i32::try_from(delta)
                .map_err(|_| SqlError::Parse(format!("{delta} out of i32 range")))?;
            Ok(Command::MarkMistake {
                form_id: parse_ulid(&values[0])?,
                item_id: parse_ulid(&values[1])?,
                delta,
            })
        }
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
        "availability" | "appointments" => {
            let (mut date, mut start, mut end) = (None, None, None);
            for a in assignments {
                match assignment_column(a).as_deref() {
                    Some("date") => date = Some(parse_date(&a.value)?),
                    Some("start") => start = Some(parse_string(&a.value)?),
                    Some("end") => end = Some(parse_string(&a.value)?),
                    Some(other) => {
                        return Err(SqlError::Unsupported(format!("SET {other}")));
                    }
                    None => return Err(SqlError::Parse("bad assignment target".into())),
                }
            }
            let date = date.ok_or(SqlError::MissingFilter("date"))?;
            let start = start.ok_or(SqlError::MissingFilter("start"))?;
            let end = end.ok_or(SqlError::MissingFilter("end"))?;
            if table == "availability" {
                Ok(Command::UpdateAvailability { id, date, start, end })
            } else {
                Ok(Command::UpdateAppointment { id, date, start, end })
            }
        }
        "session_forms" => {
            // Finalization is the only legal session_forms update.
            for a in assignments {
                match assignment_column(a).as_deref() {
                    Some("locked") => {
                        if !parse_bool(&a.value)? {
                            return Err(SqlError::Unsupported("SET locked = false".into()));
                        }
                    }
                    Some(other) => {
                        return Err(SqlError::Unsupported(format!("SET {other}")));
                    }
                    None => return Err(SqlError::Parse("bad assignment target".into())),
                }
            }
            Ok(Command::FinalizeForm { form_id: id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "availability" => Ok(Command::DeleteAvailability { id }),
        "appointments" => Ok(Command::DeleteAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_filters(&select.selection)?;

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            instructor_id: filters.ulid_eq("instructor_id")?,
        }),
        "slots" => Ok(Command::SelectSlots {
            file_id: filters.ulid_eq("file_id")?,
            date: filters.date_eq("date")?,
        }),
        "appointments" => Ok(Command::SelectAppointments {
            file_id: filters.ulid_eq("file_id")?,
        }),
        "session_forms" => {
            if let Some(form_id) = filters.ulid_eq_opt("id")? {
                return Ok(Command::SelectForm { form_id });
            }
            Ok(Command::SelectFormsByStudent {
                student_id: filters.ulid_eq("student_id")?,
                from: filters.date_gte_opt("date")?,
                to: filters.date_lte_opt("date")?,
                page: filters.u32_eq_opt("page")?.unwrap_or(1),
                per_page: filters.u32_eq_opt("per_page")?.unwrap_or(DEFAULT_PER_PAGE),
            })
        }
        "mistake_trend" => Ok(Command::SelectTrend {
            file_id: filters.ulid_eq("file_id")?,
        }),
        "mistake_heatmap" => Ok(Command::SelectHeatmap {
            file_id: filters.ulid_eq("file_id")?,
        }),
        "score_average" => Ok(Command::SelectAverage {
            file_id: filters.ulid_eq("file_id")?,
            window: filters.u32_eq_opt("window")?.unwrap_or(3),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clause filters ──────────────────────────────────────

/// Flat list of `column <op> value` conjuncts from a WHERE clause.
struct Filters {
    conjuncts: Vec<(String, ast::BinaryOperator, Expr)>,
}

fn collect_filters(selection: &Option<Expr>) -> Result<Filters, SqlError> {
    let mut conjuncts = Vec::new();
    if let Some(expr) = selection {
        collect_conjuncts(expr, &mut conjuncts)?;
    }
    Ok(Filters { conjuncts })
}

fn collect_conjuncts(
    expr: &Expr,
    out: &mut Vec<(String, ast::BinaryOperator, Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out)?;
            collect_conjuncts(right, out)?;
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left:?}")))?;
            out.push((col, op.clone(), (**right).clone()));
        }
        Expr::Nested(inner) => collect_conjuncts(inner, out)?,
        other => return Err(SqlError::Unsupported(format!("filter {other}"))),
    }
    Ok(())
}

impl Filters {
    fn find(&self, column: &str, op: &ast::BinaryOperator) -> Option<&Expr> {
        self.conjuncts
            .iter()
            .find(|(c, o, _)| c == column && o == op)
            .map(|(_, _, e)| e)
    }

    fn ulid_eq(&self, column: &'static str) -> Result<Ulid, SqlError> {
        self.ulid_eq_opt(column)?.ok_or(SqlError::MissingFilter(column))
    }

    fn ulid_eq_opt(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.find(column, &ast::BinaryOperator::Eq)
            .map(parse_ulid)
            .transpose()
    }

    fn date_eq(&self, column: &'static str) -> Result<NaiveDate, SqlError> {
        self.find(column, &ast::BinaryOperator::Eq)
            .map(parse_date)
            .transpose()?
            .ok_or(SqlError::MissingFilter(column))
    }

    fn date_gte_opt(&self, column: &str) -> Result<Option<NaiveDate>, SqlError> {
        self.find(column, &ast::BinaryOperator::GtEq)
            .map(parse_date)
            .transpose()
    }

    fn date_lte_opt(&self, column: &str) -> Result<Option<NaiveDate>, SqlError> {
        self.find(column, &ast::BinaryOperator::LtEq)
            .map(parse_date)
            .transpose()
    }

    fn u32_eq_opt(&self, column: &str) -> Result<Option<u32>, SqlError> {
        self.find(column, &ast::BinaryOperator::Eq)
            .map(parse_u32)
            .transpose()
    }
}

// ── Helpers ───────────────────────────────────────────────────

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

fn assignment_column(a: &ast::Assignment) -> Option<String> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let rows = extract_all_insert_rows(insert)?;
    Ok(rows.into_iter().next().unwrap_or_default())
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
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
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
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

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
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
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
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

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
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

// ── Errors ────────────────────────────────────────────────────

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
