use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{Caller, DrivebookAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::school::SchoolDirectory;
use crate::sql::{self, Command};

pub struct DrivebookHandler {
    schools: Arc<SchoolDirectory>,
    query_parser: Arc<DrivebookQueryParser>,
}

fn minute_to_hhmm(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

impl DrivebookHandler {
    pub fn new(schools: Arc<SchoolDirectory>) -> Self {
        Self {
            schools,
            query_parser: Arc::new(DrivebookQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.schools.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("school error: {e}"),
            )))
        })
    }

    /// The startup `user` parameter carries the resolved caller identity
    /// (`role:ulid`), issued by the identity collaborator.
    fn resolve_caller<C: ClientInfo>(&self, client: &C) -> PgWireResult<Caller> {
        let user = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default();
        Caller::parse(&user).ok_or_else(|| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("bad caller identity {user:?} (expected role:ulid)"),
            )))
        })
    }

    async fn execute(
        &self,
        engine: &Engine,
        caller: &Caller,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, caller, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        caller: &Caller,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::RegisterInstructor { id, name } => {
                engine.register_instructor(caller, id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RegisterVehicle { id, name } => {
                engine.register_vehicle(caller, id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DefineCategory { id, name, session_minutes, exam_form_id } => {
                engine
                    .define_category(caller, id, name, session_minutes, exam_form_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DefineExamForm { id, max_points } => {
                engine.define_exam_form(caller, id, max_points).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::AddExamItems { form_id, items } => {
                let count = items.len();
                engine.add_exam_items(caller, form_id, items).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::OpenFile { id, student_id, instructor_id, vehicle_id, category_id } => {
                engine
                    .open_file(
                        caller,
                        FileRecord { id, student_id, instructor_id, vehicle_id, category_id },
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertAvailability { id, instructor_id, date, start, end } => {
                engine
                    .add_availability(caller, id, instructor_id, date, &start, &end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateAvailability { id, date, start, end } => {
                engine
                    .update_availability(caller, id, date, &start, &end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteAvailability { id } => {
                engine.remove_availability(caller, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectAvailability { instructor_id } => {
                let intervals = engine
                    .list_future_availability(instructor_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = intervals
                    .into_iter()
                    .map(|i| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&i.id.to_string())?;
                        encoder.encode_field(&i.instructor_id.to_string())?;
                        encoder.encode_field(&i.date.to_string())?;
                        encoder.encode_field(&minute_to_hhmm(i.slot.start))?;
                        encoder.encode_field(&minute_to_hhmm(i.slot.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectSlots { file_id, date } => {
                let (session_minutes, slots) =
                    engine.list_open_slots(file_id, date).await.map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&i64::from(session_minutes))?;
                        encoder.encode_field(&minute_to_hhmm(slot.start))?;
                        encoder.encode_field(&minute_to_hhmm(slot.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::InsertAppointment { id, file_id, date, start, end } => {
                engine
                    .book_appointment(caller, id, file_id, date, &start, &end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateAppointment { id, date, start, end } => {
                engine
                    .reschedule_appointment(caller, id, date, &start, &end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteAppointment { id } => {
                engine.cancel_appointment(caller, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectAppointments { file_id } => {
                let appointments = engine.list_appointments(file_id).map_err(engine_err)?;
                let schema = Arc::new(appointments_schema());
                let rows: Vec<PgWireResult<_>> = appointments
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&a.file_id.to_string())?;
                        encoder.encode_field(&a.instructor_id.to_string())?;
                        encoder.encode_field(&a.vehicle_id.map(|v| v.to_string()))?;
                        encoder.encode_field(&a.date.to_string())?;
                        encoder.encode_field(&minute_to_hhmm(a.slot.start))?;
                        encoder.encode_field(&minute_to_hhmm(a.slot.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::StartForm { id, appointment_id } => {
                let view = engine.start_form(caller, id, appointment_id).await.map_err(engine_err)?;
                Ok(vec![form_response(vec![view])?])
            }
            Command::MarkMistake { form_id, item_id, delta } => {
                let count = engine
                    .mark_mistake(caller, form_id, item_id, delta)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(mistake_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&form_id.to_string())?;
                encoder.encode_field(&item_id.to_string())?;
                encoder.encode_field(&i64::from(count))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::FinalizeForm { form_id } => {
                let view = engine.finalize_form(caller, form_id).await.map_err(engine_err)?;
                Ok(vec![form_response(vec![view])?])
            }
            Command::SelectForm { form_id } => {
                let view = engine.get_form(caller, form_id).await.map_err(engine_err)?;
                Ok(vec![form_response(vec![view])?])
            }
            Command::SelectFormsByStudent { student_id, from, to, page, per_page } => {
                let views = engine
                    .list_forms_by_student(caller, student_id, from, to, page, per_page)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![form_response(views)?])
            }
            Command::SelectTrend { file_id } => {
                let trend = engine.mistake_trend(caller, file_id).await.map_err(engine_err)?;
                let schema = Arc::new(trend_schema());
                let rows: Vec<PgWireResult<_>> = trend
                    .into_iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&p.date.to_string())?;
                        encoder.encode_field(&i64::from(p.total_points))?;
                        encoder.encode_field(&p.top_item.map(|i| i.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectHeatmap { file_id } => {
                let cells = engine.mistake_heatmap(caller, file_id).await.map_err(engine_err)?;
                let schema = Arc::new(heatmap_schema());
                let rows: Vec<PgWireResult<_>> = cells
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&(c.session_index as i64))?;
                        encoder.encode_field(&c.item_id.to_string())?;
                        encoder.encode_field(&i64::from(c.count))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAverage { file_id, window } => {
                let points = engine
                    .score_average(caller, file_id, window)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(average_schema());
                let rows: Vec<PgWireResult<_>> = points
                    .into_iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&(p.session_index as i64))?;
                        encoder.encode_field(&p.date.to_string())?;
                        encoder.encode_field(&p.average)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn form_response(views: Vec<FormView>) -> PgWireResult<Response> {
    let schema = Arc::new(session_form_schema());
    let rows: Vec<PgWireResult<_>> = views
        .into_iter()
        .map(|v| {
            let mistakes: serde_json::Map<String, serde_json::Value> = v
                .mistakes
                .iter()
                .map(|(id, count)| (id.to_string(), serde_json::Value::from(*count)))
                .collect();
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&v.id.to_string())?;
            encoder.encode_field(&v.appointment_id.to_string())?;
            encoder.encode_field(&v.student_id.to_string())?;
            encoder.encode_field(&v.date.to_string())?;
            encoder.encode_field(&v.locked)?;
            encoder.encode_field(&v.total_points.map(i64::from))?;
            encoder.encode_field(&v.result.map(|r| r.as_str()))?;
            encoder.encode_field(&serde_json::Value::Object(mistakes).to_string())?;
            encoder.encode_field(&v.created_at.to_rfc3339())?;
            encoder.encode_field(&v.finalized_at.map(|t| t.to_rfc3339()))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("instructor_id"),
        text_field("date"),
        text_field("start"),
        text_field("end"),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![int8_field("session_minutes"), text_field("start"), text_field("end")]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("file_id"),
        text_field("instructor_id"),
        text_field("vehicle_id"),
        text_field("date"),
        text_field("start"),
        text_field("end"),
    ]
}

fn session_form_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("appointment_id"),
        text_field("student_id"),
        text_field("date"),
        FieldInfo::new("locked".into(), None, None, Type::BOOL, FieldFormat::Text),
        int8_field("total_points"),
        text_field("result"),
        text_field("mistakes"),
        text_field("created_at"),
        text_field("finalized_at"),
    ]
}

fn mistake_schema() -> Vec<FieldInfo> {
    vec![text_field("form_id"), text_field("item_id"), int8_field("count")]
}

fn trend_schema() -> Vec<FieldInfo> {
    vec![text_field("date"), int8_field("total_points"), text_field("top_item")]
}

fn heatmap_schema() -> Vec<FieldInfo> {
    vec![int8_field("session_index"), text_field("item_id"), int8_field("count")]
}

fn average_schema() -> Vec<FieldInfo> {
    vec![
        int8_field("session_index"),
        text_field("date"),
        FieldInfo::new("average".into(), None, None, Type::FLOAT8, FieldFormat::Text),
    ]
}

/// Result schema by statement text, for Describe on prepared statements.
fn schema_for_statement(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if upper.contains("SELECT") {
        if upper.contains("SLOTS") {
            return slots_schema();
        }
        if upper.contains("AVAILABILITY") {
            return availability_schema();
        }
        if upper.contains("APPOINTMENTS") {
            return appointments_schema();
        }
        if upper.contains("SESSION_FORMS") {
            return session_form_schema();
        }
        if upper.contains("MISTAKE_TREND") {
            return trend_schema();
        }
        if upper.contains("MISTAKE_HEATMAP") {
            return heatmap_schema();
        }
        if upper.contains("SCORE_AVERAGE") {
            return average_schema();
        }
    }
    if upper.contains("INSERT") && upper.contains("MISTAKES") {
        return mistake_schema();
    }
    if upper.contains("INSERT") && upper.contains("SESSION_FORMS") {
        return session_form_schema();
    }
    if upper.contains("UPDATE") && upper.contains("SESSION_FORMS") {
        return session_form_schema();
    }
    vec![]
}

#[async_trait]
impl SimpleQueryHandler for DrivebookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let caller = self.resolve_caller(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute(&engine, &caller, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct DrivebookQueryParser;

#[async_trait]
impl QueryParser for DrivebookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for DrivebookHandler {
    type Statement = String;
    type QueryParser = DrivebookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let caller = self.resolve_caller(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute(&engine, &caller, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_statement(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct DrivebookFactory {
    handler: Arc<DrivebookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<DrivebookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl DrivebookFactory {
    pub fn new(schools: Arc<SchoolDirectory>, password: String) -> Self {
        let auth_source = DrivebookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(DrivebookHandler::new(schools)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for DrivebookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    schools: Arc<SchoolDirectory>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = DrivebookFactory::new(schools, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE for each engine error, mirroring the error taxonomy: validation
/// → 22xxx, conflicts → 23xxx, sealed records → 55000, authorization →
/// 42501, not-found → P0002.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Forbidden => "42501",
        EngineError::BadTimeFormat(_) => "22007",
        EngineError::InvalidRange
        | EngineError::PastDate
        | EngineError::PastDateTime
        | EngineError::PastAppointment
        | EngineError::DurationMismatch { .. }
        | EngineError::NotAvailable
        | EngineError::NoInstructor(_)
        | EngineError::NoCategory(_)
        | EngineError::NoCategoryForm(_)
        | EngineError::UnknownItem(_)
        | EngineError::BadPagination => "22023",
        EngineError::Overlap(_)
        | EngineError::HasBookings(_)
        | EngineError::InstructorConflict(_)
        | EngineError::VehicleConflict(_) => "23P01",
        EngineError::Locked(_) => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
