use std::fmt::Debug;
use std::io;
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

use crate::auth::BookwireAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct BookwireHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<BookwireQueryParser>,
}

impl BookwireHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(BookwireQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertProvider { id, name } => {
                engine.create_provider(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateProvider { id, name } => {
                engine.rename_provider(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteProvider { id } => {
                engine.delete_provider(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertScheduleRule {
                id,
                provider_id,
                weekday,
                start_sec,
                end_sec,
            } => {
                engine
                    .add_rule(id, provider_id, weekday, start_sec, end_sec)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateScheduleRule {
                id,
                start_sec,
                end_sec,
            } => {
                engine
                    .update_rule(id, start_sec, end_sec)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteScheduleRule { id } => {
                engine.remove_rule(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertModifier {
                id,
                provider_id,
                start,
                end,
                exclusive,
            } => {
                engine
                    .add_modifier(id, provider_id, Span::new(start, end), exclusive)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteModifier { id } => {
                engine.remove_modifier(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::ToggleModifier {
                provider_id,
                at,
                slot_ms,
            } => {
                let outcome = engine
                    .toggle_modifier(provider_id, at, slot_ms)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(toggle_schema());
                let mut rows = Vec::new();
                for id in &outcome.deleted {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&"deleted")?;
                    encoder.encode_field(&id.to_string())?;
                    rows.push(Ok(encoder.take_row()));
                }
                if let Some(created) = &outcome.created {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&"created")?;
                    encoder.encode_field(&created.id.to_string())?;
                    rows.push(Ok(encoder.take_row()));
                }
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertAppointmentType {
                id,
                provider_id,
                name,
                duration_min,
                price_cents,
                description,
            } => {
                engine
                    .add_type(id, provider_id, name, description, duration_min, price_cents)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteAppointmentType { id } => {
                engine.remove_type(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAppointment {
                id,
                provider_id,
                appointment_type_id,
                customer_id,
                start,
                end,
            } => {
                engine
                    .book_appointment(
                        id,
                        provider_id,
                        appointment_type_id,
                        customer_id,
                        Span::new(start, end),
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteAppointment { id } => {
                engine.cancel_appointment(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectProviders => {
                let schema = Arc::new(providers_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_providers()
                    .into_iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&p.id.to_string())?;
                        encoder.encode_field(&p.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSchedule { provider_id } => {
                let rows_data = engine.schedule_rows(provider_id).await.map_err(engine_err)?;
                let schema = Arc::new(schedule_schema());
                let rows: Vec<PgWireResult<_>> = rows_data
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.map(|id| id.to_string()))?;
                        encoder.encode_field(&r.provider_id.to_string())?;
                        encoder.encode_field(&(r.weekday.index() as i16))?;
                        encoder.encode_field(&r.start_sec.map(|s| s as i32))?;
                        encoder.encode_field(&r.end_sec.map(|s| s as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectModifiers { provider_id, since } => {
                let modifiers = engine
                    .get_modifiers(provider_id, since)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(modifiers_schema());
                let rows: Vec<PgWireResult<_>> = modifiers
                    .into_iter()
                    .map(|m| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&m.id.to_string())?;
                        encoder.encode_field(&m.provider_id.to_string())?;
                        encoder.encode_field(&m.start)?;
                        encoder.encode_field(&m.end)?;
                        encoder.encode_field(&m.exclusive)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAppointmentTypes { provider_id } => {
                let types = engine.get_types(provider_id).await.map_err(engine_err)?;
                let schema = Arc::new(appointment_types_schema());
                let rows: Vec<PgWireResult<_>> = types
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t.id.to_string())?;
                        encoder.encode_field(&t.provider_id.to_string())?;
                        encoder.encode_field(&t.name)?;
                        encoder.encode_field(&t.description)?;
                        encoder.encode_field(&(t.duration_min as i32))?;
                        encoder.encode_field(&t.price_cents)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAppointments { provider_id } => {
                let appointments = engine
                    .get_appointments(provider_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(appointments_schema());
                let rows: Vec<PgWireResult<_>> = appointments
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&a.provider_id.to_string())?;
                        encoder.encode_field(&a.appointment_type_id.to_string())?;
                        encoder.encode_field(&a.customer_id.to_string())?;
                        encoder.encode_field(&a.start)?;
                        encoder.encode_field(&a.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { provider_id, day } => {
                let open = engine
                    .resolve_day(provider_id, day)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![span_rows(provider_id, open)])
            }
            Command::SelectSlots {
                provider_id,
                day,
                appointment_type_id,
            } => {
                let slots = engine
                    .day_slots(provider_id, day, appointment_type_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![span_rows(provider_id, slots)])
            }
            Command::SelectCalendar {
                provider_id,
                from_day,
                to_day,
            } => {
                let days = engine
                    .calendar_days(provider_id, from_day, to_day)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(calendar_schema());
                let rows: Vec<PgWireResult<_>> = days
                    .into_iter()
                    .map(|(day, available)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&day.format("%Y-%m-%d").to_string())?;
                        encoder.encode_field(&available)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn span_rows(provider_id: ulid::Ulid, spans: Vec<Span>) -> Response {
    let schema = Arc::new(spans_schema());
    let provider = provider_id.to_string();
    let rows: Vec<PgWireResult<_>> = spans
        .into_iter()
        .map(|span| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&provider)?;
            encoder.encode_field(&span.start)?;
            encoder.encode_field(&span.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn int4_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT4, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn providers_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name")]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("provider_id"),
        FieldInfo::new("weekday".into(), None, None, Type::INT2, FieldFormat::Text),
        int4_field("start_sec"),
        int4_field("end_sec"),
    ]
}

fn modifiers_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("provider_id"),
        int8_field("start"),
        int8_field("end"),
        bool_field("exclusive"),
    ]
}

fn appointment_types_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("provider_id"),
        text_field("name"),
        text_field("description"),
        int4_field("duration_min"),
        int8_field("price_cents"),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("provider_id"),
        text_field("appointment_type_id"),
        text_field("customer_id"),
        int8_field("start"),
        int8_field("end"),
    ]
}

fn spans_schema() -> Vec<FieldInfo> {
    vec![
        text_field("provider_id"),
        int8_field("start"),
        int8_field("end"),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![text_field("day"), bool_field("available")]
}

fn toggle_schema() -> Vec<FieldInfo> {
    vec![text_field("action"), text_field("id")]
}

/// Best-effort schema guess for Describe on a statement that has not been
/// bound yet; the dialect is small enough for substring checks.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("TOGGLE_MODIFIER") {
        toggle_schema()
    } else if upper.contains("AVAILABILITY") || upper.contains("SLOTS") {
        spans_schema()
    } else if upper.contains("CALENDAR") {
        calendar_schema()
    } else if upper.contains("SCHEDULE") {
        schedule_schema()
    } else if upper.contains("MODIFIERS") {
        modifiers_schema()
    } else if upper.contains("APPOINTMENT_TYPES") {
        appointment_types_schema()
    } else if upper.contains("APPOINTMENTS") {
        appointments_schema()
    } else if upper.contains("PROVIDERS") {
        providers_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for BookwireHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.dispatch(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookwireQueryParser;

#[async_trait]
impl QueryParser for BookwireQueryParser {
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
impl ExtendedQueryHandler for BookwireHandler {
    type Statement = String;
    type QueryParser = BookwireQueryParser;

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
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.dispatch(&engine, cmd).await?;
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text
/// format).
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

// ── Factory & connection entry point ─────────────────────────────

pub struct BookwireFactory {
    handler: Arc<BookwireHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BookwireAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BookwireFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = BookwireAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BookwireHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookwireFactory {
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

/// Run the full protocol lifecycle for one accepted socket.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(BookwireFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
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
