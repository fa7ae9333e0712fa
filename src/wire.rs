use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::GymTimeAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, BookingFilter, Command};
use crate::tenant::TenantManager;

/// Client-supplied bounds, unchecked. The engine rejects empty or inverted
/// ranges with `InvalidInterval`.
fn client_span(start: Ms, end: Ms) -> Span {
    Span { start, end }
}

pub struct GymTimeHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<GymTimeQueryParser>,
}

impl GymTimeHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(GymTimeQueryParser),
        }
    }

    /// The connection's database name selects the club.
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
                format!("club error: {e}"),
            )))
        })
    }

    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertEntity { kind, id, name } => {
                match kind {
                    EntityKind::Trainer => engine.register_trainer(id, name).await,
                    EntityKind::Room => engine.register_room(id, name).await,
                    EntityKind::Member => engine.register_member(id, name).await,
                }
                .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertAvailability {
                id,
                trainer_id,
                start,
                end,
            } => {
                engine
                    .add_availability(id, trainer_id, client_span(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DeleteAvailability { id } => {
                engine.remove_availability(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::SelectAvailability { trainer_id } => {
                let windows = engine
                    .availability_windows(trainer_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = windows
                    .into_iter()
                    .map(|w| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&w.id.to_string())?;
                        encoder.encode_field(&w.trainer_id.to_string())?;
                        encoder.encode_field(&w.start)?;
                        encoder.encode_field(&w.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertSession {
                id,
                trainer_id,
                room_id,
                member_id,
                start,
                end,
            } => {
                engine
                    .create_session(id, trainer_id, room_id, member_id, client_span(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertClass {
                id,
                trainer_id,
                room_id,
                name,
                capacity,
                start,
                end,
            } => {
                engine
                    .schedule_class(id, trainer_id, room_id, name, capacity, client_span(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertRegistration { class_id, member_id } => {
                engine
                    .register_for_class(class_id, member_id)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DeleteRegistration { class_id, member_id } => {
                engine
                    .withdraw_from_class(class_id, member_id)
                    .await
                    .map_err(engine_err)?;
                Ok(deleted())
            }
            Command::SelectRegistrations { class_id } => {
                let members = engine.roster(&class_id).map_err(engine_err)?;
                let schema = Arc::new(registrations_schema());
                let class_str = class_id.to_string();
                let rows: Vec<PgWireResult<_>> = members
                    .into_iter()
                    .map(|member_id| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&class_str)?;
                        encoder.encode_field(&member_id.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertReschedule {
                booking_id,
                room_id,
                start,
                end,
            } => {
                engine
                    .relocate(booking_id, room_id, client_span(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DeleteBooking { id } => {
                engine.cancel(id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::SelectBookings { filter } => {
                let bookings = match filter {
                    BookingFilter::Id(id) => engine.get_booking(&id).into_iter().collect(),
                    BookingFilter::Scope(scope) => {
                        engine.bookings_for(scope).await.map_err(engine_err)?
                    }
                };
                Ok(bookings_response(bookings))
            }
            Command::SelectConflicts { scopes, start, end } => {
                let found = engine
                    .find_conflicts(&scopes, client_span(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(bookings_response(found))
            }
            Command::SelectSlots {
                trainer_id,
                start,
                end,
                min_duration,
            } => {
                let slots = engine
                    .open_slots(trainer_id, start, end, min_duration)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let trainer_str = trainer_id.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&trainer_str)?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertMetric { metric } => {
                engine.record_metric(metric).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::SelectMetrics { member_id } => {
                let history = engine.metric_history(&member_id).map_err(engine_err)?;
                Ok(metrics_response(history))
            }
            Command::SelectLatestMetric { member_id } => {
                if engine.entity_kind(&member_id) != Some(EntityKind::Member) {
                    return Err(engine_err(EngineError::NotFound(member_id)));
                }
                Ok(metrics_response(engine.get_latest(&member_id).into_iter().collect()))
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("trainer_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
    ]
}

fn registrations_schema() -> Vec<FieldInfo> {
    vec![
        text_field("class_id", Type::VARCHAR),
        text_field("member_id", Type::VARCHAR),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        text_field("trainer_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("kind", Type::VARCHAR),
        text_field("trainer_id", Type::VARCHAR),
        text_field("room_id", Type::VARCHAR),
        text_field("member_id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("capacity", Type::INT8),
        text_field("enrolled", Type::INT8),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
        text_field("status", Type::VARCHAR),
    ]
}

fn metrics_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("member_id", Type::VARCHAR),
        text_field("recorded_at", Type::INT8),
        text_field("weight_kg", Type::FLOAT8),
        text_field("height_cm", Type::FLOAT8),
        text_field("heart_rate", Type::INT8),
        text_field("body_fat_pct", Type::FLOAT8),
    ]
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, b: &Booking) -> PgWireResult<DataRow> {
    let (member_id, name, capacity, enrolled) = match &b.kind {
        BookingKind::Session { member_id } => (Some(member_id.to_string()), None, None, None),
        BookingKind::Class { name, roster } => (
            None,
            name.clone(),
            Some(roster.capacity as i64),
            Some(roster.len() as i64),
        ),
    };
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.kind_label())?;
    encoder.encode_field(&b.trainer_id.to_string())?;
    encoder.encode_field(&b.room_id.to_string())?;
    encoder.encode_field(&member_id)?;
    encoder.encode_field(&name)?;
    encoder.encode_field(&capacity)?;
    encoder.encode_field(&enrolled)?;
    encoder.encode_field(&b.span.start)?;
    encoder.encode_field(&b.span.end)?;
    encoder.encode_field(&b.status.as_str())?;
    Ok(encoder.take_row())
}

fn bookings_response(bookings: Vec<Booking>) -> Response {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings.iter().map(|b| encode_booking(&schema, b)).collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn metrics_response(metrics: Vec<HealthMetric>) -> Response {
    let schema = Arc::new(metrics_schema());
    let rows: Vec<PgWireResult<_>> = metrics
        .into_iter()
        .map(|m| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&m.id.to_string())?;
            encoder.encode_field(&m.member_id.to_string())?;
            encoder.encode_field(&m.recorded_at)?;
            encoder.encode_field(&m.values.weight_kg)?;
            encoder.encode_field(&m.values.height_cm)?;
            encoder.encode_field(&m.values.heart_rate.map(i64::from))?;
            encoder.encode_field(&m.values.body_fat_pct)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Row shape of a statement, by the table a SELECT reads. Empty for writes.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut words = lower
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|w| !w.is_empty());
    if words.next() != Some("select") {
        return vec![];
    }
    let table = words
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_matches('"').rsplit('.').next().unwrap_or_default().to_string());
    match table.as_deref() {
        Some("availability") => availability_schema(),
        Some("registrations") => registrations_schema(),
        Some("slots") => slots_schema(),
        Some("bookings") | Some("conflicts") => bookings_schema(),
        Some("metrics") | Some("latest_metrics") => metrics_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for GymTimeHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(&engine, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct GymTimeQueryParser;

#[async_trait]
impl QueryParser for GymTimeQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for GymTimeHandler {
    type Statement = String;
    type QueryParser = GymTimeQueryParser;

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
        self.run(&engine, cmd).await
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
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
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Inline bound parameters as quoted text literals. Walks backwards so `$1`
/// never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
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

pub struct GymTimeFactory {
    handler: Arc<GymTimeHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<GymTimeAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl GymTimeFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = GymTimeAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(GymTimeHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for GymTimeFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(GymTimeFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists(_) | EngineError::AlreadyEnrolled { .. } => "23505",
        EngineError::NotFound(_) => "P0002",
        EngineError::InvalidInterval { .. } => "22023",
        EngineError::TrainerUnavailable { .. } => "55000",
        EngineError::CapacityExceeded { .. } | EngineError::LimitExceeded(_) => "54000",
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

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
