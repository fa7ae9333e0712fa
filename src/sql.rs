use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Which confirmed bookings a `SELECT ... FROM bookings` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    Id(Ulid),
    Scope(Scope),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertEntity {
        kind: EntityKind,
        id: Ulid,
        name: Option<String>,
    },
    InsertAvailability {
        id: Ulid,
        trainer_id: Ulid,
        start: Ms,
        end: Ms,
    },
    DeleteAvailability {
        id: Ulid,
    },
    SelectAvailability {
        trainer_id: Ulid,
    },
    InsertSession {
        id: Ulid,
        trainer_id: Ulid,
        room_id: Ulid,
        member_id: Ulid,
        start: Ms,
        end: Ms,
    },
    InsertClass {
        id: Ulid,
        trainer_id: Ulid,
        room_id: Ulid,
        name: Option<String>,
        capacity: u32,
        start: Ms,
        end: Ms,
    },
    InsertRegistration {
        class_id: Ulid,
        member_id: Ulid,
    },
    DeleteRegistration {
        class_id: Ulid,
        member_id: Ulid,
    },
    SelectRegistrations {
        class_id: Ulid,
    },
    InsertReschedule {
        booking_id: Ulid,
        room_id: Option<Ulid>,
        start: Ms,
        end: Ms,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectConflicts {
        scopes: Vec<Scope>,
        start: Ms,
        end: Ms,
    },
    SelectSlots {
        trainer_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    InsertMetric {
        metric: HealthMetric,
    },
    SelectMetrics {
        member_id: Ulid,
    },
    SelectLatestMetric {
        member_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Default column order when an INSERT has no column list.
fn default_columns(table: &str) -> Option<&'static [&'static str]> {
    Some(match table {
        "trainers" | "rooms" | "members" => &["id", "name"],
        "availability" => &["id", "trainer_id", "start", "end"],
        "sessions" => &["id", "trainer_id", "room_id", "member_id", "start", "end"],
        "classes" => &["id", "trainer_id", "room_id", "name", "capacity", "start", "end"],
        "registrations" => &["class_id", "member_id"],
        "reschedules" => &["booking_id", "start", "end", "room_id"],
        "metrics" => &[
            "id",
            "member_id",
            "recorded_at",
            "weight_kg",
            "height_cm",
            "heart_rate",
            "body_fat_pct",
        ],
        _ => return None,
    })
}

/// One VALUES row addressed by column name.
struct Row<'a> {
    table: &'static str,
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        let pos = self.columns.iter().position(|c| c == col)?;
        self.values.get(pos)
    }

    fn required(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.required(col)?)
    }

    fn i64(&self, col: &'static str) -> Result<i64, SqlError> {
        parse_i64_expr(self.required(col)?)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = default_columns(&table).ok_or_else(|| SqlError::UnknownTable(table.clone()))?;
    let table_label: &'static str = match table.as_str() {
        "trainers" => "trainers",
        "rooms" => "rooms",
        "members" => "members",
        "availability" => "availability",
        "sessions" => "sessions",
        "classes" => "classes",
        "registrations" => "registrations",
        "reschedules" => "reschedules",
        _ => "metrics",
    };

    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() != columns.len() {
        return Err(SqlError::WrongArity(table_label, columns.len(), values.len()));
    }
    if let Some(unknown) = columns.iter().find(|c| !defaults.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(table_label, unknown.clone()));
    }
    let row = Row {
        table: table_label,
        columns,
        values: &values,
    };

    match table_label {
        "trainers" | "rooms" | "members" => Ok(Command::InsertEntity {
            kind: match table_label {
                "trainers" => EntityKind::Trainer,
                "rooms" => EntityKind::Room,
                _ => EntityKind::Member,
            },
            id: row.ulid("id")?,
            name: row.get("name").map(parse_string_or_null).transpose()?.flatten(),
        }),
        "availability" => Ok(Command::InsertAvailability {
            id: row.ulid("id")?,
            trainer_id: row.ulid("trainer_id")?,
            start: row.i64("start")?,
            end: row.i64("end")?,
        }),
        "sessions" => Ok(Command::InsertSession {
            id: row.ulid("id")?,
            trainer_id: row.ulid("trainer_id")?,
            room_id: row.ulid("room_id")?,
            member_id: row.ulid("member_id")?,
            start: row.i64("start")?,
            end: row.i64("end")?,
        }),
        "classes" => Ok(Command::InsertClass {
            id: row.ulid("id")?,
            trainer_id: row.ulid("trainer_id")?,
            room_id: row.ulid("room_id")?,
            name: row.get("name").map(parse_string_or_null).transpose()?.flatten(),
            capacity: parse_u32(row.required("capacity")?)?,
            start: row.i64("start")?,
            end: row.i64("end")?,
        }),
        "registrations" => Ok(Command::InsertRegistration {
            class_id: row.ulid("class_id")?,
            member_id: row.ulid("member_id")?,
        }),
        "reschedules" => Ok(Command::InsertReschedule {
            booking_id: row.ulid("booking_id")?,
            room_id: row.get("room_id").map(parse_ulid_or_null).transpose()?.flatten(),
            start: row.i64("start")?,
            end: row.i64("end")?,
        }),
        _ => {
            let float = |col| row.get(col).map(parse_f64_or_null).transpose().map(Option::flatten);
            let heart_rate = match row.get("heart_rate").map(parse_i64_or_null).transpose()?.flatten() {
                Some(v) => Some(
                    u32::try_from(v).map_err(|_| SqlError::Parse(format!("heart_rate {v} out of range")))?,
                ),
                None => None,
            };
            Ok(Command::InsertMetric {
                metric: HealthMetric {
                    id: row.ulid("id")?,
                    member_id: row.ulid("member_id")?,
                    recorded_at: row.i64("recorded_at")?,
                    values: MetricValues {
                        weight_kg: float("weight_kg")?,
                        height_cm: float("height_cm")?,
                        heart_rate,
                        body_fat_pct: float("body_fat_pct")?,
                    },
                },
            })
        }
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "availability" => Ok(Command::DeleteAvailability {
            id: filters.ulid("id")?,
        }),
        "bookings" => Ok(Command::DeleteBooking {
            id: filters.ulid("id")?,
        }),
        "registrations" => Ok(Command::DeleteRegistration {
            class_id: filters.ulid("class_id")?,
            member_id: filters.ulid("member_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            trainer_id: filters.ulid("trainer_id")?,
        }),
        "registrations" => Ok(Command::SelectRegistrations {
            class_id: filters.ulid("class_id")?,
        }),
        "bookings" => {
            let filter = if let Some(id) = filters.opt_ulid("id")? {
                BookingFilter::Id(id)
            } else if let Some(id) = filters.opt_ulid("trainer_id")? {
                BookingFilter::Scope(Scope::Trainer(id))
            } else if let Some(id) = filters.opt_ulid("room_id")? {
                BookingFilter::Scope(Scope::Room(id))
            } else if let Some(id) = filters.opt_ulid("member_id")? {
                BookingFilter::Scope(Scope::Member(id))
            } else {
                return Err(SqlError::MissingFilter("id, trainer_id, room_id or member_id"));
            };
            Ok(Command::SelectBookings { filter })
        }
        "conflicts" => {
            let mut scopes = Vec::new();
            if let Some(id) = filters.opt_ulid("trainer_id")? {
                scopes.push(Scope::Trainer(id));
            }
            if let Some(id) = filters.opt_ulid("room_id")? {
                scopes.push(Scope::Room(id));
            }
            if let Some(id) = filters.opt_ulid("member_id")? {
                scopes.push(Scope::Member(id));
            }
            if scopes.is_empty() {
                return Err(SqlError::MissingFilter("trainer_id, room_id or member_id"));
            }
            Ok(Command::SelectConflicts {
                scopes,
                start: filters.lower_bound("start")?,
                end: filters.upper_bound("end")?,
            })
        }
        "slots" => Ok(Command::SelectSlots {
            trainer_id: filters.ulid("trainer_id")?,
            start: filters.lower_bound("start")?,
            end: filters.upper_bound("end")?,
            min_duration: filters.eq("min_duration").map(parse_i64_expr).transpose()?,
        }),
        "metrics" => Ok(Command::SelectMetrics {
            member_id: filters.ulid("member_id")?,
        }),
        "latest_metrics" => Ok(Command::SelectLatestMetric {
            member_id: filters.ulid("member_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Conjunction of simple `column <op> value` predicates from a WHERE clause.
#[derive(Default)]
struct Filters {
    eq: Vec<(String, Expr)>,
    gte: Vec<(String, Expr)>,
    lte: Vec<(String, Expr)>,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => {
                let bucket = match op {
                    ast::BinaryOperator::And => {
                        self.collect(left)?;
                        return self.collect(right);
                    }
                    ast::BinaryOperator::Eq => &mut self.eq,
                    ast::BinaryOperator::GtEq => &mut self.gte,
                    ast::BinaryOperator::LtEq => &mut self.lte,
                    other => return Err(SqlError::Unsupported(format!("operator {other}"))),
                };
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                bucket.push((col, right.as_ref().clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("predicate {other}"))),
        }
    }

    fn find<'a>(list: &'a [(String, Expr)], col: &str) -> Option<&'a Expr> {
        list.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn eq(&self, col: &str) -> Option<&Expr> {
        Self::find(&self.eq, col)
    }

    fn opt_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.eq(col).map(parse_ulid_expr).transpose()
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        self.opt_ulid(col)?.ok_or(SqlError::MissingFilter(col))
    }

    fn lower_bound(&self, col: &'static str) -> Result<Ms, SqlError> {
        let expr = Self::find(&self.gte, col).ok_or(SqlError::MissingFilter(col))?;
        parse_i64_expr(expr)
    }

    fn upper_bound(&self, col: &'static str) -> Result<Ms, SqlError> {
        let expr = Self::find(&self.lte, col).ok_or(SqlError::MissingFilter(col))?;
        parse_i64_expr(expr)
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid_expr(expr).map(Some)
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Numbers arrive bare from simple queries and quoted from bound parameters.
fn numeric_text(expr: &Expr) -> Result<(bool, String), SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        let (neg, text) = numeric_text(inner)?;
        return Ok((!neg, text));
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => Ok((false, s.trim().to_string())),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    let (neg, text) = numeric_text(expr)?;
    let v: i64 = text
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {text:?}: {e}")))?;
    Ok(if neg { -v } else { v })
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64_expr(expr).map(Some)
}

fn parse_f64_or_null(expr: &Expr) -> Result<Option<f64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let (neg, text) = numeric_text(expr)?;
    let v: f64 = text
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad number {text:?}: {e}")))?;
    if !v.is_finite() {
        return Err(SqlError::Parse(format!("non-finite number {text:?}")));
    }
    Ok(Some(if neg { -v } else { v }))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
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
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const C: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";
    const D: &str = "01BX5ZZKBKACTAV9WEVGEMMVS1";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn insert_registry_rows() {
        let cmd = parse_sql(&format!("INSERT INTO trainers (id, name) VALUES ('{A}', 'Robin')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertEntity {
                kind: EntityKind::Trainer,
                id: ulid(A),
                name: Some("Robin".into()),
            }
        );
        let cmd = parse_sql(&format!("INSERT INTO rooms (id) VALUES ('{A}')")).unwrap();
        assert!(matches!(cmd, Command::InsertEntity { kind: EntityKind::Room, name: None, .. }));
        let cmd = parse_sql(&format!("INSERT INTO members VALUES ('{A}', NULL)")).unwrap();
        assert!(matches!(cmd, Command::InsertEntity { kind: EntityKind::Member, name: None, .. }));
    }

    #[test]
    fn insert_availability() {
        let sql = format!(r#"INSERT INTO availability (id, trainer_id, start, "end") VALUES ('{A}', '{B}', 1000, 2000)"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertAvailability {
                id: ulid(A),
                trainer_id: ulid(B),
                start: 1000,
                end: 2000,
            }
        );
    }

    #[test]
    fn insert_columns_in_any_order() {
        let sql = format!(
            r#"INSERT INTO sessions ("end", start, member_id, room_id, trainer_id, id) VALUES (2000, 1000, '{D}', '{C}', '{B}', '{A}')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertSession {
                id: ulid(A),
                trainer_id: ulid(B),
                room_id: ulid(C),
                member_id: ulid(D),
                start: 1000,
                end: 2000,
            }
        );
    }

    #[test]
    fn insert_class() {
        let sql = format!(
            r#"INSERT INTO classes (id, trainer_id, room_id, name, capacity, start, "end") VALUES ('{A}', '{B}', '{C}', 'Spin', 12, 1000, 2000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertClass { name, capacity, .. } => {
                assert_eq!(name.as_deref(), Some("Spin"));
                assert_eq!(capacity, 12);
            }
            other => panic!("expected InsertClass, got {other:?}"),
        }
    }

    #[test]
    fn registrations_round_trip_forms() {
        let ins = parse_sql(&format!("INSERT INTO registrations (class_id, member_id) VALUES ('{A}', '{B}')")).unwrap();
        assert_eq!(ins, Command::InsertRegistration { class_id: ulid(A), member_id: ulid(B) });

        let del = parse_sql(&format!("DELETE FROM registrations WHERE class_id = '{A}' AND member_id = '{B}'")).unwrap();
        assert_eq!(del, Command::DeleteRegistration { class_id: ulid(A), member_id: ulid(B) });

        let sel = parse_sql(&format!("SELECT * FROM registrations WHERE class_id = '{A}'")).unwrap();
        assert_eq!(sel, Command::SelectRegistrations { class_id: ulid(A) });

        assert!(matches!(
            parse_sql(&format!("DELETE FROM registrations WHERE class_id = '{A}'")),
            Err(SqlError::MissingFilter("member_id"))
        ));
    }

    #[test]
    fn insert_reschedule_with_and_without_room() {
        let plain = parse_sql(&format!(r#"INSERT INTO reschedules (booking_id, start, "end") VALUES ('{A}', 5000, 6000)"#)).unwrap();
        assert_eq!(
            plain,
            Command::InsertReschedule { booking_id: ulid(A), room_id: None, start: 5000, end: 6000 }
        );
        let moved = parse_sql(&format!(
            r#"INSERT INTO reschedules (booking_id, start, "end", room_id) VALUES ('{A}', 5000, 6000, '{B}')"#
        ))
        .unwrap();
        assert!(matches!(moved, Command::InsertReschedule { room_id: Some(r), .. } if r == ulid(B)));
    }

    #[test]
    fn bookings_select_and_cancel() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{A}'")).unwrap(),
            Command::DeleteBooking { id: ulid(A) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE id = '{A}'")).unwrap(),
            Command::SelectBookings { filter: BookingFilter::Id(ulid(A)) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE room_id = '{A}'")).unwrap(),
            Command::SelectBookings { filter: BookingFilter::Scope(Scope::Room(ulid(A))) }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM bookings"),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn select_conflicts_collects_scopes() {
        let sql = format!(
            r#"SELECT * FROM conflicts WHERE trainer_id = '{A}' AND member_id = '{B}' AND start >= 1000 AND "end" <= 2000"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectConflicts {
                scopes: vec![Scope::Trainer(ulid(A)), Scope::Member(ulid(B))],
                start: 1000,
                end: 2000,
            }
        );
        let no_scope = r#"SELECT * FROM conflicts WHERE start >= 1000 AND "end" <= 2000"#;
        assert!(matches!(parse_sql(no_scope), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn select_slots() {
        let sql = format!(
            r#"SELECT * FROM slots WHERE trainer_id = '{A}' AND start >= 1000 AND "end" <= 2000 AND min_duration = 1800000"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots {
                trainer_id: ulid(A),
                start: 1000,
                end: 2000,
                min_duration: Some(1_800_000),
            }
        );
        let missing_end = format!("SELECT * FROM slots WHERE trainer_id = '{A}' AND start >= 1000");
        assert!(matches!(parse_sql(&missing_end), Err(SqlError::MissingFilter("end"))));
    }

    #[test]
    fn insert_metric_partial_values() {
        let sql = format!(
            "INSERT INTO metrics (id, member_id, recorded_at, weight_kg, heart_rate) VALUES ('{A}', '{B}', 1700000000000, 72.5, 61)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertMetric { metric } => {
                assert_eq!(metric.member_id, ulid(B));
                assert_eq!(metric.values.weight_kg, Some(72.5));
                assert_eq!(metric.values.heart_rate, Some(61));
                assert_eq!(metric.values.height_cm, None);
                assert_eq!(metric.values.body_fat_pct, None);
            }
            other => panic!("expected InsertMetric, got {other:?}"),
        }
    }

    #[test]
    fn quoted_numbers_from_bound_parameters() {
        let sql = format!(
            "INSERT INTO metrics (id, member_id, recorded_at, body_fat_pct) VALUES ('{A}', '{B}', '1700000000000', '18.25')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertMetric { metric } => {
                assert_eq!(metric.recorded_at, 1_700_000_000_000);
                assert_eq!(metric.values.body_fat_pct, Some(18.25));
            }
            other => panic!("expected InsertMetric, got {other:?}"),
        }
    }

    #[test]
    fn metric_reads() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM metrics WHERE member_id = '{A}'")).unwrap(),
            Command::SelectMetrics { member_id: ulid(A) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM latest_metrics WHERE member_id = '{A}'")).unwrap(),
            Command::SelectLatestMetric { member_id: ulid(A) }
        );
    }

    #[test]
    fn availability_delete_and_select() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM availability WHERE id = '{A}'")).unwrap(),
            Command::DeleteAvailability { id: ulid(A) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM availability WHERE trainer_id = '{A}'")).unwrap(),
            Command::SelectAvailability { trainer_id: ulid(A) }
        );
    }

    #[test]
    fn negative_numbers_parse() {
        let sql = format!(r#"INSERT INTO availability VALUES ('{A}', '{B}', -5, 10)"#);
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertAvailability { start: -5, .. }));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO lockers (id) VALUES ('{A}')")),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO rooms (id, colour) VALUES ('{A}', 'red')")),
            Err(SqlError::UnknownColumn("rooms", _))
        ));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO rooms (id, name) VALUES ('{A}')")),
            Err(SqlError::WrongArity("rooms", 2, 1))
        ));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO registrations (class_id) VALUES ('{A}')")),
            Err(SqlError::MissingColumn("registrations", "member_id"))
        ));
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM bookings WHERE id = '{A}' OR id = '{B}'")),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO rooms VALUES ('{A}', NULL), ('{B}', NULL)")),
            Err(SqlError::Unsupported(_))
        ));
        assert!(parse_sql("INSERT INTO rooms (id) VALUES ('not-a-ulid')").is_err());
        assert!(parse_sql("UPDATE bookings SET start = 1").is_err());
    }
}
