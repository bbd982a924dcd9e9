//! PostgreSQL driver on tokio-postgres.
//!
//! The layer is synchronous, so every physical connection owns a private
//! current-thread runtime and blocks on each call. The connection task is
//! spawned on that runtime and makes progress whenever a call is driving it.
use std::any::Any;
use std::error::Error as _;
use std::time::Duration;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres_native_tls::MakeTlsConnector;
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row, Statement};
use tracing::{debug, warn};

use super::{BufferedRows, Driver, RawConn, RawRows, RawStmt};
use crate::connstr::{ConnDesc, TlsMaterial};
use crate::db::Conn;
use crate::dialect::{self, Dialect};
use crate::error::{Error, Result};
use crate::schema::{
    Field, FieldType, GenericSchemaWriter, Schema, SchemaReader, SchemaWriter, Table, TypeFlags,
};
use crate::value::Value;

pub const DRIVER_NAME: &str = "postgres";
pub const DEFAULT_PORT: u16 = 5432;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

static SCHEMA_WRITER: GenericSchemaWriter = GenericSchemaWriter;

#[derive(Debug, Default)]
pub struct PostgresDriver;

impl Driver for PostgresDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn default_dialect(&self) -> &'static dyn Dialect {
        dialect::postgres()
    }

    fn connect(&self, desc: &ConnDesc) -> Result<Box<dyn RawConn>> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::connect_failed(format!("runtime: {}", e)))?;
        let conn_string = connection_string(desc);

        let client = match &desc.tls {
            None => runtime.block_on(async {
                let (client, connection) =
                    tokio::time::timeout(CONNECT_TIMEOUT, tokio_postgres::connect(&conn_string, NoTls))
                        .await
                        .map_err(|_| Error::connect_failed("timed out after 15s"))?
                        .map_err(|e| Error::connect_failed(e))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("postgres connection error: {}", e);
                    }
                });
                Ok::<_, Error>(client)
            })?,
            Some(tls) => {
                let connector = build_tls_connector(tls)?;
                runtime.block_on(async {
                    let (client, connection) = tokio::time::timeout(
                        CONNECT_TIMEOUT,
                        tokio_postgres::connect(&conn_string, connector),
                    )
                    .await
                    .map_err(|_| Error::connect_failed("timed out after 15s"))?
                    .map_err(|e| Error::connect_failed(e))?;
                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            warn!("postgres connection error: {}", e);
                        }
                    });
                    Ok::<_, Error>(client)
                })?
            }
        };
        debug!(host = %desc.host, database = %desc.database, "opened postgres connection");
        Ok(Box::new(PgConn {
            runtime,
            client: Some(client),
        }))
    }

    fn schema_reader(&self) -> Option<&dyn SchemaReader> {
        Some(self)
    }

    fn schema_writer(&self) -> Option<&dyn SchemaWriter> {
        Some(&SCHEMA_WRITER)
    }
}

impl SchemaReader for PostgresDriver {
    fn read_schema(&self, conn: &Conn) -> Result<Schema> {
        let rows = conn.query(
            "SELECT table_name, column_name, udt_name, is_nullable, \
             character_maximum_length, column_default \
             FROM information_schema.columns WHERE table_schema = 'public' \
             ORDER BY table_name, ordinal_position",
            &[],
        )?;
        let mut tables: Vec<Table> = Vec::new();
        for row in rows {
            let row = row?;
            let table = row.get(0).and_then(Value::as_str).unwrap_or_default();
            let udt = row.get(2).and_then(Value::as_str).unwrap_or_default();
            let default = row.get(5).and_then(Value::as_str).unwrap_or_default();
            let mut field = Field::new(
                row.get(1).and_then(Value::as_str).unwrap_or_default(),
                FieldType::from_sql_name(udt).unwrap_or(FieldType::Text),
            );
            field.width = row
                .get(4)
                .and_then(Value::as_i64)
                .map(|w| w as u32)
                .unwrap_or(0);
            field.flags = TypeFlags {
                auto_increment: default.starts_with("nextval("),
                not_null: row.get(3).and_then(Value::as_str) == Some("NO"),
            };
            match tables.last_mut() {
                Some(t) if t.name == table => t.fields.push(field),
                _ => tables.push(Table::new(table, vec![field])),
            }
        }
        Ok(Schema::new(tables))
    }
}

fn connection_string(desc: &ConnDesc) -> String {
    let port = if desc.port == 0 { DEFAULT_PORT } else { desc.port };
    let sslmode = if desc.tls.is_some() { "require" } else { "prefer" };
    format!(
        "host={} port={} dbname={} user={} password={} sslmode={} connect_timeout=10",
        quote_conn_value(&desc.host),
        port,
        quote_conn_value(&desc.database),
        quote_conn_value(&desc.username),
        quote_conn_value(&desc.password),
        sslmode
    )
}

/// Quote a value for a libpq key=value connection string.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

fn build_tls_connector(tls: &TlsMaterial) -> Result<MakeTlsConnector> {
    let tls_err = |e: native_tls::Error| Error::connect_failed(format!("TLS: {}", e));
    let mut builder = native_tls::TlsConnector::builder();

    if let Some(server) = &tls.server_cert {
        let pem = server.load()?;
        let cert = native_tls::Certificate::from_pem(&pem).map_err(tls_err)?;
        builder.add_root_certificate(cert);
    }
    match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => {
            let identity =
                native_tls::Identity::from_pkcs8(&cert.load()?, &key.load()?).map_err(tls_err)?;
            builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(Error::InvalidConnDesc(
                "client certificate and key must be given together".into(),
            ))
        }
    }

    let connector = builder.build().map_err(tls_err)?;
    Ok(MakeTlsConnector::new(connector))
}

struct PgConn {
    runtime: Runtime,
    client: Option<Client>,
}

struct PgStmt {
    sql: String,
    statement: Statement,
}

impl RawStmt for PgStmt {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn param_count(&self) -> usize {
        self.statement.params().len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PgConn {
    fn client(&self) -> Result<&Client> {
        match &self.client {
            Some(client) if !client.is_closed() => Ok(client),
            _ => Err(Error::ConnectionLost("postgres connection is closed".into())),
        }
    }

    fn statement<'a>(&self, stmt: &'a dyn RawStmt) -> Result<&'a Statement> {
        stmt.as_any()
            .downcast_ref::<PgStmt>()
            .map(|s| &s.statement)
            .ok_or_else(|| Error::Driver("statement was not prepared by the postgres driver".into()))
    }

    fn batch(&self, sql: &str) -> Result<()> {
        let client = self.client()?;
        self.runtime
            .block_on(client.batch_execute(sql))
            .map_err(map_error)
    }
}

impl RawConn for PgConn {
    fn dialect(&self) -> Option<&'static dyn Dialect> {
        Some(dialect::postgres())
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn RawStmt>> {
        let client = self.client()?;
        let statement = self
            .runtime
            .block_on(client.prepare(sql))
            .map_err(map_error)?;
        Ok(Box::new(PgStmt {
            sql: sql.to_string(),
            statement,
        }))
    }

    fn execute(&mut self, stmt: &dyn RawStmt, params: &[Value]) -> Result<u64> {
        let statement = self.statement(stmt)?;
        let client = self.client()?;
        let params: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.runtime
            .block_on(client.execute(statement, &refs))
            .map_err(map_error)
    }

    fn query(&mut self, stmt: &dyn RawStmt, params: &[Value]) -> Result<Box<dyn RawRows>> {
        let statement = self.statement(stmt)?;
        let client = self.client()?;
        let params: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self
            .runtime
            .block_on(client.query(statement, &refs))
            .map_err(map_error)?;

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        for column in statement.columns() {
            check_readable(column.name(), column.type_())?;
        }
        let values = rows
            .iter()
            .map(|row| {
                statement
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(i, c)| extract_value(row, i, c.type_()))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(BufferedRows::new(columns, values)))
    }

    fn begin(&mut self) -> Result<()> {
        self.batch("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.batch("ROLLBACK")
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the client ends the connection task.
        self.client = None;
        Ok(())
    }
}

/// Binds a [`Value`] to whatever type the server inferred for the
/// placeholder, converting numerics between widths.
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => i.to_string().to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            Value::Text(s) => s.to_sql(ty, out),
            Value::Bin(b) => b.to_sql(ty, out),
            Value::Date(d) => d.to_sql(ty, out),
            Value::DateTime(dt) => dt.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Reject column types that have no `Value` mapping instead of reading them as NULL.
fn check_readable(column: &str, pg_type: &Type) -> Result<()> {
    let native = matches!(
        *pg_type,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::BYTEA
            | Type::DATE
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
    );
    if native || <String as FromSql>::accepts(pg_type) {
        Ok(())
    } else {
        Err(Error::Unsupported(format!(
            "column '{}' has type {}, cast it to text to read it",
            column, pg_type
        )))
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| Error::Driver(format!("reading column {}: {}", idx, e)))
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> Result<Value> {
    let value = match *pg_type {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::Int),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::Float),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(Value::Bin),
        Type::DATE => get::<NaiveDate>(row, idx)?.map(Value::Date),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(Value::DateTime),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(|v| Value::DateTime(v.naive_utc())),
        _ => get::<String>(row, idx)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Map tokio-postgres errors, by SQLSTATE where the server sent one.
fn map_error(err: tokio_postgres::Error) -> Error {
    if err.is_closed() {
        return Error::ConnectionLost(err.to_string());
    }
    let Some(db_err) = err.as_db_error() else {
        // No server response: the socket or protocol failed.
        return match err.source() {
            Some(source) => Error::ConnectionLost(format!("{}: {}", err, source)),
            None => Error::Driver(err.to_string()),
        };
    };
    let message = db_err.message().to_string();
    categorize_sqlstate(db_err.code().code(), message)
}

fn categorize_sqlstate(code: &str, message: String) -> Error {
    match code {
        "23505" => Error::key_violation(message),
        "42P01" => Error::table_not_found(message),
        "42703" => Error::field_not_found(message),
        "42P07" | "42710" => Error::relation_already_exists(message),
        "55P03" | "40P01" => Error::database_busy(message),
        "57P01" | "57P02" | "57P03" => Error::ConnectionLost(message),
        _ if code.starts_with("08") => Error::ConnectionLost(message),
        "28000" | "28P01" | "3D000" => Error::connect_failed(message),
        _ => Error::Driver(message),
    }
}
