//! Backend type → [`SqlValue`] conversion
//!
//! Each driver gets a registry keyed by the type name the backend reports for a
//! column. Unknown names and failed decodes go through a fallback chain
//! (integer, float, bool, text, bytes) and end as `Null`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};
use std::collections::HashMap;
use tracing::trace;

use crate::domain::{ColumnMeta, RowRecord, SqlValue};

type DecodeResult = Result<SqlValue, sqlx::Error>;

/// Decodes column `index` of a row.
pub type Decoder<R> = fn(&R, usize) -> DecodeResult;

pub struct TypeAdapters<R: Row> {
    decoders: HashMap<String, Decoder<R>>,
    fallback: fn(&R, usize) -> SqlValue,
}

impl<R> TypeAdapters<R>
where
    R: Row,
    usize: ColumnIndex<R>,
{
    fn with_fallback(fallback: fn(&R, usize) -> SqlValue) -> Self {
        Self {
            decoders: HashMap::new(),
            fallback,
        }
    }

    /// Register (or replace) the decoder for a backend type name.
    pub fn register(&mut self, type_name: &str, decoder: Decoder<R>) -> &mut Self {
        self.decoders.insert(type_name.to_ascii_uppercase(), decoder);
        self
    }

    fn lookup(&self, type_name: &str) -> Option<&Decoder<R>> {
        self.decoders
            .get(type_name)
            .or_else(|| self.decoders.get(&type_name.to_ascii_uppercase()))
    }

    pub fn decode(&self, row: &R, index: usize, type_name: &str) -> SqlValue {
        match self.lookup(type_name).map(|decoder| decoder(row, index)) {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                trace!(type_name, error = %e, "decoder failed, using fallback");
                (self.fallback)(row, index)
            }
            None => (self.fallback)(row, index),
        }
    }

    /// Convert a row, keeping the backend's column order.
    pub fn map_row(&self, row: &R) -> RowRecord {
        let columns = row.columns();
        let mut record = RowRecord::with_capacity(columns.len());
        for column in columns {
            let value = self.decode(row, column.ordinal(), column.type_info().name());
            record.push(column.name(), value);
        }
        record
    }

    pub fn describe(row: &R) -> Vec<ColumnMeta> {
        row.columns()
            .iter()
            .map(|column| ColumnMeta {
                name: column.name().to_string(),
                type_name: column.type_info().name().to_string(),
                ordinal: column.ordinal(),
            })
            .collect()
    }
}

impl TypeAdapters<PgRow> {
    pub fn postgres() -> Self {
        let mut adapters = Self::with_fallback(fallback::<PgRow>);
        adapters
            .register("BOOL", boolean::<PgRow>)
            .register("INT2", int::<PgRow, i16>)
            .register("INT4", int::<PgRow, i32>)
            .register("INT8", int::<PgRow, i64>)
            .register("FLOAT4", float::<PgRow, f32>)
            .register("FLOAT8", float::<PgRow, f64>)
            .register("NUMERIC", display::<PgRow, Decimal>)
            .register("TEXT", text::<PgRow>)
            .register("VARCHAR", text::<PgRow>)
            .register("BPCHAR", text::<PgRow>)
            .register("NAME", text::<PgRow>)
            .register("UUID", display::<PgRow, Uuid>)
            .register("JSON", json::<PgRow>)
            .register("JSONB", json::<PgRow>)
            .register("DATE", date::<PgRow>)
            .register("TIME", time::<PgRow>)
            .register("TIMESTAMP", datetime::<PgRow>)
            .register("TIMESTAMPTZ", timestamp::<PgRow>)
            .register("BYTEA", bytes::<PgRow>)
            .register("TEXT[]", array::<PgRow, String>)
            .register("VARCHAR[]", array::<PgRow, String>)
            .register("INT4[]", array::<PgRow, i32>)
            .register("INT8[]", array::<PgRow, i64>);
        adapters
    }
}

impl TypeAdapters<MySqlRow> {
    pub fn mysql() -> Self {
        let mut adapters = Self::with_fallback(fallback::<MySqlRow>);
        adapters
            .register("BOOLEAN", boolean::<MySqlRow>)
            .register("TINYINT", int::<MySqlRow, i64>)
            .register("SMALLINT", int::<MySqlRow, i64>)
            .register("MEDIUMINT", int::<MySqlRow, i64>)
            .register("INT", int::<MySqlRow, i64>)
            .register("BIGINT", int::<MySqlRow, i64>)
            .register("TINYINT UNSIGNED", unsigned::<MySqlRow>)
            .register("SMALLINT UNSIGNED", unsigned::<MySqlRow>)
            .register("MEDIUMINT UNSIGNED", unsigned::<MySqlRow>)
            .register("INT UNSIGNED", unsigned::<MySqlRow>)
            .register("BIGINT UNSIGNED", unsigned::<MySqlRow>)
            .register("FLOAT", float::<MySqlRow, f32>)
            .register("DOUBLE", float::<MySqlRow, f64>)
            .register("DECIMAL", display::<MySqlRow, Decimal>)
            .register("CHAR", text::<MySqlRow>)
            .register("VARCHAR", text::<MySqlRow>)
            .register("TEXT", text::<MySqlRow>)
            .register("ENUM", text::<MySqlRow>)
            .register("SET", text::<MySqlRow>)
            .register("JSON", json::<MySqlRow>)
            .register("DATE", date::<MySqlRow>)
            .register("TIME", time::<MySqlRow>)
            .register("DATETIME", datetime::<MySqlRow>)
            .register("TIMESTAMP", timestamp::<MySqlRow>)
            .register("BINARY", bytes::<MySqlRow>)
            .register("VARBINARY", bytes::<MySqlRow>)
            .register("BLOB", bytes::<MySqlRow>);
        adapters
    }
}

impl TypeAdapters<SqliteRow> {
    pub fn sqlite() -> Self {
        let mut adapters = Self::with_fallback(fallback::<SqliteRow>);
        adapters
            .register("INTEGER", int::<SqliteRow, i64>)
            .register("REAL", float::<SqliteRow, f64>)
            .register("TEXT", text::<SqliteRow>)
            .register("BLOB", bytes::<SqliteRow>)
            .register("BOOLEAN", boolean::<SqliteRow>)
            .register("DATE", date::<SqliteRow>)
            .register("TIME", time::<SqliteRow>)
            .register("DATETIME", datetime::<SqliteRow>);
        adapters
    }
}

fn nullable<R, T>(row: &R, index: usize, wrap: impl FnOnce(T) -> SqlValue) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    T: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    Ok(row
        .try_get::<Option<T>, _>(index)?
        .map_or(SqlValue::Null, wrap))
}

fn int<R, T>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    T: for<'r> Decode<'r, R::Database> + Type<R::Database> + Into<i64>,
{
    nullable(row, index, |v: T| SqlValue::Int(v.into()))
}

fn unsigned<R>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    u64: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, |v: u64| {
        i64::try_from(v)
            .map(SqlValue::Int)
            .unwrap_or_else(|_| SqlValue::Text(v.to_string()))
    })
}

fn float<R, T>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    T: for<'r> Decode<'r, R::Database> + Type<R::Database> + Into<f64>,
{
    nullable(row, index, |v: T| SqlValue::Float(v.into()))
}

fn boolean<R>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    bool: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, SqlValue::Bool)
}

fn text<R>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    String: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, SqlValue::Text)
}

/// Exact decimals and identifiers travel as text.
fn display<R, T>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    T: for<'r> Decode<'r, R::Database> + Type<R::Database> + ToString,
{
    nullable(row, index, |v: T| SqlValue::Text(v.to_string()))
}

fn json<R>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    serde_json::Value: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, SqlValue::Json)
}

fn array<R, T>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Serialize,
    Vec<T>: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, |items: Vec<T>| {
        serde_json::to_value(items)
            .map(SqlValue::Json)
            .unwrap_or(SqlValue::Null)
    })
}

fn date<R>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    NaiveDate: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, SqlValue::Date)
}

fn time<R>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    NaiveTime: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, SqlValue::Time)
}

fn datetime<R>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    NaiveDateTime: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, SqlValue::DateTime)
}

fn timestamp<R>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    DateTime<Utc>: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, SqlValue::Timestamp)
}

fn bytes<R>(row: &R, index: usize) -> DecodeResult
where
    R: Row,
    usize: ColumnIndex<R>,
    Vec<u8>: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    nullable(row, index, SqlValue::Bytes)
}

fn fallback<R>(row: &R, index: usize) -> SqlValue
where
    R: Row,
    usize: ColumnIndex<R>,
    i64: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    f64: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    bool: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    String: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    int::<R, i64>(row, index)
        .or_else(|_| float::<R, f64>(row, index))
        .or_else(|_| boolean(row, index))
        .or_else(|_| text(row, index))
        .or_else(|_| bytes(row, index))
        .unwrap_or(SqlValue::Null)
}
