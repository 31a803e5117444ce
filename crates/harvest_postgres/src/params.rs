//! Translation between `SqlValue` and the PostgreSQL wire types.

use std::error::Error;
use std::sync::Arc;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use harvest_core::{HarvestError, HarvestResult, Row, SqlValue};
use postgres_types::{to_sql_checked, IsNull, Json, ToSql, Type, WrongType};

type BoxError = Box<dyn Error + Sync + Send>;

/// Binds a `SqlValue` to the type the server inferred for the parameter.
///
/// Values are only encoded into compatible types; text-family parameters take
/// the value's text form. Anything else is a `WrongType` error rather than raw
/// bytes the server would reinterpret.
#[derive(Debug)]
pub(crate) struct PgParam<'a>(pub &'a SqlValue);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => match *ty {
                Type::BOOL => v.to_sql(ty, out),
                _ if is_text(ty) => v.to_string().to_sql(ty, out),
                _ => wrong_type::<bool>(ty),
            },
            SqlValue::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::INT8 => v.to_sql(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                _ if is_text(ty) => v.to_string().to_sql(ty, out),
                _ => wrong_type::<i64>(ty),
            },
            SqlValue::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => v.to_sql(ty, out),
                _ if is_text(ty) => v.to_string().to_sql(ty, out),
                _ => wrong_type::<f64>(ty),
            },
            SqlValue::Text(v) => match *ty {
                Type::JSON | Type::JSONB => {
                    Json(serde_json::from_str::<serde_json::Value>(v)?).to_sql(ty, out)
                }
                _ if is_text(ty) => v.as_str().to_sql(ty, out),
                _ => wrong_type::<String>(ty),
            },
            SqlValue::Bytes(v) => match *ty {
                Type::BYTEA => v.as_slice().to_sql(ty, out),
                _ => wrong_type::<Vec<u8>>(ty),
            },
            SqlValue::Timestamp(v) => match *ty {
                Type::TIMESTAMPTZ => v.to_sql(ty, out),
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                Type::DATE => v.date_naive().to_sql(ty, out),
                _ if is_text(ty) => v.to_rfc3339().to_sql(ty, out),
                _ => wrong_type::<DateTime<Utc>>(ty),
            },
            SqlValue::Json(v) => match *ty {
                Type::JSON | Type::JSONB => Json(v).to_sql(ty, out),
                _ if is_text(ty) => v.to_string().to_sql(ty, out),
                _ => wrong_type::<serde_json::Value>(ty),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn wrong_type<T>(ty: &Type) -> Result<IsNull, BoxError> {
    Err(Box::new(WrongType::new::<T>(ty.clone())))
}

pub(crate) fn decode_row(row: &postgres::Row, columns: &Arc<[String]>) -> HarvestResult<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_cell(row, idx, column.type_()).map_err(|message| HarvestError::Decode {
            column: column.name().to_string(),
            message,
        })?;
        values.push(value);
    }
    Ok(Row::new(Arc::clone(columns), values))
}

fn decode_cell(row: &postgres::Row, idx: usize, ty: &Type) -> Result<SqlValue, String> {
    fn get<'a, T: postgres_types::FromSql<'a>>(
        row: &'a postgres::Row,
        idx: usize,
    ) -> Result<Option<T>, String> {
        row.try_get::<_, Option<T>>(idx).map_err(|e| e.to_string())
    }

    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.map(SqlValue::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| SqlValue::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| SqlValue::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(SqlValue::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| SqlValue::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| SqlValue::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(SqlValue::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map(SqlValue::Text)
        }
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(SqlValue::Bytes),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(SqlValue::Timestamp),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?
            .map(|v| SqlValue::Timestamp(Utc.from_utc_datetime(&v))),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(SqlValue::Json),
        _ => return Err(format!("unsupported column type {}", ty)),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
