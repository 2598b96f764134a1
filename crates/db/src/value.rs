use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::{Column, Decode, Postgres, Row, Type, TypeInfo};

/// Converts every cell of a row into a JSON value the model can read.
pub(crate) fn decode_row(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len()).map(|index| decode_cell(row, index)).collect()
}

pub(crate) fn column_names(columns: &[PgColumn]) -> Vec<String> {
    columns.iter().map(|column| column.name().to_string()).collect()
}

fn decode_cell(row: &PgRow, index: usize) -> Value {
    let type_name = row.columns()[index].type_info().name().to_string();

    let decoded = match type_name.as_str() {
        "BOOL" => cell(row, index, Value::Bool),
        "INT2" => cell(row, index, |value: i16| Value::from(value)),
        "INT4" => cell(row, index, |value: i32| Value::from(value)),
        "INT8" => cell(row, index, |value: i64| Value::from(value)),
        "FLOAT4" => cell(row, index, |value: f32| float(f64::from(value))),
        "FLOAT8" => cell(row, index, float),
        "NUMERIC" => cell(row, index, numeric),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => {
            cell(row, index, Value::String)
        }
        "UUID" => cell(row, index, |value: uuid::Uuid| Value::String(value.to_string())),
        "DATE" => cell(row, index, |value: NaiveDate| Value::String(value.to_string())),
        "TIME" => cell(row, index, |value: NaiveTime| {
            Value::String(value.format("%H:%M:%S").to_string())
        }),
        "TIMESTAMP" => cell(row, index, |value: NaiveDateTime| {
            Value::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        "TIMESTAMPTZ" => {
            cell(row, index, |value: DateTime<Utc>| Value::String(value.to_rfc3339()))
        }
        "JSON" | "JSONB" => cell(row, index, |value: Value| value),
        "INT4[]" => cell(row, index, |values: Vec<i32>| Value::from(values)),
        "INT8[]" => cell(row, index, |values: Vec<i64>| Value::from(values)),
        "TEXT[]" | "VARCHAR[]" => cell(row, index, |values: Vec<String>| Value::from(values)),
        _ => Ok(Value::String(format!("<{}>", type_name.to_ascii_lowercase()))),
    };

    decoded.unwrap_or_else(|error| {
        tracing::debug!(column = index, %type_name, %error, "cell could not be decoded");
        Value::String(format!("<undecodable {}>", type_name.to_ascii_lowercase()))
    })
}

fn cell<'r, T, F>(row: &'r PgRow, index: usize, convert: F) -> Result<Value, sqlx::Error>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
    F: FnOnce(T) -> Value,
{
    Ok(row.try_get::<Option<T>, _>(index)?.map(convert).unwrap_or(Value::Null))
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or_else(|| Value::String(value.to_string()))
}

/// Numerics become JSON numbers when they fit an f64, otherwise their exact
/// decimal text.
fn numeric(value: Decimal) -> Value {
    match value.to_f64() {
        Some(converted) if converted.is_finite() => float(converted),
        _ => Value::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    use super::{float, numeric};

    #[test]
    fn non_finite_floats_fall_back_to_text() {
        assert_eq!(float(1.5), json!(1.5));
        assert_eq!(float(f64::NAN), Value::String("NaN".to_string()));
    }

    #[test]
    fn numerics_become_json_numbers() {
        assert_eq!(numeric(Decimal::new(1999, 2)), json!(19.99));
        assert_eq!(numeric(Decimal::ZERO), json!(0.0));
    }
}
