use crate::{AsValue, Error, Result, SqlType, TypeKind, Value};
use std::{collections::HashMap, fmt, sync::Arc};
use time::{Date, PrimitiveDateTime, Time, format_description::BorrowedFormatItem, macros::format_description};
use uuid::Uuid;

/// Encoder applied to a bind value before it reaches the driver.
pub type BindProcessor = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
/// Decoder applied to a value read back from the driver.
pub type ResultProcessor = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:6]");
const TIME_PARSE: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute][optional [:[second][optional [.[subsecond]]]]]");
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
);
const TIMESTAMP_PARSE: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day][first [ ][T]][hour]:[minute][optional [:[second][optional [.[subsecond]]]]]"
);

pub fn format_date(value: &Date) -> String {
    value.format(DATE_FORMAT).unwrap_or_default()
}
pub fn format_time(value: &Time) -> String {
    value.format(TIME_FORMAT).unwrap_or_default()
}
pub fn format_timestamp(value: &PrimitiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).unwrap_or_default()
}

fn parse_failure(kind: &str, value: &str, e: impl fmt::Display) -> Error {
    Error::Other(anyhow::Error::msg(format!(
        "Could not parse `{value}` as a {kind}: {e}"
    )))
}

pub fn parse_date(value: &str) -> Result<Date> {
    Date::parse(value, DATE_FORMAT).map_err(|e| parse_failure("date", value, e))
}
pub fn parse_time(value: &str) -> Result<Time> {
    Time::parse(value, TIME_PARSE).map_err(|e| parse_failure("time", value, e))
}
pub fn parse_timestamp(value: &str) -> Result<PrimitiveDateTime> {
    PrimitiveDateTime::parse(value, TIMESTAMP_PARSE).or_else(|e| {
        Date::parse(value, DATE_FORMAT)
            .map(Date::midnight)
            .map_err(|_| parse_failure("timestamp", value, e))
    })
}

/// Per type encoders and decoders of a dialect.
///
/// Built once when the dialect is constructed and never mutated afterwards,
/// dialects hand out a shared reference.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    bind: HashMap<TypeKind, BindProcessor>,
    result: HashMap<TypeKind, ResultProcessor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Encoders for a backend that stores temporal, decimal and uuid values as text.
    pub fn text_storage() -> Self {
        let text = |f: fn(Value) -> Result<Value>| -> BindProcessor { Arc::new(f) };
        Self::new()
            .with_bind(
                TypeKind::Date,
                text(|v| {
                    Ok(match v {
                        Value::Date(v) => Value::Varchar(format_date(&v)),
                        v => v,
                    })
                }),
            )
            .with_bind(
                TypeKind::Time,
                text(|v| {
                    Ok(match v {
                        Value::Time(v) => Value::Varchar(format_time(&v)),
                        v => v,
                    })
                }),
            )
            .with_bind(
                TypeKind::DateTime,
                text(|v| {
                    Ok(match v {
                        Value::Timestamp(v) => Value::Varchar(format_timestamp(&v)),
                        Value::Date(v) => Value::Varchar(format_timestamp(&v.midnight())),
                        v => v,
                    })
                }),
            )
            .with_bind(
                TypeKind::Numeric,
                text(|v| {
                    Ok(match v {
                        Value::Decimal(v) => Value::Varchar(v.to_string()),
                        v => v,
                    })
                }),
            )
            .with_bind(
                TypeKind::Uuid,
                text(|v| {
                    Ok(match v {
                        Value::Uuid(v) => Value::Varchar(v.hyphenated().to_string()),
                        v => v,
                    })
                }),
            )
            .with_result(TypeKind::Date, Arc::new(decode::<Date>))
            .with_result(TypeKind::Time, Arc::new(decode::<Time>))
            .with_result(TypeKind::DateTime, Arc::new(decode::<PrimitiveDateTime>))
            .with_result(TypeKind::Numeric, Arc::new(decode::<rust_decimal::Decimal>))
            .with_result(TypeKind::Uuid, Arc::new(decode::<Uuid>))
    }

    /// Booleans travel as integers 0 and 1.
    pub fn with_integer_booleans(self) -> Self {
        self.with_bind(
            TypeKind::Boolean,
            Arc::new(|v: Value| {
                Ok(match v {
                    Value::Boolean(v) => Value::Int64(v as i64),
                    v => v,
                })
            }),
        )
        .with_result(TypeKind::Boolean, Arc::new(decode::<bool>))
    }

    pub fn with_bind(mut self, kind: TypeKind, processor: BindProcessor) -> Self {
        self.bind.insert(kind, processor);
        self
    }

    pub fn with_result(mut self, kind: TypeKind, processor: ResultProcessor) -> Self {
        self.result.insert(kind, processor);
        self
    }

    pub fn bind_processor(&self, ty: &SqlType) -> Option<BindProcessor> {
        self.bind.get(&ty.kind()).cloned()
    }

    pub fn result_processor(&self, ty: &SqlType) -> Option<ResultProcessor> {
        self.result.get(&ty.kind()).cloned()
    }

    /// One encoder per component of a tuple type, empty for any other type.
    pub fn tuple_bind_processors(&self, ty: &SqlType) -> Vec<Option<BindProcessor>> {
        ty.tuple_types()
            .map(|types| types.iter().map(|t| self.bind_processor(t)).collect())
            .unwrap_or_default()
    }

    /// Applies the result decoder of `ty` when one is registered.
    pub fn process_result(&self, ty: &SqlType, value: Value) -> Result<Value> {
        match (value.is_null(), self.result_processor(ty)) {
            (false, Some(processor)) => processor(value),
            _ => Ok(value),
        }
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("bind", &self.bind.keys().collect::<Vec<_>>())
            .field("result", &self.result.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn decode<T: AsValue>(value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        v => T::try_from_value(v).map(AsValue::as_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime, time};

    #[test]
    fn temporal_text_round_trip() {
        let registry = TypeRegistry::text_storage();
        let encode = registry.bind_processor(&SqlType::DateTime).unwrap();
        let encoded = encode(Value::Timestamp(datetime!(2024-02-29 13:45:01.5))).unwrap();
        assert_eq!(
            encoded,
            Value::Varchar("2024-02-29 13:45:01.500000".into())
        );
        let decoded = registry.process_result(&SqlType::DateTime, encoded).unwrap();
        assert_eq!(decoded, Value::Timestamp(datetime!(2024-02-29 13:45:01.5)));
        assert_eq!(parse_date("1999-12-31").unwrap(), date!(1999 - 12 - 31));
        assert_eq!(parse_time("08:30").unwrap(), time!(8:30));
        assert_eq!(
            parse_timestamp("2001-01-01").unwrap(),
            datetime!(2001-01-01 0:00)
        );
    }

    #[test]
    fn integer_booleans() {
        let registry = TypeRegistry::new().with_integer_booleans();
        let encode = registry.bind_processor(&SqlType::Boolean).unwrap();
        assert_eq!(encode(Value::Boolean(true)).unwrap(), Value::Int64(1));
        assert_eq!(
            registry
                .process_result(&SqlType::Boolean, Value::Int64(0))
                .unwrap(),
            Value::Boolean(false)
        );
        assert!(registry.bind_processor(&SqlType::Integer).is_none());
    }

    #[test]
    fn tuple_components() {
        let registry = TypeRegistry::text_storage();
        let processors =
            registry.tuple_bind_processors(&SqlType::Tuple(vec![SqlType::Integer, SqlType::Date]));
        assert_eq!(processors.len(), 2);
        assert!(processors[0].is_none());
        assert!(processors[1].is_some());
    }
}
