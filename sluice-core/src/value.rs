use crate::{Error, Result};
use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};
use std::any;
use time::{Date, PrimitiveDateTime, Time};
use uuid::Uuid;

/// Dynamically typed value flowing in bind parameters and result rows.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Decimal(Decimal),
    Varchar(String),
    Blob(Box<[u8]>),
    Date(Date),
    Time(Time),
    Timestamp(PrimitiveDateTime),
    Uuid(Uuid),
    /// Payload of an expanding parameter, one entry per placeholder.
    List(Vec<Value>),
    /// Row value, the elements bind to the components of a tuple type.
    Tuple(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(..) => "Boolean",
            Value::Int64(..) => "Int64",
            Value::Float64(..) => "Float64",
            Value::Decimal(..) => "Decimal",
            Value::Varchar(..) => "Varchar",
            Value::Blob(..) => "Blob",
            Value::Date(..) => "Date",
            Value::Time(..) => "Time",
            Value::Timestamp(..) => "Timestamp",
            Value::Uuid(..) => "Uuid",
            Value::List(..) => "List",
            Value::Tuple(..) => "Tuple",
        }
    }
}

/// Declared type of a bind parameter or of a result column.
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    #[default]
    Null,
    Boolean,
    Integer,
    BigInteger,
    Float,
    Numeric {
        precision: u8,
        scale: u8,
    },
    String(Option<u32>),
    Text,
    Binary,
    Date,
    Time,
    DateTime,
    Uuid,
    Tuple(Vec<SqlType>),
}

/// Type family as understood by the driver, used to size input buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    Number,
    String,
    Binary,
    DateTime,
    Boolean,
}

/// Parameterless discriminant of [`SqlType`], keys the per type encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Null,
    Boolean,
    Integer,
    BigInteger,
    Float,
    Numeric,
    String,
    Text,
    Binary,
    Date,
    Time,
    DateTime,
    Uuid,
    Tuple,
}

impl SqlType {
    pub fn kind(&self) -> TypeKind {
        match self {
            SqlType::Null => TypeKind::Null,
            SqlType::Boolean => TypeKind::Boolean,
            SqlType::Integer => TypeKind::Integer,
            SqlType::BigInteger => TypeKind::BigInteger,
            SqlType::Float => TypeKind::Float,
            SqlType::Numeric { .. } => TypeKind::Numeric,
            SqlType::String(..) => TypeKind::String,
            SqlType::Text => TypeKind::Text,
            SqlType::Binary => TypeKind::Binary,
            SqlType::Date => TypeKind::Date,
            SqlType::Time => TypeKind::Time,
            SqlType::DateTime => TypeKind::DateTime,
            SqlType::Uuid => TypeKind::Uuid,
            SqlType::Tuple(..) => TypeKind::Tuple,
        }
    }
    pub fn db_type(&self) -> Option<DbType> {
        Some(match self {
            SqlType::Null | SqlType::Tuple(..) => return None,
            SqlType::Boolean => DbType::Boolean,
            SqlType::Integer | SqlType::BigInteger | SqlType::Float | SqlType::Numeric { .. } => {
                DbType::Number
            }
            SqlType::String(..) | SqlType::Text | SqlType::Uuid => DbType::String,
            SqlType::Binary => DbType::Binary,
            SqlType::Date | SqlType::Time | SqlType::DateTime => DbType::DateTime,
        })
    }
    pub fn tuple_types(&self) -> Option<&[SqlType]> {
        match self {
            SqlType::Tuple(types) => Some(types),
            _ => None,
        }
    }
}

/// Conversion between native Rust values and [`Value`].
///
/// `try_from_value` accepts the canonical variant and the representations a
/// backend without the native type stores it as (integers for booleans, text
/// for temporal values). Numeric conversions are range checked.
pub trait AsValue {
    fn as_value(self) -> Value;
    fn try_from_value(value: Value) -> Result<Self>
    where
        Self: Sized;
}

fn mismatch<T>(value: &Value) -> Error {
    Error::Other(anyhow::Error::msg(format!(
        "Cannot convert a {} value ({:?}) into {}",
        value.type_name(),
        value,
        any::type_name::<T>(),
    )))
}

impl<T: AsValue> From<T> for Value {
    fn from(value: T) -> Self {
        value.as_value()
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Varchar(value.into())
    }
}

macro_rules! impl_as_value_integer {
    ($($source:ty),+ $(,)?) => {
        $(
            impl AsValue for $source {
                fn as_value(self) -> Value {
                    Value::Int64(self as i64)
                }
                fn try_from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::Int64(v) => <$source>::try_from(v).map_err(|_| {
                            Error::Other(anyhow::Error::msg(format!(
                                "Value {v}: i64 is out of range for {}",
                                any::type_name::<Self>(),
                            )))
                        }),
                        Value::Boolean(v) => Ok(v as $source),
                        v => Err(mismatch::<Self>(&v)),
                    }
                }
            }
        )+
    };
}
impl_as_value_integer!(i8, i16, i32, i64, u8, u16, u32);

impl AsValue for bool {
    fn as_value(self) -> Value {
        Value::Boolean(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(v) => Ok(v),
            Value::Int64(v) => Ok(v != 0),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}

impl AsValue for f64 {
    fn as_value(self) -> Value {
        Value::Float64(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float64(v) => Ok(v),
            Value::Int64(v) => Ok(v as f64),
            Value::Decimal(v) => v.to_f64().ok_or_else(|| mismatch::<Self>(&Value::Decimal(v))),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}

impl AsValue for f32 {
    fn as_value(self) -> Value {
        Value::Float64(self as f64)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        f64::try_from_value(value).map(|v| v as f32)
    }
}

impl AsValue for Decimal {
    fn as_value(self) -> Value {
        Value::Decimal(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Decimal(v) => Ok(v),
            Value::Int64(v) => Ok(Decimal::from(v)),
            Value::Float64(v) => {
                Decimal::from_f64(v).ok_or_else(|| mismatch::<Self>(&Value::Float64(v)))
            }
            Value::Varchar(ref v) => v.parse().map_err(|_| mismatch::<Self>(&value)),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}

impl AsValue for String {
    fn as_value(self) -> Value {
        Value::Varchar(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Varchar(v) => Ok(v),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}

impl AsValue for Box<[u8]> {
    fn as_value(self) -> Value {
        Value::Blob(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(v) => Ok(v),
            Value::Varchar(v) => Ok(v.into_bytes().into_boxed_slice()),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}

impl AsValue for Date {
    fn as_value(self) -> Value {
        Value::Date(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Date(v) => Ok(v),
            Value::Timestamp(v) => Ok(v.date()),
            Value::Varchar(v) => crate::parse_date(&v),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}

impl AsValue for Time {
    fn as_value(self) -> Value {
        Value::Time(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Time(v) => Ok(v),
            Value::Varchar(v) => crate::parse_time(&v),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}

impl AsValue for PrimitiveDateTime {
    fn as_value(self) -> Value {
        Value::Timestamp(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::Date(v) => Ok(v.midnight()),
            Value::Varchar(v) => crate::parse_timestamp(&v),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}

impl AsValue for Uuid {
    fn as_value(self) -> Value {
        Value::Uuid(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(v) => Ok(v),
            Value::Varchar(ref v) => Uuid::parse_str(v).map_err(|_| mismatch::<Self>(&value)),
            Value::Blob(ref v) => Uuid::from_slice(v).map_err(|_| mismatch::<Self>(&value)),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}

impl<T: AsValue> AsValue for Option<T> {
    fn as_value(self) -> Value {
        match self {
            Some(v) => v.as_value(),
            None => Value::Null,
        }
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            v => T::try_from_value(v).map(Some),
        }
    }
}

impl<T: AsValue> AsValue for Vec<T> {
    fn as_value(self) -> Value {
        Value::List(self.into_iter().map(AsValue::as_value).collect())
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(v) => v.into_iter().map(T::try_from_value).collect(),
            v => Err(mismatch::<Self>(&v)),
        }
    }
}
