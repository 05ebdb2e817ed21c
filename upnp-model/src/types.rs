//! Built-in UPnP datatypes and typed values.

use std::fmt;
use std::str::FromStr;

use url::Url;
use uuid::Uuid;

use crate::error::InvalidValueError;

/// The built-in datatypes a state variable can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    Ui1,
    Ui2,
    Ui4,
    Ui8,
    I1,
    I2,
    I4,
    I8,
    Int,
    R4,
    R8,
    Number,
    Float,
    Fixed144,
    Char,
    String,
    Boolean,
    Uri,
    Uuid,
}

impl Datatype {
    /// Datatype for a descriptor name such as `ui4` or `boolean`.
    pub fn from_descriptor_name(name: &str) -> Option<Datatype> {
        let datatype = match name {
            "ui1" => Datatype::Ui1,
            "ui2" => Datatype::Ui2,
            "ui4" => Datatype::Ui4,
            "ui8" => Datatype::Ui8,
            "i1" => Datatype::I1,
            "i2" => Datatype::I2,
            "i4" => Datatype::I4,
            "i8" => Datatype::I8,
            "int" => Datatype::Int,
            "r4" => Datatype::R4,
            "r8" => Datatype::R8,
            "number" => Datatype::Number,
            "float" => Datatype::Float,
            "fixed.14.4" => Datatype::Fixed144,
            "char" => Datatype::Char,
            "string" => Datatype::String,
            "boolean" => Datatype::Boolean,
            "uri" => Datatype::Uri,
            "uuid" => Datatype::Uuid,
            _ => return None,
        };
        Some(datatype)
    }

    pub fn descriptor_name(&self) -> &'static str {
        match self {
            Datatype::Ui1 => "ui1",
            Datatype::Ui2 => "ui2",
            Datatype::Ui4 => "ui4",
            Datatype::Ui8 => "ui8",
            Datatype::I1 => "i1",
            Datatype::I2 => "i2",
            Datatype::I4 => "i4",
            Datatype::I8 => "i8",
            Datatype::Int => "int",
            Datatype::R4 => "r4",
            Datatype::R8 => "r8",
            Datatype::Number => "number",
            Datatype::Float => "float",
            Datatype::Fixed144 => "fixed.14.4",
            Datatype::Char => "char",
            Datatype::String => "string",
            Datatype::Boolean => "boolean",
            Datatype::Uri => "uri",
            Datatype::Uuid => "uuid",
        }
    }

    /// Integer types, the only ones eligible for minimum-delta moderation.
    pub fn is_numeric(&self) -> bool {
        self.integer_bounds().is_some()
    }

    /// Types whose values travel as text and are parsed from it on the way in.
    pub fn is_string_convertible(&self) -> bool {
        matches!(self, Datatype::Char | Datatype::Uri | Datatype::Uuid)
    }

    fn integer_bounds(&self) -> Option<(i128, i128)> {
        let bounds = match self {
            Datatype::Ui1 => (0, u8::MAX as i128),
            Datatype::Ui2 => (0, u16::MAX as i128),
            Datatype::Ui4 => (0, u32::MAX as i128),
            Datatype::Ui8 => (0, u64::MAX as i128),
            Datatype::I1 => (i8::MIN as i128, i8::MAX as i128),
            Datatype::I2 => (i16::MIN as i128, i16::MAX as i128),
            Datatype::I4 | Datatype::Int => (i32::MIN as i128, i32::MAX as i128),
            Datatype::I8 => (i64::MIN as i128, i64::MAX as i128),
            _ => return None,
        };
        Some(bounds)
    }

    /// Parse the string form of a value of this type.
    pub fn value_of(&self, s: &str) -> Result<Value, InvalidValueError> {
        let s = s.trim();
        if let Some((min, max)) = self.integer_bounds() {
            let parsed = s.parse::<i128>().map_err(|_| {
                InvalidValueError::new(format!("'{}' is not a valid {}", s, self.descriptor_name()))
            })?;
            if parsed < min || parsed > max {
                return Err(InvalidValueError::new(format!(
                    "{} is out of range for {}",
                    parsed,
                    self.descriptor_name()
                )));
            }
            return Ok(Value::from_integer(parsed, min >= 0));
        }
        match self {
            Datatype::R4 | Datatype::R8 | Datatype::Number | Datatype::Float | Datatype::Fixed144 => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| InvalidValueError::new(format!("'{}' is not a valid {}", s, self.descriptor_name()))),
            Datatype::Boolean => match s.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(Value::Boolean(true)),
                "0" | "false" | "no" => Ok(Value::Boolean(false)),
                _ => Err(InvalidValueError::new(format!("'{}' is not a valid boolean", s))),
            },
            Datatype::Char => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(InvalidValueError::new(format!("'{}' is not a single character", s))),
                }
            }
            Datatype::Uri => Url::parse(s)
                .map(Value::Uri)
                .map_err(|e| InvalidValueError::new(format!("'{}' is not a valid URI: {}", s, e))),
            Datatype::Uuid => Uuid::parse_str(s)
                .map(Value::Uuid)
                .map_err(|e| InvalidValueError::new(format!("'{}' is not a valid UUID: {}", s, e))),
            _ => Ok(Value::String(s.to_string())),
        }
    }

    /// Whether `value` is representable by this type.
    pub fn is_valid(&self, value: &Value) -> bool {
        if let Some((min, max)) = self.integer_bounds() {
            return match value.as_integer() {
                Some(n) => n >= min && n <= max,
                None => false,
            };
        }
        match (self, value) {
            (
                Datatype::R4 | Datatype::R8 | Datatype::Number | Datatype::Float | Datatype::Fixed144,
                Value::Float(_) | Value::Integer(_) | Value::Unsigned(_),
            ) => true,
            (Datatype::Boolean, Value::Boolean(_)) => true,
            (Datatype::Char, Value::Char(_)) => true,
            (Datatype::Uri, Value::Uri(_)) => true,
            (Datatype::Uuid, Value::Uuid(_)) => true,
            (Datatype::String, Value::String(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor_name())
    }
}

/// A typed value of a state variable or action argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Char(char),
    Uri(Url),
    Uuid(Uuid),
}

impl Value {
    fn from_integer(n: i128, unsigned: bool) -> Value {
        if unsigned {
            Value::Unsigned(n as u64)
        } else {
            Value::Integer(n as i64)
        }
    }

    /// Integer view of the value, if it is an integer.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(n) => Some(*n as i128),
            Value::Unsigned(n) => Some(*n as i128),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Boolean(b) => f.write_str(if *b { "1" } else { "0" }),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Unsigned(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Char(c) => write!(f, "{}", c),
            Value::Uri(u) => write!(f, "{}", u),
            Value::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Unsigned(n as u64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Unsigned(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<Url> for Value {
    fn from(u: Url) -> Self {
        Value::Uri(u)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

/// A `ui4` value, used for GENA event sequence numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnsignedIntegerFourBytes(u32);

impl UnsignedIntegerFourBytes {
    pub const MAX: u32 = u32::MAX;

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Increment by one. At the maximum the value wraps to 1 when
    /// `rollover_to_one` is set, otherwise to 0.
    pub fn increment(&mut self, rollover_to_one: bool) -> Self {
        self.0 = if self.0 == Self::MAX {
            if rollover_to_one {
                1
            } else {
                0
            }
        } else {
            self.0 + 1
        };
        *self
    }

    pub fn is_max(&self) -> bool {
        self.0 == Self::MAX
    }
}

impl From<u32> for UnsignedIntegerFourBytes {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl FromStr for UnsignedIntegerFourBytes {
    type Err = InvalidValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Some devices send negative sequence numbers, they are read as zero
        if s.starts_with('-') && s[1..].parse::<u64>().is_ok() {
            return Ok(Self(0));
        }
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| InvalidValueError::new(format!("'{}' is not a valid ui4", s)))
    }
}

impl fmt::Display for UnsignedIntegerFourBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
