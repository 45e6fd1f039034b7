//! Scalar value representation
//!
//! Every object in simulated memory bottoms out in scalar cells holding one
//! [`Value`]. Pointers hold simulated addresses, never host pointers, so a
//! wild pointer can at worst designate a nonexistent simulated object.

use std::fmt;

/// Opaque simulated address. Zero is the null pointer.
pub type Address = u64;

pub const NULL_ADDRESS: Address = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    Char(char),
    Bool(bool),
    Pointer(Address),
    /// The junk in an object nothing has written yet
    Uninit,
}

impl Value {
    pub fn is_uninit(&self) -> bool {
        matches!(self, Value::Uninit)
    }

    /// Integer view; uninit reads as an arbitrary fixed junk value
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(v) => *v,
            Value::Double(v) => *v as i64,
            Value::Char(c) => *c as i64,
            Value::Bool(b) => i64::from(*b),
            Value::Pointer(a) => *a as i64,
            Value::Uninit => JUNK_INT,
        }
    }

    pub fn as_double(&self) -> f64 {
        match self {
            Value::Double(v) => *v,
            Value::Uninit => JUNK_INT as f64,
            other => other.as_int() as f64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Double(v) => *v != 0.0,
            Value::Pointer(a) => *a != NULL_ADDRESS,
            other => other.as_int() != 0,
        }
    }

    pub fn as_address(&self) -> Address {
        match self {
            Value::Pointer(a) => *a,
            Value::Uninit => NULL_ADDRESS,
            other => other.as_int() as Address,
        }
    }
}

/// Deterministic stand-in for indeterminate contents; the accompanying
/// undefined-behavior event is what marks the read as meaningless.
const JUNK_INT: i64 = -555555555;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.0}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Char(c) => write!(f, "{c}"),
            Value::Bool(b) => write!(f, "{}", i32::from(*b)),
            Value::Pointer(a) => write!(f, "0x{a:x}"),
            Value::Uninit => write!(f, "<uninitialized>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_views() {
        assert_eq!(Value::Int(7).as_double(), 7.0);
        assert_eq!(Value::Char('A').as_int(), 65);
        assert!(Value::Pointer(16).as_bool());
        assert!(!Value::Pointer(NULL_ADDRESS).as_bool());
        assert!(Value::Uninit.is_uninit());
    }

    #[test]
    fn test_stream_formatting() {
        assert_eq!(Value::Bool(true).to_string(), "1");
        assert_eq!(Value::Double(3.0).to_string(), "3");
        assert_eq!(Value::Double(2.5).to_string(), "2.5");
    }
}
