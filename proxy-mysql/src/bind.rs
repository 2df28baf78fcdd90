// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Bind variables
//!
//! A bind variable is either a scalar value or a list of values (for `IN`
//! expansion). The MySQL type travels with it so per-shard rebinding
//! preserves types.

use crate::types::MySqlType;
use crate::value::Value;
use proxy_common::{ProxyError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindVariable {
    bind_type: MySqlType,
    value: Vec<u8>,
    values: Vec<Value>,
}

impl BindVariable {
    pub fn null() -> BindVariable {
        BindVariable {
            bind_type: MySqlType::Null,
            value: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn from_value(v: Value) -> BindVariable {
        BindVariable {
            bind_type: v.value_type(),
            value: v.raw().to_vec(),
            values: Vec::new(),
        }
    }

    /// A `TypeTuple` bind variable holding the `IN` list elements.
    pub fn list(values: Vec<Value>) -> BindVariable {
        BindVariable {
            bind_type: MySqlType::Tuple,
            value: Vec::new(),
            values,
        }
    }

    #[inline]
    pub fn bind_type(&self) -> MySqlType {
        self.bind_type
    }

    #[inline]
    pub fn is_list(&self) -> bool {
        self.bind_type == MySqlType::Tuple
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.bind_type == MySqlType::Null
    }

    /// The contained list elements; empty for scalar binds.
    pub fn list_values(&self) -> &[Value] {
        &self.values
    }

    /// Recovers the scalar `Value`. Fails for list binds.
    pub fn to_value(&self) -> Result<Value> {
        if self.is_list() {
            return Err(ProxyError::IncompatibleCast);
        }
        Ok(Value::make_trusted(self.bind_type, self.value.clone()))
    }

    /// Rebinds this variable to a shard-local subset of its list.
    pub fn with_values(&self, values: Vec<Value>) -> BindVariable {
        BindVariable {
            bind_type: self.bind_type,
            value: self.value.clone(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let bv = BindVariable::from_value(Value::new_int64(9));
        assert!(!bv.is_list());
        assert_eq!(bv.to_value().unwrap(), Value::new_int64(9));
    }

    #[test]
    fn test_list_bind() {
        let bv = BindVariable::list(vec![Value::new_int64(1), Value::new_int64(2)]);
        assert!(bv.is_list());
        assert_eq!(bv.list_values().len(), 2);
        assert!(bv.to_value().is_err());

        let rebound = bv.with_values(vec![Value::new_int64(2)]);
        assert_eq!(rebound.list_values(), &[Value::new_int64(2)]);
        assert_eq!(rebound.bind_type(), MySqlType::Tuple);
    }

    #[test]
    fn test_clone_is_deep() {
        let original = BindVariable::list(vec![Value::new_varchar("a")]);
        let mut cloned = original.clone();
        cloned = cloned.with_values(vec![]);
        assert_eq!(original.list_values().len(), 1);
        assert_eq!(cloned.list_values().len(), 0);
    }
}
