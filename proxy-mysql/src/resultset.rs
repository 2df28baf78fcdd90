// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Result-set model
//!
//! Rows carry [`Value`]s; the wire encoding (length-encoded strings, NULL
//! as 0xFB) happens in the connection writer.

use crate::constants::*;
use crate::types::MySqlType;
use crate::value::Value;

/// Column definition sent ahead of row data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub character_set: u16,
    pub column_length: u32,
    pub field_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl Field {
    pub fn new(name: impl Into<String>, value_type: MySqlType) -> Field {
        let name = name.into();
        let flags = if value_type.is_unsigned() {
            UNSIGNED_FLAG
        } else if value_type.is_binary() {
            BINARY_FLAG
        } else {
            0
        };
        Field {
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            org_name: name.clone(),
            name,
            character_set: 0x21,
            column_length: 255,
            field_type: value_type.wire_type(),
            flags,
            decimals: 0,
        }
    }

    /// The synthesized `?` parameter definition used in prepare responses.
    pub fn parameter() -> Field {
        Field::new("?", MySqlType::VarBinary)
    }
}

/// One complete result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(fields: Vec<Field>) -> ResultSet {
        ResultSet {
            fields,
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.fields.len());
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Outcome of executing one statement against the backends.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Ok {
        affected_rows: u64,
        last_insert_id: u64,
    },
    ResultSet(ResultSet),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_flags_follow_type() {
        assert_eq!(Field::new("n", MySqlType::Uint32).flags, UNSIGNED_FLAG);
        assert_eq!(Field::new("b", MySqlType::VarBinary).flags, BINARY_FLAG);
        assert_eq!(Field::new("s", MySqlType::VarChar).flags, 0);
    }

    #[test]
    fn test_result_set_accumulates_rows() {
        let mut rs = ResultSet::new(vec![
            Field::new("id", MySqlType::Int64),
            Field::new("name", MySqlType::VarChar),
        ]);
        rs.add_row(vec![Value::new_int64(1), Value::new_varchar("a")]);
        rs.add_row(vec![Value::new_int64(2), Value::new_varchar("b")]);
        assert_eq!(rs.row_count(), 2);
    }
}
