//! Value Bridge: conversion between Lua values and [`ScriptValue`].

use std::collections::BTreeMap;

use mlua::{FromLua, IntoLua, Lua, Table, Value};
use thiserror::Error;

use crate::value::ScriptValue;

const MAX_DEPTH: usize = 64;

/// Largest integer magnitude an `f64` holds exactly.
const MAX_EXACT_INTEGER: i64 = 1 << 53;

#[derive(Debug, Error)]
pub(crate) enum BridgeError {
    #[error("{0} values cannot cross the sandbox boundary")]
    Unsupported(&'static str),

    #[error("table keys of type {0} cannot cross the sandbox boundary")]
    UnsupportedKey(&'static str),

    #[error("integer {0} cannot cross the sandbox boundary without losing precision")]
    InexactInteger(i64),

    #[error("tables nested deeper than {MAX_DEPTH} levels cannot cross the sandbox boundary")]
    TooDeep,

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

pub(crate) fn from_lua_value(value: Value, depth: usize) -> Result<ScriptValue, BridgeError> {
    match value {
        Value::Nil => Ok(ScriptValue::Nil),
        Value::Boolean(b) => Ok(ScriptValue::Bool(b)),
        Value::Integer(i) if i.unsigned_abs() > MAX_EXACT_INTEGER as u64 => {
            Err(BridgeError::InexactInteger(i))
        }
        Value::Integer(i) => Ok(ScriptValue::Number(i as f64)),
        Value::Number(n) => Ok(ScriptValue::Number(n)),
        Value::String(s) => Ok(ScriptValue::Str(String::from(s.to_string_lossy()))),
        Value::Table(table) => from_table(table, depth + 1),
        other => Err(BridgeError::Unsupported(other.type_name())),
    }
}

/// A table whose keys are exactly `1..=n` is a list; anything else is a map
/// with string keys.
fn from_table(table: Table, depth: usize) -> Result<ScriptValue, BridgeError> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::TooDeep);
    }

    let len = table.raw_len();
    let mut entries = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        entries.push(pair?);
    }

    let is_list = entries.len() == len
        && entries
            .iter()
            .all(|(key, _)| matches!(key, Value::Integer(i) if *i >= 1 && (*i as usize) <= len));

    if is_list {
        let mut indexed = Vec::with_capacity(len);
        for (key, value) in entries {
            if let Value::Integer(index) = key {
                indexed.push((index, from_lua_value(value, depth)?));
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        return Ok(ScriptValue::List(indexed.into_iter().map(|(_, v)| v).collect()));
    }

    let mut map = BTreeMap::new();
    for (key, value) in entries {
        let key = match key {
            Value::String(s) => String::from(s.to_string_lossy()),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            other => return Err(BridgeError::UnsupportedKey(other.type_name())),
        };
        map.insert(key, from_lua_value(value, depth)?);
    }
    Ok(ScriptValue::Map(map))
}

impl FromLua for ScriptValue {
    fn from_lua(value: Value, _lua: &Lua) -> mlua::Result<Self> {
        from_lua_value(value, 0).map_err(mlua::Error::external)
    }
}

impl IntoLua for ScriptValue {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        match self {
            ScriptValue::Nil => Ok(Value::Nil),
            ScriptValue::Bool(b) => Ok(Value::Boolean(b)),
            ScriptValue::Number(n) => Ok(match ScriptValue::Number(n).as_integer() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n),
            }),
            ScriptValue::Str(s) => lua.create_string(&s).map(Value::String),
            ScriptValue::List(items) => {
                let table = lua.create_table()?;
                for (i, item) in items.into_iter().enumerate() {
                    table.raw_set(i + 1, item)?;
                }
                Ok(Value::Table(table))
            }
            ScriptValue::Map(map) => {
                let table = lua.create_table()?;
                for (key, value) in map {
                    table.raw_set(key, value)?;
                }
                Ok(Value::Table(table))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(lua: &Lua, source: &str) -> Result<ScriptValue, BridgeError> {
        let value: Value = lua.load(source).eval().unwrap();
        from_lua_value(value, 0)
    }

    #[test]
    fn sequences_become_lists() {
        let lua = Lua::new();
        let value = roundtrip(&lua, "return {10, 'x', true}").unwrap();
        assert_eq!(
            value,
            ScriptValue::List(vec![
                ScriptValue::Number(10.0),
                ScriptValue::from("x"),
                ScriptValue::Bool(true),
            ])
        );
        assert_eq!(roundtrip(&lua, "return {}").unwrap(), ScriptValue::List(vec![]));
    }

    #[test]
    fn sparse_or_keyed_tables_become_maps() {
        let lua = Lua::new();
        let value = roundtrip(&lua, "return {[1] = 'a', [3] = 'c'}").unwrap();
        let ScriptValue::Map(map) = value else {
            panic!("expected map, got {value:?}")
        };
        assert_eq!(map.get("1"), Some(&ScriptValue::from("a")));
        assert_eq!(map.get("3"), Some(&ScriptValue::from("c")));

        let value = roundtrip(&lua, "return {name = 'n', nested = {ok = false}}").unwrap();
        assert_eq!(
            value.get("nested").and_then(|n| n.get("ok")),
            Some(&ScriptValue::Bool(false))
        );
    }

    #[test]
    fn functions_cannot_cross() {
        let lua = Lua::new();
        let err = roundtrip(&lua, "return {f = function() end}").unwrap_err();
        assert!(matches!(err, BridgeError::Unsupported("function")));
    }

    #[test]
    fn cycles_are_cut_off() {
        let lua = Lua::new();
        let err = roundtrip(&lua, "local t = {} t.self = t return t").unwrap_err();
        assert!(matches!(err, BridgeError::TooDeep));
    }

    #[test]
    fn large_integers_are_not_rounded() {
        let lua = Lua::new();
        assert_eq!(
            roundtrip(&lua, "return 9007199254740992").unwrap(),
            ScriptValue::Number(9_007_199_254_740_992.0)
        );
        assert!(matches!(
            roundtrip(&lua, "return 9007199254740993"),
            Err(BridgeError::InexactInteger(9_007_199_254_740_993))
        ));
        assert!(matches!(
            roundtrip(&lua, "return {math.mininteger}"),
            Err(BridgeError::InexactInteger(i64::MIN))
        ));
    }

    #[test]
    fn host_values_enter_lua_with_integer_subtype() {
        let lua = Lua::new();
        let mut map = BTreeMap::new();
        map.insert("status".to_string(), ScriptValue::Number(200.0));
        map.insert("ratio".to_string(), ScriptValue::Number(0.5));
        map.insert(
            "items".to_string(),
            ScriptValue::List(vec!["a".into(), "b".into()]),
        );
        lua.globals().set("v", ScriptValue::Map(map)).unwrap();

        let rendered: String = lua
            .load("return math.type(v.status) .. ' ' .. tostring(v.ratio) .. ' ' .. #v.items .. v.items[2]")
            .eval()
            .unwrap();
        assert_eq!(rendered, "integer 0.5 2b");
    }
}
