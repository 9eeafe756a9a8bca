//! 流引擎元组数据 (Stream tuple values)
//! Dynamically typed values delivered by the hosting stream engine

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// 动态类型值
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Blob(Vec<u8>),
    Array(Vec<Datum>),
    Map(BTreeMap<String, Datum>),
}

impl Datum {
    /// 类型名 (用于错误信息)
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Bool(_) => "bool",
            Datum::Int(_) => "int",
            Datum::Float(_) => "float",
            Datum::Str(_) => "string",
            Datum::Blob(_) => "blob",
            Datum::Array(_) => "array",
            Datum::Map(_) => "map",
        }
    }

    /// 从键值对构造 Map
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Datum)>,
    {
        Datum::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Datum::Int(v) => Ok(*v),
            other => Err(mismatch("int", other)),
        }
    }

    /// 宽松转换: 接受 int / 整数值的 float
    pub fn to_int(&self) -> Result<i64> {
        match self {
            Datum::Int(v) => Ok(*v),
            Datum::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
            other => Err(mismatch("int", other)),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Datum::Float(v) => Ok(*v),
            Datum::Int(v) => Ok(*v as f64),
            other => Err(mismatch("float", other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Datum::Bool(v) => Ok(*v),
            other => Err(mismatch("bool", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Datum::Str(v) => Ok(v),
            other => Err(mismatch("string", other)),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8]> {
        match self {
            Datum::Blob(v) => Ok(v),
            other => Err(mismatch("blob", other)),
        }
    }

    pub fn as_array(&self) -> Result<&[Datum]> {
        match self {
            Datum::Array(v) => Ok(v),
            other => Err(mismatch("array", other)),
        }
    }

    pub fn as_map(&self) -> Result<&BTreeMap<String, Datum>> {
        match self {
            Datum::Map(v) => Ok(v),
            other => Err(mismatch("map", other)),
        }
    }

    /// 按路径取值,路径用 `.` 分隔 (例如 `position.x`)
    pub fn get(&self, path: &str) -> Result<&Datum> {
        let mut cur = self;
        for key in path.split('.') {
            cur = cur
                .as_map()?
                .get(key)
                .ok_or_else(|| CoreError::format(format!("field '{}' is missing", path)))?;
        }
        Ok(cur)
    }
}

fn mismatch(expected: &str, actual: &Datum) -> CoreError {
    CoreError::format(format!(
        "expected {} but got {}",
        expected,
        actual.type_name()
    ))
}

/// 同类型聚合: 所有参数必须是同一类型,至少一个
pub fn type_checked_aggregate(items: Vec<Datum>) -> Result<Datum> {
    let first = items
        .first()
        .ok_or_else(|| CoreError::format("type_checked_aggregate takes at least one item"))?;
    let kind = std::mem::discriminant(first);
    if items.iter().any(|i| std::mem::discriminant(i) != kind) {
        return Err(CoreError::format(
            "type_checked_aggregate requires all items to be the same type",
        ));
    }
    Ok(Datum::Array(items))
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Str(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Str(v)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(v: Vec<u8>) -> Self {
        Datum::Blob(v)
    }
}

impl From<Vec<Datum>> for Datum {
    fn from(v: Vec<Datum>) -> Self {
        Datum::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_lookup() {
        let d = Datum::map([(
            "position",
            Datum::map([("x", Datum::Float(1.5)), ("y", Datum::Float(2.0))]),
        )]);
        assert_eq!(d.get("position.x").unwrap().as_float().unwrap(), 1.5);
        assert!(d.get("position.z").unwrap_err().is_format());
        assert!(d.get("position.x.y").unwrap_err().is_format());
    }

    #[test]
    fn test_accessor_mismatch() {
        assert!(Datum::Str("1".into()).as_int().is_err());
        assert_eq!(Datum::Float(3.0).to_int().unwrap(), 3);
        assert!(Datum::Float(3.5).to_int().is_err());
        assert!(Datum::Int(1).as_blob().is_err());
    }

    #[test]
    fn test_aggregate_same_type() {
        let a = type_checked_aggregate(vec![Datum::Int(1), Datum::Int(2), Datum::Int(3)]).unwrap();
        assert_eq!(a.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_aggregate_rejects_empty_and_mixed() {
        assert!(type_checked_aggregate(vec![]).is_err());
        assert!(type_checked_aggregate(vec![Datum::Int(1), Datum::from("test")]).is_err());
    }
}
