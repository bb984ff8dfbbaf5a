//! Universal data value carried by meta nodes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

/// Identity of a shared container (object or array).
///
/// Two container handles have the same key iff they point at the same
/// allocation. Keys are only meaningful while some handle keeps the
/// container alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueKey(pub usize);

impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Data value mirrored by the meta graph.
///
/// - Scalars: Null, Bool, Int, Float, String
/// - Containers: Object, Array (shared handles, cloned by reference)
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Object(ObjectRef),
    Array(ArrayRef),
}

// ============================================================================
// Shared containers
// ============================================================================

/// Shared, interior-mutable object container.
#[derive(Clone, Default)]
pub struct ObjectRef(Arc<RwLock<BTreeMap<String, Value>>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    pub fn key(&self) -> ValueKey {
        ValueKey(Arc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Field value, `Null` when absent.
    pub fn get(&self, field: &str) -> Value {
        self.0.read().get(field).cloned().unwrap_or(Value::Null)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.read().contains_key(field)
    }

    pub fn insert(&self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.write().insert(field.into(), value)
    }

    pub fn remove(&self, field: &str) -> Option<Value> {
        self.0.write().remove(field)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Shallow copy of the current entries.
    pub fn entries(&self) -> BTreeMap<String, Value> {
        self.0.read().clone()
    }
}

/// Shared, interior-mutable array container.
#[derive(Clone, Default)]
pub struct ArrayRef(Arc<RwLock<Vec<Value>>>);

impl ArrayRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn key(&self) -> ValueKey {
        ValueKey(Arc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Item at `index`, `Null` when out of range.
    pub fn get(&self, index: usize) -> Value {
        self.0.read().get(index).cloned().unwrap_or(Value::Null)
    }

    /// Overwrite an existing slot. Returns false when `index` is out of range.
    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.0.write().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: Value) {
        self.0.write().push(value);
    }

    /// Remove and return the item at `index`, `None` when out of range.
    pub fn remove(&self, index: usize) -> Option<Value> {
        let mut items = self.0.write();
        (index < items.len()).then(|| items.remove(index))
    }

    /// Replace the whole content in place, keeping the container identity.
    pub fn replace(&self, items: Vec<Value>) {
        *self.0.write() = items;
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Shallow copy of the current items.
    pub fn items(&self) -> Vec<Value> {
        self.0.read().clone()
    }
}

// ============================================================================
// Type checking
// ============================================================================

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Object(_) => "OBJECT",
            Value::Array(_) => "ARRAY",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }
    pub fn is_object(&self) -> bool { matches!(self, Value::Object(_)) }
    pub fn is_array(&self) -> bool { matches!(self, Value::Array(_)) }
    pub fn is_container(&self) -> bool { self.is_object() || self.is_array() }

    /// Bool, number or string: the values a leaf commits into its parent.
    pub fn is_primitive(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_))
    }

    /// Identity of the container, if this is one.
    pub fn container_key(&self) -> Option<ValueKey> {
        match self {
            Value::Object(o) => Some(o.key()),
            Value::Array(a) => Some(a.key()),
            _ => None,
        }
    }

    /// Identity comparison for containers, equality for scalars.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(_) | Value::Array(_), _) => false,
            (_, Value::Object(_) | Value::Array(_)) => false,
            _ => self == other,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Array(_) => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Field of an object value; `Null` for anything else.
    pub fn field(&self, name: &str) -> Value {
        match self {
            Value::Object(o) => o.get(name),
            _ => Value::Null,
        }
    }

    /// Items of an array value; empty for anything else.
    pub fn items(&self) -> Vec<Value> {
        match self {
            Value::Array(a) => a.items(),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// JSON interop
// ============================================================================

impl Value {
    /// Deep copy from JSON. Every object and array becomes a fresh container.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(ArrayRef::from_vec(
                items.into_iter().map(Value::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Value::Object(ObjectRef::from_map(
                map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect(),
            )),
        }
    }

    /// Deep snapshot as JSON. Non-finite floats become `null`, and so does a
    /// container met again inside itself.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_within(&mut SmallVec::new())
    }

    fn to_json_within(&self, path: &mut SmallVec<[ValueKey; 8]>) -> serde_json::Value {
        let json = match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(a) => {
                if path.contains(&a.key()) {
                    return serde_json::Value::Null;
                }
                path.push(a.key());
                let items = a.items().iter().map(|v| v.to_json_within(path)).collect();
                serde_json::Value::Array(items)
            }
            Value::Object(o) => {
                if path.contains(&o.key()) {
                    return serde_json::Value::Null;
                }
                path.push(o.key());
                let entries = o.entries();
                let entries = entries.iter().map(|(k, v)| (k.clone(), v.to_json_within(path)));
                serde_json::Value::Object(entries.collect())
            }
        };
        if self.is_container() {
            path.pop();
        }
        json
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl From<ObjectRef> for Value { fn from(v: ObjectRef) -> Self { Value::Object(v) } }
impl From<ArrayRef> for Value { fn from(v: ArrayRef) -> Self { Value::Array(v) } }
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self { Value::from_json(v) }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(ArrayRef::from_vec(v.into_iter().map(Into::into).collect()))
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}

// ============================================================================
// Equality (deep)
// ============================================================================

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.eq_within(other, &mut SmallVec::new())
    }
}

impl Value {
    /// Deep equality. A pair of containers already being compared further up
    /// counts as equal, so cyclic data terminates.
    fn eq_within(&self, other: &Value, path: &mut SmallVec<[(ValueKey, ValueKey); 8]>) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                let pair = (a.key(), b.key());
                if a.ptr_eq(b) || path.contains(&pair) {
                    return true;
                }
                let (left, right) = (a.entries(), b.entries());
                path.push(pair);
                let equal = left.len() == right.len()
                    && left
                        .iter()
                        .zip(&right)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.eq_within(vb, path));
                path.pop();
                equal
            }
            (Value::Array(a), Value::Array(b)) => {
                let pair = (a.key(), b.key());
                if a.ptr_eq(b) || path.contains(&pair) {
                    return true;
                }
                let (left, right) = (a.items(), b.items());
                path.push(pair);
                let equal = left.len() == right.len()
                    && left.iter().zip(&right).all(|(va, vb)| va.eq_within(vb, path));
                path.pop();
                equal
            }
            _ => false,
        }
    }
}

// ============================================================================
// Display / Debug
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Object(_) | Value::Array(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Object(o) => write!(f, "Object@{}({:?})", o.key(), o.keys()),
            Value::Array(a) => write!(f, "Array@{}(len={})", a.key(), a.len()),
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef@{}", self.key())
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayRef@{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("hello"), Value::String("hello".into()));
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(3.5), Value::Float(3.5));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_container_identity() {
        let a = ObjectRef::new();
        let b = a.clone();
        let c = ObjectRef::new();
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert!(Value::Object(a.clone()).same(&Value::Object(b)));
        // Equal contents, different identity.
        assert_eq!(Value::Object(a.clone()), Value::Object(c.clone()));
        assert!(!Value::Object(a).same(&Value::Object(c)));
    }

    #[test]
    fn test_shared_mutation_is_visible() {
        let obj = ObjectRef::new();
        let outer = ObjectRef::new();
        outer.insert("inner", Value::Object(obj.clone()));
        obj.insert("x", Value::from(1));
        assert_eq!(outer.get("inner").field("x"), Value::Int(1));
    }

    #[test]
    fn test_json_round_trip() {
        let json = json!({"name": "Ada", "tags": ["a", "b"], "age": 3, "ratio": 0.5, "none": null});
        let value = Value::from_json(json.clone());
        assert_eq!(value.to_json(), json);
        assert_eq!(value.field("tags").items().len(), 2);
        assert_eq!(value.field("missing"), Value::Null);
    }

    #[test]
    fn test_primitive_classification() {
        assert!(Value::from("x").is_primitive());
        assert!(Value::from(0).is_primitive());
        assert!(!Value::Null.is_primitive());
        assert!(!Value::from_json(json!({})).is_primitive());
    }

    #[test]
    fn test_array_slots() {
        let arr = ArrayRef::from_vec(vec![Value::from(1), Value::from(2)]);
        assert!(arr.set(1, Value::from(5)));
        assert!(!arr.set(2, Value::from(9)));
        assert_eq!(arr.items(), vec![Value::Int(1), Value::Int(5)]);
        let key = arr.key();
        arr.replace(vec![]);
        assert_eq!(arr.key(), key);
        assert!(arr.is_empty());
    }

    #[test]
    fn test_cyclic_values_terminate() {
        let cyclic = || {
            let data = Value::from_json(json!({"name": "loop"}));
            data.as_object().unwrap().insert("me", data.clone());
            data
        };
        let (a, b) = (cyclic(), cyclic());

        assert_eq!(a.to_json(), json!({"me": null, "name": "loop"}));
        assert_eq!(a.to_string(), a.to_json().to_string());
        assert_eq!(a, b);

        b.as_object().unwrap().insert("name", Value::from("other"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_repeated_sibling_is_not_a_cycle() {
        let shared = Value::from_json(json!([1, 2]));
        let data = Value::from_json(json!({}));
        data.as_object().unwrap().insert("left", shared.clone());
        data.as_object().unwrap().insert("right", shared);
        assert_eq!(data.to_json(), json!({"left": [1, 2], "right": [1, 2]}));
    }
}
