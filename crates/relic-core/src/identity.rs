use relic_schema::value::Value;
use std::fmt;

///
/// Identity
///
/// Normalized identity key of one record: the values of the entity's
/// identity fields, in declared order. Components are always scalar;
/// extraction rejects lists and maps.
///

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Identity(Vec<Value>);

impl Identity {
    /// Build a composite identity from ordered components.
    #[must_use]
    pub const fn new(components: Vec<Value>) -> Self {
        Self(components)
    }

    #[must_use]
    pub fn components(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode as a payload value: a single component collapses to the
    /// bare scalar, composites encode as a list.
    #[must_use]
    pub fn as_value(&self) -> Value {
        match self.0.as_slice() {
            [single] => single.clone(),
            many => Value::List(many.to_vec()),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{single:?}"),
            many => {
                write!(f, "(")?;
                for (index, component) in many.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{component:?}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<Value> for Identity {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

impl From<i64> for Identity {
    fn from(n: i64) -> Self {
        Self(vec![Value::Int(n)])
    }
}

impl From<i32> for Identity {
    fn from(n: i32) -> Self {
        Self(vec![Value::Int(n.into())])
    }
}

impl From<u64> for Identity {
    fn from(n: u64) -> Self {
        Self(vec![Value::uint(n)])
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(vec![Value::Text(s.to_string())])
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(vec![Value::Text(s)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_representations_collapse() {
        assert_eq!(Identity::from(3i64), Identity::from(3u64));
    }

    #[test]
    fn single_component_encodes_as_bare_scalar() {
        let identity = Identity::from("general");
        assert_eq!(identity.as_value(), Value::Text("general".into()));
    }

    #[test]
    fn composite_encodes_as_list() {
        let identity = Identity::new(vec![Value::Int(1), Value::Text("a".into())]);
        assert_eq!(
            identity.as_value(),
            Value::List(vec![Value::Int(1), Value::Text("a".into())])
        );
    }

    #[test]
    fn ordering_is_componentwise() {
        let a = Identity::new(vec![Value::Int(1), Value::Int(2)]);
        let b = Identity::new(vec![Value::Int(1), Value::Int(3)]);
        assert!(a < b);
    }
}
