use crate::{types::Cardinality, value::Value};
use std::{fmt, sync::Arc};

///
/// FieldReader
///
/// Read access to sibling fields of the record a compute function runs
/// against. Every read performed through this trait is dependency-tracked
/// by the runtime; relation fields read back as their target identities.
///

pub trait FieldReader {
    fn read(&self, field: &str) -> Value;
}

///
/// ComputeFn
///
/// Pure derivation over sibling fields. Re-evaluated lazily when a
/// tracked dependency changes; must not mutate anything.
///

pub type ComputeFn = Arc<dyn Fn(&dyn FieldReader) -> Value>;

///
/// Field
///
/// Declarative field descriptor contributed by a schema fragment.
/// Flags set here are checked at build time, not at construction, so
/// fragments stay cheap to assemble and every violation is reported
/// together.
///

#[derive(Clone)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    /// Declare a plain attribute field.
    #[must_use]
    pub fn attr(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Attribute(AttributeField {
                default: None,
                compute: None,
            }),
        }
    }

    /// Declare a computed attribute field. Computed fields are read-only
    /// from the outside.
    #[must_use]
    pub fn computed(
        name: impl Into<String>,
        compute: impl Fn(&dyn FieldReader) -> Value + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Attribute(AttributeField {
                default: None,
                compute: Some(Arc::new(compute)),
            }),
        }
    }

    /// Declare a many-to-one relation field.
    #[must_use]
    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::relation(name, target, Cardinality::One)
    }

    /// Declare an ordered collection relation field.
    #[must_use]
    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::relation(name, target, Cardinality::Many)
    }

    fn relation(name: impl Into<String>, target: impl Into<String>, c: Cardinality) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Relation(RelationField {
                target: target.into(),
                cardinality: c,
                inverse: None,
                required: false,
            }),
        }
    }

    /// Set the default value (attribute fields only).
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        if let FieldKind::Attribute(attr) = &mut self.kind {
            attr.default = Some(value.into());
        }

        self
    }

    /// Name the inverse field on the target type (relation fields only).
    #[must_use]
    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        if let FieldKind::Relation(rel) = &mut self.kind {
            rel.inverse = Some(inverse.into());
        }

        self
    }

    /// Mark a many-to-one relation as required. An insert that leaves it
    /// unresolved keeps the previous value and raises a warning event.
    #[must_use]
    pub fn required(mut self) -> Self {
        if let FieldKind::Relation(rel) = &mut self.kind {
            rel.required = true;
        }

        self
    }

    #[must_use]
    pub const fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation(_))
    }

    #[must_use]
    pub const fn is_computed(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Attribute(AttributeField {
                compute: Some(_),
                ..
            })
        )
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

///
/// FieldKind
///

#[derive(Clone)]
pub enum FieldKind {
    Attribute(AttributeField),
    Relation(RelationField),
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute(attr) => f
                .debug_struct("Attribute")
                .field("default", &attr.default)
                .field("computed", &attr.compute.is_some())
                .finish(),
            Self::Relation(rel) => rel.fmt(f),
        }
    }
}

///
/// AttributeField
///
/// `default` and `compute` are mutually exclusive; the build step
/// rejects descriptors declaring both.
///

#[derive(Clone)]
pub struct AttributeField {
    pub default: Option<Value>,
    pub compute: Option<ComputeFn>,
}

///
/// RelationField
///

#[derive(Clone, Debug)]
pub struct RelationField {
    pub target: String,
    pub cardinality: Cardinality,
    pub inverse: Option<String>,
    pub required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_builder_sets_default() {
        let field = Field::attr("name").default("unnamed");
        let FieldKind::Attribute(attr) = &field.kind else {
            panic!("attr should build an attribute field");
        };
        assert_eq!(attr.default, Some(Value::Text("unnamed".into())));
        assert!(!field.is_computed());
    }

    #[test]
    fn computed_builder_is_read_only_marker() {
        let field = Field::computed("len", |r| r.read("body"));
        assert!(field.is_computed());
        assert!(!field.is_relation());
    }

    #[test]
    fn relation_builder_sets_inverse_and_required() {
        let field = Field::one("thread", "Thread").inverse("messages").required();
        let FieldKind::Relation(rel) = &field.kind else {
            panic!("one should build a relation field");
        };
        assert_eq!(rel.target, "Thread");
        assert_eq!(rel.cardinality, Cardinality::One);
        assert_eq!(rel.inverse.as_deref(), Some("messages"));
        assert!(rel.required);
    }

    #[test]
    fn default_on_relation_is_ignored() {
        let field = Field::many("messages", "Message").default(1);
        let FieldKind::Relation(rel) = &field.kind else {
            panic!("many should build a relation field");
        };
        assert_eq!(rel.cardinality, Cardinality::Many);
    }
}
