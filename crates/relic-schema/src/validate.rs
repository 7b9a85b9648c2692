use crate::{
    MAX_ENTITY_NAME_LEN, MAX_FIELD_NAME_LEN, MAX_IDENTITY_FIELDS,
    builder::{EntityType, RawEntity, ResolvedField, ResolvedFieldKind},
    descriptor::{Field, FieldKind},
    err,
    error::ErrorList,
    types::{Cardinality, EntityId, FieldId},
};
use std::collections::BTreeMap;

// Check an identifier against naming rules shared by entities and fields.
fn validate_ident(errs: &mut ErrorList, kind: &str, name: &str, max_len: usize) {
    if name.is_empty() {
        err!(errs, "{kind} name must not be empty");
        return;
    }
    if name.len() > max_len {
        err!(errs, "{kind} name '{name}' exceeds {max_len} characters");
    }

    let mut chars = name.chars();
    let starts_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if !starts_ok || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        err!(
            errs,
            "{kind} name '{name}' must start with a letter and contain only ASCII letters, digits or underscores"
        );
    }
}

// Validate one entity's field declarations and collect the name map.
fn validate_fields(errs: &mut ErrorList, entity: &RawEntity) -> BTreeMap<String, FieldId> {
    let mut by_name = BTreeMap::new();

    for (index, field) in entity.fields.iter().enumerate() {
        validate_ident(errs, "field", &field.name, MAX_FIELD_NAME_LEN);

        if by_name
            .insert(field.name.clone(), FieldId(index))
            .is_some()
        {
            err!(
                errs,
                "entity '{0}' declares field '{1}' more than once across its fragments",
                entity.name,
                field.name
            );
        }

        match &field.kind {
            FieldKind::Attribute(attr) => {
                if attr.default.is_some() && attr.compute.is_some() {
                    err!(
                        errs,
                        "entity '{0}', field '{1}': computed fields cannot also declare a default",
                        entity.name,
                        field.name
                    );
                }
            }
            FieldKind::Relation(rel) => {
                if rel.required && rel.cardinality == Cardinality::Many {
                    err!(
                        errs,
                        "entity '{0}', field '{1}': 'required' applies only to many-to-one relations",
                        entity.name,
                        field.name
                    );
                }
            }
        }
    }

    by_name
}

// Validate the identity key declaration and resolve it to field ids.
fn validate_identity(
    errs: &mut ErrorList,
    entity: &RawEntity,
    by_name: &BTreeMap<String, FieldId>,
) -> Vec<FieldId> {
    let declared = match entity.identities.as_slice() {
        [] => {
            err!(errs, "entity '{0}' declares no identity key", entity.name);
            return Vec::new();
        }
        [one] => one,
        many => {
            err!(
                errs,
                "entity '{0}' declares its identity key in {1} fragments; exactly one fragment may declare it",
                entity.name,
                many.len()
            );
            &many[0]
        }
    };

    if declared.is_empty() || declared.len() > MAX_IDENTITY_FIELDS {
        err!(
            errs,
            "entity '{0}' identity key must name between 1 and {MAX_IDENTITY_FIELDS} fields",
            entity.name
        );
    }

    let mut resolved = Vec::new();
    for component in declared {
        if resolved
            .iter()
            .any(|id: &FieldId| entity.fields[id.0].name == *component)
        {
            err!(
                errs,
                "entity '{0}' identity key names '{1}' twice",
                entity.name,
                component
            );
            continue;
        }

        let Some(field_id) = by_name.get(component) else {
            err!(
                errs,
                "entity '{0}' identity key names unknown field '{1}'",
                entity.name,
                component
            );
            continue;
        };

        let field = &entity.fields[field_id.0];
        match &field.kind {
            FieldKind::Attribute(attr) if attr.compute.is_none() => resolved.push(*field_id),
            FieldKind::Attribute(_) => err!(
                errs,
                "entity '{0}' identity key names computed field '{1}'; identity components must be plain attributes",
                entity.name,
                component
            ),
            FieldKind::Relation(_) => err!(
                errs,
                "entity '{0}' identity key names relation field '{1}'; identity components must be plain attributes",
                entity.name,
                component
            ),
        }
    }

    resolved
}

// Resolve one relation field against the target entity, checking that the
// declared inverse exists and points back symmetrically.
fn resolve_relation(
    errs: &mut ErrorList,
    source: &RawEntity,
    source_id: EntityId,
    field: &Field,
    entity_ids: &BTreeMap<String, EntityId>,
    entities: &[RawEntity],
    field_maps: &[BTreeMap<String, FieldId>],
) -> Option<ResolvedFieldKind> {
    let FieldKind::Relation(rel) = &field.kind else {
        return None;
    };

    let Some(target_id) = entity_ids.get(&rel.target).copied() else {
        err!(
            errs,
            "entity '{0}', field '{1}': relation target '{2}' is not registered",
            source.name,
            field.name,
            rel.target
        );
        return None;
    };

    let mut inverse_id = None;
    if let Some(inverse_name) = &rel.inverse {
        let target = &entities[target_id.0];
        let Some(candidate) = field_maps[target_id.0].get(inverse_name).copied() else {
            err!(
                errs,
                "entity '{0}', field '{1}': inverse '{2}' does not exist on '{3}'",
                source.name,
                field.name,
                inverse_name,
                rel.target
            );
            return None;
        };

        match &target.fields[candidate.0].kind {
            FieldKind::Relation(back)
                if entity_ids.get(&back.target) == Some(&source_id)
                    && back.inverse.as_deref() == Some(field.name.as_str()) =>
            {
                inverse_id = Some(candidate);
            }
            FieldKind::Relation(_) => {
                err!(
                    errs,
                    "entity '{0}', field '{1}': inverse '{2}.{3}' does not point back; inverse declarations must be symmetric",
                    source.name,
                    field.name,
                    rel.target,
                    inverse_name
                );
                return None;
            }
            FieldKind::Attribute(_) => {
                err!(
                    errs,
                    "entity '{0}', field '{1}': inverse '{2}.{3}' is not a relation field",
                    source.name,
                    field.name,
                    rel.target,
                    inverse_name
                );
                return None;
            }
        }
    }

    Some(ResolvedFieldKind::Relation {
        target: target_id,
        cardinality: rel.cardinality,
        inverse: inverse_id,
        required: rel.required,
    })
}

/// Validate merged entity declarations and resolve them into dense-index
/// entity types. All violations are reported together; nothing resolves
/// unless everything does.
pub(crate) fn resolve_entities(raw: Vec<RawEntity>) -> Result<Vec<EntityType>, ErrorList> {
    let mut errs = ErrorList::new();

    // Phase 1: per-entity shape checks and name maps.
    let entity_ids: BTreeMap<String, EntityId> = raw
        .iter()
        .enumerate()
        .map(|(index, entity)| (entity.name.clone(), EntityId(index)))
        .collect();

    let mut field_maps = Vec::with_capacity(raw.len());
    let mut identities = Vec::with_capacity(raw.len());
    for entity in &raw {
        validate_ident(&mut errs, "entity", &entity.name, MAX_ENTITY_NAME_LEN);
        let by_name = validate_fields(&mut errs, entity);
        identities.push(validate_identity(&mut errs, entity, &by_name));
        field_maps.push(by_name);
    }

    // Phase 2: cross-entity relation resolution.
    let mut resolved_kinds: Vec<Vec<Option<ResolvedFieldKind>>> = Vec::with_capacity(raw.len());
    for (index, entity) in raw.iter().enumerate() {
        let source_id = EntityId(index);
        let kinds = entity
            .fields
            .iter()
            .map(|field| match &field.kind {
                FieldKind::Attribute(attr) => Some(ResolvedFieldKind::Attribute {
                    default: attr.default.clone(),
                    compute: attr.compute.clone(),
                }),
                FieldKind::Relation(_) => resolve_relation(
                    &mut errs,
                    entity,
                    source_id,
                    field,
                    &entity_ids,
                    &raw,
                    &field_maps,
                ),
            })
            .collect();
        resolved_kinds.push(kinds);
    }

    errs.result()?;

    // All checks passed; every kind resolved.
    let entities = raw
        .into_iter()
        .zip(resolved_kinds)
        .zip(identities)
        .zip(field_maps)
        .enumerate()
        .map(|(index, (((entity, kinds), identity), by_name))| EntityType {
            id: EntityId(index),
            name: entity.name,
            identity,
            fields: entity
                .fields
                .into_iter()
                .zip(kinds)
                .map(|(field, kind)| ResolvedField {
                    name: field.name,
                    kind: kind.expect("validated field must resolve"),
                })
                .collect(),
            by_name,
        })
        .collect();

    Ok(entities)
}

#[cfg(test)]
mod tests {
    use crate::{
        Error,
        builder::{EntityFragment, SchemaBuilder},
        descriptor::Field,
        value::Value,
    };

    fn build_err(builder: SchemaBuilder) -> String {
        let Error::Validation(errs) = builder.build().expect_err("schema should fail validation");
        errs.to_string()
    }

    #[test]
    fn missing_identity_is_rejected() {
        let err = build_err(
            SchemaBuilder::new()
                .fragment(EntityFragment::new("Thread").field(Field::attr("id"))),
        );
        assert!(err.contains("declares no identity key"));
    }

    #[test]
    fn duplicate_identity_declarations_are_rejected() {
        let err = build_err(
            SchemaBuilder::new()
                .fragment(
                    EntityFragment::new("Thread")
                        .identity(["id"])
                        .field(Field::attr("id")),
                )
                .fragment(EntityFragment::new("Thread").identity(["id"])),
        );
        assert!(err.contains("exactly one fragment may declare it"));
    }

    #[test]
    fn identity_must_name_plain_attributes() {
        let err = build_err(
            SchemaBuilder::new().fragment(
                EntityFragment::new("Thread")
                    .identity(["label"])
                    .field(Field::computed("label", |_| Value::Null)),
            ),
        );
        assert!(err.contains("names computed field 'label'"));
    }

    #[test]
    fn unknown_relation_target_is_rejected() {
        let err = build_err(
            SchemaBuilder::new().fragment(
                EntityFragment::new("Message")
                    .identity(["id"])
                    .field(Field::attr("id"))
                    .field(Field::one("thread", "Thread")),
            ),
        );
        assert!(err.contains("relation target 'Thread' is not registered"));
    }

    #[test]
    fn asymmetric_inverse_is_rejected() {
        // Message.thread claims Thread.messages as inverse, but
        // Thread.messages declares no inverse of its own.
        let err = build_err(
            SchemaBuilder::new()
                .fragment(
                    EntityFragment::new("Thread")
                        .identity(["id"])
                        .field(Field::attr("id"))
                        .field(Field::many("messages", "Message")),
                )
                .fragment(
                    EntityFragment::new("Message")
                        .identity(["id"])
                        .field(Field::attr("id"))
                        .field(Field::one("thread", "Thread").inverse("messages")),
                ),
        );
        assert!(err.contains("inverse declarations must be symmetric"));
    }

    #[test]
    fn inverse_must_be_a_relation() {
        let err = build_err(
            SchemaBuilder::new()
                .fragment(
                    EntityFragment::new("Thread")
                        .identity(["id"])
                        .field(Field::attr("id"))
                        .field(Field::attr("messages")),
                )
                .fragment(
                    EntityFragment::new("Message")
                        .identity(["id"])
                        .field(Field::attr("id"))
                        .field(Field::one("thread", "Thread").inverse("messages")),
                ),
        );
        assert!(err.contains("is not a relation field"));
    }

    #[test]
    fn required_on_collection_is_rejected() {
        let err = build_err(
            SchemaBuilder::new()
                .fragment(
                    EntityFragment::new("Thread")
                        .identity(["id"])
                        .field(Field::attr("id"))
                        .field(Field::many("messages", "Message").required()),
                )
                .fragment(
                    EntityFragment::new("Message")
                        .identity(["id"])
                        .field(Field::attr("id")),
                ),
        );
        assert!(err.contains("'required' applies only to many-to-one relations"));
    }

    #[test]
    fn duplicate_fields_across_fragments_are_rejected() {
        let err = build_err(
            SchemaBuilder::new()
                .fragment(
                    EntityFragment::new("Thread")
                        .identity(["id"])
                        .field(Field::attr("id"))
                        .field(Field::attr("name")),
                )
                .fragment(EntityFragment::new("Thread").field(Field::attr("name"))),
        );
        assert!(err.contains("more than once across its fragments"));
    }

    #[test]
    fn computed_default_conflict_is_rejected() {
        let err = build_err(
            SchemaBuilder::new().fragment(
                EntityFragment::new("Thread")
                    .identity(["id"])
                    .field(Field::attr("id"))
                    .field(Field::computed("label", |_| Value::Null).default("x")),
            ),
        );
        assert!(err.contains("cannot also declare a default"));
    }

    #[test]
    fn all_violations_report_together() {
        let Error::Validation(errs) = SchemaBuilder::new()
            .fragment(
                EntityFragment::new("Thread")
                    .field(Field::attr("1bad"))
                    .field(Field::one("owner", "Nowhere")),
            )
            .build()
            .expect_err("schema should fail validation");

        // Missing identity, bad field name, unknown target.
        assert!(errs.len() >= 3, "expected aggregated errors: {errs}");
    }
}
