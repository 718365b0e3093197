//! White/blacklist projection.
//!
//! A [`WbList`] narrows the fields and relations taking part in one
//! operation. Names are attribute names; a dotted name (`Owner.Name`)
//! addresses an attribute of a related entity and is handed down to that
//! relation with the prefix stripped.
//!
//! Keys needed to load or write the projected data are mandatory and can
//! never be projected away: primary keys, the time fields, the owner-side
//! key of every participating relation, and, on the related side, the
//! association key and polymorphic discriminator.

use relorm_core::{OrmError, OrmResult};

use crate::fields::Permission;
use crate::model::ModelDescriptor;
use crate::relations::Relation;

/// Whether the listed names are the only ones kept or the ones dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Keep only the listed names (plus mandatory keys).
    White,
    /// Drop the listed names (except mandatory keys).
    Black,
}

/// A whitelist or blacklist of attribute names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbList {
    /// The policy.
    pub kind: ListKind,
    /// The names, possibly dotted.
    pub names: Vec<String>,
}

impl WbList {
    /// Creates a whitelist.
    pub fn white<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ListKind::White,
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a blacklist.
    pub fn black<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ListKind::Black,
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    fn lists(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// The entries under `prefix.`, with the prefix stripped.
    fn nested(&self, prefix: &str) -> Vec<String> {
        self.names
            .iter()
            .filter_map(|n| n.strip_prefix(prefix)?.strip_prefix('.'))
            .map(ToString::to_string)
            .collect()
    }

    fn addresses(&self, relation: &str) -> bool {
        self.lists(relation) || !self.nested(relation).is_empty()
    }
}

/// The per-operation permissions of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// One permission per descriptor field.
    pub fields: Vec<Permission>,
    /// One permission per descriptor relation.
    pub relations: Vec<Permission>,
    /// The list after mandatory keys were removed from a blacklist; `None`
    /// when no list applies.
    pub list: Option<WbList>,
}

/// Resolves a list against a descriptor.
///
/// `extra_mandatory` names related-side keys the parent needs.
///
/// # Examples
///
/// ```ignore
/// let p = resolve(&car, Some(&WbList::white(["Owner.Name"])), &[])?;
/// ```
pub fn resolve(
    desc: &ModelDescriptor,
    list: Option<&WbList>,
    extra_mandatory: &[String],
) -> OrmResult<Projection> {
    let Some(list) = list else {
        return Ok(Projection {
            fields: desc.fields.iter().map(|f| f.permission).collect(),
            relations: desc.relations.iter().map(|r| r.permission).collect(),
            list: None,
        });
    };

    for name in &list.names {
        let head = name.split('.').next().unwrap_or_default();
        let known = if name.contains('.') {
            desc.relation(head).is_some()
        } else {
            desc.field(head).is_some() || desc.relation(head).is_some()
        };
        if !known {
            return Err(OrmError::UnknownAttribute {
                entity: desc.short_name.clone(),
                attribute: name.clone(),
            });
        }
    }

    let participates = |r: &Relation| match list.kind {
        ListKind::White => list.addresses(&r.name),
        ListKind::Black => !list.lists(&r.name),
    };

    let mut mandatory: Vec<&str> = desc.primary_keys.iter().map(String::as_str).collect();
    mandatory.extend(desc.time_fields.iter().map(String::as_str));
    mandatory.extend(extra_mandatory.iter().map(String::as_str));
    mandatory.extend(
        desc.relations
            .iter()
            .filter(|r| participates(r))
            .map(|r| r.fk.as_str()),
    );

    let fields = desc
        .fields
        .iter()
        .map(|f| {
            let keep = match list.kind {
                ListKind::White => list.lists(&f.name) || mandatory.contains(&f.name.as_str()),
                ListKind::Black => !list.lists(&f.name) || mandatory.contains(&f.name.as_str()),
            };
            if keep {
                f.permission
            } else {
                Permission::NONE
            }
        })
        .collect();

    let relations = desc
        .relations
        .iter()
        .map(|r| if participates(r) { r.permission } else { Permission::NONE })
        .collect();

    let list = match list.kind {
        ListKind::White => Some(list.clone()),
        ListKind::Black => {
            let names: Vec<String> = list
                .names
                .iter()
                .filter(|n| {
                    let dropped = mandatory.contains(&n.as_str());
                    if dropped {
                        tracing::debug!(name = %n, "mandatory key removed from blacklist");
                    }
                    !dropped
                })
                .cloned()
                .collect();
            (!names.is_empty()).then(|| WbList::black(names))
        }
    };

    Ok(Projection {
        fields,
        relations,
        list,
    })
}

/// The list and mandatory keys handed to a relation's child operation.
pub fn child_list(list: Option<&WbList>, relation: &Relation) -> (Option<WbList>, Vec<String>) {
    let mut extra = vec![relation.afk.clone()];
    if let Some(poly) = relation.kind.polymorphic() {
        extra.push(poly.type_field.clone());
    }

    let Some(list) = list else {
        return (None, extra);
    };
    if relation.self_ref {
        return (Some(list.clone()), extra);
    }
    let nested = list.nested(&relation.name);
    let child = match list.kind {
        ListKind::White if list.lists(&relation.name) => None,
        ListKind::White => Some(WbList::white(nested)),
        ListKind::Black if nested.is_empty() => None,
        ListKind::Black => Some(WbList::black(nested)),
    };
    (child, extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::introspect::Introspector;
    use crate::model::EntityType;
    use crate::testing::{car_schema, Car, Owner, Person};
    use relorm_core::Settings;
    use std::sync::Arc;

    fn desc_of(ty: EntityType) -> Arc<ModelDescriptor> {
        let settings = Settings::default();
        let cache = InMemoryCache::new();
        let db = car_schema();
        Introspector::new(&settings, &db, &cache).build(ty).unwrap()
    }

    fn readable(desc: &ModelDescriptor, p: &Projection) -> Vec<String> {
        desc.fields
            .iter()
            .zip(&p.fields)
            .filter(|(f, perm)| perm.read && f.in_db)
            .map(|(f, _)| f.name.clone())
            .collect()
    }

    #[test]
    fn test_no_list_keeps_declared() {
        let car = desc_of(EntityType::of::<Car>());
        let p = resolve(&car, None, &[]).unwrap();
        assert_eq!(readable(&car, &p), vec!["ID", "OwnerID", "Brand", "CreatedAt", "UpdatedAt"]);
        assert!(p.relations.iter().all(|r| r.read));
    }

    #[test]
    fn test_whitelist_dot_notation() {
        let car = desc_of(EntityType::of::<Car>());
        let list = WbList::white(["Owner.Name"]);
        let p = resolve(&car, Some(&list), &[]).unwrap();
        assert_eq!(readable(&car, &p), vec!["ID", "OwnerID", "CreatedAt", "UpdatedAt"]);
        let owner_idx = car.relation_index("Owner").unwrap();
        for (i, perm) in p.relations.iter().enumerate() {
            assert_eq!(perm.read, i == owner_idx);
        }

        let owner_rel = car.relation("Owner").unwrap();
        let (child, extra) = child_list(p.list.as_ref(), owner_rel);
        assert_eq!(child, Some(WbList::white(["Name"])));
        assert_eq!(extra, vec!["ID"]);

        let owner = desc_of(EntityType::of::<Owner>());
        let cp = resolve(&owner, child.as_ref(), &extra).unwrap();
        assert_eq!(readable(&owner, &cp), vec!["ID", "Name", "CreatedAt", "UpdatedAt"]);
        assert!(cp.relations.iter().all(|r| !r.read));
    }

    #[test]
    fn test_whitelist_plain_relation_loads_everything_below() {
        let car = desc_of(EntityType::of::<Car>());
        let list = WbList::white(["Brand", "Wheels"]);
        let p = resolve(&car, Some(&list), &[]).unwrap();
        assert_eq!(readable(&car, &p), vec!["ID", "Brand", "CreatedAt", "UpdatedAt"]);
        let wheels = car.relation("Wheels").unwrap();
        let (child, extra) = child_list(p.list.as_ref(), wheels);
        assert_eq!(child, None);
        assert_eq!(extra, vec!["CarID"]);
    }

    #[test]
    fn test_blacklist_drops_mandatory_entries() {
        let car = desc_of(EntityType::of::<Car>());
        let list = WbList::black(["ID", "OwnerID", "Brand"]);
        let p = resolve(&car, Some(&list), &[]).unwrap();
        assert_eq!(readable(&car, &p), vec!["ID", "OwnerID", "CreatedAt", "UpdatedAt"]);
        assert_eq!(p.list, Some(WbList::black(["Brand"])));

        let only_keys = WbList::black(["ID", "CreatedAt"]);
        assert_eq!(resolve(&car, Some(&only_keys), &[]).unwrap().list, None);
    }

    #[test]
    fn test_blacklist_relation_frees_its_key() {
        let car = desc_of(EntityType::of::<Car>());
        let list = WbList::black(["Owner", "OwnerID"]);
        let p = resolve(&car, Some(&list), &[]).unwrap();
        assert!(!readable(&car, &p).contains(&"OwnerID".to_string()));
        let idx = car.relation_index("Owner").unwrap();
        assert_eq!(p.relations[idx], Permission::NONE);
    }

    #[test]
    fn test_blacklist_nested() {
        let car = desc_of(EntityType::of::<Car>());
        let list = WbList::black(["Owner.Name"]);
        let p = resolve(&car, Some(&list), &[]).unwrap();
        let (child, _) = child_list(p.list.as_ref(), car.relation("Owner").unwrap());
        assert_eq!(child, Some(WbList::black(["Name"])));
        let (child, _) = child_list(p.list.as_ref(), car.relation("Wheels").unwrap());
        assert_eq!(child, None);
    }

    #[test]
    fn test_polymorphic_child_keys() {
        let car = desc_of(EntityType::of::<Car>());
        let (_, extra) = child_list(None, car.relation("Radio").unwrap());
        assert_eq!(extra, vec!["CarID", "CarType"]);
    }

    #[test]
    fn test_self_reference_inherits_list() {
        let person = desc_of(EntityType::of::<Person>());
        let list = WbList::white(["Name", "Parent"]);
        let p = resolve(&person, Some(&list), &[]).unwrap();
        let (child, _) = child_list(p.list.as_ref(), person.relation("Parent").unwrap());
        assert_eq!(child, Some(list));
    }

    #[test]
    fn test_unknown_name() {
        let car = desc_of(EntityType::of::<Car>());
        let err = resolve(&car, Some(&WbList::white(["Colour"])), &[]).unwrap_err();
        assert!(matches!(err, OrmError::UnknownAttribute { .. }));
        let err = resolve(&car, Some(&WbList::white(["Brand.Name"])), &[]).unwrap_err();
        assert!(matches!(err, OrmError::UnknownAttribute { .. }));
    }
}
