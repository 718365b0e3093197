//! Descriptor construction.
//!
//! The [`Introspector`] turns an entity declaration into a frozen
//! [`ModelDescriptor`] the first time the entity is used:
//!
//! 1. flatten the declaration and parse each attribute's tag,
//! 2. merge the table's column metadata into the scalar fields,
//! 3. resolve every relation (kind, key pair, join table, discriminator),
//!    initializing related entities recursively,
//! 4. compose the validation rules and store the descriptor in the cache.
//!
//! Recursion keeps a stack of the entities being built. A related entity
//! already on the stack is resolved against its partially built fields and
//! not descended into, which is how cyclic and self-referencing entity
//! graphs terminate. Nothing is cached until an entity's relations have all
//! been resolved.

use std::sync::Arc;

use relorm_core::utils::text::{snake_case, snake_plural};
use relorm_core::{OrmError, OrmResult, Settings};

use crate::cache::Cache;
use crate::executor::{ColumnInfo, DbExecutor, ForeignKeyInfo};
use crate::fields::{Field, Permission, SqlKind};
use crate::model::{AttrKind, EntityType, ModelDescriptor, Shape, TIME_FIELDS};
use crate::relations::{JoinTable, Polymorphic, Relation, RelationKind};
use crate::tags::{FkTag, OrmTag};
use crate::validators::{compose, parse_relation_rules};
use crate::value::ValueType;

/// Reads a descriptor from the cache.
pub(crate) fn cached(cache: &dyn Cache, entity: EntityType) -> OrmResult<Option<Arc<ModelDescriptor>>> {
    Ok(cache
        .get(entity.name())?
        .and_then(|v| v.downcast::<ModelDescriptor>().ok()))
}

/// The part of a model needed to resolve keys against it.
#[derive(Debug, Clone)]
struct ModelView {
    entity: EntityType,
    table: String,
    database: String,
    fields: Vec<Field>,
}

impl ModelView {
    fn from_descriptor(desc: &ModelDescriptor) -> Self {
        Self {
            entity: desc.entity,
            table: desc.table.clone(),
            database: desc.database.clone(),
            fields: desc.fields.clone(),
        }
    }

    fn short(&self) -> &'static str {
        self.entity.short_name()
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn field_by_column(&self, column: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.in_db && f.column == column)
    }

    fn first_pk(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.primary_key)
    }

    fn require(&self, attribute: &str) -> OrmResult<&Field> {
        self.field(attribute)
            .ok_or_else(|| OrmError::AttributeNotFound {
                entity: self.short().to_string(),
                attribute: attribute.to_string(),
            })
    }

    fn pk_name(&self) -> String {
        self.first_pk().map(|f| f.name.clone()).unwrap_or_default()
    }
}

/// The relation kind named by a `relation` tag or inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KindTag {
    HasOne,
    BelongsTo,
    HasMany,
    ManyToMany,
}

impl KindTag {
    fn parse(raw: &str) -> OrmResult<Self> {
        match raw {
            "hasOne" => Ok(Self::HasOne),
            "belongsTo" => Ok(Self::BelongsTo),
            "hasMany" => Ok(Self::HasMany),
            "manyToMany" => Ok(Self::ManyToMany),
            other => Err(OrmError::UnknownRelationTag(other.to_string())),
        }
    }
}

/// One relation attribute awaiting resolution.
struct PendingRelation {
    name: String,
    target: EntityType,
    shape: Shape,
    tag: OrmTag,
}

/// Builds model descriptors.
pub(crate) struct Introspector<'a> {
    settings: &'a Settings,
    db: &'a dyn DbExecutor,
    cache: &'a dyn Cache,
    stack: Vec<ModelView>,
}

impl<'a> Introspector<'a> {
    pub(crate) fn new(settings: &'a Settings, db: &'a dyn DbExecutor, cache: &'a dyn Cache) -> Self {
        Self {
            settings,
            db,
            cache,
            stack: Vec::new(),
        }
    }

    /// Returns the cached descriptor of `entity`, building it first if needed.
    pub(crate) fn build(&mut self, entity: EntityType) -> OrmResult<Arc<ModelDescriptor>> {
        if let Some(desc) = cached(self.cache, entity)? {
            return Ok(desc);
        }
        let span = tracing::debug_span!("introspect", model = entity.name());
        let _guard = span.enter();

        let decl = entity.declare();
        let table = decl
            .table
            .clone()
            .unwrap_or_else(|| snake_plural(entity.short_name()));
        let database = decl
            .database
            .clone()
            .unwrap_or_else(|| self.settings.default_database.clone());
        let strategy = decl
            .strategy
            .clone()
            .unwrap_or_else(|| self.settings.default_strategy.clone());

        let columns = self.db.describe(&database, &table)?;
        tracing::debug!(table = %table, columns = columns.len(), "described table");

        let mut fields = Vec::new();
        let mut pending = Vec::new();
        for attr in decl.flatten() {
            if !attr.exported {
                continue;
            }
            let tag = OrmTag::parse(&attr.name, &attr.tag)?;
            if tag.skip {
                continue;
            }
            match attr.kind {
                AttrKind::Scalar {
                    value_type,
                    nullable,
                } => fields.push(build_field(&attr.name, value_type, nullable, &tag, &columns)),
                AttrKind::Relation { target, shape } => pending.push(PendingRelation {
                    name: attr.name,
                    target,
                    shape,
                    tag,
                }),
                AttrKind::Embedded(_) | AttrKind::BaseModel => {}
            }
        }

        check_unique_columns(&fields)?;
        let primary_keys: Vec<String> = fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.clone())
            .collect();
        if primary_keys.is_empty() {
            return Err(OrmError::NoPrimaryKey(table));
        }
        let time_fields: Vec<String> = TIME_FIELDS
            .iter()
            .filter(|t| fields.iter().any(|f| f.name == **t && f.in_db))
            .map(ToString::to_string)
            .collect();

        let view = ModelView {
            entity,
            table,
            database,
            fields,
        };
        self.stack.push(view.clone());
        let resolved = self.build_relations(&view, pending);
        self.stack.pop();
        let relations = resolved?;

        let mut fields = view.fields;
        for field in &mut fields {
            let belongs_to_fk = relations
                .iter()
                .any(|r| r.kind.is_belongs_to() && r.fk == field.name);
            field.rules = compose(field, belongs_to_fk)?;
        }

        let desc = Arc::new(ModelDescriptor {
            name: entity.name().to_string(),
            short_name: entity.short_name().to_string(),
            entity,
            table: view.table,
            database: view.database,
            strategy,
            fields,
            relations,
            primary_keys,
            time_fields,
            hooks: decl.hooks,
        });
        self.cache
            .set(entity.name(), desc.clone(), self.settings.descriptor_ttl())?;
        tracing::info!(
            model = %desc.name,
            table = %desc.table,
            fields = desc.fields.len(),
            relations = desc.relations.len(),
            "model descriptor built"
        );
        Ok(desc)
    }

    fn build_relations(
        &mut self,
        owner: &ModelView,
        pending: Vec<PendingRelation>,
    ) -> OrmResult<Vec<Relation>> {
        pending
            .into_iter()
            .map(|p| self.relation(owner, p))
            .collect()
    }

    /// Returns the fields of a related entity, building it unless it is
    /// already being built further up the stack.
    fn view_of(&mut self, target: EntityType) -> OrmResult<ModelView> {
        if let Some(view) = self.stack.iter().find(|v| v.entity == target) {
            tracing::debug!(model = target.name(), "related model is being built; not descending");
            return Ok(view.clone());
        }
        let desc = self.build(target)?;
        Ok(ModelView::from_descriptor(&desc))
    }

    fn relation(&mut self, owner: &ModelView, p: PendingRelation) -> OrmResult<Relation> {
        let related = self.view_of(p.target)?;
        let self_ref = p.target == owner.entity;

        let kind = match p.tag.relation.as_deref() {
            Some(raw) => KindTag::parse(raw)?,
            None => self.infer_kind(owner, &related, &p, self_ref)?,
        };
        if p.tag.polymorphic.is_some() && matches!(kind, KindTag::BelongsTo | KindTag::ManyToMany) {
            return Err(OrmError::UnsupportedPolymorphic {
                entity: owner.short().to_string(),
                relation: p.name,
            });
        }

        let (kind, fk, afk) = match kind {
            KindTag::BelongsTo => {
                let (fk, afk) = self.belongs_to_keys(owner, &related, &p)?;
                (RelationKind::BelongsTo, fk, afk)
            }
            KindTag::HasOne | KindTag::HasMany => {
                let (fk, afk, polymorphic) = self.has_keys(owner, &related, &p)?;
                let kind = if kind == KindTag::HasOne {
                    RelationKind::HasOne { polymorphic }
                } else {
                    RelationKind::HasMany { polymorphic }
                };
                (kind, fk, afk)
            }
            KindTag::ManyToMany => {
                let (fk, afk, join) = self.many_to_many_keys(owner, &related, &p, self_ref)?;
                (RelationKind::ManyToMany { join }, fk, afk)
            }
        };

        let fk_column = owner.require(&fk)?.column.clone();
        let afk_column = related.require(&afk)?.column.clone();
        let rules = parse_relation_rules(&p.name, p.tag.validate.as_deref().unwrap_or_default())?;
        tracing::debug!(
            owner = owner.short(),
            relation = %p.name,
            kind = kind.tag(),
            fk = %fk,
            afk = %afk,
            "relation resolved"
        );

        Ok(Relation {
            name: p.name,
            kind,
            target: p.target,
            shape: p.shape,
            fk,
            fk_column,
            afk,
            afk_column,
            self_ref,
            permission: p.tag.permission.unwrap_or(Permission::ALL),
            rules,
        })
    }

    fn infer_kind(
        &self,
        owner: &ModelView,
        related: &ModelView,
        p: &PendingRelation,
        self_ref: bool,
    ) -> OrmResult<KindTag> {
        if p.tag.polymorphic.is_some() {
            return Ok(if p.shape.is_many() {
                KindTag::HasMany
            } else {
                KindTag::HasOne
            });
        }
        if p.shape.is_many() {
            let join = p
                .tag
                .join_table
                .clone()
                .unwrap_or_else(|| default_join_table(owner, related));
            return Ok(if self.db.table_exists(&owner.database, &join)? {
                KindTag::ManyToMany
            } else {
                KindTag::HasMany
            });
        }

        // A self reference always matches its own foreign key in both
        // directions; the `<Attr>ID` attribute on the owner decides.
        if self_ref && owner.field(&format!("{}ID", p.name)).is_some() {
            return Ok(KindTag::BelongsTo);
        }

        let related_fks = self.db.foreign_keys(&related.database, &related.table)?;
        if related_fks.iter().any(|fk| fk.referenced_table == owner.table) {
            return Ok(KindTag::HasOne);
        }
        let owner_fks = self.db.foreign_keys(&owner.database, &owner.table)?;
        if owner_fks.iter().any(|fk| fk.referenced_table == related.table) {
            return Ok(KindTag::BelongsTo);
        }

        if belongs_to_convention(owner, related, &p.name).is_some() {
            return Ok(KindTag::BelongsTo);
        }
        if related.field(&format!("{}{}", owner.short(), owner.pk_name())).is_some() {
            return Ok(KindTag::HasOne);
        }
        Err(OrmError::ForeignKeyNotFound {
            entity: owner.short().to_string(),
            relation: p.name.clone(),
        })
    }

    fn belongs_to_keys(
        &self,
        owner: &ModelView,
        related: &ModelView,
        p: &PendingRelation,
    ) -> OrmResult<(String, String)> {
        let not_found = || OrmError::ForeignKeyNotFound {
            entity: owner.short().to_string(),
            relation: p.name.clone(),
        };
        match &p.tag.fk {
            Some(FkTag::Short(x)) => return Ok((x.clone(), related.pk_name())),
            Some(FkTag::Long {
                field,
                association_field,
            }) => {
                let fk = match field {
                    Some(f) => f.clone(),
                    None => belongs_to_convention(owner, related, &p.name).ok_or_else(not_found)?,
                };
                let afk = association_field.clone().unwrap_or_else(|| related.pk_name());
                return Ok((fk, afk));
            }
            None => {}
        }

        let owner_fks = self.db.foreign_keys(&owner.database, &owner.table)?;
        let preferred = format!("{}_id", snake_case(&p.name));
        if let Some(fk) = pick_fk(&owner_fks, &related.table, &preferred) {
            let fk_field = field_for_column(owner, &fk.column)?;
            let afk_field = field_for_column(related, &fk.referenced_column)?;
            return Ok((fk_field, afk_field));
        }

        let fk = belongs_to_convention(owner, related, &p.name).ok_or_else(not_found)?;
        Ok((fk, related.pk_name()))
    }

    fn has_keys(
        &self,
        owner: &ModelView,
        related: &ModelView,
        p: &PendingRelation,
    ) -> OrmResult<(String, String, Option<Polymorphic>)> {
        let fk_from_tag = || match &p.tag.fk {
            Some(FkTag::Short(x)) => Some(x.clone()),
            Some(FkTag::Long { field, .. }) => field.clone(),
            None => None,
        };

        if let Some(prefix) = &p.tag.polymorphic {
            let afk = format!("{prefix}ID");
            let type_field = format!("{prefix}Type");
            related.require(&afk)?;
            let type_column = related.require(&type_field)?.column.clone();
            let fk = fk_from_tag().unwrap_or_else(|| owner.pk_name());
            let value = p
                .tag
                .polymorphic_value
                .clone()
                .unwrap_or_else(|| owner.short().to_string());
            return Ok((
                fk,
                afk,
                Some(Polymorphic {
                    type_field,
                    type_column,
                    value,
                }),
            ));
        }

        match &p.tag.fk {
            Some(FkTag::Short(x)) => return Ok((x.clone(), format!("{}{x}", owner.short()), None)),
            Some(FkTag::Long {
                field,
                association_field,
            }) => {
                let fk = field.clone().unwrap_or_else(|| owner.pk_name());
                let afk = association_field
                    .clone()
                    .unwrap_or_else(|| format!("{}{fk}", owner.short()));
                return Ok((fk, afk, None));
            }
            None => {}
        }

        let related_fks = self.db.foreign_keys(&related.database, &related.table)?;
        let preferred = format!("{}_id", snake_case(owner.short()));
        if let Some(fk) = pick_fk(&related_fks, &owner.table, &preferred) {
            let fk_field = field_for_column(owner, &fk.referenced_column)?;
            let afk_field = field_for_column(related, &fk.column)?;
            return Ok((fk_field, afk_field, None));
        }

        let fk = owner.pk_name();
        let afk = format!("{}{fk}", owner.short());
        if related.field(&afk).is_none() {
            return Err(OrmError::ForeignKeyNotFound {
                entity: owner.short().to_string(),
                relation: p.name.clone(),
            });
        }
        Ok((fk, afk, None))
    }

    fn many_to_many_keys(
        &self,
        owner: &ModelView,
        related: &ModelView,
        p: &PendingRelation,
        self_ref: bool,
    ) -> OrmResult<(String, String, JoinTable)> {
        let table = p
            .tag
            .join_table
            .clone()
            .unwrap_or_else(|| default_join_table(owner, related));
        let join_columns = self.db.describe(&owner.database, &table)?;
        if join_columns.is_empty() {
            return Err(OrmError::JoinTableNotFound(table));
        }

        let (fk, afk) = match &p.tag.fk {
            Some(FkTag::Short(x)) => (x.clone(), related.pk_name()),
            Some(FkTag::Long {
                field,
                association_field,
            }) => (
                field.clone().unwrap_or_else(|| owner.pk_name()),
                association_field.clone().unwrap_or_else(|| related.pk_name()),
            ),
            None => (owner.pk_name(), related.pk_name()),
        };

        let join_fks = self.db.foreign_keys(&owner.database, &table)?;
        let owner_column = format!("{}_id", snake_case(owner.short()));
        let related_column = format!("{}_id", snake_case(related.short()));
        let has_column = |name: &str| join_columns.iter().any(|c| c.name == name);

        let fk_column = match &p.tag.join_fk {
            Some(c) => Some(c.clone()),
            None => pick_fk(&join_fks, &owner.table, &owner_column)
                .map(|fk| fk.column.clone())
                .or_else(|| has_column(&owner_column).then(|| owner_column.clone())),
        };
        let fk_column = fk_column.ok_or_else(|| OrmError::ForeignKeyNotFound {
            entity: owner.short().to_string(),
            relation: p.name.clone(),
        })?;

        let afk_column = match &p.tag.join_afk {
            Some(c) => Some(c.clone()),
            None if self_ref => join_fks
                .iter()
                .find(|fk| fk.referenced_table == related.table && fk.column != fk_column)
                .map(|fk| fk.column.clone())
                .or_else(|| {
                    other_key_column(&join_columns, &fk_column).map(|c| c.name.clone())
                }),
            None => pick_fk(&join_fks, &related.table, &related_column)
                .map(|fk| fk.column.clone())
                .or_else(|| has_column(&related_column).then(|| related_column.clone())),
        };
        let afk_column = afk_column.ok_or_else(|| OrmError::ForeignKeyNotFound {
            entity: owner.short().to_string(),
            relation: p.name.clone(),
        })?;

        for column in [&fk_column, &afk_column] {
            if !has_column(column) {
                return Err(OrmError::ColumnNotFound {
                    table: table.clone(),
                    column: column.clone(),
                });
            }
        }

        Ok((
            fk,
            afk,
            JoinTable {
                table,
                fk_column,
                afk_column,
            },
        ))
    }
}

fn build_field(
    name: &str,
    value_type: ValueType,
    nullable: bool,
    tag: &OrmTag,
    columns: &[ColumnInfo],
) -> Field {
    let mut field = Field::new(name, value_type);
    field.nullable = nullable;
    if let Some(column) = &tag.column {
        field.column.clone_from(column);
    }
    field.select.clone_from(&tag.select);
    field.custom = tag.custom;
    field.user_validate.clone_from(&tag.validate);
    let declared = tag.permission.unwrap_or(Permission::ALL);

    if field.custom || field.select.is_some() {
        field.permission = if field.select.is_some() {
            Permission {
                read: declared.read,
                write: false,
            }
        } else {
            Permission::NONE
        };
        return field;
    }

    match columns.iter().find(|c| c.name == field.column) {
        Some(info) => {
            field.in_db = true;
            field.kind = SqlKind::parse(&info.data_type);
            field.not_null = info.not_null;
            field.primary_key = info.primary_key;
            field.autoincrement = info.autoincrement;
            field.has_default = info.has_default;
            field.permission = declared;
        }
        None => {
            tracing::debug!(attribute = name, column = %field.column, "column not in table");
            field.permission = Permission::NONE;
        }
    }
    field
}

fn check_unique_columns(fields: &[Field]) -> OrmResult<()> {
    for (i, field) in fields.iter().enumerate().filter(|(_, f)| f.in_db) {
        if fields[..i].iter().any(|f| f.in_db && f.column == field.column) {
            return Err(OrmError::InvalidTag {
                attribute: field.name.clone(),
                reason: format!("column '{}' is mapped twice", field.column),
            });
        }
    }
    Ok(())
}

fn default_join_table(owner: &ModelView, related: &ModelView) -> String {
    snake_plural(&format!("{}{}", owner.short(), related.short()))
}

/// `<Attr>ID` or `<Related>ID` on the owner.
fn belongs_to_convention(owner: &ModelView, related: &ModelView, attr: &str) -> Option<String> {
    [
        format!("{attr}{}", related.pk_name()),
        format!("{}{}", related.short(), related.pk_name()),
    ]
    .into_iter()
    .find(|name| owner.field(name).is_some())
}

/// Picks the foreign key referencing `table`, preferring the column named
/// `preferred` when several do.
fn pick_fk<'f>(fks: &'f [ForeignKeyInfo], table: &str, preferred: &str) -> Option<&'f ForeignKeyInfo> {
    let mut candidates = fks.iter().filter(|fk| fk.referenced_table == table);
    let first = candidates.next()?;
    Some(
        std::iter::once(first)
            .chain(candidates)
            .find(|fk| fk.column == preferred)
            .unwrap_or(first),
    )
}

fn field_for_column(view: &ModelView, column: &str) -> OrmResult<String> {
    view.field_by_column(column)
        .map(|f| f.name.clone())
        .ok_or_else(|| OrmError::AttributeNotFound {
            entity: view.short().to_string(),
            attribute: column.to_string(),
        })
}

fn other_key_column<'c>(columns: &'c [ColumnInfo], taken: &str) -> Option<&'c ColumnInfo> {
    columns
        .iter()
        .find(|c| c.name != taken && c.name.ends_with("_id"))
}
