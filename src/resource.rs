//! Resource (C8): a subject-centric, in-memory view of one RDF resource.
//!
//! A [`Resource`] carries its own identity, type set, and attribute values.
//! Per-resource attribute state lives here rather than in the
//! [`crate::attribute::Attribute`] objects themselves (see that module's
//! design note): each of a resource's models contributes one ordinal slot
//! per attribute, addressed as `(model_index, ordinal)`.
//!
//! Grounded on the reference resource type's `__getattr__`/`__setattr__`
//! dispatch-by-model-list, `to_dict`/`to_json`/`to_jsonld`/`to_rdf`
//! serialization chain, and `update`/`update_from_graph` replace semantics.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use serde_json::{Map as JsonMap, Value as JsonValue};
use sophia::api::graph::MutableGraph;
use sophia::api::ns::rdf;
use sophia::api::serializer::TripleSerializer;
use sophia::api::term::{IriRef, LanguageTag, SimpleTerm};
use sophia::inmem::graph::FastGraph;
use sophia::iri::Iri;
use sophia::turtle::serializer::turtle::TurtleSerializer;

use crate::attribute::{Attribute, AttributeSlot, Container};
use crate::error::{AccessError, EditError, EditResult, InternalError, OldmError, OldmResult};
use crate::id::{Id, IriHint};
use crate::model::Model;
use crate::value::{ScalarValue, Value};

/// Resolves an object-attribute's IRI to the [`Resource`] it names, so
/// nested same-document resources can be inlined during serialization.
/// Implemented by whatever holds the resource cache (the session/store
/// layer); a [`Resource`] never reaches for one on its own.
pub trait ResourceResolver {
    fn resolve(&self, iri: &str) -> Option<&Resource>;
}

/// A resolver that never inlines anything; object attributes always
/// serialize as plain IRI strings.
pub struct NoResolver;

impl ResourceResolver for NoResolver {
    fn resolve(&self, _iri: &str) -> Option<&Resource> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct Resource {
    id: Id,
    models: Vec<Rc<Model>>,
    types: BTreeSet<String>,
    former_types: BTreeSet<String>,
    is_new: bool,
    /// `slots[model_index][ordinal]`, parallel to `models[model_index].attributes()`.
    slots: Vec<Vec<AttributeSlot>>,
    /// Attribute name -> every `(model_index, ordinal)` location bound to
    /// it. More than one model can bind the same name; all receive the
    /// same value on `set`.
    name_index: HashMap<String, Vec<(usize, usize)>>,
    /// Carried from creation to commit time, for the IRI generator to use
    /// (or ignore) when this resource is first flushed.
    hint: IriHint,
}

impl Resource {
    pub fn new(id: Id, models: Vec<Rc<Model>>, types: BTreeSet<String>, is_new: bool) -> Self {
        Self::with_former_types(id, models, types, is_new, None)
    }

    pub fn with_former_types(
        id: Id,
        models: Vec<Rc<Model>>,
        types: BTreeSet<String>,
        is_new: bool,
        former_types: Option<BTreeSet<String>>,
    ) -> Self {
        let former_types =
            former_types.unwrap_or_else(|| if is_new { BTreeSet::new() } else { types.clone() });

        let mut slots = Vec::with_capacity(models.len());
        let mut name_index: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (model_idx, model) in models.iter().enumerate() {
            let mut model_slots = Vec::with_capacity(model.attribute_count());
            for (ordinal, attr) in model.attributes().iter().enumerate() {
                model_slots.push(AttributeSlot::default());
                name_index
                    .entry(attr.name().to_string())
                    .or_default()
                    .push((model_idx, ordinal));
            }
            slots.push(model_slots);
        }

        Resource {
            id,
            models,
            types,
            former_types,
            is_new,
            slots,
            name_index,
            hint: IriHint::default(),
        }
    }

    pub fn with_hint(mut self, hint: IriHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn hint(&self) -> &IriHint {
        &self.hint
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn types(&self) -> &BTreeSet<String> {
        &self.types
    }

    pub fn former_types(&self) -> &BTreeSet<String> {
        &self.former_types
    }

    pub fn models(&self) -> &[Rc<Model>] {
        &self.models
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_blank_node(&self) -> bool {
        self.id.is_blank_node()
    }

    pub fn is_instance_of(&self, class_iri: &str) -> bool {
        self.types.contains(class_iri)
    }

    pub fn in_same_document(&self, other: &Resource) -> bool {
        self.id.hashless_iri() == other.id.hashless_iri()
    }

    /// Types this resource carries that no registered model accounts for.
    pub fn non_model_types(&self) -> BTreeSet<String> {
        let model_iris: BTreeSet<&str> = self.models.iter().map(|m| m.class_iri()).collect();
        self.types
            .iter()
            .filter(|t| !model_iris.contains(t.as_str()))
            .cloned()
            .collect()
    }

    /// Marks the permanent IRI assigned by the store at commit time,
    /// replacing the resource's temporary one.
    pub fn receive_id(&mut self, permanent_iri: impl Into<String>) {
        self.id.promote(permanent_iri);
        self.is_new = false;
    }

    fn locations_for(&self, name: &str) -> AccessResultLocations<'_> {
        self.name_index
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| AccessError::AttributeAccessError(name.to_string()))
    }

    fn attribute_at(&self, model_idx: usize, ordinal: usize) -> &Attribute {
        self.models[model_idx]
            .attribute_by_ordinal(ordinal)
            .expect("slot/attribute ordinal mismatch")
    }

    pub fn get(&self, name: &str) -> Result<Option<&Value>, AccessError> {
        let locations = self.locations_for(name)?;
        let &(model_idx, ordinal) = locations.first().expect("non-empty location list");
        Ok(self.attribute_at(model_idx, ordinal).get(&self.slots[model_idx][ordinal]))
    }

    pub fn set(&mut self, name: &str, value: Option<Value>, is_end_user: bool) -> OldmResult<()> {
        let locations = self.locations_for(name)?.to_vec();
        for (model_idx, ordinal) in locations {
            let attr = self.attribute_at(model_idx, ordinal);
            attr.set(&mut self.slots[model_idx][ordinal], value.clone(), is_end_user)?;
        }
        Ok(())
    }

    fn attribute_slot_pairs(&self) -> impl Iterator<Item = (&Attribute, &AttributeSlot)> {
        self.models.iter().enumerate().flat_map(move |(model_idx, model)| {
            model
                .attributes()
                .iter()
                .enumerate()
                .map(move |(ordinal, attr)| (attr, &self.slots[model_idx][ordinal]))
        })
    }

    pub fn is_valid(&self) -> bool {
        self.attribute_slot_pairs().all(|(attr, slot)| attr.is_locally_satisfied(slot))
    }

    pub fn check_validity(&self) -> EditResult<()> {
        for (attr, slot) in self.attribute_slot_pairs() {
            if !attr.is_locally_satisfied(slot) {
                return Err(EditError::RequiredPropertyError(attr.name().to_string()));
            }
        }
        Ok(())
    }

    /// True if this resource has never been saved, has a pending type
    /// change, or holds any attribute with a pending former value.
    pub fn is_dirty(&self) -> bool {
        self.is_new
            || self.types != self.former_types
            || self.attribute_slot_pairs().any(|(_, slot)| slot.has_changed())
    }

    /// Clears every attribute's pending former value and marks `former_types`
    /// caught up with `types`. Called once the store has durably written
    /// this resource's current state.
    pub fn acknowledge_storage(&mut self) {
        for model_slots in &mut self.slots {
            for slot in model_slots {
                slot.receive_storage_ack();
            }
        }
        self.former_types = self.types.clone();
    }

    /// IRIs referenced by this resource's current object-attribute values,
    /// used for cache invalidation and cascade-delete.
    pub fn referenced_iris(&self) -> BTreeSet<String> {
        let mut iris = BTreeSet::new();
        for (model_idx, model) in self.models.iter().enumerate() {
            for (ordinal, attr) in model.attributes().iter().enumerate() {
                if attr.is_object() {
                    iris.extend(crate::attribute::ObjectAttribute::referenced_iris(
                        &self.slots[model_idx][ordinal],
                    ));
                }
            }
        }
        iris
    }

    /// IRIs referenced by this resource's object-attribute values before
    /// their pending change, if any. Used alongside [`Resource::referenced_iris`]
    /// so retargeting an object-attribute invalidates both the old and the
    /// new target's cached snapshot.
    pub fn former_referenced_iris(&self) -> BTreeSet<String> {
        let mut iris = BTreeSet::new();
        for (model_idx, model) in self.models.iter().enumerate() {
            for (ordinal, attr) in model.attributes().iter().enumerate() {
                if attr.is_object() {
                    iris.extend(crate::attribute::ObjectAttribute::former_referenced_iris(
                        &self.slots[model_idx][ordinal],
                    ));
                }
            }
        }
        iris
    }

    /// Exposes every `(Attribute, AttributeSlot)` pair for a backing store to
    /// read when serializing this resource's triples.
    pub(crate) fn iter_attributes(&self) -> impl Iterator<Item = (&Attribute, &AttributeSlot)> {
        self.attribute_slot_pairs()
    }

    /// Rewrites any object-attribute value equal to a key in `remap` to its
    /// mapped value. Used once temporary IRIs are promoted to permanent ones
    /// at commit time, so outgoing triples never reference a stale IRI.
    pub(crate) fn remap_references(&mut self, remap: &HashMap<String, String>) {
        if remap.is_empty() {
            return;
        }
        for (model_idx, model) in self.models.iter().enumerate() {
            for (ordinal, attr) in model.attributes().iter().enumerate() {
                if !attr.is_object() {
                    continue;
                }
                if let Some(value) = self.slots[model_idx][ordinal].current_mut() {
                    remap_value(value, remap);
                }
            }
        }
    }

    /// Authorizes and applies a type change, given the model resolution the
    /// caller already performed (via a registry). Rebuilds the attribute
    /// table, carrying surviving attribute values across by name.
    pub fn apply_type_change(
        &mut self,
        new_types: BTreeSet<String>,
        resolved_models: Vec<Rc<Model>>,
        resolved_full_types: BTreeSet<String>,
        allow_new_type: bool,
        allow_type_removal: bool,
    ) -> EditResult<()> {
        if new_types == self.types {
            return Ok(());
        }

        let additional: BTreeSet<String> = new_types.difference(&self.types).cloned().collect();
        if !additional.is_empty() && !allow_new_type {
            return Err(EditError::UnauthorizedTypeChangeError {
                from: self.types.iter().cloned().collect(),
                to: new_types.into_iter().collect(),
            });
        }

        let missing: BTreeSet<String> = self.types.difference(&new_types).cloned().collect();
        if !missing.is_empty() {
            let model_iris: BTreeSet<String> =
                self.models.iter().map(|m| m.class_iri().to_string()).collect();
            let implicit_types: BTreeSet<String> = self
                .models
                .iter()
                .flat_map(|m| m.ancestor_iris().iter().cloned())
                .filter(|t| !model_iris.contains(t))
                .collect();
            let removed: BTreeSet<String> = missing.difference(&implicit_types).cloned().collect();
            if !removed.is_empty() && !allow_type_removal {
                return Err(EditError::UnauthorizedTypeChangeError {
                    from: self.types.iter().cloned().collect(),
                    to: new_types.into_iter().collect(),
                });
            }
        }

        self.rebuild_for_models(resolved_models, resolved_full_types);
        Ok(())
    }

    fn rebuild_for_models(&mut self, models: Vec<Rc<Model>>, full_types: BTreeSet<String>) {
        let mut carried: HashMap<String, Option<Value>> = HashMap::new();
        for (name, locations) in &self.name_index {
            if let Some(&(model_idx, ordinal)) = locations.first() {
                carried.insert(name.clone(), self.slots[model_idx][ordinal].current().cloned());
            }
        }

        let mut slots = Vec::with_capacity(models.len());
        let mut name_index: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (model_idx, model) in models.iter().enumerate() {
            let mut model_slots = Vec::with_capacity(model.attribute_count());
            for (ordinal, attr) in model.attributes().iter().enumerate() {
                let seed = carried.get(attr.name()).cloned().flatten();
                model_slots.push(AttributeSlot::seeded(seed));
                name_index
                    .entry(attr.name().to_string())
                    .or_default()
                    .push((model_idx, ordinal));
            }
            slots.push(model_slots);
        }

        self.models = models;
        self.types = full_types;
        self.slots = slots;
        self.name_index = name_index;
    }

    /// Serializes this resource (and, transitively, any blank-node or
    /// same-document object attribute it references) into a JSON-compatible
    /// map. Write-only attributes are never included.
    pub fn to_dict(&self, resolver: &dyn ResourceResolver, remove_none_values: bool) -> JsonMap<String, JsonValue> {
        let mut ignored_iris = BTreeSet::new();
        self.to_dict_inner(resolver, remove_none_values, &mut ignored_iris)
    }

    fn to_dict_inner(
        &self,
        resolver: &dyn ResourceResolver,
        remove_none_values: bool,
        ignored_iris: &mut BTreeSet<String>,
    ) -> JsonMap<String, JsonValue> {
        ignored_iris.insert(self.id.iri().to_string());

        let mut map = JsonMap::new();
        for (attr, slot) in self.attribute_slot_pairs() {
            if attr.is_write_only() {
                continue;
            }
            let value = match slot.current() {
                None => JsonValue::Null,
                Some(v) => self.convert_value(attr, v, resolver, remove_none_values, ignored_iris),
            };
            if remove_none_values && value.is_null() {
                continue;
            }
            map.insert(attr.name().to_string(), value);
        }

        if !self.is_blank_node() {
            map.insert("id".to_string(), JsonValue::String(self.id.iri().to_string()));
        }
        if !self.types.is_empty() {
            map.insert(
                "types".to_string(),
                JsonValue::Array(self.types.iter().cloned().map(JsonValue::String).collect()),
            );
        }
        map
    }

    fn convert_value(
        &self,
        attr: &Attribute,
        value: &Value,
        resolver: &dyn ResourceResolver,
        remove_none_values: bool,
        ignored_iris: &mut BTreeSet<String>,
    ) -> JsonValue {
        match value {
            Value::Scalar(v) => self.convert_scalar(attr, v, resolver, remove_none_values, ignored_iris),
            Value::Set(items) | Value::List(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|v| self.convert_scalar(attr, v, resolver, remove_none_values, ignored_iris))
                    .collect(),
            ),
        }
    }

    fn convert_scalar(
        &self,
        attr: &Attribute,
        value: &ScalarValue,
        resolver: &dyn ResourceResolver,
        remove_none_values: bool,
        ignored_iris: &mut BTreeSet<String>,
    ) -> JsonValue {
        if attr.is_object() {
            if let ScalarValue::IriRef(iri) = value {
                if !ignored_iris.contains(iri) {
                    if let Some(target) = resolver.resolve(iri) {
                        if target.is_blank_node() || self.in_same_document(target) {
                            let dict = target.to_dict_inner(resolver, remove_none_values, ignored_iris);
                            return JsonValue::Object(dict);
                        }
                    }
                }
                return JsonValue::String(iri.clone());
            }
        }
        scalar_to_json(value)
    }

    pub fn to_json(&self, resolver: &dyn ResourceResolver, remove_none_values: bool) -> OldmResult<String> {
        let dict = self.to_dict(resolver, remove_none_values);
        Ok(serde_json::to_string_pretty(&JsonValue::Object(dict))?)
    }

    /// As [`Resource::to_json`], but with the owning model's JSON-LD context
    /// folded in under `@context`. Only supported for single-model resources.
    pub fn to_jsonld(&self, resolver: &dyn ResourceResolver, remove_none_values: bool) -> OldmResult<String> {
        if self.models.len() > 1 {
            return Err(OldmError::Internal(InternalError::Invariant(
                "merging @context across multiple models is not supported".to_string(),
            )));
        }
        let mut dict = self.to_dict(resolver, remove_none_values);
        if let Some(model) = self.models.first() {
            dict.insert("@context".to_string(), model.context().clone());
        }
        Ok(serde_json::to_string_pretty(&JsonValue::Object(dict))?)
    }

    /// Serializes this resource's own triples (not any referenced resource)
    /// to Turtle, tagging each literal with its datatype or `@language`.
    pub fn to_rdf(&self) -> OldmResult<String> {
        let subject = make_iri(self.id.iri())?;
        let mut graph = FastGraph::new();

        for t in &self.types {
            let type_iri = make_iri(t)?;
            graph
                .insert(&subject, rdf::type_, &type_iri)
                .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
        }

        for (attr, slot) in self.attribute_slot_pairs() {
            let Some(value) = slot.current() else { continue };
            let predicate = make_iri(attr.property_iri())?;

            if let Value::List(items) = value {
                insert_rdf_list(&mut graph, &subject, &predicate, attr, items)?;
                continue;
            }

            for scalar in scalars_of(value) {
                match scalar {
                    ScalarValue::IriRef(iri) => {
                        let obj = make_iri(iri)?;
                        graph
                            .insert(&subject, &predicate, &obj)
                            .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
                    }
                    other => {
                        let term = scalar_term(attr, other)?;
                        graph
                            .insert(&subject, &predicate, &term)
                            .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
                    }
                }
            }
        }

        let mut buf = Vec::new();
        {
            let mut serializer = TurtleSerializer::new(&mut buf);
            serializer
                .serialize_graph(&graph)
                .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
        }
        String::from_utf8(buf).map_err(|e| OldmError::Internal(InternalError::Invariant(e.to_string())))
    }

    /// Replaces every attribute value from a flat JSON `dict`, matching the
    /// resource's own `id`. Absent keys are treated as explicit removal.
    /// Type changes must be resolved and applied separately via
    /// [`Resource::apply_type_change`] before calling this.
    pub fn update_attributes(
        &mut self,
        full_dict: &JsonMap<String, JsonValue>,
        is_end_user: bool,
    ) -> OldmResult<()> {
        match full_dict.get("id").and_then(JsonValue::as_str) {
            None => {
                return Err(EditError::WrongResourceError {
                    expected: self.id.iri().to_string(),
                    found: String::new(),
                }
                .into())
            }
            Some(given) if given != self.id.iri() => {
                return Err(EditError::WrongResourceError {
                    expected: self.id.iri().to_string(),
                    found: given.to_string(),
                }
                .into())
            }
            _ => {}
        }

        for key in full_dict.keys() {
            if key == "id" || key == "types" || key == "@context" {
                continue;
            }
            if !self.name_index.contains_key(key) {
                return Err(AccessError::AttributeAccessError(key.clone()).into());
            }
        }

        let names: Vec<String> = self.name_index.keys().cloned().collect();
        for name in names {
            let locations = self.name_index[&name].clone();
            let json_value = full_dict.get(&name);
            for (model_idx, ordinal) in locations {
                let attr = self.attribute_at(model_idx, ordinal);
                let new_value = match json_value {
                    None => None,
                    Some(jv) => Some(json_to_value(attr, jv)?),
                };
                attr.set(&mut self.slots[model_idx][ordinal], new_value, is_end_user)?;
            }
        }
        Ok(())
    }
}

type AccessResultLocations<'a> = Result<&'a [(usize, usize)], AccessError>;

pub(crate) fn make_iri(iri: &str) -> OldmResult<Iri<String>> {
    Iri::new(iri.to_string())
        .map_err(|e| OldmError::Internal(InternalError::Invariant(format!("invalid IRI {iri}: {e}"))))
}

/// Builds the RDF term one non-object scalar is written as: a language-tagged
/// literal when the attribute has a declared `@language`, a datatype-tagged
/// literal for any other non-string datatype, and a plain literal for
/// `xsd:string` (its datatype is implicit, so nothing further needs tagging).
pub(crate) fn scalar_term(attr: &Attribute, value: &ScalarValue) -> OldmResult<SimpleTerm<'static>> {
    let lexical = attr.to_lexical(value)?;
    if let Some(lang) = attr.language() {
        let tag = LanguageTag::new_unchecked(lang.to_string().into());
        return Ok(SimpleTerm::LiteralLanguage(lexical.into(), tag));
    }
    let datatype = attr.jsonld_type().unwrap_or(crate::value::XSD_STRING);
    let dt = IriRef::new_unchecked(datatype.to_string().into());
    Ok(SimpleTerm::LiteralDatatype(lexical.into(), dt))
}

/// Writes `items` as an `rdf:List` (`rdf:first`/`rdf:rest` chain terminated
/// by `rdf:nil`) rooted at `<subject> <predicate> _:head`, preserving
/// order. List nodes are skolemized IRIs, matching this crate's blank-node
/// convention rather than sophia's anonymous-term API.
pub(crate) fn insert_rdf_list(
    graph: &mut FastGraph,
    subject: &Iri<String>,
    predicate: &Iri<String>,
    attr: &Attribute,
    items: &[ScalarValue],
) -> OldmResult<()> {
    if items.is_empty() {
        return Ok(());
    }

    let nodes = (0..items.len())
        .map(|_| make_iri(&format!("{}{}", crate::id::BLANK_NODE_AUTHORITY, uuid::Uuid::new_v4())))
        .collect::<OldmResult<Vec<_>>>()?;

    graph
        .insert(subject, predicate, &nodes[0])
        .map_err(|e| InternalError::DataStoreError(e.to_string()))?;

    for (i, item) in items.iter().enumerate() {
        let node = &nodes[i];
        match item {
            ScalarValue::IriRef(iri) => {
                let obj = make_iri(iri)?;
                graph
                    .insert(node, rdf::first, &obj)
                    .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
            }
            other => {
                let term = scalar_term(attr, other)?;
                graph
                    .insert(node, rdf::first, &term)
                    .map_err(|e| InternalError::DataStoreError(e.to_string()))?;
            }
        }
        match nodes.get(i + 1) {
            Some(next) => graph
                .insert(node, rdf::rest, next)
                .map_err(|e| InternalError::DataStoreError(e.to_string()))?,
            None => graph
                .insert(node, rdf::rest, rdf::nil)
                .map_err(|e| InternalError::DataStoreError(e.to_string()))?,
        };
    }
    Ok(())
}

pub(crate) fn scalars_of(value: &Value) -> Vec<&ScalarValue> {
    match value {
        Value::Scalar(v) => vec![v],
        Value::Set(items) | Value::List(items) => items.iter().collect(),
    }
}

fn remap_value(value: &mut Value, remap: &HashMap<String, String>) {
    let remap_one = |item: &mut ScalarValue| {
        if let ScalarValue::IriRef(iri) = item {
            if let Some(new_iri) = remap.get(iri) {
                *iri = new_iri.clone();
            }
        }
    };
    match value {
        Value::Scalar(v) => remap_one(v),
        Value::Set(items) | Value::List(items) => items.iter_mut().for_each(remap_one),
    }
}

fn scalar_to_json(value: &ScalarValue) -> JsonValue {
    match value {
        ScalarValue::String(s) => JsonValue::String(s.clone()),
        ScalarValue::Boolean(b) => JsonValue::Bool(*b),
        ScalarValue::Integer(i) => JsonValue::Number((*i).into()),
        ScalarValue::Decimal(d) => serde_json::Number::from_f64(*d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ScalarValue::Date(s) | ScalarValue::DateTime(s) | ScalarValue::HexBinary(s) => {
            JsonValue::String(s.clone())
        }
        ScalarValue::LangString { text, .. } => JsonValue::String(text.clone()),
        ScalarValue::IriRef(iri) => JsonValue::String(iri.clone()),
    }
}

fn json_scalar_to_value(attr: &Attribute, jv: &JsonValue) -> EditResult<ScalarValue> {
    if attr.is_object() {
        return jv
            .as_str()
            .map(|s| ScalarValue::IriRef(s.to_string()))
            .ok_or_else(|| EditError::AttributeTypeError {
                name: attr.name().to_string(),
                expected: "IRI string".to_string(),
                found: jv.to_string(),
            });
    }

    let type_mismatch = || EditError::AttributeTypeError {
        name: attr.name().to_string(),
        expected: attr.jsonld_type().unwrap_or("string").to_string(),
        found: jv.to_string(),
    };

    match attr.jsonld_type() {
        Some(crate::value::XSD_BOOLEAN) => jv.as_bool().map(ScalarValue::Boolean).ok_or_else(type_mismatch),
        Some(crate::value::XSD_INTEGER) => jv.as_i64().map(ScalarValue::Integer).ok_or_else(type_mismatch),
        Some(crate::value::XSD_DECIMAL) => jv.as_f64().map(ScalarValue::Decimal).ok_or_else(type_mismatch),
        Some(crate::value::XSD_DATE) => jv
            .as_str()
            .map(|s| ScalarValue::Date(s.to_string()))
            .ok_or_else(type_mismatch),
        Some(crate::value::XSD_DATETIME) => jv
            .as_str()
            .map(|s| ScalarValue::DateTime(s.to_string()))
            .ok_or_else(type_mismatch),
        Some(crate::value::XSD_HEX_BINARY) => jv
            .as_str()
            .map(|s| ScalarValue::HexBinary(s.to_string()))
            .ok_or_else(type_mismatch),
        _ => {
            let s = jv.as_str().ok_or_else(type_mismatch)?;
            match attr.language() {
                Some(lang) => Ok(ScalarValue::LangString {
                    text: s.to_string(),
                    lang: lang.to_string(),
                }),
                None => Ok(ScalarValue::String(s.to_string())),
            }
        }
    }
}

fn json_to_value(attr: &Attribute, jv: &JsonValue) -> EditResult<Value> {
    match (attr.container(), jv) {
        (Some(Container::Set), JsonValue::Array(items)) => Ok(Value::Set(
            items.iter().map(|v| json_scalar_to_value(attr, v)).collect::<EditResult<Vec<_>>>()?,
        )),
        (Some(Container::List), JsonValue::Array(items)) => Ok(Value::List(
            items.iter().map(|v| json_scalar_to_value(attr, v)).collect::<EditResult<Vec<_>>>()?,
        )),
        (_, JsonValue::Array(_)) => Err(EditError::AttributeTypeError {
            name: attr.name().to_string(),
            expected: "scalar (no @container declared)".to_string(),
            found: "array".to_string(),
        }),
        (_, other) => Ok(Value::Scalar(json_scalar_to_value(attr, other)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeMetadata, ObjectAttribute, ScalarAttribute};
    use crate::iri_gen::BlankNodeGenerator;
    use crate::property::PropertyFacts;
    use crate::value::{StringFormat, IriRefFormat, XSD_STRING};
    use serde_json::json;

    fn name_attribute(required: bool) -> Attribute {
        Attribute::Scalar(ScalarAttribute::new(
            AttributeMetadata {
                name: "name".to_string(),
                jsonld_type: Some(XSD_STRING.to_string()),
                language: None,
                container: None,
                reversed: false,
            },
            PropertyFacts {
                iri: "http://ex.org/name".to_string(),
                is_required: required,
                read_only: false,
                write_only: false,
            },
            Box::new(StringFormat),
        ))
    }

    fn friend_attribute() -> Attribute {
        Attribute::Object(ObjectAttribute::new(
            AttributeMetadata {
                name: "friend".to_string(),
                jsonld_type: Some(crate::value::JSONLD_ID.to_string()),
                language: None,
                container: None,
                reversed: false,
            },
            PropertyFacts {
                iri: "http://ex.org/friend".to_string(),
                is_required: false,
                read_only: false,
                write_only: false,
            },
            Box::new(IriRefFormat),
        ))
    }

    fn person_model(required_name: bool) -> Rc<Model> {
        Rc::new(
            Model::new(
                "http://ex.org/Person",
                "Person",
                BTreeSet::new(),
                vec![name_attribute(required_name), friend_attribute()],
                Box::new(BlankNodeGenerator),
                json!({"name": "http://ex.org/name", "friend": {"@id": "http://ex.org/friend", "@type": "@id"}}),
            )
            .unwrap(),
        )
    }

    #[test]
    fn new_resource_is_invalid_until_required_attribute_set() {
        let resource = Resource::new(
            Id::temporary(),
            vec![person_model(true)],
            ["http://ex.org/Person".to_string()].into_iter().collect(),
            true,
        );
        assert!(!resource.is_valid());
    }

    #[test]
    fn setting_required_attribute_makes_resource_valid() {
        let mut resource = Resource::new(
            Id::temporary(),
            vec![person_model(true)],
            ["http://ex.org/Person".to_string()].into_iter().collect(),
            true,
        );
        resource
            .set("name", Some(Value::Scalar(ScalarValue::String("Alice".into()))), true)
            .unwrap();
        assert!(resource.is_valid());
    }

    #[test]
    fn to_dict_includes_id_types_and_omits_absent_attributes() {
        let mut resource = Resource::new(
            Id::permanent("http://ex.org/people/1"),
            vec![person_model(false)],
            ["http://ex.org/Person".to_string()].into_iter().collect(),
            false,
        );
        resource
            .set("name", Some(Value::Scalar(ScalarValue::String("Alice".into()))), true)
            .unwrap();
        let dict = resource.to_dict(&NoResolver, true);
        assert_eq!(dict.get("id").unwrap(), "http://ex.org/people/1");
        assert_eq!(dict.get("name").unwrap(), "Alice");
        assert!(dict.get("friend").is_none());
    }

    #[test]
    fn blank_node_resource_omits_id_from_dict() {
        let resource = Resource::new(
            Id::permanent("http://localhost/.well-known/genid/abc"),
            vec![person_model(false)],
            BTreeSet::new(),
            false,
        );
        let dict = resource.to_dict(&NoResolver, true);
        assert!(dict.get("id").is_none());
    }

    #[test]
    fn update_attributes_rejects_mismatched_id() {
        let mut resource = Resource::new(
            Id::permanent("http://ex.org/people/1"),
            vec![person_model(false)],
            BTreeSet::new(),
            false,
        );
        let full = json!({"id": "http://ex.org/people/2", "name": "Bob"});
        let err = resource
            .update_attributes(full.as_object().unwrap(), true)
            .unwrap_err();
        assert!(matches!(err, OldmError::Edit(EditError::WrongResourceError { .. })));
    }

    #[test]
    fn update_attributes_rejects_unknown_key() {
        let mut resource = Resource::new(
            Id::permanent("http://ex.org/people/1"),
            vec![person_model(false)],
            BTreeSet::new(),
            false,
        );
        let full = json!({"id": "http://ex.org/people/1", "nickname": "Al"});
        let err = resource
            .update_attributes(full.as_object().unwrap(), true)
            .unwrap_err();
        assert!(matches!(err, OldmError::Access(AccessError::AttributeAccessError(_))));
    }

    #[test]
    fn update_attributes_treats_absent_key_as_removal() {
        let mut resource = Resource::new(
            Id::permanent("http://ex.org/people/1"),
            vec![person_model(false)],
            BTreeSet::new(),
            false,
        );
        resource
            .set("name", Some(Value::Scalar(ScalarValue::String("Alice".into()))), true)
            .unwrap();
        let full = json!({"id": "http://ex.org/people/1"});
        resource.update_attributes(full.as_object().unwrap(), true).unwrap();
        assert!(resource.get("name").unwrap().is_none());
    }
}
