//! The struct type (`nstruct`): the central composite type descriptor and
//! its builder (spec component C4).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::endian::Endian;
use crate::error::{CallbackKind, Error, Result};
use crate::td::{TypeDef, TypeRef};
use crate::value::{StructValue, Value};

pub type ClassifyKey = i64;

pub type SizeFn = Arc<dyn Fn(&StructValue) -> crate::error::CallbackResult<usize> + Send + Sync>;
pub type PrepackFn = Arc<dyn Fn(&mut StructValue) -> crate::error::CallbackResult<()> + Send + Sync>;
pub type InitFn = Arc<dyn Fn(&mut StructValue) -> crate::error::CallbackResult<()> + Send + Sync>;
pub type CriteriaFn = Arc<dyn Fn(&StructValue) -> crate::error::CallbackResult<bool> + Send + Sync>;
pub type ClassifierFn =
    Arc<dyn Fn(&StructValue) -> crate::error::CallbackResult<ClassifyKey> + Send + Sync>;
pub type FormatterFn =
    Arc<dyn Fn(serde_json::Value) -> crate::error::CallbackResult<serde_json::Value> + Send + Sync>;

/// One field entry as declared by the user, before the type is frozen.
#[derive(Clone)]
pub enum FieldEntry {
    /// A named primitive, composite, or variable-length trailer field.
    Field(TypeRef, String),
    /// Anonymous padding: contributes bytes but no name.
    Padding(usize),
    /// An anonymous embedded struct: its fields are promoted into the
    /// parent's namespace, and its own `size`/`prepack` hooks see the
    /// parent's (flattened) value.
    Embedded(TypeRef),
}

#[derive(Clone)]
pub(crate) struct FlatFieldMeta {
    pub name: String,
    pub ty: TypeRef,
}

/// One step of a struct level's own parse/pack plan, computed once at
/// freeze time so parsing never has to re-walk field declarations.
pub(crate) enum ParseStep {
    Padding(usize),
    Field { flat_index: usize, ty: TypeRef },
    Embedded(EmbedPlan),
}

pub(crate) struct EmbedPlan {
    pub sub_td: TypeRef,
    pub steps: Vec<ParseStep>,
}

pub struct StructTd {
    pub name: String,
    pub padding: u8,
    pub endian: Endian,
    pub size: Option<SizeFn>,
    pub prepack: Option<PrepackFn>,
    pub init: Option<InitFn>,
    pub classifier: Option<ClassifierFn>,
    pub base: Option<TypeRef>,
    pub criteria: Option<CriteriaFn>,
    pub classifyby: Vec<ClassifyKey>,
    pub extend: HashMap<String, TypeRef>,
    pub formatter: Option<FormatterFn>,
    pub(crate) declared_fields: Vec<FieldEntry>,
    pub(crate) flat_fields: Vec<FlatFieldMeta>,
    pub(crate) name_index: HashMap<String, usize>,
    pub(crate) base_prefix_len: usize,
    pub(crate) own_parse_plan: Vec<ParseStep>,
    pub(crate) static_fixed_size: Option<usize>,
    pub(crate) strict_derived_dispatch: bool,
    pub(crate) derived: RwLock<Vec<TypeRef>>,
}

impl std::fmt::Debug for StructTd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructTd").field("name", &self.name).finish()
    }
}

impl StructTd {
    pub(crate) fn own_field_names(&self) -> impl Iterator<Item = &FlatFieldMeta> {
        self.flat_fields[self.base_prefix_len..].iter()
    }

    /// `self`'s effective padding modulus: 1 disables rounding.
    pub fn padding(&self) -> u8 {
        self.padding
    }
}

fn round_up(n: usize, modulus: u8) -> usize {
    let m = modulus as usize;
    if m <= 1 {
        n
    } else {
        n.div_ceil(m) * m
    }
}

pub(crate) fn padded(n: usize, modulus: u8) -> usize {
    round_up(n, modulus)
}

/// Builds a [`StructTd`] (spec's `nstruct(...)` constructor). Every setter
/// mirrors a named parameter of the declaration API in spec §6; `.build()`
/// freezes the descriptor and performs every declaration-time validation
/// (field name uniqueness, `classifyby` requiring a classifier on the base).
pub struct StructBuilder {
    name: String,
    padding: u8,
    endian: Endian,
    fields: Vec<FieldEntry>,
    size: Option<SizeFn>,
    prepack: Option<PrepackFn>,
    init: Option<InitFn>,
    classifier: Option<ClassifierFn>,
    base: Option<TypeRef>,
    criteria: Option<CriteriaFn>,
    classifyby: Vec<ClassifyKey>,
    extend: HashMap<String, TypeRef>,
    formatter: Option<FormatterFn>,
    strict_derived_dispatch: bool,
}

impl StructBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        StructBuilder {
            name: name.into(),
            padding: 1,
            endian: Endian::default(),
            fields: Vec::new(),
            size: None,
            prepack: None,
            init: None,
            classifier: None,
            base: None,
            criteria: None,
            classifyby: Vec::new(),
            extend: HashMap::new(),
            formatter: None,
            strict_derived_dispatch: false,
        }
    }

    pub fn field(mut self, ty: TypeRef, name: impl Into<String>) -> Self {
        self.fields.push(FieldEntry::Field(ty, name.into()));
        self
    }

    pub fn padding_bytes(mut self, width: usize) -> Self {
        self.fields.push(FieldEntry::Padding(width));
        self
    }

    pub fn embed(mut self, sub: TypeRef) -> Self {
        assert!(sub.as_struct().is_some(), "embed() requires a struct type");
        self.fields.push(FieldEntry::Embedded(sub));
        self
    }

    pub fn align(mut self, modulus: u8) -> Self {
        assert!(modulus.is_power_of_two(), "padding modulus must be a power of two");
        self.padding = modulus;
        self
    }

    pub fn endian(mut self, e: Endian) -> Self {
        self.endian = e;
        self
    }

    pub fn size(mut self, f: impl Fn(&StructValue) -> crate::error::CallbackResult<usize> + Send + Sync + 'static) -> Self {
        self.size = Some(Arc::new(f));
        self
    }

    pub fn prepack(mut self, f: impl Fn(&mut StructValue) -> crate::error::CallbackResult<()> + Send + Sync + 'static) -> Self {
        self.prepack = Some(Arc::new(f));
        self
    }

    pub fn init(mut self, f: impl Fn(&mut StructValue) -> crate::error::CallbackResult<()> + Send + Sync + 'static) -> Self {
        self.init = Some(Arc::new(f));
        self
    }

    pub fn classifier(mut self, f: impl Fn(&StructValue) -> crate::error::CallbackResult<ClassifyKey> + Send + Sync + 'static) -> Self {
        self.classifier = Some(Arc::new(f));
        self
    }

    pub fn base(mut self, base: TypeRef) -> Self {
        assert!(base.as_struct().is_some(), "base() requires a struct type");
        self.base = Some(base);
        self
    }

    pub fn criteria(mut self, f: impl Fn(&StructValue) -> crate::error::CallbackResult<bool> + Send + Sync + 'static) -> Self {
        self.criteria = Some(Arc::new(f));
        self
    }

    pub fn classifyby(mut self, keys: Vec<ClassifyKey>) -> Self {
        self.classifyby = keys;
        self
    }

    pub fn extend_field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.extend.insert(name.into(), ty);
        self
    }

    pub fn formatter(mut self, f: impl Fn(serde_json::Value) -> crate::error::CallbackResult<serde_json::Value> + Send + Sync + 'static) -> Self {
        self.formatter = Some(Arc::new(f));
        self
    }

    /// Enables `AmbiguousDerived` errors at parse time instead of the
    /// default first-match-wins tie-break (spec §7).
    pub fn strict_derived_dispatch(mut self, strict: bool) -> Self {
        self.strict_derived_dispatch = strict;
        self
    }

    pub fn build(self) -> Result<TypeRef> {
        if !self.classifyby.is_empty() {
            let has_classifier = self
                .base
                .as_ref()
                .and_then(|b| b.as_struct())
                .map(|b| b.classifier.is_some())
                .unwrap_or(false);
            if !has_classifier {
                return Err(Error::NoClassifier { derived: self.name.clone() });
            }
        }

        let base_prefix_len = self
            .base
            .as_ref()
            .map(|b| b.as_struct().unwrap().flat_fields.len())
            .unwrap_or(0);
        let mut base_flat: Vec<FlatFieldMeta> = self
            .base
            .as_ref()
            .map(|b| b.as_struct().unwrap().flat_fields.clone())
            .unwrap_or_default();

        let (own_flat, own_parse_plan) = flatten_and_plan(&self.fields, base_prefix_len);

        let mut seen: std::collections::HashSet<&str> =
            base_flat.iter().map(|f| f.name.as_str()).collect();
        for f in &own_flat {
            if !seen.insert(f.name.as_str()) {
                return Err(Error::DuplicateField {
                    field_path: self.name.clone(),
                    name: f.name.clone(),
                });
            }
        }

        base_flat.extend(own_flat);
        let flat_fields = base_flat;
        let name_index = flat_fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        let base_fixed = self
            .base
            .as_ref()
            .map(|b| b.as_struct().unwrap().static_fixed_size)
            .unwrap_or(Some(0));
        let own_fixed = plan_fixed_size(&own_parse_plan);
        let static_fixed_size = if self.size.is_some() {
            None
        } else {
            base_fixed.zip(own_fixed).map(|(a, b)| a + b)
        };

        let td = TypeRef::new(TypeDef::Struct(StructTd {
            name: self.name,
            padding: self.padding,
            endian: self.endian,
            size: self.size,
            prepack: self.prepack,
            init: self.init,
            classifier: self.classifier,
            base: self.base.clone(),
            criteria: self.criteria,
            classifyby: self.classifyby,
            extend: self.extend,
            formatter: self.formatter,
            declared_fields: self.fields,
            flat_fields,
            name_index,
            base_prefix_len,
            own_parse_plan,
            static_fixed_size,
            strict_derived_dispatch: self.strict_derived_dispatch,
            derived: RwLock::new(Vec::new()),
        }));

        if let Some(base) = &self.base {
            base.as_struct()
                .unwrap()
                .derived
                .write()
                .expect("derived registry lock poisoned")
                .push(td.clone());
        }

        Ok(td)
    }
}

fn flatten_and_plan(fields: &[FieldEntry], start_index: usize) -> (Vec<FlatFieldMeta>, Vec<ParseStep>) {
    let mut metas = Vec::new();
    let mut steps = Vec::new();
    let mut idx = start_index;
    for entry in fields {
        match entry {
            FieldEntry::Padding(w) => steps.push(ParseStep::Padding(*w)),
            FieldEntry::Field(ty, name) => {
                metas.push(FlatFieldMeta { name: name.clone(), ty: ty.clone() });
                steps.push(ParseStep::Field { flat_index: idx, ty: ty.clone() });
                idx += 1;
            }
            FieldEntry::Embedded(sub_td) => {
                let sub = sub_td.as_struct().expect("embedded field must be a struct type");
                let (sub_metas, sub_steps) = flatten_and_plan(&sub.declared_fields, idx);
                idx += sub_metas.len();
                metas.extend(sub_metas);
                steps.push(ParseStep::Embedded(EmbedPlan { sub_td: sub_td.clone(), steps: sub_steps }));
            }
        }
    }
    (metas, steps)
}

fn plan_fixed_size(steps: &[ParseStep]) -> Option<usize> {
    let mut total = 0usize;
    for step in steps {
        total += match step {
            ParseStep::Padding(w) => *w,
            ParseStep::Field { ty, .. } => ty.fixed_size()?,
            ParseStep::Embedded(plan) => {
                if plan.sub_td.as_struct().unwrap().size.is_some() {
                    return None;
                }
                plan_fixed_size(&plan.steps)?
            }
        };
    }
    Some(total)
}

/// Runs every `init` callback from root to `td`, then applies named
/// initializers, per spec §4.4's instantiation contract.
pub(crate) fn instantiate(td: &TypeRef, initializers: &[(&str, Value)]) -> Result<StructValue> {
    let mut value = StructValue::new_defaulted(td.clone());
    for level in base_chain_root_to_self(td) {
        if let Some(init) = &level.as_struct().unwrap().init {
            init(&mut value).map_err(|e| {
                Error::callback_from_box(CallbackKind::Init, level.as_struct().unwrap().name.clone(), e)
            })?;
        }
    }
    for (name, value_in) in initializers {
        let idx = td
            .as_struct()
            .unwrap()
            .name_index
            .get(*name)
            .copied()
            .ok_or_else(|| Error::UnknownField {
                type_name: td.name().to_string(),
                name: name.to_string(),
            })?;
        value.fields_mut()[idx] = value_in.clone();
    }
    Ok(value)
}

pub(crate) fn base_chain_root_to_self(td: &TypeRef) -> Vec<TypeRef> {
    let mut chain = vec![td.clone()];
    let mut cur = td.clone();
    while let Some(base) = cur.as_struct().and_then(|s| s.base.clone()) {
        chain.push(base.clone());
        cur = base;
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::u8_td;

    #[test]
    fn duplicate_field_names_are_rejected_at_build() {
        let err = StructBuilder::new("Dup")
            .field(u8_td(), "a")
            .field(u8_td(), "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateField { .. }));
    }

    #[test]
    fn classifyby_without_a_classifier_on_the_base_is_rejected() {
        let base = StructBuilder::new("Base").field(u8_td(), "kind").build().unwrap();
        let err = StructBuilder::new("Derived")
            .base(base)
            .classifyby(vec![1])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::NoClassifier { .. }));
    }

    #[test]
    fn classifyby_with_a_classifier_on_the_base_builds_fine() {
        let base = StructBuilder::new("Base")
            .field(u8_td(), "kind")
            .classifier(|v| Ok(v.get_int("kind")? as ClassifyKey))
            .build()
            .unwrap();
        let derived = StructBuilder::new("Derived").base(base).classifyby(vec![1]).build();
        assert!(derived.is_ok());
    }

    #[test]
    fn embedded_fields_flatten_into_the_parent_namespace() {
        let inner = StructBuilder::new("Inner").field(u8_td(), "x").build().unwrap();
        let outer = StructBuilder::new("Outer").field(u8_td(), "a").embed(inner).field(u8_td(), "b").build().unwrap();
        let s = outer.as_struct().unwrap();
        let names: Vec<&str> = s.flat_fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "x", "b"]);
    }

    #[test]
    fn base_chain_is_root_to_self_ordered() {
        let root = StructBuilder::new("Root").build().unwrap();
        let mid = StructBuilder::new("Mid").base(root.clone()).build().unwrap();
        let leaf = StructBuilder::new("Leaf").base(mid.clone()).build().unwrap();
        let chain = base_chain_root_to_self(&leaf);
        let names: Vec<&str> = chain.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["Root", "Mid", "Leaf"]);
    }

    #[test]
    fn padded_rounds_up_to_the_modulus() {
        assert_eq!(padded(5, 1), 5);
        assert_eq!(padded(5, 4), 8);
        assert_eq!(padded(8, 4), 8);
        assert_eq!(padded(0, 4), 0);
    }

    #[test]
    fn a_struct_with_a_size_callback_has_no_static_fixed_size() {
        let td = StructBuilder::new("Sized")
            .field(u8_td(), "length")
            .size(|v| Ok(v.get_int("length")? as usize))
            .build()
            .unwrap();
        assert_eq!(td.as_struct().unwrap().static_fixed_size, None);
    }

    #[test]
    fn a_fully_fixed_struct_has_a_static_fixed_size() {
        let td = StructBuilder::new("Fixed").field(u8_td(), "a").field(u8_td(), "b").build().unwrap();
        assert_eq!(td.as_struct().unwrap().static_fixed_size, Some(2));
    }
}
