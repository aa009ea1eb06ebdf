// Type Registry
// Arena of named interface nodes (aggregates, enums, callbacks) and functions.
// Layout and enum storage results are cached on the nodes themselves.

use crate::config::RuntimeConfig;
use crate::error::RegistryError;
use crate::layout::{Aggregate, EnumDesc, EnumRule, Member};
use crate::types::{InterfaceKind, Signature, TypeDesc, TypeInfo, TypeTag};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(usize);

impl InterfaceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackDesc {
    pub name: String,
    #[serde(flatten)]
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceNode {
    Aggregate(Aggregate),
    Enum(EnumDesc),
    Callback(CallbackDesc),
}

impl InterfaceNode {
    pub fn name(&self) -> &str {
        match self {
            InterfaceNode::Aggregate(aggregate) => &aggregate.name,
            InterfaceNode::Enum(desc) => &desc.name,
            InterfaceNode::Callback(desc) => &desc.name,
        }
    }

    pub fn kind(&self) -> InterfaceKind {
        match self {
            InterfaceNode::Aggregate(aggregate) => aggregate.kind,
            InterfaceNode::Enum(desc) if desc.is_flags => InterfaceKind::Flags,
            InterfaceNode::Enum(_) => InterfaceKind::Enum,
            InterfaceNode::Callback(_) => InterfaceKind::Callback,
        }
    }
}

/// A native function: its exported symbol and signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDesc {
    pub name: String,
    /// Exported symbol, when it differs from `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(flatten)]
    pub signature: Signature,
}

impl FunctionDesc {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            symbol: None,
            signature,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn symbol(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.name)
    }
}

// ==================== Registry ====================

#[derive(Debug, Default)]
pub struct TypeRegistry {
    nodes: Vec<InterfaceNode>,
    by_name: FxHashMap<String, InterfaceId>,
    functions: FxHashMap<String, FunctionDesc>,
    namespace: Option<String>,
    shared_library: Option<String>,
    config: RuntimeConfig,
}

impl TypeRegistry {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn enum_rule(&self) -> EnumRule {
        self.config.enum_rule
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Library the namespace's functions live in, if the document named one
    pub fn shared_library(&self) -> Option<&str> {
        self.shared_library.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&mut self, node: InterfaceNode) -> Result<InterfaceId, RegistryError> {
        let name = node.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let id = InterfaceId(self.nodes.len());
        tracing::trace!(name = %name, kind = %node.kind(), id = id.0, "registered interface");
        self.nodes.push(node);
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn register_aggregate(
        &mut self,
        name: &str,
        kind: InterfaceKind,
        members: Vec<Member>,
    ) -> Result<InterfaceId, RegistryError> {
        self.insert(InterfaceNode::Aggregate(Aggregate::new(name, kind, members)))
    }

    pub fn register_struct(
        &mut self,
        name: &str,
        members: Vec<Member>,
    ) -> Result<InterfaceId, RegistryError> {
        self.register_aggregate(name, InterfaceKind::Struct, members)
    }

    pub fn register_union(
        &mut self,
        name: &str,
        members: Vec<Member>,
    ) -> Result<InterfaceId, RegistryError> {
        self.register_aggregate(name, InterfaceKind::Union, members)
    }

    /// Instance or class structure of an object type
    pub fn register_object(
        &mut self,
        name: &str,
        members: Vec<Member>,
    ) -> Result<InterfaceId, RegistryError> {
        self.register_aggregate(name, InterfaceKind::Object, members)
    }

    pub fn register_enum(&mut self, desc: EnumDesc) -> Result<InterfaceId, RegistryError> {
        self.insert(InterfaceNode::Enum(desc))
    }

    pub fn register_flags(&mut self, mut desc: EnumDesc) -> Result<InterfaceId, RegistryError> {
        desc.is_flags = true;
        self.insert(InterfaceNode::Enum(desc))
    }

    pub fn register_callback(
        &mut self,
        name: &str,
        signature: Signature,
    ) -> Result<InterfaceId, RegistryError> {
        self.insert(InterfaceNode::Callback(CallbackDesc {
            name: name.to_string(),
            signature,
        }))
    }

    pub fn register_function(&mut self, function: FunctionDesc) -> Result<(), RegistryError> {
        if self.functions.contains_key(&function.name) {
            return Err(RegistryError::Duplicate(function.name));
        }
        tracing::trace!(name = %function.name, symbol = %function.symbol(), "registered function");
        self.functions.insert(function.name.clone(), function);
        Ok(())
    }

    // ==================== Lookup ====================

    pub fn lookup(&self, name: &str) -> Option<InterfaceId> {
        self.by_name.get(name).copied()
    }

    pub fn node(&self, id: InterfaceId) -> Option<&InterfaceNode> {
        self.nodes.get(id.0)
    }

    pub fn aggregate(&self, id: InterfaceId) -> Option<&Aggregate> {
        match self.nodes.get(id.0) {
            Some(InterfaceNode::Aggregate(aggregate)) => Some(aggregate),
            _ => None,
        }
    }

    pub(crate) fn aggregate_mut(&mut self, id: InterfaceId) -> Option<&mut Aggregate> {
        match self.nodes.get_mut(id.0) {
            Some(InterfaceNode::Aggregate(aggregate)) => Some(aggregate),
            _ => None,
        }
    }

    pub fn enumeration(&self, id: InterfaceId) -> Option<&EnumDesc> {
        match self.nodes.get(id.0) {
            Some(InterfaceNode::Enum(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn enumeration_mut(&mut self, id: InterfaceId) -> Option<&mut EnumDesc> {
        match self.nodes.get_mut(id.0) {
            Some(InterfaceNode::Enum(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn callback(&self, id: InterfaceId) -> Option<&CallbackDesc> {
        match self.nodes.get(id.0) {
            Some(InterfaceNode::Callback(desc)) => Some(desc),
            _ => None,
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDesc> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDesc> {
        self.functions.values()
    }

    /// Node an interface-tagged type refers to
    pub fn resolve(&self, ty: &TypeDesc) -> Result<InterfaceId, RegistryError> {
        let name = ty
            .interface_name()
            .ok_or_else(|| RegistryError::UnknownInterface(ty.tag.as_str().to_string()))?;
        self.lookup(name)
            .ok_or_else(|| RegistryError::UnknownInterface(name.to_string()))
    }

    /// Integer tag values of `ty` are stored as: the inferred storage tag for
    /// enums and flags, the type's own tag otherwise
    pub fn storage_type(&mut self, ty: &TypeDesc) -> Result<TypeTag, RegistryError> {
        if !ty.is_enum_like() {
            return Ok(ty.tag);
        }
        let id = self.resolve(ty)?;
        let rule = self.enum_rule();
        let desc = self
            .enumeration_mut(id)
            .ok_or_else(|| RegistryError::UnknownInterface(ty.interface_name().unwrap_or_default().to_string()))?;
        Ok(desc.resolve_storage(rule))
    }

    // ==================== Namespace Documents ====================

    pub fn from_json(content: &str, config: RuntimeConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new(config);
        registry.load_json(content)?;
        Ok(registry)
    }

    /// Register everything a namespace document describes
    pub fn load_json(&mut self, content: &str) -> Result<(), RegistryError> {
        let doc: NamespaceDoc = serde_json::from_str(content)?;

        if doc.namespace.is_some() {
            self.namespace = doc.namespace;
        }
        if doc.shared_library.is_some() {
            self.shared_library = doc.shared_library;
        }

        for (kind, aggregates) in [
            (InterfaceKind::Struct, doc.structs),
            (InterfaceKind::Union, doc.unions),
            (InterfaceKind::Boxed, doc.boxed),
            (InterfaceKind::Object, doc.objects),
        ] {
            for aggregate in aggregates {
                let members = aggregate.members()?;
                self.register_aggregate(&aggregate.name, kind, members)?;
            }
        }
        for desc in doc.enums {
            self.register_enum(desc)?;
        }
        for desc in doc.flags {
            self.register_flags(desc)?;
        }
        for callback in doc.callbacks {
            self.register_callback(&callback.name, callback.signature)?;
        }
        for function in doc.functions {
            self.register_function(function)?;
        }

        tracing::debug!(
            namespace = self.namespace.as_deref().unwrap_or(""),
            interfaces = self.nodes.len(),
            functions = self.functions.len(),
            "loaded namespace"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct NamespaceDoc {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    shared_library: Option<String>,
    #[serde(default)]
    structs: Vec<AggregateDoc>,
    #[serde(default)]
    unions: Vec<AggregateDoc>,
    #[serde(default)]
    boxed: Vec<AggregateDoc>,
    #[serde(default)]
    objects: Vec<AggregateDoc>,
    #[serde(default)]
    enums: Vec<EnumDesc>,
    #[serde(default)]
    flags: Vec<EnumDesc>,
    #[serde(default)]
    callbacks: Vec<CallbackDesc>,
    #[serde(default)]
    functions: Vec<FunctionDesc>,
}

#[derive(Debug, Deserialize)]
struct AggregateDoc {
    name: String,
    #[serde(default)]
    fields: Vec<MemberDoc>,
}

/// `{"name": .., "type": ..}` for a field, `{"name": .., "callback": true}` for a vtable slot
#[derive(Debug, Deserialize)]
struct MemberDoc {
    name: String,
    #[serde(rename = "type", default)]
    ty: Option<TypeDesc>,
    #[serde(default)]
    callback: bool,
}

impl AggregateDoc {
    fn members(&self) -> Result<Vec<Member>, RegistryError> {
        self.fields
            .iter()
            .map(|member| match (&member.ty, member.callback) {
                (_, true) => Ok(Member::callback(member.name.as_str())),
                (Some(ty), false) => Ok(Member::field(member.name.as_str(), ty.clone())),
                (None, false) => Err(RegistryError::MissingFieldType {
                    aggregate: self.name.clone(),
                    field: member.name.clone(),
                }),
            })
            .collect()
    }
}
