// Layout Engine
// Computes size, alignment and field offsets of described aggregates the way
// the host C compiler lays them out

mod enums;

pub use enums::{infer_storage, EnumDesc, EnumRule, EnumValue};

use crate::abi::{native_type_of, NativeType};
use crate::error::LayoutError;
use crate::registry::{InterfaceId, InterfaceNode, TypeRegistry};
use crate::types::{InterfaceKind, TypeDesc, TypeTag};

// ==================== Aggregate Model ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutState {
    Unresolved,
    InProgress,
    Resolved,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDesc {
    pub name: String,
    pub ty: TypeDesc,
    offset: Option<usize>,
}

impl FieldDesc {
    /// Byte offset, once the owning aggregate has been laid out
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Field(FieldDesc),
    /// Function-pointer slot of a class or interface vtable
    Callback { name: String },
}

impl Member {
    pub fn field(name: impl Into<String>, ty: TypeDesc) -> Self {
        Member::Field(FieldDesc {
            name: name.into(),
            ty,
            offset: None,
        })
    }

    pub fn callback(name: impl Into<String>) -> Self {
        Member::Callback { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Member::Field(field) => &field.name,
            Member::Callback { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub name: String,
    pub kind: InterfaceKind,
    pub members: Vec<Member>,
    size: usize,
    alignment: usize,
    state: LayoutState,
}

impl Aggregate {
    pub fn new(name: impl Into<String>, kind: InterfaceKind, members: Vec<Member>) -> Self {
        Self {
            name: name.into(),
            kind,
            members,
            size: 0,
            alignment: 1,
            state: LayoutState::Unresolved,
        }
    }

    pub fn state(&self) -> LayoutState {
        self.state
    }

    pub fn layout(&self) -> Option<AggregateLayout> {
        (self.state == LayoutState::Resolved).then_some(AggregateLayout {
            size: self.size,
            alignment: self.alignment,
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDesc> {
        self.members.iter().filter_map(|member| match member {
            Member::Field(field) => Some(field),
            Member::Callback { .. } => None,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDesc> {
        self.fields().find(|field| field.name == name)
    }

    fn is_union(&self) -> bool {
        self.kind == InterfaceKind::Union
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AggregateLayout {
    pub size: usize,
    pub alignment: usize,
}

pub fn align_up(value: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    value
        .checked_add(alignment - 1)
        .map(|padded| padded & !(alignment - 1))
}

fn pointer_size_alignment() -> (usize, usize) {
    (NativeType::Pointer.size(), NativeType::Pointer.alignment())
}

// ==================== Engine ====================

impl TypeRegistry {
    /// Lay out an aggregate, recording every field offset. Resolved nodes are
    /// returned from cache; failed nodes stay failed.
    pub fn layout(&mut self, id: InterfaceId) -> Result<AggregateLayout, LayoutError> {
        let mut path = Vec::new();
        self.layout_node(id, &mut path)
    }

    pub fn layout_by_name(&mut self, name: &str) -> Result<AggregateLayout, LayoutError> {
        let id = self
            .lookup(name)
            .ok_or_else(|| LayoutError::UnresolvedInterface {
                interface: name.to_string(),
                who: "layout request".to_string(),
            })?;
        self.layout(id)
    }

    /// Offset of a named field, laying out the aggregate first if needed
    pub fn field_offset(&mut self, id: InterfaceId, field: &str) -> Result<Option<usize>, LayoutError> {
        self.layout(id)?;
        Ok(self
            .aggregate(id)
            .and_then(|aggregate| aggregate.field(field))
            .and_then(FieldDesc::offset))
    }

    /// Size and alignment of a value of type `ty` stored inline
    pub fn type_layout(&mut self, ty: &TypeDesc) -> Result<AggregateLayout, LayoutError> {
        let mut path = Vec::new();
        let (size, alignment) = self.type_size_alignment(ty, "value", &mut path)?;
        Ok(AggregateLayout { size, alignment })
    }

    fn layout_node(
        &mut self,
        id: InterfaceId,
        path: &mut Vec<String>,
    ) -> Result<AggregateLayout, LayoutError> {
        let aggregate = match self.node(id) {
            Some(InterfaceNode::Aggregate(aggregate)) => aggregate,
            Some(other) => {
                return Err(LayoutError::NotAnAggregate {
                    name: other.name().to_string(),
                })
            }
            None => {
                return Err(LayoutError::NotAnAggregate {
                    name: format!("{}", id),
                })
            }
        };

        match aggregate.state {
            LayoutState::Resolved => {
                return Ok(AggregateLayout {
                    size: aggregate.size,
                    alignment: aggregate.alignment,
                })
            }
            LayoutState::Failed => {
                return Err(LayoutError::PreviouslyFailed {
                    name: aggregate.name.clone(),
                })
            }
            LayoutState::InProgress => {
                let name = aggregate.name.clone();
                path.push(name.clone());
                let err = LayoutError::Recursive {
                    name,
                    path: path.join(" -> "),
                };
                path.pop();
                tracing::warn!("{}", err);
                return Err(err);
            }
            LayoutState::Unresolved => {}
        }

        let name = aggregate.name.clone();
        let is_union = aggregate.is_union();
        let members = aggregate.members.clone();
        self.set_state(id, LayoutState::InProgress);

        path.push(name.clone());
        let computed = self.compute_layout(&name, is_union, &members, path);
        path.pop();

        let Some(aggregate) = self.aggregate_mut(id) else {
            return Err(LayoutError::NotAnAggregate { name });
        };
        match computed {
            Ok((layout, offsets)) => {
                for (member, offset) in aggregate.members.iter_mut().zip(offsets) {
                    if let Member::Field(field) = member {
                        field.offset = Some(offset);
                    }
                }
                aggregate.size = layout.size;
                aggregate.alignment = layout.alignment;
                aggregate.state = LayoutState::Resolved;
                tracing::debug!(
                    aggregate = %name,
                    size = layout.size,
                    alignment = layout.alignment,
                    "computed layout"
                );
                Ok(layout)
            }
            Err(err) => {
                aggregate.state = LayoutState::Failed;
                tracing::warn!(aggregate = %name, "layout failed: {}", err);
                Err(err)
            }
        }
    }

    fn set_state(&mut self, id: InterfaceId, state: LayoutState) {
        if let Some(aggregate) = self.aggregate_mut(id) {
            aggregate.state = state;
        }
    }

    /// Layout plus one offset per member, in member order
    fn compute_layout(
        &mut self,
        owner: &str,
        is_union: bool,
        members: &[Member],
        path: &mut Vec<String>,
    ) -> Result<(AggregateLayout, Vec<usize>), LayoutError> {
        let mut offsets = Vec::with_capacity(members.len());
        let mut cursor = 0usize;
        let mut max_size = 0usize;
        let mut max_align = 1usize;

        for member in members {
            let (size, alignment) = match member {
                Member::Callback { .. } => pointer_size_alignment(),
                Member::Field(field) => {
                    let who = format!("field {}.{}", owner, field.name);
                    self.type_size_alignment(&field.ty, &who, path)?
                }
            };
            max_align = max_align.max(alignment);
            if is_union {
                offsets.push(0);
                max_size = max_size.max(size);
            } else {
                let offset = align_up(cursor, alignment)
                    .ok_or_else(|| LayoutError::Overflow { who: owner.to_string() })?;
                offsets.push(offset);
                cursor = offset
                    .checked_add(size)
                    .ok_or_else(|| LayoutError::Overflow { who: owner.to_string() })?;
            }
        }

        let raw_size = if is_union { max_size } else { cursor };
        let layout = AggregateLayout {
            size: align_up(raw_size, max_align)
                .ok_or_else(|| LayoutError::Overflow { who: owner.to_string() })?,
            alignment: max_align,
        };
        Ok((layout, offsets))
    }

    fn type_size_alignment(
        &mut self,
        ty: &TypeDesc,
        who: &str,
        path: &mut Vec<String>,
    ) -> Result<(usize, usize), LayoutError> {
        if ty.pointer {
            return Ok(pointer_size_alignment());
        }

        match ty.tag {
            TypeTag::Void => Err(LayoutError::VoidField {
                who: who.to_string(),
            }),
            TypeTag::Array => match (ty.fixed_size, ty.element.as_deref()) {
                (Some(len), Some(element)) => {
                    let (size, alignment) = self.type_size_alignment(element, who, path)?;
                    let total = size.checked_mul(len).ok_or_else(|| LayoutError::Overflow {
                        who: who.to_string(),
                    })?;
                    Ok((total, alignment))
                }
                _ => Err(LayoutError::UnsizedArray {
                    who: who.to_string(),
                }),
            },
            TypeTag::Interface => {
                let name = ty.interface_name().unwrap_or("<unnamed>");
                let id = self
                    .lookup(name)
                    .ok_or_else(|| LayoutError::UnresolvedInterface {
                        interface: name.to_string(),
                        who: who.to_string(),
                    })?;
                let rule = self.config().enum_rule;
                let unresolved = || LayoutError::UnresolvedInterface {
                    interface: name.to_string(),
                    who: who.to_string(),
                };
                match self.node(id).map(InterfaceNode::kind) {
                    Some(InterfaceKind::Callback) => Ok(pointer_size_alignment()),
                    Some(kind) if kind.is_enum_like() => self
                        .enumeration_mut(id)
                        .map(|desc| desc.size_alignment(rule))
                        .ok_or_else(unresolved),
                    Some(_) => {
                        let layout = self.layout_node(id, path)?;
                        Ok((layout.size, layout.alignment))
                    }
                    None => Err(unresolved()),
                }
            }
            tag => match native_type_of(tag, false, false) {
                NativeType::Pointer => Err(LayoutError::UnsizedByValue {
                    who: who.to_string(),
                    tag: tag.as_str(),
                }),
                native => Ok((native.size(), native.alignment())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use pretty_assertions::assert_eq;

    fn int(tag: TypeTag) -> TypeDesc {
        TypeDesc::basic(tag)
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::new(RuntimeConfig::default().with_enum_rule(EnumRule::Gnu))
    }

    fn offsets(registry: &TypeRegistry, id: InterfaceId) -> Vec<usize> {
        registry
            .aggregate(id)
            .unwrap()
            .fields()
            .map(|field| field.offset().unwrap())
            .collect()
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(8, 8), Some(8));
        assert_eq!(align_up(9, 4), Some(12));
        assert_eq!(align_up(usize::MAX, 8), None);
    }

    #[test]
    fn test_char_int_char() {
        let mut reg = registry();
        let id = reg
            .register_struct(
                "Padded",
                vec![
                    Member::field("a", int(TypeTag::Int8)),
                    Member::field("b", int(TypeTag::Int32)),
                    Member::field("c", int(TypeTag::Int8)),
                ],
            )
            .unwrap();
        let layout = reg.layout(id).unwrap();
        assert_eq!(offsets(&reg, id), vec![0, 4, 8]);
        assert_eq!(layout, AggregateLayout { size: 12, alignment: 4 });
    }

    #[test]
    fn test_nested_struct_and_pointer() {
        let mut reg = registry();
        reg.register_struct(
            "Point",
            vec![
                Member::field("x", int(TypeTag::Double)),
                Member::field("y", int(TypeTag::Double)),
            ],
        )
        .unwrap();
        let id = reg
            .register_struct(
                "Labeled",
                vec![
                    Member::field("tag", int(TypeTag::UInt8)),
                    Member::field("at", TypeDesc::interface(InterfaceKind::Struct, "Point")),
                    Member::field("label", TypeDesc::basic(TypeTag::String)),
                ],
            )
            .unwrap();
        let layout = reg.layout(id).unwrap();
        let ptr = std::mem::size_of::<usize>();
        assert_eq!(offsets(&reg, id), vec![0, 8, 24]);
        assert_eq!(Some(layout.size), align_up(24 + ptr, 8));
        assert_eq!(layout.alignment, 8);
    }

    #[test]
    fn test_union_takes_largest_member() {
        let mut reg = registry();
        let id = reg
            .register_union(
                "Value",
                vec![
                    Member::field("byte", int(TypeTag::UInt8)),
                    Member::field("wide", int(TypeTag::Int64)),
                    Member::field("arr", TypeDesc::fixed_array(int(TypeTag::UInt8), 9)),
                ],
            )
            .unwrap();
        let layout = reg.layout(id).unwrap();
        assert_eq!(offsets(&reg, id), vec![0, 0, 0]);
        assert_eq!(layout, AggregateLayout { size: 16, alignment: 8 });
    }

    #[test]
    fn test_fixed_array_field() {
        let mut reg = registry();
        let id = reg
            .register_struct(
                "Buffer",
                vec![
                    Member::field("len", int(TypeTag::UInt16)),
                    Member::field("data", TypeDesc::fixed_array(int(TypeTag::Int32), 3)),
                ],
            )
            .unwrap();
        let layout = reg.layout(id).unwrap();
        assert_eq!(offsets(&reg, id), vec![0, 4]);
        assert_eq!(layout.size, 16);
    }

    #[test]
    fn test_enum_field_uses_inferred_storage() {
        let mut short = TypeRegistry::new(
            RuntimeConfig::default().with_enum_rule(EnumRule::GnuShortEnums),
        );
        short
            .register_enum(EnumDesc::new("Small", &[("a", 0), ("b", 3)]))
            .unwrap();
        let id = short
            .register_struct(
                "Holder",
                vec![
                    Member::field("kind", TypeDesc::interface(InterfaceKind::Enum, "Small")),
                    Member::field("flag", int(TypeTag::UInt8)),
                ],
            )
            .unwrap();
        assert_eq!(short.layout(id).unwrap().size, 2);

        let mut gnu = registry();
        gnu.register_enum(EnumDesc::new("Small", &[("a", 0), ("b", 3)]))
            .unwrap();
        let id = gnu
            .register_struct(
                "Holder",
                vec![
                    Member::field("kind", TypeDesc::interface(InterfaceKind::Enum, "Small")),
                    Member::field("flag", int(TypeTag::UInt8)),
                ],
            )
            .unwrap();
        assert_eq!(gnu.layout(id).unwrap().size, 8);
    }

    #[test]
    fn test_vtable_callback_slots() {
        let mut reg = registry();
        let id = reg
            .register_object(
                "WidgetClass",
                vec![
                    Member::field("type_id", int(TypeTag::TypeHandle)),
                    Member::callback("draw"),
                    Member::field("flags", int(TypeTag::UInt8)),
                    Member::callback("destroy"),
                ],
            )
            .unwrap();
        let layout = reg.layout(id).unwrap();
        let ptr = std::mem::size_of::<usize>();
        assert_eq!(offsets(&reg, id), vec![0, 2 * ptr]);
        assert_eq!(layout.size, 4 * ptr);
    }

    #[test]
    fn test_recursion_is_reported_and_poisoned() {
        let mut reg = registry();
        reg.register_struct(
            "A",
            vec![Member::field("b", TypeDesc::interface(InterfaceKind::Struct, "B"))],
        )
        .unwrap();
        reg.register_struct(
            "B",
            vec![Member::field("a", TypeDesc::interface(InterfaceKind::Struct, "A"))],
        )
        .unwrap();
        let a = reg.lookup("A").unwrap();
        let err = reg.layout(a).unwrap_err();
        assert_eq!(
            err,
            LayoutError::Recursive {
                name: "A".to_string(),
                path: "A -> B -> A".to_string(),
            }
        );
        assert_eq!(reg.aggregate(a).unwrap().state(), LayoutState::Failed);
        assert!(matches!(
            reg.layout(a),
            Err(LayoutError::PreviouslyFailed { .. })
        ));
        let b = reg.lookup("B").unwrap();
        assert!(matches!(
            reg.layout(b),
            Err(LayoutError::PreviouslyFailed { .. })
        ));
    }

    #[test]
    fn test_self_reference_through_pointer_is_fine() {
        let mut reg = registry();
        let id = reg
            .register_struct(
                "Node",
                vec![
                    Member::field("value", int(TypeTag::Int32)),
                    Member::field(
                        "next",
                        TypeDesc::interface(InterfaceKind::Struct, "Node").by_pointer(),
                    ),
                ],
            )
            .unwrap();
        let layout = reg.layout(id).unwrap();
        assert_eq!(layout.alignment, std::mem::align_of::<usize>());
    }

    #[test]
    fn test_void_and_unsized_fields_fail() {
        let mut reg = registry();
        let void = reg
            .register_struct("V", vec![Member::field("nothing", TypeDesc::void())])
            .unwrap();
        assert!(matches!(reg.layout(void), Err(LayoutError::VoidField { .. })));

        let mut by_value = TypeDesc::basic(TypeTag::String);
        by_value.pointer = false;
        let string = reg
            .register_struct("S", vec![Member::field("text", by_value)])
            .unwrap();
        assert_eq!(
            reg.layout(string).unwrap_err().to_string(),
            "field S.text is not a pointer and is of type utf8"
        );

        let open = reg
            .register_struct(
                "Open",
                vec![Member::field("items", {
                    let mut ty = TypeDesc::array_of(int(TypeTag::Int32));
                    ty.pointer = false;
                    ty
                })],
            )
            .unwrap();
        assert!(matches!(reg.layout(open), Err(LayoutError::UnsizedArray { .. })));
    }

    #[test]
    fn test_oversized_fields_fail_without_panicking() {
        let mut reg = registry();
        let huge = reg
            .register_struct(
                "Huge",
                vec![Member::field(
                    "data",
                    TypeDesc::fixed_array(int(TypeTag::Int32), usize::MAX / 2),
                )],
            )
            .unwrap();
        assert_eq!(
            reg.layout(huge).unwrap_err(),
            LayoutError::Overflow {
                who: "field Huge.data".to_string(),
            }
        );
        assert_eq!(reg.aggregate(huge).unwrap().state(), LayoutState::Failed);
        assert!(matches!(reg.layout(huge), Err(LayoutError::PreviouslyFailed { .. })));

        // each field fits on its own, the running offset does not
        let half = usize::MAX / 2 + 1;
        let pair = reg
            .register_struct(
                "Pair",
                vec![
                    Member::field("a", TypeDesc::fixed_array(int(TypeTag::UInt8), half)),
                    Member::field("b", TypeDesc::fixed_array(int(TypeTag::UInt8), half)),
                ],
            )
            .unwrap();
        assert_eq!(
            reg.layout(pair).unwrap_err(),
            LayoutError::Overflow {
                who: "Pair".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_interface() {
        let mut reg = registry();
        let id = reg
            .register_struct(
                "Orphan",
                vec![Member::field("p", TypeDesc::interface(InterfaceKind::Struct, "Missing"))],
            )
            .unwrap();
        assert_eq!(
            reg.layout(id).unwrap_err(),
            LayoutError::UnresolvedInterface {
                interface: "Missing".to_string(),
                who: "field Orphan.p".to_string(),
            }
        );
    }

    #[test]
    fn test_layout_is_cached() {
        let mut reg = registry();
        let id = reg
            .register_struct("One", vec![Member::field("x", int(TypeTag::Int16))])
            .unwrap();
        let first = reg.layout(id).unwrap();
        assert_eq!(reg.aggregate(id).unwrap().layout(), Some(first));
        assert_eq!(reg.layout(id).unwrap(), first);
        assert_eq!(reg.field_offset(id, "x").unwrap(), Some(0));
        assert_eq!(reg.field_offset(id, "y").unwrap(), None);
    }

    #[test]
    fn test_enum_node_is_not_an_aggregate() {
        let mut reg = registry();
        let id = reg.register_enum(EnumDesc::new("Color", &[("red", 0)])).unwrap();
        assert_eq!(
            reg.layout(id).unwrap_err(),
            LayoutError::NotAnAggregate {
                name: "Color".to_string()
            }
        );
    }
}
