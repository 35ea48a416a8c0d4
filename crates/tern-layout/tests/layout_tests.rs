//! Layout engine integration tests
//!
//! Covers record/union/array layout rules, `packed(N)`, structural identity
//! and recursive aliases.

use std::sync::Arc;
use tern_layout::{
    align_up, LayoutError, Scalar, TypeExpr, TypeRegistry, MAX_PACKING, POINTER_ALIGN,
    POINTER_SIZE,
};

fn s(scalar: Scalar) -> TypeExpr {
    TypeExpr::scalar(scalar)
}

fn list_node(registry: &TypeRegistry) {
    registry
        .define_alias(
            "Node",
            TypeExpr::record([
                ("value", s(Scalar::Int)),
                ("next", TypeExpr::reference(TypeExpr::named("Node"))),
            ]),
        )
        .unwrap();
}

// ===== Layout Rules =====

#[test]
fn test_size_is_multiple_of_alignment() {
    let registry = TypeRegistry::new();
    list_node(&registry);
    let exprs = vec![
        s(Scalar::Bool),
        s(Scalar::Double),
        TypeExpr::record([("a", s(Scalar::Byte)), ("b", s(Scalar::Int)), ("c", s(Scalar::Byte))]),
        TypeExpr::record([("a", s(Scalar::Short)), ("b", s(Scalar::Byte))]),
        TypeExpr::packed_record(8, [("a", s(Scalar::Byte))]),
        TypeExpr::union([s(Scalar::Byte), s(Scalar::Int), s(Scalar::Short)]),
        TypeExpr::union([
            TypeExpr::record([("a", s(Scalar::Byte)), ("b", s(Scalar::Byte)), ("c", s(Scalar::Byte))]),
            s(Scalar::Short),
        ]),
        TypeExpr::array(s(Scalar::Long)),
        TypeExpr::named("Node"),
    ];

    for expr in &exprs {
        let desc = registry.layout(expr).unwrap();
        assert!(desc.align().is_power_of_two(), "{expr}");
        assert_eq!(desc.size() % desc.align(), 0, "{expr}");
    }
}

#[test]
fn test_unpacked_record_uses_natural_alignment() {
    let registry = TypeRegistry::new();
    let desc = registry
        .layout(&TypeExpr::record([
            ("a", s(Scalar::Byte)),
            ("b", s(Scalar::Int)),
            ("c", s(Scalar::Byte)),
        ]))
        .unwrap();

    let offsets: Vec<_> = desc.fields().iter().map(|f| f.offset).collect();
    assert_eq!(offsets, vec![0, 4, 8]);
    assert_eq!(desc.align(), 4);
    assert_eq!(desc.size(), 12);
    assert!(!desc.has_pointers());
}

#[test]
fn test_packed_record_concrete_case() {
    let registry = TypeRegistry::new();
    let desc = registry
        .layout(&TypeExpr::packed_record(
            4,
            [
                ("a", s(Scalar::UShort)),
                ("b", s(Scalar::UShort)),
                ("c", s(Scalar::UInt)),
                ("d", s(Scalar::UInt)),
                ("e", s(Scalar::UShort)),
                ("f", s(Scalar::UShort)),
                ("g", s(Scalar::UShort)),
            ],
        ))
        .unwrap();

    let offsets: Vec<_> = desc.fields().iter().map(|f| f.offset).collect();
    assert_eq!(offsets, vec![0, 4, 8, 12, 16, 20, 24]);
    assert_eq!(desc.size(), 28);
    assert_eq!(desc.align(), 4);
    assert_eq!(desc.as_record().unwrap().packing, Some(4));
}

#[test]
fn test_packed_offsets_are_multiples_of_packing() {
    let registry = TypeRegistry::new();
    for n in [1u32, 2, 4, 8, 16] {
        let desc = registry
            .layout(&TypeExpr::packed_record(
                n,
                [("a", s(Scalar::Byte)), ("b", s(Scalar::Bool)), ("c", s(Scalar::UByte))],
            ))
            .unwrap();
        for field in desc.fields() {
            assert_eq!(field.offset % n as usize, 0);
        }
        assert_eq!(desc.size() % n as usize, 0);
        assert_eq!(desc.size(), 3 * n as usize);
    }
}

#[test]
fn test_empty_packed_record() {
    let registry = TypeRegistry::new();
    let desc = registry
        .layout(&TypeExpr::packed_record(8, Vec::<(String, TypeExpr)>::new()))
        .unwrap();
    assert_eq!(desc.size(), 0);
    assert_eq!(desc.align(), 8);
}

#[test]
fn test_nested_record_pointer_map_is_flattened() {
    let registry = TypeRegistry::new();
    let inner = TypeExpr::record([
        ("x", s(Scalar::Int)),
        ("p", TypeExpr::reference(s(Scalar::Int))),
    ]);
    let desc = registry
        .layout(&TypeExpr::record([("tag", s(Scalar::Int)), ("inner", inner)]))
        .unwrap();

    let inner_offset = align_up(4, POINTER_ALIGN);
    let p_offset = inner_offset + align_up(4, POINTER_ALIGN);
    assert_eq!(desc.field("inner").unwrap().offset, inner_offset);
    assert_eq!(desc.pointer_map().as_slice(), &[p_offset]);
}

#[test]
fn test_union_storage() {
    let registry = TypeRegistry::new();
    let desc = registry
        .layout(&TypeExpr::union([
            s(Scalar::Short),
            TypeExpr::record([("a", s(Scalar::Byte)), ("b", s(Scalar::Byte)), ("c", s(Scalar::Byte))]),
        ]))
        .unwrap();
    assert_eq!(desc.size(), 4);
    assert_eq!(desc.align(), 2);
    assert_eq!(desc.as_union().unwrap().variants.len(), 2);
}

#[test]
fn test_union_traces_every_branch() {
    let registry = TypeRegistry::new();
    let desc = registry
        .layout(&TypeExpr::union([
            s(Scalar::Long),
            TypeExpr::record([
                ("n", s(Scalar::Long)),
                ("p", TypeExpr::reference(s(Scalar::Int))),
            ]),
            TypeExpr::reference(s(Scalar::Double)),
        ]))
        .unwrap();
    assert_eq!(desc.pointer_map().as_slice(), &[0, align_up(8, POINTER_ALIGN)]);
}

#[test]
fn test_array_is_a_traced_handle() {
    let registry = TypeRegistry::new();
    let desc = registry
        .layout(&TypeExpr::array(TypeExpr::record([("a", s(Scalar::Int))])))
        .unwrap();
    assert_eq!(desc.size(), POINTER_SIZE);
    assert_eq!(desc.pointer_map().as_slice(), &[0]);

    let array = desc.as_array().unwrap();
    assert_eq!(array.element_size, 4);
    assert_eq!(array.element_offset(3), 12);
    assert!(!array.element.is_ref);
}

#[test]
fn test_sizeof() {
    let registry = TypeRegistry::new();
    assert_eq!(registry.size_of(&s(Scalar::UShort)).unwrap(), 2);
    assert_eq!(registry.size_of(&s(Scalar::Pointer)).unwrap(), POINTER_SIZE);
    assert_eq!(
        registry
            .size_of(&TypeExpr::reference(TypeExpr::record([("a", s(Scalar::Double)), ("b", s(Scalar::Double))])))
            .unwrap(),
        POINTER_SIZE
    );
    assert_eq!(
        registry
            .size_of(&TypeExpr::record([("a", s(Scalar::Double)), ("b", s(Scalar::Double))]))
            .unwrap(),
        16
    );
}

#[test]
fn test_ref_layout_is_pointee_layout() {
    let registry = TypeRegistry::new();
    let record = TypeExpr::record([("a", s(Scalar::Long))]);
    let by_ref = registry.layout(&TypeExpr::reference(record.clone())).unwrap();
    let by_value = registry.layout(&record).unwrap();
    assert!(Arc::ptr_eq(&by_ref, &by_value));
}

// ===== Structural Identity =====

#[test]
fn test_identical_expressions_share_descriptor() {
    let registry = TypeRegistry::new();
    let make = || {
        TypeExpr::record([
            ("x", s(Scalar::Int)),
            ("tags", TypeExpr::array(s(Scalar::UByte))),
        ])
    };
    let a = registry.layout(&make()).unwrap();
    let before = registry.len();
    let b = registry.layout(&make()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), before);
}

#[test]
fn test_field_names_distinguish_records() {
    let registry = TypeRegistry::new();
    let a = registry.resolve(&TypeExpr::record([("x", s(Scalar::Int))])).unwrap();
    let b = registry.resolve(&TypeExpr::record([("y", s(Scalar::Int))])).unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_alias_resolves_to_structural_descriptor() {
    let registry = TypeRegistry::new();
    let body = TypeExpr::record([("x", s(Scalar::Float)), ("y", s(Scalar::Float))]);
    registry.define_alias("Point", body.clone()).unwrap();

    let named = registry.layout(&TypeExpr::named("Point")).unwrap();
    let anonymous = registry.layout(&body).unwrap();
    assert!(Arc::ptr_eq(&named, &anonymous));
}

#[test]
fn test_global_registry_is_shared() {
    let a = tern_layout::global();
    let b = tern_layout::global();
    assert!(Arc::ptr_eq(&a, &b));
    let first = a.resolve(&s(Scalar::ULong)).unwrap();
    assert_eq!(b.resolve(&s(Scalar::ULong)).unwrap(), first);
}

// ===== Recursive Types =====

#[test]
fn test_recursive_alias_through_ref() {
    let registry = TypeRegistry::new();
    list_node(&registry);
    let desc = registry.layout(&TypeExpr::named("Node")).unwrap();

    let next = desc.field("next").unwrap();
    let next_offset = align_up(4, POINTER_ALIGN);
    assert!(next.is_ref);
    assert_eq!(next.ty, desc.id());
    assert_eq!(next.offset, next_offset);
    assert_eq!(desc.size(), align_up(next_offset + POINTER_SIZE, POINTER_ALIGN.max(4)));
    assert_eq!(desc.pointer_map().as_slice(), &[next_offset]);

    // Resolved once per alias name
    let again = registry.layout(&TypeExpr::named("Node")).unwrap();
    assert!(Arc::ptr_eq(&desc, &again));
}

#[test]
fn test_mutually_recursive_aliases() {
    let registry = TypeRegistry::new();
    registry
        .define_alias(
            "Parent",
            TypeExpr::record([
                ("id", s(Scalar::Int)),
                ("child", TypeExpr::reference(TypeExpr::named("Child"))),
            ]),
        )
        .unwrap();
    registry
        .define_alias(
            "Child",
            TypeExpr::record([("parent", TypeExpr::reference(TypeExpr::named("Parent")))]),
        )
        .unwrap();

    let parent = registry.layout(&TypeExpr::named("Parent")).unwrap();
    let child = registry.layout(&TypeExpr::named("Child")).unwrap();
    assert_eq!(parent.field("child").unwrap().ty, child.id());
    assert_eq!(child.field("parent").unwrap().ty, parent.id());
}

#[test]
fn test_recursive_array_of_refs() {
    let registry = TypeRegistry::new();
    registry
        .define_alias(
            "Tree",
            TypeExpr::record([
                ("label", s(Scalar::Int)),
                ("children", TypeExpr::array(TypeExpr::reference(TypeExpr::named("Tree")))),
            ]),
        )
        .unwrap();
    let tree = registry.layout(&TypeExpr::named("Tree")).unwrap();
    let children = registry
        .descriptor(tree.field("children").unwrap().ty)
        .unwrap();
    let array = children.as_array().unwrap();
    assert!(array.element.is_ref);
    assert_eq!(array.element.ty, tree.id());
    assert_eq!(array.element_size, POINTER_SIZE);
}

// ===== Errors =====

#[test]
fn test_value_cycle_is_rejected() {
    let registry = TypeRegistry::new();
    registry
        .define_alias(
            "Bad",
            TypeExpr::record([("x", s(Scalar::Int)), ("inner", TypeExpr::named("Bad"))]),
        )
        .unwrap();
    assert_eq!(
        registry.layout(&TypeExpr::named("Bad")),
        Err(LayoutError::UnboundedCycle {
            name: "Bad".to_string()
        })
    );
}

#[test]
fn test_indirect_value_cycle_is_rejected() {
    let registry = TypeRegistry::new();
    registry
        .define_alias("A", TypeExpr::record([("b", TypeExpr::named("B"))]))
        .unwrap();
    registry
        .define_alias("B", TypeExpr::union([s(Scalar::Int), TypeExpr::named("A")]))
        .unwrap();
    assert_eq!(
        registry.resolve(&TypeExpr::named("A")),
        Err(LayoutError::UnboundedCycle {
            name: "A".to_string()
        })
    );
}

#[test]
fn test_recursion_behind_anonymous_ref() {
    let registry = TypeRegistry::new();
    registry
        .define_alias(
            "List",
            TypeExpr::record([(
                "head",
                TypeExpr::reference(TypeExpr::record([
                    ("value", s(Scalar::Int)),
                    ("rest", TypeExpr::named("List")),
                ])),
            )]),
        )
        .unwrap();

    let list = registry.layout(&TypeExpr::named("List")).unwrap();
    assert_eq!(list.size(), POINTER_SIZE);
    let head = list.field("head").unwrap();
    assert!(head.is_ref);

    let node = registry.descriptor(head.ty).unwrap();
    let rest = node.field("rest").unwrap();
    assert!(!rest.is_ref);
    assert_eq!(rest.ty, list.id());
    assert_eq!(rest.offset, POINTER_SIZE);
    assert_eq!(node.size(), 2 * POINTER_SIZE);
    assert_eq!(node.pointer_map().as_slice(), &[POINTER_SIZE]);
}

#[test]
fn test_recursion_through_ref_to_other_alias() {
    let registry = TypeRegistry::new();
    registry
        .define_alias("A", TypeExpr::record([("b", TypeExpr::reference(TypeExpr::named("B")))]))
        .unwrap();
    registry
        .define_alias(
            "B",
            TypeExpr::record([("a", TypeExpr::named("A")), ("n", s(Scalar::Int))]),
        )
        .unwrap();

    let a = registry.layout(&TypeExpr::named("A")).unwrap();
    let b = registry.layout(&TypeExpr::named("B")).unwrap();
    assert_eq!(a.field("b").unwrap().ty, b.id());
    assert_eq!(b.field("a").unwrap().ty, a.id());
    assert_eq!(b.size(), 2 * POINTER_SIZE);
}

#[test]
fn test_recursion_behind_ref_to_array() {
    let registry = TypeRegistry::new();
    registry
        .define_alias(
            "Forest",
            TypeExpr::record([(
                "trees",
                TypeExpr::reference(TypeExpr::array(TypeExpr::named("Forest"))),
            )]),
        )
        .unwrap();

    let forest = registry.layout(&TypeExpr::named("Forest")).unwrap();
    let trees = registry
        .descriptor(forest.field("trees").unwrap().ty)
        .unwrap();
    let array = trees.as_array().unwrap();
    assert!(!array.element.is_ref);
    assert_eq!(array.element.ty, forest.id());
    assert_eq!(array.element_size, forest.size());
}

#[test]
fn test_alias_that_is_a_ref_to_itself_is_rejected() {
    let registry = TypeRegistry::new();
    registry
        .define_alias("Loop", TypeExpr::reference(TypeExpr::named("Loop")))
        .unwrap();
    assert_eq!(
        registry.resolve(&TypeExpr::named("Loop")),
        Err(LayoutError::RecursiveReference {
            name: "Loop".to_string()
        })
    );
}

#[test]
fn test_invalid_packing() {
    let registry = TypeRegistry::new();
    for n in [0, 3, 12, MAX_PACKING * 2] {
        let result = registry.layout(&TypeExpr::packed_record(n, [("a", s(Scalar::Byte))]));
        assert_eq!(
            result,
            Err(LayoutError::InvalidPacking {
                packing: n,
                max: MAX_PACKING
            })
        );
    }
}

#[test]
fn test_packing_below_field_alignment() {
    let registry = TypeRegistry::new();
    let result = registry.layout(&TypeExpr::packed_record(
        2,
        [("a", s(Scalar::UShort)), ("b", s(Scalar::UInt))],
    ));
    assert_eq!(
        result,
        Err(LayoutError::IncompatiblePacking {
            field: "b".to_string(),
            align: 4,
            packing: 2
        })
    );
}

#[test]
fn test_malformed_input() {
    let registry = TypeRegistry::new();
    assert_eq!(
        registry.resolve(&TypeExpr::union(Vec::new())),
        Err(LayoutError::EmptyUnion)
    );
    assert_eq!(
        registry.resolve(&TypeExpr::record([("a", s(Scalar::Int)), ("a", s(Scalar::Int))])),
        Err(LayoutError::DuplicateField {
            field: "a".to_string()
        })
    );
    assert_eq!(
        registry.resolve(&TypeExpr::named("Missing")),
        Err(LayoutError::UndefinedType {
            name: "Missing".to_string()
        })
    );
}

#[test]
fn test_failed_resolution_leaves_registry_usable() {
    let registry = TypeRegistry::new();
    registry
        .define_alias("Loop", TypeExpr::record([("again", TypeExpr::named("Loop"))]))
        .unwrap();
    assert!(registry.resolve(&TypeExpr::named("Loop")).is_err());
    // A second attempt fails the same way instead of seeing stale state
    assert_eq!(
        registry.resolve(&TypeExpr::named("Loop")),
        Err(LayoutError::UnboundedCycle {
            name: "Loop".to_string()
        })
    );
    assert!(registry.resolve(&s(Scalar::Int)).is_ok());
}
