//! Layout computation: sizes, offsets, alignment, bounds and symbolic extents.

use protolayout::{
    align_members, parse_member_str, BaseType, GroupLayout, LayoutRules, Member, MetadataError, ParseOptions, Value,
};
use std::collections::HashMap;

fn layout(mut m: Member) -> Member {
    m.compute_layout(&LayoutRules::message()).expect("layout");
    m
}

#[test]
fn test_scalar_sizes_and_alignment() {
    let cases = [
        (BaseType::Boolean, 1),
        (BaseType::Char, 1),
        (BaseType::Octet, 1),
        (BaseType::Short, 2),
        (BaseType::UShort, 2),
        (BaseType::Long, 4),
        (BaseType::ULong, 4),
        (BaseType::Float, 4),
        (BaseType::Double, 8),
        (BaseType::LongLong, 8),
        (BaseType::ULongLong, 8),
    ];
    for (bt, size) in cases {
        let m = layout(Member::scalar("x", bt));
        assert_eq!(m.layout.element_bytes, size, "{}", bt);
        assert_eq!(m.layout.n_bytes, size, "{}", bt);
        assert_eq!(m.layout.align, size, "{}", bt);
        assert_eq!(m.layout.n_bits, size * 8, "{}", bt);
        assert!(m.layout.fixed_layout);
    }
    let e = layout(Member::enumeration("e", ["a", "b"]));
    assert_eq!((e.layout.n_bytes, e.layout.align, e.layout.n_bits), (4, 4, 32));
}

#[test]
fn test_string_sizes() {
    for (len, bytes) in [(1, 4), (3, 4), (4, 8), (16, 20), (17, 20)] {
        let m = layout(Member::string("s", len));
        assert_eq!(m.layout.element_bytes, bytes, "length {}", len);
        assert_eq!(m.layout.align, 4);
        assert!(m.layout.fixed_layout);
    }
    let unbounded = layout(Member::string("s", 0));
    assert_eq!(unbounded.layout.n_bytes, 4);
    assert!(!unbounded.layout.fixed_layout);
    assert_eq!(unbounded.min_bytes(), 1);
}

#[test]
fn test_struct_offsets_are_aligned_and_increasing() {
    let mut members = vec![
        Member::scalar("a", BaseType::Octet),
        Member::scalar("b", BaseType::Double),
        Member::scalar("c", BaseType::Short),
        Member::string("d", 5),
        Member::scalar("e", BaseType::Char).with_array(&[3]),
        Member::scalar("f", BaseType::ULong).with_sequence(2),
    ];
    let mut group = GroupLayout::default();
    align_members(&mut members, &mut group, &LayoutRules::message()).expect("layout");
    let mut end = 0;
    for m in &members {
        assert_eq!(m.layout.offset % m.layout.align, 0, "{} misaligned", m.name);
        assert!(m.layout.offset >= end, "{} overlaps its predecessor", m.name);
        end = m.layout.offset + m.layout.n_bytes;
    }
    assert_eq!(group.offset, end);
    assert_eq!(group.max_align, 8);
    let offsets: Vec<usize> = members.iter().map(|m| m.layout.offset).collect();
    assert_eq!(offsets, vec![0, 8, 16, 20, 28, 32]);
    assert!(group.diverse_sizes);
    assert_eq!(group.min_size_bits, 8);
    assert!(group.sub32);
}

#[test]
fn test_struct_element_size_is_offset_after_last_member() {
    let m = layout(Member::structure(
        "s",
        vec![
            Member::scalar("a", BaseType::Octet),
            Member::scalar("b", BaseType::Double),
            Member::scalar("c", BaseType::Short),
        ],
    ));
    assert_eq!(m.layout.element_bytes, 18);
    assert_eq!(m.layout.align, 8);
    assert_eq!(m.find_member("c").map(|c| c.layout.offset), Some(16));
}

#[test]
fn test_array_of_structs_rounds_elements() {
    let m = layout(
        Member::structure(
            "s",
            vec![
                Member::scalar("a", BaseType::Octet),
                Member::scalar("b", BaseType::UShort),
                Member::scalar("c", BaseType::Octet),
            ],
        )
        .with_array(&[3]),
    );
    // 5 byte element padded to 6
    assert_eq!(m.layout.element_bytes, 5);
    assert_eq!(m.layout.n_bytes, 18);
    assert_eq!(m.layout.n_items, 3);
}

#[test]
fn test_multidimensional_array() {
    let m = layout(Member::scalar("m", BaseType::ULong).with_array(&[2, 3]));
    assert_eq!(m.layout.n_items, 6);
    assert_eq!(m.layout.n_bytes, 24);
    assert_eq!(m.layout.element_bytes, 4);
}

#[test]
fn test_bounded_sequence_reserves_count_slot() {
    let m = layout(Member::scalar("v", BaseType::Octet).with_sequence(10));
    assert_eq!(m.layout.align, 4);
    assert_eq!(m.layout.data_align, 1);
    assert_eq!(m.layout.n_bytes, 14);
    assert!(m.layout.fixed_layout);

    let d = layout(Member::scalar("d", BaseType::Double).with_sequence(2));
    // count slot padded to the 8-byte alignment
    assert_eq!(d.layout.align, 8);
    assert_eq!(d.layout.n_bytes, 24);
}

#[test]
fn test_unbounded_sequence_is_variable() {
    let mut m = Member::scalar("v", BaseType::Short).with_sequence(0);
    let group = m.compute_layout(&LayoutRules::message()).expect("layout");
    assert!(group.unbounded);
    assert!(group.variable);
    assert!(!m.layout.fixed_layout);
    assert!(m.layout.element_fixed);
    // one element plus the count word
    assert_eq!(m.layout.n_bytes, 6);
    assert_eq!(m.min_bytes(), 4);
}

#[test]
fn test_property_rules_reject_unbounded() {
    let mut seq = Member::scalar("v", BaseType::ULong).with_sequence(0);
    let err = seq.compute_layout(&LayoutRules::property()).unwrap_err();
    assert!(matches!(err, MetadataError::UnboundedSequence(_)));
    assert!(err.to_string().contains("must be bounded"));

    let mut s = Member::string("s", 0);
    assert!(matches!(
        s.compute_layout(&LayoutRules::property()),
        Err(MetadataError::UnboundedString(_))
    ));

    let mut strings = Member::string("s", 8).with_sequence(4);
    assert!(matches!(
        strings.compute_layout(&LayoutRules::property()),
        Err(MetadataError::StringSequence(_))
    ));
    assert!(strings.compute_layout(&LayoutRules::message()).is_ok());
}

#[test]
fn test_oversized_array_is_rejected() {
    let mut m = Member::scalar("big", BaseType::Double).with_array(&[1 << 20, 1 << 10]);
    let err = m.compute_layout(&LayoutRules::message()).unwrap_err();
    assert!(matches!(err, MetadataError::SizeOverflow(_)));
    assert!(err.to_string().contains("too large"));

    let mut m = Member::scalar("many", BaseType::Octet).with_array(&[1 << 16, 1 << 16]);
    assert!(matches!(
        m.compute_layout(&LayoutRules::message()),
        Err(MetadataError::CountOverflow(_))
    ));
}

#[test]
fn test_type_wrapper_must_wrap_a_sequence() {
    let mut bad = Member::wrapper("t", Member::scalar("x", BaseType::ULong));
    assert!(matches!(
        bad.compute_layout(&LayoutRules::message()),
        Err(MetadataError::Invalid { .. })
    ));

    let good = layout(Member::wrapper("t", Member::scalar("x", BaseType::ULong).with_sequence(3)).with_array(&[2]));
    // each item: count word plus three longs
    assert_eq!(good.layout.element_bytes, 16);
    assert_eq!(good.layout.n_bytes, 32);
    assert!(good.layout.fixed_layout);
}

#[test]
fn test_empty_struct_is_rejected() {
    let mut m = Member::structure("s", Vec::new());
    assert!(m.compute_layout(&LayoutRules::message()).is_err());
}

#[test]
fn test_sequence_inside_struct_makes_it_variable() {
    let m = layout(Member::structure(
        "s",
        vec![
            Member::scalar("n", BaseType::ULong),
            Member::string("name", 0),
        ],
    ));
    assert!(!m.layout.fixed_layout);
    assert!(!m.layout.element_fixed);
    assert_eq!(m.min_bytes(), 5);
}

#[test]
fn test_symbolic_extents_resolve_on_finalize() {
    let xml = r#"<Property Name="taps" Type="Short" ArrayLength="nchan * 2" Default="1, 2, 3"/>"#;
    let mut m = parse_member_str(xml, &ParseOptions::default()).expect("parse");
    assert!(m.uses_parameters());
    assert!(!m.layout.computed);
    assert!(m.default.is_none());
    assert_eq!(m.default_expr.as_deref(), Some("1, 2, 3"));
    assert!(matches!(
        m.compute_layout(&LayoutRules::message()),
        Err(MetadataError::Unresolved { .. })
    ));

    let mut params = HashMap::new();
    params.insert("nchan".to_string(), 2i64);
    m.finalize(&params, &LayoutRules::message()).expect("finalize");
    assert!(!m.uses_parameters());
    assert_eq!(m.layout.n_items, 4);
    assert_eq!(m.layout.n_bytes, 8);
    assert_eq!(
        m.default,
        Some(Value::List(vec![Value::Short(1), Value::Short(2), Value::Short(3), Value::Short(0)]))
    );
}

#[test]
fn test_unknown_symbol_fails_finalize() {
    let xml = r#"<Property Name="v" Type="ULong" SequenceLength="depth"/>"#;
    let mut m = parse_member_str(xml, &ParseOptions::default()).expect("parse");
    let params: HashMap<String, i64> = HashMap::new();
    assert!(m.finalize(&params, &LayoutRules::message()).is_err());
}

#[test]
fn test_struct_from_xml() {
    let xml = r#"
        <Property Name="cfg" Type="Struct">
          <Member Name="gain" Type="Float"/>
          <Member Name="mode" Type="Enum" Enums="off, low, high"/>
          <Member Name="label" Type="String" StringLength="10"/>
          <Member Name="taps" Type="Short" SequenceLength="4"/>
        </Property>"#;
    let m = parse_member_str(xml, &ParseOptions::property()).expect("parse");
    let offsets: Vec<(String, usize)> = m
        .members()
        .iter()
        .map(|f| (f.name.clone(), f.layout.offset))
        .collect();
    assert_eq!(
        offsets,
        vec![
            ("gain".to_string(), 0),
            ("mode".to_string(), 4),
            ("label".to_string(), 8),
            ("taps".to_string(), 20),
        ]
    );
    assert_eq!(m.layout.n_bytes, 32);
    assert!(m.layout.fixed_layout);

    let rows = m.layout_rows();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].path, "cfg");
    assert_eq!(rows[4].path, "cfg.taps");
    assert_eq!(rows[4].depth, 1);
}

#[test]
fn test_xml_rejects_bad_member_metadata() {
    let opts = ParseOptions::default();
    assert!(matches!(
        parse_member_str(r#"<Property Name="x" Type="Quad"/>"#, &opts),
        Err(MetadataError::UnknownType { .. })
    ));
    assert!(matches!(
        parse_member_str(r#"<Property Name="x" Type="ULong" Colour="red"/>"#, &opts),
        Err(MetadataError::InvalidAttribute { .. })
    ));
    assert!(matches!(
        parse_member_str(r#"<Property Type="ULong"/>"#, &opts),
        Err(MetadataError::MissingAttribute { .. })
    ));
    assert!(matches!(
        parse_member_str(r#"<Property Name="e" Type="Enum" Enums="a, b, A"/>"#, &opts),
        Err(MetadataError::DuplicateName { .. })
    ));
    assert!(matches!(
        parse_member_str(r#"<Property Name="s" Type="Struct"><Member Name="a"/><Member Name="A"/></Property>"#, &opts),
        Err(MetadataError::DuplicateName { .. })
    ));
    assert!(matches!(
        parse_member_str(r#"<Property Name="x" Type="ULong" SequenceLength="4" SequenceSize="4"/>"#, &opts),
        Err(MetadataError::InvalidAttribute { .. })
    ));
}

#[test]
fn test_xml_type_wrapper_inherits_name() {
    let xml = r#"
        <Property Name="rows" Type="Type" SequenceLength="2">
          <Type Type="UShort" SequenceLength="3"/>
        </Property>"#;
    let m = parse_member_str(xml, &ParseOptions::default()).expect("parse");
    match &m.value_type.kind {
        protolayout::TypeKind::Type(inner) => assert_eq!(inner.name, "rows"),
        other => panic!("expected a type wrapper, got {:?}", other),
    }
    // inner: count + 3 shorts = 10, padded to 12 per element
    assert_eq!(m.layout.element_bytes, 10);
    assert_eq!(m.layout.n_bytes, 28);
}
