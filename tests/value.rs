//! Value text: parsing, unparsing, defaults and zero values.

use protolayout::{parse_member_str, BaseType, LayoutRules, Member, ParseOptions, Value, ValueError};

fn laid_out(mut m: Member) -> Member {
    m.compute_layout(&LayoutRules::message()).expect("layout");
    m
}

#[test]
fn test_scalar_text() {
    let cases = [
        (BaseType::Boolean, "true", Value::Bool(true)),
        (BaseType::Char, "'x'", Value::Char(b'x')),
        (BaseType::Char, "10", Value::Char(10)),
        (BaseType::Octet, "0xff", Value::Octet(255)),
        (BaseType::Short, "-32768", Value::Short(-32768)),
        (BaseType::UShort, "65535", Value::UShort(65535)),
        (BaseType::Long, "-7", Value::Long(-7)),
        (BaseType::ULong, "4000000000", Value::ULong(4_000_000_000)),
        (BaseType::LongLong, "-0x10", Value::LongLong(-16)),
        (BaseType::ULongLong, "18446744073709551615", Value::ULongLong(u64::MAX)),
        (BaseType::Float, "0.5", Value::Float(0.5)),
        (BaseType::Double, "1e3", Value::Double(1000.0)),
        (BaseType::Double, "3", Value::Double(3.0)),
    ];
    for (bt, text, expected) in cases {
        let m = Member::scalar("x", bt);
        assert_eq!(Value::parse(&m, text).expect(text), expected, "{} as {}", text, bt);
    }
}

#[test]
fn test_out_of_range_and_wrong_kind() {
    let octet = Member::scalar("o", BaseType::Octet);
    assert!(matches!(Value::parse(&octet, "256"), Err(ValueError::Invalid { .. })));
    assert!(matches!(Value::parse(&octet, "-1"), Err(ValueError::Invalid { .. })));
    assert!(Value::parse(&octet, "\"text\"").is_err());
    assert!(Value::parse(&octet, "1, 2").is_err());
    let flag = Member::scalar("b", BaseType::Boolean);
    assert!(Value::parse(&flag, "2").is_err());
    assert!(matches!(Value::parse(&flag, "{"), Err(ValueError::Syntax(_))));
}

#[test]
fn test_string_text_and_escapes() {
    let m = Member::string("s", 0);
    let v = Value::parse(&m, r#""tab\there \"quoted\"""#).expect("parse");
    assert_eq!(v, Value::String("tab\there \"quoted\"".to_string()));
    assert_eq!(v.unparse(&m).expect("unparse"), r#""tab\there \"quoted\"""#);

    let bounded = Member::string("s", 3);
    assert!(Value::parse(&bounded, "\"abcd\"").is_err());
    assert!(Value::parse(&bounded, r#""a\0b""#).is_err());
}

#[test]
fn test_enum_by_name_or_index() {
    let m = Member::enumeration("mode", ["off", "low", "high"]);
    assert_eq!(Value::parse(&m, "HIGH").expect("name"), Value::Enum(2));
    assert_eq!(Value::parse(&m, "1").expect("index"), Value::Enum(1));
    assert!(Value::parse(&m, "max").is_err());
    assert!(Value::parse(&m, "3").is_err());
    assert_eq!(Value::Enum(2).unparse(&m).expect("unparse"), "high");
    assert!(Value::Enum(5).unparse(&m).is_err());
}

#[test]
fn test_arrays_pad_with_zero() {
    let m = Member::scalar("a", BaseType::Long).with_array(&[4]);
    let v = Value::parse(&m, "1, 2").expect("parse");
    assert_eq!(
        v,
        Value::List(vec![Value::Long(1), Value::Long(2), Value::Long(0), Value::Long(0)])
    );
    assert_eq!(v.unparse(&m).expect("unparse"), "1, 2, 0, 0");
    assert_eq!(Value::parse(&m, "{1, 2, 3, 4}").expect("braced").as_list().map(<[Value]>::len), Some(4));
    assert!(Value::parse(&m, "1, 2, 3, 4, 5").is_err());
}

#[test]
fn test_sequence_bound_in_text() {
    let m = Member::scalar("v", BaseType::UShort).with_sequence(2);
    assert_eq!(Value::parse(&m, "").expect("empty"), Value::List(Vec::new()));
    assert!(Value::parse(&m, "1, 2, 3").is_err());
    let nested = Member::scalar("v", BaseType::UShort).with_array(&[2]).with_sequence(2);
    let v = Value::parse(&nested, "{1, 2}").expect("one element");
    assert_eq!(v.as_list().map(<[Value]>::len), Some(1));
    assert!(Value::parse(&nested, "1, 2").is_err());
}

#[test]
fn test_struct_text_round_trip() {
    let m = Member::structure(
        "cfg",
        vec![
            Member::scalar("gain", BaseType::Float),
            Member::enumeration("mode", ["off", "on"]),
            Member::string("name", 8),
            Member::scalar("taps", BaseType::Short).with_sequence(4),
            Member::structure(
                "inner",
                vec![Member::scalar("x", BaseType::Char), Member::scalar("y", BaseType::Boolean)],
            ),
        ],
    );
    let text = "{gain 1.5, mode on, name \"rx\", taps {1, -2}, inner {x 'q', y true}}";
    let v = Value::parse(&m, text).expect("parse");
    assert_eq!(v.field("mode"), Some(&Value::Enum(1)));
    assert_eq!(v.field("inner").and_then(|i| i.field("x")), Some(&Value::Char(b'q')));
    assert_eq!(v.unparse(&m).expect("unparse"), text);
    assert_eq!(Value::parse(&m, &v.unparse(&m).expect("unparse")).expect("reparse"), v);

    // the outer braces are optional and missing members are zero
    let partial = Value::parse(&m, "name \"x\"").expect("partial");
    assert_eq!(partial.field("gain"), Some(&Value::Float(0.0)));
    assert_eq!(partial.field("taps"), Some(&Value::List(Vec::new())));
    assert_eq!(partial.field("inner").and_then(|i| i.field("y")), Some(&Value::Bool(false)));

    assert!(Value::parse(&m, "{colour 1}").is_err());
    assert!(Value::parse(&m, "{gain 1, gain 2}").is_err());
    assert!(Value::parse(&m, "{taps 1}").is_err());
}

#[test]
fn test_unprintable_char_unparses_as_number() {
    let m = Member::scalar("c", BaseType::Char);
    assert_eq!(Value::Char(7).unparse(&m).expect("unparse"), "7");
    assert_eq!(Value::Char(b'a').unparse(&m).expect("unparse"), "'a'");
    assert_eq!(Value::parse(&m, "7").expect("parse"), Value::Char(7));
}

#[test]
fn test_unparse_rejects_mismatched_values() {
    let m = Member::scalar("x", BaseType::ULong);
    assert!(Value::Short(1).unparse(&m).is_err());
    let seq = Member::scalar("x", BaseType::ULong).with_sequence(0);
    assert!(Value::ULong(1).unparse(&seq).is_err());
}

#[test]
fn test_zero_values() {
    let m = Member::structure(
        "s",
        vec![
            Member::scalar("d", BaseType::Double).with_array(&[2]),
            Member::string("t", 4),
            Member::enumeration("e", ["a"]),
            Member::scalar("q", BaseType::ULong).with_sequence(3),
        ],
    );
    assert_eq!(
        Value::zero(&m),
        Value::Struct(vec![
            ("d".to_string(), Value::List(vec![Value::Double(0.0), Value::Double(0.0)])),
            ("t".to_string(), Value::String(String::new())),
            ("e".to_string(), Value::Enum(0)),
            ("q".to_string(), Value::List(Vec::new())),
        ])
    );
    let m = laid_out(m);
    let bytes = m.encode_value(&Value::zero(&m)).expect("encode");
    assert_eq!(bytes.len(), m.layout.n_bytes);
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn test_defaults_from_xml() {
    let xml = r#"<Property Name="coeffs" Type="Short" SequenceLength="4" Default="3, -4"/>"#;
    let m = parse_member_str(xml, &ParseOptions::default()).expect("parse");
    assert_eq!(m.default, Some(Value::List(vec![Value::Short(3), Value::Short(-4)])));

    let bad = r#"<Property Name="coeffs" Type="Short" Default="big"/>"#;
    assert!(parse_member_str(bad, &ParseOptions::default()).is_err());

    let no_defaults = ParseOptions {
        default_attr: None,
        ..ParseOptions::default()
    };
    assert!(parse_member_str(xml, &no_defaults).is_err());

    let custom = ParseOptions {
        default_attr: Some("Initial".to_string()),
        ..ParseOptions::default()
    };
    let m = parse_member_str(r#"<Property Name="n" Type="ULong" Initial="9"/>"#, &custom).expect("parse");
    assert_eq!(m.default, Some(Value::ULong(9)));
}

#[test]
fn test_display_forms() {
    assert_eq!(Value::Enum(3).to_string(), "#3");
    assert_eq!(
        Value::Struct(vec![("a".to_string(), Value::List(vec![Value::Octet(1), Value::Octet(2)]))]).to_string(),
        "{a {1, 2}}"
    );
    assert_eq!(Value::String("q\"".to_string()).to_string(), "\"q\\\"\"");
    assert_eq!(Value::ULongLong(5).as_i64(), Some(5));
    assert_eq!(Value::Float(0.25).as_f64(), Some(0.25));
}
