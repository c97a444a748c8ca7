use pretty_assertions::assert_eq;
use standoff_codec::{
    flatten, parse, reconstruct, reconstruct_subtree, FieldMapping, FieldSpec, MappingSpec,
    OffsetUnit,
};

#[test]
fn test_message_with_inline_element() {
    let root = parse(r#"<msg num="1">hello, <xml num="2" attr="extra"/> world!</msg>"#).unwrap();
    let flat = flatten(&root, OffsetUnit::Codepoint);

    assert_eq!(flat.text, "hello,  world!");
    assert_eq!(flat.tags.len(), 2);

    let msg = &flat.tags[0];
    assert_eq!((msg.name.as_str(), msg.start, msg.end), ("msg", 0, 14));
    assert_eq!(msg.attributes.len(), 1);

    let xml = &flat.tags[1];
    assert_eq!((xml.name.as_str(), xml.start, xml.end), ("xml", 7, 7));
    assert_eq!(xml.attributes["num"], "2");
    assert_eq!(xml.attributes["attr"], "extra");
}

#[test]
fn test_empty_chain_round_trip() {
    let root = parse("<x><p><q/></p></x>").unwrap();
    let flat = flatten(&root, OffsetUnit::Codepoint);
    assert_eq!(flat.text, "");

    let parents: Vec<Option<&str>> = flat.tags.iter().map(|t| t.xml_parent.as_deref()).collect();
    assert_eq!(parents, vec![None, Some(flat.tags[0].id.as_str()), Some(flat.tags[1].id.as_str())]);

    let back = reconstruct(&flat.text, &flat.tags, flat.unit).unwrap();
    assert_eq!(back.to_xml(), "<x><p><q/></p></x>");
}

#[test]
fn test_mapped_body_offsets_are_relative_to_body() {
    let spec = MappingSpec {
        fields: vec![
            FieldSpec::new("body", "text", "/doc/body"),
            FieldSpec::new("title", "keyword", "/doc/title"),
        ],
        ..MappingSpec::default()
    };
    let mapping = FieldMapping::new(&spec).unwrap();
    let root = parse("<doc><title>T</title><body><p>one</p><p>two</p></body></doc>").unwrap();
    let mapped = mapping.apply(&root).unwrap();
    assert_eq!(mapped.fields["title"], "T");

    let flat = flatten(mapped.body, OffsetUnit::Codepoint);
    assert_eq!(flat.text, "onetwo");
    assert_eq!(flat.tags[0].name, "body");
    assert_eq!((flat.tags[2].start, flat.tags[2].end), (3, 6));
}

#[test]
fn test_tei_subtree_keeps_namespace() {
    let xml = r#"<TEI xmlns="http://www.tei-c.org/ns/1.0"><text><body><p n="1">first</p><p n="2">second</p></body></text></TEI>"#;
    let flat = flatten(&parse(xml).unwrap(), OffsetUnit::Utf16);
    let second = flat
        .tags
        .iter()
        .find(|t| t.attributes.get("n").map(String::as_str) == Some("2"))
        .unwrap();

    let p = reconstruct_subtree(&flat.text, &flat.tags, flat.unit, &second.id).unwrap();
    assert_eq!(
        p.to_xml(),
        r#"<p xmlns="http://www.tei-c.org/ns/1.0" n="2">second</p>"#
    );
}
