//! Message fuzz target: walk arbitrary bytes as messages of a fixed protocol.
//! The first byte picks the opcode, the rest is the message body. Walking must not
//! panic; it should return the bytes consumed or a CodecError.
//! Build with: cargo fuzz run message_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const PROTOCOL: &str = r#"
<Protocol Name="fuzz">
  <Operation Name="samples"><Argument Name="iq" Type="Short" SequenceLength="64"/></Operation>
  <Operation Name="mixed">
    <Argument Name="flag" Type="Bool"/>
    <Argument Name="label" Type="String"/>
    <Argument Name="pairs" Type="Struct" SequenceLength="0">
      <Member Name="a" Type="UChar"/>
      <Member Name="b" Type="Double" ArrayLength="2"/>
    </Argument>
    <Argument Name="rows" Type="Type" SequenceLength="3">
      <Type Type="ULong" SequenceLength="0"/>
    </Argument>
  </Operation>
  <Operation Name="text"><Argument Name="s" Type="String" StringLength="16"/></Operation>
</Protocol>
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let protocol = match protolayout::parse_protocol_str(PROTOCOL, &protolayout::ParseOptions::default()) {
        Ok(p) => p,
        Err(_) => return,
    };
    let (opcode, body) = match data.split_first() {
        Some((op, body)) => (*op as usize % 4, body),
        None => return,
    };
    let mut w = protolayout::TextWriter::new();
    let _ = protocol.write_message(&mut w, opcode, body);
    if let Ok(v) = protocol.decode_message(opcode, body) {
        let _ = protocol.encode_message(opcode, &v);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run message_fuzz");
}
