//! Benchmark: walk vs measure vs decode vs encode for a batch of messages of a
//! small radio-style protocol. Walk streams each message into a writer that only
//! counts callbacks; decode and encode go through owned values.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use protolayout::codec::{CodecError, StructureHooks, Writer};
use protolayout::{parse_protocol_str, Member, ParseOptions, Protocol, Value, ValueReader};

const PROTOCOL: &str = r#"
<Protocol Name="radio">
  <Operation Name="samples">
    <Argument Name="iq" Type="Short" SequenceLength="4096"/>
  </Operation>
  <Operation Name="status">
    <Argument Name="frequency" Type="Double"/>
    <Argument Name="gains" Type="Float" ArrayLength="4"/>
    <Argument Name="label" Type="String" StringLength="32"/>
    <Argument Name="peaks" Type="Struct" SequenceLength="16">
      <Member Name="bin" Type="ULong"/>
      <Member Name="level" Type="Float"/>
    </Argument>
    <Argument Name="notes" Type="String" SequenceLength="0"/>
  </Operation>
</Protocol>
"#;

#[derive(Default)]
struct Counter {
    calls: usize,
    bytes: usize,
}

impl StructureHooks for Counter {}

impl Writer for Counter {
    fn begin_sequence(&mut self, _m: &Member, _n: usize) -> Result<(), CodecError> {
        self.calls += 1;
        Ok(())
    }
    fn write_string(&mut self, _m: &Member, data: &[u8], _first: bool, _top: bool) -> Result<(), CodecError> {
        self.calls += 1;
        self.bytes += data.len();
        Ok(())
    }
    fn write_data(&mut self, _m: &Member, data: &[u8], _n: usize) -> Result<(), CodecError> {
        self.calls += 1;
        self.bytes += data.len();
        Ok(())
    }
}

fn sample_messages(p: &Protocol) -> Vec<(usize, Value, Vec<u8>)> {
    let samples = Value::Struct(vec![(
        "iq".to_string(),
        Value::List((0..2048).map(|i| Value::Short((i % 200 - 100) as i16)).collect()),
    )]);
    let status = Value::Struct(vec![
        ("frequency".to_string(), Value::Double(101.1e6)),
        (
            "gains".to_string(),
            Value::List(vec![Value::Float(0.5), Value::Float(1.0), Value::Float(1.5), Value::Float(2.0)]),
        ),
        ("label".to_string(), Value::String("front end".to_string())),
        (
            "peaks".to_string(),
            Value::List(
                (0..8)
                    .map(|i| {
                        Value::Struct(vec![
                            ("bin".to_string(), Value::ULong(i * 64)),
                            ("level".to_string(), Value::Float(i as f32 * 0.25)),
                        ])
                    })
                    .collect(),
            ),
        ),
        (
            "notes".to_string(),
            Value::List(vec![Value::String("agc".to_string()), Value::String("locked".to_string())]),
        ),
    ]);
    [(0, samples), (1, status)]
        .into_iter()
        .map(|(opcode, v)| {
            let bytes = p.encode_message(opcode, &v).expect("encode");
            (opcode, v, bytes)
        })
        .collect()
}

fn bench_codec(c: &mut Criterion) {
    let protocol = parse_protocol_str(PROTOCOL, &ParseOptions::default()).expect("parse protocol");
    let messages = sample_messages(&protocol);
    let total_bytes: usize = messages.iter().map(|(_, _, b)| b.len()).sum();
    eprintln!("codec: {} messages, {} bytes per batch", messages.len(), total_bytes);

    c.bench_function("walk_messages", |b| {
        b.iter(|| {
            let mut counter = Counter::default();
            for (opcode, _, bytes) in &messages {
                protocol
                    .write_message(&mut counter, *opcode, black_box(bytes))
                    .expect("walk");
            }
            black_box(counter.calls + counter.bytes)
        });
    });

    c.bench_function("measure_messages", |b| {
        b.iter(|| {
            let mut total = 0usize;
            for (opcode, value, _) in &messages {
                let fields = value.as_struct().unwrap_or(&[]);
                total += protocol
                    .measure_message(&mut ValueReader::for_message(fields), *opcode)
                    .expect("measure");
            }
            black_box(total)
        });
    });

    c.bench_function("decode_messages", |b| {
        b.iter(|| {
            for (opcode, _, bytes) in &messages {
                black_box(protocol.decode_message(*opcode, black_box(bytes)).expect("decode"));
            }
        });
    });

    c.bench_function("encode_messages", |b| {
        b.iter(|| {
            for (opcode, value, _) in &messages {
                black_box(protocol.encode_message(*opcode, black_box(value)).expect("encode"));
            }
        });
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
