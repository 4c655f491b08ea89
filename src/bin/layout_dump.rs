//! Print the computed layout of a protocol and optionally decode a message.
//!
//! Usage:
//!   layout_dump [OPTIONS] PROTOCOL.xml [OPERATION MESSAGE.bin]
//!
//! OPERATION is an opcode or an operation name. MESSAGE.bin holds one message body
//! in native byte order.
//!
//! Options:
//!   --property, -p       Lay out with property rules (bounded sequences and strings only)
//!   --param NAME=VALUE   Value for a symbolic extent (repeatable)
//!
//! Set RUST_LOG=debug to see the per-operation layout summary.

use anyhow::{anyhow, bail, Context};
use protolayout::{load_protocol, Operation, ParseOptions, Protocol, TextWriter};
use std::collections::HashMap;
use std::path::PathBuf;

fn print_summary(p: &Protocol) {
    println!("protocol {}", if p.name.is_empty() { "<unnamed>" } else { &p.name });
    if !p.summary_ready() {
        println!("  summary waits for parameters (--param NAME=VALUE)");
        return;
    }
    println!("  data value width:       {} bits", p.data_value_width);
    println!("  data value granularity: {}", p.data_value_granularity);
    println!("  diverse data sizes:     {}", p.diverse_data_sizes);
    println!("  min message values:     {}", p.min_message_values);
    match p.max_message_values {
        Some(max) => println!("  max message values:     {}", max),
        None => println!("  max message values:     unbounded"),
    }
    println!("  variable length:        {}", p.variable_message_length);
    println!("  zero length messages:   {}", p.zero_length_messages);
    println!("  two way:                {}", p.is_two_way);
    println!("  opcodes:                {}", p.n_opcodes);
    println!("  default buffer size:    {}", p.default_buffer_size);
}

fn print_operation(opcode: usize, op: &Operation) {
    println!(
        "operation {} (opcode {}): size {} min {}{}",
        op.name,
        opcode,
        op.my_offset,
        op.min_bytes,
        if op.top_fixed_sequence { " top-fixed-sequence" } else { "" }
    );
    println!("  {:<32} {:>8} {:>8} {:>8} {:>5}  fixed", "member", "offset", "bytes", "element", "align");
    for arg in &op.args {
        for row in arg.layout_rows() {
            println!(
                "  {:<32} {:>8} {:>8} {:>8} {:>5}  {}",
                format!("{}{}", "  ".repeat(row.depth), row.path.rsplit('.').next().unwrap_or(&row.path)),
                row.offset,
                row.n_bytes,
                row.element_bytes,
                row.align,
                row.fixed_layout
            );
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let mut options = ParseOptions::default();
    if let Some(pos) = raw_args.iter().position(|a| a == "--property" || a == "-p") {
        raw_args.remove(pos);
        options = ParseOptions::property();
    }
    let mut params: HashMap<String, i64> = HashMap::new();
    while let Some(pos) = raw_args.iter().position(|a| a == "--param") {
        raw_args.remove(pos);
        if pos >= raw_args.len() {
            bail!("--param needs NAME=VALUE");
        }
        let arg = raw_args.remove(pos);
        let (name, value) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("--param needs NAME=VALUE, got {}", arg))?;
        let value: i64 = value
            .trim()
            .parse()
            .with_context(|| format!("parameter {} is not an integer", name))?;
        params.insert(name.trim().to_string(), value);
    }
    let mut args = raw_args.into_iter();
    let xml_path: PathBuf = match args.next() {
        Some(p) => PathBuf::from(p),
        None => bail!("usage: layout_dump [--property] [--param NAME=VALUE] PROTOCOL.xml [OPERATION MESSAGE.bin]"),
    };

    let mut protocol = load_protocol(&xml_path, &options)?;
    if !params.is_empty() || protocol.operations.iter().any(Operation::uses_parameters) {
        protocol.finalize(&params)?;
    }
    print_summary(&protocol);
    for (opcode, op) in protocol.operations.iter().enumerate() {
        print_operation(opcode, op);
    }

    if let Some(which) = args.next() {
        let msg_path = args
            .next()
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("missing message file after operation {}", which))?;
        let opcode = match which.parse::<usize>() {
            Ok(n) => n,
            Err(_) => protocol
                .find_operation(&which)
                .map(|(i, _)| i)
                .ok_or_else(|| anyhow!("no operation named {}", which))?,
        };
        let data = std::fs::read(&msg_path).with_context(|| format!("reading {}", msg_path.display()))?;
        let mut writer = TextWriter::new();
        let used = protocol.write_message(&mut writer, opcode, &data)?;
        print!("{}", writer.into_text());
        if used != data.len() {
            println!("({} trailing bytes after the message)", data.len() - used);
        }
    }
    Ok(())
}
