//! Benchmark: parse and build a table of length-prefixed records, and the same
//! table as NDF objects through the XML projection.

use bingrammar::{ndf, Encoding, Field, Len, NoopObserver, NumberType, Tree};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Cursor;

const RECORDS: u32 = 2000;

fn record_table() -> Field {
    let record = Field::structure([
        ("id", Field::u32_le()),
        ("len", Field::rebuild(|c| c.size("payload"), Field::u16_le())),
        ("payload", Field::bytes_with(|c| c.parsed_u64("len"))),
        ("name", Field::pascal_string(Encoding::UTF8, NumberType::U8)),
    ]);
    Field::structure([
        ("count", Field::rebuild(|c| c.len("records"), Field::u32_le())),
        ("records", Field::array(Len::dynamic(|c| c.parsed_u64("count")), record)),
    ])
}

fn table_bytes() -> Vec<u8> {
    let mut out = RECORDS.to_le_bytes().to_vec();
    for id in 0..RECORDS {
        let payload_len = (id % 32) as u16;
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&payload_len.to_le_bytes());
        out.extend((0..payload_len).map(|b| b as u8));
        let name = format!("record-{id}");
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
    }
    out
}

fn ndf_list(len: u32) -> Vec<u8> {
    let mut out = [0x11u32, len].iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<u8>>();
    for i in 0..len {
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&i.to_le_bytes());
    }
    out
}

fn bench_parse_build(c: &mut Criterion) {
    let bytes = table_bytes();
    let mut tree = Tree::new(record_table());
    tree.parse_bytes(&bytes).expect("parse table");
    eprintln!("parse_build: {} records, {} bytes", RECORDS, bytes.len());

    c.bench_function("parse_record_table", |b| {
        b.iter(|| {
            tree.parse_with(&mut Cursor::new(black_box(&bytes[..])), &mut NoopObserver)
                .expect("parse");
        });
    });

    c.bench_function("build_record_table", |b| {
        b.iter(|| {
            let mut out = Cursor::new(Vec::with_capacity(bytes.len()));
            tree.build_with(&mut out, &mut NoopObserver).expect("build");
            black_box(out.into_inner())
        });
    });

    let list = ndf_list(RECORDS);
    let mut values = Tree::new(ndf::value_grammar());
    values.parse_bytes(&list).expect("parse list");

    c.bench_function("ndf_list_to_xml", |b| {
        b.iter(|| black_box(values.build_xml(ndf::NDF_TYPE).expect("export").to_xml_string().expect("write")));
    });

    let projected = values.build_xml(ndf::NDF_TYPE).expect("export");
    c.bench_function("ndf_list_from_xml", |b| {
        b.iter(|| {
            let mut back = Tree::new(ndf::value_grammar());
            back.parse_xml(black_box(&projected)).expect("import");
            black_box(back.build_bytes().expect("build"))
        });
    });
}

criterion_group!(benches, bench_parse_build);
criterion_main!(benches);
