use criterion::{Criterion, criterion_group, criterion_main};
use packcraft::{
    field::{FieldDef, FieldType},
    int::IntType,
    schema::Schema,
    value::Value,
};

fn gen_schema(field_count: usize) -> Schema {
    let mut fields = Vec::with_capacity(field_count * 2);

    for i in 0..field_count {
        fields.push(
            FieldDef::new(format!("len{}", i), FieldType::Int(IntType::U16))
                .length_of(format!("data{}", i)),
        );
        fields.push(
            FieldDef::new(format!("data{}", i), FieldType::Bytes).length_from(format!("len{}", i)),
        );
    }

    Schema::compile("bench", fields).unwrap()
}

fn gen_payload(len: usize) -> Vec<u8> {
    // Deterministic but non-trivial pattern
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

fn bench_record_pack(c: &mut Criterion) {
    for &field_count in &[1usize, 10, 50] {
        let schema = gen_schema(field_count);
        let record = schema
            .build((0..field_count).map(|i| (format!("data{}", i), Value::from(gen_payload(i + 1)))))
            .unwrap();
        let packet = record.pack().unwrap();

        c.bench_function(&format!("pack_{}_fields", field_count * 2), |b| {
            b.iter(|| {
                let _ = record.pack().unwrap();
            })
        });

        c.bench_function(&format!("unpack_{}_fields", field_count * 2), |b| {
            b.iter(|| {
                let _ = schema.unpack(&packet).unwrap();
            })
        });
    }
}

criterion_group!(benches, bench_record_pack);
criterion_main!(benches);
