use criterion::{black_box, criterion_group, criterion_main, Criterion};
use weft_bytecode::{access, ClassBuilder, ClassNode, Opcode};

fn wide_class(methods: usize) -> ClassNode {
    let mut builder = ClassBuilder::new("bench/Wide").field(access::PRIVATE, "total", "J");
    for i in 0..methods {
        let name = format!("step{}", i);
        builder = builder.method(access::PUBLIC, &name, "(J)J", |m| {
            let skip = m.define_label();
            m.emit_line(i as u32)
                .emit_lload(1)
                .emit_op(Opcode::Lconst1)
                .emit_op(Opcode::Lcmp)
                .emit_jump(Opcode::Ifle, skip)
                .emit_aload(0)
                .emit_getfield("bench/Wide", "total", "J")
                .emit_lload(1)
                .emit_op(Opcode::Ladd)
                .emit_op(Opcode::Lreturn)
                .mark_label(skip)
                .emit_lload(1)
                .emit_op(Opcode::Lreturn);
        });
    }
    builder.build()
}

fn bench_encode(c: &mut Criterion) {
    let class = wide_class(64);
    c.bench_function("encode_64_methods", |b| b.iter(|| black_box(&class).encode()));
}

fn bench_decode(c: &mut Criterion) {
    let bytes = wide_class(64).encode();
    c.bench_function("decode_64_methods", |b| {
        b.iter(|| ClassNode::decode(black_box(&bytes)))
    });
}

fn bench_verify(c: &mut Criterion) {
    let class = wide_class(64);
    c.bench_function("verify_64_methods", |b| {
        b.iter(|| weft_bytecode::verify_class(black_box(&class)))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_verify);
criterion_main!(benches);
