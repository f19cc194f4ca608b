use criterion::{black_box, criterion_group, criterion_main, Criterion};

use steptrace::demo::fibonacci;
use steptrace::stats::TraceStats;
use steptrace::storage::{InsnKind, RegisterFile, TraceDb, TraceEntry};

const MNEMONICS: [(&str, InsnKind); 5] = [
    ("mov", InsnKind::Other),
    ("add", InsnKind::Other),
    ("call", InsnKind::Call),
    ("ret", InsnKind::Ret),
    ("jne", InsnKind::Jump),
];

fn entry(step: u64) -> TraceEntry {
    let (mnemonic, kind) = MNEMONICS[(step % 5) as usize];
    let pc = 0x40_0000 + (step % 97) * 4;
    TraceEntry {
        step,
        pc,
        insn_bytes: vec![0x48, 0x89, 0xe5],
        mnemonic: mnemonic.to_string(),
        operands: "rbp, rsp".to_string(),
        kind,
        depth: (step % 13) as u32,
        regs: RegisterFile {
            pc,
            sp: 0x7ffd_0000_0000 - step * 8,
            gpr: vec![("rax".to_string(), step), ("rdi".to_string(), pc)],
        },
        mem_changes: Vec::new(),
    }
}

fn populated_db(len: u64) -> TraceDb {
    let db = TraceDb::new();
    for step in 0..len {
        db.insert(entry(step));
    }
    db
}

fn bench_fibonacci(c: &mut Criterion) {
    c.bench_function("fibonacci_20", |b| b.iter(|| fibonacci(black_box(20))));
}

fn bench_db_insert(c: &mut Criterion) {
    c.bench_function("db_insert_1k", |b| {
        b.iter(|| {
            let db = populated_db(1_000);
            black_box(db.count())
        });
    });
}

fn bench_db_range(c: &mut Criterion) {
    let db = populated_db(10_000);
    c.bench_function("db_range_1k_of_10k", |b| {
        b.iter(|| black_box(db.get_range(4_000, 4_999)).len());
    });
}

fn bench_stats_analyze(c: &mut Criterion) {
    let db = populated_db(10_000);
    c.bench_function("stats_analyze_10k", |b| {
        b.iter(|| TraceStats::analyze(black_box(&db)));
    });
}

criterion_group!(
    benches,
    bench_fibonacci,
    bench_db_insert,
    bench_db_range,
    bench_stats_analyze
);
criterion_main!(benches);
