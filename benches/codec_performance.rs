//! 编解码性能基准测试

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flat_backup::flat_backup::codec::{decode, encode};
use flat_backup::flat_backup::FlatBackup;
use std::io::Cursor;

fn sample_row() -> Vec<String> {
    vec![
        "42".to_string(),
        "default".to_string(),
        "admin".to_string(),
        "2024-01-15 10:00:00".to_string(),
        "A \"quoted\" title".to_string(),
        "<p>Line one\nLine two with a backslash \\ and more text</p>".repeat(8),
    ]
}

fn benchmark_line_codec(c: &mut Criterion) {
    let row = sample_row();
    let columns = ["post_id", "blog_id", "user_id", "post_dt", "post_title", "post_content"];
    let line = encode(&row);

    c.bench_function("encode_post_row", |b| {
        b.iter(|| black_box(encode(black_box(&row))))
    });

    c.bench_function("decode_post_row", |b| {
        b.iter(|| black_box(decode(black_box(&line), &columns).unwrap()))
    });
}

fn benchmark_section_reader(c: &mut Criterion) {
    let mut text = String::from("///DOTCLEAR|2.4.0|single\n\n");
    text.push_str("[post post_id,blog_id,user_id,post_dt,post_title,post_content]\n");
    let row = sample_row();
    for _ in 0..1000 {
        text.push_str(&encode(&row));
    }
    let bytes = text.into_bytes();

    c.bench_function("read_1000_records", |b| {
        b.iter(|| {
            let n = FlatBackup::new(Cursor::new(black_box(bytes.as_slice())))
                .filter(|r| r.is_ok())
                .count();
            black_box(n);
        })
    });
}

criterion_group!(benches, benchmark_line_codec, benchmark_section_reader);
criterion_main!(benches);
