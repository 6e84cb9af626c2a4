//! 编解码与段读取的属性测试

use flat_backup::flat_backup::codec::{decode, encode, split_fields};
use flat_backup::flat_backup::{FlatBackup, FlatBackupError, Record};
use proptest::prelude::*;
use std::io::Cursor;

/// 偏向转义字符的字段值
fn field_value() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        prop::collection::vec(
            prop_oneof![
                Just("\\".to_string()),
                Just("\n".to_string()),
                Just("\r".to_string()),
                Just("\"".to_string()),
                Just(",".to_string()),
                Just("n".to_string()),
                Just("é".to_string()),
                Just("字".to_string()),
            ],
            0..12
        )
        .prop_map(|parts| parts.concat()),
    ]
}

fn columns(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("c{}", i)).collect()
}

proptest! {
    #[test]
    fn prop_line_roundtrip(fields in prop::collection::vec(field_value(), 1..8)) {
        let line = encode(&fields);
        prop_assert!(line.ends_with('\n'));
        prop_assert_eq!(line.matches('\n').count(), 1);
        prop_assert_eq!(split_fields(&line).unwrap(), fields);
    }

    #[test]
    fn prop_adjacent_fields_never_merge(a in field_value(), b in field_value()) {
        let with_backslash = format!("{}\\", a);
        let line = encode(&[with_backslash.as_str(), b.as_str()]);
        let decoded = decode(&line, &["left", "right"]).unwrap();
        prop_assert_eq!(decoded.get("left").map(String::as_str), Some(with_backslash.as_str()));
        prop_assert_eq!(decoded.get("right").map(String::as_str), Some(b.as_str()));
    }

    #[test]
    fn prop_sections_track_latest_header(
        sections in prop::collection::vec(
            (1usize..5).prop_flat_map(|width| {
                prop::collection::vec(prop::collection::vec(field_value(), width), 0..4)
                    .prop_map(move |rows| (width, rows))
            }),
            1..5
        )
    ) {
        let mut text = String::from("///DOTCLEAR|2.4|single\n");
        let mut expected = Vec::new();
        let mut line = 1;
        for (idx, (width, rows)) in sections.iter().enumerate() {
            let name = format!("s{}", idx);
            text.push('\n');
            text.push_str(&format!("[{} {}]\n", name, columns(*width).join(",")));
            line += 2;
            for row in rows {
                text.push_str(&encode(row));
                line += 1;
                expected.push((name.clone(), line, row.clone()));
            }
        }

        let records: Vec<Record> = FlatBackup::new(Cursor::new(text.into_bytes()))
            .collect::<Result<_, _>>()
            .unwrap();

        prop_assert_eq!(records.len(), expected.len());
        for (record, (section, line, row)) in records.iter().zip(&expected) {
            prop_assert_eq!(record.section(), section.as_str());
            prop_assert_eq!(record.line(), *line);
            let values: Vec<&str> = record.iter().map(|(_, v)| v).collect();
            let row: Vec<&str> = row.iter().map(String::as_str).collect();
            prop_assert_eq!(values, row);
        }
    }
}

#[test]
fn test_wrong_width_reports_physical_line() {
    let text = format!(
        "///DOTCLEAR|2.4|single\n\n[a c0,c1]\n{}\n[b c0]\n{}{}",
        encode(&["1", "x"]).trim_end(),
        encode(&["2"]),
        encode(&["3", "too", "wide"]),
    );
    let err = FlatBackup::new(Cursor::new(text.into_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .unwrap_err();
    match err {
        FlatBackupError::ColumnCountMismatch { line, expected, found } => {
            assert_eq!(line, 7);
            assert_eq!(expected, 1);
            assert_eq!(found, 3);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_backslash_then_n_is_not_a_newline() {
    let line = encode(&["a\\", "n"]);
    assert_eq!(line, "\"a\\\\\",\"n\"\n");
    assert_eq!(split_fields(&line).unwrap(), vec!["a\\", "n"]);

    let literal = encode(&["a\\n"]);
    assert_eq!(split_fields(&literal).unwrap(), vec!["a\\n"]);
}
