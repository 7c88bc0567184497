use auditsync_sinks::{append_csv_rows, CsvNaming};
use proptest::prelude::*;
use std::fs;
use tempfile::tempdir;

fn namings() -> impl Strategy<Value = CsvNaming> {
    prop_oneof![
        Just(CsvNaming::TemplateId),
        Just(CsvNaming::TemplateName),
        "[a-z/\\\\ ]{1,12}".prop_map(CsvNaming::SingleFile),
    ]
}

proptest! {
    #[test]
    fn file_names_never_escape_the_export_dir(
        naming in namings(),
        template_id in "template_[a-f0-9/\\\\]{1,16}",
        template_name in "[A-Za-z0-9 /\\\\-]{0,24}",
    ) {
        let name = naming.file_name(&template_id, &template_name);
        prop_assert!(!name.contains('/'));
        prop_assert!(!name.contains('\\'));
        prop_assert!(name.ends_with(".csv"));
    }
}

#[test]
fn header_is_written_once_across_appends() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("template_1.csv");
    let header = ["ItemID", "Response"];
    append_csv_rows(&path, &header, [["q1", "yes"]]).unwrap();
    append_csv_rows(&path, &header, [["q2", "no"], ["q3", ""]]).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(
        lines,
        vec![
            "\"ItemID\",\"Response\"",
            "\"q1\",\"yes\"",
            "\"q2\",\"no\"",
            "\"q3\",\"\"",
        ]
    );
}
