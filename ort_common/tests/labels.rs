use std::io::Write;

use ort_common::yolov8::load_labels;

#[test]
fn default_labels_are_coco() {
    let labels = load_labels(None).unwrap();
    assert_eq!(labels.len(), 80);
    assert_eq!(labels[2], "car");
}

#[test]
fn custom_labels_skip_blank_lines() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "pothole\n\n  crack  \n").unwrap();
    let labels = load_labels(Some(file.path())).unwrap();
    assert_eq!(labels, vec!["pothole", "crack"]);
}

#[test]
fn empty_labels_file_is_rejected() {
    let file = tempfile::NamedTempFile::new().unwrap();
    assert!(load_labels(Some(file.path())).is_err());
}
