//! Loading a dataset directory from disk.

use std::fs;

use kgat_core::{CollaborativeKg, Error};

fn write_dataset(dir: &std::path::Path) {
    fs::write(dir.join("train.txt"), "0 0 1\n1 1 2\n2 0\n").unwrap();
    fs::write(dir.join("test.txt"), "0 2\n1 0\n").unwrap();
    fs::write(dir.join("kg_final.txt"), "0 0 3\n1 0 3\n2 1 4\n0 0 3\n").unwrap();
}

#[test]
fn test_from_dir_builds_ckg() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());

    let ckg = CollaborativeKg::from_dir(dir.path()).unwrap();
    assert_eq!(ckg.dims.n_users, 3);
    assert_eq!(ckg.dims.n_items, 3);
    assert_eq!(ckg.dims.n_entities, 5);
    // duplicate KG line dropped
    assert_eq!(ckg.n_kg_facts, 3);
    assert_eq!(ckg.n_cf_train, 5);

    let g = ckg.topology().unwrap();
    assert_eq!(g.num_edges(), 2 * 3 + 2 * 5);
    assert!(ckg.summary().contains("n_users=3"));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = CollaborativeKg::from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}
