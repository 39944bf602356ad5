//! Tests for remote path handling and shell quoting

use crate::remote::path::{powershell_quote, sh_quote, PathFlavor, RemotePath};

#[test]
fn test_posix_paths() {
    let p = RemotePath::new(PathFlavor::Posix, "/data/tasks/");
    assert!(p.is_absolute());
    assert_eq!(p.shell_form(), "/data/tasks");
    assert_eq!(p.basename(), "tasks");

    let joined = p.join("20240101_000000_abcd").join("OUTPUT");
    assert_eq!(joined.shell_form(), "/data/tasks/20240101_000000_abcd/OUTPUT");
    assert_eq!(joined.sftp_form(), "/data/tasks/20240101_000000_abcd/OUTPUT");

    assert!(!RemotePath::new(PathFlavor::Posix, "data/tasks").is_absolute());
}

#[test]
fn test_windows_paths() {
    let p = RemotePath::new(PathFlavor::Windows, r"C:\Users\worker\data");
    assert!(p.is_absolute());
    assert_eq!(p.shell_form(), r"C:\Users\worker\data");
    // SFTP always speaks forward slashes.
    assert_eq!(p.sftp_form(), "C:/Users/worker/data");
    assert_eq!(p.basename(), "data");

    let joined = p.join("tasks").join("t1");
    assert_eq!(joined.shell_form(), r"C:\Users\worker\data\tasks\t1");

    assert!(!RemotePath::new(PathFlavor::Windows, r"data\tasks").is_absolute());
    assert!(RemotePath::new(PathFlavor::Windows, r"\\share\dir").is_absolute());
}

#[test]
fn test_sh_quote() {
    assert_eq!(sh_quote("plain-file.txt"), "plain-file.txt");
    assert_eq!(sh_quote("/data/tasks/run_1"), "/data/tasks/run_1");
    assert_eq!(sh_quote("with space"), "'with space'");
    assert_eq!(sh_quote("it's"), r"'it'\''s'");
    assert_eq!(sh_quote(""), "''");
}

#[test]
fn test_powershell_quote() {
    assert_eq!(powershell_quote("plain"), "'plain'");
    assert_eq!(powershell_quote("it's"), "'it''s'");
}
