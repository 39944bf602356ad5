//! Tests for machine metadata and process-listing parsers

use crate::remote::machine::{parse_cim_output, parse_ps_output, MachineMeta};
use std::time::Duration;

#[test]
fn test_busy_transitions_drive_free_since() {
    let mut meta = MachineMeta::default();
    assert_eq!(meta.busy(), None);
    assert_eq!(meta.free_since(), None);

    meta.set_busy(false);
    assert_eq!(meta.busy(), Some(false));
    assert!(meta.free_since().is_some());

    meta.set_busy(true);
    assert_eq!(meta.busy(), Some(true));
    assert_eq!(meta.free_since(), None);
}

#[test]
fn test_is_free_longer_than() {
    let mut meta = MachineMeta::default();
    // Unknown state is never considered free.
    assert!(!meta.is_free_longer_than(Duration::ZERO));

    meta.set_busy(false);
    assert!(meta.is_free_longer_than(Duration::ZERO));
    assert!(!meta.is_free_longer_than(Duration::from_secs(3600)));

    meta.set_busy(true);
    assert!(!meta.is_free_longer_than(Duration::ZERO));
}

/// One `ps -o pid:255,comm:255,args:255` line: columns padded far beyond
/// ten spaces, the separator the parser splits on.
fn ps_line(pid: &str, name: &str, args: &str) -> String {
    format!("{:>20}{:20}{:<30}{:20}{}", pid, "", name, "", args)
}

fn ps_output() -> String {
    [
        ps_line("PID", "COMMAND", "COMMAND"),
        ps_line("1", "systemd", "/sbin/init"),
        ps_line("431", "sshd", "sshd: /usr/sbin/sshd -D"),
        ps_line(
            "9250",
            "mpirun",
            "/usr/bin/mpirun -np 4 -wd /data/tasks/t1 /data/engines/mpi/solver",
        ),
        ps_line("9311", "ps", "ps -eo pid:255,comm:255,args:255"),
    ]
    .join("\n")
}

#[test]
fn test_parse_ps_output() {
    let processes = parse_ps_output(&ps_output());
    // Header and the ps invocation itself are skipped.
    assert_eq!(processes.len(), 3);
    assert_eq!(processes[0].pid, 1);
    assert_eq!(processes[0].name, "systemd");
    assert_eq!(processes[2].name, "mpirun");
    assert!(processes[2].command.contains("-wd /data/tasks/t1"));
}

#[test]
fn test_parse_ps_output_handles_empty_listing() {
    assert!(parse_ps_output("").is_empty());
    // Header only (pgrep matched nothing but ps still printed it).
    assert!(parse_ps_output("  PID COMMAND COMMAND\n").is_empty());
}

#[test]
fn test_parse_cim_output() {
    let output = concat!(
        r#"{"pid":4,"name":"System","command":null}"#,
        "\n",
        r#"{"pid":812,"name":"solver.exe","command":"C:\\engines\\solver.exe run"}"#,
        "\n",
        r#"{"pid":900,"name":"powershell.exe","command":"powershell Get-CimInstance Win32_Process"}"#,
        "\n",
        "garbage line\n",
    );
    let processes = parse_cim_output(output);
    assert_eq!(processes.len(), 2);
    // A missing command line falls back to the process name.
    assert_eq!(processes[0].command, "System");
    assert_eq!(processes[1].name, "solver.exe");
}
