use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Fake Slurm CLIs driven by files in a temp dir.
struct FakeSlurm {
    temp: TempDir,
}

impl FakeSlurm {
    fn new(sinfo_line: &str) -> Self {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        std::fs::write(root.join("sinfo.out"), sinfo_line).unwrap();
        write_script(
            &root.join("sinfo"),
            &format!("cat '{}'", root.join("sinfo.out").display()),
        );
        write_script(
            &root.join("scontrol"),
            &format!(
                "for arg in \"$@\"; do printf '%s|' \"$arg\"; done >> '{}'; echo >> '{0}'",
                root.join("scontrol.log").display()
            ),
        );
        std::fs::write(
            root.join("nhcwatch.toml"),
            format!(
                "[rm]\nmanager = \"slurm\"\n\n[rm.commands]\nsinfo = \"{}\"\nscontrol = \"{}\"\n",
                root.join("sinfo").display(),
                root.join("scontrol").display()
            ),
        )
        .unwrap();
        Self { temp }
    }

    fn config(&self) -> PathBuf {
        self.temp.path().join("nhcwatch.toml")
    }

    fn scontrol_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.temp.path().join("scontrol.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn node_mark(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_node-mark"))
            .env_remove("NHC_RM")
            .env_remove("NHC_LEADER")
            .env_remove("IGNORE_EMPTY_NOTE")
            .env_remove("NHC_NOTIFY_COMMAND")
            .env_remove("NHC_NOTIFY_TRANSPORT")
            .arg("--config")
            .arg(self.config())
            .args(args)
            .output()
            .expect("run node-mark")
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn online_resumes_node_drained_by_us() {
    let slurm = FakeSlurm::new("drain NHC: check_fs_mount: /scratch not mounted\n");
    let output = slurm.node_mark(&["online", "n0042"]);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        slurm.scontrol_calls(),
        vec!["update|State=RESUME|NodeName=n0042|"]
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("n0042 brought back online"));
}

#[test]
fn online_leaves_foreign_drain_alone() {
    let slurm = FakeSlurm::new("drain admin: reseating DIMM\n");
    let output = slurm.node_mark(&["online", "n0042"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(slurm.scontrol_calls().is_empty());
    assert!(output.stdout.is_empty());
}

#[test]
fn empty_note_needs_flag() {
    let slurm = FakeSlurm::new("down* none\n");
    slurm.node_mark(&["online", "n0042"]);
    assert!(slurm.scontrol_calls().is_empty());

    slurm.node_mark(&["--ignore-empty-note", "online", "n0042"]);
    assert_eq!(slurm.scontrol_calls().len(), 1);
}

#[test]
fn offline_writes_leader_and_note() {
    let slurm = FakeSlurm::new("idle none\n");
    let output = slurm.node_mark(&["offline", "n0042", "check_hw_ib:", "ib0", "down"]);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        slurm.scontrol_calls(),
        vec!["update|State=DRAIN|NodeName=n0042|Reason=NHC: check_hw_ib: ib0 down|"]
    );
}

#[test]
fn unsupported_rm_exits_three() {
    let slurm = FakeSlurm::new("idle none\n");
    let output = slurm.node_mark(&["--rm", "moab", "online", "n0042"]);
    assert_eq!(output.status.code(), Some(3));
}
