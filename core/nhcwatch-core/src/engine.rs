//! Runs the wrapped health check and classifies its output against the
//! saved result.
//!
//! ## Classification
//!
//! ```text
//! previous   current    → classification   store
//! empty      empty      → Clear            saved removed
//! X          X          → Unchanged        saved kept
//! X          Y          → Changed          Y saved (X kept for the report)
//! missing    empty      → Clear            empty baseline saved
//! missing    Y          → Changed          Y saved
//! ```
//!
//! Only `Changed` is reported: an alert when the new output is non-empty,
//! a "cleared" notice carrying the old text when it is empty.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::SystemTime;

use crate::error::{NhcError, Result};
use crate::store::{OutputArtifact, ResultStore};
use crate::timespec::TimeSpec;

/// The wrapped health-check program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub program: String,
    pub args: Vec<String>,
}

impl Subject {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Basename of the program; names the files in the state directory.
    pub fn name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.program.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Clear,
    Unchanged,
    Changed {
        previous: Option<Vec<u8>>,
        current: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Alert,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub kind: ReportKind,
    pub text: String,
}

impl Classification {
    /// What, if anything, the notifier should send for this run.
    pub fn report(&self) -> Option<Report> {
        match self {
            Classification::Clear | Classification::Unchanged => None,
            Classification::Changed { current, .. } if !current.is_empty() => Some(Report {
                kind: ReportKind::Alert,
                text: String::from_utf8_lossy(current).into_owned(),
            }),
            Classification::Changed { previous, .. } => previous.as_ref().map(|previous| Report {
                kind: ReportKind::Cleared,
                text: String::from_utf8_lossy(previous).into_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub classification: Classification,
    pub exit_code: i32,
}

/// Runs `subject` once, applies expiry, and classifies the output.
///
/// Expiry is checked after the subject finishes so its runtime does not
/// count against the saved result's age.
pub fn run_and_classify(
    store: &ResultStore,
    subject: &Subject,
    expire: Option<TimeSpec>,
) -> Result<RunOutcome> {
    let mut artifact = store.create_output()?;
    let exit_code = run_subject(subject, &artifact)?;

    if let Some(expire) = expire.filter(|spec| spec.seconds > 0) {
        store.expire(expire.seconds, expire.fudge, SystemTime::now())?;
    }

    let current = artifact.contents()?;
    let classification = classify(store, artifact, current)?;
    tracing::debug!(
        subject = %store.subject(),
        exit_code,
        classification = %classification_label(&classification),
        "Health check classified"
    );
    Ok(RunOutcome {
        classification,
        exit_code,
    })
}

fn run_subject(subject: &Subject, artifact: &OutputArtifact) -> Result<i32> {
    let stdout = artifact
        .writer()
        .map_err(|err| NhcError::io(format!("open {}", artifact.path().display()), err))?;
    let stderr = artifact
        .writer()
        .map_err(|err| NhcError::io(format!("open {}", artifact.path().display()), err))?;

    let status = Command::new(&subject.program)
        .args(&subject.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .status()
        .map_err(|source| NhcError::SubjectSpawn {
            program: subject.program.clone(),
            source,
        })?;

    Ok(status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1))
}

fn classify(
    store: &ResultStore,
    artifact: OutputArtifact,
    current: Vec<u8>,
) -> Result<Classification> {
    let classification = match store.load_previous()? {
        Some(previous) if previous.is_empty() && current.is_empty() => {
            artifact.discard()?;
            store.clear_saved()?;
            Classification::Clear
        }
        Some(previous) if previous.contents == current => {
            artifact.discard()?;
            Classification::Unchanged
        }
        Some(previous) => {
            store.promote(artifact)?;
            Classification::Changed {
                previous: Some(previous.contents),
                current,
            }
        }
        None if current.is_empty() => {
            store.promote(artifact)?;
            Classification::Clear
        }
        None => {
            store.promote(artifact)?;
            Classification::Changed {
                previous: None,
                current,
            }
        }
    };
    Ok(classification)
}

fn classification_label(classification: &Classification) -> &'static str {
    match classification {
        Classification::Clear => "clear",
        Classification::Unchanged => "unchanged",
        Classification::Changed { .. } => "changed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::effective_uid;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store_in(temp: &TempDir) -> ResultStore {
        ResultStore::open(temp.path().join("state"), "nhc", effective_uid()).expect("open store")
    }

    fn printing(text: &str) -> Subject {
        Subject::new(
            "/bin/sh",
            vec!["-c".to_string(), format!("printf '{}'", text)],
        )
    }

    #[test]
    fn subject_name_is_program_basename() {
        assert_eq!(Subject::new("/usr/sbin/nhc", vec![]).name(), "nhc");
        assert_eq!(Subject::new("nhc", vec![]).name(), "nhc");
    }

    #[test]
    fn identical_output_is_unchanged_and_silent() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let first = run_and_classify(&store, &printing("ERROR: fs full"), None).unwrap();
        assert!(matches!(first.classification, Classification::Changed { .. }));

        let second = run_and_classify(&store, &printing("ERROR: fs full"), None).unwrap();
        assert_eq!(second.classification, Classification::Unchanged);
        assert!(second.classification.report().is_none());
        assert!(!store.output_path().exists());
    }

    #[test]
    fn failure_then_clear_then_quiet() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let first = run_and_classify(&store, &printing("X"), None).unwrap();
        let report = first.classification.report().expect("alert");
        assert_eq!(report.kind, ReportKind::Alert);
        assert_eq!(report.text, "X");

        let second = run_and_classify(&store, &printing(""), None).unwrap();
        let report = second.classification.report().expect("cleared");
        assert_eq!(report.kind, ReportKind::Cleared);
        assert_eq!(report.text, "X");

        let third = run_and_classify(&store, &printing(""), None).unwrap();
        assert_eq!(third.classification, Classification::Clear);
        assert!(third.classification.report().is_none());
        assert!(store.load_previous().unwrap().is_none());
    }

    #[test]
    fn first_clean_run_saves_empty_baseline() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        let outcome = run_and_classify(&store, &printing(""), None).unwrap();
        assert_eq!(outcome.classification, Classification::Clear);
        let saved = store.load_previous().unwrap().expect("baseline");
        assert!(saved.is_empty());
    }

    #[test]
    fn changed_failure_reports_new_text() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);

        run_and_classify(&store, &printing("A"), None).unwrap();
        let outcome = run_and_classify(&store, &printing("B"), None).unwrap();
        assert_eq!(
            outcome.classification,
            Classification::Changed {
                previous: Some(b"A".to_vec()),
                current: b"B".to_vec(),
            }
        );
        assert_eq!(outcome.classification.report().unwrap().text, "B");
        assert_eq!(store.load_previous().unwrap().unwrap().text(), "B");
    }

    #[test]
    fn stderr_is_captured_and_exit_code_returned() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        let subject = Subject::new(
            "/bin/sh",
            vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()],
        );

        let outcome = run_and_classify(&store, &subject, None).unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.classification.report().unwrap().text, "oops\n");
    }

    #[test]
    fn expired_result_forces_re_alert() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        run_and_classify(&store, &printing("X"), None).unwrap();

        let hour_ago = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(store.saved_path())
            .unwrap()
            .set_modified(hour_ago)
            .unwrap();

        let expire = crate::timespec::parse("10m");
        let outcome = run_and_classify(&store, &printing("X"), Some(expire)).unwrap();
        assert_eq!(
            outcome.classification,
            Classification::Changed {
                previous: None,
                current: b"X".to_vec(),
            }
        );
    }

    #[test]
    fn fresh_result_survives_expiry_check() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        run_and_classify(&store, &printing("X"), None).unwrap();

        let expire = crate::timespec::parse("1h");
        let outcome = run_and_classify(&store, &printing("X"), Some(expire)).unwrap();
        assert_eq!(outcome.classification, Classification::Unchanged);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        let subject = Subject::new("/definitely/not/a/real/nhc", vec![]);

        let err = run_and_classify(&store, &subject, None).unwrap_err();
        assert!(matches!(err, NhcError::SubjectSpawn { .. }));
        assert!(!store.output_path().exists());
    }

    #[test]
    fn planted_saved_symlink_never_reaches_a_report() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp);
        let secret = temp.path().join("shadow");
        std::fs::write(&secret, "root:$6$hash\n").unwrap();
        std::os::unix::fs::symlink(&secret, store.saved_path()).unwrap();

        let subject = Subject::new("/bin/sh", vec!["-c".to_string(), "true".to_string()]);
        let err = run_and_classify(&store, &subject, None).unwrap_err();
        assert!(matches!(err, NhcError::InsecureStateDir { .. }));
        assert_eq!(std::fs::read_to_string(&secret).unwrap(), "root:$6$hash\n");
        assert!(!store.output_path().exists());
    }
}
