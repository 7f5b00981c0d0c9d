//! nhc-wrapper: run a health check, remember its output, and notify only
//! when the output changes.
//!
//! Run once (cron) or with `-L` as a wall-clock aligned polling loop.
//! Invoked through a `<name>-wrapper` symlink, `<name>` becomes the
//! default program.

use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use nhcwatch_core::config::Config;
use nhcwatch_core::engine::{run_and_classify, Subject};
use nhcwatch_core::notify::{local_hostname, Notice, Notifier};
use nhcwatch_core::scheduler::{parse_loop_spec, LocalClock, LoopExit, Scheduler};
use nhcwatch_core::store::{effective_uid, ResultStore};
use nhcwatch_core::{logging, shutdown, timespec, NhcError, Result};

#[derive(Parser, Debug)]
#[command(name = "nhc-wrapper")]
#[command(about = "Run a health check and report only changes in its output")]
#[command(version)]
struct Cli {
    /// State directory (default: <tmp>/nhc-wrapper-<euid>)
    #[arg(short = 'D', long = "state-dir", value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Loop on wall-clock boundaries, e.g. `15mt` (trailing flags: c=clear, t=timestamp, r=ruler)
    #[arg(short = 'L', long = "loop", value_name = "LOOPSPEC")]
    loop_spec: Option<String>,

    /// Forget the saved result after this long, e.g. `1d` or `12h10f`
    #[arg(short = 'X', long = "expire", value_name = "TIMESPEC")]
    expire: Option<String>,

    /// Notification destination (channel or address)
    #[arg(short = 'M', long = "notify", value_name = "DEST")]
    destination: Option<String>,

    /// Health-check program to run
    #[arg(short = 'P', long = "program", value_name = "PROGRAM")]
    program: Option<String>,

    /// Configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Arguments passed to the program
    #[arg(last = true, value_name = "ARGS")]
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let invoked_as = std::env::args().next().unwrap_or_default();

    let config = match Config::load(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            logging::init(&Default::default());
            tracing::error!(error = %err, "nhc-wrapper configuration failed");
            std::process::exit(err.exit_code());
        }
    };
    let _logging_guard = logging::init(&config.logging);

    let code = match run(cli, config, &invoked_as) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "nhc-wrapper failed");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

/// `<name>-wrapper` → `<name>`, except for our own name.
fn program_from_invocation(invoked_as: &str) -> Option<String> {
    let name = Path::new(invoked_as).file_name()?.to_str()?;
    let program = name.strip_suffix("-wrapper")?;
    (!program.is_empty() && name != "nhc-wrapper").then(|| program.to_string())
}

fn apply_cli(config: &mut Config, cli: Cli, invoked_as: &str) {
    if let Some(program) = cli.program.or_else(|| program_from_invocation(invoked_as)) {
        config.wrapper.program = program;
    }
    if !cli.args.is_empty() {
        config.wrapper.args = cli.args;
    }
    if cli.state_dir.is_some() {
        config.wrapper.state_dir = cli.state_dir;
    }
    if cli.loop_spec.is_some() {
        config.wrapper.loop_spec = cli.loop_spec;
    }
    if cli.expire.is_some() {
        config.wrapper.expire = cli.expire;
    }
    if cli.destination.is_some() {
        config.notify.destination = cli.destination;
    }
}

struct Wrapper {
    store: ResultStore,
    subject: Subject,
    expire: Option<timespec::TimeSpec>,
    notifier: Notifier,
    host: String,
}

impl Wrapper {
    /// One run of the subject; notifies on change and returns its exit code.
    fn tick(&self) -> Result<i32> {
        let outcome = run_and_classify(&self.store, &self.subject, self.expire)?;
        if let Some(report) = outcome.classification.report() {
            let notice = Notice::from_report(&report, &self.subject.name(), &self.host);
            self.notifier.notify_logged(&notice);
        }
        Ok(outcome.exit_code)
    }
}

fn run(cli: Cli, mut config: Config, invoked_as: &str) -> Result<i32> {
    apply_cli(&mut config, cli, invoked_as);

    if config.wrapper.program.trim().is_empty() {
        return Err(NhcError::InvalidArgument("no program to run".to_string()));
    }
    let subject = Subject::new(config.wrapper.program.clone(), config.wrapper.args.clone());
    let uid = effective_uid();
    let state_dir = config.wrapper.state_dir_for(uid);
    let store = ResultStore::open(&state_dir, &subject.name(), uid)?;
    let wrapper = Wrapper {
        store,
        expire: config.wrapper.expire.as_deref().map(timespec::parse),
        notifier: Notifier::from_config(&config.notify)?,
        host: local_hostname(),
        subject,
    };
    tracing::debug!(
        subject = %wrapper.subject.name(),
        path = %state_dir.display(),
        host = %wrapper.host,
        "Wrapper ready"
    );

    let Some(raw_loop) = config.wrapper.loop_spec.as_deref() else {
        return wrapper.tick();
    };

    shutdown::install_handlers();
    let interactive = std::io::stdout().is_terminal();
    let scheduler = Scheduler::new(parse_loop_spec(raw_loop), LocalClock, interactive);
    let mut stdout = std::io::stdout();
    let exit = scheduler.run(&mut stdout, || {
        let code = wrapper.tick()?;
        tracing::debug!(exit_code = code, "Tick finished");
        Ok(())
    })?;

    match exit {
        LoopExit::Signal(signal) => Ok(shutdown::exit_code_for(signal)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_name_from_symlinked_wrapper() {
        assert_eq!(
            program_from_invocation("/usr/sbin/check-gpu-wrapper"),
            Some("check-gpu".to_string())
        );
        assert_eq!(program_from_invocation("/usr/sbin/nhc-wrapper"), None);
        assert_eq!(program_from_invocation("nhc-wrapper"), None);
        assert_eq!(program_from_invocation("-wrapper"), None);
        assert_eq!(program_from_invocation("mywatch"), None);
    }

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from([
            "nhc-wrapper",
            "-D",
            "/var/tmp/state",
            "-X",
            "1d",
            "-M",
            "#ops",
            "--",
            "-c",
            "/etc/nhc/nhc.conf",
        ]);
        let mut config = Config::default();
        config.wrapper.program = "/opt/nhc/sbin/nhc".to_string();
        apply_cli(&mut config, cli, "/usr/sbin/nhc-wrapper");

        assert_eq!(config.wrapper.program, "/opt/nhc/sbin/nhc");
        assert_eq!(config.wrapper.args, vec!["-c", "/etc/nhc/nhc.conf"]);
        assert_eq!(config.wrapper.state_dir, Some(PathBuf::from("/var/tmp/state")));
        assert_eq!(config.wrapper.expire.as_deref(), Some("1d"));
        assert_eq!(config.notify.destination.as_deref(), Some("#ops"));
        assert!(config.wrapper.loop_spec.is_none());
    }

    #[test]
    fn explicit_program_beats_invocation_name() {
        let cli = Cli::parse_from(["check-gpu-wrapper", "-P", "/bin/true"]);
        let mut config = Config::default();
        apply_cli(&mut config, cli, "check-gpu-wrapper");
        assert_eq!(config.wrapper.program, "/bin/true");

        let cli = Cli::parse_from(["check-gpu-wrapper"]);
        let mut config = Config::default();
        apply_cli(&mut config, cli, "check-gpu-wrapper");
        assert_eq!(config.wrapper.program, "check-gpu");
    }
}
