#![cfg(unix)]

use nix::sys::signal::kill;
use nix::unistd::Pid;
use rigwatch::policy::{BackendPolicy, PolicyTable};
use rigwatch::telemetry::ParserKind;
use rigwatch::{ConfigError, LaunchSpec, Phase, StatusReport, Supervisor, SupervisorError, SupervisorOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::time::sleep;

const POOL: &str = "stratum+tcp://etc.2miners.com:1010";

fn fake_policy(parser: ParserKind) -> BackendPolicy {
    BackendPolicy {
        id: "fake".into(),
        parser,
        algo_flags: vec!["--algo".into()],
        allowed_algos: vec!["ETCHASH".into()],
        pool_flags: vec!["--pool".into()],
        pool_substrings: vec!["2miners.com".into()],
        wallet_flags: vec!["--user".into()],
        wallet_prefix: "0x".into(),
        default_exe: Vec::new(),
    }
}

fn supervisor(dir: &Path, parser: ParserKind) -> Supervisor {
    Supervisor::new(SupervisorOptions {
        log_dir: dir.join("logs"),
        miners_dir: dir.to_path_buf(),
        policies: PolicyTable::new(vec![fake_policy(parser)]),
        stop_grace: Duration::from_secs(1),
    })
}

/// Runs `body` through /bin/sh; the script itself ignores the miner flags.
fn fake_miner(dir: &Path, body: &str) -> LaunchSpec {
    let script = dir.join("miner.sh");
    std::fs::write(&script, body).unwrap();
    launch_spec(Some(PathBuf::from("/bin/sh")), vec![script.display().to_string()], POOL)
}

fn launch_spec(exe: Option<PathBuf>, mut args: Vec<String>, pool: &str) -> LaunchSpec {
    args.extend(
        ["--algo", "ETCHASH", "--pool", pool, "--user", "0xabc.rig1"]
            .into_iter()
            .map(String::from),
    );
    LaunchSpec {
        backend: "fake".into(),
        exe,
        args,
    }
}

async fn wait_for(supervisor: &Supervisor, cond: impl Fn(&StatusReport) -> bool) -> StatusReport {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let report = supervisor.status();
        if cond(&report) || Instant::now() > deadline {
            return report;
        }
        sleep(Duration::from_millis(50)).await;
    }
}

fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[tokio::test]
async fn start_reports_a_fresh_running_snapshot() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let spec = fake_miner(dir.path(), "exec sleep 30\n");

    let pid = sup.start(&spec).await.unwrap();
    let report = sup.status();
    assert!(report.running);
    assert_eq!(report.pid, Some(pid));
    assert_eq!(report.stats.accepted, 0);
    assert_eq!(report.stats.rejected, 0);
    assert!(report.stats.uptime <= 1);
    assert_eq!(report.stats.algo, "ETCHASH");
    assert_eq!(report.stats.pool, POOL);
    assert_eq!(sup.phase(), Phase::Running);

    assert_eq!(sup.stop().await.unwrap(), pid);
    let report = sup.status();
    assert!(!report.running);
    assert_eq!(report.pid, None);
    assert_eq!(sup.phase(), Phase::Idle);
    assert!(!is_alive(pid));
}

#[tokio::test]
async fn second_start_is_rejected_and_leaves_first_process() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let spec = fake_miner(dir.path(), "exec sleep 30\n");

    let pid = sup.start(&spec).await.unwrap();
    let err = sup.start(&spec).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning));
    assert_eq!(sup.status().pid, Some(pid));
    assert!(is_alive(pid));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_starts_admit_exactly_one() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let spec = fake_miner(dir.path(), "exec sleep 30\n");

    let (a, b) = tokio::join!(sup.start(&spec), sup.start(&spec));
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let rejected = if a.is_err() { a } else { b };
    assert!(matches!(rejected, Err(SupervisorError::AlreadyRunning)));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn stop_when_idle_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);

    let before = sup.status();
    let err = sup.stop().await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotRunning));
    assert_eq!(sup.phase(), Phase::Idle);
    assert_eq!(sup.status(), before);
}

#[tokio::test]
async fn output_lines_drive_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let script = r#"
echo "GPU 0: Share accepted (80 ms)"
echo "GPU 0: Share accepted (75 ms)"
printf '\033[32mAverage speed (15s): 50.94 Mh/s\033[0m\n'
echo "Total 7/0/0"
echo "Total 9/1/0"
echo "on stderr" 1>&2
exec sleep 30
"#;
    sup.start(&fake_miner(dir.path(), script)).await.unwrap();

    let report = wait_for(&sup, |r| r.logs.len() >= 6).await;
    assert_eq!(report.stats.accepted, 9);
    assert_eq!(report.stats.rejected, 1);
    assert_eq!(report.stats.hashrate, "50.94 MH/s");
    assert!(report.logs.contains(&"Average speed (15s): 50.94 Mh/s".to_string()));
    assert!(report.logs.contains(&"on stderr".to_string()));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn increment_backend_counts_each_event() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::KeyValue);
    let script = "for i in 1 2 3; do echo \"[ OK ] Accepted share\"; done\nexec sleep 30\n";
    sup.start(&fake_miner(dir.path(), script)).await.unwrap();

    let report = wait_for(&sup, |r| r.logs.len() >= 3).await;
    assert_eq!(report.stats.accepted, 3);
    assert_eq!(report.stats.rejected, 0);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn ring_retains_the_newest_two_hundred_lines() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::PipeTable);
    let script = "i=1\nwhile [ $i -le 250 ]; do echo \"line $i\"; i=$((i+1)); done\n";
    sup.start(&fake_miner(dir.path(), script)).await.unwrap();

    let report = wait_for(&sup, |r| !r.running).await;
    assert_eq!(report.logs.len(), 200);
    assert_eq!(report.logs.first().map(String::as_str), Some("line 51"));
    assert_eq!(report.logs.last().map(String::as_str), Some("line 250"));
}

#[tokio::test]
async fn unexpected_exit_marks_the_supervisor_idle() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let spec = fake_miner(dir.path(), "echo \"Share accepted\"\nexit 3\n");

    let pid = sup.start(&spec).await.unwrap();
    let report = wait_for(&sup, |r| !r.running).await;
    assert!(!report.running);
    assert_eq!(report.pid, None);
    assert_eq!(report.stats.accepted, 1);
    assert!(!is_alive(pid));

    let deadline = Instant::now() + Duration::from_secs(5);
    while sup.phase() != Phase::Idle && Instant::now() < deadline {
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(sup.phase(), Phase::Idle);
    assert!(matches!(sup.stop().await, Err(SupervisorError::NotRunning)));

    // Restart is an explicit caller action and works after a crash.
    assert!(sup.start(&spec).await.is_ok());
    wait_for(&sup, |r| !r.running).await;
}

#[tokio::test]
async fn stop_escalates_to_sigkill_when_term_is_ignored() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let script = "trap '' TERM\necho ready\nwhile true; do sleep 1; done\n";
    let pid = sup.start(&fake_miner(dir.path(), script)).await.unwrap();
    wait_for(&sup, |r| r.logs.iter().any(|l| l == "ready")).await;

    let began = Instant::now();
    assert_eq!(sup.stop().await.unwrap(), pid);
    let elapsed = began.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "stopped after {elapsed:?}");
    assert!(!sup.status().running);
    assert!(!is_alive(pid));
}

#[tokio::test]
async fn cancelled_stop_still_reaches_idle() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let script = "trap '' TERM\necho ready\nwhile true; do sleep 1; done\n";
    let spec = fake_miner(dir.path(), script);
    let pid = sup.start(&spec).await.unwrap();
    wait_for(&sup, |r| r.logs.iter().any(|l| l == "ready")).await;

    let cancelled = tokio::time::timeout(Duration::from_millis(100), sup.stop()).await;
    assert!(cancelled.is_err());
    assert_eq!(sup.phase(), Phase::Stopping);

    let deadline = Instant::now() + Duration::from_secs(10);
    while sup.phase() != Phase::Idle && Instant::now() < deadline {
        sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(sup.phase(), Phase::Idle);
    let report = sup.status();
    assert!(!report.running);
    assert_eq!(report.pid, None);
    assert!(!is_alive(pid));
    assert!(matches!(sup.stop().await, Err(SupervisorError::NotRunning)));

    sup.start(&fake_miner(dir.path(), "exec sleep 30\n")).await.unwrap();
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn stdout_and_stderr_keep_their_interleaving() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let script = "echo one\necho two 1>&2\necho three\necho four 1>&2\n";
    sup.start(&fake_miner(dir.path(), script)).await.unwrap();

    let report = wait_for(&sup, |r| !r.running).await;
    assert_eq!(report.logs, vec!["one", "two", "three", "four"]);
}

#[tokio::test]
async fn telemetry_continues_when_the_log_dir_is_unusable() {
    let dir = TempDir::new().unwrap();
    // A regular file where the log directory should be.
    std::fs::write(dir.path().join("logs"), b"").unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let script = "echo \"GPU 0: Share accepted (80 ms)\"\necho \"Total 4/1/0\"\n";
    sup.start(&fake_miner(dir.path(), script)).await.unwrap();

    let report = wait_for(&sup, |r| !r.running).await;
    assert_eq!(report.stats.accepted, 4);
    assert_eq!(report.stats.rejected, 1);
    assert_eq!(report.logs, vec!["GPU 0: Share accepted (80 ms)", "Total 4/1/0"]);
    assert!(dir.path().join("logs").is_file());
}

#[tokio::test]
async fn raw_output_is_persisted_per_run() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let script = "printf '\\033[31mred line\\033[0m\\n'\necho \"Total 2/0/0\"\n";
    sup.start(&fake_miner(dir.path(), script)).await.unwrap();
    wait_for(&sup, |r| !r.running).await;

    let logs_dir = dir.path().join("logs");
    let files: Vec<_> = std::fs::read_dir(&logs_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("miner_") && name.ends_with(".log"), "{name}");

    let written = std::fs::read_to_string(&files[0]).unwrap();
    assert_eq!(written, "\x1b[31mred line\x1b[0m\nTotal 2/0/0\n");
    assert_eq!(sup.status().logs, vec!["red line".to_string(), "Total 2/0/0".to_string()]);
}

#[tokio::test]
async fn policy_violation_leaves_the_supervisor_idle() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let spec = launch_spec(Some(PathBuf::from("/bin/sh")), Vec::new(), "stratum+tcp://pool.example.net:3333");

    let err = sup.start(&spec).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Config(ConfigError::PoolNotAllowed { .. })));
    assert_eq!(sup.phase(), Phase::Idle);
    assert!(!sup.status().running);
}

#[tokio::test]
async fn unknown_backend_is_refused() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let mut spec = fake_miner(dir.path(), "exit 0\n");
    spec.backend = "xmrig".into();

    let err = sup.start(&spec).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Config(ConfigError::UnknownBackend { .. })));
    assert_eq!(sup.phase(), Phase::Idle);
}

#[tokio::test]
async fn missing_executable_is_reported() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let spec = launch_spec(Some(dir.path().join("absent-miner")), Vec::new(), POOL);

    let err = sup.start(&spec).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ExecutableNotFound { .. }));
    assert_eq!(sup.phase(), Phase::Idle);
}

#[tokio::test]
async fn spawn_failure_rolls_back_to_idle() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    // Exists but is not executable.
    let exe = dir.path().join("not-a-binary");
    std::fs::write(&exe, b"plain data").unwrap();
    let spec = launch_spec(Some(exe), Vec::new(), POOL);

    let err = sup.start(&spec).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn { .. }));
    assert_eq!(sup.phase(), Phase::Idle);
    assert!(!sup.status().running);
}

#[tokio::test]
async fn dropping_the_supervisor_terminates_the_miner() {
    let dir = TempDir::new().unwrap();
    let sup = supervisor(dir.path(), ParserKind::Table);
    let pid = sup.start(&fake_miner(dir.path(), "exec sleep 30\n")).await.unwrap();
    assert!(is_alive(pid));

    drop(sup);
    let deadline = Instant::now() + Duration::from_secs(10);
    while is_alive(pid) && Instant::now() < deadline {
        sleep(Duration::from_millis(50)).await;
    }
    assert!(!is_alive(pid));
}
