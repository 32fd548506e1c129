// Integration tests for rollout
//
// These tests drive the compiled binary and the real process plumbing:
// - Definition files on disk (validate, show, plan)
// - Dry-run deploys end to end, including the report printed to stdout
// - Exit codes for each error class
// - Process group cleanup for timed-out or abandoned commands

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use rollout::process_guard::{with_registry, CommandProcessGroup};
use rollout::{ConsoleReporter, Definition, DryRunRemote, Environment, Executor};

const LARAVEL: &str = include_str!("../demos/laravel.json");

fn rollout(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rollout"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Should run rollout binary")
}

fn write_definition(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("deploy.json");
    std::fs::write(&path, content).expect("Should write definition");
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// =============================================================================
// Definition files
// =============================================================================

#[test]
fn test_demo_definition_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let first = Definition::from_json(LARAVEL).unwrap();

    let path = dir.path().join("saved.json");
    first.save_to_file(&path).unwrap();
    let reloaded = Definition::load_from_file(&path).unwrap();

    assert_eq!(first, reloaded);
    assert_eq!(reloaded.timeout_secs, Some(900));
    assert!(reloaded.task("migrate").unwrap().optional);
    assert!(!reloaded.task("writeable").unwrap().optional);
}

#[test]
fn test_validate_command() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_definition(dir.path(), LARAVEL);

    let output = rollout(&["validate", "-f", path.to_str().unwrap()]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("story 'deploy' with 6 task(s), 2 environment(s)"));
}

#[test]
fn test_show_prints_normalized_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_definition(dir.path(), LARAVEL);

    let output = rollout(&["show", "-f", path.to_str().unwrap()]);
    assert!(output.status.success());
    let shown = Definition::from_json(&stdout(&output)).unwrap();
    assert_eq!(shown, Definition::from_json(LARAVEL).unwrap());
}

#[test]
fn test_plan_renders_production_commands() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_definition(dir.path(), LARAVEL);

    let output = rollout(&[
        "plan",
        "-e",
        "production",
        "-c",
        "a1b2c3d",
        "-f",
        path.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("[1/6] clone_repository"));
    assert!(text.contains("git clone --depth 1 --branch main git@github.com:account/repo.git /var/www/app/releases/"));
    assert!(text.contains("$ git reset --hard a1b2c3d"));
    assert!(!text.contains("{{"));
}

// =============================================================================
// Dry-run deploys
// =============================================================================

#[test]
fn test_dry_run_deploy_through_library() {
    let definition = Definition::from_json(LARAVEL).unwrap();
    let release = rollout::Release::capture();
    let vars = rollout::resolve(
        Environment::Staging,
        definition.environment(Environment::Staging).unwrap(),
        &release,
        None,
    );
    let plan = rollout::Plan::build(&definition, &vars, &[]).unwrap();

    let mut remote = DryRunRemote::new();
    let mut reporter = ConsoleReporter::new(Vec::new());
    let report = Executor::new(&mut remote, &mut reporter, Duration::from_secs(5))
        .run(&plan, "dev@staging.example.com")
        .unwrap();

    assert!(report.into_result().is_ok());
    assert_eq!(remote.dispatched().len(), plan.command_count());

    let printed = String::from_utf8(reporter.into_inner()).unwrap();
    let lines: Vec<&str> = printed.lines().collect();
    assert_eq!(
        lines.first(),
        Some(&"Running story 'deploy' on dev@staging.example.com (6 tasks)")
    );
    assert!(lines.contains(&"[1/6] Cloning repository"));
    assert!(lines.contains(&"[6/6] Running restart_queues"));
    assert!(lines.iter().any(|l| l.starts_with("    [dry-run] ")));
    assert_eq!(lines.last(), Some(&"success"));
}

#[test]
fn test_dry_run_deploy_binary() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_definition(dir.path(), LARAVEL);

    let output = rollout(&[
        "deploy",
        "--dry-run",
        "--skip",
        "migrate",
        "-f",
        path.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Skipping migrate"));
    assert!(text.contains("(5 tasks)"));
    assert!(!text.contains("artisan migrate"));
    assert_eq!(text.lines().last(), Some("success"));
}

// =============================================================================
// Exit codes
// =============================================================================

#[test]
fn test_exit_code_invalid_definition() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_definition(dir.path(), "{ \"servers\": ");

    let output = rollout(&["validate", "-f", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(rollout::error::EXIT_DEFINITION));
}

#[test]
fn test_exit_code_undeclared_variable() {
    let dir = tempfile::tempdir().unwrap();
    let broken = LARAVEL.replace("{{ commit }}", "{{ revision }}");
    let path = write_definition(dir.path(), &broken);

    let output = rollout(&["validate", "-f", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(rollout::error::EXIT_DEFINITION));
}

#[test]
fn test_exit_code_skip_required_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_definition(dir.path(), LARAVEL);

    let output = rollout(&[
        "deploy",
        "--dry-run",
        "--skip",
        "clone_repository",
        "-f",
        path.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(rollout::error::EXIT_DEFINITION));
    assert!(stdout(&output).is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("cannot skip 'clone_repository'").count(), 1);
}

#[test]
fn test_timeout_flag_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_definition(dir.path(), LARAVEL);

    for value in ["0", "18446744073709551615"] {
        let output = rollout(&[
            "deploy",
            "--dry-run",
            "--timeout",
            value,
            "-f",
            path.to_str().unwrap(),
        ]);
        assert!(!output.status.success());
        assert!(stdout(&output).is_empty());
    }
}

#[test]
fn test_exit_code_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    let output = rollout(&["validate", "-f", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(rollout::error::EXIT_GENERAL));
}

// =============================================================================
// Process groups
// =============================================================================

#[test]
fn test_terminate_group_kills_grandchildren() {
    let mut child = Command::new("sh")
        .args(["-c", "sleep 30 & sleep 30; wait"])
        .in_new_process_group()
        .spawn()
        .expect("Should spawn sh");
    let pid = child.id();
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    rollout::process_guard::terminate_group(pid, Duration::from_millis(500));
    let status = child.wait().unwrap();

    assert!(!status.success());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_registry_terminate_all() {
    let mut child = Command::new("sleep")
        .arg("30")
        .in_new_process_group()
        .spawn()
        .expect("Should spawn sleep");
    let pid = child.id();

    with_registry(|registry| registry.register(pid));
    with_registry(|registry| registry.terminate_all(Duration::from_millis(200)));

    let status = child.wait().unwrap();
    assert!(!status.success());
    with_registry(|registry| registry.unregister(pid));
}
