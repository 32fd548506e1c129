//! rollout - main entry point

use anyhow::Context;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use rollout::cli::{Cli, Commands};
use rollout::error::EXIT_GENERAL;
use rollout::{
    process_guard, resolve, ConsoleReporter, Definition, DryRunRemote, Environment, Executor,
    Plan, ProcessGuard, Release, RemoteExecutor, RolloutError, SshRemote,
};

/// Per-command timeout when neither the CLI nor the definition sets one
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Initialize tracing; logs go to stderr so stdout carries only the run report
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);
    debug!("CLI arguments parsed");

    // Interrupting a deploy must not leave ssh sessions running on the host
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<RolloutError>()
                .map(RolloutError::exit_code)
                .unwrap_or(EXIT_GENERAL);
            // Logged at debug so default stderr carries the message once
            debug!(exit_code = code, "run failed: {:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let definition = load_definition(&cli.file)?;

    match cli.command {
        Commands::Validate => {
            println!(
                "✓ Definition is valid: story '{}' with {} task(s), {} environment(s)",
                definition.story.name,
                definition.story.tasks.len(),
                definition.environments.len()
            );
        }
        Commands::Show => {
            println!("{}", definition.to_json_pretty()?);
        }
        Commands::Plan { env, commit, skip } => {
            let plan = build_plan(&definition, env, commit.as_deref(), &skip)?;
            print_plan(&plan);
        }
        Commands::Deploy {
            env,
            commit,
            timeout,
            skip,
        } => {
            let plan = build_plan(&definition, env, commit.as_deref(), &skip)?;
            let server = definition.server_for(env)?.clone();
            let timeout = Duration::from_secs(
                timeout
                    .or(definition.timeout_secs)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            );
            info!(
                "Deploying story '{}' to {} ({}), {} command(s)",
                plan.story,
                env,
                server,
                plan.command_count()
            );

            let target = server.to_string();
            if cli.dry_run {
                execute(&mut DryRunRemote::new(), &plan, &target, timeout)?;
            } else {
                execute(&mut SshRemote::new(server), &plan, &target, timeout)?;
            }
        }
    }

    Ok(())
}

fn load_definition(path: &Path) -> anyhow::Result<Definition> {
    info!("Loading definition: {:?}", path);
    Definition::load_from_file(path)
        .with_context(|| format!("Failed to load definition {}", path.display()))
}

/// Resolve the run's variables (capturing the release once) and render the story
fn build_plan(
    definition: &Definition,
    env: Environment,
    commit: Option<&str>,
    skip: &[String],
) -> rollout::Result<Plan> {
    let release = Release::capture();
    let vars = resolve(env, definition.environment(env)?, &release, commit);
    debug!("Resolved {} variable(s) for release {}", vars.len(), release);
    Plan::build(definition, &vars, skip)
}

fn execute<R: RemoteExecutor>(
    remote: &mut R,
    plan: &Plan,
    target: &str,
    timeout: Duration,
) -> rollout::Result<()> {
    let mut reporter = ConsoleReporter::stdout();
    let report = Executor::new(remote, &mut reporter, timeout).run(plan, target)?;
    report.into_result().map(|_| ())
}

fn print_plan(plan: &Plan) {
    println!("Story '{}'", plan.story);
    for name in &plan.skipped {
        println!("  (skipped) {}", name);
    }
    for (index, task) in plan.tasks.iter().enumerate() {
        println!("[{}/{}] {}", index + 1, plan.tasks.len(), task.name);
        if let Some(ref dir) = task.working_dir {
            println!("    cwd: {}", dir);
        }
        for command in &task.commands {
            println!("    $ {}", command);
        }
    }
}
