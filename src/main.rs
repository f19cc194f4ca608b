use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{value_parser, Arg, ArgAction, Command};
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use steptrace::error::TracerError;
use steptrace::launcher::TraceeProcess;
use steptrace::stats::TraceStats;
use steptrace::storage::{InsnKind, TraceDb};
use steptrace::tracer::{StepEvent, Tracer, TracerConfig};

/// Print one progress line every this many steps
const STATUS_EVERY: u64 = 1000;

/// Minimum step gap between extra lines for calls, returns and stack writes
const EVENT_GAP: u64 = 100;

/// How a trace session ended
enum TraceOutcome {
    Exited(i32),
    Terminated(Signal),
    Interrupted,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Command::new("steptrace")
        .version("0.1.0")
        .about("Instruction-level tracer with a recording viewer")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Launch a program and trace it to completion")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value("out.trace")
                        .value_parser(value_parser!(PathBuf))
                        .help("Trace file to write"),
                )
                .arg(
                    Arg::new("stack-window")
                        .long("stack-window")
                        .default_value("256")
                        .value_parser(value_parser!(usize))
                        .help("Bytes of stack captured around sp each step"),
                )
                .arg(Arg::new("program").required(true).help("Program to launch"))
                .arg(
                    Arg::new("args")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .help("Arguments passed to the program"),
                ),
        )
        .subcommand(
            Command::new("attach")
                .about("Attach to a running process and trace until it exits or Ctrl-C")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value("out.trace")
                        .value_parser(value_parser!(PathBuf))
                        .help("Trace file to write"),
                )
                .arg(
                    Arg::new("stack-window")
                        .long("stack-window")
                        .default_value("256")
                        .value_parser(value_parser!(usize))
                        .help("Bytes of stack captured around sp each step"),
                )
                .arg(
                    Arg::new("pid")
                        .required(true)
                        .value_parser(value_parser!(i32))
                        .help("Pid to attach to"),
                ),
        )
        .subcommand(
            Command::new("view")
                .about("Serve a saved trace to the web viewer")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Trace file to load"),
                )
                .arg(
                    Arg::new("port")
                        .long("port")
                        .default_value("8080")
                        .value_parser(value_parser!(u16))
                        .help("Port to listen on"),
                ),
        )
        .subcommand(
            Command::new("stats")
                .about("Print summary statistics for a saved trace")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Trace file to load"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        );

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("run", args)) => {
            let output = args.get_one::<PathBuf>("output").unwrap().clone();
            let stack_window = *args.get_one::<usize>("stack-window").unwrap();
            let program = args.get_one::<String>("program").unwrap().clone();
            let tracee_args: Vec<String> = args
                .get_many::<String>("args")
                .map(|vals| vals.cloned().collect())
                .unwrap_or_default();

            println!("Launching {}...", program);
            let mut tracee = TraceeProcess::launch(&program, &tracee_args)?;
            println!("Tracing pid {}", tracee.pid());

            let db = TraceDb::new();
            let config = TracerConfig {
                stack_window,
                ..Default::default()
            };
            // a failed attach must not leave the launched program behind
            let mut tracer = match Tracer::attach(tracee.pid(), db.clone(), config) {
                Ok(tracer) => tracer,
                Err(err) => {
                    tracee.kill();
                    return Err(err.into());
                }
            };
            let interrupted = install_interrupt_flag()?;

            match trace_loop(&mut tracer, &interrupted)? {
                TraceOutcome::Exited(code) => {
                    println!("Tracee exited with status {}", code);
                }
                TraceOutcome::Terminated(sig) => {
                    println!("Tracee terminated by signal {}", sig);
                }
                TraceOutcome::Interrupted => {
                    tracer.detach()?;
                    tracee.kill();
                    println!("Interrupted; killed tracee");
                }
            }
            println!("Recorded {} steps", tracer.steps_taken());

            db.save(&output)?;
            println!("Saved trace to {}", output.display());
            println!();
            println!("{}", TraceStats::analyze(&db).render_text());
        }
        Some(("attach", args)) => {
            let output = args.get_one::<PathBuf>("output").unwrap().clone();
            let stack_window = *args.get_one::<usize>("stack-window").unwrap();
            let pid = Pid::from_raw(*args.get_one::<i32>("pid").unwrap());

            let db = TraceDb::new();
            let config = TracerConfig {
                stack_window,
                ..Default::default()
            };
            let mut tracer = Tracer::attach(pid, db.clone(), config)?;
            println!("Tracing pid {}. Ctrl-C stops and saves.", pid);
            let interrupted = install_interrupt_flag()?;

            match trace_loop(&mut tracer, &interrupted)? {
                TraceOutcome::Exited(code) => {
                    println!("Tracee exited with status {}", code);
                }
                TraceOutcome::Terminated(sig) => {
                    println!("Tracee terminated by signal {}", sig);
                }
                TraceOutcome::Interrupted => {
                    tracer.detach()?;
                    println!("Interrupted; tracee left running");
                }
            }
            println!("Recorded {} steps", tracer.steps_taken());

            db.save(&output)?;
            println!("Saved trace to {}", output.display());
            println!();
            println!("{}", TraceStats::analyze(&db).render_text());
        }
        Some(("view", args)) => {
            let file = args.get_one::<PathBuf>("file").unwrap();
            let port = *args.get_one::<u16>("port").unwrap();

            let db = TraceDb::load(file)?;
            println!("Loaded {} steps from {}", db.count(), file.display());
            println!("Viewer on http://127.0.0.1:{}/", port);

            steptrace::server::serve(db, port).await?;
        }
        Some(("stats", args)) => {
            let file = args.get_one::<PathBuf>("file").unwrap();
            let json = args.get_flag("json");

            let db = TraceDb::load(file)?;
            let stats = TraceStats::analyze(&db);
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", stats.render_text());
            }
        }
        _ => {}
    }

    Ok(())
}

/// Step until the tracee is gone or the user interrupts
///
/// Progress goes to stdout as a sampled table: every `STATUS_EVERY`th step,
/// plus rate-limited lines for calls, returns and stack writes.
fn trace_loop(
    tracer: &mut Tracer,
    interrupted: &AtomicBool,
) -> Result<TraceOutcome, TracerError> {
    let mut last_printed = 0u64;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return Ok(TraceOutcome::Interrupted);
        }
        match tracer.single_step()? {
            StepEvent::Stepped(entry) => {
                let interesting = matches!(entry.kind, InsnKind::Call | InsnKind::Ret)
                    || !entry.mem_changes.is_empty();
                if entry.step % STATUS_EVERY == 0
                    || (interesting && entry.step - last_printed > EVENT_GAP)
                {
                    let marker = match entry.kind {
                        InsnKind::Call => '>',
                        InsnKind::Ret => '<',
                        _ if !entry.mem_changes.is_empty() => '*',
                        _ => ' ',
                    };
                    println!(
                        "step {:>8}  pc {:#014x}  depth {:>3}  {} {} {}",
                        entry.step, entry.pc, entry.depth, marker, entry.mnemonic, entry.operands
                    );
                    last_printed = entry.step;
                }
            }
            StepEvent::Exited(code) => return Ok(TraceOutcome::Exited(code)),
            StepEvent::Terminated(sig) => return Ok(TraceOutcome::Terminated(sig)),
        }
    }
}

/// Install a Ctrl-C handler that only flips a flag; the step loop does the
/// detach and save on its own thread
fn install_interrupt_flag() -> anyhow::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })?;
    Ok(flag)
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
