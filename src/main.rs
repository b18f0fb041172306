use std::env;
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process;
use std::thread;

use log::{debug, info};
use rustyline::error::ReadlineError;

use mscheme::config::DEFAULT_THRESHOLD_BYTES;
use mscheme::reader;
use mscheme::{GcPolicy, Machine, MachineConfig, SchemeError, STDLIB};

/// The evaluator recurses natively, so it runs on a thread with a large stack.
const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Depth limit that `EVAL_STACK_SIZE` can carry, used unless the user picks one.
const EVAL_MAX_DEPTH: usize = 32_768;

enum Stdlib {
    Embedded,
    Skip,
    File(PathBuf),
}

struct Options {
    config: MachineConfig,
    stdlib: Stdlib,
    batch: bool,
    files: Vec<PathBuf>,
}

fn print_help() {
    println!("Usage: mscheme [OPTIONS] [FILE]...");
    println!();
    println!("Runs each FILE in order, then starts the REPL (unless --batch).");
    println!();
    println!("Options:");
    println!("  --gc <always|threshold>   Collection policy (default: always)");
    println!("  --gc-threshold <bytes>    Use the threshold policy with this initial limit");
    println!("  --max-depth <n>           Maximum evaluation depth (default: 32768)");
    println!("  --seed <n>                Seed for (random)");
    println!("  --stdlib <file>           Load this file instead of the built-in library");
    println!("  --no-stdlib               Do not load any library");
    println!("  --batch                   Exit after running the given files");
    println!("  -h, --help                Show this help message");
    println!();
    println!("Environment variables:");
    println!("  MSCHEME_GC, MSCHEME_GC_THRESHOLD, MSCHEME_MAX_DEPTH   Defaults for the options above");
    println!("  RUST_LOG=debug|trace                                  Collector / evaluation logging");
}

fn parse_args() -> Result<Options, String> {
    let mut args = pico_args::Arguments::from_env();

    if args.contains(["-h", "--help"]) {
        print_help();
        process::exit(0);
    }

    let mut config = MachineConfig::from_env();
    if env::var_os("MSCHEME_MAX_DEPTH").is_none() {
        config.max_depth = EVAL_MAX_DEPTH;
    }

    if let Some(policy) = args
        .opt_value_from_str::<_, GcPolicy>("--gc")
        .map_err(|e| e.to_string())?
    {
        config.gc_policy = policy;
    }
    if let Some(bytes) = args
        .opt_value_from_str::<_, usize>("--gc-threshold")
        .map_err(|e| e.to_string())?
    {
        config.gc_policy = GcPolicy::Threshold {
            initial_bytes: bytes,
        };
    }
    if let Some(depth) = args
        .opt_value_from_str::<_, usize>("--max-depth")
        .map_err(|e| e.to_string())?
    {
        config.max_depth = depth;
    }
    config.random_seed = args
        .opt_value_from_str::<_, u64>("--seed")
        .map_err(|e| e.to_string())?;

    let stdlib_file: Option<PathBuf> = args
        .opt_value_from_str("--stdlib")
        .map_err(|e| e.to_string())?;
    let stdlib = if args.contains("--no-stdlib") {
        Stdlib::Skip
    } else if let Some(path) = stdlib_file {
        Stdlib::File(path)
    } else {
        Stdlib::Embedded
    };
    let batch = args.contains("--batch");

    let mut files = Vec::new();
    for arg in args.finish() {
        let path = PathBuf::from(arg);
        if path.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option '{}'", path.display()));
        }
        files.push(path);
    }

    if let GcPolicy::Threshold { initial_bytes: 0 } = config.gc_policy {
        config.gc_policy = GcPolicy::Threshold {
            initial_bytes: DEFAULT_THRESHOLD_BYTES,
        };
    }

    Ok(Options {
        config,
        stdlib,
        batch,
        files,
    })
}

fn main() {
    env_logger::init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("mscheme: {}", e);
            eprintln!("Try 'mscheme --help' for usage information.");
            process::exit(1);
        }
    };

    let handle = thread::Builder::new()
        .name("mscheme-eval".into())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || run(options));

    let code = match handle {
        Ok(handle) => handle.join().unwrap_or(101),
        Err(e) => {
            eprintln!("mscheme: could not start evaluator thread: {}", e);
            1
        }
    };
    process::exit(code);
}

fn run(options: Options) -> i32 {
    match run_inner(options) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            2
        }
    }
}

/// Only fatal errors make it out of here.
fn run_inner(options: Options) -> Result<(), SchemeError> {
    let mut machine = Machine::new(options.config)?;
    debug!("machine ready: {}", machine.heap.stats());

    match &options.stdlib {
        Stdlib::Embedded => run_source(&mut machine, STDLIB, false)?,
        Stdlib::File(path) => run_file(&mut machine, path)?,
        Stdlib::Skip => {}
    }

    for path in &options.files {
        run_file(&mut machine, path)?;
    }

    if options.batch {
        return Ok(());
    }

    if io::stdin().is_terminal() {
        run_interactive(&mut machine)
    } else {
        run_piped(&mut machine)
    }
}

fn run_file(machine: &mut Machine, path: &PathBuf) -> Result<(), SchemeError> {
    match fs::read_to_string(path) {
        Ok(src) => {
            info!("loading {}", path.display());
            run_source(machine, &src, false)
        }
        Err(e) => {
            eprintln!("Error loading {}: {}", path.display(), e);
            Ok(())
        }
    }
}

/// Evaluate every top-level expression in `src`. With `echo`, every result
/// is printed; otherwise only error values are, on stderr. Read errors stop
/// this source and are reported; fatal errors are returned.
fn run_source(machine: &mut Machine, src: &str, echo: bool) -> Result<(), SchemeError> {
    let outcome = machine.eval_source(src, |m, v| {
        if echo {
            println!("{}", m.render(v));
        } else if m.heap.is_error(v) {
            eprintln!("{}", m.render(v));
        }
        Ok(())
    });

    match outcome {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            eprintln!("{}", e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

/// Interactive REPL: accumulate lines until parens are balanced.
fn run_interactive(machine: &mut Machine) -> Result<(), SchemeError> {
    let mut rl = match rustyline::DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("line editor unavailable ({}), reading stdin instead", e);
            return run_piped(machine);
        }
    };

    println!("mscheme: {} ", machine.heap.stats());
    println!("Ctrl-D to exit.\n");

    let mut buf = String::new();
    loop {
        let prompt = if buf.is_empty() { "> " } else { "  " };
        match rl.readline(prompt) {
            Ok(line) => {
                buf.push_str(&line);
                buf.push('\n');
                if reader::needs_more_input(&buf) {
                    continue;
                }
                let input = buf.trim().to_string();
                buf.clear();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input.as_str());
                run_source(machine, &input, true)?;
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                buf.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }
    Ok(())
}

/// Piped mode: read all input, then evaluate one expression at a time.
fn run_piped(machine: &mut Machine) -> Result<(), SchemeError> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    run_source(machine, &input, true)
}
