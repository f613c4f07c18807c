mod repl;

use repl::repl_loop;
use slisp_eval::{EvalOptions, Evaluator};
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    tracing_subscriber::registry().with(formatter).with(filter).init();
}

fn main() {
    setup_logging();

    let mut options = EvalOptions::default();

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--blocks" => options = options.with_blocks(true),
            "-h" | "--help" => {
                print_usage();
                return;
            }
            other => {
                println!("Unknown argument: {}", other);
                print_usage();
                return;
            }
        }
    }

    println!("SLisp Fragment Evaluator v0.1.0");
    println!("Type a fragment to compile and run it, or press Ctrl+D to quit.");
    if options.allow_blocks {
        println!("Multi-statement fragments are enabled.");
    }
    println!();
    repl_loop(&Evaluator::with_options(options));
}

fn print_usage() {
    println!("Usage:");
    println!("  slisp-eval             - Start the fragment REPL");
    println!("  slisp-eval --blocks    - Also accept multi-statement fragments");
    println!();
    println!("Set RUST_LOG (for example RUST_LOG=debug) to see pipeline logs on stderr.");
}
