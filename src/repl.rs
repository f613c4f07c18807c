/// REPL (Read-Eval-Print-Loop) over the fragment evaluator
use slisp_eval::{EvalError, Evaluation, Evaluator, Value};
use std::io::{self, Write};

/// Main REPL loop
pub fn repl_loop(evaluator: &Evaluator) {
    loop {
        print!("slisp-eval> ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) => {
                // EOF (Ctrl+D) - read_line returns 0 bytes read
                println!("Goodbye!");
                break;
            }
            Ok(_) => {
                let input = input.trim();

                if input.is_empty() {
                    continue;
                }

                match evaluator.evaluate_source(input) {
                    Ok(evaluation) => print_evaluation(&evaluation),
                    Err(error) => println!("Error: {}", format_error(&error)),
                }
            }
            Err(error) => {
                println!("Error reading input: {}", error);
                break;
            }
        }
    }
}

fn print_evaluation(evaluation: &Evaluation) {
    print!("{}", evaluation.output);
    if !evaluation.output.is_empty() && !evaluation.output.ends_with('\n') {
        println!();
    }
    match &evaluation.value {
        Value::Unit => {}
        value => println!("{}", value),
    }
}

/// Message followed by its chain of causes
fn format_error(error: &EvalError) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(&format!("\n  caused by: {}", cause));
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use slisp_eval::ErrorKind;

    #[test]
    fn error_chain_is_printed() {
        let error = Evaluator::new().evaluate_source("(/ 1 0)").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::EvaluationFailure);
        let formatted = format_error(&error);
        assert!(formatted.starts_with("evaluation failure: division by zero"));
        assert!(formatted.contains("caused by: division by zero"));
    }
}
