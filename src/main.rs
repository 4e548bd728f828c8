//! Rill CLI: run script files or stdin, evaluate inline code, and
//! disassemble or assemble bytecode listings.

use std::env;
use std::fs;
use std::io::Read;
use std::process;
use std::sync::Arc;

use colored::Colorize;

use rill::value::Value;
use rill::vm::{Program, Vm};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where the input text comes from.
enum Input {
    /// Read the script from stdin.
    Stdin,
    /// Read the script from a file.
    File(String),
    /// Inline code from `-e`.
    Inline(String),
}

/// CLI options parsed from arguments.
struct Options {
    input: Input,
    /// Arguments after the script path, exposed as the `argv` global.
    script_args: Vec<String>,
    /// Print the disassembly instead of running.
    disassemble: bool,
    /// Treat the input as an assembly listing instead of source.
    assemble: bool,
}

fn print_usage() {
    eprintln!("Rill {} - scripting language", VERSION);
    eprintln!();
    eprintln!("Usage: rill [options] [script.rl] [args...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -e CODE         Evaluate CODE instead of reading a script");
    eprintln!("  -d              Print disassembly instead of running");
    eprintln!("  -a              Treat input as an assembly listing");
    eprintln!("  --version       Show the version");
    eprintln!("  --help, -h      Show this help message");
    eprintln!();
    eprintln!("With no script, the program is read from stdin. Arguments");
    eprintln!("after the script path are exposed to it as 'argv'. The exit");
    eprintln!("status is non-zero when the 'errors' global is non-empty");
    eprintln!("after the run.");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  rill script.rl a b        Run a script with two arguments");
    eprintln!("  rill -e 'println(1 + 1);' Evaluate code directly");
    eprintln!("  rill -d script.rl         Show the compiled bytecode");
    eprintln!("  rill -a listing.txt       Assemble a listing and run it");
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = Options {
        input: Input::Stdin,
        script_args: Vec::new(),
        disassemble: false,
        assemble: false,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-e" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("-e requires a code argument");
                    print_usage();
                    process::exit(64);
                }
                options.input = Input::Inline(args[i].clone());
            }
            "-d" => options.disassemble = true,
            "-a" => options.assemble = true,
            "--version" => {
                println!("rill {}", VERSION);
                process::exit(0);
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            arg if arg.starts_with('-') && arg.len() > 1 => {
                eprintln!("Unknown option: {}", arg);
                print_usage();
                process::exit(64);
            }
            arg => {
                options.input = Input::File(arg.to_string());
                options.script_args = args[i + 1..].to_vec();
                break;
            }
        }
        i += 1;
    }
    options
}

fn read_input(input: &Input) -> Result<String, std::io::Error> {
    match input {
        Input::Inline(code) => Ok(code.clone()),
        Input::File(path) => fs::read_to_string(path),
        Input::Stdin => {
            let mut source = String::new();
            std::io::stdin().read_to_string(&mut source)?;
            Ok(source)
        }
    }
}

fn main() {
    let options = parse_args();

    let source = match read_input(&options.input) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{}", format!("error: {}", err).red());
            process::exit(1);
        }
    };

    let mut vm = Vm::new();

    let program: Arc<Program> = if options.assemble {
        match rill::assemble(&source) {
            Ok(program) => Arc::new(program),
            Err(err) => {
                vm.record_error(&format!("0:0: error: {}", err));
                report_and_exit(&vm);
            }
        }
    } else {
        match vm.compile_source(&Value::str(source)) {
            Some(Value::Exec(program, _)) => program,
            _ => report_and_exit(&vm),
        }
    };

    if options.disassemble {
        print!("{}", rill::disassemble(&program));
        process::exit(0);
    }

    let argv: Vec<Value> = options
        .script_args
        .iter()
        .map(|arg| Value::str(arg.clone()))
        .collect();
    vm.define_global("argv", Value::array(argv));

    vm.run(&program, 0, &[], None);
    report_and_exit(&vm);
}

/// Exit status is non-zero iff the error slot is non-empty after the run.
fn report_and_exit(vm: &Vm) -> ! {
    let slot = vm.error_slot();
    if slot.is_empty() {
        process::exit(0);
    }
    eprintln!("{}", slot.red());
    process::exit(1);
}
