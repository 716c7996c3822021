use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::miette;

use rill::{Limits, Options, Value};

/// Run a sandboxed jq-subset filter over a JSON document
///
/// Reads one JSON document from stdin (or --input) and prints one
/// canonical JSON line per filter output.
#[derive(Parser)]
#[command(name = "rill")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The filter to run
    filter: String,

    /// Read the input document from a file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Use null as the input instead of reading anything
    #[arg(short = 'n', long)]
    null_input: bool,

    /// Bind $NAME to a string value (repeatable)
    #[arg(long = "arg", num_args = 2, value_names = ["NAME", "VALUE"])]
    arg: Vec<String>,

    /// Bind $NAME to a JSON value (repeatable)
    #[arg(long = "argjson", num_args = 2, value_names = ["NAME", "JSON"])]
    argjson: Vec<String>,

    /// Cap on evaluation steps
    #[arg(long)]
    max_steps: Option<u64>,

    /// Cap on evaluation depth
    #[arg(long)]
    max_depth: Option<u64>,

    /// Cap on produced outputs
    #[arg(long)]
    max_outputs: Option<u64>,

    /// Pretty-print outputs
    #[arg(short, long)]
    pretty: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{:?}", report);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> miette::Result<()> {
    let input = read_input(&cli)?;
    let options = build_options(&cli)?;

    let outputs = rill::run(&cli.filter, &input, &options).map_err(miette::Report::new)?;

    for value in outputs {
        if cli.pretty {
            println!("{}", value.encode_json_pretty());
        } else {
            println!("{}", value.encode_json());
        }
    }
    Ok(())
}

fn read_input(cli: &Cli) -> miette::Result<Value> {
    if cli.null_input {
        return Ok(Value::Null);
    }

    let text = match &cli.input {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| miette!("cannot read {}: {}", path.display(), e))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| miette!("cannot read stdin: {}", e))?;
            buf
        }
    };

    let json: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| miette!("input is not valid JSON: {}", e))?;
    Ok(Value::from_serde_json(json))
}

fn build_options(cli: &Cli) -> miette::Result<Options> {
    let mut limits = Limits::default();
    if let Some(n) = cli.max_steps {
        limits.max_steps = n;
    }
    if let Some(n) = cli.max_depth {
        limits.max_depth = n;
    }
    if let Some(n) = cli.max_outputs {
        limits.max_outputs = n;
    }

    let mut vars = BTreeMap::new();
    for pair in cli.arg.chunks_exact(2) {
        vars.insert(pair[0].clone(), Value::String(pair[1].clone()));
    }
    for pair in cli.argjson.chunks_exact(2) {
        let json: serde_json::Value = serde_json::from_str(&pair[1])
            .map_err(|e| miette!("--argjson {}: invalid JSON: {}", pair[0], e))?;
        vars.insert(pair[0].clone(), Value::from_serde_json(json));
    }

    Ok(Options { limits, vars })
}
