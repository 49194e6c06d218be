use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use classad::{
    Arena, ClassAdError, EvalConfig, EvalFailure, ExprId, Flattened, MatchClassAd, Unparser, Value,
};

/// ClassAd expression evaluator
///
/// Evaluates, partially evaluates and matches ClassAd records.
#[derive(Parser)]
#[command(name = "classad")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Nested evaluations allowed before evaluation fails
    #[arg(long, global = true, default_value_t = classad::evaluator::DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression, optionally inside a record
    Eval {
        /// Expression source
        expr: String,

        /// File holding the record `[ ... ]` to evaluate in
        #[arg(long)]
        ad: Option<PathBuf>,

        /// Also print the sub-expression that decided the result
        #[arg(long)]
        witness: bool,
    },

    /// Reduce an expression as far as a record allows
    Flatten {
        /// Expression source
        expr: String,

        /// File holding the record `[ ... ]`
        #[arg(long)]
        ad: PathBuf,
    },

    /// Match two records against each other's requirements
    Match {
        /// File holding the left record
        left: PathBuf,

        /// File holding the right record
        right: PathBuf,
    },

    /// List the attributes an expression reads
    Refs {
        /// Expression source
        expr: String,

        /// File holding the record `[ ... ]`
        #[arg(long)]
        ad: PathBuf,
    },
}

#[derive(Serialize)]
struct WitnessReport {
    value: serde_json::Value,
    witness: String,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum FlattenReport {
    Value(serde_json::Value),
    Residual(String),
}

#[derive(Serialize)]
struct MatchReport {
    symmetric: bool,
    left_matches_right: bool,
    right_matches_left: bool,
    left_rank: Option<f64>,
    right_rank: Option<f64>,
}

#[derive(Serialize)]
struct RefsReport {
    external: Vec<String>,
    internal: Vec<String>,
}

fn main() -> ExitCode {
    // Set up miette for nice error output
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))
    .ok();

    init_tracing();

    let cli = Cli::parse();
    let mut arena = Arena::with_config(EvalConfig {
        max_depth: cli.max_depth,
    });
    let json = cli.json;

    let result = match cli.command {
        Commands::Eval { expr, ad, witness } => {
            cmd_eval(&mut arena, &expr, ad.as_deref(), witness, json)
        }
        Commands::Flatten { expr, ad } => cmd_flatten(&mut arena, &expr, &ad, json),
        Commands::Match { left, right } => cmd_match(&mut arena, &left, &right, json),
        Commands::Refs { expr, ad } => cmd_refs(&mut arena, &expr, &ad, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            let exit_code = if report.downcast_ref::<EvalFailure>().is_some() {
                ExitCode::from(2)
            } else if let Some(ClassAdError::Io { .. }) = report.downcast_ref::<ClassAdError>() {
                ExitCode::from(3)
            } else {
                ExitCode::from(1)
            };
            eprintln!("{:?}", report);
            exit_code
        }
    }
}

/// Log to stderr, filtered by `CLASSAD_LOG` (default `warn`)
fn init_tracing() {
    let filter = EnvFilter::try_from_env("CLASSAD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_ad(arena: &mut Arena, path: &Path) -> Result<ExprId> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| ClassAdError::io_error(format!("{}: {}", path.display(), e)))?;
    debug!(path = %path.display(), "parsing record");
    Ok(classad::parse_classad(arena, &source)?)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn cmd_eval(arena: &mut Arena, source: &str, ad: Option<&Path>, witness: bool, json: bool) -> Result<()> {
    let ad = match ad {
        Some(path) => load_ad(arena, path)?,
        None => arena.classad(),
    };
    let expr = classad::parse_expr(arena, source)?;

    if witness {
        let (value, significant) = arena.evaluate_with_witness(ad, expr)?;
        let unparser = Unparser::new(arena);
        if json {
            return print_json(&WitnessReport {
                value: unparser.to_json(&value),
                witness: unparser.expr(significant),
            });
        }
        println!("{}", unparser.value(&value));
        println!("witness: {}", unparser.expr(significant));
        return Ok(());
    }

    let value = arena.evaluate_expr(ad, expr)?;
    print_value(arena, &value, json)
}

fn print_value(arena: &Arena, value: &Value, json: bool) -> Result<()> {
    let unparser = Unparser::new(arena);
    if json {
        return print_json(&unparser.to_json(value));
    }
    println!("{}", unparser.value(value));
    Ok(())
}

fn cmd_flatten(arena: &mut Arena, source: &str, ad: &Path, json: bool) -> Result<()> {
    let ad = load_ad(arena, ad)?;
    let expr = classad::parse_expr(arena, source)?;
    let flattened = arena.flatten(ad, expr)?;
    let unparser = Unparser::new(arena);
    let report = match &flattened {
        Flattened::Value(value) => FlattenReport::Value(unparser.to_json(value)),
        Flattened::Residual(residual) => FlattenReport::Residual(unparser.expr(*residual)),
    };
    if json {
        return print_json(&report);
    }
    match flattened {
        Flattened::Value(value) => println!("{}", unparser.value(&value)),
        Flattened::Residual(residual) => println!("{}", unparser.expr(residual)),
    }
    Ok(())
}

fn cmd_match(arena: &mut Arena, left: &Path, right: &Path, json: bool) -> Result<()> {
    let left = load_ad(arena, left)?;
    let right = load_ad(arena, right)?;
    let ctx = MatchClassAd::new(arena, Some(left), Some(right))?;
    let report = MatchReport {
        symmetric: ctx.symmetric_match(arena),
        left_matches_right: ctx.left_matches_right(arena),
        right_matches_left: ctx.right_matches_left(arena),
        left_rank: ctx.left_rank(arena),
        right_rank: ctx.right_rank(arena),
    };
    if json {
        return print_json(&report);
    }
    println!("symmetric: {}", report.symmetric);
    println!("left matches right: {}", report.left_matches_right);
    println!("right matches left: {}", report.right_matches_left);
    println!("left rank: {}", rank_text(report.left_rank));
    println!("right rank: {}", rank_text(report.right_rank));
    Ok(())
}

fn rank_text(rank: Option<f64>) -> String {
    rank.map_or_else(|| "undefined".to_string(), |r| r.to_string())
}

fn cmd_refs(arena: &mut Arena, source: &str, ad: &Path, json: bool) -> Result<()> {
    let ad = load_ad(arena, ad)?;
    let expr = classad::parse_expr(arena, source)?;
    let report = RefsReport {
        external: arena.external_references(ad, expr)?.into_iter().collect(),
        internal: arena.internal_references(ad, expr)?.into_iter().collect(),
    };
    if json {
        return print_json(&report);
    }
    println!("external: {}", report.external.join(", "));
    println!("internal: {}", report.internal.join(", "));
    Ok(())
}
