use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use colored::Colorize;
use env_logger::Env;
use log::warn;
use num_complex::Complex64;

use mathexpr_vm::config::EngineConfig;
use mathexpr_vm::convert::denormalize;
use mathexpr_vm::derivative::differentiate;
use mathexpr_vm::equation::declare_unknowns;
use mathexpr_vm::namespace::Namespace;
use mathexpr_vm::opt::Graph;
use mathexpr_vm::rules::RuleSet;
use mathexpr_vm::Equation;

#[derive(Parser)]
#[command(name = "mathexpr")]
#[command(about = "Compile, differentiate and evaluate mathematical formulas")]
#[command(version)]
struct Args {
    /// Formula to compile, e.g. "x^2 + sin(y)" or "f(x) = x^2 + 1"
    formula: String,

    /// Input values, e.g. "x=3,y=2"; unlisted variables are 0
    #[arg(long, value_name = "ASSIGNMENTS")]
    at: Option<String>,

    /// Also differentiate with respect to this variable
    #[arg(long, value_name = "VARIABLE")]
    derive: Option<String>,

    /// Print the simplified Working Tree
    #[arg(long)]
    tree: bool,

    /// Print the optimized graph
    #[arg(long)]
    ir: bool,

    /// Print the instruction listing
    #[arg(long)]
    bytecode: bool,

    /// Additional rewrite rules, one per line
    #[arg(long, value_name = "FILE")]
    rules: Option<PathBuf>,

    /// Upper bound on simplifier passes
    #[arg(long, value_name = "N")]
    passes: Option<usize>,

    /// Disable constant folding in the graph
    #[arg(long)]
    no_fold: bool,

    /// Disable common-subexpression merging in the graph
    #[arg(long)]
    no_merge: bool,

    /// Disable the built-in rewrite rules
    #[arg(long)]
    no_rules: bool,
}

impl Args {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_fold_constants(!self.no_fold)
            .with_merge_nodes(!self.no_merge)
            .with_builtin_rules(!self.no_rules);
        if let Some(passes) = self.passes {
            config = config.with_simplify_passes(passes);
        }
        config
    }
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.config();
    let mut ns = Namespace::builtins();
    declare_unknowns(&mut ns, &args.formula)?;

    let rules = match &args.rules {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            let rules = RuleSet::parse(&text, &ns);
            if rules.is_empty() {
                warn!("no usable rules in {}", path.display());
            }
            rules
        }
        None => RuleSet::new(),
    };
    let equation = Equation::with_rules(&args.formula, &ns, config.clone(), &rules)?;
    let variables = equation.sorted_variables().to_vec();

    println!("{} {}", "Formula:".bold(), args.formula);
    println!("{} {}", "Simplified:".bold(), denormalize(equation.tree()));
    if args.tree {
        println!("{} {:?}", "Tree:".bold(), equation.tree());
    }
    if args.ir {
        let inputs = equation.evaluator().variables().to_vec();
        let graph = Graph::compile(std::slice::from_ref(equation.tree()), &inputs, &config)?;
        println!("{}", "Graph:".bold());
        print!("{}", graph.listing(Some(&ns)));
    }
    if args.bytecode {
        println!("{}", "Bytecode:".bold());
        print!("{}", equation.evaluator().listing(Some(&ns)));
    }

    let inputs = match &args.at {
        Some(assignments) => parse_assignments(assignments, &variables)?,
        None => vec![0.0; variables.len()],
    };
    if args.at.is_some() || variables.is_empty() {
        println!("{} {}", "Value:".bold(), format_value(equation.eval(&inputs)?));
    }

    if let Some(variable) = &args.derive {
        let derivative = differentiate(equation.tree(), variable, &Namespace::builtins(), &config)?;
        println!(
            "{} {}",
            format!("d/d{variable}:").bold(),
            denormalize(&derivative)
        );
        if args.at.is_some() {
            let mut context = equation.derivative(variable)?.context();
            context.set_inputs(&inputs)?;
            println!("{} {}", "Slope:".bold(), format_value(context.eval()[0]));
        }
    }
    Ok(())
}

/// Parses `x=3,y=2` into values ordered like `variables`.
fn parse_assignments(text: &str, variables: &[String]) -> Result<Vec<f64>, String> {
    let mut values = vec![0.0; variables.len()];
    for assignment in text.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| format!("expected name=value, got '{assignment}'"))?;
        let index = variables
            .iter()
            .position(|v| v == name.trim())
            .ok_or_else(|| format!("'{}' is not a variable of the formula", name.trim()))?;
        values[index] = value
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number", value.trim()))?;
    }
    Ok(values)
}

fn format_value(value: Complex64) -> String {
    if value.im == 0.0 {
        value.re.to_string()
    } else {
        value.to_string()
    }
}
