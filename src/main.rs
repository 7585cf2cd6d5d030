use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{error::ErrorKind, CommandFactory, Parser as ClapParser};
use colored::Colorize;
use silopt::{
    config::{OptimizationMode, OptimizerOptions, ParserOptions},
    opt::optimize_module,
    oracle::{DeclTable, FileModuleLoader, ModuleLoader},
    parse::parse_source,
    sil::printer::{print_module, print_module_plain},
    source::SourceFile,
};

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    source_files: Vec<PathBuf>,

    /// Parse ownership annotations and treat functions as ownership qualified
    #[arg(long)]
    enable_ownership_ssa: bool,

    /// Report what the parser and optimizer found
    #[arg(short, long)]
    verbose: bool,

    /// Run the local optimizations for `speed` or `size`
    #[arg(short = 'O', long, value_name = "MODE")]
    optimize: Option<OptimizationMode>,

    /// Print the parsed, and possibly optimized, module
    #[arg(short, long)]
    print: bool,

    /// Print without colors
    #[arg(long)]
    plain: bool,

    /// List the files loaded for `import`s
    #[arg(long)]
    dependencies: bool,

    /// Directories searched for imported modules
    #[arg(short = 'I', value_name = "DIR")]
    import_paths: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.exists() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Source file '{}' does not exist!", source_file.display()),
                )
                .exit()
        }

        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Input path '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    let mut failed = false;

    for path in &args.source_files {
        match run(&args, path) {
            Ok(output) => print!("{output}"),
            Err(report) => {
                eprintln!("{report}");
                failed = true;
            }
        }
    }

    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

/// Parses and processes one file, returning what should go to stdout, or
/// the rendered diagnostics if the file has errors
fn run(args: &Args, path: &Path) -> Result<String, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|error| format!("{} reading '{}': {error}", "error:".red().bold(), path.display()))?;
    let source = SourceFile::from_path(path.to_path_buf(), contents);

    let options = ParserOptions {
        enable_ownership_ssa: args.enable_ownership_ssa,
        assume_unqualified_ownership: !args.enable_ownership_ssa,
        verbose: args.verbose,
    };

    let mut decls = DeclTable::with_standard_library();
    let mut loader = FileModuleLoader::new(args.import_paths.clone(), options.clone());
    let parsed = parse_source(&source, &mut decls, options, Some(&mut loader as &mut dyn ModuleLoader));

    let rendered = parsed.diagnostics.render_all(&source);
    if !parsed.is_ok() {
        return Err(rendered);
    }

    if !rendered.is_empty() {
        eprintln!("{rendered}");
    }

    let mut module = parsed.module;
    let mut output = String::new();

    if let Some(mode) = args.optimize.filter(|mode| *mode != OptimizationMode::None) {
        let options = OptimizerOptions {
            optimization_mode: mode,
            ..Default::default()
        };
        let stats = optimize_module(&mut module, &decls, &options);

        if args.verbose {
            eprintln!(
                "{} {} functions, {} casts resolved to succeed, {} to fail, {} closures, {} instructions and {} blocks deleted",
                "optimized".green().bold(),
                stats.functions,
                stats.casts.will_succeed,
                stats.casts.will_fail,
                stats.closures_deleted,
                stats.dead_instructions,
                stats.dead_blocks,
            );
        }
    }

    if args.print {
        output.push_str(&if args.plain {
            print_module_plain(&module)
        } else {
            print_module(&module)
        });
    }

    if args.dependencies {
        if let Some(tracker) = loader.dependency_tracker() {
            for dependency in tracker.dependencies() {
                output.push_str(dependency);
                output.push('\n');
            }
        }
    }

    Ok(output)
}
