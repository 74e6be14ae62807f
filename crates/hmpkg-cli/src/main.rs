use clap::{CommandFactory, Parser, Subcommand};
use hmpkg_core::activate::Activate;
use hmpkg_core::backup::ConfigBackup;
use hmpkg_core::blocks::{locate_blocks, validate_blocks, PackageBlock};
use hmpkg_core::config::Config;
use hmpkg_core::lines::split_lines;
use hmpkg_core::packages::PackageFile;
use hmpkg_core::transaction::PackageTransaction;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod response;

use response::{Response, Status};

#[derive(Debug, Parser)]
#[command(
    name = "hmpkg",
    version,
    about = "Edit home-manager package lists and apply them safely"
)]
struct Cli {
    #[arg(
        short = 'f',
        long = "file",
        value_name = "PATH",
        help = "Target specific nix file (defaults to config or ~/.config/home-manager/home.nix)"
    )]
    file: Option<PathBuf>,
    #[arg(long = "json", help = "Print a JSON response instead of text")]
    json: bool,
    #[arg(
        short = 'n',
        long = "dry-run",
        help = "Show changes without writing files or applying"
    )]
    dry_run: bool,
    #[arg(
        short = 'v',
        long = "verbose",
        help = "Increase verbosity",
        conflicts_with = "quiet"
    )]
    verbose: bool,
    #[arg(short = 'q', long = "quiet", help = "Suppress non-error output")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Write a default config file")]
    Init {
        #[arg(long, help = "Overwrite an existing config file")]
        force: bool,
    },
    #[command(about = "List packages of one block")]
    Read {
        #[arg(short = 't', long = "type", help = "Package type (defaults to config)")]
        package_type: Option<String>,
    },
    #[command(about = "Add packages and apply the configuration")]
    Add {
        #[arg(short = 't', long = "type", help = "Package type (defaults to config)")]
        package_type: Option<String>,
        #[arg(long, help = "Allow insecure packages while applying")]
        allow_insecure: bool,
        #[arg(long, help = "Replace the block contents instead of merging")]
        overwrite: bool,
        #[arg(required = true)]
        packages: Vec<String>,
    },
    #[command(about = "Delete packages and apply the configuration")]
    Delete {
        #[arg(
            short = 't',
            long = "type",
            help = "Package type (defaults to every block)"
        )]
        package_type: Option<String>,
        #[arg(required = true)]
        packages: Vec<String>,
    },
    #[command(about = "List package blocks found in the file")]
    Blocks,
    #[command(about = "Create or refresh the backup of the file")]
    Backup,
    #[command(about = "Restore the file from its backup")]
    Restore,
    #[command(about = "Apply the configuration without editing it")]
    Switch {
        #[arg(long, help = "Allow insecure packages while applying")]
        allow_insecure: bool,
    },
    #[command(about = "Check nix syntax and package block structure")]
    Check,
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing home directory in environment")]
    MissingHome,
    #[error("config file already exists at {0}")]
    ConfigExists(PathBuf),
    #[error("failed to create config directory: {0}")]
    ConfigDir(std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] hmpkg_core::config::ConfigError),
    #[error("package error: {0}")]
    Package(#[from] hmpkg_core::packages::PackageError),
    #[error("backup error: {0}")]
    Backup(#[from] hmpkg_core::backup::BackupError),
    #[error("failed to read nix file: {0}")]
    ReadNix(std::io::Error),
    #[error("failed to encode json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy)]
struct Output {
    quiet: bool,
    verbose: bool,
    json: bool,
}

impl Output {
    fn info(&self, message: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", message.as_ref());
        }
    }

    fn status(&self, message: impl AsRef<str>) {
        if !self.quiet {
            eprintln!("{}", message.as_ref());
        }
    }

    fn warn(&self, message: impl AsRef<str>) {
        if !self.quiet {
            eprintln!("{}", message.as_ref());
        }
    }

    fn verbose(&self, message: impl AsRef<str>) {
        if self.verbose && !self.quiet {
            eprintln!("{}", message.as_ref());
        }
    }

    fn respond(&self, response: &Response) -> Result<(), CliError> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(response)?);
            return Ok(());
        }
        if response.success {
            self.status(&response.message);
            for line in &response.output {
                self.info(line);
            }
            return Ok(());
        }
        eprintln!("{}", response.message);
        for line in &response.simple_error {
            self.warn(format!("  {}", line));
        }
        for line in &response.output {
            self.verbose(line);
        }
        for line in &response.full_error {
            self.verbose(line);
        }
        Ok(())
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let json = cli.json;
    match run(cli) {
        Ok(Status::Success) => {}
        Ok(status) => {
            tracing::debug!(code = status.code(), "exiting after failed command");
            std::process::exit(status.code())
        }
        Err(err) => {
            if json {
                let response = Response::failure(err.to_string(), vec![err.to_string()]);
                if let Ok(encoded) = serde_json::to_string_pretty(&response) {
                    println!("{}", encoded);
                }
            } else {
                eprintln!("{}", err);
            }
            std::process::exit(Status::Failure.code());
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<Status, CliError> {
    let output = Output {
        quiet: cli.quiet,
        verbose: cli.verbose,
        json: cli.json,
    };

    match cli.command {
        Command::Init { force } => {
            let path = config_path()?;
            if path.exists() && !force {
                return Err(CliError::ConfigExists(path));
            }
            if cli.dry_run {
                output.verbose(format!("would write {}", path.display()));
                return respond(&output, Response::ok("Dry run, config not written.", Vec::new()));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(CliError::ConfigDir)?;
            }
            Config::default().save_to_path(&path)?;
            respond(
                &output,
                Response::ok(format!("Wrote {}", path.display()), Vec::new()),
            )
        }
        Command::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "hmpkg", &mut std::io::stdout());
            Ok(Status::Success)
        }
        command => {
            let home = home_dir()?;
            let config = load_config_or_default()?;
            let target = config.target_path(&home, cli.file.as_deref())?;
            tracing::debug!(path = %target.display(), "resolved configuration file");
            output.verbose(format!("target: {}", target.display()));
            run_on_target(&output, &config, &home, &target, cli.dry_run, command)
        }
    }
}

fn run_on_target(
    output: &Output,
    config: &Config,
    home: &Path,
    target: &Path,
    dry_run: bool,
    command: Command,
) -> Result<Status, CliError> {
    match command {
        Command::Read { package_type } => {
            let package_type = package_type.unwrap_or_else(|| config.target.default_type.clone());
            let packages = PackageFile::load(target)?.packages(&package_type);
            respond(
                output,
                Response::ok(
                    format!("{} packages of type '{}'", packages.len(), package_type),
                    packages,
                ),
            )
        }
        Command::Blocks => {
            let file = PackageFile::load(target)?;
            let lines = file.blocks().iter().map(describe_block).collect();
            respond(
                output,
                Response::ok(format!("{} package blocks", file.blocks().len()), lines),
            )
        }
        Command::Add {
            package_type,
            allow_insecure,
            overwrite,
            packages,
        } => {
            let package_type = package_type.unwrap_or_else(|| config.target.default_type.clone());
            if dry_run {
                let mut file = PackageFile::load(target)?;
                let result = file.add(&package_type, &packages, overwrite)?;
                print_planned_block(output, &file, &package_type);
                return respond(output, Response::ok("Dry run, nothing written.", result));
            }
            let activator = config.activator(home);
            let outcome = PackageTransaction::new(target, &activator).add_packages(
                &package_type,
                &packages,
                allow_insecure,
                overwrite,
            );
            let (status, response) = Response::from_outcome(
                outcome,
                "Packages added and configuration applied.",
                "No packages were added, configuration applied unchanged.",
            );
            respond(output, response)?;
            Ok(status)
        }
        Command::Delete {
            package_type,
            packages,
        } => {
            if dry_run {
                let mut file = PackageFile::load(target)?;
                let deleted = file.delete(&packages, package_type.as_deref())?;
                for block in file.blocks() {
                    print_planned_block(output, &file, &block.package_type);
                }
                return respond(output, Response::ok("Dry run, nothing written.", deleted));
            }
            let activator = config.activator(home);
            let outcome = PackageTransaction::new(target, &activator)
                .delete_packages(package_type.as_deref(), &packages);
            let (status, response) = Response::from_outcome(
                outcome,
                "Packages deleted and configuration applied.",
                "No matching packages to delete, configuration applied unchanged.",
            );
            respond(output, response)?;
            Ok(status)
        }
        Command::Backup => {
            let backup = ConfigBackup::new(target);
            if dry_run {
                output.verbose(format!("would back up to {}", backup.backup_path().display()));
                return respond(output, Response::ok("Dry run, no backup taken.", Vec::new()));
            }
            let status = backup.backup()?;
            respond(
                output,
                Response::ok(
                    format!("Backup {}: {}", status, backup.backup_path().display()),
                    Vec::new(),
                ),
            )
        }
        Command::Restore => {
            let backup = ConfigBackup::new(target);
            if dry_run {
                output.verbose(format!(
                    "would restore from {}",
                    backup.backup_path().display()
                ));
                return respond(output, Response::ok("Dry run, nothing restored.", Vec::new()));
            }
            let status = backup.restore()?;
            respond(
                output,
                Response::ok(format!("Restore {}: {}", status, target.display()), Vec::new()),
            )
        }
        Command::Switch { allow_insecure } => {
            let activator = config.activator(home);
            output.verbose(format!("running: {}", activator.command_line(allow_insecure)));
            if dry_run {
                return respond(output, Response::ok("Dry run, nothing applied.", Vec::new()));
            }
            match activator.activate(allow_insecure) {
                Ok(result) => respond(output, Response::ok("Configuration applied.", result.stdout)),
                Err(failure) => {
                    respond(
                        output,
                        Response::apply_failure("Failed to apply changes.", failure),
                    )?;
                    Ok(Status::Failure)
                }
            }
        }
        Command::Check => {
            let content = std::fs::read_to_string(target).map_err(CliError::ReadNix)?;
            let (ok, report) = check_report(&content);
            let response = if ok {
                Response::ok("No problems found.", report)
            } else {
                Response {
                    success: false,
                    message: "Problems found.".to_string(),
                    simple_error: report.clone(),
                    full_error: report,
                    ..Response::default()
                }
            };
            respond(output, response)?;
            Ok(if ok { Status::Success } else { Status::Failure })
        }
        Command::Init { .. } | Command::Completions { .. } => Ok(Status::Success),
    }
}

fn respond(output: &Output, response: Response) -> Result<Status, CliError> {
    output.respond(&response)?;
    Ok(if response.success {
        Status::Success
    } else {
        Status::Failure
    })
}

fn print_planned_block(output: &Output, file: &PackageFile, package_type: &str) {
    if output.json {
        return;
    }
    let Some(block) = file.block(package_type) else {
        return;
    };
    output.status(format!("{} block would become:", package_type));
    for line in &file.lines()[block.body()] {
        output.status(format!("  | {}", line));
    }
}

fn describe_block(block: &PackageBlock) -> String {
    if block.body().is_empty() {
        format!(
            "{}: empty at line {} (indent {})",
            block.package_type,
            block.start_line + 1,
            block.start_indent
        )
    } else {
        format!(
            "{}: lines {}-{} (indent {})",
            block.package_type,
            block.start_line + 1,
            block.end_line + 1,
            block.start_indent
        )
    }
}

/// Syntax errors from rnix followed by block structure problems.
fn check_report(content: &str) -> (bool, Vec<String>) {
    let mut report = Vec::new();
    let parsed = rnix::Root::parse(content);
    for err in parsed.errors() {
        report.push(format!("syntax: {}", err));
    }

    let lines = split_lines(content);
    let blocks = locate_blocks(&lines);
    if blocks.is_empty() {
        report.push("no package blocks found".to_string());
    }
    if let Err(err) = validate_blocks(&blocks) {
        report.push(err.to_string());
    }

    if report.is_empty() {
        let types: Vec<&str> = blocks
            .iter()
            .map(|block| block.package_type.as_str())
            .collect();
        return (true, vec![format!("package blocks: {}", types.join(", "))]);
    }
    (false, report)
}

fn load_config_or_default() -> Result<Config, CliError> {
    Ok(Config::load_or_default(&config_path()?)?)
}

fn config_dir() -> Result<PathBuf, CliError> {
    home_dir().map(|home| home.join(".config").join("hmpkg"))
}

fn config_path() -> Result<PathBuf, CliError> {
    Ok(config_dir()?.join("config.toml"))
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| CliError::MissingHome)
}

#[cfg(test)]
mod tests {
    use crate::{check_report, describe_block, Cli, Command};
    use clap::Parser;
    use hmpkg_core::blocks::PackageBlock;

    #[test]
    fn add_parses_type_and_flags() {
        let cli = Cli::try_parse_from([
            "hmpkg",
            "--json",
            "add",
            "-t",
            "system",
            "--allow-insecure",
            "pkgs.htop",
            "nixpkgs.jq",
        ])
        .expect("parse failed");
        assert!(cli.json);
        match cli.command {
            Command::Add {
                package_type,
                allow_insecure,
                overwrite,
                packages,
            } => {
                assert_eq!(package_type.as_deref(), Some("system"));
                assert!(allow_insecure);
                assert!(!overwrite);
                assert_eq!(packages, vec!["pkgs.htop", "nixpkgs.jq"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn add_requires_packages() {
        assert!(Cli::try_parse_from(["hmpkg", "add"]).is_err());
        assert!(Cli::try_parse_from(["hmpkg", "delete", "-t", "home"]).is_err());
    }

    #[test]
    fn delete_type_is_optional() {
        let cli = Cli::try_parse_from(["hmpkg", "-f", "/tmp/home.nix", "delete", "pkgs.git"])
            .expect("parse failed");
        assert_eq!(cli.file.as_deref(), Some(std::path::Path::new("/tmp/home.nix")));
        assert!(matches!(
            cli.command,
            Command::Delete {
                package_type: None,
                ..
            }
        ));
    }

    #[test]
    fn verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["hmpkg", "-v", "-q", "read"]).is_err());
    }

    #[test]
    fn describe_block_handles_empty_body() {
        let empty = PackageBlock {
            package_type: "home".to_string(),
            start_line: 3,
            end_line: 2,
            start_indent: 2,
        };
        assert_eq!(describe_block(&empty), "home: empty at line 4 (indent 2)");
        let filled = PackageBlock {
            end_line: 5,
            ..empty
        };
        assert_eq!(describe_block(&filled), "home: lines 4-6 (indent 2)");
    }

    #[test]
    fn check_report_lists_block_types() {
        let (ok, report) = check_report(
            "{ pkgs, ... }:\n{\n  home.packages = [\n    pkgs.git\n  ];\n}\n",
        );
        assert!(ok, "{:?}", report);
        assert_eq!(report, vec!["package blocks: home".to_string()]);
    }

    #[test]
    fn check_report_flags_duplicates_and_syntax() {
        let (ok, report) = check_report("home.packages = [\n];\nhome.packages = [\n];\n");
        assert!(!ok);
        assert!(report
            .iter()
            .any(|line| line.contains("duplicate package block")));

        let (ok, report) = check_report("{\n  home.packages = [\n    pkgs.git\n  ];\n");
        assert!(!ok);
        assert!(report.iter().any(|line| line.starts_with("syntax:")));
    }
}
