//! dvflash CLI - Command-line tool for serial booting and flashing DM644x boards.
//!
//! ## Features
//!
//! - Boot an application from RAM over UART
//! - Restore NOR flash, burn NOR or NAND flash, erase flash
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use dvflash::{BinaryFormat, FlashCommand, FlashType};
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod serial;

use commands::flash::FlashRequest;
use config::Config;

/// dvflash - Serial boot and flash programming for DM644x boards.
///
/// Environment variables:
///   DVFLASH_PORT              - Default serial port
///   DVFLASH_LOADER_DIR        - Directory holding the UART loader images
///   DVFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "dvflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (e.g. /dev/ttyUSB0 or COM3).
    #[arg(short, long, global = true, env = "DVFLASH_PORT")]
    port: Option<String>,

    /// Application entry point in hex (default: 0x81080000).
    #[arg(short, long, global = true, value_parser = parse_hex_u32, value_name = "ADDR")]
    entry: Option<u32>,

    /// Skip the boot ROM transfer; the board already runs the UART loader.
    #[arg(long, global = true)]
    no_rbl: bool,

    /// Directory holding ubl_davinci_nor.bin and ubl_davinci_nand.bin.
    #[arg(long, global = true, env = "DVFLASH_LOADER_DIR", value_name = "DIR")]
    loader_dir: Option<PathBuf>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Verbose output level (-v echoes device output, -vv adds protocol detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "DVFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Flash family on the board.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum FlashArg {
    /// NOR flash.
    Nor,
    /// NAND flash.
    Nand,
}

impl From<FlashArg> for FlashType {
    fn from(flash: FlashArg) -> Self {
        match flash {
            FlashArg::Nor => FlashType::Nor,
            FlashArg::Nand => FlashType::Nand,
        }
    }
}

/// Storage format of a burned application.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum FormatArg {
    /// S-record image, decoded by the loader before writing.
    #[default]
    Srec,
    /// Binary image with a header.
    Bin,
}

impl From<FormatArg> for BinaryFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Srec => BinaryFormat::SRecord,
            FormatArg::Bin => BinaryFormat::Binary,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Load an application into RAM and run it.
    Boot {
        /// Application image (binary or S-record).
        app: PathBuf,

        /// Send the application bytes as-is instead of as S-records.
        #[arg(long)]
        raw: bool,
    },

    /// Restore NOR flash from an application image.
    Restore {
        /// Application image (binary or S-record).
        app: PathBuf,

        /// Send the application bytes as-is instead of as S-records.
        #[arg(long)]
        raw: bool,
    },

    /// Write the flash loader and an application to flash.
    Flash {
        /// Target flash.
        #[arg(long, value_enum)]
        flash: FlashArg,

        /// Storage format of the application in flash.
        #[arg(long, value_enum, default_value_t)]
        format: FormatArg,

        /// Flash loader to write instead of the stock one.
        #[arg(long, value_name = "FILE")]
        ubl: Option<PathBuf>,

        /// Application image (binary or S-record).
        app: PathBuf,
    },

    /// Erase a whole flash device.
    Erase {
        /// Flash to erase.
        #[arg(value_enum)]
        flash: FlashArg,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// Operator cancelled; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<dvflash::Error>() {
        Some(e) if e.is_cancelled() => 130,
        _ => 1,
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 | 1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Boot { app, raw } => commands::flash::cmd_run(
            cli,
            &config,
            &FlashRequest {
                command: FlashCommand::Boot,
                application: Some(app),
                second_stage: None,
                raw: *raw,
            },
        ),
        Commands::Restore { app, raw } => commands::flash::cmd_run(
            cli,
            &config,
            &FlashRequest {
                command: FlashCommand::NorRestore,
                application: Some(app),
                second_stage: None,
                raw: *raw,
            },
        ),
        Commands::Flash {
            flash,
            format,
            ubl,
            app,
        } => commands::flash::cmd_run(
            cli,
            &config,
            &FlashRequest {
                command: FlashCommand::Burn {
                    flash: (*flash).into(),
                    format: (*format).into(),
                },
                application: Some(app),
                second_stage: ubl.as_deref(),
                raw: false,
            },
        ),
        Commands::Erase { flash } => commands::flash::cmd_run(
            cli,
            &config,
            &FlashRequest {
                command: FlashCommand::Erase {
                    flash: (*flash).into(),
                },
                application: None,
                second_stage: None,
                raw: false,
            },
        ),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "dvflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x81080000"), Ok(0x8108_0000));
        assert_eq!(parse_hex_u32("81080000"), Ok(0x8108_0000));
        assert_eq!(parse_hex_u32("0X8108_0000"), Ok(0x8108_0000));
        assert!(parse_hex_u32("0xZZ").is_err());
        assert!(parse_hex_u32("0x1_0000_0000").is_err());
    }

    #[test]
    fn test_parse_flash_subcommand() {
        let cli = Cli::try_parse_from([
            "dvflash",
            "flash",
            "--flash",
            "nand",
            "--format",
            "bin",
            "u-boot.bin",
            "--no-rbl",
        ])
        .unwrap();

        assert!(cli.no_rbl);
        match cli.command {
            Commands::Flash {
                flash,
                format,
                ubl,
                app,
            } => {
                assert_eq!(FlashType::from(flash), FlashType::Nand);
                assert_eq!(BinaryFormat::from(format), BinaryFormat::Binary);
                assert!(ubl.is_none());
                assert_eq!(app, PathBuf::from("u-boot.bin"));
            },
            _ => panic!("expected flash subcommand"),
        }
    }

    #[test]
    fn test_flash_format_defaults_to_srec() {
        let cli = Cli::try_parse_from(["dvflash", "flash", "--flash", "nor", "app.bin"]).unwrap();
        match cli.command {
            Commands::Flash { format, .. } => {
                assert_eq!(BinaryFormat::from(format), BinaryFormat::SRecord);
            },
            _ => panic!("expected flash subcommand"),
        }
    }

    #[test]
    fn test_entry_is_global() {
        let cli = Cli::try_parse_from(["dvflash", "boot", "app.bin", "-e", "0x80000000"]).unwrap();
        assert_eq!(cli.entry, Some(0x8000_0000));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            exit_code_for(&CliError::Usage("bad".into()).into()),
            2
        );
        assert_eq!(
            exit_code_for(&CliError::Cancelled("stop".into()).into()),
            130
        );
        assert_eq!(exit_code_for(&dvflash::Error::Cancelled.into()), 130);
        assert_eq!(exit_code_for(&dvflash::Error::FinalConfirmation.into()), 1);
        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), 1);
    }
}
