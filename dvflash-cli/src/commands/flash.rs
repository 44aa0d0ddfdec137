//! Boot, restore, flash and erase command implementation.
//!
//! Every device command follows the same path: read the input files, build
//! and prepare the command plan, open the port, then run the sequencer on a
//! worker thread that Ctrl-C cancels.

use anyhow::{Context, Result};
use console::style;
use dvflash::port::DEFAULT_BAUD;
use dvflash::target::dm644x::ProgressFn;
use dvflash::{
    BinaryImage, CommandPlan, Dm644xFlasher, FlashCommand, LoaderDirectory, PayloadEncoding,
    RunContext, RunOutcome, SerialConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::serial::{SerialOptions, boot_mode_prompt, select_serial_port};
use crate::{Cli, CliError, use_fancy_output};

/// What one device command sends.
pub(crate) struct FlashRequest<'a> {
    /// Command run by the UART loader.
    pub command: FlashCommand,
    /// Application image file.
    pub application: Option<&'a Path>,
    /// Operator-supplied flash loader file.
    pub second_stage: Option<&'a Path>,
    /// Send the application without S-record encoding.
    pub raw: bool,
}

fn read_image(path: &Path, what: &str) -> Result<BinaryImage> {
    BinaryImage::from_file(path)
        .with_context(|| format!("Failed to read {what} {}", path.display()))
}

/// Turn the command line and configuration into a validated plan.
fn build_plan(cli: &Cli, config: &Config, request: &FlashRequest<'_>) -> Result<CommandPlan> {
    let mut plan = CommandPlan::new(request.command).with_first_stage(!cli.no_rbl);

    if let Some(exec) = config.loader_exec(request.command.flash_type()) {
        plan = plan.with_first_stage_exec(exec);
    }
    if let Some(entry) = cli.entry {
        plan = plan.with_entry_point(entry);
    }
    if request.raw {
        plan = plan.with_encoding(PayloadEncoding::Raw);
    }
    if let Some(path) = request.application {
        plan = plan.with_application(read_image(path, "application")?);
    }
    if let Some(path) = request.second_stage {
        plan = plan.with_second_stage(read_image(path, "flash loader")?);
    }

    plan.validate()
        .map_err(|e| CliError::Usage(e.to_string()))?;
    Ok(plan)
}

fn loader_dir(cli: &Cli, config: &Config) -> PathBuf {
    cli.loader_dir
        .clone()
        .or_else(|| config.loader.dir.clone())
        .unwrap_or_else(Config::default_loader_dir)
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
    {
        pb.set_style(bar_style.progress_chars("#>-"));
    }
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

fn progress_reporter(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    let mut current = String::new();

    Box::new(move |name: &str, sent: usize, total: usize| {
        if name != current {
            current = name.to_string();
            pb.reset();
            pb.set_length(total as u64);
            pb.set_message(format!("Sending {name}"));
        }
        pb.set_position(sent as u64);
    })
}

/// Run one device command.
pub(crate) fn cmd_run(cli: &Cli, config: &Config, request: &FlashRequest<'_>) -> Result<()> {
    if !cli.quiet {
        if let Some(path) = request.application {
            eprintln!("{} Loading {}", style("📦").cyan(), path.display());
        }
    }

    let plan = build_plan(cli, config, request)?;
    let loaders = LoaderDirectory::new(loader_dir(cli, config));
    debug!("Loader directory: {}", loaders.dir().display());
    let ctx = RunContext::prepare(plan, &loaders).context("Failed to prepare images")?;

    let port = select_serial_port(
        &SerialOptions {
            port: cli.port.clone(),
            non_interactive: cli.non_interactive,
        },
        config,
    )?;
    let mut serial = SerialConfig::new(&port, DEFAULT_BAUD);
    if let Some(timeout) = config.read_timeout() {
        serial = serial.with_timeout(timeout);
    }

    if !cli.quiet {
        eprintln!(
            "{} Using {port} at {DEFAULT_BAUD} baud",
            style("🔌").cyan()
        );
        eprintln!("{} {}", style("⏳").yellow(), request.command);
        if ctx.first_stage().is_some() {
            eprintln!(
                "{}",
                style("   Power on or reset the board to start the transfer").dim()
            );
        }
    }

    let pb = progress_bar(cli.quiet);
    let flasher = Dm644xFlasher::open(&serial)
        .with_context(|| format!("Failed to open serial port {port}"))?
        .with_verbose(cli.verbose > 0)
        .with_token_timeout(config.token_timeout())
        .with_boot_mode_confirm(boot_mode_prompt(cli.non_interactive))
        .with_progress(progress_reporter(&pb));

    let job = flasher.spawn(ctx)?;
    let cancel = job.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }

    let result = job.join();
    let outcome = RunOutcome::from_result(&result);

    if outcome.succeeded {
        pb.finish_and_clear();
        if !cli.quiet {
            eprintln!("\n{} {}", style("✓").green().bold(), outcome.summary);
        }
    } else {
        pb.abandon();
        eprintln!("\n{} {}", style("✗").red().bold(), outcome.summary);
    }

    result.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use dvflash::{BinaryFormat, FlashType, Sequence};
    use std::fs;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("dvflash").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_build_plan_boot() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app.bin");
        fs::write(&app, [0u8; 16]).unwrap();

        let cli = cli(&["--no-rbl", "-e", "0x80000000", "boot", "app.bin"]);
        let plan = build_plan(
            &cli,
            &Config::default(),
            &FlashRequest {
                command: FlashCommand::Boot,
                application: Some(&app),
                second_stage: None,
                raw: true,
            },
        )
        .unwrap();

        assert!(!plan.sends_first_stage());
        assert_eq!(plan.entry_point(), 0x8000_0000);
        assert_eq!(plan.encoding(), PayloadEncoding::Raw);
        assert_eq!(plan.application().unwrap().len(), 16);
    }

    #[test]
    fn test_build_plan_uses_configured_loader_exec() {
        let mut config = Config::default();
        config.loader.nand_exec_addr = Some(0x2400);

        let cli = cli(&["erase", "nand"]);
        let plan = build_plan(
            &cli,
            &config,
            &FlashRequest {
                command: FlashCommand::Erase {
                    flash: FlashType::Nand,
                },
                application: None,
                second_stage: None,
                raw: false,
            },
        )
        .unwrap();

        assert_eq!(plan.first_stage_exec(), 0x2400);
        assert_eq!(plan.command().sequence(), Sequence::Erase);
    }

    #[test]
    fn test_build_plan_external_loader() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app.bin");
        let ubl = dir.path().join("ubl.bin");
        fs::write(&app, [1u8; 8]).unwrap();
        fs::write(&ubl, [2u8; 8]).unwrap();

        let cli = cli(&["flash", "--flash", "nor", "app.bin"]);
        let plan = build_plan(
            &cli,
            &Config::default(),
            &FlashRequest {
                command: FlashCommand::Burn {
                    flash: FlashType::Nor,
                    format: BinaryFormat::SRecord,
                },
                application: Some(&app),
                second_stage: Some(&ubl),
                raw: false,
            },
        )
        .unwrap();

        assert!(!plan.uses_embedded_loader());
        assert_eq!(plan.second_stage_exec(), 0x0100);
    }

    #[test]
    fn test_build_plan_missing_file_names_path() {
        let cli = cli(&["boot", "missing.bin"]);
        let err = build_plan(
            &cli,
            &Config::default(),
            &FlashRequest {
                command: FlashCommand::Boot,
                application: Some(Path::new("/nonexistent/missing.bin")),
                second_stage: None,
                raw: false,
            },
        )
        .unwrap_err();

        assert!(format!("{err:#}").contains("missing.bin"));
    }

    #[test]
    fn test_build_plan_invalid_exec_is_usage_error() {
        let mut config = Config::default();
        config.loader.nor_exec_addr = Some(0x1_0000);

        let cli = cli(&["erase", "nor"]);
        let err = build_plan(
            &cli,
            &config,
            &FlashRequest {
                command: FlashCommand::Erase {
                    flash: FlashType::Nor,
                },
                application: None,
                second_stage: None,
                raw: false,
            },
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_loader_dir_precedence() {
        let mut config = Config::default();
        config.loader.dir = Some(PathBuf::from("from-config"));

        let explicit = cli(&["--loader-dir", "from-cli", "erase", "nor"]);
        assert_eq!(loader_dir(&explicit, &config), PathBuf::from("from-cli"));
    }
}
