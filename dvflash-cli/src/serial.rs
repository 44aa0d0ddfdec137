//! Serial port selection and operator prompts.
//!
//! Port resolution order:
//! - Port given on the command line (or `DVFLASH_PORT`)
//! - Port from the configuration file
//! - The only detected port, or an interactive choice among several
//! - The platform default (`/dev/ttyS0`, `COM1`)

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    dvflash::{NativePortEnumerator, PortEnumerator, PortInfo, target::dm644x::ConfirmFn},
    log::{debug, info, warn},
    std::io::IsTerminal,
};

/// Port used when nothing else names one.
#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM1";
/// Port used when nothing else names one.
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyS0";

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (never prompt).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn is_interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("Prompt failed: {io_err}")).into()
            }
        },
    }
}

/// Pick a port without prompting, if the detected set allows it.
///
/// Returns `Ok(None)` when the operator has to choose.
fn choose_without_prompt(ports: &[PortInfo], non_interactive: bool) -> Result<Option<String>> {
    match ports {
        [] => {
            info!("No serial ports detected, using {DEFAULT_PORT}");
            Ok(Some(DEFAULT_PORT.to_string()))
        },
        [only] => {
            info!("Auto-selected port: {}", only.name);
            Ok(Some(only.name.clone()))
        },
        _ if non_interactive => Err(usage_err(
            "Multiple serial ports found; pass --port or set DVFLASH_PORT",
        )),
        _ => Ok(None),
    }
}

/// Resolve the serial port to open.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = NativePortEnumerator::list_ports().unwrap_or_else(|e| {
        debug!("Port enumeration failed: {e}");
        Vec::new()
    });

    let non_interactive = options.non_interactive || !is_interactive_terminal();
    match choose_without_prompt(&ports, non_interactive)? {
        Some(port) => Ok(port),
        None => select_port_interactive(ports),
    }
}

fn port_label(port: &PortInfo) -> String {
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{}{vid_pid}{product}", port.name)
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<PortInfo>) -> Result<String> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let labels: Vec<String> = ports.iter().map(port_label).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the port connected to the board")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(|p| p.name)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Build the hook asked when the board is not strapped for UART boot.
///
/// Non-interactive sessions refuse.
pub fn boot_mode_prompt(non_interactive: bool) -> ConfirmFn {
    Box::new(move || {
        if non_interactive || !is_interactive_terminal() {
            warn!("Refusing to continue without UART boot mode in non-interactive mode");
            return false;
        }

        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("The board does not report UART boot mode. Continue anyway?")
            .default(false)
            .interact_opt()
            .ok()
            .flatten()
            .unwrap_or(false)
    })
}
