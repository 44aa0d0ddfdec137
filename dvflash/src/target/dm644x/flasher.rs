//! DM644x handshake sequencer.
//!
//! A run is a fixed series of phases:
//!
//! 1. First-stage transfer to the boot ROM (optional): `BOOTME`, boot header,
//!    `BEGIN`, CRC table, `DONE`, loader, `DONE`; then the boot-mode report.
//! 2. Command: `BOOTPSP`, command word. Re-entered before every retry below.
//! 3. One of:
//!    - erase: `DONE`
//!    - application: `SENDAPP`, header, `BEGIN`, payload, `DONE` x3
//!    - flash loader and application: `SENDUBL`, header, `BEGIN`, payload,
//!      `DONE` x2, then the application exchange without a new command
//!
//! A wrong token, the alternate token or a token timeout restarts the phase
//! from its first wait. Restarts are unbounded; the run ends on success, a
//! transport error, a missing final confirmation, or cancellation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dvflash::{BinaryImage, CommandPlan, FlashCommand, LoaderDirectory, RunContext};
//! use dvflash::target::dm644x::Dm644xFlasher;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = BinaryImage::from_file("u-boot.bin")?;
//!     let plan = CommandPlan::new(FlashCommand::Boot).with_application(app);
//!     let ctx = RunContext::prepare(plan, &LoaderDirectory::new("loaders"))?;
//!
//!     let flasher = Dm644xFlasher::open(&dvflash::SerialConfig::new("/dev/ttyS0", 115200))?
//!         .with_progress(Box::new(|name: &str, sent, total| println!("{name}: {sent}/{total}")));
//!
//!     let job = flasher.spawn(ctx)?;
//!     job.join()?;
//!     Ok(())
//! }
//! ```

use crate::CancelToken;
use crate::error::{Error, Result};
use crate::image::FirstStageLoader;
use crate::port::Port;
use crate::target::dm644x::protocol::{
    BOOT_MODE_FLASH, BOOT_MODE_UART, BootHeader, CommandFrame, ImageHeader, LineMatch,
    MAX_LINE_LEN, Token, classify,
};
use crate::target::plan::{MagicNumber, Payload, RunContext, Sequence};
use log::{debug, info, trace, warn};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Bytes written between progress reports and cancellation checks.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Progress callback: (payload name, bytes sent, total bytes).
pub type ProgressFn = Box<dyn FnMut(&str, usize, usize) + Send>;

/// Asked whether to go on when the board is not strapped for UART boot.
pub type ConfirmFn = Box<dyn FnMut() -> bool + Send>;

/// Outcome of one token wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The expected token arrived.
    Found,
    /// The alternate token arrived.
    Alternate,
    /// Neither arrived before the token timeout.
    TimedOut,
}

/// Splits device output into lines.
///
/// A line ends at NUL (kept), CR or LF (dropped), or after
/// [`MAX_LINE_LEN`] bytes. Partial lines survive idle reads.
#[derive(Debug, Default)]
struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match byte {
            b'\n' | b'\r' => Some(self.take()),
            0 => {
                self.buf.push(0);
                Some(self.take())
            },
            _ => {
                self.buf.push(byte);
                (self.buf.len() >= MAX_LINE_LEN).then(|| self.take())
            },
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    fn clear(&mut self) {
        self.buf.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoaderStep {
    AwaitBootMe,
    SendHeader,
    AwaitBegin,
    SendTable,
    AwaitTableDone,
    SendLoader,
    AwaitLoaderDone,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    FlashLoader,
    Application,
}

impl Stage {
    fn request(self) -> Token {
        match self {
            Self::FlashLoader => Token::SendUbl,
            Self::Application => Token::SendApp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageStep {
    Command,
    AwaitRequest(Stage),
    SendHeader(Stage),
    AwaitBegin(Stage),
    SendPayload(Stage),
    AwaitReceived(Stage),
    AwaitDecoded(Stage),
    AwaitStarted,
    Complete,
}

/// DM644x flasher.
///
/// Generic over the port type `P`, so the same sequencer drives a serial
/// port or a scripted test port.
pub struct Dm644xFlasher<P: Port> {
    port: P,
    verbose: bool,
    cancel: CancelToken,
    token_timeout: Option<Duration>,
    chunk_size: usize,
    progress: Option<ProgressFn>,
    confirm_boot_mode: Option<ConfirmFn>,
    reader: LineReader,
}

impl<P: Port> Dm644xFlasher<P> {
    /// Create a flasher on an opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            verbose: false,
            cancel: CancelToken::new(),
            token_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: None,
            confirm_boot_mode: None,
            reader: LineReader::default(),
        }
    }

    /// Echo every device line at info level.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Use `cancel` instead of a private token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Give up on a token wait after `timeout` and restart the phase.
    ///
    /// Without a timeout the sequencer waits until cancelled.
    #[must_use]
    pub fn with_token_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.token_timeout = timeout;
        self
    }

    /// Payload write granularity.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Report payload progress.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Ask before continuing when the board reports a flash boot mode.
    ///
    /// Without a hook the run continues after a warning.
    #[must_use]
    pub fn with_boot_mode_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm_boot_mode = Some(confirm);
        self
    }

    /// Handle that cancels this flasher.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Run every phase of `ctx` to completion.
    pub fn run(&mut self, ctx: &RunContext) -> Result<()> {
        info!("{} via {}", ctx.command(), self.port.name());

        if let Some(limit) = self.token_timeout {
            if limit < self.port.timeout() {
                debug!("Shortening read timeout to {limit:?}");
                self.port.set_timeout(limit)?;
            }
        }

        if let Some(loader) = ctx.first_stage() {
            self.send_first_stage(ctx, loader)?;
            self.check_boot_mode()?;
        }

        self.checkpoint()?;
        match ctx.sequence() {
            Sequence::Erase => self.erase(ctx.command().magic())?,
            Sequence::Application => self.send_images(ctx, false)?,
            Sequence::LoaderAndApplication => self.send_images(ctx, true)?,
        }

        info!("Operation completed successfully");
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port.discard_input()?;
        self.reader.clear();
        Ok(())
    }

    fn echo(&self, line: &[u8], force: bool) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\0');
        if force || self.verbose {
            info!("Device: {text}");
        } else {
            trace!("Device: {text}");
        }
    }

    /// Read lines until one contains `expected` or `alternate`.
    fn wait_for(&mut self, expected: &[u8], alternate: &[u8], force_echo: bool) -> Result<Wait> {
        let deadline = self.token_timeout.map(|t| Instant::now() + t);

        loop {
            self.checkpoint()?;
            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.reader.clear();
                return Ok(Wait::TimedOut);
            }

            let Some(byte) = self.port.read_byte()? else {
                continue;
            };
            let Some(line) = self.reader.push(byte) else {
                continue;
            };
            if line.is_empty() {
                continue;
            }

            self.echo(&line, force_echo);
            match classify(&line, expected, alternate) {
                LineMatch::Expected => return Ok(Wait::Found),
                LineMatch::Alternate => return Ok(Wait::Alternate),
                LineMatch::Other => {},
            }
        }
    }

    /// Wait for `token`; go to `next` on success, `restart` otherwise.
    fn expect<S>(&mut self, token: Token, alternate: Token, force_echo: bool, next: S, restart: S) -> Result<S> {
        match self.wait_for(token.as_bytes(), alternate.as_bytes(), force_echo)? {
            Wait::Found => {
                debug!("{token} received");
                Ok(next)
            },
            outcome => {
                debug!("Waiting for {token}: {outcome:?}, restarting phase");
                Ok(restart)
            },
        }
    }

    fn write_payload(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let total = data.len();
        let mut sent = 0;

        for chunk in data.chunks(self.chunk_size) {
            self.checkpoint()?;
            self.port.write_all_bytes(chunk)?;
            sent += chunk.len();
            if let Some(progress) = self.progress.as_mut() {
                progress(name, sent, total);
            }
        }

        debug!("{name}: {sent} bytes sent");
        Ok(())
    }

    fn send_first_stage(&mut self, ctx: &RunContext, loader: &FirstStageLoader) -> Result<()> {
        let header = BootHeader {
            crc: loader.crc(),
            length: loader.length(),
            exec: ctx.first_stage_exec(),
        }
        .build();
        let table = ctx.crc().table_hex();
        let words = loader.word_hex()?;

        let mut step = LoaderStep::AwaitBootMe;
        let mut attempt = 0u32;

        loop {
            self.checkpoint()?;
            step = match step {
                LoaderStep::AwaitBootMe => {
                    attempt += 1;
                    if attempt > 1 {
                        debug!("First-stage transfer attempt {attempt}");
                    }
                    info!("Waiting for the boot ROM...");
                    self.expect(
                        Token::BootMe,
                        Token::BootMe,
                        false,
                        LoaderStep::SendHeader,
                        LoaderStep::AwaitBootMe,
                    )?
                },
                LoaderStep::SendHeader => {
                    info!("BOOTME received, sending boot header");
                    self.port.write_all_bytes(&header)?;
                    LoaderStep::AwaitBegin
                },
                LoaderStep::AwaitBegin => self.expect(
                    Token::Begin,
                    Token::BootMe,
                    true,
                    LoaderStep::SendTable,
                    LoaderStep::AwaitBootMe,
                )?,
                LoaderStep::SendTable => {
                    info!("Sending CRC table");
                    self.write_payload("CRC table", table.as_bytes())?;
                    LoaderStep::AwaitTableDone
                },
                LoaderStep::AwaitTableDone => self.expect(
                    Token::Done,
                    Token::BootMe,
                    false,
                    LoaderStep::SendLoader,
                    LoaderStep::AwaitBootMe,
                )?,
                LoaderStep::SendLoader => {
                    info!("Sending UART loader ({} bytes)", loader.length());
                    self.write_payload("UART loader", words.as_bytes())?;
                    LoaderStep::AwaitLoaderDone
                },
                LoaderStep::AwaitLoaderDone => self.expect(
                    Token::Done,
                    Token::BootMe,
                    false,
                    LoaderStep::Complete,
                    LoaderStep::AwaitBootMe,
                )?,
                LoaderStep::Complete => {
                    info!("UART loader accepted");
                    return Ok(());
                },
            };
        }
    }

    fn check_boot_mode(&mut self) -> Result<()> {
        if self.wait_for(BOOT_MODE_UART, BOOT_MODE_FLASH, true)? == Wait::Found {
            debug!("Device is in UART boot mode");
        } else {
            warn!("The device is NOT in UART boot mode");
            let accepted = self
                .confirm_boot_mode
                .as_mut()
                .is_none_or(|confirm| confirm());
            if !accepted {
                return Err(Error::BootModeRejected);
            }
        }
        self.discard_input()
    }

    /// Send the command word once the UART loader asks for it.
    ///
    /// Returns `false` when `BOOTPSP` did not arrive.
    fn send_command(&mut self, magic: MagicNumber) -> Result<bool> {
        self.discard_input()?;
        info!("Waiting for the UART loader...");

        if self.wait_for(Token::BootPsp.as_bytes(), Token::BootPsp.as_bytes(), false)? != Wait::Found {
            return Ok(false);
        }

        self.port.write_all_bytes(&CommandFrame { magic }.build())?;
        debug!("Command {magic} sent");
        Ok(true)
    }

    fn erase(&mut self, magic: MagicNumber) -> Result<()> {
        loop {
            self.checkpoint()?;
            if !self.send_command(magic)? {
                continue;
            }

            info!("Erasing flash...");
            if self.wait_for(Token::Done.as_bytes(), Token::BootPsp.as_bytes(), true)? == Wait::Found {
                info!("Erase complete");
                return Ok(());
            }
            debug!("Erase not confirmed, restarting");
        }
    }

    fn send_images(&mut self, ctx: &RunContext, with_loader: bool) -> Result<()> {
        let application = ctx
            .application()
            .ok_or_else(|| Error::InvalidPlan("no application payload".into()))?;
        let flash_loader = if with_loader {
            Some(
                ctx.second_stage()
                    .ok_or_else(|| Error::InvalidPlan("no flash loader payload".into()))?,
            )
        } else {
            None
        };

        let header = |stage: Stage, payload: &Payload| match stage {
            Stage::FlashLoader => ImageHeader {
                magic: MagicNumber::Safe,
                exec: ctx.second_stage_address(),
                size: payload.size(),
            },
            Stage::Application => ImageHeader {
                magic: ctx.command().application_magic(),
                exec: ctx.entry_point(),
                size: payload.size(),
            },
        };
        let payload = |stage: Stage| match (stage, flash_loader) {
            (Stage::FlashLoader, Some(loader)) => loader,
            _ => application,
        };

        let first = if with_loader {
            Stage::FlashLoader
        } else {
            Stage::Application
        };
        let magic = ctx.command().magic();
        let mut step = ImageStep::Command;

        loop {
            self.checkpoint()?;
            step = match step {
                ImageStep::Command => {
                    if self.send_command(magic)? {
                        ImageStep::AwaitRequest(first)
                    } else {
                        ImageStep::Command
                    }
                },
                ImageStep::AwaitRequest(stage) => self.expect(
                    stage.request(),
                    Token::BootPsp,
                    stage != first,
                    ImageStep::SendHeader(stage),
                    ImageStep::Command,
                )?,
                ImageStep::SendHeader(stage) => {
                    let frame = header(stage, payload(stage));
                    info!("{} received, sending header", stage.request());
                    debug!("Header: {:?}", frame);
                    self.port.write_all_bytes(&frame.build())?;
                    ImageStep::AwaitBegin(stage)
                },
                ImageStep::AwaitBegin(stage) => self.expect(
                    Token::Begin,
                    Token::BootPsp,
                    false,
                    ImageStep::SendPayload(stage),
                    ImageStep::Command,
                )?,
                ImageStep::SendPayload(stage) => {
                    let data = payload(stage);
                    info!("Sending {} ({} bytes)", data.name(), data.size());
                    self.write_payload(data.name(), data.data())?;
                    ImageStep::AwaitReceived(stage)
                },
                ImageStep::AwaitReceived(stage) => self.expect(
                    Token::Done,
                    Token::BootPsp,
                    false,
                    ImageStep::AwaitDecoded(stage),
                    ImageStep::Command,
                )?,
                ImageStep::AwaitDecoded(stage) => {
                    let next = match stage {
                        Stage::FlashLoader => ImageStep::AwaitRequest(Stage::Application),
                        Stage::Application => ImageStep::AwaitStarted,
                    };
                    self.expect(Token::Done, Token::BootPsp, false, next, ImageStep::Command)?
                },
                ImageStep::AwaitStarted => {
                    match self.wait_for(Token::Done.as_bytes(), Token::BootPsp.as_bytes(), true)? {
                        Wait::Found => info!("Application started"),
                        outcome if with_loader => {
                            warn!("Final DONE not received ({outcome:?}), the device may not have booted");
                        },
                        _ => return Err(Error::FinalConfirmation),
                    }
                    ImageStep::Complete
                },
                ImageStep::Complete => return Ok(()),
            };
        }
    }
}

impl<P: Port + 'static> Dm644xFlasher<P> {
    /// Run on a dedicated worker thread.
    ///
    /// The port is closed when the run ends.
    pub fn spawn(self, ctx: RunContext) -> Result<FlashJob> {
        let cancel = self.cancel.clone();
        let handle = thread::Builder::new()
            .name("dvflash-worker".into())
            .spawn(move || {
                let mut flasher = self;
                let result = flasher.run(&ctx);
                if let Err(e) = flasher.port.close() {
                    debug!("Closing port failed: {e}");
                }
                result
            })?;

        Ok(FlashJob { cancel, handle })
    }
}

/// Handle to a run on a worker thread.
#[derive(Debug)]
pub struct FlashJob {
    cancel: CancelToken,
    handle: JoinHandle<Result<()>>,
}

impl FlashJob {
    /// Ask the worker to stop at its next check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this job.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether the worker has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and return its result.
    pub fn join(self) -> Result<()> {
        self.handle.join().map_err(|_| Error::WorkerPanicked)?
    }
}

/// Overall result of a run as reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Whether every phase completed.
    pub succeeded: bool,
    /// One-line summary.
    pub summary: String,
}

impl RunOutcome {
    /// Summarize a run result.
    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                succeeded: true,
                summary: "Operation completed successfully.".into(),
            },
            Err(Error::Cancelled) => Self {
                succeeded: false,
                summary: "Operation cancelled.".into(),
            },
            Err(e) => Self {
                succeeded: false,
                summary: format!(
                    "Interfacing to the device via UART failed: {e}. Reset or power-cycle the board and try again."
                ),
            },
        }
    }
}

// Native-specific convenience functions
#[cfg(feature = "native")]
mod native_impl {
    use super::{Dm644xFlasher, Error, Result, debug, thread, warn};
    use crate::port::{NativePort, SerialConfig};
    use std::time::Duration;

    impl Dm644xFlasher<NativePort> {
        /// Open the serial port described by `config`, retrying briefly.
        pub fn open(config: &SerialConfig) -> Result<Self> {
            const MAX_OPEN_PORT_ATTEMPTS: usize = 3;
            const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

            let mut last_error = None;

            for attempt in 1..=MAX_OPEN_PORT_ATTEMPTS {
                match NativePort::open(config) {
                    Ok(port) => {
                        if attempt > 1 {
                            debug!("Port opened on attempt {attempt}");
                        }
                        return Ok(Self::new(port));
                    },
                    Err(e) => {
                        warn!(
                            "Failed to open port {} (attempt {attempt}/{MAX_OPEN_PORT_ATTEMPTS}): {e}",
                            config.port_name
                        );
                        last_error = Some(e);

                        if attempt < MAX_OPEN_PORT_ATTEMPTS {
                            thread::sleep(OPEN_RETRY_DELAY);
                        }
                    },
                }
            }

            Err(last_error.unwrap_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "serial port not opened",
                ))
            }))
        }
    }
}
