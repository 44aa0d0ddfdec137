//! Command plans and the prepared run context.
//!
//! A [`CommandPlan`] records what the operator asked for: the command, the
//! addresses and the images. [`RunContext::prepare`] turns a plan into
//! everything the sequencer sends, doing every fallible input step (loader
//! lookup, encoding, field-width checks) before the port is touched.

use crate::error::{Error, Result};
use crate::image::{BinaryImage, FirstStageLoader, LoaderSource};
use crate::protocol::crc::Crc32;
use crate::protocol::srec::{self, PayloadEncoding};
use log::debug;
use std::fmt;

/// Default load and entry address of the application image.
pub const DEFAULT_APP_ADDR: u32 = 0x8108_0000;

/// Default load address of the second-stage loader.
pub const DEFAULT_SECOND_STAGE_LOAD: u32 = 0x8107_0000;

/// Execution address of an operator-supplied second-stage loader.
pub const DEFAULT_EXTERNAL_LOADER_EXEC: u32 = 0x0100;

/// High half of the second-stage loader address in its header.
pub const SECOND_STAGE_ADDR_BASE: u32 = 0x8000_0000;

/// Flash family on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlashType {
    /// NOR flash.
    Nor,
    /// NAND flash.
    Nand,
}

impl FlashType {
    /// File name of the loader image for this family.
    pub fn loader_file_name(self) -> &'static str {
        match self {
            Self::Nor => "ubl_davinci_nor.bin",
            Self::Nand => "ubl_davinci_nand.bin",
        }
    }

    /// Entry point of the stock loader for this family.
    pub fn default_loader_exec(self) -> u32 {
        match self {
            Self::Nor => 0x29E8,
            Self::Nand => 0x236C,
        }
    }
}

impl fmt::Display for FlashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nor => write!(f, "NOR"),
            Self::Nand => write!(f, "NAND"),
        }
    }
}

/// How an application burned to flash is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryFormat {
    /// Decoded S-record image.
    #[default]
    SRecord,
    /// Binary image with a header.
    Binary,
}

impl fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SRecord => write!(f, "S-record"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Command and image words understood by the UART loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum MagicNumber {
    /// Boot without any cache or DMA setup.
    Safe = 0xA1AC_ED00,
    /// Boot with DMA.
    Dma = 0xA1AC_ED11,
    /// Boot with instruction cache.
    Ic = 0xA1AC_ED22,
    /// Boot with fast EMIF timing.
    Fast = 0xA1AC_ED33,
    /// DMA and instruction cache.
    DmaIc = 0xA1AC_ED44,
    /// DMA, instruction cache and fast EMIF timing.
    DmaIcFast = 0xA1AC_ED55,
    /// Binary application image.
    BinaryImage = 0xA1AC_ED66,
    /// Restore NOR flash.
    NorRestore = 0xA1AC_ED77,
    /// Burn an S-record image to NOR.
    NorSrecBurn = 0xA1AC_ED88,
    /// Burn a binary image to NOR.
    NorBinBurn = 0xA1AC_ED99,
    /// Erase all of NOR.
    NorGlobalErase = 0xA1AC_EDAA,
    /// Burn an S-record image to NAND.
    NandSrecBurn = 0xA1AC_EDBB,
    /// Burn a binary image to NAND.
    NandBinBurn = 0xA1AC_EDCC,
    /// Erase all of NAND.
    NandGlobalErase = 0xA1AC_EDDD,
    /// No command.
    Invalid = 0xFFFF_FFFF,
}

impl MagicNumber {
    /// Numeric value sent on the wire.
    pub fn value(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for MagicNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.value())
    }
}

/// Token exchange a command needs after the command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Sequence {
    /// Wait for the erase to finish.
    Erase,
    /// Send the application.
    Application,
    /// Send the second-stage loader, then the application.
    LoaderAndApplication,
}

/// What the operator asked the device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlashCommand {
    /// Load the application to RAM and run it.
    Boot,
    /// Restore NOR flash from the application image.
    NorRestore,
    /// Write the second-stage loader and the application to flash.
    Burn {
        /// Target flash.
        flash: FlashType,
        /// Storage format of the application.
        format: BinaryFormat,
    },
    /// Erase a whole flash device.
    Erase {
        /// Target flash.
        flash: FlashType,
    },
}

impl FlashCommand {
    /// Command word sent after `BOOTPSP`.
    pub fn magic(self) -> MagicNumber {
        match self {
            Self::Boot => MagicNumber::Safe,
            Self::NorRestore => MagicNumber::NorRestore,
            Self::Burn {
                flash: FlashType::Nor,
                format: BinaryFormat::SRecord,
            } => MagicNumber::NorSrecBurn,
            Self::Burn {
                flash: FlashType::Nor,
                format: BinaryFormat::Binary,
            } => MagicNumber::NorBinBurn,
            Self::Burn {
                flash: FlashType::Nand,
                format: BinaryFormat::SRecord,
            } => MagicNumber::NandSrecBurn,
            Self::Burn {
                flash: FlashType::Nand,
                format: BinaryFormat::Binary,
            } => MagicNumber::NandBinBurn,
            Self::Erase {
                flash: FlashType::Nor,
            } => MagicNumber::NorGlobalErase,
            Self::Erase {
                flash: FlashType::Nand,
            } => MagicNumber::NandGlobalErase,
        }
    }

    /// Image word in the application header.
    pub fn application_magic(self) -> MagicNumber {
        match self {
            Self::Burn {
                format: BinaryFormat::Binary,
                ..
            } => MagicNumber::BinaryImage,
            _ => MagicNumber::Safe,
        }
    }

    /// Flash family whose loader runs the command.
    ///
    /// Boot and restore run on the NOR loader.
    pub fn flash_type(self) -> FlashType {
        match self {
            Self::Boot | Self::NorRestore => FlashType::Nor,
            Self::Burn { flash, .. } | Self::Erase { flash } => flash,
        }
    }

    /// Exchange that follows the command word.
    pub fn sequence(self) -> Sequence {
        match self {
            Self::Boot | Self::NorRestore => Sequence::Application,
            Self::Burn { .. } => Sequence::LoaderAndApplication,
            Self::Erase { .. } => Sequence::Erase,
        }
    }

    /// Whether the command sends an application image.
    pub fn needs_application(self) -> bool {
        self.sequence() != Sequence::Erase
    }
}

impl fmt::Display for FlashCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "Sending and running application"),
            Self::NorRestore => write!(f, "Restoring NOR flash"),
            Self::Burn { flash, format } => write!(f, "Flashing {flash} with {format} image"),
            Self::Erase { flash } => write!(f, "Globally erasing {flash} flash"),
        }
    }
}

/// Validated description of a run.
#[derive(Debug, Clone)]
pub struct CommandPlan {
    command: FlashCommand,
    first_stage: bool,
    first_stage_exec: u32,
    app_load: u32,
    app_entry: u32,
    second_stage_load: u32,
    second_stage_exec: Option<u32>,
    embedded_loader: bool,
    application: Option<BinaryImage>,
    second_stage: Option<BinaryImage>,
    encoding: PayloadEncoding,
}

impl CommandPlan {
    /// Plan for `command` with the stock addresses and the embedded loader.
    pub fn new(command: FlashCommand) -> Self {
        Self {
            command,
            first_stage: true,
            first_stage_exec: command.flash_type().default_loader_exec(),
            app_load: DEFAULT_APP_ADDR,
            app_entry: DEFAULT_APP_ADDR,
            second_stage_load: DEFAULT_SECOND_STAGE_LOAD,
            second_stage_exec: None,
            embedded_loader: true,
            application: None,
            second_stage: None,
            encoding: PayloadEncoding::default(),
        }
    }

    /// Set the application image.
    #[must_use]
    pub fn with_application(mut self, image: BinaryImage) -> Self {
        self.application = Some(image);
        self
    }

    /// Use an operator-supplied second-stage loader instead of the embedded one.
    #[must_use]
    pub fn with_second_stage(mut self, image: BinaryImage) -> Self {
        self.second_stage = Some(image);
        self.embedded_loader = false;
        self
    }

    /// Choose between the embedded and an operator-supplied second-stage loader.
    #[must_use]
    pub fn with_embedded_loader(mut self, embedded: bool) -> Self {
        self.embedded_loader = embedded;
        self
    }

    /// Send the first-stage loader to the boot ROM (default), or assume the
    /// UART loader is already running.
    #[must_use]
    pub fn with_first_stage(mut self, enabled: bool) -> Self {
        self.first_stage = enabled;
        self
    }

    /// Override the first-stage loader entry point.
    #[must_use]
    pub fn with_first_stage_exec(mut self, addr: u32) -> Self {
        self.first_stage_exec = addr;
        self
    }

    /// Override the application entry point.
    #[must_use]
    pub fn with_entry_point(mut self, addr: u32) -> Self {
        self.app_entry = addr;
        self
    }

    /// Override the application load address.
    #[must_use]
    pub fn with_load_address(mut self, addr: u32) -> Self {
        self.app_load = addr;
        self
    }

    /// Override the second-stage loader load address.
    #[must_use]
    pub fn with_second_stage_load(mut self, addr: u32) -> Self {
        self.second_stage_load = addr;
        self
    }

    /// Override the second-stage loader entry point.
    #[must_use]
    pub fn with_second_stage_exec(mut self, addr: u32) -> Self {
        self.second_stage_exec = Some(addr);
        self
    }

    /// Choose how the application payload is sent.
    #[must_use]
    pub fn with_encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Requested command.
    pub fn command(&self) -> FlashCommand {
        self.command
    }

    /// Whether the first-stage loader is sent.
    pub fn sends_first_stage(&self) -> bool {
        self.first_stage
    }

    /// First-stage loader entry point.
    pub fn first_stage_exec(&self) -> u32 {
        self.first_stage_exec
    }

    /// Application load address.
    pub fn load_address(&self) -> u32 {
        self.app_load
    }

    /// Application entry point.
    pub fn entry_point(&self) -> u32 {
        self.app_entry
    }

    /// Second-stage loader load address.
    pub fn second_stage_load(&self) -> u32 {
        self.second_stage_load
    }

    /// Second-stage loader entry point.
    ///
    /// The embedded loader runs from the same address as the first stage;
    /// an operator-supplied one from `0x0100` unless overridden.
    pub fn second_stage_exec(&self) -> u32 {
        self.second_stage_exec.unwrap_or(if self.embedded_loader {
            self.first_stage_exec
        } else {
            DEFAULT_EXTERNAL_LOADER_EXEC
        })
    }

    /// Whether the embedded loader is written as second stage.
    pub fn uses_embedded_loader(&self) -> bool {
        self.embedded_loader
    }

    /// Application image.
    pub fn application(&self) -> Option<&BinaryImage> {
        self.application.as_ref()
    }

    /// Operator-supplied second-stage loader.
    pub fn second_stage(&self) -> Option<&BinaryImage> {
        self.second_stage.as_ref()
    }

    /// Application payload encoding.
    pub fn encoding(&self) -> PayloadEncoding {
        self.encoding
    }

    /// Check that the plan is complete and its addresses fit their fields.
    pub fn validate(&self) -> Result<()> {
        let sequence = self.command.sequence();

        if self.command.needs_application() && self.application.is_none() {
            return Err(Error::InvalidPlan(format!(
                "{} requires an application image",
                self.command
            )));
        }
        if sequence == Sequence::Erase && self.application.is_some() {
            return Err(Error::InvalidPlan(
                "erase does not take an application image".into(),
            ));
        }

        match (self.embedded_loader, self.second_stage.is_some()) {
            (false, false) if sequence == Sequence::LoaderAndApplication => {
                return Err(Error::InvalidPlan(
                    "embedded loader disabled but no flash loader image given".into(),
                ));
            },
            (true, true) => {
                return Err(Error::InvalidPlan(
                    "flash loader image given while the embedded loader is selected".into(),
                ));
            },
            _ => {},
        }
        if self.second_stage.is_some() && sequence != Sequence::LoaderAndApplication {
            return Err(Error::InvalidPlan(
                "a flash loader image is only used when burning flash".into(),
            ));
        }

        fit_u16("first-stage entry point", self.first_stage_exec)?;
        fit_u16("second-stage entry point", self.second_stage_exec())?;
        Ok(())
    }
}

fn fit_u16(field: &'static str, value: u32) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::FieldOverflow {
        field,
        value: u64::from(value),
        digits: 4,
    })
}

/// Bytes sent after a `BEGIN`, with the name shown in progress reports.
#[derive(Debug, Clone)]
pub struct Payload {
    name: String,
    data: Vec<u8>,
    size: u32,
}

impl Payload {
    /// Wrap `data`; its length must fit the eight-digit size field.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Result<Self> {
        let size = u32::try_from(data.len()).map_err(|_| Error::FieldOverflow {
            field: "payload size",
            value: data.len() as u64,
            digits: 8,
        })?;
        Ok(Self {
            name: name.into(),
            data,
            size,
        })
    }

    /// Name for progress reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes on the wire.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size field value.
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Everything one run sends, prepared from a [`CommandPlan`].
#[derive(Debug, Clone)]
pub struct RunContext {
    command: FlashCommand,
    crc: Crc32,
    first_stage: Option<FirstStageLoader>,
    first_stage_exec: u16,
    second_stage: Option<Payload>,
    second_stage_exec: u16,
    application: Option<Payload>,
    app_entry: u32,
}

impl RunContext {
    /// Validate `plan`, fetch the loader from `loaders` if needed, and encode
    /// every payload.
    pub fn prepare(plan: CommandPlan, loaders: &dyn LoaderSource) -> Result<Self> {
        plan.validate()?;

        let command = plan.command();
        let flash = command.flash_type();
        let sequence = command.sequence();
        let crc = Crc32::loader();

        let needs_loader = plan.sends_first_stage()
            || (sequence == Sequence::LoaderAndApplication && plan.uses_embedded_loader());
        let loader = if needs_loader {
            Some(loaders.loader_image(flash)?)
        } else {
            None
        };

        let first_stage = match (&loader, plan.sends_first_stage()) {
            (Some(image), true) => Some(FirstStageLoader::new(image, &crc)?),
            _ => None,
        };

        let second_stage = if sequence == Sequence::LoaderAndApplication {
            let load = plan.second_stage_load();
            let strip = flash == FlashType::Nand;
            let (image, external) = match (plan.second_stage(), &loader) {
                (Some(image), _) => (image, true),
                (None, Some(image)) => (image, false),
                (None, None) => return Err(Error::LoaderNotFound(flash)),
            };
            let encodes = !(external && image.is_srec());
            if strip && encodes && image.len() <= srec::RELOCATION_STUB_LEN {
                return Err(Error::InvalidImage(format!(
                    "flash loader is {} bytes, expected more than {}",
                    image.len(),
                    srec::RELOCATION_STUB_LEN
                )));
            }
            let data = if external {
                srec::prepare(image.bytes(), load, strip, &image.module_name())
            } else {
                srec::encode(image.bytes(), load, strip, &image.module_name())
            };
            Some(Payload::new("flash loader", data)?)
        } else {
            None
        };

        let application = match plan.application() {
            Some(image) => {
                let data = match plan.encoding() {
                    PayloadEncoding::SRecord => {
                        srec::prepare(image.bytes(), plan.load_address(), false, &image.module_name())
                    },
                    PayloadEncoding::Raw => image.bytes().to_vec(),
                };
                Some(Payload::new(image.name().unwrap_or("application"), data)?)
            },
            None => None,
        };

        debug!(
            "Prepared {command}: first stage {}, flash loader {} bytes, application {} bytes",
            first_stage.as_ref().map_or(0, |l| l.length()),
            second_stage.as_ref().map_or(0, Payload::size),
            application.as_ref().map_or(0, Payload::size),
        );

        Ok(Self {
            command,
            crc,
            first_stage,
            first_stage_exec: fit_u16("first-stage entry point", plan.first_stage_exec())?,
            second_stage,
            second_stage_exec: fit_u16("second-stage entry point", plan.second_stage_exec())?,
            application,
            app_entry: plan.entry_point(),
        })
    }

    /// Requested command.
    pub fn command(&self) -> FlashCommand {
        self.command
    }

    /// Exchange after the command word.
    pub fn sequence(&self) -> Sequence {
        self.command.sequence()
    }

    /// Loader-integrity CRC whose table goes to the boot ROM.
    pub fn crc(&self) -> &Crc32 {
        &self.crc
    }

    /// First-stage loader, if it is sent.
    pub fn first_stage(&self) -> Option<&FirstStageLoader> {
        self.first_stage.as_ref()
    }

    /// First-stage loader entry point.
    pub fn first_stage_exec(&self) -> u16 {
        self.first_stage_exec
    }

    /// Record-encoded second-stage loader.
    pub fn second_stage(&self) -> Option<&Payload> {
        self.second_stage.as_ref()
    }

    /// Address field of the second-stage loader header.
    pub fn second_stage_address(&self) -> u32 {
        SECOND_STAGE_ADDR_BASE | u32::from(self.second_stage_exec)
    }

    /// Application payload.
    pub fn application(&self) -> Option<&Payload> {
        self.application.as_ref()
    }

    /// Application entry point.
    pub fn entry_point(&self) -> u32 {
        self.app_entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::loader::MemoryLoaders;
    use crate::protocol::srec::RELOCATION_STUB_LEN;

    fn loader_bytes(body_len: usize) -> Vec<u8> {
        let mut bytes = vec![0xEE; RELOCATION_STUB_LEN];
        bytes.extend((0..body_len).map(|i| i as u8));
        bytes
    }

    fn app() -> BinaryImage {
        BinaryImage::from_bytes(vec![0x5A; 40]).with_name("app.bin")
    }

    #[test]
    fn test_magic_values() {
        assert_eq!(MagicNumber::Safe.value(), 0xA1ACED00);
        assert_eq!(MagicNumber::BinaryImage.value(), 0xA1ACED66);
        assert_eq!(MagicNumber::NandGlobalErase.value(), 0xA1ACEDDD);
        assert_eq!(MagicNumber::NorSrecBurn.to_string(), "A1ACED88");
    }

    #[test]
    fn test_command_mapping() {
        let burn = FlashCommand::Burn {
            flash: FlashType::Nand,
            format: BinaryFormat::Binary,
        };
        assert_eq!(burn.magic(), MagicNumber::NandBinBurn);
        assert_eq!(burn.application_magic(), MagicNumber::BinaryImage);
        assert_eq!(burn.sequence(), Sequence::LoaderAndApplication);

        let srec_burn = FlashCommand::Burn {
            flash: FlashType::Nor,
            format: BinaryFormat::SRecord,
        };
        assert_eq!(srec_burn.application_magic(), MagicNumber::Safe);

        assert_eq!(FlashCommand::Boot.flash_type(), FlashType::Nor);
        assert_eq!(FlashCommand::NorRestore.magic(), MagicNumber::NorRestore);
        assert_eq!(
            FlashCommand::Erase {
                flash: FlashType::Nor
            }
            .sequence(),
            Sequence::Erase
        );
    }

    #[test]
    fn test_plan_defaults() {
        let plan = CommandPlan::new(FlashCommand::Boot);
        assert!(plan.sends_first_stage());
        assert_eq!(plan.first_stage_exec(), 0x29E8);
        assert_eq!(plan.load_address(), 0x8108_0000);
        assert_eq!(plan.entry_point(), 0x8108_0000);
        assert_eq!(plan.second_stage_load(), 0x8107_0000);

        let nand = CommandPlan::new(FlashCommand::Erase {
            flash: FlashType::Nand,
        });
        assert_eq!(nand.first_stage_exec(), 0x236C);
        assert_eq!(nand.second_stage_exec(), 0x236C);
    }

    #[test]
    fn test_external_loader_runs_from_0100() {
        let plan = CommandPlan::new(FlashCommand::Burn {
            flash: FlashType::Nor,
            format: BinaryFormat::SRecord,
        })
        .with_second_stage(BinaryImage::from_bytes(vec![0u8; 16]));
        assert_eq!(plan.second_stage_exec(), 0x0100);
    }

    #[test]
    fn test_validate_requires_application() {
        let err = CommandPlan::new(FlashCommand::Boot).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidPlan(_)));
    }

    #[test]
    fn test_validate_rejects_missing_external_loader() {
        let plan = CommandPlan::new(FlashCommand::Burn {
            flash: FlashType::Nand,
            format: BinaryFormat::Binary,
        })
        .with_application(app())
        .with_embedded_loader(false);
        assert!(matches!(plan.validate(), Err(Error::InvalidPlan(_))));
    }

    #[test]
    fn test_validate_rejects_wide_entry_point() {
        let plan = CommandPlan::new(FlashCommand::Boot)
            .with_application(app())
            .with_first_stage_exec(0x1_0000);
        assert!(matches!(
            plan.validate(),
            Err(Error::FieldOverflow { digits: 4, .. })
        ));
    }

    #[test]
    fn test_prepare_raw_application_without_first_stage() {
        let plan = CommandPlan::new(FlashCommand::Boot)
            .with_application(app())
            .with_first_stage(false)
            .with_encoding(PayloadEncoding::Raw);

        // No loader is needed, so an empty source is fine
        let ctx = RunContext::prepare(plan, &MemoryLoaders::default()).unwrap();
        assert!(ctx.first_stage().is_none());
        assert!(ctx.second_stage().is_none());

        let payload = ctx.application().unwrap();
        assert_eq!(payload.size(), 40);
        assert_eq!(payload.name(), "app.bin");
        assert_eq!(ctx.entry_point(), 0x8108_0000);
    }

    #[test]
    fn test_prepare_encodes_application_as_srec() {
        let plan = CommandPlan::new(FlashCommand::Boot)
            .with_application(app())
            .with_first_stage(false);

        let ctx = RunContext::prepare(plan, &MemoryLoaders::default()).unwrap();
        let data = ctx.application().unwrap().data();
        assert!(srec::is_pre_encoded(data));
        assert!(data.starts_with(b"S0"));
    }

    #[test]
    fn test_prepare_missing_loader() {
        let plan = CommandPlan::new(FlashCommand::Boot).with_application(app());
        assert!(matches!(
            RunContext::prepare(plan, &MemoryLoaders::default()),
            Err(Error::LoaderNotFound(FlashType::Nor))
        ));
    }

    #[test]
    fn test_prepare_burn_uses_embedded_loader() {
        let loaders = MemoryLoaders::default().with(FlashType::Nand, loader_bytes(64));
        let plan = CommandPlan::new(FlashCommand::Burn {
            flash: FlashType::Nand,
            format: BinaryFormat::SRecord,
        })
        .with_application(app());

        let ctx = RunContext::prepare(plan, &loaders).unwrap();
        assert_eq!(ctx.first_stage().unwrap().length(), 64);
        assert_eq!(ctx.first_stage_exec(), 0x236C);
        assert_eq!(ctx.second_stage_address(), 0x8000_236C);

        // NAND strips the relocation stub: 64 bytes -> 4 data records
        let second = ctx.second_stage().unwrap();
        let text = String::from_utf8(second.data().to_vec()).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("S3")).count(), 4);
        // "ublDaVinci.srec" is 15 bytes, so the count field is 0x12
        assert!(text.starts_with("S012000075626C"));
    }

    #[test]
    fn test_prepare_rejects_stub_only_nand_flash_loader() {
        let loaders = MemoryLoaders::default().with(FlashType::Nand, loader_bytes(64));
        let plan = CommandPlan::new(FlashCommand::Burn {
            flash: FlashType::Nand,
            format: BinaryFormat::SRecord,
        })
        .with_second_stage(BinaryImage::from_bytes(vec![0xEE; RELOCATION_STUB_LEN]))
        .with_application(app());

        let err = RunContext::prepare(plan, &loaders).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_prepare_keeps_unstripped_nor_flash_loader() {
        let loaders = MemoryLoaders::default().with(FlashType::Nor, loader_bytes(64));
        let plan = CommandPlan::new(FlashCommand::Burn {
            flash: FlashType::Nor,
            format: BinaryFormat::SRecord,
        })
        .with_second_stage(BinaryImage::from_bytes(vec![0xEE; 32]))
        .with_application(app());

        let ctx = RunContext::prepare(plan, &loaders).unwrap();
        let text = String::from_utf8(ctx.second_stage().unwrap().data().to_vec()).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("S3")).count(), 2);
    }

    #[test]
    fn test_prepare_rejects_unaligned_loader() {
        let loaders = MemoryLoaders::default().with(FlashType::Nor, loader_bytes(10));
        let plan = CommandPlan::new(FlashCommand::Boot).with_application(app());
        assert!(matches!(
            RunContext::prepare(plan, &loaders),
            Err(Error::InvalidImage(_))
        ));
    }
}
