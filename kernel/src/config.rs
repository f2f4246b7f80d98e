//! Boot-time paging configuration, read from the kernel command line.
//!
//! Recognised tokens (anything else on the command line is ignored):
//!
//! ```text
//! swap.policy=fifo|aging  swap.resident=N  swap.total=N
//! swap.exempt=PID         swap.aging_ticks=N
//! ```

use crate::{
    swapping::{PagingLimits, PolicyKind},
    threading::process::Pid,
};
use alloc::boxed::Box;
use core::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, value},
    sequence::{preceded, separated_pair},
    IResult,
};
use once_cell::race::OnceBox;
use swapvm_shared::{
    eprintln,
    mem::PAGE_FRAME_SIZE,
    sizes::{SECTOR_SIZE, SWAP_SECTORS},
};

/// Pages one process's swap file can hold.
pub const SWAP_FILE_PAGES: usize = SWAP_SECTORS * SECTOR_SIZE / PAGE_FRAME_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Malformed `swap.` token starting at this byte of the command line.
    Syntax(usize),
    UnknownPolicy,
    InvalidNumber,
    /// The limits cannot be satisfied together.
    InvalidLimits,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Syntax(position) => {
                write!(f, "malformed paging option at byte {position}")
            }
            ConfigError::UnknownPolicy => write!(f, "unknown page replacement policy"),
            ConfigError::InvalidNumber => write!(f, "invalid number in paging option"),
            ConfigError::InvalidLimits => write!(
                f,
                "paging limits need 1 <= resident <= total <= {SWAP_FILE_PAGES} and aging_ticks >= 1"
            ),
        }
    }
}

impl Error for ConfigError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagingConfig {
    pub policy: PolicyKind,
    pub max_resident_pages: usize,
    pub max_total_pages: usize,
    /// Processes with a pid at or below this are never swap-managed.
    pub exempt_pids: Pid,
    /// Timer ticks between two aging epochs.
    pub aging_interval_ticks: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        let limits = PagingLimits::default();
        Self {
            policy: PolicyKind::Fifo,
            max_resident_pages: limits.max_resident_pages,
            max_total_pages: limits.max_total_pages,
            exempt_pids: 2,
            aging_interval_ticks: 1,
        }
    }
}

impl PagingConfig {
    pub fn limits(&self) -> PagingLimits {
        PagingLimits {
            max_resident_pages: self.max_resident_pages,
            max_total_pages: self.max_total_pages,
        }
    }

    pub fn is_exempt(&self, pid: Pid) -> bool {
        pid <= self.exempt_pids
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resident_pages == 0
            || self.max_total_pages < self.max_resident_pages
            || self.max_total_pages > SWAP_FILE_PAGES
            || self.aging_interval_ticks == 0
        {
            return Err(ConfigError::InvalidLimits);
        }
        Ok(())
    }

    /// Apply every `swap.` token of `cmdline` on top of the defaults.
    pub fn parse(cmdline: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for token in cmdline.split_ascii_whitespace() {
            if !token.starts_with("swap.") {
                continue;
            }
            let position = token.as_ptr() as usize - cmdline.as_ptr() as usize;
            let (_, (key, raw)) = option(token).map_err(|_| ConfigError::Syntax(position))?;
            match key {
                "policy" => config.policy = parse_with(policy, raw, ConfigError::UnknownPolicy)?,
                "resident" => config.max_resident_pages = parse_number(raw)?,
                "total" => config.max_total_pages = parse_number(raw)?,
                "exempt" => config.exempt_pids = parse_number(raw)?,
                "aging_ticks" => config.aging_interval_ticks = parse_number(raw)?,
                _ => return Err(ConfigError::Syntax(position)),
            }
        }
        config.validate()?;
        Ok(config)
    }
}

fn option(input: &str) -> IResult<&str, (&str, &str)> {
    all_consuming(preceded(
        tag("swap."),
        separated_pair(
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
            char('='),
            take_while1(|c: char| !c.is_ascii_whitespace()),
        ),
    ))(input)
}

fn policy(input: &str) -> IResult<&str, PolicyKind> {
    alt((
        value(PolicyKind::Fifo, tag("fifo")),
        value(PolicyKind::Aging, tag("aging")),
    ))(input)
}

fn parse_with<'a, T>(
    parser: impl FnMut(&'a str) -> IResult<&'a str, T>,
    raw: &'a str,
    err: ConfigError,
) -> Result<T, ConfigError> {
    all_consuming(parser)(raw)
        .map(|(_, parsed)| parsed)
        .map_err(|_| err)
}

fn parse_number<T: core::str::FromStr>(raw: &str) -> Result<T, ConfigError> {
    parse_with(map_res(digit1, str::parse::<T>), raw, ConfigError::InvalidNumber)
}

static BOOT_CONFIG: OnceBox<PagingConfig> = OnceBox::new();

/// Parse the command line and publish the result. Only the first call takes
/// effect; later calls are logged and ignored.
pub fn init_boot_config(cmdline: &str) -> Result<&'static PagingConfig, ConfigError> {
    let config = PagingConfig::parse(cmdline)?;
    if BOOT_CONFIG.set(Box::new(config)).is_err() {
        eprintln!("config: paging configuration already set, ignoring {cmdline:?}");
    }
    Ok(boot_config())
}

/// The published configuration, or the defaults if none was published.
pub fn boot_config() -> &'static PagingConfig {
    BOOT_CONFIG.get_or_init(|| Box::new(PagingConfig::default()))
}
