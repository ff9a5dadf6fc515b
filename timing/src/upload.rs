//! The register upload protocol: drive a parsed register/value configuration into a chip one
//! register at a time, retrying each failed write a bounded number of times.
//!
//! A register that still fails after its last attempt does not stop the upload. What happens to
//! it afterwards depends on the [`FailureMode`]: `Strict` (the default) turns the list of failed
//! registers into an error once everything else has been written, while `BestEffort` hands the
//! same list back as a successful [`UploadOutcome`]. Either way the caller gets the failures as
//! data. Note that "applied" only ever means the write was acknowledged, nothing is read back.

use indicatif::ProgressBar;
use std::{
    path::Path,
    time::Duration,
};
use thiserror::Error;
use timing_utils::regconfig::{
    self,
    Entry,
    Sectioned,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Attempts per register before it is recorded as failed
pub const DEFAULT_ATTEMPTS: usize = 2;
/// Time the chip needs after the preamble before the main register block may be written
pub const PREAMBLE_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] regconfig::Error),
    #[error("{} register(s) could not be written", .failures.len())]
    PartiallyApplied { failures: Vec<RegisterFailure> },
}

/// Something that can write a single register of a chip
pub trait RegisterWriter {
    type Error: std::error::Error;

    /// Write `value` to the register at `address`
    /// # Errors
    /// Returns an error if the write wasn't acknowledged
    fn write_register(&mut self, address: u16, value: u8) -> Result<(), Self::Error>;

    /// Wait for the chip to settle between the preamble and the main register block
    fn settle(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// What to do with registers that failed every attempt
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Write everything else, then return the failures as an error
    #[default]
    Strict,
    /// Log the failures and return them as a successful, partial outcome
    BestEffort,
}

/// The file dialect of a configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dialect {
    /// `Address,Data` header followed by data
    Plain,
    /// Preamble, registers, and postamble sections
    Sectioned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Attempts per register, at least one is always made
    pub attempts: usize,
    pub mode: FailureMode,
    /// Delay between the preamble and the register sections
    pub settle: Duration,
    /// Show a progress bar while uploading
    pub progress: bool,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            mode: FailureMode::default(),
            settle: PREAMBLE_SETTLE,
            progress: false,
        }
    }
}

impl UploadPolicy {
    #[must_use]
    pub fn best_effort() -> Self {
        Self {
            mode: FailureMode::BestEffort,
            ..Default::default()
        }
    }
}

/// A register that failed every attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFailure {
    pub address: u16,
    pub value: u8,
    pub attempts: usize,
    /// The error from the last attempt
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    AllApplied,
    PartiallyApplied(Vec<RegisterFailure>),
}

impl UploadOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, UploadOutcome::AllApplied)
    }

    /// Addresses of the registers that failed, in upload order
    #[must_use]
    pub fn failed_addresses(&self) -> Vec<u16> {
        match self {
            UploadOutcome::AllApplied => vec![],
            UploadOutcome::PartiallyApplied(failures) => {
                failures.iter().map(|f| f.address).collect()
            }
        }
    }
}

fn progress_bar(policy: &UploadPolicy, total: usize) -> ProgressBar {
    if policy.progress {
        let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
        bar.set_message("Uploading registers");
        bar
    } else {
        ProgressBar::hidden()
    }
}

fn write_entries<W>(
    writer: &mut W,
    entries: &[Entry],
    policy: &UploadPolicy,
    bar: &ProgressBar,
) -> Vec<RegisterFailure>
where
    W: RegisterWriter + ?Sized,
{
    let attempts = policy.attempts.max(1);
    let mut failures = vec![];
    for &Entry { address, value } in entries {
        let mut last_error = None;
        for attempt in 1..=attempts {
            match writer.write_register(address, value) {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    warn!(
                        address,
                        value,
                        attempt,
                        error = %e,
                        "Register write failed"
                    );
                    last_error = Some(e.to_string());
                }
            }
        }
        if let Some(reason) = last_error {
            failures.push(RegisterFailure {
                address,
                value,
                attempts,
                reason,
            });
        }
        bar.inc(1);
    }
    failures
}

fn finish(
    failures: Vec<RegisterFailure>,
    total: usize,
    policy: &UploadPolicy,
    bar: &ProgressBar,
) -> Result<UploadOutcome, Error> {
    bar.finish();
    info!(
        applied = total - failures.len(),
        failed = failures.len(),
        "Register upload complete"
    );
    if failures.is_empty() {
        return Ok(UploadOutcome::AllApplied);
    }
    match policy.mode {
        FailureMode::Strict => Err(Error::PartiallyApplied { failures }),
        FailureMode::BestEffort => Ok(UploadOutcome::PartiallyApplied(failures)),
    }
}

/// Upload an ordered list of register assignments
/// # Errors
/// In `Strict` mode, returns an error listing every register that failed all attempts
pub fn upload<W>(
    writer: &mut W,
    entries: &[Entry],
    policy: &UploadPolicy,
) -> Result<UploadOutcome, Error>
where
    W: RegisterWriter + ?Sized,
{
    debug!(n = entries.len(), "Uploading registers");
    let bar = progress_bar(policy, entries.len());
    let failures = write_entries(writer, entries, policy, &bar);
    finish(failures, entries.len(), policy, &bar)
}

/// Upload a sectioned configuration: the preamble, then the settle delay, then the registers and
/// the postamble
/// # Errors
/// In `Strict` mode, returns an error listing every register that failed all attempts
pub fn upload_sectioned<W>(
    writer: &mut W,
    config: &Sectioned,
    policy: &UploadPolicy,
) -> Result<UploadOutcome, Error>
where
    W: RegisterWriter + ?Sized,
{
    debug!(
        preamble = config.preamble.len(),
        registers = config.registers.len(),
        postamble = config.postamble.len(),
        "Uploading sectioned registers"
    );
    let bar = progress_bar(policy, config.len());
    let mut failures = write_entries(writer, &config.preamble, policy, &bar);
    writer.settle(policy.settle);
    failures.extend(write_entries(writer, &config.registers, policy, &bar));
    failures.extend(write_entries(writer, &config.postamble, policy, &bar));
    finish(failures, config.len(), policy, &bar)
}

/// Parse `contents` in the given dialect and upload it. Nothing is written if parsing fails.
/// # Errors
/// Returns an error on parse failures, and in `Strict` mode if any register failed
pub fn upload_str<W>(
    writer: &mut W,
    contents: &str,
    dialect: Dialect,
    policy: &UploadPolicy,
) -> Result<UploadOutcome, Error>
where
    W: RegisterWriter + ?Sized,
{
    match dialect {
        Dialect::Plain => upload(writer, &regconfig::parse_plain(contents)?, policy),
        Dialect::Sectioned => {
            upload_sectioned(writer, &regconfig::parse_sectioned(contents)?, policy)
        }
    }
}

/// Read, parse, and upload a configuration file
/// # Errors
/// Returns an error on file IO or parse failures, and in `Strict` mode if any register failed
pub fn upload_file<W>(
    writer: &mut W,
    path: &Path,
    dialect: Dialect,
    policy: &UploadPolicy,
) -> Result<UploadOutcome, Error>
where
    W: RegisterWriter + ?Sized,
{
    let contents = std::fs::read_to_string(path).map_err(regconfig::Error::from)?;
    upload_str(writer, &contents, dialect, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Write(u16, u8),
        Settle(Duration),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("injected failure")]
    struct Injected;

    /// Records every successful write and settle, failing writes to chosen registers a set number
    /// of times
    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<Event>,
        attempts: usize,
        failing: HashMap<u16, usize>,
    }

    impl Recorder {
        fn failing(failing: &[(u16, usize)]) -> Self {
            Self {
                failing: failing.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn writes(&self) -> Vec<(u16, u8)> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Write(a, v) => Some((*a, *v)),
                    Event::Settle(_) => None,
                })
                .collect()
        }
    }

    impl RegisterWriter for Recorder {
        type Error = Injected;

        fn write_register(&mut self, address: u16, value: u8) -> Result<(), Injected> {
            self.attempts += 1;
            if let Some(remaining) = self.failing.get_mut(&address) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Injected);
                }
            }
            self.events.push(Event::Write(address, value));
            Ok(())
        }

        fn settle(&mut self, delay: Duration) {
            self.events.push(Event::Settle(delay));
        }
    }

    #[test]
    fn test_plain_upload() {
        let mut writer = Recorder::default();
        let outcome = upload_str(
            &mut writer,
            "Address,Data\n0x10,0x20\n0x11,0x21\n",
            Dialect::Plain,
            &UploadPolicy::default(),
        )
        .unwrap();
        assert_eq!(outcome, UploadOutcome::AllApplied);
        assert_eq!(writer.writes(), vec![(0x10, 0x20), (0x11, 0x21)]);
        assert_eq!(writer.attempts, 2);
    }

    #[test]
    fn test_retry_once() {
        let mut writer = Recorder::failing(&[(0x11, 1)]);
        let entries = [Entry::new(0x10, 1), Entry::new(0x11, 2), Entry::new(0x12, 3)];
        let outcome = upload(&mut writer, &entries, &UploadPolicy::default()).unwrap();
        assert!(outcome.is_complete());
        assert_eq!(writer.writes(), vec![(0x10, 1), (0x11, 2), (0x12, 3)]);
        assert_eq!(writer.attempts, 4);
    }

    #[test]
    fn test_best_effort_continues() {
        let mut writer = Recorder::failing(&[(0x11, usize::MAX)]);
        let entries = [Entry::new(0x10, 1), Entry::new(0x11, 2), Entry::new(0x12, 3)];
        let outcome = upload(&mut writer, &entries, &UploadPolicy::best_effort()).unwrap();
        assert_eq!(outcome.failed_addresses(), vec![0x11]);
        assert_eq!(writer.writes(), vec![(0x10, 1), (0x12, 3)]);
        // Exactly two attempts on the bad register
        assert_eq!(writer.attempts, 4);
        let UploadOutcome::PartiallyApplied(failures) = outcome else {
            panic!("Expected a partial upload");
        };
        assert_eq!(
            failures,
            vec![RegisterFailure {
                address: 0x11,
                value: 2,
                attempts: 2,
                reason: "injected failure".to_owned(),
            }]
        );
    }

    #[test]
    fn test_strict_reports_failures() {
        let mut writer = Recorder::failing(&[(0x10, usize::MAX), (0x12, 2)]);
        let entries = [Entry::new(0x10, 1), Entry::new(0x11, 2), Entry::new(0x12, 3)];
        let err = upload(&mut writer, &entries, &UploadPolicy::default()).unwrap_err();
        let Error::PartiallyApplied { failures } = err else {
            panic!("Expected a partial upload error");
        };
        let addresses: Vec<_> = failures.iter().map(|f| f.address).collect();
        assert_eq!(addresses, vec![0x10, 0x12]);
        // Everything else still went out
        assert_eq!(writer.writes(), vec![(0x11, 2)]);
    }

    #[test]
    fn test_configurable_attempts() {
        let mut writer = Recorder::failing(&[(0x10, 3)]);
        let policy = UploadPolicy {
            attempts: 4,
            ..Default::default()
        };
        upload(&mut writer, &[Entry::new(0x10, 1)], &policy).unwrap();
        assert_eq!(writer.attempts, 4);
    }

    #[test]
    fn test_sectioned_order() {
        let contents = "\
# Start configuration preamble
0x0B24,0xC0
0x0B25,0x00
# End configuration preamble
# Start configuration registers
0x0010,0x00
# End configuration registers
# Start configuration postamble
0x00FF,0x01
# End configuration postamble
";
        let mut writer = Recorder::default();
        let outcome = upload_str(
            &mut writer,
            contents,
            Dialect::Sectioned,
            &UploadPolicy::default(),
        )
        .unwrap();
        assert!(outcome.is_complete());
        assert_eq!(
            writer.events,
            vec![
                Event::Write(0x0B24, 0xC0),
                Event::Write(0x0B25, 0x00),
                Event::Settle(PREAMBLE_SETTLE),
                Event::Write(0x0010, 0x00),
                Event::Write(0x00FF, 0x01),
            ]
        );
    }

    #[test]
    fn test_sectioned_failures_span_sections() {
        let config = Sectioned {
            preamble: vec![Entry::new(0x0B24, 0xC0)],
            registers: vec![Entry::new(0x0010, 0x00)],
            postamble: vec![Entry::new(0x001C, 0x01)],
        };
        let mut writer = Recorder::failing(&[(0x0B24, usize::MAX), (0x001C, usize::MAX)]);
        let outcome = upload_sectioned(&mut writer, &config, &UploadPolicy::best_effort()).unwrap();
        assert_eq!(outcome.failed_addresses(), vec![0x0B24, 0x001C]);
        // Settling still happens after a failed preamble
        assert_eq!(
            writer.events,
            vec![Event::Settle(PREAMBLE_SETTLE), Event::Write(0x0010, 0x00)]
        );
    }

    #[test]
    fn test_parse_error_writes_nothing() {
        let mut writer = Recorder::default();
        let result = upload_str(
            &mut writer,
            "0x10,0x20\nAddress,Data\n",
            Dialect::Plain,
            &UploadPolicy::default(),
        );
        assert!(matches!(
            result,
            Err(Error::Parse(regconfig::Error::DataBeforeMarker { line: 1 }))
        ));
        let result = upload_str(
            &mut writer,
            "# Start configuration preamble\n0x0B24,0xC0\n# End configuration preamble\n",
            Dialect::Sectioned,
            &UploadPolicy::default(),
        );
        assert!(matches!(
            result,
            Err(Error::Parse(regconfig::Error::MissingSection(_)))
        ));
        assert_eq!(writer.attempts, 0);
        assert!(writer.events.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let mut writer = Recorder::default();
        let result = upload_file(
            &mut writer,
            Path::new("/nonexistent/timing/registers.txt"),
            Dialect::Plain,
            &UploadPolicy::default(),
        );
        assert!(matches!(
            result,
            Err(Error::Parse(regconfig::Error::Io(_)))
        ));
    }
}
