//! Parsing of the textual register/value configuration files used to program clock synthesizer
//! chips. Two dialects exist:
//!
//! - A *plain* file, where an `Address,Data` header line is followed by data lines until the first
//!   blank line or the end of the file.
//! - A *sectioned* file (as exported by the vendor tooling), where comment lines of the form
//!   `# Start configuration <tag>` and `# End configuration <tag>` delimit named regions.
//!
//! Each data line is `<hex address>,<hex data>`, with or without a `0x` prefix. Lines starting
//! with `#` are comments and a trailing `\r` is dropped from every line.
use kstring::KString;
use nom::{
    bytes::complete::{
        tag,
        tag_no_case,
    },
    character::complete::{
        char,
        hex_digit1,
        space0,
        space1,
    },
    combinator::{
        all_consuming,
        map,
        map_res,
        opt,
        rest,
    },
    sequence::{
        delimited,
        preceded,
        separated_pair,
        tuple,
    },
    IResult,
};
use std::path::Path;
use thiserror::Error;

/// Name of the section uploaded before the chip settles
pub const PREAMBLE: &str = "preamble";
/// Name of the main register section
pub const REGISTERS: &str = "registers";
/// Name of the section uploaded last
pub const POSTAMBLE: &str = "postamble";

#[derive(Error, Debug)]
pub enum Error {
    #[error("No `Address,Data` header found")]
    MissingHeader,
    #[error("Line {line}: register data before a header or section marker")]
    DataBeforeMarker { line: usize },
    #[error("Line {line}: malformed register entry `{content}`")]
    MalformedLine { line: usize, content: String },
    #[error("Line {line}: section `{name}` started inside open section `{open}`")]
    NestedSection {
        line: usize,
        name: KString,
        open: KString,
    },
    #[error("Line {line}: end of section `{found}` while section `{expected}` is open")]
    MismatchedEnd {
        line: usize,
        expected: KString,
        found: KString,
    },
    #[error("Line {line}: end of section `{name}` without a matching start")]
    UnmatchedEnd { line: usize, name: KString },
    #[error("Section `{0}` is never closed")]
    UnterminatedSection(KString),
    #[error("Required section `{0}` is missing")]
    MissingSection(&'static str),
    #[error("Section `{0}` appears more than once")]
    DuplicateSection(KString),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single register assignment
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Entry {
    pub address: u16,
    pub value: u8,
}

impl Entry {
    #[must_use]
    pub fn new(address: u16, value: u8) -> Self {
        Self { address, value }
    }
}

/// An ordered run of register assignments from one named region of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: KString,
    pub entries: Vec<Entry>,
}

/// The three regions of a sectioned file, in upload order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sectioned {
    pub preamble: Vec<Entry>,
    pub registers: Vec<Entry>,
    pub postamble: Vec<Entry>,
}

impl Sectioned {
    /// Pick the preamble, registers, and postamble sections out of a list of parsed sections.
    /// Sections with other names are ignored.
    /// # Errors
    /// Returns an error if any of the three is missing or appears twice
    pub fn from_sections(sections: Vec<Section>) -> Result<Self, Error> {
        let mut preamble = None;
        let mut registers = None;
        let mut postamble = None;
        for section in sections {
            let slot = match section.name.as_str() {
                PREAMBLE => &mut preamble,
                REGISTERS => &mut registers,
                POSTAMBLE => &mut postamble,
                _ => continue,
            };
            if slot.is_some() {
                return Err(Error::DuplicateSection(section.name));
            }
            *slot = Some(section.entries);
        }
        Ok(Self {
            preamble: preamble.ok_or(Error::MissingSection(PREAMBLE))?,
            registers: registers.ok_or(Error::MissingSection(REGISTERS))?,
            postamble: postamble.ok_or(Error::MissingSection(POSTAMBLE))?,
        })
    }

    /// Total number of register assignments across all three sections
    #[must_use]
    pub fn len(&self) -> usize {
        self.preamble.len() + self.registers.len() + self.postamble.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn hex_u16(input: &str) -> IResult<&str, u16> {
    map_res(preceded(opt(tag_no_case("0x")), hex_digit1), |digits| {
        u16::from_str_radix(digits, 16)
    })(input)
}

fn hex_u8(input: &str) -> IResult<&str, u8> {
    map_res(preceded(opt(tag_no_case("0x")), hex_digit1), |digits| {
        u8::from_str_radix(digits, 16)
    })(input)
}

fn entry(input: &str) -> IResult<&str, Entry> {
    let (remaining, (address, value)) = all_consuming(delimited(
        space0,
        separated_pair(hex_u16, tuple((space0, char(','), space0)), hex_u8),
        space0,
    ))(input)?;
    Ok((remaining, Entry { address, value }))
}

fn header(input: &str) -> IResult<&str, &str> {
    all_consuming(delimited(space0, tag("Address,Data"), space0))(input)
}

fn marker<'a>(kind: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(
        tuple((char('#'), space0, tag(kind), space1, tag("configuration"), space1)),
        map(rest, str::trim_end),
    )
}

/// Split into lines, dropping the trailing `\r` from each and numbering from 1
fn lines(input: &str) -> impl Iterator<Item = (usize, &str)> {
    input
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .enumerate()
        .map(|(idx, line)| (idx + 1, line))
}

fn parse_entry(line: usize, content: &str) -> Result<Entry, Error> {
    entry(content)
        .map(|(_, e)| e)
        .map_err(|_| Error::MalformedLine {
            line,
            content: content.to_owned(),
        })
}

/// Parse a plain `Address,Data` file into its ordered register assignments.
/// Comments may precede the header; data ends at the first blank line after it.
/// # Errors
/// Returns an error if the header is missing, data precedes it, or a data line is malformed
pub fn parse_plain(input: &str) -> Result<Vec<Entry>, Error> {
    let mut header_seen = false;
    let mut entries = vec![];
    for (n, line) in lines(input) {
        if line.trim().is_empty() {
            if header_seen {
                break;
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if !header_seen {
            if header(line).is_ok() {
                header_seen = true;
                continue;
            }
            return Err(Error::DataBeforeMarker { line: n });
        }
        entries.push(parse_entry(n, line)?);
    }
    if header_seen {
        Ok(entries)
    } else {
        Err(Error::MissingHeader)
    }
}

/// Parse a sectioned file into its named sections, in file order.
/// A stray `Address,Data` header line is tolerated, as vendor exports carry one.
/// # Errors
/// Returns an error on data outside a section, badly nested or unterminated sections, or
/// malformed data lines
pub fn parse_sections(input: &str) -> Result<Vec<Section>, Error> {
    let mut sections = vec![];
    let mut current: Option<Section> = None;
    for (n, line) in lines(input) {
        if line.trim().is_empty() {
            continue;
        }
        if let Ok((_, name)) = marker("Start")(line) {
            if let Some(open) = &current {
                return Err(Error::NestedSection {
                    line: n,
                    name: KString::from_ref(name),
                    open: open.name.clone(),
                });
            }
            current = Some(Section {
                name: KString::from_ref(name),
                entries: vec![],
            });
        } else if let Ok((_, name)) = marker("End")(line) {
            match current.take() {
                Some(section) if section.name.as_str() == name => sections.push(section),
                Some(section) => {
                    return Err(Error::MismatchedEnd {
                        line: n,
                        expected: section.name,
                        found: KString::from_ref(name),
                    })
                }
                None => {
                    return Err(Error::UnmatchedEnd {
                        line: n,
                        name: KString::from_ref(name),
                    })
                }
            }
        } else if line.starts_with('#') || header(line).is_ok() {
            continue;
        } else {
            match current.as_mut() {
                Some(section) => section.entries.push(parse_entry(n, line)?),
                None => return Err(Error::DataBeforeMarker { line: n }),
            }
        }
    }
    match current {
        Some(section) => Err(Error::UnterminatedSection(section.name)),
        None => Ok(sections),
    }
}

/// Parse a sectioned file that must contain the preamble, registers, and postamble sections
/// # Errors
/// Returns an error if parsing fails or any of the three sections is missing
pub fn parse_sectioned(input: &str) -> Result<Sectioned, Error> {
    Sectioned::from_sections(parse_sections(input)?)
}

/// Read and parse a plain `Address,Data` file from disk
/// # Errors
/// Returns an error on file IO or parse errors
pub fn read_plain(path: &Path) -> Result<Vec<Entry>, Error> {
    parse_plain(&std::fs::read_to_string(path)?)
}

/// Read and parse a sectioned file from disk
/// # Errors
/// Returns an error on file IO or parse errors
pub fn read_sectioned(path: &Path) -> Result<Sectioned, Error> {
    parse_sectioned(&std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTIONED: &str = "\
# Si5345 register export
Address,Data
#
# Start configuration preamble
0x0B24,0xC0
0x0B25,0x00
# End configuration preamble
#
# Delay 300 msec
# Start configuration registers
0x0006,0x00
0x0007,0x00
0x0008,0x00
# End configuration registers
# Start configuration postamble
0x001C,0x01
# End configuration postamble
";

    #[test]
    fn test_plain() {
        let entries = parse_plain("Address,Data\n0x10,0x20\n0x11,0x21\n").unwrap();
        assert_eq!(entries, vec![Entry::new(0x10, 0x20), Entry::new(0x11, 0x21)]);
    }

    #[test]
    fn test_plain_comments_and_crlf() {
        let entries =
            parse_plain("# Si5326 settings\r\n# more\r\nAddress,Data\r\n0x00,0x14\r\n0x01,0xE4\r\n")
                .unwrap();
        assert_eq!(entries, vec![Entry::new(0x00, 0x14), Entry::new(0x01, 0xE4)]);
    }

    #[test]
    fn test_plain_without_prefix() {
        let entries = parse_plain("Address,Data\n1A, ff\n").unwrap();
        assert_eq!(entries, vec![Entry::new(0x1A, 0xFF)]);
    }

    #[test]
    fn test_plain_stops_at_blank_line() {
        let entries = parse_plain("Address,Data\n0x10,0x20\n\nnot data at all\n").unwrap();
        assert_eq!(entries, vec![Entry::new(0x10, 0x20)]);
    }

    #[test]
    fn test_plain_missing_header() {
        assert!(matches!(
            parse_plain("# only comments\n\n"),
            Err(Error::MissingHeader)
        ));
    }

    #[test]
    fn test_plain_data_before_header() {
        assert!(matches!(
            parse_plain("# comment\n0x10,0x20\nAddress,Data\n"),
            Err(Error::DataBeforeMarker { line: 2 })
        ));
    }

    #[test]
    fn test_plain_malformed() {
        assert!(matches!(
            parse_plain("Address,Data\n0x10;0x20\n"),
            Err(Error::MalformedLine { line: 2, .. })
        ));
        // Data must fit in a byte
        assert!(matches!(
            parse_plain("Address,Data\n0x10,0x120\n"),
            Err(Error::MalformedLine { line: 2, .. })
        ));
    }

    #[test]
    fn test_sections() {
        let sections = parse_sections(SECTIONED).unwrap();
        let names: Vec<_> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["preamble", "registers", "postamble"]);
        assert_eq!(sections[1].entries.len(), 3);
    }

    #[test]
    fn test_sectioned() {
        let config = parse_sectioned(SECTIONED).unwrap();
        assert_eq!(
            config.preamble,
            vec![Entry::new(0x0B24, 0xC0), Entry::new(0x0B25, 0x00)]
        );
        assert_eq!(
            config.registers,
            vec![
                Entry::new(0x0006, 0x00),
                Entry::new(0x0007, 0x00),
                Entry::new(0x0008, 0x00)
            ]
        );
        assert_eq!(config.postamble, vec![Entry::new(0x001C, 0x01)]);
        assert_eq!(config.len(), 6);
    }

    #[test]
    fn test_sectioned_crlf() {
        let crlf = SECTIONED.replace('\n', "\r\n");
        assert_eq!(parse_sectioned(&crlf).unwrap(), parse_sectioned(SECTIONED).unwrap());
    }

    #[test]
    fn test_data_outside_section() {
        assert!(matches!(
            parse_sections("0x0001,0x02\n# Start configuration preamble\n"),
            Err(Error::DataBeforeMarker { line: 1 })
        ));
    }

    #[test]
    fn test_unterminated() {
        assert!(matches!(
            parse_sections("# Start configuration preamble\n0x0001,0x02\n"),
            Err(Error::UnterminatedSection(name)) if name.as_str() == PREAMBLE
        ));
    }

    #[test]
    fn test_mismatched_end() {
        assert!(matches!(
            parse_sections("# Start configuration preamble\n# End configuration registers\n"),
            Err(Error::MismatchedEnd { line: 2, .. })
        ));
        assert!(matches!(
            parse_sections("# End configuration registers\n"),
            Err(Error::UnmatchedEnd { line: 1, .. })
        ));
    }

    #[test]
    fn test_nested() {
        assert!(matches!(
            parse_sections("# Start configuration preamble\n# Start configuration registers\n"),
            Err(Error::NestedSection { line: 2, .. })
        ));
    }

    #[test]
    fn test_missing_section() {
        let input = "# Start configuration preamble\n# End configuration preamble\n\
                     # Start configuration registers\n# End configuration registers\n";
        assert!(matches!(
            parse_sectioned(input),
            Err(Error::MissingSection(POSTAMBLE))
        ));
    }

    #[test]
    fn test_duplicate_section() {
        let input = "# Start configuration preamble\n# End configuration preamble\n\
                     # Start configuration preamble\n# End configuration preamble\n";
        assert!(matches!(
            parse_sectioned(input),
            Err(Error::DuplicateSection(_))
        ));
    }
}
