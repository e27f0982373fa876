use std::ffi::OsString;
use std::io::Write;

use anyhow::anyhow;
use clap::{crate_version, Arg, ArgMatches, Command};

use crate::escape::parse_terminator;
use crate::preview;
use crate::scpi::{ByteOrder, DataType};
use crate::visa::{Device, Instrument, ResourceManager, SessionConfig};
use crate::Error;

pub const DEFAULT_RESOURCE: &str = "GPIB0::10::INSTR";
pub const DEFAULT_LIST_QUERY: &str = "?*::INSTR";
pub const DEFAULT_COMMAND: &str = "*IDN?";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    Text,
    Binary { data_type: DataType, byte_order: ByteOrder },
    Raw,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryOptions {
    pub resource: String,
    pub session: SessionConfig,
    pub command: String,
    pub mode: Mode,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    List { query: String },
    Query(QueryOptions),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    pub action: Action,
    pub visa_lib: Option<String>,
    pub verbose: bool,
}

pub fn command() -> Command<'static> {
    Command::new("visa_tool")
        .version(crate_version!())
        .about("Send a single SCPI command to a VISA instrument and print the response")
        .arg(Arg::new("list").long("list").help("List all VISA resources and exit"))
        .arg(
            Arg::new("list-query")
                .long("list-query")
                .takes_value(true)
                .default_value(DEFAULT_LIST_QUERY)
                .help("Resource search expression used by --list"),
        )
        .arg(
            Arg::new("resource")
                .long("resource")
                .short('r')
                .takes_value(true)
                .default_value(DEFAULT_RESOURCE)
                .help("Resource address, e.g. GPIB0::10::INSTR"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .takes_value(true)
                .default_value("5000")
                .help("Timeout in ms"),
        )
        .arg(
            Arg::new("read-ter")
                .long("read-ter")
                .takes_value(true)
                .allow_hyphen_values(true)
                .default_value("\\n")
                .help("Read termination, e.g. \\n, or '' to disable"),
        )
        .arg(
            Arg::new("write-ter")
                .long("write-ter")
                .takes_value(true)
                .allow_hyphen_values(true)
                .default_value("\\n")
                .help("Write termination, e.g. \\n, or '' to disable"),
        )
        .arg(
            Arg::new("cmd")
                .long("cmd")
                .short('c')
                .takes_value(true)
                .default_value(DEFAULT_COMMAND)
                .help("SCPI command to send"),
        )
        .arg(
            Arg::new("binary")
                .long("binary")
                .help("Read the response as an IEEE 488.2 binary block, e.g. waveforms"),
        )
        .arg(
            Arg::new("dtype")
                .long("dtype")
                .takes_value(true)
                .default_value("f")
                .help("Binary element type: f (32-bit float), d (64-bit float), h (16-bit int), ..."),
        )
        .arg(Arg::new("big-endian").long("big-endian").help("Decode binary data as big endian"))
        .arg(Arg::new("raw").long("raw").help("Read the unprocessed response bytes"))
        .arg(
            Arg::new("visa-lib")
                .long("visa-lib")
                .takes_value(true)
                .help("Path of the VISA shared library, the platform default is used otherwise"),
        )
        .arg(Arg::new("verbose").long("verbose").short('v').help("Log verbose output"))
}

fn value<'a>(matches: &'a ArgMatches, name: &str) -> crate::Result<&'a str> {
    matches
        .value_of(name)
        .ok_or_else(|| Error::argument(anyhow!("Missing value for --{}", name)))
}

impl Options {
    pub fn try_parse_from<I, T>(args: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args).map_err(Error::argument)?;
        Self::from_matches(&matches)
    }

    /// With `--list`, the query arguments are not evaluated at all.
    pub fn from_matches(matches: &ArgMatches) -> crate::Result<Self> {
        let action = if matches.is_present("list") {
            Action::List {
                query: value(matches, "list-query")?.to_string(),
            }
        } else {
            Action::Query(QueryOptions::from_matches(matches)?)
        };
        Ok(Options {
            action,
            visa_lib: matches.value_of("visa-lib").map(|x| x.to_string()),
            verbose: matches.is_present("verbose"),
        })
    }
}

impl QueryOptions {
    fn from_matches(matches: &ArgMatches) -> crate::Result<Self> {
        let timeout = value(matches, "timeout")?;
        let timeout_ms = timeout
            .parse::<u32>()
            .map_err(|_| Error::argument(anyhow!("Cannot parse `{}` as a timeout in ms.", timeout)))?;
        let session = SessionConfig {
            timeout_ms,
            read_termination: parse_terminator(value(matches, "read-ter")?)?,
            write_termination: parse_terminator(value(matches, "write-ter")?)?,
        };
        let mode = if matches.is_present("binary") {
            let byte_order = if matches.is_present("big-endian") {
                ByteOrder::Big
            } else {
                ByteOrder::Little
            };
            Mode::Binary {
                data_type: value(matches, "dtype")?.parse()?,
                byte_order,
            }
        } else if matches.is_present("raw") {
            Mode::Raw
        } else {
            Mode::Text
        };
        Ok(QueryOptions {
            resource: value(matches, "resource")?.to_string(),
            session,
            command: value(matches, "cmd")?.to_string(),
            mode,
        })
    }
}

/// Run one invocation and return the process exit code.
///
/// VISA errors while opening yield exit code 1, VISA errors while talking to the instrument
/// are reported and yield 0. Anything else is returned to the caller.
pub fn run<R: ResourceManager, W: Write>(rm: &R, options: &Options, out: &mut W) -> crate::Result<i32> {
    match &options.action {
        Action::List { query } => {
            list_resources(rm, query, out)?;
            Ok(0)
        }
        Action::Query(query) => query_instrument(rm, query, out),
    }
}

pub fn list_resources<R: ResourceManager, W: Write>(rm: &R, query: &str, out: &mut W) -> crate::Result<()> {
    let resources = rm.list_resources(query)?;
    writeln!(out, "VISA Resources:")?;
    for resource in resources {
        writeln!(out, "   {}", resource)?;
    }
    Ok(())
}

fn query_instrument<R: ResourceManager, W: Write>(
    rm: &R,
    options: &QueryOptions,
    out: &mut W,
) -> crate::Result<i32> {
    let mut instr = match Instrument::open(rm, &options.resource, &options.session) {
        Ok(instr) => instr,
        Err(Error::Visa(err)) => {
            writeln!(out, "Failed to open resource: {}", err)?;
            return Ok(1);
        }
        Err(err) => return Err(err),
    };

    let ret = match dispatch(&mut instr, &options.command, options.mode, out) {
        Err(Error::Visa(err)) => writeln!(out, "Communication error: {}", err).map_err(Error::from),
        x => x,
    };

    if let Err(err) = instr.close() {
        log::debug!("Ignoring error while closing `{}`: {}", options.resource, err);
    }
    ret.map(|_| 0)
}

/// Send `cmd` and print the response in the requested mode.
pub fn dispatch<D: Device, W: Write>(
    instr: &mut Instrument<D>,
    cmd: &str,
    mode: Mode,
    out: &mut W,
) -> crate::Result<()> {
    match mode {
        Mode::Binary { data_type, byte_order } => {
            let data = instr.query_binary_values(cmd, data_type, byte_order)?;
            writeln!(out, "[BINARY] {} points:", data.len())?;
            writeln!(out, "{}", preview::format_samples(&data))?;
        }
        Mode::Raw => {
            instr.write(cmd)?;
            let raw = instr.read_raw()?;
            writeln!(out, "[RAW] {} bytes: {}", raw.len(), preview::format_raw(&raw))?;
        }
        Mode::Text => {
            let response = instr.query(cmd)?;
            writeln!(out, "{}", response.trim())?;
        }
    }
    Ok(())
}
