//! One function per subcommand, each a thin driver over the `abx` core.

use std::io::Write;
use std::path::Path;

use abx::envelope::{self, EncryptOptions, WriteOptions};
use abx::tar::{TarReader, TarWriter};
use abx::{listing, merge, split};

use crate::error::{Error, Result};
use crate::utils;
use crate::utils::{AB_EXTENSIONS, TAR_EXTENSIONS};

fn required<'a>(matches: &'a clap::ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .value_of(name)
        .ok_or_else(|| Error::CliInputError(format!("{} is required", name)))
}

fn parse_num<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> Result<T> {
    let raw = required(matches, name)?;
    raw.parse()
        .map_err(|_| Error::CliInputError(format!("invalid value for --{}: `{}`", name, raw)))
}

/// Squeeze a driver-side error through the `abx` error type for closures
/// handed into the core.
fn to_ab_error(error: Error) -> abx::error::Error {
    match error {
        Error::Ab(inner) => inner,
        other => abx::error::Error::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            other.to_string(),
        )),
    }
}

fn passphrase_provider<'a>(
    matches: &'a clap::ArgMatches,
    input: &'a str,
) -> impl FnOnce() -> abx::error::Result<Vec<u8>> + 'a {
    move || {
        utils::resolve_passphrase(
            matches.value_of("passphrase"),
            matches.value_of("passfile"),
            if input == "-" { None } else { Some(input) },
            "Passphrase: ",
        )
        .map_err(to_ab_error)
    }
}

/// Output encryption settings, or `None` without `--encrypt`.
fn encrypt_options(matches: &clap::ArgMatches) -> Result<Option<EncryptOptions>> {
    if !matches.is_present("encrypt") {
        return Ok(None);
    }
    let passphrase = utils::resolve_passphrase(
        matches.value_of("output-passphrase"),
        matches.value_of("output-passfile"),
        None,
        "Output passphrase: ",
    )?;
    Ok(Some(EncryptOptions {
        passphrase,
        salt_bytes: parse_num(matches, "output-salt-bytes")?,
        iterations: parse_num(matches, "output-iterations")?,
    }))
}

pub fn run_ls(matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "INPUT_AB_FILE")?;
    let src = utils::open_input(input_path)?;
    let (desc, body) = envelope::open_read(
        src,
        passphrase_provider(matches, input_path),
        matches.is_present("ignore-checksum"),
        true,
    )?;

    println!("{}", listing::describe_envelope(&desc));
    let mut reader = TarReader::new(body);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while let Some(entry) = reader.next_entry()? {
        if entry.is_pax() {
            continue;
        }
        writeln!(out, "{}", listing::entry_line(&entry))?;
    }
    Ok(())
}

pub fn run_rewrap(matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "INPUT_AB_FILE")?;
    let output_path = matches
        .value_of("OUTPUT_AB_FILE")
        .map(str::to_string)
        .unwrap_or_else(|| utils::default_output(input_path, AB_EXTENSIONS, ".stripped.ab"));

    let keep = matches.is_present("keep-compression");
    let src = utils::open_input(input_path)?;
    let (desc, mut body) = envelope::open_read(
        src,
        passphrase_provider(matches, input_path),
        matches.is_present("ignore-checksum"),
        !keep,
    )?;

    let mut dst = utils::create_output(&output_path)?;
    if keep {
        // decrypted (if need be) body bytes pass through untouched
        envelope::write_raw_header(&mut dst, desc.version(), desc.is_compressed())?;
        std::io::copy(&mut body, &mut dst)?;
        dst.flush()?;
    } else {
        let opts = WriteOptions {
            version: desc.version(),
            compress: matches.is_present("compress"),
            encrypt: encrypt_options(matches)?,
        };
        let mut out = envelope::open_write(dst, &opts)?;
        std::io::copy(&mut body, &mut out)?;
        out.finish()?;
    }
    Ok(())
}

fn default_split_prefix(input: &str) -> String {
    if input == "-" {
        return "abt_split_backup".to_string();
    }
    let stem = utils::stem_of(input, AB_EXTENSIONS);
    let path = Path::new(&stem);
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            dir.join(format!("abt_split_{}", file)).to_string_lossy().into_owned()
        }
        _ => format!("abt_split_{}", file),
    }
}

pub fn run_split(matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "INPUT_AB_FILE")?;
    let prefix = matches
        .value_of("prefix")
        .map(str::to_string)
        .unwrap_or_else(|| default_split_prefix(input_path));

    let src = utils::open_input(input_path)?;
    let (desc, body) = envelope::open_read(
        src,
        passphrase_provider(matches, input_path),
        matches.is_present("ignore-checksum"),
        true,
    )?;
    println!(
        "# Android Backup, version: {}, compression: {}",
        desc.version(),
        desc.is_compressed() as u8
    );

    let version = desc.version();
    let compress = matches.is_present("compress");
    let encrypt = encrypt_options(matches)?;
    let mut reader = TarReader::new(body);
    split::split(&mut reader, |index, package| {
        let file_name = format!("{}_{:03}_{}.ab", prefix, index, package);
        eprintln!("Writing `{}`...", file_name);
        let dst = utils::create_output(&file_name).map_err(to_ab_error)?;
        envelope::open_write(dst, &WriteOptions { version, compress, encrypt: encrypt.clone() })
    })?;
    Ok(())
}

pub fn run_merge(matches: &clap::ArgMatches) -> Result<()> {
    let mut files: Vec<&str> = matches
        .values_of("FILES")
        .ok_or_else(|| Error::CliInputError("FILES are required".to_string()))?
        .collect();
    let output_path = files
        .pop()
        .ok_or_else(|| Error::CliInputError("no output file specified".to_string()))?;
    if files.is_empty() {
        return Err(Error::CliInputError("need at least one input file".to_string()));
    }

    let mut dst = Some(utils::create_output(output_path)?);
    let compress = matches.is_present("compress");
    let encrypt = encrypt_options(matches)?;

    let mut out: Option<(u32, TarWriter<envelope::EnvelopeWriter>)> = None;
    for input_path in files {
        eprintln!("Merging `{}`...", input_path);
        let src = utils::open_input(input_path)?;
        let (desc, body) = envelope::open_read(
            src,
            passphrase_provider(matches, input_path),
            matches.is_present("ignore-checksum"),
            true,
        )?;
        match &out {
            None => {
                let sink = dst
                    .take()
                    .ok_or_else(|| Error::CliInputError("output already taken".to_string()))?;
                let opts = WriteOptions {
                    version: desc.version(),
                    compress,
                    encrypt: encrypt.clone(),
                };
                out = Some((desc.version(), TarWriter::new(envelope::open_write(sink, &opts)?)));
            }
            Some((version, _)) => merge::check_version(*version, desc.version())?,
        }
        let mut reader = TarReader::new(body);
        if let Some((_, writer)) = out.as_mut() {
            merge::merge_into(&mut reader, writer)?;
        }
    }

    if let Some((_, mut writer)) = out.take() {
        writer.finish()?;
        writer.into_inner().finish()?;
    }
    Ok(())
}

pub fn run_unwrap(matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "INPUT_AB_FILE")?;
    let output_path = matches
        .value_of("OUTPUT_TAR_FILE")
        .map(str::to_string)
        .unwrap_or_else(|| utils::default_output(input_path, AB_EXTENSIONS, ".tar"));

    let src = utils::open_input(input_path)?;
    let (_, mut body) = envelope::open_read(
        src,
        passphrase_provider(matches, input_path),
        matches.is_present("ignore-checksum"),
        true,
    )?;
    let mut dst = utils::create_output(&output_path)?;
    std::io::copy(&mut body, &mut dst)?;
    dst.flush()?;
    Ok(())
}

pub fn run_wrap(matches: &clap::ArgMatches) -> Result<()> {
    let input_path = required(matches, "INPUT_TAR_FILE")?;
    let output_path = matches
        .value_of("OUTPUT_AB_FILE")
        .map(str::to_string)
        .unwrap_or_else(|| utils::default_output(input_path, TAR_EXTENSIONS, ".ab"));

    let opts = WriteOptions {
        version: parse_num(matches, "output-version")?,
        compress: matches.is_present("compress"),
        encrypt: encrypt_options(matches)?,
    };
    let mut src = utils::open_input(input_path)?;
    let dst = utils::create_output(&output_path)?;
    let mut out = envelope::open_write(dst, &opts)?;
    std::io::copy(&mut src, &mut out)?;
    out.finish()?;
    Ok(())
}
