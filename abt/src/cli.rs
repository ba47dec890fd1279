use clap;

fn add_input_decryption<'a, 'b>(cmd: clap::App<'a, 'b>) -> clap::App<'a, 'b> {
    cmd.arg(
        clap::Arg::from_usage("-p, --passphrase [passphrase] 'Passphrase for an encrypted input file'"),
    )
    .arg(
        clap::Arg::from_usage("--passfile [path] 'File whose whole contents is the passphrase for an encrypted input file; default: guess by replacing the .ab/.adb extension of the input with .passphrase.txt'")
            .conflicts_with("passphrase"),
    )
    .arg(clap::Arg::from_usage(
        "--ignore-checksum 'Ignore the master key checksum field in the input file, useful for backups produced by weird firmwares'",
    ))
}

fn add_output_encryption<'a, 'b>(cmd: clap::App<'a, 'b>) -> clap::App<'a, 'b> {
    cmd.arg(clap::Arg::from_usage(
        "--output-passphrase [passphrase] 'Passphrase for an encrypted output file'",
    ))
    .arg(
        clap::Arg::from_usage("--output-passfile [path] 'File whose whole contents is the passphrase for an encrypted output file'")
            .conflicts_with("output-passphrase"),
    )
    .arg(
        clap::Arg::from_usage("--output-salt-bytes [n] 'PBKDF2 salt length in bytes'")
            .default_value("64"),
    )
    .arg(
        clap::Arg::from_usage("--output-iterations [n] 'PBKDF2 iteration count'")
            .default_value("10000"),
    )
}

pub fn build_app<'a, 'b>() -> clap::App<'a, 'b> {
    clap::App::new("abt")
        .version(clap::crate_version!())
        .about("Manipulate Android Backup files (*.ab, *.adb) produced by `adb backup`, `bmgr` and similar tools")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .arg(
            clap::Arg::from_usage("--markdown 'Show an extended help message formatted in Markdown and exit'")
                .global(true),
        )
        .subcommand(add_input_decryption(
            clap::SubCommand::with_name("ls")
                .visible_alias("list")
                .about("List contents of an Android Backup file, tar -tvf style")
                .arg(clap::Arg::from_usage(
                    "<INPUT_AB_FILE> 'Android Backup file to read, \"-\" for standard input'",
                )),
        ))
        .subcommand(add_output_encryption(add_input_decryption(
            clap::SubCommand::with_name("rewrap")
                .visible_aliases(&["strip", "ab2ab"])
                .about("Strip or apply encryption and/or compression, keeping the inner TAR verbatim")
                .arg(
                    clap::Arg::from_usage("-d, --decompress 'Produce decompressed output; this is the default'")
                        .conflicts_with_all(&["keep-compression", "compress"]),
                )
                .arg(
                    clap::Arg::from_usage("-k, --keep-compression 'Copy the compression flag and body bytes verbatim; the fastest way to strip'")
                        .conflicts_with_all(&["compress", "encrypt"]),
                )
                .arg(clap::Arg::from_usage("-c, --compress '(Re-)compress the output file'"))
                .arg(clap::Arg::from_usage("-e, --encrypt '(Re-)encrypt the output file'"))
                .arg(clap::Arg::from_usage(
                    "<INPUT_AB_FILE> 'Android Backup file to read, \"-\" for standard input'",
                ))
                .arg(clap::Arg::from_usage(
                    "[OUTPUT_AB_FILE] 'File to write, \"-\" for standard output; default: input with its extension replaced by .stripped.ab'",
                )),
        )))
        .subcommand(add_output_encryption(add_input_decryption(
            clap::SubCommand::with_name("split")
                .visible_alias("ab2many")
                .about("Split a full-system Android Backup file into per-app Android Backup files")
                .arg(clap::Arg::from_usage("-c, --compress 'Compress the per-app output files'"))
                .arg(clap::Arg::from_usage("-e, --encrypt 'Encrypt the per-app output files; the output passphrase is shared, the keys are not'"))
                .arg(clap::Arg::from_usage(
                    "--prefix [prefix] 'File name prefix for the output files; default: abt_split_<input stem>'",
                ))
                .arg(clap::Arg::from_usage(
                    "<INPUT_AB_FILE> 'Android Backup file to read, \"-\" for standard input'",
                )),
        )))
        .subcommand(add_output_encryption(add_input_decryption(
            clap::SubCommand::with_name("merge")
                .visible_alias("many2ab")
                .about("Merge a bunch of Android Backup files into one; the reverse of `split`")
                .arg(clap::Arg::from_usage("-c, --compress 'Compress the output file'"))
                .arg(clap::Arg::from_usage("-e, --encrypt 'Encrypt the output file'"))
                .arg(
                    clap::Arg::from_usage(
                        "<FILES>... 'Android Backup files to merge, in order, followed by the output file'",
                    )
                    .min_values(2),
                ),
        )))
        .subcommand(add_input_decryption(
            clap::SubCommand::with_name("unwrap")
                .visible_alias("ab2tar")
                .about("Convert an Android Backup file into a TAR file")
                .arg(clap::Arg::from_usage(
                    "<INPUT_AB_FILE> 'Android Backup file to read, \"-\" for standard input'",
                ))
                .arg(clap::Arg::from_usage(
                    "[OUTPUT_TAR_FILE] 'File to write, \"-\" for standard output; default: input with its extension replaced by .tar'",
                )),
        ))
        .subcommand(add_output_encryption(
            clap::SubCommand::with_name("wrap")
                .visible_alias("tar2ab")
                .about("Convert a TAR file into an Android Backup file; only safe on TARs produced by `unwrap`")
                .arg(clap::Arg::from_usage("-c, --compress 'Compress the output file'"))
                .arg(clap::Arg::from_usage("-e, --encrypt 'Encrypt the output file'"))
                .arg(
                    clap::Arg::from_usage("--output-version <n> 'Android Backup file version to use'")
                        .required(true),
                )
                .arg(clap::Arg::from_usage(
                    "<INPUT_TAR_FILE> 'TAR file to read, \"-\" for standard input'",
                ))
                .arg(clap::Arg::from_usage(
                    "[OUTPUT_AB_FILE] 'File to write, \"-\" for standard output; default: input with its extension replaced by .ab'",
                )),
        ))
}

pub fn parse_flags<'a>() -> clap::ArgMatches<'a> {
    build_app().get_matches()
}

/// The `--markdown` help page. The regular `--help` output is terse; this
/// is the long-form document.
pub fn markdown_help() -> String {
    format!(
        r#"# abt {version}

A Swiss-army-knife utility for manipulating Android Backup files (`*.ab`,
`*.adb`) produced by `adb backup`, `bmgr`, and similar tools.

An Android Backup file is a short textual header followed by a PAX-formatted
TAR, optionally compressed with zlib and optionally encrypted with
AES-256-CBC under a PBKDF2-derived key.

## Subcommands

- `ls` (`list`) — list envelope parameters and TAR contents, `tar -tvf` style.
- `rewrap` (`strip`, `ab2ab`) — re-emit the archive with encryption and/or
  compression stripped or applied; the inner TAR is copied verbatim.
- `split` (`ab2many`) — split a full-system backup into one file per app,
  named `<prefix>_<NNN>_<package>.ab`; entries before the first app manifest
  form the `<prefix>_000_.ab` preamble file.
- `merge` (`many2ab`) — concatenate per-app backups back into one archive;
  all inputs must share one format version.
- `unwrap` (`ab2tar`) — strip the envelope entirely, leaving a plain TAR.
- `wrap` (`tar2ab`) — put an envelope around a TAR; requires
  `--output-version`. Only TARs produced by `unwrap` are guaranteed to
  restore, since Android expects a specific PAX layout.

## Input decryption

`-p`/`--passphrase` or `--passfile` select the passphrase explicitly.
Otherwise a sibling file named like the input with its `.ab`/`.adb`
extension replaced by `.passphrase.txt` is tried, and failing that the
passphrase is prompted for on the terminal. `--ignore-checksum` skips the
master-key checksum verification.

## Output encryption

`-e`/`--encrypt` enables encryption using `--output-passphrase` or
`--output-passfile` (prompted for when neither is given), with
`--output-salt-bytes` (default 64) and `--output-iterations`
(default 10000).

## Examples

```sh
abt ls backup.ab
abt strip -p secret backup.ab
abt unwrap backup.ab - | tar -tvf -
abt split --prefix parts/app backup.ab
abt merge parts/app_*.ab merged.ab
abt wrap --output-version=5 backup.tar backup.ab
```

Everywhere a file is expected, `-` means standard input or output.
"#,
        version = clap::crate_version!()
    )
}
