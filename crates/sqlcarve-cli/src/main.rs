use std::ffi::OsString;
use std::io::{self, Write};

use sqlcarve::{Backup, DroppedTable, Material, SEQUENCE_TABLE};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    db_path: String,
    tables: Vec<String>,
    max_wal_frame: Option<u32>,
    json: bool,
    show_help: bool,
}

fn main() {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    let exit_code = run(std::env::args_os(), &mut stdout, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run<I, W, E>(args: I, out: &mut W, err: &mut E) -> i32
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let options = match parse_args(args) {
        Ok(options) => options,
        Err(message) => {
            let _ = writeln!(err, "error: {message}");
            let _ = write_usage(err);
            return 2;
        }
    };

    if options.show_help {
        if write_usage(out).is_err() {
            return 1;
        }
        return 0;
    }

    let mut backup = Backup::new(&options.db_path);
    if let Some(limit) = options.max_wal_frame {
        backup.set_max_wal_frame(limit);
    }
    if !options.tables.is_empty() {
        // Keep the sequence table so the selected tables still get their
        // auto-increment values; its rows are filtered by name anyway.
        let tables = options.tables.clone();
        backup.set_filter(move |name| {
            name == SEQUENCE_TABLE || tables.iter().any(|table| table == name)
        });
    }

    let ok = backup.run();

    let written = if options.json {
        match render_json(backup.material(), backup.dropped_tables()) {
            Ok(rendered) => writeln!(out, "{rendered}"),
            Err(error) => {
                let _ = writeln!(err, "error: failed serializing manifest: {error}");
                return 1;
            }
        }
    } else {
        write_manifest(backup.material(), backup.dropped_tables(), out)
    };
    if written.is_err() {
        let _ = writeln!(err, "error: failed writing manifest");
        return 1;
    }

    if ok {
        0
    } else {
        match backup.status() {
            Some(error) => {
                let _ = writeln!(err, "error: {error}");
                error.exit_code()
            }
            None => 1,
        }
    }
}

fn parse_args<I>(args: I) -> Result<CliOptions, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let _argv0 = iter.next();

    let mut db_path: Option<String> = None;
    let mut tables: Vec<String> = Vec::new();
    let mut max_wal_frame: Option<u32> = None;
    let mut json = false;
    let mut show_help = false;

    while let Some(argument) = iter.next() {
        let arg = argument.to_string_lossy();
        let arg_str = arg.as_ref();

        match arg_str {
            "-h" | "--help" => {
                show_help = true;
            }
            "--json" => {
                json = true;
            }
            "-t" | "--table" => {
                let next = iter
                    .next()
                    .ok_or_else(|| String::from("missing table name for `-t/--table`"))?;
                tables.push(next.to_string_lossy().into_owned());
            }
            "--max-wal-frame" => {
                let next = iter.next().ok_or_else(|| {
                    String::from("missing integer argument for `--max-wal-frame`")
                })?;
                max_wal_frame = Some(parse_u32_option(
                    next.to_string_lossy().as_ref(),
                    "--max-wal-frame",
                )?);
            }
            _ => {
                if let Some(value) = arg_str.strip_prefix("-t=") {
                    tables.push(value.to_owned());
                    continue;
                }

                if let Some(value) = arg_str.strip_prefix("--table=") {
                    tables.push(value.to_owned());
                    continue;
                }

                if let Some(value) = arg_str.strip_prefix("--max-wal-frame=") {
                    max_wal_frame = Some(parse_u32_option(value, "--max-wal-frame")?);
                    continue;
                }

                if arg_str.starts_with('-') {
                    return Err(format!("unknown option `{arg_str}`"));
                }

                if db_path.is_some() {
                    return Err(String::from(
                        "too many positional arguments; expected one database path",
                    ));
                }

                db_path = Some(arg_str.to_owned());
            }
        }
    }

    let db_path = match db_path {
        Some(db_path) => db_path,
        None if show_help => String::new(),
        None => return Err(String::from("missing database path")),
    };

    Ok(CliOptions {
        db_path,
        tables,
        max_wal_frame,
        json,
        show_help,
    })
}

fn parse_u32_option(value: &str, flag: &str) -> Result<u32, String> {
    value
        .parse::<u32>()
        .map_err(|_| format!("invalid integer for `{flag}`: `{value}`"))
}

fn write_manifest<W>(material: &Material, dropped: &[DroppedTable], out: &mut W) -> io::Result<()>
where
    W: Write,
{
    if let Some(info) = material.info {
        match info.wal {
            Some(stamp) => writeln!(
                out,
                "page size {}, reserved {}, wal {} ({} frames)",
                info.page_size, info.reserved_bytes, stamp.salt, stamp.frame_count,
            )?,
            None => writeln!(
                out,
                "page size {}, reserved {}, wal none",
                info.page_size, info.reserved_bytes,
            )?,
        }
    }

    for (name, content) in &material.contents {
        writeln!(
            out,
            "table {name}: {} pages, sequence {}",
            content.pages.len(),
            content.sequence,
        )?;
    }

    for table in dropped {
        writeln!(out, "dropped {}: {}", table.name, table.reason)?;
    }

    Ok(())
}

fn render_json(material: &Material, dropped: &[DroppedTable]) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(material)?;
    value["dropped"] = serde_json::to_value(dropped)?;
    serde_json::to_string_pretty(&value)
}

fn write_usage<W>(out: &mut W) -> io::Result<()>
where
    W: Write,
{
    writeln!(
        out,
        "Usage: sqlcarve DB_PATH [-t|--table NAME]... [--max-wal-frame N] [--json]\n\
         \n\
         Walks a possibly damaged SQLite database (absorbing its WAL when one\n\
         is present) and prints a salvage manifest: each surviving table with\n\
         its leaf page count and auto-increment sequence, plus every table\n\
         that had to be dropped and why. `--json` emits the full manifest,\n\
         leaf page numbers and CREATE statements included.\n\
         \n\
         Examples:\n\
         \n\
         sqlcarve app.db\n\
         sqlcarve app.db --json\n\
         sqlcarve app.db -t users -t orders\n\
         sqlcarve app.db --max-wal-frame 0\n",
    )
}
