use std::path::PathBuf;

use cartridge::{ConvertOptions, ExcludeKind};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::commands::CommandResult;
use crate::error::{CliError, ExitStatus};
use crate::util::{path_arg, require_dir};

pub fn command() -> Command {
    Command::new("convert")
        .about("Convert an extracted package directory into a 1.1 package")
        .arg(
            Arg::new("source")
                .value_name("SOURCE")
                .required(true)
                .help("Directory holding the extracted package."),
        )
        .arg(
            Arg::new("destination")
                .value_name("DEST")
                .required(true)
                .help("Directory to create for the converted package. Must not exist."),
        )
        .arg(
            Arg::new("fallback-mc")
                .long("fallback-mc")
                .action(ArgAction::SetTrue)
                .help("Turn malformed true/false items into multiple-choice items instead of skipping them."),
        )
        .arg(
            Arg::new("exclude")
                .long("exclude")
                .value_name("KINDS")
                .help("Comma-separated resource kinds to remove: external-tool, assessment, discussion, web-link, content-page, generic-file."),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .action(ArgAction::SetTrue)
                .help("Fail when any true/false item had to be skipped."),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Convert even when the package is already at version 1.1 or below."),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("YAML file with conversion options. Flags override its values."),
        )
}

pub fn run(matches: &ArgMatches) -> Result<CommandResult, CliError> {
    let source = path_arg(matches, "source")?;
    let destination = path_arg(matches, "destination")?;
    require_dir(&source, "source")?;
    if destination.exists() {
        return Err(CliError::new(
            format!("destination {} already exists", destination.display()),
            ExitStatus::Usage,
        ));
    }

    let options = resolve_options(matches)?;
    tracing::info!(
        source = %source.display(),
        destination = %destination.display(),
        options = ?options,
        "starting conversion"
    );
    let conversion = cartridge::convert(&source, &destination, &options)?;

    Ok(CommandResult::Converted {
        source: source.display().to_string(),
        destination: conversion.output.display().to_string(),
        report: conversion.report,
    })
}

fn resolve_options(matches: &ArgMatches) -> Result<ConvertOptions, CliError> {
    let mut options = match matches.get_one::<String>("config") {
        Some(path) => ConvertOptions::load(&PathBuf::from(path)).map_err(|err| {
            CliError::new(format!("failed to load {path}: {err}"), ExitStatus::Config)
        })?,
        None => ConvertOptions::default(),
    };

    if matches.get_flag("fallback-mc") {
        options.fallback_to_multiple_choice = true;
    }
    if matches.get_flag("strict") {
        options.strict_answer_keys = true;
    }
    if matches.get_flag("force") {
        options.force = true;
    }
    if let Some(kinds) = matches.get_one::<String>("exclude") {
        options.exclude_kinds = ExcludeKind::parse_list(kinds)
            .map_err(|err| CliError::new(format!("--exclude: {err}"), ExitStatus::Usage))?;
    }
    Ok(options)
}
