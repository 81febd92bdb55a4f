use clap::{ArgMatches, CommandFactory, FromArgMatches, parser::ValueSource};

use crate::app_config::{FileConfig, VerbositySetting};
use crate::cli::Args;

/// Which arguments were given explicitly on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliValueSources {
    pub(crate) max_retries: bool,
    pub(crate) retry_delay: bool,
    pub(crate) stall_timeout: bool,
    pub(crate) connect_timeout: bool,
    pub(crate) verbose: bool,
    pub(crate) quiet: bool,
}

pub(crate) fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = sources_from_matches(&matches);
    (args, sources)
}

fn sources_from_matches(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        max_retries: is_commandline_value(matches, "max_retries"),
        retry_delay: is_commandline_value(matches, "retry_delay"),
        stall_timeout: is_commandline_value(matches, "stall_timeout"),
        connect_timeout: is_commandline_value(matches, "connect_timeout"),
        verbose: is_commandline_value(matches, "verbose"),
        quiet: is_commandline_value(matches, "quiet"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Fills every argument not given on the command line from the file config.
///
/// Values in `file_config` are already range-checked by
/// [`FileConfig::validate`].
pub(crate) fn apply_config_defaults(
    mut args: Args,
    cli_sources: &CliValueSources,
    file_config: Option<&FileConfig>,
) -> Args {
    let Some(file_config) = file_config else {
        return args;
    };

    if !cli_sources.max_retries
        && let Some(max_retries) = file_config.max_retries
    {
        args.max_retries = max_retries;
    }

    if !cli_sources.retry_delay
        && let Some(retry_delay_ms) = file_config.retry_delay_ms
    {
        args.retry_delay = retry_delay_ms;
    }

    if !cli_sources.stall_timeout
        && let Some(stall_timeout_secs) = file_config.stall_timeout_secs
    {
        args.stall_timeout = stall_timeout_secs;
    }

    if !cli_sources.connect_timeout
        && let Some(connect_timeout_secs) = file_config.connect_timeout_secs
    {
        args.connect_timeout = connect_timeout_secs;
    }

    if !cli_sources.verbose
        && !cli_sources.quiet
        && let Some(verbosity) = file_config.verbosity
    {
        apply_config_verbosity(&mut args, verbosity);
    }

    args
}

fn apply_config_verbosity(args: &mut Args, verbosity: VerbositySetting) {
    match verbosity {
        VerbositySetting::Default => {
            args.quiet = false;
            args.verbose = 0;
        }
        VerbositySetting::Verbose => {
            args.quiet = false;
            args.verbose = 1;
        }
        VerbositySetting::Quiet => {
            args.quiet = true;
            args.verbose = 0;
        }
        VerbositySetting::Debug => {
            args.quiet = false;
            args.verbose = 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> (Args, CliValueSources) {
        let matches = Args::command().try_get_matches_from(argv).unwrap();
        let args = Args::from_arg_matches(&matches).unwrap();
        (args, sources_from_matches(&matches))
    }

    fn file_config() -> FileConfig {
        FileConfig {
            max_retries: Some(5),
            retry_delay_ms: Some(100),
            stall_timeout_secs: Some(0),
            connect_timeout_secs: Some(7),
            verbosity: Some(VerbositySetting::Quiet),
        }
    }

    #[test]
    fn test_file_config_fills_defaulted_values() {
        let (args, sources) = parse(&["uploader", "a.tar", "https://store.example/a.tar"]);
        let args = apply_config_defaults(args, &sources, Some(&file_config()));
        assert_eq!(args.max_retries, 5);
        assert_eq!(args.retry_delay, 100);
        assert_eq!(args.stall_timeout, 0);
        assert_eq!(args.connect_timeout, 7);
        assert!(args.quiet);
    }

    #[test]
    fn test_commandline_values_win_over_file_config() {
        let (args, sources) = parse(&[
            "uploader",
            "a.tar",
            "https://store.example/a.tar",
            "-r",
            "1",
            "--stall-timeout",
            "12",
            "-v",
        ]);
        assert!(sources.max_retries);
        assert!(!sources.retry_delay);

        let args = apply_config_defaults(args, &sources, Some(&file_config()));
        assert_eq!(args.max_retries, 1);
        assert_eq!(args.stall_timeout, 12);
        assert_eq!(args.retry_delay, 100);
        assert_eq!(args.verbose, 1);
        assert!(!args.quiet);
    }

    #[test]
    fn test_explicit_default_value_still_counts_as_commandline() {
        let (args, sources) = parse(&[
            "uploader",
            "a.tar",
            "https://store.example/a.tar",
            "--max-retries",
            "2",
        ]);
        let args = apply_config_defaults(args, &sources, Some(&file_config()));
        assert_eq!(args.max_retries, 2);
    }

    #[test]
    fn test_no_file_config_keeps_args() {
        let (args, sources) = parse(&["uploader", "a.tar", "https://store.example/a.tar"]);
        let args = apply_config_defaults(args, &sources, None);
        assert_eq!(args.max_retries, 2);
        assert_eq!(args.stall_timeout, 30);
        assert!(!args.quiet);
    }

    #[test]
    fn test_config_debug_verbosity_maps_to_trace_count() {
        let (args, sources) = parse(&["uploader", "a.tar", "https://store.example/a.tar"]);
        let config = FileConfig {
            verbosity: Some(VerbositySetting::Debug),
            ..FileConfig::default()
        };
        let args = apply_config_defaults(args, &sources, Some(&config));
        assert_eq!(args.verbose, 2);
    }
}
