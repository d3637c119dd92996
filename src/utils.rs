use pretty_env_logger::formatted_builder;

/// Installs the global logger
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies.
pub fn init_logger(default_filter: &str) -> Result<(), log::SetLoggerError> {
    let mut builder = formatted_builder();

    match std::env::var("RUST_LOG") {
        Ok(filters) if !filters.trim().is_empty() => builder.parse_filters(&filters),
        _ => builder.parse_filters(default_filter),
    };

    builder.try_init()
}

/// Maps a `-v` repeat count onto a log filter for this crate
pub fn verbosity_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "tonutils_boc=debug,info",
        _ => "tonutils_boc=trace,info",
    }
}
