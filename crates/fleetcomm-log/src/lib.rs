// ABOUTME: Shared logging setup for all fleetcomm binaries
// ABOUTME: Two functions: init() for plain stderr, init_for() for crate-filtered stderr

use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// Crate-filtered logging to stderr. Default: INFO for named crates, WARN for everything else.
/// Stdout stays free for status output.
pub fn init_for(crate_names: &[&str]) {
    let mut filter = EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into());
    for name in crate_names {
        let directive = format!("{name}=info");
        filter = filter.add_directive(
            directive
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        );
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn exports_init() {
        let _ = super::init as fn();
    }

    #[test]
    fn exports_init_for() {
        let _ = super::init_for as fn(&[&str]);
    }

    #[test]
    fn crate_directive_parses() {
        let directive: Result<tracing_subscriber::filter::Directive, _> =
            "fleetcomm=info".parse();
        assert!(directive.is_ok());
    }
}
