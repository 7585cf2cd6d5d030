//! Developer tracing. Each macro compiles to nothing unless its cargo feature
//! is enabled, so it can be left in hot paths.

/// Trace parser decisions (feature `show_parse`)
macro_rules! parse_log {
    ($($arg:tt)+) => {{
        #[cfg(feature = "show_parse")]
        {
            use colored::Colorize;
            eprintln!("{} {}", "[parse]".green(), format!($($arg)+));
        }
    }};
}

pub(crate) use parse_log;

/// Trace optimizer rewrites (feature `show_opt`)
macro_rules! opt_log {
    ($($arg:tt)+) => {{
        #[cfg(feature = "show_opt")]
        {
            use colored::Colorize;
            eprintln!("{} {}", "[opt]".yellow(), format!($($arg)+));
        }
    }};
}

pub(crate) use opt_log;
