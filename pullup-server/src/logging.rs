use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter};

/// Our own crates log at info and up; everything else stays quiet unless it
/// has something alarming to say.
const WORKSPACE_CRATES: [&str; 3] = ["pullup_core", "pullup_domain", "pullup_server"];

pub fn init_logger() {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {:>5} {} {}",
                chrono::Local::now()
                    .format("%m-%d %H:%M:%S")
                    .to_string()
                    .dimmed(),
                paint_level(record.level()),
                short_target(record.target()).bold(),
                message
            ))
        })
        .level(LevelFilter::Warn);

    for krate in WORKSPACE_CRATES {
        dispatch = dispatch.level_for(krate, LevelFilter::Info);
    }

    dispatch
        .chain(std::io::stdout())
        .apply()
        .expect("logger installs once")
}

fn paint_level(level: Level) -> ColoredString {
    match level {
        Level::Error => "ERROR".red().bold(),
        Level::Warn => "WARN".yellow(),
        Level::Info => "INFO".green(),
        Level::Debug => "DEBUG".cyan(),
        Level::Trace => "TRACE".normal(),
    }
}

/// `pullup_domain::chat::connection` renders as `chat::connection`; foreign
/// targets keep their full path so their origin stays obvious.
fn short_target(target: &str) -> &str {
    WORKSPACE_CRATES
        .iter()
        .find_map(|krate| target.strip_prefix(krate))
        .map(|rest| rest.trim_start_matches("::"))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_target() {
        assert_eq!(short_target("pullup_domain::chat::connection"), "chat::connection");
        assert_eq!(short_target("pullup_server"), "pullup_server", "bare crate keeps its name");
        assert_eq!(short_target("hyper::proto"), "hyper::proto", "foreign crates are untouched");
    }
}
