//! Output formatting module for Infrastack
//!
//! Colored human output, or one JSON document per message in JSON mode.

use colored::{ColoredString, Colorize};
use std::io::{self, Write};
use std::time::Instant;

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
    /// Start time for duration calculations
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();

        Self {
            use_color,
            json_mode,
            verbosity,
            start_time: Instant::now(),
        }
    }

    /// Whether output is JSON.
    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        if self.json_mode {
            return;
        }

        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("\n{}", line.bright_blue());
            println!("{}", format!("  {}  ", title).bright_blue().bold());
            println!("{}\n", line.bright_blue());
        } else {
            println!("\n{}", line);
            println!("  {}  ", title);
            println!("{}\n", line);
        }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        self.notice("error", "ERROR:".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        self.notice("warning", "WARNING:".yellow().bold(), message);
    }

    pub fn hint(&self, message: &str) {
        self.notice("hint", "HINT:".cyan().bold(), message);
    }

    /// Diagnostics go to stderr so stdout stays parseable.
    fn notice(&self, kind: &str, label: ColoredString, message: &str) {
        if self.json_mode {
            eprintln!("{}", serde_json::json!({ "type": kind, "message": message }));
        } else if self.use_color {
            eprintln!("{} {}", label, message);
        } else {
            eprintln!("{} {}", label.clear(), message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 || self.json_mode {
            return;
        }

        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Print a success line with the elapsed time
    pub fn success(&self, message: &str) {
        if self.json_mode {
            return;
        }

        let elapsed = format_duration(self.start_time.elapsed().as_millis());
        if self.use_color {
            println!("\n{} {} ({})", "OK:".green().bold(), message, elapsed);
        } else {
            println!("\nOK: {} ({})", message, elapsed);
        }
    }

    /// Print plain text as-is, e.g. a rendered plan or script
    pub fn plain(&self, text: &str) {
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }

    /// Print a list of items
    pub fn list(&self, title: &str, items: &[String]) {
        if self.json_mode || items.is_empty() {
            return;
        }

        if self.use_color {
            println!("\n{}:", title.bright_white().bold());
        } else {
            println!("\n{}:", title);
        }

        for item in items {
            if self.use_color {
                println!("  {} {}", "-".bright_black(), item);
            } else {
                println!("  - {}", item);
            }
        }
    }

    /// Print `name = value` pairs, names aligned
    pub fn key_values(&self, pairs: &[(&str, &str)]) {
        let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in pairs {
            if self.use_color {
                println!(
                    "{} = {}",
                    format!("{:width$}", key, width = width).bright_white().bold(),
                    value.green()
                );
            } else {
                println!("{:width$} = {}", key, value, width = width);
            }
        }
    }

    /// Print a JSON document on stdout
    pub fn json(&self, value: &serde_json::Value) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => self.error(&format!("cannot serialize output: {}", e)),
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

fn format_duration(millis: u128) -> String {
    if millis >= 1000 {
        let secs = millis / 1000;
        let millis = millis % 1000;
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}
