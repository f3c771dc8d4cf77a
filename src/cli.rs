use clap::Parser;

use crate::config::FilterConfig;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Filter public proxy subscriptions into canonical, policy-compliant links",
    long_about = None
)]
pub struct Args {
    #[arg(short, long, help = "Filter config file (TOML)")]
    pub config: Option<String>,

    #[arg(short, long, help = "Subscription file to filter, `-` for stdin")]
    pub input: Option<String>,

    #[arg(short, long, help = "Output path for accepted links, stdout if omitted")]
    pub output: Option<String>,

    #[arg(short, long, help = "Output path for rejected lines with reasons")]
    pub rejected: Option<String>,

    #[arg(long, help = "Protocol rules file (YAML, JSON or TOML)")]
    pub rules: Option<String>,

    #[arg(long, help = "Banned words file, one term per line")]
    pub banned_words: Option<String>,

    #[arg(short, long, help = "Emit debug log")]
    pub verbose: bool,
}

impl Args {
    /// Overrides config values with the flags given on the command line
    pub fn apply_to(&self, config: &mut FilterConfig) {
        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if let Some(rejected) = &self.rejected {
            config.rejected_output = Some(rejected.clone());
        }
        if let Some(rules) = &self.rules {
            config.rules = Some(rules.clone());
        }
        if let Some(banned_words) = &self.banned_words {
            config.banned_words = Some(banned_words.clone());
        }
    }
}
