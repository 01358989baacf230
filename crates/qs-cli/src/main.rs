//! QuietStream CLI
//!
//! Works with the rule tables off the page: classify URLs, sanitize saved
//! API responses, print the suppression stylesheet, export and validate
//! rule tables, and fetch through the interception gate.

use std::fs;
use std::rc::Rc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use serde::Serialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use qs_core::{
    EngineConfig, HttpRequest, Interceptor, MatchResult, PatternRegistry, Reconciler, Sanitizer,
};

mod transport;

use transport::ReqwestTransport;

#[derive(Parser)]
#[command(name = "qs-cli")]
#[command(about = "QuietStream rule table tools")]
struct Cli {
    /// Rule table to use instead of the built-in one
    #[arg(short, long, global = true)]
    rules: Option<String>,

    /// Verbose output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify URLs as pass, block or prune
    Classify {
        /// URLs to classify
        #[arg(required = true)]
        urls: Vec<String>,

        /// Print one JSON object per URL
        #[arg(long)]
        json: bool,
    },

    /// Strip ad-bearing keys from a saved JSON response
    Sanitize {
        /// Input JSON file
        #[arg(short, long)]
        input: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print the generated suppression stylesheet
    Css,

    /// Summarize the active rule table
    Rules {
        /// Write the table as JSON to this file
        #[arg(long)]
        export: Option<String>,
    },

    /// Validate a rule table file
    Validate {
        /// Rule table JSON file
        #[arg(short, long)]
        input: String,
    },

    /// Fetch a URL through the interception gate
    Fetch {
        /// URL to fetch
        url: String,

        /// Write the delivered body to this file
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = load_registry(cli.rules.as_deref()).and_then(|registry| match cli.command {
        Commands::Classify { urls, json } => cmd_classify(&registry, &urls, json),
        Commands::Sanitize { input, output } => cmd_sanitize(&registry, &input, output.as_deref()),
        Commands::Css => cmd_css(registry),
        Commands::Rules { export } => cmd_rules(&registry, export.as_deref()),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Fetch { url, output } => cmd_fetch(registry, &url, output.as_deref()),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_registry(path: Option<&str>) -> Result<PatternRegistry, String> {
    let Some(path) = path else {
        return Ok(PatternRegistry::builtin());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    PatternRegistry::from_json(&text).map_err(|e| format!("'{}': {}", path, e))
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Serialize)]
struct Classification<'a> {
    url: &'a str,
    class: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<u32>,
}

impl<'a> Classification<'a> {
    fn new(url: &'a str, result: MatchResult) -> Self {
        Self {
            url,
            class: result.class.as_str(),
            rule: u32::try_from(result.rule_index).ok(),
        }
    }

    fn line(&self) -> String {
        match self.rule {
            Some(rule) => format!("{:<6} {} (rule {})", self.class, self.url, rule),
            None => format!("{:<6} {}", self.class, self.url),
        }
    }
}

fn cmd_classify(registry: &PatternRegistry, urls: &[String], json: bool) -> Result<(), String> {
    for url in urls {
        let classification = Classification::new(url, registry.matcher().match_url(url));
        if json {
            let line = serde_json::to_string(&classification).map_err(|e| e.to_string())?;
            println!("{line}");
        } else {
            println!("{}", classification.line());
        }
    }
    Ok(())
}

fn cmd_sanitize(registry: &PatternRegistry, input: &str, output: Option<&str>) -> Result<(), String> {
    let text = fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;

    let start = Instant::now();
    let sanitizer = Sanitizer::new(registry);
    let found = ad_keys_in(&sanitizer, &text);
    let clean = sanitizer
        .sanitize_text(&text)
        .map_err(|e| format!("'{}': {}", input, e))?;
    let elapsed = start.elapsed();

    match output {
        Some(path) => {
            fs::write(path, clean.as_bytes()).map_err(|e| format!("Failed to write '{}': {}", path, e))?;
            eprintln!("Sanitized '{}' to '{}'", input, path);
            eprintln!("  Ad keys:  {}", describe_keys(&found));
            eprintln!("  Size:     {} -> {} bytes", text.len(), clean.len());
            eprintln!("  Time:     {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        }
        None => {
            log::info!("top-level ad keys: {}", describe_keys(&found));
            println!("{clean}");
        }
    }
    Ok(())
}

/// Top-level ad-bearing keys present in a response document.
fn ad_keys_in<'a>(sanitizer: &Sanitizer<'a>, text: &str) -> Vec<&'a str> {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|tree| sanitizer.ad_bearing_keys(&tree))
        .unwrap_or_default()
}

fn describe_keys(keys: &[&str]) -> String {
    if keys.is_empty() {
        "none".to_string()
    } else {
        keys.join(", ")
    }
}

fn cmd_css(registry: PatternRegistry) -> Result<(), String> {
    let reconciler = Reconciler::new(Rc::new(registry), Rc::new(EngineConfig::default()));
    println!("{}", reconciler.stylesheet());
    Ok(())
}

fn print_summary(registry: &PatternRegistry) {
    let table = registry.table();
    let matcher = registry.matcher();
    println!("  Ad keys:       {}", table.ad_keys.len());
    println!("  Block rules:   {}", matcher.block_rule_count());
    println!("  Prune rules:   {}", matcher.prune_rule_count());
    println!("  Selectors:     {}", table.selectors.len());
    println!("  Skip buttons:  {}", table.skip_buttons.len());
    println!("  Constants:     {}", table.global_constants.len());
    println!("  Pinned paths:  {}", table.pinned_paths.len());
}

fn cmd_rules(registry: &PatternRegistry, export: Option<&str>) -> Result<(), String> {
    println!("Rule table:");
    print_summary(registry);

    if let Some(path) = export {
        let json = registry.table().to_json_pretty().map_err(|e| e.to_string())?;
        fs::write(path, json).map_err(|e| format!("Failed to write '{}': {}", path, e))?;
        println!("Exported to '{}'", path);
    }
    Ok(())
}

fn cmd_validate(input: &str) -> Result<(), String> {
    let text = fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;
    let registry = PatternRegistry::from_json(&text).map_err(|e| format!("Invalid rule table: {}", e))?;

    println!("Rule table '{}' is valid", input);
    print_summary(&registry);
    Ok(())
}

fn cmd_fetch(registry: PatternRegistry, url: &str, output: Option<&str>) -> Result<(), String> {
    let interceptor = Interceptor::new(Rc::new(registry));
    let class = interceptor.classify(url);
    let transport = ReqwestTransport::new().map_err(|e| e.to_string())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;
    let start = Instant::now();
    let response = runtime
        .block_on(interceptor.fetch(&transport, HttpRequest::get(url)))
        .map_err(|e| e.to_string())?;
    let elapsed = start.elapsed();

    eprintln!("{} {}", class.as_str(), url);
    eprintln!("  Status:   {} {}", response.status, response.status_text);
    eprintln!("  Headers:  {}", response.headers.len());
    if let Some(content_type) = response.header("content-type") {
        eprintln!("  Type:     {}", content_type);
    }
    eprintln!("  Body:     {} bytes", response.body.len());
    eprintln!("  Time:     {:.1}ms", elapsed.as_secs_f64() * 1000.0);

    match output {
        Some(path) => fs::write(path, &response.body).map_err(|e| format!("Failed to write '{}': {}", path, e)),
        None => {
            println!("{}", String::from_utf8_lossy(&response.body));
            Ok(())
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

fn verbosity(count: u8) -> LevelFilter {
    match count {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Env filter directive for `-v` occurrences; `RUST_LOG` wins when set.
fn filter_directive(count: u8) -> String {
    verbosity(count).to_string().to_lowercase()
}

/// Route the engine's `log` records through a stderr fmt subscriber so
/// stdout stays reserved for command output.
fn init_logging(count: u8) {
    let installed = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(count))))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    if let Err(e) = installed {
        eprintln!("Warning: logging disabled: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qs_core::RuleTable;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(verbosity(0), LevelFilter::Warn);
        assert_eq!(verbosity(2), LevelFilter::Debug);
        assert_eq!(verbosity(9), LevelFilter::Trace);
    }

    #[test]
    fn test_filter_directive_parses() {
        assert_eq!(filter_directive(0), "warn");
        assert_eq!(filter_directive(1), "info");
        for count in 0..4 {
            assert!(filter_directive(count).parse::<EnvFilter>().is_ok());
        }
    }

    #[test]
    fn test_classification_lines() {
        let registry = PatternRegistry::builtin();
        let url = "https://www.youtube.com/pagead/adview?id=1";
        let blocked = Classification::new(url, registry.matcher().match_url(url));
        assert_eq!(blocked.class, "block");
        assert!(blocked.rule.is_some());
        assert!(blocked.line().starts_with("block  https://www.youtube.com/pagead/"));

        let url = "https://www.gstatic.com/logo.png";
        let passed = Classification::new(url, registry.matcher().match_url(url));
        assert_eq!(passed.rule, None);
        assert_eq!(passed.line(), "pass   https://www.gstatic.com/logo.png");
    }

    #[test]
    fn test_classification_json_omits_missing_rule() {
        let classification = Classification::new("https://example.com/", MatchResult::default());
        let json = serde_json::to_string(&classification).unwrap();
        assert_eq!(json, r#"{"url":"https://example.com/","class":"pass"}"#);
    }

    #[test]
    fn test_load_registry_from_exported_table() {
        let path = std::env::temp_dir().join(format!("qs-cli-rules-{}.json", std::process::id()));
        let json = RuleTable::builtin().to_json_pretty().unwrap();
        fs::write(&path, json).unwrap();

        let registry = load_registry(path.to_str()).unwrap();
        assert_eq!(registry.table(), &RuleTable::builtin());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_registry_reports_bad_regex() {
        let path = std::env::temp_dir().join(format!("qs-cli-bad-{}.json", std::process::id()));
        let mut table = RuleTable::builtin();
        table.prune[0].pattern = "(".to_string();
        fs::write(&path, table.to_json_pretty().unwrap()).unwrap();

        let err = load_registry(path.to_str()).unwrap_err();
        assert!(err.contains("Invalid rule table"));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_ad_keys_in_response() {
        let registry = PatternRegistry::builtin();
        let sanitizer = Sanitizer::new(&registry);
        let text = r#"{"playerAds":[{"x":1}],"adPlacements":null,"adSlots":[],"videoDetails":{}}"#;
        assert_eq!(ad_keys_in(&sanitizer, text), vec!["adSlots", "playerAds"]);
        assert!(ad_keys_in(&sanitizer, "not json").is_empty());
        assert_eq!(describe_keys(&[]), "none");
        assert_eq!(describe_keys(&["playerAds", "adSlots"]), "playerAds, adSlots");
    }

    #[test]
    fn test_missing_rules_file() {
        let err = load_registry(Some("/nonexistent/rules.json")).unwrap_err();
        assert!(err.starts_with("Failed to read"));
    }
}
