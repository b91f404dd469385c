use anyhow::Result;
use clap::{error::ErrorKind, CommandFactory, Parser};
use snphylo_rs::args::Arguments;
use snphylo_rs::config::PipelineConfig;
use snphylo_rs::pipeline::Pipeline;

/// Print the help text and the error, then exit with status 1.
fn exit_with_help(msg: &str) -> ! {
    let help = Arguments::command().render_help();
    eprintln!("{help}");
    eprintln!("ERROR: {msg}");
    std::process::exit(1);
}

/// The message of a clap usage error without clap's own `error:` tag and
/// usage footer, since the full help is printed anyway.
fn usage_error_message(e: &clap::Error) -> String {
    let text = e.to_string();
    let text = match text.find("\nUsage:") {
        Some(i) => &text[..i],
        None => text.as_str(),
    };
    let text = text.trim();
    text.strip_prefix("error:").unwrap_or(text).trim().to_owned()
}

fn run(cli: Arguments) -> Result<()> {
    let config = PipelineConfig::from_args(&cli)?;
    log::debug!("configuration:\n{}", config.to_toml_string()?);
    log::debug!("{:#?}", &cli);

    let workdir = std::env::current_dir()?;
    let pipeline = Pipeline::new(cli, config, workdir)?;

    let start = std::time::Instant::now();
    let outputs = pipeline.run()?;
    log::info!("finished in {} seconds", start.elapsed().as_secs());

    print!("{}", outputs.summary());
    Ok(())
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = match Arguments::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => exit_with_help(&usage_error_message(&e)),
        },
    };

    if let Err(e) = run(cli) {
        exit_with_help(&e.to_string());
    }
}

#[test]
fn usage_error_message_drops_the_footer() {
    let e = Arguments::try_parse_from(["snphylo-rs", "-v", "a.vcf", "-H", "a.txt"]).unwrap_err();
    let msg = usage_error_message(&e);
    assert!(msg.contains("cannot be used with"), "{msg}");
    assert!(!msg.contains("Usage:"), "{msg}");
    assert!(!msg.contains("For more information"), "{msg}");
    assert!(!msg.starts_with("error:"), "{msg}");
}
